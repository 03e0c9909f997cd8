use anyhow::Context;
use colored::Colorize;
use tess_client::{StoreClient, Tessera};
use tess_engine::{EntityDescription, Schema};
use tess_gate::GateConfig;
use tess_predicate::Predicate;
use tess_types::{RecordId, Snapshot};
use tracing::debug;

use crate::cli::*;
use crate::values;

pub async fn run_command(cli: Cli) -> anyhow::Result<()> {
    let config = GateConfig::load(&cli.config)
        .with_context(|| format!("loading {}", cli.config.display()))?;
    debug!(config = %cli.config.display(), store = %cli.store, "configuration loaded");

    if let Command::Schema = cli.command {
        return cmd_schema(&config.model, cli.format);
    }

    let model = config.model.clone();
    let client = Tessera::new(config);
    client.initialize(&cli.store, false).await?;

    let result = match cli.command {
        Command::Schema => Ok(()),
        Command::Insert(args) => cmd_insert(&client, &model, args, cli.format).await,
        Command::Fetch(args) => cmd_fetch(&client, args, cli.format).await,
        Command::Exists(args) => cmd_exists(&client, args, cli.format).await,
        Command::Update(args) => cmd_update(&client, &model, args, cli.format).await,
        Command::Delete(args) => cmd_delete(&client, args).await,
    };
    client.shutdown().await?;
    result
}

fn entity<'a>(model: &'a Schema, name: &str) -> anyhow::Result<&'a EntityDescription> {
    model
        .entity(name)
        .with_context(|| format!("entity not found: {name}"))
}

fn predicate(args: &FetchArgs) -> anyhow::Result<Predicate> {
    let Some(filter) = &args.filter else {
        return Ok(Predicate::all());
    };
    let arguments = args
        .args
        .iter()
        .map(|a| values::parse_loose(a))
        .collect::<anyhow::Result<Vec<_>>>()?;
    Ok(Predicate::raw(filter.clone(), arguments))
}

fn cmd_schema(model: &Schema, format: OutputFormat) -> anyhow::Result<()> {
    if format == OutputFormat::Json {
        println!("{}", serde_json::to_string_pretty(model)?);
        return Ok(());
    }
    println!("Model version {}", model.version.to_string().bold());
    for entity in &model.entities {
        println!("\n{}", entity.name.yellow().bold());
        for attribute in &entity.attributes {
            let mut flags = Vec::new();
            if !attribute.optional {
                flags.push("required");
            }
            if attribute.generated {
                flags.push("generated");
            }
            if attribute.default.is_some() {
                flags.push("default");
            }
            let flags = if flags.is_empty() {
                String::new()
            } else {
                format!(" ({})", flags.join(", "))
            };
            println!("  {}: {}{}", attribute.name, attribute.kind.to_string().cyan(), flags.dimmed());
        }
        for relationship in &entity.relationships {
            let arity = if relationship.to_many { "to-many" } else { "to-one" };
            println!(
                "  {} → {} ({})",
                relationship.name,
                relationship.destination.cyan(),
                arity.dimmed()
            );
        }
    }
    Ok(())
}

async fn cmd_insert(
    client: &Tessera,
    model: &Schema,
    args: InsertArgs,
    format: OutputFormat,
) -> anyhow::Result<()> {
    let changeset = values::changeset(entity(model, &args.entity)?, &args.assignments)?;
    let snapshot = client.insert(&args.entity, changeset).await?;
    if format == OutputFormat::Text {
        println!("{} Inserted {}", "✓".green().bold(), snapshot.record_id().to_string().yellow());
    }
    print_one(Some(&snapshot), format)
}

async fn cmd_fetch(client: &Tessera, args: FetchArgs, format: OutputFormat) -> anyhow::Result<()> {
    let snapshots = client.fetch(&args.entity, Some(predicate(&args)?)).await?;
    if snapshots.is_empty() && format == OutputFormat::Text {
        println!("No matching {} records.", args.entity.bold());
        return Ok(());
    }
    print_list(&snapshots, format)
}

async fn cmd_exists(client: &Tessera, args: FetchArgs, format: OutputFormat) -> anyhow::Result<()> {
    let found = client.exists(&args.entity, predicate(&args)?).await?;
    if found.is_none() && format == OutputFormat::Text {
        println!("No matching {} record.", args.entity.bold());
        return Ok(());
    }
    print_one(found.as_ref(), format)
}

async fn cmd_update(
    client: &Tessera,
    model: &Schema,
    args: UpdateArgs,
    format: OutputFormat,
) -> anyhow::Result<()> {
    let id: RecordId = args.id.parse()?;
    let changeset = values::changeset(entity(model, id.entity())?, &args.assignments)?;
    let snapshot = client.update(&id, changeset).await?;
    if format == OutputFormat::Text {
        println!("{} Updated {}", "✓".green().bold(), id.to_string().yellow());
    }
    print_one(Some(&snapshot), format)
}

async fn cmd_delete(client: &Tessera, args: DeleteArgs) -> anyhow::Result<()> {
    let id: RecordId = args.id.parse()?;
    client.delete(&id).await?;
    println!("{} Deleted {}", "✓".green().bold(), id.to_string().yellow());
    Ok(())
}

fn snapshot_json(snapshot: &Snapshot) -> serde_json::Value {
    let attributes = snapshot
        .attributes()
        .iter()
        .map(|(key, value)| (key.clone(), value.to_json()))
        .collect::<serde_json::Map<_, _>>();
    serde_json::json!({
        "id": snapshot.record_id().to_string(),
        "attributes": attributes,
    })
}

/// `fetch` output: a JSON array whatever the number of matches.
fn list_json(snapshots: &[Snapshot]) -> serde_json::Value {
    serde_json::Value::Array(snapshots.iter().map(snapshot_json).collect())
}

/// Single-record output: an object, or `null` when nothing matched.
fn one_json(snapshot: Option<&Snapshot>) -> serde_json::Value {
    snapshot.map_or(serde_json::Value::Null, snapshot_json)
}

fn print_list(snapshots: &[Snapshot], format: OutputFormat) -> anyhow::Result<()> {
    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&list_json(snapshots))?),
        OutputFormat::Text => snapshots.iter().for_each(print_text),
    }
    Ok(())
}

fn print_one(snapshot: Option<&Snapshot>, format: OutputFormat) -> anyhow::Result<()> {
    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&one_json(snapshot))?),
        OutputFormat::Text => snapshot.into_iter().for_each(print_text),
    }
    Ok(())
}

fn print_text(snapshot: &Snapshot) {
    println!("{}", snapshot.record_id().to_string().yellow().bold());
    for (key, value) in snapshot.attributes() {
        println!("  {}: {}", key, value);
    }
}
