use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

#[derive(Parser)]
#[command(name = "tess", about = "Tessera: typed records behind a serialized gate", version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// TOML file holding the data model and store directory
    #[arg(short, long, global = true, default_value = "tessera.toml")]
    pub config: PathBuf,

    /// Name of the store to open
    #[arg(short, long, global = true, default_value = "default")]
    pub store: String,

    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[arg(long, global = true, default_value = "text")]
    pub format: OutputFormat,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
pub enum Command {
    /// Show the data model
    Schema,
    /// Create a record
    Insert(InsertArgs),
    /// List records matching a filter
    Fetch(FetchArgs),
    /// Show the first record matching a filter
    Exists(FetchArgs),
    /// Change fields of a record
    Update(UpdateArgs),
    /// Remove a record
    Delete(DeleteArgs),
}

#[derive(Args)]
pub struct InsertArgs {
    pub entity: String,
    /// Field assignments, `key=value`
    pub assignments: Vec<String>,
}

#[derive(Args)]
pub struct FetchArgs {
    pub entity: String,
    /// Filter in the query format, e.g. `year > %@ AND title CONTAINS[c] "dune"`
    #[arg(short = 'w', long = "where")]
    pub filter: Option<String>,
    /// Values substituted for `%@` placeholders, in order
    #[arg(short, long = "arg")]
    pub args: Vec<String>,
}

#[derive(Args)]
pub struct UpdateArgs {
    /// Record id, `tess://<store>/<entity>/p<key>`
    pub id: String,
    pub assignments: Vec<String>,
}

#[derive(Args)]
pub struct DeleteArgs {
    pub id: String,
}
