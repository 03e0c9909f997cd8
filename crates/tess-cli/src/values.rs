use anyhow::{anyhow, bail, Context};
use chrono::{DateTime, NaiveDate, Utc};
use tess_engine::EntityDescription;
use tess_types::{AttributeValue, Changeset, Uri, ValueKind};
use uuid::Uuid;

/// Split `key=value`.
pub fn split_assignment(text: &str) -> anyhow::Result<(&str, &str)> {
    match text.split_once('=') {
        Some((key, value)) if !key.trim().is_empty() => Ok((key.trim(), value)),
        _ => bail!("expected key=value, got `{text}`"),
    }
}

/// Interpret a command-line value: JSON when it parses, a plain string
/// otherwise.
pub fn parse_loose(text: &str) -> anyhow::Result<AttributeValue> {
    match serde_json::from_str::<serde_json::Value>(text) {
        Ok(json) => Ok(AttributeValue::try_from(json)?),
        Err(_) => Ok(AttributeValue::String(text.to_string())),
    }
}

/// Build a changeset from `key=value` assignments against `entity`.
///
/// Strings are converted to the declared kind for dates, uuids and uris;
/// a lone uri given to a to-many relationship becomes a one-element list.
/// Numeric narrowing is left to the store.
pub fn changeset(entity: &EntityDescription, assignments: &[String]) -> anyhow::Result<Changeset> {
    let mut changeset = Changeset::new();
    for assignment in assignments {
        let (key, raw) = split_assignment(assignment)?;
        let value = coerce(entity, key, parse_loose(raw)?)
            .with_context(|| format!("{}.{key}", entity.name))?;
        changeset.set(key, value);
    }
    Ok(changeset)
}

fn coerce(
    entity: &EntityDescription,
    key: &str,
    value: AttributeValue,
) -> anyhow::Result<AttributeValue> {
    if let Some(attribute) = entity.attribute(key) {
        return match (attribute.kind, value) {
            (ValueKind::String, AttributeValue::Int64(v)) => Ok(AttributeValue::String(v.to_string())),
            (ValueKind::String, AttributeValue::Double(v)) => Ok(AttributeValue::String(v.to_string())),
            (ValueKind::String, AttributeValue::Bool(v)) => Ok(AttributeValue::String(v.to_string())),
            (ValueKind::Date, AttributeValue::String(s)) => parse_date(&s).map(AttributeValue::Date),
            (ValueKind::Uuid, AttributeValue::String(s)) => Ok(AttributeValue::Uuid(
                Uuid::parse_str(&s).with_context(|| format!("invalid uuid `{s}`"))?,
            )),
            (ValueKind::Uri, AttributeValue::String(s)) => Ok(AttributeValue::Uri(Uri::parse(s)?)),
            (ValueKind::Binary, AttributeValue::String(s)) => Ok(AttributeValue::Binary(s.into_bytes())),
            (_, value) => Ok(value),
        };
    }
    if let Some(relationship) = entity.relationship(key) {
        return match value {
            AttributeValue::String(s) if relationship.to_many => {
                Ok(AttributeValue::List(vec![AttributeValue::Uri(Uri::parse(s)?)]))
            }
            AttributeValue::String(s) => Ok(AttributeValue::Uri(Uri::parse(s)?)),
            AttributeValue::List(items) => items
                .into_iter()
                .map(|item| match item {
                    AttributeValue::String(s) => Ok(AttributeValue::Uri(Uri::parse(s)?)),
                    other => Ok(other),
                })
                .collect::<anyhow::Result<Vec<_>>>()
                .map(AttributeValue::List),
            other => Ok(other),
        };
    }
    // Undeclared keys are reported by the store with the gate's error.
    Ok(value)
}

/// RFC 3339 timestamps or plain `YYYY-MM-DD` dates (midnight UTC).
fn parse_date(text: &str) -> anyhow::Result<DateTime<Utc>> {
    if let Ok(date) = DateTime::parse_from_rfc3339(text) {
        return Ok(date.with_timezone(&Utc));
    }
    NaiveDate::parse_from_str(text, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|d| d.and_utc())
        .ok_or_else(|| anyhow!("invalid date `{text}`"))
}
