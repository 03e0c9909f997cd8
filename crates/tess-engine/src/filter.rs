use std::cmp::Ordering;
use std::fmt;

use tess_predicate::{Comparison, ComparisonOptions, CompoundKind, Operator, Predicate};
use tess_types::{AttributeValue, Record, RecordId};
use unicode_normalization::char::is_combining_mark;
use unicode_normalization::UnicodeNormalization;

use crate::error::{FilterError, FilterResult};
use crate::format;
use crate::record::ManagedRecord;
use crate::schema::{EntityDescription, Schema};

/// The engine's own filter representation.
///
/// Built from a [`Predicate`] with [`NativeFilter::compile`] or from a
/// format string with [`NativeFilter::parse`]. Every call returns a fresh,
/// independently owned tree.
#[derive(Clone, Debug, PartialEq)]
pub enum NativeFilter {
    True,
    False,
    Compare {
        key: String,
        op: Operator,
        value: AttributeValue,
        options: ComparisonOptions,
    },
    /// Some record reached through the to-many `relation` has `key op value`.
    Any {
        relation: String,
        key: String,
        op: Operator,
        value: AttributeValue,
        options: ComparisonOptions,
    },
    And(Vec<NativeFilter>),
    Or(Vec<NativeFilter>),
    Not(Box<NativeFilter>),
}

impl NativeFilter {
    /// Lower a predicate tree into a native filter.
    pub fn compile(predicate: &Predicate) -> FilterResult<Self> {
        match predicate {
            Predicate::True => Ok(Self::True),
            Predicate::Comparison(c) => Self::comparison(c),
            Predicate::Any {
                relation,
                condition,
            } => {
                check_operand(&condition.key, condition.operator, &condition.value)?;
                Ok(Self::Any {
                    relation: relation.clone(),
                    key: condition.key.clone(),
                    op: condition.operator,
                    value: condition.value.clone(),
                    options: condition.options,
                })
            }
            Predicate::Compound { kind, children } => {
                let children = children
                    .iter()
                    .map(Self::compile)
                    .collect::<FilterResult<Vec<_>>>()?;
                Ok(match kind {
                    CompoundKind::And if children.is_empty() => Self::True,
                    CompoundKind::And => Self::And(children),
                    CompoundKind::Or if children.is_empty() => Self::False,
                    CompoundKind::Or => Self::Or(children),
                    CompoundKind::Not => match children.into_iter().next() {
                        Some(child) => Self::Not(Box::new(child)),
                        None => Self::False,
                    },
                })
            }
            Predicate::Raw { format, arguments } => Self::parse(format, arguments),
        }
    }

    /// Parse the native filter language, binding `%@` placeholders to
    /// `arguments` in order.
    pub fn parse(source: &str, arguments: &[AttributeValue]) -> FilterResult<Self> {
        format::parse(source, arguments)
    }

    fn comparison(c: &Comparison) -> FilterResult<Self> {
        check_operand(&c.key, c.operator, &c.value)?;
        Ok(Self::Compare {
            key: c.key.clone(),
            op: c.operator,
            value: c.value.clone(),
            options: c.options,
        })
    }

    pub fn is_true(&self) -> bool {
        matches!(self, Self::True)
    }

    /// Check every key against `entity`, following `ANY` into the
    /// relationship's destination entity.
    pub fn validate(&self, entity: &EntityDescription, schema: &Schema) -> FilterResult<()> {
        match self {
            Self::True | Self::False => Ok(()),
            Self::Compare { key, .. } => require_key(entity, key),
            Self::Any { relation, key, .. } => {
                let rel = entity
                    .relationship(relation)
                    .filter(|r| r.to_many)
                    .ok_or_else(|| FilterError::NotToMany {
                        entity: entity.name.clone(),
                        relation: relation.clone(),
                    })?;
                let destination = schema.entity(&rel.destination).ok_or_else(|| {
                    FilterError::UnknownKey {
                        entity: entity.name.clone(),
                        key: relation.clone(),
                    }
                })?;
                require_key(destination, key)
            }
            Self::And(children) | Self::Or(children) => children
                .iter()
                .try_for_each(|child| child.validate(entity, schema)),
            Self::Not(child) => child.validate(entity, schema),
        }
    }

    /// Evaluate against `record`. `resolve` looks up related records for
    /// `ANY` clauses; unresolvable references never match.
    pub fn matches<'a, F>(&self, record: &ManagedRecord, resolve: &F) -> bool
    where
        F: Fn(&RecordId) -> Option<&'a ManagedRecord>,
    {
        match self {
            Self::True => true,
            Self::False => false,
            Self::Compare {
                key,
                op,
                value,
                options,
            } => compare(field_of(record, key), *op, value, *options),
            Self::Any {
                relation,
                key,
                op,
                value,
                options,
            } => {
                let Some(AttributeValue::List(targets)) = record.value(relation) else {
                    return false;
                };
                targets
                    .iter()
                    .filter_map(|target| match target {
                        AttributeValue::Uri(uri) => RecordId::from_uri(uri).ok(),
                        _ => None,
                    })
                    .filter_map(|id| resolve(&id))
                    .any(|related| compare(field_of(related, key), *op, value, *options))
            }
            Self::And(children) => children.iter().all(|c| c.matches(record, resolve)),
            Self::Or(children) => children.iter().any(|c| c.matches(record, resolve)),
            Self::Not(child) => !child.matches(record, resolve),
        }
    }
}

impl fmt::Display for NativeFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::True => f.write_str("TRUEPREDICATE"),
            Self::False => f.write_str("FALSEPREDICATE"),
            Self::Compare {
                key,
                op,
                value,
                options,
            } => write!(f, "{key} {op}{options} {value}"),
            Self::Any {
                relation,
                key,
                op,
                value,
                options,
            } => write!(f, "ANY {relation}.{key} {op}{options} {value}"),
            Self::And(children) | Self::Or(children) => {
                let joiner = if matches!(self, Self::And(_)) { " AND " } else { " OR " };
                f.write_str("(")?;
                for (i, child) in children.iter().enumerate() {
                    if i > 0 {
                        f.write_str(joiner)?;
                    }
                    write!(f, "{child}")?;
                }
                f.write_str(")")
            }
            Self::Not(child) => write!(f, "NOT {child}"),
        }
    }
}

fn check_operand(key: &str, op: Operator, value: &AttributeValue) -> FilterResult<()> {
    if op == Operator::In && value.as_list().is_none() {
        return Err(FilterError::InNeedsList {
            key: key.to_string(),
        });
    }
    Ok(())
}

fn require_key(entity: &EntityDescription, key: &str) -> FilterResult<()> {
    if entity.declares(key) {
        Ok(())
    } else {
        Err(FilterError::UnknownKey {
            entity: entity.name.clone(),
            key: key.to_string(),
        })
    }
}

fn field_of<'r>(record: &'r ManagedRecord, key: &str) -> &'r AttributeValue {
    const NULL: &AttributeValue = &AttributeValue::Null;
    record.value(key).unwrap_or(NULL)
}

fn compare(
    field: &AttributeValue,
    op: Operator,
    operand: &AttributeValue,
    options: ComparisonOptions,
) -> bool {
    match op {
        Operator::Equal => equal(field, operand, options),
        Operator::NotEqual => !equal(field, operand, options),
        Operator::GreaterThan => order(field, operand, options) == Some(Ordering::Greater),
        Operator::GreaterThanOrEqual => {
            matches!(order(field, operand, options), Some(Ordering::Greater | Ordering::Equal))
        }
        Operator::LessThan => order(field, operand, options) == Some(Ordering::Less),
        Operator::LessThanOrEqual => {
            matches!(order(field, operand, options), Some(Ordering::Less | Ordering::Equal))
        }
        Operator::Contains => match (field, operand) {
            (AttributeValue::String(haystack), AttributeValue::String(needle)) => {
                fold(haystack, options).contains(&fold(needle, options))
            }
            (AttributeValue::List(items), _) => items.iter().any(|i| equal(i, operand, options)),
            _ => false,
        },
        Operator::In => operand
            .as_list()
            .is_some_and(|items| items.iter().any(|i| equal(field, i, options))),
    }
}

fn equal(a: &AttributeValue, b: &AttributeValue, options: ComparisonOptions) -> bool {
    match (a, b) {
        (AttributeValue::String(x), AttributeValue::String(y)) if !options.is_empty() => {
            fold(x, options) == fold(y, options)
        }
        _ => a.matches_equal(b),
    }
}

fn order(a: &AttributeValue, b: &AttributeValue, options: ComparisonOptions) -> Option<Ordering> {
    match (a, b) {
        (AttributeValue::String(x), AttributeValue::String(y)) if !options.is_empty() => {
            Some(fold(x, options).cmp(&fold(y, options)))
        }
        _ => a.compare(b),
    }
}

/// Normalize a string for `[c]` / `[d]` comparisons.
///
/// `[d]` decomposes to NFD and drops combining marks, so precomposed and
/// decomposed spellings fold alike.
fn fold(s: &str, options: ComparisonOptions) -> String {
    let base: String = if options.diacritic_insensitive {
        s.nfd().filter(|c| !is_combining_mark(*c)).collect()
    } else {
        s.to_string()
    };
    if options.case_insensitive {
        base.to_lowercase()
    } else {
        base
    }
}
