use std::fmt;

use serde::{Deserialize, Serialize};
use tess_types::AttributeValue;

// ---------------------------------------------------------------------------
// Comparison
// ---------------------------------------------------------------------------

/// Comparison operator of a leaf expression.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Operator {
    Equal,
    NotEqual,
    GreaterThan,
    GreaterThanOrEqual,
    LessThan,
    LessThanOrEqual,
    /// Substring match on strings, element match on lists.
    Contains,
    /// Membership of the field's value in the comparison's list.
    In,
}

impl Operator {
    /// The operator as written in the native filter language.
    pub fn symbol(&self) -> &'static str {
        match self {
            Self::Equal => "==",
            Self::NotEqual => "!=",
            Self::GreaterThan => ">",
            Self::GreaterThanOrEqual => ">=",
            Self::LessThan => "<",
            Self::LessThanOrEqual => "<=",
            Self::Contains => "CONTAINS",
            Self::In => "IN",
        }
    }
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.symbol())
    }
}

/// String-comparison modifiers.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ComparisonOptions {
    pub case_insensitive: bool,
    pub diacritic_insensitive: bool,
}

impl ComparisonOptions {
    pub fn is_empty(&self) -> bool {
        !self.case_insensitive && !self.diacritic_insensitive
    }
}

impl fmt::Display for ComparisonOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            return Ok(());
        }
        f.write_str("[")?;
        if self.case_insensitive {
            f.write_str("c")?;
        }
        if self.diacritic_insensitive {
            f.write_str("d")?;
        }
        f.write_str("]")
    }
}

/// A leaf comparison: `key operator value`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Comparison {
    pub key: String,
    pub operator: Operator,
    pub value: AttributeValue,
    #[serde(default)]
    pub options: ComparisonOptions,
}

impl Comparison {
    pub fn new(key: impl Into<String>, operator: Operator, value: impl Into<AttributeValue>) -> Self {
        Self {
            key: key.into(),
            operator,
            value: value.into(),
            options: ComparisonOptions::default(),
        }
    }

    pub fn case_insensitive(mut self) -> Self {
        self.options.case_insensitive = true;
        self
    }

    pub fn diacritic_insensitive(mut self) -> Self {
        self.options.diacritic_insensitive = true;
        self
    }

    pub fn with_options(mut self, options: ComparisonOptions) -> Self {
        self.options = options;
        self
    }
}

impl fmt::Display for Comparison {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}{} ", self.key, self.operator, self.options)?;
        match &self.value {
            AttributeValue::List(items) => {
                f.write_str("{")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{item}")?;
                }
                f.write_str("}")
            }
            other => write!(f, "{other}"),
        }
    }
}

// ---------------------------------------------------------------------------
// Predicate
// ---------------------------------------------------------------------------

/// Kind of a compound node.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CompoundKind {
    And,
    Or,
    Not,
}

/// An immutable boolean filter expression over record attributes.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum Predicate {
    /// Matches every record.
    True,
    Comparison(Comparison),
    /// Some element of the to-many `relation` satisfies `condition`.
    Any {
        relation: String,
        condition: Comparison,
    },
    Compound {
        kind: CompoundKind,
        children: Vec<Predicate>,
    },
    /// Escape hatch: a native filter format string with `%@` placeholders
    /// bound positionally to `arguments`.
    Raw {
        format: String,
        arguments: Vec<AttributeValue>,
    },
}

impl Predicate {
    /// The identity filter.
    pub fn all() -> Self {
        Self::True
    }

    /// True only for [`Predicate::True`]; an equivalent compound is not detected.
    pub fn is_match_all(&self) -> bool {
        matches!(self, Self::True)
    }

    /// `key == value`. A [`AttributeValue::Null`] value matches absent fields.
    pub fn equal(key: impl Into<String>, value: impl Into<AttributeValue>) -> Self {
        Comparison::new(key, Operator::Equal, value).into()
    }

    /// `key != value`.
    pub fn not_equal(key: impl Into<String>, value: impl Into<AttributeValue>) -> Self {
        Comparison::new(key, Operator::NotEqual, value).into()
    }

    /// `key > value`. Values with no ordering between them never match.
    pub fn greater_than(key: impl Into<String>, value: impl Into<AttributeValue>) -> Self {
        Comparison::new(key, Operator::GreaterThan, value).into()
    }

    /// `key < value`.
    pub fn less_than(key: impl Into<String>, value: impl Into<AttributeValue>) -> Self {
        Comparison::new(key, Operator::LessThan, value).into()
    }

    /// Substring test on strings, membership on lists.
    pub fn contains(key: impl Into<String>, value: impl Into<AttributeValue>) -> Self {
        Comparison::new(key, Operator::Contains, value).into()
    }

    /// `key IN values`.
    pub fn is_in<I, V>(key: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<AttributeValue>,
    {
        let list = AttributeValue::List(values.into_iter().map(Into::into).collect());
        Comparison::new(key, Operator::In, list).into()
    }

    /// `ANY relation.<condition>`: true when at least one record reached
    /// through the to-many `relation` satisfies `condition`.
    pub fn any(relation: impl Into<String>, condition: Comparison) -> Self {
        Self::Any {
            relation: relation.into(),
            condition,
        }
    }

    /// A native filter string; see [`Predicate::Raw`].
    pub fn raw(format: impl Into<String>, arguments: Vec<AttributeValue>) -> Self {
        Self::Raw {
            format: format.into(),
            arguments,
        }
    }

    /// Conjunction of `children`.
    ///
    /// Match-all children are dropped; no children left yields
    /// [`Predicate::True`], a single child is returned as is.
    pub fn and<I, P>(children: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<Predicate>,
    {
        let mut children: Vec<Predicate> = children
            .into_iter()
            .map(Into::into)
            .filter(|p| !p.is_match_all())
            .collect();
        match children.len() {
            0 => Self::True,
            1 => children.remove(0),
            _ => Self::Compound {
                kind: CompoundKind::And,
                children,
            },
        }
    }

    /// Disjunction of `children`.
    ///
    /// A match-all child makes the whole node match-all. An empty
    /// disjunction matches nothing.
    pub fn or<I, P>(children: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<Predicate>,
    {
        let mut children: Vec<Predicate> = children.into_iter().map(Into::into).collect();
        if children.iter().any(Predicate::is_match_all) {
            return Self::True;
        }
        match children.len() {
            1 => children.remove(0),
            _ => Self::Compound {
                kind: CompoundKind::Or,
                children,
            },
        }
    }

    pub fn not(child: impl Into<Predicate>) -> Self {
        Self::Compound {
            kind: CompoundKind::Not,
            children: vec![child.into()],
        }
    }

    /// `self AND other`.
    pub fn and_also(self, other: impl Into<Predicate>) -> Self {
        Self::and([self, other.into()])
    }

    /// `self OR other`.
    pub fn or_else(self, other: impl Into<Predicate>) -> Self {
        Self::or([self, other.into()])
    }

    pub fn negate(self) -> Self {
        Self::not(self)
    }

    /// Number of leaf nodes in the tree.
    pub fn leaf_count(&self) -> usize {
        match self {
            Self::Compound { children, .. } => children.iter().map(Self::leaf_count).sum(),
            _ => 1,
        }
    }
}

impl From<Comparison> for Predicate {
    fn from(comparison: Comparison) -> Self {
        Self::Comparison(comparison)
    }
}

impl fmt::Display for Predicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::True => f.write_str("TRUEPREDICATE"),
            Self::Comparison(c) => write!(f, "{c}"),
            Self::Any {
                relation,
                condition,
            } => write!(f, "ANY {relation}.{condition}"),
            Self::Compound { kind, children } => {
                if children.is_empty() {
                    // Only an empty OR can be built; it matches nothing.
                    return f.write_str("FALSEPREDICATE");
                }
                let write_child = |f: &mut fmt::Formatter<'_>, child: &Predicate| match child {
                    Self::Compound { .. } => write!(f, "({child})"),
                    _ => write!(f, "{child}"),
                };
                match kind {
                    CompoundKind::Not => {
                        f.write_str("NOT ")?;
                        write_child(f, &children[0])
                    }
                    CompoundKind::And | CompoundKind::Or => {
                        let joiner = if *kind == CompoundKind::And { " AND " } else { " OR " };
                        for (i, child) in children.iter().enumerate() {
                            if i > 0 {
                                f.write_str(joiner)?;
                            }
                            write_child(f, child)?;
                        }
                        Ok(())
                    }
                }
            }
            Self::Raw { format, .. } => f.write_str(format),
        }
    }
}
