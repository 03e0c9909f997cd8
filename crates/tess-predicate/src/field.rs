use tess_types::AttributeValue;

use crate::predicate::{Comparison, Operator, Predicate};

/// Start a comparison on the attribute `key`.
pub fn field(key: impl Into<String>) -> Field {
    Field { key: key.into() }
}

/// Fluent builder for a single [`Comparison`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Field {
    key: String,
}

impl Field {
    /// Attribute the comparison will read.
    pub fn key(&self) -> &str {
        &self.key
    }

    fn compare(self, operator: Operator, value: impl Into<AttributeValue>) -> Comparison {
        Comparison::new(self.key, operator, value)
    }

    /// `key == value`.
    pub fn equal(self, value: impl Into<AttributeValue>) -> Comparison {
        self.compare(Operator::Equal, value)
    }

    /// `key != value`.
    pub fn not_equal(self, value: impl Into<AttributeValue>) -> Comparison {
        self.compare(Operator::NotEqual, value)
    }

    /// `key > value`.
    pub fn greater_than(self, value: impl Into<AttributeValue>) -> Comparison {
        self.compare(Operator::GreaterThan, value)
    }

    /// `key >= value`.
    pub fn greater_or_equal(self, value: impl Into<AttributeValue>) -> Comparison {
        self.compare(Operator::GreaterThanOrEqual, value)
    }

    /// `key < value`.
    pub fn less_than(self, value: impl Into<AttributeValue>) -> Comparison {
        self.compare(Operator::LessThan, value)
    }

    /// `key <= value`.
    pub fn less_or_equal(self, value: impl Into<AttributeValue>) -> Comparison {
        self.compare(Operator::LessThanOrEqual, value)
    }

    /// Substring of a string field, or element of a list field.
    pub fn contains(self, value: impl Into<AttributeValue>) -> Comparison {
        self.compare(Operator::Contains, value)
    }

    /// `key IN values`.
    pub fn is_in<I, V>(self, values: I) -> Comparison
    where
        I: IntoIterator<Item = V>,
        V: Into<AttributeValue>,
    {
        let list = AttributeValue::List(values.into_iter().map(Into::into).collect());
        self.compare(Operator::In, list)
    }

    /// Matches records where `key` is absent or null.
    pub fn is_null(self) -> Comparison {
        self.compare(Operator::Equal, AttributeValue::Null)
    }

    /// `ANY <self>.<condition>` over a to-many relationship.
    pub fn any(self, condition: Comparison) -> Predicate {
        Predicate::any(self.key, condition)
    }
}
