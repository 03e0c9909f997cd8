//! The type-erased attribute value model.
//!
//! [`AttributeValue`] is a closed union over exactly the kinds a record
//! attribute may hold. Native values enter through [`AttributeValue::wrap`]
//! (any `'static` Rust value) or `TryFrom<serde_json::Value>`; both reject
//! kinds outside the supported set with [`ValueError::UnsupportedValueKind`].

use std::any::{type_name, Any};
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{ValueError, ValueResult};

// ---------------------------------------------------------------------------
// ValueKind
// ---------------------------------------------------------------------------

/// Discriminant of an [`AttributeValue`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValueKind {
    String,
    Int16,
    Int32,
    Int64,
    Float,
    Double,
    Bool,
    Date,
    Binary,
    Uuid,
    Uri,
    Null,
    List,
    External,
}

impl fmt::Display for ValueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::String => "string",
            Self::Int16 => "int16",
            Self::Int32 => "int32",
            Self::Int64 => "int64",
            Self::Float => "float",
            Self::Double => "double",
            Self::Bool => "bool",
            Self::Date => "date",
            Self::Binary => "binary",
            Self::Uuid => "uuid",
            Self::Uri => "uri",
            Self::Null => "null",
            Self::List => "list",
            Self::External => "external",
        };
        write!(f, "{s}")
    }
}

// ---------------------------------------------------------------------------
// Uri
// ---------------------------------------------------------------------------

/// An absolute URI (`scheme:rest`).
///
/// Only the scheme is validated; the remainder is kept verbatim.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Uri(String);

impl Uri {
    pub(crate) fn new_unchecked(s: String) -> Self {
        Self(s)
    }

    /// Parse an absolute URI.
    pub fn parse(s: impl Into<String>) -> ValueResult<Self> {
        let s = s.into();
        if !is_absolute_uri(&s) {
            return Err(ValueError::InvalidUri(s));
        }
        Ok(Self(s))
    }

    /// The full URI text.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The scheme component, without the trailing `:`.
    pub fn scheme(&self) -> &str {
        self.0.split_once(':').map_or("", |(scheme, _)| scheme)
    }
}

fn is_absolute_uri(s: &str) -> bool {
    let Some((scheme, rest)) = s.split_once(':') else {
        return false;
    };
    let mut chars = scheme.chars();
    chars.next().is_some_and(|c| c.is_ascii_alphabetic())
        && chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.'))
        && !rest.is_empty()
        && !s.chars().any(char::is_whitespace)
}

impl fmt::Display for Uri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for Uri {
    type Err = ValueError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for Uri {
    type Error = ValueError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::parse(s)
    }
}

impl From<Uri> for String {
    fn from(uri: Uri) -> Self {
        uri.0
    }
}

// ---------------------------------------------------------------------------
// AttributeValue
// ---------------------------------------------------------------------------

/// A type-erased attribute value.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum AttributeValue {
    String(String),
    Int16(i16),
    Int32(i32),
    Int64(i64),
    Float(#[serde(with = "float_repr")] f32),
    Double(#[serde(with = "float_repr")] f64),
    Bool(bool),
    Date(DateTime<Utc>),
    Binary(Vec<u8>),
    Uuid(Uuid),
    Uri(Uri),
    Null,
    /// Ordered list of values; also the representation of to-many relationships.
    List(Vec<AttributeValue>),
    /// Opaque list handed through from a foreign source, never interpreted.
    External(Vec<serde_json::Value>),
}

/// Try each listed type in turn, returning on the first successful downcast.
macro_rules! unerase {
    ($any:ident; $($ty:ty => $wrap:expr),+ $(,)?) => {
        $(
            let $any = match $any.downcast::<$ty>() {
                Ok(v) => return $wrap(*v),
                Err(rest) => rest,
            };
        )+
    };
}

impl AttributeValue {
    /// Wrap an arbitrary native value.
    ///
    /// Supported: `String`, `&'static str`, `i16`, `i32`, `i64`, `f32`,
    /// `f64`, `bool`, `DateTime<Utc>`, `Vec<u8>`, `Uuid`, [`Uri`], `()`
    /// (null), `Vec<AttributeValue>`, `serde_json::Value` and
    /// `AttributeValue` itself. Anything else fails with
    /// [`ValueError::UnsupportedValueKind`] naming the Rust type.
    pub fn wrap<T: Any>(value: T) -> ValueResult<Self> {
        let any: Box<dyn Any> = Box::new(value);
        unerase!(any;
            AttributeValue => Ok,
            String => |v| Ok(Self::String(v)),
            &'static str => |v: &str| Ok(Self::String(v.to_owned())),
            i16 => |v| Ok(Self::Int16(v)),
            i32 => |v| Ok(Self::Int32(v)),
            i64 => |v| Ok(Self::Int64(v)),
            f32 => |v| Ok(Self::Float(v)),
            f64 => |v| Ok(Self::Double(v)),
            bool => |v| Ok(Self::Bool(v)),
            DateTime<Utc> => |v| Ok(Self::Date(v)),
            Vec<u8> => |v| Ok(Self::Binary(v)),
            Uuid => |v| Ok(Self::Uuid(v)),
            Uri => |v| Ok(Self::Uri(v)),
            () => |_| Ok(Self::Null),
            Vec<AttributeValue> => |v| Ok(Self::List(v)),
            serde_json::Value => Self::try_from,
        );
        drop(any);
        Err(ValueError::unsupported(type_name::<T>()))
    }

    /// Build an opaque external list.
    pub fn external(items: Vec<serde_json::Value>) -> Self {
        Self::External(items)
    }

    /// The discriminant of this value.
    pub fn kind(&self) -> ValueKind {
        match self {
            Self::String(_) => ValueKind::String,
            Self::Int16(_) => ValueKind::Int16,
            Self::Int32(_) => ValueKind::Int32,
            Self::Int64(_) => ValueKind::Int64,
            Self::Float(_) => ValueKind::Float,
            Self::Double(_) => ValueKind::Double,
            Self::Bool(_) => ValueKind::Bool,
            Self::Date(_) => ValueKind::Date,
            Self::Binary(_) => ValueKind::Binary,
            Self::Uuid(_) => ValueKind::Uuid,
            Self::Uri(_) => ValueKind::Uri,
            Self::Null => ValueKind::Null,
            Self::List(_) => ValueKind::List,
            Self::External(_) => ValueKind::External,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    pub fn is_numeric(&self) -> bool {
        self.as_f64().is_some()
    }

    /// Read the value back as `T` when the kind matches exactly.
    pub fn get<T: FromAttributeValue>(&self) -> Option<T> {
        T::from_attribute(self)
    }

    /// Like [`get`](Self::get), reporting the mismatch as an error.
    pub fn try_get<T: FromAttributeValue>(&self) -> ValueResult<T> {
        T::from_attribute(self).ok_or(ValueError::MismatchType {
            actual: self.kind(),
            desired: T::KIND,
        })
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[AttributeValue]> {
        match self {
            Self::List(items) => Some(items),
            _ => None,
        }
    }

    /// Integer kinds widened to `i64`.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Int16(v) => Some(i64::from(*v)),
            Self::Int32(v) => Some(i64::from(*v)),
            Self::Int64(v) => Some(*v),
            _ => None,
        }
    }

    /// Any numeric kind widened to `f64`.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Float(v) => Some(f64::from(*v)),
            Self::Double(v) => Some(*v),
            _ => self.as_i64().map(|v| v as f64),
        }
    }

    /// Order two values.
    ///
    /// Numeric kinds compare across variants; every other kind compares
    /// only against itself. Returns `None` for incomparable pairs.
    pub fn compare(&self, other: &Self) -> Option<Ordering> {
        match (self, other) {
            (Self::String(a), Self::String(b)) => Some(a.cmp(b)),
            (Self::Bool(a), Self::Bool(b)) => Some(a.cmp(b)),
            (Self::Date(a), Self::Date(b)) => Some(a.cmp(b)),
            (Self::Uuid(a), Self::Uuid(b)) => Some(a.cmp(b)),
            (Self::Uri(a), Self::Uri(b)) => Some(a.cmp(b)),
            (Self::Binary(a), Self::Binary(b)) => Some(a.cmp(b)),
            _ => match (self.as_i64(), other.as_i64()) {
                (Some(a), Some(b)) => Some(a.cmp(&b)),
                _ => self.as_f64()?.partial_cmp(&other.as_f64()?),
            },
        }
    }

    /// Equality as a filter sees it: `Int16(5)` matches `Double(5.0)`.
    pub fn matches_equal(&self, other: &Self) -> bool {
        if self.is_numeric() && other.is_numeric() {
            self.compare(other) == Some(Ordering::Equal)
        } else {
            self == other
        }
    }

    /// Render as plain JSON (dates as RFC 3339, binary as a byte array).
    pub fn to_json(&self) -> serde_json::Value {
        use serde_json::Value as Json;
        match self {
            Self::String(s) => Json::String(s.clone()),
            Self::Int16(v) => Json::from(*v),
            Self::Int32(v) => Json::from(*v),
            Self::Int64(v) => Json::from(*v),
            Self::Float(v) => serde_json::Number::from_f64(f64::from(*v)).map_or(Json::Null, Json::Number),
            Self::Double(v) => serde_json::Number::from_f64(*v).map_or(Json::Null, Json::Number),
            Self::Bool(b) => Json::Bool(*b),
            Self::Date(d) => Json::String(d.to_rfc3339_opts(SecondsFormat::Millis, true)),
            Self::Binary(bytes) => Json::from(bytes.clone()),
            Self::Uuid(u) => Json::String(u.to_string()),
            Self::Uri(u) => Json::String(u.to_string()),
            Self::Null => Json::Null,
            Self::List(items) => Json::Array(items.iter().map(Self::to_json).collect()),
            Self::External(items) => Json::Array(items.clone()),
        }
    }
}

impl fmt::Display for AttributeValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::String(s) => write!(f, "{s:?}"),
            Self::Int16(v) => write!(f, "{v}"),
            Self::Int32(v) => write!(f, "{v}"),
            Self::Int64(v) => write!(f, "{v}"),
            Self::Float(v) => write!(f, "{v}"),
            Self::Double(v) => write!(f, "{v}"),
            Self::Bool(b) => write!(f, "{b}"),
            Self::Date(d) => write!(f, "{}", d.to_rfc3339_opts(SecondsFormat::Millis, true)),
            Self::Binary(bytes) => write!(f, "<{} bytes>", bytes.len()),
            Self::Uuid(u) => write!(f, "{u}"),
            Self::Uri(u) => write!(f, "{u}"),
            Self::Null => write!(f, "nil"),
            Self::List(items) => {
                write!(f, "[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{item}")?;
                }
                write!(f, "]")
            }
            Self::External(items) => write!(f, "<external: {} items>", items.len()),
        }
    }
}

impl TryFrom<serde_json::Value> for AttributeValue {
    type Error = ValueError;

    fn try_from(json: serde_json::Value) -> Result<Self, Self::Error> {
        use serde_json::Value as Json;
        match json {
            Json::Null => Ok(Self::Null),
            Json::Bool(b) => Ok(Self::Bool(b)),
            Json::Number(n) => {
                if let Some(v) = n.as_i64() {
                    Ok(Self::Int64(v))
                } else if n.is_u64() {
                    Err(ValueError::unsupported("u64"))
                } else {
                    n.as_f64()
                        .map(Self::Double)
                        .ok_or_else(|| ValueError::unsupported("number"))
                }
            }
            Json::String(s) => Ok(Self::String(s)),
            Json::Array(items) => items
                .into_iter()
                .map(Self::try_from)
                .collect::<ValueResult<Vec<_>>>()
                .map(Self::List),
            Json::Object(_) => Err(ValueError::unsupported("object")),
        }
    }
}

impl From<&str> for AttributeValue {
    fn from(s: &str) -> Self {
        Self::String(s.to_owned())
    }
}

impl<T: Into<AttributeValue>> From<Option<T>> for AttributeValue {
    fn from(value: Option<T>) -> Self {
        value.map_or(Self::Null, Into::into)
    }
}

// ---------------------------------------------------------------------------
// Typed read-back
// ---------------------------------------------------------------------------

/// Native types an [`AttributeValue`] can be read back as.
pub trait FromAttributeValue: Sized {
    /// The kind this type reads from.
    const KIND: ValueKind;

    fn from_attribute(value: &AttributeValue) -> Option<Self>;
}

macro_rules! native_kind {
    ($($ty:ty => $variant:ident),+ $(,)?) => {
        $(
            impl From<$ty> for AttributeValue {
                fn from(v: $ty) -> Self {
                    Self::$variant(v)
                }
            }

            impl FromAttributeValue for $ty {
                const KIND: ValueKind = ValueKind::$variant;

                #[allow(clippy::clone_on_copy)]
                fn from_attribute(value: &AttributeValue) -> Option<Self> {
                    match value {
                        AttributeValue::$variant(v) => Some(v.clone()),
                        _ => None,
                    }
                }
            }
        )+
    };
}

native_kind!(
    String => String,
    i16 => Int16,
    i32 => Int32,
    i64 => Int64,
    f32 => Float,
    f64 => Double,
    bool => Bool,
    DateTime<Utc> => Date,
    Vec<u8> => Binary,
    Uuid => Uuid,
    Uri => Uri,
    Vec<AttributeValue> => List,
);

// ---------------------------------------------------------------------------
// Float serialization
// ---------------------------------------------------------------------------

/// Serde form of `f32`/`f64` that survives JSON: finite values are numbers,
/// `NaN`, `inf` and `-inf` are strings.
mod float_repr {
    use std::fmt;

    use serde::de::{self, Visitor};
    use serde::{Deserializer, Serializer};

    pub(super) trait Float: Copy {
        fn to_f64(self) -> f64;
        fn from_f64(v: f64) -> Self;
    }

    impl Float for f32 {
        fn to_f64(self) -> f64 {
            f64::from(self)
        }
        fn from_f64(v: f64) -> Self {
            v as f32
        }
    }

    impl Float for f64 {
        fn to_f64(self) -> f64 {
            self
        }
        fn from_f64(v: f64) -> Self {
            v
        }
    }

    pub(super) fn serialize<F: Float, S: Serializer>(v: &F, serializer: S) -> Result<S::Ok, S::Error> {
        let v = v.to_f64();
        if v.is_nan() {
            serializer.serialize_str("NaN")
        } else if v == f64::INFINITY {
            serializer.serialize_str("inf")
        } else if v == f64::NEG_INFINITY {
            serializer.serialize_str("-inf")
        } else {
            serializer.serialize_f64(v)
        }
    }

    pub(super) fn deserialize<'de, F: Float, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<F, D::Error> {
        deserializer.deserialize_any(FloatVisitor).map(F::from_f64)
    }

    struct FloatVisitor;

    impl<'de> Visitor<'de> for FloatVisitor {
        type Value = f64;

        fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.write_str("a number or one of \"NaN\", \"inf\", \"-inf\"")
        }

        fn visit_f64<E: de::Error>(self, v: f64) -> Result<f64, E> {
            Ok(v)
        }

        fn visit_i64<E: de::Error>(self, v: i64) -> Result<f64, E> {
            Ok(v as f64)
        }

        fn visit_u64<E: de::Error>(self, v: u64) -> Result<f64, E> {
            Ok(v as f64)
        }

        fn visit_str<E: de::Error>(self, v: &str) -> Result<f64, E> {
            match v {
                "NaN" => Ok(f64::NAN),
                "inf" => Ok(f64::INFINITY),
                "-inf" => Ok(f64::NEG_INFINITY),
                other => Err(E::invalid_value(de::Unexpected::Str(other), &self)),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use proptest::prelude::*;
    use std::collections::HashMap;

    fn roundtrip<T>(native: T)
    where
        T: Any + Clone + PartialEq + fmt::Debug + FromAttributeValue,
    {
        let wrapped = AttributeValue::wrap(native.clone()).unwrap();
        assert_eq!(wrapped.kind(), T::KIND);
        assert_eq!(wrapped.get::<T>(), Some(native));
    }

    #[test]
    fn every_supported_kind_roundtrips() {
        roundtrip(String::from("Dune"));
        roundtrip(-7i16);
        roundtrip(70_000i32);
        roundtrip(i64::MAX);
        roundtrip(1.5f32);
        roundtrip(2.25f64);
        roundtrip(true);
        roundtrip(Utc.with_ymd_and_hms(1965, 8, 1, 0, 0, 0).unwrap());
        roundtrip(vec![0u8, 1, 255]);
        roundtrip(Uuid::now_v7());
        roundtrip(Uri::parse("https://example.org/books/1").unwrap());
        roundtrip(vec![AttributeValue::Int32(1), AttributeValue::Null]);
    }

    #[test]
    fn str_and_unit_wrap() {
        assert_eq!(
            AttributeValue::wrap("Dune").unwrap(),
            AttributeValue::String("Dune".into())
        );
        assert_eq!(AttributeValue::wrap(()).unwrap(), AttributeValue::Null);
    }

    #[test]
    fn unsupported_kinds_are_rejected() {
        let err = AttributeValue::wrap(42u64).unwrap_err();
        assert_eq!(err, ValueError::unsupported("u64"));

        let err = AttributeValue::wrap(HashMap::<String, i32>::new()).unwrap_err();
        assert!(matches!(err, ValueError::UnsupportedValueKind { kind } if kind.contains("HashMap")));
    }

    #[test]
    fn json_conversion() {
        let json = serde_json::json!(["a", 1, 2.5, true, null]);
        let value = AttributeValue::try_from(json).unwrap();
        assert_eq!(
            value,
            AttributeValue::List(vec![
                AttributeValue::String("a".into()),
                AttributeValue::Int64(1),
                AttributeValue::Double(2.5),
                AttributeValue::Bool(true),
                AttributeValue::Null,
            ])
        );

        let err = AttributeValue::try_from(serde_json::json!({"nested": 1})).unwrap_err();
        assert_eq!(err, ValueError::unsupported("object"));

        // Objects nested in arrays are rejected too.
        assert!(AttributeValue::wrap(serde_json::json!([{"a": 1}])).is_err());
    }

    #[test]
    fn try_get_reports_mismatch() {
        let err = AttributeValue::Int16(3).try_get::<String>().unwrap_err();
        assert_eq!(
            err,
            ValueError::MismatchType {
                actual: ValueKind::Int16,
                desired: ValueKind::String,
            }
        );
    }

    #[test]
    fn numeric_comparison_crosses_variants() {
        let a = AttributeValue::Int16(5);
        let b = AttributeValue::Double(5.0);
        assert!(a.matches_equal(&b));
        assert_eq!(
            AttributeValue::Int64(3).compare(&AttributeValue::Float(3.5)),
            Some(Ordering::Less)
        );
        assert_eq!(
            AttributeValue::String("a".into()).compare(&AttributeValue::Int64(1)),
            None
        );
        assert!(!AttributeValue::String("5".into()).matches_equal(&AttributeValue::Int64(5)));
    }

    #[test]
    fn uri_validation() {
        assert!(Uri::parse("tess://store/Book/p1").is_ok());
        assert_eq!(Uri::parse("mailto:a@b.c").unwrap().scheme(), "mailto");
        assert!(Uri::parse("no scheme").is_err());
        assert!(Uri::parse("1http://x").is_err());
        assert!(Uri::parse("http:").is_err());
    }

    #[test]
    fn serde_roundtrip() {
        let value = AttributeValue::List(vec![
            AttributeValue::Uri(Uri::parse("urn:isbn:0441013597").unwrap()),
            AttributeValue::Null,
            AttributeValue::external(vec![serde_json::json!({"opaque": true})]),
        ]);
        let json = serde_json::to_string(&value).unwrap();
        let parsed: AttributeValue = serde_json::from_str(&json).unwrap();
        assert_eq!(value, parsed);
    }

    #[test]
    fn non_finite_floats_survive_json() {
        for v in [f64::INFINITY, f64::NEG_INFINITY, 2.5] {
            let json = serde_json::to_string(&AttributeValue::Double(v)).unwrap();
            let parsed: AttributeValue = serde_json::from_str(&json).unwrap();
            assert_eq!(parsed, AttributeValue::Double(v));
        }
        let json = serde_json::to_string(&AttributeValue::Double(f64::NAN)).unwrap();
        assert_eq!(json, r#"{"kind":"double","value":"NaN"}"#);
        match serde_json::from_str(&json).unwrap() {
            AttributeValue::Double(v) => assert!(v.is_nan()),
            other => panic!("expected double, got {other:?}"),
        }
        let json = serde_json::to_string(&AttributeValue::Float(f32::NEG_INFINITY)).unwrap();
        assert_eq!(
            serde_json::from_str::<AttributeValue>(&json).unwrap(),
            AttributeValue::Float(f32::NEG_INFINITY)
        );
        assert!(serde_json::from_str::<AttributeValue>(r#"{"kind":"double","value":"nope"}"#).is_err());
    }

    #[test]
    fn display_is_readable() {
        assert_eq!(AttributeValue::from("Dune").to_string(), "\"Dune\"");
        assert_eq!(AttributeValue::Null.to_string(), "nil");
        assert_eq!(
            AttributeValue::List(vec![1i64.into(), 2i64.into()]).to_string(),
            "[1, 2]"
        );
    }

    proptest! {
        #[test]
        fn int64_roundtrip(v in any::<i64>()) {
            prop_assert_eq!(AttributeValue::wrap(v).unwrap().get::<i64>(), Some(v));
        }

        #[test]
        fn string_roundtrip(s in ".*") {
            let wrapped = AttributeValue::wrap(s.clone()).unwrap();
            prop_assert_eq!(wrapped.kind(), ValueKind::String);
            prop_assert_eq!(wrapped.get::<String>(), Some(s));
        }

        #[test]
        fn double_roundtrip(v in any::<f64>().prop_filter("finite", |v| v.is_finite())) {
            prop_assert_eq!(AttributeValue::wrap(v).unwrap().get::<f64>(), Some(v));
        }
    }
}
