//! Predicate expressions for Tessera.
//!
//! A [`Predicate`] is an immutable boolean expression tree over record
//! attributes. Trees are built eagerly, either with the fluent [`field`]
//! builder or with the combinators on [`Predicate`], and are only turned
//! into an engine's native filter at the point of use.
//!
//! # Quick Start
//!
//! ```rust
//! use tess_predicate::{field, Predicate};
//!
//! let classic = Predicate::and::<_, Predicate>([
//!     field("title").contains("dune").case_insensitive().into(),
//!     field("year").less_than(1970i32).into(),
//! ]);
//! assert_eq!(classic.to_string(), r#"title CONTAINS[c] "dune" AND year < 1970"#);
//! assert!(Predicate::and(Vec::<Predicate>::new()).is_match_all());
//! ```

pub mod field;
pub mod predicate;

pub use field::{field, Field};
pub use predicate::{Comparison, ComparisonOptions, CompoundKind, Operator, Predicate};
