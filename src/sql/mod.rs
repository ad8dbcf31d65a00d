//! SQL utilities
//!
//! Identifier quoting and validation, and parameterized statement builders.

pub mod query;
pub mod sanitize;

pub use query::{SqlParam, Statement};
pub use sanitize::{qualified_name, quote_identifier, validate_identifier};
