//! SQL identifier quoting and validation
//!
//! Table and column names come from metadata, never from request data, but
//! they are still validated on registry load and always double-quoted.

use std::sync::LazyLock;

use regex::Regex;

use crate::error::{BookingError, Result};

static IDENTIFIER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[a-z][a-z0-9_]*$").expect("identifier pattern is a valid regex")
});

/// Quote a SQL identifier, doubling any embedded double quote
///
/// # Example
/// ```
/// use booking_graph::sql::quote_identifier;
///
/// assert_eq!(quote_identifier("project_level"), "\"project_level\"");
/// ```
pub fn quote_identifier(identifier: &str) -> String {
    let escaped = identifier.replace('"', "\"\"");
    format!("\"{}\"", escaped)
}

/// Schema-qualified, quoted table name
pub fn qualified_name(schema: &str, table: &str) -> String {
    format!("{}.{}", quote_identifier(schema), quote_identifier(table))
}

/// Validate a table, schema or column name from metadata
///
/// Names must start with a lowercase letter and contain only lowercase
/// letters, digits and underscores.
pub fn validate_identifier(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(BookingError::configuration("Identifier cannot be empty"));
    }
    if !IDENTIFIER.is_match(name) {
        return Err(BookingError::configuration(format!(
            "Identifier '{}' is invalid. Must start with a lowercase letter and contain only lowercase letters, numbers, and underscores.",
            name
        )));
    }
    Ok(())
}
