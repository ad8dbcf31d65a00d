//! Core type definitions for the metadata model
//!
//! Includes column types, column definitions, foreign keys and table definitions.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::BookingError;

// ============================================================================
// Typed Column Definitions (for metadata-defined tables)
// ============================================================================

/// Column type definition with validation rules
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ColumnType {
    /// Text field
    String,

    /// Integer field (64-bit)
    Integer,

    /// Decimal field with precision and scale
    Decimal {
        /// Total number of digits (default: 19)
        #[serde(default = "default_precision")]
        precision: u8,
        /// Number of digits after decimal point (default: 4)
        #[serde(default = "default_scale")]
        scale: u8,
    },

    /// Boolean field
    Boolean,

    /// Calendar date without time (YYYY-MM-DD)
    Date,

    /// Timestamp field, always handled in UTC
    Timestamp,

    /// JSON field
    Json,

    /// Enum field with allowed values
    Enum {
        /// List of allowed string values
        values: Vec<String>,
    },
}

fn default_precision() -> u8 {
    19
}

fn default_scale() -> u8 {
    4
}

impl ColumnType {
    /// Create a Decimal type with specified precision and scale
    pub fn decimal(precision: u8, scale: u8) -> Self {
        ColumnType::Decimal { precision, scale }
    }

    /// Lowercase type name, as used in the serialized `type` tag
    pub fn type_name(&self) -> &'static str {
        match self {
            ColumnType::String => "string",
            ColumnType::Integer => "integer",
            ColumnType::Decimal { .. } => "decimal",
            ColumnType::Boolean => "boolean",
            ColumnType::Date => "date",
            ColumnType::Timestamp => "timestamp",
            ColumnType::Json => "json",
            ColumnType::Enum { .. } => "enum",
        }
    }

    /// Validate that a JSON value is compatible with this column type
    pub fn validate_value(&self, value: &serde_json::Value) -> Result<(), String> {
        // Null and cleared cells are handled by the nullable flag, not by the type
        if value.is_null() || value.as_str().is_some_and(|s| s.trim().is_empty()) {
            return Ok(());
        }

        match (self, value) {
            (ColumnType::String, serde_json::Value::String(_)) => Ok(()),
            // Spreadsheet cells often arrive as numbers for text columns
            (ColumnType::String, serde_json::Value::Number(_)) => Ok(()),
            (ColumnType::Integer, serde_json::Value::Number(n)) if n.is_i64() => Ok(()),
            (ColumnType::Integer, serde_json::Value::String(s)) => s
                .trim()
                .parse::<i64>()
                .map(|_| ())
                .map_err(|_| format!("Cannot convert '{}' to integer", s)),
            (ColumnType::Decimal { .. }, serde_json::Value::Number(_)) => Ok(()),
            (ColumnType::Decimal { .. }, serde_json::Value::String(s)) => s
                .trim()
                .parse::<f64>()
                .map(|_| ())
                .map_err(|_| format!("Cannot convert '{}' to decimal", s)),
            (ColumnType::Boolean, serde_json::Value::Bool(_)) => Ok(()),
            (ColumnType::Boolean, serde_json::Value::String(s)) => {
                match s.to_lowercase().as_str() {
                    "true" | "false" | "1" | "0" | "yes" | "no" => Ok(()),
                    _ => Err(format!("Cannot convert '{}' to boolean", s)),
                }
            }
            (ColumnType::Date, serde_json::Value::String(s)) => parse_date(s)
                .map(|_| ())
                .ok_or_else(|| format!("Invalid date format: '{}'", s)),
            (ColumnType::Timestamp, serde_json::Value::String(s)) => {
                chrono::DateTime::parse_from_rfc3339(s)
                    .map(|_| ())
                    .map_err(|e| format!("Invalid timestamp format: {}", e))
            }
            (ColumnType::Json, _) => Ok(()),
            (ColumnType::Enum { values }, serde_json::Value::String(s)) => {
                if values.contains(s) {
                    Ok(())
                } else {
                    Err(format!("Value '{}' not in enum values: {:?}", s, values))
                }
            }
            _ => Err(format!(
                "Type mismatch: expected {:?}, got {:?}",
                self, value
            )),
        }
    }
}

/// Parse a date cell, accepting a trailing time part as produced by spreadsheet exports
pub(crate) fn parse_date(s: &str) -> Option<chrono::NaiveDate> {
    let s = s.trim();
    let date_part = s.split(['T', ' ']).next().unwrap_or(s);
    chrono::NaiveDate::parse_from_str(date_part, "%Y-%m-%d").ok()
}

// ============================================================================
// Foreign keys
// ============================================================================

/// Target of a foreign key, written as the `schema.table.column` triple
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ForeignKey {
    pub schema: String,
    pub table: String,
    pub column: String,
}

impl ForeignKey {
    pub fn new(
        schema: impl Into<String>,
        table: impl Into<String>,
        column: impl Into<String>,
    ) -> Self {
        Self {
            schema: schema.into(),
            table: table.into(),
            column: column.into(),
        }
    }

    /// Parse a `schema.table.column` triple
    pub fn parse(triple: &str) -> Result<Self, BookingError> {
        let parts: Vec<&str> = triple.split('.').map(str::trim).collect();
        match parts.as_slice() {
            [schema, table, column]
                if !schema.is_empty() && !table.is_empty() && !column.is_empty() =>
            {
                Ok(Self::new(*schema, *table, *column))
            }
            _ => Err(BookingError::configuration(format!(
                "Malformed foreign key '{}': expected schema.table.column",
                triple
            ))),
        }
    }
}

impl TryFrom<String> for ForeignKey {
    type Error = BookingError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<ForeignKey> for String {
    fn from(fk: ForeignKey) -> Self {
        fk.to_string()
    }
}

impl fmt::Display for ForeignKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.schema, self.table, self.column)
    }
}

// ============================================================================
// Column and table definitions
// ============================================================================

fn default_true() -> bool {
    true
}

/// Column definition of a metadata-defined table
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ColumnDefinition {
    /// Column name (lowercase identifier)
    pub name: String,

    /// Display label; falls back to the name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,

    /// Column type with validation rules
    #[serde(flatten)]
    pub column_type: ColumnType,

    /// Whether the column allows NULL values (default: true)
    #[serde(default = "default_true")]
    pub nullable: bool,

    /// Whether the column has a UNIQUE constraint (default: false)
    #[serde(default)]
    pub unique: bool,

    /// Whether the column is the table's primary key
    #[serde(default, rename = "primaryKey")]
    pub primary_key: bool,

    /// Referenced column, if any
    #[serde(default, rename = "foreignKey", skip_serializing_if = "Option::is_none")]
    pub foreign_key: Option<ForeignKey>,

    /// Default value (SQL expression)
    #[serde(default, rename = "default", skip_serializing_if = "Option::is_none")]
    pub default_value: Option<String>,

    /// Whether the column is shown to users and compared on edits (default: true)
    #[serde(default = "default_true")]
    pub visible: bool,

    /// Position of this column in the composite auto-name
    #[serde(default, rename = "namingOrder", skip_serializing_if = "Option::is_none")]
    pub naming_order: Option<u32>,

    /// Position of this column in listings; unlisted columns are detail-only
    #[serde(default, rename = "listOrder", skip_serializing_if = "Option::is_none")]
    pub list_order: Option<u32>,
}

impl ColumnDefinition {
    /// Create a new column definition with a name and type
    pub fn new(name: impl Into<String>, column_type: ColumnType) -> Self {
        Self {
            name: name.into(),
            label: None,
            column_type,
            nullable: true,
            unique: false,
            primary_key: false,
            foreign_key: None,
            default_value: None,
            visible: true,
            naming_order: None,
            list_order: None,
        }
    }

    /// Shorthand for an integer `id` primary key
    pub fn id() -> Self {
        Self::new("id", ColumnType::Integer).primary_key()
    }

    /// Set the column as non-nullable
    pub fn not_null(mut self) -> Self {
        self.nullable = false;
        self
    }

    /// Set the column as unique
    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }

    /// Mark the column as primary key (implies unique and not null)
    pub fn primary_key(mut self) -> Self {
        self.primary_key = true;
        self.unique = true;
        self.nullable = false;
        self
    }

    /// Set a default value
    pub fn default(mut self, value: impl Into<String>) -> Self {
        self.default_value = Some(value.into());
        self
    }

    /// Set the display label
    pub fn label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    /// Reference another table's column
    pub fn references(mut self, fk: ForeignKey) -> Self {
        self.foreign_key = Some(fk);
        self
    }

    /// Hide the column from users and from edit comparison
    pub fn hidden(mut self) -> Self {
        self.visible = false;
        self
    }

    /// Set the naming order
    pub fn naming_order(mut self, order: u32) -> Self {
        self.naming_order = Some(order);
        self
    }

    /// Set the listing order
    pub fn list_order(mut self, order: u32) -> Self {
        self.list_order = Some(order);
        self
    }

    /// Label shown to users
    pub fn display_label(&self) -> &str {
        self.label.as_deref().unwrap_or(&self.name)
    }
}

fn default_schema() -> String {
    "public".to_string()
}

/// Definition of a metadata-defined table
///
/// Definitions are immutable once registered. Columns inherited from
/// `ancestors` are merged in by the registry.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TableDefinition {
    /// Table name
    pub name: String,
    /// Display label; falls back to the name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    /// Database schema holding the table
    #[serde(default = "default_schema")]
    pub schema: String,
    /// Tables whose columns this one inherits, nearest first
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub ancestors: Vec<String>,
    /// Ordered columns
    pub columns: Vec<ColumnDefinition>,
}

impl TableDefinition {
    /// Create a new table definition in the `public` schema
    pub fn new(name: impl Into<String>, columns: Vec<ColumnDefinition>) -> Self {
        Self {
            name: name.into(),
            label: None,
            schema: default_schema(),
            ancestors: Vec::new(),
            columns,
        }
    }

    /// Set the display label
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    /// Set the database schema
    pub fn with_schema(mut self, schema: impl Into<String>) -> Self {
        self.schema = schema.into();
        self
    }

    /// Set the ancestor tables
    pub fn with_ancestors(mut self, ancestors: Vec<String>) -> Self {
        self.ancestors = ancestors;
        self
    }

    /// Label shown to users
    pub fn display_label(&self) -> &str {
        self.label.as_deref().unwrap_or(&self.name)
    }

    /// The primary key column
    pub fn primary_key_column(&self) -> Option<&ColumnDefinition> {
        self.columns.iter().find(|c| c.primary_key)
    }

    /// Name of the primary key column; empty only for unvalidated definitions
    pub fn primary_key(&self) -> &str {
        self.primary_key_column()
            .map(|c| c.name.as_str())
            .unwrap_or_default()
    }

    /// Position of a column
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.name == name)
    }

    /// Look up a column by name
    pub fn column(&self, name: &str) -> Option<&ColumnDefinition> {
        self.columns.iter().find(|c| c.name == name)
    }

    /// Look up a column, failing with a configuration error
    pub fn require_column(&self, name: &str) -> Result<&ColumnDefinition, BookingError> {
        self.column(name).ok_or_else(|| {
            BookingError::configuration(format!(
                "Column '{}' does not exist on table '{}'",
                name, self.name
            ))
        })
    }

    /// Columns shown to users and compared on edits
    pub fn visible_columns(&self) -> impl Iterator<Item = &ColumnDefinition> {
        self.columns.iter().filter(|c| c.visible)
    }

    /// Columns that make up the composite auto-name, in naming order
    pub fn naming_columns(&self) -> Vec<&ColumnDefinition> {
        let mut cols: Vec<&ColumnDefinition> = self
            .columns
            .iter()
            .filter(|c| c.naming_order.is_some())
            .collect();
        cols.sort_by_key(|c| c.naming_order);
        cols
    }

    /// Columns carrying a foreign key
    pub fn foreign_key_columns(&self) -> impl Iterator<Item = (&ColumnDefinition, &ForeignKey)> {
        self.columns
            .iter()
            .filter_map(|c| c.foreign_key.as_ref().map(|fk| (c, fk)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // =========================================================================
    // Value Validation Tests
    // =========================================================================

    #[test]
    fn test_validate_string() {
        let t = ColumnType::String;
        assert!(t.validate_value(&serde_json::json!("hello")).is_ok());
        assert!(t.validate_value(&serde_json::json!(42)).is_ok());
        assert!(t.validate_value(&serde_json::json!(true)).is_err());
    }

    #[test]
    fn test_validate_integer_coercion() {
        let t = ColumnType::Integer;
        assert!(t.validate_value(&serde_json::json!(123)).is_ok());
        assert!(t.validate_value(&serde_json::json!("-456")).is_ok());
        assert!(t.validate_value(&serde_json::json!("12.34")).is_err());
        assert!(t.validate_value(&serde_json::json!(1.5)).is_err());
    }

    #[test]
    fn test_validate_decimal() {
        let t = ColumnType::decimal(18, 6);
        assert!(t.validate_value(&serde_json::json!(0.0425)).is_ok());
        assert!(t.validate_value(&serde_json::json!("1000000.50")).is_ok());
        assert!(t.validate_value(&serde_json::json!("n/a")).is_err());
    }

    #[test]
    fn test_validate_date() {
        let t = ColumnType::Date;
        assert!(t.validate_value(&serde_json::json!("2024-03-31")).is_ok());
        assert!(t.validate_value(&serde_json::json!("2024-03-31 00:00:00")).is_ok());
        assert!(t.validate_value(&serde_json::json!("31/03/2024")).is_err());
    }

    #[test]
    fn test_validate_enum() {
        let t = ColumnType::Enum {
            values: vec!["senior".to_string(), "mezzanine".to_string()],
        };
        assert!(t.validate_value(&serde_json::json!("senior")).is_ok());
        assert!(t.validate_value(&serde_json::json!("equity")).is_err());
    }

    #[test]
    fn test_validate_null_always_ok() {
        assert!(ColumnType::Date.validate_value(&serde_json::json!(null)).is_ok());
        assert!(ColumnType::Integer.validate_value(&serde_json::json!(null)).is_ok());
        assert!(ColumnType::Integer.validate_value(&serde_json::json!("")).is_ok());
    }

    // =========================================================================
    // ForeignKey Tests
    // =========================================================================

    #[test]
    fn test_foreign_key_parse() {
        let fk = ForeignKey::parse("data.project.name").unwrap();
        assert_eq!(fk.schema, "data");
        assert_eq!(fk.table, "project");
        assert_eq!(fk.column, "name");
        assert_eq!(fk.to_string(), "data.project.name");
    }

    #[test]
    fn test_foreign_key_malformed() {
        assert!(ForeignKey::parse("project.name").is_err());
        assert!(ForeignKey::parse("a.b.c.d").is_err());
        assert!(ForeignKey::parse("data..name").is_err());
        let err = ForeignKey::parse("").unwrap_err();
        assert!(err.is_configuration());
    }

    #[test]
    fn test_foreign_key_serde_as_triple() {
        let col = ColumnDefinition::new("project_name", ColumnType::String)
            .references(ForeignKey::new("public", "project", "name"));
        let json = serde_json::to_string(&col).unwrap();
        assert!(json.contains("\"foreignKey\":\"public.project.name\""));

        let bad = r#"{"name":"x","type":"string","foreignKey":"project"}"#;
        assert!(serde_json::from_str::<ColumnDefinition>(bad).is_err());
    }

    // =========================================================================
    // ColumnDefinition / TableDefinition Tests
    // =========================================================================

    #[test]
    fn test_column_definition_defaults() {
        let json = r#"{"name":"rate","type":"decimal","precision":10,"scale":6}"#;
        let col: ColumnDefinition = serde_json::from_str(json).unwrap();
        assert!(col.nullable);
        assert!(col.visible);
        assert!(!col.primary_key);
        assert_eq!(col.display_label(), "rate");
        assert_eq!(col.column_type, ColumnType::decimal(10, 6));
    }

    #[test]
    fn test_primary_key_builder() {
        let col = ColumnDefinition::id();
        assert!(col.primary_key);
        assert!(col.unique);
        assert!(!col.nullable);
    }

    #[test]
    fn test_table_definition_accessors() {
        let table = TableDefinition::new(
            "tranche",
            vec![
                ColumnDefinition::id(),
                ColumnDefinition::new("series", ColumnType::String).naming_order(2),
                ColumnDefinition::new("project_name", ColumnType::String)
                    .naming_order(1)
                    .references(ForeignKey::new("public", "project", "name")),
                ColumnDefinition::new("internal_ref", ColumnType::String).hidden(),
            ],
        )
        .with_label("Tranche");

        assert_eq!(table.primary_key(), "id");
        assert_eq!(table.display_label(), "Tranche");
        assert_eq!(table.column_index("project_name"), Some(2));
        assert_eq!(table.visible_columns().count(), 3);
        let naming: Vec<&str> = table.naming_columns().iter().map(|c| c.name.as_str()).collect();
        assert_eq!(naming, vec!["project_name", "series"]);
        assert_eq!(table.foreign_key_columns().count(), 1);
        assert!(table.require_column("missing").unwrap_err().is_configuration());
    }

    #[test]
    fn test_table_definition_deserialization() {
        let json = r#"{
            "name": "fee",
            "ancestors": ["base_record"],
            "columns": [{"name": "id", "type": "integer", "primaryKey": true}]
        }"#;
        let table: TableDefinition = serde_json::from_str(json).unwrap();
        assert_eq!(table.schema, "public");
        assert_eq!(table.ancestors, vec!["base_record"]);
        assert_eq!(table.primary_key(), "id");
    }
}
