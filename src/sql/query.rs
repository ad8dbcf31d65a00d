//! Parameterized statement builders
//!
//! Every value reaches the database as a bound parameter; identifiers come
//! from validated metadata and are always quoted. Builders are pure and
//! return a `Statement` for the database layer to bind and run.

use serde_json::Value;

use crate::sql::sanitize::{qualified_name, quote_identifier};
use crate::types::{ColumnDefinition, ColumnType, TableDefinition};
use crate::value::is_blank;

/// Postgres accepts at most this many bind parameters per statement
const MAX_PARAMS: usize = 65_535;

/// A value to bind
#[derive(Debug, Clone, PartialEq)]
pub enum SqlParam {
    /// Cell bound according to its column type
    Cell {
        column: String,
        column_type: ColumnType,
        value: Value,
    },
    /// Keys compared against `column::text`
    TextArray(Vec<String>),
    BigInt(i64),
}

impl SqlParam {
    pub fn cell(column: &ColumnDefinition, value: Value) -> Self {
        SqlParam::Cell {
            column: column.name.clone(),
            column_type: column.column_type.clone(),
            value,
        }
    }
}

/// SQL text plus its parameters, in placeholder order
#[derive(Debug, Clone, PartialEq)]
pub struct Statement {
    /// Table the statement touches, for logging and planning
    pub table: String,
    pub sql: String,
    pub params: Vec<SqlParam>,
}

fn next_placeholder(param_offset: &mut i32) -> String {
    let placeholder = format!("${}", param_offset);
    *param_offset += 1;
    placeholder
}

fn column_list(table: &TableDefinition) -> String {
    table
        .columns
        .iter()
        .map(|c| quote_identifier(&c.name))
        .collect::<Vec<_>>()
        .join(", ")
}

fn from_clause(table: &TableDefinition) -> String {
    qualified_name(&table.schema, &table.name)
}

/// `"col"::text = ANY($n)` for one join column
fn any_text_clause(column: &str, keys: Vec<String>, param_offset: &mut i32, params: &mut Vec<SqlParam>) -> String {
    let clause = format!(
        "{}::text = ANY({})",
        quote_identifier(column),
        next_placeholder(param_offset)
    );
    params.push(SqlParam::TextArray(keys));
    clause
}

/// Root fetch with an optional key filter and pagination
///
/// `filter` of `Some((column, keys))` matches rows whose column text is one
/// of the keys.
pub fn select_root(
    table: &TableDefinition,
    filter: Option<(&str, Vec<String>)>,
    limit: Option<i64>,
    offset: Option<i64>,
) -> Statement {
    let mut param_offset = 1;
    let mut params = Vec::new();
    let mut sql = format!("SELECT {} FROM {}", column_list(table), from_clause(table));

    if let Some((column, keys)) = filter {
        sql.push_str(" WHERE ");
        sql.push_str(&any_text_clause(column, keys, &mut param_offset, &mut params));
    }
    sql.push_str(&format!(" ORDER BY {}", quote_identifier(table.primary_key())));
    if let Some(limit) = limit {
        sql.push_str(&format!(" LIMIT {}", next_placeholder(&mut param_offset)));
        params.push(SqlParam::BigInt(limit));
    }
    if let Some(offset) = offset {
        sql.push_str(&format!(" OFFSET {}", next_placeholder(&mut param_offset)));
        params.push(SqlParam::BigInt(offset));
    }

    Statement {
        table: table.name.clone(),
        sql,
        params,
    }
}

/// Rows matching any of several join columns, OR-combined
pub fn select_matching(table: &TableDefinition, filters: Vec<(String, Vec<String>)>) -> Statement {
    let mut param_offset = 1;
    let mut params = Vec::new();
    let clauses: Vec<String> = filters
        .into_iter()
        .map(|(column, keys)| any_text_clause(&column, keys, &mut param_offset, &mut params))
        .collect();

    let where_clause = if clauses.is_empty() {
        "FALSE".to_string()
    } else {
        clauses.join(" OR ")
    };

    Statement {
        table: table.name.clone(),
        sql: format!(
            "SELECT {} FROM {} WHERE {} ORDER BY {}",
            column_list(table),
            from_clause(table),
            where_clause,
            quote_identifier(table.primary_key())
        ),
        params,
    }
}

/// Distinct non-null values of one column
pub fn select_distinct(table: &TableDefinition, column: &str) -> Statement {
    let col = quote_identifier(column);
    Statement {
        table: table.name.clone(),
        sql: format!(
            "SELECT DISTINCT {col} FROM {} WHERE {col} IS NOT NULL ORDER BY {col}",
            from_clause(table)
        ),
        params: Vec::new(),
    }
}

/// Multi-row INSERTs, chunked to stay under the parameter limit
///
/// Blank cells of the primary key or of columns with a database default are
/// written as `DEFAULT`.
pub fn insert_rows(table: &TableDefinition, rows: &[&[Value]]) -> Vec<Statement> {
    if rows.is_empty() {
        return Vec::new();
    }
    let per_row = table.columns.len().max(1);
    let chunk_size = (MAX_PARAMS / per_row).max(1);

    rows.chunks(chunk_size)
        .map(|chunk| {
            let mut param_offset = 1;
            let mut params = Vec::new();
            let tuples: Vec<String> = chunk
                .iter()
                .map(|values| {
                    let cells: Vec<String> = table
                        .columns
                        .iter()
                        .zip(values.iter())
                        .map(|(col, value)| {
                            if is_blank(value) && (col.primary_key || col.default_value.is_some()) {
                                "DEFAULT".to_string()
                            } else {
                                params.push(SqlParam::cell(col, value.clone()));
                                next_placeholder(&mut param_offset)
                            }
                        })
                        .collect();
                    format!("({})", cells.join(", "))
                })
                .collect();

            Statement {
                table: table.name.clone(),
                sql: format!(
                    "INSERT INTO {} ({}) VALUES {}",
                    from_clause(table),
                    column_list(table),
                    tuples.join(", ")
                ),
                params,
            }
        })
        .collect()
}

/// UPDATE of the given columns on the row with primary key `key`
pub fn update_row(
    table: &TableDefinition,
    key: &Value,
    changes: &[(&ColumnDefinition, Value)],
) -> Statement {
    let mut param_offset = 1;
    let mut params = Vec::new();
    let assignments: Vec<String> = changes
        .iter()
        .map(|(col, value)| {
            params.push(SqlParam::cell(col, value.clone()));
            format!(
                "{} = {}",
                quote_identifier(&col.name),
                next_placeholder(&mut param_offset)
            )
        })
        .collect();

    let (pk_clause, pk_param) = primary_key_clause(table, key, &mut param_offset);
    params.push(pk_param);

    Statement {
        table: table.name.clone(),
        sql: format!(
            "UPDATE {} SET {} WHERE {}",
            from_clause(table),
            assignments.join(", "),
            pk_clause
        ),
        params,
    }
}

/// DELETE of the row with primary key `key`
pub fn delete_row(table: &TableDefinition, key: &Value) -> Statement {
    let mut param_offset = 1;
    let (pk_clause, pk_param) = primary_key_clause(table, key, &mut param_offset);
    Statement {
        table: table.name.clone(),
        sql: format!("DELETE FROM {} WHERE {}", from_clause(table), pk_clause),
        params: vec![pk_param],
    }
}

/// DELETE of every row whose `column` text is one of `keys`
pub fn delete_matching(table: &TableDefinition, column: &str, keys: Vec<String>) -> Statement {
    let mut param_offset = 1;
    let mut params = Vec::new();
    let clause = any_text_clause(column, keys, &mut param_offset, &mut params);
    Statement {
        table: table.name.clone(),
        sql: format!("DELETE FROM {} WHERE {}", from_clause(table), clause),
        params,
    }
}

fn primary_key_clause(table: &TableDefinition, key: &Value, param_offset: &mut i32) -> (String, SqlParam) {
    let pk = table.primary_key();
    let param = match table.primary_key_column() {
        Some(col) => SqlParam::cell(col, key.clone()),
        None => SqlParam::Cell {
            column: pk.to_string(),
            column_type: ColumnType::String,
            value: key.clone(),
        },
    };
    (
        format!("{} = {}", quote_identifier(pk), next_placeholder(param_offset)),
        param,
    )
}
