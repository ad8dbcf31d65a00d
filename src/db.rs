//! Database access
//!
//! Thin layer over a `PgPool`: binds `Statement` parameters by column type,
//! reads rows back into JSON cells, puts a deadline on every call and runs
//! write batches inside one transaction.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use sqlx::pool::PoolConnection;
use sqlx::postgres::{PgArguments, PgConnection, PgPoolOptions, PgRow};
use sqlx::query::Query;
use sqlx::{PgPool, Postgres, Row as _};

use crate::config::EngineConfig;
use crate::error::{BookingError, Result};
use crate::rows::RowTable;
use crate::sql::query::{SqlParam, Statement};
use crate::types::{ColumnDefinition, ColumnType, TableDefinition, parse_date};

type PgQuery<'q> = Query<'q, Postgres, PgArguments>;

/// Pooled Postgres access with a per-call deadline
#[derive(Debug, Clone)]
pub struct Database {
    pool: PgPool,
    statement_timeout: Duration,
}

impl Database {
    /// Open a pool sized by the configuration
    pub async fn connect(config: &EngineConfig) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .acquire_timeout(config.statement_timeout)
            .connect(&config.database_url)
            .await
            .map_err(|e| BookingError::Connection(format!("Database connection failed: {}", e)))?;
        Ok(Self::from_pool(pool, config.statement_timeout))
    }

    /// Use an existing pool
    pub fn from_pool(pool: PgPool, statement_timeout: Duration) -> Self {
        Self {
            pool,
            statement_timeout,
        }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub fn statement_timeout(&self) -> Duration {
        self.statement_timeout
    }

    /// Run a database future under the statement deadline
    pub(crate) async fn deadline<T, F>(&self, what: &str, fut: F) -> Result<T>
    where
        F: Future<Output = std::result::Result<T, sqlx::Error>>,
    {
        match tokio::time::timeout(self.statement_timeout, fut).await {
            Ok(result) => result.map_err(BookingError::from),
            Err(_) => Err(BookingError::timeout(format!(
                "{} exceeded {:?}",
                what, self.statement_timeout
            ))),
        }
    }

    /// Check out one connection; it returns to the pool when dropped
    pub async fn acquire(&self) -> Result<PoolConnection<Postgres>> {
        self.deadline("acquire connection", self.pool.acquire()).await
    }

    /// Run a SELECT and read every row against `table`
    pub async fn fetch_table(
        &self,
        conn: &mut PgConnection,
        table: &Arc<TableDefinition>,
        statement: &Statement,
    ) -> Result<RowTable> {
        tracing::debug!(table = %statement.table, sql = %statement.sql, "Fetching rows");
        let query = build_query(statement)?;
        let rows = self
            .deadline(&format!("select from {}", statement.table), query.fetch_all(conn))
            .await?;

        let mut values = Vec::with_capacity(rows.len());
        for row in &rows {
            values.push(
                table
                    .columns
                    .iter()
                    .map(|col| extract_column_value(row, col))
                    .collect::<Result<Vec<_>>>()?,
            );
        }
        RowTable::from_rows(Arc::clone(table), values)
    }

    /// Run a single-column SELECT
    pub async fn fetch_column(
        &self,
        conn: &mut PgConnection,
        column: &ColumnDefinition,
        statement: &Statement,
    ) -> Result<Vec<Value>> {
        tracing::debug!(table = %statement.table, sql = %statement.sql, "Fetching column");
        let query = build_query(statement)?;
        let rows = self
            .deadline(&format!("select from {}", statement.table), query.fetch_all(conn))
            .await?;
        rows.iter()
            .map(|row| extract_column_value(row, column))
            .collect()
    }

    /// Execute statements in order inside one transaction
    ///
    /// Any failure rolls the whole batch back. Database failures surface as
    /// `Persistence`; nothing is committed unless every statement succeeds.
    pub async fn execute_batch(&self, statements: &[Statement]) -> Result<u64> {
        let queries = statements
            .iter()
            .map(build_query)
            .collect::<Result<Vec<_>>>()?;

        let mut tx = self.deadline("begin transaction", self.pool.begin()).await?;
        let mut affected = 0;

        for (n, (statement, query)) in statements.iter().zip(queries).enumerate() {
            tracing::debug!(
                step = n + 1,
                table = %statement.table,
                sql = %statement.sql,
                "Executing statement"
            );
            let failure = match tokio::time::timeout(self.statement_timeout, query.execute(&mut *tx)).await {
                Ok(Ok(done)) => {
                    affected += done.rows_affected();
                    continue;
                }
                Ok(Err(e)) => BookingError::Persistence(e),
                Err(_) => BookingError::timeout(format!(
                    "statement {} on {} exceeded {:?}",
                    n + 1,
                    statement.table,
                    self.statement_timeout
                )),
            };

            tracing::warn!(
                step = n + 1,
                table = %statement.table,
                error = %failure,
                "Statement failed, rolling back"
            );
            if let Err(e) = tx.rollback().await {
                tracing::warn!(error = %e, "Rollback failed");
            }
            return Err(failure);
        }

        match tokio::time::timeout(self.statement_timeout, tx.commit()).await {
            Ok(Ok(())) => Ok(affected),
            Ok(Err(e)) => Err(BookingError::Persistence(e)),
            Err(_) => Err(BookingError::timeout("commit")),
        }
    }
}

fn build_query(statement: &Statement) -> Result<PgQuery<'_>> {
    let mut query = sqlx::query(&statement.sql);
    for param in &statement.params {
        query = bind_param(query, param)?;
    }
    Ok(query)
}

fn bind_param<'q>(query: PgQuery<'q>, param: &'q SqlParam) -> Result<PgQuery<'q>> {
    match param {
        SqlParam::Cell {
            column,
            column_type,
            value,
        } => bind_value(query, column_type, column, value),
        SqlParam::TextArray(keys) => Ok(query.bind(keys.clone())),
        SqlParam::BigInt(n) => Ok(query.bind(*n)),
    }
}

fn invalid(column_name: &str, expected: &str) -> BookingError {
    BookingError::validation(format!("Column '{}' expected {}", column_name, expected))
}

fn bind_value<'q>(
    query: PgQuery<'q>,
    column_type: &ColumnType,
    column_name: &str,
    value: &'q Value,
) -> Result<PgQuery<'q>> {
    use rust_decimal::prelude::FromPrimitive;

    // Cleared non-text cells arrive as empty strings
    let cleared = value.as_str().is_some_and(|s| s.trim().is_empty())
        && !matches!(column_type, ColumnType::String | ColumnType::Enum { .. });
    if value.is_null() || cleared {
        return Ok(match column_type {
            ColumnType::String | ColumnType::Enum { .. } => query.bind(None::<String>),
            ColumnType::Integer => query.bind(None::<i64>),
            ColumnType::Decimal { .. } => query.bind(None::<rust_decimal::Decimal>),
            ColumnType::Boolean => query.bind(None::<bool>),
            ColumnType::Date => query.bind(None::<chrono::NaiveDate>),
            ColumnType::Timestamp => query.bind(None::<chrono::DateTime<chrono::Utc>>),
            ColumnType::Json => query.bind(None::<Value>),
        });
    }

    Ok(match column_type {
        ColumnType::String | ColumnType::Enum { .. } => match value {
            Value::String(s) => query.bind(s.as_str()),
            Value::Number(n) => query.bind(n.to_string()),
            _ => return Err(invalid(column_name, "string")),
        },
        ColumnType::Integer => {
            let int_val = value
                .as_i64()
                .or_else(|| value.as_str().and_then(|s| s.trim().parse::<i64>().ok()))
                .ok_or_else(|| invalid(column_name, "integer"))?;
            query.bind(int_val)
        }
        ColumnType::Decimal { .. } => {
            let dec_val = match value {
                Value::Number(n) => n
                    .to_string()
                    .parse::<rust_decimal::Decimal>()
                    .ok()
                    .or_else(|| n.as_f64().and_then(rust_decimal::Decimal::from_f64)),
                Value::String(s) => s.trim().parse::<rust_decimal::Decimal>().ok(),
                _ => None,
            }
            .ok_or_else(|| invalid(column_name, "decimal"))?;
            query.bind(dec_val)
        }
        ColumnType::Boolean => {
            let bool_val = value
                .as_bool()
                .or_else(|| {
                    value
                        .as_str()
                        .and_then(|s| match s.trim().to_lowercase().as_str() {
                            "true" | "1" | "yes" => Some(true),
                            "false" | "0" | "no" => Some(false),
                            _ => None,
                        })
                })
                .ok_or_else(|| invalid(column_name, "boolean"))?;
            query.bind(bool_val)
        }
        ColumnType::Date => {
            let date = value
                .as_str()
                .and_then(parse_date)
                .ok_or_else(|| invalid(column_name, "date (YYYY-MM-DD)"))?;
            query.bind(date)
        }
        ColumnType::Timestamp => {
            let timestamp_str = value
                .as_str()
                .ok_or_else(|| invalid(column_name, "timestamp string"))?;
            let timestamp = chrono::DateTime::parse_from_rfc3339(timestamp_str)
                .map_err(|e| {
                    BookingError::validation(format!(
                        "Column '{}' has invalid timestamp: {}",
                        column_name, e
                    ))
                })?
                .with_timezone(&chrono::Utc);
            query.bind(timestamp)
        }
        ColumnType::Json => query.bind(value),
    })
}

fn extract_column_value(row: &PgRow, col: &ColumnDefinition) -> Result<Value> {
    let name = col.name.as_str();
    Ok(match &col.column_type {
        ColumnType::String | ColumnType::Enum { .. } => row
            .try_get::<Option<String>, _>(name)?
            .map(Value::String)
            .unwrap_or(Value::Null),
        ColumnType::Integer => {
            let v = match row.try_get::<Option<i64>, _>(name) {
                Ok(v) => v,
                Err(_) => row.try_get::<Option<i32>, _>(name)?.map(i64::from),
            };
            v.map(Value::from).unwrap_or(Value::Null)
        }
        ColumnType::Decimal { .. } => {
            use rust_decimal::prelude::ToPrimitive;
            let v = match row.try_get::<Option<rust_decimal::Decimal>, _>(name) {
                Ok(v) => v.and_then(|d| d.to_f64()),
                Err(_) => row.try_get::<Option<f64>, _>(name)?,
            };
            v.and_then(serde_json::Number::from_f64)
                .map(Value::Number)
                .unwrap_or(Value::Null)
        }
        ColumnType::Boolean => row
            .try_get::<Option<bool>, _>(name)?
            .map(Value::Bool)
            .unwrap_or(Value::Null),
        ColumnType::Date => row
            .try_get::<Option<chrono::NaiveDate>, _>(name)?
            .map(|d| Value::String(d.format("%Y-%m-%d").to_string()))
            .unwrap_or(Value::Null),
        ColumnType::Timestamp => {
            let v = match row.try_get::<Option<chrono::DateTime<chrono::Utc>>, _>(name) {
                Ok(v) => v,
                Err(_) => row
                    .try_get::<Option<chrono::NaiveDateTime>, _>(name)?
                    .map(|naive| naive.and_utc()),
            };
            v.map(|dt| Value::String(dt.to_rfc3339()))
                .unwrap_or(Value::Null)
        }
        ColumnType::Json => row
            .try_get::<Option<Value>, _>(name)?
            .unwrap_or(Value::Null),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn bind_one(column_type: ColumnType, value: &Value) -> Result<()> {
        bind_value(sqlx::query("SELECT $1"), &column_type, "c", value).map(|_| ())
    }

    #[test]
    fn test_bind_accepts_coercible_values() {
        assert!(bind_one(ColumnType::Integer, &json!("42")).is_ok());
        assert!(bind_one(ColumnType::decimal(19, 4), &json!(0.0425)).is_ok());
        assert!(bind_one(ColumnType::decimal(19, 4), &json!("1000.50")).is_ok());
        assert!(bind_one(ColumnType::Boolean, &json!("yes")).is_ok());
        assert!(bind_one(ColumnType::Date, &json!("2024-12-31")).is_ok());
        assert!(bind_one(ColumnType::String, &json!(12)).is_ok());
        assert!(bind_one(ColumnType::Json, &json!({"a": 1})).is_ok());
    }

    #[test]
    fn test_bind_rejects_bad_values() {
        assert!(bind_one(ColumnType::Integer, &json!("twelve")).is_err());
        assert!(bind_one(ColumnType::Date, &json!("31.12.2024")).is_err());
        assert!(bind_one(ColumnType::Timestamp, &json!("yesterday")).is_err());
        let err = bind_one(ColumnType::Boolean, &json!("maybe")).unwrap_err();
        assert!(matches!(err, BookingError::Validation(_)));
    }

    #[test]
    fn test_bind_null_for_every_type() {
        for t in [
            ColumnType::String,
            ColumnType::Integer,
            ColumnType::decimal(10, 2),
            ColumnType::Boolean,
            ColumnType::Date,
            ColumnType::Timestamp,
            ColumnType::Json,
        ] {
            assert!(bind_one(t, &Value::Null).is_ok());
        }
        assert!(bind_one(ColumnType::Integer, &json!("")).is_ok());
        assert!(bind_one(ColumnType::Date, &json!(" ")).is_ok());
    }

    #[test]
    fn test_build_query_binds_all_params() {
        let statement = Statement {
            table: "t".to_string(),
            sql: "SELECT 1 WHERE $1::text = ANY($2) LIMIT $3".to_string(),
            params: vec![
                SqlParam::Cell {
                    column: "a".to_string(),
                    column_type: ColumnType::Integer,
                    value: json!(1),
                },
                SqlParam::TextArray(vec!["1".to_string()]),
                SqlParam::BigInt(5),
            ],
        };
        assert!(build_query(&statement).is_ok());

        let bad = Statement {
            params: vec![SqlParam::Cell {
                column: "a".to_string(),
                column_type: ColumnType::Integer,
                value: json!("x"),
            }],
            ..statement
        };
        assert!(build_query(&bad).is_err());
    }

    fn lazy_database(timeout: Duration) -> Database {
        let pool = PgPoolOptions::new()
            .connect_lazy("postgres://localhost/unused")
            .unwrap();
        Database::from_pool(pool, timeout)
    }

    #[tokio::test]
    async fn test_deadline_expires_as_timeout() {
        let db = lazy_database(Duration::from_millis(1));
        let never = std::future::pending::<std::result::Result<(), sqlx::Error>>();
        let err = db.deadline("select from credit", never).await.unwrap_err();
        assert!(matches!(err, BookingError::Timeout(_)));
        assert!(err.to_string().contains("select from credit"));
    }

    #[tokio::test]
    async fn test_deadline_passes_results_through() {
        let db = lazy_database(Duration::from_secs(1));
        let value = db
            .deadline("ready", async { Ok::<_, sqlx::Error>(7) })
            .await
            .unwrap();
        assert_eq!(value, 7);

        let err = db
            .deadline("failing", async { Err::<(), _>(sqlx::Error::RowNotFound) })
            .await
            .unwrap_err();
        assert!(!matches!(err, BookingError::Timeout(_)));
    }
}
