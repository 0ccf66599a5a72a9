//! PostgreSQL implementation of the relational store

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, Utc};
use futures::stream::{self, BoxStream, StreamExt};
use sqlx::postgres::{PgConnectOptions, PgPool, PgPoolOptions, PgRow};
use sqlx::{Column, Postgres, QueryBuilder, Row as _, Transaction, TypeInfo};

use super::{Connector, RelationalStore};
use crate::value::{quote_ident, Row, Value};
use crate::{Error, Result};

/// PostgreSQL caps a single statement at 65535 bind parameters
const MAX_BIND_PARAMS: usize = 65_535;

const CURSOR_NAME: &str = "snapsync_cursor";

/// Pool-backed store. Each import or export opens its own and closes it when done.
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
    schema: String,
}

impl PgStore {
    pub async fn connect(options: PgConnectOptions, schema: &str, acquire_timeout: Duration) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(2)
            .acquire_timeout(acquire_timeout)
            .connect_with(options)
            .await?;
        Ok(Self {
            pool,
            schema: schema.to_string(),
        })
    }

    fn qualified(&self, table: &str) -> String {
        format!("{}.{}", quote_ident(&self.schema), quote_ident(table))
    }
}

#[async_trait]
impl RelationalStore for PgStore {
    async fn column_types(&self, table: &str) -> Result<HashMap<String, String>> {
        let rows: Vec<(String, String)> = sqlx::query_as(
            r#"
            SELECT column_name, data_type
            FROM information_schema.columns
            WHERE table_schema = $1 AND table_name = $2
            "#,
        )
        .bind(&self.schema)
        .bind(table)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().collect())
    }

    async fn table_columns(&self, table: &str) -> Result<Vec<String>> {
        let rows: Vec<(String,)> = sqlx::query_as(
            r#"
            SELECT column_name
            FROM information_schema.columns
            WHERE table_schema = $1 AND table_name = $2
            ORDER BY ordinal_position
            "#,
        )
        .bind(&self.schema)
        .bind(table)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(|(c,)| c).collect())
    }

    async fn existing_tables(&self, candidates: &[&str]) -> Result<Vec<String>> {
        let names: Vec<String> = candidates.iter().map(|c| c.to_string()).collect();
        let rows: Vec<(String,)> = sqlx::query_as(
            r#"
            SELECT table_name
            FROM information_schema.tables
            WHERE table_schema = $1 AND table_type = 'BASE TABLE' AND table_name = ANY($2)
            "#,
        )
        .bind(&self.schema)
        .bind(&names)
        .fetch_all(&self.pool)
        .await?;

        let found: Vec<String> = rows.into_iter().map(|(t,)| t).collect();
        Ok(names.into_iter().filter(|n| found.contains(n)).collect())
    }

    async fn count_rows(&self, table: &str) -> Result<u64> {
        let (count,): (i64,) = sqlx::query_as(&format!("SELECT COUNT(*) FROM {}", self.qualified(table)))
            .fetch_one(&self.pool)
            .await?;
        Ok(count as u64)
    }

    async fn insert_skip_conflicts(
        &self,
        table: &str,
        columns: &[String],
        rows: Vec<Vec<Value>>,
    ) -> Result<u64> {
        if rows.is_empty() || columns.is_empty() {
            return Ok(0);
        }

        let types = self.column_types(table).await?;
        let column_types: Vec<&str> = columns
            .iter()
            .map(|c| types.get(c).map(String::as_str).unwrap_or("text"))
            .collect();

        let mut params = Vec::with_capacity(rows.len());
        for row in rows {
            let typed = row
                .into_iter()
                .zip(columns.iter().zip(&column_types))
                .map(|(value, (column, data_type))| PgParam::from_value(value, data_type, column))
                .collect::<Result<Vec<_>>>()?;
            params.push(typed);
        }

        let column_list = columns.iter().map(|c| quote_ident(c)).collect::<Vec<_>>().join(", ");
        let rows_per_statement = (MAX_BIND_PARAMS / columns.len()).max(1);

        let mut tx = self.pool.begin().await?;
        let mut inserted = 0;
        let mut remaining = params.into_iter();
        loop {
            let chunk: Vec<Vec<PgParam>> = remaining.by_ref().take(rows_per_statement).collect();
            if chunk.is_empty() {
                break;
            }

            let mut builder: QueryBuilder<Postgres> =
                QueryBuilder::new(format!("INSERT INTO {} ({}) ", self.qualified(table), column_list));
            builder.push_values(chunk, |mut b, row| {
                for param in row {
                    param.bind(&mut b);
                }
            });
            builder.push(" ON CONFLICT DO NOTHING");

            inserted += builder.build().execute(&mut *tx).await?.rows_affected();
        }
        tx.commit().await?;

        Ok(inserted)
    }

    fn select_batches<'a>(
        &'a self,
        table: &'a str,
        columns: &'a [String],
        batch_size: usize,
    ) -> BoxStream<'a, Result<Vec<Row>>> {
        let cursor = Arc::new(Cursor {
            pool: self.pool.clone(),
            schema: self.schema.clone(),
            table: table.to_string(),
            columns: columns.to_vec(),
            batch_size: batch_size.max(1),
        });

        stream::try_unfold(CursorState::Start, move |state| {
            let cursor = Arc::clone(&cursor);
            async move { cursor.advance(state).await }
        })
        .boxed()
    }

    async fn close(&self) {
        self.pool.close().await;
    }
}

enum CursorState {
    Start,
    Open(Transaction<'static, Postgres>),
    Done,
}

/// A server-side cursor over one table, fetched `batch_size` rows at a time
struct Cursor {
    pool: PgPool,
    schema: String,
    table: String,
    columns: Vec<String>,
    batch_size: usize,
}

impl Cursor {
    async fn advance(&self, state: CursorState) -> Result<Option<(Vec<Row>, CursorState)>> {
        let mut tx = match state {
            CursorState::Done => return Ok(None),
            CursorState::Open(tx) => tx,
            CursorState::Start => self.declare().await?,
        };

        let rows = sqlx::query(&format!("FETCH FORWARD {} FROM {}", self.batch_size, CURSOR_NAME))
            .fetch_all(&mut *tx)
            .await?;
        if rows.is_empty() {
            tx.commit().await?;
            return Ok(None);
        }

        let batch = rows
            .iter()
            .map(|row| decode_row(row, &self.columns))
            .collect::<Result<Vec<_>>>()?;

        let next = if batch.len() < self.batch_size {
            tx.commit().await?;
            CursorState::Done
        } else {
            CursorState::Open(tx)
        };
        Ok(Some((batch, next)))
    }

    async fn declare(&self) -> Result<Transaction<'static, Postgres>> {
        let rows: Vec<(String, String)> = sqlx::query_as(
            "SELECT column_name, data_type FROM information_schema.columns WHERE table_schema = $1 AND table_name = $2",
        )
        .bind(&self.schema)
        .bind(&self.table)
        .fetch_all(&self.pool)
        .await?;
        let types: HashMap<String, String> = rows.into_iter().collect();

        let select_list = self
            .columns
            .iter()
            .map(|c| select_expr(c, types.get(c).map(String::as_str)))
            .collect::<Vec<_>>()
            .join(", ");

        let mut tx = self.pool.begin().await?;
        sqlx::query(&format!(
            "DECLARE {} NO SCROLL CURSOR FOR SELECT {} FROM {}.{}",
            CURSOR_NAME,
            select_list,
            quote_ident(&self.schema),
            quote_ident(&self.table)
        ))
        .execute(&mut *tx)
        .await?;
        Ok(tx)
    }
}

/// Select expression that yields a type `decode_row` understands
fn select_expr(column: &str, data_type: Option<&str>) -> String {
    let quoted = quote_ident(column);
    match data_type {
        Some("numeric" | "decimal") => format!("{}::float8 AS {}", quoted, quoted),
        Some(
            "boolean"
            | "smallint"
            | "integer"
            | "bigint"
            | "real"
            | "double precision"
            | "text"
            | "character varying"
            | "character"
            | "timestamp with time zone"
            | "timestamp without time zone",
        )
        | None => quoted,
        Some(_) => format!("{}::text AS {}", quoted, quoted),
    }
}

fn decode_row(row: &PgRow, columns: &[String]) -> Result<Row> {
    let mut out = Row::with_capacity(columns.len());
    for (i, column) in columns.iter().enumerate() {
        out.insert(column.as_str(), decode_value(row, i, column)?);
    }
    Ok(out)
}

fn decode_value(row: &PgRow, index: usize, column: &str) -> Result<Value> {
    let type_name = row.column(index).type_info().name().to_string();
    let value: Value = match type_name.as_str() {
        "BOOL" => row.try_get::<Option<bool>, _>(index)?.into(),
        "INT2" => row.try_get::<Option<i16>, _>(index)?.map(i64::from).into(),
        "INT4" => row.try_get::<Option<i32>, _>(index)?.map(i64::from).into(),
        "INT8" => row.try_get::<Option<i64>, _>(index)?.into(),
        "FLOAT4" => row.try_get::<Option<f32>, _>(index)?.map(f64::from).into(),
        "FLOAT8" => row.try_get::<Option<f64>, _>(index)?.into(),
        "TIMESTAMPTZ" => row.try_get::<Option<DateTime<Utc>>, _>(index)?.into(),
        "TIMESTAMP" => row
            .try_get::<Option<NaiveDateTime>, _>(index)?
            .map(|naive| naive.and_utc())
            .into(),
        "TEXT" | "VARCHAR" | "BPCHAR" | "NAME" => row.try_get::<Option<String>, _>(index)?.into(),
        other => {
            return Err(Error::conversion(
                column,
                format!("unsupported relational type {}", other),
            ))
        }
    };
    Ok(value)
}

/// A value bound with the parameter type of its target column, so NULLs are
/// typed correctly and integers fit the column width.
enum PgParam {
    Bool(Option<bool>),
    Int2(Option<i16>),
    Int4(Option<i32>),
    Int8(Option<i64>),
    Float4(Option<f32>),
    Float8(Option<f64>),
    Text(Option<String>),
    TimestampTz(Option<DateTime<Utc>>),
    Timestamp(Option<NaiveDateTime>),
}

impl PgParam {
    fn from_value(value: Value, data_type: &str, column: &str) -> Result<Self> {
        let mismatch = |value: &Value| {
            Error::conversion(
                column,
                format!("cannot bind {} to a {} column", value.type_name(), data_type),
            )
        };
        let narrow = |i: i64, bits: &str| Error::conversion(column, format!("{} does not fit {}", i, bits));

        let param = match data_type {
            "boolean" => PgParam::Bool(match value {
                Value::Null => None,
                Value::Bool(b) => Some(b),
                Value::Integer(i) => Some(i != 0),
                ref other => return Err(mismatch(other)),
            }),
            "smallint" => PgParam::Int2(match value {
                Value::Null => None,
                Value::Integer(i) => Some(i16::try_from(i).map_err(|_| narrow(i, "smallint"))?),
                ref other => return Err(mismatch(other)),
            }),
            "integer" => PgParam::Int4(match value {
                Value::Null => None,
                Value::Integer(i) => Some(i32::try_from(i).map_err(|_| narrow(i, "integer"))?),
                ref other => return Err(mismatch(other)),
            }),
            "bigint" => PgParam::Int8(match value {
                Value::Null => None,
                Value::Integer(i) => Some(i),
                ref other => return Err(mismatch(other)),
            }),
            "real" => PgParam::Float4(match value {
                Value::Null => None,
                Value::Real(f) => Some(f as f32),
                Value::Integer(i) => Some(i as f32),
                ref other => return Err(mismatch(other)),
            }),
            "double precision" | "numeric" | "decimal" => PgParam::Float8(match value {
                Value::Null => None,
                Value::Real(f) => Some(f),
                Value::Integer(i) => Some(i as f64),
                ref other => return Err(mismatch(other)),
            }),
            "timestamp with time zone" => PgParam::TimestampTz(match value {
                Value::Null => None,
                Value::Timestamp(ts) => Some(ts),
                ref other => return Err(mismatch(other)),
            }),
            "timestamp without time zone" => PgParam::Timestamp(match value {
                Value::Null => None,
                Value::Timestamp(ts) => Some(ts.naive_utc()),
                ref other => return Err(mismatch(other)),
            }),
            _ => PgParam::Text(match value {
                Value::Null => None,
                Value::Text(s) => Some(s),
                Value::Integer(i) => Some(i.to_string()),
                Value::Real(f) => Some(f.to_string()),
                Value::Bool(b) => Some(b.to_string()),
                Value::Timestamp(ts) => Some(ts.to_rfc3339()),
            }),
        };
        Ok(param)
    }

    fn bind(self, b: &mut sqlx::query_builder::Separated<'_, '_, Postgres, &'static str>) {
        match self {
            PgParam::Bool(v) => b.push_bind(v),
            PgParam::Int2(v) => b.push_bind(v),
            PgParam::Int4(v) => b.push_bind(v),
            PgParam::Int8(v) => b.push_bind(v),
            PgParam::Float4(v) => b.push_bind(v),
            PgParam::Float8(v) => b.push_bind(v),
            PgParam::Text(v) => b.push_bind(v),
            PgParam::TimestampTz(v) => b.push_bind(v),
            PgParam::Timestamp(v) => b.push_bind(v),
        };
    }
}

/// Builds a [`PgStore`] per operation from fixed connect options.
#[derive(Clone)]
pub struct PgConnector {
    options: PgConnectOptions,
    schema: String,
    acquire_timeout: Duration,
}

impl PgConnector {
    pub fn new(options: PgConnectOptions, schema: impl Into<String>, acquire_timeout: Duration) -> Self {
        Self {
            options,
            schema: schema.into(),
            acquire_timeout,
        }
    }
}

#[async_trait]
impl Connector for PgConnector {
    type Store = PgStore;

    async fn connect(&self) -> Result<PgStore> {
        PgStore::connect(self.options.clone(), &self.schema, self.acquire_timeout).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_select_expr_casts_unknown_types() {
        assert_eq!(select_expr("id", Some("integer")), "\"id\"");
        assert_eq!(select_expr("price", Some("numeric")), "\"price\"::float8 AS \"price\"");
        assert_eq!(select_expr("uid", Some("uuid")), "\"uid\"::text AS \"uid\"");
    }

    #[test]
    fn test_params_follow_column_type() {
        assert!(matches!(
            PgParam::from_value(Value::Null, "integer", "id").unwrap(),
            PgParam::Int4(None)
        ));
        assert!(matches!(
            PgParam::from_value(Value::Integer(7), "bigint", "media_length").unwrap(),
            PgParam::Int8(Some(7))
        ));
        assert!(matches!(
            PgParam::from_value(Value::Bool(true), "boolean", "explicit").unwrap(),
            PgParam::Bool(Some(true))
        ));
    }

    #[test]
    fn test_integer_overflow_is_conversion_error() {
        let err = PgParam::from_value(Value::Integer(i64::MAX), "integer", "duration").err().unwrap();
        assert!(matches!(err, Error::Conversion { .. }));
    }

    #[test]
    fn test_unconverted_timestamp_rejected() {
        // Epoch millis must be converted by the type adapter before binding
        let result = PgParam::from_value(Value::Integer(1_700_000_000_000), "timestamp with time zone", "pub_date");
        assert!(matches!(result, Err(Error::Conversion { .. })));
    }
}
