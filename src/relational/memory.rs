//! In-memory relational store
//!
//! Behaves like the PostgreSQL store for everything the engines rely on:
//! typed columns, key conflicts skipped on insert, all-or-nothing inserts,
//! server-side audit defaults and batched reads. Lets the engines and the
//! service be tested without a PostgreSQL server.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::Utc;
use futures::stream::{self, BoxStream, StreamExt};

use super::{Connector, RelationalStore};
use crate::value::{Row, Value};
use crate::{Error, Result};

#[derive(Debug, Clone)]
struct MemoryTable {
    /// (name, data_type) in ordinal order
    columns: Vec<(String, String)>,
    /// Columns forming the primary key; empty means no conflicts are detected
    key: Vec<String>,
    rows: Vec<Row>,
}

impl MemoryTable {
    fn key_of(&self, row: &Row) -> Option<Vec<String>> {
        if self.key.is_empty() {
            return None;
        }
        Some(
            self.key
                .iter()
                .map(|k| format!("{:?}", row.get(k).unwrap_or(&Value::Null)))
                .collect(),
        )
    }

    fn data_type(&self, column: &str) -> Option<&str> {
        self.columns
            .iter()
            .find(|(name, _)| name == column)
            .map(|(_, ty)| ty.as_str())
    }
}

#[derive(Debug, Default)]
struct Inner {
    tables: HashMap<String, MemoryTable>,
    failing_reads: HashSet<String>,
}

/// Shared, cloneable in-memory store. Clones see the same tables.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    inner: Arc<Mutex<Inner>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// A store holding every relational table of the built-in catalogs
    pub fn builtin_schema() -> Self {
        let store = Self::new();
        let ts = "timestamp with time zone";
        let audit = [("created_at", "timestamp without time zone"), ("updated_at", "timestamp without time zone")];

        let with_audit = |cols: &[(&'static str, &'static str)]| -> Vec<(&'static str, &'static str)> {
            cols.iter().copied().chain(audit.iter().copied()).collect()
        };

        store.create_table("podcast_channel_categories", &with_audit(&[("id", "integer"), ("name", "character varying")]), &["id"]);
        store.create_table("podcast_episode_categories", &with_audit(&[("id", "integer"), ("name", "character varying")]), &["id"]);
        store.create_table(
            "podcast_channels",
            &with_audit(&[
                ("id", "integer"),
                ("title", "character varying"),
                ("link", "character varying"),
                ("description", "text"),
                ("copyright", "character varying"),
                ("language", "character varying"),
                ("author", "character varying"),
                ("owner_email", "character varying"),
                ("owner_name", "character varying"),
                ("image_url", "character varying"),
                ("last_build_date", ts),
            ]),
            &["id"],
        );
        store.create_table(
            "podcast_episodes",
            &with_audit(&[
                ("id", "integer"),
                ("channel_id", "integer"),
                ("guid", "character varying"),
                ("title", "character varying"),
                ("description", "text"),
                ("link", "character varying"),
                ("pub_date", ts),
                ("duration", "integer"),
                ("explicit", "boolean"),
                ("image_url", "character varying"),
                ("media_url", "character varying"),
                ("media_type", "character varying"),
                ("media_length", "bigint"),
            ]),
            &["id"],
        );
        store.create_table("channel_category_map", &with_audit(&[("channel_id", "integer"), ("category_id", "integer")]), &["channel_id", "category_id"]);
        store.create_table("episode_category_map", &with_audit(&[("episode_id", "integer"), ("category_id", "integer")]), &["episode_id", "category_id"]);

        store.create_table("conference_rooms", &[("id", "integer"), ("name", "character varying"), ("sort", "integer")], &["id"]);
        store.create_table("conference_categories", &[("id", "integer"), ("title", "character varying"), ("sort", "integer"), ("type", "character varying")], &["id"]);
        store.create_table(
            "conference_speakers",
            &with_audit(&[
                ("id", "character varying"),
                ("first_name", "character varying"),
                ("last_name", "character varying"),
                ("bio", "character varying"),
                ("tag_line", "character varying"),
                ("profile_picture", "character varying"),
                ("is_top_speaker", "boolean"),
            ]),
            &["id"],
        );
        store.create_table(
            "conference_sessions",
            &with_audit(&[
                ("id", "character varying"),
                ("title", "character varying"),
                ("description", "text"),
                ("starts_at", ts),
                ("ends_at", ts),
                ("room_id", "integer"),
                ("is_service_session", "boolean"),
                ("is_plenum_session", "boolean"),
                ("status", "character varying"),
            ]),
            &["id"],
        );
        store.create_table("session_speakers", &[("session_id", "character varying"), ("speaker_id", "character varying")], &["session_id", "speaker_id"]);
        store.create_table("session_categories", &[("session_id", "character varying"), ("category_item_id", "integer")], &["session_id", "category_item_id"]);

        store
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        // A poisoned lock only means another test thread panicked mid-write
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Create (or replace) a table with `(name, data_type)` columns
    pub fn create_table(&self, name: &str, columns: &[(&str, &str)], key: &[&str]) {
        let table = MemoryTable {
            columns: columns
                .iter()
                .map(|(c, t)| (c.to_string(), t.to_string()))
                .collect(),
            key: key.iter().map(|k| k.to_string()).collect(),
            rows: Vec::new(),
        };
        self.lock().tables.insert(name.to_string(), table);
    }

    pub fn drop_table(&self, name: &str) {
        self.lock().tables.remove(name);
    }

    /// Snapshot of a table's rows, every column included
    pub fn rows(&self, table: &str) -> Vec<Row> {
        self.lock()
            .tables
            .get(table)
            .map(|t| t.rows.clone())
            .unwrap_or_default()
    }

    /// Make every subsequent read of `table` fail after its first batch
    pub fn fail_reads_of(&self, table: &str) {
        self.lock().failing_reads.insert(table.to_string());
    }

    /// Insert a fixture row directly, with the same checks as a bulk insert
    pub fn insert(&self, table: &str, row: Row) -> Result<u64> {
        let columns: Vec<String> = row.column_names().map(str::to_string).collect();
        self.insert_rows(table, &columns, vec![row.into_values()])
    }

    fn insert_rows(&self, table: &str, columns: &[String], rows: Vec<Vec<Value>>) -> Result<u64> {
        let mut inner = self.lock();
        let target = inner
            .tables
            .get_mut(table)
            .ok_or_else(|| Error::Store(format!("relation \"{}\" does not exist", table)))?;

        if let Some(unknown) = columns.iter().find(|c| target.data_type(c).is_none()) {
            return Err(Error::Store(format!(
                "column \"{}\" of relation \"{}\" does not exist",
                unknown, table
            )));
        }

        // Validate everything first so a bad row leaves the table untouched
        let mut prepared = Vec::with_capacity(rows.len());
        for values in rows {
            if values.len() != columns.len() {
                return Err(Error::Store(format!(
                    "INSERT has {} expressions but {} target columns",
                    values.len(),
                    columns.len()
                )));
            }
            let mut row = Row::with_capacity(target.columns.len());
            for (column, data_type) in &target.columns {
                match columns.iter().position(|c| c == column) {
                    Some(i) => {
                        let value = &values[i];
                        if !accepts(data_type, value) {
                            return Err(Error::Store(format!(
                                "column \"{}\" is of type {} but expression is of type {}",
                                column,
                                data_type,
                                value.type_name()
                            )));
                        }
                        row.insert(column.as_str(), value.clone());
                    }
                    None if column == "created_at" || column == "updated_at" => {
                        row.insert(column.as_str(), Value::Timestamp(Utc::now()));
                    }
                    None => row.insert(column.as_str(), Value::Null),
                }
            }
            prepared.push(row);
        }

        let mut seen: HashSet<Vec<String>> =
            target.rows.iter().filter_map(|r| target.key_of(r)).collect();
        let mut inserted = 0;
        for row in prepared {
            if let Some(key) = target.key_of(&row) {
                if !seen.insert(key) {
                    continue;
                }
            }
            target.rows.push(row);
            inserted += 1;
        }

        Ok(inserted)
    }
}

fn accepts(data_type: &str, value: &Value) -> bool {
    match (data_type, value) {
        (_, Value::Null) => true,
        ("boolean", v) => matches!(v, Value::Bool(_)),
        (t, v) if t.starts_with("timestamp") => matches!(v, Value::Timestamp(_)),
        ("integer" | "bigint" | "smallint", v) => matches!(v, Value::Integer(_)),
        ("double precision" | "real" | "numeric", v) => matches!(v, Value::Real(_) | Value::Integer(_)),
        ("text" | "character varying", v) => matches!(v, Value::Text(_)),
        _ => true,
    }
}

#[async_trait]
impl RelationalStore for MemoryStore {
    async fn column_types(&self, table: &str) -> Result<HashMap<String, String>> {
        Ok(self
            .lock()
            .tables
            .get(table)
            .map(|t| t.columns.iter().cloned().collect())
            .unwrap_or_default())
    }

    async fn table_columns(&self, table: &str) -> Result<Vec<String>> {
        Ok(self
            .lock()
            .tables
            .get(table)
            .map(|t| t.columns.iter().map(|(c, _)| c.clone()).collect())
            .unwrap_or_default())
    }

    async fn existing_tables(&self, candidates: &[&str]) -> Result<Vec<String>> {
        let inner = self.lock();
        Ok(candidates
            .iter()
            .filter(|c| inner.tables.contains_key(**c))
            .map(|c| c.to_string())
            .collect())
    }

    async fn count_rows(&self, table: &str) -> Result<u64> {
        self.lock()
            .tables
            .get(table)
            .map(|t| t.rows.len() as u64)
            .ok_or_else(|| Error::Store(format!("relation \"{}\" does not exist", table)))
    }

    async fn insert_skip_conflicts(
        &self,
        table: &str,
        columns: &[String],
        rows: Vec<Vec<Value>>,
    ) -> Result<u64> {
        self.insert_rows(table, columns, rows)
    }

    fn select_batches<'a>(
        &'a self,
        table: &'a str,
        columns: &'a [String],
        batch_size: usize,
    ) -> BoxStream<'a, Result<Vec<Row>>> {
        let inner = self.lock();
        let Some(source) = inner.tables.get(table) else {
            let err = Error::Store(format!("relation \"{}\" does not exist", table));
            return stream::iter(vec![Err(err)]).boxed();
        };

        let projected: Vec<Row> = source
            .rows
            .iter()
            .map(|row| -> Row {
                columns
                    .iter()
                    .map(|c| (c.clone(), row.get(c).cloned().unwrap_or(Value::Null)))
                    .collect()
            })
            .collect();

        let mut batches: Vec<Result<Vec<Row>>> = projected
            .chunks(batch_size.max(1))
            .map(|chunk| Ok(chunk.to_vec()))
            .collect();

        if inner.failing_reads.contains(table) {
            batches.truncate(1);
            batches.push(Err(Error::Store(format!(
                "connection lost while reading \"{}\"",
                table
            ))));
        }

        stream::iter(batches).boxed()
    }

    async fn close(&self) {}
}

#[async_trait]
impl Connector for MemoryStore {
    type Store = MemoryStore;

    async fn connect(&self) -> Result<MemoryStore> {
        Ok(self.clone())
    }
}
