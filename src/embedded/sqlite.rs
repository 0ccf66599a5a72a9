//! SQLite storage implementation

use std::path::{Path, PathBuf};

use rusqlite::{Connection, OpenFlags, OptionalExtension, params_from_iter};

use crate::catalog::Catalog;
use crate::value::{quote_ident, Row, Value};
use crate::Result;

/// A single embedded database file
pub struct EmbeddedStore {
    conn: Connection,
    path: Option<PathBuf>,
}

impl EmbeddedStore {
    /// Open a database file for writing (creates if doesn't exist)
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)?;
        Ok(Self {
            conn,
            path: Some(path.to_path_buf()),
        })
    }

    /// Open an existing database file read-only (import sources)
    pub fn open_read_only(path: &Path) -> Result<Self> {
        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )?;
        Ok(Self {
            conn,
            path: Some(path.to_path_buf()),
        })
    }

    /// Open an in-memory database (for testing)
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Ok(Self { conn, path: None })
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Create every table of the catalog that has a schema.
    ///
    /// Idempotent: all statements are `CREATE TABLE IF NOT EXISTS`.
    pub fn initialize_schema(&self, catalog: &Catalog) -> Result<()> {
        for entity in &catalog.entities {
            if let Some(ddl) = &entity.embedded_ddl {
                self.conn.execute_batch(ddl)?;
            }
        }
        Ok(())
    }

    /// Execute raw SQL (schema setup in tests and tools)
    pub fn execute_batch(&self, sql: &str) -> Result<()> {
        self.conn.execute_batch(sql)?;
        Ok(())
    }

    // ========== Introspection ==========

    pub fn table_exists(&self, table: &str) -> Result<bool> {
        let found: Option<String> = self
            .conn
            .query_row(
                "SELECT name FROM sqlite_master WHERE type = 'table' AND name = ?1",
                [table],
                |row| row.get(0),
            )
            .optional()?;
        Ok(found.is_some())
    }

    /// Column names of a table, in declaration order
    pub fn table_columns(&self, table: &str) -> Result<Vec<String>> {
        let mut stmt = self
            .conn
            .prepare(&format!("PRAGMA table_info({})", quote_ident(table)))?;

        let columns = stmt
            .query_map([], |row| row.get::<_, String>(1))?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        Ok(columns)
    }

    pub fn count_rows(&self, table: &str) -> Result<usize> {
        let count: i64 = self.conn.query_row(
            &format!("SELECT COUNT(*) FROM {}", quote_ident(table)),
            [],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }

    // ========== Row Operations ==========

    /// Read every row of a table
    pub fn read_rows(&self, table: &str) -> Result<Vec<Row>> {
        let mut stmt = self
            .conn
            .prepare(&format!("SELECT * FROM {}", quote_ident(table)))?;
        let columns: Vec<String> = stmt.column_names().iter().map(|c| c.to_string()).collect();

        let mut rows = stmt.query([])?;
        let mut result = Vec::new();
        while let Some(row) = rows.next()? {
            let mut out = Row::with_capacity(columns.len());
            for (i, column) in columns.iter().enumerate() {
                out.insert(column.as_str(), Value::from_sqlite(row.get_ref(i)?, column)?);
            }
            result.push(out);
        }

        Ok(result)
    }

    /// Insert a single row (used to build fixtures and sources)
    pub fn insert_row(&self, table: &str, row: &Row) -> Result<()> {
        let columns: Vec<&str> = row.column_names().collect();
        let sql = insert_sql("INSERT", table, &columns);
        self.conn.execute(&sql, params_from_iter(row.values()))?;
        Ok(())
    }

    /// Write a batch with `INSERT OR REPLACE` semantics inside one transaction.
    ///
    /// Each element of `rows` holds values positionally matching `columns`.
    pub fn insert_or_replace(
        &mut self,
        table: &str,
        columns: &[&str],
        rows: &[Vec<Value>],
    ) -> Result<usize> {
        if rows.is_empty() {
            return Ok(0);
        }

        let sql = insert_sql("INSERT OR REPLACE", table, columns);
        let tx = self.conn.transaction()?;
        {
            let mut stmt = tx.prepare_cached(&sql)?;
            for row in rows {
                stmt.execute(params_from_iter(row.iter()))?;
            }
        }
        tx.commit()?;

        Ok(rows.len())
    }

    // ========== Maintenance ==========

    /// Reclaim free pages and refresh planner statistics
    pub fn compact(&self) -> Result<()> {
        self.conn.execute_batch("VACUUM; ANALYZE;")?;
        Ok(())
    }

    /// Close the connection, surfacing any error from the final flush
    pub fn close(self) -> Result<()> {
        self.conn.close().map_err(|(_, e)| e)?;
        Ok(())
    }
}

fn insert_sql(verb: &str, table: &str, columns: &[&str]) -> String {
    let column_list = columns
        .iter()
        .map(|c| quote_ident(c))
        .collect::<Vec<_>>()
        .join(", ");
    let placeholders = (1..=columns.len())
        .map(|i| format!("?{}", i))
        .collect::<Vec<_>>()
        .join(", ");
    format!(
        "{} INTO {} ({}) VALUES ({})",
        verb,
        quote_ident(table),
        column_list,
        placeholders
    )
}
