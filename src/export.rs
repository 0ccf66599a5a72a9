//! Export Engine - relational store into a fresh snapshot file
//!
//! A snapshot is built under a temporary name next to the current file,
//! compacted, and installed with two renames: current → backup, then
//! temp → current. Any failure before the install removes the temporary
//! file and leaves the installed snapshots untouched.
//!
//! SQLite writes happen on a blocking writer task fed through a bounded
//! channel, so relational reads and HTTP downloads keep running while the
//! file is written.

use std::fs;
use std::path::{Path, PathBuf};

use futures::TryStreamExt;
use serde::Serialize;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::adapter;
use crate::catalog::{Catalog, CatalogSet, EntityDescriptor};
use crate::embedded::{self, EmbeddedStore};
use crate::import::TableCount;
use crate::relational::RelationalStore;
use crate::resolver::resolve_order;
use crate::value::Value;
use crate::{Error, Result};

pub const DEFAULT_BATCH_SIZE: usize = 1000;

/// Batches in flight between the relational reader and the file writer
const WRITE_QUEUE_DEPTH: usize = 4;

/// The three paths of the snapshot rotation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotPaths {
    /// The file clients download
    pub current: PathBuf,
    /// The previous current file
    pub backup: PathBuf,
    /// Build location; lives beside `current` so the final rename is atomic
    pub temp: PathBuf,
}

impl SnapshotPaths {
    /// When both directories are the same, the backup is `<file>.bak` so it
    /// never coincides with the current file.
    pub fn new(storage_dir: &Path, backup_dir: &Path, file_name: &str) -> Self {
        let backup = if storage_dir == backup_dir {
            backup_dir.join(format!("{}.bak", file_name))
        } else {
            backup_dir.join(file_name)
        };
        Self {
            current: storage_dir.join(file_name),
            backup,
            temp: storage_dir.join(format!("{}.tmp", file_name)),
        }
    }

    pub fn file_name(&self) -> String {
        self.current
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    }

    /// Remove the temporary file if one is lying around
    pub fn discard_temp(&self) -> Result<()> {
        match fs::remove_file(&self.temp) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Rotate current → backup, then promote temp → current.
    pub fn install(&self) -> Result<()> {
        if !self.temp.is_file() {
            return Err(Error::FileNotReady(self.temp.clone()));
        }

        if self.current.exists() {
            if let Some(parent) = self.backup.parent() {
                fs::create_dir_all(parent)?;
            }
            // The backup directory may sit on another filesystem
            if fs::rename(&self.current, &self.backup).is_err() {
                fs::copy(&self.current, &self.backup)?;
                fs::remove_file(&self.current)?;
            }
            debug!(backup = %self.backup.display(), "Rotated previous snapshot");
        }

        fs::rename(&self.temp, &self.current)?;
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExportReport {
    pub path: PathBuf,
    pub tables: Vec<TableCount>,
    pub rows_exported: u64,
    /// Size of the installed snapshot in bytes
    pub size: u64,
}

impl ExportReport {
    pub fn rows_for(&self, table: &str) -> Option<u64> {
        self.tables.iter().find(|t| t.table == table).map(|t| t.rows)
    }
}

/// One table's worth of column choices
struct TablePlan<'c> {
    entity: &'c EntityDescriptor,
    relational_columns: Vec<String>,
    embedded_columns: Vec<String>,
}

enum WriterMsg {
    Batch {
        table: String,
        columns: Vec<String>,
        rows: Vec<Vec<Value>>,
    },
    /// All tables written; compact and close
    Finish,
}

pub struct ExportEngine<'a, S: RelationalStore + ?Sized> {
    catalogs: &'a CatalogSet,
    store: &'a S,
    paths: &'a SnapshotPaths,
    batch_size: usize,
}

impl<'a, S: RelationalStore + ?Sized> ExportEngine<'a, S> {
    pub fn new(catalogs: &'a CatalogSet, store: &'a S, paths: &'a SnapshotPaths) -> Self {
        Self {
            catalogs,
            store,
            paths,
            batch_size: DEFAULT_BATCH_SIZE,
        }
    }

    pub fn batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    /// Build a new snapshot and install it as current.
    pub async fn export(&self) -> Result<ExportReport> {
        let catalog = self.catalogs.export_catalog()?;

        if self.paths.temp.exists() {
            warn!(path = %self.paths.temp.display(), "Removing stale temporary snapshot");
        }
        self.paths.discard_temp()?;
        if let Some(parent) = self.paths.temp.parent() {
            fs::create_dir_all(parent)?;
        }

        let tables = match self.build(catalog).await {
            Ok(tables) => tables,
            Err(e) => {
                if let Err(cleanup) = self.paths.discard_temp() {
                    warn!(error = %cleanup, "Failed to remove temporary snapshot");
                }
                return Err(e);
            }
        };

        self.paths.install()?;

        let size = fs::metadata(&self.paths.current)?.len();
        let report = ExportReport {
            path: self.paths.current.clone(),
            rows_exported: tables.iter().map(|t| t.rows).sum(),
            tables,
            size,
        };
        info!(
            path = %report.path.display(),
            rows = report.rows_exported,
            size = report.size,
            "Snapshot installed"
        );
        Ok(report)
    }

    /// Write the temporary file. Does not install it.
    async fn build(&self, catalog: &Catalog) -> Result<Vec<TableCount>> {
        let temp = self.paths.temp.clone();
        let schema = catalog.clone();
        let embedded_columns = embedded::blocking(move || {
            let store = EmbeddedStore::open(&temp)?;
            store.initialize_schema(&schema)?;
            let mut columns = Vec::with_capacity(schema.entities.len());
            for entity in &schema.entities {
                columns.push((entity.embedded_table.clone(), store.table_columns(&entity.embedded_table)?));
            }
            store.close()?;
            Ok(columns)
        })
        .await?;

        let candidates: Vec<&str> = catalog.relational_tables().collect();
        let present = self.store.existing_tables(&candidates).await?;

        // Parents are written before the tables that reference them
        let mut plans = Vec::new();
        for entity in resolve_order(&catalog.entities)? {
            let table = &entity.relational_table;
            if !present.contains(table) {
                continue;
            }
            let target_columns = embedded_columns
                .iter()
                .find(|(t, _)| *t == entity.embedded_table)
                .map(|(_, c)| c.as_slice())
                .unwrap_or_default();
            let plan = self.plan_table(entity, target_columns).await?;
            if plan.relational_columns.is_empty() {
                warn!(table = %table, "No matching columns, skipping table");
                continue;
            }
            plans.push(plan);
        }

        let (tx, rx) = mpsc::channel(WRITE_QUEUE_DEPTH);
        let temp = self.paths.temp.clone();
        let writer = tokio::task::spawn_blocking(move || write_snapshot(&temp, rx));

        let streamed = self.stream_tables(&plans, &tx).await;
        if streamed.is_ok() {
            // A closed channel means the writer already failed; its error is reported below
            let _ = tx.send(WriterMsg::Finish).await;
        }
        drop(tx);

        let written = writer
            .await
            .map_err(|e| Error::Store(format!("snapshot writer failed: {}", e)))?;
        written?;
        streamed
    }

    /// Relational columns minus audit columns, restricted to the column map
    /// and to the columns the embedded table actually has.
    async fn plan_table<'c>(&self, entity: &'c EntityDescriptor, target_columns: &[String]) -> Result<TablePlan<'c>> {
        let mut plan = TablePlan {
            entity,
            relational_columns: Vec::new(),
            embedded_columns: Vec::new(),
        };

        for column in self.store.table_columns(&entity.relational_table).await? {
            if self.catalogs.is_excluded_column(&column) {
                continue;
            }
            let Some(embedded) = entity.embedded_column(&column) else {
                continue;
            };
            if !target_columns.iter().any(|c| c == embedded) {
                continue;
            }
            plan.embedded_columns.push(embedded.to_string());
            plan.relational_columns.push(column);
        }
        Ok(plan)
    }

    async fn stream_tables(&self, plans: &[TablePlan<'_>], tx: &mpsc::Sender<WriterMsg>) -> Result<Vec<TableCount>> {
        let mut counts = Vec::with_capacity(plans.len());

        for plan in plans {
            let table = &plan.entity.relational_table;
            let mut batches = self
                .store
                .select_batches(table, &plan.relational_columns, self.batch_size);
            let mut rows_written = 0u64;

            while let Some(batch) = batches.try_next().await? {
                rows_written += batch.len() as u64;
                let rows: Vec<Vec<Value>> = batch
                    .into_iter()
                    .map(|row| row.into_values().into_iter().map(adapter::to_embedded).collect())
                    .collect();
                let msg = WriterMsg::Batch {
                    table: plan.entity.embedded_table.clone(),
                    columns: plan.embedded_columns.clone(),
                    rows,
                };
                if tx.send(msg).await.is_err() {
                    return Err(Error::Store("snapshot writer stopped".to_string()));
                }
            }

            debug!(table = %table, rows = rows_written, "Exported table");
            counts.push(TableCount {
                catalog: self.catalogs.export_catalog.clone(),
                table: table.clone(),
                rows: rows_written,
            });
        }
        Ok(counts)
    }
}

/// Writer loop run on the blocking pool. Compacts only when told to finish.
fn write_snapshot(path: &Path, mut rx: mpsc::Receiver<WriterMsg>) -> Result<()> {
    let mut store = EmbeddedStore::open(path)?;
    // Rows are copied as they are; references are not checked
    store.execute_batch("PRAGMA foreign_keys = OFF;")?;

    while let Some(msg) = rx.blocking_recv() {
        match msg {
            WriterMsg::Batch { table, columns, rows } => {
                let columns: Vec<&str> = columns.iter().map(String::as_str).collect();
                store.insert_or_replace(&table, &columns, &rows)?;
            }
            WriterMsg::Finish => {
                store.compact()?;
                break;
            }
        }
    }

    store.close()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::relational::MemoryStore;
    use crate::value::Row;
    use chrono::{TimeZone, Utc};

    fn seeded_store() -> MemoryStore {
        let store = MemoryStore::builtin_schema();
        store
            .insert(
                "podcast_channel_categories",
                Row::new().with("id", 1i64).with("name", "Tech"),
            )
            .unwrap();
        store
            .insert(
                "podcast_channels",
                Row::new()
                    .with("id", 7i64)
                    .with("title", "Talk Kotlin")
                    .with("link", "https://example.com")
                    .with("description", "desc")
                    .with("language", "en")
                    .with("author", "JetBrains")
                    .with("owner_email", "owner@example.com")
                    .with("owner_name", "Owner")
                    .with("image_url", "https://example.com/i.png")
                    .with("last_build_date", Utc.timestamp_millis_opt(1_700_000_000_123).unwrap()),
            )
            .unwrap();
        store
    }

    #[test]
    fn test_snapshot_paths_layout() {
        let paths = SnapshotPaths::new(Path::new("/srv/storage"), Path::new("/srv/backup"), "data.db");
        assert_eq!(paths.current, PathBuf::from("/srv/storage/data.db"));
        assert_eq!(paths.backup, PathBuf::from("/srv/backup/data.db"));
        assert_eq!(paths.temp, PathBuf::from("/srv/storage/data.db.tmp"));
        assert_eq!(paths.file_name(), "data.db");
    }

    #[tokio::test]
    async fn test_export_writes_converted_rows() {
        let dir = tempfile::tempdir().unwrap();
        let paths = SnapshotPaths::new(&dir.path().join("storage"), &dir.path().join("backup"), "snap.db");
        let catalogs = CatalogSet::builtin();
        let store = seeded_store();

        let report = ExportEngine::new(&catalogs, &store, &paths).export().await.unwrap();

        assert_eq!(report.rows_for("podcast_channels"), Some(1));
        assert_eq!(report.rows_for("podcast_episodes"), Some(0));
        assert!(!paths.temp.exists());

        let snapshot = EmbeddedStore::open_read_only(&paths.current).unwrap();
        let rows = snapshot.read_rows("PodcastChannels").unwrap();
        assert_eq!(rows[0].get("lastBuildDate"), Some(&Value::Integer(1_700_000_000_123)));
        assert_eq!(rows[0].get("ownerEmail"), Some(&Value::from("owner@example.com")));
        // Every table exists even without data
        assert!(snapshot.table_exists("EpisodeCategoryMap").unwrap());
    }

    #[tokio::test]
    async fn test_second_export_rotates_backup() {
        let dir = tempfile::tempdir().unwrap();
        let paths = SnapshotPaths::new(&dir.path().join("storage"), &dir.path().join("backup"), "snap.db");
        let catalogs = CatalogSet::builtin();
        let store = seeded_store();

        ExportEngine::new(&catalogs, &store, &paths).export().await.unwrap();
        assert!(!paths.backup.exists());

        store
            .insert("podcast_channel_categories", Row::new().with("id", 2i64).with("name", "News"))
            .unwrap();
        ExportEngine::new(&catalogs, &store, &paths).export().await.unwrap();

        let backup = EmbeddedStore::open_read_only(&paths.backup).unwrap();
        let current = EmbeddedStore::open_read_only(&paths.current).unwrap();
        assert_eq!(backup.count_rows("PodcastChannelCategories").unwrap(), 1);
        assert_eq!(current.count_rows("PodcastChannelCategories").unwrap(), 2);
    }

    #[tokio::test]
    async fn test_failed_read_keeps_current_and_removes_temp() {
        let dir = tempfile::tempdir().unwrap();
        let paths = SnapshotPaths::new(&dir.path().join("storage"), &dir.path().join("backup"), "snap.db");
        let catalogs = CatalogSet::builtin();
        let store = seeded_store();

        ExportEngine::new(&catalogs, &store, &paths).export().await.unwrap();
        let before = fs::read(&paths.current).unwrap();

        store.fail_reads_of("podcast_channels");
        let result = ExportEngine::new(&catalogs, &store, &paths).export().await;

        assert!(matches!(result, Err(Error::Store(_))));
        assert!(!paths.temp.exists());
        assert!(!paths.backup.exists());
        assert_eq!(fs::read(&paths.current).unwrap(), before);
    }

    #[tokio::test]
    async fn test_stale_temp_is_replaced() {
        let dir = tempfile::tempdir().unwrap();
        let paths = SnapshotPaths::new(&dir.path().join("storage"), &dir.path().join("backup"), "snap.db");
        fs::create_dir_all(dir.path().join("storage")).unwrap();
        fs::write(&paths.temp, b"half-written garbage").unwrap();

        let catalogs = CatalogSet::builtin();
        let store = seeded_store();
        ExportEngine::new(&catalogs, &store, &paths).export().await.unwrap();

        assert!(!paths.temp.exists());
        let snapshot = EmbeddedStore::open_read_only(&paths.current).unwrap();
        assert_eq!(snapshot.count_rows("PodcastChannels").unwrap(), 1);
    }

    #[tokio::test]
    async fn test_missing_relational_table_is_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let paths = SnapshotPaths::new(&dir.path().join("storage"), &dir.path().join("backup"), "snap.db");
        let catalogs = CatalogSet::builtin();
        let store = seeded_store();
        store.drop_table("episode_category_map");

        let report = ExportEngine::new(&catalogs, &store, &paths).export().await.unwrap();
        assert_eq!(report.rows_for("episode_category_map"), None);
    }

    #[test]
    fn test_shared_directory_keeps_a_distinct_backup() {
        let paths = SnapshotPaths::new(Path::new("/srv/data"), Path::new("/srv/data"), "data.db");
        assert_eq!(paths.current, PathBuf::from("/srv/data/data.db"));
        assert_eq!(paths.backup, PathBuf::from("/srv/data/data.db.bak"));
        assert_ne!(paths.backup, paths.temp);
    }

    #[tokio::test]
    async fn test_shared_directory_rotation_keeps_backup() {
        let dir = tempfile::tempdir().unwrap();
        let paths = SnapshotPaths::new(dir.path(), dir.path(), "snap.db");
        let catalogs = CatalogSet::builtin();
        let store = seeded_store();

        ExportEngine::new(&catalogs, &store, &paths).export().await.unwrap();
        ExportEngine::new(&catalogs, &store, &paths).export().await.unwrap();

        assert!(paths.current.is_file());
        assert!(paths.backup.is_file());
    }

    #[tokio::test]
    async fn test_child_first_catalog_exports_parents_first() {
        let dir = tempfile::tempdir().unwrap();
        let paths = SnapshotPaths::new(&dir.path().join("storage"), &dir.path().join("backup"), "snap.db");
        let mut catalogs = CatalogSet::builtin();
        catalogs.catalogs[0].entities.reverse();
        catalogs.validate().unwrap();

        let store = seeded_store();
        store
            .insert(
                "channel_category_map",
                Row::new().with("channel_id", 7i64).with("category_id", 1i64),
            )
            .unwrap();

        let report = ExportEngine::new(&catalogs, &store, &paths).export().await.unwrap();
        assert_eq!(report.rows_for("channel_category_map"), Some(1));

        let order: Vec<&str> = report.tables.iter().map(|t| t.table.as_str()).collect();
        let position = |table: &str| order.iter().position(|t| *t == table).unwrap();
        assert!(position("podcast_channels") < position("channel_category_map"));
        assert!(position("podcast_channel_categories") < position("channel_category_map"));
    }

    #[tokio::test]
    async fn test_dangling_reference_is_copied_as_is() {
        let dir = tempfile::tempdir().unwrap();
        let paths = SnapshotPaths::new(&dir.path().join("storage"), &dir.path().join("backup"), "snap.db");
        let catalogs = CatalogSet::builtin();
        let store = seeded_store();
        // Category 99 lives in a relational table the snapshot does not carry
        store
            .insert(
                "channel_category_map",
                Row::new().with("channel_id", 7i64).with("category_id", 99i64),
            )
            .unwrap();

        ExportEngine::new(&catalogs, &store, &paths).export().await.unwrap();

        let snapshot = EmbeddedStore::open_read_only(&paths.current).unwrap();
        let rows = snapshot.read_rows("ChannelCategoryMap").unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].get("categoryId"), Some(&Value::Integer(99)));
    }

    #[tokio::test]
    async fn test_failed_write_keeps_current_and_removes_temp() {
        let dir = tempfile::tempdir().unwrap();
        let paths = SnapshotPaths::new(&dir.path().join("storage"), &dir.path().join("backup"), "snap.db");
        let catalogs = CatalogSet::builtin();
        let store = seeded_store();

        ExportEngine::new(&catalogs, &store, &paths).export().await.unwrap();
        let before = fs::read(&paths.current).unwrap();

        // The snapshot declares `name` NOT NULL; the relational side allows it
        store
            .insert("podcast_channel_categories", Row::new().with("id", 2i64).with("name", Value::Null))
            .unwrap();
        let result = ExportEngine::new(&catalogs, &store, &paths).export().await;

        assert!(matches!(result, Err(Error::Embedded(_))));
        assert!(!paths.temp.exists());
        assert!(!paths.backup.exists());
        assert_eq!(fs::read(&paths.current).unwrap(), before);
    }

    #[test]
    fn test_install_without_temp_is_not_ready() {
        let dir = tempfile::tempdir().unwrap();
        let paths = SnapshotPaths::new(dir.path(), dir.path(), "snap.db");
        assert!(matches!(paths.install(), Err(Error::FileNotReady(_))));
    }
}
