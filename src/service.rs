//! Sync Service - the entry points the host calls
//!
//! Every operation opens its own relational connection and closes it before
//! returning, whether the operation succeeded or not.

use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::catalog::CatalogSet;
use crate::export::{ExportEngine, ExportReport, SnapshotPaths, DEFAULT_BATCH_SIZE};
use crate::import::{ImportEngine, ImportReport, SourceFile};
use crate::relational::{Connector, RelationalStore};
use crate::Result;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ImportOptions {
    /// Import even when the relational tables already hold data
    pub force: bool,
    pub dry_run: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExportOutcome {
    Completed(ExportReport),
    /// Another export was still running
    Skipped,
}

/// Row count of one relational table, `None` when the table is missing
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableStatus {
    pub catalog: String,
    pub table: String,
    pub rows: Option<u64>,
}

pub struct SyncService<C: Connector> {
    connector: C,
    catalogs: Arc<CatalogSet>,
    paths: SnapshotPaths,
    sources: Vec<SourceFile>,
    batch_size: usize,
    export_guard: Mutex<()>,
}

impl<C: Connector> SyncService<C> {
    pub fn new(connector: C, catalogs: Arc<CatalogSet>, paths: SnapshotPaths, sources: Vec<SourceFile>) -> Self {
        Self {
            connector,
            catalogs,
            paths,
            sources,
            batch_size: DEFAULT_BATCH_SIZE,
            export_guard: Mutex::new(()),
        }
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    pub fn catalogs(&self) -> &CatalogSet {
        &self.catalogs
    }

    pub fn paths(&self) -> &SnapshotPaths {
        &self.paths
    }

    pub fn sources(&self) -> &[SourceFile] {
        &self.sources
    }

    /// True only when every relational table of every catalog has a row.
    pub async fn is_data_populated(&self) -> Result<bool> {
        let store = self.connector.connect().await?;
        let result = self.populated_on(&store).await;
        store.close().await;
        result
    }

    async fn populated_on(&self, store: &C::Store) -> Result<bool> {
        let tables = self.catalogs.all_relational_tables();
        let present = store.existing_tables(&tables).await?;
        if present.len() < tables.len() {
            return Ok(false);
        }
        for table in &present {
            if store.count_rows(table).await? == 0 {
                info!(table = %table, "Relational table is empty");
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// Import the source files unless the relational store is already
    /// populated. Returns `None` when the import was skipped.
    pub async fn run_import_if_needed(&self, options: ImportOptions) -> Result<Option<ImportReport>> {
        let store = self.connector.connect().await?;
        let result = self.import_on(&store, options).await;
        store.close().await;
        result
    }

    async fn import_on(&self, store: &C::Store, options: ImportOptions) -> Result<Option<ImportReport>> {
        if !options.force && self.populated_on(store).await? {
            info!("Relational store already populated, skipping import");
            return Ok(None);
        }

        let report = ImportEngine::new(&self.catalogs, store)
            .dry_run(options.dry_run)
            .import(&self.sources)
            .await?;
        Ok(Some(report))
    }

    /// Build and install a fresh snapshot. Overlapping calls are skipped, not queued.
    pub async fn run_export(&self) -> Result<ExportOutcome> {
        let Ok(_guard) = self.export_guard.try_lock() else {
            warn!("Export already in progress, skipping");
            return Ok(ExportOutcome::Skipped);
        };

        let store = self.connector.connect().await?;
        let result = ExportEngine::new(&self.catalogs, &store, &self.paths)
            .batch_size(self.batch_size)
            .export()
            .await;
        store.close().await;

        result.map(ExportOutcome::Completed)
    }

    /// Row counts for every relational table, used by `status`
    pub async fn table_status(&self) -> Result<Vec<TableStatus>> {
        let store = self.connector.connect().await?;
        let result = self.status_on(&store).await;
        store.close().await;
        result
    }

    async fn status_on(&self, store: &C::Store) -> Result<Vec<TableStatus>> {
        let mut status = Vec::new();
        for catalog in &self.catalogs.catalogs {
            let tables: Vec<&str> = catalog.relational_tables().collect();
            let present = store.existing_tables(&tables).await?;
            for table in tables {
                let rows = if present.iter().any(|p| p == table) {
                    Some(store.count_rows(table).await?)
                } else {
                    None
                };
                status.push(TableStatus {
                    catalog: catalog.name.clone(),
                    table: table.to_string(),
                    rows,
                });
            }
        }
        Ok(status)
    }
}
