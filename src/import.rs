//! Import Engine - embedded files into the relational store
//!
//! Each source file belongs to one catalog. Entities whose table exists in the
//! file are ordered by the resolver, read, mapped through the column map,
//! converted by the type adapter and inserted with conflict-skip semantics.
//! Nothing is ever updated or deleted on the relational side.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::adapter::{self, ColumnKind};
use crate::catalog::{Catalog, CatalogSet, EntityDescriptor};
use crate::embedded::{self, EmbeddedStore};
use crate::relational::RelationalStore;
use crate::resolver::resolve_order;
use crate::value::{Row, Value};
use crate::{Error, Result};

/// An embedded file and the catalog that describes it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceFile {
    pub path: PathBuf,
    pub catalog: String,
}

impl SourceFile {
    pub fn new(path: impl Into<PathBuf>, catalog: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            catalog: catalog.into(),
        }
    }
}

/// Rows written to one relational table
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TableCount {
    pub catalog: String,
    pub table: String,
    pub rows: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ImportReport {
    /// Source files that were present and imported
    pub sources: Vec<PathBuf>,
    pub tables: Vec<TableCount>,
    /// Rows actually inserted; conflicting rows are not counted
    pub rows_imported: u64,
    pub dry_run: bool,
}

impl ImportReport {
    pub fn rows_for(&self, table: &str) -> Option<u64> {
        self.tables.iter().find(|t| t.table == table).map(|t| t.rows)
    }
}

pub struct ImportEngine<'a, S: RelationalStore + ?Sized> {
    catalogs: &'a CatalogSet,
    store: &'a S,
    dry_run: bool,
}

impl<'a, S: RelationalStore + ?Sized> ImportEngine<'a, S> {
    pub fn new(catalogs: &'a CatalogSet, store: &'a S) -> Self {
        Self {
            catalogs,
            store,
            dry_run: false,
        }
    }

    /// Map and convert every row but write nothing
    pub fn dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    /// Import every present source file. Missing files are skipped, but at
    /// least one must exist.
    pub async fn import(&self, sources: &[SourceFile]) -> Result<ImportReport> {
        let present: Vec<&SourceFile> = sources.iter().filter(|s| s.path.is_file()).collect();
        if present.is_empty() {
            return Err(Error::SourceUnavailable(
                sources.iter().map(|s| s.path.clone()).collect(),
            ));
        }

        let mut report = ImportReport {
            dry_run: self.dry_run,
            ..Default::default()
        };

        for source in sources.iter().filter(|s| !s.path.is_file()) {
            warn!(path = %source.path.display(), "Source file not found, skipping");
        }

        for source in present {
            let catalog = self.catalogs.catalog(&source.catalog).ok_or_else(|| {
                Error::Configuration(format!("unknown catalog '{}'", source.catalog))
            })?;
            info!(path = %source.path.display(), catalog = %catalog.name, "Importing source file");

            self.import_file(&source.path, catalog, &mut report).await?;
            report.sources.push(source.path.clone());
        }

        info!(
            rows = report.rows_imported,
            dry_run = report.dry_run,
            "Import finished"
        );
        Ok(report)
    }

    async fn import_file(&self, path: &Path, catalog: &Catalog, report: &mut ImportReport) -> Result<()> {
        let tables: Vec<String> = catalog.entities.iter().map(|e| e.embedded_table.clone()).collect();
        let owned_path = path.to_path_buf();
        let present: Vec<String> = embedded::blocking(move || {
            let store = EmbeddedStore::open_read_only(&owned_path)?;
            let mut present = Vec::new();
            for table in tables {
                if store.table_exists(&table)? {
                    present.push(table);
                }
            }
            Ok(present)
        })
        .await?;

        let entities: Vec<EntityDescriptor> = catalog
            .entities
            .iter()
            .filter(|e| present.contains(&e.embedded_table))
            .cloned()
            .collect();
        let ordered = resolve_order(&entities)?;
        debug!(
            order = ?ordered.iter().map(|e| e.embedded_table.as_str()).collect::<Vec<_>>(),
            "Resolved import order"
        );

        for entity in ordered {
            let rows = self.import_entity(path, entity).await?;
            report.rows_imported += rows;
            report.tables.push(TableCount {
                catalog: catalog.name.clone(),
                table: entity.relational_table.clone(),
                rows,
            });
        }
        Ok(())
    }

    async fn import_entity(&self, path: &Path, entity: &EntityDescriptor) -> Result<u64> {
        let table = entity.embedded_table.clone();
        let owned_path = path.to_path_buf();
        let (source_columns, rows) = embedded::blocking(move || {
            let store = EmbeddedStore::open_read_only(&owned_path)?;
            let columns = store.table_columns(&table)?;
            let rows = store.read_rows(&table)?;
            Ok((columns, rows))
        })
        .await?;

        let types = self.store.column_types(&entity.relational_table).await?;
        let plan = ColumnPlan::new(self.catalogs, entity, &source_columns, &types);
        if plan.is_empty() {
            warn!(table = %entity.embedded_table, "No synchronized columns, skipping");
            return Ok(0);
        }

        let converted = rows
            .into_iter()
            .map(|row| plan.convert(row))
            .collect::<Result<Vec<_>>>()?;
        let read = converted.len() as u64;

        if self.dry_run {
            info!(table = %entity.relational_table, rows = read, "Dry run: rows mapped");
            return Ok(read);
        }
        if converted.is_empty() {
            debug!(table = %entity.relational_table, "Source table is empty");
            return Ok(0);
        }

        let inserted = self
            .store
            .insert_skip_conflicts(&entity.relational_table, &plan.relational_columns, converted)
            .await?;
        info!(
            table = %entity.relational_table,
            read,
            inserted,
            skipped = read - inserted.min(read),
            "Imported entity"
        );
        Ok(inserted)
    }
}

/// Which embedded columns are written, where they go and how they convert
struct ColumnPlan {
    embedded_columns: Vec<String>,
    relational_columns: Vec<String>,
    kinds: Vec<ColumnKind>,
}

impl ColumnPlan {
    fn new(
        catalogs: &CatalogSet,
        entity: &EntityDescriptor,
        source_columns: &[String],
        types: &HashMap<String, String>,
    ) -> Self {
        let mut plan = ColumnPlan {
            embedded_columns: Vec::new(),
            relational_columns: Vec::new(),
            kinds: Vec::new(),
        };

        for column in source_columns {
            let Some(relational) = entity.relational_column(column) else {
                debug!(table = %entity.embedded_table, column = %column, "Column not synchronized");
                continue;
            };
            if !types.is_empty() && !types.contains_key(relational) {
                warn!(
                    table = %entity.relational_table,
                    column = %relational,
                    "Relational table has no such column, dropping"
                );
                continue;
            }
            let kind = ColumnKind::classify(catalogs, relational, types.get(relational).map(String::as_str));
            plan.embedded_columns.push(column.clone());
            plan.relational_columns.push(relational.to_string());
            plan.kinds.push(kind);
        }
        plan
    }

    fn is_empty(&self) -> bool {
        self.relational_columns.is_empty()
    }

    fn convert(&self, row: Row) -> Result<Vec<Value>> {
        self.embedded_columns
            .iter()
            .zip(&self.relational_columns)
            .zip(&self.kinds)
            .map(|((embedded, relational), kind)| {
                let value = row.get(embedded).cloned().unwrap_or(Value::Null);
                adapter::to_relational(value, *kind, relational)
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::builtin;
    use crate::relational::MemoryStore;

    fn podcast_source(dir: &Path) -> PathBuf {
        let path = dir.join("podcast.db");
        let store = EmbeddedStore::open(&path).unwrap();
        store
            .initialize_schema(CatalogSet::builtin().catalog(builtin::PODCAST).unwrap())
            .unwrap();
        store
            .execute_batch(
                r#"
                INSERT INTO PodcastChannelCategories (id, name) VALUES (1, 'Tech'), (2, 'News');
                INSERT INTO PodcastChannels
                    (id, title, link, description, language, author, ownerEmail, ownerName, imageUrl, lastBuildDate)
                    VALUES (10, 'Talk Kotlin', 'https://example.com', 'desc', 'en', 'JetBrains',
                            'owner@example.com', 'Owner', 'https://example.com/i.png', 1700000000123);
                INSERT INTO PodcastEpisodes
                    (id, channelId, guid, title, description, link, pubDate, duration, explicit,
                     mediaUrl, mediaType, mediaLength)
                    VALUES (100, 10, 'g-1', 'Ep 1', 'd', 'l', 1700000500000, 1800, 1,
                            'https://example.com/1.mp3', 'audio/mpeg', 123456);
                INSERT INTO ChannelCategoryMap (channelId, categoryId) VALUES (10, 1);
                "#,
            )
            .unwrap();
        store.close().unwrap();
        path
    }

    #[tokio::test]
    async fn test_import_converts_and_counts() {
        let dir = tempfile::tempdir().unwrap();
        let path = podcast_source(dir.path());
        let catalogs = CatalogSet::builtin();
        let store = MemoryStore::builtin_schema();

        let report = ImportEngine::new(&catalogs, &store)
            .import(&[SourceFile::new(&path, builtin::PODCAST)])
            .await
            .unwrap();

        assert_eq!(report.rows_imported, 5);
        assert_eq!(report.rows_for("podcast_episodes"), Some(1));

        let episodes = store.rows("podcast_episodes");
        assert_eq!(episodes[0].get("explicit"), Some(&Value::Bool(true)));
        assert!(matches!(episodes[0].get("pub_date"), Some(Value::Timestamp(_))));
    }

    #[tokio::test]
    async fn test_second_import_inserts_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let path = podcast_source(dir.path());
        let catalogs = CatalogSet::builtin();
        let store = MemoryStore::builtin_schema();
        let sources = [SourceFile::new(&path, builtin::PODCAST)];

        ImportEngine::new(&catalogs, &store).import(&sources).await.unwrap();
        let second = ImportEngine::new(&catalogs, &store).import(&sources).await.unwrap();

        assert_eq!(second.rows_imported, 0);
        assert_eq!(store.rows("podcast_channel_categories").len(), 2);
    }

    #[tokio::test]
    async fn test_dry_run_writes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let path = podcast_source(dir.path());
        let catalogs = CatalogSet::builtin();
        let store = MemoryStore::builtin_schema();

        let report = ImportEngine::new(&catalogs, &store)
            .dry_run(true)
            .import(&[SourceFile::new(&path, builtin::PODCAST)])
            .await
            .unwrap();

        assert!(report.dry_run);
        assert_eq!(report.rows_imported, 5);
        assert!(store.rows("podcast_channels").is_empty());
    }

    #[tokio::test]
    async fn test_no_sources_is_unavailable() {
        let dir = tempfile::tempdir().unwrap();
        let catalogs = CatalogSet::builtin();
        let store = MemoryStore::builtin_schema();

        let result = ImportEngine::new(&catalogs, &store)
            .import(&[
                SourceFile::new(dir.path().join("a.db"), builtin::PODCAST),
                SourceFile::new(dir.path().join("b.db"), builtin::SESSION),
            ])
            .await;

        match result {
            Err(Error::SourceUnavailable(paths)) => assert_eq!(paths.len(), 2),
            other => panic!("expected SourceUnavailable, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_one_missing_source_is_tolerated() {
        let dir = tempfile::tempdir().unwrap();
        let path = podcast_source(dir.path());
        let catalogs = CatalogSet::builtin();
        let store = MemoryStore::builtin_schema();

        let report = ImportEngine::new(&catalogs, &store)
            .import(&[
                SourceFile::new(&path, builtin::PODCAST),
                SourceFile::new(dir.path().join("sessions.db"), builtin::SESSION),
            ])
            .await
            .unwrap();

        assert_eq!(report.sources, vec![path]);
    }

    #[tokio::test]
    async fn test_malformed_timestamp_aborts_import() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.db");
        let source = EmbeddedStore::open(&path).unwrap();
        source
            .initialize_schema(CatalogSet::builtin().catalog(builtin::PODCAST).unwrap())
            .unwrap();
        source
            .execute_batch(
                "INSERT INTO PodcastChannels
                    (id, title, link, description, language, author, ownerEmail, ownerName, imageUrl, lastBuildDate)
                 VALUES (1, 't', 'l', 'd', 'en', 'a', 'e', 'n', 'i', 'last tuesday');",
            )
            .unwrap();
        source.close().unwrap();

        let catalogs = CatalogSet::builtin();
        let store = MemoryStore::builtin_schema();
        let result = ImportEngine::new(&catalogs, &store)
            .import(&[SourceFile::new(&path, builtin::PODCAST)])
            .await;

        assert!(matches!(result, Err(Error::Conversion { .. })));
        assert!(store.rows("podcast_channels").is_empty());
    }

    #[tokio::test]
    async fn test_dependency_missing_from_file_is_configuration_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("partial.db");
        let source = EmbeddedStore::open(&path).unwrap();
        source
            .execute_batch("CREATE TABLE PodcastEpisodes (id INTEGER PRIMARY KEY, channelId INTEGER);")
            .unwrap();
        source.close().unwrap();

        let catalogs = CatalogSet::builtin();
        let store = MemoryStore::builtin_schema();
        let result = ImportEngine::new(&catalogs, &store)
            .import(&[SourceFile::new(&path, builtin::PODCAST)])
            .await;

        assert!(matches!(result, Err(Error::Configuration(_))));
    }
}
