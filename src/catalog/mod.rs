//! Schema Catalog - static correspondence between embedded and relational tables
//!
//! A [`Catalog`] groups the entities of one logical domain (one embedded file).
//! A [`CatalogSet`] holds every catalog plus the few global lists that drive
//! value conversion and export. The set is built once at startup, validated,
//! and shared read-only by both engines.

pub mod builtin;

use std::collections::HashSet;

use crate::{Error, Result};

/// Describes how one embedded table maps onto one relational table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntityDescriptor {
    /// Table name in the embedded (SQLite) store
    pub embedded_table: String,
    /// Table name in the relational store
    pub relational_table: String,
    /// Single-column identity, if the table has one (join tables don't)
    pub identity_column: Option<String>,
    /// Embedded column → relational column. `None` marks a derived column
    /// that is never synchronized.
    pub column_map: Vec<(String, Option<String>)>,
    /// Embedded tables that must be written before this one
    pub depends_on: Vec<String>,
    /// `CREATE TABLE IF NOT EXISTS` statement for the embedded side
    pub embedded_ddl: Option<String>,
}

impl EntityDescriptor {
    pub fn new(embedded_table: impl Into<String>, relational_table: impl Into<String>) -> Self {
        Self {
            embedded_table: embedded_table.into(),
            relational_table: relational_table.into(),
            identity_column: None,
            column_map: Vec::new(),
            depends_on: Vec::new(),
            embedded_ddl: None,
        }
    }

    pub fn identity(mut self, column: impl Into<String>) -> Self {
        self.identity_column = Some(column.into());
        self
    }

    /// Map an embedded column onto a relational column
    pub fn column(mut self, embedded: impl Into<String>, relational: impl Into<String>) -> Self {
        self.column_map.push((embedded.into(), Some(relational.into())));
        self
    }

    /// Declare an embedded-only column that is excluded from synchronization
    pub fn derived(mut self, embedded: impl Into<String>) -> Self {
        self.column_map.push((embedded.into(), None));
        self
    }

    pub fn depends_on<I, S>(mut self, tables: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.depends_on.extend(tables.into_iter().map(Into::into));
        self
    }

    pub fn ddl(mut self, sql: impl Into<String>) -> Self {
        self.embedded_ddl = Some(sql.into());
        self
    }

    pub fn has_dependencies(&self) -> bool {
        !self.depends_on.is_empty()
    }

    /// Relational column for an embedded column, `None` if unmapped or derived
    pub fn relational_column(&self, embedded: &str) -> Option<&str> {
        self.column_map
            .iter()
            .find(|(e, _)| e == embedded)
            .and_then(|(_, r)| r.as_deref())
    }

    /// Embedded column for a relational column, `None` if the column is not mapped
    pub fn embedded_column(&self, relational: &str) -> Option<&str> {
        self.column_map
            .iter()
            .find(|(_, r)| r.as_deref() == Some(relational))
            .map(|(e, _)| e.as_str())
    }

    /// Synchronized column pairs `(embedded, relational)` in catalog order
    pub fn synced_columns(&self) -> impl Iterator<Item = (&str, &str)> {
        self.column_map
            .iter()
            .filter_map(|(e, r)| r.as_deref().map(|r| (e.as_str(), r)))
    }
}

/// The entities of one logical domain, in catalog (insertion) order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Catalog {
    pub name: String,
    pub entities: Vec<EntityDescriptor>,
}

impl Catalog {
    pub fn new(name: impl Into<String>, entities: Vec<EntityDescriptor>) -> Self {
        Self {
            name: name.into(),
            entities,
        }
    }

    pub fn entity(&self, embedded_table: &str) -> Option<&EntityDescriptor> {
        self.entities
            .iter()
            .find(|e| e.embedded_table == embedded_table)
    }

    pub fn entity_by_relational(&self, relational_table: &str) -> Option<&EntityDescriptor> {
        self.entities
            .iter()
            .find(|e| e.relational_table == relational_table)
    }

    pub fn relational_tables(&self) -> impl Iterator<Item = &str> {
        self.entities.iter().map(|e| e.relational_table.as_str())
    }

    /// Check that table names are unique, dependencies stay inside the catalog,
    /// and the dependency graph is acyclic.
    pub fn validate(&self) -> Result<()> {
        let mut embedded = HashSet::new();
        let mut relational = HashSet::new();
        for entity in &self.entities {
            if !embedded.insert(entity.embedded_table.as_str()) {
                return Err(Error::Configuration(format!(
                    "catalog '{}' declares embedded table '{}' twice",
                    self.name, entity.embedded_table
                )));
            }
            if !relational.insert(entity.relational_table.as_str()) {
                return Err(Error::Configuration(format!(
                    "catalog '{}' declares relational table '{}' twice",
                    self.name, entity.relational_table
                )));
            }
        }

        for entity in &self.entities {
            for dep in &entity.depends_on {
                if !embedded.contains(dep.as_str()) {
                    return Err(Error::Configuration(format!(
                        "'{}' in catalog '{}' depends on unknown entity '{}'",
                        entity.embedded_table, self.name, dep
                    )));
                }
            }
            if let Some(identity) = &entity.identity_column {
                if entity.relational_column(identity).is_none() {
                    return Err(Error::Configuration(format!(
                        "identity column '{}' of '{}' is not synchronized",
                        identity, entity.embedded_table
                    )));
                }
            }
        }

        crate::resolver::resolve_order(&self.entities).map(|_| ())
    }
}

/// Every catalog known to the process, plus the conversion lists.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CatalogSet {
    pub catalogs: Vec<Catalog>,
    /// Name of the catalog materialized into the distributed snapshot
    pub export_catalog: String,
    /// Relational columns treated as timestamps when the store reports no type
    pub timestamp_columns: Vec<String>,
    /// Server-only audit columns never written into a snapshot
    pub excluded_columns: Vec<String>,
}

impl CatalogSet {
    /// The podcast and session catalogs, exporting the podcast domain.
    pub fn builtin() -> Self {
        Self {
            catalogs: vec![builtin::podcast_catalog(), builtin::session_catalog()],
            export_catalog: builtin::PODCAST.to_string(),
            timestamp_columns: builtin::TIMESTAMP_COLUMNS
                .iter()
                .map(|c| c.to_string())
                .collect(),
            excluded_columns: builtin::EXCLUDED_COLUMNS
                .iter()
                .map(|c| c.to_string())
                .collect(),
        }
    }

    pub fn catalog(&self, name: &str) -> Option<&Catalog> {
        self.catalogs.iter().find(|c| c.name == name)
    }

    pub fn export_catalog(&self) -> Result<&Catalog> {
        self.catalog(&self.export_catalog).ok_or_else(|| {
            Error::Configuration(format!("export catalog '{}' is not defined", self.export_catalog))
        })
    }

    /// Relational tables across all catalogs, in catalog order
    pub fn all_relational_tables(&self) -> Vec<&str> {
        self.catalogs
            .iter()
            .flat_map(|c| c.relational_tables())
            .collect()
    }

    pub fn is_timestamp_column(&self, relational_column: &str) -> bool {
        self.timestamp_columns.iter().any(|c| c == relational_column)
    }

    pub fn is_excluded_column(&self, relational_column: &str) -> bool {
        self.excluded_columns.iter().any(|c| c == relational_column)
    }

    pub fn validate(&self) -> Result<()> {
        for catalog in &self.catalogs {
            catalog.validate()?;
        }

        let export = self.export_catalog()?;
        if let Some(entity) = export.entities.iter().find(|e| e.embedded_ddl.is_none()) {
            return Err(Error::Configuration(format!(
                "export catalog '{}' has no embedded schema for '{}'",
                export.name, entity.embedded_table
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_catalogs_validate() {
        let set = CatalogSet::builtin();
        set.validate().unwrap();
        assert_eq!(set.catalogs.len(), 2);
        assert_eq!(set.export_catalog().unwrap().name, "podcast");
    }

    #[test]
    fn test_derived_column_is_not_synced() {
        let set = CatalogSet::builtin();
        let sessions = set.catalog("session").unwrap().entity("SessionTable").unwrap();

        assert_eq!(sessions.relational_column("isPending"), None);
        assert_eq!(sessions.relational_column("roomId"), Some("room_id"));
        assert!(sessions.synced_columns().all(|(e, _)| e != "isPending"));
    }

    #[test]
    fn test_reverse_column_lookup() {
        let set = CatalogSet::builtin();
        let channels = set.catalog("podcast").unwrap().entity("PodcastChannels").unwrap();
        assert_eq!(channels.embedded_column("owner_email"), Some("ownerEmail"));
        assert_eq!(channels.embedded_column("created_at"), None);
    }

    #[test]
    fn test_unknown_dependency_rejected() {
        let catalog = Catalog::new(
            "broken",
            vec![EntityDescriptor::new("Items", "items").depends_on(["Missing"])],
        );
        assert!(matches!(catalog.validate(), Err(Error::Configuration(_))));
    }

    #[test]
    fn test_cycle_rejected() {
        let catalog = Catalog::new(
            "cyclic",
            vec![
                EntityDescriptor::new("A", "a").depends_on(["B"]),
                EntityDescriptor::new("B", "b").depends_on(["A"]),
            ],
        );
        assert!(matches!(catalog.validate(), Err(Error::Configuration(_))));
    }

    #[test]
    fn test_export_catalog_requires_ddl() {
        let mut set = CatalogSet::builtin();
        set.export_catalog = "session".to_string();
        assert!(matches!(set.validate(), Err(Error::Configuration(_))));
    }

    #[test]
    fn test_audit_columns_excluded() {
        let set = CatalogSet::builtin();
        assert!(set.is_excluded_column("created_at"));
        assert!(set.is_excluded_column("updated_at"));
        assert!(!set.is_excluded_column("pub_date"));
        assert!(set.is_timestamp_column("pub_date"));
    }
}
