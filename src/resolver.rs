//! Dependency Resolver
//!
//! Orders entities so that each one comes after everything it depends on.
//!
//! Resolution order:
//! 1. Entities without dependencies, in catalog order
//! 2. Repeated passes over the rest, emitting every entity whose dependencies
//!    have all been emitted
//! 3. A pass that emits nothing while entities remain is a cyclic or
//!    unsatisfiable graph

use std::collections::HashSet;

use crate::catalog::EntityDescriptor;
use crate::{Error, Result};

/// Produce a dependency-respecting order over `entities`.
///
/// Dependencies are matched by embedded table name against the given slice
/// only: an entity depending on something outside the slice can never be
/// emitted and is reported as unsatisfiable.
pub fn resolve_order(entities: &[EntityDescriptor]) -> Result<Vec<&EntityDescriptor>> {
    let mut ordered: Vec<&EntityDescriptor> = Vec::with_capacity(entities.len());
    let mut emitted: HashSet<&str> = HashSet::new();

    let (independent, mut remaining): (Vec<_>, Vec<_>) =
        entities.iter().partition(|e| !e.has_dependencies());

    for entity in independent {
        emitted.insert(entity.embedded_table.as_str());
        ordered.push(entity);
    }

    while !remaining.is_empty() {
        let before = remaining.len();

        // Entities emitted earlier in the same pass count as satisfied
        let mut still_waiting = Vec::with_capacity(remaining.len());
        for entity in remaining {
            if entity.depends_on.iter().all(|dep| emitted.contains(dep.as_str())) {
                emitted.insert(entity.embedded_table.as_str());
                ordered.push(entity);
            } else {
                still_waiting.push(entity);
            }
        }
        remaining = still_waiting;

        if remaining.len() == before {
            let stuck: Vec<String> = remaining
                .iter()
                .map(|e| {
                    let missing: Vec<&str> = e
                        .depends_on
                        .iter()
                        .map(String::as_str)
                        .filter(|dep| !emitted.contains(dep))
                        .collect();
                    format!("{} (waiting on {})", e.embedded_table, missing.join(", "))
                })
                .collect();
            return Err(Error::Configuration(format!(
                "cyclic or unsatisfiable dependencies: {}",
                stuck.join("; ")
            )));
        }
    }

    Ok(ordered)
}
