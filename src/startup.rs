//! Startup sequence - wait for upstream, import once, export once
//!
//! Modeled as an explicit state machine. [`Startup::step`] performs exactly
//! one transition, so tests can drive it with fake probes and stores.
//!
//! ```text
//! Waiting ──probe ok──▶ Connecting ──▶ Importing ──▶ Exporting ──▶ Ready
//!    ▲                      │              │             │
//!    └──── retryable error ─┴──────────────┴─────────────┘
//! ```

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, info, warn};

use crate::relational::Connector;
use crate::service::{ExportOutcome, ImportOptions, SyncService};
use crate::{Error, Result};

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartupState {
    /// Upstream service not reachable yet
    Waiting,
    /// Checking whether the relational store already holds data
    Connecting,
    Importing,
    Exporting,
    Ready,
}

impl fmt::Display for StartupState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            StartupState::Waiting => "waiting",
            StartupState::Connecting => "connecting",
            StartupState::Importing => "importing",
            StartupState::Exporting => "exporting",
            StartupState::Ready => "ready",
        };
        f.write_str(name)
    }
}

/// Reports whether the upstream service is up
#[async_trait]
pub trait LivenessProbe: Send + Sync {
    async fn is_alive(&self) -> bool;
}

/// Probes `<url><health_path>` for each candidate URL; any 200 counts.
pub struct HttpProbe {
    client: reqwest::Client,
    urls: Vec<String>,
    health_path: String,
}

impl HttpProbe {
    pub fn new(urls: Vec<String>, health_path: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::Config(format!("cannot build HTTP client: {}", e)))?;
        Ok(Self {
            client,
            urls,
            health_path: health_path.into(),
        })
    }
}

#[async_trait]
impl LivenessProbe for HttpProbe {
    async fn is_alive(&self) -> bool {
        for url in &self.urls {
            let target = format!("{}{}", url.trim_end_matches('/'), self.health_path);
            debug!(url = %target, "Probing upstream");
            match self.client.get(&target).send().await {
                Ok(response) if response.status() == reqwest::StatusCode::OK => {
                    info!(url = %target, "Upstream is up");
                    return true;
                }
                Ok(response) => debug!(url = %target, status = %response.status(), "Upstream not ready"),
                Err(e) => debug!(url = %target, error = %e, "Upstream unreachable"),
            }
        }
        false
    }
}

pub struct Startup<'a, C: Connector, P: LivenessProbe + ?Sized> {
    service: &'a SyncService<C>,
    probe: &'a P,
    state: StartupState,
    poll_interval: Duration,
}

impl<'a, C: Connector, P: LivenessProbe + ?Sized> Startup<'a, C, P> {
    pub fn new(service: &'a SyncService<C>, probe: &'a P) -> Self {
        Self {
            service,
            probe,
            state: StartupState::Waiting,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }

    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn state(&self) -> StartupState {
        self.state
    }

    /// Perform one transition and return the new state.
    ///
    /// Retryable failures send the machine back to `Waiting`; anything else
    /// (a broken catalog, a conversion error) is returned.
    pub async fn step(&mut self) -> Result<StartupState> {
        let next = match self.state {
            StartupState::Waiting => {
                if self.probe.is_alive().await {
                    StartupState::Connecting
                } else {
                    StartupState::Waiting
                }
            }
            StartupState::Connecting => match self.service.is_data_populated().await {
                Ok(populated) => {
                    if populated {
                        info!("Relational store already populated, skipping import");
                        StartupState::Exporting
                    } else {
                        StartupState::Importing
                    }
                }
                Err(e) => self.recover(e)?,
            },
            StartupState::Importing => {
                let options = ImportOptions {
                    force: true,
                    dry_run: false,
                };
                match self.service.run_import_if_needed(options).await {
                    Ok(report) => {
                        if let Some(report) = report {
                            info!(rows = report.rows_imported, "Initial import finished");
                        }
                        StartupState::Exporting
                    }
                    Err(e) => self.recover(e)?,
                }
            }
            StartupState::Exporting => match self.service.run_export().await {
                Ok(ExportOutcome::Completed(report)) => {
                    info!(size = report.size, "Initial export finished");
                    StartupState::Ready
                }
                Ok(ExportOutcome::Skipped) => StartupState::Ready,
                Err(e) => self.recover(e)?,
            },
            StartupState::Ready => StartupState::Ready,
        };

        if next != self.state {
            debug!(from = %self.state, to = %next, "Startup transition");
        }
        self.state = next;
        Ok(next)
    }

    /// Step until `Ready`, sleeping between attempts while waiting.
    pub async fn run(&mut self) -> Result<()> {
        loop {
            match self.step().await? {
                StartupState::Ready => return Ok(()),
                StartupState::Waiting => {
                    info!(
                        retry_secs = self.poll_interval.as_secs(),
                        "Waiting for upstream"
                    );
                    tokio::time::sleep(self.poll_interval).await;
                }
                _ => {}
            }
        }
    }

    fn recover(&self, error: Error) -> Result<StartupState> {
        if error.is_retryable() {
            warn!(state = %self.state, error = %error, "Startup step failed, will retry");
            Ok(StartupState::Waiting)
        } else {
            Err(error)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{builtin, CatalogSet};
    use crate::embedded::EmbeddedStore;
    use crate::export::SnapshotPaths;
    use crate::import::SourceFile;
    use crate::relational::MemoryStore;
    use std::path::Path;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    /// Fails the first `failures` probes, then succeeds
    struct FlakyProbe {
        failures: AtomicUsize,
    }

    #[async_trait]
    impl LivenessProbe for FlakyProbe {
        async fn is_alive(&self) -> bool {
            self.failures
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_err()
        }
    }

    fn service(dir: &Path, store: MemoryStore) -> SyncService<MemoryStore> {
        let paths = SnapshotPaths::new(&dir.join("storage"), &dir.join("backup"), "snap.db");
        let sources = vec![SourceFile::new(dir.join("podcast.db"), builtin::PODCAST)];
        SyncService::new(store, Arc::new(CatalogSet::builtin()), paths, sources)
    }

    fn write_source(path: &Path) {
        let source = EmbeddedStore::open(path).unwrap();
        source
            .initialize_schema(CatalogSet::builtin().catalog(builtin::PODCAST).unwrap())
            .unwrap();
        source
            .execute_batch("INSERT INTO PodcastEpisodeCategories (id, name) VALUES (1, 'Comedy');")
            .unwrap();
        source.close().unwrap();
    }

    #[tokio::test]
    async fn test_full_sequence() {
        let dir = tempfile::tempdir().unwrap();
        write_source(&dir.path().join("podcast.db"));
        let store = MemoryStore::builtin_schema();
        let svc = service(dir.path(), store.clone());
        let probe = FlakyProbe {
            failures: AtomicUsize::new(2),
        };

        let mut startup = Startup::new(&svc, &probe);
        let mut states = Vec::new();
        while startup.state() != StartupState::Ready {
            states.push(startup.step().await.unwrap());
        }

        assert_eq!(
            states,
            vec![
                StartupState::Waiting,
                StartupState::Waiting,
                StartupState::Connecting,
                StartupState::Importing,
                StartupState::Exporting,
                StartupState::Ready,
            ]
        );
        assert_eq!(store.rows("podcast_episode_categories").len(), 1);
        assert!(svc.paths().current.exists());
    }

    #[tokio::test]
    async fn test_missing_sources_return_to_waiting() {
        let dir = tempfile::tempdir().unwrap();
        let svc = service(dir.path(), MemoryStore::builtin_schema());
        let probe = FlakyProbe {
            failures: AtomicUsize::new(0),
        };

        let mut startup = Startup::new(&svc, &probe);
        assert_eq!(startup.step().await.unwrap(), StartupState::Connecting);
        assert_eq!(startup.step().await.unwrap(), StartupState::Importing);
        assert_eq!(startup.step().await.unwrap(), StartupState::Waiting);
    }

    #[tokio::test]
    async fn test_conversion_error_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let source = EmbeddedStore::open(&dir.path().join("podcast.db")).unwrap();
        source
            .execute_batch(
                "CREATE TABLE PodcastEpisodes (id INTEGER PRIMARY KEY, pubDate TEXT);
                 INSERT INTO PodcastEpisodes VALUES (1, 'yesterday');
                 CREATE TABLE PodcastChannels (id INTEGER PRIMARY KEY);",
            )
            .unwrap();
        source.close().unwrap();

        let svc = service(dir.path(), MemoryStore::builtin_schema());
        let probe = FlakyProbe {
            failures: AtomicUsize::new(0),
        };
        let mut startup = Startup::new(&svc, &probe).poll_interval(Duration::from_millis(1));

        let result = startup.run().await;
        assert!(matches!(result, Err(Error::Conversion { .. })));
    }

    #[tokio::test]
    async fn test_populated_store_skips_import() {
        let dir = tempfile::tempdir().unwrap();
        let store = MemoryStore::new();
        for table in CatalogSet::builtin().all_relational_tables() {
            store.create_table(table, &[("id", "integer")], &["id"]);
            store.insert(table, crate::Row::new().with("id", 1i64)).unwrap();
        }
        let svc = service(dir.path(), store);
        let probe = FlakyProbe {
            failures: AtomicUsize::new(0),
        };

        let mut startup = Startup::new(&svc, &probe);
        startup.step().await.unwrap();
        assert_eq!(startup.step().await.unwrap(), StartupState::Exporting);
    }
}
