use serde::{Deserialize, Serialize};
use sqlx::postgres::PgConnectOptions;
use std::net::{IpAddr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::catalog::builtin;
use crate::export::SnapshotPaths;
use crate::import::SourceFile;
use crate::relational::PgConnector;
use crate::server::AppState;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    pub server: ServerConfig,
    pub storage: StorageConfig,
    pub relational: RelationalConfig,
    pub schedule: ScheduleConfig,
    pub startup: StartupConfig,
    pub snapshot: SnapshotConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub storage_dir: PathBuf,
    pub backup_dir: PathBuf,
    /// Exported snapshot, also the podcast import source
    pub snapshot_file: String,
    /// Session import source
    pub session_file: String,
    pub chunk_size: usize,
    pub batch_size: usize,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            storage_dir: PathBuf::from("./storage"),
            backup_dir: PathBuf::from("./backup"),
            snapshot_file: "kotlinapp_data.db".to_string(),
            session_file: "kotlinapp_sessions.db".to_string(),
            chunk_size: crate::server::DEFAULT_CHUNK_SIZE,
            batch_size: crate::export::DEFAULT_BATCH_SIZE,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RelationalConfig {
    pub host: String,
    pub port: u16,
    pub dbname: String,
    pub user: String,
    pub password: String,
    pub schema: String,
    pub connect_timeout_secs: u64,
}

impl Default for RelationalConfig {
    fn default() -> Self {
        Self {
            host: "db".to_string(),
            port: 5432,
            dbname: "kotlinconfg".to_string(),
            user: "postgres".to_string(),
            password: "postgres".to_string(),
            schema: "public".to_string(),
            connect_timeout_secs: 10,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScheduleConfig {
    pub export_interval_secs: u64,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            export_interval_secs: crate::scheduler::DEFAULT_EXPORT_INTERVAL.as_secs(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StartupConfig {
    pub probe_urls: Vec<String>,
    pub health_path: String,
    pub poll_interval_secs: u64,
    pub probe_timeout_secs: u64,
}

impl Default for StartupConfig {
    fn default() -> Self {
        Self {
            probe_urls: vec![
                "http://0.0.0.0:8080".to_string(),
                "http://backend:8080".to_string(),
                "http://localhost:8080".to_string(),
            ],
            health_path: "/healthz".to_string(),
            poll_interval_secs: crate::startup::DEFAULT_POLL_INTERVAL.as_secs(),
            probe_timeout_secs: 5,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SnapshotConfig {
    pub version: String,
    pub required: bool,
    pub description: String,
}

impl Default for SnapshotConfig {
    fn default() -> Self {
        Self {
            version: "1.0.0".to_string(),
            required: true,
            description: "Latest podcast database export".to_string(),
        }
    }
}

impl SyncConfig {
    /// Apply environment overrides on top of the file values
    pub fn apply_env(&mut self) -> anyhow::Result<()> {
        self.apply_overrides(|key| std::env::var(key).ok())
    }

    fn apply_overrides(&mut self, var: impl Fn(&str) -> Option<String>) -> anyhow::Result<()> {
        if let Some(dir) = var("STORAGE_DIR") {
            self.storage.storage_dir = PathBuf::from(dir);
        }
        if let Some(dir) = var("BACKUP_DIR") {
            self.storage.backup_dir = PathBuf::from(dir);
        }
        if let Some(host) = var("PG_HOST") {
            self.relational.host = host;
        }
        if let Some(port) = var("PG_PORT") {
            self.relational.port = port
                .parse()
                .map_err(|e| anyhow::anyhow!("invalid PG_PORT '{}': {}", port, e))?;
        }
        if let Some(dbname) = var("PG_DBNAME") {
            self.relational.dbname = dbname;
        }
        if let Some(user) = var("PG_USER") {
            self.relational.user = user;
        }
        if let Some(password) = var("PG_PASSWORD") {
            self.relational.password = password;
        }
        if let Some(url) = var("BACKEND_URL") {
            self.startup.probe_urls.retain(|u| *u != url);
            self.startup.probe_urls.insert(0, url);
        }
        if let Some(port) = var("SNAPSYNC_PORT") {
            self.server.port = port
                .parse()
                .map_err(|e| anyhow::anyhow!("invalid SNAPSYNC_PORT '{}': {}", port, e))?;
        }
        Ok(())
    }

    pub fn snapshot_paths(&self) -> SnapshotPaths {
        SnapshotPaths::new(
            &self.storage.storage_dir,
            &self.storage.backup_dir,
            &self.storage.snapshot_file,
        )
    }

    /// Import sources: the podcast file, then the session file
    pub fn source_files(&self) -> Vec<SourceFile> {
        vec![
            SourceFile::new(
                self.storage.storage_dir.join(&self.storage.snapshot_file),
                builtin::PODCAST,
            ),
            SourceFile::new(
                self.storage.storage_dir.join(&self.storage.session_file),
                builtin::SESSION,
            ),
        ]
    }

    pub fn connector(&self) -> PgConnector {
        let r = &self.relational;
        let options = PgConnectOptions::new()
            .host(&r.host)
            .port(r.port)
            .database(&r.dbname)
            .username(&r.user)
            .password(&r.password);
        PgConnector::new(options, r.schema.clone(), Duration::from_secs(r.connect_timeout_secs))
    }

    pub fn app_state(&self) -> AppState {
        let mut state = AppState::new(&self.snapshot_paths());
        state.chunk_size = self.storage.chunk_size.max(1);
        state.version = self.snapshot.version.clone();
        state.required = self.snapshot.required;
        state.description = self.snapshot.description.clone();
        state
    }

    pub fn listen_addr(&self) -> anyhow::Result<SocketAddr> {
        let ip: IpAddr = self
            .server
            .host
            .parse()
            .map_err(|e| anyhow::anyhow!("invalid server host '{}': {}", self.server.host, e))?;
        Ok(SocketAddr::new(ip, self.server.port))
    }

    pub fn export_interval(&self) -> Duration {
        Duration::from_secs(self.schedule.export_interval_secs.max(1))
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.startup.poll_interval_secs)
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_secs(self.startup.probe_timeout_secs)
    }
}

pub fn default_config_path() -> PathBuf {
    PathBuf::from("snapsync.toml")
}

/// Load the config file if present (defaults otherwise), then apply the environment.
pub fn load_config(path: Option<&Path>) -> anyhow::Result<SyncConfig> {
    let path = path.map(Path::to_path_buf).unwrap_or_else(default_config_path);
    let mut config: SyncConfig = if path.exists() {
        let contents = std::fs::read_to_string(&path)?;
        toml::from_str(&contents).map_err(|e| crate::Error::Config(format!("{}: {}", path.display(), e)))?
    } else {
        SyncConfig::default()
    };
    config.apply_env()?;
    Ok(config)
}

pub fn write_config(path: &Path, config: &SyncConfig, force: bool) -> anyhow::Result<()> {
    if path.exists() && !force {
        anyhow::bail!("config already exists at {} (use --force to overwrite)", path.display());
    }

    let contents = toml::to_string_pretty(config)?;
    std::fs::write(path, contents)?;
    Ok(())
}

/// Create the storage and backup directories
pub fn ensure_dirs(config: &SyncConfig) -> anyhow::Result<()> {
    for dir in [&config.storage.storage_dir, &config.storage.backup_dir] {
        if !dir.as_os_str().is_empty() && !dir.exists() {
            std::fs::create_dir_all(dir)?;
        }
    }
    Ok(())
}
