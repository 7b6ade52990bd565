//! Configuration management for composer using the prefer crate.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::compose::{CompositeWriter, ComposeError, ShardedPaths};
use crate::pipeline::PipelineConfig;
use crate::repository::DbContext;
use crate::sources::EARLIEST_YEAR;
use crate::store::DEFAULT_BUCKET_URL;

/// Default database filename.
pub const DEFAULT_DATABASE_FILENAME: &str = "state.sqlite";

/// Default user agent for bucket requests.
pub const USER_AGENT: &str = "composer/0.3 (nonprofit research; github.com/anr990/composer)";

/// Default composite directory sharding depth.
pub const DEFAULT_SHARD_DEPTH: usize = 2;

/// Default per-phase deadline in seconds.
const DEFAULT_PHASE_TIMEOUT: u64 = 3600;

/// Application settings.
#[derive(Debug, Clone)]
pub struct Settings {
    /// Base data directory.
    pub data_dir: PathBuf,
    /// Database filename, relative to `data_dir`.
    pub database_filename: String,
    /// Root of the sharded composite tree.
    pub composites_dir: PathBuf,
    /// Bucket URL or local mirror directory.
    pub bucket: String,
    /// User agent for HTTP requests.
    pub user_agent: String,
    /// Seconds a bucket request may stall while connecting or between body
    /// reads. Transfers that keep progressing are bounded by the phase
    /// deadlines only.
    pub request_timeout: u64,
    /// Tasks in flight per batch phase.
    pub workers: usize,
    /// Fetch phase deadline in seconds.
    pub fetch_timeout: u64,
    /// Translate phase deadline in seconds.
    pub translate_timeout: u64,
    /// Composite write phase deadline in seconds.
    pub write_timeout: u64,
    /// First index year to scan.
    pub earliest_year: i32,
    /// Last index year to scan; the current year if unset.
    pub latest_year: Option<i32>,
    /// Directory levels in the composite tree (1 to 3).
    pub shard_depth: usize,
    /// Keep fetched documents after the run.
    pub keep_staging: bool,
    /// Parent directory for staging; the system temp dir if unset.
    pub staging_dir: Option<PathBuf>,
}

impl Default for Settings {
    fn default() -> Self {
        // Default to the platform data dir, then home, then current dir
        let data_dir = dirs::data_dir()
            .or_else(dirs::home_dir)
            .unwrap_or_else(|| PathBuf::from("."))
            .join("composer");

        Self {
            composites_dir: data_dir.clone(),
            data_dir,
            database_filename: DEFAULT_DATABASE_FILENAME.to_string(),
            bucket: DEFAULT_BUCKET_URL.to_string(),
            user_agent: USER_AGENT.to_string(),
            request_timeout: 30,
            workers: 8,
            fetch_timeout: DEFAULT_PHASE_TIMEOUT,
            translate_timeout: DEFAULT_PHASE_TIMEOUT,
            write_timeout: DEFAULT_PHASE_TIMEOUT,
            earliest_year: EARLIEST_YEAR,
            latest_year: None,
            shard_depth: DEFAULT_SHARD_DEPTH,
            keep_staging: false,
            staging_dir: None,
        }
    }
}

impl Settings {
    /// Create settings with a custom data directory.
    ///
    /// Composites are written directly under the data directory.
    pub fn with_data_dir(data_dir: PathBuf) -> Self {
        Self {
            composites_dir: data_dir.clone(),
            data_dir,
            ..Default::default()
        }
    }

    /// Get the full path to the database.
    pub fn database_path(&self) -> PathBuf {
        self.data_dir.join(&self.database_filename)
    }

    /// Check if the database appears to be initialized.
    pub fn database_exists(&self) -> bool {
        self.database_path().exists()
    }

    /// Ensure all directories exist.
    pub fn ensure_directories(&self) -> std::io::Result<()> {
        for (label, dir) in [("data", &self.data_dir), ("composites", &self.composites_dir)] {
            tracing::debug!("Ensuring {} directory {}", label, dir.display());
            fs::create_dir_all(dir).map_err(|e| {
                std::io::Error::new(
                    e.kind(),
                    format!(
                        "Failed to create {} directory '{}': {}",
                        label,
                        dir.display(),
                        e
                    ),
                )
            })?;
        }
        Ok(())
    }

    pub fn create_db_context(&self) -> DbContext {
        DbContext::new(&self.database_path())
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout)
    }

    pub fn pipeline_config(&self) -> PipelineConfig {
        PipelineConfig {
            workers: self.workers,
            fetch_timeout: Duration::from_secs(self.fetch_timeout),
            translate_timeout: Duration::from_secs(self.translate_timeout),
            keep_staging: self.keep_staging,
            staging_root: self.staging_dir.clone(),
        }
    }

    pub fn composite_writer(&self) -> Result<CompositeWriter, ComposeError> {
        let paths = ShardedPaths::new(&self.composites_dir, self.shard_depth)?;
        Ok(CompositeWriter::new(
            paths,
            self.workers,
            Duration::from_secs(self.write_timeout),
        ))
    }
}

/// Optional configuration file contents.
#[derive(Debug, Clone, Default, Serialize, Deserialize, prefer::FromValue)]
pub struct Config {
    #[serde(default, skip_serializing_if = "Option::is_none", alias = "target")]
    pub data_dir: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub database: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub composites_dir: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bucket: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_agent: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_timeout: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workers: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fetch_timeout: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub translate_timeout: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub write_timeout: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub earliest_year: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub latest_year: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shard_depth: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub keep_staging: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub staging_dir: Option<String>,
    #[serde(skip)]
    #[prefer(skip)]
    pub source_path: Option<PathBuf>,
}

impl Config {
    /// Discover and load a config file, falling back to defaults.
    pub async fn load() -> Self {
        // Use prefer for file discovery, then parse with serde
        match prefer::load("composer").await {
            Ok(pref_config) => match pref_config.source_path() {
                Some(path) => Self::load_from_path(path).await.unwrap_or_else(|e| {
                    tracing::warn!("{}", e);
                    Self::default()
                }),
                None => Self::default(),
            },
            // No config file found
            Err(_) => Self::default(),
        }
    }

    /// Load a config file, choosing the format by extension.
    pub async fn load_from_path(path: &Path) -> Result<Self, String> {
        let contents = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| format!("Failed to read config file: {}", e))?;

        let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("json");

        let mut config: Config = match ext {
            "toml" => toml::from_str(&contents)
                .map_err(|e| format!("Failed to parse TOML config: {}", e))?,
            "yaml" | "yml" => serde_yaml::from_str(&contents)
                .map_err(|e| format!("Failed to parse YAML config: {}", e))?,
            _ => serde_json::from_str(&contents)
                .map_err(|e| format!("Failed to parse JSON config: {}", e))?,
        };

        config.source_path = Some(path.to_path_buf());
        Ok(config)
    }

    /// Directory containing the loaded config file.
    pub fn base_dir(&self) -> Option<PathBuf> {
        self.source_path
            .as_ref()
            .and_then(|p| p.parent().map(|p| p.to_path_buf()))
    }

    /// Resolve a configured path: `~` expands, relative paths join `base_dir`.
    pub fn resolve_path(&self, path_str: &str, base_dir: &Path) -> PathBuf {
        let expanded = shellexpand::tilde(path_str);
        let path = Path::new(expanded.as_ref());

        if path.is_absolute() {
            path.to_path_buf()
        } else {
            base_dir.join(path)
        }
    }

    pub fn apply_to_settings(&self, settings: &mut Settings, base_dir: &Path) {
        if let Some(ref data_dir) = self.data_dir {
            settings.data_dir = self.resolve_path(data_dir, base_dir);
            settings.composites_dir = settings.data_dir.clone();
        }
        if let Some(ref composites_dir) = self.composites_dir {
            settings.composites_dir = self.resolve_path(composites_dir, base_dir);
        }
        if let Some(ref database) = self.database {
            settings.database_filename = database.clone();
        }
        if let Some(ref bucket) = self.bucket {
            settings.bucket = bucket.clone();
        }
        if let Some(ref user_agent) = self.user_agent {
            settings.user_agent = user_agent.clone();
        }
        if let Some(timeout) = self.request_timeout {
            settings.request_timeout = timeout;
        }
        if let Some(workers) = self.workers {
            settings.workers = (workers as usize).max(1);
        }
        if let Some(timeout) = self.fetch_timeout {
            settings.fetch_timeout = timeout;
        }
        if let Some(timeout) = self.translate_timeout {
            settings.translate_timeout = timeout;
        }
        if let Some(timeout) = self.write_timeout {
            settings.write_timeout = timeout;
        }
        if let Some(year) = self.earliest_year.and_then(|y| i32::try_from(y).ok()) {
            settings.earliest_year = year;
        }
        if let Some(year) = self.latest_year.and_then(|y| i32::try_from(y).ok()) {
            settings.latest_year = Some(year);
        }
        if let Some(depth) = self.shard_depth {
            settings.shard_depth = depth as usize;
        }
        if let Some(keep) = self.keep_staging {
            settings.keep_staging = keep;
        }
        if let Some(ref staging) = self.staging_dir {
            settings.staging_dir = Some(self.resolve_path(staging, base_dir));
        }
    }
}

/// Where to look for settings.
#[derive(Debug, Clone, Default)]
pub struct LoadOptions {
    /// Explicit config file (`--config`).
    pub config_path: Option<PathBuf>,
    /// Data directory given on the command line.
    pub data: Option<PathBuf>,
}

/// Look for a config file inside the data directory.
fn find_config_in_data_dir(data_dir: &Path) -> Option<PathBuf> {
    let extensions = ["json", "yaml", "yml", "toml"];
    let basenames = ["composer", "config"];

    for basename in basenames {
        for ext in extensions {
            let path = data_dir.join(format!("{}.{}", basename, ext));
            if path.exists() {
                return Some(path);
            }
        }
    }
    None
}

fn absolute(path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir()
            .unwrap_or_else(|_| PathBuf::from("."))
            .join(path)
    }
}

/// Load config from file sources.
async fn load_file_config(options: &LoadOptions, data_dir: Option<&Path>) -> Config {
    // Priority 1: Explicit --config flag
    if let Some(ref config_path) = options.config_path {
        return Config::load_from_path(config_path)
            .await
            .unwrap_or_else(|e| {
                tracing::warn!("{}", e);
                Config::default()
            });
    }

    // Priority 2: Config inside the data dir
    if let Some(config_path) = data_dir.and_then(find_config_in_data_dir) {
        tracing::debug!("Found config in data dir: {}", config_path.display());
        return Config::load_from_path(&config_path)
            .await
            .unwrap_or_else(|e| {
                tracing::warn!("{}", e);
                Config::default()
            });
    }

    // Priority 3: Auto-discover via prefer
    Config::load().await
}

/// Load settings with explicit options.
/// Returns (Settings, Config) tuple.
pub async fn load_settings_with_options(options: LoadOptions) -> (Settings, Config) {
    let data_dir = options.data.as_deref().map(absolute);
    let config = load_file_config(&options, data_dir.as_deref()).await;

    let mut settings = Settings::default();

    // Relative paths in a config file are relative to the file
    let base_dir = config
        .base_dir()
        .unwrap_or_else(|| std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")));
    config.apply_to_settings(&mut settings, &base_dir);

    // The data directory on the command line wins; composites follow it
    // unless the config file placed them elsewhere.
    if let Some(data_dir) = data_dir {
        settings.data_dir = data_dir;
        if config.composites_dir.is_none() {
            settings.composites_dir = settings.data_dir.clone();
        }
    }

    (settings, config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_default_settings() {
        let settings = Settings::with_data_dir(PathBuf::from("/srv/composer"));
        assert_eq!(
            settings.database_path(),
            PathBuf::from("/srv/composer/state.sqlite")
        );
        assert_eq!(settings.composites_dir, PathBuf::from("/srv/composer"));
        assert_eq!(settings.bucket, DEFAULT_BUCKET_URL);
        assert_eq!(settings.earliest_year, 2011);
        assert_eq!(settings.shard_depth, 2);
    }

    #[tokio::test]
    async fn test_load_toml() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("composer.toml");
        std::fs::write(
            &path,
            "bucket = \"/mirror/irs\"\nworkers = 4\nkeep_staging = true\ncomposites_dir = \"out\"\n",
        )
        .unwrap();

        let config = Config::load_from_path(&path).await.unwrap();
        assert_eq!(config.bucket.as_deref(), Some("/mirror/irs"));
        assert_eq!(config.workers, Some(4));
        assert_eq!(config.base_dir(), Some(dir.path().to_path_buf()));

        let mut settings = Settings::with_data_dir(dir.path().to_path_buf());
        config.apply_to_settings(&mut settings, dir.path());
        assert_eq!(settings.workers, 4);
        assert!(settings.keep_staging);
        assert_eq!(settings.composites_dir, dir.path().join("out"));
    }

    #[tokio::test]
    async fn test_load_yaml_and_json() {
        let dir = tempdir().unwrap();
        let yaml = dir.path().join("composer.yaml");
        std::fs::write(&yaml, "fetch_timeout: 60\nshard_depth: 3\n").unwrap();
        let json = dir.path().join("composer.json");
        std::fs::write(&json, r#"{"target": "/data", "latest_year": 2019}"#).unwrap();

        let from_yaml = Config::load_from_path(&yaml).await.unwrap();
        assert_eq!(from_yaml.fetch_timeout, Some(60));
        assert_eq!(from_yaml.shard_depth, Some(3));

        let from_json = Config::load_from_path(&json).await.unwrap();
        assert_eq!(from_json.data_dir.as_deref(), Some("/data"));
        assert_eq!(from_json.latest_year, Some(2019));
    }

    #[tokio::test]
    async fn test_invalid_config_is_error() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("composer.toml");
        std::fs::write(&path, "workers = [").unwrap();

        let err = Config::load_from_path(&path).await.unwrap_err();
        assert!(err.contains("TOML"));
    }

    #[test]
    fn test_resolve_path() {
        let config = Config::default();
        let base = Path::new("/etc/composer");
        assert_eq!(
            config.resolve_path("data", base),
            PathBuf::from("/etc/composer/data")
        );
        assert_eq!(
            config.resolve_path("/var/data", base),
            PathBuf::from("/var/data")
        );
    }

    #[tokio::test]
    async fn test_data_dir_config_is_found() {
        let dir = tempdir().unwrap();
        std::fs::write(
            dir.path().join("composer.json"),
            r#"{"bucket": "https://mirror.example.org/irs"}"#,
        )
        .unwrap();

        let (settings, _) = load_settings_with_options(LoadOptions {
            config_path: None,
            data: Some(dir.path().to_path_buf()),
        })
        .await;

        assert_eq!(settings.bucket, "https://mirror.example.org/irs");
        assert_eq!(settings.data_dir, dir.path());
        assert_eq!(settings.composites_dir, dir.path());
    }
}
