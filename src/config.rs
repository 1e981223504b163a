//! Configuration handling for the application.

use clap::Parser;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::error::{AppError, Result};

/// Test a backup method before trusting it with real backups.
#[derive(Parser, Debug, Clone)]
#[command(name = "drivebackup")]
#[command(about = "Validate a backup upload method against a remote storage backend")]
pub struct Cli {
    /// Settings file (JSON). Built-in defaults are used when omitted.
    #[arg(long, env = "DRIVEBACKUP_CONFIG")]
    pub config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "RUST_LOG", default_value = "info")]
    pub log_level: String,

    /// Trace every HTTP exchange, regardless of the settings file
    #[arg(long)]
    pub debug: bool,

    /// Backup method to test, followed by an optional alternate folder for a full test run
    #[arg(trailing_var_arg = true)]
    pub args: Vec<String>,
}

/// Settings for accounts authorised through OAuth. The access token is obtained out of band.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OAuthSettings {
    pub enabled: bool,
    pub access_token: String,
    /// API base URL override, mostly for testing against a local server.
    pub api_base: Option<String>,
    /// Upload endpoint override, for providers that split uploads from metadata calls.
    pub upload_base: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WebDavSettings {
    pub enabled: bool,
    pub url: String,
    pub username: String,
    pub password: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct S3Settings {
    pub enabled: bool,
    pub endpoint: String,
    pub region: String,
    pub bucket: String,
    pub access_key: String,
    pub secret_key: String,
}

impl Default for S3Settings {
    fn default() -> Self {
        Self {
            enabled: false,
            endpoint: "https://s3.amazonaws.com".to_string(),
            region: "us-east-1".to_string(),
            bucket: String::new(),
            access_key: String::new(),
            secret_key: String::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FtpSettings {
    pub enabled: bool,
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
    /// Directory on the server that remote paths are relative to.
    pub base_dir: String,
}

impl Default for FtpSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            host: String::new(),
            port: 21,
            username: "anonymous".to_string(),
            password: String::new(),
            base_dir: String::new(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackupMethods {
    pub googledrive: OAuthSettings,
    pub onedrive: OAuthSettings,
    pub dropbox: OAuthSettings,
    pub webdav: WebDavSettings,
    pub nextcloud: WebDavSettings,
    pub s3: S3Settings,
    pub ftp: FtpSettings,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Advanced {
    /// Trace every HTTP exchange made by the uploaders.
    pub debug: bool,
}

/// One consistent view of the configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Local working directory; test files are created here.
    pub local_directory: String,
    /// Remote folder backups are saved to.
    pub remote_directory: String,
    pub advanced: Advanced,
    pub methods: BackupMethods,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            local_directory: "backups".to_string(),
            remote_directory: "backups".to_string(),
            advanced: Advanced::default(),
            methods: BackupMethods::default(),
        }
    }
}

impl Settings {
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            AppError::Config(format!("Failed to read {}: {}", path.display(), e))
        })?;
        serde_json::from_str(&content)
            .map_err(|e| AppError::Config(format!("Invalid settings in {}: {}", path.display(), e)))
    }
}

#[derive(Debug, Clone)]
enum Source {
    File(PathBuf),
    Memory(Settings),
}

/// Values set at runtime on top of the source.
#[derive(Debug, Clone, Default)]
struct Overrides {
    remote_directory: Option<String>,
    debug: Option<bool>,
}

impl Overrides {
    fn apply(&self, settings: &mut Settings) {
        if let Some(dir) = &self.remote_directory {
            settings.remote_directory = dir.clone();
        }
        if let Some(debug) = self.debug {
            settings.advanced.debug = debug;
        }
    }
}

#[derive(Debug)]
struct StoreState {
    current: Settings,
    staged: Overrides,
    pinned: Overrides,
}

/// Shared, reloadable configuration.
///
/// Readers take a [`Settings`] snapshot per operation. `set_remote_directory`
/// only stages a change; it becomes visible on the next [`ConfigStore::reload`].
#[derive(Debug, Clone)]
pub struct ConfigStore {
    source: Source,
    state: Arc<RwLock<StoreState>>,
}

impl ConfigStore {
    pub fn from_file(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let current = Settings::from_file(&path)?;
        Ok(Self::with_source(Source::File(path), current))
    }

    pub fn from_settings(settings: Settings) -> Self {
        Self::with_source(Source::Memory(settings.clone()), settings)
    }

    fn with_source(source: Source, current: Settings) -> Self {
        Self {
            source,
            state: Arc::new(RwLock::new(StoreState {
                current,
                staged: Overrides::default(),
                pinned: Overrides::default(),
            })),
        }
    }

    /// Force debug logging on for the life of this store, surviving every reload.
    pub fn pin_debug(&self, debug: bool) {
        let mut state = self.state.write();
        state.pinned.debug = Some(debug);
        state.current.advanced.debug = debug;
    }

    pub fn snapshot(&self) -> Settings {
        self.state.read().current.clone()
    }

    /// Stage a new remote save directory.
    pub fn set_remote_directory(&self, dir: &str) {
        self.state.write().staged.remote_directory = Some(dir.to_string());
    }

    /// Re-read the source and apply staged changes.
    pub fn reload(&self) -> Result<()> {
        let mut settings = self.read_source()?;
        let mut state = self.state.write();
        state.staged.apply(&mut settings);
        state.pinned.apply(&mut settings);
        state.current = settings;
        tracing::debug!(
            "Configuration reloaded, remote directory: {:?}",
            state.current.remote_directory
        );
        Ok(())
    }

    /// Drop staged changes and re-read the source.
    pub fn reload_local(&self) -> Result<()> {
        let mut settings = self.read_source()?;
        let mut state = self.state.write();
        state.staged = Overrides::default();
        state.pinned.apply(&mut settings);
        state.current = settings;
        tracing::debug!("Local configuration reloaded");
        Ok(())
    }

    fn read_source(&self) -> Result<Settings> {
        match &self.source {
            Source::File(path) => Settings::from_file(path),
            Source::Memory(settings) => Ok(settings.clone()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_settings_defaults_fill_missing_fields() {
        let settings: Settings =
            serde_json::from_str(r#"{"methods": {"s3": {"enabled": true, "bucket": "b"}}}"#)
                .unwrap();
        assert_eq!(settings.local_directory, "backups");
        assert_eq!(settings.remote_directory, "backups");
        assert!(!settings.advanced.debug);
        assert!(settings.methods.s3.enabled);
        assert_eq!(settings.methods.s3.bucket, "b");
        assert_eq!(settings.methods.s3.region, "us-east-1");
        assert_eq!(settings.methods.ftp.port, 21);
        assert!(!settings.methods.dropbox.enabled);
    }

    #[test]
    fn test_remote_directory_change_applies_on_reload() {
        let store = ConfigStore::from_settings(Settings::default());

        store.set_remote_directory("./tests/sub");
        assert_eq!(store.snapshot().remote_directory, "backups");

        store.reload().unwrap();
        assert_eq!(store.snapshot().remote_directory, "./tests/sub");

        store.reload_local().unwrap();
        assert_eq!(store.snapshot().remote_directory, "backups");
    }

    #[test]
    fn test_clones_share_state() {
        let store = ConfigStore::from_settings(Settings::default());
        let other = store.clone();

        store.set_remote_directory("shared");
        store.reload().unwrap();
        assert_eq!(other.snapshot().remote_directory, "shared");
    }

    #[test]
    fn test_pinned_debug_survives_reload() {
        let store = ConfigStore::from_settings(Settings::default());
        store.pin_debug(true);
        assert!(store.snapshot().advanced.debug);

        store.reload_local().unwrap();
        assert!(store.snapshot().advanced.debug);
    }

    #[test]
    fn test_file_source_is_reread() -> std::io::Result<()> {
        let mut tmp = NamedTempFile::new()?;
        write!(tmp, r#"{{"remote_directory": "first"}}"#)?;
        let store = ConfigStore::from_file(tmp.path()).unwrap();
        assert_eq!(store.snapshot().remote_directory, "first");

        std::fs::write(tmp.path(), r#"{"remote_directory": "second"}"#)?;
        store.reload().unwrap();
        assert_eq!(store.snapshot().remote_directory, "second");

        std::fs::write(tmp.path(), "not json")?;
        assert!(matches!(store.reload(), Err(AppError::Config(_))));
        assert_eq!(store.snapshot().remote_directory, "second");
        Ok(())
    }
}
