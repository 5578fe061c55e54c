//! User settings persistence via TOML.
//!
//! Settings are stored at `<config_dir>/hashdrop/settings.toml`.
//! Missing or corrupted config files return sensible defaults.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// User-configurable settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Settings {
    pub server: ServerSettings,
    pub client: ClientSettings,
}

/// Receiving side.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSettings {
    /// Address the upload server listens on.
    pub bind_addr: String,
    /// Directory received files are written to.
    pub storage_dir: PathBuf,
    /// Largest accepted request body in bytes.
    pub max_body_bytes: usize,
    /// Seconds a client may take to deliver its request.
    pub request_timeout_secs: u64,
}

/// Sending side.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientSettings {
    /// `host:port` of the upload server.
    pub server_addr: String,
    /// Salt digests unless told otherwise.
    pub use_salt: bool,
    /// Seconds allowed for one upload round trip.
    pub timeout_secs: u64,
}

impl Default for ServerSettings {
    fn default() -> Self {
        let storage_dir = directories::ProjectDirs::from("", "", "hashdrop")
            .map(|d| d.data_dir().join("ReceivedFiles"))
            .unwrap_or_else(|| PathBuf::from("ReceivedFiles"));

        Self {
            bind_addr: "127.0.0.1:8080".to_string(),
            storage_dir,
            max_body_bytes: 256 * 1024 * 1024,
            request_timeout_secs: 300,
        }
    }
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            server_addr: "localhost:8080".to_string(),
            use_salt: true,
            timeout_secs: 300,
        }
    }
}

impl ServerSettings {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

impl ClientSettings {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

const SETTINGS_FILE: &str = "settings.toml";

impl Settings {
    /// Settings from `<config_dir>/hashdrop/settings.toml`, or defaults.
    pub fn load() -> Self {
        Self::load_from_dir(Self::config_dir())
    }

    pub fn save(&self) -> Result<()> {
        self.save_to_dir(Self::config_dir())
    }

    /// Settings from `config_dir`. A missing file yields defaults silently; an
    /// unreadable or invalid one yields defaults with a warning.
    pub fn load_from_dir(config_dir: PathBuf) -> Self {
        let path = config_dir.join(SETTINGS_FILE);
        if !path.exists() {
            tracing::debug!(path = %path.display(), "no hashdrop settings file, using defaults");
            return Self::default();
        }

        match Self::read_file(&path) {
            Ok(settings) => {
                tracing::debug!(path = %path.display(), "hashdrop settings loaded");
                settings
            }
            Err(e) => {
                tracing::warn!(
                    path = %path.display(),
                    error = %format!("{e:#}"),
                    "ignoring hashdrop settings file"
                );
                Self::default()
            }
        }
    }

    fn read_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).context("cannot read file")?;
        toml::from_str(&text).context("not valid hashdrop settings")
    }

    /// Write settings to `config_dir`, creating it as needed.
    pub fn save_to_dir(&self, config_dir: PathBuf) -> Result<()> {
        std::fs::create_dir_all(&config_dir)
            .with_context(|| format!("cannot create {}", config_dir.display()))?;

        let path = config_dir.join(SETTINGS_FILE);
        let text = toml::to_string_pretty(self).context("cannot render settings as TOML")?;
        std::fs::write(&path, text).with_context(|| format!("cannot write {}", path.display()))?;

        tracing::info!(path = %path.display(), "hashdrop settings written");
        Ok(())
    }

    /// Platform config directory for hashdrop, or `./hashdrop-config` when the
    /// platform has none.
    pub fn config_dir() -> PathBuf {
        directories::ProjectDirs::from("", "", "hashdrop")
            .map(|d| d.config_dir().to_path_buf())
            .unwrap_or_else(|| PathBuf::from("hashdrop-config"))
    }
}
