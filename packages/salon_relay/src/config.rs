use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;

// =============================================================================
// Unified config (figment-deserialized from defaults / config.toml / env vars)
// =============================================================================
//
// Equivalent ways to configure:
//
//   config.toml:     [delivery]
//                    webhook_url = "http://127.0.0.1:9000/send"
//
//   env var:         SALON_DELIVERY__WEBHOOK_URL=http://127.0.0.1:9000/send
//
//   (double underscore = nesting; single underscore stays within field names)

/// Named configuration presets.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Profile {
    /// host=127.0.0.1
    Local,
    /// host=0.0.0.0
    Server,
}

/// Top-level tunable configuration, deserialized by figment.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct FileConfig {
    #[serde(default)]
    pub profile: Option<Profile>,
    #[serde(default)]
    pub server: ServerFileConfig,
    #[serde(default)]
    pub persistence: PersistenceFileConfig,
    #[serde(default)]
    pub delivery: DeliveryFileConfig,
}

/// Server tuning knobs (lives under `[server]` in config.toml).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ServerFileConfig {
    #[serde(default)]
    pub host: Option<String>,
    #[serde(default)]
    pub port: Option<u16>,
    /// Frames queued per connection before it counts as saturated.
    #[serde(default = "default_send_channel_capacity")]
    pub send_channel_capacity: usize,
    /// Seconds the outbox may keep draining after shutdown starts.
    #[serde(default = "default_shutdown_grace_secs")]
    pub shutdown_grace_secs: u64,
}

impl Default for ServerFileConfig {
    fn default() -> Self {
        Self {
            host: None,
            port: None,
            send_channel_capacity: default_send_channel_capacity(),
            shutdown_grace_secs: default_shutdown_grace_secs(),
        }
    }
}

/// Write-through storage (lives under `[persistence]`).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PersistenceFileConfig {
    #[serde(default = "default_persistence_enabled")]
    pub enabled: bool,
}

impl Default for PersistenceFileConfig {
    fn default() -> Self {
        Self {
            enabled: default_persistence_enabled(),
        }
    }
}

/// Customer channel settings (lives under `[delivery]`).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DeliveryFileConfig {
    /// Where operator replies are POSTed. Unset: replies are only logged.
    #[serde(default)]
    pub webhook_url: Option<String>,
    #[serde(default = "default_delivery_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for DeliveryFileConfig {
    fn default() -> Self {
        Self {
            webhook_url: None,
            timeout_secs: default_delivery_timeout_secs(),
        }
    }
}

fn default_send_channel_capacity() -> usize {
    256
}
fn default_shutdown_grace_secs() -> u64 {
    5
}
fn default_persistence_enabled() -> bool {
    true
}
fn default_delivery_timeout_secs() -> u64 {
    10
}

pub const DEFAULT_PORT: u16 = 4180;
pub const DEFAULT_HOST: &str = "127.0.0.1";

/// Build a figment that layers: defaults → profile defaults → config.toml → SALON_* env vars.
///
/// The CLI profile takes priority over the config file profile.
pub fn load_config(data_dir: &Path, cli_profile: Option<&Profile>) -> figment::Figment {
    use figment::{
        Figment,
        providers::{Env, Format, Serialized, Toml},
    };

    // Pass 1: peek at profile from config.toml/env (CLI overrides file)
    let base = Figment::from(Serialized::defaults(FileConfig::default()))
        .merge(Toml::file(data_dir.join("config.toml")))
        .merge(Env::prefixed("SALON_").split("__"));

    let profile: Option<Profile> = cli_profile
        .cloned()
        .or_else(|| base.extract_inner("profile").ok());

    // Pass 2: profile defaults sit between struct defaults and config.toml
    let profile_layer = profile_to_file_config(profile.as_ref());

    Figment::from(Serialized::defaults(FileConfig::default()))
        .merge(Serialized::defaults(profile_layer))
        .merge(Toml::file(data_dir.join("config.toml")))
        .merge(Env::prefixed("SALON_").split("__"))
}

/// Convert a profile into a `FileConfig` with the profile's values filled in.
/// Everything else stays at struct defaults so explicit user values win.
fn profile_to_file_config(profile: Option<&Profile>) -> FileConfig {
    let host = match profile {
        Some(Profile::Local) => "127.0.0.1",
        Some(Profile::Server) => "0.0.0.0",
        None => return FileConfig::default(),
    };
    FileConfig {
        profile: profile.cloned(),
        server: ServerFileConfig {
            host: Some(host.to_string()),
            ..Default::default()
        },
        ..Default::default()
    }
}

// =============================================================================
// Runtime config structs (derived from FileConfig, used throughout the server)
// =============================================================================

#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub websocket: WebSocketConfig,
    pub shutdown_grace: Duration,
}

#[derive(Clone, Debug)]
pub struct WebSocketConfig {
    /// Channel capacity for messages to a client
    pub send_channel_capacity: usize,
}

impl ServerConfig {
    pub fn from_file(fc: &ServerFileConfig) -> Self {
        Self {
            websocket: WebSocketConfig {
                send_channel_capacity: fc.send_channel_capacity.max(1),
            },
            shutdown_grace: Duration::from_secs(fc.shutdown_grace_secs),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self::from_file(&ServerFileConfig::default())
    }
}

/// Customer channel configuration (runtime view).
#[derive(Clone, Debug)]
pub struct DeliveryConfig {
    pub webhook_url: Option<String>,
    pub timeout: Duration,
}

impl DeliveryConfig {
    pub fn from_file(fc: &DeliveryFileConfig) -> Self {
        Self {
            webhook_url: fc
                .webhook_url
                .as_ref()
                .map(|u| u.trim().to_string())
                .filter(|u| !u.is_empty()),
            timeout: Duration::from_secs(fc.timeout_secs.max(1)),
        }
    }
}

// =============================================================================
// Directory layout (not tunable via figment; derived from --data-dir)
// =============================================================================

#[derive(Clone, Debug)]
pub struct RelayPaths {
    pub data_dir: PathBuf,
    pub db_path: PathBuf,
    pub logs_dir: PathBuf,
}

impl RelayPaths {
    pub fn new(custom_dir: Option<PathBuf>) -> Result<Self> {
        let data_dir = match custom_dir {
            Some(dir) => dir,
            None => dirs::home_dir()
                .context("Could not find home directory")?
                .join(".salon-relay"),
        };

        std::fs::create_dir_all(&data_dir)
            .with_context(|| format!("Failed to create data directory: {:?}", data_dir))?;

        let logs_dir = data_dir.join("logs");
        std::fs::create_dir_all(&logs_dir)
            .with_context(|| format!("Failed to create logs directory: {:?}", logs_dir))?;

        let db_path = data_dir.join("salon-relay.db");

        info!("Data directory: {}", data_dir.display());

        Ok(Self {
            data_dir,
            db_path,
            logs_dir,
        })
    }

    pub fn db_url(&self) -> String {
        format!("sqlite://{}?mode=rwc", self.db_path.display())
    }

    pub fn config_toml_path(&self) -> PathBuf {
        self.data_dir.join("config.toml")
    }

    pub fn reset_database(&self) -> Result<()> {
        if self.db_path.exists() {
            std::fs::remove_file(&self.db_path)
                .with_context(|| format!("Failed to delete database: {:?}", self.db_path))?;
            info!("Database reset: {:?}", self.db_path);

            for ext in ["db-wal", "db-shm"] {
                let side = self.db_path.with_extension(ext);
                if side.exists() {
                    std::fs::remove_file(&side)
                        .with_context(|| format!("Failed to delete {:?}", side))?;
                }
            }
        }
        Ok(())
    }
}
