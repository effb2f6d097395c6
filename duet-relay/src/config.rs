//! Relay settings, merged from three layers.
//!
//! A flag or its environment variable wins over the `[server]` table of the
//! TOML file, which wins over the built-in defaults. The file is read from
//! `--config` when given, otherwise from `<config_dir>/duet-relay/config.toml`
//! if it exists.
//!
//! ```toml
//! [server]
//! bind_addr = "0.0.0.0:5000"
//! max_message_size = 65536
//! max_rooms = 1000
//! log_level = "info"
//! ```

use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::relay::DEFAULT_MAX_MESSAGE_SIZE;
use crate::rooms::DEFAULT_MAX_ROOMS;

/// Address the relay listens on when nothing else is configured.
pub const DEFAULT_BIND_ADDR: &str = "0.0.0.0:5000";

/// Log filter used when nothing else is configured.
pub const DEFAULT_LOG_LEVEL: &str = "info";

/// Errors raised while loading relay settings.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// The settings file could not be read.
    #[error("cannot read {}: {source}", .path.display())]
    ReadFile {
        /// File that was attempted.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// The settings file is not valid TOML for this schema.
    #[error("invalid settings file: {0}")]
    ParseToml(#[from] toml::de::Error),

    /// A setting has a value the relay cannot run with.
    #[error("invalid value for {setting}: {reason}")]
    Invalid {
        /// Name of the offending setting.
        setting: &'static str,
        /// Why the value was rejected.
        reason: &'static str,
    },
}

/// Settings file contents; every key is optional.
#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct SettingsFile {
    server: ServerTable,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct ServerTable {
    bind_addr: Option<String>,
    max_message_size: Option<usize>,
    max_rooms: Option<usize>,
    log_level: Option<String>,
}

/// Command-line flags for `duet-relay`.
#[derive(clap::Parser, Debug, Default)]
#[command(version, about = "Duet signaling relay server")]
pub struct RelayCliArgs {
    /// Address to listen on [default: 0.0.0.0:5000].
    #[arg(short, long, env = "DUET_ADDR")]
    pub bind: Option<String>,

    /// Settings file to read instead of the per-user default.
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Largest inbound frame accepted, in bytes [default: 65536].
    #[arg(long)]
    pub max_message_size: Option<usize>,

    /// Most rooms that may exist at once [default: 1000].
    #[arg(long)]
    pub max_rooms: Option<usize>,

    /// Tracing filter, e.g. `info` or `duet_relay=debug` [default: info].
    #[arg(long, env = "DUET_LOG")]
    pub log_level: Option<String>,
}

/// Settings the relay runs with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayConfig {
    /// Socket address to listen on.
    pub bind_addr: String,
    /// Largest inbound frame accepted, in bytes.
    pub max_message_size: usize,
    /// Most rooms that may exist at once.
    pub max_rooms: usize,
    /// Tracing filter directive.
    pub log_level: String,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            bind_addr: DEFAULT_BIND_ADDR.to_string(),
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
            max_rooms: DEFAULT_MAX_ROOMS,
            log_level: DEFAULT_LOG_LEVEL.to_string(),
        }
    }
}

impl RelayConfig {
    /// Reads the settings file and merges it under the command line.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if an explicit `--config` file is missing or
    /// unreadable, if any file fails to parse, or if a merged value is out of
    /// range. A missing default file counts as empty.
    pub fn load(cli: &RelayCliArgs) -> Result<Self, ConfigError> {
        let file = read_settings(cli.config.as_deref())?;
        let config = Self::merge(cli, file);
        config.validate()?;
        Ok(config)
    }

    fn merge(cli: &RelayCliArgs, file: SettingsFile) -> Self {
        let ServerTable {
            bind_addr,
            max_message_size,
            max_rooms,
            log_level,
        } = file.server;
        let defaults = Self::default();

        Self {
            bind_addr: cli.bind.clone().or(bind_addr).unwrap_or(defaults.bind_addr),
            max_message_size: cli
                .max_message_size
                .or(max_message_size)
                .unwrap_or(defaults.max_message_size),
            max_rooms: cli.max_rooms.or(max_rooms).unwrap_or(defaults.max_rooms),
            log_level: cli.log_level.clone().or(log_level).unwrap_or(defaults.log_level),
        }
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.max_message_size == 0 {
            return Err(ConfigError::Invalid {
                setting: "max_message_size",
                reason: "must be at least one byte",
            });
        }
        if self.max_rooms == 0 {
            return Err(ConfigError::Invalid {
                setting: "max_rooms",
                reason: "must allow at least one room",
            });
        }
        if self.log_level.trim().is_empty() {
            return Err(ConfigError::Invalid {
                setting: "log_level",
                reason: "must not be empty",
            });
        }
        Ok(())
    }
}

fn default_settings_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("duet-relay").join("config.toml"))
}

fn read_settings(explicit: Option<&Path>) -> Result<SettingsFile, ConfigError> {
    let (path, required) = match explicit {
        Some(path) => (path.to_path_buf(), true),
        None => match default_settings_path() {
            Some(path) => (path, false),
            None => return Ok(SettingsFile::default()),
        },
    };

    match std::fs::read_to_string(&path) {
        Ok(contents) => Ok(toml::from_str(&contents)?),
        Err(e) if !required && e.kind() == std::io::ErrorKind::NotFound => {
            Ok(SettingsFile::default())
        }
        Err(source) => Err(ConfigError::ReadFile { path, source }),
    }
}
