//! Logger Configuration
//!
//! Layered as built-in defaults, then an optional TOML file, then
//! `OBD_LOGGER__*` environment variables (`__` separates nested keys, e.g.
//! `OBD_LOGGER__ADAPTER__PORT=/dev/ttyUSB0`).

use config::{ConfigError, Environment, File, FileFormat};
use obd_poller::{CatalogEntry, CatalogSource};
use obd_protocol::{
    CommandRegistry, ConnectOptions, Decoder, DiagnosticCommand, ObdProtocol, Unit,
};
use obd_storage::TIMESTAMP_KEY;
use serde::Deserialize;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const ENV_PREFIX: &str = "OBD_LOGGER";

/// Longest accepted per-query timeout
pub const MAX_TIMEOUT_SECS: f64 = 3600.0;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Directory holding the log file; created if missing
    pub data_dir: PathBuf,
    pub log_file: String,
    pub poll_interval_ms: u64,
    /// `fsync` each record in addition to flushing it
    pub sync_data: bool,
    /// Use the built-in simulated vehicle instead of a serial adapter
    pub simulate: bool,
    pub adapter: AdapterConfig,
    pub catalog: CatalogConfig,
    pub manufacturer_commands: Vec<ManufacturerCommandConfig>,
    pub logging: LoggingConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("obd_logs"),
            log_file: "all_obd.jsonl".to_string(),
            poll_interval_ms: 1000,
            sync_data: false,
            simulate: false,
            adapter: AdapterConfig::default(),
            catalog: CatalogConfig::default(),
            manufacturer_commands: Vec::new(),
            logging: LoggingConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AdapterConfig {
    /// Serial device; scanned when unset
    pub port: Option<String>,
    pub baud_rate: u32,
    pub fast: bool,
    pub timeout_secs: f64,
    /// `auto` or an ELM327 protocol number
    pub protocol: String,
}

impl Default for AdapterConfig {
    fn default() -> Self {
        Self {
            port: None,
            baud_rate: 38400,
            fast: false,
            timeout_secs: 1.0,
            protocol: "auto".to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CatalogMode {
    Fixed,
    Discovered,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CatalogConfig {
    pub mode: CatalogMode,
    /// Field name to command name, used in fixed mode
    pub watch: Vec<WatchEntry>,
}

impl Default for CatalogConfig {
    fn default() -> Self {
        let watch = [
            ("rpm", "RPM"),
            ("speed_kph", "SPEED"),
            ("throttle_pos", "THROTTLE_POS"),
            ("coolant_temp", "COOLANT_TEMP"),
            ("dtc", "GET_DTC"),
        ]
        .into_iter()
        .map(|(key, command)| WatchEntry {
            key: key.to_string(),
            command: command.to_string(),
        })
        .collect();

        Self {
            mode: CatalogMode::Discovered,
            watch,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct WatchEntry {
    pub key: String,
    pub command: String,
}

/// Mode 22 data identifier to poll alongside the standard commands
#[derive(Debug, Clone, Deserialize)]
pub struct ManufacturerCommandConfig {
    pub name: String,
    pub did: u16,
    /// Bytes of the reply holding the value; raw bytes are logged when unset
    pub bytes: Option<u8>,
    pub scale: Option<f64>,
    #[serde(default)]
    pub offset: f64,
    pub unit: Option<String>,
}

impl ManufacturerCommandConfig {
    fn to_command(&self) -> Result<DiagnosticCommand, ConfigError> {
        let decoder = match self.scale {
            Some(scale) => {
                let unit = match &self.unit {
                    Some(name) => Unit::from_name(name).ok_or_else(|| {
                        ConfigError::Message(format!(
                            "unknown unit {:?} for manufacturer command {}",
                            name, self.name
                        ))
                    })?,
                    None => Unit::Count,
                };
                Decoder::Linear {
                    bytes: self.bytes.unwrap_or(2),
                    scale,
                    offset: self.offset,
                    unit,
                }
            }
            None => Decoder::Raw,
        };
        Ok(DiagnosticCommand::manufacturer(self.name.clone(), self.did, decoder))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub format: LogFormat,
}

impl AppConfig {
    /// Load from an optional TOML file and the process environment
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        Self::load_from(path, Environment::with_prefix(ENV_PREFIX))
    }

    fn load_from(path: Option<&Path>, env: Environment) -> Result<Self, ConfigError> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(File::new(&path.to_string_lossy(), FileFormat::Toml));
        }
        let config: AppConfig = builder
            .add_source(env.separator("__").try_parsing(true))
            .build()?
            .try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.log_file.trim().is_empty() {
            return Err(ConfigError::Message("log_file must not be empty".to_string()));
        }
        let timeout = self.adapter.timeout_secs;
        if !timeout.is_finite() || timeout <= 0.0 || timeout > MAX_TIMEOUT_SECS {
            return Err(ConfigError::Message(format!(
                "adapter.timeout_secs must be in (0, {}]",
                MAX_TIMEOUT_SECS
            )));
        }
        if self.catalog.mode == CatalogMode::Fixed {
            if self.catalog.watch.is_empty() {
                return Err(ConfigError::Message(
                    "catalog.watch must list at least one command in fixed mode".to_string(),
                ));
            }
            let mut keys = HashSet::new();
            for entry in &self.catalog.watch {
                let key = entry.key.as_str();
                if key.trim().is_empty() || key == TIMESTAMP_KEY {
                    return Err(ConfigError::Message(format!(
                        "catalog.watch key {:?} is reserved or empty",
                        key
                    )));
                }
                if !keys.insert(key) {
                    return Err(ConfigError::Message(format!(
                        "catalog.watch key {:?} is listed twice",
                        key
                    )));
                }
            }
        }
        Ok(())
    }

    pub fn log_path(&self) -> PathBuf {
        self.data_dir.join(&self.log_file)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn connect_options(&self) -> Result<ConnectOptions, ConfigError> {
        let protocol: ObdProtocol = self
            .adapter
            .protocol
            .parse()
            .map_err(|e| ConfigError::Message(format!("adapter.protocol: {}", e)))?;

        Ok(ConnectOptions {
            port: self.adapter.port.clone(),
            baud_rate: self.adapter.baud_rate,
            fast: self.adapter.fast,
            timeout: Duration::from_secs_f64(self.adapter.timeout_secs),
            protocol,
        })
    }

    /// Standard commands plus the configured manufacturer commands
    pub fn registry(&self) -> Result<CommandRegistry, ConfigError> {
        let mut registry = CommandRegistry::standard();
        let extra = self
            .manufacturer_commands
            .iter()
            .map(ManufacturerCommandConfig::to_command)
            .collect::<Result<Vec<_>, _>>()?;
        registry.extend(extra);
        Ok(registry)
    }

    /// Catalog source; watch entries must name commands known to `registry`
    pub fn catalog_source(&self, registry: &CommandRegistry) -> Result<CatalogSource, ConfigError> {
        match self.catalog.mode {
            CatalogMode::Discovered => Ok(CatalogSource::Discovered),
            CatalogMode::Fixed => self
                .catalog
                .watch
                .iter()
                .map(|entry| {
                    registry
                        .lookup(&entry.command)
                        .map(|command| CatalogEntry::new(entry.key.clone(), command.clone()))
                        .ok_or_else(|| {
                            ConfigError::Message(format!(
                                "unknown command {:?} for field {:?}",
                                entry.command, entry.key
                            ))
                        })
                })
                .collect::<Result<Vec<_>, _>>()
                .map(CatalogSource::Fixed),
        }
    }
}
