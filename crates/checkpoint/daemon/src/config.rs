//! Configuration for checkpointd

use checkpoint_engine::EngineConfig;
use checkpoint_types::{DeviceAssignment, Gate};
use serde::{Deserialize, Serialize};

/// Main daemon configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DaemonConfig {
    /// Correlation engine configuration
    #[serde(default)]
    pub engine: EngineConfig,

    /// Durable storage configuration
    #[serde(default)]
    pub storage: StorageConfig,

    /// Gate session store configuration
    #[serde(default)]
    pub session_store: SessionStoreConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Gates and devices seeded into storage at startup
    #[serde(default)]
    pub topology: TopologyConfig,
}

/// Storage configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum StorageConfig {
    /// In-memory storage (for development/testing)
    #[default]
    Memory,

    /// PostgreSQL storage
    Postgres {
        /// Connection URL
        url: String,

        /// Maximum connections in pool
        #[serde(default = "default_pool_size")]
        max_connections: u32,

        /// Connection timeout in seconds
        #[serde(default = "default_connection_timeout")]
        connect_timeout_secs: u64,
    },
}

/// Gate session store configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum SessionStoreConfig {
    /// Process-local sessions; only correct for a single engine instance
    #[default]
    Memory,

    /// Sessions shared through PostgreSQL
    Postgres {
        /// Connection URL; defaults to the storage pool
        #[serde(default)]
        url: Option<String>,
    },
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level or filter directive
    #[serde(default = "default_log_level")]
    pub level: String,

    /// JSON format
    #[serde(default)]
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

/// Reference data for the device directory and gate topology
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TopologyConfig {
    #[serde(default)]
    pub gates: Vec<Gate>,

    #[serde(default)]
    pub devices: Vec<DeviceAssignment>,
}

impl TopologyConfig {
    /// Devices bound to a gate that is not configured.
    pub fn dangling_devices(&self) -> Vec<&DeviceAssignment> {
        self.devices
            .iter()
            .filter(|d| !self.gates.iter().any(|g| g.id == d.gate_id))
            .collect()
    }
}

fn default_pool_size() -> u32 {
    10
}

fn default_connection_timeout() -> u64 {
    5
}

fn default_log_level() -> String {
    "info".to_string()
}

impl DaemonConfig {
    /// Load configuration: defaults, then the file if given, then
    /// `CHECKPOINT_` environment variables (`__` separates nested keys).
    pub fn load(path: Option<&str>) -> Result<Self, config::ConfigError> {
        let mut builder = config::Config::builder();

        builder = builder.add_source(config::Config::try_from(&DaemonConfig::default())?);

        if let Some(path) = path {
            builder = builder.add_source(config::File::with_name(path));
        }

        builder = builder.add_source(
            config::Environment::with_prefix("CHECKPOINT")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        builder.build()?.try_deserialize()
    }

    /// Sanity checks that deserialization cannot express.
    pub fn validate(&self) -> Result<(), String> {
        if self.engine.session.ttl_secs == 0 {
            return Err("engine.session.ttl_secs must be positive".to_string());
        }
        if let (StorageConfig::Memory, SessionStoreConfig::Postgres { url: None }) =
            (&self.storage, &self.session_store)
        {
            return Err("session_store.url is required when storage is in memory".to_string());
        }
        if let Some(device) = self.topology.dangling_devices().first() {
            return Err(format!(
                "{} is bound to unconfigured {}",
                device.device_id, device.gate_id
            ));
        }
        Ok(())
    }
}
