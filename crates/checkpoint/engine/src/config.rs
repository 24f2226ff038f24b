//! Configuration for the correlation engine

use checkpoint_types::GateId;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Engine configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Gate session configuration
    #[serde(default)]
    pub session: SessionConfig,

    /// Resolution dispatch configuration
    #[serde(default)]
    pub dispatch: DispatchConfig,
}

/// Gate session configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionConfig {
    /// How long a gate session stays open, in seconds
    #[serde(default = "default_session_ttl")]
    pub ttl_secs: u64,

    /// How many device reports a new session expects
    #[serde(default)]
    pub expected_devices: ExpectedDevices,

    /// Prefix prepended to every session key, for sharing one store
    #[serde(default)]
    pub key_prefix: String,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            ttl_secs: default_session_ttl(),
            expected_devices: ExpectedDevices::default(),
            key_prefix: String::new(),
        }
    }
}

impl SessionConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }

    /// Key holding the active gate event id of a gate
    pub fn active_gate_key(&self, gate_id: GateId) -> String {
        format!("{}active_gate:{}", self.key_prefix, gate_id.get())
    }

    /// Key holding the remaining device count of a gate's session
    pub fn active_gate_count_key(&self, gate_id: GateId) -> String {
        format!("{}active_gate_count:{}", self.key_prefix, gate_id.get())
    }
}

/// Device quota heuristic for new sessions
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "lowercase")]
pub enum ExpectedDevices {
    /// Number of cameras and scales bound to the gate
    #[default]
    Configured,

    /// Same quota for every gate
    Fixed { count: u32 },
}

/// Resolution dispatch configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DispatchConfig {
    #[serde(default)]
    pub mode: DispatchMode,
}

/// Where permit resolution runs relative to the triggering event
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DispatchMode {
    /// Spawned task, the caller does not wait
    #[default]
    Background,

    /// Awaited before the correlator returns
    Inline,
}

fn default_session_ttl() -> u64 {
    15
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = EngineConfig::default();
        assert_eq!(config.session.ttl(), Duration::from_secs(15));
        assert_eq!(config.session.expected_devices, ExpectedDevices::Configured);
        assert_eq!(config.dispatch.mode, DispatchMode::Background);
    }

    #[test]
    fn test_session_keys() {
        let mut config = SessionConfig::default();
        assert_eq!(config.active_gate_key(GateId::new(3)), "active_gate:3");
        assert_eq!(
            config.active_gate_count_key(GateId::new(3)),
            "active_gate_count:3"
        );

        config.key_prefix = "site-a:".to_string();
        assert_eq!(config.active_gate_key(GateId::new(3)), "site-a:active_gate:3");
    }

    #[test]
    fn test_partial_config_fills_defaults() {
        let config: EngineConfig = serde_json::from_str(
            r#"{"session": {"expected_devices": {"mode": "fixed", "count": 3}}}"#,
        )
        .unwrap();
        assert_eq!(config.session.ttl_secs, 15);
        assert_eq!(
            config.session.expected_devices,
            ExpectedDevices::Fixed { count: 3 }
        );
    }
}
