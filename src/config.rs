use crate::controller::ControllerState;
use crate::telemetry::{DEFAULT_PUBLISH_CAPACITY, DEFAULT_PUBLISH_MARGIN};
use alloc::string::String;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ControllerConfig {
    pub identity: String,
    pub version: String,
    /// Enables `read-period` and count-based (`Nx`) log periods.
    pub reader: bool,
    /// Compiled defaults, restored whenever stored state is unusable.
    pub defaults: ControllerState,
    pub read_period_min_ms: u32,
    pub publish_capacity: usize,
    pub publish_margin: usize,
    pub restart_delay_ms: u32,
    pub state_log_event: String,
    pub data_log_event: String,
    pub display_notice_ms: u32,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            identity: String::from("lablogger"),
            version: String::from(env!("CARGO_PKG_VERSION")),
            reader: true,
            defaults: ControllerState::default(),
            read_period_min_ms: 200,
            publish_capacity: DEFAULT_PUBLISH_CAPACITY,
            publish_margin: DEFAULT_PUBLISH_MARGIN,
            restart_delay_ms: 5_000,
            state_log_event: String::from("state-log"),
            data_log_event: String::from("data-log"),
            display_notice_ms: 3_000,
        }
    }
}

impl ControllerConfig {
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controller::LogMode;

    #[test]
    fn test_partial_json_keeps_defaults() {
        let config = ControllerConfig::from_json(
            r#"{"identity":"mfc-1","reader":false,"defaults":{"locked":true,"state_logging":true,"data_logging":true,"log_mode":"count","log_period":10,"read_period_ms":0}}"#,
        )
        .unwrap();
        assert_eq!(config.identity, "mfc-1");
        assert!(!config.reader);
        assert!(config.defaults.locked);
        assert_eq!(config.defaults.log_mode, LogMode::Count);
        assert_eq!(config.publish_capacity, DEFAULT_PUBLISH_CAPACITY);
        assert_eq!(config.state_log_event, "state-log");
    }
}
