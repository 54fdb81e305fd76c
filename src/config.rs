use std::path::PathBuf;

use serde::{Deserialize, Serialize};

// Default configuration values
const DEFAULT_API_BASE_URL: &str = "http://localhost:8080/api";
const DEFAULT_CHANNEL_URL: &str = "ws://localhost:8080/ws";
const DEFAULT_DATA_DIR: &str = ".campuslink";

/// Lookahead window before expiry in which a token counts as refresh-due
pub const REFRESH_LOOKAHEAD_SECS: i64 = 3_600;

/// Bound on how long a role gate waits for the primary role to resolve
pub const ROLE_WAIT_MS: u64 = 5_000;

/// Fixed delay between channel reconnection attempts
pub const RECONNECT_DELAY_MS: u64 = 5_000;

/// Heartbeat cadence on the session channel, both directions
pub const HEARTBEAT_INTERVAL_MS: u64 = 4_000;

/// Client configuration for the session core.
///
/// Timing values above are part of the backend contract and are
/// deliberately not configurable here.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Base URL all pipeline requests are resolved against
    #[serde(default = "default_api_base_url")]
    pub api_base_url: String,
    /// WebSocket endpoint for the session channel
    #[serde(default = "default_channel_url")]
    pub channel_url: String,
    /// Directory holding the persisted session store
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            api_base_url: default_api_base_url(),
            channel_url: default_channel_url(),
            data_dir: default_data_dir(),
        }
    }
}

impl ClientConfig {
    /// Load configuration from the environment, honoring a `.env` file
    /// if one is present.
    pub fn load() -> Self {
        let _ = dotenvy::dotenv();
        Self::default()
    }
}

// Default functions
fn default_api_base_url() -> String {
    std::env::var("CAMPUSLINK_API_URL").unwrap_or_else(|_| DEFAULT_API_BASE_URL.to_string())
}

fn default_channel_url() -> String {
    std::env::var("CAMPUSLINK_CHANNEL_URL").unwrap_or_else(|_| DEFAULT_CHANNEL_URL.to_string())
}

fn default_data_dir() -> PathBuf {
    std::env::var("CAMPUSLINK_DATA_DIR")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from(DEFAULT_DATA_DIR))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ClientConfig::default();
        assert!(config.api_base_url.starts_with("http"));
        assert!(config.channel_url.starts_with("ws"));
    }

    #[test]
    fn test_deserialize_partial() {
        let config: ClientConfig =
            serde_json::from_str(r#"{"api_base_url":"https://school.example/api"}"#).unwrap();
        assert_eq!(config.api_base_url, "https://school.example/api");
        assert_eq!(config.channel_url, default_channel_url());
    }
}
