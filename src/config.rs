use std::env;

use log::warn;

use crate::protocol::WireFormat;

pub const DEFAULT_API_BASE_URL: &str = "http://localhost:8000";
pub const DEFAULT_DATABASE_URL: &str = "./chat.db";
pub const DEFAULT_HISTORY_LIMIT: u32 = 50;

#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub api_base_url: String,
    pub ws_base_url: String,
    pub database_url: String,
    pub history_limit: u32,
    pub wire_format: WireFormat,
    /// Counterpart user id. Unset means the other seeded account.
    pub peer_user_id: Option<String>,
    pub peer_name: Option<String>,
}

impl Config {
    /// Reads the process environment. Call `dotenv().ok()` first to pick up a
    /// `.env` file.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let api_base_url = lookup("API_BASE_URL")
            .unwrap_or_else(|| DEFAULT_API_BASE_URL.to_string())
            .trim_end_matches('/')
            .to_string();
        let ws_base_url = lookup("WS_BASE_URL").unwrap_or_else(|| ws_url_for(&api_base_url));
        let database_url = lookup("DATABASE_URL").unwrap_or_else(|| DEFAULT_DATABASE_URL.to_string());

        let history_limit = match lookup("HISTORY_LIMIT") {
            Some(raw) => raw.parse().unwrap_or_else(|_| {
                warn!("HISTORY_LIMIT={:?} is not a number, using {}", raw, DEFAULT_HISTORY_LIMIT);
                DEFAULT_HISTORY_LIMIT
            }),
            None => DEFAULT_HISTORY_LIMIT,
        };

        let wire_format = match lookup("WIRE_FORMAT") {
            Some(raw) => WireFormat::parse(&raw).unwrap_or_else(|| {
                warn!("unknown WIRE_FORMAT={:?}, using tagged frames", raw);
                WireFormat::Tagged
            }),
            None => WireFormat::Tagged,
        };

        Config {
            api_base_url,
            ws_base_url,
            database_url,
            history_limit,
            wire_format,
            peer_user_id: lookup("PEER_USER_ID"),
            peer_name: lookup("PEER_NAME"),
        }
    }
}

/// `http://host` -> `ws://host`, `https://host` -> `wss://host`.
fn ws_url_for(api_base_url: &str) -> String {
    if let Some(rest) = api_base_url.strip_prefix("https://") {
        format!("wss://{rest}")
    } else if let Some(rest) = api_base_url.strip_prefix("http://") {
        format!("ws://{rest}")
    } else {
        api_base_url.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config_with(vars: &[(&str, &str)]) -> Config {
        let vars: HashMap<String, String> = vars.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        Config::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn test_defaults() {
        let config = config_with(&[]);
        assert_eq!(config.api_base_url, "http://localhost:8000");
        assert_eq!(config.ws_base_url, "ws://localhost:8000");
        assert_eq!(config.database_url, "./chat.db");
        assert_eq!(config.history_limit, 50);
        assert_eq!(config.wire_format, WireFormat::Tagged);
        assert_eq!(config.peer_user_id, None);
        assert_eq!(config.peer_name, None);
    }

    #[test]
    fn test_ws_url_follows_api_scheme() {
        let config = config_with(&[("API_BASE_URL", "https://chat.example.com/")]);
        assert_eq!(config.api_base_url, "https://chat.example.com");
        assert_eq!(config.ws_base_url, "wss://chat.example.com");
    }

    #[test]
    fn test_bad_values_fall_back() {
        let config = config_with(&[("HISTORY_LIMIT", "lots"), ("WIRE_FORMAT", "xml")]);
        assert_eq!(config.history_limit, 50);
        assert_eq!(config.wire_format, WireFormat::Tagged);

        let config = config_with(&[("HISTORY_LIMIT", "20"), ("WIRE_FORMAT", "LEGACY")]);
        assert_eq!(config.history_limit, 20);
        assert_eq!(config.wire_format, WireFormat::Legacy);
    }
}
