use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use crate::error::SocketError;

// =============================================================================
// Socket config (figment-deserialized from defaults / config file / env vars)
// =============================================================================
//
//   socket.toml:     app_key = "abc123"
//                    cluster = "eu"
//                    [additional_auth_headers]
//                    X-App-Version = "1.2.0"
//
//   env var:         EVENT_SOCKET_APP_KEY=abc123
//                    EVENT_SOCKET_ADDITIONAL_AUTH_HEADERS__X-App-Version=1.2.0

const ENV_PREFIX: &str = "EVENT_SOCKET_";
pub const PROTOCOL_VERSION: u8 = 7;
const CLIENT_NAME: &str = "event-socket-rs";

/// Connection settings for the Pusher-protocol transport and the socket.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct SocketConfig {
    #[serde(default)]
    pub app_key: String,
    #[serde(default = "default_cluster")]
    pub cluster: String,
    /// Overrides the cluster-derived host (self-hosted servers, tests)
    #[serde(default)]
    pub host: Option<String>,
    #[serde(default)]
    pub port: Option<u16>,
    #[serde(default = "default_use_tls")]
    pub use_tls: bool,
    /// Endpoint that signs private channel subscriptions
    #[serde(default)]
    pub authentication_url: Option<String>,
    #[serde(default)]
    pub additional_auth_headers: BTreeMap<String, String>,
    /// Idle time after which the client pings the server
    #[serde(default = "default_activity_timeout_secs")]
    pub activity_timeout_secs: u64,
    /// Per-channel broadcast buffer
    #[serde(default = "default_message_capacity")]
    pub message_capacity: usize,
}

impl Default for SocketConfig {
    fn default() -> Self {
        Self {
            app_key: String::new(),
            cluster: default_cluster(),
            host: None,
            port: None,
            use_tls: default_use_tls(),
            authentication_url: None,
            additional_auth_headers: BTreeMap::new(),
            activity_timeout_secs: default_activity_timeout_secs(),
            message_capacity: default_message_capacity(),
        }
    }
}

fn default_cluster() -> String {
    "mt1".to_string()
}

fn default_use_tls() -> bool {
    true
}

fn default_activity_timeout_secs() -> u64 {
    120
}

fn default_message_capacity() -> usize {
    crate::socket::DEFAULT_MESSAGE_CAPACITY
}

/// Build a figment that layers: defaults → config file → EVENT_SOCKET_* env vars.
///
/// Env vars use double-underscore for nesting:
///   `EVENT_SOCKET_ADDITIONAL_AUTH_HEADERS__X-TENANT=acme`
pub fn figment(config_file: Option<&Path>) -> Figment {
    let mut figment = Figment::from(Serialized::defaults(SocketConfig::default()));
    if let Some(path) = config_file {
        figment = figment.merge(Toml::file(path));
    }
    figment.merge(Env::prefixed(ENV_PREFIX).split("__"))
}

impl SocketConfig {
    /// Load and validate the layered configuration.
    pub fn load(config_file: Option<&Path>) -> Result<Self, SocketError> {
        let config: SocketConfig = figment(config_file).extract()?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), SocketError> {
        if self.app_key.trim().is_empty() {
            return Err(SocketError::Config("app_key must not be empty".to_string()));
        }
        if self.message_capacity == 0 {
            return Err(SocketError::Config(
                "message_capacity must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    pub fn host(&self) -> String {
        self.host
            .clone()
            .unwrap_or_else(|| format!("ws-{}.pusher.com", self.cluster))
    }

    pub fn port(&self) -> u16 {
        self.port
            .unwrap_or(if self.use_tls { 443 } else { 80 })
    }

    pub fn activity_timeout(&self) -> Duration {
        Duration::from_secs(self.activity_timeout_secs.max(1))
    }

    /// The WebSocket endpoint for this app.
    pub fn ws_url(&self) -> String {
        let scheme = if self.use_tls { "wss" } else { "ws" };
        format!(
            "{scheme}://{}:{}/app/{}?protocol={PROTOCOL_VERSION}&client={CLIENT_NAME}&version={}",
            self.host(),
            self.port(),
            self.app_key,
            env!("CARGO_PKG_VERSION"),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // ── defaults ────────────────────────────────────────────────────────

    #[test]
    fn test_defaults() {
        let d = SocketConfig::default();
        assert_eq!(d.cluster, "mt1");
        assert!(d.use_tls);
        assert_eq!(d.activity_timeout_secs, 120);
        assert_eq!(d.message_capacity, 256);
        assert!(d.authentication_url.is_none());
    }

    #[test]
    fn test_default_config_is_invalid_without_key() {
        let err = SocketConfig::default().validate().unwrap_err();
        assert_eq!(err.error_code(), "config_error");
    }

    #[test]
    fn test_zero_capacity_rejected() {
        let config = SocketConfig {
            app_key: "key".into(),
            message_capacity: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    // ── ws_url ──────────────────────────────────────────────────────────

    #[test]
    fn test_ws_url_from_cluster() {
        let config = SocketConfig {
            app_key: "abc".into(),
            cluster: "eu".into(),
            ..Default::default()
        };
        let url = config.ws_url();
        assert!(url.starts_with("wss://ws-eu.pusher.com:443/app/abc?protocol=7"));
        assert!(url.contains("client=event-socket-rs"));
    }

    #[test]
    fn test_ws_url_with_host_override() {
        let config = SocketConfig {
            app_key: "abc".into(),
            host: Some("127.0.0.1".into()),
            port: Some(6001),
            use_tls: false,
            ..Default::default()
        };
        assert!(config.ws_url().starts_with("ws://127.0.0.1:6001/app/abc?"));
    }

    // ── figment ─────────────────────────────────────────────────────────

    #[test]
    fn test_figment_defaults_without_file() {
        let config: SocketConfig = figment(None).extract().unwrap();
        assert_eq!(config.cluster, "mt1");
    }

    #[test]
    fn test_toml_file_overrides_defaults() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("socket.toml");
        std::fs::write(
            &path,
            "app_key = \"abc\"\ncluster = \"ap2\"\nauthentication_url = \"https://api.example.com/broadcasting/auth\"\n\n[additional_auth_headers]\nX-App-Version = \"1.2.0\"\n",
        )
        .unwrap();

        let config: SocketConfig = figment(Some(&path)).extract().unwrap();
        assert_eq!(config.app_key, "abc");
        assert_eq!(config.cluster, "ap2");
        assert_eq!(
            config.authentication_url.as_deref(),
            Some("https://api.example.com/broadcasting/auth")
        );
        assert_eq!(config.additional_auth_headers["X-App-Version"], "1.2.0");
        assert_eq!(config.message_capacity, 256);
    }

    #[test]
    fn test_missing_file_falls_back_to_defaults() {
        let tmp = tempfile::tempdir().unwrap();
        let config: SocketConfig = figment(Some(&tmp.path().join("absent.toml")))
            .extract()
            .unwrap();
        assert_eq!(config, SocketConfig::default());
    }

    #[test]
    fn test_load_validates() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("socket.toml");
        std::fs::write(&path, "app_key = \"\"\n").unwrap();
        assert!(SocketConfig::load(Some(&path)).is_err());
    }
}
