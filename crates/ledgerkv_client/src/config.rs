//! Configuration for connections and sessions.

use crate::error::{ClientError, ClientResult};
use ledgerkv_protocol::HmacSigner;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Address of one replica in the replica set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplicaEndpoint {
    /// Replica identifier.
    pub id: String,
    /// Base URL, e.g. `http://127.0.0.1:6001`.
    pub endpoint: String,
}

impl ReplicaEndpoint {
    /// Creates a replica endpoint.
    pub fn new(id: impl Into<String>, endpoint: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            endpoint: endpoint.into(),
        }
    }
}

/// Configuration for the connection to a replica set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionConfig {
    /// Replicas, in preferred routing order.
    pub replica_set: Vec<ReplicaEndpoint>,
    /// Root CA certificates handed to the HTTP client.
    pub root_cas: Vec<PathBuf>,
    /// Per-request timeout handed to the HTTP client.
    #[serde(rename = "request_timeout_ms", with = "duration_ms")]
    pub request_timeout: Duration,
}

impl ConnectionConfig {
    /// Creates a connection configuration for a replica set.
    pub fn new(replica_set: Vec<ReplicaEndpoint>) -> Self {
        Self {
            replica_set,
            ..Self::default()
        }
    }

    /// Adds a root CA certificate path.
    pub fn with_root_ca(mut self, path: impl Into<PathBuf>) -> Self {
        self.root_cas.push(path.into());
        self
    }

    /// Sets the per-request timeout.
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Checks the configuration.
    pub fn validate(&self) -> ClientResult<()> {
        if self.replica_set.is_empty() {
            return Err(ClientError::Config("replica set is empty".into()));
        }
        if let Some(replica) = self.replica_set.iter().find(|r| r.endpoint.is_empty()) {
            return Err(ClientError::Config(format!(
                "replica {} has no endpoint",
                replica.id
            )));
        }
        Ok(())
    }
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            replica_set: Vec::new(),
            root_cas: Vec::new(),
            request_timeout: Duration::from_secs(30),
        }
    }
}

/// Cadence and bound of receipt polling.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PollConfig {
    /// Delay between two receipt lookups.
    #[serde(rename = "interval_ms", with = "duration_ms")]
    pub interval: Duration,
    /// Overall wait before giving up.
    #[serde(rename = "timeout_ms", with = "duration_ms")]
    pub timeout: Duration,
}

impl PollConfig {
    /// Creates a poll configuration.
    pub fn new(interval: Duration, timeout: Duration) -> Self {
        Self { interval, timeout }
    }

    /// Sets the poll interval.
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Sets the overall timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_millis(10),
            timeout: Duration::from_secs(5),
        }
    }
}

/// Configuration for a session.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Receipt polling used by synchronous commits and `await_receipt`.
    pub poll: PollConfig,
}

impl SessionConfig {
    /// Creates a session configuration with default polling.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the receipt polling configuration.
    pub fn with_poll(mut self, poll: PollConfig) -> Self {
        self.poll = poll;
        self
    }

    /// Sets how long a synchronous commit waits for its receipt.
    pub fn with_tx_timeout(mut self, timeout: Duration) -> Self {
        self.poll.timeout = timeout;
        self
    }
}

/// Identity of the session user.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct UserConfig {
    /// User id.
    pub user_id: String,
    /// File holding the user's signing key.
    pub key_path: PathBuf,
}

impl UserConfig {
    /// Creates a user configuration.
    pub fn new(user_id: impl Into<String>, key_path: impl Into<PathBuf>) -> Self {
        Self {
            user_id: user_id.into(),
            key_path: key_path.into(),
        }
    }

    /// Reads the key file and builds a signer for the user.
    pub fn load_signer(&self) -> ClientResult<HmacSigner> {
        if self.user_id.is_empty() {
            return Err(ClientError::Config("user id is empty".into()));
        }
        let key = std::fs::read(&self.key_path).map_err(|e| {
            ClientError::Config(format!(
                "cannot read key for {} from {}: {}",
                self.user_id,
                self.key_path.display(),
                e
            ))
        })?;
        Ok(HmacSigner::new(self.user_id.clone(), key))
    }
}

/// Complete client configuration, loadable from a JSON file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Replica set connection.
    pub connection: ConnectionConfig,
    /// Session behaviour.
    pub session: SessionConfig,
    /// Session user.
    pub user: UserConfig,
}

impl ClientConfig {
    /// Parses a configuration from JSON text.
    pub fn from_json_str(text: &str) -> ClientResult<Self> {
        serde_json::from_str(text).map_err(|e| ClientError::Config(e.to_string()))
    }

    /// Loads a configuration from a JSON file.
    pub fn load(path: &Path) -> ClientResult<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            ClientError::Config(format!("cannot read {}: {}", path.display(), e))
        })?;
        Self::from_json_str(&text)
    }
}

mod duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(u64::try_from(value.as_millis()).unwrap_or(u64::MAX))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn poll_defaults() {
        let poll = PollConfig::default();
        assert_eq!(poll.interval, Duration::from_millis(10));
        assert_eq!(poll.timeout, Duration::from_secs(5));
    }

    #[test]
    fn session_config_builder() {
        let config = SessionConfig::new()
            .with_poll(PollConfig::default().with_interval(Duration::from_millis(2)))
            .with_tx_timeout(Duration::from_millis(300));

        assert_eq!(config.poll.interval, Duration::from_millis(2));
        assert_eq!(config.poll.timeout, Duration::from_millis(300));
    }

    #[test]
    fn connection_validation() {
        assert!(ConnectionConfig::default().validate().is_err());

        let config = ConnectionConfig::new(vec![ReplicaEndpoint::new("node1", "")]);
        assert!(matches!(config.validate(), Err(ClientError::Config(_))));

        let config =
            ConnectionConfig::new(vec![ReplicaEndpoint::new("node1", "http://127.0.0.1:6001")])
                .with_request_timeout(Duration::from_secs(2));
        assert!(config.validate().is_ok());
        assert_eq!(config.request_timeout, Duration::from_secs(2));
    }

    #[test]
    fn parse_json_config() {
        let text = r#"{
            "connection": {
                "replica_set": [{"id": "node1", "endpoint": "http://127.0.0.1:6001"}],
                "request_timeout_ms": 1500
            },
            "session": {"poll": {"interval_ms": 20, "timeout_ms": 2000}},
            "user": {"user_id": "alice", "key_path": "crypto/alice/alice.key"}
        }"#;

        let config = ClientConfig::from_json_str(text).unwrap();
        assert_eq!(config.connection.replica_set.len(), 1);
        assert_eq!(config.connection.request_timeout, Duration::from_millis(1500));
        assert!(config.connection.root_cas.is_empty());
        assert_eq!(config.session.poll.interval, Duration::from_millis(20));
        assert_eq!(config.session.poll.timeout, Duration::from_secs(2));
        assert_eq!(config.user.user_id, "alice");
    }

    #[test]
    fn missing_sections_use_defaults() {
        let config = ClientConfig::from_json_str("{}").unwrap();
        assert_eq!(config.session.poll, PollConfig::default());
        assert_eq!(config.connection.request_timeout, Duration::from_secs(30));
    }

    #[test]
    fn malformed_json_is_config_error() {
        let result = ClientConfig::from_json_str("{ not json");
        assert!(matches!(result, Err(ClientError::Config(_))));
    }

    #[test]
    fn signer_requires_readable_key() {
        let user = UserConfig::new("alice", "/nonexistent/alice.key");
        assert!(matches!(user.load_signer(), Err(ClientError::Config(_))));
    }
}
