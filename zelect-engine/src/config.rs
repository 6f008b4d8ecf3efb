use serde::{Deserialize, Serialize};
use std::time::Duration;
use zelect_core::{ElectionError, ElectionPath, Result};

/// Settings shared by the registrar, the engine and the elector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ElectionConfig {
    /// Coordination-service endpoint, `host:port`
    pub endpoint: String,
    #[serde(rename = "session_timeout_ms", with = "duration_ms")]
    pub session_timeout: Duration,
    /// Parent path under which candidates register
    pub election_path: String,
    /// Embed a per-registration GUID in the node name
    pub protected: bool,
    /// Rank the first fetched child list before blocking on its watch
    pub evaluate_before_wait: bool,
    /// Create missing components of `election_path` before registering
    pub bootstrap: bool,
}

impl Default for ElectionConfig {
    fn default() -> Self {
        Self {
            endpoint: "localhost:2181".to_string(),
            session_timeout: Duration::from_secs(1),
            election_path: "/election".to_string(),
            protected: true,
            evaluate_before_wait: true,
            bootstrap: true,
        }
    }
}

impl ElectionConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parses a JSON document; absent fields keep their defaults.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)
            .map_err(|e| ElectionError::config(format!("invalid election config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    pub fn with_session_timeout(mut self, timeout: Duration) -> Self {
        self.session_timeout = timeout;
        self
    }

    pub fn with_election_path(mut self, path: impl Into<String>) -> Self {
        self.election_path = path.into();
        self
    }

    pub fn with_protected(mut self, protected: bool) -> Self {
        self.protected = protected;
        self
    }

    pub fn with_evaluate_before_wait(mut self, evaluate: bool) -> Self {
        self.evaluate_before_wait = evaluate;
        self
    }

    pub fn with_bootstrap(mut self, bootstrap: bool) -> Self {
        self.bootstrap = bootstrap;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.endpoint.trim().is_empty() {
            return Err(ElectionError::config("endpoint must not be empty"));
        }
        if self.session_timeout.is_zero() {
            return Err(ElectionError::config("session timeout must be positive"));
        }
        self.path()?;
        Ok(())
    }

    /// The election path, validated.
    pub fn path(&self) -> Result<ElectionPath> {
        ElectionPath::new(self.election_path.as_str())
            .map_err(|e| ElectionError::config(e.to_string()))
    }
}

mod duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(duration.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_defaults() {
        let config = ElectionConfig::default();
        assert_eq!(config.endpoint, "localhost:2181");
        assert_eq!(config.session_timeout, Duration::from_secs(1));
        assert_eq!(config.election_path, "/election");
        assert!(config.protected);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_builder() {
        let config = ElectionConfig::new()
            .with_endpoint("zk-1:2181")
            .with_session_timeout(Duration::from_millis(250))
            .with_election_path("/jobs/election")
            .with_protected(false)
            .with_evaluate_before_wait(false)
            .with_bootstrap(false);

        assert_eq!(config.endpoint, "zk-1:2181");
        assert_eq!(config.path().unwrap().as_str(), "/jobs/election");
        assert!(!config.protected);
        assert!(!config.evaluate_before_wait);
        assert!(!config.bootstrap);
    }

    #[test]
    fn test_config_from_json() {
        let config = ElectionConfig::from_json_str(
            r#"{"endpoint": "zk-2:2181", "session_timeout_ms": 4000}"#,
        )
        .unwrap();
        assert_eq!(config.endpoint, "zk-2:2181");
        assert_eq!(config.session_timeout, Duration::from_secs(4));
        assert_eq!(config.election_path, "/election");
    }

    #[test]
    fn test_config_rejects_bad_values() {
        assert!(ElectionConfig::from_json_str(r#"{"election_path": "election"}"#).is_err());
        assert!(ElectionConfig::from_json_str(r#"{"session_timeout_ms": 0}"#).is_err());
        assert!(ElectionConfig::from_json_str("not json").is_err());
        assert!(ElectionConfig::new().with_endpoint(" ").validate().is_err());
    }
}
