//! Test configuration builder for creating test setups quickly.

use std::time::Duration;

use crate::config::{Configuration, LayoutConfig, StorageConfig};

/// Builder for configurations suitable for tests.
///
/// Starts from in-memory storage so nothing touches the filesystem unless a
/// test asks for it.
#[derive(Debug, Clone)]
pub struct TestConfigBuilder {
    config: Configuration,
}

impl Default for TestConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl TestConfigBuilder {
    /// In-memory storage, a fixed bucket name, short compaction interval.
    pub fn new() -> Self {
        let mut config = Configuration::default();
        config.storage = StorageConfig {
            dsn: "memory://".to_string(),
            bucket: Some("test-bucket".to_string()),
        };
        config.compactor.tick_interval = Duration::from_millis(50);
        config.acceptor.listen_addr = "127.0.0.1:0".to_string();

        Self { config }
    }

    /// Store objects under a local directory instead of memory.
    pub fn with_local_storage(mut self, dir: &std::path::Path) -> Self {
        self.config.storage.dsn = format!("file://{}", dir.to_string_lossy());
        self
    }

    pub fn with_storage_dsn(mut self, dsn: impl Into<String>) -> Self {
        self.config.storage.dsn = dsn.into();
        self
    }

    pub fn with_bucket(mut self, bucket: impl Into<String>) -> Self {
        self.config.storage.bucket = Some(bucket.into());
        self
    }

    pub fn with_layout(mut self, canonical_key: &str, pending_prefix: &str, lease_key: &str) -> Self {
        self.config.layout = LayoutConfig {
            canonical_key: canonical_key.to_string(),
            pending_prefix: pending_prefix.to_string(),
            lease_key: lease_key.to_string(),
        };
        self
    }

    pub fn with_auth_token(mut self, token: impl Into<String>) -> Self {
        self.config.acceptor.auth_token = Some(token.into());
        self
    }

    pub fn with_tick_interval(mut self, interval: Duration) -> Self {
        self.config.compactor.tick_interval = interval;
        self
    }

    pub fn without_compactor(mut self) -> Self {
        self.config.compactor.enabled = false;
        self
    }

    pub fn without_lease(mut self) -> Self {
        self.config.compactor.lease.enabled = false;
        self
    }

    pub fn build(self) -> Configuration {
        self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_defaults_to_memory() {
        let config = TestConfigBuilder::new().build();

        assert_eq!(config.storage.dsn, "memory://");
        assert_eq!(config.resolve_bucket().as_deref(), Some("test-bucket"));
        assert!(config.compactor.lease.enabled);
        assert_eq!(config.acceptor.auth_token, None);
    }

    #[test]
    fn test_builder_overrides() {
        let config = TestConfigBuilder::new()
            .with_auth_token("secret")
            .with_layout("canon.json", "incoming", "lock")
            .without_lease()
            .without_compactor()
            .build();

        assert_eq!(config.acceptor.auth_token.as_deref(), Some("secret"));
        assert_eq!(config.layout.to_layout().pending_key("https://a"), "incoming/https___a-44f833239a3830c0.json.gz");
        assert!(!config.compactor.lease.enabled);
        assert!(!config.compactor.enabled);
    }
}
