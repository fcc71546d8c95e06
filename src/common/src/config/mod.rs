use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};

use staging::StagingLayout;
use staging::layout::{DEFAULT_CANONICAL_KEY, DEFAULT_LEASE_KEY, DEFAULT_PENDING_PREFIX};

pub const CONFIG_FILE: &str = "archivist.toml";
pub const ENV_PREFIX: &str = "ARCHIVIST__";

/// Fallback for `storage.bucket`.
pub const BUCKET_ENV: &str = "BUCKET_NAME";
/// Fallback for `acceptor.auth_token`.
pub const AUTH_TOKEN_ENV: &str = "AUTH_TOKEN";

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct StorageConfig {
    /// `memory://`, `file:///path` or `s3://[key:secret@]host[:port][/bucket]`
    pub dsn: String,
    /// Overrides the bucket named in an s3 DSN
    #[serde(default)]
    pub bucket: Option<String>,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            dsn: String::from("file:///.data/archivist"),
            bucket: None,
        }
    }
}

/// Object keys inside the bucket.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct LayoutConfig {
    pub canonical_key: String,
    pub pending_prefix: String,
    pub lease_key: String,
}

impl Default for LayoutConfig {
    fn default() -> Self {
        Self {
            canonical_key: DEFAULT_CANONICAL_KEY.to_string(),
            pending_prefix: DEFAULT_PENDING_PREFIX.to_string(),
            lease_key: DEFAULT_LEASE_KEY.to_string(),
        }
    }
}

impl LayoutConfig {
    pub fn to_layout(&self) -> StagingLayout {
        StagingLayout::new(&self.canonical_key, &self.pending_prefix, &self.lease_key)
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct LeaseConfig {
    /// Disable only when the scheduler already guarantees one compactor at a time
    pub enabled: bool,
    /// How long a lease stays valid if its holder never releases it
    #[serde(with = "humantime_serde")]
    pub ttl: Duration,
}

impl Default for LeaseConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            ttl: staging::DEFAULT_LEASE_TTL,
        }
    }
}

impl LeaseConfig {
    /// Reject TTLs a lease record cannot represent.
    pub fn check_ttl(&self) -> anyhow::Result<()> {
        if !self.enabled {
            return Ok(());
        }
        if self.ttl.is_zero() {
            anyhow::bail!("compactor.lease.ttl must be greater than zero");
        }
        if self.ttl > staging::MAX_LEASE_TTL {
            anyhow::bail!(
                "compactor.lease.ttl {:?} exceeds the maximum of {:?}",
                self.ttl,
                staging::MAX_LEASE_TTL
            );
        }
        Ok(())
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct CompactorConfig {
    /// Run the compaction timer in the monolithic binary
    pub enabled: bool,
    #[serde(with = "humantime_serde")]
    pub tick_interval: Duration,
    #[serde(default)]
    pub lease: LeaseConfig,
}

impl Default for CompactorConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            tick_interval: Duration::from_secs(5 * 60),
            lease: LeaseConfig::default(),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct AcceptorConfig {
    pub listen_addr: String,
    /// Shared token for submissions. Without one, requests are not checked.
    #[serde(default)]
    pub auth_token: Option<String>,
    pub cors_allow_origin: String,
}

impl Default for AcceptorConfig {
    fn default() -> Self {
        Self {
            listen_addr: String::from("0.0.0.0:8080"),
            auth_token: None,
            cors_allow_origin: String::from("*"),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, Default, PartialEq, Eq)]
pub struct Configuration {
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub layout: LayoutConfig,
    #[serde(default)]
    pub compactor: CompactorConfig,
    #[serde(default)]
    pub acceptor: AcceptorConfig,
}

impl Configuration {
    /// Defaults, then `archivist.toml` in the working directory, then
    /// `ARCHIVIST__` environment variables.
    pub fn load() -> Result<Self, Box<figment::Error>> {
        Self::figment(Toml::file(CONFIG_FILE))
            .extract()
            .map_err(Box::new)
    }

    /// Like [`Configuration::load`] with an explicit config file.
    pub fn load_from_path(path: &Path) -> Result<Self, Box<figment::Error>> {
        Self::figment(Toml::file(path)).extract().map_err(Box::new)
    }

    fn figment(file: figment::providers::Data<Toml>) -> Figment {
        Figment::from(Serialized::defaults(Configuration::default()))
            .merge(file)
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
    }

    /// Bucket name from config, then `BUCKET_NAME`, then the s3 DSN path.
    pub fn resolve_bucket(&self) -> Option<String> {
        non_empty(self.storage.bucket.clone())
            .or_else(|| non_empty(std::env::var(BUCKET_ENV).ok()))
            .or_else(|| bucket_from_dsn(&self.storage.dsn))
    }

    /// Auth token from config, then `AUTH_TOKEN`.
    pub fn resolve_auth_token(&self) -> Option<String> {
        non_empty(self.acceptor.auth_token.clone())
            .or_else(|| non_empty(std::env::var(AUTH_TOKEN_ENV).ok()))
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

fn bucket_from_dsn(dsn: &str) -> Option<String> {
    let url = url::Url::parse(dsn).ok()?;
    if url.scheme() != "s3" {
        return None;
    }
    url.path_segments()?
        .next()
        .filter(|segment| !segment.is_empty())
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;
    use figment::Jail;

    #[test]
    fn test_default_configuration() {
        let config = Configuration::default();

        assert_eq!(config.storage.dsn, "file:///.data/archivist");
        assert_eq!(config.layout.canonical_key, "articles.json");
        assert_eq!(config.layout.pending_prefix, "pending-articles");
        assert_eq!(config.compactor.tick_interval, Duration::from_secs(300));
        assert!(config.compactor.lease.enabled);
        assert_eq!(config.compactor.lease.ttl, Duration::from_secs(900));
        assert_eq!(config.acceptor.listen_addr, "0.0.0.0:8080");
        assert_eq!(config.acceptor.cors_allow_origin, "*");
    }

    #[test]
    fn test_configless_operation() {
        Jail::expect_with(|_jail| {
            let config = Configuration::load().map_err(|e| *e)?;
            assert_eq!(config, Configuration::default());
            Ok(())
        });
    }

    #[test]
    fn test_toml_file_and_humantime_values() {
        Jail::expect_with(|jail| {
            jail.create_file(
                CONFIG_FILE,
                r#"
                [storage]
                dsn = "s3://minio:9000/articles-bucket"

                [compactor]
                tick_interval = "30s"

                [compactor.lease]
                enabled = false
                ttl = "2m"
                "#,
            )?;

            let config = Configuration::load().map_err(|e| *e)?;
            assert_eq!(config.storage.dsn, "s3://minio:9000/articles-bucket");
            assert_eq!(config.compactor.tick_interval, Duration::from_secs(30));
            assert!(!config.compactor.lease.enabled);
            assert_eq!(config.compactor.lease.ttl, Duration::from_secs(120));
            // Untouched sections keep their defaults
            assert_eq!(config.layout, LayoutConfig::default());
            Ok(())
        });
    }

    #[test]
    fn test_load_from_explicit_path() {
        Jail::expect_with(|jail| {
            jail.create_file("custom.toml", "[acceptor]\nlisten_addr = \"127.0.0.1:9999\"\n")?;

            let config = Configuration::load_from_path(Path::new("custom.toml")).map_err(|e| *e)?;
            assert_eq!(config.acceptor.listen_addr, "127.0.0.1:9999");
            Ok(())
        });
    }

    #[test]
    fn test_env_var_override() {
        Jail::expect_with(|jail| {
            jail.create_file(CONFIG_FILE, "[storage]\ndsn = \"file:///from-file\"\n")?;
            jail.set_env("ARCHIVIST__STORAGE__DSN", "memory://");
            jail.set_env("ARCHIVIST__LAYOUT__PENDING_PREFIX", "incoming");
            jail.set_env("ARCHIVIST__COMPACTOR__LEASE__TTL", "45s");

            let config = Configuration::load().map_err(|e| *e)?;
            assert_eq!(config.storage.dsn, "memory://");
            assert_eq!(config.layout.pending_prefix, "incoming");
            assert_eq!(config.compactor.lease.ttl, Duration::from_secs(45));
            Ok(())
        });
    }

    #[test]
    fn test_bucket_resolution_order() {
        Jail::expect_with(|jail| {
            let mut config = Configuration::default();
            config.storage.dsn = "s3://minio:9000/from-dsn".to_string();
            assert_eq!(config.resolve_bucket().as_deref(), Some("from-dsn"));

            jail.set_env(BUCKET_ENV, "from-env");
            assert_eq!(config.resolve_bucket().as_deref(), Some("from-env"));

            config.storage.bucket = Some("from-config".to_string());
            assert_eq!(config.resolve_bucket().as_deref(), Some("from-config"));
            Ok(())
        });
    }

    #[test]
    fn test_bucket_unresolved_for_local_storage() {
        Jail::expect_with(|_jail| {
            let config = Configuration::default();
            assert_eq!(config.resolve_bucket(), None);
            Ok(())
        });
    }

    #[test]
    fn test_auth_token_resolution() {
        Jail::expect_with(|jail| {
            let mut config = Configuration::default();
            assert_eq!(config.resolve_auth_token(), None);

            jail.set_env(AUTH_TOKEN_ENV, "env-token");
            assert_eq!(config.resolve_auth_token().as_deref(), Some("env-token"));

            config.acceptor.auth_token = Some("config-token".to_string());
            assert_eq!(config.resolve_auth_token().as_deref(), Some("config-token"));

            config.acceptor.auth_token = Some("  ".to_string());
            assert_eq!(config.resolve_auth_token().as_deref(), Some("env-token"));
            Ok(())
        });
    }
}
