use anyhow::{Context, Result};
use object_store::{ObjectStore, aws::AmazonS3Builder, local::LocalFileSystem, memory::InMemory};
use staging::{Compactor, ObjectStoreAdapter, ObjectStoreBackend, PendingArea, StagingLayout};
use std::sync::Arc;
use url::Url;

use crate::config::Configuration;

/// The staging components a process needs, all sharing one backend.
#[derive(Debug, Clone)]
pub struct StagingContext {
    pub backend: Arc<dyn ObjectStoreAdapter>,
    pub layout: StagingLayout,
    pub pending: PendingArea,
    pub compactor: Compactor,
}

impl StagingContext {
    /// Build every component from configuration.
    pub fn from_config(config: &Configuration) -> Result<Self> {
        config.compactor.lease.check_ttl()?;
        let backend = create_backend(config)?;
        Ok(Self::with_backend(backend, config))
    }

    /// Build on an existing backend, e.g. a test double.
    pub fn with_backend(backend: Arc<dyn ObjectStoreAdapter>, config: &Configuration) -> Self {
        let layout = config.layout.to_layout();
        let pending = PendingArea::new(backend.clone(), layout.clone());

        let mut compactor = Compactor::new(backend.clone(), layout.clone());
        compactor = if config.compactor.lease.enabled {
            compactor.with_lease_ttl(config.compactor.lease.ttl)
        } else {
            compactor.without_lease()
        };

        Self {
            backend,
            layout,
            pending,
            compactor,
        }
    }
}

/// Create the adapter the staging core writes through.
///
/// The bucket resolves from config, `BUCKET_NAME` or the DSN. Local stores
/// fall back to naming the bucket after their location.
pub fn create_backend(config: &Configuration) -> Result<Arc<dyn ObjectStoreAdapter>> {
    let dsn = &config.storage.dsn;
    let bucket = config.resolve_bucket();
    let url = parse_dsn(dsn)?;

    let backend = match url.scheme() {
        "file" => {
            let label = bucket.unwrap_or_else(|| url.path().to_string());
            // Local files cannot carry content-type/encoding metadata
            ObjectStoreBackend::new(create_object_store_from_dsn(dsn, None)?, label)
                .without_attributes()
        }
        "memory" => ObjectStoreBackend::new(
            create_object_store_from_dsn(dsn, None)?,
            bucket.unwrap_or_else(|| "memory".to_string()),
        ),
        _ => {
            let bucket = bucket.context(
                "No bucket configured: set storage.bucket, BUCKET_NAME or an s3://host/bucket DSN",
            )?;
            ObjectStoreBackend::new(create_object_store_from_dsn(dsn, Some(&bucket))?, bucket)
        }
    };

    tracing::info!(dsn = %redact_dsn(dsn), bucket = backend.bucket(), "Object store ready");

    Ok(Arc::new(backend))
}

/// Extract the filesystem path from a storage DSN
/// Returns the path component without the URL scheme for file:// URLs,
/// or the original DSN for other schemes
///
/// # Examples
/// ```
/// use common::storage::storage_dsn_to_path;
///
/// assert_eq!(storage_dsn_to_path("file:///.data/archivist").unwrap(), ".data/archivist");
/// assert_eq!(storage_dsn_to_path("file:///tmp/data").unwrap(), "/tmp/data");
/// assert_eq!(storage_dsn_to_path("memory://").unwrap(), "memory://");
/// ```
pub fn storage_dsn_to_path(dsn: &str) -> Result<String> {
    let url = parse_dsn(dsn)?;

    match url.scheme() {
        "file" => {
            let path = url.path();
            if path.is_empty() || path == "/" {
                return Err(anyhow::anyhow!(
                    "File DSN must specify a path: file:///path/to/storage"
                ));
            }
            // /.data/archivist is relative to the working directory
            let path = if path.starts_with("/.") {
                &path[1..]
            } else {
                path
            };
            Ok(path.to_string())
        }
        "memory" => Ok("memory://".to_string()),
        "s3" => Ok(dsn.to_string()),
        scheme => Err(unsupported(scheme)),
    }
}

/// Create an object store from a DSN string. `bucket` overrides the bucket
/// in an s3 DSN.
pub fn create_object_store_from_dsn(dsn: &str, bucket: Option<&str>) -> Result<Arc<dyn ObjectStore>> {
    let url = parse_dsn(dsn)?;

    match url.scheme() {
        "file" => {
            let path = storage_dsn_to_path(dsn)?;
            std::fs::create_dir_all(&path)
                .with_context(|| format!("Failed to create storage directory {path}"))?;
            Ok(Arc::new(LocalFileSystem::new_with_prefix(&path)?))
        }
        "memory" => Ok(Arc::new(InMemory::new())),
        "s3" => {
            let builder = create_s3_builder_from_dsn(&url, bucket)?;
            Ok(Arc::new(builder.build()?))
        }
        scheme => Err(unsupported(scheme)),
    }
}

/// Create an S3 builder from a DSN
/// DSN format: s3://[access_key:secret_key@]host[:port][/bucket]
pub fn create_s3_builder_from_dsn(dsn: &Url, bucket: Option<&str>) -> Result<AmazonS3Builder> {
    let host = dsn
        .host_str()
        .ok_or_else(|| anyhow::anyhow!("Missing S3 host in DSN"))?;
    let port = dsn.port();
    let bucket = bucket.unwrap_or_else(|| dsn.path().trim_matches('/'));

    if bucket.is_empty() {
        return Err(anyhow::anyhow!(
            "S3 DSN must specify a bucket: s3://host/bucket"
        ));
    }

    let mut builder = AmazonS3Builder::new()
        .with_bucket_name(bucket)
        .with_region("us-east-1");

    let access_key = dsn.username();
    let secret_key = dsn.password().unwrap_or("");

    if !access_key.is_empty() {
        builder = builder
            .with_access_key_id(access_key)
            .with_secret_access_key(secret_key);
    }

    // Real S3 needs no endpoint, S3-compatible stores (MinIO) do
    let endpoint = if host.contains("amazonaws.com") {
        None
    } else {
        let scheme = if port == Some(443) { "https" } else { "http" };
        Some(match port {
            Some(p) => format!("{scheme}://{host}:{p}"),
            None => format!("{scheme}://{host}"),
        })
    };

    if let Some(endpoint) = endpoint {
        builder = builder
            .with_endpoint(endpoint)
            .with_allow_http(true)
            .with_virtual_hosted_style_request(false);
    }

    if access_key.is_empty() {
        if let Ok(env_key) = std::env::var("AWS_ACCESS_KEY_ID") {
            builder = builder.with_access_key_id(env_key);
        }
        if let Ok(env_secret) = std::env::var("AWS_SECRET_ACCESS_KEY") {
            builder = builder.with_secret_access_key(env_secret);
        }
        if let Ok(env_region) = std::env::var("AWS_DEFAULT_REGION") {
            builder = builder.with_region(env_region);
        }
    }

    Ok(builder)
}

/// The DSN with any password masked, for logs.
pub fn redact_dsn(dsn: &str) -> String {
    match Url::parse(dsn) {
        Ok(mut url) if url.password().is_some() => {
            let _ = url.set_password(Some("****"));
            url.to_string()
        }
        _ => dsn.to_string(),
    }
}

fn parse_dsn(dsn: &str) -> Result<Url> {
    Url::parse(dsn).map_err(|e| anyhow::anyhow!("Invalid storage DSN '{}': {}", dsn, e))
}

fn unsupported(scheme: &str) -> anyhow::Error {
    anyhow::anyhow!(
        "Unsupported storage scheme: {}. Supported: file, memory, s3",
        scheme
    )
}
