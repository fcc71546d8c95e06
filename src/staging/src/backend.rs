//! The object store seam.
//!
//! The core only talks to [`ObjectStoreAdapter`]: named blobs in one bucket,
//! with "not found" reported as a value rather than an error.
//! [`ObjectStoreBackend`] implements it on top of the `object_store` crate so
//! the same code runs against S3, a local directory, or memory.
//!
//! Reads can report the version they saw, and [`ObjectStoreAdapter::put_if_version`]
//! replaces an object only while it is still at that version.

use async_trait::async_trait;
use bytes::Bytes;
use futures::TryStreamExt;
use object_store::path::Path as ObjectPath;
use object_store::{
    Attribute, AttributeValue, Attributes, ObjectStore, PutMode, PutOptions, PutPayload,
    PutResult, UpdateVersion,
};
use sha2::{Digest, Sha256};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, error};

use crate::codec::{GZIP_CONTENT_ENCODING, JSON_CONTENT_TYPE};
use crate::error::{StoreError, StoreOperation};

/// Result of reading one object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Fetched {
    Found(Bytes),
    NotFound,
}

/// The version a store assigned to one write of an object.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ObjectVersion {
    pub e_tag: Option<String>,
    pub version: Option<String>,
}

impl From<PutResult> for ObjectVersion {
    fn from(result: PutResult) -> Self {
        Self {
            e_tag: result.e_tag,
            version: result.version,
        }
    }
}

impl From<&ObjectVersion> for UpdateVersion {
    fn from(version: &ObjectVersion) -> Self {
        Self {
            e_tag: version.e_tag.clone(),
            version: version.version.clone(),
        }
    }
}

/// An object body together with the version it was read at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Versioned {
    pub body: Bytes,
    pub version: ObjectVersion,
}

/// Result of a create-only write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CreateOutcome {
    Created(ObjectVersion),
    AlreadyExists,
}

/// Result of a write conditioned on the current version.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SwapOutcome {
    Swapped(ObjectVersion),
    /// The object changed or vanished since it was read
    Conflict,
}

/// HTTP-style metadata stored alongside an object.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ObjectAttrs {
    pub content_type: Option<String>,
    pub content_encoding: Option<String>,
}

impl ObjectAttrs {
    /// `application/json` + `gzip`, used for every object this crate writes.
    pub fn gzip_json() -> Self {
        Self {
            content_type: Some(JSON_CONTENT_TYPE.to_string()),
            content_encoding: Some(GZIP_CONTENT_ENCODING.to_string()),
        }
    }
}

#[async_trait]
pub trait ObjectStoreAdapter: Send + Sync + fmt::Debug {
    /// Name of the bucket all keys are relative to.
    fn bucket(&self) -> &str;

    /// The object and its current version, `None` when missing.
    async fn get_versioned(&self, key: &str) -> Result<Option<Versioned>, StoreError>;

    async fn get(&self, key: &str) -> Result<Fetched, StoreError> {
        Ok(match self.get_versioned(key).await? {
            Some(object) => Fetched::Found(object.body),
            None => Fetched::NotFound,
        })
    }

    /// Unconditional write. Replaces any existing object atomically.
    async fn put(&self, key: &str, body: Bytes, attrs: &ObjectAttrs) -> Result<(), StoreError>;

    /// Write only if nothing exists under `key` yet.
    async fn put_if_absent(
        &self,
        key: &str,
        body: Bytes,
        attrs: &ObjectAttrs,
    ) -> Result<CreateOutcome, StoreError>;

    /// Replace the object only if it is still at `expected`.
    async fn put_if_version(
        &self,
        key: &str,
        body: Bytes,
        attrs: &ObjectAttrs,
        expected: &ObjectVersion,
    ) -> Result<SwapOutcome, StoreError>;

    /// Every key under `prefix`, sorted.
    async fn list(&self, prefix: &str) -> Result<Vec<String>, StoreError>;

    /// Delete one object. Deleting a missing key succeeds.
    async fn delete(&self, key: &str) -> Result<(), StoreError>;
}

/// [`ObjectStoreAdapter`] over any `object_store` implementation.
#[derive(Debug, Clone)]
pub struct ObjectStoreBackend {
    store: Arc<dyn ObjectStore>,
    bucket: String,
    attributes: bool,
}

impl ObjectStoreBackend {
    pub fn new(store: Arc<dyn ObjectStore>, bucket: impl Into<String>) -> Self {
        Self {
            store,
            bucket: bucket.into(),
            attributes: true,
        }
    }

    /// Skip object attributes for stores that reject them (local filesystem).
    pub fn without_attributes(mut self) -> Self {
        self.attributes = false;
        self
    }

    pub fn object_store(&self) -> &Arc<dyn ObjectStore> {
        &self.store
    }

    fn put_options(&self, mode: PutMode, attrs: &ObjectAttrs) -> PutOptions {
        let mut attributes = Attributes::new();
        if self.attributes {
            if let Some(content_type) = &attrs.content_type {
                attributes.insert(
                    Attribute::ContentType,
                    AttributeValue::from(content_type.clone()),
                );
            }
            if let Some(content_encoding) = &attrs.content_encoding {
                attributes.insert(
                    Attribute::ContentEncoding,
                    AttributeValue::from(content_encoding.clone()),
                );
            }
        }

        PutOptions {
            mode,
            attributes,
            ..Default::default()
        }
    }

    fn error(&self, operation: StoreOperation, key: &str, source: object_store::Error) -> StoreError {
        StoreError::new(operation, &self.bucket, key, source)
    }

    async fn put_with_mode(
        &self,
        key: &str,
        body: Bytes,
        attrs: &ObjectAttrs,
        mode: PutMode,
    ) -> object_store::Result<PutResult> {
        let options = self.put_options(mode, attrs);
        self.store
            .put_opts(&ObjectPath::from(key), PutPayload::from(body), options)
            .await
    }

    /// Conditional replace for stores without native support (local filesystem).
    ///
    /// Every replace of version `V` first creates `<key>.swap/<digest of V>`
    /// create-only, so at most one writer moves the object off `V`. The claim
    /// is removed once the object has a new version; a late claimant then
    /// finds the version changed and gives up.
    async fn swap_with_claim(
        &self,
        key: &str,
        body: Bytes,
        attrs: &ObjectAttrs,
        expected: &ObjectVersion,
    ) -> Result<SwapOutcome, StoreError> {
        let claim = swap_claim_key(key, expected);

        match self
            .put_if_absent(&claim, Bytes::new(), &ObjectAttrs::default())
            .await?
        {
            CreateOutcome::Created(_) => {}
            CreateOutcome::AlreadyExists => {
                debug!(key, claim = %claim, "Another writer is replacing this version");
                return Ok(SwapOutcome::Conflict);
            }
        }

        let outcome = match self.get_versioned(key).await {
            Ok(Some(current)) if current.version == *expected => self
                .put_with_mode(key, body, attrs, PutMode::Overwrite)
                .await
                .map(|result| SwapOutcome::Swapped(result.into()))
                .map_err(|e| self.error(StoreOperation::Put, key, e)),
            Ok(_) => Ok(SwapOutcome::Conflict),
            Err(e) => Err(e),
        };

        if let Err(e) = self.delete(&claim).await {
            // A leftover claim blocks every later replace of this version
            error!(key, claim = %claim, "Failed to remove swap claim, delete it by hand: {e}");
        }

        outcome
    }
}

fn swap_claim_key(key: &str, version: &ObjectVersion) -> String {
    let mut hasher = Sha256::new();
    hasher.update(version.e_tag.as_deref().unwrap_or_default());
    hasher.update([0u8]);
    hasher.update(version.version.as_deref().unwrap_or_default());
    format!("{key}.swap/{}", hex::encode(hasher.finalize()))
}

#[async_trait]
impl ObjectStoreAdapter for ObjectStoreBackend {
    fn bucket(&self) -> &str {
        &self.bucket
    }

    async fn get_versioned(&self, key: &str) -> Result<Option<Versioned>, StoreError> {
        let path = ObjectPath::from(key);

        let result = match self.store.get(&path).await {
            Ok(result) => result,
            Err(object_store::Error::NotFound { .. }) => return Ok(None),
            Err(e) => return Err(self.error(StoreOperation::Get, key, e)),
        };

        let version = ObjectVersion {
            e_tag: result.meta.e_tag.clone(),
            version: result.meta.version.clone(),
        };

        match result.bytes().await {
            Ok(body) => Ok(Some(Versioned { body, version })),
            // Deleted between the metadata response and the body read
            Err(object_store::Error::NotFound { .. }) => Ok(None),
            Err(e) => Err(self.error(StoreOperation::Get, key, e)),
        }
    }

    async fn put(&self, key: &str, body: Bytes, attrs: &ObjectAttrs) -> Result<(), StoreError> {
        self.put_with_mode(key, body, attrs, PutMode::Overwrite)
            .await
            .map_err(|e| self.error(StoreOperation::Put, key, e))?;

        Ok(())
    }

    async fn put_if_absent(
        &self,
        key: &str,
        body: Bytes,
        attrs: &ObjectAttrs,
    ) -> Result<CreateOutcome, StoreError> {
        match self.put_with_mode(key, body, attrs, PutMode::Create).await {
            Ok(result) => Ok(CreateOutcome::Created(result.into())),
            Err(object_store::Error::AlreadyExists { .. })
            | Err(object_store::Error::Precondition { .. }) => Ok(CreateOutcome::AlreadyExists),
            Err(e) => Err(self.error(StoreOperation::Put, key, e)),
        }
    }

    async fn put_if_version(
        &self,
        key: &str,
        body: Bytes,
        attrs: &ObjectAttrs,
        expected: &ObjectVersion,
    ) -> Result<SwapOutcome, StoreError> {
        let mode = PutMode::Update(UpdateVersion::from(expected));

        match self.put_with_mode(key, body.clone(), attrs, mode).await {
            Ok(result) => Ok(SwapOutcome::Swapped(result.into())),
            Err(object_store::Error::Precondition { .. })
            | Err(object_store::Error::NotFound { .. }) => Ok(SwapOutcome::Conflict),
            Err(object_store::Error::NotImplemented) => {
                self.swap_with_claim(key, body, attrs, expected).await
            }
            Err(e) => Err(self.error(StoreOperation::Put, key, e)),
        }
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>, StoreError> {
        let path = ObjectPath::from(prefix);

        let metas: Vec<_> = self
            .store
            .list(Some(&path))
            .try_collect()
            .await
            .map_err(|e| self.error(StoreOperation::List, prefix, e))?;

        let mut keys: Vec<String> = metas
            .into_iter()
            .map(|meta| meta.location.to_string())
            .collect();
        keys.sort_unstable();

        Ok(keys)
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        let path = ObjectPath::from(key);

        match self.store.delete(&path).await {
            Ok(()) | Err(object_store::Error::NotFound { .. }) => Ok(()),
            Err(e) => Err(self.error(StoreOperation::Delete, key, e)),
        }
    }
}
