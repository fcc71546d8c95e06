//! Test doubles for the object store seam.

use async_trait::async_trait;
use bytes::Bytes;
use std::sync::{Arc, Mutex};

use crate::backend::{
    CreateOutcome, ObjectAttrs, ObjectStoreAdapter, ObjectStoreBackend, ObjectVersion,
    SwapOutcome, Versioned,
};
use crate::error::{StoreError, StoreOperation};

#[derive(Debug, Clone)]
struct Fault {
    operation: StoreOperation,
    key_contains: String,
}

/// Wraps another adapter and fails selected calls with a generic store error.
///
/// A fault matches when the operation is equal and the key (or list prefix)
/// contains the configured fragment. Faults stay armed until cleared.
#[derive(Debug)]
pub struct FaultyBackend {
    inner: Arc<dyn ObjectStoreAdapter>,
    faults: Mutex<Vec<Fault>>,
}

impl FaultyBackend {
    pub fn new(inner: Arc<dyn ObjectStoreAdapter>) -> Self {
        Self {
            inner,
            faults: Mutex::new(Vec::new()),
        }
    }

    /// An in-memory backend wrapped with no faults armed.
    pub fn in_memory() -> Self {
        let store = Arc::new(object_store::memory::InMemory::new());
        Self::new(Arc::new(ObjectStoreBackend::new(store, "test-bucket")))
    }

    pub fn inner(&self) -> &Arc<dyn ObjectStoreAdapter> {
        &self.inner
    }

    pub fn fail(&self, operation: StoreOperation, key_contains: impl Into<String>) {
        self.lock().push(Fault {
            operation,
            key_contains: key_contains.into(),
        });
    }

    pub fn clear(&self) {
        self.lock().clear();
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<Fault>> {
        self.faults.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn check(&self, operation: StoreOperation, key: &str) -> Result<(), StoreError> {
        let armed = self
            .lock()
            .iter()
            .any(|fault| fault.operation == operation && key.contains(&fault.key_contains));

        if armed {
            return Err(StoreError::new(
                operation,
                self.inner.bucket(),
                key,
                object_store::Error::Generic {
                    store: "faulty",
                    source: format!("injected {operation} failure").into(),
                },
            ));
        }

        Ok(())
    }
}

#[async_trait]
impl ObjectStoreAdapter for FaultyBackend {
    fn bucket(&self) -> &str {
        self.inner.bucket()
    }

    async fn get_versioned(&self, key: &str) -> Result<Option<Versioned>, StoreError> {
        self.check(StoreOperation::Get, key)?;
        self.inner.get_versioned(key).await
    }

    async fn put(&self, key: &str, body: Bytes, attrs: &ObjectAttrs) -> Result<(), StoreError> {
        self.check(StoreOperation::Put, key)?;
        self.inner.put(key, body, attrs).await
    }

    async fn put_if_absent(
        &self,
        key: &str,
        body: Bytes,
        attrs: &ObjectAttrs,
    ) -> Result<CreateOutcome, StoreError> {
        self.check(StoreOperation::Put, key)?;
        self.inner.put_if_absent(key, body, attrs).await
    }

    async fn put_if_version(
        &self,
        key: &str,
        body: Bytes,
        attrs: &ObjectAttrs,
        expected: &ObjectVersion,
    ) -> Result<SwapOutcome, StoreError> {
        self.check(StoreOperation::Put, key)?;
        self.inner.put_if_version(key, body, attrs, expected).await
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>, StoreError> {
        self.check(StoreOperation::List, prefix)?;
        self.inner.list(prefix).await
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        self.check(StoreOperation::Delete, key)?;
        self.inner.delete(key).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_faults_match_operation_and_key() {
        let backend = FaultyBackend::in_memory();
        backend.fail(StoreOperation::Put, "articles");

        let err = backend
            .put("articles.json", Bytes::new(), &ObjectAttrs::default())
            .await
            .unwrap_err();
        assert_eq!(err.operation, StoreOperation::Put);
        assert_eq!(err.key, "articles.json");

        backend
            .put("pending-x.json.gz", Bytes::new(), &ObjectAttrs::default())
            .await
            .unwrap();
        assert!(backend.get("articles.json").await.is_ok());

        backend.clear();
        backend
            .put("articles.json", Bytes::new(), &ObjectAttrs::default())
            .await
            .unwrap();
    }
}
