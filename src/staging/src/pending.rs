//! One small object per staged submission.
//!
//! Each article is written under a key derived from its url, so writers never
//! share an object: concurrent submissions of different urls cannot collide,
//! and re-submitting a url before the next compaction replaces its entry.

use std::sync::Arc;
use tracing::{debug, info};

use crate::article::Article;
use crate::backend::{Fetched, ObjectAttrs, ObjectStoreAdapter};
use crate::codec::{decode_json, encode_json_gz};
use crate::error::{Error, Result};
use crate::layout::StagingLayout;

#[derive(Debug, Clone)]
pub struct PendingArea {
    backend: Arc<dyn ObjectStoreAdapter>,
    layout: StagingLayout,
}

impl PendingArea {
    pub fn new(backend: Arc<dyn ObjectStoreAdapter>, layout: StagingLayout) -> Self {
        Self { backend, layout }
    }

    pub fn layout(&self) -> &StagingLayout {
        &self.layout
    }

    pub fn backend(&self) -> &Arc<dyn ObjectStoreAdapter> {
        &self.backend
    }

    /// Write `article` as a pending entry and return its key.
    pub async fn stage(&self, article: &Article) -> Result<String> {
        let key = self.layout.pending_key(article.url());
        let body = encode_json_gz(article).map_err(|source| Error::Encode {
            key: key.clone(),
            source,
        })?;

        self.backend
            .put(&key, body, &ObjectAttrs::gzip_json())
            .await?;

        info!(
            url = article.url(),
            "Saved pending article to s3://{}/{}",
            self.backend.bucket(),
            key
        );

        Ok(key)
    }

    /// All pending keys, sorted. Objects without the pending suffix are ignored.
    pub async fn list(&self) -> Result<Vec<String>> {
        let keys = self.backend.list(self.layout.pending_prefix()).await?;
        let total = keys.len();

        let pending: Vec<String> = keys
            .into_iter()
            .filter(|key| self.layout.is_pending_key(key))
            .collect();

        if pending.len() != total {
            debug!(
                ignored = total - pending.len(),
                prefix = self.layout.pending_prefix(),
                "Ignoring stray objects under the pending prefix"
            );
        }

        Ok(pending)
    }

    /// Read one pending entry. `Ok(None)` when it no longer exists.
    pub async fn fetch(&self, key: &str) -> Result<Option<Article>> {
        let body = match self.backend.get(key).await? {
            Fetched::Found(body) => body,
            Fetched::NotFound => return Ok(None),
        };

        let article = decode_json(&body).map_err(|source| Error::MalformedPending {
            key: key.to_string(),
            source,
        })?;

        Ok(Some(article))
    }

    pub async fn discard(&self, key: &str) -> Result<()> {
        self.backend.delete(key).await?;
        debug!(key, "Discarded pending entry");
        Ok(())
    }
}
