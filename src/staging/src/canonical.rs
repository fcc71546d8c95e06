//! The single compacted object holding every committed article.

use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info};

use crate::article::Article;
use crate::backend::{Fetched, ObjectAttrs, ObjectStoreAdapter};
use crate::codec::{decode_json, encode_json_gz};
use crate::error::{Error, Result};

/// What [`CanonicalSet::upsert`] did with an article.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Upsert {
    Inserted,
    Replaced,
}

/// Articles deduplicated by url. The last upsert for a url wins.
#[derive(Debug, Clone, Default)]
pub struct CanonicalSet {
    articles: BTreeMap<String, Article>,
}

impl CanonicalSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.articles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.articles.is_empty()
    }

    pub fn get(&self, url: &str) -> Option<&Article> {
        self.articles.get(url)
    }

    pub fn contains(&self, url: &str) -> bool {
        self.articles.contains_key(url)
    }

    pub fn upsert(&mut self, article: Article) -> Upsert {
        match self.articles.insert(article.identity().to_string(), article) {
            Some(_) => Upsert::Replaced,
            None => Upsert::Inserted,
        }
    }

    /// Articles in url order.
    pub fn iter(&self) -> impl Iterator<Item = &Article> {
        self.articles.values()
    }

    pub fn into_articles(self) -> Vec<Article> {
        self.articles.into_values().collect()
    }
}

impl FromIterator<Article> for CanonicalSet {
    fn from_iter<I: IntoIterator<Item = Article>>(iter: I) -> Self {
        let mut set = CanonicalSet::new();
        for article in iter {
            set.upsert(article);
        }
        set
    }
}

/// Reads and rewrites the canonical object as a gzip JSON array.
#[derive(Debug, Clone)]
pub struct CanonicalStore {
    backend: Arc<dyn ObjectStoreAdapter>,
    key: String,
}

impl CanonicalStore {
    pub fn new(backend: Arc<dyn ObjectStoreAdapter>, key: impl Into<String>) -> Self {
        Self {
            backend,
            key: key.into(),
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    /// Fetch the canonical set. A missing object is an empty set; an
    /// undecodable one is an [`Error::Integrity`].
    pub async fn load(&self) -> Result<CanonicalSet> {
        let body = match self.backend.get(&self.key).await? {
            Fetched::Found(body) => body,
            Fetched::NotFound => {
                info!(
                    bucket = self.backend.bucket(),
                    key = %self.key,
                    "Canonical object not found, starting from an empty set"
                );
                return Ok(CanonicalSet::new());
            }
        };

        debug!(bytes = body.len(), key = %self.key, "Fetched canonical object");

        let articles: Vec<Article> = decode_json(&body).map_err(|source| Error::Integrity {
            key: self.key.clone(),
            source,
        })?;

        let set: CanonicalSet = articles.into_iter().collect();
        info!(
            "Loaded {} articles from s3://{}/{}",
            set.len(),
            self.backend.bucket(),
            self.key
        );

        Ok(set)
    }

    /// Replace the canonical object with `set`.
    pub async fn save(&self, set: &CanonicalSet) -> Result<()> {
        let articles: Vec<&Article> = set.iter().collect();
        let body = encode_json_gz(&articles).map_err(|source| Error::Encode {
            key: self.key.clone(),
            source,
        })?;

        self.backend
            .put(&self.key, body, &ObjectAttrs::gzip_json())
            .await?;

        info!(
            "Saved {} articles to s3://{}/{}",
            set.len(),
            self.backend.bucket(),
            self.key
        );

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::ObjectStoreBackend;
    use bytes::Bytes;
    use object_store::memory::InMemory;

    fn store() -> (Arc<ObjectStoreBackend>, CanonicalStore) {
        let backend = Arc::new(ObjectStoreBackend::new(Arc::new(InMemory::new()), "bucket"));
        let canonical = CanonicalStore::new(backend.clone(), "articles.json");
        (backend, canonical)
    }

    fn article(url: &str, title: &str) -> Article {
        Article::new(url, title, "excerpt", vec!["tag".to_string()]).unwrap()
    }

    #[test]
    fn test_upsert_replaces_on_same_url() {
        let mut set = CanonicalSet::new();

        assert_eq!(set.upsert(article("https://a", "old")), Upsert::Inserted);
        assert_eq!(set.upsert(article("https://a", "new")), Upsert::Replaced);

        assert_eq!(set.len(), 1);
        assert_eq!(set.get("https://a").unwrap().title(), "new");
    }

    #[tokio::test]
    async fn test_load_missing_object_is_empty() {
        let (_, canonical) = store();

        let set = canonical.load().await.unwrap();
        assert!(set.is_empty());
    }

    #[tokio::test]
    async fn test_save_then_load_round_trips() {
        let (_, canonical) = store();
        let original: CanonicalSet = [
            article("https://a", "A").with_source("Source"),
            article("https://b", "B").with_photo_url("https://b/photo.jpg"),
        ]
        .into_iter()
        .collect();

        canonical.save(&original).await.unwrap();
        let loaded = canonical.load().await.unwrap();

        assert_eq!(loaded.len(), original.len());
        for expected in original.iter() {
            let actual = loaded.get(expected.url()).unwrap();
            assert!(actual.same_content(expected));
            assert_eq!(actual.timestamp(), expected.timestamp());
        }
    }

    #[tokio::test]
    async fn test_corrupt_object_is_an_integrity_error() {
        let (backend, canonical) = store();
        backend
            .put(
                "articles.json",
                Bytes::from_static(b"definitely not json"),
                &ObjectAttrs::default(),
            )
            .await
            .unwrap();

        let err = canonical.load().await.unwrap_err();
        assert!(matches!(err, Error::Integrity { .. }));
    }

    #[tokio::test]
    async fn test_legacy_uncompressed_canonical_is_readable() {
        let (backend, canonical) = store();
        let legacy = br#"[{"url":"https://a","title":"A","source":null,"excerpt":"e","tags":["x"],"photo_url":null,"timestamp":"2024-03-01T08:00:00.000001"}]"#;
        backend
            .put("articles.json", Bytes::from_static(legacy), &ObjectAttrs::default())
            .await
            .unwrap();

        let set = canonical.load().await.unwrap();
        assert_eq!(set.len(), 1);
        assert!(set.contains("https://a"));
    }
}
