use sha2::{Digest, Sha256};

pub const DEFAULT_CANONICAL_KEY: &str = "articles.json";
pub const DEFAULT_PENDING_PREFIX: &str = "pending-articles";
pub const DEFAULT_LEASE_KEY: &str = "locks/compaction.lock";

pub const PENDING_SUFFIX: &str = ".json.gz";

/// Readable part of a stem, in bytes, before the url digest.
const MAX_READABLE_LEN: usize = 180;
const DIGEST_HEX_LEN: usize = 16;

/// Where each kind of object lives in the bucket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StagingLayout {
    canonical_key: String,
    pending_prefix: String,
    lease_key: String,
}

impl Default for StagingLayout {
    fn default() -> Self {
        Self::new(DEFAULT_CANONICAL_KEY, DEFAULT_PENDING_PREFIX, DEFAULT_LEASE_KEY)
    }
}

impl StagingLayout {
    pub fn new(canonical_key: &str, pending_prefix: &str, lease_key: &str) -> Self {
        Self {
            canonical_key: canonical_key.trim_matches('/').to_string(),
            pending_prefix: pending_prefix.trim_matches('/').to_string(),
            lease_key: lease_key.trim_matches('/').to_string(),
        }
    }

    pub fn canonical_key(&self) -> &str {
        &self.canonical_key
    }

    pub fn pending_prefix(&self) -> &str {
        &self.pending_prefix
    }

    pub fn lease_key(&self) -> &str {
        &self.lease_key
    }

    /// Deterministic pending key for a url: `<prefix>/<stem>.json.gz`.
    pub fn pending_key(&self, url: &str) -> String {
        format!("{}/{}{}", self.pending_prefix, pending_stem(url), PENDING_SUFFIX)
    }

    /// Whether a listed key is a pending entry rather than a stray object.
    pub fn is_pending_key(&self, key: &str) -> bool {
        key.strip_prefix(&self.pending_prefix)
            .and_then(|rest| rest.strip_prefix('/'))
            .is_some_and(|name| name.len() > PENDING_SUFFIX.len() && name.ends_with(PENDING_SUFFIX))
    }
}

/// `<readable>-<digest>`: the url with every character outside
/// `[A-Za-z0-9_]` replaced by `_`, capped in length, then the first hex
/// characters of its SHA-256. The replacement alone is lossy (`https://a/b`
/// and `https://a.b` read the same), so the digest keeps distinct urls apart.
pub fn pending_stem(url: &str) -> String {
    let readable: String = url
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' { c } else { '_' })
        .take(MAX_READABLE_LEN)
        .collect();

    let digest = hex::encode(Sha256::digest(url.as_bytes()));
    format!("{readable}-{}", &digest[..DIGEST_HEX_LEN])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pending_key_replaces_non_word_characters() {
        let layout = StagingLayout::default();

        assert_eq!(
            layout.pending_key("https://example.com/a-b?c=d"),
            "pending-articles/https___example_com_a_b_c_d-ec99021416f1b137.json.gz"
        );
    }

    #[test]
    fn test_pending_key_is_deterministic() {
        let layout = StagingLayout::default();
        assert_eq!(layout.pending_key("https://a"), layout.pending_key("https://a"));
        assert_ne!(layout.pending_key("https://a"), layout.pending_key("https://b"));
    }

    #[test]
    fn test_urls_that_sanitize_alike_get_distinct_keys() {
        let layout = StagingLayout::default();
        let keys: Vec<String> = ["https://a/b", "https://a.b", "https://a_b"]
            .iter()
            .map(|url| layout.pending_key(url))
            .collect();

        assert_eq!(keys[0], "pending-articles/https___a_b-4148a87e16a32df5.json.gz");
        assert_eq!(keys[1], "pending-articles/https___a_b-065644baa71912b9.json.gz");
        assert_eq!(keys[2], "pending-articles/https___a_b-cf8c35c2bcf999ad.json.gz");
    }

    #[test]
    fn test_non_ascii_is_replaced() {
        assert!(pending_stem("https://ü.de").starts_with("https_____de-"));
    }

    #[test]
    fn test_long_urls_are_truncated() {
        let base = format!("https://example.com/{}", "x".repeat(400));
        let other = format!("{base}y");

        let stem = pending_stem(&base);
        assert_eq!(stem.len(), MAX_READABLE_LEN + 1 + DIGEST_HEX_LEN);
        assert_ne!(stem, pending_stem(&other));
        assert!(stem.starts_with("https___example_com_xxx"));
    }

    #[test]
    fn test_is_pending_key_filters_strays() {
        let layout = StagingLayout::default();

        assert!(layout.is_pending_key(&layout.pending_key("https://a")));
        // Entries staged before the digest suffix still count
        assert!(layout.is_pending_key("pending-articles/https___a.json.gz"));
        assert!(!layout.is_pending_key("pending-articles/notes.txt"));
        assert!(!layout.is_pending_key("pending-articles/.json.gz"));
        assert!(!layout.is_pending_key("pending-articles-old/https___a.json.gz"));
        assert!(!layout.is_pending_key("articles.json"));
    }

    #[test]
    fn test_prefix_slashes_are_normalized() {
        let layout = StagingLayout::new("/articles.json", "pending/", "locks/compaction.lock");

        assert_eq!(layout.canonical_key(), "articles.json");
        assert_eq!(
            layout.pending_key("https://a"),
            "pending/https___a-44f833239a3830c0.json.gz"
        );
    }
}
