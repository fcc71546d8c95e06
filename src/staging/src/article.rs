//! The article record and its identity rules.
//!
//! Identity is the `url` alone: [`PartialEq`] and [`Hash`] only look at it, so
//! any set or map of articles collapses submissions of the same page into one
//! entry. The remaining fields are informational. [`Article::content_hash`]
//! covers them for callers that need to tell two versions of a page apart.

use chrono::{DateTime, NaiveDateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::hash::{Hash, Hasher};

use crate::error::ValidationError;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(try_from = "ArticleInput")]
pub struct Article {
    url: String,
    title: String,
    source: Option<String>,
    excerpt: String,
    tags: Vec<String>,
    photo_url: Option<String>,
    #[serde(serialize_with = "timestamp::serialize")]
    timestamp: DateTime<Utc>,
}

/// Wire shape accepted from submitters and from stored objects.
#[derive(Debug, Deserialize)]
struct ArticleInput {
    url: String,
    title: String,
    #[serde(default)]
    source: Option<String>,
    excerpt: String,
    tags: Vec<String>,
    #[serde(default)]
    photo_url: Option<String>,
    #[serde(default, deserialize_with = "timestamp::deserialize_opt")]
    timestamp: Option<DateTime<Utc>>,
}

impl TryFrom<ArticleInput> for Article {
    type Error = ValidationError;

    fn try_from(input: ArticleInput) -> Result<Self, Self::Error> {
        if input.url.trim().is_empty() {
            return Err(ValidationError::EmptyUrl);
        }

        Ok(Self {
            url: input.url,
            title: input.title,
            source: input.source,
            excerpt: input.excerpt,
            tags: input.tags,
            photo_url: input.photo_url,
            timestamp: input.timestamp.unwrap_or_else(Utc::now),
        })
    }
}

impl Article {
    /// Build an article from the required fields, stamped with the current time.
    pub fn new(
        url: impl Into<String>,
        title: impl Into<String>,
        excerpt: impl Into<String>,
        tags: Vec<String>,
    ) -> Result<Self, ValidationError> {
        Self::try_from(ArticleInput {
            url: url.into(),
            title: title.into(),
            source: None,
            excerpt: excerpt.into(),
            tags,
            photo_url: None,
            timestamp: None,
        })
    }

    /// Build an article from an untyped submission.
    ///
    /// Unknown keys are ignored. `url`, `title`, `excerpt` and `tags` are
    /// required; `timestamp` defaults to now.
    pub fn from_value(value: serde_json::Value) -> Result<Self, ValidationError> {
        let input: ArticleInput = serde_json::from_value(value)?;
        Self::try_from(input)
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }

    pub fn with_photo_url(mut self, photo_url: impl Into<String>) -> Self {
        self.photo_url = Some(photo_url.into());
        self
    }

    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }

    /// The deduplication key.
    pub fn identity(&self) -> &str {
        &self.url
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn source(&self) -> Option<&str> {
        self.source.as_deref()
    }

    pub fn excerpt(&self) -> &str {
        &self.excerpt
    }

    pub fn tags(&self) -> &[String] {
        &self.tags
    }

    pub fn photo_url(&self) -> Option<&str> {
        self.photo_url.as_deref()
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    /// Hex SHA-256 over every descriptive field.
    ///
    /// Tag order does not matter and `timestamp` is excluded, so re-submitting
    /// the same page content later yields the same hash.
    pub fn content_hash(&self) -> String {
        let mut tags: Vec<&str> = self.tags.iter().map(String::as_str).collect();
        tags.sort_unstable();

        let mut hasher = Sha256::new();
        write_field(&mut hasher, Some(&self.url));
        write_field(&mut hasher, Some(&self.title));
        write_field(&mut hasher, self.source.as_deref());
        write_field(&mut hasher, Some(&self.excerpt));
        hasher.update((tags.len() as u64).to_le_bytes());
        for tag in tags {
            write_field(&mut hasher, Some(tag));
        }
        write_field(&mut hasher, self.photo_url.as_deref());

        hex::encode(hasher.finalize())
    }

    /// True when both articles carry the same descriptive content.
    pub fn same_content(&self, other: &Article) -> bool {
        self.content_hash() == other.content_hash()
    }
}

// Length-prefixed so that ("ab", "c") and ("a", "bc") hash differently.
fn write_field(hasher: &mut Sha256, value: Option<&str>) {
    match value {
        Some(value) => {
            hasher.update([1u8]);
            hasher.update((value.len() as u64).to_le_bytes());
            hasher.update(value.as_bytes());
        }
        None => hasher.update([0u8]),
    }
}

impl PartialEq for Article {
    fn eq(&self, other: &Self) -> bool {
        self.url == other.url
    }
}

impl Eq for Article {}

impl Hash for Article {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.url.hash(state);
    }
}

mod timestamp {
    use super::*;
    use serde::{Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&value.to_rfc3339_opts(SecondsFormat::AutoSi, true))
    }

    pub fn deserialize_opt<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<DateTime<Utc>>, D::Error> {
        match Option::<String>::deserialize(deserializer)? {
            Some(raw) => parse(&raw).map(Some).map_err(serde::de::Error::custom),
            None => Ok(None),
        }
    }

    /// RFC 3339 with an offset, or a naive ISO-8601 timestamp read as UTC.
    pub fn parse(raw: &str) -> Result<DateTime<Utc>, String> {
        if let Ok(parsed) = DateTime::parse_from_rfc3339(raw) {
            return Ok(parsed.with_timezone(&Utc));
        }

        NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f")
            .map(|naive| naive.and_utc())
            .map_err(|e| format!("invalid timestamp '{raw}': {e}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;
    use std::collections::HashSet;

    fn sample() -> serde_json::Value {
        json!({
            "url": "https://example.com/test-article",
            "title": "Test Article Title",
            "source": "Test Source",
            "excerpt": "This is a test article excerpt.",
            "tags": ["test", "api", "development"],
            "photo_url": "https://example.com/test-photo.jpg",
        })
    }

    #[test]
    fn test_from_value_accepts_full_mapping() {
        let article = Article::from_value(sample()).unwrap();

        assert_eq!(article.url(), "https://example.com/test-article");
        assert_eq!(article.source(), Some("Test Source"));
        assert_eq!(article.tags().len(), 3);
        assert_eq!(
            article.photo_url(),
            Some("https://example.com/test-photo.jpg")
        );
    }

    #[test]
    fn test_missing_required_field_is_rejected() {
        for field in ["url", "title", "excerpt", "tags"] {
            let mut value = sample();
            value.as_object_mut().unwrap().remove(field);

            let err = Article::from_value(value).unwrap_err();
            assert!(
                err.to_string().contains(field),
                "error for missing {field} was: {err}"
            );
        }
    }

    #[test]
    fn test_wrong_shape_is_rejected() {
        let mut value = sample();
        value["tags"] = json!("not-a-list");

        let err = Article::from_value(value).unwrap_err();
        assert!(matches!(err, ValidationError::Malformed(_)));
    }

    #[test]
    fn test_blank_url_is_rejected() {
        let mut value = sample();
        value["url"] = json!("   ");

        let err = Article::from_value(value).unwrap_err();
        assert!(matches!(err, ValidationError::EmptyUrl));
    }

    #[test]
    fn test_optional_fields_and_timestamp_default() {
        let before = Utc::now();
        let article = Article::from_value(json!({
            "url": "https://a",
            "title": "A",
            "excerpt": "e",
            "tags": [],
        }))
        .unwrap();

        assert_eq!(article.source(), None);
        assert_eq!(article.photo_url(), None);
        assert!(article.timestamp() >= before);
    }

    #[test]
    fn test_naive_timestamp_is_read_as_utc() {
        let mut value = sample();
        value["timestamp"] = json!("2024-05-01T10:30:00.123456");

        let article = Article::from_value(value).unwrap();
        let expected = Utc
            .with_ymd_and_hms(2024, 5, 1, 10, 30, 0)
            .unwrap()
            .checked_add_signed(chrono::TimeDelta::microseconds(123_456))
            .unwrap();
        assert_eq!(article.timestamp(), expected);
    }

    #[test]
    fn test_serialized_form_is_stable() {
        let article = Article::new("https://a", "A", "e", vec!["x".to_string()])
            .unwrap()
            .with_timestamp(Utc.with_ymd_and_hms(2024, 1, 2, 3, 4, 5).unwrap());

        let encoded = serde_json::to_string(&article).unwrap();
        assert_eq!(
            encoded,
            r#"{"url":"https://a","title":"A","source":null,"excerpt":"e","tags":["x"],"photo_url":null,"timestamp":"2024-01-02T03:04:05Z"}"#
        );

        let decoded: Article = serde_json::from_str(&encoded).unwrap();
        assert_eq!(decoded.timestamp(), article.timestamp());
        assert!(decoded.same_content(&article));
    }

    #[test]
    fn test_equality_and_hash_follow_url_only() {
        let first = Article::new("https://a", "A", "e", vec![]).unwrap();
        let second = Article::new("https://a", "Another title", "other", vec!["y".into()]).unwrap();

        assert_eq!(first, second);
        assert!(!first.same_content(&second));

        let set: HashSet<Article> = [first, second].into_iter().collect();
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn test_content_hash_ignores_tag_order_and_timestamp() {
        let first = Article::new("https://a", "A", "e", vec!["x".into(), "y".into()]).unwrap();
        let second = Article::new("https://a", "A", "e", vec!["y".into(), "x".into()])
            .unwrap()
            .with_timestamp(Utc.with_ymd_and_hms(2020, 1, 1, 0, 0, 0).unwrap());

        assert_eq!(first.content_hash(), second.content_hash());
        assert_ne!(
            first.content_hash(),
            first.clone().with_source("elsewhere").content_hash()
        );
    }
}
