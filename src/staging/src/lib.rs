//! Archivist staging store
//!
//! Article submissions are written as independent pending objects and later
//! folded into one deduplicated, gzip-compressed canonical object:
//! - [`PendingArea`] stages one object per submitted url
//! - [`CanonicalStore`] loads and rewrites the canonical set
//! - [`Compactor`] merges pending entries and drains them after the commit
//! - [`CompactionLease`] keeps concurrent compactions from losing merges

pub mod article;
pub mod backend;
pub mod canonical;
pub mod codec;
pub mod compactor;
pub mod error;
pub mod import;
pub mod layout;
pub mod lease;
pub mod metrics;
pub mod pending;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use article::Article;
pub use backend::{
    CreateOutcome, Fetched, ObjectAttrs, ObjectStoreAdapter, ObjectStoreBackend, ObjectVersion,
    SwapOutcome, Versioned,
};
pub use canonical::{CanonicalSet, CanonicalStore, Upsert};
pub use compactor::{CompactionReport, Compactor};
pub use error::{CodecError, Error, Result, StoreError, StoreOperation, ValidationError};
pub use import::{ImportReport, parse_batch, stage_batch};
pub use layout::StagingLayout;
pub use lease::{CompactionLease, DEFAULT_LEASE_TTL, LeaseGuard, LeaseRecord, MAX_LEASE_TTL};
pub use metrics::{CompactionMetrics, MetricsSummary};
pub use pending::PendingArea;
