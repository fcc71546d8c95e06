//! Store-level mutual exclusion for compaction runs.
//!
//! Two compactions racing on the canonical object lose one run's merge, so a
//! run first takes a lease object. The first lease is created with a
//! create-only write. After that the object is never deleted: taking over an
//! expired or released lease and releasing one are both writes conditioned on
//! the exact version last read, so of two writers racing from the same
//! version only one succeeds. Leases expire so a crashed holder cannot block
//! compaction forever.

use bytes::Bytes;
use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::backend::{CreateOutcome, ObjectAttrs, ObjectStoreAdapter, ObjectVersion, SwapOutcome};
use crate::codec::{decode_json, encode_json_gz};
use crate::error::{CodecError, Error, Result};

pub const DEFAULT_LEASE_TTL: Duration = Duration::from_secs(15 * 60);

const MAX_LEASE_DAYS: i64 = 365;

/// Longest lease a holder may take.
pub const MAX_LEASE_TTL: Duration = Duration::from_secs(MAX_LEASE_DAYS as u64 * 24 * 60 * 60);

/// Contents of the lease object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeaseRecord {
    pub holder: String,
    pub acquired_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    /// Set by [`LeaseGuard::release`]
    #[serde(default)]
    pub released: bool,
}

impl LeaseRecord {
    /// Whether another holder may take the lease over at `now`.
    pub fn is_free(&self, now: DateTime<Utc>) -> bool {
        self.released || self.expires_at <= now
    }
}

#[derive(Debug, Clone)]
pub struct CompactionLease {
    backend: Arc<dyn ObjectStoreAdapter>,
    key: String,
    ttl: TimeDelta,
}

impl CompactionLease {
    /// A lease on `key`. TTLs above [`MAX_LEASE_TTL`] are capped with a warning;
    /// configuration validation rejects them before they get here.
    pub fn new(backend: Arc<dyn ObjectStoreAdapter>, key: impl Into<String>, ttl: Duration) -> Self {
        let ttl = match TimeDelta::from_std(ttl) {
            Ok(delta) if ttl <= MAX_LEASE_TTL => delta,
            _ => {
                warn!(requested = ?ttl, "Lease TTL capped at {MAX_LEASE_TTL:?}");
                TimeDelta::days(MAX_LEASE_DAYS)
            }
        };

        Self {
            backend,
            key: key.into(),
            ttl,
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn ttl(&self) -> TimeDelta {
        self.ttl
    }

    /// Take the lease for `holder`.
    ///
    /// Fails with [`Error::LeaseHeld`] while another holder's lease is live,
    /// or when another contender takes over a free lease first. An expired,
    /// released or unreadable lease is replaced only if it is still the
    /// version that was read.
    pub async fn acquire(&self, holder: &str) -> Result<LeaseGuard> {
        let attrs = ObjectAttrs::gzip_json();
        let mut vanished = false;

        loop {
            let (record, body) = self.fresh_record(holder)?;

            if let CreateOutcome::Created(version) =
                self.backend.put_if_absent(&self.key, body, &attrs).await?
            {
                debug!(holder, expires_at = %record.expires_at, "Acquired compaction lease");
                return Ok(self.guard(record, version));
            }

            let Some(current) = self.backend.get_versioned(&self.key).await? else {
                // Removed by hand between the create and the read
                if vanished {
                    return Err(self.contended());
                }
                vanished = true;
                continue;
            };

            match decode_json::<LeaseRecord>(&current.body) {
                Ok(existing) if !existing.is_free(Utc::now()) => {
                    return Err(Error::LeaseHeld {
                        holder: existing.holder,
                        expires_at: existing.expires_at,
                    });
                }
                Ok(existing) if existing.released => {
                    debug!(previous = %existing.holder, "Taking over released compaction lease");
                }
                Ok(existing) => {
                    warn!(
                        holder = %existing.holder,
                        expired_at = %existing.expires_at,
                        "Reclaiming expired compaction lease"
                    );
                }
                Err(e) => {
                    warn!(key = %self.key, "Reclaiming unreadable compaction lease: {e}");
                }
            }

            let (record, body) = self.fresh_record(holder)?;
            return match self
                .backend
                .put_if_version(&self.key, body, &attrs, &current.version)
                .await?
            {
                SwapOutcome::Swapped(version) => {
                    debug!(holder, expires_at = %record.expires_at, "Acquired compaction lease");
                    Ok(self.guard(record, version))
                }
                SwapOutcome::Conflict => {
                    debug!(holder, "Another contender took the compaction lease first");
                    Err(self.current_holder().await)
                }
            };
        }
    }

    /// The current lease, if any. The inner error reports an undecodable lease.
    pub async fn read(&self) -> Result<Option<std::result::Result<LeaseRecord, CodecError>>> {
        Ok(self
            .backend
            .get_versioned(&self.key)
            .await?
            .map(|current| decode_json(&current.body)))
    }

    fn fresh_record(&self, holder: &str) -> Result<(LeaseRecord, Bytes)> {
        let now = Utc::now();
        let record = LeaseRecord {
            holder: holder.to_string(),
            acquired_at: now,
            expires_at: now.checked_add_signed(self.ttl).unwrap_or(DateTime::<Utc>::MAX_UTC),
            released: false,
        };
        let body = encode_json_gz(&record).map_err(|source| Error::Encode {
            key: self.key.clone(),
            source,
        })?;
        Ok((record, body))
    }

    fn guard(&self, record: LeaseRecord, version: ObjectVersion) -> LeaseGuard {
        LeaseGuard {
            backend: self.backend.clone(),
            key: self.key.clone(),
            record,
            version,
        }
    }

    /// `LeaseHeld` naming whoever holds the lease now, if that is readable.
    async fn current_holder(&self) -> Error {
        match self.read().await {
            Ok(Some(Ok(current))) if !current.is_free(Utc::now()) => Error::LeaseHeld {
                holder: current.holder,
                expires_at: current.expires_at,
            },
            _ => self.contended(),
        }
    }

    fn contended(&self) -> Error {
        Error::LeaseHeld {
            holder: "unknown".to_string(),
            expires_at: Utc::now().checked_add_signed(self.ttl).unwrap_or(DateTime::<Utc>::MAX_UTC),
        }
    }
}

/// Proof of holding the lease at one object version. Call
/// [`LeaseGuard::release`] when done.
#[derive(Debug)]
pub struct LeaseGuard {
    backend: Arc<dyn ObjectStoreAdapter>,
    key: String,
    record: LeaseRecord,
    version: ObjectVersion,
}

impl LeaseGuard {
    pub fn record(&self) -> &LeaseRecord {
        &self.record
    }

    pub fn version(&self) -> &ObjectVersion {
        &self.version
    }

    /// Check the lease is still ours and unexpired.
    ///
    /// Fails with [`Error::LeaseLost`] when the lease expired or the object
    /// was replaced or removed since it was taken.
    pub async fn verify(&self) -> Result<()> {
        let current = self.backend.get_versioned(&self.key).await?;
        let ours = current.is_some_and(|current| current.version == self.version);

        if ours && self.record.expires_at > Utc::now() {
            return Ok(());
        }

        Err(Error::LeaseLost {
            holder: self.record.holder.clone(),
        })
    }

    /// Mark the lease released if the object is still the version we wrote.
    ///
    /// A lease taken over by someone else is left in place.
    pub async fn release(self) -> Result<()> {
        let released = LeaseRecord {
            expires_at: self.record.expires_at.min(Utc::now()),
            released: true,
            ..self.record.clone()
        };
        let body = encode_json_gz(&released).map_err(|source| Error::Encode {
            key: self.key.clone(),
            source,
        })?;

        match self
            .backend
            .put_if_version(&self.key, body, &ObjectAttrs::gzip_json(), &self.version)
            .await?
        {
            SwapOutcome::Swapped(_) => {
                debug!(holder = %self.record.holder, "Released compaction lease");
            }
            SwapOutcome::Conflict => {
                warn!(
                    holder = %self.record.holder,
                    "Compaction lease was taken over before release, leaving it in place"
                );
            }
        }

        Ok(())
    }
}
