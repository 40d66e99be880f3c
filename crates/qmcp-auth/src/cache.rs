// SPDX-License-Identifier: MIT OR Apache-2.0
//! Process-wide credential cache with per-key single-flight refresh.
//!
//! Keyed by `(catalog URL, JWT subject, token-hash)`.  A cache miss triggers
//! at most one concurrent fetch per key; other callers wait for that fetch
//! and share its outcome.  Entries expire at
//! `min(JWT expiry, bundle expiry) − 5 minutes` and are evicted lazily on
//! access or explicitly on logout.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use qmcp_core::AwsCredentialBundle;
use qmcp_error::QmcpError;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, watch};
use tracing::debug;

/// Expiry safety buffer: entries die five minutes before their bundle does.
pub const EXPIRY_BUFFER: ChronoDuration = ChronoDuration::minutes(5);

/// Cache key — two distinct subjects never share an entry.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    /// Catalog base URL the credentials were exchanged against.
    pub catalog: String,
    /// JWT subject.
    pub subject: String,
    /// Hex SHA-256 of the bearer token.
    pub token_hash: String,
}

enum Slot {
    /// A fetch finished; the entry is valid until `expires_at`.
    Ready {
        bundle: AwsCredentialBundle,
        expires_at: DateTime<Utc>,
    },
    /// A fetch is in flight; waiters subscribe to the channel and re-check.
    Pending(watch::Receiver<bool>),
}

/// The process-wide credential cache.
#[derive(Clone, Default)]
pub struct CredentialCache {
    slots: Arc<Mutex<HashMap<CacheKey, Slot>>>,
}

impl CredentialCache {
    /// Create an empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// Look up `key`, or run `fetch` exactly once per key and share the
    /// outcome with every concurrent caller.
    ///
    /// `jwt_expiry` bounds the entry lifetime together with the bundle's
    /// own expiration.  A failed fetch is not cached; the next caller
    /// retries.
    pub async fn get_or_fetch<F, Fut>(
        &self,
        key: CacheKey,
        jwt_expiry: DateTime<Utc>,
        fetch: F,
    ) -> Result<AwsCredentialBundle, QmcpError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<AwsCredentialBundle, QmcpError>>,
    {
        // Fast path / wait path.  Loops until this task either observes a
        // fresh entry or wins the right to fetch.
        let tx = loop {
            let mut slots = self.slots.lock().await;
            match slots.get(&key) {
                Some(Slot::Ready { bundle, expires_at }) => {
                    if *expires_at > Utc::now() {
                        return Ok(bundle.clone());
                    }
                    debug!(subject = %key.subject, "evicting expired credential entry");
                    slots.remove(&key);
                }
                Some(Slot::Pending(rx)) => {
                    let mut rx = rx.clone();
                    drop(slots);
                    // Wakes on completion; a dropped sender (fetch failed)
                    // also wakes us, and the re-check loop handles it.
                    let _ = rx.changed().await;
                    continue;
                }
                None => {}
            }
            let (tx, rx) = watch::channel(false);
            slots.insert(key.clone(), Slot::Pending(rx));
            break tx;
        };

        match fetch().await {
            Ok(bundle) => {
                let expires_at = jwt_expiry.min(bundle.expiration) - EXPIRY_BUFFER;
                let mut slots = self.slots.lock().await;
                slots.insert(
                    key,
                    Slot::Ready {
                        bundle: bundle.clone(),
                        expires_at,
                    },
                );
                let _ = tx.send(true);
                Ok(bundle)
            }
            Err(err) => {
                let mut slots = self.slots.lock().await;
                slots.remove(&key);
                let _ = tx.send(true);
                Err(err)
            }
        }
    }

    /// Drop every entry belonging to `(catalog, subject)` — called on
    /// explicit logout.
    pub async fn evict_subject(&self, catalog: &str, subject: &str) {
        let mut slots = self.slots.lock().await;
        slots.retain(|key, _| !(key.catalog == catalog && key.subject == subject));
    }

    /// Number of live (non-pending, unexpired) entries.  Test/diagnostic
    /// aid.
    pub async fn len(&self) -> usize {
        let now = Utc::now();
        let slots = self.slots.lock().await;
        slots
            .values()
            .filter(|slot| matches!(slot, Slot::Ready { expires_at, .. } if *expires_at > now))
            .count()
    }

    /// Returns `true` when no live entries exist.
    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn key(subject: &str) -> CacheKey {
        CacheKey {
            catalog: "https://cat".into(),
            subject: subject.into(),
            token_hash: format!("hash-{subject}"),
        }
    }

    fn bundle(expires_in_mins: i64) -> AwsCredentialBundle {
        AwsCredentialBundle {
            access_key_id: "AKIA".into(),
            secret_access_key: "secret".into(),
            session_token: "token".into(),
            expiration: Utc::now() + ChronoDuration::minutes(expires_in_mins),
        }
    }

    fn far_future() -> DateTime<Utc> {
        Utc::now() + ChronoDuration::hours(12)
    }

    #[tokio::test]
    async fn second_call_hits_cache() {
        let cache = CredentialCache::new();
        let calls = Arc::new(AtomicUsize::new(0));

        for _ in 0..2 {
            let calls = calls.clone();
            cache
                .get_or_fetch(key("alice"), far_future(), move || async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok(bundle(60))
                })
                .await
                .unwrap();
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(cache.len().await, 1);
    }

    #[tokio::test]
    async fn concurrent_misses_collapse_to_one_fetch() {
        let cache = CredentialCache::new();
        let calls = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..16 {
            let cache = cache.clone();
            let calls = calls.clone();
            handles.push(tokio::spawn(async move {
                cache
                    .get_or_fetch(key("bob"), far_future(), move || async move {
                        calls.fetch_add(1, Ordering::SeqCst);
                        // Hold the slot long enough for every waiter to pile up.
                        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
                        Ok(bundle(60))
                    })
                    .await
                    .unwrap()
            }));
        }
        for h in handles {
            h.await.unwrap();
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1, "single flight per key");
    }

    #[tokio::test]
    async fn distinct_subjects_never_share_entries() {
        let cache = CredentialCache::new();
        let a = cache
            .get_or_fetch(key("alice"), far_future(), || async {
                Ok(AwsCredentialBundle {
                    access_key_id: "ALICE".into(),
                    ..bundle(60)
                })
            })
            .await
            .unwrap();
        let b = cache
            .get_or_fetch(key("bob"), far_future(), || async {
                Ok(AwsCredentialBundle {
                    access_key_id: "BOB".into(),
                    ..bundle(60)
                })
            })
            .await
            .unwrap();
        assert_eq!(a.access_key_id, "ALICE");
        assert_eq!(b.access_key_id, "BOB");
        assert_eq!(cache.len().await, 2);
    }

    #[tokio::test]
    async fn expired_entries_refetch() {
        let cache = CredentialCache::new();
        let calls = Arc::new(AtomicUsize::new(0));

        for _ in 0..2 {
            let calls = calls.clone();
            let _ = cache
                .get_or_fetch(key("carol"), far_future(), move || async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    // Expires inside the 5-minute buffer, so it is already
                    // stale when cached.
                    Ok(bundle(2))
                })
                .await;
        }
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn failed_fetch_is_not_cached() {
        let cache = CredentialCache::new();
        let calls = Arc::new(AtomicUsize::new(0));

        let c = calls.clone();
        let err = cache
            .get_or_fetch(key("dave"), far_future(), move || async move {
                c.fetch_add(1, Ordering::SeqCst);
                Err(QmcpError::internal("exchange down"))
            })
            .await;
        assert!(err.is_err());

        let c = calls.clone();
        cache
            .get_or_fetch(key("dave"), far_future(), move || async move {
                c.fetch_add(1, Ordering::SeqCst);
                Ok(bundle(60))
            })
            .await
            .unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn logout_evicts_only_that_subject() {
        let cache = CredentialCache::new();
        cache
            .get_or_fetch(key("alice"), far_future(), || async { Ok(bundle(60)) })
            .await
            .unwrap();
        cache
            .get_or_fetch(key("bob"), far_future(), || async { Ok(bundle(60)) })
            .await
            .unwrap();

        cache.evict_subject("https://cat", "alice").await;
        assert_eq!(cache.len().await, 1);
    }

    #[tokio::test]
    async fn jwt_expiry_bounds_entry_lifetime() {
        let cache = CredentialCache::new();
        // Bundle lives an hour, but the JWT dies in two minutes; with the
        // 5-minute buffer the entry is stale immediately.
        let soon = Utc::now() + ChronoDuration::minutes(2);
        let calls = Arc::new(AtomicUsize::new(0));
        for _ in 0..2 {
            let calls = calls.clone();
            let _ = cache
                .get_or_fetch(key("erin"), soon, move || async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok(bundle(60))
                })
                .await;
        }
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }
}
