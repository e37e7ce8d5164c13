//! Distributed lock for the migration saga: one lock per object, with a
//! lease and a heartbeat renewal task so a crashed saga doesn't wedge the
//! object forever.

use crate::config::ResilienceSettings;
use crate::error::{EventStoreError, Result};
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use uuid::Uuid;

/// Characters unsafe in most key-value/filesystem backends, replaced in lock
/// keys to keep them portable across store implementations.
const UNSAFE_CHARS: &[char] = &['/', '\\', ':', '?', '#', '[', ']', '@'];

fn sanitize_key(object_id: &str) -> String {
    let sanitized: String = object_id
        .chars()
        .map(|c| if UNSAFE_CHARS.contains(&c) { '-' } else { c })
        .collect();
    format!("{sanitized}.lock")
}

#[derive(Debug, Clone)]
struct LeaseState {
    holder: Uuid,
    expires_at: DateTime<Utc>,
}

/// In-process distributed lock manager keyed by sanitized object id. A real
/// multi-node deployment backs this with a store that supports atomic
/// compare-and-swap (e.g. the same `DataStore` backend); the lease/heartbeat
/// protocol here is what such a backend must honor.
pub struct LockManager {
    leases: Arc<DashMap<String, LeaseState>>,
    lease_duration: Duration,
    heartbeat_interval: Duration,
    backoff: ResilienceSettings,
}

impl LockManager {
    pub fn new(lease_duration: Duration, heartbeat_interval: Duration) -> Self {
        Self {
            leases: Arc::new(DashMap::new()),
            lease_duration,
            heartbeat_interval,
            backoff: ResilienceSettings::default(),
        }
    }

    /// Acquire the lock for `object_id`, waiting up to `timeout` for a
    /// conflicting holder's lease to expire. Polling backs off exponentially
    /// (with jitter) between attempts instead of busy-polling at a fixed
    /// interval.
    pub async fn acquire(&self, object_id: &str, timeout: Duration) -> Result<LockGuard> {
        let key = sanitize_key(object_id);
        let holder = Uuid::new_v4();
        let deadline = tokio::time::Instant::now() + timeout;
        let mut attempt = 0u32;

        loop {
            let now = Utc::now();
            let acquired = match self.leases.entry(key.clone()) {
                dashmap::mapref::entry::Entry::Vacant(v) => {
                    v.insert(LeaseState {
                        holder,
                        expires_at: now + ChronoDuration::from_std(self.lease_duration).unwrap(),
                    });
                    true
                }
                dashmap::mapref::entry::Entry::Occupied(mut o) => {
                    if o.get().expires_at <= now {
                        o.insert(LeaseState {
                            holder,
                            expires_at: now + ChronoDuration::from_std(self.lease_duration).unwrap(),
                        });
                        true
                    } else {
                        false
                    }
                }
            };

            if acquired {
                return Ok(LockGuard {
                    key,
                    holder,
                    leases: self.leases.clone(),
                    heartbeat_interval: self.heartbeat_interval,
                    lease_duration: self.lease_duration,
                    cancel: Arc::new(Notify::new()),
                    lost: Arc::new(std::sync::atomic::AtomicBool::new(false)),
                });
            }

            if tokio::time::Instant::now() >= deadline {
                return Err(EventStoreError::LockTimeout(object_id.to_string()));
            }
            tokio::time::sleep(self.backoff.delay_for_attempt(attempt)).await;
            attempt = attempt.saturating_add(1);
        }
    }
}

/// Held lock. Dropping it releases the lease immediately; callers that need
/// the lease kept alive across `await` points should call `heartbeat_loop`
/// in a background task and watch `is_lost`.
pub struct LockGuard {
    key: String,
    holder: Uuid,
    leases: Arc<DashMap<String, LeaseState>>,
    heartbeat_interval: Duration,
    lease_duration: Duration,
    cancel: Arc<Notify>,
    lost: Arc<std::sync::atomic::AtomicBool>,
}

impl LockGuard {
    /// True once a heartbeat failed to renew before the lease expired; the
    /// saga must cancel promptly when this flips to avoid split-brain.
    pub fn is_lost(&self) -> bool {
        self.lost.load(std::sync::atomic::Ordering::SeqCst)
    }

    /// Renew the lease once. Fails with `LockLost` if another holder has
    /// since taken the key (the lease was allowed to expire).
    pub fn renew(&self) -> Result<()> {
        let mut entry = self
            .leases
            .get_mut(&self.key)
            .ok_or_else(|| EventStoreError::LockLost(self.key.clone()))?;
        if entry.holder != self.holder {
            self.lost.store(true, std::sync::atomic::Ordering::SeqCst);
            return Err(EventStoreError::LockLost(self.key.clone()));
        }
        entry.expires_at = Utc::now() + ChronoDuration::from_std(self.lease_duration).unwrap();
        Ok(())
    }

    /// Spawn a background heartbeat that renews the lease at
    /// `heartbeat_interval` until `release` is called or a renewal fails.
    pub fn spawn_heartbeat(self: &Arc<Self>) -> tokio::task::JoinHandle<()> {
        let guard = self.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = tokio::time::sleep(guard.heartbeat_interval) => {
                        if guard.renew().is_err() {
                            tracing::warn!(key = %guard.key, "lock heartbeat failed, lease may be lost");
                            return;
                        }
                    }
                    _ = guard.cancel.notified() => return,
                }
            }
        })
    }

    pub fn release(&self) {
        self.cancel.notify_one();
        if let Some((_, entry)) = self.leases.remove(&self.key) {
            if entry.holder != self.holder {
                self.leases.insert(self.key.clone(), entry);
            }
        }
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        self.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn acquire_then_release_allows_reacquire() {
        let manager = LockManager::new(Duration::from_millis(500), Duration::from_millis(100));
        {
            let _guard = manager.acquire("order-1", Duration::from_millis(50)).await.unwrap();
        }
        assert!(manager.acquire("order-1", Duration::from_millis(50)).await.is_ok());
    }

    #[tokio::test]
    async fn acquire_times_out_while_lease_held() {
        let manager = LockManager::new(Duration::from_secs(5), Duration::from_secs(1));
        let _guard = manager.acquire("order-1", Duration::from_millis(50)).await.unwrap();
        let result = manager.acquire("order-1", Duration::from_millis(50)).await;
        assert!(matches!(result, Err(EventStoreError::LockTimeout(_))));
    }

    #[tokio::test]
    async fn acquire_succeeds_after_lease_expires() {
        let manager = LockManager::new(Duration::from_millis(30), Duration::from_millis(10));
        let guard = manager.acquire("order-1", Duration::from_millis(10)).await.unwrap();
        std::mem::forget(guard);

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(manager.acquire("order-1", Duration::from_millis(200)).await.is_ok());
    }

    #[test]
    fn sanitize_key_replaces_unsafe_characters() {
        assert_eq!(sanitize_key("tenant/order:42"), "tenant-order-42.lock");
    }
}
