//! Bounded pool of logical upsert slots.
//!
//! A slot must be held for the whole embed + upsert round trip of a batch, so
//! the pool size is the ceiling on concurrent round trips against the store.
//! Slots are handed out through a semaphore; the slot bookkeeping itself is
//! only touched under one lock, on acquire and on release.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use crate::error::{ConfigError, PoolError};
use crate::models::{ConnectionPoolConfig, ConnectionPoolHealth};

/// Connection pool limiting concurrent store round trips.
#[derive(Clone)]
pub struct ConnectionPool {
    inner: Arc<PoolInner>,
}

struct PoolInner {
    config: ConnectionPoolConfig,
    semaphore: Arc<Semaphore>,
    slots: Mutex<SlotState>,
    total_acquisitions: AtomicU64,
    acquire_timeouts: AtomicU64,
    busy_micros: AtomicU64,
}

struct SlotState {
    idle: Vec<IdleSlot>,
    active: usize,
    next_id: u64,
}

struct IdleSlot {
    id: u64,
    idle_since: Instant,
}

impl PoolInner {
    fn lock(&self) -> MutexGuard<'_, SlotState> {
        self.slots.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Drop idle slots beyond `min_connections` that outlived the idle timeout.
    fn reap(&self, slots: &mut SlotState) -> usize {
        let idle_timeout = Duration::from_millis(self.config.idle_timeout_ms);
        let keep_warm = self.config.min_connections.saturating_sub(slots.active);
        let before = slots.idle.len();

        // Most recently used first, so the warm slots survive
        slots
            .idle
            .sort_by(|a, b| b.idle_since.cmp(&a.idle_since));
        let mut kept = 0;
        slots.idle.retain(|slot| {
            kept += 1;
            kept <= keep_warm || slot.idle_since.elapsed() < idle_timeout
        });

        let reclaimed = before - slots.idle.len();
        if reclaimed > 0 {
            tracing::debug!(reclaimed, idle = slots.idle.len(), "reclaimed idle pool slots");
        }
        reclaimed
    }
}

/// A held pool slot; released when dropped.
pub struct PooledSlot {
    inner: Arc<PoolInner>,
    id: u64,
    acquired_at: Instant,
    _permit: OwnedSemaphorePermit,
}

impl PooledSlot {
    pub fn id(&self) -> u64 {
        self.id
    }
}

impl std::fmt::Debug for PooledSlot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PooledSlot").field("id", &self.id).finish()
    }
}

impl Drop for PooledSlot {
    fn drop(&mut self) {
        let busy = self.acquired_at.elapsed();
        self.inner
            .busy_micros
            .fetch_add(busy.as_micros() as u64, Ordering::Relaxed);

        let mut slots = self.inner.lock();
        slots.active = slots.active.saturating_sub(1);
        slots.idle.push(IdleSlot {
            id: self.id,
            idle_since: Instant::now(),
        });
        self.inner.reap(&mut slots);
        // The permit is released after this body, once the slot is back
    }
}

impl ConnectionPool {
    /// Build a pool, failing fast on an unusable configuration.
    pub fn new(config: ConnectionPoolConfig) -> Result<Self, ConfigError> {
        config.validate()?;

        let now = Instant::now();
        let idle = (0..config.min_connections as u64)
            .map(|id| IdleSlot {
                id,
                idle_since: now,
            })
            .collect();

        Ok(Self {
            inner: Arc::new(PoolInner {
                semaphore: Arc::new(Semaphore::new(config.max_connections)),
                slots: Mutex::new(SlotState {
                    idle,
                    active: 0,
                    next_id: config.min_connections as u64,
                }),
                config,
                total_acquisitions: AtomicU64::new(0),
                acquire_timeouts: AtomicU64::new(0),
                busy_micros: AtomicU64::new(0),
            }),
        })
    }

    pub fn config(&self) -> &ConnectionPoolConfig {
        &self.inner.config
    }

    /// Wait for a free slot.
    ///
    /// Each attempt waits up to `acquire_timeout_ms`; `max_retries` further
    /// attempts follow a timeout before `PoolError::AcquireTimeout` is returned.
    pub async fn acquire(&self) -> Result<PooledSlot, PoolError> {
        let timeout_ms = self.inner.config.acquire_timeout_ms;
        let attempts = self.inner.config.max_retries + 1;

        for attempt in 1..=attempts {
            let wait = tokio::time::timeout(
                Duration::from_millis(timeout_ms),
                Arc::clone(&self.inner.semaphore).acquire_owned(),
            )
            .await;

            match wait {
                Ok(Ok(permit)) => {
                    self.inner.total_acquisitions.fetch_add(1, Ordering::Relaxed);
                    let id = {
                        let mut slots = self.inner.lock();
                        self.inner.reap(&mut slots);
                        let id = match slots.idle.pop() {
                            Some(slot) => slot.id,
                            None => {
                                let id = slots.next_id;
                                slots.next_id += 1;
                                id
                            }
                        };
                        slots.active += 1;
                        id
                    };
                    return Ok(PooledSlot {
                        inner: Arc::clone(&self.inner),
                        id,
                        acquired_at: Instant::now(),
                        _permit: permit,
                    });
                }
                Ok(Err(_)) => return Err(PoolError::Closed),
                Err(_) => {
                    self.inner.acquire_timeouts.fetch_add(1, Ordering::Relaxed);
                    tracing::debug!(attempt, attempts, timeout_ms, "pool slot acquisition timed out");
                }
            }
        }

        Err(PoolError::AcquireTimeout {
            attempts,
            timeout_ms,
        })
    }

    /// Reclaim expired idle slots now; returns how many were dropped.
    pub fn reap_idle(&self) -> usize {
        let mut slots = self.inner.lock();
        self.inner.reap(&mut slots)
    }

    /// Total time slots have been held since the pool was created.
    pub fn busy_time(&self) -> Duration {
        Duration::from_micros(self.inner.busy_micros.load(Ordering::Relaxed))
    }

    /// Stop handing out slots; pending and future acquisitions fail.
    pub fn close(&self) {
        self.inner.semaphore.close();
    }

    /// Current pool usage.
    ///
    /// `health_score` starts at 100, is scaled by the share of acquisition
    /// attempts that did not time out, and loses up to 20 points as the pool
    /// approaches saturation.
    pub fn health(&self) -> ConnectionPoolHealth {
        let (active, idle) = {
            let mut slots = self.inner.lock();
            self.inner.reap(&mut slots);
            (slots.active, slots.idle.len())
        };
        let max = self.inner.config.max_connections;
        let acquisitions = self.inner.total_acquisitions.load(Ordering::Relaxed);
        let timeouts = self.inner.acquire_timeouts.load(Ordering::Relaxed);

        let attempts = acquisitions + timeouts;
        let success_ratio = if attempts == 0 {
            1.0
        } else {
            acquisitions as f64 / attempts as f64
        };
        let saturation = active as f64 / max as f64;
        let health_score = (100.0 * success_ratio * (1.0 - 0.2 * saturation)).clamp(0.0, 100.0);

        ConnectionPoolHealth {
            active_connections: active,
            idle_connections: idle,
            total_connections: active + idle,
            max_connections: max,
            total_acquisitions: acquisitions,
            acquire_timeouts: timeouts,
            health_score,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn config(max: usize, min: usize) -> ConnectionPoolConfig {
        ConnectionPoolConfig {
            max_connections: max,
            min_connections: min,
            acquire_timeout_ms: 1_000,
            idle_timeout_ms: 60_000,
            max_retries: 0,
        }
    }

    #[test]
    fn test_zero_max_connections_fails_fast() {
        assert!(ConnectionPool::new(config(0, 0)).is_err());
    }

    #[test]
    fn test_warm_slots() {
        let pool = ConnectionPool::new(config(4, 2)).unwrap();
        let health = pool.health();
        assert_eq!(health.idle_connections, 2);
        assert_eq!(health.active_connections, 0);
        assert_eq!(health.total_connections, 2);
        assert_eq!(health.health_score, 100.0);
    }

    #[tokio::test]
    async fn test_acquire_and_release() {
        let pool = ConnectionPool::new(config(2, 1)).unwrap();
        let slot = pool.acquire().await.unwrap();
        let health = pool.health();
        assert_eq!(health.active_connections, 1);
        assert_eq!(health.idle_connections, 0);

        drop(slot);
        let health = pool.health();
        assert_eq!(health.active_connections, 0);
        assert_eq!(health.idle_connections, 1);
        assert_eq!(health.total_acquisitions, 1);
    }

    #[tokio::test]
    async fn test_acquire_timeout_with_retries() {
        let pool = ConnectionPool::new(ConnectionPoolConfig {
            acquire_timeout_ms: 20,
            max_retries: 1,
            ..config(1, 0)
        })
        .unwrap();

        let _held = pool.acquire().await.unwrap();
        let err = pool.acquire().await.unwrap_err();
        assert!(matches!(err, PoolError::AcquireTimeout { attempts: 2, timeout_ms: 20 }));

        let health = pool.health();
        assert_eq!(health.acquire_timeouts, 2);
        assert!(health.health_score < 100.0);
    }

    #[tokio::test]
    async fn test_requests_queue_instead_of_failing() {
        let pool = ConnectionPool::new(config(2, 0)).unwrap();
        let active = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let pool = pool.clone();
            let active = Arc::clone(&active);
            let peak = Arc::clone(&peak);
            handles.push(tokio::spawn(async move {
                let _slot = pool.acquire().await.unwrap();
                let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(5)).await;
                active.fetch_sub(1, Ordering::SeqCst);
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        assert!(peak.load(Ordering::SeqCst) <= 2);
        let health = pool.health();
        assert_eq!(health.total_acquisitions, 8);
        assert_eq!(health.acquire_timeouts, 0);
        assert!(pool.busy_time() >= Duration::from_millis(8 * 5));
    }

    #[tokio::test]
    async fn test_idle_slots_reclaimed_down_to_min() {
        let pool = ConnectionPool::new(ConnectionPoolConfig {
            idle_timeout_ms: 20,
            ..config(4, 1)
        })
        .unwrap();

        let a = pool.acquire().await.unwrap();
        let b = pool.acquire().await.unwrap();
        let c = pool.acquire().await.unwrap();
        drop((a, b, c));
        assert_eq!(pool.health().idle_connections, 3);

        tokio::time::sleep(Duration::from_millis(40)).await;
        assert_eq!(pool.reap_idle(), 2);
        assert_eq!(pool.reap_idle(), 0);
        let health = pool.health();
        assert_eq!(health.idle_connections, 1);
        assert_eq!(health.total_connections, 1);
    }

    #[tokio::test]
    async fn test_closed_pool_rejects() {
        let pool = ConnectionPool::new(config(1, 0)).unwrap();
        pool.close();
        assert!(matches!(pool.acquire().await, Err(PoolError::Closed)));
    }
}
