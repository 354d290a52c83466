//! Lease-based distributed exclusion via an external coordination service.
//!
//! Provides mutual exclusion across independent processes and machines
//! with:
//! - Bounded, caller-visible wait to acquire (`unavailable` is a normal
//!   outcome, not a failure)
//! - Monotonically increasing fencing tokens for split-brain prevention
//! - Deadline-based automatic expiry for crash recovery
//! - Heartbeat renewal at half the lease while the critical section runs,
//!   so a slow decrement cannot silently outlive its lease
//! - Exponential backoff with jitter to prevent thundering herd

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use rand::Rng;
use tracing::{debug, warn};

use crate::api::{LockStateStore, StockStore, StoreError};
use crate::coordination::error::{
    CorruptedDataSnafu, DecrementError, InterruptedSnafu, LeaseLostSnafu, UnavailableSnafu,
};
use crate::coordination::types::{lock_key, now_unix_ms, FencingToken, LeaseEntry, LeaseState};
use crate::coordination::DecrementStrategy;
use crate::domain::{StockId, StockService};

/// Configuration for lease acquisition and hold duration.
#[derive(Debug, Clone)]
pub struct LeaseConfig {
    /// Maximum time to wait for the lease before reporting unavailable.
    pub wait_ms: u64,
    /// Hold duration of one grant before forced expiry, absent renewal.
    pub lease_ms: u64,
    /// Initial backoff between acquisition attempts in milliseconds.
    pub initial_backoff_ms: u64,
    /// Maximum backoff between acquisition attempts in milliseconds.
    pub max_backoff_ms: u64,
}

impl Default for LeaseConfig {
    fn default() -> Self {
        Self {
            wait_ms: 10_000,        // 10 seconds
            lease_ms: 1_000,        // 1 second
            initial_backoff_ms: 10, // 10ms initial
            max_backoff_ms: 1_000,  // 1 second max
        }
    }
}

/// Outcome of releasing a lease.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReleaseOutcome {
    /// This holder's lease was released.
    Released,
    /// The lease had already expired, been taken over, or been released.
    AlreadyReleased,
}

/// A granted lease on one key.
///
/// State is tagged, never a boolean: a lease that outlived its deadline
/// reports [`LeaseState::Expired`] even though nobody released it.
pub struct LeaseGuard {
    key: String,
    holder_id: String,
    token: FencingToken,
    /// Exact stored entry, used as the compare value for renew/release.
    entry_json: String,
    deadline_ms: u64,
    state: LeaseState,
}

impl LeaseGuard {
    /// Include this token in writes guarded by the lease; a service that
    /// validates tokens rejects stale holders.
    pub fn fencing_token(&self) -> FencingToken {
        self.token
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn holder_id(&self) -> &str {
        &self.holder_id
    }

    /// Deadline of the current grant in unix milliseconds.
    pub fn deadline_ms(&self) -> u64 {
        self.deadline_ms
    }

    /// Current tagged state, accounting for wall-clock expiry.
    pub fn state(&self) -> LeaseState {
        match self.state {
            LeaseState::Held if now_unix_ms() >= self.deadline_ms => LeaseState::Expired,
            other => other,
        }
    }
}

/// Outcome of a single acquisition attempt.
enum AcquireAttempt {
    Granted(LeaseGuard),
    Held { holder: String, deadline_ms: u64 },
    /// The entry changed between read and swap; retry immediately.
    Conflict,
}

/// Client for one named lease at the coordination service.
///
/// `(wait, lease)` semantics: wait up to `wait_ms` to acquire, hold for at
/// most `lease_ms` per grant before forced expiry.
pub struct LeaseLock<S: LockStateStore + ?Sized> {
    store: Arc<S>,
    key: String,
    holder_id: String,
    config: LeaseConfig,
}

impl<S: LockStateStore + ?Sized> LeaseLock<S> {
    pub fn new(
        store: Arc<S>,
        key: impl Into<String>,
        holder_id: impl Into<String>,
        config: LeaseConfig,
    ) -> Self {
        Self {
            store,
            key: key.into(),
            holder_id: holder_id.into(),
            config,
        }
    }

    /// Attempt to acquire the lease within the configured wait bound.
    ///
    /// `Ok(None)` means the lease stayed unavailable for the whole bound,
    /// a normal contention outcome. Retries with exponential backoff and
    /// jitter between attempts.
    pub async fn try_acquire(&self) -> Result<Option<LeaseGuard>, DecrementError> {
        let deadline = Instant::now() + Duration::from_millis(self.config.wait_ms);
        let mut backoff_ms = self.config.initial_backoff_ms;

        loop {
            match self.attempt().await? {
                AcquireAttempt::Granted(guard) => return Ok(Some(guard)),
                AcquireAttempt::Conflict => continue,
                AcquireAttempt::Held { holder, deadline_ms } => {
                    if Instant::now() >= deadline {
                        debug!(key = %self.key, holder = %holder, "wait bound elapsed, lease unavailable");
                        return Ok(None);
                    }

                    // Create rng here to avoid holding a non-Send type
                    // across the await.
                    let jitter = rand::rng().random_range(0..backoff_ms / 2 + 1);
                    let sleep_ms = backoff_ms + jitter;

                    debug!(
                        key = %self.key,
                        holder = %holder,
                        deadline_ms,
                        backoff_ms = sleep_ms,
                        "lease held, backing off"
                    );

                    tokio::time::sleep(Duration::from_millis(sleep_ms)).await;

                    backoff_ms = (backoff_ms * 2).min(self.config.max_backoff_ms);
                }
            }
        }
    }

    async fn attempt(&self) -> Result<AcquireAttempt, DecrementError> {
        let current = self.read_entry().await?;

        let (expected, new_token) = match current {
            Some(ref entry) if !entry.is_expired() => {
                return Ok(AcquireAttempt::Held {
                    holder: entry.holder_id.clone(),
                    deadline_ms: entry.deadline_ms,
                });
            }
            Some(ref entry) => {
                debug!(
                    key = %self.key,
                    previous_holder = %entry.holder_id,
                    "taking expired lease"
                );
                (Some(serde_json::to_string(entry)?), entry.fencing_token + 1)
            }
            None => (None, 1),
        };

        let entry = LeaseEntry::new(self.holder_id.clone(), new_token, self.config.lease_ms);
        let entry_json = serde_json::to_string(&entry)?;

        match self
            .store
            .compare_and_swap(&self.key, expected, entry_json.clone())
            .await
        {
            Ok(()) => {
                debug!(
                    key = %self.key,
                    holder = %self.holder_id,
                    fencing_token = new_token,
                    lease_ms = self.config.lease_ms,
                    "lease acquired"
                );
                Ok(AcquireAttempt::Granted(LeaseGuard {
                    key: self.key.clone(),
                    holder_id: self.holder_id.clone(),
                    token: FencingToken(new_token),
                    entry_json,
                    deadline_ms: entry.deadline_ms,
                    state: LeaseState::Held,
                }))
            }
            Err(StoreError::CasFailed { actual, .. }) => match actual {
                Some(json) => match serde_json::from_str::<LeaseEntry>(&json) {
                    Ok(entry) => Ok(AcquireAttempt::Held {
                        holder: entry.holder_id,
                        deadline_ms: entry.deadline_ms,
                    }),
                    Err(_) => Ok(AcquireAttempt::Conflict),
                },
                // The entry vanished between read and swap.
                None => Ok(AcquireAttempt::Conflict),
            },
            Err(source) => Err(DecrementError::Storage { source }),
        }
    }

    /// Extend the lease by another hold duration.
    ///
    /// Must happen before the deadline passes; fails with
    /// [`DecrementError::LeaseLost`] when another holder took over.
    pub async fn renew(&self, guard: &mut LeaseGuard) -> Result<(), DecrementError> {
        let renewed = LeaseEntry::new(
            self.holder_id.clone(),
            guard.token.value(),
            self.config.lease_ms,
        );
        let renewed_json = serde_json::to_string(&renewed)?;

        match self
            .store
            .compare_and_swap(&self.key, Some(guard.entry_json.clone()), renewed_json.clone())
            .await
        {
            Ok(()) => {
                guard.entry_json = renewed_json;
                guard.deadline_ms = renewed.deadline_ms;
                debug!(
                    key = %self.key,
                    fencing_token = guard.token.value(),
                    "lease renewed"
                );
                Ok(())
            }
            Err(StoreError::CasFailed { .. }) => {
                guard.state = LeaseState::Expired;
                LeaseLostSnafu {
                    key: self.key.clone(),
                }
                .fail()
            }
            Err(source) => Err(DecrementError::Storage { source }),
        }
    }

    /// Release the lease.
    ///
    /// An already-expired, taken-over, or already-released lease is
    /// tolerated and reported as [`ReleaseOutcome::AlreadyReleased`].
    pub async fn release(
        &self,
        guard: &mut LeaseGuard,
    ) -> Result<ReleaseOutcome, DecrementError> {
        if guard.state == LeaseState::Released {
            return Ok(ReleaseOutcome::AlreadyReleased);
        }

        let released_json = serde_json::to_string(
            &serde_json::from_str::<LeaseEntry>(&guard.entry_json)?.released(),
        )?;

        match self
            .store
            .compare_and_swap(&self.key, Some(guard.entry_json.clone()), released_json)
            .await
        {
            Ok(()) => {
                guard.state = LeaseState::Released;
                debug!(
                    key = %self.key,
                    fencing_token = guard.token.value(),
                    "lease released"
                );
                Ok(ReleaseOutcome::Released)
            }
            Err(StoreError::CasFailed { .. }) => {
                guard.state = LeaseState::Expired;
                warn!(
                    key = %self.key,
                    fencing_token = guard.token.value(),
                    "lease release skipped: already expired or taken over"
                );
                Ok(ReleaseOutcome::AlreadyReleased)
            }
            Err(source) => Err(DecrementError::Storage { source }),
        }
    }

    async fn read_entry(&self) -> Result<Option<LeaseEntry>, DecrementError> {
        let value = match self.store.read(&self.key).await {
            Ok(value) => value,
            Err(source) => return Err(DecrementError::Storage { source }),
        };
        match value {
            Some(json) => {
                let entry = serde_json::from_str::<LeaseEntry>(&json).map_err(|_| {
                    CorruptedDataSnafu {
                        key: self.key.clone(),
                        reason: "invalid JSON".to_string(),
                    }
                    .build()
                })?;
                Ok(Some(entry))
            }
            None => Ok(None),
        }
    }
}

/// Distributed lease strategy: exclusion coordinated across processes and
/// machines.
///
/// A denied acquisition within the wait bound returns
/// [`DecrementError::Unavailable`] without running the decrement. While
/// the decrement runs, a heartbeat renews the lease at half the hold
/// duration; a lost lease aborts the decrement instead of letting two
/// holders proceed.
pub struct DistributedLeaseStrategy<C, S>
where
    C: LockStateStore + ?Sized + 'static,
    S: StockStore + ?Sized + 'static,
{
    coordinator: Arc<C>,
    service: Arc<StockService<S>>,
    /// Identifies this process/task group in lease entries.
    holder_id: String,
    config: LeaseConfig,
}

impl<C, S> DistributedLeaseStrategy<C, S>
where
    C: LockStateStore + ?Sized + 'static,
    S: StockStore + ?Sized + 'static,
{
    pub fn new(coordinator: Arc<C>, store: Arc<S>, holder_id: impl Into<String>) -> Self {
        Self::with_config(coordinator, store, holder_id, LeaseConfig::default())
    }

    pub fn with_config(
        coordinator: Arc<C>,
        store: Arc<S>,
        holder_id: impl Into<String>,
        config: LeaseConfig,
    ) -> Self {
        Self {
            coordinator,
            service: Arc::new(StockService::new(store)),
            holder_id: holder_id.into(),
            config,
        }
    }
}

#[async_trait]
impl<C, S> DecrementStrategy for DistributedLeaseStrategy<C, S>
where
    C: LockStateStore + ?Sized + 'static,
    S: StockStore + ?Sized + 'static,
{
    async fn decrease(&self, id: StockId, amount: u64) -> Result<(), DecrementError> {
        let key = lock_key(id);
        let lock = LeaseLock::new(
            Arc::clone(&self.coordinator),
            key.clone(),
            self.holder_id.clone(),
            self.config.clone(),
        );

        let Some(mut guard) = lock.try_acquire().await? else {
            debug!(key = %key, "lease unavailable, decrement not attempted");
            return UnavailableSnafu { key }.fail();
        };

        let renew_interval = Duration::from_millis((self.config.lease_ms / 2).max(1));
        let service = Arc::clone(&self.service);
        let mut operation = tokio::spawn(async move { service.decrement(id, amount).await });

        let result = loop {
            tokio::select! {
                joined = &mut operation => {
                    break match joined {
                        Ok(result) => result,
                        Err(join_error) if join_error.is_cancelled() => {
                            InterruptedSnafu { operation: "decrement" }.fail()
                        }
                        Err(join_error) => std::panic::resume_unwind(join_error.into_panic()),
                    };
                }
                _ = tokio::time::sleep(renew_interval) => {
                    if let Err(error) = lock.renew(&mut guard).await {
                        warn!(key = %key, %error, "lease renewal failed, aborting decrement");
                        operation.abort();
                        let _ = (&mut operation).await;
                        break LeaseLostSnafu { key: key.clone() }.fail();
                    }
                }
            }
        };

        if let Err(error) = lock.release(&mut guard).await {
            warn!(key = %key, %error, "lease release failed");
        }

        result
    }
}
