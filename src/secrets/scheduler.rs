//! One-shot renewal scheduling for a single lease lineage.
//!
//! Each installed lease gets a fresh generation number. A timer task remembers the
//! generation it was scheduled for and, when it fires, claims the lineage with a
//! compare-and-set on `(generation, Scheduled)`. A timer whose generation is no
//! longer current is stale and does nothing, so at most one renew call per lineage
//! is ever in flight, whatever the cancellation races.
//!
//! Renewed leases are handled in the same task: the task installs the new lease,
//! registers a new timer under the new generation, and loops. A lineage renewed
//! thousands of times never grows the stack.

use async_trait::async_trait;
use dashmap::DashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn, Instrument};

use super::error::Result;
use super::lease::Lease;
use super::strategy::LeaseStrategy;

/// Default floor for renewal delays.
pub const DEFAULT_MIN_RENEWAL: Duration = Duration::from_secs(10);

/// Default time before expiry at which a lease is renewed.
pub const DEFAULT_EXPIRY_THRESHOLD: Duration = Duration::from_secs(60);

/// Delay until a lease should be renewed: `max(min_renewal, duration - expiry_threshold)`.
///
/// The floor keeps short leases (or a large threshold) from turning into a renewal
/// storm; the subtraction saturates at zero.
pub fn renewal_delay(lease_duration: Duration, min_renewal: Duration, expiry_threshold: Duration) -> Duration {
    lease_duration.saturating_sub(expiry_threshold).max(min_renewal)
}

/// The renew capability handed to the scheduler.
#[async_trait]
pub trait RenewLease: Send + Sync {
    /// Renew `lease`. Returning a lease without an id stops renewal for the lineage.
    async fn renew(&self, lease: &Lease) -> Result<Lease>;

    /// Whether a freshly returned lease should be scheduled again.
    fn should_reschedule(&self, lease: &Lease) -> bool {
        lease.is_renewable()
    }
}

/// Adapts an async closure into a [`RenewLease`].
pub struct RenewFn<F>(F);

/// Build a [`RenewLease`] from an async closure.
pub fn renew_fn<F, Fut>(f: F) -> RenewFn<F>
where
    F: Fn(Lease) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Lease>> + Send,
{
    RenewFn(f)
}

#[async_trait]
impl<F, Fut> RenewLease for RenewFn<F>
where
    F: Fn(Lease) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Lease>> + Send,
{
    async fn renew(&self, lease: &Lease) -> Result<Lease> {
        (self.0)(lease.clone()).await
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SlotState {
    /// A timer is pending for this generation.
    Scheduled,
    /// The timer fired and claimed the lineage; a renew call is in flight.
    Renewing,
    /// No timer; the lease is kept only so it can be reported or revoked.
    Dormant,
}

#[derive(Debug)]
struct CurrentLease {
    generation: u64,
    lease: Lease,
    state: SlotState,
    /// When the lease itself runs out, measured from installation.
    deadline: Instant,
}

struct Inner {
    lineage: String,
    strategy: LeaseStrategy,
    current: Mutex<Option<CurrentLease>>,
    timers: DashMap<u64, CancellationToken>,
    next_generation: AtomicU64,
}

/// Renewal scheduler for one lease lineage.
///
/// Cloning yields another handle to the same lineage.
#[derive(Clone)]
pub struct LeaseRenewalScheduler {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for LeaseRenewalScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LeaseRenewalScheduler")
            .field("lineage", &self.inner.lineage)
            .field("strategy", &self.inner.strategy)
            .field("pending_timers", &self.inner.timers.len())
            .finish()
    }
}

impl LeaseRenewalScheduler {
    /// Create a scheduler. `lineage` labels log lines and spans.
    pub fn new(lineage: impl Into<String>, strategy: LeaseStrategy) -> Self {
        Self {
            inner: Arc::new(Inner {
                lineage: lineage.into(),
                strategy,
                current: Mutex::new(None),
                timers: DashMap::new(),
                next_generation: AtomicU64::new(0),
            }),
        }
    }

    /// Make `lease` current and schedule its renewal.
    ///
    /// Replaces whatever lease was current and cancels its pending timer. Returns
    /// immediately; the renew call runs on a spawned task. Must be called from
    /// within a Tokio runtime.
    pub fn schedule_renewal(
        &self,
        renew: Arc<dyn RenewLease>,
        lease: Lease,
        min_renewal: Duration,
        expiry_threshold: Duration,
    ) {
        let delay = renewal_delay(lease.lease_duration(), min_renewal, expiry_threshold);
        let (generation, timer) = self.inner.install(lease.clone());

        info!(
            lineage = %self.inner.lineage,
            lease_id = %lease.lease_id(),
            delay_secs = delay.as_secs(),
            "Scheduled lease renewal"
        );

        let span = crate::lease_span!("renew", lineage = %self.inner.lineage);
        let inner = self.inner.clone();
        tokio::spawn(
            async move {
                inner.run(renew, generation, timer, delay, min_renewal, expiry_threshold).await;
            }
            .instrument(span),
        );
    }

    /// Cancel every pending timer and forget the current lease.
    ///
    /// Idempotent. Never waits for an in-flight renewal: such a renewal finds the
    /// slot cleared when it tries to install its result and discards it. Returns
    /// the lease that was current, if any, so the caller can revoke it.
    pub fn disable_schedule_renewal(&self) -> Option<Lease> {
        let previous = self.inner.slot().take();

        let generations: Vec<u64> = self.inner.timers.iter().map(|entry| *entry.key()).collect();
        for generation in generations {
            if let Some((_, timer)) = self.inner.timers.remove(&generation) {
                timer.cancel();
            }
        }

        if let Some(previous) = &previous {
            debug!(
                lineage = %self.inner.lineage,
                lease_id = %previous.lease.lease_id(),
                "Disabled lease renewal"
            );
        }
        previous.map(|current| current.lease)
    }

    /// The current lease of this lineage, renewing or not.
    pub fn current_lease(&self) -> Option<Lease> {
        self.inner.slot().as_ref().map(|current| current.lease.clone())
    }

    /// Whether the lineage holds a lease at all.
    pub fn is_leased(&self) -> bool {
        self.inner.slot().is_some()
    }

    /// Whether a renewal is scheduled or in flight.
    pub fn is_active(&self) -> bool {
        self.inner.slot().as_ref().is_some_and(|current| current.state != SlotState::Dormant)
    }

    /// Number of timers that have not fired or been cancelled yet.
    pub fn pending_timers(&self) -> usize {
        self.inner.timers.len()
    }

    pub fn strategy(&self) -> LeaseStrategy {
        self.inner.strategy
    }
}

impl Inner {
    fn slot(&self) -> MutexGuard<'_, Option<CurrentLease>> {
        // A panic while holding the lock cannot leave the slot half-written.
        self.current.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn next_generation(&self) -> u64 {
        self.next_generation.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Unconditionally make `lease` current with a pending timer.
    fn install(&self, lease: Lease) -> (u64, CancellationToken) {
        let generation = self.next_generation();
        let timer = CancellationToken::new();
        // Register the timer before publishing the generation so that a fast
        // disable or supersede always finds it.
        self.timers.insert(generation, timer.clone());

        let deadline = Instant::now() + lease.lease_duration();
        let previous = self.slot().replace(CurrentLease {
            generation,
            lease,
            state: SlotState::Scheduled,
            deadline,
        });

        if let Some(previous) = previous {
            if let Some((_, stale)) = self.timers.remove(&previous.generation) {
                stale.cancel();
            }
        }
        (generation, timer)
    }

    /// Compare-and-set `(generation, Scheduled)` to `Renewing`.
    fn claim(&self, generation: u64) -> Option<Lease> {
        let mut slot = self.slot();
        match slot.as_mut() {
            Some(current) if current.generation == generation && current.state == SlotState::Scheduled => {
                current.state = SlotState::Renewing;
                Some(current.lease.clone())
            }
            _ => None,
        }
    }

    /// Compare-and-set `(claimed, Renewing)` to a new lease. With `reschedule`, a
    /// timer is registered for the new generation and returned.
    fn advance(&self, claimed: u64, lease: Lease, reschedule: bool) -> Option<(u64, CancellationToken)> {
        let mut slot = self.slot();
        let current = slot.as_mut()?;
        if current.generation != claimed || current.state != SlotState::Renewing {
            return None;
        }

        let generation = self.next_generation();
        let timer = CancellationToken::new();
        if reschedule {
            self.timers.insert(generation, timer.clone());
        }
        *current = CurrentLease {
            generation,
            deadline: Instant::now() + lease.lease_duration(),
            lease,
            state: if reschedule { SlotState::Scheduled } else { SlotState::Dormant },
        };
        Some((generation, timer))
    }

    /// Keep the claimed lease and schedule a retry after `retry_in`, unless the
    /// lease runs out first.
    fn retain(&self, claimed: u64, retry_in: Duration) -> Option<(u64, CancellationToken)> {
        let mut slot = self.slot();
        let current = slot.as_mut()?;
        if current.generation != claimed || current.state != SlotState::Renewing {
            return None;
        }
        if Instant::now() + retry_in >= current.deadline {
            current.state = SlotState::Dormant;
            return None;
        }

        let generation = self.next_generation();
        let timer = CancellationToken::new();
        self.timers.insert(generation, timer.clone());
        current.generation = generation;
        current.state = SlotState::Scheduled;
        Some((generation, timer))
    }

    /// The claimed lineage stops renewing. With `forget`, the lease is cleared too.
    /// Returns `false` when the lineage moved on in the meantime.
    fn settle(&self, claimed: u64, forget: bool) -> bool {
        let mut slot = self.slot();
        if !slot.as_ref().is_some_and(|current| current.generation == claimed) {
            return false;
        }
        if forget {
            *slot = None;
        } else if let Some(current) = slot.as_mut() {
            current.state = SlotState::Dormant;
        }
        true
    }

    async fn run(
        &self,
        renew: Arc<dyn RenewLease>,
        mut generation: u64,
        mut timer: CancellationToken,
        mut delay: Duration,
        min_renewal: Duration,
        expiry_threshold: Duration,
    ) {
        loop {
            tokio::select! {
                _ = timer.cancelled() => {
                    debug!(generation, "Renewal timer cancelled");
                    return;
                }
                _ = tokio::time::sleep(delay) => {}
            }
            self.timers.remove(&generation);

            let Some(lease) = self.claim(generation) else {
                debug!(generation, "Current lease has changed, skipping renewal");
                return;
            };

            match renew.renew(&lease).await {
                Ok(next) if !next.has_lease_id() => {
                    if self.settle(generation, true) {
                        info!(lease_id = %lease.lease_id(), "Lease is not renewed any further");
                    } else {
                        debug!(lease_id = %lease.lease_id(), "Lineage was superseded during renewal");
                    }
                    return;
                }
                Ok(next) => {
                    let reschedule = renew.should_reschedule(&next);
                    let next_delay = renewal_delay(next.lease_duration(), min_renewal, expiry_threshold);
                    let next_id = next.lease_id().to_string();
                    match self.advance(generation, next, reschedule) {
                        Some((next_generation, next_timer)) if reschedule => {
                            info!(
                                lease_id = %next_id,
                                delay_secs = next_delay.as_secs(),
                                "Renewed lease, scheduled next renewal"
                            );
                            generation = next_generation;
                            timer = next_timer;
                            delay = next_delay;
                        }
                        Some(_) => {
                            debug!(lease_id = %next_id, "Renewed lease is not scheduled again");
                            return;
                        }
                        None => {
                            debug!(lease_id = %next_id, "Lineage was superseded during renewal, discarding result");
                            return;
                        }
                    }
                }
                Err(e) => {
                    if self.strategy.should_drop(&e) {
                        warn!(
                            lease_id = %lease.lease_id(),
                            strategy = %self.strategy,
                            error = %e,
                            "Lease renewal failed, dropping lease"
                        );
                        self.settle(generation, false);
                        return;
                    }
                    match self.retain(generation, min_renewal) {
                        Some((next_generation, next_timer)) => {
                            warn!(
                                lease_id = %lease.lease_id(),
                                strategy = %self.strategy,
                                retry_secs = min_renewal.as_secs(),
                                error = %e,
                                "Lease renewal failed, retaining lease"
                            );
                            generation = next_generation;
                            timer = next_timer;
                            delay = min_renewal;
                        }
                        None => {
                            warn!(
                                lease_id = %lease.lease_id(),
                                error = %e,
                                "Lease renewal failed and the lease runs out before a retry"
                            );
                            return;
                        }
                    }
                }
            }
        }
    }
}
