//! In-flight claims and backoff bookkeeping.

use adaptune_core::{TargetId, Time};
use adaptune_experiment::Claim;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

/// Exponential backoff configuration for rate-limited targets.
#[derive(Debug, Clone, Copy)]
pub struct BackoffConfig {
    /// Delay after the first rate limit
    pub base: Duration,
    /// Upper bound on the delay
    pub cap: Duration,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            base: Duration::from_secs(30),
            cap: Duration::from_secs(30 * 60),
        }
    }
}

impl BackoffConfig {
    /// Create the default configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the initial delay.
    pub fn with_base(mut self, base: Duration) -> Self {
        self.base = base;
        self
    }

    /// Set the delay cap.
    pub fn with_cap(mut self, cap: Duration) -> Self {
        self.cap = cap;
        self
    }

    /// Delay for the given attempt number (1-based).
    pub fn delay(&self, attempts: u32) -> Duration {
        let shift = attempts.saturating_sub(1).min(10);
        self.base.saturating_mul(1 << shift).min(self.cap)
    }
}

/// One backoff table entry.
#[derive(Debug, Clone, Copy)]
pub struct BackoffEntry {
    /// When the target becomes eligible again
    pub next_eligible: Time,
    /// Consecutive rate limits observed
    pub attempts: u32,
}

#[derive(Default)]
struct Inner {
    in_flight: HashSet<TargetId>,
    backoff: HashMap<TargetId, BackoffEntry>,
}

/// Claim and backoff state, owned solely by the scheduler.
///
/// Claiming is an atomic test-and-insert, so two overlapping selection
/// passes can never both dispatch the same target, and a release racing a
/// fresh claim resolves to one winner.
pub struct SchedulerState {
    inner: Mutex<Inner>,
    backoff_config: BackoffConfig,
}

impl SchedulerState {
    /// Create empty state with the given backoff configuration.
    pub fn new(backoff_config: BackoffConfig) -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
            backoff_config,
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Atomically claim a target. Returns `None` if it is already in flight.
    pub fn try_claim(self: &Arc<Self>, target: &TargetId) -> Option<ClaimToken> {
        let mut inner = self.lock();
        if !inner.in_flight.insert(target.clone()) {
            return None;
        }
        Some(ClaimToken {
            state: Arc::clone(self),
            target: target.clone(),
            released: false,
        })
    }

    fn release(&self, target: &TargetId) {
        self.lock().in_flight.remove(target);
    }

    /// Number of targets currently in flight.
    pub fn in_flight_len(&self) -> usize {
        self.lock().in_flight.len()
    }

    /// Whether a target is currently in flight.
    pub fn is_in_flight(&self, target: &TargetId) -> bool {
        self.lock().in_flight.contains(target)
    }

    /// Whether a target may be dispatched now: not in flight and not under
    /// backoff. Advisory only; `try_claim` is the atomic arbiter.
    pub fn eligible(&self, target: &TargetId, now: Time) -> bool {
        let inner = self.lock();
        if inner.in_flight.contains(target) {
            return false;
        }
        match inner.backoff.get(target) {
            Some(entry) => entry.next_eligible <= now,
            None => true,
        }
    }

    /// Record a rate limit against a target; returns the next eligibility
    /// time under exponential backoff.
    pub fn note_rate_limit(&self, target: &TargetId, now: Time) -> Time {
        let mut inner = self.lock();
        let entry = inner
            .backoff
            .entry(target.clone())
            .and_modify(|e| e.attempts += 1)
            .or_insert(BackoffEntry {
                next_eligible: now,
                attempts: 1,
            });
        let delay = self.backoff_config.delay(entry.attempts);
        entry.next_eligible = now
            + chrono::Duration::from_std(delay).unwrap_or_else(|_| chrono::Duration::zero());
        entry.next_eligible
    }

    /// Forget backoff bookkeeping for a target.
    pub fn clear_backoff(&self, target: &TargetId) {
        self.lock().backoff.remove(target);
    }

    /// When the target becomes eligible again, if it is backed off.
    pub fn backed_off_until(&self, target: &TargetId) -> Option<Time> {
        self.lock().backoff.get(target).map(|e| e.next_eligible)
    }
}

/// RAII claim on a target's in-flight slot.
///
/// Released explicitly by the orchestrator on terminal state; the drop
/// fallback means a crashed experiment never leaves its target permanently
/// in flight.
pub struct ClaimToken {
    state: Arc<SchedulerState>,
    target: TargetId,
    released: bool,
}

impl ClaimToken {
    /// The claimed target.
    pub fn target(&self) -> &TargetId {
        &self.target
    }

    /// Give the slot back.
    pub fn release(mut self) {
        self.do_release();
    }

    fn do_release(&mut self) {
        if !self.released {
            self.state.release(&self.target);
            self.released = true;
        }
    }
}

impl Drop for ClaimToken {
    fn drop(&mut self) {
        self.do_release();
    }
}

impl Claim for ClaimToken {
    fn release(self: Box<Self>) {
        ClaimToken::release(*self);
    }
}
