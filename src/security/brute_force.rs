//! Brute-force ledger for failed credential checks.
//!
//! # Responsibilities
//! - Count failed credential checks per client address within a window
//! - Escalate to a temporary lockout once the threshold is reached
//! - Forget an address on successful authentication
//! - Periodically sweep stale entries to bound memory
//!
//! # Design Decisions
//! - One mutex guards the whole map; every read-modify-write happens under it
//! - Window and lockout are independent clocks; a lockout may outlive its window
//! - Expired entries are treated as absent on read, sweeping only reclaims memory
//! - Uses tokio's clock so tests can drive time with `tokio::time::pause`

use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::broadcast;
use tokio::time::{self, Instant};

use crate::config::BruteForceConfig;
use crate::observability::metrics;

/// Failure bookkeeping for one client address.
#[derive(Debug, Clone)]
struct Entry {
    failures: u32,
    window_resets_at: Instant,
    locked_until: Option<Instant>,
}

impl Entry {
    fn is_locked(&self, now: Instant) -> bool {
        self.locked_until.is_some_and(|until| now < until)
    }

    fn is_stale(&self, now: Instant) -> bool {
        now >= self.window_resets_at && !self.is_locked(now)
    }
}

/// Result of recording a failed credential check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureOutcome {
    /// Failure counted; the address is not yet locked out.
    Counted { failures: u32 },
    /// This failure reached the threshold and started a lockout.
    LockedOut { lockout: Duration },
}

/// `now + after`, saturating at a point far enough out to never arrive.
fn deadline(now: Instant, after: Duration) -> Instant {
    const FAR_FUTURE: Duration = Duration::from_secs(86_400 * 365 * 30);
    now.checked_add(after)
        .or_else(|| now.checked_add(FAR_FUTURE))
        .unwrap_or(now)
}

/// Per-address counter of failed credential checks.
#[derive(Debug)]
pub struct BruteForceLedger {
    entries: Mutex<HashMap<IpAddr, Entry>>,
    window: Duration,
    max_attempts: u32,
    lockout: Duration,
}

impl BruteForceLedger {
    pub fn new(window: Duration, max_attempts: u32, max_lockout: Duration) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            window,
            max_attempts: max_attempts.max(1),
            lockout: window.checked_mul(2).unwrap_or(max_lockout).min(max_lockout),
        }
    }

    pub fn from_config(config: &BruteForceConfig) -> Self {
        Self::new(config.window(), config.max_attempts, config.max_lockout())
    }

    /// Lockout duration applied when the threshold is reached.
    pub fn lockout_duration(&self) -> Duration {
        self.lockout
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<IpAddr, Entry>> {
        // A panic while holding the lock cannot leave an entry half-written,
        // so a poisoned map is still consistent.
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// `true` unless `ip` currently has an active lockout.
    ///
    /// An entry whose lockout has expired is cleared here.
    pub fn admit(&self, ip: IpAddr) -> bool {
        let now = Instant::now();
        let mut entries = self.lock();
        let state = entries
            .get(&ip)
            .map(|e| (e.is_locked(now), e.locked_until.is_some()));
        match state {
            Some((true, _)) => false,
            Some((false, true)) => {
                entries.remove(&ip);
                true
            }
            _ => true,
        }
    }

    /// Count a failed credential check for `ip`.
    pub fn record_failure(&self, ip: IpAddr) -> FailureOutcome {
        let now = Instant::now();
        let mut entries = self.lock();

        let entry = entries.entry(ip).or_insert_with(|| Entry {
            failures: 0,
            window_resets_at: deadline(now, self.window),
            locked_until: None,
        });

        let lockout_expired = entry.locked_until.is_some_and(|until| now >= until);
        if entry.is_stale(now) || lockout_expired {
            *entry = Entry {
                failures: 0,
                window_resets_at: deadline(now, self.window),
                locked_until: None,
            };
        }

        entry.failures = entry.failures.saturating_add(1);

        if entry.failures >= self.max_attempts && !entry.is_locked(now) {
            entry.locked_until = Some(deadline(now, self.lockout));
            tracing::warn!(
                client = %ip,
                failures = entry.failures,
                lockout_secs = self.lockout.as_secs(),
                "Client locked out after repeated authentication failures"
            );
            metrics::record_lockout();
            return FailureOutcome::LockedOut {
                lockout: self.lockout,
            };
        }

        FailureOutcome::Counted {
            failures: entry.failures,
        }
    }

    /// Forget everything about `ip` after a successful credential check.
    pub fn record_success(&self, ip: IpAddr) {
        if self.lock().remove(&ip).is_some() {
            tracing::debug!(client = %ip, "Cleared brute-force entry after successful auth");
        }
    }

    /// Current failure count for `ip` within a live window (0 if none).
    pub fn failures(&self, ip: IpAddr) -> u32 {
        let now = Instant::now();
        self.lock()
            .get(&ip)
            .filter(|e| !e.is_stale(now))
            .map_or(0, |e| e.failures)
    }

    /// Number of tracked addresses, including not-yet-swept stale ones.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop entries whose window has expired and which hold no active
    /// lockout. Returns how many were removed.
    pub fn sweep(&self) -> usize {
        let now = Instant::now();
        let mut entries = self.lock();
        let before = entries.len();
        entries.retain(|_, e| !e.is_stale(now));
        before - entries.len()
    }

    /// Run [`sweep`](Self::sweep) every `interval` until shutdown.
    pub async fn run_sweeper(self: Arc<Self>, interval: Duration, mut shutdown: broadcast::Receiver<()>) {
        let mut ticker = time::interval(interval);
        ticker.set_missed_tick_behavior(time::MissedTickBehavior::Delay);
        // The first tick completes immediately.
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let removed = self.sweep();
                    if removed > 0 {
                        tracing::debug!(removed, remaining = self.len(), "Swept brute-force ledger");
                    }
                }
                _ = shutdown.recv() => {
                    tracing::debug!("Brute-force sweeper stopping");
                    break;
                }
            }
        }
    }
}
