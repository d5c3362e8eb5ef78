//! Repetition guard for tool invocations.
//!
//! Counts invocations per `(name, canonical params)` fingerprint within a
//! sliding window that starts at the fingerprint's first sighting. Once the
//! count reaches the threshold, further invocations are refused until the
//! window elapses. Expiry is checked on access against an injected [`Clock`],
//! so there are no timers.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::Value;
use sha2::{Digest, Sha256};

/// Invocations allowed per fingerprint inside one window.
pub const DEFAULT_MAX_REPEATS: u32 = 3;

/// Window length measured from a fingerprint's first sighting.
pub const DEFAULT_WINDOW: Duration = Duration::from_secs(30);

// ─── Clock ──────────────────────────────────────────────────────────────────

/// Monotonic time source.
pub trait Clock: Send + Sync + std::fmt::Debug {
    fn now(&self) -> Instant;
}

/// Wall clock backed by [`Instant::now`].
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// Test clock advanced by hand.
#[cfg(test)]
#[derive(Debug)]
pub(crate) struct ManualClock {
    now: std::sync::Mutex<Instant>,
}

#[cfg(test)]
impl ManualClock {
    pub(crate) fn new() -> Self {
        Self {
            now: std::sync::Mutex::new(Instant::now()),
        }
    }

    pub(crate) fn advance(&self, by: Duration) {
        let mut now = self.now.lock().unwrap();
        *now += by;
    }
}

#[cfg(test)]
impl Clock for ManualClock {
    fn now(&self) -> Instant {
        *self.now.lock().unwrap()
    }
}

// ─── Fingerprint ────────────────────────────────────────────────────────────

/// Stable identity of a tool invocation: tool name plus canonical params.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Fingerprint(String);

impl Fingerprint {
    pub fn of(name: &str, params: &serde_json::Map<String, Value>) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(name.as_bytes());
        hasher.update([0u8]);
        // `serde_json::Map` is key-ordered, so equal params serialize equally.
        hasher.update(Value::Object(params.clone()).to_string().as_bytes());
        let digest = hasher.finalize();
        Self(digest.iter().map(|b| format!("{b:02x}")).collect())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

// ─── Guard ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy)]
struct GuardEntry {
    count: u32,
    first_seen_at: Instant,
}

/// Result of [`LoopGuard::check`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GuardVerdict {
    /// Execution may proceed; `count` includes this invocation.
    Allowed { count: u32 },
    /// Threshold reached; the invocation must not run.
    Refused { count: u32 },
}

impl GuardVerdict {
    pub fn is_refused(&self) -> bool {
        matches!(self, GuardVerdict::Refused { .. })
    }
}

/// Per-executor repetition guard.
#[derive(Debug)]
pub struct LoopGuard {
    entries: HashMap<Fingerprint, GuardEntry>,
    max_repeats: u32,
    window: Duration,
    clock: Arc<dyn Clock>,
}

impl Default for LoopGuard {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_REPEATS, DEFAULT_WINDOW, Arc::new(SystemClock))
    }
}

impl LoopGuard {
    /// `max_repeats` is raised to at least 1.
    pub fn new(max_repeats: u32, window: Duration, clock: Arc<dyn Clock>) -> Self {
        if max_repeats == 0 {
            tracing::warn!("loop guard max_repeats of 0 would refuse every call, using 1");
        }
        Self {
            entries: HashMap::new(),
            max_repeats: max_repeats.max(1),
            window,
            clock,
        }
    }

    /// Record an attempt to run `name` with `params` and decide whether it
    /// may execute. Refusals are not counted.
    pub fn check(&mut self, name: &str, params: &serde_json::Map<String, Value>) -> GuardVerdict {
        let now = self.clock.now();
        self.purge_expired(now);

        let fingerprint = Fingerprint::of(name, params);
        let entry = self.entries.entry(fingerprint).or_insert(GuardEntry {
            count: 0,
            first_seen_at: now,
        });

        if entry.count >= self.max_repeats {
            tracing::warn!(
                tool = %name,
                count = entry.count,
                max_repeats = self.max_repeats,
                "loop guard refused repeated tool invocation"
            );
            return GuardVerdict::Refused { count: entry.count };
        }

        entry.count += 1;
        GuardVerdict::Allowed { count: entry.count }
    }

    /// Current count for a fingerprint, ignoring expired entries.
    pub fn count(&self, name: &str, params: &serde_json::Map<String, Value>) -> u32 {
        let now = self.clock.now();
        self.entries
            .get(&Fingerprint::of(name, params))
            .filter(|e| now.saturating_duration_since(e.first_seen_at) < self.window)
            .map_or(0, |e| e.count)
    }

    pub fn max_repeats(&self) -> u32 {
        self.max_repeats
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    fn purge_expired(&mut self, now: Instant) {
        let window = self.window;
        self.entries
            .retain(|_, e| now.saturating_duration_since(e.first_seen_at) < window);
    }
}

// ─── Tests ──────────────────────────────────────────────────────────────────
