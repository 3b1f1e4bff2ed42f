//! Log-on throttling
//!
//! Every failed attempt against an identity pushes its lockout deadline
//! forward. The first failures cost a flat cooldown; each failure beyond
//! the threshold adds a penalty on top of whatever lockout is already
//! pending. Retrying the very same wrong credential is not counted again.

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use parking_lot::Mutex;
use rollcall_core::config::ThrottleConfig;
use rollcall_crypto::sha256_hash;
use std::sync::Arc;
use tracing::{debug, warn};

/// Failure bookkeeping for one identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogOnInfo {
    failed_attempts: u32,
    last_failed_hash: Option<String>,
    locked_until: DateTime<Utc>,
}

impl LogOnInfo {
    fn new(now: DateTime<Utc>) -> Self {
        Self {
            failed_attempts: 0,
            last_failed_hash: None,
            locked_until: now,
        }
    }

    pub fn failed_attempts(&self) -> u32 {
        self.failed_attempts
    }

    pub fn locked_until(&self) -> DateTime<Utc> {
        self.locked_until
    }

    pub fn is_locked_at(&self, now: DateTime<Utc>) -> bool {
        self.locked_until > now
    }

    /// Returns false when the failure repeats the previous credential.
    fn record(
        &mut self,
        credential_hash: String,
        now: DateTime<Utc>,
        min_delay: Duration,
        threshold: u32,
        penalty: Duration,
    ) -> bool {
        let repeated = self.last_failed_hash.as_deref() == Some(credential_hash.as_str());
        if !repeated {
            self.failed_attempts = self.failed_attempts.saturating_add(1);
            self.last_failed_hash = Some(credential_hash);
            if self.failed_attempts > threshold {
                self.locked_until = self.locked_until.max(now) + penalty;
            }
        }
        // The deadline only ever moves forward.
        self.locked_until = self.locked_until.max(now + min_delay);
        !repeated
    }
}

/// Process-wide throttle keyed by case-insensitive identity.
///
/// The map is sharded; each entry carries its own lock so that concurrent
/// attempts against different identities never contend.
pub struct LogOnThrottle {
    entries: DashMap<String, Arc<Mutex<LogOnInfo>>>,
    min_delay: Duration,
    threshold: u32,
    penalty: Duration,
}

impl LogOnThrottle {
    pub fn new(config: &ThrottleConfig) -> Self {
        Self {
            entries: DashMap::new(),
            min_delay: Duration::seconds(config.min_delay_secs as i64),
            threshold: config.failure_threshold,
            penalty: Duration::seconds(config.penalty_secs as i64),
        }
    }

    fn key(identity: &str) -> String {
        identity.trim().to_lowercase()
    }

    fn entry(&self, identity: &str, now: DateTime<Utc>) -> Arc<Mutex<LogOnInfo>> {
        self.entries
            .entry(Self::key(identity))
            .or_insert_with(|| Arc::new(Mutex::new(LogOnInfo::new(now))))
            .value()
            .clone()
    }

    /// Record a failed attempt and return the new lockout deadline.
    pub fn record_failure(&self, identity: &str, credential: &str) -> DateTime<Utc> {
        self.record_failure_at(identity, credential, Utc::now())
    }

    pub fn record_failure_at(
        &self,
        identity: &str,
        credential: &str,
        now: DateTime<Utc>,
    ) -> DateTime<Utc> {
        let entry = self.entry(identity, now);
        let mut info = entry.lock();
        let counted = info.record(
            sha256_hash(credential.as_bytes()),
            now,
            self.min_delay,
            self.threshold,
            self.penalty,
        );
        if !counted {
            debug!("Repeated credential for {} not counted", identity);
        } else if info.failed_attempts > self.threshold {
            warn!(
                "{} failed log-on attempts for {}, locked until {}",
                info.failed_attempts,
                identity,
                info.locked_until.to_rfc3339()
            );
        }
        info.locked_until
    }

    /// Time left before `identity` may attempt again, if any.
    pub fn remaining_lockout(&self, identity: &str) -> Option<std::time::Duration> {
        self.remaining_lockout_at(identity, Utc::now())
    }

    pub fn remaining_lockout_at(
        &self,
        identity: &str,
        now: DateTime<Utc>,
    ) -> Option<std::time::Duration> {
        let entry = self.entries.get(&Self::key(identity))?.value().clone();
        let info = entry.lock();
        if !info.is_locked_at(now) {
            return None;
        }
        (info.locked_until - now).to_std().ok()
    }

    pub fn info(&self, identity: &str) -> Option<LogOnInfo> {
        let entry = self.entries.get(&Self::key(identity))?.value().clone();
        let info = entry.lock().clone();
        Some(info)
    }

    /// Forget an identity, typically after a successful log-on.
    pub fn reset(&self, identity: &str) {
        self.entries.remove(&Self::key(identity));
    }

    /// Drop entries whose lockout has expired. An entry another thread
    /// has taken out of the map, or is holding locked, is kept.
    pub fn sweep_at(&self, now: DateTime<Utc>) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, entry| {
            Arc::strong_count(entry) > 1
                || entry
                    .try_lock()
                    .map(|info| info.is_locked_at(now))
                    .unwrap_or(true)
        });
        let removed = before.saturating_sub(self.entries.len());
        if removed > 0 {
            debug!("Swept {} expired log-on entries", removed);
        }
        removed
    }

    pub fn sweep(&self) -> usize {
        self.sweep_at(Utc::now())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Default for LogOnThrottle {
    fn default() -> Self {
        Self::new(&ThrottleConfig::default())
    }
}
