use chrono::NaiveDateTime;
use std::collections::HashMap;
use std::time::Duration;

/// Minimum time between two attendance records for the same identity.
pub const COOL_DOWN: Duration = Duration::from_secs(60);

/// Per-identity attendance dedup gate.
///
/// Remembers when each identity was last recorded during the current
/// recognition session. A repeat recognition inside COOL_DOWN is suppressed.
/// The table lives in memory only and is dropped with the session.
#[derive(Debug, Default)]
pub struct DedupGate {
    last_seen: HashMap<String, NaiveDateTime>,
}

impl DedupGate {
    pub fn new() -> Self {
        Self {
            last_seen: HashMap::new(),
        }
    }

    /// Return `true` if an attendance record should be written for `identity` at `now`.
    ///
    /// A `true` result marks `identity` as seen at `now`. A clock that moved
    /// backwards since the last record suppresses the write.
    pub fn should_record(&mut self, identity: &str, now: NaiveDateTime) -> bool {
        if let Some(&last) = self.last_seen.get(identity) {
            let elapsed = (now - last).to_std().unwrap_or(Duration::ZERO);
            if now < last || elapsed < COOL_DOWN {
                tracing::debug!(
                    identity,
                    elapsed_secs = elapsed.as_secs(),
                    "dedup: suppressing repeat attendance"
                );
                return false;
            }
        }

        self.last_seen.insert(identity.to_string(), now);
        true
    }

    /// Forget every identity.
    pub fn clear(&mut self) {
        self.last_seen.clear();
    }

    pub fn len(&self) -> usize {
        self.last_seen.len()
    }

    pub fn is_empty(&self) -> bool {
        self.last_seen.is_empty()
    }
}
