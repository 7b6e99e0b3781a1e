use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

/// Issues strictly increasing nonces for signed requests.
///
/// A nonce is the current Unix time in seconds, bumped to `last + 1` whenever the
/// clock has not moved past the last issued value. Safe to share across tasks; every
/// value is handed out exactly once per generator.
#[derive(Debug, Default)]
pub struct NonceGenerator {
    last: AtomicU64,
}

impl NonceGenerator {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Next nonce, strictly greater than every nonce issued before it.
    #[must_use]
    pub fn next(&self) -> u64 {
        self.next_at(unix_seconds())
    }

    /// Last issued nonce, `0` before the first call to [`next`](Self::next).
    #[must_use]
    pub fn last_issued(&self) -> u64 {
        self.last.load(Ordering::Acquire)
    }

    fn next_at(&self, now: u64) -> u64 {
        match self
            .last
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |last| {
                Some(successor(last, now))
            }) {
            Ok(previous) | Err(previous) => successor(previous, now),
        }
    }
}

fn successor(last: u64, now: u64) -> u64 {
    if now > last {
        now
    } else {
        last.saturating_add(1)
    }
}

fn unix_seconds() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |elapsed| elapsed.as_secs())
}
