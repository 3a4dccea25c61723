//! Origin extraction and per-origin request spacing.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::sync::OwnedMutexGuard;
use tokio::time::Instant;

/// Scheme + host (+ non-default port) of a URL, e.g. `"https://drinkcann.com"`.
///
/// Given `"https://drinkcann.com/collections/all"`, returns `"https://drinkcann.com"`.
#[must_use]
pub fn extract_origin(url: &reqwest::Url) -> String {
    url.origin().ascii_serialization()
}

#[derive(Debug, Default)]
struct OriginSlot {
    last_request: Option<Instant>,
    /// Earliest instant the next request may start, set from `Retry-After`.
    not_before: Option<Instant>,
}

/// Spaces requests to the same origin at least `delay` apart and allows only
/// one request in flight per origin.
///
/// Each origin gets its own async mutex. A request holds the returned
/// [`OriginPermit`] for its whole duration, so concurrent callers targeting
/// the same origin queue up behind it while other origins proceed freely.
#[derive(Debug)]
pub(crate) struct OriginThrottle {
    delay: Duration,
    slots: Mutex<HashMap<String, Arc<tokio::sync::Mutex<OriginSlot>>>>,
}

/// Exclusive right to send one request to an origin.
pub(crate) struct OriginPermit {
    guard: OwnedMutexGuard<OriginSlot>,
}

impl OriginPermit {
    /// When this request was allowed to start.
    #[cfg(test)]
    pub(crate) fn started_at(&self) -> Option<Instant> {
        self.guard.last_request
    }

    /// Pushes the origin's next allowed start time at least `hint` into the
    /// future. A hint past the end of the clock is ignored.
    pub(crate) fn defer_for(&mut self, hint: Duration) {
        let Some(candidate) = Instant::now().checked_add(hint) else {
            tracing::warn!(hint_secs = hint.as_secs(), "ignoring out-of-range origin deferral");
            return;
        };
        self.guard.not_before = Some(
            self.guard
                .not_before
                .map_or(candidate, |current| current.max(candidate)),
        );
    }
}

impl OriginThrottle {
    pub(crate) fn new(delay: Duration) -> Self {
        Self {
            delay,
            slots: Mutex::new(HashMap::new()),
        }
    }

    fn slot(&self, origin: &str) -> Arc<tokio::sync::Mutex<OriginSlot>> {
        let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(slots.entry(origin.to_owned()).or_default())
    }

    /// Waits until `origin` may be contacted again, then stamps the request time.
    ///
    /// One of the two suspension points in the crawler; the other is the
    /// backoff sleep in the retry loop.
    pub(crate) async fn acquire(&self, origin: &str) -> OriginPermit {
        let mut guard = self.slot(origin).lock_owned().await;

        let spaced = guard.last_request.map(|last| last + self.delay);
        let ready_at = match (spaced, guard.not_before) {
            (Some(a), Some(b)) => Some(a.max(b)),
            (a, b) => a.or(b),
        };

        if let Some(at) = ready_at {
            if at > Instant::now() {
                tracing::debug!(
                    origin,
                    wait_ms = u64::try_from(at.saturating_duration_since(Instant::now()).as_millis())
                        .unwrap_or(u64::MAX),
                    "waiting for origin delay"
                );
                tokio::time::sleep_until(at).await;
            }
        }

        guard.last_request = Some(Instant::now());
        OriginPermit { guard }
    }
}
