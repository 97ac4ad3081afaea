//! Time utilities for Kore Remote

use std::time::Instant;

/// Whether `deadline` has passed as of `now`.
pub fn is_expired(deadline: Instant, now: Instant) -> bool {
    now >= deadline
}
