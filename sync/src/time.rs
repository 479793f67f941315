//! Wall-clock time source and site identity.

use carrel_core::{SiteId, TimeSource, Timestamp};
use chrono::Utc;

/// The system wall clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct WallClock;

impl TimeSource for WallClock {
    fn now_ms(&self) -> Timestamp {
        Utc::now().timestamp_millis().max(0) as Timestamp
    }
}

/// Generate a fresh site id for a device: `device_<uuid>`.
///
/// Site ids are compared lexicographically to break last-write-wins
/// ties, so they must be stable for the lifetime of a replica; generate
/// once and persist.
pub fn generate_site_id() -> SiteId {
    format!("device_{}", uuid::Uuid::new_v4())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wall_clock_is_plausible() {
        // After 2023-01-01 and monotone-ish across two reads.
        let a = WallClock.now_ms();
        let b = WallClock.now_ms();
        assert!(a > 1_672_531_200_000);
        assert!(b >= a);
    }

    #[test]
    fn site_ids_have_the_device_prefix_and_are_unique() {
        let a = generate_site_id();
        let b = generate_site_id();
        assert!(a.starts_with("device_"));
        assert_ne!(a, b);
    }
}
