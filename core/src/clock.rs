//! Replica clock: site identity plus a monotone logical counter.
//!
//! The logical counter (`db_version` in record metadata) only ever moves
//! forward, both on local mutation and when observing remote metadata.
//! Combined with the lexicographic order on site ids it yields the total
//! order that ties last-write-wins resolution.

use crate::{SiteId, Timestamp};
use serde::{Deserialize, Serialize};

/// A replica's logical clock.
///
/// Ordering rules:
/// 1. Higher logical counter wins
/// 2. If counters are equal, the lexicographically greater site id wins
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReplicaClock {
    /// Stable identifier of this replica (`device_<uuid>`)
    pub site_id: SiteId,
    /// Monotonically non-decreasing logical counter
    pub logical: u64,
}

impl ReplicaClock {
    /// Create a new clock for a site, starting at 0.
    pub fn new(site_id: impl Into<SiteId>) -> Self {
        Self {
            site_id: site_id.into(),
            logical: 0,
        }
    }

    /// Create a clock with a specific counter value.
    pub fn with_logical(site_id: impl Into<SiteId>, logical: u64) -> Self {
        Self {
            site_id: site_id.into(),
            logical,
        }
    }

    /// Advance the clock and return the new counter value.
    pub fn tick(&mut self) -> u64 {
        self.logical += 1;
        self.logical
    }

    /// Advance the clock and return a snapshot of the new state.
    pub fn tick_clone(&mut self) -> ReplicaClock {
        self.tick();
        self.clone()
    }

    /// Fold a remotely observed counter into this clock.
    /// The counter never decreases.
    pub fn observe(&mut self, remote_logical: u64) {
        self.logical = self.logical.max(remote_logical);
    }
}

/// Source of wall-clock time, injected wherever the core needs "now".
///
/// The core never reads the system clock itself; orchestration supplies an
/// implementation and tests supply [`FixedTime`].
pub trait TimeSource {
    /// Current wall-clock time in milliseconds since the Unix epoch.
    fn now_ms(&self) -> Timestamp;
}

/// A time source pinned to a fixed instant.
#[derive(Debug, Clone, Copy)]
pub struct FixedTime(pub Timestamp);

impl TimeSource for FixedTime {
    fn now_ms(&self) -> Timestamp {
        self.0
    }
}
