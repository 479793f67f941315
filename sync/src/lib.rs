//! # Carrel Sync
//!
//! Sync orchestration for Carrel: the async shell around
//! [`carrel_core`]'s deterministic conflict-resolution core.
//!
//! The [`SyncEngine`] pushes local changes in chunked batches, pulls
//! remote changes behind an incremental change token, resolves
//! divergence through the core's detector and resolver, and commits each
//! pull atomically with the advanced token. The [`AdaptiveMonitor`]
//! schedules engine runs from activity and conflict signals. Both talk
//! to the outside world only through the [`LocalStore`] and
//! [`RemoteStore`] ports.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use carrel_core::SyncConfig;
//! use carrel_sync::{
//!     generate_site_id, AdaptiveMonitor, MemoryLocalStore, MemoryRemoteStore, SyncEngine,
//!     WallClock,
//! };
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), carrel_sync::SyncError> {
//! let local = MemoryLocalStore::new();
//! let remote = MemoryRemoteStore::new();
//! let config = SyncConfig::default();
//!
//! let engine = SyncEngine::new(
//!     local,
//!     remote,
//!     Arc::new(WallClock),
//!     generate_site_id(),
//!     "notes",
//!     config.clone(),
//! )?;
//!
//! let report = engine.sync().await?;
//! println!("pushed {} pulled {}", report.pushed, report.pulled);
//!
//! // Background cadence driven by activity signals.
//! let monitor = AdaptiveMonitor::new(config, Arc::new(WallClock));
//! let handle = monitor.spawn(Arc::clone(&engine));
//! monitor.record_activity();
//! handle.stop();
//! # Ok(())
//! # }
//! ```

pub mod engine;
pub mod error;
pub mod monitor;
pub mod notify;
pub mod state;
pub mod store;
pub mod testing;
pub mod time;

// Re-export main types at crate root
pub use engine::SyncEngine;
pub use error::{Result, Retryability, SyncError};
pub use monitor::{AdaptiveMonitor, MonitorHandle};
pub use notify::{EventCallback, Notifier, SubscriptionHandle, SyncEvent};
pub use state::{SyncPhase, SyncReport, SyncStats};
pub use store::{
    ChangeSet, ChangeToken, LocalStore, ModifyResults, PullBatch, RemoteError, RemoteRecord,
    RemoteStore, SavePolicy, StoreError, SyncState,
};
pub use testing::{MemoryLocalStore, MemoryRemoteStore};
pub use time::{generate_site_id, WallClock};
