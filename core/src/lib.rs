//! # Carrel Core
//!
//! The deterministic synchronization core for Carrel, a multi-device
//! personal knowledge base.
//!
//! Every device holds a full replica of the note corpus and edits it
//! offline. This crate contains the logic that lets those replicas
//! converge once their changes meet: per-record CRDT metadata, a conflict
//! detector, a hybrid automatic/manual conflict resolver, and the
//! resolution journal. The same concurrent history always produces the
//! same outcome on every replica, without a coordinator.
//!
//! ## Design Principles
//!
//! - **No IO**: the core has no knowledge of files, network, or platform
//! - **Deterministic**: the same inputs always produce the same outputs;
//!   wall-clock time is always passed in, never read
//! - **Testable**: pure logic, no mocks needed
//!
//! ## Core Concepts
//!
//! ### Records and metadata
//!
//! A [`Record`] is the unit of sync: a canonical [`Payload`] of typed
//! [`Value`]s plus version counters and a soft-delete tombstone. Each
//! record carries a [`CrdtMetadata`] describing *who* wrote it last and
//! *when*, in both logical time (`db_version`, `column_version`) and wall
//! time (`last_write_wins`), along with a content hash and the set of
//! fields the last local mutation touched.
//!
//! ### Causality
//!
//! [`CrdtMetadata::compare`] orders two metadata values by their logical
//! clocks. Two concurrent values with disjoint modified-field sets merge
//! field by field; overlapping sets fall back to last-write-wins with the
//! site id as the total-order tiebreaker.
//!
//! ### Detection and resolution
//!
//! The [`ConflictDetector`] classifies local/remote divergence and
//! produces field-level diffs. The [`ConflictResolver`] applies the
//! per-field policy table ([`PolicyTable`]) automatically where it can and
//! defers the rest to manual resolution. Every applied resolution is
//! recorded in the [`ResolutionJournal`].
//!
//! ## Quick Start
//!
//! ```rust
//! use carrel_core::{
//!     fields, ConflictDetector, ConflictResolver, CrdtMetadata, Divergence,
//!     Payload, Record, ReplicaClock, SyncConfig, Value,
//! };
//!
//! let config = SyncConfig::default();
//! let mut clock_a = ReplicaClock::new("device_aa");
//! let mut clock_b = ReplicaClock::new("device_bb");
//!
//! // Replica A tags a note "urgent", replica B tags the same note "review".
//! let base: Payload = [(fields::NAME.to_string(), Value::Text("inbox".into()))]
//!     .into_iter()
//!     .collect();
//! let mut a = Record::create("note_1", base.clone(), 10_000);
//! let mut meta_a = CrdtMetadata::create(&a, clock_a.tick_clone(), 10_000);
//! a.set_field(fields::TAGS, Value::string_list(["urgent"]), 10_000);
//! meta_a.update_for_local_change(&a, [fields::TAGS], clock_a.tick_clone(), 10_000);
//!
//! let mut b = Record::create("note_1", base, 10_000);
//! let mut meta_b = CrdtMetadata::create(&b, clock_b.tick_clone(), 10_000);
//! b.set_field(fields::TAGS, Value::string_list(["review"]), 12_000);
//! meta_b.update_for_local_change(&b, [fields::TAGS], clock_b.tick_clone(), 12_000);
//!
//! let detector = ConflictDetector::with_config(&config);
//! let resolver = ConflictResolver::with_config(&config);
//! let local = (a, meta_a).into();
//! let remote = (b, meta_b).into();
//!
//! let Divergence::Diverged(info) = detector.assess(&local, &remote, 13_000) else {
//!     panic!("concurrent edits must diverge");
//! };
//! let (resolved, deferred) = resolver.resolve_automatically(vec![*info], 13_000);
//! assert!(deferred.is_empty());
//! assert_eq!(
//!     resolved[0].record.payload[fields::TAGS],
//!     Value::string_list(["review", "urgent"]),
//! );
//! ```

pub mod clock;
pub mod config;
pub mod detect;
pub mod error;
pub mod journal;
pub mod metadata;
pub mod policy;
pub mod record;
pub mod resolve;
pub mod value;

// Re-export main types at crate root
pub use clock::{FixedTime, ReplicaClock, TimeSource};
pub use config::{ConflictWindows, ResolutionStrategy, SyncConfig};
pub use detect::{ConflictDetector, ConflictInfo, ConflictType, Divergence, FieldDiff};
pub use error::Error;
pub use journal::{JournalEntry, ResolutionJournal};
pub use metadata::{Causality, ConflictClass, CrdtMetadata};
pub use policy::{PolicyClass, PolicyTable};
pub use record::{Record, RecordWithMeta};
pub use resolve::{ConflictDiff, ConflictResolver, FieldChoice, ManualDecision, ResolvedRecord};
pub use value::{content_hash, fields, Payload, Value};

/// Type aliases for clarity
pub type RecordId = String;
pub type SiteId = String;
pub type FieldName = String;
pub type Version = u64;
/// Milliseconds since the Unix epoch.
pub type Timestamp = u64;
