//! Local content-addressed build cache
//!
//! Build outputs are stored as opaque byte blobs under a [`CacheKey`], the
//! lowercase hex fingerprint of the inputs that produced them. Several build
//! processes may share one cache root; the [`LockingBuildCache`] serializes
//! them on an advisory file lock and multiplexes threads within a process.
//!
//! # Entry Lifecycle
//!
//! | Step | Directory engine | Database engines |
//! |------|------------------|------------------|
//! | Store | staged as `<key>-<uuid>.part`, renamed to `<key>` | insert if absent |
//! | Load | touch, stream, quarantine on reader failure | stream blob |
//! | Cleanup | deleted when unused past the retention window | kept |
//!
//! Entries are never overwritten: the first store for a key wins.

pub mod cleanup;
pub mod coordinator;
pub mod factory;
pub mod journal;
pub mod key;
pub mod source;
pub mod temp;

pub use cleanup::{CleanupReport, LruCleanup};
pub use coordinator::{LockStats, LockingBuildCache};
pub use factory::{BuildCacheFactory, CacheSettings};
pub use journal::AccessTimeJournal;
pub use key::CacheKey;
pub use source::EntrySource;
pub use temp::{StagingFile, TempFileStore};
