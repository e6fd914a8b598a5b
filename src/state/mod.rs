//! Durable change-detection state.
//!
//! A single JSON file records the last-seen content fingerprint of every
//! tracked file, so a restart does not resend files that were already seen.
//! The file is guarded by a process-level lock and rewritten atomically.

pub mod error;
pub mod lock;
pub mod store;

pub use error::StateError;
pub use lock::RunLock;
pub use store::HashStore;
