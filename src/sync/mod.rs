//! Metadata sync.
//!
//! Pull-then-push reconciliation of call and person metadata against the
//! remote sync service:
//!
//! - **Pull**: server patches since the cursor, merged last-writer-wins
//! - **Push new**: never-acknowledged calls, in fixed-size batches
//! - **Push changed**: acknowledged calls edited since, one request each
//! - **Push persons**: pending person edits, one request each
//!
//! Calls to excluded numbers are settled locally and never sent.

mod engine;
mod types;

pub use engine::{MetadataSyncEngine, NoopTrigger, UploadTrigger};
pub use types::{PassMode, Phase, PhaseError, PullStats, PushStats, SyncReport};
