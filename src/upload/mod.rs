//! Recording upload.
//!
//! Transfers audio for calls whose metadata the server already holds.
//!
//! # Submodules
//!
//! - [`gate`] - Pairing, feature flag, plan and quota preconditions
//! - [`chunking`] - Bounded-memory fixed-size chunk reader
//! - [`locator`] - Finding a call's recording file on disk
//! - [`engine`] - Reconciliation and the per-file chunked transfer

pub mod chunking;
pub mod engine;
pub mod gate;
pub mod locator;

pub use chunking::{chunk_count, Chunk, ChunkReader, DEFAULT_CHUNK_SIZE};
pub use engine::{FileOutcome, Transfer, UploadEngine, UploadReport};
pub use gate::check_gate;
pub use locator::{FsRecordingLocator, RecordingLocator};
