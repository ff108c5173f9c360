//! Remote sync service.
//!
//! Defines the interface both engines consume and the reqwest-backed
//! HTTP implementation. Engines are generic over [`RemoteService`] so
//! tests can substitute an in-process fake.
//!
//! Error mapping is uniform across implementations:
//! - timeouts, connection failures, 5xx, 408 and 429 → [`Error::Transient`](crate::error::Error::Transient)
//! - any other non-success status → [`Error::Rejected`](crate::error::Error::Rejected)

#[cfg(test)]
pub(crate) mod fake;
mod http;
mod types;

use std::future::Future;
use std::sync::Arc;

use crate::config::{DeviceInfo, Pairing};
use crate::error::Result;

pub use http::HttpRemote;
pub use types::{
    BatchCall, BatchSyncResponse, CallUpdate, ChunkAck, ConfigResponse, PersonUpdate,
    RecordingStatusResponse, ServerSettings, ServerValue, SuccessResponse, UpdateCallRequest,
    UpdateCallResponse, UpdatePersonRequest, UpdatesResponse,
};

/// Trait for the remote sync service.
///
/// Every method performs exactly one request.
pub trait RemoteService: Send + Sync {
    /// Settings, plan/quota and exclusion list for the organization.
    fn fetch_config(
        &self,
        pairing: &Pairing,
        device: &DeviceInfo,
    ) -> impl Future<Output = Result<ConfigResponse>> + Send;

    /// Call and person changes since `last_sync_time` (Unix ms, 0 for everything).
    fn fetch_updates(
        &self,
        pairing: &Pairing,
        last_sync_time: i64,
    ) -> impl Future<Output = Result<UpdatesResponse>> + Send;

    /// Push never-acknowledged calls as one atomic batch.
    fn batch_sync_calls(
        &self,
        pairing: &Pairing,
        calls: &[BatchCall],
    ) -> impl Future<Output = Result<BatchSyncResponse>> + Send;

    /// Push annotations of one previously acknowledged call.
    fn update_call(
        &self,
        request: &UpdateCallRequest,
    ) -> impl Future<Output = Result<UpdateCallResponse>> + Send;

    /// Push annotations of one person. Returns the server's `success` flag.
    fn update_person(
        &self,
        request: &UpdatePersonRequest,
    ) -> impl Future<Output = Result<bool>> + Send;

    /// Which of `ids` the server already holds a complete recording for.
    fn check_recordings_status(
        &self,
        ids: &[String],
    ) -> impl Future<Output = Result<Vec<String>>> + Send;

    /// Append one chunk of a recording.
    fn upload_chunk(
        &self,
        unique_id: &str,
        chunk_index: u32,
        bytes: Vec<u8>,
    ) -> impl Future<Output = Result<ChunkAck>> + Send;

    /// Close a recording after `total_chunks` chunks. Returns the server's `success` flag.
    fn finalize_upload(
        &self,
        unique_id: &str,
        total_chunks: u32,
    ) -> impl Future<Output = Result<bool>> + Send;
}

/// Both engines share one client in the daemon.
impl<R: RemoteService> RemoteService for Arc<R> {
    fn fetch_config(
        &self,
        pairing: &Pairing,
        device: &DeviceInfo,
    ) -> impl Future<Output = Result<ConfigResponse>> + Send {
        (**self).fetch_config(pairing, device)
    }

    fn fetch_updates(
        &self,
        pairing: &Pairing,
        last_sync_time: i64,
    ) -> impl Future<Output = Result<UpdatesResponse>> + Send {
        (**self).fetch_updates(pairing, last_sync_time)
    }

    fn batch_sync_calls(
        &self,
        pairing: &Pairing,
        calls: &[BatchCall],
    ) -> impl Future<Output = Result<BatchSyncResponse>> + Send {
        (**self).batch_sync_calls(pairing, calls)
    }

    fn update_call(
        &self,
        request: &UpdateCallRequest,
    ) -> impl Future<Output = Result<UpdateCallResponse>> + Send {
        (**self).update_call(request)
    }

    fn update_person(
        &self,
        request: &UpdatePersonRequest,
    ) -> impl Future<Output = Result<bool>> + Send {
        (**self).update_person(request)
    }

    fn check_recordings_status(
        &self,
        ids: &[String],
    ) -> impl Future<Output = Result<Vec<String>>> + Send {
        (**self).check_recordings_status(ids)
    }

    fn upload_chunk(
        &self,
        unique_id: &str,
        chunk_index: u32,
        bytes: Vec<u8>,
    ) -> impl Future<Output = Result<ChunkAck>> + Send {
        (**self).upload_chunk(unique_id, chunk_index, bytes)
    }

    fn finalize_upload(
        &self,
        unique_id: &str,
        total_chunks: u32,
    ) -> impl Future<Output = Result<bool>> + Send {
        (**self).finalize_upload(unique_id, total_chunks)
    }
}
