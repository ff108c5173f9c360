//! Scripted in-process remote for engine tests.

use std::collections::HashSet;
use std::sync::{Mutex, MutexGuard};

use crate::cancel::CancellationToken;
use crate::config::{DeviceInfo, Pairing};
use crate::error::{Error, Result};

use super::types::{
    BatchCall, BatchSyncResponse, ChunkAck, ConfigResponse, UpdateCallRequest,
    UpdateCallResponse, UpdatePersonRequest, UpdatesResponse,
};
use super::RemoteService;

/// Script and request log.
#[derive(Debug)]
pub struct FakeState {
    pub server_time: i64,
    pub config: ConfigResponse,
    pub updates: UpdatesResponse,
    pub fail_config: bool,
    pub fail_updates: bool,
    /// Zero-based batch request numbers that time out.
    pub timeout_batches: HashSet<usize>,
    /// Zero-based batch request numbers the server refuses.
    pub reject_batches: HashSet<usize>,
    /// Ids the server leaves out of `synced_ids`.
    pub withhold_ack: HashSet<String>,
    pub reject_update_call: bool,
    pub person_success: bool,
    pub completed_ids: Vec<String>,
    pub fail_status: bool,
    pub fail_chunk_at: Option<u32>,
    pub already_completed_at: Option<u32>,
    /// Trip this token when the given chunk index arrives.
    pub cancel_at_chunk: Option<(u32, CancellationToken)>,
    pub finalize_success: bool,

    pub config_requests: usize,
    pub update_cursors: Vec<i64>,
    pub batch_requests: Vec<Vec<BatchCall>>,
    pub update_call_requests: Vec<UpdateCallRequest>,
    pub person_requests: Vec<UpdatePersonRequest>,
    pub status_requests: Vec<Vec<String>>,
    /// `(unique_id, chunk_index, len)`
    pub chunks: Vec<(String, u32, usize)>,
    pub finalize_requests: Vec<(String, u32)>,
}

impl Default for FakeState {
    fn default() -> Self {
        Self {
            server_time: 1_000_000,
            config: ConfigResponse::default(),
            updates: UpdatesResponse::default(),
            fail_config: false,
            fail_updates: false,
            timeout_batches: HashSet::new(),
            reject_batches: HashSet::new(),
            withhold_ack: HashSet::new(),
            reject_update_call: false,
            person_success: true,
            completed_ids: Vec::new(),
            fail_status: false,
            fail_chunk_at: None,
            already_completed_at: None,
            cancel_at_chunk: None,
            finalize_success: true,
            config_requests: 0,
            update_cursors: Vec::new(),
            batch_requests: Vec::new(),
            update_call_requests: Vec::new(),
            person_requests: Vec::new(),
            status_requests: Vec::new(),
            chunks: Vec::new(),
            finalize_requests: Vec::new(),
        }
    }
}

impl FakeState {
    /// Requests of any kind received so far.
    pub fn total_requests(&self) -> usize {
        self.config_requests
            + self.update_cursors.len()
            + self.batch_requests.len()
            + self.update_call_requests.len()
            + self.person_requests.len()
            + self.status_requests.len()
            + self.chunks.len()
            + self.finalize_requests.len()
    }

    /// Upload-related requests received so far.
    pub fn upload_requests(&self) -> usize {
        self.status_requests.len() + self.chunks.len() + self.finalize_requests.len()
    }
}

#[derive(Debug, Default)]
pub struct FakeRemote {
    state: Mutex<FakeState>,
}

impl FakeRemote {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> MutexGuard<'_, FakeState> {
        self.state.lock().unwrap()
    }
}

fn timeout(op: &str) -> Error {
    Error::Transient(format!("{op} request failed: operation timed out"))
}

impl RemoteService for FakeRemote {
    async fn fetch_config(&self, _pairing: &Pairing, _device: &DeviceInfo) -> Result<ConfigResponse> {
        let mut state = self.state();
        state.config_requests += 1;
        if state.fail_config {
            return Err(timeout("fetch_config"));
        }
        Ok(state.config.clone())
    }

    async fn fetch_updates(&self, _pairing: &Pairing, last_sync_time: i64) -> Result<UpdatesResponse> {
        let mut state = self.state();
        state.update_cursors.push(last_sync_time);
        if state.fail_updates {
            return Err(timeout("fetch_updates"));
        }
        Ok(state.updates.clone())
    }

    async fn batch_sync_calls(&self, _pairing: &Pairing, calls: &[BatchCall]) -> Result<BatchSyncResponse> {
        let mut state = self.state();
        let number = state.batch_requests.len();
        state.batch_requests.push(calls.to_vec());

        if state.timeout_batches.contains(&number) {
            return Err(timeout("batch_sync_calls"));
        }
        if state.reject_batches.contains(&number) {
            return Err(Error::Rejected {
                status: 422,
                message: "invalid call payload".into(),
            });
        }
        let synced_ids = calls
            .iter()
            .map(|c| c.unique_id.clone())
            .filter(|id| !state.withhold_ack.contains(id))
            .collect();
        Ok(BatchSyncResponse {
            synced_ids,
            server_time: state.server_time,
        })
    }

    async fn update_call(&self, request: &UpdateCallRequest) -> Result<UpdateCallResponse> {
        let mut state = self.state();
        state.update_call_requests.push(request.clone());
        if state.reject_update_call {
            return Err(Error::Rejected {
                status: 404,
                message: "unknown call".into(),
            });
        }
        Ok(UpdateCallResponse {
            server_time: state.server_time,
        })
    }

    async fn update_person(&self, request: &UpdatePersonRequest) -> Result<bool> {
        let mut state = self.state();
        state.person_requests.push(request.clone());
        Ok(state.person_success)
    }

    async fn check_recordings_status(&self, ids: &[String]) -> Result<Vec<String>> {
        let mut state = self.state();
        state.status_requests.push(ids.to_vec());
        if state.fail_status {
            return Err(timeout("check_recordings_status"));
        }
        Ok(ids
            .iter()
            .filter(|id| state.completed_ids.contains(*id))
            .cloned()
            .collect())
    }

    async fn upload_chunk(&self, unique_id: &str, chunk_index: u32, bytes: Vec<u8>) -> Result<ChunkAck> {
        let mut state = self.state();
        state
            .chunks
            .push((unique_id.to_string(), chunk_index, bytes.len()));

        if let Some((at, token)) = &state.cancel_at_chunk {
            if *at == chunk_index {
                token.cancel();
            }
        }
        if state.already_completed_at == Some(chunk_index) {
            return Ok(ChunkAck::AlreadyCompleted);
        }
        if state.fail_chunk_at == Some(chunk_index) {
            return Err(Error::Rejected {
                status: 400,
                message: format!("chunk {chunk_index} rejected"),
            });
        }
        Ok(ChunkAck::Accepted)
    }

    async fn finalize_upload(&self, unique_id: &str, total_chunks: u32) -> Result<bool> {
        let mut state = self.state();
        state
            .finalize_requests
            .push((unique_id.to_string(), total_chunks));
        Ok(state.finalize_success)
    }
}
