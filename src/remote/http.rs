//! HTTP implementation of the remote sync service.

use std::time::Duration;

use reqwest::{RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::config::{DeviceInfo, Pairing};
use crate::error::{Error, Result};

use super::types::{
    BatchCall, BatchSyncRequest, BatchSyncResponse, ChunkAck, ConfigResponse, FinalizeRequest,
    RecordingStatusRequest, RecordingStatusResponse, SuccessResponse, UpdateCallRequest,
    UpdateCallResponse, UpdatePersonRequest, UpdatesResponse,
};
use super::RemoteService;

const ALREADY_COMPLETED: &str = "already completed";

/// reqwest-backed client for the sync API.
pub struct HttpRemote {
    client: reqwest::Client,
    base_url: String,
    token: Option<String>,
}

impl HttpRemote {
    /// Create a client for `base_url` (trailing slash optional).
    ///
    /// # Errors
    ///
    /// Returns `Config` if the HTTP client cannot be built.
    pub fn new(base_url: &str, token: Option<String>, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::Config(format!("Failed to build api client: {e}")))?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            token,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    async fn send(&self, request: RequestBuilder, op: &str) -> Result<Response> {
        debug!(op, "Sending request");
        self.authorize(request)
            .send()
            .await
            .map_err(|e| Error::Transient(format!("{op} request failed: {e}")))
    }
}

/// Map a non-success status to the error taxonomy.
fn status_error(status: StatusCode, body: &str, op: &str) -> Error {
    match status.as_u16() {
        408 | 425 | 429 | 500..=599 => Error::Transient(format!("{op} failed with status {status}")),
        code => Error::Rejected {
            status: code,
            message: if body.is_empty() {
                format!("{op} failed with status {status}")
            } else {
                body.to_string()
            },
        },
    }
}

async fn read_json<T: DeserializeOwned>(response: Response, op: &str) -> Result<T> {
    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(status_error(status, &body, op));
    }

    // An unreadable body leaves the outcome unknown; retry is safe because
    // every write is idempotent per identity.
    response
        .json::<T>()
        .await
        .map_err(|e| Error::Transient(format!("Failed to parse {op} response: {e}")))
}

impl RemoteService for HttpRemote {
    async fn fetch_config(&self, pairing: &Pairing, device: &DeviceInfo) -> Result<ConfigResponse> {
        let mut query = vec![
            ("org_id", pairing.org_id.clone()),
            ("user_id", pairing.user_id.clone()),
            ("os_version", device.os_version.clone()),
            ("device_model", device.device_model.clone()),
        ];
        if let Some(battery) = device.battery_pct {
            query.push(("battery_pct", battery.to_string()));
        }

        let request = self.client.get(self.url("/config")).query(&query);
        let response = self.send(request, "fetch_config").await?;
        read_json(response, "fetch_config").await
    }

    async fn fetch_updates(&self, pairing: &Pairing, last_sync_time: i64) -> Result<UpdatesResponse> {
        let query = [
            ("org_id", pairing.org_id.clone()),
            ("user_id", pairing.user_id.clone()),
            ("device_id", pairing.device_id.clone()),
            ("last_sync_time", last_sync_time.to_string()),
        ];

        let request = self.client.get(self.url("/updates")).query(&query);
        let response = self.send(request, "fetch_updates").await?;
        read_json(response, "fetch_updates").await
    }

    async fn batch_sync_calls(&self, pairing: &Pairing, calls: &[BatchCall]) -> Result<BatchSyncResponse> {
        let body = BatchSyncRequest {
            org_id: &pairing.org_id,
            user_id: &pairing.user_id,
            device_id: &pairing.device_id,
            calls,
        };

        let request = self.client.post(self.url("/calls/batch")).json(&body);
        let response = self.send(request, "batch_sync_calls").await?;
        read_json(response, "batch_sync_calls").await
    }

    async fn update_call(&self, request: &UpdateCallRequest) -> Result<UpdateCallResponse> {
        let builder = self.client.post(self.url("/calls/update")).json(request);
        let response = self.send(builder, "update_call").await?;
        read_json(response, "update_call").await
    }

    async fn update_person(&self, request: &UpdatePersonRequest) -> Result<bool> {
        let builder = self.client.post(self.url("/persons/update")).json(request);
        let response = self.send(builder, "update_person").await?;
        let data: SuccessResponse = read_json(response, "update_person").await?;
        Ok(data.success)
    }

    async fn check_recordings_status(&self, ids: &[String]) -> Result<Vec<String>> {
        let body = RecordingStatusRequest { ids };
        let request = self.client.post(self.url("/recordings/status")).json(&body);
        let response = self.send(request, "check_recordings_status").await?;
        let data: RecordingStatusResponse = read_json(response, "check_recordings_status").await?;
        Ok(data.completed_ids)
    }

    async fn upload_chunk(&self, unique_id: &str, chunk_index: u32, bytes: Vec<u8>) -> Result<ChunkAck> {
        let query = [
            ("unique_id", unique_id.to_string()),
            ("chunk_index", chunk_index.to_string()),
        ];
        let request = self
            .client
            .post(self.url("/recordings/chunk"))
            .query(&query)
            .header(reqwest::header::CONTENT_TYPE, "application/octet-stream")
            .body(bytes);

        let response = self.send(request, "upload_chunk").await?;
        let status = response.status();
        let body = response.text().await.unwrap_or_default();

        if status == StatusCode::CONFLICT || body.to_lowercase().contains(ALREADY_COMPLETED) {
            return Ok(ChunkAck::AlreadyCompleted);
        }
        if !status.is_success() {
            return Err(status_error(status, &body, "upload_chunk"));
        }
        Ok(ChunkAck::Accepted)
    }

    async fn finalize_upload(&self, unique_id: &str, total_chunks: u32) -> Result<bool> {
        let body = FinalizeRequest {
            unique_id,
            total_chunks,
        };
        let request = self.client.post(self.url("/recordings/finalize")).json(&body);
        let response = self.send(request, "finalize_upload").await?;
        let data: SuccessResponse = read_json(response, "finalize_upload").await?;
        Ok(data.success)
    }
}
