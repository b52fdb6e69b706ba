//! Client for the remote archive worker.
//!
//! Starting an archive job is a single JSON `POST` to the worker. The request
//! tells the worker what to archive (attempt reports, course backups) and how
//! to reach back into the site: a webservice token plus the REST and upload
//! endpoints. Progress is reported later through
//! [`crate::status::update_job_status`].
//!
//! ## Response handling
//!
//! The body is decoded as JSON whatever the HTTP status is:
//!
//! | HTTP status | body decodes | result |
//! |-------------|--------------|--------|
//! | 200         | yes          | `Ok(EnqueueResponse)`, body untouched |
//! | 200         | no / `null`  | `ResponseDecodeFailed { status: None }` |
//! | other       | yes          | `RemoteRejected { message: body.error }` |
//! | other       | no / `null`  | `ResponseDecodeFailed { status: Some(code) }` |
//!
//! There are no retries. A failed enqueue is reported to the caller, which
//! owns the decision to try again.

use crate::config::ArchiverConfig;
use crate::error::ArchiverError;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Protocol version spoken with the worker.
pub const API_VERSION: u32 = 6;

/// Body of the enqueue request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnqueueRequest {
    pub api_version: u32,
    pub moodle_ws_url: String,
    pub moodle_upload_url: String,
    pub wstoken: String,
    pub courseid: i64,
    pub cmid: i64,
    pub quizid: i64,
    /// Attempt report task; `None` (JSON `null`) skips it.
    pub task_archive_quiz_attempts: Option<Value>,
    /// Course backup task; `None` (JSON `null`) skips it.
    pub task_moodle_backups: Option<Value>,
}

/// Decoded success response of the worker. Passed through as-is.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EnqueueResponse(pub Value);

impl EnqueueResponse {
    /// Job id assigned by the worker, if the response carries one.
    pub fn jobid(&self) -> Option<&str> {
        self.0.get("jobid").and_then(Value::as_str)
    }

    /// Initial job status reported by the worker.
    pub fn status(&self) -> Option<&str> {
        self.0.get("status").and_then(Value::as_str)
    }

    pub fn into_inner(self) -> Value {
        self.0
    }
}

/// HTTP client for the archive worker's enqueue endpoint.
#[derive(Debug, Clone)]
pub struct ArchiveWorkerClient {
    http: reqwest::Client,
    worker_url: String,
    moodle_ws_url: String,
    moodle_upload_url: String,
    request_timeout_secs: u64,
}

impl ArchiveWorkerClient {
    pub fn new(config: &ArchiverConfig) -> Result<Self, ArchiverError> {
        let http = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .redirect(reqwest::redirect::Policy::limited(10))
            .build()
            .map_err(|e| ArchiverError::Internal(format!("Failed to build HTTP client: {e}")))?;

        Ok(Self {
            http,
            worker_url: config.worker_url.clone(),
            moodle_ws_url: config.moodle_ws_url(),
            moodle_upload_url: config.moodle_upload_url(),
            request_timeout_secs: config.request_timeout_secs,
        })
    }

    pub fn worker_url(&self) -> &str {
        &self.worker_url
    }

    /// Assemble the request body without sending it.
    pub fn build_request(
        &self,
        wstoken: &str,
        courseid: i64,
        cmid: i64,
        quizid: i64,
        task_archive_quiz_attempts: Option<Value>,
        task_moodle_backups: Option<Value>,
    ) -> EnqueueRequest {
        EnqueueRequest {
            api_version: API_VERSION,
            moodle_ws_url: self.moodle_ws_url.clone(),
            moodle_upload_url: self.moodle_upload_url.clone(),
            wstoken: wstoken.to_string(),
            courseid,
            cmid,
            quizid,
            task_archive_quiz_attempts,
            task_moodle_backups,
        }
    }

    /// Ask the worker to start a new archive job.
    ///
    /// # Errors
    /// * [`ArchiverError::Transport`] / [`ArchiverError::Timeout`] when the
    ///   worker cannot be reached in time;
    /// * [`ArchiverError::ResponseDecodeFailed`] when the body is not JSON;
    /// * [`ArchiverError::RemoteRejected`] when the worker refuses the job.
    pub async fn enqueue_archive_job(
        &self,
        wstoken: &str,
        courseid: i64,
        cmid: i64,
        quizid: i64,
        task_archive_quiz_attempts: Option<Value>,
        task_moodle_backups: Option<Value>,
    ) -> Result<EnqueueResponse, ArchiverError> {
        let request = self.build_request(
            wstoken,
            courseid,
            cmid,
            quizid,
            task_archive_quiz_attempts,
            task_moodle_backups,
        );
        self.send(&request).await
    }

    /// Send a prepared request. Exactly one HTTP call, no retries.
    pub async fn send(&self, request: &EnqueueRequest) -> Result<EnqueueResponse, ArchiverError> {
        info!(
            "Enqueueing archive job for course {} / cm {} at {}",
            request.courseid, request.cmid, self.worker_url
        );

        let body = serde_json::to_vec(request)
            .map_err(|e| ArchiverError::Internal(format!("Failed to serialise request: {e}")))?;

        let response = self
            .http
            .post(&self.worker_url)
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .body(body)
            .send()
            .await
            .map_err(|e| self.transport_error(e))?;

        let status = response.status().as_u16();
        let text = response.text().await.map_err(|e| self.transport_error(e))?;
        debug!("Worker answered HTTP {} with {} bytes", status, text.len());

        let result = decode_response(status, &text);
        match &result {
            Ok(r) => info!(
                "Archive job accepted: jobid={} status={}",
                r.jobid().unwrap_or("?"),
                r.status().unwrap_or("?")
            ),
            Err(e) => warn!("Enqueue failed: {}", e),
        }
        result
    }

    fn transport_error(&self, e: reqwest::Error) -> ArchiverError {
        if e.is_timeout() {
            ArchiverError::Timeout {
                url: self.worker_url.clone(),
                secs: self.request_timeout_secs,
            }
        } else {
            ArchiverError::Transport {
                url: self.worker_url.clone(),
                reason: e.to_string(),
            }
        }
    }
}

/// Apply the worker response policy to a status code and raw body.
pub fn decode_response(status: u16, body: &str) -> Result<EnqueueResponse, ArchiverError> {
    // A bare `null` carries no job and counts as undecodable.
    let decoded: Option<Value> = serde_json::from_str(body)
        .ok()
        .filter(|v: &Value| !v.is_null());

    match (status, decoded) {
        (200, Some(value)) => Ok(EnqueueResponse(value)),
        (200, None) => Err(ArchiverError::ResponseDecodeFailed { status: None }),
        (code, None) => Err(ArchiverError::ResponseDecodeFailed { status: Some(code) }),
        (_, Some(value)) => {
            let message = value
                .get("error")
                .and_then(Value::as_str)
                .map(str::to_string)
                .unwrap_or_else(|| body.to_string());
            Err(ArchiverError::RemoteRejected { message })
        }
    }
}
