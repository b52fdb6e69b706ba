//! Error types for the quiz-archiver library.
//!
//! Failures fall into four families with different propagation rules:
//!
//! * [`ArchiverError`]: **Fatal** for the calling workflow. Returned as
//!   `Err(ArchiverError)` from the enqueue client and from constructors that
//!   validate configuration.
//!
//! * [`StatusUpdateError`]: hard failures of the status-update operation.
//!   Only malformed input ends up here; persistence trouble does not.
//!
//! * [`StoreError`]: raised by a [`crate::jobs::JobStore`]. The status
//!   endpoint downgrades every one of these to the `E_UPDATE_FAILED` sentinel.
//!
//! * [`InlineError`]: **Non-fatal**, scoped to a single `<img>` element.
//!   Stored inside [`crate::rehydrate::ImageOutcome`] and reflected in the
//!   document as a diagnostic attribute. Never aborts the document.

use std::path::PathBuf;
use thiserror::Error;

/// Fatal errors of the enqueue client and library setup.
#[derive(Debug, Error)]
pub enum ArchiverError {
    // ── Worker protocol errors ────────────────────────────────────────────
    /// The worker answered with a body that is not valid JSON.
    ///
    /// `status` is only set when the HTTP status was not 200.
    #[error("Failed to decode archive worker response{}", status_suffix(.status))]
    ResponseDecodeFailed { status: Option<u16> },

    /// The worker returned a structured error (`{"error": "..."}`).
    #[error("Archive worker rejected the job: {message}")]
    RemoteRejected { message: String },

    // ── Transport errors ──────────────────────────────────────────────────
    /// The request could not be delivered (DNS, refused connection, TLS).
    #[error("Request to '{url}' failed: {reason}")]
    Transport { url: String, reason: String },

    /// The request exceeded the configured total timeout.
    #[error("Request to '{url}' timed out after {secs}s")]
    Timeout { url: String, secs: u64 },

    // ── Config errors ─────────────────────────────────────────────────────
    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

fn status_suffix(status: &Option<u16>) -> String {
    match status {
        Some(code) => format!(" (HTTP {code})"),
        None => String::new(),
    }
}

/// Hard failures of [`crate::status::update_job_status`].
#[derive(Debug, Error)]
pub enum StatusUpdateError {
    /// A parameter is missing or is not plain text.
    #[error("Invalid parameter '{name}': {reason}")]
    InvalidParameter { name: &'static str, reason: String },

    /// The job id is not a UUID.
    #[error("Invalid job id '{value}': {source}")]
    InvalidJobId {
        value: String,
        #[source]
        source: uuid::Error,
    },
}

/// Persistence-layer failures reported by a [`crate::jobs::JobStore`].
#[derive(Debug, Clone, Error)]
pub enum StoreError {
    #[error("Archive job {jobid} does not exist")]
    NotFound { jobid: uuid::Uuid },

    #[error("Job store failure: {0}")]
    Backend(String),
}

/// A non-fatal error for a single image element.
#[derive(Debug, Clone, PartialEq, Eq, Error, serde::Serialize, serde::Deserialize)]
pub enum InlineError {
    /// The resolved URL is not `http://` or `https://`.
    #[error("'{url}' is not an HTTP(S) URL")]
    NotHttp { url: String },

    /// The file extension is not an allowed image type.
    #[error("'{url}' has disallowed extension '{extension}'")]
    DisallowedExtension { url: String, extension: String },

    /// A question pluginfile URL did not match the question-specific layout.
    #[error("'{url}' addresses a question file but lacks question bank and slot segments")]
    QuestionPatternMismatch { url: String },

    /// A pluginfile segment that must be numeric is not.
    #[error("'{url}' has a malformed {segment}")]
    MalformedPluginfile { url: String, segment: String },

    /// The file store has no file at the extracted location.
    #[error("No stored file for '{url}'")]
    FileNotFound { url: String },

    /// The cached stack plot could not be read.
    #[error("Stack plot '{}' unreadable: {detail}", .path.display())]
    StackPlotUnreadable { path: PathBuf, detail: String },

    /// The generic HTTP fetch failed.
    #[error("Failed to fetch '{url}': {detail}")]
    FetchFailed { url: String, detail: String },

    /// Retrieval succeeded but produced no bytes.
    #[error("'{url}' returned no content")]
    EmptyContent { url: String },
}
