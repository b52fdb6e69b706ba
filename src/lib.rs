//! # quiz-archiver
//!
//! Site-side core of a quiz archiver that offloads the heavy lifting
//! (rendering attempt reports to HTML/PDF, bundling course backups) to an
//! external worker service.
//!
//! ## What lives here
//!
//! ```text
//!            enqueue (POST JSON)
//!  site ─────────────────────────────▶ worker
//!   ▲  ArchiveWorkerClient               │
//!   │                                    │ status callbacks
//!   └──── update_job_status ◀────────────┘
//!
//!  rendered report ──▶ Rehydrator ──▶ self-contained HTML
//!                      (pluginfile / STACK plot / HTTP → data: URIs)
//! ```
//!
//! 1. [`ArchiveWorkerClient`] builds and sends the enqueue request and maps
//!    the worker's answer onto [`ArchiverError`].
//! 2. [`update_job_status`] is the operation the worker calls back into.
//!    Storage failures become the `E_UPDATE_FAILED` acknowledgement.
//! 3. [`Rehydrator`] inlines every image of a report page so the page no
//!    longer depends on the site being reachable.
//! 4. [`resolve_url`] is the small URL normaliser used by the rehydrator.
//!
//! Job persistence ([`JobStore`]) and file storage ([`FileStore`]) are
//! traits; the host application provides the real implementations.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use quiz_archiver::{ArchiveWorkerClient, ArchiverConfig};
//! use serde_json::json;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = ArchiverConfig::from_env()
//!         .wwwroot("https://moodle.example.org")
//!         .worker_url("http://archiver-worker:8080/archive")
//!         .build()?;
//!     let client = ArchiveWorkerClient::new(&config)?;
//!     let job = client
//!         .enqueue_archive_job(
//!             "webservice-token",
//!             12,
//!             345,
//!             67,
//!             Some(json!({ "attemptids": [1, 2, 3] })),
//!             None,
//!         )
//!         .await?;
//!     println!("worker job {:?}", job.jobid());
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `quiz-archiver` binary (clap + anyhow + tracing-subscriber) |

// ── Modules ──────────────────────────────────────────────────────────────

pub mod client;
pub mod config;
pub mod error;
pub mod jobs;
pub mod pipeline;
pub mod rehydrate;
pub mod status;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use client::{decode_response, ArchiveWorkerClient, EnqueueRequest, EnqueueResponse, API_VERSION};
pub use config::{ArchiverConfig, ArchiverConfigBuilder, INTERNAL_HOST_ENV};
pub use error::{ArchiverError, InlineError, StatusUpdateError, StoreError};
pub use jobs::{ArchiveJob, JobStatus, JobStore, MemoryJobStore};
pub use pipeline::classify::{AddressingScheme, ImageSource, StoredFileRef};
pub use pipeline::fetch::{DirectoryFileStore, FileStore, MemoryFileStore};
pub use pipeline::resolve::resolve_url;
pub use rehydrate::{ImageOutcome, RehydratedDocument, Rehydrator, ReportOptions};
pub use status::{
    handle_update_job_status, update_job_status, StatusAck, UpdateJobStatusParams, STATUS_OK,
    STATUS_UPDATE_FAILED,
};
