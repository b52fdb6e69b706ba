//! Archive jobs and their persistence contract.
//!
//! A job is created by the archiving workflow when it hands work to the
//! worker, and afterwards only its status changes. This module owns the job
//! record, the status vocabulary, and the [`JobStore`] trait the status
//! endpoint talks to. Storage itself belongs to the host application.

use crate::error::StoreError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use tokio::sync::RwLock;
use uuid::Uuid;

/// Status of an archive job.
///
/// The set is open: the worker may report statuses this crate does not know,
/// which are preserved verbatim as [`JobStatus::Other`].
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum JobStatus {
    Unknown,
    Uninitialized,
    AwaitingProcessing,
    Running,
    WaitingForBackup,
    Finalizing,
    Finished,
    Failed,
    Timeout,
    Deleted,
    Other(String),
}

impl JobStatus {
    pub fn as_str(&self) -> &str {
        match self {
            JobStatus::Unknown => "UNKNOWN",
            JobStatus::Uninitialized => "UNINITIALIZED",
            JobStatus::AwaitingProcessing => "AWAITING_PROCESSING",
            JobStatus::Running => "RUNNING",
            JobStatus::WaitingForBackup => "WAITING_FOR_BACKUP",
            JobStatus::Finalizing => "FINALIZING",
            JobStatus::Finished => "FINISHED",
            JobStatus::Failed => "FAILED",
            JobStatus::Timeout => "TIMEOUT",
            JobStatus::Deleted => "DELETED",
            JobStatus::Other(s) => s,
        }
    }

    /// The job will not change any more.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Finished | JobStatus::Failed | JobStatus::Timeout | JobStatus::Deleted
        )
    }
}

impl From<&str> for JobStatus {
    fn from(s: &str) -> Self {
        match s {
            "UNKNOWN" => JobStatus::Unknown,
            "UNINITIALIZED" => JobStatus::Uninitialized,
            "AWAITING_PROCESSING" => JobStatus::AwaitingProcessing,
            "RUNNING" => JobStatus::Running,
            "WAITING_FOR_BACKUP" => JobStatus::WaitingForBackup,
            "FINALIZING" => JobStatus::Finalizing,
            "FINISHED" => JobStatus::Finished,
            "FAILED" => JobStatus::Failed,
            "TIMEOUT" => JobStatus::Timeout,
            "DELETED" => JobStatus::Deleted,
            other => JobStatus::Other(other.to_string()),
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for JobStatus {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for JobStatus {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Ok(JobStatus::from(s.as_str()))
    }
}

/// An archive job as tracked by the site.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArchiveJob {
    pub jobid: Uuid,
    pub courseid: i64,
    pub cmid: i64,
    pub quizid: i64,
    pub userid: i64,
    /// Unix timestamp (seconds).
    pub timecreated: i64,
    /// Unix timestamp (seconds) of the last status change.
    pub timemodified: i64,
    pub status: JobStatus,
}

impl ArchiveJob {
    /// A freshly created job in [`JobStatus::Uninitialized`].
    pub fn new(jobid: Uuid, courseid: i64, cmid: i64, quizid: i64, userid: i64) -> Self {
        let now = chrono::Utc::now().timestamp();
        Self {
            jobid,
            courseid,
            cmid,
            quizid,
            userid,
            timecreated: now,
            timemodified: now,
            status: JobStatus::Uninitialized,
        }
    }

    /// Change the status and bump `timemodified`.
    pub fn set_status(&mut self, status: JobStatus) {
        self.status = status;
        self.timemodified = chrono::Utc::now().timestamp();
    }
}

/// Persistence for archive jobs.
///
/// Implementations decide how updates are made durable. Concurrent writers
/// to the same job race; the last `save` wins.
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Fetch a job by id. Missing jobs are [`StoreError::NotFound`].
    async fn find(&self, jobid: &Uuid) -> Result<ArchiveJob, StoreError>;

    /// Insert or replace a job.
    async fn save(&self, job: &ArchiveJob) -> Result<(), StoreError>;
}

/// In-memory job store.
#[derive(Debug, Default)]
pub struct MemoryJobStore {
    jobs: RwLock<HashMap<Uuid, ArchiveJob>>,
}

impl MemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.jobs.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.jobs.read().await.is_empty()
    }
}

#[async_trait]
impl JobStore for MemoryJobStore {
    async fn find(&self, jobid: &Uuid) -> Result<ArchiveJob, StoreError> {
        self.jobs
            .read()
            .await
            .get(jobid)
            .cloned()
            .ok_or(StoreError::NotFound { jobid: *jobid })
    }

    async fn save(&self, job: &ArchiveJob) -> Result<(), StoreError> {
        self.jobs.write().await.insert(job.jobid, job.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_statuses_round_trip_through_strings() {
        for s in [
            "UNKNOWN",
            "UNINITIALIZED",
            "AWAITING_PROCESSING",
            "RUNNING",
            "WAITING_FOR_BACKUP",
            "FINALIZING",
            "FINISHED",
            "FAILED",
            "TIMEOUT",
            "DELETED",
        ] {
            let status = JobStatus::from(s);
            assert!(!matches!(status, JobStatus::Other(_)), "{s} should be known");
            assert_eq!(status.as_str(), s);
        }
    }

    #[test]
    fn test_worker_defined_status_is_preserved() {
        let status = JobStatus::from("UPLOADING_ARTIFACT");
        assert_eq!(status, JobStatus::Other("UPLOADING_ARTIFACT".into()));
        assert_eq!(
            serde_json::to_string(&status).unwrap(),
            "\"UPLOADING_ARTIFACT\""
        );
    }

    #[test]
    fn test_status_serialises_as_plain_string() {
        let json = serde_json::to_string(&JobStatus::WaitingForBackup).unwrap();
        assert_eq!(json, "\"WAITING_FOR_BACKUP\"");
        let back: JobStatus = serde_json::from_str(&json).unwrap();
        assert_eq!(back, JobStatus::WaitingForBackup);
    }

    #[test]
    fn test_terminal_statuses() {
        assert!(JobStatus::Finished.is_terminal());
        assert!(JobStatus::Timeout.is_terminal());
        assert!(!JobStatus::Running.is_terminal());
        assert!(!JobStatus::Other("X".into()).is_terminal());
    }

    #[test]
    fn test_set_status_updates_timestamp() {
        let mut job = ArchiveJob::new(Uuid::new_v4(), 1, 2, 3, 4);
        job.timemodified = 0;
        job.set_status(JobStatus::Running);
        assert_eq!(job.status, JobStatus::Running);
        assert!(job.timemodified > 0);
    }

    #[test]
    fn test_memory_store_find_and_save() {
        tokio_test::block_on(async {
            let store = MemoryJobStore::new();
            let job = ArchiveJob::new(Uuid::new_v4(), 1, 2, 3, 4);
            assert!(matches!(
                store.find(&job.jobid).await,
                Err(StoreError::NotFound { .. })
            ));

            store.save(&job).await.unwrap();
            assert_eq!(store.find(&job.jobid).await.unwrap(), job);
            assert_eq!(store.len().await, 1);
        });
    }
}
