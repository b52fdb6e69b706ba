//! Status update operation called back by the archive worker.
//!
//! The worker reports progress (`RUNNING`, `FINISHED`, ...) by invoking this
//! operation through the site's webservice layer, which has already
//! authenticated the call. The contract is deliberately forgiving towards
//! storage trouble: if the job cannot be loaded or saved, the worker receives
//! a normal response with status `E_UPDATE_FAILED` rather than a transport
//! error. Only malformed input is a hard failure.

use crate::error::StatusUpdateError;
use crate::jobs::{JobStatus, JobStore};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};
use uuid::Uuid;

/// Acknowledgement for an applied status update.
pub const STATUS_OK: &str = "OK";

/// Acknowledgement when the job could not be loaded or saved.
pub const STATUS_UPDATE_FAILED: &str = "E_UPDATE_FAILED";

static RE_TAG: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?s)<[^>]*>").unwrap());

/// Validated input of the status update operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateJobStatusParams {
    pub jobid: String,
    pub status: String,
}

impl UpdateJobStatusParams {
    /// Validate raw parameters against the fixed schema
    /// `{ jobid: text, status: text }`.
    ///
    /// Both values must be strings; markup is stripped like for any plain
    /// text parameter.
    pub fn from_value(raw: &Value) -> Result<Self, StatusUpdateError> {
        let obj = raw
            .as_object()
            .ok_or_else(|| StatusUpdateError::InvalidParameter {
                name: "params",
                reason: "expected an object".into(),
            })?;

        Ok(Self {
            jobid: text_param(obj.get("jobid"), "jobid")?,
            status: text_param(obj.get("status"), "status")?,
        })
    }
}

fn text_param(value: Option<&Value>, name: &'static str) -> Result<String, StatusUpdateError> {
    match value {
        Some(Value::String(s)) => Ok(clean_text(s)),
        Some(other) => Err(StatusUpdateError::InvalidParameter {
            name,
            reason: format!("expected text, got {other}"),
        }),
        None => Err(StatusUpdateError::InvalidParameter {
            name,
            reason: "missing".into(),
        }),
    }
}

/// Strip markup from a plain-text parameter.
pub fn clean_text(s: &str) -> String {
    RE_TAG.replace_all(s, "").into_owned()
}

/// Response of the status update operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusAck {
    pub jobid: String,
    /// [`STATUS_OK`] or [`STATUS_UPDATE_FAILED`].
    pub status: String,
}

impl StatusAck {
    fn new(jobid: &str, status: &str) -> Self {
        Self {
            jobid: jobid.to_string(),
            status: status.to_string(),
        }
    }

    pub fn is_ok(&self) -> bool {
        self.status == STATUS_OK
    }
}

/// Validate raw webservice parameters and apply the status update.
pub async fn handle_update_job_status(
    store: &dyn JobStore,
    raw: &Value,
) -> Result<StatusAck, StatusUpdateError> {
    let params = UpdateJobStatusParams::from_value(raw)?;
    update_job_status(store, params).await
}

/// Transition a job to a new status.
///
/// # Errors
/// Only a job id that is not a UUID. Lookup and save failures are reported
/// through the returned ack as [`STATUS_UPDATE_FAILED`].
pub async fn update_job_status(
    store: &dyn JobStore,
    params: UpdateJobStatusParams,
) -> Result<StatusAck, StatusUpdateError> {
    let jobid = Uuid::parse_str(&params.jobid).map_err(|source| {
        StatusUpdateError::InvalidJobId {
            value: params.jobid.clone(),
            source,
        }
    })?;

    let mut job = match store.find(&jobid).await {
        Ok(job) => job,
        Err(e) => {
            warn!("Status update for job {} failed on lookup: {}", jobid, e);
            return Ok(StatusAck::new(&params.jobid, STATUS_UPDATE_FAILED));
        }
    };

    let previous = job.status.clone();
    job.set_status(JobStatus::from(params.status.as_str()));

    if let Err(e) = store.save(&job).await {
        warn!("Status update for job {} failed on save: {}", jobid, e);
        return Ok(StatusAck::new(&params.jobid, STATUS_UPDATE_FAILED));
    }

    debug!("Job {}: {} → {}", jobid, previous, job.status);
    Ok(StatusAck::new(&params.jobid, STATUS_OK))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StoreError;
    use crate::jobs::{ArchiveJob, MemoryJobStore};
    use async_trait::async_trait;
    use serde_json::json;

    /// Store whose every call fails at the persistence layer.
    struct BrokenStore;

    #[async_trait]
    impl JobStore for BrokenStore {
        async fn find(&self, _jobid: &Uuid) -> Result<ArchiveJob, StoreError> {
            Err(StoreError::Backend("connection reset".into()))
        }

        async fn save(&self, _job: &ArchiveJob) -> Result<(), StoreError> {
            Err(StoreError::Backend("connection reset".into()))
        }
    }

    /// Store that finds jobs but cannot write.
    struct ReadOnlyStore(ArchiveJob);

    #[async_trait]
    impl JobStore for ReadOnlyStore {
        async fn find(&self, _jobid: &Uuid) -> Result<ArchiveJob, StoreError> {
            Ok(self.0.clone())
        }

        async fn save(&self, _job: &ArchiveJob) -> Result<(), StoreError> {
            Err(StoreError::Backend("read-only replica".into()))
        }
    }

    fn params(jobid: &str, status: &str) -> UpdateJobStatusParams {
        UpdateJobStatusParams {
            jobid: jobid.into(),
            status: status.into(),
        }
    }

    #[tokio::test]
    async fn test_successful_update_acks_ok() {
        let store = MemoryJobStore::new();
        let job = ArchiveJob::new(Uuid::new_v4(), 2, 3, 4, 5);
        store.save(&job).await.unwrap();

        let id = job.jobid.to_string();
        let ack = update_job_status(&store, params(&id, "FINISHED")).await.unwrap();
        assert_eq!(ack, StatusAck::new(&id, STATUS_OK));
        assert_eq!(store.find(&job.jobid).await.unwrap().status, JobStatus::Finished);
    }

    #[tokio::test]
    async fn test_ack_does_not_echo_new_status() {
        let store = MemoryJobStore::new();
        let job = ArchiveJob::new(Uuid::new_v4(), 2, 3, 4, 5);
        store.save(&job).await.unwrap();

        let ack = update_job_status(&store, params(&job.jobid.to_string(), "RUNNING"))
            .await
            .unwrap();
        assert_eq!(ack.status, "OK");
    }

    #[tokio::test]
    async fn test_unknown_job_is_soft_failure() {
        let store = MemoryJobStore::new();
        let id = Uuid::new_v4().to_string();
        let ack = update_job_status(&store, params(&id, "RUNNING")).await.unwrap();
        assert_eq!(ack, StatusAck::new(&id, STATUS_UPDATE_FAILED));
    }

    #[tokio::test]
    async fn test_lookup_error_is_soft_failure() {
        let id = Uuid::new_v4().to_string();
        let ack = update_job_status(&BrokenStore, params(&id, "RUNNING"))
            .await
            .unwrap();
        assert_eq!(ack.status, STATUS_UPDATE_FAILED);
        assert_eq!(ack.jobid, id);
    }

    #[tokio::test]
    async fn test_save_error_is_soft_failure() {
        let job = ArchiveJob::new(Uuid::new_v4(), 2, 3, 4, 5);
        let id = job.jobid.to_string();
        let ack = update_job_status(&ReadOnlyStore(job), params(&id, "FAILED"))
            .await
            .unwrap();
        assert!(!ack.is_ok());
    }

    #[tokio::test]
    async fn test_malformed_uuid_is_hard_failure() {
        let err = update_job_status(&BrokenStore, params("not-a-uuid", "RUNNING"))
            .await
            .unwrap_err();
        assert!(matches!(err, StatusUpdateError::InvalidJobId { .. }));
    }

    #[tokio::test]
    async fn test_invalid_params_fail_before_lookup() {
        for raw in [
            json!({"jobid": "x"}),
            json!({"jobid": 12, "status": "RUNNING"}),
            json!({"jobid": "x", "status": null}),
            json!(["x", "RUNNING"]),
        ] {
            let err = handle_update_job_status(&BrokenStore, &raw).await.unwrap_err();
            assert!(
                matches!(err, StatusUpdateError::InvalidParameter { .. }),
                "{raw} should be rejected, got {err:?}"
            );
        }
    }

    #[tokio::test]
    async fn test_raw_params_are_cleaned() {
        let store = MemoryJobStore::new();
        let job = ArchiveJob::new(Uuid::new_v4(), 2, 3, 4, 5);
        store.save(&job).await.unwrap();

        let raw = json!({"jobid": job.jobid.to_string(), "status": "<b>FINALIZING</b>"});
        let ack = handle_update_job_status(&store, &raw).await.unwrap();
        assert!(ack.is_ok());
        assert_eq!(
            store.find(&job.jobid).await.unwrap().status,
            JobStatus::Finalizing
        );
    }
}
