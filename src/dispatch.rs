//! Dispatch orchestration: package → describe → authenticate → prepare →
//! submit → poll, then revoke.

use std::sync::Arc;
use std::time::{Duration, Instant};

use strum::Display;

use crate::models::job::{DescriptorError, JobDescriptor, JobOverrides};
use crate::models::status::{JobState, JobStatus};
use crate::models::token::VaultToken;
use crate::services::broker::{BrokerError, CredentialBroker, Credentials};
use crate::services::content::{self, PackageError};
use crate::services::jobs::{self, JobApi, JobServiceError};
use crate::services::vault::SecretBroker;

/// Everything needed for one dispatch.
#[derive(Debug, Clone)]
pub struct DispatchRequest {
    pub credentials: Credentials,
    /// Directory or `.tar.gz` to package as the job content.
    pub content: Option<String>,
    pub overrides: JobOverrides,
    pub poll_interval: Duration,
    pub wait: bool,
}

/// The job state the dispatch ended on.
#[derive(Debug, Clone)]
pub struct DispatchOutcome {
    pub job: JobState,
    pub elapsed: Duration,
}

impl DispatchOutcome {
    pub fn succeeded(&self) -> bool {
        self.job.status == JobStatus::Success
    }

    pub fn exit_code(&self) -> i32 {
        self.job.return_code
    }

    pub fn output(&self) -> &str {
        &self.job.output
    }

    /// Process exit code for this outcome.
    ///
    /// `0` for success or a job still in flight (only seen without waiting).
    /// Any other terminal status exits with the job's return code, or `1` when
    /// the job itself reported `0`.
    pub fn process_exit_code(&self) -> i32 {
        if self.succeeded() || !self.job.status.is_terminal() {
            return 0;
        }
        match self.job.return_code {
            0 => 1,
            code => code,
        }
    }
}

/// Which part of the dispatch produced an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum DispatchStage {
    #[strum(to_string = "content packaging")]
    Package,
    #[strum(to_string = "job descriptor")]
    Describe,
    #[strum(to_string = "vault authentication")]
    Authenticate,
    #[strum(to_string = "api token issue")]
    ApiToken,
    #[strum(to_string = "secret-id wrapping")]
    WrapSecretId,
    #[strum(to_string = "payload encryption")]
    Encrypt,
    #[strum(to_string = "cubbyhole stash")]
    Cubbyhole,
    #[strum(to_string = "job submission")]
    Submit,
    #[strum(to_string = "job polling")]
    Poll,
}

/// Sequences one dispatch against a Vault broker and a job service.
pub struct Dispatcher {
    broker: CredentialBroker,
    jobs: Arc<dyn JobApi>,
}

impl Dispatcher {
    pub fn new(vault: Arc<dyn SecretBroker>, jobs: Arc<dyn JobApi>, role: impl Into<String>) -> Self {
        Self {
            broker: CredentialBroker::new(vault, role),
            jobs,
        }
    }

    /// Run a dispatch to completion.
    ///
    /// Once authentication has succeeded the primary token is revoked before
    /// returning, whatever the outcome.
    ///
    /// Revoking the primary token also revokes its children. Without `wait`
    /// this happens right after the first poll, so a job the service has not
    /// yet picked up loses its cubbyhole token and API token with it.
    ///
    /// Packaged content replaces `overrides.content`; otherwise the override
    /// is kept.
    pub async fn dispatch(&self, request: &DispatchRequest) -> Result<DispatchOutcome, DispatchError> {
        let started = Instant::now();

        let payload = content::package(request.content.as_deref().unwrap_or(""))?;
        let job = if payload.is_empty() {
            request.overrides.build()?
        } else {
            JobOverrides {
                content: Some(payload),
                ..request.overrides.clone()
            }
            .build()?
        };
        tracing::info!(qname = %job.qname, image = %job.container_image, "Job descriptor built");

        let primary = self.broker.authenticate(&request.credentials).await?;

        let result = self.run_authenticated(&primary, &job, request).await;
        self.broker.revoke(&primary).await;

        let state = result?;
        let elapsed = started.elapsed();
        tracing::info!(
            job_id = %state.id,
            status = %state.status,
            return_code = state.return_code,
            run_secs = state.run_duration().map(|d| d.num_milliseconds() as f64 / 1000.0),
            elapsed_ms = elapsed.as_millis() as u64,
            "Dispatch finished"
        );

        Ok(DispatchOutcome {
            job: state,
            elapsed,
        })
    }

    async fn run_authenticated(
        &self,
        primary: &VaultToken,
        job: &JobDescriptor,
        request: &DispatchRequest,
    ) -> Result<JobState, DispatchError> {
        let prepared = self.broker.prepare(primary, job).await?;

        let ack = self
            .jobs
            .submit(&prepared.submission, &prepared.api_token)
            .await
            .map_err(DispatchError::SubmissionFailed)?;
        tracing::info!(job_id = %ack.id, status = %ack.status, qname = %ack.qname, "Job submitted");

        jobs::await_terminal(
            self.jobs.as_ref(),
            &ack.id,
            &prepared.api_token,
            request.poll_interval,
            request.wait,
        )
        .await
        .map_err(|source| DispatchError::PollFailed { id: ack.id.clone(), source })
    }
}

#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error(transparent)]
    Package(#[from] PackageError),

    #[error(transparent)]
    Descriptor(#[from] DescriptorError),

    #[error(transparent)]
    Broker(#[from] BrokerError),

    #[error("Job submission failed: {0}")]
    SubmissionFailed(#[source] JobServiceError),

    #[error("Polling job {id} failed: {source}")]
    PollFailed {
        id: String,
        #[source]
        source: JobServiceError,
    },
}

impl DispatchError {
    pub fn stage(&self) -> DispatchStage {
        match self {
            DispatchError::Package(_) => DispatchStage::Package,
            DispatchError::Descriptor(_) => DispatchStage::Describe,
            DispatchError::Broker(err) => match err {
                BrokerError::AuthenticationFailed(_) => DispatchStage::Authenticate,
                BrokerError::ApiToken(_) => DispatchStage::ApiToken,
                BrokerError::WrapSecretId { .. } => DispatchStage::WrapSecretId,
                BrokerError::Serialize(_) | BrokerError::Encrypt(_) => DispatchStage::Encrypt,
                BrokerError::Cubbyhole(_) => DispatchStage::Cubbyhole,
            },
            DispatchError::SubmissionFailed(_) => DispatchStage::Submit,
            DispatchError::PollFailed { .. } => DispatchStage::Poll,
        }
    }
}
