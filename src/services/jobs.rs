use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::de::DeserializeOwned;

use crate::models::status::JobState;
use crate::models::submission::{JobSubmission, SubmitResponse};
use crate::models::token::VaultToken;

const AUTH_HEADER: &str = "X-Auth-Token";

/// The job service operations a dispatch needs.
#[async_trait]
pub trait JobApi: Send + Sync {
    /// Submit a wrapped job reference.
    async fn submit(
        &self,
        submission: &JobSubmission,
        token: &VaultToken,
    ) -> Result<SubmitResponse, JobServiceError>;

    /// Fetch the current state of job `id`.
    async fn poll(&self, id: &str, token: &VaultToken) -> Result<JobState, JobServiceError>;
}

/// Poll job `id` until it reaches a terminal status.
///
/// With `wait` unset this is a single poll whatever the status. Otherwise it
/// sleeps `interval` between polls with no attempt limit.
pub async fn await_terminal(
    api: &dyn JobApi,
    id: &str,
    token: &VaultToken,
    interval: Duration,
    wait: bool,
) -> Result<JobState, JobServiceError> {
    let mut attempts: u64 = 0;
    loop {
        let state = api.poll(id, token).await?;
        attempts += 1;

        if !wait || state.status.is_terminal() {
            tracing::debug!(job_id = %id, status = %state.status, attempts, "Job poll finished");
            return Ok(state);
        }

        tracing::trace!(job_id = %id, status = %state.status, "Job not finished, sleeping");
        tokio::time::sleep(interval).await;
    }
}

/// Client for the GoStint job service HTTP API.
pub struct JobServiceClient {
    http: Client,
    base_url: String,
}

impl JobServiceClient {
    /// Create a client for the job service at `base_url`.
    ///
    /// `insecure_skip_verify` uses `danger_accept_invalid_certs`, for job
    /// services running with self-signed certificates.
    pub fn new(
        base_url: &str,
        insecure_skip_verify: bool,
        timeout: Duration,
    ) -> Result<Self, JobServiceError> {
        if insecure_skip_verify {
            tracing::warn!(url = %base_url, "Job service TLS certificate verification is disabled");
        }

        let http = Client::builder()
            .danger_accept_invalid_certs(insecure_skip_verify)
            .timeout(timeout)
            .build()?;

        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    async fn parse<T: DeserializeOwned>(
        response: reqwest::Response,
        endpoint: &str,
    ) -> Result<T, JobServiceError> {
        let status = response.status();
        let body = response.text().await?;
        tracing::debug!(endpoint = %endpoint, status = status.as_u16(), "Job service response");

        if !status.is_success() {
            return Err(JobServiceError::Status {
                endpoint: endpoint.to_string(),
                status: status.as_u16(),
                body,
            });
        }

        serde_json::from_str(&body).map_err(|source| JobServiceError::MalformedResponse {
            endpoint: endpoint.to_string(),
            source,
        })
    }
}

#[async_trait]
impl JobApi for JobServiceClient {
    async fn submit(
        &self,
        submission: &JobSubmission,
        token: &VaultToken,
    ) -> Result<SubmitResponse, JobServiceError> {
        let endpoint = format!("{}/v1/api/job", self.base_url);
        tracing::debug!(qname = %submission.qname, "Submitting job");

        let response = self
            .http
            .post(&endpoint)
            .header(AUTH_HEADER, token.expose())
            .json(submission)
            .send()
            .await?;

        Self::parse(response, &endpoint).await
    }

    async fn poll(&self, id: &str, token: &VaultToken) -> Result<JobState, JobServiceError> {
        let endpoint = format!("{}/v1/api/job/{}", self.base_url, id);

        let response = self
            .http
            .get(&endpoint)
            .header(AUTH_HEADER, token.expose())
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .send()
            .await?;

        Self::parse(response, &endpoint).await
    }
}

#[derive(Debug, thiserror::Error)]
pub enum JobServiceError {
    #[error("HTTP request to job service failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Job service returned {status} for {endpoint}: {body}")]
    Status {
        endpoint: String,
        status: u16,
        body: String,
    },

    #[error("Malformed job service response from {endpoint}: {source}")]
    MalformedResponse {
        endpoint: String,
        #[source]
        source: serde_json::Error,
    },
}
