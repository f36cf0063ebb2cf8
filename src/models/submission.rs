use serde::{Deserialize, Serialize};

use super::status::JobStatus;
use super::token::{VaultToken, WrappedToken};

/// Fixed cubbyhole path the encrypted job payload is written under.
pub const CUBBYHOLE_PATH: &str = "cubbyhole/job";

/// What the job service receives: pointers it must resolve against Vault
/// itself. Carries no job content.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JobSubmission {
    pub qname: String,
    pub cubby_token: VaultToken,
    pub cubby_path: String,
    pub wrap_secret_id: WrappedToken,
}

/// Acknowledgement returned by `POST /v1/api/job`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct SubmitResponse {
    #[serde(rename = "_id")]
    pub id: String,
    pub status: JobStatus,
    #[serde(default)]
    pub qname: String,
}
