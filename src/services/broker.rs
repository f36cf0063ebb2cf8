//! The credential exchange that turns a caller's Vault credential into a
//! one-time relay of the job to the job service.
//!
//! Steps, in order:
//! 1. authenticate (AppRole login or a supplied token, verified by lookup)
//! 2. issue a default-policy token for the job service API
//! 3. wrap a fresh secret-id for the job-execution AppRole
//! 4. transit-encrypt the job descriptor under the role's key
//! 5. stash the ciphertext in the cubbyhole of a 2-use token
//! 6. assemble the [`JobSubmission`]
//! 7. revoke the primary token once the dispatch is over
//!
//! Each step returns a new value consumed by the next. A failure anywhere in
//! 2–5 aborts before a submission exists.

use std::sync::Arc;

use base64::Engine;

use crate::models::job::JobDescriptor;
use crate::models::submission::{JobSubmission, CUBBYHOLE_PATH};
use crate::models::token::{VaultToken, WrappedToken};
use crate::services::vault::{SecretBroker, TokenRequest, VaultError};

/// Policy attached to every token the client mints.
pub const DEFAULT_POLICY: &str = "default";

/// Job-execution AppRole, also the transit key name.
pub const DEFAULT_ROLE: &str = "gostint-role";

/// How long the wrapped secret-id stays redeemable.
pub const WRAP_TTL: &str = "1h";

/// Lifetime of the cubbyhole token.
pub const CUBBYHOLE_TTL: &str = "60m";

/// One use to write the payload, one for the job service to read it.
pub const CUBBYHOLE_USES: u32 = 2;

/// How the caller proves its identity to Vault.
#[derive(Debug, Clone)]
pub enum Credentials {
    Token(VaultToken),
    AppRole { role_id: String, secret_id: String },
}

/// Ephemeral secrets minted for one dispatch.
#[derive(Debug, Clone)]
pub struct CredentialSet {
    pub api_token: VaultToken,
    pub wrapped_secret_id: WrappedToken,
    pub ciphertext: String,
    pub cubby_token: VaultToken,
}

/// A submission ready to send, plus the token to send it with.
#[derive(Debug, Clone)]
pub struct PreparedJob {
    pub api_token: VaultToken,
    pub submission: JobSubmission,
}

/// Runs the credential exchange against a [`SecretBroker`].
#[derive(Clone)]
pub struct CredentialBroker {
    vault: Arc<dyn SecretBroker>,
    role: String,
}

impl CredentialBroker {
    pub fn new(vault: Arc<dyn SecretBroker>, role: impl Into<String>) -> Self {
        Self {
            vault,
            role: role.into(),
        }
    }

    /// Step 1: obtain the primary token and check it is live.
    pub async fn authenticate(&self, credentials: &Credentials) -> Result<VaultToken, BrokerError> {
        let token = match credentials {
            Credentials::AppRole { role_id, secret_id } => {
                tracing::debug!("Using AppRole authentication");
                self.vault
                    .login_approle(role_id, secret_id)
                    .await
                    .map_err(BrokerError::AuthenticationFailed)?
            }
            Credentials::Token(token) => token.clone(),
        };

        let info = self
            .vault
            .lookup_self(&token)
            .await
            .map_err(BrokerError::AuthenticationFailed)?;
        tracing::debug!(display_name = %info.display_name, policies = ?info.policies, "Vault token authenticated");

        Ok(token)
    }

    /// Step 2: a default-policy token the job service accepts as our bearer.
    pub async fn issue_api_token(&self, primary: &VaultToken) -> Result<VaultToken, BrokerError> {
        tracing::debug!("Requesting minimal token for the job service API");
        self.vault
            .create_token(primary, &TokenRequest::with_policy(DEFAULT_POLICY))
            .await
            .map_err(BrokerError::ApiToken)
    }

    /// Step 3: a wrapped secret-id for the job-execution role.
    pub async fn wrap_secret_id(&self, primary: &VaultToken) -> Result<WrappedToken, BrokerError> {
        tracing::debug!(role = %self.role, "Requesting wrapped secret-id");
        self.vault
            .wrap_secret_id(primary, &self.role, WRAP_TTL)
            .await
            .map_err(|source| BrokerError::WrapSecretId {
                role: self.role.clone(),
                source,
            })
    }

    /// Step 4: transit-encrypt the descriptor. Only the ciphertext is kept.
    pub async fn encrypt_job(
        &self,
        primary: &VaultToken,
        job: &JobDescriptor,
    ) -> Result<String, BrokerError> {
        let json = serde_json::to_vec(job).map_err(BrokerError::Serialize)?;
        let plaintext = base64::engine::general_purpose::STANDARD.encode(json);

        tracing::debug!(key = %self.role, "Encrypting job payload");
        self.vault
            .transit_encrypt(primary, &self.role, &plaintext)
            .await
            .map_err(BrokerError::Encrypt)
    }

    /// Step 5: mint the 2-use cubbyhole token and write the ciphertext as it.
    pub async fn stash_in_cubbyhole(
        &self,
        primary: &VaultToken,
        ciphertext: &str,
    ) -> Result<VaultToken, BrokerError> {
        tracing::debug!("Requesting limited use token for the cubbyhole");
        let request = TokenRequest::with_policy(DEFAULT_POLICY)
            .ttl(CUBBYHOLE_TTL)
            .use_limit(CUBBYHOLE_USES);
        let cubby_token = self
            .vault
            .create_token(primary, &request)
            .await
            .map_err(BrokerError::Cubbyhole)?;

        tracing::debug!(path = CUBBYHOLE_PATH, "Writing encrypted payload to cubbyhole");
        self.vault
            .write(
                &cubby_token,
                CUBBYHOLE_PATH,
                &serde_json::json!({ "payload": ciphertext }),
            )
            .await
            .map_err(BrokerError::Cubbyhole)?;

        Ok(cubby_token)
    }

    /// Steps 2–5.
    pub async fn issue_credentials(
        &self,
        primary: &VaultToken,
        job: &JobDescriptor,
    ) -> Result<CredentialSet, BrokerError> {
        let api_token = self.issue_api_token(primary).await?;
        let wrapped_secret_id = self.wrap_secret_id(primary).await?;
        let ciphertext = self.encrypt_job(primary, job).await?;
        let cubby_token = self.stash_in_cubbyhole(primary, &ciphertext).await?;

        Ok(CredentialSet {
            api_token,
            wrapped_secret_id,
            ciphertext,
            cubby_token,
        })
    }

    /// Steps 2–6.
    pub async fn prepare(
        &self,
        primary: &VaultToken,
        job: &JobDescriptor,
    ) -> Result<PreparedJob, BrokerError> {
        let credentials = self.issue_credentials(primary, job).await?;

        Ok(PreparedJob {
            api_token: credentials.api_token,
            submission: JobSubmission {
                qname: job.qname.clone(),
                cubby_token: credentials.cubby_token,
                cubby_path: CUBBYHOLE_PATH.to_string(),
                wrap_secret_id: credentials.wrapped_secret_id,
            },
        })
    }

    /// Step 7. Best effort: a failure is logged and swallowed.
    pub async fn revoke(&self, primary: &VaultToken) {
        tracing::debug!("Revoking primary Vault token");
        if let Err(err) = self.vault.revoke_self(primary).await {
            tracing::warn!(error = %err, "Failed to revoke primary Vault token after dispatch");
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum BrokerError {
    #[error("Vault authentication failed: {0}")]
    AuthenticationFailed(#[source] VaultError),

    #[error("Failed to issue job service API token: {0}")]
    ApiToken(#[source] VaultError),

    #[error("Failed to wrap secret-id for role '{role}': {source}")]
    WrapSecretId {
        role: String,
        #[source]
        source: VaultError,
    },

    #[error("Failed to serialize job descriptor: {0}")]
    Serialize(#[source] serde_json::Error),

    #[error("Failed to encrypt job payload: {0}")]
    Encrypt(#[source] VaultError),

    #[error("Failed to stash payload in cubbyhole: {0}")]
    Cubbyhole(#[source] VaultError),
}
