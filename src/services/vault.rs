//! Vault HTTP API client.
//!
//! Covers the subset of the Vault API the dispatch protocol needs: AppRole
//! login, token lookup/create/revoke, response wrapping, transit encryption
//! and logical reads/writes (used for the cubbyhole). Every authenticated call
//! takes the token to act as explicitly, so callers switch identity by
//! passing a different token rather than mutating the client.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Method, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::models::token::{VaultToken, WrappedToken};

const TOKEN_HEADER: &str = "X-Vault-Token";
const WRAP_TTL_HEADER: &str = "X-Vault-Wrap-TTL";

/// The broker operations the dispatch protocol is written against.
#[async_trait]
pub trait SecretBroker: Send + Sync {
    /// Exchange an AppRole `role_id`/`secret_id` pair for a client token.
    async fn login_approle(&self, role_id: &str, secret_id: &str)
        -> Result<VaultToken, VaultError>;

    /// Look up the calling token; fails if the token is invalid.
    async fn lookup_self(&self, token: &VaultToken) -> Result<TokenInfo, VaultError>;

    /// Create a child token of `token`.
    async fn create_token(
        &self,
        token: &VaultToken,
        request: &TokenRequest,
    ) -> Result<VaultToken, VaultError>;

    /// Revoke the calling token.
    async fn revoke_self(&self, token: &VaultToken) -> Result<(), VaultError>;

    /// Generate a secret-id for AppRole `role`, response-wrapped for `wrap_ttl`.
    async fn wrap_secret_id(
        &self,
        token: &VaultToken,
        role: &str,
        wrap_ttl: &str,
    ) -> Result<WrappedToken, VaultError>;

    /// Encrypt base64 `plaintext` under the transit key `key`.
    async fn transit_encrypt(
        &self,
        token: &VaultToken,
        key: &str,
        plaintext: &str,
    ) -> Result<String, VaultError>;

    /// Write `data` to a logical path.
    async fn write(&self, token: &VaultToken, path: &str, data: &Value) -> Result<(), VaultError>;

    /// Read a logical path. `None` when nothing is stored there.
    async fn read(&self, token: &VaultToken, path: &str) -> Result<Option<Value>, VaultError>;

    /// Redeem a response-wrapping token for the data it wraps.
    async fn unwrap(&self, wrapped: &WrappedToken) -> Result<Value, VaultError>;
}

/// Body of `auth/token/create`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TokenRequest {
    pub policies: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ttl: Option<String>,
    /// Vault's name for the token use limit.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub num_uses: Option<u32>,
}

impl TokenRequest {
    pub fn with_policy(policy: &str) -> Self {
        Self {
            policies: vec![policy.to_string()],
            ttl: None,
            num_uses: None,
        }
    }

    pub fn ttl(mut self, ttl: &str) -> Self {
        self.ttl = Some(ttl.to_string());
        self
    }

    pub fn use_limit(mut self, uses: u32) -> Self {
        self.num_uses = Some(uses);
        self
    }
}

/// The parts of `auth/token/lookup-self` worth logging.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct TokenInfo {
    #[serde(default)]
    pub display_name: String,
    #[serde(default)]
    pub policies: Vec<String>,
    #[serde(default)]
    pub ttl: u64,
    #[serde(default)]
    pub num_uses: u32,
}

#[derive(Debug, Deserialize)]
struct SecretResponse {
    #[serde(default)]
    data: Option<Value>,
    #[serde(default)]
    auth: Option<AuthResponse>,
    #[serde(default)]
    wrap_info: Option<WrapInfo>,
}

#[derive(Debug, Deserialize)]
struct AuthResponse {
    client_token: VaultToken,
    #[serde(default)]
    policies: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct WrapInfo {
    token: WrappedToken,
}

#[derive(Debug, Deserialize)]
struct ErrorResponse {
    #[serde(default)]
    errors: Vec<String>,
}

/// Client for the Vault HTTP API.
pub struct VaultClient {
    http: Client,
    address: String,
}

impl VaultClient {
    /// Create a client for the Vault server at `address`.
    ///
    /// `skip_verify` disables certificate verification, matching
    /// `VAULT_SKIP_VERIFY` in the official Vault client.
    pub fn new(address: &str, skip_verify: bool, timeout: Duration) -> Result<Self, VaultError> {
        if skip_verify {
            tracing::warn!(vault_addr = %address, "Vault TLS certificate verification is disabled");
        }

        let http = Client::builder()
            .danger_accept_invalid_certs(skip_verify)
            .timeout(timeout)
            .build()
            .map_err(VaultError::Config)?;

        Ok(Self {
            http,
            address: address.trim_end_matches('/').to_string(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/v1/{}", self.address, path.trim_start_matches('/'))
    }

    /// Issue a logical request. Returns `None` for an empty (204) response.
    async fn request(
        &self,
        method: Method,
        path: &str,
        token: Option<&str>,
        body: Option<&Value>,
        wrap_ttl: Option<&str>,
    ) -> Result<Option<SecretResponse>, VaultError> {
        let endpoint = path.trim_start_matches('/').to_string();
        tracing::debug!(method = %method, endpoint = %endpoint, wrapped = wrap_ttl.is_some(), "Vault request");

        let mut request = self.http.request(method, self.url(path));
        if let Some(token) = token {
            request = request.header(TOKEN_HEADER, token);
        }
        if let Some(ttl) = wrap_ttl {
            request = request.header(WRAP_TTL_HEADER, ttl);
        }
        if let Some(body) = body {
            request = request.json(body);
        }

        let response = request.send().await.map_err(|source| VaultError::Http {
            endpoint: endpoint.clone(),
            source,
        })?;
        let status = response.status();
        let text = response.text().await.map_err(|source| VaultError::Http {
            endpoint: endpoint.clone(),
            source,
        })?;
        tracing::debug!(endpoint = %endpoint, status = status.as_u16(), "Vault response");

        if !status.is_success() {
            let errors = match serde_json::from_str::<ErrorResponse>(&text) {
                Ok(parsed) => parsed.errors,
                Err(_) if text.trim().is_empty() => Vec::new(),
                Err(_) => vec![text],
            };
            return Err(VaultError::Api {
                endpoint,
                status: status.as_u16(),
                errors,
            });
        }

        if status == StatusCode::NO_CONTENT || text.trim().is_empty() {
            return Ok(None);
        }

        serde_json::from_str(&text)
            .map(Some)
            .map_err(|source| VaultError::MalformedResponse { endpoint, source })
    }
}

#[async_trait]
impl SecretBroker for VaultClient {
    async fn login_approle(
        &self,
        role_id: &str,
        secret_id: &str,
    ) -> Result<VaultToken, VaultError> {
        let body = serde_json::json!({ "role_id": role_id, "secret_id": secret_id });
        let endpoint = "auth/approle/login";
        let auth = self
            .request(Method::POST, endpoint, None, Some(&body), None)
            .await?
            .and_then(|r| r.auth)
            .ok_or_else(|| VaultError::missing(endpoint, "auth"))?;

        tracing::debug!(policies = ?auth.policies, "AppRole login succeeded");
        Ok(auth.client_token)
    }

    async fn lookup_self(&self, token: &VaultToken) -> Result<TokenInfo, VaultError> {
        let endpoint = "auth/token/lookup-self";
        let data = self
            .request(Method::GET, endpoint, Some(token.expose()), None, None)
            .await?
            .and_then(|r| r.data)
            .ok_or_else(|| VaultError::missing(endpoint, "data"))?;

        serde_json::from_value(data).map_err(|source| VaultError::MalformedResponse {
            endpoint: endpoint.to_string(),
            source,
        })
    }

    async fn create_token(
        &self,
        token: &VaultToken,
        request: &TokenRequest,
    ) -> Result<VaultToken, VaultError> {
        let endpoint = "auth/token/create";
        let body = serde_json::to_value(request).map_err(VaultError::Encode)?;
        let auth = self
            .request(Method::POST, endpoint, Some(token.expose()), Some(&body), None)
            .await?
            .and_then(|r| r.auth)
            .ok_or_else(|| VaultError::missing(endpoint, "auth"))?;

        Ok(auth.client_token)
    }

    async fn revoke_self(&self, token: &VaultToken) -> Result<(), VaultError> {
        self.request(
            Method::POST,
            "auth/token/revoke-self",
            Some(token.expose()),
            None,
            None,
        )
        .await?;
        Ok(())
    }

    async fn wrap_secret_id(
        &self,
        token: &VaultToken,
        role: &str,
        wrap_ttl: &str,
    ) -> Result<WrappedToken, VaultError> {
        let endpoint = format!("auth/approle/role/{}/secret-id", role);
        let wrap_info = self
            .request(
                Method::POST,
                &endpoint,
                Some(token.expose()),
                None,
                Some(wrap_ttl),
            )
            .await?
            .and_then(|r| r.wrap_info)
            .ok_or_else(|| VaultError::missing(&endpoint, "wrap_info"))?;

        Ok(wrap_info.token)
    }

    async fn transit_encrypt(
        &self,
        token: &VaultToken,
        key: &str,
        plaintext: &str,
    ) -> Result<String, VaultError> {
        let endpoint = format!("transit/encrypt/{}", key);
        let body = serde_json::json!({ "plaintext": plaintext });
        let data = self
            .request(Method::POST, &endpoint, Some(token.expose()), Some(&body), None)
            .await?
            .and_then(|r| r.data)
            .ok_or_else(|| VaultError::missing(&endpoint, "data"))?;

        data.get("ciphertext")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| VaultError::missing(&endpoint, "data.ciphertext"))
    }

    async fn write(&self, token: &VaultToken, path: &str, data: &Value) -> Result<(), VaultError> {
        self.request(Method::POST, path, Some(token.expose()), Some(data), None)
            .await?;
        Ok(())
    }

    async fn read(&self, token: &VaultToken, path: &str) -> Result<Option<Value>, VaultError> {
        match self
            .request(Method::GET, path, Some(token.expose()), None, None)
            .await
        {
            Ok(response) => Ok(response.and_then(|r| r.data)),
            // Vault answers 404 with an empty error list for an unset path.
            Err(VaultError::Api {
                status: 404,
                ref errors,
                ..
            }) if errors.is_empty() => Ok(None),
            Err(err) => Err(err),
        }
    }

    async fn unwrap(&self, wrapped: &WrappedToken) -> Result<Value, VaultError> {
        let endpoint = "sys/wrapping/unwrap";
        self.request(Method::POST, endpoint, Some(wrapped.expose()), None, None)
            .await?
            .and_then(|r| r.data)
            .ok_or_else(|| VaultError::missing(endpoint, "data"))
    }
}

#[derive(Debug, thiserror::Error)]
pub enum VaultError {
    #[error("Vault request to '{endpoint}' failed: {source}")]
    Http {
        endpoint: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("Vault rejected '{endpoint}' with status {status}: {}", errors.join("; "))]
    Api {
        endpoint: String,
        status: u16,
        errors: Vec<String>,
    },

    #[error("Malformed Vault response from '{endpoint}': {source}")]
    MalformedResponse {
        endpoint: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("Vault response from '{endpoint}' is missing '{field}'")]
    MissingField {
        endpoint: String,
        field: &'static str,
    },

    #[error("Failed to encode Vault request body: {0}")]
    Encode(#[source] serde_json::Error),

    #[error("Failed to build Vault HTTP client: {0}")]
    Config(#[source] reqwest::Error),
}

impl VaultError {
    fn missing(endpoint: &str, field: &'static str) -> Self {
        VaultError::MissingField {
            endpoint: endpoint.to_string(),
            field,
        }
    }
}
