//! Command-line arguments for `gostint-client`.
//!
//! Credential and job JSON flags accept `@path` to read the value from a file
//! (trimmed of surrounding whitespace).

use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use garde::Validate;

use crate::config::ClientConfig;
use crate::dispatch::DispatchRequest;
use crate::models::job::JobOverrides;
use crate::models::token::VaultToken;
use crate::services::broker::{Credentials, DEFAULT_ROLE};

/// Submit a job to a GoStint job service, relaying it through Vault.
#[derive(Debug, Clone, Parser, Validate)]
#[command(name = "gostint-client", version, about)]
pub struct Cli {
    /// Vault AppRole role_id (can read file e.g. '@role_id.txt')
    #[arg(long = "vault-roleid", default_value = "")]
    #[garde(skip)]
    pub vault_role_id: String,

    /// Vault AppRole secret_id (can read file e.g. '@secret_id.txt')
    #[arg(long = "vault-secretid", default_value = "")]
    #[garde(skip)]
    pub vault_secret_id: String,

    /// Vault token, used instead of AppRole (can read file e.g. '@token.txt')
    #[arg(long = "vault-token", default_value = "")]
    #[garde(skip)]
    pub vault_token: String,

    /// AppRole the job service runs as; also names its transit key
    #[arg(long = "gostint-role", default_value = DEFAULT_ROLE)]
    #[garde(length(min = 1))]
    pub gostint_role: String,

    /// Whole JSON job request (can read file e.g. '@job.json')
    #[arg(long = "job-json", default_value = "")]
    #[garde(skip)]
    pub job_json: String,

    /// Job queue to submit to, overrides value in job-json
    #[arg(long, default_value = "")]
    #[garde(skip)]
    pub qname: String,

    /// Docker image to run the job within, overrides value in job-json
    #[arg(long, default_value = "")]
    #[garde(skip)]
    pub image: String,

    /// Image pull policy, e.g. 'IfNotPresent' or 'Always', overrides value in job-json
    #[arg(long = "image-pull-policy", default_value = "")]
    #[garde(skip)]
    pub image_pull_policy: String,

    /// Folder or targz to inject into the container relative to '/', overrides value in job-json
    #[arg(long, default_value = "")]
    #[garde(skip)]
    pub content: String,

    /// JSON array of the container's entrypoint, e.g. '["ansible"]'
    #[arg(long, default_value = "")]
    #[garde(skip)]
    pub entrypoint: String,

    /// JSON array of the command to run, e.g. '["-m", "ping", "127.0.0.1"]'
    #[arg(long, default_value = "")]
    #[garde(skip)]
    pub run: String,

    /// Working directory within the container to run the job
    #[arg(long = "run-dir", default_value = "")]
    #[garde(skip)]
    pub run_dir: String,

    /// JSON array of environment variables, e.g. '["KEY=value"]'
    #[arg(long = "env-vars", default_value = "")]
    #[garde(skip)]
    pub env_vars: String,

    /// JSON array of secret paths, e.g. '["alias@secret/data/my-secret.my-value"]'
    #[arg(long = "secret-refs", default_value = "")]
    #[garde(skip)]
    pub secret_refs: String,

    /// Injected secret file type, 'yaml' or 'json'
    #[arg(long = "secret-filetype", default_value = "yaml")]
    #[garde(custom(validate_secret_file_type))]
    pub secret_file_type: String,

    /// Continue the job even if Vault reported warnings looking up secret refs
    #[arg(long = "cont-on-warnings")]
    #[garde(skip)]
    pub cont_on_warnings: bool,

    /// Job service API URL, e.g. https://somewhere:3232
    #[arg(long, default_value = "")]
    #[garde(length(min = 1))]
    pub url: String,

    /// Vault API URL, e.g. https://your-vault:8200 (defaults to VAULT_ADDR)
    #[arg(long = "vault-url", default_value = "")]
    #[garde(skip)]
    pub vault_url: String,

    /// Poll interval for job results, in seconds
    #[arg(long = "poll-interval", default_value_t = 1)]
    #[garde(range(min = 1))]
    pub poll_interval: u64,

    /// Return after the first poll instead of waiting for the job to finish
    #[arg(long = "no-wait")]
    #[garde(skip)]
    pub no_wait: bool,

    /// Do not verify the job service's TLS certificate
    #[arg(long = "insecure-skip-verify")]
    #[garde(skip)]
    pub insecure_skip_verify: bool,

    /// Enable debug logging
    #[arg(long)]
    #[garde(skip)]
    pub debug: bool,
}

fn validate_secret_file_type(value: &str, _context: &()) -> garde::Result {
    match value {
        "" | "yaml" | "json" => Ok(()),
        other => Err(garde::Error::new(format!(
            "must be 'yaml' or 'json', got '{}'",
            other
        ))),
    }
}

/// Endpoints and transport settings for one run.
#[derive(Debug, Clone, PartialEq)]
pub struct Endpoints {
    pub url: String,
    pub vault_url: String,
    pub insecure_skip_verify: bool,
    pub vault_skip_verify: bool,
    pub timeout: Duration,
}

impl Cli {
    /// Validate flags, resolve `@file` indirections and split the result into
    /// a dispatch request and the endpoints to send it to.
    pub fn into_request(
        self,
        config: &ClientConfig,
    ) -> Result<(DispatchRequest, Endpoints), CliError> {
        self.validate()?;
        check_credential_flags(&self.vault_token, &self.vault_role_id, &self.vault_secret_id)?;

        let vault_url = if self.vault_url.is_empty() {
            config.vault_addr.clone().unwrap_or_default()
        } else {
            self.vault_url.clone()
        };
        if vault_url.is_empty() {
            return Err(CliError::MissingVaultUrl);
        }

        let credentials = if self.vault_role_id.is_empty() {
            Credentials::Token(VaultToken::new(resolve_file_arg(&self.vault_token)?))
        } else {
            Credentials::AppRole {
                role_id: resolve_file_arg(&self.vault_role_id)?,
                secret_id: resolve_file_arg(&self.vault_secret_id)?,
            }
        };

        let overrides = JobOverrides {
            job_json: Some(resolve_file_arg(&self.job_json)?),
            qname: Some(self.qname),
            container_image: Some(self.image),
            image_pull_policy: Some(self.image_pull_policy),
            content: None,
            entrypoint: Some(self.entrypoint),
            run: Some(self.run),
            working_directory: Some(self.run_dir),
            env_vars: Some(self.env_vars),
            secret_refs: Some(self.secret_refs),
            secret_file_type: Some(self.secret_file_type),
            cont_on_warnings: self.cont_on_warnings,
        };

        let request = DispatchRequest {
            credentials,
            content: Some(self.content).filter(|c| !c.is_empty()),
            overrides,
            poll_interval: Duration::from_secs(self.poll_interval),
            wait: !self.no_wait,
        };

        let endpoints = Endpoints {
            url: self.url,
            vault_url,
            insecure_skip_verify: self.insecure_skip_verify || config.insecure_skip_verify(),
            vault_skip_verify: config.vault_skip_verify(),
            timeout: config.request_timeout(),
        };

        Ok((request, endpoints))
    }
}

/// Exactly one of a token or a complete AppRole pair.
fn check_credential_flags(token: &str, role_id: &str, secret_id: &str) -> Result<(), CliError> {
    if token.is_empty() && role_id.is_empty() {
        return Err(CliError::Usage(
            "One of vault-roleid OR vault-token must be specified",
        ));
    }
    if !role_id.is_empty() && secret_id.is_empty() {
        return Err(CliError::Usage(
            "vault-roleid must also have vault-secretid specified",
        ));
    }
    if role_id.is_empty() && !secret_id.is_empty() {
        return Err(CliError::Usage(
            "vault-secretid must also have vault-roleid specified",
        ));
    }
    if !token.is_empty() && !role_id.is_empty() {
        return Err(CliError::Usage("vault-token cannot be used with vault-roleid"));
    }
    Ok(())
}

/// Read the value from a file when prefixed with `@`.
pub fn resolve_file_arg(value: &str) -> Result<String, CliError> {
    match value.strip_prefix('@') {
        Some(path) => {
            tracing::debug!(path = %path, "Resolving file argument");
            let contents =
                std::fs::read_to_string(path).map_err(|source| CliError::ReadArgFile {
                    path: PathBuf::from(path),
                    source,
                })?;
            Ok(contents.trim_matches([' ', '\t', '\n', '\r']).to_string())
        }
        None => Ok(value.to_string()),
    }
}

#[derive(Debug, thiserror::Error)]
pub enum CliError {
    #[error("Invalid arguments: {0}")]
    Invalid(#[from] garde::Report),

    #[error("{0}")]
    Usage(&'static str),

    #[error("vault-url must be specified (or set VAULT_ADDR)")]
    MissingVaultUrl,

    #[error("Failed to read argument file '{}': {source}", path.display())]
    ReadArgFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}
