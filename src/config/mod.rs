use std::time::Duration;

use serde::Deserialize;

/// Settings read from the environment (and an optional `.env` file).
///
/// Command-line flags take precedence over these.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ClientConfig {
    /// Vault address, used when `--vault-url` is not given.
    #[serde(default)]
    pub vault_addr: Option<String>,

    /// Same meaning as in the official Vault client: any truthy value
    /// disables Vault certificate verification.
    #[serde(default)]
    pub vault_skip_verify: Option<String>,

    /// Any truthy value skips certificate verification against the job
    /// service.
    #[serde(default)]
    pub gostint_insecure_skip_verify: Option<String>,

    /// Per-request timeout for Vault and job service calls, in seconds.
    #[serde(default = "default_request_timeout_secs")]
    pub gostint_request_timeout_secs: u64,

    /// `json` for JSON log lines, anything else for human-readable output.
    #[serde(default)]
    pub log_format: Option<String>,
}

fn default_request_timeout_secs() -> u64 {
    30
}

impl ClientConfig {
    pub fn from_env() -> Result<Self, envy::Error> {
        dotenvy::dotenv().ok();
        envy::from_env()
    }

    pub fn vault_skip_verify(&self) -> bool {
        self.vault_skip_verify
            .as_deref()
            .map(is_truthy)
            .unwrap_or(false)
    }

    pub fn insecure_skip_verify(&self) -> bool {
        self.gostint_insecure_skip_verify
            .as_deref()
            .map(is_truthy)
            .unwrap_or(false)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.gostint_request_timeout_secs)
    }

    pub fn json_logs(&self) -> bool {
        self.log_format
            .as_deref()
            .is_some_and(|f| f.eq_ignore_ascii_case("json"))
    }
}

fn is_truthy(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "1" | "t" | "true" | "yes" | "y" | "on"
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn from_pairs(pairs: &[(&str, &str)]) -> ClientConfig {
        envy::from_iter(
            pairs
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string())),
        )
        .unwrap()
    }

    #[test]
    fn test_defaults() {
        let config = from_pairs(&[]);
        assert_eq!(config.vault_addr, None);
        assert!(!config.vault_skip_verify());
        assert!(!config.insecure_skip_verify());
        assert_eq!(config.request_timeout(), Duration::from_secs(30));
        assert!(!config.json_logs());
    }

    #[test]
    fn test_reads_vault_env_names() {
        let config = from_pairs(&[
            ("VAULT_ADDR", "https://vault:8200"),
            ("VAULT_SKIP_VERIFY", "1"),
            ("GOSTINT_INSECURE_SKIP_VERIFY", "true"),
            ("GOSTINT_REQUEST_TIMEOUT_SECS", "5"),
            ("LOG_FORMAT", "JSON"),
        ]);
        assert_eq!(config.vault_addr.as_deref(), Some("https://vault:8200"));
        assert!(config.vault_skip_verify());
        assert!(config.insecure_skip_verify());
        assert_eq!(config.request_timeout(), Duration::from_secs(5));
        assert!(config.json_logs());
    }

    #[test]
    fn test_skip_verify_flags_parse_alike() {
        for value in ["1", "true", "TRUE", "yes", "on"] {
            let config = from_pairs(&[
                ("VAULT_SKIP_VERIFY", value),
                ("GOSTINT_INSECURE_SKIP_VERIFY", value),
            ]);
            assert!(config.vault_skip_verify(), "{:?} should be true", value);
            assert!(config.insecure_skip_verify(), "{:?} should be true", value);
        }
    }

    #[test]
    fn test_skip_verify_falsey_values() {
        for value in ["0", "false", "no", ""] {
            let config = from_pairs(&[
                ("VAULT_SKIP_VERIFY", value),
                ("GOSTINT_INSECURE_SKIP_VERIFY", value),
            ]);
            assert!(!config.vault_skip_verify(), "{:?} should be false", value);
            assert!(!config.insecure_skip_verify(), "{:?} should be false", value);
        }
    }
}
