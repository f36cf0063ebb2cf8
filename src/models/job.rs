use serde::{Deserialize, Deserializer, Serialize};

/// The unit of work relayed to the job service. It only ever leaves the
/// client as transit ciphertext inside a cubbyhole.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct JobDescriptor {
    pub qname: String,
    pub container_image: String,
    pub image_pull_policy: String,
    /// Plain string, or `targz,<base64>` for a packaged archive.
    pub content: String,
    #[serde(deserialize_with = "nullable_list")]
    pub entrypoint: Vec<String>,
    #[serde(deserialize_with = "nullable_list")]
    pub run: Vec<String>,
    pub working_directory: String,
    /// `KEY=VALUE` assignments.
    #[serde(deserialize_with = "nullable_list")]
    pub env_vars: Vec<String>,
    /// `alias@vault-path.field` references.
    #[serde(deserialize_with = "nullable_list")]
    pub secret_refs: Vec<String>,
    /// `yaml` or `json`.
    pub secret_file_type: String,
    pub cont_on_warnings: bool,
}

/// A base job JSON plus per-field overrides, as supplied on the command line.
///
/// Empty strings count as "not supplied". List fields carry JSON-encoded
/// string arrays, e.g. `["echo", "hi"]`.
#[derive(Debug, Clone, Default)]
pub struct JobOverrides {
    pub job_json: Option<String>,
    pub qname: Option<String>,
    pub container_image: Option<String>,
    pub image_pull_policy: Option<String>,
    pub content: Option<String>,
    pub entrypoint: Option<String>,
    pub run: Option<String>,
    pub working_directory: Option<String>,
    pub env_vars: Option<String>,
    pub secret_refs: Option<String>,
    pub secret_file_type: Option<String>,
    pub cont_on_warnings: bool,
}

impl JobOverrides {
    /// Merge the overrides on top of the base JSON.
    ///
    /// Overrides are applied in a fixed order and always win over the base.
    /// `cont_on_warnings` can only switch the flag on.
    pub fn build(&self) -> Result<JobDescriptor, DescriptorError> {
        let mut job = match non_empty(&self.job_json) {
            Some(json) => serde_json::from_str(json).map_err(DescriptorError::MalformedBase)?,
            None => JobDescriptor::default(),
        };

        if let Some(qname) = non_empty(&self.qname) {
            job.qname = qname.to_string();
        }
        if let Some(image) = non_empty(&self.container_image) {
            job.container_image = image.to_string();
        }
        if let Some(policy) = non_empty(&self.image_pull_policy) {
            job.image_pull_policy = policy.to_string();
        }
        if let Some(content) = non_empty(&self.content) {
            job.content = content.to_string();
        }
        if let Some(raw) = non_empty(&self.entrypoint) {
            job.entrypoint = parse_list("entrypoint", raw)?;
        }
        if let Some(raw) = non_empty(&self.run) {
            job.run = parse_list("run", raw)?;
        }
        if let Some(dir) = non_empty(&self.working_directory) {
            job.working_directory = dir.to_string();
        }
        if let Some(raw) = non_empty(&self.env_vars) {
            job.env_vars = parse_list("env_vars", raw)?;
        }
        if let Some(raw) = non_empty(&self.secret_refs) {
            job.secret_refs = parse_list("secret_refs", raw)?;
        }
        if let Some(kind) = non_empty(&self.secret_file_type) {
            job.secret_file_type = kind.to_string();
        }
        if self.cont_on_warnings {
            job.cont_on_warnings = true;
        }

        Ok(job)
    }
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().filter(|v| !v.is_empty())
}

fn parse_list(field: &'static str, raw: &str) -> Result<Vec<String>, DescriptorError> {
    serde_json::from_str(raw).map_err(|source| DescriptorError::MalformedOverride { field, source })
}

/// Job JSON written by other tools may carry `null` for an absent list.
fn nullable_list<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Option::<Vec<String>>::deserialize(deserializer).map(Option::unwrap_or_default)
}

#[derive(Debug, thiserror::Error)]
pub enum DescriptorError {
    #[error("Malformed job JSON: {0}")]
    MalformedBase(#[source] serde_json::Error),

    #[error("Malformed override for '{field}', expected a JSON array of strings: {source}")]
    MalformedOverride {
        field: &'static str,
        #[source]
        source: serde_json::Error,
    },
}
