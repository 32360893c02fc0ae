use serde::{Deserialize, Deserializer};
use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_NAMESPACE: &str = "default";
pub const DEFAULT_JOB_NAME_PREFIX: &str = "jupyter-kernel";
pub const DEFAULT_NAMESPACE_FILE: &str = "/var/run/secrets/kubernetes.io/serviceaccount/namespace";
pub const DEFAULT_CPU_IMAGE: &str = "tensorflow/tensorflow:1.8.0";
/// Runtime image for GPU roles when the built identifier is not pullable.
pub const DEFAULT_GPU_IMAGE: &str = "tensorflow/tensorflow:1.8.0-gpu";

/// What to do with log retrieval and cleanup failures once the job exists.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PostSubmissionPolicy {
    /// Log the failure and attach it to the returned submission.
    #[default]
    Suppress,
    /// Fail the call, naming the job that was already created.
    Propagate,
}

/// Runtime settings shared by the manager, the generator and the backend.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct Settings {
    pub job_name_prefix: String,
    pub default_namespace: String,
    pub namespace_file: PathBuf,
    /// Image for the parameter-server role, which runs on CPU nodes.
    pub cpu_image: String,
    /// Overrides the built image as the container image of GPU roles.
    pub gpu_image: Option<String>,
    pub post_submission_policy: PostSubmissionPolicy,
    #[serde(deserialize_with = "human_duration")]
    pub post_submission_timeout: Duration,
    /// How long log retrieval waits for the job's pods to finish.
    #[serde(deserialize_with = "human_duration")]
    pub log_wait: Duration,
    pub name_conflict_retries: u32,
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            job_name_prefix: DEFAULT_JOB_NAME_PREFIX.to_string(),
            default_namespace: DEFAULT_NAMESPACE.to_string(),
            namespace_file: PathBuf::from(DEFAULT_NAMESPACE_FILE),
            cpu_image: DEFAULT_CPU_IMAGE.to_string(),
            gpu_image: None,
            post_submission_policy: PostSubmissionPolicy::Suppress,
            post_submission_timeout: Duration::from_secs(600),
            log_wait: Duration::from_secs(300),
            name_conflict_retries: 0,
        }
    }
}

impl Settings {
    /// Apply `CPU_IMAGE_NAME` and `IMAGE_NAME` from the given lookup.
    pub fn with_env_overrides<F>(mut self, lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(image) = lookup("CPU_IMAGE_NAME").filter(|v| !v.is_empty()) {
            self.cpu_image = image;
        }
        if let Some(image) = lookup("IMAGE_NAME").filter(|v| !v.is_empty()) {
            self.gpu_image = Some(image);
        }
        self
    }
}

fn human_duration<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    humantime::parse_duration(&raw).map_err(serde::de::Error::custom)
}
