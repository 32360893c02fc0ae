pub mod config;
pub mod error;

use async_trait::async_trait;
use std::fmt;

pub use config::{PostSubmissionPolicy, Settings};
pub use error::Error;

/// Distributed-training framework a job is generated for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Framework {
    TensorFlow,
    PyTorch,
}

impl Framework {
    pub fn as_str(&self) -> &'static str {
        match self {
            Framework::TensorFlow => "tensorflow",
            Framework::PyTorch => "pytorch",
        }
    }
}

impl fmt::Display for Framework {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identifier returned by an image build.
///
/// The same value is the container image reference and the name of the
/// ConfigMap volume holding the source, so both uses go through this type.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ImageId(String);

impl ImageId {
    pub fn new(id: impl Into<String>) -> Self {
        ImageId(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn image_ref(&self) -> &str {
        &self.0
    }

    pub fn volume_name(&self) -> &str {
        &self.0
    }

    /// Where the source volume is mounted: `/<id>`.
    pub fn mount_path(&self) -> String {
        format!("/{}", self.0)
    }

    /// Path of `file_name` inside the mounted volume.
    pub fn source_path(&self, file_name: &str) -> String {
        format!("/{}/{}", self.0, file_name)
    }
}

impl fmt::Display for ImageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Normalized parameters of one submission.
///
/// Role counts come from the interpreter. Name, namespace and image are
/// filled in by the manager, in that order, and cannot be overwritten.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobConfiguration {
    pub framework: Framework,
    pub ps_count: u32,
    pub worker_count: u32,
    pub master_count: u32,
    generated_name: Option<String>,
    namespace: Option<String>,
    image: Option<ImageId>,
}

impl JobConfiguration {
    pub fn new(framework: Framework) -> Self {
        JobConfiguration {
            framework,
            ps_count: 0,
            worker_count: 0,
            master_count: 0,
            generated_name: None,
            namespace: None,
            image: None,
        }
    }

    pub fn generated_name(&self) -> Option<&str> {
        self.generated_name.as_deref()
    }

    pub fn namespace(&self) -> Option<&str> {
        self.namespace.as_deref()
    }

    pub fn image(&self) -> Option<&ImageId> {
        self.image.as_ref()
    }

    pub fn assign_name(&mut self, name: impl Into<String>) -> Result<(), Error> {
        set_once(&mut self.generated_name, name.into(), "generated name")
    }

    /// Replace the name after the cluster reported it as taken.
    pub fn rename_after_conflict(&mut self, name: impl Into<String>) {
        self.generated_name = Some(name.into());
    }

    pub fn assign_namespace(&mut self, namespace: impl Into<String>) -> Result<(), Error> {
        set_once(&mut self.namespace, namespace.into(), "namespace")
    }

    pub fn assign_image(&mut self, image: ImageId) -> Result<(), Error> {
        set_once(&mut self.image, image, "image")
    }
}

fn set_once<T>(slot: &mut Option<T>, value: T, field: &'static str) -> Result<(), Error> {
    if slot.is_some() {
        return Err(Error::AlreadyAssigned { field });
    }
    *slot = Some(value);
    Ok(())
}

/// Handle to a job created on the cluster.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Job {
    pub name: String,
    pub namespace: String,
    pub framework: Framework,
}

/// Turns submitted code into a job configuration.
pub trait Interpreter: Send + Sync {
    fn preprocess(&self, code: &str) -> Result<JobConfiguration, Error>;

    /// The code that ends up in the built image.
    fn preprocessed_code(&self, code: &str) -> String;
}

/// Packages code so that every role's pod can run it.
#[async_trait]
pub trait ImageBuilder: Send + Sync {
    async fn build(&self, code: &str, config: &JobConfiguration) -> Result<ImageId, Error>;

    /// Release whatever `build` created for this configuration.
    async fn cleanup(&self, config: &JobConfiguration) -> Result<(), Error>;
}

/// Creates training jobs on the cluster.
#[async_trait]
pub trait ClusterBackend: Send + Sync {
    async fn submit(&self, config: &JobConfiguration) -> Result<Job, Error>;

    async fn get_logs(&self, config: &JobConfiguration, job: &Job) -> Result<(), Error>;
}
