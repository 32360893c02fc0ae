//! Kubeflow training-job resources for kfjob.
//!
//! - `TFJob` and `PyTorchJob` custom resources (`kubeflow.org/v1alpha2`)
//! - the generator mapping a `JobConfiguration` to one of them
//! - `KubeflowBackend`, which creates the generated job and collects its logs

pub mod backend;
pub mod generator;
pub mod pytorch_job;
pub mod replica;
pub mod tf_job;

pub use backend::KubeflowBackend;
pub use generator::{generate, GeneratorSettings, TrainingJob};
pub use pytorch_job::PyTorchJob;
pub use tf_job::TFJob;

use kube::CustomResourceExt;

/// CRDs of both training-job kinds, rendered as one YAML stream.
pub fn crds_yaml() -> Result<String, serde_yaml::Error> {
    let tf = serde_yaml::to_string(&TFJob::crd())?;
    let pytorch = serde_yaml::to_string(&PyTorchJob::crd())?;
    Ok(format!("{tf}---\n{pytorch}"))
}
