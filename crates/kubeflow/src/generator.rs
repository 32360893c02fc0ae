//! Maps a job configuration to a Kubeflow training job.
//!
//! Every role gets one container that runs the submitted source out of a
//! ConfigMap volume named after the image identifier, mounted at `/<image>`.

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::{
    ConfigMapVolumeSource, Container, PodSpec, PodTemplateSpec, ResourceRequirements, Volume,
    VolumeMount,
};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use kfjob_core::{Framework, ImageId, JobConfiguration, Settings};

use crate::pytorch_job::{PyTorchJob, PyTorchJobSpec, PyTorchReplicaType};
use crate::replica::ReplicaSpec;
use crate::tf_job::{TFJob, TFJobSpec, TFReplicaType};

/// Name of the source file inside the ConfigMap volume.
pub const FILE_NAME: &str = "main.py";

pub const TF_CONTAINER_NAME: &str = "tensorflow";
pub const PYTORCH_CONTAINER_NAME: &str = "pytorch";
pub const PYTORCH_BASE_IMAGE: &str = "pytorch/pytorch:v0.2";

pub const CHIEF_REPLICAS: i32 = 1;
pub const EVALUATOR_REPLICAS: i32 = 1;

pub const GPU_RESOURCE_NAME: &str = "nvidia.com/gpu";
pub const CPU_NODE_LABEL_KEY: &str = "node-role.kubernetes.io/cpu";
pub const CPU_NODE_LABEL_VALUE: &str = "cpu";

/// The settings the generator reads.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeneratorSettings {
    pub cpu_image: String,
    pub gpu_image: Option<String>,
    pub default_namespace: String,
}

impl From<&Settings> for GeneratorSettings {
    fn from(settings: &Settings) -> Self {
        GeneratorSettings {
            cpu_image: settings.cpu_image.clone(),
            gpu_image: settings.gpu_image.clone(),
            default_namespace: settings.default_namespace.clone(),
        }
    }
}

impl Default for GeneratorSettings {
    fn default() -> Self {
        GeneratorSettings::from(&Settings::default())
    }
}

/// A generated job, ready to be created on the cluster.
#[derive(Debug, Clone)]
pub enum TrainingJob {
    TensorFlow(TFJob),
    PyTorch(PyTorchJob),
}

impl TrainingJob {
    pub fn framework(&self) -> Framework {
        match self {
            TrainingJob::TensorFlow(_) => Framework::TensorFlow,
            TrainingJob::PyTorch(_) => Framework::PyTorch,
        }
    }

    pub fn name(&self) -> &str {
        let meta = match self {
            TrainingJob::TensorFlow(job) => &job.metadata,
            TrainingJob::PyTorch(job) => &job.metadata,
        };
        meta.name.as_deref().unwrap_or_default()
    }

    pub fn namespace(&self) -> &str {
        let meta = match self {
            TrainingJob::TensorFlow(job) => &job.metadata,
            TrainingJob::PyTorch(job) => &job.metadata,
        };
        meta.namespace.as_deref().unwrap_or_default()
    }

    /// `(role, spec)` pairs in role order.
    pub fn replica_specs(&self) -> Vec<(&'static str, &ReplicaSpec)> {
        match self {
            TrainingJob::TensorFlow(job) => job
                .spec
                .tf_replica_specs
                .iter()
                .map(|(role, spec)| (role.as_str(), spec))
                .collect(),
            TrainingJob::PyTorch(job) => job
                .spec
                .pytorch_replica_specs
                .iter()
                .map(|(role, spec)| (role.as_str(), spec))
                .collect(),
        }
    }

    pub fn replica_counts(&self) -> Vec<(&'static str, Option<i32>)> {
        self.replica_specs()
            .into_iter()
            .map(|(role, spec)| (role, spec.replicas))
            .collect()
    }

    pub fn to_json(&self) -> serde_json::Result<serde_json::Value> {
        match self {
            TrainingJob::TensorFlow(job) => serde_json::to_value(job),
            TrainingJob::PyTorch(job) => serde_json::to_value(job),
        }
    }

    pub fn to_yaml(&self) -> Result<String, serde_yaml::Error> {
        match self {
            TrainingJob::TensorFlow(job) => serde_yaml::to_string(job),
            TrainingJob::PyTorch(job) => serde_yaml::to_string(job),
        }
    }
}

/// Generate the training job for `framework`.
///
/// Does no validation: a configuration without an image yields an empty
/// volume name.
pub fn generate(
    framework: Framework,
    config: &JobConfiguration,
    settings: &GeneratorSettings,
) -> TrainingJob {
    match framework {
        Framework::TensorFlow => TrainingJob::TensorFlow(generate_tf_job(config, settings)),
        Framework::PyTorch => TrainingJob::PyTorch(generate_pytorch_job(config, settings)),
    }
}

pub fn generate_tf_job(config: &JobConfiguration, settings: &GeneratorSettings) -> TFJob {
    let source = source_of(config);
    let gpu_image = settings
        .gpu_image
        .clone()
        .unwrap_or_else(|| source.image_ref().to_string());

    let role = |image: &str, replicas: i32, placement: Placement| ReplicaSpec {
        replicas: Some(replicas),
        template: pod_template(TF_CONTAINER_NAME, image, &source, placement),
    };

    let specs = BTreeMap::from([
        (
            TFReplicaType::ParameterServer,
            role(settings.cpu_image.as_str(), count(config.ps_count), Placement::CpuNode),
        ),
        (
            TFReplicaType::Worker,
            role(gpu_image.as_str(), count(config.worker_count), Placement::Gpu),
        ),
        (
            TFReplicaType::Chief,
            role(gpu_image.as_str(), CHIEF_REPLICAS, Placement::Gpu),
        ),
        (
            TFReplicaType::Evaluator,
            role(gpu_image.as_str(), EVALUATOR_REPLICAS, Placement::Gpu),
        ),
    ]);

    let mut job = TFJob::new(
        config.generated_name().unwrap_or_default(),
        TFJobSpec {
            tf_replica_specs: specs,
        },
    );
    job.metadata.namespace = config.namespace().map(str::to_string);
    job
}

/// PyTorch roles run the fixed base image and the job lives in the default
/// namespace, whatever the build and namespace resolution produced.
pub fn generate_pytorch_job(config: &JobConfiguration, settings: &GeneratorSettings) -> PyTorchJob {
    let source = source_of(config);

    let role = |replicas: u32| ReplicaSpec {
        replicas: Some(count(replicas)),
        template: pod_template(
            PYTORCH_CONTAINER_NAME,
            PYTORCH_BASE_IMAGE,
            &source,
            Placement::Any,
        ),
    };

    let specs = BTreeMap::from([
        (PyTorchReplicaType::Master, role(config.master_count)),
        (PyTorchReplicaType::Worker, role(config.worker_count)),
    ]);

    let mut job = PyTorchJob::new(
        config.generated_name().unwrap_or_default(),
        PyTorchJobSpec {
            pytorch_replica_specs: specs,
        },
    );
    job.metadata.namespace = Some(settings.default_namespace.clone());
    job
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Placement {
    /// CPU-labelled nodes only, no accelerator.
    CpuNode,
    /// One GPU, any node.
    Gpu,
    Any,
}

fn source_of(config: &JobConfiguration) -> ImageId {
    config.image().cloned().unwrap_or_else(|| ImageId::new(""))
}

fn count(n: u32) -> i32 {
    i32::try_from(n).unwrap_or(i32::MAX)
}

fn pod_template(
    container_name: &str,
    image: &str,
    source: &ImageId,
    placement: Placement,
) -> PodTemplateSpec {
    let resources = (placement == Placement::Gpu).then(|| ResourceRequirements {
        limits: Some(BTreeMap::from([(
            GPU_RESOURCE_NAME.to_string(),
            Quantity("1".to_string()),
        )])),
        ..Default::default()
    });

    let node_selector = (placement == Placement::CpuNode).then(|| {
        BTreeMap::from([(
            CPU_NODE_LABEL_KEY.to_string(),
            CPU_NODE_LABEL_VALUE.to_string(),
        )])
    });

    PodTemplateSpec {
        metadata: None,
        spec: Some(PodSpec {
            node_selector,
            containers: vec![Container {
                name: container_name.to_string(),
                image: Some(image.to_string()),
                command: Some(vec![
                    "python".to_string(),
                    source.source_path(FILE_NAME),
                ]),
                resources,
                volume_mounts: Some(vec![VolumeMount {
                    name: source.volume_name().to_string(),
                    mount_path: source.mount_path(),
                    ..Default::default()
                }]),
                ..Default::default()
            }],
            volumes: Some(vec![Volume {
                name: source.volume_name().to_string(),
                config_map: Some(ConfigMapVolumeSource {
                    name: source.volume_name().to_string(),
                    ..Default::default()
                }),
                ..Default::default()
            }]),
            ..Default::default()
        }),
    }
}
