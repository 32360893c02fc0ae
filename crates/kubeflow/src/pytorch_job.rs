use std::collections::BTreeMap;

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::replica::ReplicaSpec;

#[derive(Deserialize, Serialize, Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum PyTorchReplicaType {
    Master,
    Worker,
}

impl PyTorchReplicaType {
    pub fn as_str(&self) -> &'static str {
        match self {
            PyTorchReplicaType::Master => "Master",
            PyTorchReplicaType::Worker => "Worker",
        }
    }
}

#[derive(CustomResource, Deserialize, Serialize, Clone, Debug, PartialEq, JsonSchema)]
#[kube(group = "kubeflow.org", version = "v1alpha2", kind = "PyTorchJob", namespaced)]
#[serde(rename_all = "camelCase")]
pub struct PyTorchJobSpec {
    #[serde(rename = "pytorchReplicaSpecs")]
    #[schemars(with = "BTreeMap<String, ReplicaSpec>")]
    pub pytorch_replica_specs: BTreeMap<PyTorchReplicaType, ReplicaSpec>,
}
