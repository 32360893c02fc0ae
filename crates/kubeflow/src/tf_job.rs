use std::collections::BTreeMap;

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::replica::ReplicaSpec;

/// Roles of a TensorFlow job, keyed the way tf-operator expects.
#[derive(Deserialize, Serialize, Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum TFReplicaType {
    #[serde(rename = "PS")]
    ParameterServer,
    Worker,
    Chief,
    Evaluator,
}

impl TFReplicaType {
    pub const ALL: [TFReplicaType; 4] = [
        TFReplicaType::ParameterServer,
        TFReplicaType::Worker,
        TFReplicaType::Chief,
        TFReplicaType::Evaluator,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            TFReplicaType::ParameterServer => "PS",
            TFReplicaType::Worker => "Worker",
            TFReplicaType::Chief => "Chief",
            TFReplicaType::Evaluator => "Evaluator",
        }
    }
}

#[derive(CustomResource, Deserialize, Serialize, Clone, Debug, PartialEq, JsonSchema)]
#[kube(group = "kubeflow.org", version = "v1alpha2", kind = "TFJob", namespaced)]
#[serde(rename_all = "camelCase")]
pub struct TFJobSpec {
    #[schemars(with = "BTreeMap<String, ReplicaSpec>")]
    pub tf_replica_specs: BTreeMap<TFReplicaType, ReplicaSpec>,
}
