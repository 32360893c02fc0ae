use kube::CustomResourceExt;

use kfjob_kubeflow::{PyTorchJob, TFJob};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    std::fs::write("tfjob_crd.yaml", serde_yaml::to_string(&TFJob::crd())?)?;
    std::fs::write("pytorchjob_crd.yaml", serde_yaml::to_string(&PyTorchJob::crd())?)?;
    Ok(())
}
