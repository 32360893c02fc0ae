use std::time::Duration;

use async_trait::async_trait;
use futures::future::join_all;
use k8s_openapi::api::core::v1::Pod;
use kfjob_core::{ClusterBackend, Error, Framework, Job, JobConfiguration, Settings};
use kube::api::{Api, ListParams, LogParams, PostParams};
use kube::Client;
use tracing::{debug, info, warn};

use crate::generator::{
    generate, GeneratorSettings, TrainingJob, PYTORCH_CONTAINER_NAME, TF_CONTAINER_NAME,
};
use crate::pytorch_job::PyTorchJob;
use crate::tf_job::TFJob;

const POD_POLL_INTERVAL: Duration = Duration::from_secs(2);

/// Creates Kubeflow jobs through the Kubernetes API.
pub struct KubeflowBackend {
    client: Client,
    generator: GeneratorSettings,
    log_wait: Duration,
}

impl KubeflowBackend {
    pub fn new(client: Client, settings: &Settings) -> Self {
        KubeflowBackend {
            client,
            generator: GeneratorSettings::from(settings),
            log_wait: settings.log_wait,
        }
    }

    async fn wait_for_pods(&self, pods: &Api<Pod>, job: &Job) -> Result<Vec<Pod>, Error> {
        let params = ListParams::default().labels(&job_selector(job));
        let deadline = tokio::time::Instant::now() + self.log_wait;

        loop {
            let list = pods.list(&params).await.map_err(|e| Error::Logs {
                name: job.name.clone(),
                message: e.to_string(),
            })?;
            let finished = !list.items.is_empty() && list.items.iter().all(pod_finished);
            if finished || tokio::time::Instant::now() >= deadline {
                return Ok(list.items);
            }
            debug!(job = %job.name, pods = list.items.len(), "waiting for pods to finish");
            tokio::time::sleep(POD_POLL_INTERVAL).await;
        }
    }
}

#[async_trait]
impl ClusterBackend for KubeflowBackend {
    async fn submit(&self, config: &JobConfiguration) -> Result<Job, Error> {
        let training_job = generate(config.framework, config, &self.generator);
        let name = training_job.name().to_string();
        let namespace = training_job.namespace().to_string();
        let params = PostParams::default();

        let created = match &training_job {
            TrainingJob::TensorFlow(job) => {
                let api: Api<TFJob> = Api::namespaced(self.client.clone(), &namespace);
                api.create(&params, job).await.map(|_| ())
            }
            TrainingJob::PyTorch(job) => {
                let api: Api<PyTorchJob> = Api::namespaced(self.client.clone(), &namespace);
                api.create(&params, job).await.map(|_| ())
            }
        };
        created.map_err(|e| submission_error(&name, e))?;

        info!(job = %name, namespace = %namespace, framework = %config.framework, "job created");
        Ok(Job {
            name,
            namespace,
            framework: training_job.framework(),
        })
    }

    async fn get_logs(&self, _config: &JobConfiguration, job: &Job) -> Result<(), Error> {
        let pods: Api<Pod> = Api::namespaced(self.client.clone(), &job.namespace);
        let items = self.wait_for_pods(&pods, job).await?;
        if items.is_empty() {
            return Err(Error::Logs {
                name: job.name.clone(),
                message: "no pods found".to_string(),
            });
        }

        let params = LogParams {
            container: Some(container_name(job.framework).to_string()),
            ..Default::default()
        };
        let fetches = items
            .iter()
            .filter_map(|pod| pod.metadata.name.clone())
            .map(|pod_name| {
                let pods = pods.clone();
                let params = params.clone();
                async move {
                    let logs = pods.logs(&pod_name, &params).await;
                    (pod_name, logs)
                }
            });

        let mut failures = Vec::new();
        for (pod_name, logs) in join_all(fetches).await {
            match logs {
                Ok(text) => {
                    for line in text.lines() {
                        info!(job = %job.name, pod = %pod_name, "{line}");
                    }
                }
                Err(e) => {
                    warn!(job = %job.name, pod = %pod_name, error = %e, "cannot fetch pod logs");
                    failures.push(format!("{pod_name}: {e}"));
                }
            }
        }

        if failures.is_empty() {
            Ok(())
        } else {
            Err(Error::Logs {
                name: job.name.clone(),
                message: failures.join("; "),
            })
        }
    }
}

fn submission_error(name: &str, error: kube::Error) -> Error {
    match error {
        kube::Error::Api(ae) if ae.code == 409 => Error::NameConflict {
            name: name.to_string(),
        },
        other => Error::Submission {
            name: name.to_string(),
            message: other.to_string(),
        },
    }
}

/// Label the training operators put on every pod of a job.
pub fn job_name_label(framework: Framework) -> &'static str {
    match framework {
        Framework::TensorFlow => "tf-job-name",
        Framework::PyTorch => "pytorch-job-name",
    }
}

fn job_selector(job: &Job) -> String {
    format!("{}={}", job_name_label(job.framework), job.name)
}

fn container_name(framework: Framework) -> &'static str {
    match framework {
        Framework::TensorFlow => TF_CONTAINER_NAME,
        Framework::PyTorch => PYTORCH_CONTAINER_NAME,
    }
}

fn pod_finished(pod: &Pod) -> bool {
    matches!(
        pod.status.as_ref().and_then(|s| s.phase.as_deref()),
        Some("Succeeded") | Some("Failed")
    )
}
