use std::collections::BTreeMap;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::ConfigMap;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kfjob_core::config::DEFAULT_GPU_IMAGE;
use kfjob_core::{Error, ImageBuilder, ImageId, JobConfiguration, Settings};
use kfjob_kubeflow::generator::FILE_NAME;
use kube::api::{Api, DeleteParams, PostParams};
use kube::Client;
use tracing::info;

const MANAGED_BY_LABEL: &str = "app.kubernetes.io/managed-by";
const MANAGED_BY: &str = "kfjob";

/// Source-to-ConfigMap builder.
///
/// Stores the code in a ConfigMap named after the job and hands that name
/// back as the image identifier, so every role mounts the source directly.
pub struct ConfigMapBuilder {
    client: Client,
}

#[async_trait]
impl ImageBuilder for ConfigMapBuilder {
    async fn build(&self, code: &str, config: &JobConfiguration) -> Result<ImageId, Error> {
        let (name, namespace) = target(config)?;
        let api: Api<ConfigMap> = Api::namespaced(self.client.clone(), namespace);

        api.create(&PostParams::default(), &source_config_map(name, namespace, code))
            .await
            .map_err(|e| Error::image_build(format!("cannot create ConfigMap '{name}': {e}")))?;

        info!(config_map = %name, namespace = %namespace, "source stored");
        Ok(ImageId::new(name))
    }

    async fn cleanup(&self, config: &JobConfiguration) -> Result<(), Error> {
        let Some(image) = config.image() else {
            return Ok(());
        };
        let namespace = config.namespace().unwrap_or_default();
        let api: Api<ConfigMap> = Api::namespaced(self.client.clone(), namespace);

        match api.delete(image.volume_name(), &DeleteParams::default()).await {
            Ok(_) => {
                info!(config_map = %image, namespace = %namespace, "source removed");
                Ok(())
            }
            Err(kube::Error::Api(ae)) if ae.code == 404 => Ok(()),
            Err(e) => Err(Error::Cleanup {
                image: image.to_string(),
                message: e.to_string(),
            }),
        }
    }
}

impl ConfigMapBuilder {
    pub fn new(client: Client) -> ConfigMapBuilder {
        ConfigMapBuilder { client }
    }
}

/// Settings for jobs whose source comes from this builder.
///
/// A ConfigMap name cannot be pulled, so GPU roles fall back to
/// `DEFAULT_GPU_IMAGE` unless `gpu-image` or `IMAGE_NAME` picked one.
pub fn runtime_settings(mut settings: Settings) -> Settings {
    if settings.gpu_image.is_none() {
        settings.gpu_image = Some(DEFAULT_GPU_IMAGE.to_string());
    }
    settings
}

fn target(config: &JobConfiguration) -> Result<(&str, &str), Error> {
    let name = config
        .generated_name()
        .ok_or_else(|| Error::image_build("job has no generated name"))?;
    let namespace = config
        .namespace()
        .ok_or_else(|| Error::image_build("job has no namespace"))?;
    Ok((name, namespace))
}

/// ConfigMap holding `code` under the file name every role runs.
pub fn source_config_map(name: &str, namespace: &str, code: &str) -> ConfigMap {
    ConfigMap {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(namespace.to_string()),
            labels: Some(BTreeMap::from([(
                MANAGED_BY_LABEL.to_string(),
                MANAGED_BY.to_string(),
            )])),
            ..Default::default()
        },
        data: Some(BTreeMap::from([(FILE_NAME.to_string(), code.to_string())])),
        ..Default::default()
    }
}
