use anyhow::Context;
use kfjob_core::{Error, ImageId, Interpreter, Settings};
use kfjob_kubeflow::{generate, GeneratorSettings, KubeflowBackend, TrainingJob};
use kfjob_manager::naming::generate_name;
use kfjob_manager::{MagicInterpreter, Manager};
use kfjob_s2i::{runtime_settings, ConfigMapBuilder};
use std::fs;
use std::path::Path;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::render::{render, OutputFormat};
use crate::spinner::create_spinner;

/// Values that stand in for the pipeline's outputs when rendering offline.
#[derive(Debug, Default, Clone)]
pub struct RenderOptions {
    pub name: Option<String>,
    pub namespace: Option<String>,
    pub image: Option<String>,
}

pub async fn handle_run(file: &Path, settings: Settings) -> anyhow::Result<()> {
    let code = read_code(file)?;
    let settings = runtime_settings(settings);
    debug!(
        namespace_file = %settings.namespace_file.display(),
        gpu_image = ?settings.gpu_image,
        policy = ?settings.post_submission_policy,
        retries = settings.name_conflict_retries,
        "settings loaded"
    );
    let spinner = create_spinner();

    spinner.set_message("Connecting to cluster...");
    let client = kube::Client::try_default()
        .await
        .context("cannot connect to the cluster")?;

    let manager = Manager::new(
        Arc::new(KubeflowBackend::new(client.clone(), &settings)),
        Arc::new(ConfigMapBuilder::new(client)),
        Arc::new(MagicInterpreter::new()),
        settings,
    );

    let cancel = CancellationToken::new();
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            on_interrupt.cancel();
        }
    });

    spinner.set_message(format!("Submitting {}...", file.display()));
    match manager.execute(&code, &cancel).await {
        Ok(submission) => {
            spinner.finish_with_message(format!(
                "Job {} ({}) submitted to namespace {}",
                submission.job.name, submission.job.framework, submission.job.namespace
            ));
            for warning in &submission.warnings {
                eprintln!("Warning: {}", warning);
            }
            Ok(())
        }
        Err(e) => {
            spinner.abandon_with_message(outcome_of(&e));
            Err(e.into())
        }
    }
}

pub fn handle_render(
    file: &Path,
    options: &RenderOptions,
    format: OutputFormat,
    settings: &Settings,
) -> anyhow::Result<()> {
    let code = read_code(file)?;
    let job = plan(&code, options, settings)?;
    println!("{}", render(&job, format)?);
    Ok(())
}

pub fn handle_crd() -> anyhow::Result<()> {
    print!("{}", kfjob_kubeflow::crds_yaml()?);
    Ok(())
}

/// Generate the job `code` would submit, without touching the cluster.
pub fn plan(code: &str, options: &RenderOptions, settings: &Settings) -> Result<TrainingJob, Error> {
    let settings = &runtime_settings(settings.clone());
    let interpreter = MagicInterpreter::new();
    let mut config = interpreter.preprocess(code)?;

    let name = options
        .name
        .clone()
        .unwrap_or_else(|| generate_name(&settings.job_name_prefix));
    config.assign_name(name.clone())?;
    config.assign_namespace(
        options
            .namespace
            .clone()
            .unwrap_or_else(|| settings.default_namespace.clone()),
    )?;
    config.assign_image(ImageId::new(options.image.clone().unwrap_or(name)))?;

    Ok(generate(config.framework, &config, &GeneratorSettings::from(settings)))
}

/// Spinner summary for a failed run; non-fatal errors mean the job exists.
fn outcome_of(err: &Error) -> &'static str {
    if err.is_fatal() {
        "Submission failed"
    } else {
        "Job submitted, but follow-up steps failed"
    }
}

fn read_code(file: &Path) -> anyhow::Result<String> {
    fs::read_to_string(file).with_context(|| format!("cannot read {}", file.display()))
}
