use std::sync::Arc;

use kfjob_core::{
    ClusterBackend, Error, ImageBuilder, Interpreter, Job, JobConfiguration, PostSubmissionPolicy,
    Settings,
};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::namespace::resolve_namespace;
use crate::naming::generate_name;

/// A created job plus the post-submission failures that were not propagated.
#[derive(Debug)]
pub struct Submission {
    pub job: Job,
    pub warnings: Vec<Error>,
}

/// Drives one piece of code through the submission pipeline.
///
/// Holds no per-call state, so concurrent `execute` calls are independent.
pub struct Manager {
    backend: Arc<dyn ClusterBackend>,
    builder: Arc<dyn ImageBuilder>,
    interpreter: Arc<dyn Interpreter>,
    settings: Settings,
}

impl Manager {
    pub fn new(
        backend: Arc<dyn ClusterBackend>,
        builder: Arc<dyn ImageBuilder>,
        interpreter: Arc<dyn Interpreter>,
        settings: Settings,
    ) -> Self {
        Manager {
            backend,
            builder,
            interpreter,
            settings,
        }
    }

    /// Preprocess, build and submit `code`.
    ///
    /// Preprocess, build and submission failures are returned as-is and stop
    /// the pipeline. Log retrieval and cleanup failures are handled per
    /// `Settings::post_submission_policy`. Cancellation is honoured between
    /// steps until the job exists; after that it only skips log retrieval.
    pub async fn execute(&self, code: &str, cancel: &CancellationToken) -> Result<Submission, Error> {
        let mut config = self.interpreter.preprocess(code)?;
        config.assign_name(generate_name(&self.settings.job_name_prefix))?;
        let preprocessed = self.interpreter.preprocessed_code(code);

        checkpoint(cancel, "namespace resolution")?;
        let namespace =
            resolve_namespace(&self.settings.namespace_file, &self.settings.default_namespace)
                .await;
        config.assign_namespace(namespace)?;

        checkpoint(cancel, "image build")?;
        info!(job = ?config.generated_name(), framework = %config.framework, "building image");
        let image = self.builder.build(&preprocessed, &config).await?;
        info!(image = %image, "image built");
        config.assign_image(image)?;

        if let Err(e) = checkpoint(cancel, "submission") {
            self.discard_image(&config).await;
            return Err(e);
        }
        let job = match self.submit(&mut config).await {
            Ok(job) => job,
            Err(e) => {
                error!(error = %e, "submission failed");
                self.discard_image(&config).await;
                return Err(e);
            }
        };

        let warnings = self.finish(&config, &job, cancel).await;
        match self.settings.post_submission_policy {
            PostSubmissionPolicy::Propagate if !warnings.is_empty() => Err(Error::PostSubmission {
                job: job.name,
                warnings,
            }),
            _ => Ok(Submission { job, warnings }),
        }
    }

    /// Submit, picking a fresh name whenever the cluster reports a
    /// conflict, up to `name_conflict_retries` times.
    async fn submit(&self, config: &mut JobConfiguration) -> Result<Job, Error> {
        let mut retries = self.settings.name_conflict_retries;
        loop {
            match self.backend.submit(config).await {
                Err(Error::NameConflict { name }) if retries > 0 => {
                    retries -= 1;
                    let fresh = generate_name(&self.settings.job_name_prefix);
                    warn!(taken = %name, retry = %fresh, "job name taken");
                    config.rename_after_conflict(fresh);
                }
                result => return result,
            }
        }
    }

    async fn finish(&self, config: &JobConfiguration, job: &Job, cancel: &CancellationToken) -> Vec<Error> {
        let limit = self.settings.post_submission_timeout;
        let mut warnings = Vec::new();

        if cancel.is_cancelled() {
            info!(job = %job.name, "cancelled, skipping log retrieval");
        } else {
            match tokio::time::timeout(limit, self.backend.get_logs(config, job)).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => warnings.push(e),
                Err(_) => warnings.push(Error::Timeout { stage: "log retrieval" }),
            }
        }

        match tokio::time::timeout(limit, self.builder.cleanup(config)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warnings.push(e),
            Err(_) => warnings.push(Error::Timeout { stage: "cleanup" }),
        }

        for warning in &warnings {
            warn!(job = %job.name, error = %warning, "post-submission step failed");
        }
        warnings
    }

    async fn discard_image(&self, config: &JobConfiguration) {
        let limit = self.settings.post_submission_timeout;
        match tokio::time::timeout(limit, self.builder.cleanup(config)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!(error = %e, "cannot clean up unused image"),
            Err(_) => warn!("cleanup of unused image timed out"),
        }
    }
}

fn checkpoint(cancel: &CancellationToken, stage: &'static str) -> Result<(), Error> {
    if cancel.is_cancelled() {
        return Err(Error::Cancelled { stage });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use kfjob_core::{Framework, ImageId};
    use mockall::mock;
    use mockall::predicate::always;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use crate::naming::{NAME_SUFFIX_ALPHABET, NAME_SUFFIX_LEN};

    mock! {
        Interp {}
        impl Interpreter for Interp {
            fn preprocess(&self, code: &str) -> Result<JobConfiguration, Error>;
            fn preprocessed_code(&self, code: &str) -> String;
        }
    }

    mock! {
        Builder {}
        #[async_trait]
        impl ImageBuilder for Builder {
            async fn build(&self, code: &str, config: &JobConfiguration) -> Result<ImageId, Error>;
            async fn cleanup(&self, config: &JobConfiguration) -> Result<(), Error>;
        }
    }

    mock! {
        Backend {}
        #[async_trait]
        impl ClusterBackend for Backend {
            async fn submit(&self, config: &JobConfiguration) -> Result<Job, Error>;
            async fn get_logs(&self, config: &JobConfiguration, job: &Job) -> Result<(), Error>;
        }
    }

    fn settings_without_namespace_file() -> (tempfile::TempDir, Settings) {
        let dir = tempfile::tempdir().unwrap();
        let settings = Settings {
            namespace_file: dir.path().join("namespace"),
            ..Default::default()
        };
        (dir, settings)
    }

    fn tf_interpreter() -> MockInterp {
        let mut interp = MockInterp::new();
        interp.expect_preprocess().returning(|_| {
            let mut config = JobConfiguration::new(Framework::TensorFlow);
            config.ps_count = 2;
            config.worker_count = 3;
            Ok(config)
        });
        interp
            .expect_preprocessed_code()
            .returning(|code| code.replace("%framework=tf\n", ""));
        interp
    }

    fn working_builder() -> MockBuilder {
        let mut builder = MockBuilder::new();
        builder
            .expect_build()
            .times(1)
            .returning(|_, config| Ok(ImageId::new(config.generated_name().unwrap())));
        builder.expect_cleanup().times(1).returning(|_| Ok(()));
        builder
    }

    fn job_for(config: &JobConfiguration) -> Job {
        Job {
            name: config.generated_name().unwrap().to_string(),
            namespace: config.namespace().unwrap().to_string(),
            framework: config.framework,
        }
    }

    fn manager(backend: MockBackend, builder: MockBuilder, interp: MockInterp, settings: Settings) -> Manager {
        Manager::new(Arc::new(backend), Arc::new(builder), Arc::new(interp), settings)
    }

    fn valid_name(name: &str) -> bool {
        name.strip_prefix("jupyter-kernel-").is_some_and(|suffix| {
            suffix.len() == NAME_SUFFIX_LEN
                && suffix.bytes().all(|b| NAME_SUFFIX_ALPHABET.contains(&b))
        })
    }

    #[tokio::test]
    async fn happy_path_runs_every_step() {
        let (_dir, settings) = settings_without_namespace_file();
        let mut backend = MockBackend::new();
        backend
            .expect_submit()
            .times(1)
            .withf(|config| {
                config.namespace() == Some("default")
                    && config.image().map(ImageId::as_str) == config.generated_name()
                    && valid_name(config.generated_name().unwrap_or_default())
            })
            .returning(|config| Ok(job_for(config)));
        backend
            .expect_get_logs()
            .times(1)
            .with(always(), always())
            .returning(|_, _| Ok(()));

        let mut builder = MockBuilder::new();
        builder
            .expect_build()
            .times(1)
            .withf(|code, _| !code.contains("%framework"))
            .returning(|_, config| Ok(ImageId::new(config.generated_name().unwrap())));
        builder.expect_cleanup().times(1).returning(|_| Ok(()));

        let manager = manager(backend, builder, tf_interpreter(), settings);
        let submission = manager
            .execute("%framework=tf\nprint(1)\n", &CancellationToken::new())
            .await
            .unwrap();

        assert!(valid_name(&submission.job.name));
        assert_eq!(submission.job.namespace, "default");
        assert_eq!(submission.job.framework, Framework::TensorFlow);
        assert!(submission.warnings.is_empty());
    }

    #[tokio::test]
    async fn preprocess_failure_touches_nothing() {
        let (_dir, settings) = settings_without_namespace_file();
        let mut interp = MockInterp::new();
        interp
            .expect_preprocess()
            .returning(|_| Err(Error::preprocess("line 1: unknown key 'gpus'")));
        interp.expect_preprocessed_code().times(0);

        let mut builder = MockBuilder::new();
        builder.expect_build().times(0);
        builder.expect_cleanup().times(0);
        let mut backend = MockBackend::new();
        backend.expect_submit().times(0);
        backend.expect_get_logs().times(0);

        let manager = manager(backend, builder, interp, settings);
        let err = manager
            .execute("%gpus=4\n", &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Preprocess { .. }));
    }

    #[tokio::test]
    async fn namespace_file_is_used_when_present() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("namespace");
        std::fs::write(&path, "team-a\n").unwrap();
        let settings = Settings {
            namespace_file: path,
            ..Default::default()
        };

        let mut backend = MockBackend::new();
        backend
            .expect_submit()
            .withf(|config| config.namespace() == Some("team-a"))
            .returning(|config| Ok(job_for(config)));
        backend.expect_get_logs().returning(|_, _| Ok(()));

        let manager = manager(backend, working_builder(), tf_interpreter(), settings);
        let submission = manager.execute("print(1)", &CancellationToken::new()).await.unwrap();
        assert_eq!(submission.job.namespace, "team-a");
    }

    #[tokio::test]
    async fn build_failure_creates_no_job() {
        let (_dir, settings) = settings_without_namespace_file();
        let mut builder = MockBuilder::new();
        builder
            .expect_build()
            .times(1)
            .returning(|_, _| Err(Error::image_build("registry unavailable")));
        builder.expect_cleanup().times(0);
        let mut backend = MockBackend::new();
        backend.expect_submit().times(0);
        backend.expect_get_logs().times(0);

        let manager = manager(backend, builder, tf_interpreter(), settings);
        let err = manager.execute("print(1)", &CancellationToken::new()).await.unwrap_err();
        assert!(matches!(err, Error::ImageBuild { .. }));
    }

    #[tokio::test]
    async fn submission_failure_is_returned_and_image_discarded() {
        let (_dir, settings) = settings_without_namespace_file();
        let mut backend = MockBackend::new();
        backend.expect_submit().times(1).returning(|config| {
            Err(Error::Submission {
                name: config.generated_name().unwrap().to_string(),
                message: "forbidden".to_string(),
            })
        });
        backend.expect_get_logs().times(0);

        let manager = manager(backend, working_builder(), tf_interpreter(), settings);
        let err = manager.execute("print(1)", &CancellationToken::new()).await.unwrap_err();
        assert!(matches!(err, Error::Submission { ref message, .. } if message == "forbidden"));
    }

    #[tokio::test]
    async fn name_conflict_is_not_retried_by_default() {
        let (_dir, settings) = settings_without_namespace_file();
        let mut backend = MockBackend::new();
        backend.expect_submit().times(1).returning(|config| {
            Err(Error::NameConflict {
                name: config.generated_name().unwrap().to_string(),
            })
        });

        let manager = manager(backend, working_builder(), tf_interpreter(), settings);
        let err = manager.execute("print(1)", &CancellationToken::new()).await.unwrap_err();
        assert!(matches!(err, Error::NameConflict { .. }));
    }

    #[tokio::test]
    async fn exhausted_conflict_retries_return_last_conflict() {
        let (_dir, mut settings) = settings_without_namespace_file();
        settings.name_conflict_retries = 2;

        let names = Arc::new(std::sync::Mutex::new(Vec::new()));
        let tried = names.clone();
        let mut backend = MockBackend::new();
        backend.expect_submit().times(3).returning(move |config| {
            let name = config.generated_name().unwrap().to_string();
            tried.lock().unwrap().push(name.clone());
            Err(Error::NameConflict { name })
        });
        backend.expect_get_logs().times(0);

        // working_builder expects exactly one cleanup: the discarded image.
        let manager = manager(backend, working_builder(), tf_interpreter(), settings);
        let err = manager.execute("print(1)", &CancellationToken::new()).await.unwrap_err();

        let names = names.lock().unwrap();
        assert_eq!(names.len(), 3);
        assert!(names.iter().all(|n| valid_name(n)));
        match err {
            Error::NameConflict { name } => assert_eq!(&name, names.last().unwrap()),
            other => panic!("expected NameConflict, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn name_conflict_retries_with_fresh_name() {
        let (_dir, mut settings) = settings_without_namespace_file();
        settings.name_conflict_retries = 2;

        let attempts = Arc::new(AtomicUsize::new(0));
        let seen = attempts.clone();
        let mut backend = MockBackend::new();
        backend.expect_submit().times(2).returning(move |config| {
            if seen.fetch_add(1, Ordering::SeqCst) == 0 {
                Err(Error::NameConflict {
                    name: config.generated_name().unwrap().to_string(),
                })
            } else {
                Ok(job_for(config))
            }
        });
        backend.expect_get_logs().returning(|_, _| Ok(()));

        let manager = manager(backend, working_builder(), tf_interpreter(), settings);
        let submission = manager.execute("print(1)", &CancellationToken::new()).await.unwrap();
        assert_eq!(attempts.load(Ordering::SeqCst), 2);
        assert!(valid_name(&submission.job.name));
    }

    #[tokio::test]
    async fn post_submission_failures_are_suppressed_by_default() {
        let (_dir, settings) = settings_without_namespace_file();
        let mut backend = MockBackend::new();
        backend.expect_submit().returning(|config| Ok(job_for(config)));
        backend.expect_get_logs().times(1).returning(|_, job| {
            Err(Error::Logs {
                name: job.name.clone(),
                message: "no pods found".to_string(),
            })
        });
        let mut builder = MockBuilder::new();
        builder
            .expect_build()
            .returning(|_, config| Ok(ImageId::new(config.generated_name().unwrap())));
        builder.expect_cleanup().times(1).returning(|config| {
            Err(Error::Cleanup {
                image: config.image().unwrap().to_string(),
                message: "forbidden".to_string(),
            })
        });

        let manager = manager(backend, builder, tf_interpreter(), settings);
        let submission = manager.execute("print(1)", &CancellationToken::new()).await.unwrap();
        assert_eq!(submission.warnings.len(), 2);
        assert!(matches!(submission.warnings[0], Error::Logs { .. }));
        assert!(matches!(submission.warnings[1], Error::Cleanup { .. }));
    }

    #[tokio::test]
    async fn post_submission_failures_can_be_propagated() {
        let (_dir, mut settings) = settings_without_namespace_file();
        settings.post_submission_policy = PostSubmissionPolicy::Propagate;

        let mut backend = MockBackend::new();
        backend.expect_submit().returning(|config| Ok(job_for(config)));
        backend.expect_get_logs().returning(|_, job| {
            Err(Error::Logs {
                name: job.name.clone(),
                message: "no pods found".to_string(),
            })
        });

        let manager = manager(backend, working_builder(), tf_interpreter(), settings);
        let err = manager.execute("print(1)", &CancellationToken::new()).await.unwrap_err();
        match err {
            Error::PostSubmission { job, warnings } => {
                assert!(valid_name(&job));
                assert_eq!(warnings.len(), 1);
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[tokio::test]
    async fn propagate_policy_without_failures_succeeds() {
        let (_dir, mut settings) = settings_without_namespace_file();
        settings.post_submission_policy = PostSubmissionPolicy::Propagate;

        let mut backend = MockBackend::new();
        backend.expect_submit().returning(|config| Ok(job_for(config)));
        backend.expect_get_logs().returning(|_, _| Ok(()));

        let manager = manager(backend, working_builder(), tf_interpreter(), settings);
        assert!(manager.execute("print(1)", &CancellationToken::new()).await.is_ok());
    }

    #[tokio::test]
    async fn cancelled_before_start_builds_nothing() {
        let (_dir, settings) = settings_without_namespace_file();
        let mut builder = MockBuilder::new();
        builder.expect_build().times(0);
        builder.expect_cleanup().times(0);
        let mut backend = MockBackend::new();
        backend.expect_submit().times(0);

        let cancel = CancellationToken::new();
        cancel.cancel();

        let manager = manager(backend, builder, tf_interpreter(), settings);
        let err = manager.execute("print(1)", &cancel).await.unwrap_err();
        assert!(matches!(err, Error::Cancelled { stage: "namespace resolution" }));
    }

    #[tokio::test]
    async fn cancelled_during_build_discards_image() {
        let (_dir, settings) = settings_without_namespace_file();
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();

        let mut builder = MockBuilder::new();
        builder.expect_build().times(1).returning(move |_, config| {
            trigger.cancel();
            Ok(ImageId::new(config.generated_name().unwrap()))
        });
        builder.expect_cleanup().times(1).returning(|_| Ok(()));
        let mut backend = MockBackend::new();
        backend.expect_submit().times(0);

        let manager = manager(backend, builder, tf_interpreter(), settings);
        let err = manager.execute("print(1)", &cancel).await.unwrap_err();
        assert!(matches!(err, Error::Cancelled { stage: "submission" }));
    }

    struct HangingBackend;

    #[async_trait]
    impl ClusterBackend for HangingBackend {
        async fn submit(&self, config: &JobConfiguration) -> Result<Job, Error> {
            Ok(job_for(config))
        }

        async fn get_logs(&self, _config: &JobConfiguration, _job: &Job) -> Result<(), Error> {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok(())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn hanging_log_retrieval_times_out() {
        let (_dir, mut settings) = settings_without_namespace_file();
        settings.post_submission_timeout = Duration::from_secs(5);

        let manager = Manager::new(
            Arc::new(HangingBackend),
            Arc::new(working_builder()),
            Arc::new(tf_interpreter()),
            settings,
        );
        let submission = manager.execute("print(1)", &CancellationToken::new()).await.unwrap();
        assert_eq!(submission.warnings.len(), 1);
        assert!(matches!(submission.warnings[0], Error::Timeout { stage: "log retrieval" }));
    }

    #[tokio::test]
    async fn concurrent_executions_get_distinct_names() {
        let (_dir, settings) = settings_without_namespace_file();
        let mut backend = MockBackend::new();
        backend.expect_submit().times(8).returning(|config| Ok(job_for(config)));
        backend.expect_get_logs().times(8).returning(|_, _| Ok(()));
        let mut builder = MockBuilder::new();
        builder
            .expect_build()
            .times(8)
            .returning(|_, config| Ok(ImageId::new(config.generated_name().unwrap())));
        builder.expect_cleanup().times(8).returning(|_| Ok(()));

        let manager = Arc::new(manager(backend, builder, tf_interpreter(), settings));
        let runs = (0..8).map(|_| {
            let manager = manager.clone();
            tokio::spawn(async move { manager.execute("print(1)", &CancellationToken::new()).await })
        });
        let mut names = std::collections::HashSet::new();
        for run in runs {
            let submission = run.await.unwrap().unwrap();
            names.insert(submission.job.name);
        }
        assert!(names.len() > 1);
    }
}
