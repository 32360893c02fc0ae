use std::path::PathBuf;

use thiserror::Error;

/// Errors raised along the submission pipeline.
///
/// `Preprocess`, `ImageBuild`, `Submission`, `NameConflict` and `Cancelled`
/// stop the pipeline. `Namespace` is only ever logged. `Logs`, `Cleanup` and
/// `Timeout` happen after the job exists and are handled according to the
/// configured post-submission policy.
#[derive(Debug, Error)]
pub enum Error {
    #[error("preprocess failed: {message}")]
    Preprocess { message: String },

    #[error("cannot read namespace file {}: {message}", .path.display())]
    Namespace { path: PathBuf, message: String },

    #[error("image build failed: {message}")]
    ImageBuild { message: String },

    #[error("submission of job '{name}' failed: {message}")]
    Submission { name: String, message: String },

    #[error("job name '{name}' is already taken")]
    NameConflict { name: String },

    #[error("log retrieval for job '{name}' failed: {message}")]
    Logs { name: String, message: String },

    #[error("cleanup of image '{image}' failed: {message}")]
    Cleanup { image: String, message: String },

    #[error("{stage} timed out")]
    Timeout { stage: &'static str },

    #[error("job '{job}' was submitted but {} post-submission step(s) failed", .warnings.len())]
    PostSubmission { job: String, warnings: Vec<Error> },

    #[error("cancelled before {stage}")]
    Cancelled { stage: &'static str },

    #[error("{field} is already assigned")]
    AlreadyAssigned { field: &'static str },

    #[error("configuration error: {message}")]
    Config { message: String },
}

impl Error {
    pub fn preprocess(message: impl Into<String>) -> Self {
        Error::Preprocess { message: message.into() }
    }

    pub fn image_build(message: impl Into<String>) -> Self {
        Error::ImageBuild { message: message.into() }
    }

    pub fn config(message: impl Into<String>) -> Self {
        Error::Config { message: message.into() }
    }

    /// True for failures that leave nothing behind on the cluster.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Error::Preprocess { .. }
                | Error::ImageBuild { .. }
                | Error::Submission { .. }
                | Error::NameConflict { .. }
                | Error::Cancelled { .. }
                | Error::Config { .. }
        )
    }
}
