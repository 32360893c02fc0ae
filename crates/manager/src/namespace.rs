use std::path::Path;

use kfjob_core::Error;
use tracing::{info, warn};

/// Namespace from the service-account file, or `default` when the file is
/// absent, unreadable or empty.
pub async fn resolve_namespace(path: &Path, default: &str) -> String {
    if let Ok(false) = tokio::fs::try_exists(path).await {
        info!(path = %path.display(), namespace = %default, "no namespace file");
        return default.to_string();
    }

    match tokio::fs::read_to_string(path).await {
        Ok(contents) => {
            let namespace = contents.trim();
            if namespace.is_empty() {
                warn!(path = %path.display(), namespace = %default, "namespace file is empty");
                return default.to_string();
            }
            info!(namespace = %namespace, "read namespace");
            namespace.to_string()
        }
        Err(e) => {
            let err = Error::Namespace {
                path: path.to_path_buf(),
                message: e.to_string(),
            };
            warn!(error = %err, namespace = %default, "falling back to default namespace");
            default.to_string()
        }
    }
}
