use kfjob_core::{Error, Settings};
use std::fs;
use std::path::{Path, PathBuf};

const CONFIG_PATH: &str = "~/.kfjob/config.toml";

fn expand_tilde(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    PathBuf::from(path)
}

/// Load settings from `path`, or from `~/.kfjob/config.toml` when no path is
/// given. A missing default file means defaults; a missing explicit file is
/// an error. `CPU_IMAGE_NAME` and `IMAGE_NAME` override the file.
pub fn load_settings(path: Option<&Path>) -> Result<Settings, Error> {
    let settings = match path {
        Some(path) => parse_file(path)?,
        None => {
            let default_path = expand_tilde(CONFIG_PATH);
            if default_path.exists() {
                parse_file(&default_path)?
            } else {
                Settings::default()
            }
        }
    };
    Ok(settings.with_env_overrides(|key| std::env::var(key).ok()))
}

fn parse_file(path: &Path) -> Result<Settings, Error> {
    let content = fs::read_to_string(path)
        .map_err(|e| Error::config(format!("cannot read {}: {}", path.display(), e)))?;
    parse_settings(&content)
        .map_err(|e| Error::config(format!("invalid config {}: {}", path.display(), e)))
}

pub fn parse_settings(content: &str) -> Result<Settings, toml::de::Error> {
    toml::from_str(content)
}
