//! Engine configuration loader.
//!
//! Reads `sagaflow.toml` (by default from the platform config directory,
//! `~/.config/sagaflow/` on Linux) into [`EngineConfig`]. A missing file is
//! not an error: every field has a default.

use std::path::{Path, PathBuf};

use sagaflow_types::config::EngineConfig;

/// Environment variable that overrides the default config file location.
pub const CONFIG_PATH_ENV: &str = "SAGAFLOW_CONFIG";

const CONFIG_FILE_NAME: &str = "sagaflow.toml";

/// Resolve the default configuration file path.
///
/// Priority:
/// 1. `SAGAFLOW_CONFIG` environment variable
/// 2. `{config_dir}/sagaflow/sagaflow.toml`
/// 3. `./sagaflow.toml`
pub fn default_config_path() -> PathBuf {
    if let Ok(path) = std::env::var(CONFIG_PATH_ENV) {
        return PathBuf::from(path);
    }

    if let Some(dir) = dirs::config_dir() {
        return dir.join("sagaflow").join(CONFIG_FILE_NAME);
    }

    PathBuf::from(CONFIG_FILE_NAME)
}

/// Load engine configuration from `path`.
///
/// - Missing file: returns [`EngineConfig::default()`].
/// - Unreadable or malformed file: returns an error. A config the user wrote
///   but that cannot be applied is never silently replaced with defaults.
pub async fn load_config(path: &Path) -> Result<EngineConfig, ConfigError> {
    let content = match tokio::fs::read_to_string(path).await {
        Ok(content) => content,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            tracing::debug!("No {} found, using defaults", path.display());
            return Ok(EngineConfig::default());
        }
        Err(err) => {
            return Err(ConfigError::Io {
                path: path.to_path_buf(),
                source: err,
            });
        }
    };

    let config = parse_config(&content).map_err(|err| match err {
        ConfigError::Parse { message, .. } => ConfigError::Parse {
            path: Some(path.to_path_buf()),
            message,
        },
        other => other,
    })?;

    tracing::debug!(path = %path.display(), "loaded engine config");
    Ok(config)
}

/// Parse engine configuration from a TOML string.
pub fn parse_config(content: &str) -> Result<EngineConfig, ConfigError> {
    let config: EngineConfig = toml::from_str(content).map_err(|e| ConfigError::Parse {
        path: None,
        message: e.to_string(),
    })?;

    if config.max_sub_workflow_depth == 0 {
        return Err(ConfigError::Invalid("max_sub_workflow_depth must be at least 1".to_string()));
    }
    if config.event_bus_capacity == 0 {
        return Err(ConfigError::Invalid("event_bus_capacity must be at least 1".to_string()));
    }
    if config.max_concurrent_nodes == Some(0) {
        return Err(ConfigError::Invalid(
            "max_concurrent_nodes must be at least 1 when set".to_string(),
        ));
    }

    Ok(config)
}

/// Errors raised while loading engine configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// The config file exists but could not be read.
    #[error("failed to read {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The config file is not valid TOML for `EngineConfig`.
    #[error("failed to parse config{}: {message}", path_suffix(.path))]
    Parse {
        path: Option<PathBuf>,
        message: String,
    },

    /// The config parsed but holds an unusable value.
    #[error("invalid config: {0}")]
    Invalid(String),
}

fn path_suffix(path: &Option<PathBuf>) -> String {
    path.as_ref()
        .map(|p| format!(" {}", p.display()))
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tempfile::TempDir;

    #[tokio::test]
    async fn load_config_missing_file_returns_default() {
        let tmp = TempDir::new().unwrap();
        let config = load_config(&tmp.path().join("sagaflow.toml"))
            .await
            .unwrap();
        assert_eq!(config, EngineConfig::default());
    }

    #[tokio::test]
    async fn load_config_valid_toml_returns_parsed() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("sagaflow.toml");
        tokio::fs::write(
            &path,
            r#"
run_timeout_secs = 30
max_sub_workflow_depth = 2
max_concurrent_nodes = 8
"#,
        )
        .await
        .unwrap();

        let config = load_config(&path).await.unwrap();
        assert_eq!(config.run_timeout(), Some(Duration::from_secs(30)));
        assert_eq!(config.max_sub_workflow_depth, 2);
        assert_eq!(config.max_concurrent_nodes, Some(8));
        assert_eq!(config.event_bus_capacity, 1024);
    }

    #[tokio::test]
    async fn load_config_invalid_toml_is_an_error() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("sagaflow.toml");
        tokio::fs::write(&path, "this is not { valid toml !!!")
            .await
            .unwrap();

        let err = load_config(&path).await.unwrap_err();
        assert!(matches!(err, ConfigError::Parse { path: Some(_), .. }));
        assert!(err.to_string().contains("sagaflow.toml"));
    }

    #[test]
    fn parse_config_rejects_zero_limits() {
        let err = parse_config("max_sub_workflow_depth = 0").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));

        let err = parse_config("max_concurrent_nodes = 0").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));

        let err = parse_config("event_bus_capacity = 0").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn default_config_path_ends_with_file_name() {
        let path = default_config_path();
        assert!(path.ends_with(CONFIG_FILE_NAME) || std::env::var(CONFIG_PATH_ENV).is_ok());
    }
}
