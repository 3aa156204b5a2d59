//! Engine configuration loader for Conductor.
//!
//! Reads `config.toml` from the data directory (`~/.conductor/` in
//! production) and deserializes it into [`EngineConfig`]. A missing file
//! yields defaults; a file that exists but cannot be read, parsed, or
//! validated is an error, since silently running with defaults would ignore
//! the operator's limits.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use thiserror::Error;

use conductor_types::config::EngineConfig;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse {}: {message}", path.display())]
    Parse { path: PathBuf, message: String },

    #[error("invalid configuration in {}: {message}", path.display())]
    Invalid { path: PathBuf, message: String },
}

/// Load engine configuration from `{data_dir}/config.toml`.
pub async fn load_engine_config(data_dir: &Path) -> Result<EngineConfig, ConfigError> {
    let config_path = data_dir.join("config.toml");

    let content = match tokio::fs::read_to_string(&config_path).await {
        Ok(content) => content,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            tracing::debug!("No config.toml found at {}, using defaults", config_path.display());
            return Ok(EngineConfig::default());
        }
        Err(source) => {
            return Err(ConfigError::Read {
                path: config_path,
                source,
            });
        }
    };

    let config = toml::from_str::<EngineConfig>(&content).map_err(|err| ConfigError::Parse {
        path: config_path.clone(),
        message: err.to_string(),
    })?;

    validate(&config).map_err(|message| ConfigError::Invalid {
        path: config_path,
        message,
    })?;
    Ok(config)
}

fn validate(config: &EngineConfig) -> Result<(), String> {
    if config.engine.max_concurrency == 0 {
        return Err("engine.max_concurrency must be at least 1".to_string());
    }
    if config.engine.step_timeout_secs == 0 {
        return Err("engine.step_timeout_secs must be at least 1".to_string());
    }
    if config.store.keep_checkpoints == 0 {
        return Err("store.keep_checkpoints must be at least 1".to_string());
    }
    if config.circuit_breaker.failure_threshold == 0 {
        return Err("circuit_breaker.failure_threshold must be at least 1".to_string());
    }

    let mut names = HashSet::new();
    for agent in &config.agents {
        if agent.command.is_empty() {
            return Err(format!("agent '{}' has an empty command", agent.name));
        }
        if !names.insert(agent.name.as_str()) {
            return Err(format!("agent '{}' is defined more than once", agent.name));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use conductor_types::config::StoreBackend;
    use tempfile::TempDir;

    #[tokio::test]
    async fn missing_file_returns_default() {
        let tmp = TempDir::new().unwrap();
        let config = load_engine_config(tmp.path()).await.unwrap();
        assert_eq!(config, EngineConfig::default());
    }

    #[tokio::test]
    async fn valid_toml_returns_parsed() {
        let tmp = TempDir::new().unwrap();
        tokio::fs::write(
            tmp.path().join("config.toml"),
            r#"
[engine]
max_concurrency = 3

[store]
backend = "sqlite"
keep_checkpoints = 5

[[agents]]
name = "linter"
command = ["sh", "-c", "cat"]
"#,
        )
        .await
        .unwrap();

        let config = load_engine_config(tmp.path()).await.unwrap();
        assert_eq!(config.engine.max_concurrency, 3);
        assert_eq!(config.store.backend, StoreBackend::Sqlite);
        assert_eq!(config.store.keep_checkpoints, 5);
        assert_eq!(config.agents[0].name, "linter");
    }

    #[tokio::test]
    async fn malformed_toml_is_an_error() {
        let tmp = TempDir::new().unwrap();
        tokio::fs::write(tmp.path().join("config.toml"), "[engine\nmax_concurrency = ")
            .await
            .unwrap();

        let err = load_engine_config(tmp.path()).await.unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }), "got {err:?}");
        assert!(err.to_string().contains("config.toml"));
    }

    #[tokio::test]
    async fn zero_concurrency_is_invalid() {
        let tmp = TempDir::new().unwrap();
        tokio::fs::write(tmp.path().join("config.toml"), "[engine]\nmax_concurrency = 0\n")
            .await
            .unwrap();

        let err = load_engine_config(tmp.path()).await.unwrap_err();
        assert!(err.to_string().contains("max_concurrency"));
    }

    #[tokio::test]
    async fn duplicate_agent_is_invalid() {
        let tmp = TempDir::new().unwrap();
        tokio::fs::write(
            tmp.path().join("config.toml"),
            r#"
[[agents]]
name = "a"
command = ["true"]

[[agents]]
name = "a"
command = ["false"]
"#,
        )
        .await
        .unwrap();

        let err = load_engine_config(tmp.path()).await.unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { .. }));
        assert!(err.to_string().contains("more than once"));
    }
}
