use super::types::*;
use crate::config::{expand_env_vars, expand_tilde, resolve_config_path, unexpanded_env_vars};
use humantime_serde::re::humantime;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info};

/// Upper bound on any configured query window
const MAX_WINDOW_LIMIT: Duration = Duration::from_secs(100 * 365 * 24 * 60 * 60);

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse YAML: {0}")]
    YamlParse(#[from] serde_yaml::Error),

    #[error("validation failed:\n{}", .0.join("\n"))]
    ValidationList(Vec<String>),

    #[error("validation failed: {0}")]
    Validation(String),
}

pub fn load_config(path: &Path) -> Result<Config, ConfigError> {
    let yaml_string = std::fs::read_to_string(path).map_err(|e| {
        ConfigError::Io(std::io::Error::new(
            e.kind(),
            format!("failed to read config file '{}': {}", path.display(), e),
        ))
    })?;

    let mut config = parse_config(&yaml_string)?;
    expand_paths(&mut config);
    validate_config(&config)?;

    debug!(path = %path.display(), "Loaded config");
    Ok(config)
}

/// Load the resolved config file, or defaults when no file exists.
/// Returns the path the config came from, if any.
pub fn load_or_default(explicit: Option<&Path>) -> Result<(Config, Option<PathBuf>), ConfigError> {
    match resolve_config_path(explicit) {
        Some(path) => {
            let config = load_config(&path)?;
            Ok((config, Some(path)))
        }
        None => {
            info!("No config file found, using defaults");
            let mut config = Config::default();
            expand_paths(&mut config);
            Ok((config, None))
        }
    }
}

/// Parse YAML text after expanding environment variables
pub fn parse_config(yaml_string: &str) -> Result<Config, ConfigError> {
    let yaml_string = expand_env_vars(yaml_string);
    check_unexpanded_vars(&yaml_string)?;

    // a file holding only comments is an empty document
    let is_empty = yaml_string.lines().all(|line| {
        let line = line.trim();
        line.is_empty() || line.starts_with('#') || line == "---"
    });
    if is_empty {
        return Ok(Config::default());
    }

    Ok(serde_yaml::from_str(&yaml_string)?)
}

fn check_unexpanded_vars(yaml_string: &str) -> Result<(), ConfigError> {
    // references inside comments are documentation, not values
    let mut unexpanded: Vec<String> = yaml_string
        .lines()
        .filter(|line| !line.trim_start().starts_with('#'))
        .flat_map(unexpanded_env_vars)
        .collect();
    if unexpanded.is_empty() {
        return Ok(());
    }
    unexpanded.sort();
    unexpanded.dedup();

    let error_msg = if unexpanded.len() == 1 {
        format!(
            "Environment variable $env{{{0}}} is not set.\n\
             \n\
             To fix this, either:\n\
             1. Set the environment variable: export {0}=/path/to/directory\n\
             2. Replace $env{{{0}}} in the config file with an actual value",
            unexpanded[0]
        )
    } else {
        format!(
            "Environment variables are not set: {}\n\
             \n\
             To fix this, either:\n\
             1. Set the environment variables\n\
             2. Replace the variables in the config file with actual values",
            unexpanded.join(", ")
        )
    };

    Err(ConfigError::Validation(error_msg))
}

fn expand_paths(config: &mut Config) {
    config.storage.path = expand_tilde(&config.storage.path);
}

pub fn validate_config(config: &Config) -> Result<(), ConfigError> {
    let mut errors = Vec::new();

    if config.storage.path.as_os_str().is_empty() {
        errors.push("storage.path cannot be empty".to_string());
    }

    if config.pipeline.workers == 0 {
        errors.push("pipeline.workers must be at least 1".to_string());
    }
    if config.pipeline.queue_size == 0 {
        errors.push("pipeline.queue_size must be at least 1".to_string());
    }

    let query = &config.query;
    if query.rollup_cache_capacity == 0 {
        errors.push("query.rollup_cache_capacity must be at least 1".to_string());
    }
    if query.max_window.is_zero() {
        errors.push("query.max_window must be greater than zero".to_string());
    }
    if query.max_window > MAX_WINDOW_LIMIT {
        errors.push(format!(
            "query.max_window ({}) exceeds 100 years",
            humantime::format_duration(query.max_window)
        ));
    }
    if query.default_window.is_zero() {
        errors.push("query.default_window must be greater than zero".to_string());
    }
    if query.default_window > query.max_window {
        errors.push(format!(
            "query.default_window ({}) cannot exceed query.max_window ({})",
            humantime::format_duration(query.default_window),
            humantime::format_duration(query.max_window)
        ));
    }
    if query.max_limit == 0 {
        errors.push("query.max_limit must be at least 1".to_string());
    }
    if query.default_limit == 0 || query.default_limit > query.max_limit {
        errors.push(format!(
            "query.default_limit ({}) must be between 1 and query.max_limit ({})",
            query.default_limit, query.max_limit
        ));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(ConfigError::ValidationList(errors))
    }
}
