pub mod generate;
pub mod parse;
pub mod types;

use regex::{Captures, Regex};
use std::path::{Path, PathBuf};

pub use parse::{load_config, load_or_default, ConfigError};
pub use types::{Config, PipelineConfig, QueryConfig, StorageConfig};

const ENV_VAR_PATTERN: &str = r"\$env\{([A-Za-z_][A-Za-z0-9_]*)\}";

/// Expands environment variables in a string.
/// Supports $env{VAR_NAME} syntax; unset variables are left unchanged.
pub fn expand_env_vars(text: &str) -> String {
    let Ok(re) = Regex::new(ENV_VAR_PATTERN) else {
        return text.to_string();
    };

    re.replace_all(text, |caps: &Captures| {
        std::env::var(&caps[1]).unwrap_or_else(|_| caps[0].to_string())
    })
    .to_string()
}

/// Names of `$env{...}` references still present in the text
pub fn unexpanded_env_vars(text: &str) -> Vec<String> {
    let Ok(re) = Regex::new(ENV_VAR_PATTERN) else {
        return Vec::new();
    };
    re.captures_iter(text).map(|caps| caps[1].to_string()).collect()
}

/// Expands a leading `~` to the user's home directory.
/// Returns the path unchanged if there is no tilde or no home directory.
pub fn expand_tilde(path: &Path) -> PathBuf {
    let path_str = path.to_string_lossy();

    if let Some(rest) = path_str.strip_prefix("~/") {
        if let Some(home_dir) = dirs::home_dir() {
            return home_dir.join(rest);
        }
    } else if path_str == "~" {
        if let Some(home_dir) = dirs::home_dir() {
            return home_dir;
        }
    }

    path.to_path_buf()
}

/// User-level config location, `~/.config/proclens/config.yml`
pub fn user_config_path() -> Option<PathBuf> {
    dirs::home_dir().map(|home| home.join(".config/proclens/config.yml"))
}

pub const SYSTEM_CONFIG_PATH: &str = "/etc/proclens/config.yml";

/// Resolves the config file path. Returns the first of:
/// 1. Explicit path (if provided, with tilde expansion)
/// 2. ~/.config/proclens/config.yml, if it exists
/// 3. /etc/proclens/config.yml, if it exists
pub fn resolve_config_path(explicit: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit {
        return Some(expand_tilde(path));
    }

    if let Some(user_config) = user_config_path() {
        if user_config.exists() {
            return Some(user_config);
        }
    }

    let system_config = PathBuf::from(SYSTEM_CONFIG_PATH);
    if system_config.exists() {
        return Some(system_config);
    }

    None
}
