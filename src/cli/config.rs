use super::CliError;
use crate::config::generate::generate_starter_config;
use crate::config::{user_config_path, SYSTEM_CONFIG_PATH};
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

pub fn init(stdout: bool) -> Result<(), CliError> {
    let content = generate_starter_config();
    if stdout {
        print!("{}", content);
        return Ok(());
    }

    let config_path = default_target();
    write_config(&config_path, &content)?;
    println!("Config file written to {}", config_path.display());
    Ok(())
}

/// ~/.config/proclens/config.yml when its directory can be created,
/// otherwise the system location
fn default_target() -> PathBuf {
    if let Some(user_config) = user_config_path() {
        match user_config.parent().map(fs::create_dir_all) {
            Some(Ok(())) => return user_config,
            Some(Err(e)) => {
                eprintln!("Warning: could not create config directory: {}", e);
                eprintln!("Falling back to {}", SYSTEM_CONFIG_PATH);
            }
            None => {}
        }
    }
    PathBuf::from(SYSTEM_CONFIG_PATH)
}

/// Write the starter config, refusing to replace an existing file
pub fn write_config(path: &Path, content: &str) -> Result<(), CliError> {
    if path.exists() {
        return Err(CliError::Io(std::io::Error::new(
            ErrorKind::AlreadyExists,
            format!(
                "config file already exists at {}; remove it first or use --stdout",
                path.display()
            ),
        )));
    }
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(path, content)?;
    Ok(())
}
