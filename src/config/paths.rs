use std::{
    env, fs,
    io::{Error, ErrorKind},
    path::PathBuf,
};

const APP_DIR: &str = "avdev";

/// Locations of avdev's configuration and log files.
///
/// Both follow the XDG base directory layout, falling back to the
/// conventional directories below `$HOME`.
pub struct ConfigPaths;

impl ConfigPaths {
    fn xdg_base(var: &str, home_fallback: &str) -> Result<PathBuf, Error> {
        if let Some(base) = env::var_os(var).filter(|value| !value.is_empty()) {
            return Ok(PathBuf::from(base));
        }

        env::var_os("HOME")
            .filter(|home| !home.is_empty())
            .map(|home| PathBuf::from(home).join(home_fallback))
            .ok_or_else(|| {
                Error::new(
                    ErrorKind::NotFound,
                    format!("neither {var} nor HOME is set"),
                )
            })
    }

    /// `$XDG_CONFIG_HOME/avdev`, or `$HOME/.config/avdev`.
    ///
    /// # Errors
    /// Returns an error if neither variable is set
    pub fn config_dir() -> Result<PathBuf, Error> {
        Ok(Self::xdg_base("XDG_CONFIG_HOME", ".config")?.join(APP_DIR))
    }

    /// `$XDG_STATE_HOME/avdev/logs`, or `$HOME/.local/state/avdev/logs`.
    ///
    /// Created on first use.
    ///
    /// # Errors
    /// Returns error if the base directory is unknown or cannot be created
    pub fn log_dir() -> Result<PathBuf, Error> {
        let log_dir = Self::xdg_base("XDG_STATE_HOME", ".local/state")?
            .join(APP_DIR)
            .join("logs");

        fs::create_dir_all(&log_dir)?;

        Ok(log_dir)
    }

    /// Path of `config.toml` inside [`ConfigPaths::config_dir`].
    ///
    /// # Errors
    /// Returns an error if neither `XDG_CONFIG_HOME` nor `HOME` is set
    pub fn main_config() -> Result<PathBuf, Error> {
        Ok(Self::config_dir()?.join("config.toml"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn main_config_lives_in_app_dir() {
        let Ok(path) = ConfigPaths::main_config() else {
            return;
        };

        assert!(path.ends_with("avdev/config.toml"));
    }
}
