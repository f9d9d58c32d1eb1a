//! Config file location.

use std::path::PathBuf;

use anyhow::{Result, bail};

/// Environment variable naming an explicit config file.
const CONFIG_ENV: &str = "GUIDECAST_CONFIG";

/// Resolves the config file path, first match wins:
///
/// 1. `{dir}/config.toml` when `--dir` is given
/// 2. `$GUIDECAST_CONFIG`
/// 3. `$XDG_CONFIG_HOME/guidecast/config.toml`
/// 4. `~/.config/guidecast/config.toml`
///
/// # Errors
///
/// Returns an error if none of the above can be determined.
pub fn resolve_config_path(dir: Option<&PathBuf>) -> Result<PathBuf> {
    config_path_with(dir, |key| std::env::var(key).ok())
}

fn config_path_with(
    dir: Option<&PathBuf>,
    env: impl Fn(&str) -> Option<String>,
) -> Result<PathBuf> {
    let var = |key: &str| env(key).filter(|value| !value.is_empty());

    if let Some(d) = dir {
        return Ok(d.join("config.toml"));
    }
    if let Some(path) = var(CONFIG_ENV) {
        return Ok(PathBuf::from(path));
    }
    let base = match (var("XDG_CONFIG_HOME"), var("HOME")) {
        (Some(xdg), _) => PathBuf::from(xdg),
        (None, Some(home)) => PathBuf::from(home).join(".config"),
        (None, None) => bail!("cannot locate config: neither XDG_CONFIG_HOME nor HOME is set"),
    };
    Ok(base.join("guidecast").join("config.toml"))
}
