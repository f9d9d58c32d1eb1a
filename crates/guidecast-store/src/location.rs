//! Data directory resolution.

use std::path::PathBuf;

use anyhow::{Result, bail};

/// Resolves the directory holding guide versions: `{dir}/guides` when a
/// directory is given, else `$XDG_DATA_HOME/guidecast/guides`, else
/// `~/.local/share/guidecast/guides`.
///
/// # Errors
///
/// Returns an error if no directory was given and neither
/// `XDG_DATA_HOME` nor `HOME` is set.
pub fn resolve_data_dir(dir: Option<&PathBuf>) -> Result<PathBuf> {
    data_dir_with(dir, |key| std::env::var(key).ok())
}

fn data_dir_with(dir: Option<&PathBuf>, env: impl Fn(&str) -> Option<String>) -> Result<PathBuf> {
    if let Some(d) = dir {
        return Ok(d.join("guides"));
    }
    let base = if let Some(xdg) = env("XDG_DATA_HOME").filter(|v| !v.is_empty()) {
        PathBuf::from(xdg)
    } else if let Some(home) = env("HOME").filter(|v| !v.is_empty()) {
        PathBuf::from(home).join(".local").join("share")
    } else {
        bail!("cannot locate data directory: neither XDG_DATA_HOME nor HOME is set");
    };
    Ok(base.join("guidecast").join("guides"))
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;

    #[test]
    fn test_explicit_dir() {
        let dir = PathBuf::from("/srv/tv");
        let path = data_dir_with(Some(&dir), |_| None).unwrap();
        assert_eq!(path, PathBuf::from("/srv/tv/guides"));
    }

    #[test]
    fn test_xdg_data_home() {
        // Arrange
        let env = |key: &str| match key {
            "XDG_DATA_HOME" => Some(String::from("/data")),
            "HOME" => Some(String::from("/home/a")),
            _ => None,
        };

        // Act
        let path = data_dir_with(None, env).unwrap();

        // Assert
        assert_eq!(path, PathBuf::from("/data/guidecast/guides"));
    }

    #[test]
    fn test_home_fallback() {
        let env = |key: &str| (key == "HOME").then(|| String::from("/home/a"));
        let path = data_dir_with(None, env).unwrap();
        assert_eq!(path, PathBuf::from("/home/a/.local/share/guidecast/guides"));
    }

    #[test]
    fn test_unresolvable() {
        assert!(data_dir_with(None, |_| None).is_err());
    }
}
