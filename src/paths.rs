//! Path utilities for the config file and the render output directory.

use std::env;
use std::path::PathBuf;

const APP_DIR_NAME: &str = "latexsnip";
const CONFIG_FILE_NAME: &str = "config.json";
const RENDERS_DIR_NAME: &str = "latex-renders";

/// Gets the user's home directory.
///
/// Tries `HOME` first (available on Windows 10+ too), then `USERPROFILE` on Windows.
pub fn get_home_dir() -> Result<PathBuf, String> {
    if let Ok(home) = env::var("HOME") {
        if !home.is_empty() {
            return Ok(PathBuf::from(home));
        }
    }

    #[cfg(target_os = "windows")]
    {
        if let Ok(profile) = env::var("USERPROFILE") {
            return Ok(PathBuf::from(profile));
        }
    }

    Err("Could not determine home directory: HOME and USERPROFILE are not set".to_string())
}

/// Default config file: `~/.config/latexsnip/config.json` (platform config dir).
pub fn default_config_path() -> Option<PathBuf> {
    Some(dirs::config_dir()?.join(APP_DIR_NAME).join(CONFIG_FILE_NAME))
}

/// Default render directory: `~/Pictures/latex-renders`.
///
/// Uses the XDG pictures dir when one is configured, `$HOME/Pictures` otherwise.
pub fn default_renders_dir() -> Result<PathBuf, String> {
    let pictures = match dirs::picture_dir() {
        Some(dir) => dir,
        None => get_home_dir()?.join("Pictures"),
    };
    Ok(pictures.join(RENDERS_DIR_NAME))
}

/// Expands a leading `~/` against the home directory. Other paths are returned unchanged.
pub fn expand_tilde(path: &str) -> Result<PathBuf, String> {
    if path == "~" {
        return get_home_dir();
    }
    match path.strip_prefix("~/") {
        Some(rest) => Ok(get_home_dir()?.join(rest)),
        None => Ok(PathBuf::from(path)),
    }
}
