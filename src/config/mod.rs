use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::env;
use std::io::Write;
use std::path::{Path, PathBuf};

/// Subdirectory of each data dir scanned for application descriptors.
pub const APPLICATIONS_SUBDIR: &str = "applications";

/// Subdirectory of each data dir scanned for directory descriptors.
pub const DESKTOP_DIRECTORIES_SUBDIR: &str = "desktop-directories";

/// Subdirectory of each data dir holding pre-XDG legacy menu hierarchies.
pub const LEGACY_SUBDIR: &str = "applnk";

/// Subdirectory of each config dir holding menu files.
pub const MENUS_SUBDIR: &str = "menus";

/// Suffix of the per-menu merge directory expanded by `DefaultMergeDirs`.
pub const MERGED_SUFFIX: &str = "-merged";

/// Engine settings loadable from a TOML file.
///
/// Everything here is optional; an empty config plus the process
/// environment gives standard XDG behavior.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct EngineConfig {
    /// Desktop name matched against `OnlyShowIn` when scanning descriptors.
    /// `None` disables the filter.
    #[serde(default)]
    pub desktop_name: Option<String>,

    /// Extra data directories appended after the XDG search path.
    #[serde(default)]
    pub extra_data_dirs: Vec<PathBuf>,

    /// Extra configuration directories appended after the XDG search path.
    #[serde(default)]
    pub extra_config_dirs: Vec<PathBuf>,
}

impl EngineConfig {
    /// Load configuration from a file, creating a default one if absent.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, written, or parsed.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            let config = Self::default();
            config.save(path)?;
            return Ok(config);
        }

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        toml::from_str(&content)
            .with_context(|| format!("Invalid config file: {}", path.display()))
    }

    /// Save configuration to a file.
    ///
    /// # Errors
    ///
    /// Returns an error if the parent directory cannot be created or the
    /// file cannot be written.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let toml_str = toml::to_string_pretty(self)?;
        let mut file = std::fs::File::create(path)?;
        file.write_all(toml_str.as_bytes())?;
        Ok(())
    }
}

/// Resolved XDG base-directory search paths.
///
/// `data_dirs` and `config_dirs` include the respective home directory as
/// their first element, so iterating either list visits locations in
/// priority order (user first).
#[derive(Debug, Clone)]
pub struct BaseDirs {
    /// `$XDG_DATA_HOME` or `~/.local/share`.
    pub data_home: PathBuf,
    /// `$XDG_CONFIG_HOME` or `~/.config`.
    pub config_home: PathBuf,
    /// `data_home` followed by `$XDG_DATA_DIRS` (default
    /// `/usr/local/share:/usr/share`).
    pub data_dirs: Vec<PathBuf>,
    /// `config_home` followed by `$XDG_CONFIG_DIRS` (default `/etc/xdg`).
    pub config_dirs: Vec<PathBuf>,
}

impl BaseDirs {
    /// Read the XDG environment, falling back to the built-in defaults.
    #[must_use]
    pub fn from_env(config: &EngineConfig) -> Self {
        let home = dirs::home_dir().unwrap_or_else(|| PathBuf::from("/tmp"));

        let data_home =
            env_path("XDG_DATA_HOME").unwrap_or_else(|| home.join(".local").join("share"));
        let config_home = env_path("XDG_CONFIG_HOME").unwrap_or_else(|| home.join(".config"));

        let mut data_dirs = vec![data_home.clone()];
        data_dirs.extend(split_search_path(
            env::var("XDG_DATA_DIRS").ok().as_deref(),
            "/usr/local/share:/usr/share",
        ));
        data_dirs.extend(config.extra_data_dirs.iter().cloned());

        let mut config_dirs = vec![config_home.clone()];
        config_dirs.extend(split_search_path(
            env::var("XDG_CONFIG_DIRS").ok().as_deref(),
            "/etc/xdg",
        ));
        config_dirs.extend(config.extra_config_dirs.iter().cloned());

        Self {
            data_home,
            config_home,
            data_dirs,
            config_dirs,
        }
    }

    /// Application-descriptor directories, priority order.
    #[must_use]
    pub fn app_dirs(&self) -> Vec<PathBuf> {
        self.data_dirs
            .iter()
            .map(|d| d.join(APPLICATIONS_SUBDIR))
            .collect()
    }

    /// Directory-descriptor directories, priority order.
    #[must_use]
    pub fn directory_dirs(&self) -> Vec<PathBuf> {
        self.data_dirs
            .iter()
            .map(|d| d.join(DESKTOP_DIRECTORIES_SUBDIR))
            .collect()
    }

    /// Legacy menu hierarchies, priority order.
    #[must_use]
    pub fn legacy_dirs(&self) -> Vec<PathBuf> {
        self.data_dirs.iter().map(|d| d.join(LEGACY_SUBDIR)).collect()
    }

    /// Per-menu merge directories for `DefaultMergeDirs`.
    ///
    /// `menu_basename` is the menu file basename without its suffix, e.g.
    /// `applications` for `applications.menu`.
    #[must_use]
    pub fn merge_dirs(&self, menu_basename: &str) -> Vec<PathBuf> {
        self.config_dirs
            .iter()
            .map(|d| {
                d.join(MENUS_SUBDIR)
                    .join(format!("{menu_basename}{MERGED_SUFFIX}"))
            })
            .collect()
    }

    /// Candidate locations for a relative menu-file name, priority order.
    #[must_use]
    pub fn menu_search_path(&self, name: &str) -> Vec<PathBuf> {
        self.config_dirs
            .iter()
            .map(|d| d.join(MENUS_SUBDIR).join(name))
            .collect()
    }
}

fn env_path(var: &str) -> Option<PathBuf> {
    match env::var(var) {
        Ok(v) if !v.is_empty() => Some(PathBuf::from(v)),
        _ => None,
    }
}

/// Split a colon-separated search path, dropping empty segments.
fn split_search_path(value: Option<&str>, default: &str) -> Vec<PathBuf> {
    let raw = match value {
        Some(v) if !v.is_empty() => v,
        _ => default,
    };
    raw.split(':')
        .filter(|s| !s.is_empty())
        .map(PathBuf::from)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_search_path_drops_empty_segments() {
        let dirs = split_search_path(Some("/a::/b:"), "/unused");
        assert_eq!(dirs, vec![PathBuf::from("/a"), PathBuf::from("/b")]);
    }

    #[test]
    fn test_split_search_path_uses_default_when_unset() {
        let dirs = split_search_path(None, "/usr/local/share:/usr/share");
        assert_eq!(
            dirs,
            vec![
                PathBuf::from("/usr/local/share"),
                PathBuf::from("/usr/share")
            ]
        );
    }

    #[test]
    fn test_empty_env_value_falls_back_to_default() {
        let dirs = split_search_path(Some(""), "/etc/xdg");
        assert_eq!(dirs, vec![PathBuf::from("/etc/xdg")]);
    }

    #[test]
    fn test_merge_dirs_use_menu_basename() {
        let config = EngineConfig::default();
        let mut base = BaseDirs::from_env(&config);
        base.config_dirs = vec![PathBuf::from("/etc/xdg")];

        let merged = base.merge_dirs("applications");
        assert_eq!(
            merged,
            vec![PathBuf::from("/etc/xdg/menus/applications-merged")]
        );
    }

    #[test]
    fn test_config_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("engine.toml");

        let config = EngineConfig {
            desktop_name: Some("GNOME".to_string()),
            extra_data_dirs: vec![PathBuf::from("/opt/share")],
            extra_config_dirs: Vec::new(),
        };
        config.save(&path).unwrap();

        let loaded = EngineConfig::load(&path).unwrap();
        assert_eq!(loaded.desktop_name.as_deref(), Some("GNOME"));
        assert_eq!(loaded.extra_data_dirs, vec![PathBuf::from("/opt/share")]);
    }
}
