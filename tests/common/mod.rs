//! Shared fixture: a temporary XDG-like layout with user and system
//! directories, plus an engine wired to it.

use std::fs;
use std::path::PathBuf;

use menutree::{BaseDirs, EngineConfig, MenuEngine};
use tempfile::TempDir;

pub struct TestMenus {
    _tmp: TempDir,
    pub root: PathBuf,
    pub engine: MenuEngine,
}

/// Route engine logs through `RUST_LOG` when a test needs them.
pub fn init_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();
}

impl TestMenus {
    /// A layout with `user/` and `system/` config and data roots; the
    /// engine searches user first.
    pub fn new() -> Self {
        Self::with_config(EngineConfig::default())
    }

    pub fn with_config(config: EngineConfig) -> Self {
        init_logging();
        let tmp = tempfile::tempdir().expect("create temp dir");
        let root = tmp.path().to_path_buf();
        let user = root.join("user");
        let system = root.join("system");
        fs::create_dir_all(user.join("menus")).expect("create user menus dir");
        fs::create_dir_all(system.join("menus")).expect("create system menus dir");

        let base_dirs = BaseDirs {
            data_home: user.clone(),
            config_home: user.clone(),
            data_dirs: vec![user.clone(), system.clone()],
            config_dirs: vec![user, system],
        };
        Self {
            _tmp: tmp,
            root,
            engine: MenuEngine::with_dirs(config, base_dirs),
        }
    }

    /// Write a file below the layout root, creating parents.
    pub fn write(&self, relative: &str, content: &str) -> PathBuf {
        let path = self.root.join(relative);
        fs::create_dir_all(path.parent().expect("file has a parent"))
            .expect("create parent dirs");
        fs::write(&path, content).expect("write fixture file");
        path
    }

    /// Write an application descriptor below the layout root.
    pub fn desktop(&self, relative: &str, categories: &str) -> PathBuf {
        self.write(
            relative,
            &format!("[Desktop Entry]\nType=Application\nCategories={categories}\n"),
        )
    }

    /// Write a system-level menu file and return its basename for lookup.
    pub fn system_menu(&self, name: &str, body: &str) -> String {
        self.write(&format!("system/menus/{name}"), body);
        name.to_string()
    }

    /// Absolute path of a directory below the layout root, as menu-file
    /// text.
    pub fn abs(&self, relative: &str) -> String {
        self.root.join(relative).display().to_string()
    }
}
