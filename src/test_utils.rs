#[cfg(test)]
pub mod fixtures {
    use crate::config::BaseDirs;
    use crate::entries::DirCache;
    use crate::error::MenuError;
    use crate::node::FileRegistry;
    use crate::resolver::{self, ResolvedTree};
    use std::fs;
    use std::path::{Path, PathBuf};
    use tempfile::TempDir;

    /// Temporary filesystem layout plus the component state one
    /// resolution needs.
    pub struct TestLayout {
        pub temp_dir: TempDir,
        pub root: PathBuf,
        pub base_dirs: BaseDirs,
        pub registry: FileRegistry,
        pub dir_cache: DirCache,
    }

    impl TestLayout {
        /// Isolated layout whose search paths point nowhere; menus name
        /// their directories absolutely.
        pub fn new() -> Self {
            let temp_dir = tempfile::tempdir().expect("create temp dir");
            let root = temp_dir.path().to_path_buf();
            Self {
                temp_dir,
                root,
                base_dirs: BaseDirs {
                    data_home: PathBuf::from("/nonexistent"),
                    config_home: PathBuf::from("/nonexistent"),
                    data_dirs: Vec::new(),
                    config_dirs: Vec::new(),
                },
                registry: FileRegistry::new(),
                dir_cache: DirCache::new(),
            }
        }

        /// Layout with `user/` and `system/` wired as the data and config
        /// search roots, user first.
        pub fn with_search_dirs() -> Self {
            let mut layout = Self::new();
            let user = layout.root.join("user");
            let system = layout.root.join("system");
            fs::create_dir_all(system.join("menus")).expect("create system menus dir");
            fs::create_dir_all(&user).expect("create user dir");
            layout.base_dirs = BaseDirs {
                data_home: user.clone(),
                config_home: user.clone(),
                data_dirs: vec![user.clone(), system.clone()],
                config_dirs: vec![user, system],
            };
            layout
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

        /// Resolve a menu file against this layout's state.
        pub fn resolve(&mut self, path: &Path) -> Result<ResolvedTree, MenuError> {
            resolver::resolve(
                path,
                &self.base_dirs,
                &mut self.registry,
                &mut self.dir_cache,
            )
        }
    }
}
