//! Memoizes resolved trees per menu file and implements the write path
//! through per-menu override directories.

pub mod overrides;

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::config::BaseDirs;
use crate::entries::DirCache;
use crate::error::MenuError;
use crate::node::FileRegistry;
use crate::resolver::{self, ResolvedTree};

/// Index of a slot within one [`TreeCache`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SlotId(usize);

#[derive(Debug)]
enum SlotState {
    Empty,
    Loaded(ResolvedTree),
    Failed(MenuError),
}

/// One cached menu file.
#[derive(Debug)]
struct CacheSlot {
    canonical: PathBuf,
    /// Lower-priority system file this user-level file augments.
    chain_to: Option<PathBuf>,
    state: SlotState,
    needs_reload: bool,
}

/// Cache of resolved trees, keyed by canonical menu-file path.
///
/// Relative names are resolved against the configuration-directory search
/// path once and memoized by basename. A slot remembers a failed load and
/// re-raises it until the slot is flagged for reload; a flagged slot is
/// fully re-resolved on its next lookup.
#[derive(Debug, Default)]
pub struct TreeCache {
    slots: Vec<CacheSlot>,
    by_path: HashMap<PathBuf, SlotId>,
    by_name: HashMap<String, SlotId>,
}

impl TreeCache {
    /// An empty cache.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Locate the slot for `name` and make sure it holds a current
    /// resolution.
    ///
    /// Absolute names are looked up directly. A relative name is tried as
    /// `<dir>/menus/<name>` across the configuration directories in
    /// priority order; the first (user-writable) directory is preferred,
    /// chaining to the first existing system file. With `create_user_file`
    /// the user file's parent directory is created so that later writes
    /// have somewhere to land.
    ///
    /// # Errors
    ///
    /// [`MenuError::NotFound`] when no candidate exists,
    /// [`MenuError::Parse`] on a fresh failed load, and
    /// [`MenuError::CachedFailure`] when re-raising a remembered one.
    pub fn lookup(
        &mut self,
        name: &str,
        create_user_file: bool,
        base_dirs: &BaseDirs,
        registry: &mut FileRegistry,
        dir_cache: &mut DirCache,
    ) -> Result<SlotId, MenuError> {
        let slot = self.locate(name, create_user_file, base_dirs)?;
        self.ensure_loaded(slot, base_dirs, registry, dir_cache)?;
        Ok(slot)
    }

    /// The resolved tree held by a loaded slot.
    #[must_use]
    pub fn tree(&self, slot: SlotId) -> Option<&ResolvedTree> {
        match &self.slots[slot.0].state {
            SlotState::Loaded(tree) => Some(tree),
            _ => None,
        }
    }

    /// Canonical path the slot resolves.
    #[must_use]
    pub fn canonical_path(&self, slot: SlotId) -> &Path {
        &self.slots[slot.0].canonical
    }

    /// System file the slot's user-level file augments, if any.
    #[must_use]
    pub fn chain_to(&self, slot: SlotId) -> Option<&Path> {
        self.slots[slot.0].chain_to.as_deref()
    }

    /// Whether the slot will be re-resolved on its next lookup.
    #[must_use]
    pub fn needs_reload(&self, slot: SlotId) -> bool {
        self.slots[slot.0].needs_reload
    }

    /// Flag the slot for re-resolution. The current tree (or remembered
    /// failure) survives until the next lookup.
    pub fn mark_reload(&mut self, slot: SlotId) {
        self.slots[slot.0].needs_reload = true;
    }

    /// Flag every slot for re-resolution on its next lookup. Used when
    /// engine-wide state the resolutions depend on changes, such as the
    /// desktop filter.
    pub fn mark_reload_all(&mut self) {
        for slot in &mut self.slots {
            slot.needs_reload = true;
        }
    }

    /// Flag the slot and additionally drop the parsed file from the
    /// registry so the next resolution re-reads it from disk.
    pub fn invalidate_file(&mut self, slot: SlotId, registry: &mut FileRegistry) {
        let canonical = self.slots[slot.0].canonical.clone();
        registry.forget(&canonical);
        self.mark_reload(slot);
    }

    /// Release every cached tree's entry-cache views and drop the trees.
    /// Slots survive and reload lazily.
    pub fn release_all(&mut self, dir_cache: &mut DirCache) {
        for slot in &mut self.slots {
            if let SlotState::Loaded(tree) = &mut slot.state {
                tree.release(dir_cache);
            }
            slot.state = SlotState::Empty;
        }
    }

    fn locate(
        &mut self,
        name: &str,
        create_user_file: bool,
        base_dirs: &BaseDirs,
    ) -> Result<SlotId, MenuError> {
        if let Some(&slot) = self.by_name.get(name) {
            return Ok(slot);
        }

        let requested = Path::new(name);
        let (canonical, chain_to) = if requested.is_absolute() {
            let canonical = std::fs::canonicalize(requested).map_err(|_| {
                self.remember_missing(name)
            })?;
            (canonical, None)
        } else {
            self.search(name, create_user_file, base_dirs)?
        };

        if let Some(&slot) = self.by_path.get(&canonical) {
            self.by_name.insert(name.to_string(), slot);
            return Ok(slot);
        }

        let slot = SlotId(self.slots.len());
        self.slots.push(CacheSlot {
            canonical: canonical.clone(),
            chain_to,
            state: SlotState::Empty,
            needs_reload: false,
        });
        self.by_path.insert(canonical, slot);
        self.by_name.insert(name.to_string(), slot);
        Ok(slot)
    }

    fn search(
        &mut self,
        name: &str,
        create_user_file: bool,
        base_dirs: &BaseDirs,
    ) -> Result<(PathBuf, Option<PathBuf>), MenuError> {
        let candidates = base_dirs.menu_search_path(name);
        let Some(user) = candidates.first() else {
            return Err(self.remember_missing(name));
        };

        if create_user_file
            && let Some(parent) = user.parent()
            && let Err(e) = std::fs::create_dir_all(parent)
        {
            warn!(path = %parent.display(), error = %e, "cannot create user menu directory");
        }

        let system = candidates[1..]
            .iter()
            .find_map(|c| std::fs::canonicalize(c).ok());

        match std::fs::canonicalize(user) {
            Ok(canonical) => Ok((canonical, system)),
            Err(_) => match system {
                Some(canonical) => Ok((canonical, None)),
                None => Err(self.remember_missing(name)),
            },
        }
    }

    /// Record a failed name lookup so repeats short-circuit, and build the
    /// error to raise now.
    fn remember_missing(&mut self, name: &str) -> MenuError {
        let error = MenuError::NotFound {
            name: name.to_string(),
        };
        let slot = SlotId(self.slots.len());
        self.slots.push(CacheSlot {
            canonical: PathBuf::from(name),
            chain_to: None,
            state: SlotState::Failed(error.clone()),
            needs_reload: false,
        });
        self.by_name.insert(name.to_string(), slot);
        error
    }

    fn ensure_loaded(
        &mut self,
        slot: SlotId,
        base_dirs: &BaseDirs,
        registry: &mut FileRegistry,
        dir_cache: &mut DirCache,
    ) -> Result<(), MenuError> {
        if self.slots[slot.0].needs_reload {
            debug!(path = %self.slots[slot.0].canonical.display(), "reloading flagged slot");
            if let SlotState::Loaded(tree) = &mut self.slots[slot.0].state {
                tree.release(dir_cache);
            }
            self.slots[slot.0].state = SlotState::Empty;
            self.slots[slot.0].needs_reload = false;
        }

        match &self.slots[slot.0].state {
            SlotState::Loaded(_) => Ok(()),
            SlotState::Failed(error) => {
                Err(MenuError::cached(self.slots[slot.0].canonical.clone(), error))
            }
            SlotState::Empty => {
                let canonical = self.slots[slot.0].canonical.clone();
                match resolver::resolve(&canonical, base_dirs, registry, dir_cache) {
                    Ok(tree) => {
                        self.slots[slot.0].state = SlotState::Loaded(tree);
                        Ok(())
                    }
                    Err(error) => {
                        self.slots[slot.0].state = SlotState::Failed(error.clone());
                        Err(error)
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::fixtures::TestLayout;
    use std::fs;

    struct Fixture {
        layout: TestLayout,
        tree_cache: TreeCache,
    }

    impl Fixture {
        fn new() -> Self {
            Self {
                layout: TestLayout::with_search_dirs(),
                tree_cache: TreeCache::new(),
            }
        }

        fn write(&self, relative: &str, content: &str) -> PathBuf {
            self.layout.write(relative, content)
        }

        fn lookup(&mut self, name: &str) -> Result<SlotId, MenuError> {
            self.tree_cache.lookup(
                name,
                false,
                &self.layout.base_dirs,
                &mut self.layout.registry,
                &mut self.layout.dir_cache,
            )
        }
    }

    #[test]
    fn test_relative_lookup_finds_system_file() {
        let mut fx = Fixture::new();
        fx.write(
            "system/menus/apps.menu",
            "<Menu><Name>System</Name></Menu>",
        );
        let slot = fx.lookup("apps.menu").unwrap();
        let tree = fx.tree_cache.tree(slot).unwrap();
        assert_eq!(tree.root().unwrap().name(), "System");
        assert!(fx.tree_cache.chain_to(slot).is_none());
    }

    #[test]
    fn test_user_file_shadows_and_chains_to_system() {
        let mut fx = Fixture::new();
        fx.write(
            "system/menus/apps.menu",
            "<Menu><Name>System</Name></Menu>",
        );
        fx.write("user/menus/apps.menu", "<Menu><Name>User</Name></Menu>");

        let slot = fx.lookup("apps.menu").unwrap();
        let tree = fx.tree_cache.tree(slot).unwrap();
        assert_eq!(tree.root().unwrap().name(), "User");
        assert!(fx.tree_cache.chain_to(slot).is_some());
    }

    #[test]
    fn test_repeat_lookup_hits_same_slot() {
        let mut fx = Fixture::new();
        let path = fx.write(
            "system/menus/apps.menu",
            "<Menu><Name>System</Name></Menu>",
        );
        let by_name = fx.lookup("apps.menu").unwrap();
        let by_path = fx.lookup(path.to_str().unwrap()).unwrap();
        assert_eq!(by_name, by_path);
    }

    #[test]
    fn test_missing_name_failure_is_remembered() {
        let mut fx = Fixture::new();
        assert!(matches!(
            fx.lookup("absent.menu"),
            Err(MenuError::NotFound { .. })
        ));
        // The slot is poisoned: the repeat is the cached form.
        assert!(matches!(
            fx.lookup("absent.menu"),
            Err(MenuError::CachedFailure { .. })
        ));
    }

    #[test]
    fn test_parse_failure_cached_until_reload() {
        let mut fx = Fixture::new();
        let path = fx.write("system/menus/bad.menu", "<Menu><Name>Broken</Menu>");
        assert!(matches!(
            fx.lookup("bad.menu"),
            Err(MenuError::Parse { .. })
        ));
        assert!(matches!(
            fx.lookup("bad.menu"),
            Err(MenuError::CachedFailure { .. })
        ));

        // Fix the file; nothing changes until the slot is flagged.
        fs::write(&path, "<Menu><Name>Fixed</Name></Menu>").unwrap();
        assert!(matches!(
            fx.lookup("bad.menu"),
            Err(MenuError::CachedFailure { .. })
        ));

        let slot = *fx.tree_cache.by_name.get("bad.menu").unwrap();
        fx.tree_cache.invalidate_file(slot, &mut fx.layout.registry);
        let slot = fx.lookup("bad.menu").unwrap();
        assert_eq!(
            fx.tree_cache.tree(slot).unwrap().root().unwrap().name(),
            "Fixed"
        );
    }

    #[test]
    fn test_reload_picks_up_new_content() {
        let mut fx = Fixture::new();
        let path = fx.write(
            "system/menus/apps.menu",
            "<Menu><Name>Before</Name></Menu>",
        );
        let slot = fx.lookup("apps.menu").unwrap();
        assert_eq!(
            fx.tree_cache.tree(slot).unwrap().root().unwrap().name(),
            "Before"
        );

        fs::write(&path, "<Menu><Name>After</Name></Menu>").unwrap();
        fx.tree_cache.invalidate_file(slot, &mut fx.layout.registry);
        let slot = fx.lookup("apps.menu").unwrap();
        assert_eq!(
            fx.tree_cache.tree(slot).unwrap().root().unwrap().name(),
            "After"
        );
    }

    #[test]
    fn test_create_user_file_makes_parent_dir() {
        let mut fx = Fixture::new();
        fx.write(
            "system/menus/apps.menu",
            "<Menu><Name>System</Name></Menu>",
        );
        fx.tree_cache
            .lookup(
                "apps.menu",
                true,
                &fx.layout.base_dirs,
                &mut fx.layout.registry,
                &mut fx.layout.dir_cache,
            )
            .unwrap();
        assert!(fx.layout.root.join("user/menus").is_dir());
    }
}
