//! Non-destructive menu edits.
//!
//! System menu files are never rewritten. Instead each cached menu gets a
//! per-menu override directory under the user's configuration home; making
//! an entry writable copies its descriptor there, and the pristine parsed
//! tree is spliced in memory with an `AppDir` pointing at the override
//! directory plus an `Include`/`Filename` (or `Exclude`/`Filename` for
//! removals) naming the entry. The next resolution of the menu picks the
//! splice up like any other directive.

use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use super::{SlotId, TreeCache};
use crate::entries::DirCache;
use crate::error::MenuError;
use crate::node::{Directive, FileRegistry, MenuTree, NodeId};

/// Suffix appended to a menu file's stem to name its override directory.
pub const OVERRIDE_SUFFIX: &str = "-edits";

/// Root of the override hierarchy for the menu file at `menu_canonical`:
/// `<config-home>/<stem>-edits`.
#[must_use]
pub fn override_root(config_home: &Path, menu_canonical: &Path) -> PathBuf {
    let stem = menu_canonical
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    config_home.join(format!("{stem}{OVERRIDE_SUFFIX}"))
}

impl TreeCache {
    /// Make `entry_name` under the menu at `menu_path` writable.
    ///
    /// Copies the entry's current backing descriptor (or creates a bare
    /// one) into the menu's override directory, splices the parsed tree so
    /// the copy wins on the next resolution, flags the slot for reload and
    /// invalidates the entry cache for the override directory only.
    /// Returns the path of the writable copy.
    ///
    /// # Errors
    ///
    /// [`MenuError::Override`] when the copy cannot be written or the
    /// parsed tree cannot be edited.
    pub fn add_entry(
        &mut self,
        slot: SlotId,
        menu_path: &str,
        entry_name: &str,
        config_home: &Path,
        registry: &mut FileRegistry,
        dir_cache: &mut DirCache,
    ) -> Result<PathBuf, MenuError> {
        let backing = self
            .tree(slot)
            .and_then(|t| t.get_node(menu_path))
            .and_then(|n| n.entry(entry_name))
            .map(|e| e.absolute_path().to_path_buf());

        let target_dir = self.override_dir_for(slot, menu_path, config_home);
        std::fs::create_dir_all(&target_dir).map_err(|e| MenuError::Override {
            path: target_dir.clone(),
            message: e.to_string(),
        })?;

        let dest = target_dir.join(entry_name);
        if !dest.exists() {
            let written = match &backing {
                Some(src) => std::fs::copy(src, &dest).map(|_| ()),
                None => std::fs::write(&dest, "[Desktop Entry]\nType=Application\n"),
            };
            written.map_err(|e| MenuError::Override {
                path: dest.clone(),
                message: e.to_string(),
            })?;
        }

        self.splice(slot, menu_path, registry, |tree, menu| {
            // Prepended so the override directory shadows the system ones.
            let app_dir = tree.alloc(Directive::AppDir(
                target_dir.to_string_lossy().into_owned(),
            ));
            tree.prepend_child(menu, app_dir);
            let include = tree.alloc(Directive::Include);
            tree.append_child(menu, include);
            let filename = tree.alloc(Directive::Filename(entry_name.to_string()));
            tree.append_child(include, filename);
        })?;

        self.mark_reload(slot);
        dir_cache.invalidate(&target_dir);
        Ok(dest)
    }

    /// Hide `entry_name` from the menu at `menu_path`.
    ///
    /// Splices an `Exclude`/`Filename` into the parsed tree and removes any
    /// override copy of the entry. The system descriptor is untouched.
    ///
    /// # Errors
    ///
    /// [`MenuError::Override`] when the parsed tree cannot be edited.
    pub fn remove_entry(
        &mut self,
        slot: SlotId,
        menu_path: &str,
        entry_name: &str,
        config_home: &Path,
        registry: &mut FileRegistry,
        dir_cache: &mut DirCache,
    ) -> Result<(), MenuError> {
        self.splice(slot, menu_path, registry, |tree, menu| {
            let exclude = tree.alloc(Directive::Exclude);
            tree.append_child(menu, exclude);
            let filename = tree.alloc(Directive::Filename(entry_name.to_string()));
            tree.append_child(exclude, filename);
        })?;

        let target_dir = self.override_dir_for(slot, menu_path, config_home);
        let copy = target_dir.join(entry_name);
        if copy.exists() {
            if let Err(e) = std::fs::remove_file(&copy) {
                warn!(path = %copy.display(), error = %e, "cannot remove override copy");
            }
            dir_cache.invalidate(&target_dir);
        }

        self.mark_reload(slot);
        Ok(())
    }

    fn override_dir_for(&self, slot: SlotId, menu_path: &str, config_home: &Path) -> PathBuf {
        let mut dir = override_root(config_home, self.canonical_path(slot));
        for part in menu_path.split('/').filter(|p| !p.is_empty()) {
            dir.push(part);
        }
        dir
    }

    /// Edit the pristine parsed tree of a slot's menu file, applying `edit`
    /// to the menu node at `menu_path` (created when absent).
    fn splice(
        &mut self,
        slot: SlotId,
        menu_path: &str,
        registry: &mut FileRegistry,
        edit: impl FnOnce(&mut MenuTree, NodeId),
    ) -> Result<(), MenuError> {
        let canonical = self.canonical_path(slot).to_path_buf();
        if registry.edit(&canonical).is_none() {
            debug!(path = %canonical.display(), "loading menu file for override edit");
            registry.load(&canonical)?;
        }
        let Some(tree) = registry.edit(&canonical) else {
            return Err(MenuError::Override {
                path: canonical,
                message: "menu file is not loadable".to_string(),
            });
        };
        let Some(menu) = ensure_menu_path(tree, menu_path) else {
            return Err(MenuError::Override {
                path: canonical,
                message: "menu file has no top-level menu".to_string(),
            });
        };
        edit(tree, menu);
        Ok(())
    }
}

/// Walk `menu_path` below the top menu, creating named sub-menus as
/// needed. `None` when the file has no top-level menu at all.
fn ensure_menu_path(tree: &mut MenuTree, menu_path: &str) -> Option<NodeId> {
    let mut current = tree.top_menu()?;
    for part in menu_path.split('/').filter(|p| !p.is_empty()) {
        let found = tree.children(current).iter().copied().find(|&c| {
            matches!(tree.directive(c), Directive::Menu) && tree.menu_name(c) == Some(part)
        });
        current = match found {
            Some(menu) => menu,
            None => {
                let menu = tree.alloc(Directive::Menu);
                tree.append_child(current, menu);
                let name = tree.alloc(Directive::Name(part.to_string()));
                tree.append_child(menu, name);
                menu
            }
        };
    }
    Some(current)
}
