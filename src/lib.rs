//! XDG menu resolution engine.
//!
//! Resolves hierarchical, mergeable menu definitions (directive files that
//! name descriptor directories, include/exclude filter rules and nested
//! sub-menus spread across multiple files) into one concrete tree of
//! categorized application entries, and keeps that tree cheaply
//! re-derivable as the underlying files change.
//!
//! The moving parts, leaves first:
//!
//! - [`node`]: the arena-backed directive tree plus the menu-file loader
//!   and the registry that shares parsed roots between resolutions.
//! - [`entries`]: the filesystem-backed entry cache with reference-counted
//!   retention and prioritized, shadowing search lists.
//! - [`resolver`]: file splicing, deduplication, rule evaluation and
//!   allocation tracking, producing a [`resolver::ResolvedTree`]; plus
//!   structural diffing of two resolved trees.
//! - [`cache`]: the per-file tree cache with lazy reload, remembered
//!   failures and the non-destructive override write path.
//!
//! [`MenuEngine`] bundles the above into one session with its own
//! lifecycle; independent engines share nothing, which keeps tests
//! isolated.
//!
//! ```no_run
//! use menutree::MenuEngine;
//!
//! let mut engine = MenuEngine::new();
//! let slot = engine.resolve("applications.menu")?;
//! if let Some(tree) = engine.tree(slot) {
//!     tree.for_each("", &mut |path, node| {
//!         println!("{path}: {} entries", node.entries().len());
//!     });
//! }
//! # Ok::<(), menutree::MenuError>(())
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

/// Engine settings and XDG base-directory search paths.
pub mod config;
/// Descriptor discovery and the reference-counted directory cache.
pub mod entries;
/// Error types surfaced by the engine.
pub mod error;
/// Directive trees, the menu-file loader and the parsed-file registry.
pub mod node;
/// Splicing, deduplication, rule evaluation and diffing.
pub mod resolver;

/// Resolved-tree caching and override-based writes.
pub mod cache;

#[cfg(test)]
mod test_utils;

pub use cache::{SlotId, TreeCache};
pub use config::{BaseDirs, EngineConfig};
pub use entries::{DirCache, Entry, EntryKind, EntryRef};
pub use error::MenuError;
pub use node::{Directive, MenuFileLoader, MenuTree};
pub use resolver::diff::{diff, Change, ChangeKind};
pub use resolver::{ResolvedNode, ResolvedTree};

use std::path::{Path, PathBuf};

use node::FileRegistry;

/// One menu resolution session.
///
/// Owns the parsed-file registry, the entry cache and the tree cache; all
/// public operations run to completion on the calling thread. Wrap the
/// engine in a mutex when sharing it across threads.
#[derive(Debug)]
pub struct MenuEngine {
    config: EngineConfig,
    base_dirs: BaseDirs,
    registry: FileRegistry,
    dir_cache: DirCache,
    tree_cache: TreeCache,
}

impl MenuEngine {
    /// An engine using the process environment and default settings.
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(EngineConfig::default())
    }

    /// An engine using `config` on top of the process environment.
    #[must_use]
    pub fn with_config(config: EngineConfig) -> Self {
        let base_dirs = BaseDirs::from_env(&config);
        Self::with_dirs(config, base_dirs)
    }

    /// An engine with fully explicit search paths, bypassing the
    /// environment.
    #[must_use]
    pub fn with_dirs(config: EngineConfig, base_dirs: BaseDirs) -> Self {
        let mut dir_cache = DirCache::new();
        dir_cache.set_only_show_in(config.desktop_name.as_deref());
        Self {
            config,
            base_dirs,
            registry: FileRegistry::new(),
            dir_cache,
            tree_cache: TreeCache::new(),
        }
    }

    /// The active settings.
    #[must_use]
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// The resolved search paths.
    #[must_use]
    pub fn base_dirs(&self) -> &BaseDirs {
        &self.base_dirs
    }

    /// Resolve the menu file `name` (absolute path or a basename searched
    /// on the configuration path), reusing a cached resolution when one is
    /// current.
    ///
    /// # Errors
    ///
    /// Propagates [`MenuError::NotFound`], [`MenuError::Parse`] and
    /// re-raised [`MenuError::CachedFailure`] from the tree cache.
    pub fn resolve(&mut self, name: &str) -> Result<SlotId, MenuError> {
        self.tree_cache.lookup(
            name,
            false,
            &self.base_dirs,
            &mut self.registry,
            &mut self.dir_cache,
        )
    }

    /// Like [`MenuEngine::resolve`], with a one-off desktop filter matched
    /// against `OnlyShowIn`. Changing the filter flushes cached scans and
    /// flags every cached tree for re-resolution.
    ///
    /// # Errors
    ///
    /// Same as [`MenuEngine::resolve`].
    pub fn resolve_with_filter(
        &mut self,
        name: &str,
        desktop: Option<&str>,
    ) -> Result<SlotId, MenuError> {
        if self.dir_cache.set_only_show_in(desktop) {
            self.tree_cache.mark_reload_all();
        }
        self.resolve(name)
    }

    /// The current resolved tree of a slot, if its last load succeeded.
    #[must_use]
    pub fn tree(&self, slot: SlotId) -> Option<&ResolvedTree> {
        self.tree_cache.tree(slot)
    }

    /// Forget cached scans below `directory` and flag the slot so its next
    /// [`MenuEngine::resolve`] re-derives the tree.
    pub fn invalidate(&mut self, slot: SlotId, directory: &Path) {
        self.dir_cache.invalidate(directory);
        self.tree_cache.mark_reload(slot);
    }

    /// Drop the slot's parsed menu file so the next resolution re-reads it
    /// from disk.
    pub fn invalidate_file(&mut self, slot: SlotId) {
        self.tree_cache.invalidate_file(slot, &mut self.registry);
    }

    /// Make an entry writable through the menu's override directory.
    /// Returns the path of the writable descriptor copy.
    ///
    /// # Errors
    ///
    /// [`MenuError::Override`] when the copy cannot be written.
    pub fn add_entry(
        &mut self,
        slot: SlotId,
        menu_path: &str,
        entry_name: &str,
    ) -> Result<PathBuf, MenuError> {
        self.tree_cache.add_entry(
            slot,
            menu_path,
            entry_name,
            &self.base_dirs.config_home,
            &mut self.registry,
            &mut self.dir_cache,
        )
    }

    /// Hide an entry from a menu without touching system files.
    ///
    /// # Errors
    ///
    /// [`MenuError::Override`] when the parsed tree cannot be edited.
    pub fn remove_entry(
        &mut self,
        slot: SlotId,
        menu_path: &str,
        entry_name: &str,
    ) -> Result<(), MenuError> {
        self.tree_cache.remove_entry(
            slot,
            menu_path,
            entry_name,
            &self.base_dirs.config_home,
            &mut self.registry,
            &mut self.dir_cache,
        )
    }

    /// Free every cached directory subtree no resolved tree references
    /// anymore.
    pub fn evict_unused(&mut self) {
        self.dir_cache.evict_unused();
    }

    /// Tear the session down: release every cached tree's entry-cache
    /// views and free the scan cache.
    pub fn close(mut self) {
        self.tree_cache.release_all(&mut self.dir_cache);
        self.dir_cache.evict_unused();
    }
}

impl Default for MenuEngine {
    fn default() -> Self {
        Self::new()
    }
}
