/// Minimal descriptor value reader used during scans.
mod desktop;

use std::collections::HashMap;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, trace, warn};
use walkdir::WalkDir;

/// Suffix of application descriptors.
pub const APPLICATION_SUFFIX: &str = ".desktop";

/// Suffix of directory descriptors.
pub const DIRECTORY_SUFFIX: &str = ".directory";

/// Synthetic category injected for entries found under a legacy hierarchy.
pub const LEGACY_CATEGORY: &str = "Legacy";

/// What kind of descriptor an [`Entry`] was created from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    /// An application (`.desktop`) descriptor.
    Application,
    /// A directory (`.directory`) descriptor.
    Directory,
}

/// One descriptor found on disk. Immutable after creation and shared
/// (`Arc`) between the raw cache slot and any derived views.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    relative_path: String,
    absolute_path: PathBuf,
    categories: Vec<String>,
    kind: EntryKind,
}

/// Shared handle to an [`Entry`].
pub type EntryRef = Arc<Entry>;

impl Entry {
    /// Create an entry; used by scans and by tests building fixtures.
    #[must_use]
    pub fn new(
        kind: EntryKind,
        relative_path: impl Into<String>,
        absolute_path: impl Into<PathBuf>,
        categories: Vec<String>,
    ) -> Self {
        Self {
            relative_path: relative_path.into(),
            absolute_path: absolute_path.into(),
            categories,
            kind,
        }
    }

    /// Basename used as the menu key.
    #[must_use]
    pub fn relative_path(&self) -> &str {
        &self.relative_path
    }

    /// Real filesystem path of the descriptor.
    #[must_use]
    pub fn absolute_path(&self) -> &Path {
        &self.absolute_path
    }

    /// Ordered category list, possibly empty.
    #[must_use]
    pub fn categories(&self) -> &[String] {
        &self.categories
    }

    /// Descriptor kind.
    #[must_use]
    pub const fn kind(&self) -> EntryKind {
        self.kind
    }

    /// Whether the category list contains `category`.
    #[must_use]
    pub fn has_category(&self, category: &str) -> bool {
        self.categories.iter().any(|c| c == category)
    }

    /// A copy with one extra category appended.
    #[must_use]
    fn with_extra_category(&self, category: &str) -> Self {
        let mut copy = self.clone();
        copy.categories.push(category.to_string());
        copy
    }
}

/// Index of a cached directory within one [`DirCache`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DirId(usize);

#[derive(Debug)]
struct CachedDir {
    name: String,
    parent: Option<DirId>,
    subdirs: Vec<DirId>,
    entries: Vec<EntryRef>,
    scanned: bool,
    /// Live references held on this node plus all its descendants.
    use_count: usize,
    live: bool,
}

/// Cache of scanned descriptor directories.
///
/// One instance per engine anchors every [`CachedDir`] under a single root;
/// path components are created lazily on first traversal, populated by a
/// recursive scan on first load, and refreshed only on explicit
/// invalidation. Subtrees are freed by [`DirCache::evict_unused`] once their
/// `use_count` drops to zero.
#[derive(Debug)]
pub struct DirCache {
    dirs: Vec<CachedDir>,
    root: DirId,
    only_show_in: Option<String>,
}

impl DirCache {
    /// An empty cache with no desktop filter.
    #[must_use]
    pub fn new() -> Self {
        let root = CachedDir {
            name: "/".to_string(),
            parent: None,
            subdirs: Vec::new(),
            entries: Vec::new(),
            scanned: false,
            use_count: 0,
            live: true,
        };
        Self {
            dirs: vec![root],
            root: DirId(0),
            only_show_in: None,
        }
    }

    /// Set the desktop name matched against `OnlyShowIn`. Returns whether
    /// the filter actually changed.
    ///
    /// Scan results depend on the filter, so changing it throws away every
    /// cached scan (nodes and use counts survive; contents are re-read on
    /// next load). Callers holding resolved trees must re-derive them.
    pub fn set_only_show_in(&mut self, name: Option<&str>) -> bool {
        if self.only_show_in.as_deref() == name {
            return false;
        }
        debug!(?name, "desktop filter changed, flushing cached scans");
        self.only_show_in = name.map(str::to_string);
        self.clear_scans(self.root);
        true
    }

    /// Ensure every component of `canonical` exists as a cached node and
    /// scan the directory if it has not been scanned yet.
    pub fn load(&mut self, canonical: &Path) -> DirId {
        let id = self.ensure(canonical);
        self.scan(id);
        id
    }

    /// Open a retained, flagged view of one directory subtree.
    ///
    /// Returns `None` when the path cannot be canonicalized (typically: it
    /// does not exist); a missing descriptor directory is routine, not an
    /// error.
    pub fn open_directory(&mut self, path: &Path, flags: DirFlags) -> Option<EntryDirectory> {
        let canonical = match std::fs::canonicalize(path) {
            Ok(c) => c,
            Err(e) => {
                debug!(path = %path.display(), error = %e, "skipping unloadable entry directory");
                return None;
            }
        };
        let dir = self.load(&canonical);
        self.acquire(dir);
        Some(EntryDirectory {
            dir,
            path: canonical,
            flags,
        })
    }

    /// Release the reference a view holds. The inverse of the acquire done
    /// by [`DirCache::open_directory`].
    pub fn release(&mut self, directory: &EntryDirectory) {
        let removed = self.mark_unused_recursive(directory.dir);
        let mut iter = self.dirs[directory.dir.0].parent;
        while let Some(p) = iter {
            self.dirs[p.0].use_count = self.dirs[p.0].use_count.saturating_sub(removed);
            iter = self.dirs[p.0].parent;
        }
    }

    /// Release every view held by a search list.
    pub fn release_list(&mut self, list: &EntryDirectoryList) {
        for directory in &list.dirs {
            self.release(directory);
        }
    }

    /// Free every subtree whose `use_count` reached zero.
    ///
    /// Depth-first: a node is only freed after all of its surviving
    /// children were evaluated, so a deeper sibling that still holds count
    /// keeps its ancestors alive.
    pub fn evict_unused(&mut self) {
        self.evict_children(self.root);
    }

    /// Forget the scan results for `path`'s subtree (if cached), so only
    /// that portion is re-read on next access. Nodes and use counts are
    /// kept; entry lists are dropped.
    pub fn invalidate(&mut self, path: &Path) {
        let canonical = std::fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf());
        if let Some(id) = self.find(&canonical) {
            trace!(path = %canonical.display(), "invalidating cached scans");
            self.clear_scans(id);
        }
    }

    /// Walk `relative` component-wise below `dir`; the final component is
    /// matched against that directory's entry list, not as a subdirectory.
    #[must_use]
    pub fn find_entry(&self, dir: DirId, relative: &str) -> Option<&EntryRef> {
        let mut current = dir;
        let mut parts = relative.split('/').filter(|p| !p.is_empty()).peekable();
        while let Some(part) = parts.next() {
            if parts.peek().is_none() {
                return self.dirs[current.0]
                    .entries
                    .iter()
                    .find(|e| e.relative_path == part);
            }
            current = self.find_child(current, part)?;
        }
        None
    }

    /// Current use count of a node; exposed for the lifetime invariants.
    #[must_use]
    pub fn use_count(&self, dir: DirId) -> usize {
        self.dirs[dir.0].use_count
    }

    /// Whether a node has been evicted.
    #[must_use]
    pub fn is_live(&self, dir: DirId) -> bool {
        self.dirs[dir.0].live
    }

    fn ensure(&mut self, canonical: &Path) -> DirId {
        let mut current = self.root;
        for component in canonical.components() {
            if let Component::Normal(name) = component {
                let name = name.to_string_lossy().into_owned();
                current = self.find_or_create_child(current, &name);
            }
        }
        current
    }

    fn find(&self, canonical: &Path) -> Option<DirId> {
        let mut current = self.root;
        for component in canonical.components() {
            if let Component::Normal(name) = component {
                current = self.find_child(current, &name.to_string_lossy())?;
            }
        }
        Some(current)
    }

    fn find_child(&self, dir: DirId, name: &str) -> Option<DirId> {
        self.dirs[dir.0]
            .subdirs
            .iter()
            .copied()
            .find(|&c| self.dirs[c.0].name == name)
    }

    fn find_or_create_child(&mut self, dir: DirId, name: &str) -> DirId {
        if let Some(existing) = self.find_child(dir, name) {
            return existing;
        }
        let id = DirId(self.dirs.len());
        self.dirs.push(CachedDir {
            name: name.to_string(),
            parent: Some(dir),
            subdirs: Vec::new(),
            entries: Vec::new(),
            scanned: false,
            use_count: 0,
            live: true,
        });
        self.dirs[dir.0].subdirs.push(id);
        id
    }

    fn full_path(&self, dir: DirId) -> PathBuf {
        let mut names = Vec::new();
        let mut iter = Some(dir);
        while let Some(id) = iter {
            if self.dirs[id.0].parent.is_some() {
                names.push(self.dirs[id.0].name.clone());
            }
            iter = self.dirs[id.0].parent;
        }
        let mut path = PathBuf::from("/");
        for name in names.into_iter().rev() {
            path.push(name);
        }
        path
    }

    fn ensure_under(&mut self, base: DirId, relative: &Path) -> DirId {
        let mut current = base;
        for component in relative.components() {
            if let Component::Normal(name) = component {
                let name = name.to_string_lossy().into_owned();
                current = self.find_or_create_child(current, &name);
            }
        }
        current
    }

    fn scan(&mut self, id: DirId) {
        if self.dirs[id.0].scanned {
            return;
        }
        let path = self.full_path(id);
        trace!(path = %path.display(), "scanning entry directory");

        // Throw away anything stale before repopulating.
        self.clear_scans(id);

        for item in WalkDir::new(&path).min_depth(1).follow_links(false) {
            let item = match item {
                Ok(item) => item,
                Err(e) => {
                    // Unreadable directories degrade to an empty scan.
                    debug!(path = %path.display(), error = %e, "ignoring unreadable path");
                    continue;
                }
            };
            let Ok(relative) = item.path().strip_prefix(&path) else {
                continue;
            };
            if item.file_type().is_dir() {
                self.ensure_under(id, relative);
                continue;
            }
            if !item.file_type().is_file() {
                continue;
            }
            let Some(name) = item.file_name().to_str() else {
                warn!(path = %item.path().display(), "skipping non-UTF-8 descriptor name");
                continue;
            };
            let entry = if name.ends_with(APPLICATION_SUFFIX) {
                self.new_application_entry(item.path(), name)
            } else if name.ends_with(DIRECTORY_SUFFIX) {
                Some(Entry::new(
                    EntryKind::Directory,
                    name,
                    item.path(),
                    Vec::new(),
                ))
            } else {
                None
            };
            if let Some(entry) = entry {
                let parent_rel = relative.parent().unwrap_or_else(|| Path::new(""));
                let parent = self.ensure_under(id, parent_rel);
                self.dirs[parent.0].entries.push(Arc::new(entry));
            }
        }

        self.mark_scanned(id);
    }

    fn new_application_entry(&self, path: &Path, basename: &str) -> Option<Entry> {
        let values = desktop::read_desktop_values(path)?;

        if let (Some(filter), Some(only_show_in)) = (&self.only_show_in, &values.only_show_in)
            && !only_show_in.iter().any(|n| n == filter)
        {
            debug!(path = %path.display(), filter, "filtered out by OnlyShowIn");
            return None;
        }

        Some(Entry::new(
            EntryKind::Application,
            basename,
            path,
            values.categories.unwrap_or_default(),
        ))
    }

    fn clear_scans(&mut self, id: DirId) {
        self.dirs[id.0].entries.clear();
        self.dirs[id.0].scanned = false;
        let children = self.dirs[id.0].subdirs.clone();
        for child in children {
            self.clear_scans(child);
        }
    }

    fn mark_scanned(&mut self, id: DirId) {
        self.dirs[id.0].scanned = true;
        let children = self.dirs[id.0].subdirs.clone();
        for child in children {
            self.mark_scanned(child);
        }
    }

    fn acquire(&mut self, id: DirId) {
        let added = self.mark_used_recursive(id);
        let mut iter = self.dirs[id.0].parent;
        while let Some(p) = iter {
            self.dirs[p.0].use_count += added;
            iter = self.dirs[p.0].parent;
        }
    }

    fn mark_used_recursive(&mut self, id: DirId) -> usize {
        let mut added = 0;
        let children = self.dirs[id.0].subdirs.clone();
        for child in children {
            added += self.mark_used_recursive(child);
        }
        self.dirs[id.0].use_count += added + 1;
        added + 1
    }

    /// Inverse of `mark_used_recursive`. Counts only what it actually
    /// decremented: nodes created by a rescan after the acquire start at
    /// zero and must not drive the count negative.
    fn mark_unused_recursive(&mut self, id: DirId) -> usize {
        let mut removed = 0;
        let children = self.dirs[id.0].subdirs.clone();
        for child in children {
            removed += self.mark_unused_recursive(child);
        }
        let own = usize::from(self.dirs[id.0].use_count > removed);
        self.dirs[id.0].use_count = self.dirs[id.0].use_count.saturating_sub(removed + own);
        removed + own
    }

    fn evict_children(&mut self, id: DirId) {
        let children = self.dirs[id.0].subdirs.clone();
        for child in children {
            if self.dirs[child.0].use_count == 0 {
                self.free_subtree(child);
                let pos = self.dirs[id.0].subdirs.iter().position(|&c| c == child);
                if let Some(pos) = pos {
                    self.dirs[id.0].subdirs.remove(pos);
                }
            } else {
                self.evict_children(child);
            }
        }
    }

    fn free_subtree(&mut self, id: DirId) {
        trace!(name = %self.dirs[id.0].name, "evicting cached dir");
        self.dirs[id.0].live = false;
        self.dirs[id.0].entries.clear();
        self.dirs[id.0].scanned = false;
        let children = std::mem::take(&mut self.dirs[id.0].subdirs);
        for child in children {
            self.free_subtree(child);
        }
    }

    fn collect_entries(
        &self,
        dir: DirId,
        prefix: &str,
        out: &mut Vec<(String, EntryRef)>,
    ) {
        for entry in &self.dirs[dir.0].entries {
            let key = if prefix.is_empty() {
                entry.relative_path.clone()
            } else {
                format!("{prefix}/{}", entry.relative_path)
            };
            out.push((key, Arc::clone(entry)));
        }
        for &child in &self.dirs[dir.0].subdirs {
            let sub_prefix = if prefix.is_empty() {
                self.dirs[child.0].name.clone()
            } else {
                format!("{prefix}/{}", self.dirs[child.0].name)
            };
            self.collect_entries(child, &sub_prefix, out);
        }
    }
}

impl Default for DirCache {
    fn default() -> Self {
        Self::new()
    }
}

/// What an [`EntryDirectory`] view exposes from its backing subtree.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DirFlags {
    /// Expose application descriptors.
    pub desktops: bool,
    /// Expose directory descriptors.
    pub directories: bool,
    /// Inject the synthetic `Legacy` category into exposed applications.
    pub legacy: bool,
}

impl DirFlags {
    /// Plain application directory.
    pub const APPLICATIONS: Self = Self {
        desktops: true,
        directories: false,
        legacy: false,
    };
    /// Plain directory-descriptor directory.
    pub const DIRECTORIES: Self = Self {
        desktops: false,
        directories: true,
        legacy: false,
    };
    /// Legacy hierarchy: both descriptor kinds, `Legacy` injected.
    pub const LEGACY: Self = Self {
        desktops: true,
        directories: true,
        legacy: true,
    };
}

/// A retained, flagged view of one cached directory subtree.
///
/// Holding the view keeps the backing subtree's `use_count` positive; it
/// must be handed back through [`DirCache::release`] (or
/// [`DirCache::release_list`]) when done.
#[derive(Debug)]
pub struct EntryDirectory {
    dir: DirId,
    path: PathBuf,
    flags: DirFlags,
}

impl EntryDirectory {
    /// Canonical path of the backing directory.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// View flags.
    #[must_use]
    pub const fn flags(&self) -> DirFlags {
        self.flags
    }

    /// Backing cached-dir id; exposed for lifetime assertions in tests.
    #[must_use]
    pub const fn dir_id(&self) -> DirId {
        self.dir
    }

    /// Look up an application descriptor by relative path.
    #[must_use]
    pub fn get_desktop(&self, cache: &DirCache, relative: &str) -> Option<EntryRef> {
        if !self.flags.desktops {
            return None;
        }
        let entry = cache.find_entry(self.dir, relative)?;
        if entry.kind() != EntryKind::Application {
            return None;
        }
        Some(self.transform(entry))
    }

    /// Look up a directory descriptor by relative path.
    #[must_use]
    pub fn get_directory(&self, cache: &DirCache, relative: &str) -> Option<EntryRef> {
        if !self.flags.directories {
            return None;
        }
        let entry = cache.find_entry(self.dir, relative)?;
        if entry.kind() != EntryKind::Directory {
            return None;
        }
        Some(Arc::clone(entry))
    }

    /// Every application descriptor under the view, keyed by relative path.
    #[must_use]
    pub fn desktops(&self, cache: &DirCache) -> Vec<(String, EntryRef)> {
        if !self.flags.desktops {
            return Vec::new();
        }
        let mut raw = Vec::new();
        cache.collect_entries(self.dir, "", &mut raw);
        raw.retain(|(_, e)| e.kind() == EntryKind::Application);
        raw.into_iter()
            .map(|(key, e)| (key, self.transform(&e)))
            .collect()
    }

    /// Copy-on-read: append `Legacy` when the view requires it, otherwise
    /// share the cached entry unchanged.
    fn transform(&self, entry: &EntryRef) -> EntryRef {
        if self.flags.legacy
            && entry.kind() == EntryKind::Application
            && !entry.has_category(LEGACY_CATEGORY)
        {
            Arc::new(entry.with_extra_category(LEGACY_CATEGORY))
        } else {
            Arc::clone(entry)
        }
    }
}

/// Priority-ordered list of [`EntryDirectory`] views.
///
/// Earlier elements shadow later ones for same-name lookups.
#[derive(Debug, Default)]
pub struct EntryDirectoryList {
    dirs: Vec<EntryDirectory>,
}

impl EntryDirectoryList {
    /// An empty list.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a view at the lowest priority.
    pub fn push(&mut self, directory: EntryDirectory) {
        self.dirs.push(directory);
    }

    /// Whether the list holds no views.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.dirs.is_empty()
    }

    /// The views, highest priority first.
    #[must_use]
    pub fn directories(&self) -> &[EntryDirectory] {
        &self.dirs
    }

    /// Whether any view injects the `Legacy` category.
    #[must_use]
    pub fn has_legacy(&self) -> bool {
        self.dirs.iter().any(|d| d.flags.legacy)
    }

    /// First matching application descriptor, searching highest priority
    /// first.
    #[must_use]
    pub fn get_desktop(&self, cache: &DirCache, relative: &str) -> Option<EntryRef> {
        self.dirs.iter().find_map(|d| d.get_desktop(cache, relative))
    }

    /// First matching directory descriptor, searching highest priority
    /// first.
    #[must_use]
    pub fn get_directory(&self, cache: &DirCache, relative: &str) -> Option<EntryRef> {
        self.dirs
            .iter()
            .find_map(|d| d.get_directory(cache, relative))
    }

    /// Every visible application, keyed by relative path.
    ///
    /// Iterates lowest to highest priority so a higher-priority view's
    /// entry silently replaces a lower-priority one with the same key.
    #[must_use]
    pub fn all_desktops(&self, cache: &DirCache) -> HashMap<String, EntryRef> {
        let mut map = HashMap::new();
        for directory in self.dirs.iter().rev() {
            for (key, entry) in directory.desktops(cache) {
                map.insert(key, entry);
            }
        }
        map
    }

    /// Every visible application carrying `category`, with shadowing.
    #[must_use]
    pub fn desktops_by_category(
        &self,
        cache: &DirCache,
        category: &str,
    ) -> HashMap<String, EntryRef> {
        let mut map = self.all_desktops(cache);
        map.retain(|_, e| e.has_category(category));
        map
    }
}
