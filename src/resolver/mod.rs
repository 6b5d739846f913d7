//! Turns a parsed directive tree into a concrete tree of categorized
//! entries.
//!
//! Resolution runs in three phases over a private deep copy of the parsed
//! tree: file splicing (merge directives and default-directory expansion),
//! deduplication, and menu building (search lists, rule evaluation and
//! allocation tracking). The parsed tree itself is never mutated, so the
//! pristine form stays available for write-back.

pub mod diff;
pub mod rules;

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{debug, warn};

use crate::config::BaseDirs;
use crate::entries::{DirCache, DirFlags, EntryDirectoryList, EntryRef};
use crate::error::MenuError;
use crate::node::{Directive, FileRegistry, MenuTree, NodeId};
use rules::EntrySet;

/// Suffix of menu definition files.
pub const MENU_SUFFIX: &str = ".menu";

/// One menu of the final tree: its entries, its backing directory
/// descriptor and its sub-menus. Never mutated after resolution.
#[derive(Debug)]
pub struct ResolvedNode {
    name: String,
    directory_entry: Option<EntryRef>,
    entries: Vec<(String, EntryRef)>,
    children: Vec<ResolvedNode>,
    only_unallocated: bool,
}

impl ResolvedNode {
    /// Menu name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Directory descriptor backing this menu, if one resolved.
    #[must_use]
    pub fn directory_entry(&self) -> Option<&EntryRef> {
        self.directory_entry.as_ref()
    }

    /// Entries assigned to this menu, sorted by relative path.
    #[must_use]
    pub fn entries(&self) -> &[(String, EntryRef)] {
        &self.entries
    }

    /// Sub-menus, in definition order.
    #[must_use]
    pub fn children(&self) -> &[ResolvedNode] {
        &self.children
    }

    /// Whether this menu kept only unclaimed entries.
    #[must_use]
    pub const fn only_unallocated(&self) -> bool {
        self.only_unallocated
    }

    /// Sub-menu by name.
    #[must_use]
    pub fn child(&self, name: &str) -> Option<&ResolvedNode> {
        self.children.iter().find(|c| c.name == name)
    }

    /// Entry by relative path.
    #[must_use]
    pub fn entry(&self, relative: &str) -> Option<&EntryRef> {
        self.entries
            .iter()
            .find_map(|(key, e)| (key == relative).then_some(e))
    }
}

/// The output of one resolution pass.
///
/// Holds the pristine parsed tree (for write-back), the fully spliced and
/// deduplicated directive tree, the final menu tree, and the entry-cache
/// views acquired along the way. The views must be handed back through
/// [`ResolvedTree::release`] before the tree is dropped, or the backing
/// scan cache can never evict them.
#[derive(Debug)]
pub struct ResolvedTree {
    source_file: PathBuf,
    source_dir: PathBuf,
    orig: Arc<MenuTree>,
    resolved: MenuTree,
    root: Option<ResolvedNode>,
    lists: Vec<Arc<EntryDirectoryList>>,
}

impl ResolvedTree {
    /// Canonical path of the resolved menu file.
    #[must_use]
    pub fn source_file(&self) -> &Path {
        &self.source_file
    }

    /// Directory containing the menu file.
    #[must_use]
    pub fn source_dir(&self) -> &Path {
        &self.source_dir
    }

    /// The parsed tree as loaded, before any splicing.
    #[must_use]
    pub fn original(&self) -> &Arc<MenuTree> {
        &self.orig
    }

    /// The spliced and deduplicated directive tree.
    #[must_use]
    pub fn resolved_directives(&self) -> &MenuTree {
        &self.resolved
    }

    /// The top menu, absent when the file held no well-formed menu.
    #[must_use]
    pub fn root(&self) -> Option<&ResolvedNode> {
        self.root.as_ref()
    }

    /// Navigate by `/`-separated menu names below the top menu.
    ///
    /// The empty path (or `/`) names the top menu itself. Navigation never
    /// fails hard; an unknown component yields `None`.
    #[must_use]
    pub fn get_node(&self, path: &str) -> Option<&ResolvedNode> {
        let mut current = self.root.as_ref()?;
        for part in path.split('/').filter(|p| !p.is_empty()) {
            current = current.child(part)?;
        }
        Some(current)
    }

    /// Names of a node's sub-menus and relative paths of its entries.
    #[must_use]
    pub fn list_children<'a>(&self, node: &'a ResolvedNode) -> (Vec<&'a str>, Vec<&'a str>) {
        let subdirs = node.children.iter().map(|c| c.name.as_str()).collect();
        let entries = node.entries.iter().map(|(key, _)| key.as_str()).collect();
        (subdirs, entries)
    }

    /// Visit every menu at or below `start_path`, pre-order.
    ///
    /// The visitor receives each menu's `/`-separated path and the node.
    /// No-op when `start_path` does not resolve.
    pub fn for_each(&self, start_path: &str, visit: &mut dyn FnMut(&str, &ResolvedNode)) {
        let Some(start) = self.get_node(start_path) else {
            return;
        };
        let prefix = start_path.trim_matches('/').to_string();
        Self::walk(start, &prefix, visit);
    }

    fn walk(node: &ResolvedNode, path: &str, visit: &mut dyn FnMut(&str, &ResolvedNode)) {
        visit(path, node);
        for child in &node.children {
            let sub = if path.is_empty() {
                child.name.clone()
            } else {
                format!("{path}/{}", child.name)
            };
            Self::walk(child, &sub, visit);
        }
    }

    /// Hand back every entry-cache view this tree holds.
    pub fn release(&mut self, cache: &mut DirCache) {
        for list in self.lists.drain(..) {
            cache.release_list(&list);
        }
    }
}

/// Resolve the menu file at `path` into a [`ResolvedTree`].
///
/// # Errors
///
/// Returns [`MenuError::NotFound`] when the file does not exist and
/// [`MenuError::Parse`] when it (or a merge target) fails to parse.
/// Missing merge targets and unreadable descriptor directories are not
/// errors.
pub fn resolve(
    path: &Path,
    base_dirs: &BaseDirs,
    registry: &mut FileRegistry,
    cache: &mut DirCache,
) -> Result<ResolvedTree, MenuError> {
    let canonical = std::fs::canonicalize(path).map_err(|_| MenuError::NotFound {
        name: path.display().to_string(),
    })?;
    let orig = registry
        .load(&canonical)?
        .ok_or_else(|| MenuError::NotFound {
            name: canonical.display().to_string(),
        })?;

    let source_dir = canonical
        .parent()
        .unwrap_or_else(|| Path::new("/"))
        .to_path_buf();
    let menu_basename = canonical
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();

    let mut tree = orig.deep_copy();
    let mut splicer = Splicer {
        base_dirs,
        registry,
        menu_basename,
        merge_stack: vec![canonical.clone()],
    };
    let root = tree.root();
    splicer.resolve_files(&mut tree, root, &source_dir)?;
    strip_duplicates(&mut tree, root);

    let mut builder = Builder {
        cache,
        lists: Vec::new(),
    };
    let empty = Arc::new(EntryDirectoryList::new());
    let pre = tree
        .top_menu()
        .and_then(|top| builder.build_menu(&tree, top, &empty, &empty));

    let mut claimed = HashSet::new();
    if let Some(pre) = &pre {
        collect_claimed(pre, &mut claimed);
    }
    let resolved_root = pre.and_then(|p| finalize(p, &claimed));

    Ok(ResolvedTree {
        source_file: canonical,
        source_dir,
        orig,
        resolved: tree,
        root: resolved_root,
        lists: builder.lists,
    })
}

struct Splicer<'a> {
    base_dirs: &'a BaseDirs,
    registry: &'a mut FileRegistry,
    menu_basename: String,
    /// Canonical paths of the files currently being spliced, outermost
    /// first. Guards against merge cycles.
    merge_stack: Vec<PathBuf>,
}

impl Splicer<'_> {
    /// Expand merge and default-directory directives below `node`,
    /// depth-first pre-order. `dir` is the directory of the file this
    /// subtree was parsed from; relative references resolve against it.
    fn resolve_files(
        &mut self,
        tree: &mut MenuTree,
        node: NodeId,
        dir: &Path,
    ) -> Result<(), MenuError> {
        // Snapshot: splicing edits the sibling list under our feet.
        let children: Vec<NodeId> = tree.children(node).to_vec();
        for child in children {
            match tree.directive(child).clone() {
                Directive::Menu => self.resolve_files(tree, child, dir)?,
                Directive::AppDir(p) | Directive::DirectoryDir(p) | Directive::LegacyDir(p)
                    if Path::new(&p).is_relative() =>
                {
                    let absolute = dir.join(&p).to_string_lossy().into_owned();
                    let rewritten = match tree.directive(child) {
                        Directive::AppDir(_) => Directive::AppDir(absolute),
                        Directive::DirectoryDir(_) => Directive::DirectoryDir(absolute),
                        _ => Directive::LegacyDir(absolute),
                    };
                    tree.set_directive(child, rewritten);
                }
                Directive::MergeFile(rel) => {
                    self.merge_file(tree, child, &resolve_ref(dir, &rel))?;
                    tree.unlink(child);
                }
                Directive::MergeDir(rel) => {
                    self.merge_directory(tree, child, &resolve_ref(dir, &rel))?;
                    tree.unlink(child);
                }
                Directive::DefaultAppDirs => {
                    self.expand_dirs(tree, child, self.base_dirs.app_dirs(), Directive::AppDir);
                }
                Directive::DefaultDirectoryDirs => {
                    self.expand_dirs(
                        tree,
                        child,
                        self.base_dirs.directory_dirs(),
                        Directive::DirectoryDir,
                    );
                }
                Directive::KdeLegacyDirs => {
                    self.expand_dirs(tree, child, self.base_dirs.legacy_dirs(), Directive::LegacyDir);
                }
                Directive::DefaultMergeDirs => {
                    for merge_dir in self.base_dirs.merge_dirs(&self.menu_basename) {
                        self.merge_directory(tree, child, &merge_dir)?;
                    }
                    tree.unlink(child);
                }
                _ => {}
            }
        }
        Ok(())
    }

    /// One directive per configured directory, spliced in place of the
    /// default-expansion marker.
    fn expand_dirs(
        &self,
        tree: &mut MenuTree,
        marker: NodeId,
        dirs: Vec<PathBuf>,
        make: fn(String) -> Directive,
    ) {
        for dir in dirs {
            let node = tree.alloc(make(dir.to_string_lossy().into_owned()));
            tree.insert_before(marker, node);
        }
        tree.unlink(marker);
    }

    /// Splice the fully resolved content of `target` before `splice`.
    ///
    /// The target is resolved recursively first, so nested merges are
    /// expanded before any of its children move. The spliced-in top menu's
    /// own `Name` is discarded.
    fn merge_file(
        &mut self,
        tree: &mut MenuTree,
        splice: NodeId,
        target: &Path,
    ) -> Result<(), MenuError> {
        let Ok(canonical) = std::fs::canonicalize(target) else {
            debug!(target = %target.display(), "skipping missing merge target");
            return Ok(());
        };
        if self.merge_stack.contains(&canonical) {
            warn!(target = %canonical.display(), "skipping merge cycle");
            return Ok(());
        }
        let Some(parsed) = self.registry.load(&canonical)? else {
            return Ok(());
        };

        let mut sub = parsed.deep_copy();
        let sub_dir = canonical
            .parent()
            .unwrap_or_else(|| Path::new("/"))
            .to_path_buf();
        self.merge_stack.push(canonical);
        let sub_root = sub.root();
        let result = self.resolve_files(&mut sub, sub_root, &sub_dir);
        self.merge_stack.pop();
        result?;

        let Some(top) = sub.top_menu() else {
            return Ok(());
        };
        for &child in sub.children(top) {
            if matches!(sub.directive(child), Directive::Name(_)) {
                continue;
            }
            let copy = sub.copy_subtree_into(child, tree);
            tree.insert_before(splice, copy);
        }
        Ok(())
    }

    /// Splice every `*.menu` file of `target`, lexical order.
    fn merge_directory(
        &mut self,
        tree: &mut MenuTree,
        splice: NodeId,
        target: &Path,
    ) -> Result<(), MenuError> {
        let Ok(read) = std::fs::read_dir(target) else {
            debug!(target = %target.display(), "skipping missing merge directory");
            return Ok(());
        };
        let mut files: Vec<PathBuf> = read
            .filter_map(Result::ok)
            .map(|e| e.path())
            .filter(|p| {
                p.is_file()
                    && p.file_name()
                        .is_some_and(|n| n.to_string_lossy().ends_with(MENU_SUFFIX))
            })
            .collect();
        files.sort();
        for file in files {
            self.merge_file(tree, splice, &file)?;
        }
        Ok(())
    }
}

fn resolve_ref(dir: &Path, reference: &str) -> PathBuf {
    let path = Path::new(reference);
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        dir.join(path)
    }
}

/// Remove repeated directives and merge same-named sibling menus, keeping
/// the last definition in file order.
///
/// The sibling list itself is never reordered; a sorted view of it only
/// decides which nodes are duplicates.
pub fn strip_duplicates(tree: &mut MenuTree, node: NodeId) {
    let mut sorted: Vec<NodeId> = tree.children(node).to_vec();
    sorted.sort_by(|&a, &b| dedup_key(tree, a).cmp(&dedup_key(tree, b)));

    let mut survivor: Option<NodeId> = None;
    for id in sorted {
        match survivor {
            Some(prev) if same_identity(tree, prev, id) => {
                if matches!(tree.directive(id), Directive::Menu) {
                    // The later definition survives; the earlier one's
                    // children move to its front so nothing is lost and
                    // the earlier content keeps priority.
                    let moved: Vec<NodeId> = tree.children(prev).to_vec();
                    for &child in moved.iter().rev() {
                        tree.steal(child);
                        tree.prepend_child(id, child);
                    }
                    tree.unlink(prev);
                } else {
                    tree.unlink(prev);
                }
                survivor = Some(id);
            }
            _ => survivor = Some(id),
        }
    }

    let children: Vec<NodeId> = tree.children(node).to_vec();
    for child in children {
        if matches!(tree.directive(child), Directive::Menu) {
            strip_duplicates(tree, child);
        }
    }
}

/// Stable grouping key: directive tag plus the text that identifies the
/// node (menu name for `Menu`, content otherwise).
fn dedup_key(tree: &MenuTree, id: NodeId) -> (u8, String) {
    let directive = tree.directive(id);
    let text = match directive {
        Directive::Menu => tree.menu_name(id).unwrap_or_default().to_string(),
        other => other.content().unwrap_or_default().to_string(),
    };
    (directive.tag(), text)
}

fn same_identity(tree: &MenuTree, a: NodeId, b: NodeId) -> bool {
    match (tree.directive(a), tree.directive(b)) {
        (Directive::Menu, Directive::Menu) => {
            // Nameless menus never merge with each other.
            matches!((tree.menu_name(a), tree.menu_name(b)), (Some(x), Some(y)) if x == y)
        }
        (
            Directive::AppDir(x),
            Directive::AppDir(y),
        )
        | (Directive::DirectoryDir(x), Directive::DirectoryDir(y))
        | (Directive::LegacyDir(x), Directive::LegacyDir(y))
        | (Directive::Directory(x), Directive::Directory(y))
        | (Directive::Name(x), Directive::Name(y)) => x == y,
        (Directive::Deleted, Directive::Deleted)
        | (Directive::NotDeleted, Directive::NotDeleted)
        | (Directive::OnlyUnallocated, Directive::OnlyUnallocated)
        | (Directive::NotOnlyUnallocated, Directive::NotOnlyUnallocated) => true,
        _ => false,
    }
}

/// Intermediate menu produced by the build pass, before allocation
/// tracking runs over the whole tree.
struct PreNode {
    name: String,
    directory_entry: Option<EntryRef>,
    entries: EntrySet,
    children: Vec<PreNode>,
    deleted: bool,
    only_unallocated: bool,
}

struct Builder<'a> {
    cache: &'a mut DirCache,
    /// Every search list created during the pass, for later release.
    lists: Vec<Arc<EntryDirectoryList>>,
}

impl Builder<'_> {
    /// Build one menu node. A menu with no `Name` child is malformed and
    /// silently dropped with its subtree.
    fn build_menu(
        &mut self,
        tree: &MenuTree,
        node: NodeId,
        parent_apps: &Arc<EntryDirectoryList>,
        parent_dirs: &Arc<EntryDirectoryList>,
    ) -> Option<PreNode> {
        let Some(name) = tree.menu_name(node) else {
            warn!("dropping menu with no name");
            return None;
        };
        let name = name.to_string();

        let mut own_apps = EntryDirectoryList::new();
        let mut own_dirs = EntryDirectoryList::new();
        for &child in tree.children(node) {
            match tree.directive(child) {
                Directive::AppDir(p) => {
                    if let Some(view) =
                        self.cache.open_directory(Path::new(p), DirFlags::APPLICATIONS)
                    {
                        own_apps.push(view);
                    }
                }
                Directive::DirectoryDir(p) => {
                    if let Some(view) =
                        self.cache.open_directory(Path::new(p), DirFlags::DIRECTORIES)
                    {
                        own_dirs.push(view);
                    }
                }
                Directive::LegacyDir(p) => {
                    if let Some(view) = self.cache.open_directory(Path::new(p), DirFlags::LEGACY) {
                        own_apps.push(view);
                    }
                    if let Some(view) = self.cache.open_directory(Path::new(p), DirFlags::LEGACY) {
                        own_dirs.push(view);
                    }
                }
                _ => {}
            }
        }
        // Own directories replace the inherited list; a menu that names
        // none inherits its parent's.
        let apps = self.keep_or_inherit(own_apps, parent_apps);
        let dirs = self.keep_or_inherit(own_dirs, parent_dirs);

        let mut deleted = false;
        let mut only_unallocated = false;
        let mut directory_entry = None;
        let mut entries = EntrySet::new();
        let mut children = Vec::new();

        for &child in tree.children(node) {
            match tree.directive(child) {
                Directive::Deleted => deleted = true,
                Directive::NotDeleted => deleted = false,
                Directive::OnlyUnallocated => only_unallocated = true,
                Directive::NotOnlyUnallocated => only_unallocated = false,
                Directive::Directory(rel) => {
                    // Last successful lookup wins.
                    if let Some(entry) = dirs.get_directory(self.cache, rel) {
                        directory_entry = Some(entry);
                    }
                }
                Directive::Include => {
                    for &rule in tree.children(child) {
                        entries.union(rules::evaluate(tree, rule, self.cache, &apps));
                    }
                }
                Directive::Exclude => {
                    for &rule in tree.children(child) {
                        entries.subtract(&rules::evaluate(tree, rule, self.cache, &apps));
                    }
                }
                Directive::Menu => {
                    if let Some(sub) = self.build_menu(tree, child, &apps, &dirs) {
                        children.push(sub);
                    }
                }
                _ => {}
            }
        }

        Some(PreNode {
            name,
            directory_entry,
            entries,
            children,
            deleted,
            only_unallocated,
        })
    }

    fn keep_or_inherit(
        &mut self,
        own: EntryDirectoryList,
        inherited: &Arc<EntryDirectoryList>,
    ) -> Arc<EntryDirectoryList> {
        if own.is_empty() {
            Arc::clone(inherited)
        } else {
            let own = Arc::new(own);
            self.lists.push(Arc::clone(&own));
            own
        }
    }
}

/// First allocation pass: record every entry placed in any live menu that
/// is not `OnlyUnallocated`.
fn collect_claimed(node: &PreNode, claimed: &mut HashSet<String>) {
    if node.deleted {
        return;
    }
    if !node.only_unallocated {
        for (key, _) in node.entries.iter() {
            claimed.insert(key.clone());
        }
    }
    for child in &node.children {
        collect_claimed(child, claimed);
    }
}

/// Second allocation pass: drop deleted subtrees, strip claimed entries
/// from `OnlyUnallocated` menus and freeze the result.
fn finalize(node: PreNode, claimed: &HashSet<String>) -> Option<ResolvedNode> {
    if node.deleted {
        return None;
    }
    let mut map = node.entries.into_map();
    if node.only_unallocated {
        map.retain(|key, _| !claimed.contains(key));
    }
    let mut entries: Vec<(String, EntryRef)> = map.into_iter().collect();
    entries.sort_by(|(a, _), (b, _)| a.cmp(b));

    let children = node
        .children
        .into_iter()
        .filter_map(|c| finalize(c, claimed))
        .collect();

    Some(ResolvedNode {
        name: node.name,
        directory_entry: node.directory_entry,
        entries,
        children,
        only_unallocated: node.only_unallocated,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::fixtures::TestLayout;
    use std::fs;

    #[test]
    fn test_category_include() {
        let mut fx = TestLayout::new();
        fx.desktop("apps/a.desktop", "Settings;");
        fx.desktop("apps/b.desktop", "Network;");
        let menu = fx.write(
            "root.menu",
            &format!(
                "<Menu><Name>Root</Name><AppDir>{}/apps</AppDir>\
                 <Menu><Name>Settings</Name>\
                 <Include><Category>Settings</Category></Include>\
                 </Menu></Menu>",
                fx.root.display()
            ),
        );

        let mut tree = fx.resolve(&menu).unwrap();
        let settings = tree.get_node("Settings").unwrap();
        assert_eq!(settings.entries().len(), 1);
        assert!(settings.entry("a.desktop").is_some());
        tree.release(&mut fx.dir_cache);
    }

    #[test]
    fn test_duplicate_menus_merge_with_priority() {
        let mut fx = TestLayout::new();
        fx.desktop("x/app.desktop", "Game;FromX;");
        fx.desktop("y/app.desktop", "Game;FromY;");
        fx.desktop("y/only-y.desktop", "Game;");
        let menu = fx.write(
            "root.menu",
            &format!(
                "<Menu><Name>Root</Name>\
                 <Menu><Name>Games</Name><AppDir>{root}/x</AppDir>\
                 <Include><Category>Game</Category></Include></Menu>\
                 <Menu><Name>Games</Name><AppDir>{root}/y</AppDir></Menu>\
                 </Menu>",
                root = fx.root.display()
            ),
        );

        let mut tree = fx.resolve(&menu).unwrap();
        let root = tree.root().unwrap();
        assert_eq!(root.children().len(), 1);
        let games = root.child("Games").unwrap();
        // Both app dirs are searched and x shadows y on name collisions.
        assert_eq!(games.entries().len(), 2);
        assert!(games.entry("app.desktop").unwrap().has_category("FromX"));
        assert!(games.entry("only-y.desktop").is_some());
        tree.release(&mut fx.dir_cache);
    }

    #[test]
    fn test_only_unallocated_skips_claimed() {
        let mut fx = TestLayout::new();
        fx.desktop("apps/c.desktop", "Settings;");
        fx.desktop("apps/d.desktop", "Other;");
        let menu = fx.write(
            "root.menu",
            &format!(
                "<Menu><Name>Root</Name><AppDir>{}/apps</AppDir>\
                 <Menu><Name>Settings</Name>\
                 <Include><Category>Settings</Category></Include></Menu>\
                 <Menu><Name>Other</Name><OnlyUnallocated/>\
                 <Include><All/></Include></Menu>\
                 </Menu>",
                fx.root.display()
            ),
        );

        let mut tree = fx.resolve(&menu).unwrap();
        let settings = tree.get_node("Settings").unwrap();
        assert!(settings.entry("c.desktop").is_some());

        let other = tree.get_node("Other").unwrap();
        assert!(other.only_unallocated());
        assert!(other.entry("c.desktop").is_none());
        assert!(other.entry("d.desktop").is_some());
        tree.release(&mut fx.dir_cache);
    }

    #[test]
    fn test_merge_file_splices_children() {
        let mut fx = TestLayout::new();
        fx.desktop("apps/e.desktop", "Network;");
        fx.write(
            "extra.menu",
            &format!(
                "<Menu><Name>Ignored</Name><AppDir>{}/apps</AppDir>\
                 <Menu><Name>Net</Name>\
                 <Include><Category>Network</Category></Include></Menu>\
                 </Menu>",
                fx.root.display()
            ),
        );
        let menu = fx.write(
            "root.menu",
            "<Menu><Name>Root</Name><MergeFile>extra.menu</MergeFile></Menu>",
        );

        let mut tree = fx.resolve(&menu).unwrap();
        // The merged file's own name is discarded.
        assert_eq!(tree.root().unwrap().name(), "Root");
        let net = tree.get_node("Net").unwrap();
        assert!(net.entry("e.desktop").is_some());
        tree.release(&mut fx.dir_cache);
    }

    #[test]
    fn test_merge_cycle_is_skipped() {
        let mut fx = TestLayout::new();
        let menu = fx.write(
            "loop.menu",
            "<Menu><Name>Loop</Name><MergeFile>loop.menu</MergeFile></Menu>",
        );
        let mut tree = fx.resolve(&menu).unwrap();
        assert_eq!(tree.root().unwrap().name(), "Loop");
        tree.release(&mut fx.dir_cache);
    }

    #[test]
    fn test_missing_merge_target_ignored() {
        let mut fx = TestLayout::new();
        let menu = fx.write(
            "root.menu",
            "<Menu><Name>Root</Name>\
             <MergeFile>no-such.menu</MergeFile>\
             <MergeDir>no-such-dir</MergeDir></Menu>",
        );
        let mut tree = fx.resolve(&menu).unwrap();
        assert_eq!(tree.root().unwrap().name(), "Root");
        tree.release(&mut fx.dir_cache);
    }

    #[test]
    fn test_default_app_dirs_expand() {
        let mut fx = TestLayout::with_search_dirs();
        fx.desktop("user/applications/f.desktop", "Utility;");
        let menu = fx.write(
            "system/menus/apps.menu",
            "<Menu><Name>Root</Name><DefaultAppDirs/>\
             <Include><All/></Include></Menu>",
        );

        let mut tree = fx.resolve(&menu).unwrap();
        assert!(tree.root().unwrap().entry("f.desktop").is_some());
        tree.release(&mut fx.dir_cache);
    }

    #[test]
    fn test_deleted_menu_dropped_and_not_deleted_cancels() {
        let mut fx = TestLayout::new();
        let menu = fx.write(
            "root.menu",
            "<Menu><Name>Root</Name>\
             <Menu><Name>Gone</Name><Deleted/></Menu>\
             <Menu><Name>Kept</Name><Deleted/><NotDeleted/></Menu>\
             </Menu>",
        );
        let mut tree = fx.resolve(&menu).unwrap();
        assert!(tree.get_node("Gone").is_none());
        assert!(tree.get_node("Kept").is_some());
        tree.release(&mut fx.dir_cache);
    }

    #[test]
    fn test_nameless_menu_dropped() {
        let mut fx = TestLayout::new();
        let menu = fx.write(
            "root.menu",
            "<Menu><Name>Root</Name><Menu><Include><All/></Include></Menu></Menu>",
        );
        let mut tree = fx.resolve(&menu).unwrap();
        assert!(tree.root().unwrap().children().is_empty());
        tree.release(&mut fx.dir_cache);
    }

    #[test]
    fn test_resolve_does_not_mutate_parsed_tree() {
        let mut fx = TestLayout::new();
        fx.write("sub.menu", "<Menu><Name>Sub</Name></Menu>");
        let menu = fx.write(
            "root.menu",
            "<Menu><Name>Root</Name><MergeFile>sub.menu</MergeFile></Menu>",
        );

        let mut tree = fx.resolve(&menu).unwrap();
        // The pristine parse still carries the unexpanded merge directive.
        let orig = tree.original();
        let top = orig.top_menu().unwrap();
        let has_merge = orig
            .children(top)
            .iter()
            .any(|&c| matches!(orig.directive(c), Directive::MergeFile(_)));
        assert!(has_merge);
        tree.release(&mut fx.dir_cache);
    }

    #[test]
    fn test_dedup_is_idempotent() {
        let mut fx = TestLayout::new();
        let menu = fx.write(
            "root.menu",
            &format!(
                "<Menu><Name>Root</Name>\
                 <AppDir>{root}/apps</AppDir><AppDir>{root}/apps</AppDir>\
                 <Menu><Name>A</Name></Menu><Menu><Name>A</Name></Menu>\
                 </Menu>",
                root = fx.root.display()
            ),
        );
        let canonical = fs::canonicalize(&menu).unwrap();
        let parsed = fx.registry.load(&canonical).unwrap().unwrap();

        let mut once = parsed.deep_copy();
        let root = once.root();
        strip_duplicates(&mut once, root);
        let after_once = shape(&once);
        strip_duplicates(&mut once, root);
        assert_eq!(after_once, shape(&once));

        let top = once.top_menu().unwrap();
        let app_dirs = once
            .children(top)
            .iter()
            .filter(|&&c| matches!(once.directive(c), Directive::AppDir(_)))
            .count();
        assert_eq!(app_dirs, 1);
        let menus = once
            .children(top)
            .iter()
            .filter(|&&c| matches!(once.directive(c), Directive::Menu))
            .count();
        assert_eq!(menus, 1);
    }

    #[test]
    fn test_for_each_visits_preorder() {
        let mut fx = TestLayout::new();
        let menu = fx.write(
            "root.menu",
            "<Menu><Name>Root</Name>\
             <Menu><Name>A</Name><Menu><Name>B</Name></Menu></Menu>\
             </Menu>",
        );
        let mut tree = fx.resolve(&menu).unwrap();
        let mut seen = Vec::new();
        tree.for_each("", &mut |path, node| {
            seen.push((path.to_string(), node.name().to_string()));
        });
        assert_eq!(
            seen,
            vec![
                (String::new(), "Root".to_string()),
                ("A".to_string(), "A".to_string()),
                ("A/B".to_string(), "B".to_string()),
            ]
        );
        tree.release(&mut fx.dir_cache);
    }

    #[test]
    fn test_not_found_error() {
        let mut fx = TestLayout::new();
        let err = resolve(
            &fx.root.join("absent.menu"),
            &fx.base_dirs,
            &mut fx.registry,
            &mut fx.dir_cache,
        )
        .unwrap_err();
        assert!(matches!(err, MenuError::NotFound { .. }));
    }

    fn shape(tree: &MenuTree) -> Vec<(u8, String)> {
        let mut out = Vec::new();
        fn walk(tree: &MenuTree, node: NodeId, out: &mut Vec<(u8, String)>) {
            let d = tree.directive(node);
            out.push((d.tag(), d.content().unwrap_or_default().to_string()));
            for &child in tree.children(node) {
                walk(tree, child, out);
            }
        }
        walk(tree, tree.root(), &mut out);
        out
    }

}
