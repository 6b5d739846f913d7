//! Property-based checks over the rule algebra, deduplication, diffing
//! and the entry-cache lifetime invariants.

use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use proptest::prelude::*;

use menutree::node::{FileRegistry, NodeId};
use menutree::resolver::rules::EntrySet;
use menutree::resolver::{resolve, strip_duplicates};
use menutree::{
    diff, BaseDirs, ChangeKind, DirCache, Directive, Entry, EntryKind, MenuTree, ResolvedTree,
};

fn entry(name: &str) -> Arc<Entry> {
    Arc::new(Entry::new(
        EntryKind::Application,
        name,
        format!("/apps/{name}"),
        vec!["Test".to_string()],
    ))
}

fn entry_set(names: &HashSet<String>) -> EntrySet {
    let mut set = EntrySet::new();
    for name in names {
        set.insert(name.clone(), entry(name));
    }
    set
}

fn keys(set: &EntrySet) -> HashSet<String> {
    set.iter().map(|(k, _)| k.clone()).collect()
}

fn name_set() -> impl Strategy<Value = HashSet<String>> {
    prop::collection::hash_set("[a-h]\\.desktop", 0..6)
}

proptest! {
    #[test]
    fn union_is_set_union(a in name_set(), b in name_set()) {
        let mut set = entry_set(&a);
        set.union(entry_set(&b));
        prop_assert_eq!(keys(&set), a.union(&b).cloned().collect::<HashSet<_>>());
    }

    #[test]
    fn intersect_is_set_intersection(a in name_set(), b in name_set()) {
        let mut set = entry_set(&a);
        set.intersect(&entry_set(&b));
        prop_assert_eq!(
            keys(&set),
            a.intersection(&b).cloned().collect::<HashSet<_>>()
        );
    }

    #[test]
    fn subtract_is_set_difference(a in name_set(), b in name_set()) {
        let mut set = entry_set(&a);
        set.subtract(&entry_set(&b));
        prop_assert_eq!(
            keys(&set),
            a.difference(&b).cloned().collect::<HashSet<_>>()
        );
    }
}

/// Flat description of one directive child, for generated trees.
#[derive(Debug, Clone)]
enum GenChild {
    AppDir(String),
    DirectoryDir(String),
    Menu(String, Vec<GenChild>),
}

fn gen_child() -> impl Strategy<Value = GenChild> {
    let leaf = prop_oneof![
        "[a-c]".prop_map(GenChild::AppDir),
        "[a-c]".prop_map(GenChild::DirectoryDir),
    ];
    leaf.prop_recursive(2, 12, 4, |inner| {
        ("[A-C]", prop::collection::vec(inner, 0..4))
            .prop_map(|(name, children)| GenChild::Menu(name, children))
    })
}

fn build(tree: &mut MenuTree, parent: NodeId, spec: &GenChild) {
    match spec {
        GenChild::AppDir(p) => {
            let node = tree.alloc(Directive::AppDir(p.clone()));
            tree.append_child(parent, node);
        }
        GenChild::DirectoryDir(p) => {
            let node = tree.alloc(Directive::DirectoryDir(p.clone()));
            tree.append_child(parent, node);
        }
        GenChild::Menu(name, children) => {
            let menu = tree.alloc(Directive::Menu);
            tree.append_child(parent, menu);
            let n = tree.alloc(Directive::Name(name.clone()));
            tree.append_child(menu, n);
            for child in children {
                build(tree, menu, child);
            }
        }
    }
}

fn shape(tree: &MenuTree, node: NodeId, out: &mut Vec<(u8, String)>) {
    let d = tree.directive(node);
    out.push((d.tag(), d.content().unwrap_or_default().to_string()));
    for &child in tree.children(node) {
        shape(tree, child, out);
    }
}

proptest! {
    #[test]
    fn dedup_is_idempotent(children in prop::collection::vec(gen_child(), 0..8)) {
        let mut tree = MenuTree::new(Directive::Root);
        let root = tree.root();
        let top = tree.alloc(Directive::Menu);
        tree.append_child(root, top);
        let name = tree.alloc(Directive::Name("Root".to_string()));
        tree.append_child(top, name);
        for child in &children {
            build(&mut tree, top, child);
        }

        strip_duplicates(&mut tree, root);
        let mut once = Vec::new();
        shape(&tree, root, &mut once);

        strip_duplicates(&mut tree, root);
        let mut twice = Vec::new();
        shape(&tree, root, &mut twice);

        prop_assert_eq!(once, twice);
    }
}

/// Write a descriptor directory plus a two-level menu over it: the root
/// includes everything, a `Tools` submenu includes the `Tool` category.
fn layout_menu(root: &Path, label: &str, names: &HashMap<String, bool>) -> PathBuf {
    let apps = root.join(format!("{label}-apps"));
    fs::create_dir_all(&apps).unwrap();
    for (name, is_tool) in names {
        let categories = if *is_tool { "Tool;" } else { "Misc;" };
        fs::write(
            apps.join(name),
            format!("[Desktop Entry]\nCategories={categories}\n"),
        )
        .unwrap();
    }
    let menu = root.join(format!("{label}.menu"));
    fs::write(
        &menu,
        format!(
            "<Menu><Name>Root</Name><AppDir>{}</AppDir>\
             <Include><All/></Include>\
             <Menu><Name>Tools</Name>\
             <Include><Category>Tool</Category></Include></Menu>\
             </Menu>",
            apps.display()
        ),
    )
    .unwrap();
    menu
}

/// Every menu and entry path below the top menu, `/`-joined.
fn tree_paths(tree: &ResolvedTree) -> HashSet<String> {
    let mut paths = HashSet::new();
    tree.for_each("", &mut |path, node| {
        if !path.is_empty() {
            paths.insert(path.to_string());
        }
        for (key, _) in node.entries() {
            paths.insert(if path.is_empty() {
                key.clone()
            } else {
                format!("{path}/{key}")
            });
        }
    });
    paths
}

fn name_map() -> impl Strategy<Value = HashMap<String, bool>> {
    prop::collection::hash_map("[a-h]\\.desktop", any::<bool>(), 0..6)
}

fn isolated_base_dirs() -> BaseDirs {
    BaseDirs {
        data_home: PathBuf::from("/nonexistent"),
        config_home: PathBuf::from("/nonexistent"),
        data_dirs: Vec::new(),
        config_dirs: Vec::new(),
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(16))]

    #[test]
    fn diff_of_tree_with_itself_is_empty(
        names in prop::collection::hash_set("[a-h]\\.desktop", 0..6),
    ) {
        let tmp = tempfile::tempdir().unwrap();
        let apps = tmp.path().join("apps");
        fs::create_dir_all(&apps).unwrap();
        for name in &names {
            fs::write(
                apps.join(name),
                "[Desktop Entry]\nCategories=Test;\n",
            )
            .unwrap();
        }
        let menu = tmp.path().join("root.menu");
        fs::write(
            &menu,
            format!(
                "<Menu><Name>Root</Name><AppDir>{}</AppDir>\
                 <Include><All/></Include></Menu>",
                apps.display()
            ),
        )
        .unwrap();

        let base_dirs = isolated_base_dirs();
        let mut registry = FileRegistry::new();
        let mut cache = DirCache::new();
        let mut t1 = resolve(&menu, &base_dirs, &mut registry, &mut cache).unwrap();
        let mut t2 = resolve(&menu, &base_dirs, &mut registry, &mut cache).unwrap();

        prop_assert!(diff(&t1, &t2).is_empty());
        prop_assert_eq!(t1.root().unwrap().entries().len(), names.len());

        t1.release(&mut cache);
        t2.release(&mut cache);
    }

    #[test]
    fn diff_inverse_restores_old_name_set(
        old_names in name_map(),
        new_names in name_map(),
    ) {
        let tmp = tempfile::tempdir().unwrap();
        let old_menu = layout_menu(tmp.path(), "old", &old_names);
        let new_menu = layout_menu(tmp.path(), "new", &new_names);

        let base_dirs = isolated_base_dirs();
        let mut registry = FileRegistry::new();
        let mut cache = DirCache::new();
        let mut t1 = resolve(&old_menu, &base_dirs, &mut registry, &mut cache).unwrap();
        let mut t2 = resolve(&new_menu, &base_dirs, &mut registry, &mut cache).unwrap();

        let old_paths = tree_paths(&t1);
        let mut restored = tree_paths(&t2);
        for change in diff(&t1, &t2) {
            match change.kind {
                ChangeKind::Created => {
                    restored.remove(&change.path);
                }
                ChangeKind::Deleted => {
                    restored.insert(change.path);
                }
            }
        }
        prop_assert_eq!(restored, old_paths);

        t1.release(&mut cache);
        t2.release(&mut cache);
    }

    #[test]
    fn use_counts_return_to_zero(opens in prop::collection::vec(0usize..3, 1..6)) {
        let tmp = tempfile::tempdir().unwrap();
        let subdirs = ["a", "b/nested", "c"];
        for sub in subdirs {
            let dir = tmp.path().join(sub);
            fs::create_dir_all(&dir).unwrap();
            fs::write(dir.join("x.desktop"), "[Desktop Entry]\n").unwrap();
        }

        let mut cache = DirCache::new();
        let mut views = Vec::new();
        for &pick in &opens {
            let target = tmp.path().join(["a", "b", "c"][pick]);
            if let Some(view) =
                cache.open_directory(&target, menutree::entries::DirFlags::APPLICATIONS)
            {
                views.push(view);
            }
        }
        let ids: Vec<_> = views.iter().map(|v| v.dir_id()).collect();
        for view in &views {
            cache.release(view);
        }
        for id in ids {
            prop_assert_eq!(cache.use_count(id), 0);
        }
    }
}
