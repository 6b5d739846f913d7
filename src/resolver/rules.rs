//! Set algebra over desktop entries, used to evaluate include and
//! exclude rules.

use std::collections::HashMap;
use std::sync::Arc;

use crate::entries::{DirCache, EntryDirectoryList, EntryRef};
use crate::node::{Directive, MenuTree, NodeId};

/// Mutable set of entries keyed by relative path.
///
/// Rule evaluation builds one set per matcher and folds them together with
/// union, intersection and subtraction.
#[derive(Debug, Default)]
pub struct EntrySet {
    entries: HashMap<String, EntryRef>,
}

impl EntrySet {
    /// An empty set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Wrap an already-keyed map.
    #[must_use]
    pub fn from_map(entries: HashMap<String, EntryRef>) -> Self {
        Self { entries }
    }

    /// Number of entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the set is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Whether `key` is present.
    #[must_use]
    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    /// Insert one entry under its relative path.
    pub fn insert(&mut self, key: impl Into<String>, entry: EntryRef) {
        self.entries.insert(key.into(), entry);
    }

    /// Remove one entry.
    pub fn remove(&mut self, key: &str) {
        self.entries.remove(key);
    }

    /// Add every entry of `other` into `self`.
    pub fn union(&mut self, other: Self) {
        for (key, entry) in other.entries {
            self.entries.insert(key, entry);
        }
    }

    /// Keep only entries also present in `other`.
    pub fn intersect(&mut self, other: &Self) {
        self.entries.retain(|key, _| other.contains(key));
    }

    /// Drop every entry present in `other`.
    pub fn subtract(&mut self, other: &Self) {
        self.entries.retain(|key, _| !other.contains(key));
    }

    /// Consume the set, yielding its map.
    #[must_use]
    pub fn into_map(self) -> HashMap<String, EntryRef> {
        self.entries
    }

    /// Iterate (key, entry) pairs.
    pub fn iter(&self) -> impl Iterator<Item = (&String, &EntryRef)> {
        self.entries.iter()
    }
}

/// Evaluate one matcher node against the visible entries of a menu.
///
/// `tree` holds the directive nodes, `list` the menu's entry search
/// list. Unknown (passthrough) children of compound matchers evaluate as
/// empty.
#[must_use]
pub fn evaluate(
    tree: &MenuTree,
    node: NodeId,
    cache: &DirCache,
    list: &Arc<EntryDirectoryList>,
) -> EntrySet {
    match tree.directive(node) {
        Directive::All => EntrySet::from_map(list.all_desktops(cache)),
        Directive::Filename(name) => {
            let mut set = EntrySet::new();
            if let Some(entry) = list.get_desktop(cache, name) {
                set.insert(name.clone(), entry);
            }
            set
        }
        Directive::Category(name) => {
            EntrySet::from_map(list.desktops_by_category(cache, name))
        }
        Directive::Or => {
            let mut acc = EntrySet::new();
            for &child in tree.children(node) {
                acc.union(evaluate(tree, child, cache, list));
            }
            acc
        }
        Directive::And => {
            let mut acc: Option<EntrySet> = None;
            for &child in tree.children(node) {
                let term = evaluate(tree, child, cache, list);
                match acc.as_mut() {
                    None => acc = Some(term),
                    Some(acc) => acc.intersect(&term),
                }
                // An empty conjunction cannot grow again.
                if acc.as_ref().is_some_and(EntrySet::is_empty) {
                    break;
                }
            }
            acc.unwrap_or_default()
        }
        Directive::Not => {
            let mut acc = EntrySet::from_map(list.all_desktops(cache));
            for &child in tree.children(node) {
                acc.subtract(&evaluate(tree, child, cache, list));
                if acc.is_empty() {
                    break;
                }
            }
            acc
        }
        _ => EntrySet::new(),
    }
}
