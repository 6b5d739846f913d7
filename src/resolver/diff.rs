//! Structural comparison of two resolved trees.

use std::cmp::Ordering;

use super::{ResolvedNode, ResolvedTree};

/// Direction of one structural change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    /// Present in the new tree only.
    Created,
    /// Present in the old tree only.
    Deleted,
}

/// One created or deleted menu or entry.
///
/// `path` is the `/`-separated location below the top menu; for entries
/// the last component is the entry's relative path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Change {
    /// Whether the item appeared or disappeared.
    pub kind: ChangeKind,
    /// Location of the item.
    pub path: String,
}

/// Compare two resolved trees, reporting every menu and entry present in
/// only one of them. Equal names recurse; a name on one side only is
/// reported along with everything beneath it. The result is unordered.
#[must_use]
pub fn diff(old: &ResolvedTree, new: &ResolvedTree) -> Vec<Change> {
    let mut changes = Vec::new();
    match (old.root(), new.root()) {
        (Some(old_root), Some(new_root)) => {
            diff_nodes(old_root, new_root, "", &mut changes);
        }
        (Some(old_root), None) => emit_subtree(old_root, ChangeKind::Deleted, "", &mut changes),
        (None, Some(new_root)) => emit_subtree(new_root, ChangeKind::Created, "", &mut changes),
        (None, None) => {}
    }
    changes
}

fn diff_nodes(old: &ResolvedNode, new: &ResolvedNode, prefix: &str, out: &mut Vec<Change>) {
    // Entries are already sorted by relative path.
    merge_sorted(
        old.entries().iter().map(|(key, _)| key.as_str()),
        new.entries().iter().map(|(key, _)| key.as_str()),
        &mut |side, key| {
            out.push(Change {
                kind: side,
                path: join(prefix, key),
            });
        },
        &mut |_| {},
    );

    let mut old_children: Vec<&ResolvedNode> = old.children().iter().collect();
    let mut new_children: Vec<&ResolvedNode> = new.children().iter().collect();
    old_children.sort_by_key(|c| c.name());
    new_children.sort_by_key(|c| c.name());

    let (mut i, mut j) = (0, 0);
    while i < old_children.len() || j < new_children.len() {
        match (old_children.get(i), new_children.get(j)) {
            (Some(o), Some(n)) => match o.name().cmp(n.name()) {
                Ordering::Equal => {
                    diff_nodes(o, n, &join(prefix, o.name()), out);
                    i += 1;
                    j += 1;
                }
                Ordering::Less => {
                    emit_subtree(o, ChangeKind::Deleted, prefix, out);
                    i += 1;
                }
                Ordering::Greater => {
                    emit_subtree(n, ChangeKind::Created, prefix, out);
                    j += 1;
                }
            },
            (Some(o), None) => {
                emit_subtree(o, ChangeKind::Deleted, prefix, out);
                i += 1;
            }
            (None, Some(n)) => {
                emit_subtree(n, ChangeKind::Created, prefix, out);
                j += 1;
            }
            (None, None) => break,
        }
    }
}

/// Report a whole subtree as created or deleted: the menu itself, its
/// entries, then each child recursively.
fn emit_subtree(node: &ResolvedNode, kind: ChangeKind, prefix: &str, out: &mut Vec<Change>) {
    let path = join(prefix, node.name());
    out.push(Change {
        kind,
        path: path.clone(),
    });
    for (key, _) in node.entries() {
        out.push(Change {
            kind,
            path: join(&path, key),
        });
    }
    for child in node.children() {
        emit_subtree(child, kind, &path, out);
    }
}

fn merge_sorted<'a>(
    old: impl Iterator<Item = &'a str>,
    new: impl Iterator<Item = &'a str>,
    on_single: &mut dyn FnMut(ChangeKind, &str),
    on_both: &mut dyn FnMut(&str),
) {
    let old: Vec<&str> = old.collect();
    let new: Vec<&str> = new.collect();
    let (mut i, mut j) = (0, 0);
    while i < old.len() || j < new.len() {
        match (old.get(i), new.get(j)) {
            (Some(&o), Some(&n)) => match o.cmp(n) {
                Ordering::Equal => {
                    on_both(o);
                    i += 1;
                    j += 1;
                }
                Ordering::Less => {
                    on_single(ChangeKind::Deleted, o);
                    i += 1;
                }
                Ordering::Greater => {
                    on_single(ChangeKind::Created, n);
                    j += 1;
                }
            },
            (Some(&o), None) => {
                on_single(ChangeKind::Deleted, o);
                i += 1;
            }
            (None, Some(&n)) => {
                on_single(ChangeKind::Created, n);
                j += 1;
            }
            (None, None) => break,
        }
    }
}

fn join(prefix: &str, name: &str) -> String {
    if prefix.is_empty() {
        name.to_string()
    } else {
        format!("{prefix}/{name}")
    }
}
