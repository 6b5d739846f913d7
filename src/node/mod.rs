/// Menu-file loading: the loader seam, the built-in XML loader, and the
/// registry that shares parsed file roots.
pub mod loader;

pub use loader::{FileRegistry, MenuFileLoader, XmlMenuLoader};

/// One directive of a menu definition.
///
/// A closed sum type so that every structural pass is checked for
/// exhaustiveness; content-bearing directives carry their text payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Directive {
    /// Synthetic root above the file's top-level `Menu`.
    Root,
    /// A (sub)menu.
    Menu,
    /// Menu name.
    Name(String),
    /// Directory scanned for application descriptors.
    AppDir(String),
    /// Directory scanned for directory descriptors.
    DirectoryDir(String),
    /// Pre-XDG hierarchy scanned with the synthetic `Legacy` category.
    LegacyDir(String),
    /// Expands to one `AppDir` per configured data directory.
    DefaultAppDirs,
    /// Expands to one `DirectoryDir` per configured data directory.
    DefaultDirectoryDirs,
    /// Expands to one `MergeDir` per configured config directory.
    DefaultMergeDirs,
    /// Expands to one `LegacyDir` per configured data directory.
    KdeLegacyDirs,
    /// Directory-descriptor file backing the menu.
    Directory(String),
    /// Rule set adding entries to the menu.
    Include,
    /// Rule set removing entries from the menu.
    Exclude,
    /// Rule: every visible entry.
    All,
    /// Rule: the entry with this relative path.
    Filename(String),
    /// Rule: every visible entry carrying this category.
    Category(String),
    /// Rule: intersection of child rules.
    And,
    /// Rule: union of child rules.
    Or,
    /// Rule: complement of the child-rule union.
    Not,
    /// Splice another menu file here.
    MergeFile(String),
    /// Splice every `*.menu` file of a directory here.
    MergeDir(String),
    /// Menu relocation block.
    Move,
    /// Old path of a relocation.
    Old(String),
    /// New path of a relocation.
    New(String),
    /// Drop this menu from the result.
    Deleted,
    /// Cancel a previously seen `Deleted`.
    NotDeleted,
    /// Keep only entries no other menu claimed.
    OnlyUnallocated,
    /// Cancel a previously seen `OnlyUnallocated`.
    NotOnlyUnallocated,
    /// Unrecognized element, recorded by name.
    Passthrough(String),
}

impl Directive {
    /// Text payload, for content-bearing directives.
    #[must_use]
    pub fn content(&self) -> Option<&str> {
        match self {
            Self::Name(s)
            | Self::AppDir(s)
            | Self::DirectoryDir(s)
            | Self::LegacyDir(s)
            | Self::Directory(s)
            | Self::Filename(s)
            | Self::Category(s)
            | Self::MergeFile(s)
            | Self::MergeDir(s)
            | Self::Old(s)
            | Self::New(s)
            | Self::Passthrough(s) => Some(s),
            _ => None,
        }
    }

    /// Stable ordering tag used when sorting siblings for deduplication.
    #[must_use]
    pub const fn tag(&self) -> u8 {
        match self {
            Self::Root => 0,
            Self::Menu => 1,
            Self::Name(_) => 2,
            Self::AppDir(_) => 3,
            Self::DirectoryDir(_) => 4,
            Self::LegacyDir(_) => 5,
            Self::DefaultAppDirs => 6,
            Self::DefaultDirectoryDirs => 7,
            Self::DefaultMergeDirs => 8,
            Self::KdeLegacyDirs => 9,
            Self::Directory(_) => 10,
            Self::Include => 11,
            Self::Exclude => 12,
            Self::All => 13,
            Self::Filename(_) => 14,
            Self::Category(_) => 15,
            Self::And => 16,
            Self::Or => 17,
            Self::Not => 18,
            Self::MergeFile(_) => 19,
            Self::MergeDir(_) => 20,
            Self::Move => 21,
            Self::Old(_) => 22,
            Self::New(_) => 23,
            Self::Deleted => 24,
            Self::NotDeleted => 25,
            Self::OnlyUnallocated => 26,
            Self::NotOnlyUnallocated => 27,
            Self::Passthrough(_) => 28,
        }
    }
}

/// Index of a node within one [`MenuTree`] arena.
///
/// Ids are only meaningful for the tree that produced them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeId(usize);

#[derive(Debug, Clone)]
struct Node {
    directive: Directive,
    parent: Option<NodeId>,
    children: Vec<NodeId>,
    live: bool,
}

/// Arena-backed directive tree.
///
/// Nodes are addressed by [`NodeId`]; parent/child links are indices, and
/// the arena owns every node's lifetime. Unlinked subtrees are marked dead
/// and their slots are not reused; a tree lives for one resolution pass,
/// so the slack is bounded by the input size.
///
/// Invariants: every live node except the root has exactly one parent, and
/// sibling order is file order. A node must be detached before it can be
/// attached anywhere else.
#[derive(Debug, Clone)]
pub struct MenuTree {
    nodes: Vec<Node>,
    root: NodeId,
}

impl MenuTree {
    /// Create a tree holding a single root node.
    #[must_use]
    pub fn new(root: Directive) -> Self {
        let nodes = vec![Node {
            directive: root,
            parent: None,
            children: Vec::new(),
            live: true,
        }];
        Self {
            nodes,
            root: NodeId(0),
        }
    }

    /// The root node.
    #[must_use]
    pub const fn root(&self) -> NodeId {
        self.root
    }

    /// Directive stored at `id`.
    #[must_use]
    pub fn directive(&self, id: NodeId) -> &Directive {
        &self.nodes[id.0].directive
    }

    /// Parent of `id`, if attached.
    #[must_use]
    pub fn parent(&self, id: NodeId) -> Option<NodeId> {
        self.nodes[id.0].parent
    }

    /// Children of `id`, in sibling (file) order.
    #[must_use]
    pub fn children(&self, id: NodeId) -> &[NodeId] {
        &self.nodes[id.0].children
    }

    /// Whether the node has not been unlinked.
    #[must_use]
    pub fn is_live(&self, id: NodeId) -> bool {
        self.nodes[id.0].live
    }

    /// Replace the directive stored at `id`.
    pub fn set_directive(&mut self, id: NodeId, directive: Directive) {
        self.nodes[id.0].directive = directive;
    }

    /// Allocate a detached node.
    pub fn alloc(&mut self, directive: Directive) -> NodeId {
        let id = NodeId(self.nodes.len());
        self.nodes.push(Node {
            directive,
            parent: None,
            children: Vec::new(),
            live: true,
        });
        id
    }

    /// Attach a detached node as the last child of `parent`.
    pub fn append_child(&mut self, parent: NodeId, child: NodeId) {
        self.attach(parent, child, usize::MAX);
    }

    /// Attach a detached node as the first child of `parent`.
    pub fn prepend_child(&mut self, parent: NodeId, child: NodeId) {
        self.attach(parent, child, 0);
    }

    /// Attach a detached node immediately before `sibling`.
    ///
    /// `sibling` must itself be attached to the tree.
    pub fn insert_before(&mut self, sibling: NodeId, node: NodeId) {
        let parent = self.nodes[sibling.0]
            .parent
            .expect("insert_before target must be attached");
        let pos = self.child_position(parent, sibling);
        self.attach(parent, node, pos);
    }

    /// Attach a detached node immediately after `sibling`.
    ///
    /// `sibling` must itself be attached to the tree.
    pub fn insert_after(&mut self, sibling: NodeId, node: NodeId) {
        let parent = self.nodes[sibling.0]
            .parent
            .expect("insert_after target must be attached");
        let pos = self.child_position(parent, sibling);
        self.attach(parent, node, pos + 1);
    }

    /// Detach `id` from its parent, keeping the subtree alive.
    pub fn steal(&mut self, id: NodeId) {
        let parent = self.nodes[id.0]
            .parent
            .expect("cannot steal a detached node");
        let pos = self.child_position(parent, id);
        self.nodes[parent.0].children.remove(pos);
        self.nodes[id.0].parent = None;
    }

    /// Detach `id` and discard its whole subtree.
    pub fn unlink(&mut self, id: NodeId) {
        self.steal(id);
        self.mark_dead(id);
    }

    /// Clone the whole tree into a fresh arena.
    ///
    /// Dead slots are not carried over, so repeated copy/edit cycles do not
    /// accumulate slack.
    #[must_use]
    pub fn deep_copy(&self) -> Self {
        let mut copy = Self::new(self.nodes[self.root.0].directive.clone());
        let root = copy.root();
        for &child in &self.nodes[self.root.0].children {
            let sub = self.copy_subtree_into(child, &mut copy);
            copy.append_child(root, sub);
        }
        copy
    }

    /// Copy the subtree rooted at `src` into `dest`, returning the detached
    /// copy's root id in `dest`.
    pub fn copy_subtree_into(&self, src: NodeId, dest: &mut Self) -> NodeId {
        let copy = dest.alloc(self.nodes[src.0].directive.clone());
        for &child in &self.nodes[src.0].children {
            let sub = self.copy_subtree_into(child, dest);
            dest.append_child(copy, sub);
        }
        copy
    }

    /// Name of a `Menu` node: the content of its first `Name` child.
    #[must_use]
    pub fn menu_name(&self, id: NodeId) -> Option<&str> {
        if !matches!(self.nodes[id.0].directive, Directive::Menu) {
            return None;
        }
        self.nodes[id.0].children.iter().find_map(|&c| {
            match &self.nodes[c.0].directive {
                Directive::Name(name) => Some(name.as_str()),
                _ => None,
            }
        })
    }

    /// The single top-level `Menu` under a `Root` node, if present.
    #[must_use]
    pub fn top_menu(&self) -> Option<NodeId> {
        self.nodes[self.root.0]
            .children
            .iter()
            .copied()
            .find(|&c| matches!(self.nodes[c.0].directive, Directive::Menu))
    }

    fn attach(&mut self, parent: NodeId, child: NodeId, pos: usize) {
        assert!(
            self.nodes[child.0].parent.is_none(),
            "node must be detached before it is attached"
        );
        assert!(child != self.root, "the root node cannot be attached");
        self.nodes[child.0].parent = Some(parent);
        let children = &mut self.nodes[parent.0].children;
        if pos >= children.len() {
            children.push(child);
        } else {
            children.insert(pos, child);
        }
    }

    fn child_position(&self, parent: NodeId, child: NodeId) -> usize {
        self.nodes[parent.0]
            .children
            .iter()
            .position(|&c| c == child)
            .expect("child not found under its recorded parent")
    }

    fn mark_dead(&mut self, id: NodeId) {
        self.nodes[id.0].live = false;
        let children = std::mem::take(&mut self.nodes[id.0].children);
        for child in children {
            self.mark_dead(child);
        }
    }
}
