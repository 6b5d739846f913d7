use super::{Directive, MenuTree, NodeId};
use crate::error::MenuError;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;

/// Seam for turning a menu file into a directive tree.
///
/// The engine only ever hands this a canonical path and expects a tree whose
/// root is [`Directive::Root`] with a single `Menu` child, or a structured
/// parse failure. Implementations are free to support any on-disk dialect.
pub trait MenuFileLoader {
    /// Parse `path` into a directive tree.
    ///
    /// # Errors
    ///
    /// Returns [`MenuError::Parse`] with file and line context on malformed
    /// input.
    fn load(&self, path: &Path) -> Result<MenuTree, MenuError>;
}

/// Built-in loader for the XML menu-file dialect.
///
/// Parses elements and text content only; attributes are skipped, since no
/// directive the engine evaluates carries one. Unknown elements are
/// recorded by name as [`Directive::Passthrough`]; their children and text
/// are discarded.
#[derive(Debug, Default)]
pub struct XmlMenuLoader;

impl MenuFileLoader for XmlMenuLoader {
    fn load(&self, path: &Path) -> Result<MenuTree, MenuError> {
        let text = std::fs::read_to_string(path).map_err(|e| MenuError::Parse {
            file: path.to_path_buf(),
            line: 0,
            message: format!("unreadable: {e}"),
        })?;
        parse_document(&text, path)
    }
}

/// Shares parsed menu-file roots across resolutions.
///
/// Each canonical file is parsed once; every resolution that references it
/// gets the same `Arc` snapshot and deep-copies before mutating. The
/// override write path edits the registry copy in place (via `edit`), which
/// is what makes the edit visible to the next resolution without a reparse.
pub struct FileRegistry {
    loader: Box<dyn MenuFileLoader + Send + Sync>,
    files: HashMap<PathBuf, Arc<MenuTree>>,
}

impl FileRegistry {
    /// Registry backed by the built-in XML loader.
    #[must_use]
    pub fn new() -> Self {
        Self::with_loader(Box::new(XmlMenuLoader))
    }

    /// Registry backed by a caller-provided loader.
    #[must_use]
    pub fn with_loader(loader: Box<dyn MenuFileLoader + Send + Sync>) -> Self {
        Self {
            loader,
            files: HashMap::new(),
        }
    }

    /// Load (or reuse) the pristine tree for a canonical path.
    ///
    /// A missing or unreadable file yields `Ok(None)`: absent optional
    /// inputs are routine when resolving merges.
    ///
    /// # Errors
    ///
    /// Propagates [`MenuError::Parse`] from the loader.
    pub fn load(&mut self, canonical: &Path) -> Result<Option<Arc<MenuTree>>, MenuError> {
        if let Some(tree) = self.files.get(canonical) {
            return Ok(Some(Arc::clone(tree)));
        }
        if !canonical.is_file() {
            debug!(path = %canonical.display(), "menu file missing, skipping");
            return Ok(None);
        }
        let tree = Arc::new(self.loader.load(canonical)?);
        self.files
            .insert(canonical.to_path_buf(), Arc::clone(&tree));
        Ok(Some(tree))
    }

    /// Mutable access to a cached pristine tree, for the override write
    /// path. Clones the tree first if resolutions still share it.
    pub fn edit(&mut self, canonical: &Path) -> Option<&mut MenuTree> {
        self.files.get_mut(canonical).map(Arc::make_mut)
    }

    /// Drop a cached tree so the next load reparses from disk.
    pub fn forget(&mut self, canonical: &Path) {
        self.files.remove(canonical);
    }
}

impl Default for FileRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for FileRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileRegistry")
            .field("files", &self.files.len())
            .finish_non_exhaustive()
    }
}

struct RawElement {
    name: String,
    text: String,
    children: Vec<RawElement>,
}

struct Scanner<'a> {
    bytes: &'a [u8],
    pos: usize,
    line: usize,
    file: &'a Path,
}

impl<'a> Scanner<'a> {
    fn new(text: &'a str, file: &'a Path) -> Self {
        Self {
            bytes: text.as_bytes(),
            pos: 0,
            line: 1,
            file,
        }
    }

    fn error(&self, message: impl Into<String>) -> MenuError {
        MenuError::Parse {
            file: self.file.to_path_buf(),
            line: self.line,
            message: message.into(),
        }
    }

    fn peek(&self) -> Option<u8> {
        self.bytes.get(self.pos).copied()
    }

    fn bump(&mut self) -> Option<u8> {
        let b = self.peek()?;
        self.pos += 1;
        if b == b'\n' {
            self.line += 1;
        }
        Some(b)
    }

    fn starts_with(&self, literal: &str) -> bool {
        self.bytes[self.pos..].starts_with(literal.as_bytes())
    }

    fn eat(&mut self, literal: &str) -> bool {
        if self.starts_with(literal) {
            for _ in 0..literal.len() {
                self.bump();
            }
            true
        } else {
            false
        }
    }

    fn skip_whitespace(&mut self) {
        while matches!(self.peek(), Some(b' ' | b'\t' | b'\r' | b'\n')) {
            self.bump();
        }
    }

    /// Consume up to and including `literal`.
    fn skip_past(&mut self, literal: &str) -> Result<(), MenuError> {
        loop {
            if self.eat(literal) {
                return Ok(());
            }
            if self.bump().is_none() {
                return Err(self.error(format!("unterminated construct, expected {literal:?}")));
            }
        }
    }

    fn read_name(&mut self) -> Result<String, MenuError> {
        let start = self.pos;
        while matches!(
            self.peek(),
            Some(b'a'..=b'z' | b'A'..=b'Z' | b'0'..=b'9' | b'_' | b'-')
        ) {
            self.bump();
        }
        if self.pos == start {
            return Err(self.error("expected an element name"));
        }
        Ok(String::from_utf8_lossy(&self.bytes[start..self.pos]).into_owned())
    }

    /// Skip attributes after an element name. Returns true for `/>`.
    fn skip_tag_rest(&mut self) -> Result<bool, MenuError> {
        loop {
            match self.peek() {
                Some(b'"') | Some(b'\'') => {
                    let quote = self.bump().unwrap_or_default();
                    loop {
                        match self.bump() {
                            Some(b) if b == quote => break,
                            Some(_) => {}
                            None => return Err(self.error("unterminated attribute value")),
                        }
                    }
                }
                Some(b'/') => {
                    self.bump();
                    if self.eat(">") {
                        return Ok(true);
                    }
                }
                Some(b'>') => {
                    self.bump();
                    return Ok(false);
                }
                Some(_) => {
                    self.bump();
                }
                None => return Err(self.error("unterminated tag")),
            }
        }
    }

    fn read_text_until_tag(&mut self, out: &mut Vec<u8>) -> Result<(), MenuError> {
        while let Some(b) = self.peek() {
            if b == b'<' {
                return Ok(());
            }
            self.bump();
            if b == b'&' {
                let mut buf = [0u8; 4];
                out.extend_from_slice(self.read_entity()?.encode_utf8(&mut buf).as_bytes());
            } else {
                out.push(b);
            }
        }
        Err(self.error("unexpected end of file inside element content"))
    }

    fn read_entity(&mut self) -> Result<char, MenuError> {
        let start = self.pos;
        for _ in 0..6 {
            match self.bump() {
                Some(b';') => {
                    let name = &self.bytes[start..self.pos - 1];
                    return Ok(match name {
                        b"amp" => '&',
                        b"lt" => '<',
                        b"gt" => '>',
                        b"quot" => '"',
                        b"apos" => '\'',
                        _ => {
                            return Err(self.error(format!(
                                "unknown entity &{};",
                                String::from_utf8_lossy(name)
                            )));
                        }
                    });
                }
                Some(_) => {}
                None => break,
            }
        }
        Err(self.error("unterminated entity reference"))
    }

    fn parse_element(&mut self) -> Result<RawElement, MenuError> {
        if !self.eat("<") {
            return Err(self.error("expected an element"));
        }
        let name = self.read_name()?;
        let self_closing = self.skip_tag_rest()?;

        let mut element = RawElement {
            name,
            text: String::new(),
            children: Vec::new(),
        };
        if self_closing {
            return Ok(element);
        }

        let mut text = Vec::new();
        loop {
            self.read_text_until_tag(&mut text)?;
            if self.starts_with("<!--") {
                self.skip_past("-->")?;
            } else if self.starts_with("</") {
                self.eat("</");
                let close = self.read_name()?;
                if close != element.name {
                    return Err(self.error(format!(
                        "mismatched closing tag </{}> for <{}>",
                        close, element.name
                    )));
                }
                self.skip_whitespace();
                if !self.eat(">") {
                    return Err(self.error("malformed closing tag"));
                }
                element.text = String::from_utf8_lossy(&text).trim().to_string();
                return Ok(element);
            } else {
                element.children.push(self.parse_element()?);
            }
        }
    }
}

/// Parse one menu file into a directive tree.
///
/// # Errors
///
/// Returns [`MenuError::Parse`] on malformed XML or when the top-level
/// element is not `<Menu>`.
pub fn parse_document(text: &str, file: &Path) -> Result<MenuTree, MenuError> {
    let mut scanner = Scanner::new(text, file);

    // Prolog, doctype, leading comments.
    loop {
        scanner.skip_whitespace();
        if scanner.starts_with("<?") {
            scanner.skip_past("?>")?;
        } else if scanner.starts_with("<!--") {
            scanner.skip_past("-->")?;
        } else if scanner.starts_with("<!") {
            scanner.skip_past(">")?;
        } else {
            break;
        }
    }

    let top = scanner.parse_element()?;
    if top.name != "Menu" {
        return Err(scanner.error(format!(
            "top-level element must be <Menu>, found <{}>",
            top.name
        )));
    }

    let mut tree = MenuTree::new(Directive::Root);
    let root = tree.root();
    convert_element(&top, &mut tree, root);
    Ok(tree)
}

/// Convert one parsed element (and its subtree) into directive nodes.
fn convert_element(raw: &RawElement, tree: &mut MenuTree, parent: NodeId) {
    let directive = match raw.name.as_str() {
        "Menu" => Directive::Menu,
        "Include" => Directive::Include,
        "Exclude" => Directive::Exclude,
        "And" => Directive::And,
        "Or" => Directive::Or,
        "Not" => Directive::Not,
        "Move" => Directive::Move,
        "Name" => Directive::Name(raw.text.clone()),
        "AppDir" => Directive::AppDir(raw.text.clone()),
        "DirectoryDir" => Directive::DirectoryDir(raw.text.clone()),
        "LegacyDir" => Directive::LegacyDir(raw.text.clone()),
        "Directory" => Directive::Directory(raw.text.clone()),
        "Category" => Directive::Category(raw.text.clone()),
        "Filename" => Directive::Filename(raw.text.clone()),
        "MergeFile" => Directive::MergeFile(raw.text.clone()),
        "MergeDir" => Directive::MergeDir(raw.text.clone()),
        "Old" => Directive::Old(raw.text.clone()),
        "New" => Directive::New(raw.text.clone()),
        "All" => Directive::All,
        "Deleted" => Directive::Deleted,
        "NotDeleted" => Directive::NotDeleted,
        "OnlyUnallocated" => Directive::OnlyUnallocated,
        "NotOnlyUnallocated" => Directive::NotOnlyUnallocated,
        "DefaultAppDirs" => Directive::DefaultAppDirs,
        "DefaultDirectoryDirs" => Directive::DefaultDirectoryDirs,
        "DefaultMergeDirs" => Directive::DefaultMergeDirs,
        "KDELegacyDirs" => Directive::KdeLegacyDirs,
        other => {
            debug!(element = other, "unrecognized element kept as passthrough");
            Directive::Passthrough(other.to_string())
        }
    };

    let keep_children = matches!(
        directive,
        Directive::Menu
            | Directive::Include
            | Directive::Exclude
            | Directive::And
            | Directive::Or
            | Directive::Not
            | Directive::Move
    );

    let node = tree.alloc(directive);
    tree.append_child(parent, node);
    if keep_children {
        for child in &raw.children {
            convert_element(child, tree, node);
        }
    }
}
