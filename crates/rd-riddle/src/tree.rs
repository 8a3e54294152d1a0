//! Per-riddle page tree with a path index.
//!
//! Trees are immutable once built. Every update (level merge, unlocked credentials) produces a
//! new tree sharing untouched subtrees with the old one through `Arc`.

use crate::data::LevelPagesData;
use crate::data::PageNodeData;
use crate::data::PagesData;
use rd_core::Credentials;
use rd_core::TrackerError;
use rd_core::TrackerResult;
use rd_net::split_path;
use std::collections::BTreeMap;
use std::collections::HashMap;
use std::sync::Arc;

pub const ROOT_PATH: &str = "/";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FolderNode {
    pub path: String,
    pub level_name: String,
    pub credentials: Option<Credentials>,
    pub children: BTreeMap<String, Arc<PageNode>>,
    pub files_found: u32,
    pub files_total: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileNode {
    pub path: String,
    pub level_name: String,
    pub credentials: Option<Credentials>,
    pub access_time: Option<String>,
}

/// A discovered page or folder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PageNode {
    Folder(FolderNode),
    File(FileNode),
}

impl PageNode {
    pub fn path(&self) -> &str {
        match self {
            Self::Folder(folder) => &folder.path,
            Self::File(file) => &file.path,
        }
    }

    pub fn level_name(&self) -> &str {
        match self {
            Self::Folder(folder) => &folder.level_name,
            Self::File(file) => &file.level_name,
        }
    }

    pub fn is_folder(&self) -> bool {
        matches!(self, Self::Folder(_))
    }

    pub fn credentials(&self) -> Option<&Credentials> {
        match self {
            Self::Folder(folder) => folder.credentials.as_ref(),
            Self::File(file) => file.credentials.as_ref(),
        }
    }

    pub fn children(&self) -> Option<&BTreeMap<String, Arc<PageNode>>> {
        match self {
            Self::Folder(folder) => Some(&folder.children),
            Self::File(_) => None,
        }
    }

    fn with_credentials(&self, credentials: Credentials) -> Self {
        let mut updated = self.clone();
        match &mut updated {
            Self::Folder(folder) => folder.credentials = Some(credentials),
            Self::File(file) => file.credentials = Some(credentials),
        }
        updated
    }

    /// Validates raw backend data into a node rooted at `expected_path`.
    pub fn from_data(
        data: &PageNodeData,
        expected_path: &str,
        level_name: &str,
    ) -> TrackerResult<Self> {
        let raw_path = data.path.as_deref().ok_or_else(|| {
            TrackerError::new(
                "riddle.data.path_missing",
                format!("page under `{expected_path}` has no path"),
            )
        })?;

        let path = if raw_path.is_empty() {
            expected_path.to_owned()
        } else {
            canonical_path(raw_path)
        };
        if path != expected_path {
            return Err(TrackerError::new(
                "riddle.data.path_mismatch",
                format!("page `{path}` is stored under `{expected_path}`"),
            ));
        }

        let level_name = data
            .level_name
            .clone()
            .unwrap_or_else(|| level_name.to_owned());
        let credentials = match (&data.username, &data.password) {
            (Some(username), Some(password)) if !username.is_empty() => {
                Some(Credentials::new(username.clone(), password.clone()))
            }
            _ => None,
        };

        if !data.folder {
            return Ok(Self::File(FileNode {
                path,
                level_name,
                credentials,
                access_time: data.access_time.clone(),
            }));
        }

        let raw_children = data.children.as_ref().ok_or_else(|| {
            TrackerError::new(
                "riddle.data.children_missing",
                format!("folder `{path}` has no children map"),
            )
        })?;

        let mut children = BTreeMap::new();
        for (name, child) in raw_children {
            let child_path = join_path(&path, name);
            let node = Self::from_data(child, &child_path, &level_name)?;
            children.insert(name.clone(), Arc::new(node));
        }

        Ok(Self::Folder(FolderNode {
            path,
            level_name,
            credentials,
            children,
            files_found: data.files_found.unwrap_or_default(),
            files_total: data.files_total,
        }))
    }
}

/// Page trees of every level of one riddle, plus a `path → node` index.
///
/// Levels share the riddle's path space; when two levels hold the same path the level indexed
/// last owns the index entry.
#[derive(Debug, Clone, Default)]
pub struct PageTree {
    levels: BTreeMap<String, Arc<PageNode>>,
    index: HashMap<String, Arc<PageNode>>,
}

impl PageTree {
    /// Builds the tree, indexing levels in `order` first and any remaining levels after.
    pub fn build<'a>(
        pages: &PagesData,
        order: impl IntoIterator<Item = &'a str>,
    ) -> TrackerResult<Self> {
        let mut tree = Self::default();
        let mut pending: BTreeMap<&str, &LevelPagesData> = pages
            .iter()
            .map(|(name, level)| (name.as_str(), level))
            .collect();

        for name in order {
            if let Some(level) = pending.remove(name) {
                tree.insert_level(name, level)?;
            }
        }
        for (name, level) in pending {
            tree.insert_level(name, level)?;
        }

        Ok(tree)
    }

    fn insert_level(&mut self, name: &str, level: &LevelPagesData) -> TrackerResult<()> {
        let Some(root) = &level.root else {
            return Ok(());
        };

        let node = Arc::new(PageNode::from_data(root, ROOT_PATH, name)?);
        index_subtree(&mut self.index, &node);
        self.levels.insert(name.to_owned(), node);
        Ok(())
    }

    /// A new tree with the given levels' pages replaced; other levels are shared.
    pub fn merged(&self, pages: &PagesData) -> TrackerResult<Self> {
        let mut merged = self.clone();
        for (name, level) in pages {
            if let Some(previous) = merged.levels.remove(name) {
                unindex_subtree(&mut merged.index, &previous);
            }
            merged.insert_level(name, level)?;
        }
        Ok(merged)
    }

    pub fn lookup(&self, path: &str) -> Option<&Arc<PageNode>> {
        self.index.get(path)
    }

    pub fn level_root(&self, level: &str) -> Option<&Arc<PageNode>> {
        self.levels.get(level)
    }

    pub fn has_level(&self, level: &str) -> bool {
        self.levels.contains_key(level)
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    /// Credentials stored on `path` or its nearest ancestor holding any.
    pub fn unlocked_credentials(&self, path: &str) -> Option<&Credentials> {
        ancestors(path)
            .iter()
            .filter_map(|candidate| self.index.get(candidate))
            .find_map(|node| node.credentials())
    }

    /// A new tree where the node at `path` carries `credentials`, or `None` if `path` is unknown.
    pub fn with_credentials(&self, path: &str, credentials: &Credentials) -> Option<Self> {
        let path = canonical_path(path);
        let owner = self.index.get(&path)?;
        let (level, root) = self
            .levels
            .iter()
            .find(|(_, root)| subtree_holds(root, owner))?;
        let replaced = replace_credentials(root, &path, credentials)?;

        let mut updated = self.clone();
        swap_indexed(&mut updated.index, root, &replaced);
        updated.levels.insert(level.clone(), replaced);
        Some(updated)
    }
}

fn subtree_holds(node: &Arc<PageNode>, target: &Arc<PageNode>) -> bool {
    Arc::ptr_eq(node, target)
        || node
            .children()
            .is_some_and(|children| children.values().any(|child| subtree_holds(child, target)))
}

// Old and new subtrees differ only along the rewritten spine; shared subtrees are skipped.
fn swap_indexed(
    index: &mut HashMap<String, Arc<PageNode>>,
    old: &Arc<PageNode>,
    new: &Arc<PageNode>,
) {
    if Arc::ptr_eq(old, new) {
        return;
    }
    if index
        .get(old.path())
        .is_some_and(|indexed| Arc::ptr_eq(indexed, old))
    {
        index.insert(new.path().to_owned(), Arc::clone(new));
    }
    if let (Some(old_children), Some(new_children)) = (old.children(), new.children()) {
        for (name, old_child) in old_children {
            if let Some(new_child) = new_children.get(name) {
                swap_indexed(index, old_child, new_child);
            }
        }
    }
}

fn index_subtree(index: &mut HashMap<String, Arc<PageNode>>, node: &Arc<PageNode>) {
    index.insert(node.path().to_owned(), Arc::clone(node));
    if let Some(children) = node.children() {
        for child in children.values() {
            index_subtree(index, child);
        }
    }
}

// Only entries still pointing into the old subtree are dropped; paths re-owned by another
// level stay indexed.
fn unindex_subtree(index: &mut HashMap<String, Arc<PageNode>>, node: &Arc<PageNode>) {
    if index
        .get(node.path())
        .is_some_and(|indexed| Arc::ptr_eq(indexed, node))
    {
        index.remove(node.path());
    }
    if let Some(children) = node.children() {
        for child in children.values() {
            unindex_subtree(index, child);
        }
    }
}

fn replace_credentials(
    node: &Arc<PageNode>,
    path: &str,
    credentials: &Credentials,
) -> Option<Arc<PageNode>> {
    if node.path() == path {
        return Some(Arc::new(node.with_credentials(credentials.clone())));
    }

    let PageNode::Folder(folder) = node.as_ref() else {
        return None;
    };

    let (name, child) = folder
        .children
        .iter()
        .find(|(_, child)| is_same_or_descendant(path, child.path()))?;
    let replaced = replace_credentials(child, path, credentials)?;

    let mut rebuilt = folder.clone();
    rebuilt.children.insert(name.clone(), replaced);
    Some(Arc::new(PageNode::Folder(rebuilt)))
}

fn is_same_or_descendant(path: &str, ancestor: &str) -> bool {
    if ancestor == ROOT_PATH || path == ancestor {
        return true;
    }
    path.strip_prefix(ancestor)
        .is_some_and(|rest| rest.starts_with('/'))
}

/// Leading `/`, no trailing `/` except for the root itself.
pub fn canonical_path(path: &str) -> String {
    let tokens = split_path(path);
    format!("/{}", tokens.join("/"))
}

fn join_path(parent: &str, name: &str) -> String {
    if parent == ROOT_PATH {
        format!("/{name}")
    } else {
        format!("{parent}/{name}")
    }
}

/// `path` followed by each of its ancestors, ending with `/`.
pub fn ancestors(path: &str) -> Vec<String> {
    let mut tokens = split_path(path);
    let mut chain = Vec::with_capacity(tokens.len() + 1);
    loop {
        chain.push(format!("/{}", tokens.join("/")));
        if tokens.pop().is_none() {
            break;
        }
    }
    chain
}

/// The longest key of `candidates` that is `path` itself or one of its ancestors.
pub fn find_containing_path<'m, V>(
    path: &str,
    candidates: &'m BTreeMap<String, V>,
) -> Option<&'m str> {
    ancestors(path).iter().find_map(|candidate| {
        candidates
            .get_key_value(candidate)
            .map(|(key, _)| key.as_str())
    })
}

#[cfg(test)]
mod tests {
    use super::PageNode;
    use super::PageTree;
    use super::ancestors;
    use super::canonical_path;
    use super::find_containing_path;
    use crate::data::parse_pages;
    use proptest::prelude::*;
    use rd_core::Credentials;
    use std::collections::BTreeMap;
    use std::sync::Arc;

    const PAGES: &str = r#"{
        "1": {"/": {"path": "", "folder": 1, "filesFound": 2, "children": {
            "index.htm": {"path": "/index.htm", "folder": 0},
            "secret": {"path": "/secret", "folder": 1, "username": "u", "password": "p",
                "children": {
                    "deep": {"path": "/secret/deep", "folder": 1, "children": {
                        "page.htm": {"path": "/secret/deep/page.htm", "folder": 0}
                    }}
                }}
        }}},
        "2": {"/": {"path": "/", "folder": 1, "children": {
            "two.htm": {"path": "/two.htm", "folder": 0}
        }}}
    }"#;

    fn tree() -> PageTree {
        let pages = parse_pages(PAGES).unwrap_or_else(|error| panic!("{error}"));
        PageTree::build(&pages, ["1", "2"]).unwrap_or_else(|error| panic!("{error}"))
    }

    #[test]
    fn index_covers_folders_and_files() {
        let tree = tree();
        for path in ["/", "/index.htm", "/secret", "/secret/deep", "/secret/deep/page.htm", "/two.htm"] {
            assert!(tree.lookup(path).is_some(), "{path} missing");
        }
        assert_eq!(tree.len(), 6);
        assert!(tree.lookup("/secret/").is_none());

        let secret = tree.lookup("/secret").unwrap_or_else(|| unreachable!());
        assert!(secret.is_folder());
        assert_eq!(secret.level_name(), "1");
        // Level 2 was indexed last and owns the root.
        let root = tree.lookup("/").unwrap_or_else(|| unreachable!());
        assert_eq!(root.level_name(), "2");
    }

    #[test]
    fn credentials_are_inherited_from_ancestors() {
        let tree = tree();
        assert_eq!(
            tree.unlocked_credentials("/secret/deep/page.htm"),
            Some(&Credentials::new("u", "p"))
        );
        assert_eq!(
            tree.unlocked_credentials("/secret/deep/missing.htm"),
            Some(&Credentials::new("u", "p"))
        );
        assert_eq!(tree.unlocked_credentials("/index.htm"), None);
    }

    #[test]
    fn child_path_must_match_parent() {
        let pages = parse_pages(
            r#"{"1": {"/": {"path": "/", "folder": true, "children": {
                "a": {"path": "/b", "folder": false}
            }}}}"#,
        );
        let pages = pages.unwrap_or_else(|error| panic!("{error}"));
        let built = PageTree::build(&pages, ["1"]);
        assert!(built.is_err());
        if let Err(error) = built {
            assert_eq!(error.code, "riddle.data.path_mismatch");
        }
    }

    #[test]
    fn folders_require_children_and_nodes_require_paths() {
        let no_children = parse_pages(r#"{"1": {"/": {"path": "/", "folder": true}}}"#);
        let no_children = no_children.unwrap_or_else(|error| panic!("{error}"));
        assert!(PageTree::build(&no_children, ["1"]).is_err());

        let no_path = parse_pages(r#"{"1": {"/": {"folder": false}}}"#);
        let no_path = no_path.unwrap_or_else(|error| panic!("{error}"));
        assert!(PageTree::build(&no_path, ["1"]).is_err());
    }

    #[test]
    fn merge_replaces_only_affected_level() {
        let tree = tree();
        let update = parse_pages(
            r#"{"1": {"/": {"path": "/", "folder": true, "children": {
                "index.htm": {"path": "/index.htm", "folder": false},
                "new.htm": {"path": "/new.htm", "folder": false}
            }}}}"#,
        );
        let update = update.unwrap_or_else(|error| panic!("{error}"));
        let merged = tree.merged(&update).unwrap_or_else(|error| panic!("{error}"));

        assert!(merged.lookup("/new.htm").is_some());
        assert!(merged.lookup("/secret").is_none());
        assert!(merged.lookup("/two.htm").is_some());
        // The old tree is untouched.
        assert!(tree.lookup("/secret").is_some());
        assert!(tree.lookup("/new.htm").is_none());
        let shared_old = tree.level_root("2").unwrap_or_else(|| unreachable!());
        let shared_new = merged.level_root("2").unwrap_or_else(|| unreachable!());
        assert!(Arc::ptr_eq(shared_old, shared_new));
    }

    #[test]
    fn writing_credentials_is_copy_on_write() {
        let tree = tree();
        let credentials = Credentials::new("alice", "s3cret");
        let updated = tree
            .with_credentials("/secret/deep/", &credentials)
            .unwrap_or_else(|| unreachable!());

        assert_eq!(
            updated.unlocked_credentials("/secret/deep/page.htm"),
            Some(&credentials)
        );
        assert_eq!(
            tree.unlocked_credentials("/secret/deep/page.htm"),
            Some(&Credentials::new("u", "p"))
        );
        let page = updated.lookup("/secret/deep/page.htm");
        assert!(page.is_some_and(|node| matches!(node.as_ref(), PageNode::File(_))));
        assert!(tree.with_credentials("/nowhere", &credentials).is_none());
    }

    #[test]
    fn ancestors_walk_up_to_root() {
        assert_eq!(ancestors("/a/b/c"), vec!["/a/b/c", "/a/b", "/a", "/"]);
        assert_eq!(ancestors("/"), vec!["/"]);
        assert_eq!(ancestors("/../x"), vec!["/../x", "/..", "/"]);
        assert_eq!(canonical_path("secret//deep/"), "/secret/deep");
    }

    #[test]
    fn containing_path_prefers_longest_match() {
        let mut missing = BTreeMap::new();
        missing.insert("/secret".to_owned(), "Secret realm");
        missing.insert("/secret/deep".to_owned(), "Deeper realm");
        assert_eq!(
            find_containing_path("/secret/deep/page.htm", &missing),
            Some("/secret/deep")
        );
        assert_eq!(find_containing_path("/secret/other.htm", &missing), Some("/secret"));
        assert_eq!(find_containing_path("/secretive", &missing), None);
        assert_eq!(find_containing_path("/", &missing), None);
    }

    proptest! {
        #[test]
        fn containing_path_is_longest_registered_ancestor(
            path in prop::collection::vec("[a-c]{1,2}", 0..6),
            keys in prop::collection::vec(prop::collection::vec("[a-c]{1,2}", 0..4), 0..8),
        ) {
            let path = format!("/{}", path.join("/"));
            let candidates: BTreeMap<String, ()> = keys
                .iter()
                .map(|tokens| (format!("/{}", tokens.join("/")), ()))
                .collect();

            let expected = candidates
                .keys()
                .filter(|key| {
                    key.as_str() == "/"
                        || path == **key
                        || path.strip_prefix(key.as_str()).is_some_and(|rest| rest.starts_with('/'))
                })
                .max_by_key(|key| key.len())
                .map(String::as_str);

            prop_assert_eq!(find_containing_path(&path, &candidates), expected);
        }
    }
}
