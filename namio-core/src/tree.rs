use crate::error::{NamioError, Result};
use crate::path::DfsPath;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Remote reference to a storage node's client (data read) interface.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StorageHandle {
    pub address: String,
}

/// Remote reference to a storage node's command (create/delete) interface.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CommandHandle {
    pub address: String,
}

/// One registered storage node. Nodes are admitted by `register`, kept for
/// the life of the server, and addressed internally by their index in the
/// site table.
#[derive(Debug, Clone)]
pub struct StorageSite {
    pub storage: StorageHandle,
    pub command: CommandHandle,
    pub registered_at: DateTime<Utc>,
}

pub type SiteId = usize;

/// Outcome of validating a `delete` before the directive call goes out.
#[derive(Debug, Clone)]
pub struct DeletePlan {
    /// Where the delete directive goes; `None` when no registration ever
    /// covered the path, in which case there is nothing to delete on disk.
    pub command: Option<CommandHandle>,
}

#[derive(Debug, Default)]
struct DirNode {
    children: HashMap<String, Node>,
    // created by create_directory rather than implied by a descendant
    explicit: bool,
    // placement site inherited from the registration that first covered
    // this directory, or from the parent at create_directory time
    site: Option<SiteId>,
}

#[derive(Debug)]
enum Node {
    Dir(DirNode),
    File { site: SiteId },
}

enum NodeRef<'a> {
    Dir(&'a DirNode),
    File(SiteId),
}

#[derive(Debug, Clone, Copy, Default)]
pub struct TreeStats {
    pub files: usize,
    pub directories: usize,
}

/// The in-memory namespace: a tree of directories and files rooted at `/`,
/// each file mapped to the storage node hosting its contents.
///
/// The tree holds pure metadata. Callers are responsible for path locking
/// and for issuing storage-node directives; the mutating operations here are
/// split into a prepare step (validate and snapshot handles) and a commit
/// step (revalidate and apply) so the directive RPC can run without the tree
/// monitor held.
#[derive(Debug, Default)]
pub struct DirectoryTree {
    root: DirNode,
    sites: Vec<StorageSite>,
}

impl DirectoryTree {
    pub fn new() -> Self {
        Self::default()
    }

    /// True when the path is an explicitly created file or directory, an
    /// ancestor of one, or the root.
    pub fn contains(&self, path: &DfsPath) -> bool {
        self.find(path).is_some()
    }

    /// Whether the path names a directory. The root always does.
    pub fn is_directory(&self, path: &DfsPath) -> Result<bool> {
        match self.find(path) {
            Some(NodeRef::Dir(_)) => Ok(true),
            Some(NodeRef::File(_)) => Ok(false),
            None => Err(NamioError::NotFound(format!("no such path: {}", path))),
        }
    }

    /// Names of the direct children of a directory, sorted.
    pub fn list(&self, path: &DfsPath) -> Result<Vec<String>> {
        match self.find(path) {
            Some(NodeRef::Dir(dir)) => {
                let mut names: Vec<String> = dir.children.keys().cloned().collect();
                names.sort();
                Ok(names)
            }
            Some(NodeRef::File(_)) => {
                Err(NamioError::NotFound(format!("not a directory: {}", path)))
            }
            None => Err(NamioError::NotFound(format!("no such path: {}", path))),
        }
    }

    /// The storage handle hosting a file. Directories have no storage.
    pub fn storage_for(&self, path: &DfsPath) -> Result<StorageHandle> {
        match self.find(path) {
            Some(NodeRef::File(site)) => Ok(self.site(site)?.storage.clone()),
            _ => Err(NamioError::NotFound(format!("no such file: {}", path))),
        }
    }

    /// Validates a file creation and picks the hosting node: the site
    /// recorded on the nearest existing ancestor of the new file.
    ///
    /// Returns `None` when the path is already present (the operation is a
    /// no-op, not an error).
    pub fn prepare_create_file(&self, path: &DfsPath) -> Result<Option<(SiteId, CommandHandle)>> {
        if self.find(path).is_some() {
            return Ok(None);
        }
        let Some(parent) = path.parent() else {
            return Ok(None); // the root always exists
        };
        self.require_directory(&parent)?;
        if self.sites.is_empty() {
            return Err(NamioError::NoStorage);
        }
        let site = self.placement_site(&parent).unwrap_or(0);
        let command = self.site(site)?.command.clone();
        Ok(Some((site, command)))
    }

    /// Records a file whose create directive has succeeded. Returns `false`
    /// if the path appeared while the directive was in flight.
    pub fn commit_create_file(&mut self, path: &DfsPath, site: SiteId) -> Result<bool> {
        if self.find(path).is_some() {
            return Ok(false);
        }
        let (Some(parent), Some(name)) = (path.parent(), path.last()) else {
            return Ok(false);
        };
        self.require_directory(&parent)?;
        let Some(dir) = self.dir_mut(&parent) else {
            return Err(NamioError::NotFound(format!(
                "parent of {} disappeared",
                path
            )));
        };
        dir.children.insert(name.to_string(), Node::File { site });
        Ok(true)
    }

    /// Creates a directory entry. Directories live only in the tree; no
    /// storage node is contacted. Returns `false` for the root or an
    /// already-present path.
    pub fn create_directory(&mut self, path: &DfsPath) -> Result<bool> {
        if self.find(path).is_some() {
            return Ok(false);
        }
        let (Some(parent), Some(name)) = (path.parent(), path.last()) else {
            return Ok(false);
        };
        self.require_directory(&parent)?;
        let site = self.placement_site(&parent);
        let Some(dir) = self.dir_mut(&parent) else {
            return Err(NamioError::NotFound(format!(
                "parent of {} disappeared",
                path
            )));
        };
        dir.children.insert(
            name.to_string(),
            Node::Dir(DirNode {
                children: HashMap::new(),
                explicit: true,
                site,
            }),
        );
        Ok(true)
    }

    /// Validates a deletion and snapshots the owning node's command handle.
    /// Returns `None` for the root, which can never be deleted.
    pub fn prepare_delete(&self, path: &DfsPath) -> Result<Option<DeletePlan>> {
        if path.is_root() {
            return Ok(None);
        }
        match self.find(path) {
            None => Err(NamioError::NotFound(format!("no such path: {}", path))),
            Some(NodeRef::File(site)) => Ok(Some(DeletePlan {
                command: Some(self.site(site)?.command.clone()),
            })),
            Some(NodeRef::Dir(dir)) => {
                let command = match dir.site {
                    Some(site) => Some(self.site(site)?.command.clone()),
                    None => None,
                };
                Ok(Some(DeletePlan { command }))
            }
        }
    }

    /// Removes a path and, for a directory, its entire subtree. Implicit
    /// directories left childless by the removal cease to exist; explicitly
    /// created directories stay until deleted themselves.
    pub fn commit_delete(&mut self, path: &DfsPath) -> Result<bool> {
        if path.is_root() {
            return Ok(false);
        }
        if self.find(path).is_none() {
            return Err(NamioError::NotFound(format!("no such path: {}", path)));
        }
        let components: Vec<&str> = path.iter().collect();
        remove_subtree(&mut self.root, &components);
        Ok(true)
    }

    /// Admits a storage node and merges its file list into the tree.
    ///
    /// The root and any path that cannot be inserted without breaking the
    /// tree (already present, or shadowed by an existing file) are returned
    /// for the node to delete locally; everything else becomes a file hosted
    /// by the new node. Directories created or first covered by this walk
    /// adopt the node as their placement site.
    pub fn register(
        &mut self,
        storage: StorageHandle,
        command: CommandHandle,
        files: &[DfsPath],
    ) -> Result<Vec<DfsPath>> {
        if self
            .sites
            .iter()
            .any(|s| s.storage == storage || s.command == command)
        {
            return Err(NamioError::AlreadyRegistered(storage.address));
        }

        let site = self.sites.len();
        let mut rejected = Vec::new();
        for file in files {
            let components: Vec<&str> = file.iter().collect();
            if file.is_root() || !can_insert_file(&self.root, &components) {
                rejected.push(file.clone());
            } else {
                insert_registered_file(&mut self.root, &components, site);
            }
        }

        self.sites.push(StorageSite {
            storage,
            command,
            registered_at: Utc::now(),
        });
        Ok(rejected)
    }

    pub fn sites(&self) -> &[StorageSite] {
        &self.sites
    }

    pub fn site_count(&self) -> usize {
        self.sites.len()
    }

    pub fn stats(&self) -> TreeStats {
        let mut stats = TreeStats::default();
        count_nodes(&self.root, &mut stats);
        stats
    }

    fn site(&self, id: SiteId) -> Result<&StorageSite> {
        self.sites
            .get(id)
            .ok_or_else(|| NamioError::Internal(format!("unknown storage site {}", id)))
    }

    fn require_directory(&self, path: &DfsPath) -> Result<()> {
        match self.find(path) {
            Some(NodeRef::Dir(_)) => Ok(()),
            Some(NodeRef::File(_)) => Err(NamioError::NotFound(format!(
                "not a directory: {}",
                path
            ))),
            None => Err(NamioError::NotFound(format!("no such path: {}", path))),
        }
    }

    // Deepest site assignment on the directory chain down to `path`.
    fn placement_site(&self, path: &DfsPath) -> Option<SiteId> {
        let mut dir = &self.root;
        let mut nearest = dir.site;
        for component in path.iter() {
            match dir.children.get(component) {
                Some(Node::Dir(child)) => {
                    dir = child;
                    if child.site.is_some() {
                        nearest = child.site;
                    }
                }
                _ => break,
            }
        }
        nearest
    }

    fn find(&self, path: &DfsPath) -> Option<NodeRef<'_>> {
        let mut dir = &self.root;
        let mut components = path.iter().peekable();
        while let Some(component) = components.next() {
            match dir.children.get(component) {
                Some(Node::Dir(child)) => dir = child,
                Some(Node::File { site }) => {
                    return if components.peek().is_none() {
                        Some(NodeRef::File(*site))
                    } else {
                        None
                    };
                }
                None => return None,
            }
        }
        Some(NodeRef::Dir(dir))
    }

    fn dir_mut(&mut self, path: &DfsPath) -> Option<&mut DirNode> {
        let mut dir = &mut self.root;
        for component in path.iter() {
            match dir.children.get_mut(component) {
                Some(Node::Dir(child)) => dir = child,
                _ => return None,
            }
        }
        Some(dir)
    }
}

// A registered file is insertable when no existing entry occupies its path
// and no existing file sits on the way down to it.
fn can_insert_file(dir: &DirNode, components: &[&str]) -> bool {
    match components {
        [] => false,
        [name] => !dir.children.contains_key(*name),
        [head, rest @ ..] => match dir.children.get(*head) {
            None => true,
            Some(Node::Dir(child)) => can_insert_file(child, rest),
            Some(Node::File { .. }) => false,
        },
    }
}

// Only called after can_insert_file succeeds, so the walk cannot hit a file.
fn insert_registered_file(dir: &mut DirNode, components: &[&str], site: SiteId) {
    if dir.site.is_none() {
        dir.site = Some(site);
    }
    match components {
        [] => {}
        [name] => {
            dir.children.insert(name.to_string(), Node::File { site });
        }
        [head, rest @ ..] => {
            let child = dir
                .children
                .entry(head.to_string())
                .or_insert_with(|| Node::Dir(DirNode::default()));
            if let Node::Dir(child) = child {
                insert_registered_file(child, rest, site);
            }
        }
    }
}

// Removes the entry at `components` and prunes implicit directories left
// empty on the way back up. The root is never removed.
fn remove_subtree(dir: &mut DirNode, components: &[&str]) {
    match components {
        [] => {}
        [name] => {
            dir.children.remove(*name);
        }
        [head, rest @ ..] => {
            if let Some(Node::Dir(child)) = dir.children.get_mut(*head) {
                remove_subtree(child, rest);
                if !child.explicit && child.children.is_empty() {
                    dir.children.remove(*head);
                }
            }
        }
    }
}

fn count_nodes(dir: &DirNode, stats: &mut TreeStats) {
    for child in dir.children.values() {
        match child {
            Node::File { .. } => stats.files += 1,
            Node::Dir(child) => {
                stats.directories += 1;
                count_nodes(child, stats);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn path(s: &str) -> DfsPath {
        DfsPath::parse(s).unwrap()
    }

    fn site(n: u32) -> (StorageHandle, CommandHandle) {
        (
            StorageHandle {
                address: format!("127.0.0.1:{}", 7000 + n),
            },
            CommandHandle {
                address: format!("127.0.0.1:{}", 8000 + n),
            },
        )
    }

    fn register(tree: &mut DirectoryTree, n: u32, files: &[&str]) -> Vec<DfsPath> {
        let (storage, command) = site(n);
        let files: Vec<DfsPath> = files.iter().map(|f| path(f)).collect();
        tree.register(storage, command, &files).unwrap()
    }

    #[test]
    fn registration_builds_the_namespace() {
        let mut tree = DirectoryTree::new();
        let rejected = register(&mut tree, 1, &["/a/b", "/c"]);
        assert!(rejected.is_empty());

        assert_eq!(tree.list(&path("/")).unwrap(), vec!["a", "c"]);
        assert_eq!(tree.list(&path("/a")).unwrap(), vec!["b"]);
        assert!(tree.is_directory(&path("/a")).unwrap());
        assert!(!tree.is_directory(&path("/a/b")).unwrap());
        assert_eq!(tree.storage_for(&path("/a/b")).unwrap(), site(1).0);
    }

    #[test]
    fn duplicate_paths_are_rejected_on_registration() {
        let mut tree = DirectoryTree::new();
        register(&mut tree, 1, &["/x"]);
        let rejected = register(&mut tree, 2, &["/x", "/y"]);

        assert_eq!(rejected, vec![path("/x")]);
        assert_eq!(tree.storage_for(&path("/x")).unwrap(), site(1).0);
        assert_eq!(tree.storage_for(&path("/y")).unwrap(), site(2).0);
    }

    #[test]
    fn duplicate_handles_are_refused() {
        let mut tree = DirectoryTree::new();
        register(&mut tree, 1, &["/x"]);
        let (storage, command) = site(1);
        let result = tree.register(storage, command, &[]);
        assert!(matches!(result, Err(NamioError::AlreadyRegistered(_))));
        assert_eq!(tree.site_count(), 1);
    }

    #[test]
    fn root_is_always_rejected_and_the_tree_untouched() {
        let mut tree = DirectoryTree::new();
        let rejected = register(&mut tree, 1, &["/"]);
        assert_eq!(rejected, vec![DfsPath::root()]);
        assert!(tree.list(&path("/")).unwrap().is_empty());
        // the node itself is still admitted
        assert_eq!(tree.site_count(), 1);
    }

    #[test]
    fn files_cannot_shadow_files() {
        let mut tree = DirectoryTree::new();
        register(&mut tree, 1, &["/a"]);
        let rejected = register(&mut tree, 2, &["/a/b"]);
        assert_eq!(rejected, vec![path("/a/b")]);
        assert!(!tree.contains(&path("/a/b")));
    }

    #[test]
    fn root_presence_and_absences() {
        let tree = DirectoryTree::new();
        assert!(tree.contains(&DfsPath::root()));
        assert!(tree.is_directory(&DfsPath::root()).unwrap());
        assert!(!tree.contains(&path("/missing")));
        assert!(matches!(
            tree.is_directory(&path("/missing")),
            Err(NamioError::NotFound(_))
        ));
        assert!(matches!(
            tree.list(&path("/missing")),
            Err(NamioError::NotFound(_))
        ));
    }

    #[test]
    fn create_file_places_on_the_nearest_ancestor_site() {
        let mut tree = DirectoryTree::new();
        register(&mut tree, 1, &["/a/b"]);
        register(&mut tree, 2, &["/d/e"]);

        let (site_id, command) = tree.prepare_create_file(&path("/a/c")).unwrap().unwrap();
        assert_eq!(command, site(1).1);
        assert!(tree.commit_create_file(&path("/a/c"), site_id).unwrap());
        assert_eq!(tree.storage_for(&path("/a/c")).unwrap(), site(1).0);

        let (site_id, command) = tree.prepare_create_file(&path("/d/f")).unwrap().unwrap();
        assert_eq!(command, site(2).1);
        assert!(tree.commit_create_file(&path("/d/f"), site_id).unwrap());
        assert_eq!(tree.storage_for(&path("/d/f")).unwrap(), site(2).0);
    }

    #[test]
    fn create_file_validations() {
        let mut tree = DirectoryTree::new();
        assert!(matches!(
            tree.prepare_create_file(&path("/foo")),
            Err(NamioError::NoStorage)
        ));

        register(&mut tree, 1, &["/a/b"]);
        // present paths and the root are no-ops
        assert!(tree.prepare_create_file(&path("/a/b")).unwrap().is_none());
        assert!(tree.prepare_create_file(&DfsPath::root()).unwrap().is_none());
        // parent must be a directory
        assert!(matches!(
            tree.prepare_create_file(&path("/a/b/c")),
            Err(NamioError::NotFound(_))
        ));
        assert!(matches!(
            tree.prepare_create_file(&path("/nope/c")),
            Err(NamioError::NotFound(_))
        ));
    }

    #[test]
    fn commit_create_file_detects_a_path_that_appeared() {
        let mut tree = DirectoryTree::new();
        register(&mut tree, 1, &["/a/b"]);
        let (site_id, _) = tree.prepare_create_file(&path("/a/c")).unwrap().unwrap();
        assert!(tree.commit_create_file(&path("/a/c"), site_id).unwrap());
        assert!(!tree.commit_create_file(&path("/a/c"), site_id).unwrap());
    }

    #[test]
    fn create_directory_is_metadata_only() {
        let mut tree = DirectoryTree::new();
        register(&mut tree, 1, &["/a/b"]);

        assert!(tree.create_directory(&path("/a/dir")).unwrap());
        assert!(tree.is_directory(&path("/a/dir")).unwrap());
        assert!(tree.list(&path("/a/dir")).unwrap().is_empty());

        // root and present paths
        assert!(!tree.create_directory(&DfsPath::root()).unwrap());
        assert!(!tree.create_directory(&path("/a/dir")).unwrap());
        assert!(!tree.create_directory(&path("/a/b")).unwrap());

        // a directory under it inherits the same placement
        let (_, command) = tree.prepare_create_file(&path("/a/dir/f")).unwrap().unwrap();
        assert_eq!(command, site(1).1);
    }

    #[test]
    fn create_directory_without_any_registration() {
        let mut tree = DirectoryTree::new();
        assert!(tree.create_directory(&path("/d")).unwrap());
        assert!(tree.is_directory(&path("/d")).unwrap());
        // no registration ever covered it, so a delete has no directive target
        let plan = tree.prepare_delete(&path("/d")).unwrap().unwrap();
        assert!(plan.command.is_none());
    }

    #[test]
    fn delete_removes_the_whole_subtree() {
        let mut tree = DirectoryTree::new();
        register(&mut tree, 1, &["/a/b/c", "/a/b/d", "/a/e"]);

        let plan = tree.prepare_delete(&path("/a/b")).unwrap().unwrap();
        assert_eq!(plan.command, Some(site(1).1));
        assert!(tree.commit_delete(&path("/a/b")).unwrap());

        assert!(!tree.contains(&path("/a/b")));
        assert!(!tree.contains(&path("/a/b/c")));
        assert!(!tree.contains(&path("/a/b/d")));
        assert!(tree.contains(&path("/a/e")));
    }

    #[test]
    fn delete_prunes_emptied_implicit_directories() {
        let mut tree = DirectoryTree::new();
        register(&mut tree, 1, &["/a/b"]);
        assert!(tree.commit_delete(&path("/a/b")).unwrap());
        // /a existed only to hold /a/b
        assert!(!tree.contains(&path("/a")));
        assert_eq!(tree.list(&path("/")).unwrap(), Vec::<String>::new());
    }

    #[test]
    fn delete_keeps_explicit_directories() {
        let mut tree = DirectoryTree::new();
        register(&mut tree, 1, &["/seed"]);
        assert!(tree.create_directory(&path("/d")).unwrap());
        let (site_id, _) = tree.prepare_create_file(&path("/d/f")).unwrap().unwrap();
        assert!(tree.commit_create_file(&path("/d/f"), site_id).unwrap());

        assert!(tree.commit_delete(&path("/d/f")).unwrap());
        assert!(tree.contains(&path("/d")));
        assert!(tree.list(&path("/d")).unwrap().is_empty());
    }

    #[test]
    fn delete_validations() {
        let mut tree = DirectoryTree::new();
        assert!(tree.prepare_delete(&DfsPath::root()).unwrap().is_none());
        assert!(matches!(
            tree.prepare_delete(&path("/missing")),
            Err(NamioError::NotFound(_))
        ));
    }

    #[test]
    fn storage_for_rejects_directories() {
        let mut tree = DirectoryTree::new();
        register(&mut tree, 1, &["/a/b"]);
        assert!(matches!(
            tree.storage_for(&path("/a")),
            Err(NamioError::NotFound(_))
        ));
        assert!(matches!(
            tree.storage_for(&DfsPath::root()),
            Err(NamioError::NotFound(_))
        ));
    }

    #[test]
    fn stats_count_files_and_directories() {
        let mut tree = DirectoryTree::new();
        register(&mut tree, 1, &["/a/b", "/a/c", "/d"]);
        let stats = tree.stats();
        assert_eq!(stats.files, 3);
        assert_eq!(stats.directories, 1);
    }
}
