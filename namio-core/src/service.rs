use crate::error::{NamioError, Result};
use crate::lock::LockManager;
use crate::path::DfsPath;
use crate::transport::DirectiveTransport;
use crate::tree::{CommandHandle, DirectoryTree, StorageHandle, StorageSite, TreeStats};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// The naming service: every namespace operation offered to clients, plus
/// storage-node registration.
///
/// Each operation acquires a path lock (shared for reads, exclusive for
/// mutations), consults the directory tree under its monitor, and releases
/// the lock on every exit path. Directive calls to storage nodes during
/// `create_file` and `delete` run with the tree monitor released: the
/// operation snapshots the target handle, performs the call, then reacquires
/// the monitor and revalidates before committing. The in-memory commit is
/// where the operation takes effect.
pub struct NamingService {
    tree: Mutex<DirectoryTree>,
    locks: LockManager,
    transport: Arc<dyn DirectiveTransport>,
}

impl NamingService {
    pub fn new(transport: Arc<dyn DirectiveTransport>) -> Self {
        Self {
            tree: Mutex::new(DirectoryTree::new()),
            locks: LockManager::new(),
            transport,
        }
    }

    /// Locks a path on behalf of a client. Fails with NotFound when the path
    /// is absent; the root is always present.
    pub async fn lock(&self, path: &DfsPath, exclusive: bool) -> Result<()> {
        self.locks.lock(path, exclusive).await?;
        if !self.tree().contains(path) {
            self.locks.unlock(path, exclusive);
            return Err(NamioError::NotFound(format!("no such path: {}", path)));
        }
        Ok(())
    }

    pub fn unlock(&self, path: &DfsPath, exclusive: bool) {
        self.locks.unlock(path, exclusive);
    }

    pub async fn is_directory(&self, path: &DfsPath) -> Result<bool> {
        self.locks.lock(path, false).await?;
        let result = self.tree().is_directory(path);
        self.locks.unlock(path, false);
        result
    }

    pub async fn list(&self, path: &DfsPath) -> Result<Vec<String>> {
        self.locks.lock(path, false).await?;
        let result = self.tree().list(path);
        self.locks.unlock(path, false);
        result
    }

    pub async fn get_storage(&self, path: &DfsPath) -> Result<StorageHandle> {
        self.locks.lock(path, false).await?;
        let result = self.tree().storage_for(path);
        self.locks.unlock(path, false);
        result
    }

    /// Creates a file on the storage node owning the parent directory.
    /// Returns `false` when the path is already present or the node refused
    /// the create.
    pub async fn create_file(&self, path: &DfsPath) -> Result<bool> {
        self.locks.lock(path, true).await?;
        let outcome = self.create_file_locked(path).await;
        self.locks.unlock(path, true);
        outcome
    }

    async fn create_file_locked(&self, path: &DfsPath) -> Result<bool> {
        let (site, command) = match self.tree().prepare_create_file(path)? {
            None => return Ok(false),
            Some(plan) => plan,
        };

        // directive call with the tree monitor released
        let created = self.transport.create(&command, path).await?;
        if !created {
            return Ok(false);
        }

        let committed = self.tree().commit_create_file(path, site)?;
        if !committed {
            tracing::warn!(
                "path {} appeared while node {} created it; node now holds an orphan",
                path,
                command.address
            );
            return Ok(false);
        }
        tracing::info!("created file {} on {}", path, command.address);
        Ok(true)
    }

    /// Records a directory. Directories exist only in naming metadata, so no
    /// storage node is contacted. Returns `false` for the root or an
    /// already-present path.
    pub async fn create_directory(&self, path: &DfsPath) -> Result<bool> {
        self.locks.lock(path, true).await?;
        let result = self.tree().create_directory(path);
        self.locks.unlock(path, true);
        result
    }

    /// Deletes a path, and for a directory its whole subtree, from both the
    /// owning storage node and the tree. Returns `false` for the root or
    /// when the node refused the delete.
    pub async fn delete(&self, path: &DfsPath) -> Result<bool> {
        self.locks.lock(path, true).await?;
        let outcome = self.delete_locked(path).await;
        self.locks.unlock(path, true);
        outcome
    }

    async fn delete_locked(&self, path: &DfsPath) -> Result<bool> {
        let plan = match self.tree().prepare_delete(path)? {
            None => return Ok(false),
            Some(plan) => plan,
        };

        if let Some(command) = &plan.command {
            let deleted = self.transport.delete(command, path).await?;
            if !deleted {
                return Ok(false);
            }
        }

        let removed = self.tree().commit_delete(path)?;
        if removed {
            tracing::info!("deleted {}", path);
        }
        Ok(removed)
    }

    /// Admits a storage node and reconciles its file list with the tree.
    /// Returns the paths the node must delete from its local disk. The merge
    /// happens under an exclusive root lock, so it is atomic with respect to
    /// every other operation.
    pub async fn register(
        &self,
        storage: StorageHandle,
        command: CommandHandle,
        files: &[DfsPath],
    ) -> Result<Vec<DfsPath>> {
        let root = DfsPath::root();
        self.locks.lock(&root, true).await?;
        let result = self.tree().register(storage, command, files);
        self.locks.unlock(&root, true);
        if let Ok(rejected) = &result {
            tracing::info!(
                "registered storage node with {} file(s), {} rejected",
                files.len(),
                rejected.len()
            );
        }
        result
    }

    pub fn nodes(&self) -> Vec<StorageSite> {
        self.tree().sites().to_vec()
    }

    pub fn stats(&self) -> TreeStats {
        self.tree().stats()
    }

    pub fn lock_queue_depth(&self) -> usize {
        self.locks.queue_depth()
    }

    /// Cancels every waiting lock request and refuses new ones. Called once
    /// on server shutdown.
    pub fn shutdown(&self) {
        self.locks.close();
    }

    fn tree(&self) -> MutexGuard<'_, DirectoryTree> {
        self.tree.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
