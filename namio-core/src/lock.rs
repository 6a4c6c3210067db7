use crate::error::{NamioError, Result};
use crate::path::DfsPath;
use std::sync::Mutex;
use tokio::sync::oneshot;

/// Hierarchical reader/writer locks over filesystem paths.
///
/// A shared lock on a path may be held by any number of callers at once; an
/// exclusive lock excludes everyone else. Locks on different paths interact
/// through the hierarchy: two requests conflict when their paths are related
/// (one is a subpath of the other) and at least one of them is exclusive.
/// Locking a path therefore implies a shared hold on every ancestor and
/// covers the whole subtree beneath it.
///
/// Requests are granted in arrival order: a request waits while any earlier
/// request, held or still queued, conflicts with it. This keeps writers from
/// starving behind a stream of readers and gives a deterministic grant order.
///
/// `lock` suspends; `unlock` never does. Dropping a suspended `lock` future
/// withdraws its queue entry, and `close` fails every queued waiter with
/// `Cancelled`.
pub struct LockManager {
    queue: Mutex<LockQueue>,
}

#[derive(Default)]
struct LockQueue {
    next_seq: u64,
    // in arrival order; an entry with no waker holds its lock
    requests: Vec<LockRequest>,
    closed: bool,
}

struct LockRequest {
    seq: u64,
    path: DfsPath,
    exclusive: bool,
    waker: Option<oneshot::Sender<()>>,
}

fn conflicts(earlier: &LockRequest, path: &DfsPath, exclusive: bool) -> bool {
    (earlier.exclusive || exclusive)
        && (earlier.path.is_subpath(path) || path.is_subpath(&earlier.path))
}

impl LockManager {
    pub fn new() -> Self {
        Self {
            queue: Mutex::new(LockQueue::default()),
        }
    }

    /// Acquires a lock on `path`, waiting until every earlier conflicting
    /// request has released or withdrawn.
    pub async fn lock(&self, path: &DfsPath, exclusive: bool) -> Result<()> {
        let (seq, rx) = {
            let mut queue = self.lock_queue();
            if queue.closed {
                return Err(NamioError::Cancelled);
            }
            let seq = queue.next_seq;
            queue.next_seq += 1;
            let blocked = queue.requests.iter().any(|r| conflicts(r, path, exclusive));
            if !blocked {
                queue.requests.push(LockRequest {
                    seq,
                    path: path.clone(),
                    exclusive,
                    waker: None,
                });
                return Ok(());
            }
            let (tx, rx) = oneshot::channel();
            queue.requests.push(LockRequest {
                seq,
                path: path.clone(),
                exclusive,
                waker: Some(tx),
            });
            (seq, rx)
        };

        let mut guard = WaitGuard {
            manager: self,
            seq,
            armed: true,
        };
        match rx.await {
            Ok(()) => {
                guard.armed = false;
                Ok(())
            }
            Err(_) => Err(NamioError::Cancelled),
        }
    }

    /// Releases a held lock. A release with no matching held lock is ignored.
    pub fn unlock(&self, path: &DfsPath, exclusive: bool) {
        let mut queue = self.lock_queue();
        let held = queue
            .requests
            .iter()
            .position(|r| r.waker.is_none() && r.exclusive == exclusive && r.path == *path);
        match held {
            Some(index) => {
                queue.requests.remove(index);
                Self::grant_ready(&mut queue);
            }
            None => {
                tracing::debug!("unlock without a held lock: {} exclusive={}", path, exclusive);
            }
        }
    }

    /// Fails every queued waiter with `Cancelled` and rejects new requests.
    /// Held locks are unaffected.
    pub fn close(&self) {
        let mut queue = self.lock_queue();
        queue.closed = true;
        // dropping the wakers fails the corresponding lock futures
        queue.requests.retain(|r| r.waker.is_none());
    }

    /// Number of requests currently enqueued, held locks included.
    pub fn queue_depth(&self) -> usize {
        self.lock_queue().requests.len()
    }

    fn lock_queue(&self) -> std::sync::MutexGuard<'_, LockQueue> {
        self.queue.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    // Wakes, in arrival order, every waiter no earlier request conflicts with.
    fn grant_ready(queue: &mut LockQueue) {
        for index in 0..queue.requests.len() {
            let (earlier, rest) = queue.requests.split_at_mut(index);
            let request = &mut rest[0];
            if request.waker.is_none() {
                continue;
            }
            if earlier
                .iter()
                .any(|r| conflicts(r, &request.path, request.exclusive))
            {
                continue;
            }
            if let Some(waker) = request.waker.take() {
                let _ = waker.send(());
            }
        }
    }

    fn withdraw(&self, seq: u64) {
        let mut queue = self.lock_queue();
        if let Some(index) = queue.requests.iter().position(|r| r.seq == seq) {
            queue.requests.remove(index);
            Self::grant_ready(&mut queue);
        }
    }
}

impl Default for LockManager {
    fn default() -> Self {
        Self::new()
    }
}

// Withdraws a waiting request when its lock future is dropped. If the grant
// raced the drop, the entry is already marked held and removing it here
// releases it again.
struct WaitGuard<'a> {
    manager: &'a LockManager,
    seq: u64,
    armed: bool,
}

impl Drop for WaitGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.manager.withdraw(self.seq);
        }
    }
}
