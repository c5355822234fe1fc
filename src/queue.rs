//! Per-directory command admission
//!
//! Terraform holds an advisory lock on state for mutating operations;
//! running two of them against the same directory corrupts or deadlocks
//! on that lock. Admission is a fair mutex per working directory:
//! mutating commands hold it for their whole run, read-only commands
//! bypass it entirely.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::command::CommandKind;

/// Serializes mutating commands per working directory
#[derive(Debug, Clone, Default)]
pub struct CommandQueue {
    /// One fair mutex per directory; tokio mutexes queue waiters FIFO,
    /// which is what gives submission-order completion.
    locks: Arc<DashMap<PathBuf, Arc<Mutex<()>>>>,
}

/// Admission token; dropping it releases the directory for the next
/// queued mutating command.
#[derive(Debug)]
pub struct QueuePermit {
    _guard: Option<OwnedMutexGuard<()>>,
}

impl QueuePermit {
    /// Whether this permit actually holds the directory lock
    pub fn is_exclusive(&self) -> bool {
        self._guard.is_some()
    }
}

impl CommandQueue {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock_for(&self, dir: &Path) -> Arc<Mutex<()>> {
        // Entry API for atomic get-or-insert
        self.locks
            .entry(dir.to_path_buf())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Wait for admission. Read-only commands return immediately and may
    /// overlap anything; mutating commands wait for the directory lock in
    /// FIFO order.
    pub async fn admit(&self, dir: &Path, kind: CommandKind) -> QueuePermit {
        match kind {
            CommandKind::ReadOnly => QueuePermit { _guard: None },
            CommandKind::Mutating => {
                let lock = self.lock_for(dir);
                QueuePermit {
                    _guard: Some(lock.lock_owned().await),
                }
            }
        }
    }

    /// Whether a mutating command currently holds the directory
    pub fn is_busy(&self, dir: &Path) -> bool {
        self.locks
            .get(dir)
            .map(|lock| lock.try_lock().is_err())
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn read_only_never_blocks() {
        let queue = CommandQueue::new();
        let dir = PathBuf::from("/tmp/project");

        let held = queue.admit(&dir, CommandKind::Mutating).await;
        assert!(held.is_exclusive());
        assert!(queue.is_busy(&dir));

        // Must not wait on the mutex
        let read = tokio::time::timeout(
            Duration::from_millis(50),
            queue.admit(&dir, CommandKind::ReadOnly),
        )
        .await
        .expect("read-only admission blocked");
        assert!(!read.is_exclusive());
        drop(held);
    }

    #[tokio::test]
    async fn mutating_commands_serialize_fifo() {
        let queue = CommandQueue::new();
        let dir = PathBuf::from("/tmp/project");
        let order = Arc::new(parking_lot::Mutex::new(Vec::new()));

        let first = queue.admit(&dir, CommandKind::Mutating).await;

        let mut handles = Vec::new();
        for i in 0..3 {
            let queue = queue.clone();
            let dir = dir.clone();
            let order = order.clone();
            handles.push(tokio::spawn(async move {
                let permit = queue.admit(&dir, CommandKind::Mutating).await;
                order.lock().push(i);
                drop(permit);
            }));
            // Give each waiter time to enqueue before the next submits
            tokio::time::sleep(Duration::from_millis(20)).await;
        }

        drop(first);
        for handle in handles {
            handle.await.unwrap();
        }
        assert_eq!(*order.lock(), vec![0, 1, 2]);
    }

    #[tokio::test]
    async fn separate_directories_do_not_contend() {
        let queue = CommandQueue::new();
        let a = queue
            .admit(Path::new("/tmp/a"), CommandKind::Mutating)
            .await;
        let b = tokio::time::timeout(
            Duration::from_millis(50),
            queue.admit(Path::new("/tmp/b"), CommandKind::Mutating),
        )
        .await
        .expect("unrelated directory blocked");
        assert!(a.is_exclusive() && b.is_exclusive());
    }
}
