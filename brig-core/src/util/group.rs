//! Fan-out of fallible tasks sharing one cancellation scope.
//!
//! The first task to fail cancels its siblings and its error is the one
//! returned. Later errors are discarded.

use crate::error::{BrigError, Result};
use std::future::Future;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// A set of concurrently running tasks with a shared cancellation scope.
pub struct TaskGroup<T> {
    tasks: JoinSet<(usize, Result<T>)>,
    scope: CancellationToken,
    spawned: usize,
}

impl<T: Send + 'static> TaskGroup<T> {
    /// Create a group whose scope is a child of `parent`.
    pub fn new(parent: &CancellationToken) -> Self {
        Self { tasks: JoinSet::new(), scope: parent.child_token(), spawned: 0 }
    }

    /// Spawn a task into the group. Its output keeps its spawn position in the
    /// vector returned by [`TaskGroup::wait`].
    pub fn spawn<F>(&mut self, task: F)
    where
        F: Future<Output = Result<T>> + Send + 'static,
    {
        let index = self.spawned;
        self.spawned += 1;
        let scope = self.scope.clone();
        self.tasks.spawn(async move {
            let result = tokio::select! {
                biased;
                _ = scope.cancelled() => Err(BrigError::Cancelled),
                result = task => result,
            };
            (index, result)
        });
    }

    /// Wait for every task to finish, or for the first failure.
    pub async fn wait(mut self) -> Result<Vec<T>> {
        let mut outputs: Vec<Option<T>> = (0..self.spawned).map(|_| None).collect();

        loop {
            let joined = tokio::select! {
                biased;
                _ = self.scope.cancelled() => {
                    self.tasks.abort_all();
                    return Err(BrigError::Cancelled);
                }
                joined = self.tasks.join_next() => joined,
            };

            let Some(joined) = joined else { break };
            match joined {
                Ok((index, Ok(value))) => outputs[index] = Some(value),
                Ok((index, Err(e))) => {
                    debug!(task = index, error = %e, "task failed, cancelling group");
                    self.scope.cancel();
                    self.tasks.abort_all();
                    return Err(e);
                }
                Err(join_err) => {
                    self.scope.cancel();
                    self.tasks.abort_all();
                    return Err(BrigError::Internal(format!("task panicked: {}", join_err)));
                }
            }
        }

        Ok(outputs.into_iter().flatten().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    #[tokio::test]
    async fn test_outputs_keep_spawn_order() {
        let root = CancellationToken::new();
        let mut group = TaskGroup::new(&root);
        for i in 0..4u64 {
            group.spawn(async move {
                tokio::time::sleep(Duration::from_millis(20 - i * 5)).await;
                Ok(i)
            });
        }
        assert_eq!(group.wait().await.unwrap(), vec![0, 1, 2, 3]);
    }

    #[tokio::test]
    async fn test_first_error_cancels_siblings() {
        let root = CancellationToken::new();
        let mut group = TaskGroup::new(&root);
        let finished = Arc::new(AtomicBool::new(false));

        let flag = finished.clone();
        group.spawn(async move {
            tokio::time::sleep(Duration::from_secs(5)).await;
            flag.store(true, Ordering::SeqCst);
            Ok(())
        });
        group.spawn(async { Err(BrigError::Internal("boom".to_string())) });

        let err = group.wait().await.unwrap_err();
        assert!(matches!(err, BrigError::Internal(ref m) if m == "boom"));
        assert!(!finished.load(Ordering::SeqCst));
        // the parent scope is left untouched
        assert!(!root.is_cancelled());
    }

    #[tokio::test]
    async fn test_parent_cancellation_surfaces() {
        let root = CancellationToken::new();
        let mut group: TaskGroup<()> = TaskGroup::new(&root);
        group.spawn(async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(())
        });
        root.cancel();
        assert!(group.wait().await.unwrap_err().is_cancelled());
    }

    #[tokio::test]
    async fn test_empty_group() {
        let group: TaskGroup<u8> = TaskGroup::new(&CancellationToken::new());
        assert!(group.wait().await.unwrap().is_empty());
    }
}
