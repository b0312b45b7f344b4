//! Cancellable groups of tasks

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

/// A group of tasks sharing one cancellation token.
///
/// Tasks spawned through the scope stop at their next suspension point once
/// the scope is cancelled; [`TaskScope::wait`] resolves when every one of
/// them has finished. Clones share the same group.
#[derive(Clone)]
pub struct TaskScope {
    inner: Arc<ScopeInner>,
}

struct ScopeInner {
    token: CancellationToken,
    tracker: TaskTracker,
}

impl TaskScope {
    pub fn new() -> Self {
        Self::with_token(CancellationToken::new())
    }

    /// A scope that is also cancelled whenever `parent` is.
    pub fn child_of(parent: &TaskScope) -> Self {
        Self::with_token(parent.inner.token.child_token())
    }

    fn with_token(token: CancellationToken) -> Self {
        TaskScope {
            inner: Arc::new(ScopeInner {
                token,
                tracker: TaskTracker::new(),
            }),
        }
    }

    /// Spawns `future` into the scope. It is dropped unfinished if the scope
    /// is cancelled first.
    pub fn spawn<F>(&self, future: F) -> JoinHandle<Option<F::Output>>
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        let token = self.inner.token.clone();
        self.inner.tracker.spawn(async move {
            tokio::select! {
                biased;
                _ = token.cancelled() => None,
                output = future => Some(output),
            }
        })
    }

    pub fn cancel(&self) {
        self.inner.token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.token.is_cancelled()
    }

    /// Resolves once the scope is cancelled.
    pub async fn cancelled(&self) {
        self.inner.token.cancelled().await
    }

    /// Waits for every task spawned so far, and any spawned meanwhile, to finish.
    pub async fn wait(&self) {
        self.inner.tracker.close();
        self.inner.tracker.wait().await;
        self.inner.tracker.reopen();
    }
}

impl Default for TaskScope {
    fn default() -> Self {
        Self::new()
    }
}

impl PartialEq for TaskScope {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl fmt::Debug for TaskScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskScope")
            .field("cancelled", &self.inner.token.is_cancelled())
            .field("tasks", &self.inner.tracker.len())
            .finish()
    }
}
