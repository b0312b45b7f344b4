//! Shared, restartable async action
//!
//! [`SharedRepeatableAction`] turns a fallible "establish" operation into
//! something many callers can await at once. Only one run is alive at a
//! time; every concurrent [`await_result`](SharedRepeatableAction::await_result)
//! observes the same outcome.
//!
//! A run owns a root [`TaskScope`]. The action body receives an
//! [`ActionScope`] for spawning tasks that may outlive the body itself (for
//! example, watchers that fail the run when the link drops). A run ends when:
//!
//! - the body fails: children are cancelled and awaited before the failure is
//!   handed to callers,
//! - a child spawned through the scope fails: the root is cancelled and the
//!   failure becomes the run's cause,
//! - [`cancel_and_join`](SharedRepeatableAction::cancel_and_join) is called.
//!
//! Once a run has ended, teardown hooks registered on its scope run and the
//! next await starts a fresh run.

use crate::error::{Error, Result};
use crate::scope::TaskScope;
use futures::future::{BoxFuture, FutureExt, Shared};
use log::{debug, trace};
use std::future::Future;
use std::sync::{Arc, Mutex};
use tokio::sync::{oneshot, Mutex as AsyncMutex};

type ActionFn<T> = dyn Fn(ActionScope) -> BoxFuture<'static, Result<T>> + Send + Sync;
type Teardown = Box<dyn FnOnce() -> BoxFuture<'static, ()> + Send>;

/// Scope handed to the action body
#[derive(Clone)]
pub struct ActionScope {
    inner: Arc<ScopeInner>,
}

struct ScopeInner {
    root: TaskScope,
    cause: Mutex<Option<Error>>,
    teardown: Mutex<Vec<Teardown>>,
}

impl ActionScope {
    fn new() -> Self {
        ActionScope {
            inner: Arc::new(ScopeInner {
                root: TaskScope::new(),
                cause: Mutex::new(None),
                teardown: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Root scope of the run. Child scopes derived from it are cancelled
    /// with the run.
    pub fn root(&self) -> &TaskScope {
        &self.inner.root
    }

    /// Spawns a task bound to the run. An `Err` result fails the whole run.
    pub fn spawn<F>(&self, future: F)
    where
        F: Future<Output = Result<()>> + Send + 'static,
    {
        let scope = self.clone();
        self.inner.root.spawn(async move {
            if let Err(e) = future.await {
                debug!("Action child failed: {}", e);
                scope.fail(e);
            }
        });
    }

    /// Registers `f` to run once the run has ended and its tasks finished.
    pub fn on_teardown<F, Fut>(&self, f: F)
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let teardown: Teardown = Box::new(move || f().boxed());
        match self.inner.teardown.lock() {
            Ok(mut hooks) => hooks.push(teardown),
            Err(poisoned) => poisoned.into_inner().push(teardown),
        }
    }

    /// Records `cause` (first one wins) and cancels the root.
    fn fail(&self, cause: Error) {
        {
            let mut slot = match self.inner.cause.lock() {
                Ok(slot) => slot,
                Err(poisoned) => poisoned.into_inner(),
            };
            if slot.is_none() {
                *slot = Some(cause);
            }
        }
        self.inner.root.cancel();
    }

    fn cause(&self) -> Error {
        let slot = match self.inner.cause.lock() {
            Ok(slot) => slot,
            Err(poisoned) => poisoned.into_inner(),
        };
        slot.clone()
            .unwrap_or_else(|| Error::NotConnected("Connection attempt cancelled".into()))
    }

    async fn run_teardown(&self) {
        let hooks = {
            let mut hooks = match self.inner.teardown.lock() {
                Ok(hooks) => hooks,
                Err(poisoned) => poisoned.into_inner(),
            };
            std::mem::take(&mut *hooks)
        };
        for hook in hooks.into_iter().rev() {
            hook().await;
        }
    }
}

struct Run<T> {
    scope: ActionScope,
    result: Shared<BoxFuture<'static, Result<T>>>,
    done: Shared<BoxFuture<'static, ()>>,
}

impl<T> Run<T> {
    fn is_ended(&self) -> bool {
        self.scope.root().is_cancelled()
    }
}

pub struct SharedRepeatableAction<T: Clone + Send + Sync + 'static> {
    action: Arc<ActionFn<T>>,
    state: AsyncMutex<Option<Run<T>>>,
}

impl<T: Clone + Send + Sync + 'static> SharedRepeatableAction<T> {
    pub fn new<F, Fut>(action: F) -> Self
    where
        F: Fn(ActionScope) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T>> + Send + 'static,
    {
        SharedRepeatableAction {
            action: Arc::new(move |scope| action(scope).boxed()),
            state: AsyncMutex::new(None),
        }
    }

    /// Awaits the current run, starting one if none is alive.
    pub async fn await_result(&self) -> Result<T> {
        let result = {
            let mut state = self.state.lock().await;
            match (*state).as_ref() {
                Some(run) if !run.is_ended() => run.result.clone(),
                previous => {
                    if let Some(run) = previous {
                        // Let the previous run finish tearing down first.
                        run.done.clone().await;
                    }
                    let run = self.start();
                    let result = run.result.clone();
                    *state = Some(run);
                    result
                }
            }
        };
        result.await
    }

    fn start(&self) -> Run<T> {
        trace!("Starting shared action");
        let scope = ActionScope::new();
        let body = (self.action)(scope.clone());
        let (result_tx, result_rx) = oneshot::channel::<Result<T>>();
        let (done_tx, done_rx) = oneshot::channel::<()>();

        let runner = scope.clone();
        tokio::spawn(async move {
            let root = runner.root().clone();
            let outcome = tokio::select! {
                biased;
                _ = root.cancelled() => Err(runner.cause()),
                outcome = body => outcome,
            };

            match outcome {
                Ok(value) => {
                    let _ = result_tx.send(Ok(value));
                    root.cancelled().await;
                    root.wait().await;
                }
                Err(e) => {
                    runner.fail(e);
                    root.wait().await;
                    let _ = result_tx.send(Err(runner.cause()));
                }
            }

            runner.run_teardown().await;
            trace!("Shared action ended");
            let _ = done_tx.send(());
        });

        let result = async move {
            result_rx
                .await
                .unwrap_or_else(|_| Err(Error::Internal("shared action runner dropped".into())))
        }
        .boxed()
        .shared();
        let done = async move {
            let _ = done_rx.await;
        }
        .boxed()
        .shared();

        Run {
            scope,
            result,
            done,
        }
    }

    /// Cancels the current run with `cause` and waits for it to end,
    /// including its teardown. A later await starts a fresh run.
    pub async fn cancel_and_join(&self, cause: Error) {
        let done = {
            let state = self.state.lock().await;
            match (*state).as_ref() {
                Some(run) => {
                    run.scope.fail(cause);
                    run.done.clone()
                }
                None => return,
            }
        };
        done.await;
    }

    /// Whether a run is alive (started and not yet ended).
    pub async fn is_active(&self) -> bool {
        let state = self.state.lock().await;
        (*state).as_ref().map_or(false, |run| !run.is_ended())
    }
}

impl<T: Clone + Send + Sync + 'static> Drop for SharedRepeatableAction<T> {
    fn drop(&mut self) {
        if let Some(run) = self.state.get_mut() {
            run.scope
                .fail(Error::NotConnected("Connection attempt abandoned".into()));
        }
    }
}
