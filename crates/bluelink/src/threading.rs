//! Execution context for native submissions
//!
//! Some native stacks accept calls from one thread only. A
//! [`Dispatcher::Dedicated`] owns such a thread and runs every submission on
//! it; [`Dispatcher::Inline`] runs them on the calling task.

use crate::error::{Error, Result};
use log::{debug, warn};
use std::sync::{mpsc, Mutex};
use std::thread;
use tokio::sync::oneshot;

/// How native submissions are executed
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Threading {
    #[default]
    Inline,
    Dedicated { name: String },
}

type Job = Box<dyn FnOnce() + Send + 'static>;

pub enum Dispatcher {
    Inline,
    Dedicated {
        jobs: Mutex<Option<mpsc::Sender<Job>>>,
        name: String,
    },
}

impl Dispatcher {
    pub fn new(threading: &Threading) -> Result<Self> {
        match threading {
            Threading::Inline => Ok(Dispatcher::Inline),
            Threading::Dedicated { name } => {
                let (tx, rx) = mpsc::channel::<Job>();
                let thread_name = name.clone();
                thread::Builder::new()
                    .name(name.clone())
                    .spawn(move || {
                        debug!("Dispatcher thread {} started", thread_name);
                        while let Ok(job) = rx.recv() {
                            job();
                        }
                        debug!("Dispatcher thread {} stopped", thread_name);
                    })
                    .map_err(|e| Error::Internal(format!("failed to spawn {}: {}", name, e)))?;
                Ok(Dispatcher::Dedicated {
                    jobs: Mutex::new(Some(tx)),
                    name: name.clone(),
                })
            }
        }
    }

    /// Runs `f` in this dispatcher's context and returns its result.
    pub async fn run<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce() -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        match self {
            Dispatcher::Inline => f(),
            Dispatcher::Dedicated { jobs, name } => {
                let (tx, rx) = oneshot::channel();
                let job: Job = Box::new(move || {
                    let _ = tx.send(f());
                });
                let submitted = match jobs.lock() {
                    Ok(guard) => guard.as_ref().map(|jobs| jobs.send(job).is_ok()),
                    Err(_) => None,
                };
                if submitted != Some(true) {
                    return Err(Error::NotConnected(format!("dispatcher {} is shut down", name)));
                }
                rx.await.map_err(|_| {
                    Error::Internal(format!("dispatcher {} dropped a submission", name))
                })?
            }
        }
    }

    /// Stops the dedicated thread once queued submissions have run.
    pub fn shutdown(&self) {
        if let Dispatcher::Dedicated { jobs, name } = self {
            match jobs.lock() {
                Ok(mut guard) => {
                    guard.take();
                }
                Err(_) => warn!("Dispatcher {} lock poisoned during shutdown", name),
            }
        }
    }
}
