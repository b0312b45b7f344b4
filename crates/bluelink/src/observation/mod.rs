//! Characteristic observations
//!
//! Any number of streams may observe the same characteristic. Native
//! notifications are enabled once for the first subscriber, disabled once
//! after the last one leaves, and re-enabled automatically after every
//! reconnect.

mod entry;
pub mod event;
mod observers;


use crate::error::{Error, Result};
use crate::profile::Characteristic;
use async_trait::async_trait;
use futures::FutureExt;
use std::future::Future;
use std::sync::Arc;

pub use entry::SubscriptionHook;
pub use event::{ChangeSender, ObservationEvent};
pub(crate) use observers::{rethrow, Observers};

/// Decides what happens to an observation error: `Err` ends the stream with
/// that error, `Ok(())` swallows it and keeps the stream alive.
pub type ObservationExceptionHandler = Arc<dyn Fn(Error) -> Result<()> + Send + Sync>;

/// Wraps an async closure as a [`SubscriptionHook`].
pub fn subscription_hook<F, Fut>(hook: F) -> SubscriptionHook
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<()>> + Send + 'static,
{
    Arc::new(move || hook().boxed())
}

/// Enables and disables native notifications on behalf of observations.
#[async_trait]
pub trait ObservationHandler: Send + Sync {
    async fn start_observation(&self, characteristic: &Characteristic) -> Result<()>;

    async fn stop_observation(&self, characteristic: &Characteristic) -> Result<()>;
}
