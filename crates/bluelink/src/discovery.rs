//! Bounded retry around service discovery
//!
//! Some native stacks transiently report zero services right after the link
//! comes up. Discovery is repeated while the result is empty; an empty list
//! after the last attempt is returned as-is rather than treated as an error.

use crate::error::Result;
use crate::profile::DiscoveredService;
use log::{trace, warn};
use std::future::Future;

pub const DEFAULT_DISCOVER_SERVICES_ATTEMPTS: usize = 5;

#[derive(Debug, Clone, Copy)]
pub struct ServiceDiscoveryRetrier {
    max_attempts: usize,
}

impl ServiceDiscoveryRetrier {
    /// `max_attempts` below one is treated as one.
    pub fn new(max_attempts: usize) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
        }
    }

    pub fn max_attempts(&self) -> usize {
        self.max_attempts
    }

    /// Runs `discover` until it yields services or attempts run out.
    /// Errors from an attempt end the retry immediately.
    pub async fn discover<F, Fut>(
        &self,
        identifier: &str,
        mut discover: F,
    ) -> Result<Vec<DiscoveredService>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<Vec<DiscoveredService>>>,
    {
        for attempt in 1..=self.max_attempts {
            let services = discover().await?;
            if !services.is_empty() {
                trace!("[{}] Discovered {} services", identifier, services.len());
                return Ok(services);
            }
            warn!(
                "[{}] Empty services (attempt {} of {})",
                identifier, attempt, self.max_attempts
            );
        }
        Ok(Vec::new())
    }
}

impl Default for ServiceDiscoveryRetrier {
    fn default() -> Self {
        Self::new(DEFAULT_DISCOVER_SERVICES_ATTEMPTS)
    }
}
