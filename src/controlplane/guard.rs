//! Remote call guard
//!
//! Every collaborator call made by the core runs through a [`CallGuard`]:
//! it is bounded by the configured timeout and aborted as soon as the run's
//! cancellation token fires.

use crate::config::OrchestratorConfig;
use crate::error::{Error, Result};
use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::warn;

/// Timeout and cancellation applied to remote calls
#[derive(Debug, Clone)]
pub struct CallGuard {
    timeout: Duration,
    cancel: CancellationToken,
}

impl CallGuard {
    pub fn new(timeout: Duration, cancel: CancellationToken) -> Self {
        Self { timeout, cancel }
    }

    pub fn from_config(config: &OrchestratorConfig, cancel: CancellationToken) -> Self {
        Self::new(config.call_timeout(), cancel)
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Same timeout, fresh token. Rollback uses this so undo calls still run
    /// after the workflow was cancelled.
    pub fn detached(&self) -> Self {
        Self::new(self.timeout, CancellationToken::new())
    }

    /// Run one remote call under the guard
    pub async fn call<T, F>(&self, operation: &str, fut: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        if self.cancel.is_cancelled() {
            return Err(Error::Cancelled {
                operation: operation.to_string(),
            });
        }

        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(Error::Cancelled {
                operation: operation.to_string(),
            }),
            outcome = tokio::time::timeout(self.timeout, fut) => match outcome {
                Ok(result) => result,
                Err(_) => {
                    warn!(
                        operation = %operation,
                        timeout_ms = self.timeout.as_millis() as u64,
                        "Remote call timed out"
                    );
                    Err(Error::Timeout {
                        operation: operation.to_string(),
                        after: self.timeout,
                    })
                }
            },
        }
    }
}

impl Default for CallGuard {
    fn default() -> Self {
        Self::from_config(&OrchestratorConfig::default(), CancellationToken::new())
    }
}
