//! Bounded polling
//!
//! Every wait in the operator goes through [`Poll`]: a condition is checked
//! on a fixed interval until it holds or the timeout expires. There is no
//! cancellation mid-wait; a timed out poll returns
//! [`OperatorError::Timeout`] and the caller decides what to do with it.

use crate::error::{OperatorError, Result};
use std::future::Future;
use std::time::Duration;
use tokio::time::{sleep, Instant};

/// A bounded poll: interval, timeout and whether the first check happens
/// immediately or after one interval.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Poll {
    interval: Duration,
    timeout: Duration,
    immediate: bool,
}

impl Poll {
    /// Check the condition right away, then every `interval`.
    pub fn immediate(interval: Duration, timeout: Duration) -> Self {
        Self {
            interval,
            timeout,
            immediate: true,
        }
    }

    /// Wait one `interval` before the first check.
    pub fn delayed(interval: Duration, timeout: Duration) -> Self {
        Self {
            interval,
            timeout,
            immediate: false,
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Poll until `check` returns `Some`, yielding that value.
    ///
    /// An error from `check` aborts the poll and is returned unchanged.
    pub async fn until_some<T, F, Fut>(&self, what: &str, mut check: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<Option<T>>>,
    {
        let deadline = Instant::now() + self.timeout;
        if !self.immediate {
            sleep(self.interval).await;
        }
        loop {
            if let Some(value) = check().await? {
                return Ok(value);
            }
            if Instant::now() + self.interval > deadline {
                return Err(OperatorError::Timeout {
                    what: what.to_string(),
                    after: self.timeout,
                });
            }
            sleep(self.interval).await;
        }
    }

    /// Poll until `check` returns `true`.
    pub async fn until<F, Fut>(&self, what: &str, mut check: F) -> Result<()>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<bool>>,
    {
        self.until_some(what, || {
            let done = check();
            async move { Ok(done.await?.then_some(())) }
        })
        .await
    }
}
