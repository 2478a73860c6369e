use serde::Deserialize;
use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Constant-interval retry for operations that are expected to succeed
/// eventually, such as opening the logs of a pod that is still starting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Delay between two attempts
    #[serde(with = "duration_secs")]
    pub interval: Duration,
    /// Give up after this many failed attempts; None retries forever
    pub max_attempts: Option<u32>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(1),
            max_attempts: Some(300),
        }
    }
}

/// Why a retried operation produced no value.
#[derive(Debug)]
pub enum RetryError<E> {
    Cancelled,
    Exhausted { attempts: u32, last: E },
}

impl RetryPolicy {
    pub fn unbounded(interval: Duration) -> Self {
        Self {
            interval,
            max_attempts: None,
        }
    }

    /// Run `op` until it succeeds, the attempt bound is hit, or `cancel` fires.
    ///
    /// Failed attempts are only logged; the caller decides what to do with
    /// the final outcome.
    pub async fn retry<T, E, F, Fut>(
        &self,
        cancel: &CancellationToken,
        mut op: F,
    ) -> Result<T, RetryError<E>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: std::fmt::Display,
    {
        let mut attempts = 0u32;
        loop {
            let result = tokio::select! {
                _ = cancel.cancelled() => return Err(RetryError::Cancelled),
                result = op() => result,
            };
            let err = match result {
                Ok(value) => return Ok(value),
                Err(err) => err,
            };
            attempts += 1;
            debug!("attempt {} failed: {}", attempts, err);
            if self.max_attempts.is_some_and(|max| attempts >= max) {
                return Err(RetryError::Exhausted { attempts, last: err });
            }
            tokio::select! {
                _ = cancel.cancelled() => return Err(RetryError::Cancelled),
                _ = tokio::time::sleep(self.interval) => {}
            }
        }
    }
}

mod duration_secs {
    use serde::{Deserialize, Deserializer};
    use std::time::Duration;

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(deserializer)?;
        Duration::try_from_secs_f64(secs).map_err(serde::de::Error::custom)
    }
}
