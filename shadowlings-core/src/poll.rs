//! Bounded waits for things the relay cannot push to us.
//!
//! Inclusion of a submitted operation is only observable by asking again. Each
//! wait here carries a deadline and a cancellation token so a dropped
//! operation surfaces as [`ShadowError::Timeout`] instead of a hang.

use std::{future::Future, time::Duration};

use serde::{Deserialize, Serialize};
use tokio::time::{sleep, timeout_at, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use crate::error::{Result, ShadowError};

/// Exponential backoff between probes, capped, under an overall deadline.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PollPolicy {
    #[serde(with = "duration_ms", rename = "initial_delay_ms")]
    pub initial_delay: Duration,
    #[serde(with = "duration_ms", rename = "max_delay_ms")]
    pub max_delay: Duration,
    pub multiplier: u32,
    #[serde(with = "duration_ms", rename = "timeout_ms")]
    pub timeout: Duration,
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_millis(250),
            max_delay: Duration::from_secs(5),
            multiplier: 2,
            timeout: Duration::from_secs(120),
        }
    }
}

mod duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(d: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

/// Run `probe` until it yields `Some`, sleeping with backoff in between.
///
/// Probe errors end the wait immediately and are returned unchanged.
pub async fn poll_until<T, F, Fut>(
    policy: &PollPolicy,
    cancel: &CancellationToken,
    mut probe: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<Option<T>>>,
{
    let deadline = Instant::now() + policy.timeout;
    let mut delay = policy.initial_delay;
    let mut attempt: u32 = 0;

    loop {
        attempt += 1;
        let outcome = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(ShadowError::Cancelled),
            outcome = timeout_at(deadline, probe()) => match outcome {
                Ok(outcome) => outcome?,
                Err(_) => return Err(ShadowError::Timeout(policy.timeout)),
            },
        };

        if let Some(value) = outcome {
            debug!(attempt, "poll satisfied");
            return Ok(value);
        }

        let now = Instant::now();
        if now >= deadline {
            return Err(ShadowError::Timeout(policy.timeout));
        }
        let pause = delay.min(deadline - now);
        trace!(attempt, ?pause, "not ready");

        tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(ShadowError::Cancelled),
            _ = sleep(pause) => {}
        }
        delay = delay
            .checked_mul(policy.multiplier.max(1))
            .unwrap_or(policy.max_delay)
            .min(policy.max_delay);
    }
}
