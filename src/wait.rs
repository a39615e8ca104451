//! Condition polling
//!
//! Every "wait for X" in the harness is the same small state machine:
//! `Pending -> Ready` or `Pending -> TimedOut`. The predicate is checked
//! immediately, then once per interval, and the deadline is checked after
//! every probe, so a wait that never succeeds returns within
//! `timeout + interval`.

use crate::config::API_POLL_INTERVAL;
use crate::error::{is_not_found, Error, Result};
use kube::Api;
use serde::de::DeserializeOwned;
use std::fmt::Debug;
use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Outcome of a finished poll
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollState {
    Pending,
    Ready,
    TimedOut,
}

/// A fixed-interval poller with a hard deadline
#[derive(Debug, Clone, Copy)]
pub struct Poller {
    pub interval: Duration,
    pub timeout: Duration,
}

impl Poller {
    /// Poll at the standard API interval
    pub fn new(timeout: Duration) -> Self {
        Self {
            interval: API_POLL_INTERVAL,
            timeout,
        }
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Poll `check` until it reports true
    ///
    /// A check error aborts the wait immediately; only `Ok(false)` keeps
    /// polling.
    ///
    /// # Arguments
    /// * `what` - Human readable target, used in logs and the timeout error
    /// * `check` - Predicate re-evaluated every interval
    ///
    /// # Returns
    /// * `Ok(())` - Predicate held
    /// * `Err(Error::Timeout)` - Deadline passed first
    pub async fn until<F, Fut>(&self, what: &str, mut check: F) -> Result<()>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<bool>>,
    {
        info!(target_object = %what, timeout = ?self.timeout, "Waiting");
        let deadline = Instant::now() + self.timeout;
        let mut state = PollState::Pending;
        let mut attempts = 0u32;

        while state == PollState::Pending {
            attempts += 1;
            if check().await? {
                state = PollState::Ready;
            } else if Instant::now() >= deadline {
                state = PollState::TimedOut;
            } else {
                debug!(target_object = %what, attempts, "Condition not met yet");
                let remaining = deadline.saturating_duration_since(Instant::now());
                tokio::time::sleep(self.interval.min(remaining)).await;
            }
        }

        match state {
            PollState::Ready => {
                info!(target_object = %what, attempts, "Condition met");
                Ok(())
            }
            _ => {
                warn!(target_object = %what, timeout = ?self.timeout, attempts, "Timed out");
                Err(Error::timeout(what, self.timeout))
            }
        }
    }

    /// Poll until `get` reports the object gone
    ///
    /// A 404 is success on any attempt, including the first.
    pub async fn until_absent<K>(&self, what: &str, api: &Api<K>, name: &str) -> Result<()>
    where
        K: Clone + DeserializeOwned + Debug,
    {
        self.until(what, move || async move {
            match api.get_opt(name).await {
                Ok(found) => Ok(found.is_none()),
                Err(e) if is_not_found(&e) => Ok(true),
                Err(e) => Err(e.into()),
            }
        })
        .await
    }

    /// Poll until `get` finds the object, then return it
    pub async fn until_present<K>(&self, what: &str, api: &Api<K>, name: &str) -> Result<K>
    where
        K: Clone + DeserializeOwned + Debug,
    {
        self.until(what, move || async move { Ok(api.get_opt(name).await?.is_some()) })
            .await?;
        Ok(api.get(name).await?)
    }
}

#[cfg(test)]
#[path = "wait_test.rs"]
mod tests;
