//! Status-keyed retry policy.
//!
//! A [`RetryState`] lives for one top-level request. Each failed attempt
//! produces a new state, so the engine never mutates shared counters.

use std::collections::BTreeSet;

use crate::config::Config;

/// Attempt counter, bound and retryable statuses for one request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryState {
    attempts: u32,
    bound: Option<u32>,
    retryable: BTreeSet<u16>,
}

/// What to do after a failed attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryDecision {
    /// Refresh the token and run the request again with the carried state.
    Retry(RetryState),
    /// Return the failing response to the caller.
    GiveUp { attempts: u32 },
}

impl RetryState {
    /// Create a state. A negative bound means retries are unlimited.
    pub fn new(bound: i32, retryable: BTreeSet<u16>) -> Self {
        Self {
            attempts: 0,
            bound: u32::try_from(bound).ok(),
            retryable,
        }
    }

    /// State for a request made under `config`.
    pub fn from_config(config: &Config) -> Self {
        Self::new(config.auth_retries, config.auth_retries_codes.clone())
    }

    /// Failed attempts recorded so far.
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Retry bound, `None` when unlimited.
    pub fn bound(&self) -> Option<u32> {
        self.bound
    }

    pub fn is_retryable(&self, status: u16) -> bool {
        self.retryable.contains(&status)
    }

    /// Record a failed attempt with `status` and decide whether to retry.
    pub fn on_failure(&self, status: u16) -> RetryDecision {
        let attempts = self.attempts.saturating_add(1);

        if self.bound.is_some_and(|bound| attempts > bound) {
            return RetryDecision::GiveUp { attempts };
        }

        if self.is_retryable(status) {
            RetryDecision::Retry(Self {
                attempts,
                bound: self.bound,
                retryable: self.retryable.clone(),
            })
        } else {
            RetryDecision::GiveUp { attempts }
        }
    }
}
