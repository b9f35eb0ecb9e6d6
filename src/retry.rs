// Retry and backoff policy for polling a search job
// Rate-limit answers are a control signal and never touch the budget

use chrono::{DateTime, Utc};
use std::time::Duration;

use crate::api::{ApiError, NOT_READY_CODE};
use crate::types::PricesMap;

#[derive(Debug, Clone)]
pub struct RetryConfig {
    pub max_retries: u32,
    pub backoff_ms: u64,
    pub rate_limit_code: u16,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 2,
            backoff_ms: 1000,
            rate_limit_code: NOT_READY_CODE,
        }
    }
}

impl RetryConfig {
    pub fn backoff(&self) -> Duration {
        Duration::from_millis(self.backoff_ms)
    }
}

// What the poll loop should do after one poll outcome
#[derive(Debug, Clone, PartialEq)]
pub enum PollStep {
    Completed(PricesMap),
    // Server says come back at this time
    RetryAt(DateTime<Utc>),
    // Transient failure, poll again after the backoff
    Backoff(Duration),
    // Budget used up, carries the failure that exhausted it
    Exhausted(ApiError),
}

// Retry budget of a single poll loop
#[derive(Debug, Clone)]
pub struct RetryBudget {
    remaining: u32,
    backoff: Duration,
    rate_limit_code: u16,
}

impl RetryBudget {
    pub fn new(config: &RetryConfig) -> Self {
        Self {
            remaining: config.max_retries,
            backoff: config.backoff(),
            rate_limit_code: config.rate_limit_code,
        }
    }

    pub fn remaining(&self) -> u32 {
        self.remaining
    }

    pub fn next_step(&mut self, outcome: Result<PricesMap, ApiError>) -> PollStep {
        match outcome {
            Ok(prices) => PollStep::Completed(prices),
            Err(err) => {
                if let Some(at) = err.retry_at(self.rate_limit_code) {
                    return PollStep::RetryAt(at);
                }

                if self.remaining > 0 {
                    self.remaining -= 1;
                    PollStep::Backoff(self.backoff)
                } else {
                    PollStep::Exhausted(err)
                }
            }
        }
    }
}
