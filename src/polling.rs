//! Poll-until-terminal state machine shared by the query gateway and the
//! orchestrator's task wait.
//!
//! A poll is a step function returning [`PollStep::Pending`] or
//! [`PollStep::Done`]; the [`Poller`] owns the interval, the optional
//! attempt budget and the optional deadline. Waiting is always a timer
//! sleep, never a spin.

use crate::error::Result;
use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;
use tracing::trace;

/// Result of one poll step
#[derive(Debug, Clone, PartialEq)]
pub enum PollStep<T> {
    Pending,
    Done(T),
}

/// How a polling run ended
#[derive(Debug, Clone, PartialEq)]
pub enum PollOutcome<T> {
    /// The step function reported a terminal value
    Done { value: T, attempts: u32 },
    /// Attempt budget or deadline exhausted before a terminal value
    Exhausted { attempts: u32 },
}

impl<T> PollOutcome<T> {
    pub fn attempts(&self) -> u32 {
        match self {
            PollOutcome::Done { attempts, .. } | PollOutcome::Exhausted { attempts } => *attempts,
        }
    }
}

/// Polling policy
#[derive(Debug, Clone)]
pub struct Poller {
    interval: Duration,
    max_attempts: Option<u32>,
    deadline: Option<Duration>,
}

impl Poller {
    /// Poll forever at the given interval
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            max_attempts: None,
            deadline: None,
        }
    }

    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = Some(attempts.max(1));
        self
    }

    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = Some(deadline);
        self
    }

    pub fn with_optional_deadline(mut self, deadline: Option<Duration>) -> Self {
        self.deadline = deadline;
        self
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Drive `step` until it is done or the budget runs out.
    ///
    /// The step receives the 1-based attempt number. Errors from the step
    /// abort the run immediately.
    pub async fn run<T, F, Fut>(&self, mut step: F) -> Result<PollOutcome<T>>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<PollStep<T>>>,
    {
        let started = Instant::now();
        let mut attempt: u32 = 0;

        loop {
            attempt += 1;
            if let PollStep::Done(value) = step(attempt).await? {
                return Ok(PollOutcome::Done {
                    value,
                    attempts: attempt,
                });
            }

            if let Some(max) = self.max_attempts {
                if attempt >= max {
                    return Ok(PollOutcome::Exhausted { attempts: attempt });
                }
            }

            if let Some(deadline) = self.deadline {
                if started.elapsed() + self.interval > deadline {
                    return Ok(PollOutcome::Exhausted { attempts: attempt });
                }
            }

            trace!(attempt, interval_ms = self.interval.as_millis() as u64, "poll pending");
            tokio::time::sleep(self.interval).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;

    #[tokio::test(start_paused = true)]
    async fn test_done_after_pending_steps() {
        let poller = Poller::new(Duration::from_secs(2));
        let outcome = poller
            .run(|attempt| async move {
                if attempt < 3 {
                    Ok(PollStep::Pending)
                } else {
                    Ok(PollStep::Done("SUCCEEDED"))
                }
            })
            .await
            .unwrap();

        assert_eq!(
            outcome,
            PollOutcome::Done {
                value: "SUCCEEDED",
                attempts: 3
            }
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_attempt_budget() {
        let poller = Poller::new(Duration::from_secs(2)).with_max_attempts(5);
        let outcome: PollOutcome<()> = poller.run(|_| async { Ok(PollStep::Pending) }).await.unwrap();
        assert_eq!(outcome, PollOutcome::Exhausted { attempts: 5 });
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline() {
        let poller = Poller::new(Duration::from_secs(2)).with_deadline(Duration::from_secs(5));
        let outcome: PollOutcome<()> = poller.run(|_| async { Ok(PollStep::Pending) }).await.unwrap();
        // attempts at t=0, 2 and 4; sleeping again would cross the deadline
        assert_eq!(outcome.attempts(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_step_error_aborts() {
        let poller = Poller::new(Duration::from_millis(10));
        let result: Result<PollOutcome<()>> = poller
            .run(|_| async { Err(Error::UpstreamFailed("boom".into())) })
            .await;
        assert!(result.is_err());
    }
}
