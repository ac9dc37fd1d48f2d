/*
    Copyright © 2024, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Bounded exponential backoff with jitter, and cooperative cancellation.
//!
//! Every retry loop in the transfer client goes through a [`Backoff`]: the delay doubles (by default)
//! after every failed attempt up to `max_delay`, a random fraction of it is added as jitter so that
//! several controllers do not retry in lockstep, and the loop gives up once either `max_attempts` or
//! `max_elapsed` is exceeded. Waiting observes a [`CancellationToken`].

use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    thread,
    time::{Duration, Instant},
};

use rand::Rng;
use typed_builder::TypedBuilder;

/// Parameters of a [`Backoff`].
#[derive(Clone, Debug, TypedBuilder)]
pub struct RetryPolicy {
    /// Delay after the first failed attempt.
    #[builder(default = Duration::from_millis(100))]
    pub initial_delay: Duration,

    /// Upper bound on the delay between two attempts (before jitter).
    #[builder(default = Duration::from_secs(10))]
    pub max_delay: Duration,

    /// Factor the delay is multiplied by after every failed attempt.
    #[builder(default = 2)]
    pub multiplier: u32,

    /// Give up after this many failed attempts. `None` means no limit on the number of attempts.
    #[builder(default = Some(100))]
    pub max_attempts: Option<u32>,

    /// Give up once this much time has passed since the first failure. `None` means no time limit.
    #[builder(default = Some(Duration::from_secs(600)))]
    pub max_elapsed: Option<Duration>,

    /// Add up to 50% random jitter to every delay.
    #[builder(default = true)]
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl RetryPolicy {
    /// Start a fresh backoff sequence following this policy.
    pub fn backoff(&self) -> Backoff {
        Backoff {
            policy: self.clone(),
            failures: 0,
            next_delay: self.initial_delay,
            started: Instant::now(),
        }
    }
}

/// State of one retry loop.
pub struct Backoff {
    policy: RetryPolicy,
    failures: u32,
    next_delay: Duration,
    started: Instant,
}

impl Backoff {
    /// Number of failures recorded so far.
    pub fn failures(&self) -> u32 {
        self.failures
    }

    /// Record a failed attempt and compute the delay before the next one.
    ///
    /// Returns `Err(RetryError::Exhausted)` if the policy's ceiling has been reached.
    pub fn next_delay(&mut self) -> Result<Duration, RetryError> {
        self.failures += 1;

        if let Some(max_attempts) = self.policy.max_attempts {
            if self.failures >= max_attempts {
                return Err(RetryError::Exhausted {
                    attempts: self.failures,
                });
            }
        }
        if let Some(max_elapsed) = self.policy.max_elapsed {
            if self.started.elapsed() >= max_elapsed {
                return Err(RetryError::Exhausted {
                    attempts: self.failures,
                });
            }
        }

        let delay = self.next_delay;
        self.next_delay = delay
            .saturating_mul(self.policy.multiplier.max(1))
            .min(self.policy.max_delay);

        if self.policy.jitter {
            let fraction: f64 = rand::thread_rng().gen::<f64>() * 0.5;
            Ok(delay + delay.mul_f64(fraction))
        } else {
            Ok(delay)
        }
    }

    /// Record a failed attempt and sleep until the next one may start.
    pub fn wait(&mut self, cancellation: &CancellationToken) -> Result<(), RetryError> {
        let delay = self.next_delay()?;
        cancellation.sleep(delay)
    }
}

/// Enumerates the ways a retry loop can end without success.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryError {
    /// The retry ceiling of the [`RetryPolicy`] was reached after `attempts` failures.
    Exhausted { attempts: u32 },

    /// The loop's [`CancellationToken`] was cancelled.
    Cancelled,
}

/// Shared flag that asks long-running loops to stop at their next opportunity.
#[derive(Clone, Debug, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst)
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    /// Return `Err(RetryError::Cancelled)` if this token has been cancelled.
    pub fn check(&self) -> Result<(), RetryError> {
        if self.is_cancelled() {
            Err(RetryError::Cancelled)
        } else {
            Ok(())
        }
    }

    /// Sleep for `duration`, waking early with `Err(RetryError::Cancelled)` if the token is cancelled.
    pub fn sleep(&self, duration: Duration) -> Result<(), RetryError> {
        const SLICE: Duration = Duration::from_millis(20);
        let deadline = Instant::now() + duration;
        loop {
            self.check()?;
            let now = Instant::now();
            if now >= deadline {
                return Ok(());
            }
            thread::sleep((deadline - now).min(SLICE));
        }
    }
}
