// shared-core - bitdrift's common client/server libraries
// Copyright Bitdrift, Inc. All rights reserved.
//
// Use of this source code is governed by a source available license that can be found in the
// LICENSE file or at:
// https://polyformproject.org/wp-content/uploads/2020/06/PolyForm-Shield-1.0.0.txt

#[cfg(test)]
#[path = "./retry_test.rs"]
mod retry_test;

use crate::options::{ClientOptions, RetryStrategy};
use crate::status::Code;
use crate::{Error, Result};
use backoff::SystemClock;
use backoff::backoff::Backoff;
use backoff::exponential::ExponentialBackoffBuilder;
use rand::Rng;
use std::future::Future;
use std::time::Duration;

//
// FibonacciBackoff
//

// Delays grow along the Fibonacci sequence starting at the initial delay, bounded by the max delay,
// with each delay randomized by +/- the jitter factor.
#[derive(Debug)]
pub struct FibonacciBackoff {
  initial: Duration,
  max: Duration,
  jitter: f64,
  current: Duration,
  next: Duration,
}

impl FibonacciBackoff {
  #[must_use]
  pub fn new(initial: Duration, max: Duration, jitter: f64) -> Self {
    Self {
      initial,
      max,
      jitter: if jitter.is_finite() {
        jitter.clamp(0.0, 1.0)
      } else {
        0.0
      },
      current: initial,
      next: initial,
    }
  }
}

impl Backoff for FibonacciBackoff {
  fn reset(&mut self) {
    self.current = self.initial;
    self.next = self.initial;
  }

  fn next_backoff(&mut self) -> Option<Duration> {
    let delay = self.current.min(self.max);
    let following = self.current.saturating_add(self.next).min(self.max);
    self.current = self.next;
    self.next = following;

    if self.jitter == 0.0 {
      return Some(delay);
    }
    let factor = rand::rng().random_range(1.0 - self.jitter ..= 1.0 + self.jitter);
    Some(delay.mul_f64(factor))
  }
}

//
// RetryPolicy
//

#[derive(Clone, Debug, PartialEq)]
pub struct RetryPolicy {
  // Total attempts including the first one.
  pub max_attempts: u32,
  pub retry_on: Vec<Code>,
  pub initial_delay: Duration,
  pub max_delay: Duration,
  pub strategy: RetryStrategy,
  pub jitter: f64,
}

impl RetryPolicy {
  #[must_use]
  pub fn from_options(options: &ClientOptions) -> Self {
    Self {
      max_attempts: options.retry_fail_after.max(1),
      retry_on: options.retry_on_codes.clone(),
      initial_delay: options.retry_initial_delay.unsigned_abs(),
      max_delay: options.retry_max_delay.unsigned_abs(),
      strategy: options.retry_strategy,
      jitter: options.retry_jitter,
    }
  }

  #[must_use]
  pub fn is_enabled(&self) -> bool {
    self.max_attempts > 1 && !self.retry_on.is_empty()
  }

  #[must_use]
  pub fn should_retry(&self, error: &Error) -> bool {
    self.retry_on.contains(&error.code())
  }

  #[must_use]
  pub fn backoff(&self) -> Box<dyn Backoff + Send> {
    match self.strategy {
      RetryStrategy::Fibonacci => Box::new(FibonacciBackoff::new(
        self.initial_delay,
        self.max_delay,
        self.jitter,
      )),
      RetryStrategy::Exponential => Box::new(
        ExponentialBackoffBuilder::<SystemClock>::new()
          .with_initial_interval(self.initial_delay)
          .with_max_interval(self.max_delay)
          .with_randomization_factor(self.jitter)
          .with_max_elapsed_time(None)
          .build(),
      ),
    }
  }
}

// Run a unary call, retrying failures whose code is in the policy until the attempts run out. The
// final failure is returned unchanged. Errors with other codes fail immediately.
pub async fn with_retry<F, Fut, T>(policy: &RetryPolicy, method: &str, mut call: F) -> Result<T>
where
  F: FnMut() -> Fut,
  Fut: Future<Output = Result<T>>,
{
  let mut backoff = policy.backoff();
  let mut attempt = 1;
  loop {
    let error = match call().await {
      Ok(result) => return Ok(result),
      Err(e) => e,
    };

    if attempt >= policy.max_attempts || !policy.should_retry(&error) {
      if attempt > 1 {
        log::debug!("{method} failed after {attempt} attempts: {error}");
      }
      return Err(error);
    }

    let Some(delay) = backoff.next_backoff() else {
      return Err(error);
    };
    log::debug!(
      "{method} attempt {attempt} failed ({error}), retrying in {} ms",
      delay.as_millis()
    );
    tokio::time::sleep(delay).await;
    attempt += 1;
  }
}
