// shared-core - bitdrift's common client/server libraries
// Copyright Bitdrift, Inc. All rights reserved.
//
// Use of this source code is governed by a source available license that can be found in the
// LICENSE file or at:
// https://polyformproject.org/wp-content/uploads/2020/06/PolyForm-Shield-1.0.0.txt

#[cfg(test)]
#[path = "./options_test.rs"]
mod options_test;

use crate::status::Code;
use serde::Deserialize;
use time::Duration;
use time::ext::NumericalDuration;

//
// RetryStrategy
//

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RetryStrategy {
  #[default]
  Fibonacci,
  Exponential,
}

//
// ContextOptions
//

// Controls how the request context is recognized on a request type and how it is written to wire
// metadata.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ContextOptions {
  // Context keys are written as `x-<prefix>-context-<kebab-case key>`.
  pub metadata_prefix: String,
  // Full name of the free-form context message.
  pub simple_context_type: String,
  // Full name of the context message with known fields and a nested vendor bag.
  pub common_context_type: String,
  pub vendor_field: String,
  pub default_application_id: String,
}

impl Default for ContextOptions {
  fn default() -> Self {
    Self {
      metadata_prefix: "bd".to_string(),
      simple_context_type: ".bd.rpc.RequestContext".to_string(),
      common_context_type: ".bd.rpc.CommonRequestContext".to_string(),
      vendor_field: "vendor".to_string(),
      default_application_id: "unknown".to_string(),
    }
  }
}

impl ContextOptions {
  #[must_use]
  pub fn metadata_key_prefix(&self) -> String {
    format!("x-{}-context-", self.metadata_prefix)
  }
}

//
// ClientOptions
//

#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ClientOptions {
  // Total number of attempts for a unary call, including the first one.
  pub retry_fail_after: u32,
  // Only errors carrying one of these codes are retried. Empty disables retry.
  pub retry_on_codes: Vec<Code>,
  #[serde(with = "millis")]
  pub retry_initial_delay: Duration,
  #[serde(with = "millis")]
  pub retry_max_delay: Duration,
  pub retry_strategy: RetryStrategy,
  // Randomization factor applied to each delay, e.g. 0.1 for +/- 10%.
  pub retry_jitter: f64,
  // Filled into outbound request contexts that do not carry an application id.
  pub application_id: Option<String>,
  pub context: ContextOptions,
}

impl Default for ClientOptions {
  fn default() -> Self {
    Self {
      retry_fail_after: 10,
      retry_on_codes: vec![],
      retry_initial_delay: 100.milliseconds(),
      retry_max_delay: 10.seconds(),
      retry_strategy: RetryStrategy::default(),
      retry_jitter: 0.1,
      application_id: None,
      context: ContextOptions::default(),
    }
  }
}

impl ClientOptions {
  pub fn from_yaml(yaml: &str) -> anyhow::Result<Self> {
    Ok(serde_yaml::from_str(yaml)?)
  }
}

//
// DispatcherOptions
//

#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DispatcherOptions {
  pub context: ContextOptions,
  // Minimum interval between handler failure warnings for a single method.
  #[serde(with = "millis")]
  pub warn_interval: Duration,
}

impl Default for DispatcherOptions {
  fn default() -> Self {
    Self {
      context: ContextOptions::default(),
      warn_interval: 15.seconds(),
    }
  }
}

impl DispatcherOptions {
  pub fn from_yaml(yaml: &str) -> anyhow::Result<Self> {
    Ok(serde_yaml::from_str(yaml)?)
  }
}

// Durations are configured as integer milliseconds.
mod millis {
  use serde::{Deserialize, Deserializer};
  use time::Duration;

  pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
    Ok(Duration::milliseconds(u32::deserialize(deserializer)?.into()))
  }
}
