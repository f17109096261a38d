// shared-core - bitdrift's common client/server libraries
// Copyright Bitdrift, Inc. All rights reserved.
//
// Use of this source code is governed by a source available license that can be found in the
// LICENSE file or at:
// https://polyformproject.org/wp-content/uploads/2020/06/PolyForm-Shield-1.0.0.txt

#[cfg(test)]
#[path = "./error_test.rs"]
mod error_test;

use crate::status::{Code, Status};
use bd_rpc_value::CallShape;
use std::sync::Arc;

//
// Error
//

// Errors are cloneable so that a single failure can be delivered to both halves of a duplex call
// as well as to the diagnostic observers.
#[derive(Clone, Debug, thiserror::Error)]
pub enum Error {
  #[error("A gRPC error occurred: {0}")]
  Grpc(#[from] Status),
  #[error("A transform failed: {0}")]
  Transform(Arc<anyhow::Error>),
  #[error("A handler failed: {0}")]
  Handler(Arc<anyhow::Error>),
  #[error("A handler panicked: {0}")]
  HandlerPanic(String),
  #[error("Stream has closed")]
  Closed,
  #[error("Call was cancelled")]
  Cancelled,
  #[error("Unknown method: {0}")]
  UnknownMethod(String),
  #[error("Method {method} is {actual}, not {expected}")]
  ShapeMismatch {
    method: String,
    expected: CallShape,
    actual: CallShape,
  },
  #[error("A descriptor error occurred: {0}")]
  Resolve(#[from] bd_rpc_value::Error),
  #[error("Unable to connect to {address}: {reason}")]
  Connect { address: String, reason: String },
  #[error("{method} failed (called at {call_site}): {source}")]
  Call {
    method: String,
    call_site: String,
    source: Box<Error>,
  },
}

pub type Result<T> = std::result::Result<T, Error>;

impl From<anyhow::Error> for Error {
  fn from(e: anyhow::Error) -> Self {
    Self::Handler(Arc::new(e))
  }
}

impl Error {
  #[must_use]
  pub fn transform(e: anyhow::Error) -> Self {
    Self::Transform(Arc::new(e))
  }

  // The status this error is reported with on the wire.
  #[must_use]
  pub fn status(&self) -> Status {
    match self {
      Self::Grpc(status) => status.clone(),
      Self::Call { source, .. } => source.status(),
      Self::Cancelled => Status::new(Code::Cancelled, self.to_string()),
      Self::UnknownMethod(_) => Status::new(Code::Unimplemented, self.to_string()),
      Self::Connect { .. } => Status::new(Code::Unavailable, self.to_string()),
      Self::Transform(_)
      | Self::Handler(_)
      | Self::HandlerPanic(_)
      | Self::Closed
      | Self::ShapeMismatch { .. }
      | Self::Resolve(_) => Status::new(Code::Internal, self.to_string()),
    }
  }

  #[must_use]
  pub fn code(&self) -> Code {
    self.status().code
  }

  // The error with any client call-site augmentation removed.
  #[must_use]
  pub fn root(&self) -> &Self {
    match self {
      Self::Call { source, .. } => source.root(),
      _ => self,
    }
  }

  // Attach the fully qualified method name and the call site the wrapper was entered from. An
  // already augmented error is returned unchanged.
  #[must_use]
  pub fn with_call_context(self, method: &str, call_site: &std::panic::Location<'static>) -> Self {
    if matches!(self, Self::Call { .. }) {
      return self;
    }

    Self::Call {
      method: method.to_string(),
      call_site: call_site.to_string(),
      source: Box::new(self),
    }
  }

  // Errors that should be warned about at a rate limited interval, vs. logged at debug.
  #[must_use]
  pub fn warn_every_message(&self) -> Option<String> {
    match self.root() {
      Self::Grpc(status) if status.code == Code::Internal => Some(format!(
        "gRPC internal error ({})",
        status.message.as_deref().unwrap_or_default()
      )),
      Self::Transform(e) => Some(format!("transform error: {e}")),
      Self::Handler(e) => Some(format!("handler error: {e}")),
      Self::HandlerPanic(message) => Some(format!("handler panic: {message}")),
      _ => None,
    }
  }
}
