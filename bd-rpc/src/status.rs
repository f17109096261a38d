// shared-core - bitdrift's common client/server libraries
// Copyright Bitdrift, Inc. All rights reserved.
//
// Use of this source code is governed by a source available license that can be found in the
// LICENSE file or at:
// https://polyformproject.org/wp-content/uploads/2020/06/PolyForm-Shield-1.0.0.txt

#[cfg(test)]
#[path = "./status_test.rs"]
mod status_test;

use serde::Deserialize;

//
// Code
//

// gRPC status codes. Unknown is also used as the synthetic code if mapping is not possible.
#[derive(PartialEq, Eq, Debug, Clone, Copy, Hash, Deserialize)]
#[serde(try_from = "i32")]
pub enum Code {
  Ok,
  Cancelled,
  Unknown,
  InvalidArgument,
  DeadlineExceeded,
  NotFound,
  AlreadyExists,
  PermissionDenied,
  ResourceExhausted,
  FailedPrecondition,
  Aborted,
  OutOfRange,
  Unimplemented,
  Internal,
  Unavailable,
  DataLoss,
  Unauthenticated,
}

impl Code {
  // Convert to an int via https://grpc.github.io/grpc/core/md_doc_statuscodes.html.
  #[must_use]
  pub const fn to_int(&self) -> i32 {
    match self {
      Self::Ok => 0,
      Self::Cancelled => 1,
      Self::Unknown => 2,
      Self::InvalidArgument => 3,
      Self::DeadlineExceeded => 4,
      Self::NotFound => 5,
      Self::AlreadyExists => 6,
      Self::PermissionDenied => 7,
      Self::ResourceExhausted => 8,
      Self::FailedPrecondition => 9,
      Self::Aborted => 10,
      Self::OutOfRange => 11,
      Self::Unimplemented => 12,
      Self::Internal => 13,
      Self::Unavailable => 14,
      Self::DataLoss => 15,
      Self::Unauthenticated => 16,
    }
  }

  #[must_use]
  pub const fn from_int(code: i32) -> Option<Self> {
    Some(match code {
      0 => Self::Ok,
      1 => Self::Cancelled,
      2 => Self::Unknown,
      3 => Self::InvalidArgument,
      4 => Self::DeadlineExceeded,
      5 => Self::NotFound,
      6 => Self::AlreadyExists,
      7 => Self::PermissionDenied,
      8 => Self::ResourceExhausted,
      9 => Self::FailedPrecondition,
      10 => Self::Aborted,
      11 => Self::OutOfRange,
      12 => Self::Unimplemented,
      13 => Self::Internal,
      14 => Self::Unavailable,
      15 => Self::DataLoss,
      16 => Self::Unauthenticated,
      _ => return None,
    })
  }

  // Convert from a string via https://grpc.github.io/grpc/core/md_doc_statuscodes.html.
  #[must_use]
  pub fn from_string(status: &str) -> Self {
    status
      .parse()
      .ok()
      .and_then(Self::from_int)
      .unwrap_or(Self::Unknown)
  }
}

impl TryFrom<i32> for Code {
  type Error = String;

  fn try_from(code: i32) -> Result<Self, Self::Error> {
    Self::from_int(code).ok_or_else(|| format!("invalid gRPC status code: {code}"))
  }
}

//
// Status
//

// Wrapper for a gRPC status including a code and optional message.
#[derive(PartialEq, Eq, Debug, Clone)]
pub struct Status {
  pub code: Code,
  pub message: Option<String>,
}

impl Status {
  // Create a new status.
  #[must_use]
  pub fn new(code: Code, message: impl Into<String>) -> Self {
    Self {
      code,
      message: Some(message.into()),
    }
  }

  #[must_use]
  pub const fn from_code(code: Code) -> Self {
    Self {
      code,
      message: None,
    }
  }
}

impl std::fmt::Display for Status {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    write!(
      f,
      "code: {}, message: {}",
      self.code.to_int(),
      self.message.as_ref().map_or("<none>", |s| s.as_str())
    )
  }
}

impl std::error::Error for Status {}
