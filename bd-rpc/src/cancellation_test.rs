// shared-core - bitdrift's common client/server libraries
// Copyright Bitdrift, Inc. All rights reserved.
//
// Use of this source code is governed by a source available license that can be found in the
// LICENSE file or at:
// https://polyformproject.org/wp-content/uploads/2020/06/PolyForm-Shield-1.0.0.txt

use super::{Cancellation, cancellation};
use futures::poll;
use std::pin::pin;

#[tokio::test]
async fn cancel_is_observed() {
  let (handle, token) = cancellation();
  let other = handle.token();
  assert!(!token.is_cancelled());

  let mut cancelled = pin!(token.cancelled());
  assert!(poll!(cancelled.as_mut()).is_pending());

  handle.cancel();
  cancelled.await;
  assert!(token.is_cancelled());
  assert!(other.is_cancelled());
  assert!(handle.is_cancelled());
}

#[tokio::test]
async fn dropped_handle_never_cancels() {
  let (handle, token) = cancellation();
  drop(handle);
  assert!(!token.is_cancelled());

  let mut cancelled = pin!(token.cancelled());
  assert!(poll!(cancelled.as_mut()).is_pending());
  assert!(poll!(Cancellation::never().into_cancelled()).is_pending());
}

#[tokio::test]
async fn cancel_on_drop() {
  let (handle, token) = cancellation();
  drop(handle.cancel_on_drop());
  assert!(token.is_cancelled());

  let (handle, token) = cancellation();
  let mut guard = handle.cancel_on_drop();
  guard.disarm();
  drop(guard);
  assert!(!token.is_cancelled());
}
