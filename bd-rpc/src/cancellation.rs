// shared-core - bitdrift's common client/server libraries
// Copyright Bitdrift, Inc. All rights reserved.
//
// Use of this source code is governed by a source available license that can be found in the
// LICENSE file or at:
// https://polyformproject.org/wp-content/uploads/2020/06/PolyForm-Shield-1.0.0.txt

#[cfg(test)]
#[path = "./cancellation_test.rs"]
mod cancellation_test;

use futures::future::BoxFuture;
use std::sync::Arc;
use tokio::sync::watch;

// Create a linked cancellation handle and token. The token observes the handle: once cancel() has
// been called every clone of the token reports cancelled.
#[must_use]
pub fn cancellation() -> (CancellationHandle, Cancellation) {
  let (tx, rx) = watch::channel(false);
  (
    CancellationHandle { tx: Arc::new(tx) },
    Cancellation { rx },
  )
}

//
// CancellationHandle
//

#[derive(Clone, Debug)]
pub struct CancellationHandle {
  tx: Arc<watch::Sender<bool>>,
}

impl CancellationHandle {
  pub fn cancel(&self) {
    if !self.tx.send_replace(true) {
      log::trace!("call cancelled");
    }
  }

  #[must_use]
  pub fn is_cancelled(&self) -> bool {
    *self.tx.borrow()
  }

  #[must_use]
  pub fn token(&self) -> Cancellation {
    Cancellation {
      rx: self.tx.subscribe(),
    }
  }

  // Returns a guard that cancels when dropped unless disarmed first.
  #[must_use]
  pub fn cancel_on_drop(self) -> CancelOnDrop {
    CancelOnDrop { handle: Some(self) }
  }
}

//
// Cancellation
//

// The observing side of a cancellation. Cheap to clone.
#[derive(Clone, Debug)]
pub struct Cancellation {
  rx: watch::Receiver<bool>,
}

impl Cancellation {
  // A token that is never cancelled.
  #[must_use]
  pub fn never() -> Self {
    let (_, token) = cancellation();
    token
  }

  #[must_use]
  pub fn is_cancelled(&self) -> bool {
    *self.rx.borrow()
  }

  // Resolves once cancelled. If the handle is dropped without cancelling, this never resolves.
  pub async fn cancelled(&self) {
    let mut rx = self.rx.clone();
    let cancelled = rx.wait_for(|cancelled| *cancelled).await.is_ok();
    if !cancelled {
      std::future::pending::<()>().await;
    }
  }

  #[must_use]
  pub fn into_cancelled(self) -> BoxFuture<'static, ()> {
    Box::pin(async move { self.cancelled().await })
  }
}

//
// CancelOnDrop
//

pub struct CancelOnDrop {
  handle: Option<CancellationHandle>,
}

impl CancelOnDrop {
  pub fn disarm(&mut self) {
    self.handle = None;
  }
}

impl Drop for CancelOnDrop {
  fn drop(&mut self) {
    if let Some(handle) = self.handle.take() {
      handle.cancel();
    }
  }
}
