// shared-core - bitdrift's common client/server libraries
// Copyright Bitdrift, Inc. All rights reserved.
//
// Use of this source code is governed by a source available license that can be found in the
// LICENSE file or at:
// https://polyformproject.org/wp-content/uploads/2020/06/PolyForm-Shield-1.0.0.txt

#[cfg(test)]
#[path = "./pipeline_test.rs"]
mod pipeline_test;

use crate::cancellation::{CancelOnDrop, Cancellation, CancellationHandle};
use crate::transform::{Transform, apply_chain};
use crate::{Error, Result};
use bd_rpc_value::Value;
use futures::future::BoxFuture;
use futures::stream::BoxStream;
use futures::{FutureExt, Stream, StreamExt};
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll, ready};
use tokio::sync::{mpsc, oneshot};
use tokio_stream::wrappers::ReceiverStream;

pub type ValueStream = BoxStream<'static, Result<Value>>;

//
// TransformStage
//

// A single 1:1 stage. A transform failure is emitted as an error on this stage's output after which
// the stage ends. Upstream errors are forwarded untouched.
pub struct TransformStage {
  upstream: ValueStream,
  transform: Transform,
  done: bool,
}

impl TransformStage {
  #[must_use]
  pub fn new(upstream: ValueStream, transform: Transform) -> Self {
    Self {
      upstream,
      transform,
      done: false,
    }
  }
}

impl Stream for TransformStage {
  type Item = Result<Value>;

  fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
    let this = self.get_mut();
    if this.done {
      return Poll::Ready(None);
    }

    match ready!(this.upstream.poll_next_unpin(cx)) {
      None => {
        this.done = true;
        Poll::Ready(None)
      },
      Some(Ok(value)) => match (this.transform)(value) {
        Ok(value) => Poll::Ready(Some(Ok(value))),
        Err(e) => {
          log::trace!("transform stage failed: {e}");
          this.done = true;
          Poll::Ready(Some(Err(Error::transform(e))))
        },
      },
      Some(Err(e)) => Poll::Ready(Some(Err(e))),
    }
  }
}

// Chain one stage per transform onto a base stream, returning the terminal stream. Pull based, so
// back-pressure and ordering are those of the base stream.
#[must_use]
pub fn build_pipeline(base: ValueStream, transforms: &[Transform]) -> ValueStream {
  transforms.iter().fold(base, |stream, transform| {
    TransformStage::new(stream, transform.clone()).boxed()
  })
}

//
// RequestSink
//

// The writable half of a client streaming or bidi call. Request transforms run on each write. A
// transform failure is returned to the writer, relayed to the read side of the call, and cancels
// the call.
pub struct RequestSink {
  tx: Option<mpsc::Sender<Value>>,
  transforms: Arc<[Transform]>,
  relay: Option<oneshot::Sender<Error>>,
  cancel: CancellationHandle,
}

impl RequestSink {
  // Returns the sink, the stream of transformed requests to hand to the transport, and the receiver
  // for relayed errors. The transport stream ends once the call is cancelled, even while the sink
  // is still held.
  #[must_use]
  pub fn new(
    transforms: Arc<[Transform]>,
    cancel: CancellationHandle,
  ) -> (Self, BoxStream<'static, Value>, oneshot::Receiver<Error>) {
    let (tx, rx) = mpsc::channel(1);
    let (relay_tx, relay_rx) = oneshot::channel();
    let requests = ReceiverStream::new(rx)
      .take_until(cancel.token().into_cancelled())
      .boxed();
    (
      Self {
        tx: Some(tx),
        transforms,
        relay: Some(relay_tx),
        cancel,
      },
      requests,
      relay_rx,
    )
  }

  pub async fn send(&mut self, value: impl Into<Value>) -> Result<()> {
    if self.cancel.is_cancelled() {
      return Err(Error::Cancelled);
    }
    if self.tx.is_none() {
      return Err(Error::Closed);
    }

    let value = match apply_chain(&self.transforms, value.into()) {
      Ok(value) => value,
      Err(e) => {
        self.fail(e.clone());
        return Err(e);
      },
    };

    let Some(tx) = &self.tx else {
      return Err(Error::Closed);
    };
    let cancelled = self.cancel.token();
    tokio::select! {
      result = tx.send(value) => result.map_err(|_| Error::Closed),
      () = cancelled.cancelled() => Err(Error::Cancelled),
    }
  }

  // Close the write side. The read side of the call is unaffected.
  pub fn close(&mut self) {
    if self.tx.take().is_some() {
      log::trace!("request sink closed");
    }
  }

  #[must_use]
  pub const fn is_closed(&self) -> bool {
    self.tx.is_none()
  }

  fn fail(&mut self, error: Error) {
    self.tx = None;
    if let Some(relay) = self.relay.take() {
      let _ignored = relay.send(error);
    }
    self.cancel.cancel();
  }
}

//
// ResponseStream
//

// The read half of a streaming call. Terminates with an error when an error is relayed from the
// write side or when the call is cancelled, and never yields anything after its first error.
pub struct ResponseStream {
  inner: ValueStream,
  relayed: Option<oneshot::Receiver<Error>>,
  cancelled: BoxFuture<'static, ()>,
  guard: Option<CancelOnDrop>,
  done: bool,
}

impl ResponseStream {
  #[must_use]
  pub fn new(
    inner: ValueStream,
    relayed: Option<oneshot::Receiver<Error>>,
    cancellation: Cancellation,
  ) -> Self {
    Self {
      inner,
      relayed,
      cancelled: cancellation.into_cancelled(),
      guard: None,
      done: false,
    }
  }

  // Cancel the call if the stream is dropped before it has finished.
  #[must_use]
  pub fn cancel_on_drop(mut self, handle: CancellationHandle) -> Self {
    self.guard = Some(handle.cancel_on_drop());
    self
  }

  fn end(&mut self) {
    self.done = true;
    if let Some(mut guard) = self.guard.take() {
      guard.disarm();
    }
  }

  fn finish(&mut self, error: Error) -> Poll<Option<Result<Value>>> {
    self.end();
    Poll::Ready(Some(Err(error)))
  }
}

impl Stream for ResponseStream {
  type Item = Result<Value>;

  fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
    let this = self.get_mut();
    if this.done {
      return Poll::Ready(None);
    }

    if let Some(relayed) = &mut this.relayed {
      match relayed.poll_unpin(cx) {
        Poll::Ready(Ok(error)) => return this.finish(error),
        Poll::Ready(Err(_)) => this.relayed = None,
        Poll::Pending => {},
      }
    }

    if this.cancelled.poll_unpin(cx).is_ready() {
      log::debug!("response stream cancelled");
      return this.finish(Error::Cancelled);
    }

    match ready!(this.inner.poll_next_unpin(cx)) {
      Some(Ok(value)) => Poll::Ready(Some(Ok(value))),
      Some(Err(e)) => this.finish(e),
      None => {
        this.end();
        Poll::Ready(None)
      },
    }
  }
}
