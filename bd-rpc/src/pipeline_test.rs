// shared-core - bitdrift's common client/server libraries
// Copyright Bitdrift, Inc. All rights reserved.
//
// Use of this source code is governed by a source available license that can be found in the
// LICENSE file or at:
// https://polyformproject.org/wp-content/uploads/2020/06/PolyForm-Shield-1.0.0.txt

use super::{RequestSink, ResponseStream, ValueStream, build_pipeline};
use crate::cancellation::{Cancellation, cancellation};
use crate::status::{Code, Status};
use crate::transform::{Transform, transform};
use crate::{Error, Result};
use assert_matches::assert_matches;
use bd_rpc_value::Value;
use futures::{StreamExt, poll, stream};
use std::sync::Arc;

fn doubler() -> Transform {
  transform(|value| {
    value
      .as_i64()
      .map(|i| Value::from(i * 2))
      .ok_or_else(|| anyhow::anyhow!("not a number"))
  })
}

fn plus_one() -> Transform {
  transform(|value| Ok(Value::from(value.as_i64().unwrap_or_default() + 1)))
}

fn values(items: Vec<Result<Value>>) -> ValueStream {
  stream::iter(items).boxed()
}

#[tokio::test]
async fn stages_preserve_order() {
  let output: Vec<_> = build_pipeline(
    values(vec![Ok(1.into()), Ok(2.into()), Ok(3.into())]),
    &[doubler(), plus_one()],
  )
  .collect()
  .await;

  let output: Vec<_> = output.into_iter().map(|v| v.unwrap()).collect();
  assert_eq!(output, vec![Value::from(3), Value::from(5), Value::from(7)]);
}

#[tokio::test]
async fn empty_pipeline_is_identity() {
  let output: Vec<_> = build_pipeline(values(vec![Ok(1.into())]), &[]).collect().await;
  assert_matches!(output.as_slice(), [Ok(Value::Int(1))]);
}

#[tokio::test]
async fn transform_error_reaches_the_terminus() {
  let mut output = build_pipeline(
    values(vec![Ok(1.into()), Ok("x".into()), Ok(3.into())]),
    &[doubler(), plus_one()],
  );

  assert_matches!(output.next().await, Some(Ok(Value::Int(3))));
  assert_matches!(output.next().await, Some(Err(Error::Transform(_))));
  assert_matches!(output.next().await, None);
}

#[tokio::test]
async fn upstream_error_reaches_the_terminus() {
  let mut output = build_pipeline(
    values(vec![Err(Status::new(Code::Unavailable, "down").into())]),
    &[doubler(), plus_one()],
  );
  assert_matches!(
    output.next().await,
    Some(Err(Error::Grpc(status))) => assert_eq!(status.code, Code::Unavailable)
  );
}

#[tokio::test]
async fn sink_applies_transforms_with_back_pressure() {
  let (handle, token) = cancellation();
  let (mut sink, mut outbound, _relay) = RequestSink::new(Arc::from([doubler()]), handle);

  sink.send(1).await.unwrap();
  {
    // The channel holds a single record, so the second write waits for the reader.
    let second = sink.send(2);
    futures::pin_mut!(second);
    assert!(poll!(second.as_mut()).is_pending());
    assert_eq!(outbound.next().await, Some(Value::from(2)));
    second.await.unwrap();
  }
  assert_eq!(outbound.next().await, Some(Value::from(4)));

  sink.close();
  assert!(sink.is_closed());
  assert_matches!(sink.send(3).await, Err(Error::Closed));
  assert_eq!(outbound.next().await, None);
  assert!(!token.is_cancelled());
}

#[tokio::test]
async fn sink_transform_error_is_relayed() {
  let (handle, token) = cancellation();
  let (mut sink, _outbound, relay) = RequestSink::new(Arc::from([doubler()]), handle);

  assert_matches!(sink.send("x").await, Err(Error::Transform(_)));
  assert!(token.is_cancelled());

  let mut responses = ResponseStream::new(stream::pending().boxed(), Some(relay), token);
  assert_matches!(responses.next().await, Some(Err(Error::Transform(_))));
  assert_matches!(responses.next().await, None);
}

#[tokio::test]
async fn response_stream_cancellation() {
  let (handle, token) = cancellation();
  let mut responses = ResponseStream::new(stream::pending().boxed(), None, token);
  assert!(poll!(responses.next()).is_pending());

  handle.cancel();
  assert_matches!(responses.next().await, Some(Err(Error::Cancelled)));
  assert_matches!(responses.next().await, None);
}

#[tokio::test]
async fn response_stream_ends_after_error() {
  let mut responses = ResponseStream::new(
    values(vec![
      Ok(1.into()),
      Err(Error::Closed),
      Ok(2.into()),
    ]),
    None,
    Cancellation::never(),
  );
  assert_matches!(responses.next().await, Some(Ok(_)));
  assert_matches!(responses.next().await, Some(Err(Error::Closed)));
  assert_matches!(responses.next().await, None);
}

#[tokio::test]
async fn dropping_unfinished_response_stream_cancels() {
  let (handle, token) = cancellation();
  let responses =
    ResponseStream::new(stream::pending().boxed(), None, token.clone()).cancel_on_drop(handle);
  drop(responses);
  assert!(token.is_cancelled());

  let (handle, token) = cancellation();
  let mut responses = ResponseStream::new(values(vec![Ok(1.into())]), None, token.clone())
    .cancel_on_drop(handle);
  assert_matches!(responses.next().await, Some(Ok(_)));
  assert_matches!(responses.next().await, None);
  drop(responses);
  assert!(!token.is_cancelled());
}
