// shared-core - bitdrift's common client/server libraries
// Copyright Bitdrift, Inc. All rights reserved.
//
// Use of this source code is governed by a source available license that can be found in the
// LICENSE file or at:
// https://polyformproject.org/wp-content/uploads/2020/06/PolyForm-Shield-1.0.0.txt

use super::{TransformPair, TransformRegistry, apply_chain, transform};
use crate::Error;
use assert_matches::assert_matches;
use bd_rpc_value::{DescriptorPool, FieldDescriptor, MessageDescriptor, ScalarType, Value};
use pretty_assertions::assert_eq;

fn append(tag: &'static str) -> impl Fn(Value) -> anyhow::Result<Value> + Send + Sync + 'static {
  move |mut value| {
    let mut trail = value
      .get("trail")
      .and_then(Value::as_str)
      .unwrap_or_default()
      .to_string();
    trail.push_str(tag);
    value.insert("trail", trail);
    Ok(value)
  }
}

#[test]
fn chain_ordering() {
  let pool = DescriptorPool::builder()
    .message(MessageDescriptor::new(
      "test.Message",
      vec![FieldDescriptor::scalar("trail", ScalarType::String)],
    ))
    .build()
    .unwrap();
  let message = pool.message("test.Message").unwrap();

  let mut registry = TransformRegistry::new(&[
    TransformPair::uniform(append("A"), append("a")),
    TransformPair::uniform(append("B"), append("b")),
    TransformPair::request_only(|_| None),
  ]);
  registry.register("hello", &message, &message);

  let request = apply_chain(
    &registry.request_transforms_for("hello"),
    Value::empty_map(),
  )
  .unwrap();
  assert_eq!(request.get("trail"), Some(&Value::from("AB")));

  let response = apply_chain(
    &registry.response_transforms_for("hello"),
    Value::empty_map(),
  )
  .unwrap();
  assert_eq!(response.get("trail"), Some(&Value::from("ba")));

  assert!(registry.request_transforms_for("unknown").is_empty());
  assert!(registry.response_transforms_for("unknown").is_empty());
}

#[test]
fn factories_see_resolved_types() {
  let pool = DescriptorPool::builder()
    .message(MessageDescriptor::new("test.Request", vec![]))
    .message(MessageDescriptor::new("test.Response", vec![]))
    .build()
    .unwrap();

  let mut registry = TransformRegistry::new(&[TransformPair::new(
    |request_type| {
      let name = request_type.full_name().to_string();
      Some(transform(move |_| Ok(Value::from(name.as_str()))))
    },
    |response_type| (response_type.full_name() == ".test.Nope").then(|| transform(Ok)),
  )]);
  registry.register(
    "hello",
    &pool.message("test.Request").unwrap(),
    &pool.message("test.Response").unwrap(),
  );

  assert_eq!(
    apply_chain(&registry.request_transforms_for("hello"), Value::Null).unwrap(),
    Value::from(".test.Request")
  );
  assert!(registry.response_transforms_for("hello").is_empty());
}

#[test]
fn chain_errors() {
  let chain = [
    transform(|_| Err(anyhow::anyhow!("nope"))),
    transform(|_| panic!("must not run")),
  ];
  assert_matches!(
    apply_chain(&chain, Value::Null),
    Err(Error::Transform(e)) => assert_eq!(e.to_string(), "nope")
  );
}
