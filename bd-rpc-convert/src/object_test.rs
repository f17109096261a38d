// shared-core - bitdrift's common client/server libraries
// Copyright Bitdrift, Inc. All rights reserved.
//
// Use of this source code is governed by a source available license that can be found in the
// LICENSE file or at:
// https://polyformproject.org/wp-content/uploads/2020/06/PolyForm-Shield-1.0.0.txt

use super::*;
use crate::test::{connect, message_type};
use crate::{client_object_converters, server_object_converters};
use bd_rpc::{ServerCall, ServiceImplementation};
use bd_rpc_value::ObjectId;
use parking_lot::Mutex;
use pretty_assertions::assert_eq;
use time::macros::datetime;

fn id() -> ObjectId {
  "65a1b2c3d4e5f60718293a4b".parse().unwrap()
}

fn encoded_time(seconds: i64) -> Value {
  Value::map([("seconds", seconds), ("nanos", 0)])
}

// A document as application code sees it.
fn document() -> Value {
  Value::map([
    ("id", Value::ObjectId(id())),
    ("title", Value::from("notes")),
    ("created", Value::Timestamp(datetime!(1970-01-01 00:01:40 UTC))),
    (
      "times",
      Value::from(vec![
        Value::Timestamp(datetime!(1970-01-01 00:00:01 UTC)),
        Value::Timestamp(datetime!(1970-01-01 00:00:02 UTC)),
      ]),
    ),
    (
      "items",
      Value::from(vec![Value::map([
        ("created", Value::Timestamp(datetime!(1970-01-01 00:00:03 UTC))),
        ("owner", Value::ObjectId(id())),
        ("label", Value::from("first")),
      ])]),
    ),
    (
      "meta",
      Value::map([("tags", Value::from(vec![Value::from("a")]))]),
    ),
    (
      "byName",
      Value::map([("start", Value::Timestamp(datetime!(1970-01-01 00:00:04 UTC)))]),
    ),
    (
      "root",
      Value::map([
        ("updated", Value::Timestamp(datetime!(1970-01-01 00:00:05 UTC))),
        (
          "children",
          Value::from(vec![Value::map([
            ("updated", Value::Timestamp(datetime!(1970-01-01 00:00:06 UTC))),
            (
              "children",
              Value::from(vec![Value::map([(
                "updated",
                Value::Timestamp(datetime!(1970-01-01 00:00:07 UTC)),
              )])]),
            ),
          ])]),
        ),
      ]),
    ),
  ])
}

// The same document as it travels on the wire.
fn encoded_document() -> Value {
  Value::map([
    ("id", Value::from("65a1b2c3d4e5f60718293a4b")),
    ("title", Value::from("notes")),
    ("created", encoded_time(100)),
    ("times", Value::from(vec![encoded_time(1), encoded_time(2)])),
    (
      "items",
      Value::from(vec![Value::map([
        ("created", encoded_time(3)),
        ("owner", Value::from("65a1b2c3d4e5f60718293a4b")),
        ("label", Value::from("first")),
      ])]),
    ),
    (
      "meta",
      Value::map([("representation", r#"{"tags":["a"]}"#)]),
    ),
    ("byName", Value::map([("start", encoded_time(4))])),
    (
      "root",
      Value::map([
        ("updated", encoded_time(5)),
        (
          "children",
          Value::from(vec![Value::map([
            ("updated", encoded_time(6)),
            (
              "children",
              Value::from(vec![Value::map([("updated", encoded_time(7))])]),
            ),
          ])]),
        ),
      ]),
    ),
  ])
}

fn document_converter(direction: Direction) -> Transform {
  converter(&message_type("test.Document"), direction).unwrap()
}

#[test]
fn encode_converts_every_planned_field() {
  let encode = document_converter(Direction::Encode);
  assert_eq!(encode(document()).unwrap(), encoded_document());
}

#[test]
fn decode_restores_domain_values() {
  let decode = document_converter(Direction::Decode);
  assert_eq!(decode(encoded_document()).unwrap(), document());
}

#[test]
fn encode_drops_private_keys_and_nulls() {
  let encode = document_converter(Direction::Encode);
  let mut value = document();
  value.insert("__cache", "stale");
  value.insert("title", Value::Null);
  value.insert(
    "items",
    Value::from(vec![
      Value::Null,
      Value::map([("__v", Value::Int(1)), ("label", Value::Null)]),
    ]),
  );
  value.insert(
    "plain",
    Value::map([
      ("name", Value::Null),
      (
        "extra",
        Value::from(vec![Value::Null, Value::map([("__d", 1)])]),
      ),
    ]),
  );

  let encoded = encode(value).unwrap();
  assert_eq!(encoded.get("__cache"), None);
  assert_eq!(encoded.get("title"), None);
  assert_eq!(
    encoded.get("items"),
    Some(&Value::from(vec![Value::empty_map()]))
  );
  assert_eq!(
    encoded.get("plain"),
    Some(&Value::map([(
      "extra",
      Value::from(vec![Value::empty_map()])
    )]))
  );
}

#[test]
fn decode_tolerates_bad_representations() {
  let decode = document_converter(Direction::Decode);
  let decoded = decode(Value::map([
    ("id", Value::from("")),
    ("meta", Value::map([("representation", "{not json")])),
    ("title", Value::from("kept")),
  ]))
  .unwrap();
  assert_eq!(
    decoded,
    Value::map([("id", Value::Null), ("title", Value::from("kept"))])
  );

  assert!(decode(Value::map([("id", "zz")])).is_err());
}

#[test]
fn invalid_domain_values_fail_encoding() {
  let encode = document_converter(Direction::Encode);
  assert!(encode(Value::map([("created", "last week")])).is_err());
  assert!(encode(Value::map([("id", 7)])).is_err());
}

#[test]
fn decode_is_skipped_without_conversions() {
  let plain = message_type("test.Plain");
  assert!(converter(&plain, Direction::Decode).is_none());

  let encode = converter(&plain, Direction::Encode).unwrap();
  assert_eq!(
    encode(Value::map([("name", Value::from("x")), ("count", Value::Null)])).unwrap(),
    Value::map([("name", "x")])
  );
}

#[tokio::test]
async fn documents_cross_the_wire_as_domain_values() {
  let received = Arc::new(Mutex::new(None));
  let received_clone = received.clone();
  let implementation =
    ServiceImplementation::new().unary_fn("save", move |request: Value, _call: ServerCall| {
      let received = received_clone.clone();
      async move {
        *received.lock() = Some(request.clone());
        Ok(request)
      }
    });
  let client = connect(
    implementation,
    &[server_object_converters()],
    &[client_object_converters()],
  )
  .await;

  let response = client.unary("save", document()).await.unwrap();
  assert_eq!(response, document());
  assert_eq!(received.lock().take(), Some(document()));
}
