// shared-core - bitdrift's common client/server libraries
// Copyright Bitdrift, Inc. All rights reserved.
//
// Use of this source code is governed by a source available license that can be found in the
// LICENSE file or at:
// https://polyformproject.org/wp-content/uploads/2020/06/PolyForm-Shield-1.0.0.txt

use super::*;
use crate::test::{connect, message_type};
use crate::{client_wrapper_converters, server_wrapper_converters};
use assert_matches::assert_matches;
use bd_rpc::{ServerCall, ServiceImplementation};
use bd_rpc_value::ObjectId;
use bytes::Bytes;
use parking_lot::Mutex;
use pretty_assertions::assert_eq;
use time::macros::datetime;

fn owner() -> ObjectId {
  "65a1b2c3d4e5f60718293a4b".parse().unwrap()
}

// A profile as application code sees it.
fn profile() -> Value {
  Value::map([
    ("nickname", Value::from("neo")),
    ("verified", Value::Bool(true)),
    ("aliases", Value::from(vec![Value::from("a"), Value::from("b")])),
    ("owner", Value::ObjectId(owner())),
    ("settings", Value::map([("theme", "dark")])),
    ("joined", Value::Timestamp(datetime!(1970-01-01 00:00:10 UTC))),
    ("motto", Value::Null),
    ("seen", Value::Timestamp(datetime!(1970-01-01 00:00:20 UTC))),
    (
      "colors",
      Value::from(vec![Value::from("RED"), Value::from("BLUE")]),
    ),
    ("scores", Value::map([("math", 5)])),
    ("name", Value::from("plain")),
  ])
}

// The same profile as it travels on the wire.
fn wrapped_profile() -> Value {
  Value::map([
    ("nickname", Value::map([("value", "neo")])),
    ("verified", Value::map([("value", true)])),
    (
      "aliases",
      Value::from(vec![
        Value::map([("value", "a")]),
        Value::map([("value", "b")]),
      ]),
    ),
    (
      "owner",
      Value::map([("value", Bytes::copy_from_slice(owner().bytes()))]),
    ),
    (
      "settings",
      Value::map([("representation", r#"{"theme":"dark"}"#)]),
    ),
    ("joined", Value::map([("seconds", 10), ("nanos", 0)])),
    ("motto", Value::map([("isNull", true)])),
    (
      "seen",
      Value::map([("value", Value::map([("seconds", 20), ("nanos", 0)]))]),
    ),
    (
      "colors",
      Value::map([("value", Value::from(vec![Value::Int(0), Value::Int(2)]))]),
    ),
    ("scores", Value::map([("math", Value::map([("value", 5)]))])),
    ("name", Value::from("plain")),
  ])
}

fn profile_converter(direction: Direction) -> Transform {
  converter(&message_type("test.Profile"), direction).unwrap()
}

#[test]
fn wrapper_kinds() {
  assert_eq!(
    WrapperKind::detect(&message_type("google.protobuf.StringValue")),
    Some(WrapperKind::Scalar(ScalarType::String))
  );
  assert_eq!(
    WrapperKind::detect(&message_type("google.protobuf.Int64Value")),
    Some(WrapperKind::Scalar(ScalarType::Int64))
  );
  assert_eq!(
    WrapperKind::detect(&message_type("google.protobuf.Timestamp")),
    Some(WrapperKind::Timestamp)
  );
  assert_eq!(
    WrapperKind::detect(&message_type(OBJECT_ID_TYPE)),
    Some(WrapperKind::ObjectId)
  );
  assert_eq!(
    WrapperKind::detect(&message_type(JSON_OBJECT_TYPE)),
    Some(WrapperKind::Json)
  );
  assert_eq!(
    WrapperKind::detect(&message_type("test.wrappers.arrays.NullableColors")),
    Some(WrapperKind::Nullable)
  );
  assert_eq!(WrapperKind::detect(&message_type("test.Profile")), None);
}

#[test]
fn wrap_profile() {
  let wrap = profile_converter(Direction::Encode);
  assert_eq!(wrap(profile()).unwrap(), wrapped_profile());
}

#[test]
fn unwrap_profile() {
  let unwrap = profile_converter(Direction::Decode);
  assert_eq!(unwrap(wrapped_profile()).unwrap(), profile());
}

#[test]
fn null_wrapper_values_are_left_unset() {
  let wrap = profile_converter(Direction::Encode);
  let wrapped = wrap(Value::map([
    ("age", Value::Null),
    ("owner", Value::Null),
    ("joined", Value::Null),
    (
      "aliases",
      Value::from(vec![Value::Null, Value::from("a")]),
    ),
    ("scores", Value::map([("math", Value::Null)])),
  ]))
  .unwrap();
  assert_eq!(
    wrapped,
    Value::map([
      ("aliases", Value::from(vec![Value::map([("value", "a")])])),
      ("scores", Value::empty_map()),
    ])
  );
}

#[test]
fn unset_inner_values_decode_to_defaults() {
  let unwrap = profile_converter(Direction::Decode);
  let unwrapped = unwrap(Value::map([
    ("age", Value::empty_map()),
    ("motto", Value::empty_map()),
    ("colors", Value::empty_map()),
    ("seen", Value::empty_map()),
    ("owner", Value::empty_map()),
    ("settings", Value::map([("representation", "{broken")])),
  ]))
  .unwrap();
  assert_eq!(
    unwrapped,
    Value::map([
      ("age", Value::Int(0)),
      ("motto", Value::from("")),
      ("colors", Value::List(Vec::new())),
    ])
  );
}

#[test]
fn unknown_enum_values_pass_through() {
  let wrap = profile_converter(Direction::Encode);
  let wrapped = wrap(Value::map([(
    "colors",
    Value::from(vec![Value::from("PURPLE"), Value::from("GREEN")]),
  )]))
  .unwrap();
  assert_eq!(
    wrapped.get("colors"),
    Some(&Value::map([(
      "value",
      Value::from(vec![Value::from("PURPLE"), Value::Int(1)])
    )]))
  );

  let unwrap = profile_converter(Direction::Decode);
  let unwrapped = unwrap(Value::map([(
    "colors",
    Value::map([("value", Value::from(vec![Value::Int(9)]))]),
  )]))
  .unwrap();
  assert_eq!(
    unwrapped.get("colors"),
    Some(&Value::from(vec![Value::Int(9)]))
  );
}

#[test]
fn invalid_object_ids_fail_wrapping() {
  let wrap = profile_converter(Direction::Encode);
  assert_matches!(wrap(Value::map([("owner", "xyz")])), Err(_));
}

#[test]
fn types_without_wrappers_get_no_converter() {
  assert!(converter(&message_type("test.Plain"), Direction::Encode).is_none());
  assert!(converter(&message_type("test.Plain"), Direction::Decode).is_none());
  assert!(converter(&message_type("test.Document"), Direction::Decode).is_some());
}

#[tokio::test]
async fn profiles_cross_the_wire_as_domain_values() {
  let received = Arc::new(Mutex::new(None));
  let received_clone = received.clone();
  let implementation =
    ServiceImplementation::new().unary_fn("update", move |request: Value, _call: ServerCall| {
      let received = received_clone.clone();
      async move {
        *received.lock() = Some(request.clone());
        let mut response = request;
        response.insert("motto", "carpe diem");
        Ok(response)
      }
    });
  let client = connect(
    implementation,
    &[server_wrapper_converters()],
    &[client_wrapper_converters()],
  )
  .await;

  let response = client.unary("update", profile()).await.unwrap();
  assert_eq!(received.lock().take(), Some(profile()));
  assert_eq!(response.get("motto"), Some(&Value::from("carpe diem")));
  assert_eq!(response.get("owner"), Some(&Value::ObjectId(owner())));
  assert_eq!(
    response.get("colors"),
    Some(&Value::from(vec![Value::from("RED"), Value::from("BLUE")]))
  );
}
