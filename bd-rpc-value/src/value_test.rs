// shared-core - bitdrift's common client/server libraries
// Copyright Bitdrift, Inc. All rights reserved.
//
// Use of this source code is governed by a source available license that can be found in the
// LICENSE file or at:
// https://polyformproject.org/wp-content/uploads/2020/06/PolyForm-Shield-1.0.0.txt

use super::{ObjectId, Value};
use crate::Error;
use assert_matches::assert_matches;
use pretty_assertions::assert_eq;
use serde_json::json;
use time::macros::datetime;

#[test]
fn object_id_hex() {
  let id: ObjectId = "510928d5014ce75842000008".parse().unwrap();
  assert_eq!(id.to_hex(), "510928d5014ce75842000008");
  assert_eq!(id.to_string(), "510928d5014ce75842000008");
  assert_eq!(id.bytes()[0], 0x51);

  assert_matches!(
    "510928d5".parse::<ObjectId>(),
    Err(Error::InvalidObjectId(_))
  );
  assert_matches!(
    "zz0928d5014ce75842000008".parse::<ObjectId>(),
    Err(Error::InvalidObjectId(_))
  );
  assert_matches!(ObjectId::from_slice(&[1, 2, 3]), Err(Error::InvalidObjectId(_)));
}

#[test]
fn generated_object_ids_differ() {
  let a = ObjectId::new();
  let b = ObjectId::new();
  assert_ne!(a, b);
  assert_eq!(a.to_hex().len(), 24);
}

#[test]
fn map_access() {
  let mut value = Value::map([("name", "james")]);
  assert_eq!(value.get("name").and_then(Value::as_str), Some("james"));
  assert!(value.get("missing").is_none());

  assert_eq!(value.insert("count", 3), None);
  assert_eq!(value.get("count").and_then(Value::as_i64), Some(3));
  assert_eq!(value.remove("count"), Some(Value::Int(3)));

  let mut not_a_map = Value::from("string");
  assert_eq!(not_a_map.insert("key", 1), None);
  assert!(not_a_map.get("key").is_none());
}

#[test]
fn wire_strings() {
  assert_eq!(Value::from("silly").to_wire_string().as_deref(), Some("silly"));
  assert_eq!(Value::from(37).to_wire_string().as_deref(), Some("37"));
  assert_eq!(Value::from(37.0).to_wire_string().as_deref(), Some("37"));
  assert_eq!(Value::from(1.5).to_wire_string().as_deref(), Some("1.5"));
  assert_eq!(Value::from(true).to_wire_string().as_deref(), Some("true"));
  assert_eq!(Value::empty_map().to_wire_string(), None);
  assert_eq!(Value::Null.to_wire_string(), None);
}

#[test]
fn json_conversion() {
  let value = Value::from(json!({
    "some": {"field": "val"},
    "list": [1, 2.5, null],
    "flag": false,
  }));

  assert_eq!(
    value,
    Value::map([
      ("some", Value::map([("field", "val")])),
      (
        "list",
        Value::List(vec![Value::Int(1), Value::Float(2.5), Value::Null])
      ),
      ("flag", Value::Bool(false)),
    ])
  );
  assert_eq!(
    value.to_json(),
    json!({"some": {"field": "val"}, "list": [1, 2.5, null], "flag": false})
  );
}

#[test]
fn json_conversion_of_domain_scalars() {
  let id: ObjectId = "510928d5014ce75842000009".parse().unwrap();
  let value = Value::map([
    ("date", Value::from(datetime!(2017-01-01 0:00 UTC))),
    ("objId", Value::from(id)),
  ]);

  assert_eq!(
    value.to_json(),
    json!({"date": "2017-01-01T00:00:00Z", "objId": "510928d5014ce75842000009"})
  );
}

#[test]
fn option_conversion() {
  assert_eq!(Value::from(None::<&str>), Value::Null);
  assert_eq!(Value::from(Some("x")), Value::from("x"));
}
