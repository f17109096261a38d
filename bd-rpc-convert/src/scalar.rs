// shared-core - bitdrift's common client/server libraries
// Copyright Bitdrift, Inc. All rights reserved.
//
// Use of this source code is governed by a source available license that can be found in the
// LICENSE file or at:
// https://polyformproject.org/wp-content/uploads/2020/06/PolyForm-Shield-1.0.0.txt

#[cfg(test)]
#[path = "./scalar_test.rs"]
mod scalar_test;

use anyhow::Context as _;
use bd_rpc_value::{ObjectId, ScalarType, Value};
use bytes::Bytes;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

const NANOS_PER_SECOND: i128 = 1_000_000_000;

// 64-bit integers may arrive as strings.
fn int_field(value: &Value, key: &str) -> i64 {
  value
    .get(key)
    .and_then(|v| v.as_i64().or_else(|| v.as_str().and_then(|s| s.parse().ok())))
    .unwrap_or_default()
}

// Domain timestamp to `{seconds, nanos}`. RFC 3339 strings are accepted as timestamps and an
// already encoded value is passed through.
pub fn encode_timestamp(value: Value) -> anyhow::Result<Value> {
  let timestamp = match value {
    Value::Timestamp(timestamp) => timestamp,
    Value::String(s) => {
      OffsetDateTime::parse(&s, &Rfc3339).with_context(|| format!("invalid timestamp {s:?}"))?
    },
    value @ (Value::Null | Value::Map(_)) => return Ok(value),
    other => anyhow::bail!("cannot encode {other:?} as a timestamp"),
  };

  Ok(Value::map([
    ("seconds", Value::Int(timestamp.unix_timestamp())),
    ("nanos", Value::Int(i64::from(timestamp.nanosecond()))),
  ]))
}

pub fn decode_timestamp(value: Value) -> anyhow::Result<Value> {
  match value {
    Value::Map(_) => {
      let nanos = i128::from(int_field(&value, "seconds")) * NANOS_PER_SECOND
        + i128::from(int_field(&value, "nanos"));
      Ok(Value::Timestamp(OffsetDateTime::from_unix_timestamp_nanos(nanos)?))
    },
    value @ (Value::Null | Value::Timestamp(_)) => Ok(value),
    other => anyhow::bail!("cannot decode {other:?} as a timestamp"),
  }
}

// Object id to its hex string form. Strings are assumed to already be hex.
pub fn object_id_to_hex(value: Value) -> anyhow::Result<Value> {
  match value {
    Value::ObjectId(id) => Ok(Value::String(id.to_hex())),
    value @ (Value::Null | Value::String(_)) => Ok(value),
    other => anyhow::bail!("cannot encode {other:?} as an object id"),
  }
}

// Hex string to object id. An empty string is no id.
pub fn object_id_from_hex(value: Value) -> anyhow::Result<Value> {
  match value {
    Value::String(s) if s.is_empty() => Ok(Value::Null),
    Value::String(s) => Ok(Value::ObjectId(
      s.parse::<ObjectId>()
        .with_context(|| format!("invalid object id {s:?}"))?,
    )),
    value @ (Value::Null | Value::ObjectId(_)) => Ok(value),
    other => anyhow::bail!("cannot decode {other:?} as an object id"),
  }
}

// Object id to the `{value: bytes}` message.
pub fn object_id_to_message(value: Value) -> anyhow::Result<Value> {
  let id = match value {
    Value::ObjectId(id) => id,
    Value::String(s) => s
      .parse::<ObjectId>()
      .with_context(|| format!("invalid object id {s:?}"))?,
    other => anyhow::bail!("cannot encode {other:?} as an object id"),
  };
  Ok(Value::map([(
    "value",
    Value::Bytes(Bytes::copy_from_slice(id.bytes())),
  )]))
}

// The `{value: bytes}` message to an object id. A message without bytes is no id.
pub fn object_id_from_message(value: &Value) -> anyhow::Result<Option<Value>> {
  match value.get("value") {
    Some(Value::Bytes(bytes)) if !bytes.is_empty() => {
      Ok(Some(Value::ObjectId(ObjectId::from_slice(bytes)?)))
    },
    _ => Ok(None),
  }
}

// Any value to the `{representation: <json text>}` message.
pub fn encode_json(value: &Value) -> anyhow::Result<Value> {
  let representation = serde_json::to_string(&value.to_json())?;
  Ok(Value::map([("representation", representation)]))
}

// A representation that does not parse decodes to nothing.
#[must_use]
pub fn decode_json(value: &Value) -> Option<Value> {
  let representation = value.get("representation").and_then(Value::as_str)?;
  match Value::from_json_str(representation) {
    Ok(value) => Some(value),
    Err(e) => {
      log::debug!("ignoring unparseable json representation: {e}");
      None
    },
  }
}

// The value an unset scalar field decodes to.
#[must_use]
pub fn default_value(scalar: ScalarType) -> Value {
  match scalar {
    ScalarType::Double | ScalarType::Float => Value::Float(0.0),
    ScalarType::Int32 | ScalarType::Int64 | ScalarType::UInt32 | ScalarType::UInt64 => {
      Value::Int(0)
    },
    ScalarType::Bool => Value::Bool(false),
    ScalarType::String => Value::String(String::new()),
    ScalarType::Bytes => Value::Bytes(Bytes::new()),
  }
}
