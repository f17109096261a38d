// shared-core - bitdrift's common client/server libraries
// Copyright Bitdrift, Inc. All rights reserved.
//
// Use of this source code is governed by a source available license that can be found in the
// LICENSE file or at:
// https://polyformproject.org/wp-content/uploads/2020/06/PolyForm-Shield-1.0.0.txt

#[cfg(test)]
#[path = "./value_test.rs"]
mod value_test;

use crate::{Error, Result};
use base64ct::Encoding;
use bytes::Bytes;
use std::collections::BTreeMap;
use std::fmt::Write;
use std::str::FromStr;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

//
// ObjectId
//

// A 12 byte document identifier. The string form is 24 lower case hex characters.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectId([u8; 12]);

impl ObjectId {
  pub const LEN: usize = 12;

  // Generate a new id using the current time in seconds as the 4 byte prefix followed by 8 random
  // bytes.
  #[must_use]
  pub fn new() -> Self {
    let mut bytes = [0; Self::LEN];
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    let seconds = OffsetDateTime::now_utc().unix_timestamp() as u32;
    bytes[.. 4].copy_from_slice(&seconds.to_be_bytes());
    let random: [u8; 8] = rand::random();
    bytes[4 ..].copy_from_slice(&random);
    Self(bytes)
  }

  #[must_use]
  pub const fn from_array(bytes: [u8; 12]) -> Self {
    Self(bytes)
  }

  pub fn from_slice(bytes: &[u8]) -> Result<Self> {
    let bytes: [u8; 12] = bytes
      .try_into()
      .map_err(|_| Error::InvalidObjectId(format!("expected 12 bytes, got {}", bytes.len())))?;
    Ok(Self(bytes))
  }

  #[must_use]
  pub const fn bytes(&self) -> &[u8; 12] {
    &self.0
  }

  #[must_use]
  pub fn to_hex(&self) -> String {
    self.0.iter().fold(String::with_capacity(24), |mut out, b| {
      let _ignored = write!(out, "{b:02x}");
      out
    })
  }
}

impl Default for ObjectId {
  fn default() -> Self {
    Self::new()
  }
}

impl FromStr for ObjectId {
  type Err = Error;

  fn from_str(s: &str) -> Result<Self> {
    if s.len() != Self::LEN * 2 || !s.is_ascii() {
      return Err(Error::InvalidObjectId(s.to_string()));
    }

    let mut bytes = [0; Self::LEN];
    for (i, byte) in bytes.iter_mut().enumerate() {
      *byte = u8::from_str_radix(&s[i * 2 .. i * 2 + 2], 16)
        .map_err(|_| Error::InvalidObjectId(s.to_string()))?;
    }
    Ok(Self(bytes))
  }
}

impl std::fmt::Display for ObjectId {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.write_str(&self.to_hex())
  }
}

impl std::fmt::Debug for ObjectId {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    write!(f, "ObjectId({})", self.to_hex())
  }
}

//
// Value
//

// A dynamically typed message value. Messages and maps are both represented as `Map`; a key that
// is missing from a map is "unset", which is distinct from a key explicitly set to `Null`.
#[derive(Clone, Debug, Default, PartialEq)]
pub enum Value {
  #[default]
  Null,
  Bool(bool),
  Int(i64),
  Float(f64),
  String(String),
  Bytes(Bytes),
  Timestamp(OffsetDateTime),
  ObjectId(ObjectId),
  List(Vec<Value>),
  Map(BTreeMap<String, Value>),
}

impl Value {
  // Create an empty message/map value.
  #[must_use]
  pub const fn empty_map() -> Self {
    Self::Map(BTreeMap::new())
  }

  // Create a map value from key/value pairs.
  pub fn map<K: Into<String>, V: Into<Self>>(entries: impl IntoIterator<Item = (K, V)>) -> Self {
    Self::Map(
      entries
        .into_iter()
        .map(|(k, v)| (k.into(), v.into()))
        .collect(),
    )
  }

  #[must_use]
  pub const fn is_null(&self) -> bool {
    matches!(self, Self::Null)
  }

  // Primitive values are the ones that can be flattened into a single metadata string.
  #[must_use]
  pub const fn is_primitive(&self) -> bool {
    matches!(
      self,
      Self::Bool(_) | Self::Int(_) | Self::Float(_) | Self::String(_)
    )
  }

  #[must_use]
  pub fn as_str(&self) -> Option<&str> {
    match self {
      Self::String(s) => Some(s),
      _ => None,
    }
  }

  #[must_use]
  pub const fn as_i64(&self) -> Option<i64> {
    match self {
      Self::Int(i) => Some(*i),
      _ => None,
    }
  }

  #[must_use]
  #[allow(clippy::cast_precision_loss)]
  pub const fn as_f64(&self) -> Option<f64> {
    match self {
      Self::Float(f) => Some(*f),
      Self::Int(i) => Some(*i as f64),
      _ => None,
    }
  }

  #[must_use]
  pub const fn as_bool(&self) -> Option<bool> {
    match self {
      Self::Bool(b) => Some(*b),
      _ => None,
    }
  }

  #[must_use]
  pub const fn as_map(&self) -> Option<&BTreeMap<String, Self>> {
    match self {
      Self::Map(map) => Some(map),
      _ => None,
    }
  }

  pub const fn as_map_mut(&mut self) -> Option<&mut BTreeMap<String, Self>> {
    match self {
      Self::Map(map) => Some(map),
      _ => None,
    }
  }

  #[must_use]
  pub fn as_list(&self) -> Option<&[Self]> {
    match self {
      Self::List(list) => Some(list),
      _ => None,
    }
  }

  // Look up a key on a map value. Non-map values have no keys.
  #[must_use]
  pub fn get(&self, key: &str) -> Option<&Self> {
    self.as_map().and_then(|map| map.get(key))
  }

  pub fn get_mut(&mut self, key: &str) -> Option<&mut Self> {
    self.as_map_mut().and_then(|map| map.get_mut(key))
  }

  // Set a key on a map value, returning the previous value. Setting a key on a non-map value is a
  // no-op that returns None.
  pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Self>) -> Option<Self> {
    self
      .as_map_mut()
      .and_then(|map| map.insert(key.into(), value.into()))
  }

  pub fn remove(&mut self, key: &str) -> Option<Self> {
    self.as_map_mut().and_then(|map| map.remove(key))
  }

  // The string form of a primitive value as it is written into wire metadata. Floats with no
  // fractional part are written without a trailing `.0`.
  #[must_use]
  pub fn to_wire_string(&self) -> Option<String> {
    match self {
      Self::Bool(b) => Some(b.to_string()),
      Self::Int(i) => Some(i.to_string()),
      Self::Float(f) => Some(format_float(*f)),
      Self::String(s) => Some(s.clone()),
      _ => None,
    }
  }

  // Convert into a JSON value. Timestamps become RFC 3339 strings, object ids become hex strings
  // and bytes become base64.
  #[must_use]
  pub fn to_json(&self) -> serde_json::Value {
    match self {
      Self::Null => serde_json::Value::Null,
      Self::Bool(b) => serde_json::Value::Bool(*b),
      Self::Int(i) => serde_json::Value::from(*i),
      Self::Float(f) => {
        serde_json::Number::from_f64(*f).map_or(serde_json::Value::Null, serde_json::Value::Number)
      },
      Self::String(s) => serde_json::Value::String(s.clone()),
      Self::Bytes(b) => serde_json::Value::String(base64ct::Base64::encode_string(b)),
      Self::Timestamp(t) => t
        .format(&Rfc3339)
        .map_or(serde_json::Value::Null, serde_json::Value::String),
      Self::ObjectId(id) => serde_json::Value::String(id.to_hex()),
      Self::List(list) => serde_json::Value::Array(list.iter().map(Self::to_json).collect()),
      Self::Map(map) => serde_json::Value::Object(
        map
          .iter()
          .map(|(k, v)| (k.clone(), v.to_json()))
          .collect(),
      ),
    }
  }

  // Parse JSON text into a value.
  pub fn from_json_str(json: &str) -> serde_json::Result<Self> {
    serde_json::from_str::<serde_json::Value>(json).map(Self::from)
  }
}

#[allow(clippy::cast_possible_truncation)]
fn format_float(f: f64) -> String {
  if f.is_finite() && f.fract() == 0.0 && f.abs() < 1e15 {
    (f as i64).to_string()
  } else {
    f.to_string()
  }
}

impl From<serde_json::Value> for Value {
  fn from(json: serde_json::Value) -> Self {
    match json {
      serde_json::Value::Null => Self::Null,
      serde_json::Value::Bool(b) => Self::Bool(b),
      serde_json::Value::Number(n) => n
        .as_i64()
        .map_or_else(|| Self::Float(n.as_f64().unwrap_or(f64::NAN)), Self::Int),
      serde_json::Value::String(s) => Self::String(s),
      serde_json::Value::Array(list) => Self::List(list.into_iter().map(Self::from).collect()),
      serde_json::Value::Object(map) => {
        Self::Map(map.into_iter().map(|(k, v)| (k, Self::from(v))).collect())
      },
    }
  }
}

impl From<bool> for Value {
  fn from(b: bool) -> Self {
    Self::Bool(b)
  }
}

impl From<i64> for Value {
  fn from(i: i64) -> Self {
    Self::Int(i)
  }
}

impl From<i32> for Value {
  fn from(i: i32) -> Self {
    Self::Int(i.into())
  }
}

impl From<u32> for Value {
  fn from(i: u32) -> Self {
    Self::Int(i.into())
  }
}

impl From<f64> for Value {
  fn from(f: f64) -> Self {
    Self::Float(f)
  }
}

impl From<&str> for Value {
  fn from(s: &str) -> Self {
    Self::String(s.to_string())
  }
}

impl From<String> for Value {
  fn from(s: String) -> Self {
    Self::String(s)
  }
}

impl From<Bytes> for Value {
  fn from(b: Bytes) -> Self {
    Self::Bytes(b)
  }
}

impl From<OffsetDateTime> for Value {
  fn from(t: OffsetDateTime) -> Self {
    Self::Timestamp(t)
  }
}

impl From<ObjectId> for Value {
  fn from(id: ObjectId) -> Self {
    Self::ObjectId(id)
  }
}

impl From<Vec<Self>> for Value {
  fn from(list: Vec<Self>) -> Self {
    Self::List(list)
  }
}

impl From<BTreeMap<String, Self>> for Value {
  fn from(map: BTreeMap<String, Self>) -> Self {
    Self::Map(map)
  }
}

impl<T: Into<Self>> From<Option<T>> for Value {
  fn from(value: Option<T>) -> Self {
    value.map_or(Self::Null, Into::into)
  }
}
