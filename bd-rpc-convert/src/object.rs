// shared-core - bitdrift's common client/server libraries
// Copyright Bitdrift, Inc. All rights reserved.
//
// Use of this source code is governed by a source available license that can be found in the
// LICENSE file or at:
// https://polyformproject.org/wp-content/uploads/2020/06/PolyForm-Shield-1.0.0.txt

#[cfg(test)]
#[path = "./object_test.rs"]
mod object_test;

use crate::Direction;
use crate::paths::{Container, Conversion, ConversionPaths, FieldEntry, FieldPlan};
use crate::scalar;
use bd_rpc::{Transform, transform};
use bd_rpc_value::{MessageType, Value};
use std::collections::BTreeMap;
use std::sync::Arc;

// Builds the object converter for a message type. Encoding always applies since it also drops
// `__` prefixed keys and nulls; decoding is skipped for types without conversions.
#[must_use]
pub fn converter(message_type: &MessageType, direction: Direction) -> Option<Transform> {
  let converter = ObjectConverter::new(message_type, direction);
  if converter.paths.is_empty() && direction == Direction::Decode {
    return None;
  }

  Some(transform(move |value| converter.convert(value)))
}

//
// ObjectConverter
//

// Walks a value alongside its message type, converting the fields planned in `ConversionPaths`.
#[derive(Clone)]
pub struct ObjectConverter {
  paths: Arc<ConversionPaths>,
  direction: Direction,
}

impl ObjectConverter {
  #[must_use]
  pub fn new(message_type: &MessageType, direction: Direction) -> Self {
    Self {
      paths: Arc::new(ConversionPaths::for_type(message_type)),
      direction,
    }
  }

  pub fn convert(&self, value: Value) -> anyhow::Result<Value> {
    self.message(Some(self.paths.root()), value)
  }

  fn encoding(&self) -> bool {
    self.direction == Direction::Encode
  }

  fn message(&self, type_name: Option<&str>, value: Value) -> anyhow::Result<Value> {
    let value = match value {
      Value::Map(map) => map,
      Value::List(items) if self.encoding() => return self.untyped_list(items),
      other => return Ok(other),
    };

    let mut out = BTreeMap::new();
    for (key, value) in value {
      if self.encoding() && (key.starts_with("__") || value.is_null()) {
        continue;
      }
      let entry = type_name.and_then(|name| self.paths.field(name, &key));
      if let Some(converted) = self.field(entry, value)? {
        out.insert(key, converted);
      }
    }
    Ok(Value::Map(out))
  }

  fn untyped_list(&self, items: Vec<Value>) -> anyhow::Result<Value> {
    items
      .into_iter()
      .filter(|item| !item.is_null())
      .map(|item| self.message(None, item))
      .collect::<anyhow::Result<Vec<_>>>()
      .map(Value::List)
  }

  fn field(&self, entry: Option<&FieldEntry>, value: Value) -> anyhow::Result<Option<Value>> {
    let Some(entry) = entry else {
      return self.message(None, value).map(Some);
    };

    match (entry.container, value) {
      (Container::List, Value::List(items)) => items
        .into_iter()
        .filter(|item| !(self.encoding() && item.is_null()))
        .map(|item| self.element(&entry.plan, item))
        .filter_map(Result::transpose)
        .collect::<anyhow::Result<Vec<_>>>()
        .map(|items| Some(Value::List(items))),
      (Container::Map, Value::Map(entries)) => entries
        .into_iter()
        .filter(|(_, item)| !(self.encoding() && item.is_null()))
        .map(|(key, item)| anyhow::Ok(self.element(&entry.plan, item)?.map(|item| (key, item))))
        .filter_map(Result::transpose)
        .collect::<anyhow::Result<BTreeMap<_, _>>>()
        .map(|entries| Some(Value::Map(entries))),
      (_, value) => self.element(&entry.plan, value),
    }
  }

  fn element(&self, plan: &FieldPlan, value: Value) -> anyhow::Result<Option<Value>> {
    match plan {
      FieldPlan::Convert(conversion) => self.leaf(*conversion, value),
      FieldPlan::Nested(type_name) => self.message(Some(type_name.as_str()), value).map(Some),
    }
  }

  fn leaf(&self, conversion: Conversion, value: Value) -> anyhow::Result<Option<Value>> {
    match (conversion, self.direction) {
      (Conversion::Timestamp, Direction::Encode) => scalar::encode_timestamp(value).map(Some),
      (Conversion::Timestamp, Direction::Decode) => scalar::decode_timestamp(value).map(Some),
      (Conversion::ObjectId, Direction::Encode) => scalar::object_id_to_hex(value).map(Some),
      (Conversion::ObjectId, Direction::Decode) => scalar::object_id_from_hex(value).map(Some),
      (Conversion::Json, Direction::Encode) => scalar::encode_json(&value).map(Some),
      (Conversion::Json, Direction::Decode) => Ok(scalar::decode_json(&value)),
    }
  }
}
