// shared-core - bitdrift's common client/server libraries
// Copyright Bitdrift, Inc. All rights reserved.
//
// Use of this source code is governed by a source available license that can be found in the
// LICENSE file or at:
// https://polyformproject.org/wp-content/uploads/2020/06/PolyForm-Shield-1.0.0.txt

#[cfg(test)]
#[path = "./wrappers_test.rs"]
mod wrappers_test;

use crate::{Direction, JSON_OBJECT_TYPE, OBJECT_ID_TYPE, scalar};
use bd_rpc::{Transform, transform};
use bd_rpc_value::descriptor::TIMESTAMP_TYPE;
use bd_rpc_value::{EnumDescriptor, FieldDescriptor, FieldType, MessageType, ScalarType, Value};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

const GOOGLE_WRAPPER_PREFIX: &str = ".google.protobuf.";
const NULLABLE_MARKERS: [&str; 2] = [".wrappers.values.", ".wrappers.arrays."];
const IS_NULL_FIELD: &str = "isNull";
const VALUE_FIELD: &str = "value";

//
// WrapperKind
//

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WrapperKind {
  // `.google.protobuf.<X>Value`: null is an absent wrapper, anything else is `{value}`.
  Scalar(ScalarType),
  Timestamp,
  ObjectId,
  Json,
  // `{isNull: true}` for null, `{value}` otherwise.
  Nullable,
}

impl WrapperKind {
  #[must_use]
  pub fn detect(message_type: &MessageType) -> Option<Self> {
    let name = message_type.full_name();
    match name {
      TIMESTAMP_TYPE => return Some(Self::Timestamp),
      OBJECT_ID_TYPE => return Some(Self::ObjectId),
      JSON_OBJECT_TYPE => return Some(Self::Json),
      _ => {},
    }
    if NULLABLE_MARKERS.iter().any(|marker| name.contains(marker)) {
      return Some(Self::Nullable);
    }

    let wrapped = name
      .strip_prefix(GOOGLE_WRAPPER_PREFIX)
      .and_then(|rest| rest.strip_suffix("Value"))?;
    if wrapped.is_empty() {
      return None;
    }
    match message_type.field(VALUE_FIELD).map(FieldDescriptor::field_type) {
      Some(FieldType::Scalar(scalar)) => Some(Self::Scalar(*scalar)),
      _ => None,
    }
  }
}

// Builds the wrapper converter for a message type. Types that cannot reach a wrapper type get no
// converter.
#[must_use]
pub fn converter(message_type: &MessageType, direction: Direction) -> Option<Transform> {
  let converter = WrapperConverter::new(message_type, direction);
  if !converter.involved.contains(message_type.full_name()) {
    return None;
  }

  Some(transform(move |value| converter.convert(value)))
}

//
// WrapperConverter
//

#[derive(Clone)]
pub struct WrapperConverter {
  root: MessageType,
  direction: Direction,
  // Names of the reachable types that are wrappers or contain one somewhere below them.
  involved: Arc<HashSet<String>>,
}

impl WrapperConverter {
  #[must_use]
  pub fn new(message_type: &MessageType, direction: Direction) -> Self {
    Self {
      root: message_type.clone(),
      direction,
      involved: Arc::new(involved_types(message_type)),
    }
  }

  pub fn convert(&self, value: Value) -> anyhow::Result<Value> {
    Ok(self.typed(&self.root, value)?.unwrap_or_default())
  }

  fn typed(&self, message_type: &MessageType, value: Value) -> anyhow::Result<Option<Value>> {
    let Some(kind) = WrapperKind::detect(message_type) else {
      return self.message(message_type, value).map(Some);
    };
    match self.direction {
      Direction::Encode => self.wrap(kind, message_type, value),
      Direction::Decode => self.unwrap(kind, message_type, value),
    }
  }

  fn message(&self, message_type: &MessageType, value: Value) -> anyhow::Result<Value> {
    let entries = match value {
      Value::Map(entries) => entries,
      other => return Ok(other),
    };

    let mut out = BTreeMap::new();
    for (key, value) in entries {
      if let Some(field) = message_type.field(&key)
        && let Some(nested) = field.message_type_name()
        && self.involved.contains(nested)
        && let Some(nested) = message_type.field_message_type(field)
      {
        if let Some(converted) = self.field(&nested, field, value)? {
          out.insert(key, converted);
        }
      } else {
        out.insert(key, value);
      }
    }
    Ok(Value::Map(out))
  }

  fn field(
    &self,
    nested: &MessageType,
    field: &FieldDescriptor,
    value: Value,
  ) -> anyhow::Result<Option<Value>> {
    match value {
      Value::Map(entries) if field.is_map() => entries
        .into_iter()
        .map(|(key, item)| anyhow::Ok(self.typed(nested, item)?.map(|item| (key, item))))
        .filter_map(Result::transpose)
        .collect::<anyhow::Result<BTreeMap<_, _>>>()
        .map(|entries| Some(Value::Map(entries))),
      Value::List(items) if field.is_repeated() => items
        .into_iter()
        .map(|item| self.typed(nested, item))
        .filter_map(Result::transpose)
        .collect::<anyhow::Result<Vec<_>>>()
        .map(|items| Some(Value::List(items))),
      value => self.typed(nested, value),
    }
  }

  fn wrap(
    &self,
    kind: WrapperKind,
    message_type: &MessageType,
    value: Value,
  ) -> anyhow::Result<Option<Value>> {
    if value.is_null() {
      return Ok((kind == WrapperKind::Nullable).then(|| Value::map([(IS_NULL_FIELD, true)])));
    }

    match kind {
      WrapperKind::Scalar(_) => Ok(Some(Value::map([(VALUE_FIELD, value)]))),
      WrapperKind::Timestamp => scalar::encode_timestamp(value).map(Some),
      WrapperKind::ObjectId => scalar::object_id_to_message(value).map(Some),
      WrapperKind::Json => scalar::encode_json(&value).map(Some),
      WrapperKind::Nullable => {
        let inner = self.inner(message_type, value)?;
        Ok(Some(Value::Map(
          inner.map(|inner| (VALUE_FIELD.to_string(), inner)).into_iter().collect(),
        )))
      },
    }
  }

  fn unwrap(
    &self,
    kind: WrapperKind,
    message_type: &MessageType,
    value: Value,
  ) -> anyhow::Result<Option<Value>> {
    match kind {
      WrapperKind::Scalar(scalar) => Ok(Some(match value {
        Value::Map(mut entries) => entries
          .remove(VALUE_FIELD)
          .unwrap_or_else(|| scalar::default_value(scalar)),
        other => other,
      })),
      WrapperKind::Timestamp => scalar::decode_timestamp(value).map(Some),
      WrapperKind::ObjectId if value.is_null() => Ok(Some(Value::Null)),
      WrapperKind::ObjectId => scalar::object_id_from_message(&value),
      WrapperKind::Json if value.is_null() => Ok(Some(Value::Null)),
      WrapperKind::Json => Ok(scalar::decode_json(&value)),
      WrapperKind::Nullable => {
        let Value::Map(mut entries) = value else {
          return Ok(None);
        };
        if entries.get(IS_NULL_FIELD).and_then(Value::as_bool) == Some(true) {
          return Ok(Some(Value::Null));
        }
        match entries.remove(VALUE_FIELD) {
          Some(inner) => self.inner(message_type, inner),
          None => Ok(self.missing_inner(message_type)),
        }
      },
    }
  }

  // Convert the `value` field of a nullable wrapper, which may be repeated, a map, an enum or a
  // message.
  fn inner(&self, nullable: &MessageType, value: Value) -> anyhow::Result<Option<Value>> {
    let Some(field) = nullable.field(VALUE_FIELD) else {
      return Ok(Some(value));
    };
    let element = InnerElement::resolve(nullable, field);
    let convert = |item: Value| match &element {
      InnerElement::Enum(descriptor) => Ok(Some(self.enumeration(descriptor, item))),
      InnerElement::Message(message_type) => self.typed(message_type, item),
      InnerElement::Scalar => Ok(Some(item)),
    };

    match value {
      Value::Map(entries) if field.is_map() => entries
        .into_iter()
        .map(|(key, item)| anyhow::Ok(convert(item)?.map(|item| (key, item))))
        .filter_map(Result::transpose)
        .collect::<anyhow::Result<BTreeMap<_, _>>>()
        .map(|entries| Some(Value::Map(entries))),
      Value::List(items) if field.is_repeated() => items
        .into_iter()
        .map(convert)
        .filter_map(Result::transpose)
        .collect::<anyhow::Result<Vec<_>>>()
        .map(|items| Some(Value::List(items))),
      value => convert(value),
    }
  }

  // What an unset `value` field decodes to.
  fn missing_inner(&self, nullable: &MessageType) -> Option<Value> {
    let field = nullable.field(VALUE_FIELD)?;
    if field.is_map() {
      return Some(Value::empty_map());
    }
    if field.is_repeated() {
      return Some(Value::List(Vec::new()));
    }
    match InnerElement::resolve(nullable, field) {
      InnerElement::Enum(descriptor) => Some(self.enumeration(&descriptor, Value::Int(0))),
      InnerElement::Message(_) => None,
      InnerElement::Scalar => match field.field_type() {
        FieldType::Scalar(scalar) => Some(scalar::default_value(*scalar)),
        _ => None,
      },
    }
  }

  // Enum values are names in the domain and numbers on the wire. Unknown values pass through.
  fn enumeration(&self, descriptor: &EnumDescriptor, value: Value) -> Value {
    match (self.direction, value) {
      (Direction::Encode, Value::String(name)) => descriptor
        .number(&name)
        .map_or(Value::String(name), Value::from),
      (Direction::Decode, Value::Int(number)) => i32::try_from(number)
        .ok()
        .and_then(|number| descriptor.name(number))
        .map_or(Value::Int(number), Value::from),
      (_, value) => value,
    }
  }
}

//
// InnerElement
//

enum InnerElement {
  Enum(Arc<EnumDescriptor>),
  Message(MessageType),
  Scalar,
}

impl InnerElement {
  fn resolve(nullable: &MessageType, field: &FieldDescriptor) -> Self {
    if let Some(descriptor) = nullable.field_enum_type(field) {
      Self::Enum(descriptor)
    } else if let Some(message_type) = nullable.field_message_type(field) {
      Self::Message(message_type)
    } else {
      Self::Scalar
    }
  }
}

// Every type reachable from `root` that is a wrapper or reaches one.
fn involved_types(root: &MessageType) -> HashSet<String> {
  let mut graph = HashMap::new();
  collect(root, &mut graph);

  let mut involved: HashSet<String> = graph
    .iter()
    .filter(|(_, (wrapper, _))| *wrapper)
    .map(|(name, _)| name.clone())
    .collect();
  loop {
    let reaching: Vec<String> = graph
      .iter()
      .filter(|(name, (_, nested))| {
        !involved.contains(*name) && nested.iter().any(|nested| involved.contains(nested))
      })
      .map(|(name, _)| name.clone())
      .collect();
    if reaching.is_empty() {
      break;
    }
    involved.extend(reaching);
  }

  log::trace!(
    "{} reaches {} wrapper related types",
    root.full_name(),
    involved.len()
  );
  involved
}

fn collect(message_type: &MessageType, graph: &mut HashMap<String, (bool, Vec<String>)>) {
  let name = message_type.full_name().to_string();
  if graph.contains_key(&name) {
    return;
  }
  graph.insert(name.clone(), (false, Vec::new()));

  let mut nested = Vec::new();
  for field in message_type.fields() {
    if let Some(nested_type) = message_type.field_message_type(field) {
      collect(&nested_type, graph);
      nested.push(nested_type.full_name().to_string());
    }
  }
  graph.insert(
    name,
    (WrapperKind::detect(message_type).is_some(), nested),
  );
}
