// shared-core - bitdrift's common client/server libraries
// Copyright Bitdrift, Inc. All rights reserved.
//
// Use of this source code is governed by a source available license that can be found in the
// LICENSE file or at:
// https://polyformproject.org/wp-content/uploads/2020/06/PolyForm-Shield-1.0.0.txt

#[cfg(test)]
#[path = "./context_test.rs"]
mod context_test;

use crate::cancellation::Cancellation;
use crate::options::ContextOptions;
use crate::tracing_provider::SpanContext;
use bd_rpc_value::naming::{camel_case, fully_qualified, kebab_case};
use bd_rpc_value::{MessageType, Value};
use http::{HeaderMap, HeaderName, HeaderValue};
use std::borrow::Cow;
use std::collections::BTreeMap;

pub const CONTEXT_FIELD: &str = "context";
pub const REQUEST_ID: &str = "requestId";
pub const APPLICATION_ID: &str = "applicationId";
pub const USER_ID: &str = "userId";

//
// ContextKind
//

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ContextKind {
  // Free-form mapping of primitive values.
  Simple,
  // Known fields plus a nested vendor bag.
  Common,
}

impl ContextKind {
  // Detect whether a request type carries a `context` field of a recognized type.
  #[must_use]
  pub fn detect(request_type: &MessageType, options: &ContextOptions) -> Option<Self> {
    let field = request_type.field(CONTEXT_FIELD)?;
    if field.is_repeated() || field.is_map() {
      return None;
    }

    let type_name = field.message_type_name()?;
    if type_name == fully_qualified(&options.simple_context_type) {
      Some(Self::Simple)
    } else if type_name == fully_qualified(&options.common_context_type) {
      Some(Self::Common)
    } else {
      None
    }
  }
}

//
// CommonContext
//

#[derive(Clone, Debug, Default, PartialEq)]
pub struct CommonContext {
  pub request_id: Option<String>,
  pub application_id: Option<String>,
  pub user_id: Option<String>,
  pub vendor: BTreeMap<String, Value>,
}

//
// ContextData
//

// The wire visible part of a call context. Only primitive values are carried.
#[derive(Clone, Debug, PartialEq)]
pub enum ContextData {
  Simple(BTreeMap<String, Value>),
  Common(CommonContext),
}

impl ContextData {
  #[must_use]
  pub fn empty(kind: ContextKind) -> Self {
    match kind {
      ContextKind::Simple => Self::Simple(BTreeMap::new()),
      ContextKind::Common => Self::Common(CommonContext::default()),
    }
  }

  #[must_use]
  pub const fn kind(&self) -> ContextKind {
    match self {
      Self::Simple(_) => ContextKind::Simple,
      Self::Common(_) => ContextKind::Common,
    }
  }

  // Read a context from its message value. Non-primitive entries are ignored.
  #[must_use]
  pub fn from_value(kind: ContextKind, value: &Value, options: &ContextOptions) -> Self {
    let mut data = Self::empty(kind);
    let Some(map) = value.as_map() else {
      return data;
    };

    for (key, value) in map {
      if kind == ContextKind::Common && *key == options.vendor_field {
        for (vendor_key, vendor_value) in value.as_map().into_iter().flatten() {
          if vendor_value.is_primitive() {
            data.set_if_absent(vendor_key, vendor_value.clone());
          }
        }
      } else if value.is_primitive() {
        data.set_if_absent(key, value.clone());
      }
    }
    data
  }

  // Reconstruct a context from inbound `x-<prefix>-context-*` metadata. Values arrive as strings.
  #[must_use]
  pub fn from_metadata(kind: ContextKind, metadata: &HeaderMap, options: &ContextOptions) -> Self {
    let prefix = options.metadata_key_prefix();
    let mut data = Self::empty(kind);
    for (name, value) in metadata {
      let Some(suffix) = name.as_str().strip_prefix(&prefix) else {
        continue;
      };
      let Ok(value) = value.to_str() else {
        log::debug!("ignoring non-ascii context metadata {name}");
        continue;
      };

      let value = urlencoding::decode(value).map_or_else(|_| value.to_string(), Cow::into_owned);
      data.set_if_absent(&camel_case(suffix), Value::String(value));
    }
    data
  }

  // Set a key unless it already has a value. Returns whether the value was set.
  pub fn set_if_absent(&mut self, key: &str, value: Value) -> bool {
    fn fill(slot: &mut Option<String>, value: &Value) -> bool {
      if slot.is_some() {
        return false;
      }
      *slot = value.to_wire_string();
      slot.is_some()
    }

    match self {
      Self::Simple(map) => {
        if map.contains_key(key) {
          return false;
        }
        map.insert(key.to_string(), value);
        true
      },
      Self::Common(common) => match key {
        REQUEST_ID => fill(&mut common.request_id, &value),
        APPLICATION_ID => fill(&mut common.application_id, &value),
        USER_ID => fill(&mut common.user_id, &value),
        _ => {
          if common.vendor.contains_key(key) {
            return false;
          }
          common.vendor.insert(key.to_string(), value);
          true
        },
      },
    }
  }

  // All keys as a flat list. Vendor keys are relative to the vendor bag.
  #[must_use]
  pub fn entries(&self) -> Vec<(String, Value)> {
    match self {
      Self::Simple(map) => map.iter().map(|(k, v)| (k.clone(), v.clone())).collect(),
      Self::Common(common) => [
        (REQUEST_ID, &common.request_id),
        (APPLICATION_ID, &common.application_id),
        (USER_ID, &common.user_id),
      ]
      .into_iter()
      .filter_map(|(key, value)| {
        value
          .as_ref()
          .map(|value| (key.to_string(), Value::String(value.clone())))
      })
      .chain(common.vendor.iter().map(|(k, v)| (k.clone(), v.clone())))
      .collect(),
    }
  }

  #[must_use]
  pub fn get(&self, key: &str) -> Option<Value> {
    match self {
      Self::Simple(map) => map.get(key).cloned(),
      Self::Common(common) => match key {
        REQUEST_ID => common.request_id.clone().map(Value::String),
        APPLICATION_ID => common.application_id.clone().map(Value::String),
        USER_ID => common.user_id.clone().map(Value::String),
        _ => common.vendor.get(key).cloned(),
      },
    }
  }

  #[must_use]
  pub fn request_id(&self) -> Option<String> {
    self.get(REQUEST_ID).and_then(|v| v.to_wire_string())
  }

  #[must_use]
  pub fn application_id(&self) -> Option<String> {
    self.get(APPLICATION_ID).and_then(|v| v.to_wire_string())
  }

  // Fill every key of `other` that this context does not have.
  pub fn merge_missing(&mut self, other: &Self) {
    for (key, value) in other.entries() {
      self.set_if_absent(&key, value);
    }
  }

  // Assign a generated request id and the default application id where absent.
  pub fn apply_defaults(&mut self, options: &ContextOptions) {
    if self.set_if_absent(REQUEST_ID, uuid::Uuid::new_v4().to_string().into()) {
      log::trace!("assigned request id {:?}", self.request_id());
    }
    self.set_if_absent(
      APPLICATION_ID,
      options.default_application_id.as_str().into(),
    );
  }

  #[must_use]
  pub fn to_value(&self, options: &ContextOptions) -> Value {
    match self {
      Self::Simple(map) => Value::Map(map.clone()),
      Self::Common(common) => {
        let mut value = Value::empty_map();
        for (key, field) in [
          (REQUEST_ID, &common.request_id),
          (APPLICATION_ID, &common.application_id),
          (USER_ID, &common.user_id),
        ] {
          if let Some(field) = field {
            value.insert(key, field.as_str());
          }
        }
        if !common.vendor.is_empty() {
          value.insert(options.vendor_field.as_str(), common.vendor.clone());
        }
        value
      },
    }
  }

  // Flatten every primitive key into `x-<prefix>-context-<kebab-case key>` metadata.
  pub fn write_metadata(&self, options: &ContextOptions, metadata: &mut HeaderMap) {
    let prefix = options.metadata_key_prefix();
    for (key, value) in self.entries() {
      let Some(value) = value.to_wire_string() else {
        continue;
      };

      let name = HeaderName::from_bytes(format!("{prefix}{}", kebab_case(&key)).as_bytes());
      let value = HeaderValue::from_str(&urlencoding::encode(&value));
      match (name, value) {
        (Ok(name), Ok(value)) => {
          metadata.insert(name, value);
        },
        _ => log::debug!("context key {key} cannot be written as metadata"),
      }
    }
  }

  // Read the context carried in a request payload.
  #[must_use]
  pub fn from_payload(kind: ContextKind, payload: &Value, options: &ContextOptions) -> Self {
    payload.get(CONTEXT_FIELD).map_or_else(
      || Self::empty(kind),
      |value| Self::from_value(kind, value, options),
    )
  }

  // Write keys into the payload's context field without replacing anything already there.
  pub fn attach_to_payload(&self, payload: &mut Value, options: &ContextOptions) {
    if payload.as_map().is_none() {
      return;
    }
    if !payload.get(CONTEXT_FIELD).is_some_and(|c| c.as_map().is_some()) {
      payload.insert(CONTEXT_FIELD, Value::empty_map());
    }
    let Some(context) = payload.get_mut(CONTEXT_FIELD) else {
      return;
    };

    match self {
      Self::Simple(map) => {
        for (key, value) in map {
          if context.get(key).is_none_or(Value::is_null) {
            context.insert(key.as_str(), value.clone());
          }
        }
      },
      Self::Common(common) => {
        for (key, value) in self.entries() {
          if common.vendor.contains_key(&key) {
            continue;
          }
          if context.get(&key).is_none_or(Value::is_null) {
            context.insert(key, value);
          }
        }

        if common.vendor.is_empty() {
          return;
        }
        if !context
          .get(&options.vendor_field)
          .is_some_and(|v| v.as_map().is_some())
        {
          context.insert(options.vendor_field.as_str(), Value::empty_map());
        }
        if let Some(vendor) = context.get_mut(&options.vendor_field) {
          for (key, value) in &common.vendor {
            if vendor.get(key).is_none_or(Value::is_null) {
              vendor.insert(key.as_str(), value.clone());
            }
          }
        }
      },
    }
  }
}

//
// CallContext
//

// Per-call context. The data part travels over the wire; the cancellation state and span are
// runtime only.
#[derive(Clone, Debug)]
pub struct CallContext {
  data: ContextData,
  cancellation: Cancellation,
  span: Option<SpanContext>,
}

impl CallContext {
  #[must_use]
  pub const fn new(
    data: ContextData,
    cancellation: Cancellation,
    span: Option<SpanContext>,
  ) -> Self {
    Self {
      data,
      cancellation,
      span,
    }
  }

  #[must_use]
  pub const fn data(&self) -> &ContextData {
    &self.data
  }

  pub(crate) fn set_data(&mut self, data: ContextData) {
    self.data = data;
  }

  #[must_use]
  pub fn request_id(&self) -> Option<String> {
    self.data.request_id()
  }

  #[must_use]
  pub fn application_id(&self) -> Option<String> {
    self.data.application_id()
  }

  // Live cancellation state of the call.
  #[must_use]
  pub fn is_cancelled(&self) -> bool {
    self.cancellation.is_cancelled()
  }

  pub async fn cancelled(&self) {
    self.cancellation.cancelled().await;
  }

  #[must_use]
  pub const fn cancellation(&self) -> &Cancellation {
    &self.cancellation
  }

  #[must_use]
  pub const fn span(&self) -> Option<&SpanContext> {
    self.span.as_ref()
  }
}
