// shared-core - bitdrift's common client/server libraries
// Copyright Bitdrift, Inc. All rights reserved.
//
// Use of this source code is governed by a source available license that can be found in the
// LICENSE file or at:
// https://polyformproject.org/wp-content/uploads/2020/06/PolyForm-Shield-1.0.0.txt

#[cfg(test)]
#[path = "./descriptor_test.rs"]
mod descriptor_test;

use crate::naming::{fully_qualified, lower_first};
use crate::{Error, Result};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

pub const TIMESTAMP_TYPE: &str = ".google.protobuf.Timestamp";

// The scalar value types, named after the google.protobuf wrapper message for each.
const WRAPPER_TYPES: &[(&str, ScalarType)] = &[
  ("Double", ScalarType::Double),
  ("Float", ScalarType::Float),
  ("Int64", ScalarType::Int64),
  ("UInt64", ScalarType::UInt64),
  ("Int32", ScalarType::Int32),
  ("UInt32", ScalarType::UInt32),
  ("Bool", ScalarType::Bool),
  ("String", ScalarType::String),
  ("Bytes", ScalarType::Bytes),
];

//
// ScalarType
//

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ScalarType {
  Double,
  Float,
  Int32,
  Int64,
  UInt32,
  UInt64,
  Bool,
  String,
  Bytes,
}

//
// FieldType
//

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum FieldType {
  Scalar(ScalarType),
  // Fully qualified message type name.
  Message(String),
  // Fully qualified enum type name.
  Enum(String),
}

//
// FieldDescriptor
//

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FieldDescriptor {
  name: String,
  field_type: FieldType,
  repeated: bool,
  map_key: Option<ScalarType>,
  options: BTreeMap<String, String>,
}

impl FieldDescriptor {
  #[must_use]
  pub fn scalar(name: &str, scalar: ScalarType) -> Self {
    Self::new(name, FieldType::Scalar(scalar))
  }

  #[must_use]
  pub fn message(name: &str, type_name: &str) -> Self {
    Self::new(name, FieldType::Message(fully_qualified(type_name)))
  }

  #[must_use]
  pub fn enumeration(name: &str, type_name: &str) -> Self {
    Self::new(name, FieldType::Enum(fully_qualified(type_name)))
  }

  // A map<key, value> field. The value type is described by `value_type`.
  #[must_use]
  pub fn map(name: &str, key: ScalarType, value_type: FieldType) -> Self {
    let mut field = Self::new(name, value_type);
    field.map_key = Some(key);
    field
  }

  fn new(name: &str, field_type: FieldType) -> Self {
    Self {
      name: name.to_string(),
      field_type,
      repeated: false,
      map_key: None,
      options: BTreeMap::new(),
    }
  }

  #[must_use]
  pub fn repeated(mut self) -> Self {
    self.repeated = true;
    self
  }

  // Attach a custom field option, e.g. `(objectId)`.
  #[must_use]
  pub fn with_option(mut self, option: &str, value: &str) -> Self {
    self.options.insert(option.to_string(), value.to_string());
    self
  }

  #[must_use]
  pub fn name(&self) -> &str {
    &self.name
  }

  #[must_use]
  pub const fn field_type(&self) -> &FieldType {
    &self.field_type
  }

  #[must_use]
  pub const fn is_repeated(&self) -> bool {
    self.repeated
  }

  #[must_use]
  pub const fn is_map(&self) -> bool {
    self.map_key.is_some()
  }

  #[must_use]
  pub fn has_option(&self, option: &str) -> bool {
    self.options.contains_key(option)
  }

  #[must_use]
  pub fn message_type_name(&self) -> Option<&str> {
    match &self.field_type {
      FieldType::Message(name) => Some(name),
      _ => None,
    }
  }
}

//
// MessageDescriptor
//

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MessageDescriptor {
  full_name: String,
  fields: Vec<FieldDescriptor>,
}

impl MessageDescriptor {
  #[must_use]
  pub fn new(full_name: &str, fields: Vec<FieldDescriptor>) -> Self {
    Self {
      full_name: fully_qualified(full_name),
      fields,
    }
  }

  #[must_use]
  pub fn full_name(&self) -> &str {
    &self.full_name
  }

  #[must_use]
  pub fn fields(&self) -> &[FieldDescriptor] {
    &self.fields
  }

  #[must_use]
  pub fn field(&self, name: &str) -> Option<&FieldDescriptor> {
    self.fields.iter().find(|f| f.name == name)
  }
}

//
// EnumDescriptor
//

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EnumDescriptor {
  full_name: String,
  values: Vec<(String, i32)>,
}

impl EnumDescriptor {
  #[must_use]
  pub fn new(full_name: &str, values: &[(&str, i32)]) -> Self {
    Self {
      full_name: fully_qualified(full_name),
      values: values
        .iter()
        .map(|(name, number)| ((*name).to_string(), *number))
        .collect(),
    }
  }

  #[must_use]
  pub fn full_name(&self) -> &str {
    &self.full_name
  }

  #[must_use]
  pub fn number(&self, name: &str) -> Option<i32> {
    self
      .values
      .iter()
      .find(|(n, _)| n == name)
      .map(|(_, number)| *number)
  }

  #[must_use]
  pub fn name(&self, number: i32) -> Option<&str> {
    self
      .values
      .iter()
      .find(|(_, n)| *n == number)
      .map(|(name, _)| name.as_str())
  }
}

//
// DescriptorPool
//

// An immutable set of resolved message and enum types. Every type reference made by a field is
// verified to exist when the pool is built.
#[derive(Debug, Default)]
pub struct DescriptorPool {
  messages: HashMap<String, Arc<MessageDescriptor>>,
  enums: HashMap<String, Arc<EnumDescriptor>>,
}

impl DescriptorPool {
  #[must_use]
  pub fn builder() -> DescriptorPoolBuilder {
    DescriptorPoolBuilder::default()
  }

  // Look up a message type by name, with or without the leading dot.
  pub fn message(self: &Arc<Self>, type_name: &str) -> Result<MessageType> {
    let full_name = fully_qualified(type_name);
    self
      .messages
      .get(&full_name)
      .map(|descriptor| MessageType {
        pool: self.clone(),
        descriptor: descriptor.clone(),
      })
      .ok_or(Error::UnknownType(full_name))
  }

  #[must_use]
  pub fn enumeration(&self, type_name: &str) -> Option<Arc<EnumDescriptor>> {
    self.enums.get(&fully_qualified(type_name)).cloned()
  }
}

//
// DescriptorPoolBuilder
//

#[derive(Default)]
pub struct DescriptorPoolBuilder {
  messages: Vec<MessageDescriptor>,
  enums: Vec<EnumDescriptor>,
}

impl DescriptorPoolBuilder {
  #[must_use]
  pub fn message(mut self, descriptor: MessageDescriptor) -> Self {
    self.messages.push(descriptor);
    self
  }

  #[must_use]
  pub fn enumeration(mut self, descriptor: EnumDescriptor) -> Self {
    self.enums.push(descriptor);
    self
  }

  // Add google.protobuf.Timestamp and the google.protobuf.*Value wrapper types.
  #[must_use]
  pub fn with_well_known_types(mut self) -> Self {
    self.messages.push(MessageDescriptor::new(
      TIMESTAMP_TYPE,
      vec![
        FieldDescriptor::scalar("seconds", ScalarType::Int64),
        FieldDescriptor::scalar("nanos", ScalarType::Int32),
      ],
    ));
    for (name, scalar) in WRAPPER_TYPES {
      self.messages.push(MessageDescriptor::new(
        &format!(".google.protobuf.{name}Value"),
        vec![FieldDescriptor::scalar("value", *scalar)],
      ));
    }
    self
  }

  pub fn build(self) -> Result<Arc<DescriptorPool>> {
    let mut pool = DescriptorPool::default();
    for descriptor in self.enums {
      let name = descriptor.full_name.clone();
      if pool.enums.insert(name.clone(), Arc::new(descriptor)).is_some() {
        return Err(Error::DuplicateType(name));
      }
    }
    for descriptor in self.messages {
      let name = descriptor.full_name.clone();
      if pool.enums.contains_key(&name)
        || pool
          .messages
          .insert(name.clone(), Arc::new(descriptor))
          .is_some()
      {
        return Err(Error::DuplicateType(name));
      }
    }

    for message in pool.messages.values() {
      for field in &message.fields {
        let resolved = match &field.field_type {
          FieldType::Scalar(_) => true,
          FieldType::Message(name) => pool.messages.contains_key(name),
          FieldType::Enum(name) => pool.enums.contains_key(name),
        };
        if !resolved {
          return Err(Error::UnresolvedField {
            message: message.full_name.clone(),
            field: field.name.clone(),
            type_name: match &field.field_type {
              FieldType::Message(name) | FieldType::Enum(name) => name.clone(),
              FieldType::Scalar(_) => String::new(),
            },
          });
        }
      }
    }

    log::debug!(
      "built descriptor pool with {} messages and {} enums",
      pool.messages.len(),
      pool.enums.len()
    );
    Ok(Arc::new(pool))
  }
}

//
// MessageType
//

// A resolved message type: the descriptor plus the pool it was resolved in, so nested field types
// can be walked.
#[derive(Clone)]
pub struct MessageType {
  pool: Arc<DescriptorPool>,
  descriptor: Arc<MessageDescriptor>,
}

impl MessageType {
  #[must_use]
  pub fn full_name(&self) -> &str {
    &self.descriptor.full_name
  }

  #[must_use]
  pub fn fields(&self) -> &[FieldDescriptor] {
    &self.descriptor.fields
  }

  #[must_use]
  pub fn field(&self, name: &str) -> Option<&FieldDescriptor> {
    self.descriptor.field(name)
  }

  // Resolve the message type of a message typed field. Returns None for scalar and enum fields.
  #[must_use]
  pub fn field_message_type(&self, field: &FieldDescriptor) -> Option<Self> {
    field
      .message_type_name()
      .and_then(|name| self.pool.message(name).ok())
  }

  // Resolve the enum type of an enum typed field.
  #[must_use]
  pub fn field_enum_type(&self, field: &FieldDescriptor) -> Option<Arc<EnumDescriptor>> {
    match &field.field_type {
      FieldType::Enum(name) => self.pool.enumeration(name),
      _ => None,
    }
  }

  #[must_use]
  pub const fn pool(&self) -> &Arc<DescriptorPool> {
    &self.pool
  }
}

impl std::fmt::Debug for MessageType {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    write!(f, "MessageType({})", self.full_name())
  }
}

impl PartialEq for MessageType {
  fn eq(&self, other: &Self) -> bool {
    Arc::ptr_eq(&self.pool, &other.pool) && self.descriptor == other.descriptor
  }
}

//
// CallShape
//

// The four calling conventions, selected by the request/response stream cardinality of a method.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CallShape {
  Unary,
  ServerStreaming,
  ClientStreaming,
  Streaming,
}

impl CallShape {
  #[must_use]
  pub const fn from_cardinality(request_stream: bool, response_stream: bool) -> Self {
    match (request_stream, response_stream) {
      (false, false) => Self::Unary,
      (false, true) => Self::ServerStreaming,
      (true, false) => Self::ClientStreaming,
      (true, true) => Self::Streaming,
    }
  }

  #[must_use]
  pub const fn is_streaming(&self) -> bool {
    !matches!(self, Self::Unary)
  }
}

impl std::fmt::Display for CallShape {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.write_str(match self {
      Self::Unary => "unary",
      Self::ServerStreaming => "server streaming",
      Self::ClientStreaming => "client streaming",
      Self::Streaming => "bidi streaming",
    })
  }
}

//
// MethodDefinition
//

// An unresolved method as written in a service definition.
#[derive(Clone, Debug)]
pub struct MethodDefinition {
  name: String,
  request_type: String,
  response_type: String,
  request_stream: bool,
  response_stream: bool,
}

impl MethodDefinition {
  #[must_use]
  pub fn new(
    name: &str,
    request_type: &str,
    response_type: &str,
    request_stream: bool,
    response_stream: bool,
  ) -> Self {
    Self {
      name: name.to_string(),
      request_type: request_type.to_string(),
      response_type: response_type.to_string(),
      request_stream,
      response_stream,
    }
  }
}

//
// MethodDescriptor
//

#[derive(Debug)]
pub struct MethodDescriptor {
  service: String,
  name: String,
  request_type: MessageType,
  response_type: MessageType,
  request_stream: bool,
  response_stream: bool,
}

impl MethodDescriptor {
  // The proto method name, e.g. `SayHello`.
  #[must_use]
  pub fn name(&self) -> &str {
    &self.name
  }

  // The generated method name, e.g. `sayHello`.
  #[must_use]
  pub fn generated_name(&self) -> String {
    lower_first(&self.name)
  }

  // The fully qualified service name, e.g. `test.TestService`.
  #[must_use]
  pub fn service_name(&self) -> &str {
    &self.service
  }

  // e.g. `test.TestService.SayHello`
  #[must_use]
  pub fn full_name(&self) -> String {
    format!("{}.{}", self.service, self.name)
  }

  // The wire path, e.g. `/test.TestService/SayHello`.
  #[must_use]
  pub fn full_path(&self) -> String {
    format!("/{}/{}", self.service, self.name)
  }

  #[must_use]
  pub const fn request_type(&self) -> &MessageType {
    &self.request_type
  }

  #[must_use]
  pub const fn response_type(&self) -> &MessageType {
    &self.response_type
  }

  #[must_use]
  pub const fn request_stream(&self) -> bool {
    self.request_stream
  }

  #[must_use]
  pub const fn response_stream(&self) -> bool {
    self.response_stream
  }

  #[must_use]
  pub const fn shape(&self) -> CallShape {
    CallShape::from_cardinality(self.request_stream, self.response_stream)
  }
}

//
// ServiceDescriptor
//

#[derive(Debug)]
pub struct ServiceDescriptor {
  full_name: String,
  methods: Vec<Arc<MethodDescriptor>>,
}

impl ServiceDescriptor {
  #[must_use]
  pub fn builder(package: &str, name: &str) -> ServiceBuilder {
    ServiceBuilder {
      full_name: if package.is_empty() {
        name.to_string()
      } else {
        format!("{package}.{name}")
      },
      methods: Vec::new(),
    }
  }

  // Resolve every method's request and response type against the pool. This happens exactly once,
  // before any wrapping begins.
  pub fn resolve(
    pool: &Arc<DescriptorPool>,
    full_name: &str,
    methods: Vec<MethodDefinition>,
  ) -> Result<Arc<Self>> {
    let full_name = full_name.trim_start_matches('.').to_string();
    let mut resolved: Vec<Arc<MethodDescriptor>> = Vec::with_capacity(methods.len());
    for method in methods {
      if resolved.iter().any(|m| m.name == method.name) {
        return Err(Error::DuplicateMethod {
          service: full_name,
          method: method.name,
        });
      }

      resolved.push(Arc::new(MethodDescriptor {
        service: full_name.clone(),
        request_type: pool.message(&method.request_type)?,
        response_type: pool.message(&method.response_type)?,
        name: method.name,
        request_stream: method.request_stream,
        response_stream: method.response_stream,
      }));
    }

    Ok(Arc::new(Self {
      full_name,
      methods: resolved,
    }))
  }

  #[must_use]
  pub fn full_name(&self) -> &str {
    &self.full_name
  }

  #[must_use]
  pub fn methods(&self) -> &[Arc<MethodDescriptor>] {
    &self.methods
  }

  // Find a method by either its proto name (`SayHello`) or its generated name (`sayHello`).
  #[must_use]
  pub fn method(&self, name: &str) -> Option<&Arc<MethodDescriptor>> {
    self
      .methods
      .iter()
      .find(|m| m.name == name)
      .or_else(|| self.methods.iter().find(|m| m.generated_name() == name))
  }
}

//
// ServiceBuilder
//

pub struct ServiceBuilder {
  full_name: String,
  methods: Vec<MethodDefinition>,
}

impl ServiceBuilder {
  #[must_use]
  pub fn method(mut self, method: MethodDefinition) -> Self {
    self.methods.push(method);
    self
  }

  #[must_use]
  pub fn unary(self, name: &str, request_type: &str, response_type: &str) -> Self {
    self.method(MethodDefinition::new(
      name,
      request_type,
      response_type,
      false,
      false,
    ))
  }

  #[must_use]
  pub fn server_streaming(self, name: &str, request_type: &str, response_type: &str) -> Self {
    self.method(MethodDefinition::new(
      name,
      request_type,
      response_type,
      false,
      true,
    ))
  }

  #[must_use]
  pub fn client_streaming(self, name: &str, request_type: &str, response_type: &str) -> Self {
    self.method(MethodDefinition::new(
      name,
      request_type,
      response_type,
      true,
      false,
    ))
  }

  #[must_use]
  pub fn streaming(self, name: &str, request_type: &str, response_type: &str) -> Self {
    self.method(MethodDefinition::new(
      name,
      request_type,
      response_type,
      true,
      true,
    ))
  }

  pub fn resolve(self, pool: &Arc<DescriptorPool>) -> Result<Arc<ServiceDescriptor>> {
    ServiceDescriptor::resolve(pool, &self.full_name, self.methods)
  }
}
