// shared-core - bitdrift's common client/server libraries
// Copyright Bitdrift, Inc. All rights reserved.
//
// Use of this source code is governed by a source available license that can be found in the
// LICENSE file or at:
// https://polyformproject.org/wp-content/uploads/2020/06/PolyForm-Shield-1.0.0.txt

//! Dynamic message values and the reflection model that RPC method wrapping is driven by. Message
//! payloads travel through the wrapping layer as [`Value`] object graphs, and every method is
//! described by a [`MethodDescriptor`] whose request/response types are resolved against a
//! [`DescriptorPool`] before any wrapping happens.

pub mod descriptor;
pub mod naming;
pub mod value;

pub use descriptor::{
  CallShape,
  DescriptorPool,
  DescriptorPoolBuilder,
  EnumDescriptor,
  FieldDescriptor,
  FieldType,
  MessageDescriptor,
  MessageType,
  MethodDefinition,
  MethodDescriptor,
  ScalarType,
  ServiceBuilder,
  ServiceDescriptor,
};
pub use value::{ObjectId, Value};

//
// Error
//

#[derive(Clone, Debug, thiserror::Error)]
pub enum Error {
  #[error("invalid object id: {0}")]
  InvalidObjectId(String),
  #[error("unknown type: {0}")]
  UnknownType(String),
  #[error("duplicate type: {0}")]
  DuplicateType(String),
  #[error("field {field} of {message} references unknown type {type_name}")]
  UnresolvedField {
    message: String,
    field: String,
    type_name: String,
  },
  #[error("duplicate method {method} on service {service}")]
  DuplicateMethod { service: String, method: String },
}

pub type Result<T> = std::result::Result<T, Error>;
