// shared-core - bitdrift's common client/server libraries
// Copyright Bitdrift, Inc. All rights reserved.
//
// Use of this source code is governed by a source available license that can be found in the
// LICENSE file or at:
// https://polyformproject.org/wp-content/uploads/2020/06/PolyForm-Shield-1.0.0.txt

//! Converters between domain values (timestamps, object ids, free-form JSON, nullable values) and
//! their message encodings. Each converter is delivered as a [`TransformPair`] so it can be
//! plugged into client and server wrapping like any other transform. The request side of a client
//! pair encodes and its response side decodes; server pairs do the reverse.

pub mod object;
pub mod paths;
pub mod scalar;
pub mod wrappers;


use bd_rpc::TransformPair;
use bd_rpc_value::{DescriptorPoolBuilder, FieldDescriptor, MessageDescriptor, ScalarType};

pub const JSON_OBJECT_TYPE: &str = ".bd.rpc.JsonObject";
pub const OBJECT_ID_TYPE: &str = ".bd.rpc.ObjectId";

// Field option marking a string field as carrying an object id.
pub const OBJECT_ID_OPTION: &str = "(objectId)";

// Which way a converter runs.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Direction {
  // Domain value to message encoding.
  Encode,
  // Message encoding to domain value.
  Decode,
}

// Add the message types the converters understand: `.bd.rpc.JsonObject` and `.bd.rpc.ObjectId`.
#[must_use]
pub fn with_convert_types(builder: DescriptorPoolBuilder) -> DescriptorPoolBuilder {
  builder
    .message(MessageDescriptor::new(
      JSON_OBJECT_TYPE,
      vec![FieldDescriptor::scalar(
        "representation",
        ScalarType::String,
      )],
    ))
    .message(MessageDescriptor::new(
      OBJECT_ID_TYPE,
      vec![FieldDescriptor::scalar("value", ScalarType::Bytes)],
    ))
}

// Path based object conversion for a client: requests are encoded, responses decoded.
#[must_use]
pub fn client_object_converters() -> TransformPair {
  TransformPair::new(
    |t| object::converter(t, Direction::Encode),
    |t| object::converter(t, Direction::Decode),
  )
}

#[must_use]
pub fn server_object_converters() -> TransformPair {
  TransformPair::new(
    |t| object::converter(t, Direction::Decode),
    |t| object::converter(t, Direction::Encode),
  )
}

// Well-known wrapper conversion for a client: requests are wrapped, responses unwrapped.
#[must_use]
pub fn client_wrapper_converters() -> TransformPair {
  TransformPair::new(
    |t| wrappers::converter(t, Direction::Encode),
    |t| wrappers::converter(t, Direction::Decode),
  )
}

#[must_use]
pub fn server_wrapper_converters() -> TransformPair {
  TransformPair::new(
    |t| wrappers::converter(t, Direction::Decode),
    |t| wrappers::converter(t, Direction::Encode),
  )
}

#[cfg(test)]
#[ctor::ctor]
fn global_init() {
  test::test_global_init();
}
