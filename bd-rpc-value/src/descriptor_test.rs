// shared-core - bitdrift's common client/server libraries
// Copyright Bitdrift, Inc. All rights reserved.
//
// Use of this source code is governed by a source available license that can be found in the
// LICENSE file or at:
// https://polyformproject.org/wp-content/uploads/2020/06/PolyForm-Shield-1.0.0.txt

use super::{
  CallShape,
  DescriptorPool,
  EnumDescriptor,
  FieldDescriptor,
  FieldType,
  MessageDescriptor,
  ScalarType,
  ServiceDescriptor,
};
use crate::Error;
use assert_matches::assert_matches;
use pretty_assertions::assert_eq;
use std::sync::Arc;

fn pool() -> Arc<DescriptorPool> {
  DescriptorPool::builder()
    .with_well_known_types()
    .enumeration(EnumDescriptor::new("test.Color", &[("RED", 0), ("BLUE", 1)]))
    .message(MessageDescriptor::new(
      "test.Request",
      vec![
        FieldDescriptor::scalar("name", ScalarType::String),
        FieldDescriptor::message("date", ".google.protobuf.Timestamp"),
        FieldDescriptor::message("children", "test.Request").repeated(),
        FieldDescriptor::enumeration("color", "test.Color"),
        FieldDescriptor::map(
          "labels",
          ScalarType::String,
          FieldType::Scalar(ScalarType::String),
        ),
      ],
    ))
    .message(MessageDescriptor::new(
      "test.Response",
      vec![FieldDescriptor::scalar("message", ScalarType::String)],
    ))
    .build()
    .unwrap()
}

#[test]
fn message_lookup() {
  let pool = pool();
  let request = pool.message("test.Request").unwrap();
  assert_eq!(request.full_name(), ".test.Request");
  assert_eq!(pool.message(".test.Request").unwrap(), request);
  assert_eq!(format!("{request:?}"), "MessageType(.test.Request)");

  assert_matches!(pool.message("test.Missing"), Err(Error::UnknownType(name)) => {
    assert_eq!(name, ".test.Missing");
  });
}

#[test]
fn nested_types() {
  let pool = pool();
  let request = pool.message("test.Request").unwrap();

  let date = request.field("date").unwrap();
  assert_eq!(
    request.field_message_type(date).unwrap().full_name(),
    ".google.protobuf.Timestamp"
  );

  let children = request.field("children").unwrap();
  assert!(children.is_repeated());
  assert_eq!(
    request.field_message_type(children).unwrap().full_name(),
    ".test.Request"
  );

  let color = request.field("color").unwrap();
  assert!(request.field_message_type(color).is_none());
  let color = request.field_enum_type(color).unwrap();
  assert_eq!(color.number("BLUE"), Some(1));
  assert_eq!(color.name(0), Some("RED"));
  assert_eq!(color.name(7), None);

  let labels = request.field("labels").unwrap();
  assert!(labels.is_map());
  assert!(!labels.is_repeated());
}

#[test]
fn unresolved_field() {
  let result = DescriptorPool::builder()
    .message(MessageDescriptor::new(
      "test.Broken",
      vec![FieldDescriptor::message("inner", "test.Nope")],
    ))
    .build();
  assert_matches!(result, Err(Error::UnresolvedField { message, field, type_name }) => {
    assert_eq!(message, ".test.Broken");
    assert_eq!(field, "inner");
    assert_eq!(type_name, ".test.Nope");
  });
}

#[test]
fn duplicate_type() {
  let result = DescriptorPool::builder()
    .message(MessageDescriptor::new("test.A", vec![]))
    .message(MessageDescriptor::new(".test.A", vec![]))
    .build();
  assert_matches!(result, Err(Error::DuplicateType(_)));
}

#[test]
fn service_resolution() {
  let pool = pool();
  let service = ServiceDescriptor::builder("test", "TestService")
    .unary("Hello", "test.Request", "test.Response")
    .server_streaming("List", "test.Request", "test.Response")
    .client_streaming("Upload", "test.Request", "test.Response")
    .streaming("Chat", "test.Request", "test.Response")
    .resolve(&pool)
    .unwrap();

  assert_eq!(service.full_name(), "test.TestService");
  assert_eq!(service.methods().len(), 4);

  let shapes: Vec<_> = service.methods().iter().map(|m| m.shape()).collect();
  assert_eq!(
    shapes,
    vec![
      CallShape::Unary,
      CallShape::ServerStreaming,
      CallShape::ClientStreaming,
      CallShape::Streaming
    ]
  );

  let hello = service.method("hello").unwrap();
  assert_eq!(hello.name(), "Hello");
  assert_eq!(hello.generated_name(), "hello");
  assert_eq!(hello.full_name(), "test.TestService.Hello");
  assert_eq!(hello.full_path(), "/test.TestService/Hello");
  assert_eq!(hello.request_type().full_name(), ".test.Request");
  assert!(Arc::ptr_eq(hello, service.method("Hello").unwrap()));
  assert!(service.method("missing").is_none());
}

#[test]
fn service_resolution_errors() {
  let pool = pool();
  assert_matches!(
    ServiceDescriptor::builder("test", "TestService")
      .unary("Hello", "test.Request", "test.Missing")
      .resolve(&pool),
    Err(Error::UnknownType(_))
  );
  assert_matches!(
    ServiceDescriptor::builder("test", "TestService")
      .unary("Hello", "test.Request", "test.Response")
      .unary("Hello", "test.Request", "test.Response")
      .resolve(&pool),
    Err(Error::DuplicateMethod { .. })
  );
}

#[test]
fn call_shape_cardinality() {
  assert_eq!(CallShape::from_cardinality(false, false), CallShape::Unary);
  assert_eq!(
    CallShape::from_cardinality(false, true),
    CallShape::ServerStreaming
  );
  assert_eq!(
    CallShape::from_cardinality(true, false),
    CallShape::ClientStreaming
  );
  assert_eq!(CallShape::from_cardinality(true, true), CallShape::Streaming);
  assert!(!CallShape::Unary.is_streaming());
  assert_eq!(CallShape::Streaming.to_string(), "bidi streaming");
}
