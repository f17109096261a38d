// shared-core - bitdrift's common client/server libraries
// Copyright Bitdrift, Inc. All rights reserved.
//
// Use of this source code is governed by a source available license that can be found in the
// LICENSE file or at:
// https://polyformproject.org/wp-content/uploads/2020/06/PolyForm-Shield-1.0.0.txt

use super::*;
use crate::test::message_type;
use pretty_assertions::assert_eq;

#[test]
fn document_paths() {
  let paths = ConversionPaths::for_type(&message_type("test.Document"));
  assert_eq!(paths.root(), ".test.Document");
  assert!(!paths.is_empty());
  assert_eq!(
    paths.paths(),
    BTreeMap::from([
      ("byName{}".to_string(), Conversion::Timestamp),
      ("created".to_string(), Conversion::Timestamp),
      ("id".to_string(), Conversion::ObjectId),
      ("items[].created".to_string(), Conversion::Timestamp),
      ("items[].owner".to_string(), Conversion::ObjectId),
      ("meta".to_string(), Conversion::Json),
      ("root.updated".to_string(), Conversion::Timestamp),
      ("times[]".to_string(), Conversion::Timestamp),
    ])
  );
}

#[test]
fn recursive_types_are_planned_once() {
  let paths = ConversionPaths::for_type(&message_type("test.Node"));
  assert_eq!(
    paths.field(".test.Node", "children"),
    Some(&FieldEntry {
      plan: FieldPlan::Nested(".test.Node".to_string()),
      container: Container::List,
    })
  );
  assert_eq!(
    paths.paths(),
    BTreeMap::from([("updated".to_string(), Conversion::Timestamp)])
  );
}

#[test]
fn types_without_conversions_are_pruned() {
  let paths = ConversionPaths::for_type(&message_type("test.Document"));
  assert_eq!(paths.field(".test.Document", "plain"), None);
  assert_eq!(paths.field(".test.Document", "title"), None);
  assert_eq!(paths.field(".test.Plain", "name"), None);

  let paths = ConversionPaths::for_type(&message_type("test.Plain"));
  assert!(paths.is_empty());
  assert!(paths.paths().is_empty());
}
