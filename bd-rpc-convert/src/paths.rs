// shared-core - bitdrift's common client/server libraries
// Copyright Bitdrift, Inc. All rights reserved.
//
// Use of this source code is governed by a source available license that can be found in the
// LICENSE file or at:
// https://polyformproject.org/wp-content/uploads/2020/06/PolyForm-Shield-1.0.0.txt

#[cfg(test)]
#[path = "./paths_test.rs"]
mod paths_test;

use crate::{JSON_OBJECT_TYPE, OBJECT_ID_OPTION};
use bd_rpc_value::MessageType;
use bd_rpc_value::descriptor::TIMESTAMP_TYPE;
use std::collections::{BTreeMap, HashMap, HashSet};

// Conversion fields by message type name, then field name.
type TypeFields = HashMap<String, HashMap<String, FieldEntry>>;

//
// Conversion
//

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Conversion {
  Timestamp,
  ObjectId,
  Json,
}

//
// FieldPlan
//

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum FieldPlan {
  Convert(Conversion),
  // A nested message type that contains conversions somewhere below it.
  Nested(String),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Container {
  Single,
  List,
  Map,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FieldEntry {
  pub plan: FieldPlan,
  pub container: Container,
}

//
// ConversionPaths
//

// The fields needing conversion for a message type and every type reachable from it, computed once
// per resolved type. Types are tracked by name, so recursive messages are planned once and
// converted to whatever depth a value actually has.
#[derive(Debug, Default)]
pub struct ConversionPaths {
  root: String,
  types: TypeFields,
}

impl ConversionPaths {
  #[must_use]
  pub fn for_type(message_type: &MessageType) -> Self {
    let mut types = HashMap::new();
    collect(message_type, &mut types);

    // Keep only the types from which a conversion can be reached.
    let mut converting: HashSet<String> = types
      .iter()
      .filter(|(_, fields)| {
        fields
          .values()
          .any(|entry| matches!(entry.plan, FieldPlan::Convert(_)))
      })
      .map(|(name, _)| name.clone())
      .collect();
    loop {
      let reaching: Vec<String> = types
        .iter()
        .filter(|(name, fields)| {
          !converting.contains(*name)
            && fields.values().any(|entry| {
              matches!(&entry.plan, FieldPlan::Nested(nested) if converting.contains(nested))
            })
        })
        .map(|(name, _)| name.clone())
        .collect();
      if reaching.is_empty() {
        break;
      }
      converting.extend(reaching);
    }

    types.retain(|name, _| converting.contains(name));
    for fields in types.values_mut() {
      fields.retain(|_, entry| match &entry.plan {
        FieldPlan::Convert(_) => true,
        FieldPlan::Nested(nested) => converting.contains(nested),
      });
    }

    log::trace!(
      "{} has conversions in {} message types",
      message_type.full_name(),
      types.len()
    );
    Self {
      root: message_type.full_name().to_string(),
      types,
    }
  }

  #[must_use]
  pub fn root(&self) -> &str {
    &self.root
  }

  // Whether values of the root type never need converting.
  #[must_use]
  pub fn is_empty(&self) -> bool {
    !self.types.contains_key(&self.root)
  }

  #[must_use]
  pub fn field(&self, type_name: &str, field: &str) -> Option<&FieldEntry> {
    self.types.get(type_name).and_then(|fields| fields.get(field))
  }

  // Every conversion as a dotted path from the root. Repeated fields are marked with `[]` and map
  // fields with `{}`. Recursive types are expanded once per branch.
  #[must_use]
  pub fn paths(&self) -> BTreeMap<String, Conversion> {
    let mut paths = BTreeMap::new();
    let mut branch = vec![self.root.as_str()];
    self.render(&self.root, "", &mut branch, &mut paths);
    paths
  }

  fn render<'a>(
    &'a self,
    type_name: &str,
    prefix: &str,
    branch: &mut Vec<&'a str>,
    paths: &mut BTreeMap<String, Conversion>,
  ) {
    let Some(fields) = self.types.get(type_name) else {
      return;
    };
    for (name, entry) in fields {
      let suffix = match entry.container {
        Container::Single => "",
        Container::List => "[]",
        Container::Map => "{}",
      };
      let path = format!("{prefix}{name}{suffix}");
      match &entry.plan {
        FieldPlan::Convert(conversion) => {
          paths.insert(path, *conversion);
        },
        FieldPlan::Nested(nested) => {
          if branch.contains(&nested.as_str()) {
            continue;
          }
          branch.push(nested.as_str());
          self.render(nested, &format!("{path}."), branch, paths);
          branch.pop();
        },
      }
    }
  }
}

fn collect(message_type: &MessageType, types: &mut TypeFields) {
  let name = message_type.full_name().to_string();
  if types.contains_key(&name) {
    return;
  }
  types.insert(name.clone(), HashMap::new());

  let mut fields = HashMap::new();
  for field in message_type.fields() {
    let plan = if field.has_option(OBJECT_ID_OPTION) {
      FieldPlan::Convert(Conversion::ObjectId)
    } else {
      match field.message_type_name() {
        Some(JSON_OBJECT_TYPE) => FieldPlan::Convert(Conversion::Json),
        Some(TIMESTAMP_TYPE) => FieldPlan::Convert(Conversion::Timestamp),
        Some(nested) => {
          if let Some(nested_type) = message_type.field_message_type(field) {
            collect(&nested_type, types);
          }
          FieldPlan::Nested(nested.to_string())
        },
        None => continue,
      }
    };

    let container = if field.is_map() {
      Container::Map
    } else if field.is_repeated() {
      Container::List
    } else {
      Container::Single
    };
    fields.insert(field.name().to_string(), FieldEntry { plan, container });
  }
  types.insert(name, fields);
}
