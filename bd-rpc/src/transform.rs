// shared-core - bitdrift's common client/server libraries
// Copyright Bitdrift, Inc. All rights reserved.
//
// Use of this source code is governed by a source available license that can be found in the
// LICENSE file or at:
// https://polyformproject.org/wp-content/uploads/2020/06/PolyForm-Shield-1.0.0.txt

#[cfg(test)]
#[path = "./transform_test.rs"]
mod transform_test;

use crate::{Error, Result};
use bd_rpc_value::{MessageType, Value};
use std::collections::HashMap;
use std::sync::Arc;

// A 1:1 value transform.
pub type Transform = Arc<dyn Fn(Value) -> anyhow::Result<Value> + Send + Sync>;

// Builds a transform for a resolved message type. Returning None means no transform is applied for
// that type.
pub type TransformFactory = Arc<dyn Fn(&MessageType) -> Option<Transform> + Send + Sync>;

pub fn transform(f: impl Fn(Value) -> anyhow::Result<Value> + Send + Sync + 'static) -> Transform {
  Arc::new(f)
}

//
// TransformPair
//

#[derive(Clone)]
pub struct TransformPair {
  pub request: TransformFactory,
  pub response: TransformFactory,
}

impl TransformPair {
  pub fn new(
    request: impl Fn(&MessageType) -> Option<Transform> + Send + Sync + 'static,
    response: impl Fn(&MessageType) -> Option<Transform> + Send + Sync + 'static,
  ) -> Self {
    Self {
      request: Arc::new(request),
      response: Arc::new(response),
    }
  }

  // A pair that applies the same request and response transform regardless of type.
  pub fn uniform(
    request: impl Fn(Value) -> anyhow::Result<Value> + Send + Sync + 'static,
    response: impl Fn(Value) -> anyhow::Result<Value> + Send + Sync + 'static,
  ) -> Self {
    let request = transform(request);
    let response = transform(response);
    Self::new(
      move |_| Some(request.clone()),
      move |_| Some(response.clone()),
    )
  }

  pub fn request_only(
    request: impl Fn(&MessageType) -> Option<Transform> + Send + Sync + 'static,
  ) -> Self {
    Self::new(request, |_| None)
  }

  pub fn response_only(
    response: impl Fn(&MessageType) -> Option<Transform> + Send + Sync + 'static,
  ) -> Self {
    Self::new(|_| None, response)
  }
}

//
// TransformRegistry
//

struct MethodTransforms {
  request: Arc<[Transform]>,
  response: Arc<[Transform]>,
}

// Per method request and response transform chains. Request transforms run in pair order and
// response transforms run in reverse pair order:
// request A -> request B -> call -> response B -> response A
pub struct TransformRegistry {
  pairs: Vec<TransformPair>,
  methods: HashMap<String, MethodTransforms>,
}

impl TransformRegistry {
  #[must_use]
  pub fn new(pairs: &[TransformPair]) -> Self {
    Self {
      pairs: pairs.to_vec(),
      methods: HashMap::new(),
    }
  }

  // Build the chains for a method. Each method is registered exactly once.
  pub fn register(
    &mut self,
    method: &str,
    request_type: &MessageType,
    response_type: &MessageType,
  ) {
    debug_assert!(
      !self.methods.contains_key(method),
      "{method} registered twice"
    );
    if self.methods.contains_key(method) {
      return;
    }

    let request: Vec<_> = self
      .pairs
      .iter()
      .filter_map(|pair| (pair.request)(request_type))
      .collect();
    let mut response: Vec<_> = self
      .pairs
      .iter()
      .filter_map(|pair| (pair.response)(response_type))
      .collect();
    response.reverse();

    log::trace!(
      "registered {} request and {} response transforms for {method}",
      request.len(),
      response.len()
    );
    self.methods.insert(
      method.to_string(),
      MethodTransforms {
        request: request.into(),
        response: response.into(),
      },
    );
  }

  #[must_use]
  pub fn request_transforms_for(&self, method: &str) -> Arc<[Transform]> {
    self
      .methods
      .get(method)
      .map_or_else(|| Arc::from([]), |m| m.request.clone())
  }

  #[must_use]
  pub fn response_transforms_for(&self, method: &str) -> Arc<[Transform]> {
    self
      .methods
      .get(method)
      .map_or_else(|| Arc::from([]), |m| m.response.clone())
  }
}

// Apply a chain of transforms to a single value in order.
pub fn apply_chain(transforms: &[Transform], value: Value) -> Result<Value> {
  transforms
    .iter()
    .try_fold(value, |value, transform| transform(value).map_err(Error::transform))
}
