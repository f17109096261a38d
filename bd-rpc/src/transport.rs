// shared-core - bitdrift's common client/server libraries
// Copyright Bitdrift, Inc. All rights reserved.
//
// Use of this source code is governed by a source available license that can be found in the
// LICENSE file or at:
// https://polyformproject.org/wp-content/uploads/2020/06/PolyForm-Shield-1.0.0.txt

use crate::Result;
use crate::cancellation::Cancellation;
use crate::pipeline::ValueStream;
use async_trait::async_trait;
use bd_rpc_value::{MethodDescriptor, Value};
use futures::stream::BoxStream;
use http::{HeaderMap, HeaderValue};
use std::sync::Arc;

pub const AUTHORIZATION: &str = "authorization";

//
// OutboundCall
//

// Everything the transport needs to start a call besides the payload.
#[derive(Clone, Debug)]
pub struct OutboundCall {
  pub method: Arc<MethodDescriptor>,
  pub metadata: HeaderMap,
  // Cancelled when the caller gives up on the call.
  pub cancellation: Cancellation,
}

//
// Channel
//

// The four call primitives of the underlying transport. Payloads are already transformed; errors
// returned here carry the wire status.
#[async_trait]
pub trait Channel: Send + Sync {
  async fn unary(&self, call: OutboundCall, request: Value) -> Result<Value>;

  async fn server_streaming(&self, call: OutboundCall, request: Value) -> Result<ValueStream>;

  async fn client_streaming(
    &self,
    call: OutboundCall,
    requests: BoxStream<'static, Value>,
  ) -> Result<Value>;

  async fn streaming(
    &self,
    call: OutboundCall,
    requests: BoxStream<'static, Value>,
  ) -> Result<ValueStream>;
}

//
// Credentials
//

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum Credentials {
  #[default]
  Insecure,
  Bearer(String),
}

impl Credentials {
  // Add the credentials to outbound call metadata.
  pub fn apply(&self, metadata: &mut HeaderMap) {
    match self {
      Self::Insecure => {},
      Self::Bearer(token) => match HeaderValue::from_str(&format!("Bearer {token}")) {
        Ok(mut value) => {
          value.set_sensitive(true);
          metadata.insert(AUTHORIZATION, value);
        },
        Err(e) => log::warn!("bearer token is not a valid header value: {e}"),
      },
    }
  }
}

//
// Connector
//

// Produces channels for an address. Address and credentials are passed through untouched.
#[async_trait]
pub trait Connector: Send + Sync {
  async fn connect(&self, address: &str, credentials: &Credentials) -> Result<Arc<dyn Channel>>;
}
