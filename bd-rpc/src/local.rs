// shared-core - bitdrift's common client/server libraries
// Copyright Bitdrift, Inc. All rights reserved.
//
// Use of this source code is governed by a source available license that can be found in the
// LICENSE file or at:
// https://polyformproject.org/wp-content/uploads/2020/06/PolyForm-Shield-1.0.0.txt

#[cfg(test)]
#[path = "./local_test.rs"]
mod local_test;

use crate::pipeline::ValueStream;
use crate::server::{InboundCall, ServiceDispatcher};
use crate::status::{Code, Status};
use crate::transport::{Channel, Connector, Credentials, OutboundCall};
use crate::{Error, Result};
use async_trait::async_trait;
use bd_rpc_value::Value;
use futures::StreamExt;
use futures::stream::BoxStream;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio_stream::wrappers::ReceiverStream;

// Errors crossing the in-process boundary are reduced to their status, as they would be on the
// wire.
fn wire_error(error: Error) -> Error {
  Error::Grpc(error.status())
}

fn wire_stream(rx: mpsc::Receiver<Result<Value>>) -> ValueStream {
  ReceiverStream::new(rx)
    .map(|item| item.map_err(wire_error))
    .boxed()
}

//
// LocalServer
//

// A set of service dispatchers reachable in-process.
#[derive(Default)]
pub struct LocalServer {
  services: HashMap<String, Arc<ServiceDispatcher>>,
}

impl LocalServer {
  #[must_use]
  pub fn new() -> Self {
    Self::default()
  }

  #[must_use]
  pub fn with_service(mut self, dispatcher: ServiceDispatcher) -> Self {
    self.services.insert(
      dispatcher.service().full_name().to_string(),
      Arc::new(dispatcher),
    );
    self
  }

  fn dispatcher(&self, service: &str) -> Result<Arc<ServiceDispatcher>> {
    self.services.get(service).cloned().ok_or_else(|| {
      Status::new(Code::Unimplemented, format!("unknown service {service}")).into()
    })
  }
}

//
// LocalNetwork
//

// Maps addresses to in-process servers. Cheap to clone.
#[derive(Clone, Default)]
pub struct LocalNetwork {
  servers: Arc<RwLock<HashMap<String, Arc<LocalServer>>>>,
}

impl LocalNetwork {
  #[must_use]
  pub fn new() -> Self {
    Self::default()
  }

  // Bind a server to an address, replacing any server already bound there.
  pub fn bind(&self, address: &str, server: LocalServer) {
    if self
      .servers
      .write()
      .insert(address.to_string(), Arc::new(server))
      .is_some()
    {
      log::debug!("replaced server bound to {address}");
    }
  }

  pub fn unbind(&self, address: &str) {
    self.servers.write().remove(address);
  }
}

#[async_trait]
impl Connector for LocalNetwork {
  async fn connect(&self, address: &str, credentials: &Credentials) -> Result<Arc<dyn Channel>> {
    let server = self
      .servers
      .read()
      .get(address)
      .cloned()
      .ok_or_else(|| Error::Connect {
        address: address.to_string(),
        reason: "no server bound".to_string(),
      })?;

    log::debug!("connected to local server at {address}");
    Ok(Arc::new(LocalChannel {
      server,
      credentials: credentials.clone(),
    }))
  }
}

//
// LocalChannel
//

struct LocalChannel {
  server: Arc<LocalServer>,
  credentials: Credentials,
}

impl LocalChannel {
  fn route(&self, call: OutboundCall) -> Result<(Arc<ServiceDispatcher>, InboundCall)> {
    let dispatcher = self.server.dispatcher(call.method.service_name())?;
    let mut metadata = call.metadata;
    self.credentials.apply(&mut metadata);
    Ok((
      dispatcher,
      InboundCall {
        method: call.method.name().to_string(),
        metadata,
        cancellation: call.cancellation,
      },
    ))
  }
}

#[async_trait]
impl Channel for LocalChannel {
  async fn unary(&self, call: OutboundCall, request: Value) -> Result<Value> {
    let (dispatcher, inbound) = self.route(call)?;
    let (tx, rx) = oneshot::channel();
    tokio::spawn(async move { dispatcher.unary(inbound, request, tx).await });
    rx.await.map_err(|_| Error::Closed)?.map_err(wire_error)
  }

  async fn server_streaming(&self, call: OutboundCall, request: Value) -> Result<ValueStream> {
    let (dispatcher, inbound) = self.route(call)?;
    let (tx, rx) = mpsc::channel(1);
    tokio::spawn(async move { dispatcher.server_streaming(inbound, request, tx).await });
    Ok(wire_stream(rx))
  }

  async fn client_streaming(
    &self,
    call: OutboundCall,
    requests: BoxStream<'static, Value>,
  ) -> Result<Value> {
    let (dispatcher, inbound) = self.route(call)?;
    let (tx, rx) = oneshot::channel();
    tokio::spawn(async move {
      dispatcher
        .client_streaming(inbound, requests.map(Ok).boxed(), tx)
        .await;
    });
    rx.await.map_err(|_| Error::Closed)?.map_err(wire_error)
  }

  async fn streaming(
    &self,
    call: OutboundCall,
    requests: BoxStream<'static, Value>,
  ) -> Result<ValueStream> {
    let (dispatcher, inbound) = self.route(call)?;
    let (tx, rx) = mpsc::channel(1);
    tokio::spawn(async move {
      dispatcher
        .streaming(inbound, requests.map(Ok).boxed(), tx)
        .await;
    });
    Ok(wire_stream(rx))
  }
}
