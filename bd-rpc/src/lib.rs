// shared-core - bitdrift's common client/server libraries
// Copyright Bitdrift, Inc. All rights reserved.
//
// Use of this source code is governed by a source available license that can be found in the
// LICENSE file or at:
// https://polyformproject.org/wp-content/uploads/2020/06/PolyForm-Shield-1.0.0.txt

//! Method wrapping for RPC services. Given a resolved [`bd_rpc_value::ServiceDescriptor`], a
//! [`ClientConstructor`] produces clients and a [`ServiceDispatcher`] exposes user handlers, with
//! each method dispatched by its call shape (unary, server streaming, client streaming, bidi).
//! Every call flows through the configured chain of [`TransformPair`]s and gets request context
//! propagation, optional retry with backoff for unary calls, and tracing span propagation. The
//! wire itself sits behind the [`transport::Channel`] trait; [`local`] provides an in-process
//! implementation.


pub mod cancellation;
pub mod client;
pub mod context;
pub mod error;
pub mod local;
pub mod options;
pub mod pipeline;
pub mod retry;
pub mod server;
pub mod status;
pub mod tracing_provider;
pub mod transform;
pub mod transport;

pub use client::{
  CallOptions,
  ClientConstructor,
  ClientStreamingCall,
  Request,
  ServiceClient,
  StreamingCall,
};
pub use context::{CallContext, CommonContext, ContextData, ContextKind};
pub use error::{Error, Result};
pub use options::{ClientOptions, ContextOptions, DispatcherOptions, RetryStrategy};
pub use server::{
  CallErrorInfo,
  MethodHandler,
  RequestStream,
  ResponseSender,
  ServerCall,
  ServiceDispatcher,
  ServiceImplementation,
};
pub use status::{Code, Status};
pub use transform::{Transform, TransformPair, transform};
pub use transport::{Channel, Connector, Credentials};

#[cfg(test)]
#[ctor::ctor]
fn global_init() {
  test::test_global_init();
}
