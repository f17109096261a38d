// shared-core - bitdrift's common client/server libraries
// Copyright Bitdrift, Inc. All rights reserved.
//
// Use of this source code is governed by a source available license that can be found in the
// LICENSE file or at:
// https://polyformproject.org/wp-content/uploads/2020/06/PolyForm-Shield-1.0.0.txt

#[cfg(test)]
#[path = "./server_test.rs"]
mod server_test;

use crate::cancellation::Cancellation;
use crate::context::{CallContext, ContextData, ContextKind};
use crate::options::{ContextOptions, DispatcherOptions};
use crate::pipeline::{ValueStream, build_pipeline};
use crate::tracing_provider::{NoopTracing, TracingProvider};
use crate::transform::{Transform, TransformPair, TransformRegistry, apply_chain};
use crate::{Error, Result};
use async_trait::async_trait;
use bd_rpc_value::{CallShape, MethodDescriptor, ServiceDescriptor, Value};
use futures::future::Fuse;
use futures::{FutureExt, StreamExt};
use http::HeaderMap;
use std::any::Any;
use std::collections::HashMap;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use parking_lot::Mutex;
use std::sync::Arc;
use time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;
use tokio_stream::wrappers::ReceiverStream;
use tracing::Instrument;

// Requests as seen by client streaming and bidi handlers, after request transforms.
pub type RequestStream = ValueStream;

pub type CallErrorObserver = Arc<dyn Fn(&Error, &ServerCall, &CallErrorInfo) + Send + Sync>;

//
// InboundCall
//

// A call as handed over by the transport.
#[derive(Clone, Debug)]
pub struct InboundCall {
  // The proto method name.
  pub method: String,
  pub metadata: HeaderMap,
  pub cancellation: Cancellation,
}

//
// ServerCall
//

#[derive(Clone, Debug)]
pub struct ServerCall {
  method: Arc<MethodDescriptor>,
  metadata: HeaderMap,
  context: CallContext,
}

impl ServerCall {
  #[must_use]
  pub const fn method(&self) -> &Arc<MethodDescriptor> {
    &self.method
  }

  #[must_use]
  pub const fn metadata(&self) -> &HeaderMap {
    &self.metadata
  }

  #[must_use]
  pub const fn context(&self) -> &CallContext {
    &self.context
  }

  #[must_use]
  pub fn is_cancelled(&self) -> bool {
    self.context.is_cancelled()
  }
}

//
// CallErrorInfo
//

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CallErrorInfo {
  pub service: String,
  // The generated method name, e.g. `sayHello`.
  pub method_name: String,
}

//
// ResponseSender
//

#[derive(Clone, Debug)]
pub struct ResponseSender {
  tx: mpsc::Sender<Result<Value>>,
}

impl ResponseSender {
  // Waits until the previous response has been taken by the transport.
  pub async fn send(&self, response: impl Into<Value>) -> Result<()> {
    self
      .tx
      .send(Ok(response.into()))
      .await
      .map_err(|_| Error::Closed)
  }

  #[must_use]
  pub fn is_closed(&self) -> bool {
    self.tx.is_closed()
  }
}

//
// Handlers
//

#[async_trait]
pub trait UnaryHandler: Send + Sync {
  async fn handle(&self, request: Value, call: &ServerCall) -> Result<Value>;
}

#[async_trait]
pub trait ServerStreamingHandler: Send + Sync {
  async fn handle(
    &self,
    request: Value,
    call: &ServerCall,
    responses: ResponseSender,
  ) -> Result<()>;
}

#[async_trait]
pub trait ClientStreamingHandler: Send + Sync {
  async fn handle(&self, requests: RequestStream, call: &ServerCall) -> Result<Value>;
}

#[async_trait]
pub trait StreamingHandler: Send + Sync {
  async fn handle(
    &self,
    requests: RequestStream,
    call: &ServerCall,
    responses: ResponseSender,
  ) -> Result<()>;
}

struct UnaryFn<F>(F);

#[async_trait]
impl<F, Fut> UnaryHandler for UnaryFn<F>
where
  F: Fn(Value, ServerCall) -> Fut + Send + Sync,
  Fut: Future<Output = Result<Value>> + Send,
{
  async fn handle(&self, request: Value, call: &ServerCall) -> Result<Value> {
    (self.0)(request, call.clone()).await
  }
}

struct ServerStreamingFn<F>(F);

#[async_trait]
impl<F, Fut> ServerStreamingHandler for ServerStreamingFn<F>
where
  F: Fn(Value, ServerCall, ResponseSender) -> Fut + Send + Sync,
  Fut: Future<Output = Result<()>> + Send,
{
  async fn handle(
    &self,
    request: Value,
    call: &ServerCall,
    responses: ResponseSender,
  ) -> Result<()> {
    (self.0)(request, call.clone(), responses).await
  }
}

struct ClientStreamingFn<F>(F);

#[async_trait]
impl<F, Fut> ClientStreamingHandler for ClientStreamingFn<F>
where
  F: Fn(RequestStream, ServerCall) -> Fut + Send + Sync,
  Fut: Future<Output = Result<Value>> + Send,
{
  async fn handle(&self, requests: RequestStream, call: &ServerCall) -> Result<Value> {
    (self.0)(requests, call.clone()).await
  }
}

struct StreamingFn<F>(F);

#[async_trait]
impl<F, Fut> StreamingHandler for StreamingFn<F>
where
  F: Fn(RequestStream, ServerCall, ResponseSender) -> Fut + Send + Sync,
  Fut: Future<Output = Result<()>> + Send,
{
  async fn handle(
    &self,
    requests: RequestStream,
    call: &ServerCall,
    responses: ResponseSender,
  ) -> Result<()> {
    (self.0)(requests, call.clone(), responses).await
  }
}

//
// MethodHandler
//

#[derive(Clone)]
pub enum MethodHandler {
  Unary(Arc<dyn UnaryHandler>),
  ServerStreaming(Arc<dyn ServerStreamingHandler>),
  ClientStreaming(Arc<dyn ClientStreamingHandler>),
  Streaming(Arc<dyn StreamingHandler>),
}

impl MethodHandler {
  #[must_use]
  pub const fn shape(&self) -> CallShape {
    match self {
      Self::Unary(_) => CallShape::Unary,
      Self::ServerStreaming(_) => CallShape::ServerStreaming,
      Self::ClientStreaming(_) => CallShape::ClientStreaming,
      Self::Streaming(_) => CallShape::Streaming,
    }
  }
}

//
// ServiceImplementation
//

// User handlers keyed by proto or generated method name. Methods without a handler are not exposed.
#[derive(Clone, Default)]
pub struct ServiceImplementation {
  handlers: HashMap<String, MethodHandler>,
}

impl ServiceImplementation {
  #[must_use]
  pub fn new() -> Self {
    Self::default()
  }

  #[must_use]
  pub fn handler(mut self, method: &str, handler: MethodHandler) -> Self {
    self.handlers.insert(method.to_string(), handler);
    self
  }

  #[must_use]
  pub fn unary(self, method: &str, handler: impl UnaryHandler + 'static) -> Self {
    self.handler(method, MethodHandler::Unary(Arc::new(handler)))
  }

  #[must_use]
  pub fn unary_fn<F, Fut>(self, method: &str, f: F) -> Self
  where
    F: Fn(Value, ServerCall) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Value>> + Send + 'static,
  {
    self.unary(method, UnaryFn(f))
  }

  #[must_use]
  pub fn server_streaming(
    self,
    method: &str,
    handler: impl ServerStreamingHandler + 'static,
  ) -> Self {
    self.handler(method, MethodHandler::ServerStreaming(Arc::new(handler)))
  }

  #[must_use]
  pub fn server_streaming_fn<F, Fut>(self, method: &str, f: F) -> Self
  where
    F: Fn(Value, ServerCall, ResponseSender) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<()>> + Send + 'static,
  {
    self.server_streaming(method, ServerStreamingFn(f))
  }

  #[must_use]
  pub fn client_streaming(
    self,
    method: &str,
    handler: impl ClientStreamingHandler + 'static,
  ) -> Self {
    self.handler(method, MethodHandler::ClientStreaming(Arc::new(handler)))
  }

  #[must_use]
  pub fn client_streaming_fn<F, Fut>(self, method: &str, f: F) -> Self
  where
    F: Fn(RequestStream, ServerCall) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Value>> + Send + 'static,
  {
    self.client_streaming(method, ClientStreamingFn(f))
  }

  #[must_use]
  pub fn streaming(self, method: &str, handler: impl StreamingHandler + 'static) -> Self {
    self.handler(method, MethodHandler::Streaming(Arc::new(handler)))
  }

  #[must_use]
  pub fn streaming_fn<F, Fut>(self, method: &str, f: F) -> Self
  where
    F: Fn(RequestStream, ServerCall, ResponseSender) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<()>> + Send + 'static,
  {
    self.streaming(method, StreamingFn(f))
  }
}

//
// DispatchMethod
//

struct DispatchMethod {
  descriptor: Arc<MethodDescriptor>,
  handler: MethodHandler,
  request_transforms: Arc<[Transform]>,
  response_transforms: Arc<[Transform]>,
  context_kind: Option<ContextKind>,
  info: CallErrorInfo,
  warnings: Mutex<WarnWindow>,
}

#[derive(Default)]
struct WarnWindow {
  last_warned: Option<Instant>,
  suppressed: u64,
}

impl DispatchMethod {
  fn shape_mismatch(&self, actual: CallShape) -> Error {
    Error::ShapeMismatch {
      method: self.descriptor.full_name(),
      expected: self.descriptor.shape(),
      actual,
    }
  }

  // Returns the number of failures held back since the previous warning when a warning is due,
  // and counts this failure as held back otherwise.
  fn warning_due(&self, interval: Duration) -> Option<u64> {
    let now = Instant::now();
    let mut window = self.warnings.lock();
    if window.last_warned.is_some_and(|last_warned| now - last_warned <= interval) {
      window.suppressed += 1;
      return None;
    }
    window.last_warned = Some(now);
    Some(std::mem::take(&mut window.suppressed))
  }

  // Unary and server streaming calls build this after merging the payload context.
  fn span(&self, call: &ServerCall) -> tracing::Span {
    tracing::info_span!(
      "rpc.handle",
      service = %self.info.service,
      method = %self.descriptor.name(),
      request_id = %call.context.request_id().unwrap_or_default()
    )
  }
}

//
// ServiceDispatcher
//

// Server side wrapping of a service implementation. Each exposed method gets its transform chains
// and context handling built once here; the transport then hands calls over through the four
// per-shape entry points.
pub struct ServiceDispatcher {
  service: Arc<ServiceDescriptor>,
  methods: HashMap<String, Arc<DispatchMethod>>,
  observers: Vec<CallErrorObserver>,
  options: DispatcherOptions,
  tracing: Arc<dyn TracingProvider>,
}

impl ServiceDispatcher {
  pub fn new(
    service: Arc<ServiceDescriptor>,
    implementation: ServiceImplementation,
    transforms: &[TransformPair],
  ) -> Result<Self> {
    Self::with_options(
      service,
      implementation,
      transforms,
      DispatcherOptions::default(),
    )
  }

  pub fn with_options(
    service: Arc<ServiceDescriptor>,
    implementation: ServiceImplementation,
    transforms: &[TransformPair],
    options: DispatcherOptions,
  ) -> Result<Self> {
    let mut registry = TransformRegistry::new(transforms);
    let mut methods = HashMap::new();
    for (name, handler) in implementation.handlers {
      let descriptor = service
        .method(&name)
        .ok_or_else(|| Error::UnknownMethod(format!("{}.{name}", service.full_name())))?
        .clone();
      if handler.shape() != descriptor.shape() {
        return Err(Error::ShapeMismatch {
          method: descriptor.full_name(),
          expected: descriptor.shape(),
          actual: handler.shape(),
        });
      }
      if methods.contains_key(descriptor.name()) {
        return Err(
          bd_rpc_value::Error::DuplicateMethod {
            service: service.full_name().to_string(),
            method: descriptor.name().to_string(),
          }
          .into(),
        );
      }

      let full_name = descriptor.full_name();
      registry.register(
        &full_name,
        descriptor.request_type(),
        descriptor.response_type(),
      );
      methods.insert(
        descriptor.name().to_string(),
        Arc::new(DispatchMethod {
          request_transforms: registry.request_transforms_for(&full_name),
          response_transforms: registry.response_transforms_for(&full_name),
          context_kind: ContextKind::detect(descriptor.request_type(), &options.context),
          info: CallErrorInfo {
            service: service.full_name().to_string(),
            method_name: descriptor.generated_name(),
          },
          warnings: Mutex::default(),
          handler,
          descriptor,
        }),
      );
    }

    log::debug!(
      "dispatcher for {} exposes {} of {} methods",
      service.full_name(),
      methods.len(),
      service.methods().len()
    );
    Ok(Self {
      service,
      methods,
      observers: Vec::new(),
      options,
      tracing: Arc::new(NoopTracing),
    })
  }

  #[must_use]
  pub fn with_tracing(mut self, tracing: Arc<dyn TracingProvider>) -> Self {
    self.tracing = tracing;
    self
  }

  // Register an observer that sees every handler failure before it is delivered to the caller.
  pub fn on_call_error(
    &mut self,
    observer: impl Fn(&Error, &ServerCall, &CallErrorInfo) + Send + Sync + 'static,
  ) -> &mut Self {
    self.observers.push(Arc::new(observer));
    self
  }

  #[must_use]
  pub const fn service(&self) -> &Arc<ServiceDescriptor> {
    &self.service
  }

  // Whether a method is implemented, by proto or generated name.
  #[must_use]
  pub fn is_exposed(&self, method: &str) -> bool {
    self
      .service
      .method(method)
      .is_some_and(|m| self.methods.contains_key(m.name()))
  }

  pub async fn unary(
    &self,
    inbound: InboundCall,
    request: Value,
    responder: oneshot::Sender<Result<Value>>,
  ) {
    let name = inbound.method.clone();
    let result = match self.lookup(&name, CallShape::Unary) {
      Ok(method) => self.run_unary(&method, inbound, request).await,
      Err(e) => Err(e),
    };
    self.deliver(&name, responder, result);
  }

  pub async fn server_streaming(
    &self,
    inbound: InboundCall,
    request: Value,
    responses: mpsc::Sender<Result<Value>>,
  ) {
    let method = match self.lookup(&inbound.method, CallShape::ServerStreaming) {
      Ok(method) => method,
      Err(e) => return self.send_error(&inbound.method, &responses, e).await,
    };
    let MethodHandler::ServerStreaming(handler) = method.handler.clone() else {
      let error = method.shape_mismatch(CallShape::ServerStreaming);
      return self.send_error(&inbound.method, &responses, error).await;
    };

    let mut call = self.new_call(&method, inbound);

    // Request transform errors go into the output sequence.
    let request = apply_chain(&method.request_transforms, request).map(|mut request| {
      self.contextualize(&method, &mut call, &mut request);
      request
    });
    let span = method.span(&call);

    let (tx, rx) = mpsc::channel(1);
    let output = build_pipeline(ReceiverStream::new(rx).boxed(), &method.response_transforms);
    let call = &call;
    let produce = async move {
      let result = match request {
        Ok(request) => {
          guarded(handler.handle(request, call, ResponseSender { tx: tx.clone() })).await
        },
        Err(e) => Err(e),
      };
      if let Err(e) = result {
        let _ignored = tx.send(Err(e)).await;
      }
    };
    let forward = self.forward(&method, call, output, None, responses);

    async {
      tokio::join!(produce, forward);
    }
    .instrument(span)
    .await;
  }

  pub async fn client_streaming(
    &self,
    inbound: InboundCall,
    requests: ValueStream,
    responder: oneshot::Sender<Result<Value>>,
  ) {
    let name = inbound.method.clone();
    let result = match self.lookup(&name, CallShape::ClientStreaming) {
      Ok(method) => self.run_client_streaming(&method, inbound, requests).await,
      Err(e) => Err(e),
    };
    self.deliver(&name, responder, result);
  }

  pub async fn streaming(
    &self,
    inbound: InboundCall,
    requests: ValueStream,
    responses: mpsc::Sender<Result<Value>>,
  ) {
    let method = match self.lookup(&inbound.method, CallShape::Streaming) {
      Ok(method) => method,
      Err(e) => return self.send_error(&inbound.method, &responses, e).await,
    };
    let MethodHandler::Streaming(handler) = method.handler.clone() else {
      let error = method.shape_mismatch(CallShape::Streaming);
      return self.send_error(&inbound.method, &responses, error).await;
    };

    let call = self.new_call(&method, inbound);
    let span = method.span(&call);

    // Request pipeline errors are handed to the handler and also terminate the output.
    let (relay_tx, relay_rx) = oneshot::channel();
    let requests = self.inbound_requests(&method, &call, requests, Some(relay_tx));

    let (tx, rx) = mpsc::channel(1);
    let output = build_pipeline(ReceiverStream::new(rx).boxed(), &method.response_transforms);
    let call = &call;
    let produce = async move {
      let result = guarded(handler.handle(requests, call, ResponseSender { tx: tx.clone() })).await;
      if let Err(e) = result {
        let _ignored = tx.send(Err(e)).await;
      }
    };
    let forward = self.forward(&method, call, output, Some(relay_rx), responses);

    async {
      tokio::join!(produce, forward);
    }
    .instrument(span)
    .await;
  }

  fn lookup(&self, name: &str, shape: CallShape) -> Result<Arc<DispatchMethod>> {
    let method = self
      .methods
      .get(name)
      .ok_or_else(|| Error::UnknownMethod(format!("{}.{name}", self.service.full_name())))?;
    if method.descriptor.shape() != shape {
      return Err(method.shape_mismatch(shape));
    }
    Ok(method.clone())
  }

  // The context starts out as whatever the caller sent in metadata, plus defaults.
  fn new_call(&self, method: &DispatchMethod, inbound: InboundCall) -> ServerCall {
    let kind = method.context_kind.unwrap_or(ContextKind::Simple);
    let mut data = ContextData::from_metadata(kind, &inbound.metadata, &self.options.context);
    data.apply_defaults(&self.options.context);

    let parent = self.tracing.extract(&inbound.metadata);
    let span = self
      .tracing
      .start_span(&method.descriptor.full_name(), parent.as_ref());

    ServerCall {
      method: method.descriptor.clone(),
      metadata: inbound.metadata,
      context: CallContext::new(data, inbound.cancellation, span),
    }
  }

  fn contextualize(&self, method: &DispatchMethod, call: &mut ServerCall, request: &mut Value) {
    if let Some(kind) = method.context_kind {
      let data = merge_context(kind, &self.options.context, call.context.data(), request);
      call.context.set_data(data);
    }
  }

  fn inbound_requests(
    &self,
    method: &DispatchMethod,
    call: &ServerCall,
    requests: ValueStream,
    mut relay: Option<oneshot::Sender<Error>>,
  ) -> RequestStream {
    let kind = method.context_kind;
    let options = self.options.context.clone();
    let inbound = call.context.data().clone();
    // The handler sees the end of its requests once the call is cancelled.
    build_pipeline(requests, &method.request_transforms)
      .take_until(call.context.cancellation().clone().into_cancelled())
      .map(move |item| match item {
        Ok(mut request) => {
          if let Some(kind) = kind {
            merge_context(kind, &options, &inbound, &mut request);
          }
          Ok(request)
        },
        Err(e) => {
          if let Some(relay) = relay.take() {
            let _ignored = relay.send(e.clone());
          }
          Err(e)
        },
      })
      .boxed()
  }

  async fn run_unary(
    &self,
    method: &DispatchMethod,
    inbound: InboundCall,
    request: Value,
  ) -> Result<Value> {
    let MethodHandler::Unary(handler) = &method.handler else {
      return Err(method.shape_mismatch(CallShape::Unary));
    };

    let mut call = self.new_call(method, inbound);
    let request = apply_chain(&method.request_transforms, request).map(|mut request| {
      self.contextualize(method, &mut call, &mut request);
      request
    });
    let span = method.span(&call);
    let result = async {
      let response = guarded(handler.handle(request?, &call)).await?;
      apply_chain(&method.response_transforms, response)
    }
    .instrument(span)
    .await;

    if let Err(e) = &result {
      self.report(method, e, &call);
    }
    result
  }

  async fn run_client_streaming(
    &self,
    method: &DispatchMethod,
    inbound: InboundCall,
    requests: ValueStream,
  ) -> Result<Value> {
    let MethodHandler::ClientStreaming(handler) = &method.handler else {
      return Err(method.shape_mismatch(CallShape::ClientStreaming));
    };

    let call = self.new_call(method, inbound);
    let span = method.span(&call);
    let requests = self.inbound_requests(method, &call, requests, None);
    let result = async {
      let response = guarded(handler.handle(requests, &call)).await?;
      apply_chain(&method.response_transforms, response)
    }
    .instrument(span)
    .await;

    if let Err(e) = &result {
      self.report(method, e, &call);
    }
    result
  }

  // Move the output pipeline into the transport until it ends, fails, or the caller goes away. The
  // first error ends the call.
  async fn forward(
    &self,
    method: &DispatchMethod,
    call: &ServerCall,
    mut output: ValueStream,
    inbound_error: Option<oneshot::Receiver<Error>>,
    responses: mpsc::Sender<Result<Value>>,
  ) {
    let path = method.descriptor.full_path();
    let mut inbound_error = inbound_error.map_or_else(Fuse::terminated, FutureExt::fuse);
    loop {
      let item = tokio::select! {
        biased;
        Ok(error) = &mut inbound_error => Some(Err(error)),
        item = output.next() => item,
      };

      match item {
        None => {
          log::debug!("{path} stream completed");
          return;
        },
        Some(Ok(response)) => {
          if responses.send(Ok(response)).await.is_err() {
            log::warn!("{path}: caller went away, dropping the remaining responses");
            return;
          }
        },
        Some(Err(e)) => {
          self.report(method, &e, call);
          if responses.send(Err(e)).await.is_err() {
            log::warn!("{path}: unable to deliver the call failure, caller went away");
          }
          return;
        },
      }
    }
  }

  fn report(&self, method: &DispatchMethod, error: &Error, call: &ServerCall) {
    for observer in &self.observers {
      observer(error, call, &method.info);
    }

    let path = method.descriptor.full_path();
    if let Some(warning) = error.warn_every_message()
      && let Some(suppressed) = method.warning_due(self.options.warn_interval)
    {
      if suppressed == 0 {
        log::warn!("{path} failed: {warning}");
      } else {
        log::warn!("{path} failed: {warning} ({suppressed} more since the last warning)");
      }
    } else {
      log::debug!("{path} failed: {error}");
    }
  }

  fn deliver(
    &self,
    method: &str,
    responder: oneshot::Sender<Result<Value>>,
    result: Result<Value>,
  ) {
    if responder.send(result).is_err() {
      log::warn!(
        "{}/{method}: unable to deliver the response, caller went away",
        self.service.full_name()
      );
    }
  }

  async fn send_error(&self, method: &str, responses: &mpsc::Sender<Result<Value>>, error: Error) {
    log::debug!("{}/{method} rejected: {error}", self.service.full_name());
    if responses.send(Err(error)).await.is_err() {
      log::warn!(
        "{}/{method}: unable to deliver the call failure, caller went away",
        self.service.full_name()
      );
    }
  }
}

// Merge the context carried in the payload with the inbound context and write the result back into
// the payload. Payload values win over inbound ones.
fn merge_context(
  kind: ContextKind,
  options: &ContextOptions,
  inbound: &ContextData,
  request: &mut Value,
) -> ContextData {
  let mut data = ContextData::from_payload(kind, request, options);
  data.merge_missing(inbound);
  data.attach_to_payload(request, options);
  data
}

// Run handler code, turning a panic into a call failure.
async fn guarded<T>(handler: impl Future<Output = Result<T>>) -> Result<T> {
  AssertUnwindSafe(handler)
    .catch_unwind()
    .await
    .unwrap_or_else(|panic| Err(Error::HandlerPanic(panic_message(panic.as_ref()))))
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
  panic
    .downcast_ref::<&str>()
    .map(ToString::to_string)
    .or_else(|| panic.downcast_ref::<String>().cloned())
    .unwrap_or_else(|| "unknown panic".to_string())
}
