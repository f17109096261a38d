// shared-core - bitdrift's common client/server libraries
// Copyright Bitdrift, Inc. All rights reserved.
//
// Use of this source code is governed by a source available license that can be found in the
// LICENSE file or at:
// https://polyformproject.org/wp-content/uploads/2020/06/PolyForm-Shield-1.0.0.txt

#[cfg(test)]
#[path = "./client_test.rs"]
mod client_test;

use crate::cancellation::{CancelOnDrop, Cancellation, CancellationHandle, cancellation};
use crate::context::{APPLICATION_ID, ContextData, ContextKind};
use crate::options::ClientOptions;
use crate::pipeline::{RequestSink, ResponseStream, ValueStream, build_pipeline};
use crate::retry::{RetryPolicy, with_retry};
use crate::status::{Code, Status};
use crate::tracing_provider::{NoopTracing, SpanContext, TracingProvider};
use crate::transform::{Transform, TransformPair, TransformRegistry, apply_chain};
use crate::transport::{Channel, Connector, Credentials, OutboundCall};
use crate::{Error, Result};
use bd_rpc_value::{CallShape, MethodDescriptor, ServiceDescriptor, Value};
use futures::future::BoxFuture;
use futures::{FutureExt, Stream, StreamExt};
use http::HeaderMap;
use std::collections::HashMap;
use std::future::Future;
use std::panic::Location;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_stream::wrappers::ReceiverStream;

//
// CallOptions
//

#[derive(Clone, Debug, Default)]
pub struct CallOptions {
  // Sent as is, alongside any context metadata.
  pub metadata: HeaderMap,
  // Context to send with the call. Values in a request payload's own context take precedence.
  pub context: Option<ContextData>,
  pub parent_span: Option<SpanContext>,
}

//
// Request
//

#[derive(Clone, Debug)]
pub struct Request {
  pub payload: Value,
  pub options: CallOptions,
}

impl Request {
  #[must_use]
  pub fn new(payload: impl Into<Value>) -> Self {
    Self {
      payload: payload.into(),
      options: CallOptions::default(),
    }
  }

  #[must_use]
  pub fn with_options(mut self, options: CallOptions) -> Self {
    self.options = options;
    self
  }
}

impl From<Value> for Request {
  fn from(payload: Value) -> Self {
    Self::new(payload)
  }
}

//
// ClientMethod
//

struct ClientMethod {
  descriptor: Arc<MethodDescriptor>,
  request_transforms: Arc<[Transform]>,
  response_transforms: Arc<[Transform]>,
  context_kind: Option<ContextKind>,
}

// One caller per method, fixed by the method's cardinality.
#[derive(Clone)]
enum Caller {
  Unary(Arc<ClientMethod>),
  ServerStreaming(Arc<ClientMethod>),
  ClientStreaming(Arc<ClientMethod>),
  Streaming(Arc<ClientMethod>),
}

impl Caller {
  fn new(method: ClientMethod) -> Self {
    let shape = method.descriptor.shape();
    let method = Arc::new(method);
    match shape {
      CallShape::Unary => Self::Unary(method),
      CallShape::ServerStreaming => Self::ServerStreaming(method),
      CallShape::ClientStreaming => Self::ClientStreaming(method),
      CallShape::Streaming => Self::Streaming(method),
    }
  }

  const fn shape(&self) -> CallShape {
    match self {
      Self::Unary(_) => CallShape::Unary,
      Self::ServerStreaming(_) => CallShape::ServerStreaming,
      Self::ClientStreaming(_) => CallShape::ClientStreaming,
      Self::Streaming(_) => CallShape::Streaming,
    }
  }

  fn as_shape(&self, shape: CallShape) -> Result<Arc<ClientMethod>> {
    let (Self::Unary(method)
    | Self::ServerStreaming(method)
    | Self::ClientStreaming(method)
    | Self::Streaming(method)) = self;
    if self.shape() != shape {
      return Err(Error::ShapeMismatch {
        method: method.descriptor.full_name(),
        expected: self.shape(),
        actual: shape,
      });
    }
    Ok(method.clone())
  }
}

//
// ClientConstructor
//

// Wraps every method of a service once. Clients for particular addresses are then produced from
// the shared method table.
#[derive(Clone)]
pub struct ClientConstructor {
  service: Arc<ServiceDescriptor>,
  methods: Arc<HashMap<String, Caller>>,
  options: ClientOptions,
  tracing: Arc<dyn TracingProvider>,
}

impl ClientConstructor {
  #[must_use]
  pub fn new(
    service: Arc<ServiceDescriptor>,
    transforms: &[TransformPair],
    options: ClientOptions,
  ) -> Self {
    let mut registry = TransformRegistry::new(transforms);
    let mut methods = HashMap::new();
    for descriptor in service.methods() {
      let full_name = descriptor.full_name();
      registry.register(
        &full_name,
        descriptor.request_type(),
        descriptor.response_type(),
      );
      let caller = Caller::new(ClientMethod {
        descriptor: descriptor.clone(),
        request_transforms: registry.request_transforms_for(&full_name),
        response_transforms: registry.response_transforms_for(&full_name),
        context_kind: ContextKind::detect(descriptor.request_type(), &options.context),
      });
      methods.insert(descriptor.generated_name(), caller.clone());
      methods.insert(descriptor.name().to_string(), caller);
    }

    Self {
      service,
      methods: Arc::new(methods),
      options,
      tracing: Arc::new(NoopTracing),
    }
  }

  #[must_use]
  pub fn with_tracing(mut self, tracing: Arc<dyn TracingProvider>) -> Self {
    self.tracing = tracing;
    self
  }

  // Connect to an address. Options given here replace the constructor's options for this client.
  pub async fn connect(
    &self,
    connector: &dyn Connector,
    address: &str,
    credentials: Credentials,
    options: Option<ClientOptions>,
  ) -> Result<ServiceClient> {
    let channel = connector.connect(address, &credentials).await?;
    Ok(self.with_channel(channel, options))
  }

  #[must_use]
  pub fn with_channel(
    &self,
    channel: Arc<dyn Channel>,
    options: Option<ClientOptions>,
  ) -> ServiceClient {
    let options = options.unwrap_or_else(|| self.options.clone());
    ServiceClient {
      service: self.service.clone(),
      methods: self.methods.clone(),
      channel,
      retry: Arc::new(RetryPolicy::from_options(&options)),
      options: Arc::new(options),
      tracing: self.tracing.clone(),
    }
  }
}

//
// ServiceClient
//

// Client for one service on one channel. Methods are addressed by proto name (`SayHello`) or
// generated name (`sayHello`). Failures carry the fully qualified method name and the location the
// call was made from.
#[derive(Clone)]
pub struct ServiceClient {
  service: Arc<ServiceDescriptor>,
  methods: Arc<HashMap<String, Caller>>,
  channel: Arc<dyn Channel>,
  options: Arc<ClientOptions>,
  retry: Arc<RetryPolicy>,
  tracing: Arc<dyn TracingProvider>,
}

impl ServiceClient {
  #[must_use]
  pub const fn service(&self) -> &Arc<ServiceDescriptor> {
    &self.service
  }

  #[must_use]
  pub fn options(&self) -> &ClientOptions {
    &self.options
  }

  #[track_caller]
  pub fn unary(
    &self,
    method: &str,
    request: impl Into<Request>,
  ) -> BoxFuture<'static, Result<Value>> {
    let call_site = Location::caller();
    let full_name = self.full_name(method);
    let client = self.clone();
    let method = method.to_string();
    let request = request.into();
    async move {
      client
        .run_unary(&method, request)
        .await
        .map_err(|e| e.with_call_context(&full_name, call_site))
    }
    .boxed()
  }

  // The returned stream carries call failures as its final item.
  #[track_caller]
  pub fn server_streaming(&self, method: &str, request: impl Into<Request>) -> ValueStream {
    let call_site = Location::caller();
    let full_name = self.full_name(method);
    let client = self.clone();
    let method = method.to_string();
    let request = request.into();
    futures::stream::once(async move { client.start_server_streaming(&method, request).await })
      .flat_map(|started| match started {
        Ok(responses) => responses,
        Err(e) => futures::stream::once(async move { Err(e) }).boxed(),
      })
      .map(move |item| item.map_err(|e| e.with_call_context(&full_name, call_site)))
      .boxed()
  }

  #[track_caller]
  pub fn client_streaming(
    &self,
    method: &str,
    options: CallOptions,
  ) -> Result<ClientStreamingCall> {
    let call_site = Location::caller();
    let full_name = self.full_name(method);
    let method = self
      .caller(method, CallShape::ClientStreaming)
      .map_err(|e| e.with_call_context(&full_name, call_site))?;

    let (handle, token) = cancellation();
    let (sink, requests, relayed) =
      RequestSink::new(method.request_transforms.clone(), handle.clone());
    let call = OutboundCall {
      method: method.descriptor.clone(),
      metadata: self.outbound_metadata(&method, None, options),
      cancellation: token.clone(),
    };
    let channel = self.channel.clone();
    let task = tokio::spawn(async move { channel.client_streaming(call, requests).await });

    let response_transforms = method.response_transforms.clone();
    let response_name = full_name.clone();
    let response = async move {
      client_streaming_response(relayed, token, task, &response_transforms)
        .await
        .map_err(|e| e.with_call_context(&response_name, call_site))
    }
    .boxed();

    Ok(ClientStreamingCall {
      sink,
      response,
      guard: handle.clone().cancel_on_drop(),
      cancel: handle,
      method: full_name,
      call_site,
    })
  }

  #[track_caller]
  pub fn streaming(&self, method: &str, options: CallOptions) -> Result<StreamingCall> {
    let call_site = Location::caller();
    let full_name = self.full_name(method);
    let method = self
      .caller(method, CallShape::Streaming)
      .map_err(|e| e.with_call_context(&full_name, call_site))?;

    let (handle, token) = cancellation();
    let (sink, requests, relayed) =
      RequestSink::new(method.request_transforms.clone(), handle.clone());
    let call = OutboundCall {
      method: method.descriptor.clone(),
      metadata: self.outbound_metadata(&method, None, options),
      cancellation: token.clone(),
    };

    let channel = self.channel.clone();
    let cancelled = token.clone();
    let (tx, rx) = mpsc::channel(1);
    tokio::spawn(async move {
      let forward = async {
        match channel.streaming(call, requests).await {
          Ok(mut responses) => {
            while let Some(response) = responses.next().await {
              if tx.send(response).await.is_err() {
                break;
              }
            }
          },
          Err(e) => {
            let _ignored = tx.send(Err(e)).await;
          },
        }
      };
      tokio::select! {
        biased;
        () = forward => {},
        () = cancelled.cancelled() => log::debug!("streaming call cancelled"),
      }
    });

    let responses = ResponseStream::new(
      build_pipeline(ReceiverStream::new(rx).boxed(), &method.response_transforms),
      Some(relayed),
      token,
    )
    .cancel_on_drop(handle.clone());

    Ok(StreamingCall {
      sink,
      responses,
      cancel: handle,
      method: full_name,
      call_site,
    })
  }

  async fn run_unary(&self, name: &str, request: Request) -> Result<Value> {
    let method = self.caller(name, CallShape::Unary)?;
    let payload = apply_chain(&method.request_transforms, request.payload)?;
    let metadata = self.outbound_metadata(&method, Some(&payload), request.options);

    // Transforms run once; only the transport call is repeated.
    let response = with_retry(&self.retry, &method.descriptor.full_name(), || {
      let (handle, token) = cancellation();
      let mut guard = handle.cancel_on_drop();
      let call = OutboundCall {
        method: method.descriptor.clone(),
        metadata: metadata.clone(),
        cancellation: token,
      };
      let channel = self.channel.clone();
      let payload = payload.clone();
      async move {
        let result = channel.unary(call, payload).await;
        guard.disarm();
        result
      }
    })
    .await?;

    apply_chain(&method.response_transforms, response)
  }

  async fn start_server_streaming(&self, name: &str, request: Request) -> Result<ValueStream> {
    let method = self.caller(name, CallShape::ServerStreaming)?;
    let payload = apply_chain(&method.request_transforms, request.payload)?;
    let metadata = self.outbound_metadata(&method, Some(&payload), request.options);

    let (handle, token) = cancellation();
    let call = OutboundCall {
      method: method.descriptor.clone(),
      metadata,
      cancellation: token.clone(),
    };
    let responses = self.channel.server_streaming(call, payload).await?;
    Ok(
      ResponseStream::new(
        build_pipeline(responses, &method.response_transforms),
        None,
        token,
      )
      .cancel_on_drop(handle)
      .boxed(),
    )
  }

  fn caller(&self, name: &str, shape: CallShape) -> Result<Arc<ClientMethod>> {
    self
      .methods
      .get(name)
      .ok_or_else(|| Error::UnknownMethod(self.full_name(name)))?
      .as_shape(shape)
  }

  fn full_name(&self, method: &str) -> String {
    self.service.method(method).map_or_else(
      || format!("{}.{method}", self.service.full_name()),
      |m| m.full_name(),
    )
  }

  // Flatten the call context into metadata and inject the call span.
  fn outbound_metadata(
    &self,
    method: &ClientMethod,
    payload: Option<&Value>,
    options: CallOptions,
  ) -> HeaderMap {
    let CallOptions {
      mut metadata,
      context,
      parent_span,
    } = options;

    if let Some(context) = self.outbound_context(method, payload, context) {
      context.write_metadata(&self.options.context, &mut metadata);
    }
    if let Some(span) = self
      .tracing
      .start_span(&method.descriptor.full_name(), parent_span.as_ref())
    {
      self.tracing.inject(&span, &mut metadata);
    }
    metadata
  }

  fn outbound_context(
    &self,
    method: &ClientMethod,
    payload: Option<&Value>,
    explicit: Option<ContextData>,
  ) -> Option<ContextData> {
    let from_payload = match (method.context_kind, payload) {
      (Some(kind), Some(payload)) => Some(ContextData::from_payload(
        kind,
        payload,
        &self.options.context,
      )),
      _ => None,
    };
    let mut data = match (from_payload, explicit) {
      (Some(mut data), Some(explicit)) => {
        data.merge_missing(&explicit);
        data
      },
      (data, explicit) => data.or(explicit)?,
    };

    if let Some(application_id) = &self.options.application_id {
      data.set_if_absent(APPLICATION_ID, application_id.as_str().into());
    }
    Some(data)
  }
}

// Relayed request failures take precedence over cancellation, which takes precedence over the
// transport result.
async fn client_streaming_response(
  relayed: oneshot::Receiver<Error>,
  cancellation: Cancellation,
  task: JoinHandle<Result<Value>>,
  response_transforms: &[Transform],
) -> Result<Value> {
  let response = tokio::select! {
    biased;
    Ok(error) = relayed => Err(error),
    () = cancellation.cancelled() => {
      log::debug!("client streaming call cancelled");
      Err(Error::Cancelled)
    },
    joined = task => joined
      .unwrap_or_else(|e| Err(Status::new(Code::Internal, e.to_string()).into())),
  }?;
  apply_chain(response_transforms, response)
}

//
// ClientStreamingCall
//

// A client streaming call. Write requests, close, then await the call for the single response.
// Dropping the call before it has resolved cancels it.
pub struct ClientStreamingCall {
  sink: RequestSink,
  response: BoxFuture<'static, Result<Value>>,
  guard: CancelOnDrop,
  cancel: CancellationHandle,
  method: String,
  call_site: &'static Location<'static>,
}

impl ClientStreamingCall {
  pub async fn send(&mut self, request: impl Into<Value>) -> Result<()> {
    self
      .sink
      .send(request)
      .await
      .map_err(|e| e.with_call_context(&self.method, self.call_site))
  }

  // Signal the end of the requests.
  pub fn close(&mut self) {
    self.sink.close();
  }

  pub fn cancel(&self) {
    self.cancel.cancel();
  }

  #[must_use]
  pub fn is_cancelled(&self) -> bool {
    self.cancel.is_cancelled()
  }

  #[must_use]
  pub fn split(mut self) -> (RequestSink, BoxFuture<'static, Result<Value>>) {
    self.guard.disarm();
    (self.sink, self.response)
  }
}

impl Future for ClientStreamingCall {
  type Output = Result<Value>;

  fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
    let this = self.get_mut();
    let result = futures::ready!(this.response.poll_unpin(cx));
    this.guard.disarm();
    Poll::Ready(result)
  }
}

//
// StreamingCall
//

// A bidi call. Closing the write side leaves the read side open; cancelling ends both.
pub struct StreamingCall {
  sink: RequestSink,
  responses: ResponseStream,
  cancel: CancellationHandle,
  method: String,
  call_site: &'static Location<'static>,
}

impl StreamingCall {
  pub async fn send(&mut self, request: impl Into<Value>) -> Result<()> {
    self
      .sink
      .send(request)
      .await
      .map_err(|e| e.with_call_context(&self.method, self.call_site))
  }

  pub fn close(&mut self) {
    self.sink.close();
  }

  pub fn cancel(&self) {
    self.cancel.cancel();
  }

  #[must_use]
  pub fn is_cancelled(&self) -> bool {
    self.cancel.is_cancelled()
  }

  #[must_use]
  pub fn split(self) -> (RequestSink, ResponseStream) {
    (self.sink, self.responses)
  }
}

impl Stream for StreamingCall {
  type Item = Result<Value>;

  fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
    let this = self.get_mut();
    this.responses.poll_next_unpin(cx).map(|item| {
      item.map(|result| result.map_err(|e| e.with_call_context(&this.method, this.call_site)))
    })
  }
}
