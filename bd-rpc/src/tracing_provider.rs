// shared-core - bitdrift's common client/server libraries
// Copyright Bitdrift, Inc. All rights reserved.
//
// Use of this source code is governed by a source available license that can be found in the
// LICENSE file or at:
// https://polyformproject.org/wp-content/uploads/2020/06/PolyForm-Shield-1.0.0.txt

#[cfg(test)]
#[path = "./tracing_provider_test.rs"]
mod tracing_provider_test;

use http::{HeaderMap, HeaderValue};

pub const TRACEPARENT: &str = "traceparent";

//
// SpanContext
//

// The propagated identity of a span. This is never written into a message payload.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SpanContext {
  pub trace_id: u128,
  pub span_id: u64,
  pub sampled: bool,
}

impl SpanContext {
  // Format as a W3C trace context `traceparent` header value.
  #[must_use]
  pub fn to_traceparent(&self) -> String {
    format!(
      "00-{:032x}-{:016x}-{:02x}",
      self.trace_id,
      self.span_id,
      u8::from(self.sampled)
    )
  }

  #[must_use]
  pub fn from_traceparent(value: &str) -> Option<Self> {
    let mut parts = value.trim().split('-');
    let version = parts.next()?;
    let trace_id = parts.next()?;
    let span_id = parts.next()?;
    let flags = parts.next()?;
    if version != "00" || trace_id.len() != 32 || span_id.len() != 16 || flags.len() != 2 {
      return None;
    }

    let trace_id = u128::from_str_radix(trace_id, 16).ok()?;
    let span_id = u64::from_str_radix(span_id, 16).ok()?;
    let flags = u8::from_str_radix(flags, 16).ok()?;
    if trace_id == 0 || span_id == 0 {
      return None;
    }

    Some(Self {
      trace_id,
      span_id,
      sampled: flags & 0x1 != 0,
    })
  }
}

//
// TracingProvider
//

// Distributed tracing capability injected into clients and dispatchers.
pub trait TracingProvider: Send + Sync {
  // Start a span, optionally as a child of a parent. Returns None if tracing is disabled.
  fn start_span(&self, name: &str, parent: Option<&SpanContext>) -> Option<SpanContext>;

  // Write the span into outbound metadata.
  fn inject(&self, span: &SpanContext, metadata: &mut HeaderMap);

  // Read a remote parent span from inbound metadata.
  fn extract(&self, metadata: &HeaderMap) -> Option<SpanContext>;
}

//
// NoopTracing
//

#[derive(Clone, Copy, Debug, Default)]
pub struct NoopTracing;

impl TracingProvider for NoopTracing {
  fn start_span(&self, _name: &str, _parent: Option<&SpanContext>) -> Option<SpanContext> {
    None
  }

  fn inject(&self, _span: &SpanContext, _metadata: &mut HeaderMap) {}

  fn extract(&self, _metadata: &HeaderMap) -> Option<SpanContext> {
    None
  }
}

//
// TraceContextTracing
//

// Propagates spans using the W3C `traceparent` header.
#[derive(Clone, Copy, Debug, Default)]
pub struct TraceContextTracing;

impl TracingProvider for TraceContextTracing {
  fn start_span(&self, name: &str, parent: Option<&SpanContext>) -> Option<SpanContext> {
    let span = SpanContext {
      trace_id: parent.map_or_else(|| rand::random::<u128>().max(1), |p| p.trace_id),
      span_id: rand::random::<u64>().max(1),
      sampled: parent.is_none_or(|p| p.sampled),
    };
    log::trace!("starting span {name}: {}", span.to_traceparent());
    Some(span)
  }

  fn inject(&self, span: &SpanContext, metadata: &mut HeaderMap) {
    if let Ok(value) = HeaderValue::from_str(&span.to_traceparent()) {
      metadata.insert(TRACEPARENT, value);
    }
  }

  fn extract(&self, metadata: &HeaderMap) -> Option<SpanContext> {
    metadata
      .get(TRACEPARENT)
      .and_then(|value| value.to_str().ok())
      .and_then(SpanContext::from_traceparent)
  }
}
