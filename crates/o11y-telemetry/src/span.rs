use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, SystemTime};

use o11y_core::{TagValue, Tags};
use uuid::Uuid;

/// Span names and tag keys the enrichment and pipeline stages rely on.
pub mod names {
    /// Span emitted for every inbound HTTP request.
    pub const INBOUND_REQUEST: &str = "rack.request";

    pub const HTTP_URL: &str = "http.url";
    pub const HTTP_METHOD: &str = "http.method";
    pub const PEER_HOSTNAME: &str = "peer.hostname";
    pub const COMPONENT: &str = "component";
    pub const SPAN_KIND: &str = "span.kind";
    pub const OPERATION: &str = "operation";
    pub const ERROR_TYPE: &str = "error.type";
    pub const ERROR_MESSAGE: &str = "error.message";
    pub const ERROR_STACK: &str = "error.stack";
}

/// Generate a 64-bit trace id.
pub fn generate_trace_id() -> u64 {
    Uuid::new_v4().as_u64_pair().0
}

/// Generate a 64-bit span id, never zero.
pub fn generate_span_id() -> u64 {
    loop {
        let id = Uuid::new_v4().as_u64_pair().1;
        if id != 0 {
            return id;
        }
    }
}

/// Identifies a span in another process that a local trace continues.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SpanContext {
    pub trace_id: u64,
    pub span_id: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpanError {
    pub kind: String,
    pub message: String,
    pub stack: Option<String>,
}

impl SpanError {
    /// Capture an error's type name, message and cause chain.
    pub fn from_error<E: std::error::Error + ?Sized>(err: &E) -> Self {
        let mut causes = Vec::new();
        let mut source = err.source();
        while let Some(cause) = source {
            causes.push(cause.to_string());
            source = cause.source();
        }
        Self {
            kind: std::any::type_name::<E>().to_string(),
            message: err.to_string(),
            stack: (!causes.is_empty()).then(|| causes.join("\ncaused by: ")),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Span {
    pub trace_id: u64,
    pub span_id: u64,
    pub parent_id: Option<u64>,
    pub name: String,
    pub resource: String,
    pub service: String,
    pub tags: BTreeMap<String, String>,
    pub error: Option<SpanError>,
    pub start: SystemTime,
    pub duration: Option<Duration>,
}

impl Span {
    /// A detached span with fresh ids and `resource` equal to `name`.
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            trace_id: generate_trace_id(),
            span_id: generate_span_id(),
            parent_id: None,
            resource: name.clone(),
            name,
            service: String::new(),
            tags: BTreeMap::new(),
            error: None,
            start: SystemTime::now(),
            duration: None,
        }
    }

    /// Builder form of [`Span::set_tag`].
    pub fn with_tag(mut self, key: impl Into<String>, value: impl Into<TagValue>) -> Self {
        self.set_tag(key, value);
        self
    }

    /// Value of tag `key`, if set.
    pub fn tag(&self, key: &str) -> Option<&str> {
        self.tags.get(key).map(String::as_str)
    }

    /// Set one tag, replacing any existing value.
    pub fn set_tag(&mut self, key: impl Into<String>, value: impl Into<TagValue>) {
        self.tags.insert(key.into(), value.into().to_string());
    }

    /// Copy every tag from `tags` onto the span.
    pub fn set_tags(&mut self, tags: &Tags) {
        for (k, v) in tags.iter() {
            self.tags.insert(k.to_string(), v.to_string());
        }
    }

    /// Mark errored and mirror the detail into the `error.*` tags.
    pub fn set_error(&mut self, error: SpanError) {
        self.tags
            .insert(names::ERROR_TYPE.to_string(), error.kind.clone());
        self.tags
            .insert(names::ERROR_MESSAGE.to_string(), error.message.clone());
        if let Some(stack) = &error.stack {
            self.tags
                .insert(names::ERROR_STACK.to_string(), stack.clone());
        }
        self.error = Some(error);
    }

    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }

    /// Ids a child span or downstream service continues from.
    pub fn context(&self) -> SpanContext {
        SpanContext {
            trace_id: self.trace_id,
            span_id: self.span_id,
        }
    }
}

/// Options for starting a span.
#[derive(Debug, Clone, Default)]
pub struct SpanOptions {
    pub service: Option<String>,
    pub resource: Option<String>,
    pub tags: Option<Tags>,
    /// Continue a trace that started in another process.
    pub child_of: Option<SpanContext>,
}

impl SpanOptions {
    /// Resource name to use instead of the span name.
    pub fn with_resource(mut self, resource: impl Into<String>) -> Self {
        self.resource = Some(resource.into());
        self
    }

    /// Tags to set when the span starts.
    pub fn with_tags(mut self, tags: Tags) -> Self {
        self.tags = Some(tags);
        self
    }

    /// Continue the trace of an upstream span.
    pub fn child_of(mut self, parent: SpanContext) -> Self {
        self.child_of = Some(parent);
        self
    }
}

/// Shared handle to a live span.
#[derive(Debug, Clone)]
pub struct SpanHandle(Arc<Mutex<Span>>);

impl SpanHandle {
    /// Wrap a span for sharing between the tracer and application code.
    pub fn new(span: Span) -> Self {
        Self(Arc::new(Mutex::new(span)))
    }

    fn lock(&self) -> MutexGuard<'_, Span> {
        self.0.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// See [`Span::set_tag`].
    pub fn set_tag(&self, key: impl Into<String>, value: impl Into<TagValue>) {
        self.lock().set_tag(key, value);
    }

    /// See [`Span::set_tags`].
    pub fn set_tags(&self, tags: &Tags) {
        self.lock().set_tags(tags);
    }

    /// See [`Span::set_error`].
    pub fn set_error(&self, error: SpanError) {
        self.lock().set_error(error);
    }

    /// Owned copy of tag `key`.
    pub fn tag(&self, key: &str) -> Option<String> {
        self.lock().tag(key).map(str::to_string)
    }

    /// Run `f` with the span locked.
    pub fn update<R>(&self, f: impl FnOnce(&mut Span) -> R) -> R {
        f(&mut self.lock())
    }

    /// Clone of the span's current state.
    pub fn snapshot(&self) -> Span {
        self.lock().clone()
    }

    pub fn context(&self) -> SpanContext {
        self.lock().context()
    }

    /// Whether both handles point at the same span.
    pub fn same_span(&self, other: &SpanHandle) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, thiserror::Error)]
    #[error("connection refused")]
    struct Refused;

    #[derive(Debug, thiserror::Error)]
    #[error("charge failed")]
    struct ChargeFailed(#[source] Refused);

    #[test]
    fn test_ids_nonzero() {
        for _ in 0..100 {
            assert_ne!(generate_span_id(), 0);
        }
    }

    #[test]
    fn test_span_error_captures_chain() {
        let err = ChargeFailed(Refused);
        let captured = SpanError::from_error(&err);
        assert!(captured.kind.ends_with("ChargeFailed"));
        assert_eq!(captured.message, "charge failed");
        assert_eq!(captured.stack.as_deref(), Some("connection refused"));
    }

    #[test]
    fn test_set_error_mirrors_tags() {
        let mut span = Span::new("job");
        span.set_error(SpanError::from_error(&Refused));
        assert!(span.is_error());
        assert_eq!(span.tag(names::ERROR_MESSAGE), Some("connection refused"));
        assert!(span.tag(names::ERROR_STACK).is_none());
    }

    #[test]
    fn test_handle_shares_state() {
        let handle = SpanHandle::new(Span::new("op"));
        let other = handle.clone();
        other.set_tag("merchant", "m_1");
        assert_eq!(handle.tag("merchant").as_deref(), Some("m_1"));
        assert!(handle.same_span(&other));
        assert!(!handle.same_span(&SpanHandle::new(Span::new("op"))));
    }
}
