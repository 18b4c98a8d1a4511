use std::sync::Arc;

use o11y_core::{Config, TagValue, Tags};
use serde_json::Value;

use crate::span::{names, SpanError, SpanHandle, SpanOptions};
use crate::tracer::Tracer;

/// `component` tag for spans opened through [`Spans::span`].
pub const DEFAULT_COMPONENT: &str = "o11y";
/// `span.kind` tag for spans opened through [`Spans::span`].
pub const DEFAULT_SPAN_KIND: &str = "internal";

/// Application-facing span operations.
#[derive(Clone)]
pub struct Spans {
    config: Arc<Config>,
    tracer: Arc<dyn Tracer>,
}

impl Spans {
    /// Span operations over `tracer`, gated by `config`.
    pub fn new(config: Arc<Config>, tracer: Arc<dyn Tracer>) -> Self {
        Self { config, tracer }
    }

    /// The innermost open span on the calling thread.
    pub fn current_span(&self) -> Option<SpanHandle> {
        self.tracer.active_span()
    }

    /// The first span this process opened for the active trace.
    pub fn root_span(&self) -> Option<SpanHandle> {
        self.tracer.active_root_span()
    }

    /// Tag the current span. No-op while disabled.
    pub fn span_tags(&self, tags: &Tags) {
        if !self.config.enabled() {
            return;
        }
        if let Some(span) = self.current_span() {
            span.set_tags(tags);
        }
    }

    /// Tag the process-local root span.
    ///
    /// Unlike [`Spans::span_tags`] this ignores the enabled gate. Kept that
    /// way for compatibility with existing callers; it is provisional and
    /// should be revisited before anything else depends on it.
    pub fn root_span_tags(&self, tags: &Tags) {
        if let Some(span) = self.root_span() {
            span.set_tags(tags);
        }
    }

    /// Mark both the current span and the root span as errored.
    pub fn error<E: std::error::Error + ?Sized>(&self, err: &E) {
        if !self.config.enabled() {
            return;
        }
        let detail = SpanError::from_error(err);
        let current = self.current_span();
        let root = self.root_span();

        if let Some(span) = &current {
            span.set_error(detail.clone());
        }
        if let Some(root) = root {
            let same = current.as_ref().is_some_and(|c| c.same_span(&root));
            if !same {
                root.set_error(detail);
            }
        }
    }

    /// Run `block` inside a new span.
    ///
    /// The span's service is always the resolved service name, and the
    /// default `component`/`span.kind`/`operation` tags are added under any
    /// tags the caller passed. The span is finished when `block` returns or
    /// unwinds; a panic marks it errored.
    pub fn span<R>(
        &self,
        name: &str,
        options: SpanOptions,
        block: impl FnOnce(&SpanHandle) -> R,
    ) -> R {
        let options = self.enrich_options(name, options);
        let handle = self.tracer.start_span(name, options);
        let guard = FinishOnDrop {
            tracer: self.tracer.as_ref(),
            span: handle,
        };
        block(&guard.span)
    }

    /// Apply the forced service and default tags to `options`.
    pub fn enrich_options(&self, name: &str, mut options: SpanOptions) -> SpanOptions {
        options.service = Some(self.config.service_name().to_string());

        let mut tags = default_span_tags(name);
        if let Some(user) = &options.tags {
            tags.overlay(user);
        }
        options.tags = Some(tags);
        options
    }
}

fn default_span_tags(operation: &str) -> Tags {
    Tags::new()
        .with(names::COMPONENT, DEFAULT_COMPONENT)
        .with(names::SPAN_KIND, DEFAULT_SPAN_KIND)
        .with(names::OPERATION, operation)
}

struct FinishOnDrop<'a> {
    tracer: &'a dyn Tracer,
    span: SpanHandle,
}

impl Drop for FinishOnDrop<'_> {
    fn drop(&mut self) {
        if std::thread::panicking() {
            self.span.set_error(SpanError {
                kind: "panic".to_string(),
                message: "span block panicked".to_string(),
                stack: None,
            });
        }
        self.tracer.finish_span(&self.span);
    }
}

/// Flatten a nested JSON object into dot-joined tag keys.
///
/// `{"order": {"id": 7, "items": {"count": 2}}}` becomes `order.id:7` and
/// `order.items.count:2`. Arrays are kept as their JSON text; nulls become
/// empty strings. A non-object input yields no tags.
pub fn flatten_for_span(value: &Value) -> Tags {
    let mut out = Tags::new();
    if let Value::Object(map) = value {
        for (key, child) in map {
            flatten_into(&mut out, key, child);
        }
    }
    out
}

fn flatten_into(out: &mut Tags, prefix: &str, value: &Value) {
    match value {
        Value::Object(map) => {
            for (key, child) in map {
                flatten_into(out, &format!("{prefix}.{key}"), child);
            }
        }
        Value::String(s) => out.insert(prefix, s.as_str()),
        Value::Number(n) => {
            let v = match (n.as_i64(), n.as_f64()) {
                (Some(i), _) => TagValue::Int(i),
                (None, Some(f)) => TagValue::Float(f),
                (None, None) => TagValue::Str(n.to_string()),
            };
            out.insert(prefix, v);
        }
        Value::Bool(b) => out.insert(prefix, *b),
        Value::Null => out.insert(prefix, ""),
        Value::Array(_) => out.insert(prefix, value.to_string()),
    }
}
