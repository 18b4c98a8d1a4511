use std::sync::{Arc, Mutex, MutexGuard, OnceLock};
use std::thread::{self, ThreadId};
use std::time::SystemTime;

use ahash::AHashMap;
use tracing::{debug, trace};

use crate::pipeline::SpanPipeline;
use crate::span::{generate_span_id, generate_trace_id, Span, SpanHandle, SpanOptions};

// ---------------------------------------------------------------------------
// Collaborator seams
// ---------------------------------------------------------------------------

/// Span lifetime management, as provided by a tracing SDK.
///
/// The *active span* is the innermost open span on the calling thread; the
/// *active root span* is the first span this process opened for the current
/// trace, which is not the trace's global root when the trace came in from
/// an upstream service.
pub trait Tracer: Send + Sync {
    fn start_span(&self, name: &str, options: SpanOptions) -> SpanHandle;
    fn finish_span(&self, span: &SpanHandle);
    fn active_span(&self) -> Option<SpanHandle>;
    fn active_root_span(&self) -> Option<SpanHandle>;
}

/// Receives finished traces after the pipeline has run.
pub trait SpanExporter: Send + Sync {
    fn export(&self, trace: Vec<Span>);
}

/// Writes each exported span as a `tracing` debug event.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogExporter;

impl SpanExporter for LogExporter {
    fn export(&self, trace: Vec<Span>) {
        for span in trace {
            debug!(
                trace_id = span.trace_id,
                span_id = span.span_id,
                parent_id = ?span.parent_id,
                name = %span.name,
                resource = %span.resource,
                service = %span.service,
                error = span.is_error(),
                duration_us = span.duration.map(|d| d.as_micros() as u64),
                "span exported"
            );
        }
    }
}

/// Pre-export hook installed once at tracing init.
pub struct ExportHook {
    pub pipeline: SpanPipeline,
    pub exporter: Arc<dyn SpanExporter>,
}

// ---------------------------------------------------------------------------
// LocalTracer
// ---------------------------------------------------------------------------

#[derive(Default)]
struct ThreadTrace {
    open: Vec<SpanHandle>,
    finished: Vec<Span>,
}

/// In-process tracer keeping one open-span stack per thread.
///
/// When the last open span on a thread finishes, the whole trace is passed
/// through the installed [`ExportHook`]. Without a hook, completed traces
/// are discarded.
pub struct LocalTracer {
    default_service: String,
    threads: Mutex<AHashMap<ThreadId, ThreadTrace>>,
    hook: OnceLock<ExportHook>,
    tasks: OnceLock<Vec<String>>,
}

impl LocalTracer {
    /// Tracer stamping `default_service` on spans started without one.
    pub fn new(default_service: impl Into<String>) -> Self {
        Self {
            default_service: default_service.into(),
            threads: Mutex::new(AHashMap::new()),
            hook: OnceLock::new(),
            tasks: OnceLock::new(),
        }
    }

    fn threads(&self) -> MutexGuard<'_, AHashMap<ThreadId, ThreadTrace>> {
        self.threads.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Install the export hook and the list of instrumented task names.
    /// Returns `false` if a hook was already installed; the first one stays.
    pub fn install(&self, hook: ExportHook, tasks: Vec<String>) -> bool {
        if self.hook.set(hook).is_err() {
            return false;
        }
        let _ = self.tasks.set(tasks);
        true
    }

    /// Whether an export hook has been installed.
    pub fn is_installed(&self) -> bool {
        self.hook.get().is_some()
    }

    /// Task names recorded at install time.
    pub fn instrumented_tasks(&self) -> &[String] {
        self.tasks.get().map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn is_task_instrumented(&self, task: &str) -> bool {
        self.instrumented_tasks().iter().any(|t| t == task)
    }

    /// Number of spans currently open on the calling thread.
    pub fn open_spans(&self) -> usize {
        self.threads()
            .get(&thread::current().id())
            .map(|t| t.open.len())
            .unwrap_or(0)
    }

    fn flush(&self, trace: Vec<Span>) {
        let Some(hook) = self.hook.get() else {
            trace!(spans = trace.len(), "no export hook installed, discarding trace");
            return;
        };
        let survivors = hook.pipeline.process(trace);
        if !survivors.is_empty() {
            hook.exporter.export(survivors);
        }
    }
}

impl Tracer for LocalTracer {
    fn start_span(&self, name: &str, options: SpanOptions) -> SpanHandle {
        let mut threads = self.threads();
        let local = threads.entry(thread::current().id()).or_default();

        let (trace_id, parent_id) = match local.open.last() {
            Some(parent) => {
                let ctx = parent.context();
                (ctx.trace_id, Some(ctx.span_id))
            }
            None => match options.child_of {
                Some(upstream) => (upstream.trace_id, Some(upstream.span_id)),
                None => (generate_trace_id(), None),
            },
        };

        let mut span = Span::new(name);
        span.trace_id = trace_id;
        span.span_id = generate_span_id();
        span.parent_id = parent_id;
        span.service = options
            .service
            .unwrap_or_else(|| self.default_service.clone());
        if let Some(resource) = options.resource {
            span.resource = resource;
        }
        if let Some(tags) = &options.tags {
            span.set_tags(tags);
        }

        let handle = SpanHandle::new(span);
        local.open.push(handle.clone());
        handle
    }

    fn finish_span(&self, span: &SpanHandle) {
        let completed = {
            let mut threads = self.threads();
            let id = thread::current().id();
            let Some(local) = threads.get_mut(&id) else {
                debug!("finish_span called on a thread with no open spans");
                return;
            };
            let Some(pos) = local.open.iter().position(|open| open.same_span(span)) else {
                debug!("finish_span called for a span not open on this thread");
                return;
            };
            let handle = local.open.remove(pos);
            let finished = handle.update(|s| {
                s.duration = Some(SystemTime::now().duration_since(s.start).unwrap_or_default());
                s.clone()
            });
            local.finished.push(finished);

            if local.open.is_empty() {
                threads.remove(&id).map(|t| t.finished)
            } else {
                None
            }
        };

        if let Some(trace) = completed {
            self.flush(trace);
        }
    }

    fn active_span(&self) -> Option<SpanHandle> {
        self.threads()
            .get(&thread::current().id())
            .and_then(|t| t.open.last().cloned())
    }

    fn active_root_span(&self) -> Option<SpanHandle> {
        self.threads()
            .get(&thread::current().id())
            .and_then(|t| t.open.first().cloned())
    }
}
