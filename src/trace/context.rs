//! Integration between [`Context`] and the active span.

use crate::trace::{Span, SpanContext, Status};
use crate::{tel_debug, Context, KeyValue};
use std::borrow::Cow;
use std::fmt;
use std::sync::{Mutex, OnceLock};
use std::time::SystemTime;

// Returned by `cx.span()` when the context holds no span.
static NOOP_SPAN: OnceLock<SynchronizedSpan> = OnceLock::new();

/// A reference to the currently active span in this context, synchronized so
/// multiple holders of the same context can record against it.
pub(crate) struct SynchronizedSpan {
    /// Immutable span context
    span_context: SpanContext,
    /// Mutable span inner that requires synchronization, `None` for
    /// non-recording spans.
    inner: Option<Mutex<Span>>,
}

impl SynchronizedSpan {
    fn noop() -> Self {
        SynchronizedSpan {
            span_context: SpanContext::NONE,
            inner: None,
        }
    }
}

impl From<Span> for SynchronizedSpan {
    fn from(span: Span) -> Self {
        SynchronizedSpan {
            span_context: *span.span_context(),
            inner: span.is_recording().then(|| Mutex::new(span)),
        }
    }
}

impl fmt::Debug for SynchronizedSpan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SynchronizedSpan")
            .field("span_context", &self.span_context)
            .finish()
    }
}

/// Methods for storing and retrieving the active span in a [`Context`].
pub trait TraceContextExt {
    /// Returns a clone of the current context with the included [`Span`].
    ///
    /// This is a more efficient form of `Context::current().with_span(span)`
    /// as it avoids the intermediate context clone.
    fn current_with_span(span: Span) -> Self;

    /// Returns a clone of this context with the included [`Span`].
    fn with_span(&self, span: Span) -> Self;

    /// Returns a reference to this context's span, or a no-op span reference
    /// if the context holds none.
    fn span(&self) -> SpanRef<'_>;

    /// Returns whether or not an active span has been set.
    fn has_active_span(&self) -> bool;
}

impl TraceContextExt for Context {
    fn current_with_span(span: Span) -> Self {
        Context::current_with_synchronized_span(span.into())
    }

    fn with_span(&self, span: Span) -> Self {
        self.with_synchronized_span(span.into())
    }

    fn span(&self) -> SpanRef<'_> {
        match self.span.as_ref() {
            Some(span) => SpanRef(span),
            None => SpanRef(NOOP_SPAN.get_or_init(SynchronizedSpan::noop)),
        }
    }

    fn has_active_span(&self) -> bool {
        self.span.is_some()
    }
}

/// A reference to the span active in a given [`Context`].
#[derive(Debug)]
pub struct SpanRef<'a>(&'a SynchronizedSpan);

impl SpanRef<'_> {
    fn with_inner_mut<F>(&self, f: F)
    where
        F: FnOnce(&mut Span),
    {
        if let Some(inner) = self.0.inner.as_ref() {
            match inner.lock() {
                Ok(mut locked) => f(&mut locked),
                Err(err) => {
                    tel_debug!(
                        name: "SpanRef.LockPoisoned",
                        error = format!("{err}")
                    );
                }
            }
        }
    }

    /// The [`SpanContext`] for the referenced span.
    pub fn span_context(&self) -> &SpanContext {
        &self.0.span_context
    }

    /// Returns `true` if the referenced span is still recording.
    pub fn is_recording(&self) -> bool {
        self.0
            .inner
            .as_ref()
            .and_then(|inner| inner.lock().ok().map(|span| span.is_recording()))
            .unwrap_or(false)
    }

    /// Sets a single attribute on the referenced span.
    pub fn set_attribute(&self, attribute: KeyValue) {
        self.with_inner_mut(|inner| inner.set_attribute(attribute))
    }

    /// Appends an event occurring now to the referenced span.
    pub fn add_event<T>(&self, name: T, attributes: Vec<KeyValue>)
    where
        T: Into<Cow<'static, str>>,
    {
        self.with_inner_mut(|inner| inner.add_event(name, attributes))
    }

    /// Appends an event with the given timestamp to the referenced span.
    pub fn add_event_with_timestamp<T>(
        &self,
        name: T,
        timestamp: SystemTime,
        attributes: Vec<KeyValue>,
    ) where
        T: Into<Cow<'static, str>>,
    {
        self.with_inner_mut(|inner| inner.add_event_with_timestamp(name, timestamp, attributes))
    }

    /// Sets the status of the referenced span.
    pub fn set_status(&self, status: Status) {
        self.with_inner_mut(|inner| inner.set_status(status))
    }

    /// Updates the name of the referenced span.
    pub fn update_name<T>(&self, new_name: T)
    where
        T: Into<Cow<'static, str>>,
    {
        self.with_inner_mut(|inner| inner.update_name(new_name))
    }

    /// Ends the referenced span.
    pub fn end(&self) {
        self.with_inner_mut(|inner| inner.end())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::trace::{InMemorySpanExporter, SimpleSpanProcessor, TracerProvider};

    #[test]
    fn empty_context_returns_noop_span() {
        let cx = Context::new();
        assert!(!cx.has_active_span());
        assert!(!cx.span().is_recording());
        assert_eq!(*cx.span().span_context(), SpanContext::NONE);
        // recording against the no-op span is harmless
        cx.span().add_event("ignored", vec![]);
        cx.span().set_status(Status::Ok);
    }

    #[test]
    fn span_ends_when_context_references_drop() {
        let exporter = InMemorySpanExporter::default();
        let provider = TracerProvider::builder()
            .with_span_processor(SimpleSpanProcessor::new(Box::new(exporter.clone())))
            .build();
        let tracer = provider.tracer("test");

        let cx = Context::current_with_span(tracer.start("held"));
        {
            let _guard = cx.clone().attach();
            Context::map_current(|current| {
                current.span().add_event("from ambient", vec![]);
            });
        }
        assert!(exporter.get_finished_spans().unwrap().is_empty());
        drop(cx);

        let spans = exporter.get_finished_spans().unwrap();
        assert_eq!(spans.len(), 1);
        assert_eq!(spans[0].events.len(), 1);
    }
}
