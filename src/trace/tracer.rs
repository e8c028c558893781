//! The interface for starting spans.

use crate::trace::span::merge_attribute;
use crate::trace::{
    SamplingDecision, Span, SpanContext, SpanData, SpanId, SpanKind, Status, TraceContextExt,
    TraceFlags, TracerProvider,
};
use crate::{Context, KeyValue};
use std::borrow::Cow;
use std::fmt;
use std::time::SystemTime;

/// Creates [`Span`]s for a named instrumentation scope.
///
/// Tracers are cheap to clone and are obtained from
/// [`TracerProvider::tracer`]. Each span they start resolves its parent from
/// the ambient [`Context`] unless an explicit parent context is given.
#[derive(Clone)]
pub struct Tracer {
    name: Cow<'static, str>,
    provider: TracerProvider,
}

impl fmt::Debug for Tracer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Tracer").field("name", &self.name).finish()
    }
}

impl Tracer {
    pub(crate) fn new(name: Cow<'static, str>, provider: TracerProvider) -> Self {
        Tracer { name, provider }
    }

    /// The name this tracer was created under.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn provider(&self) -> &TracerProvider {
        &self.provider
    }

    /// Creates a span builder for a span with the given name.
    pub fn span_builder<T>(&self, name: T) -> SpanBuilder
    where
        T: Into<Cow<'static, str>>,
    {
        SpanBuilder::from_name(name)
    }

    /// Starts a new [`Span`], parented to the current ambient context.
    pub fn start<T>(&self, name: T) -> Span
    where
        T: Into<Cow<'static, str>>,
    {
        Context::map_current(|cx| self.build_with_context(SpanBuilder::from_name(name), cx))
    }

    /// Starts a new [`Span`], parented to the given context.
    pub fn start_with_context<T>(&self, name: T, parent_cx: &Context) -> Span
    where
        T: Into<Cow<'static, str>>,
    {
        self.build_with_context(SpanBuilder::from_name(name), parent_cx)
    }

    /// Starts a span, runs `f` with that span active in the ambient context,
    /// and ends the span when `f` returns.
    ///
    /// Spans started inside `f` (on the same thread, or on futures driven
    /// with [`FutureExt::with_context`]) become children of this span without
    /// any handle being passed around. The span also ends if `f` unwinds.
    ///
    /// [`FutureExt::with_context`]: crate::FutureExt::with_context
    pub fn in_span<T, N, F>(&self, name: N, f: F) -> T
    where
        N: Into<Cow<'static, str>>,
        F: FnOnce(Context) -> T,
    {
        let span = self.start(name);
        let cx = Context::current_with_span(span);
        let _guard = cx.clone().attach();
        f(cx)
    }

    /// Builds a span from the given builder, resolving its parent, sampling
    /// decision, and identity.
    pub(crate) fn build_with_context(&self, mut builder: SpanBuilder, parent_cx: &Context) -> Span {
        if self.provider.is_shutdown() {
            return Span::new(SpanContext::NONE, None, self.clone());
        }
        let config = self.provider.config();

        // A valid parent supplies the trace id; a root span mints a new one.
        let parent_span_context = parent_cx
            .has_active_span()
            .then(|| *parent_cx.span().span_context())
            .filter(|sc| sc.is_valid());
        let (trace_id, parent_span_id) = match parent_span_context {
            Some(sc) => (sc.trace_id(), sc.span_id()),
            None => (config.id_generator.new_trace_id(), SpanId::INVALID),
        };

        let span_kind = builder.span_kind.take().unwrap_or(SpanKind::Internal);
        let mut attributes = Vec::new();
        for attribute in builder.attributes.drain(..) {
            merge_attribute(&mut attributes, attribute);
        }

        let decision = config.sampler.should_sample(
            Some(parent_cx),
            trace_id,
            &builder.name,
            &span_kind,
            &attributes,
        );
        let span_id = config.id_generator.new_span_id();

        match decision {
            SamplingDecision::Drop => {
                // Hand out real identity so descendants stay in the trace,
                // but record nothing.
                let span_context = SpanContext::new(trace_id, span_id, TraceFlags::default());
                Span::new(span_context, None, self.clone())
            }
            SamplingDecision::RecordAndSample => {
                let span_context = SpanContext::new(trace_id, span_id, TraceFlags::SAMPLED);
                let start_time = builder.start_time.unwrap_or_else(crate::time::now);
                let data = SpanData {
                    span_context,
                    parent_span_id,
                    span_kind,
                    name: builder.name,
                    start_time,
                    end_time: start_time,
                    attributes,
                    events: Vec::new(),
                    status: Status::default(),
                };
                Span::new(span_context, Some(data), self.clone())
            }
        }
    }
}

/// [`Span`] configuration prior to starting it.
///
/// ```
/// use microtel::trace::{SpanKind, TracerProvider};
/// use microtel::KeyValue;
///
/// let tracer = TracerProvider::default().tracer("checkout");
/// let span = tracer
///     .span_builder("charge-card")
///     .with_kind(SpanKind::Client)
///     .with_attributes([KeyValue::new("currency", "EUR")])
///     .start(&tracer);
/// drop(span);
/// ```
#[derive(Clone, Debug)]
pub struct SpanBuilder {
    /// Span name
    pub name: Cow<'static, str>,
    /// Span kind, [`SpanKind::Internal`] if unset.
    pub span_kind: Option<SpanKind>,
    /// Attributes the span starts with.
    pub attributes: Vec<KeyValue>,
    /// Span start time, the current time if unset.
    pub start_time: Option<SystemTime>,
}

impl SpanBuilder {
    /// Create a new span builder from a span name.
    pub fn from_name<T: Into<Cow<'static, str>>>(name: T) -> Self {
        SpanBuilder {
            name: name.into(),
            span_kind: None,
            attributes: Vec::new(),
            start_time: None,
        }
    }

    /// Specify the span kind.
    pub fn with_kind(self, span_kind: SpanKind) -> Self {
        SpanBuilder {
            span_kind: Some(span_kind),
            ..self
        }
    }

    /// Specify the attributes the span starts with. Duplicate keys collapse
    /// to the last value given.
    pub fn with_attributes<I>(self, attributes: I) -> Self
    where
        I: IntoIterator<Item = KeyValue>,
    {
        SpanBuilder {
            attributes: attributes.into_iter().collect(),
            ..self
        }
    }

    /// Specify an explicit start time.
    pub fn with_start_time(self, start_time: SystemTime) -> Self {
        SpanBuilder {
            start_time: Some(start_time),
            ..self
        }
    }

    /// Starts the span, parented to the ambient context.
    pub fn start(self, tracer: &Tracer) -> Span {
        Context::map_current(|cx| tracer.build_with_context(self, cx))
    }

    /// Starts the span, parented to the given context.
    pub fn start_with_context(self, tracer: &Tracer, parent_cx: &Context) -> Span {
        tracer.build_with_context(self, parent_cx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::trace::{InMemorySpanExporter, Sampler, SimpleSpanProcessor};

    fn test_provider() -> (TracerProvider, InMemorySpanExporter) {
        let exporter = InMemorySpanExporter::default();
        let provider = TracerProvider::builder()
            .with_span_processor(SimpleSpanProcessor::new(Box::new(exporter.clone())))
            .build();
        (provider, exporter)
    }

    #[test]
    fn in_span_nests_and_children_finish_first() {
        let (provider, exporter) = test_provider();
        let tracer = provider.tracer("test");

        tracer.in_span("parent", |_cx| {
            tracer.in_span("child", |_cx| {});
        });

        let spans = exporter.get_finished_spans().unwrap();
        assert_eq!(spans.len(), 2);
        let child = &spans[0];
        let parent = &spans[1];
        assert_eq!(child.name, "child");
        assert_eq!(parent.name, "parent");
        assert_eq!(
            child.span_context.trace_id(),
            parent.span_context.trace_id()
        );
        assert_eq!(child.parent_span_id, parent.span_context.span_id());
        assert_eq!(parent.parent_span_id, SpanId::INVALID);
    }

    #[test]
    fn siblings_share_a_trace() {
        let (provider, exporter) = test_provider();
        let tracer = provider.tracer("test");

        tracer.in_span("root", |_cx| {
            tracer.in_span("first", |_cx| {});
            tracer.in_span("second", |_cx| {});
        });

        let spans = exporter.get_finished_spans().unwrap();
        assert_eq!(spans.len(), 3);
        let root = spans.iter().find(|s| s.name == "root").unwrap();
        for name in ["first", "second"] {
            let span = spans.iter().find(|s| s.name == name).unwrap();
            assert_eq!(
                span.span_context.trace_id(),
                root.span_context.trace_id()
            );
            assert_eq!(span.parent_span_id, root.span_context.span_id());
        }
    }

    #[test]
    fn explicit_parent_context_overrides_ambient() {
        let (provider, exporter) = test_provider();
        let tracer = provider.tracer("test");

        let parent_cx = Context::current_with_span(tracer.start("parent"));
        tracer.in_span("ambient", |_cx| {
            let child = tracer.start_with_context("linked", &parent_cx);
            drop(child);
        });
        drop(parent_cx);

        let spans = exporter.get_finished_spans().unwrap();
        let linked = spans.iter().find(|s| s.name == "linked").unwrap();
        let parent = spans.iter().find(|s| s.name == "parent").unwrap();
        assert_eq!(linked.parent_span_id, parent.span_context.span_id());
    }

    #[test]
    fn builder_carries_kind_and_attributes() {
        let (provider, exporter) = test_provider();
        let tracer = provider.tracer("test");

        tracer
            .span_builder("outbound")
            .with_kind(SpanKind::Client)
            .with_attributes([
                KeyValue::new("peer", "db"),
                KeyValue::new("peer", "cache"),
            ])
            .start(&tracer)
            .end();

        let spans = exporter.get_finished_spans().unwrap();
        assert_eq!(spans[0].span_kind, SpanKind::Client);
        assert_eq!(spans[0].attributes.len(), 1);
    }

    #[test]
    fn concurrent_roots_mint_distinct_trace_ids() {
        let (provider, exporter) = test_provider();

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let tracer = provider.tracer("test");
                std::thread::spawn(move || tracer.in_span("root", |_cx| {}))
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let spans = exporter.get_finished_spans().unwrap();
        let mut trace_ids: Vec<_> = spans
            .iter()
            .map(|s| s.span_context.trace_id())
            .collect();
        assert_eq!(trace_ids.len(), 8);
        trace_ids.sort();
        trace_ids.dedup();
        assert_eq!(trace_ids.len(), 8);
    }

    #[test]
    fn always_off_sampler_drops_spans_but_keeps_identity() {
        let exporter = InMemorySpanExporter::default();
        let provider = TracerProvider::builder()
            .with_sampler(Sampler::AlwaysOff)
            .with_span_processor(SimpleSpanProcessor::new(Box::new(exporter.clone())))
            .build();
        let tracer = provider.tracer("test");

        let span = tracer.start("unsampled");
        assert!(!span.is_recording());
        assert!(span.span_context().is_valid());
        assert!(!span.span_context().is_sampled());
        drop(span);

        assert!(exporter.get_finished_spans().unwrap().is_empty());
    }
}
