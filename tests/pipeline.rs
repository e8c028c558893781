//! End-to-end scenarios spanning the tracing and metrics pipelines.

use microtel::metrics::{InMemoryMetricsExporter, MeterProvider, MetricValue};
use microtel::trace::{
    BatchConfigBuilder, BatchSpanProcessor, InMemorySpanExporter, SpanData, SpanExporter, SpanId,
    TraceContextExt, TracerProvider,
};
use microtel::{Context, KeyValue, TelemetryError, TelemetryResult};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

fn batch_provider(exporter: InMemorySpanExporter) -> TracerProvider {
    TracerProvider::builder()
        .with_span_processor(
            BatchSpanProcessor::builder()
                .with_exporter(Box::new(exporter))
                .with_batch_config(
                    BatchConfigBuilder::default()
                        .with_scheduled_delay(Duration::from_secs(60))
                        .build(),
                )
                .build(),
        )
        .build()
}

#[test]
fn nested_spans_export_in_completion_order() {
    let exporter = InMemorySpanExporter::default();
    let provider = batch_provider(exporter.clone());
    let tracer = provider.tracer("requests");

    let mut a = tracer.start("handle-request");
    a.set_attribute(KeyValue::new("path", "/checkout"));
    let parent_cx = Context::current_with_span(a);
    let mut b = tracer.start_with_context("query-db", &parent_cx);
    b.add_event("row fetched", vec![]);
    b.end();
    parent_cx.span().end();
    drop(parent_cx);

    provider.force_flush().unwrap();
    let spans = exporter.get_finished_spans().unwrap();
    assert_eq!(spans.len(), 2);

    let (b, a): (&SpanData, &SpanData) = (&spans[0], &spans[1]);
    assert_eq!(b.name, "query-db");
    assert_eq!(a.name, "handle-request");
    assert_eq!(b.span_context.trace_id(), a.span_context.trace_id());
    assert_eq!(b.parent_span_id, a.span_context.span_id());
    assert_eq!(a.parent_span_id, SpanId::INVALID);
    assert_eq!(b.events.len(), 1);

    provider.shutdown().unwrap();
}

#[test]
fn spans_survive_until_shutdown_flushes_them() {
    let exporter = InMemorySpanExporter::default();
    let provider = batch_provider(exporter.clone());
    let tracer = provider.tracer("requests");

    for _ in 0..5 {
        tracer.in_span("buffered", |_cx| {});
    }
    // Nothing exported yet: the interval is a minute out and the batch
    // threshold has not been reached.
    assert!(exporter.get_finished_spans().unwrap().is_empty());

    provider.shutdown().unwrap();
    assert_eq!(exporter.get_finished_spans().unwrap().len(), 5);
}

#[derive(Clone, Debug, Default)]
struct FlakySink {
    calls: Arc<AtomicUsize>,
}

impl SpanExporter for FlakySink {
    fn export(&mut self, _batch: Vec<SpanData>) -> TelemetryResult {
        self.calls.fetch_add(1, Ordering::Relaxed);
        Err(TelemetryError::InternalFailure("connection refused".into()))
    }
}

#[test]
fn sink_failure_is_isolated_from_other_sinks() {
    let flaky = FlakySink::default();
    let calls = Arc::clone(&flaky.calls);
    let healthy = InMemorySpanExporter::default();
    let provider = TracerProvider::builder()
        .with_span_processor(
            BatchSpanProcessor::builder()
                .with_exporter(Box::new(flaky))
                .with_exporter(Box::new(healthy.clone()))
                .with_batch_config(
                    BatchConfigBuilder::default()
                        .with_scheduled_delay(Duration::from_secs(60))
                        .build(),
                )
                .build(),
        )
        .build();
    let tracer = provider.tracer("requests");

    tracer.in_span("first", |_cx| {});
    assert!(provider.force_flush().is_err());
    tracer.in_span("second", |_cx| {});
    assert!(provider.force_flush().is_err());

    // The healthy sink received every batch and the flaky one was retried on
    // new batches (but not on the failed one).
    assert_eq!(healthy.get_finished_spans().unwrap().len(), 2);
    assert_eq!(calls.load(Ordering::Relaxed), 2);
    let _ = provider.shutdown();
}

#[test]
fn counters_and_gauges_collect_together() {
    let exporter = InMemoryMetricsExporter::default();
    let provider = MeterProvider::builder()
        .with_exporter(Box::new(exporter.clone()))
        .with_callback_timeout(Duration::from_millis(500))
        .build();
    let meter = provider.meter();

    let sold = meter
        .counter("books_sold")
        .with_unit("{books}")
        .with_description("books sold through the store")
        .build();
    let _stock = meter
        .observable_gauge("stock_level", || Ok(120.0))
        .with_unit("{books}")
        .build();

    let workers: Vec<_> = (0..4)
        .map(|_| {
            let sold = sold.clone();
            thread::spawn(move || sold.add(2))
        })
        .collect();
    for worker in workers {
        worker.join().unwrap();
    }

    provider.force_flush().unwrap();
    provider.shutdown().unwrap();

    let batches = exporter.get_finished_metrics().unwrap();
    let tick = &batches[0];
    let sold_point = tick.iter().find(|p| p.name == "books_sold").unwrap();
    assert_eq!(sold_point.value, MetricValue::U64(8));
    assert_eq!(sold_point.unit.as_deref(), Some("{books}"));
    let stock_point = tick.iter().find(|p| p.name == "stock_level").unwrap();
    assert_eq!(stock_point.value, MetricValue::F64(120.0));
}

#[test]
fn telemetry_misuse_never_disturbs_business_results() {
    let exporter = InMemorySpanExporter::default();
    let provider = batch_provider(exporter.clone());
    let tracer = provider.tracer("requests");

    let answer = tracer.in_span("compute", |cx| {
        cx.span().end();
        cx.span().end(); // double end
        cx.span().set_attribute(KeyValue::new("late", true)); // after end
        21 * 2
    });
    assert_eq!(answer, 42);

    provider.force_flush().unwrap();
    let spans = exporter.get_finished_spans().unwrap();
    assert_eq!(spans.len(), 1);
    assert!(spans[0].attributes.is_empty());
    provider.shutdown().unwrap();
}
