use crate::trace::{ExportResult, SpanData, SpanExporter};
use std::sync::{Arc, Mutex};

/// An in-memory span exporter for testing and debugging.
///
/// Stores every exported span in a shared buffer that clones of the exporter
/// can inspect, so tests can hand one clone to a processor and keep another
/// for assertions.
///
/// # Example
///
/// ```
/// use microtel::trace::{InMemorySpanExporter, SimpleSpanProcessor, TracerProvider};
///
/// let exporter = InMemorySpanExporter::default();
/// let provider = TracerProvider::builder()
///     .with_span_processor(SimpleSpanProcessor::new(Box::new(exporter.clone())))
///     .build();
///
/// provider.tracer("test").in_span("work", |_cx| {});
/// provider.shutdown().unwrap();
///
/// for span in exporter.get_finished_spans().unwrap() {
///     println!("{}", span.name);
/// }
/// ```
#[derive(Clone, Debug, Default)]
pub struct InMemorySpanExporter {
    spans: Arc<Mutex<Vec<SpanData>>>,
}

/// Builder for [`InMemorySpanExporter`].
#[derive(Clone, Debug, Default)]
pub struct InMemorySpanExporterBuilder {
    _private: (),
}

impl InMemorySpanExporterBuilder {
    /// Creates a new instance of the builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a new instance of the exporter.
    pub fn build(&self) -> InMemorySpanExporter {
        InMemorySpanExporter::default()
    }
}

impl InMemorySpanExporter {
    /// Returns the finished spans exported so far, in export order.
    pub fn get_finished_spans(&self) -> crate::TelemetryResult<Vec<SpanData>> {
        Ok(self.spans.lock()?.clone())
    }

    /// Clears the collected spans.
    pub fn reset(&self) {
        if let Ok(mut spans) = self.spans.lock() {
            spans.clear();
        }
    }
}

impl SpanExporter for InMemorySpanExporter {
    fn export(&mut self, batch: Vec<SpanData>) -> ExportResult {
        self.spans.lock()?.extend(batch);
        Ok(())
    }
}
