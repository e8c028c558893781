//! Interfaces for sending finished spans out of the process.

use crate::trace::SpanData;
use crate::TelemetryResult;
use std::fmt;

/// The result of exporting a batch of spans.
pub type ExportResult = TelemetryResult;

/// Receives batches of finished spans from a span processor.
///
/// Exporters are driven from processor-owned threads, never from the thread
/// that ended a span, so a slow or failing exporter cannot stall application
/// code. A failed export only loses the spans in that batch; the processor
/// keeps running and keeps delivering to its other exporters.
pub trait SpanExporter: Send + fmt::Debug {
    /// Exports a batch of finished spans.
    ///
    /// Batches are never empty. Implementations should not retry internally
    /// without bound; returning an error is the expected way to report a
    /// failed delivery.
    fn export(&mut self, batch: Vec<SpanData>) -> ExportResult;

    /// Shuts down the exporter, releasing any held resources.
    ///
    /// Called at most once, after the final batch has been delivered.
    fn shutdown(&mut self) {}
}
