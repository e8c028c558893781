use crate::metrics::MetricPoint;
use crate::TelemetryResult;
use std::fmt;

/// Receives batches of collected metric points from the collector.
///
/// Exporters run on the collector thread, never on application threads. A
/// failed export loses only that batch for that exporter; the collector
/// keeps running and keeps delivering to its other exporters.
pub trait MetricsExporter: Send + fmt::Debug {
    /// Exports one collection tick's worth of points. Batches are never
    /// empty; ticks that collect nothing are not exported.
    fn export(&mut self, batch: Vec<MetricPoint>) -> TelemetryResult;

    /// Shuts down the exporter after the final batch has been delivered.
    fn shutdown(&mut self) {}
}
