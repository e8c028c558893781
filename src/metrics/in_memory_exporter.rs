use crate::metrics::{MetricPoint, MetricsExporter};
use crate::TelemetryResult;
use std::sync::{Arc, Mutex};

/// An in-memory metrics exporter for testing and debugging.
///
/// Each exported batch is kept separately, so tests can assert on what a
/// single collection tick produced.
#[derive(Clone, Debug, Default)]
pub struct InMemoryMetricsExporter {
    batches: Arc<Mutex<Vec<Vec<MetricPoint>>>>,
}

impl InMemoryMetricsExporter {
    /// Returns the batches exported so far, one `Vec` per collection tick.
    pub fn get_finished_metrics(&self) -> TelemetryResult<Vec<Vec<MetricPoint>>> {
        Ok(self.batches.lock()?.clone())
    }

    /// Clears the collected batches.
    pub fn reset(&self) {
        if let Ok(mut batches) = self.batches.lock() {
            batches.clear();
        }
    }
}

impl MetricsExporter for InMemoryMetricsExporter {
    fn export(&mut self, batch: Vec<MetricPoint>) -> TelemetryResult {
        self.batches.lock()?.push(batch);
        Ok(())
    }
}
