use crate::metrics::meter::InstrumentRegistry;
use crate::metrics::{Meter, MetricsExporter, PeriodicCollector};
use crate::{tel_debug, tel_warn, TelemetryError, TelemetryResult};
use std::env;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Delay interval between two consecutive collection ticks.
const MICROTEL_METRIC_EXPORT_INTERVAL: &str = "MICROTEL_METRIC_EXPORT_INTERVAL";
/// Default delay interval between two consecutive collection ticks.
const MICROTEL_METRIC_EXPORT_INTERVAL_DEFAULT: u64 = 60_000;
/// Maximum time a single gauge callback may run per tick.
const MICROTEL_METRIC_CALLBACK_TIMEOUT: &str = "MICROTEL_METRIC_CALLBACK_TIMEOUT";
/// Default maximum time a single gauge callback may run per tick.
const MICROTEL_METRIC_CALLBACK_TIMEOUT_DEFAULT: u64 = 5_000;

fn env_millis(name: &str, default: Duration) -> Duration {
    match env::var(name) {
        Ok(raw) => match raw.parse() {
            Ok(millis) => Duration::from_millis(millis),
            Err(_) => {
                tel_warn!(
                    name: "MeterProvider.InvalidEnvValue",
                    variable = name,
                    value = raw.as_str()
                );
                default
            }
        },
        Err(_) => default,
    }
}

#[derive(Debug)]
struct MeterProviderInner {
    registry: Arc<InstrumentRegistry>,
    collector: PeriodicCollector,
    is_shutdown: AtomicBool,
}

impl Drop for MeterProviderInner {
    fn drop(&mut self) {
        if !self.is_shutdown.swap(true, Ordering::SeqCst) {
            if let Err(err) = self.collector.shutdown() {
                tel_debug!(
                    name: "MeterProvider.Drop.ShutdownError",
                    error = format!("{err}")
                );
            }
        }
    }
}

/// Owns the instrument registry and the collection pipeline.
///
/// Providers are cheap to clone; clones share the same registry and
/// collector. Instruments live for the registry's lifetime; teardown is
/// whole-provider via [`shutdown`].
///
/// [`shutdown`]: MeterProvider::shutdown
#[derive(Clone, Debug)]
pub struct MeterProvider {
    inner: Arc<MeterProviderInner>,
}

impl MeterProvider {
    /// Create a builder for a `MeterProvider`.
    pub fn builder() -> MeterProviderBuilder {
        MeterProviderBuilder::default()
    }

    /// Returns a [`Meter`] creating instruments in this provider's registry.
    pub fn meter(&self) -> Meter {
        Meter::new(Arc::clone(&self.inner.registry))
    }

    /// Performs an immediate collection tick and waits for its export.
    pub fn force_flush(&self) -> TelemetryResult {
        if self.inner.is_shutdown.load(Ordering::SeqCst) {
            return Err(TelemetryError::AlreadyShutdown);
        }
        self.inner.collector.force_flush()
    }

    /// Performs a final collection tick and stops the collector.
    ///
    /// Subsequent calls return [`TelemetryError::AlreadyShutdown`].
    pub fn shutdown(&self) -> TelemetryResult {
        if self.inner.is_shutdown.swap(true, Ordering::SeqCst) {
            return Err(TelemetryError::AlreadyShutdown);
        }
        self.inner.collector.shutdown()
    }
}

/// Builder for [`MeterProvider`].
#[derive(Debug, Default)]
pub struct MeterProviderBuilder {
    exporters: Vec<Box<dyn MetricsExporter>>,
    interval: Option<Duration>,
    callback_timeout: Option<Duration>,
}

impl MeterProviderBuilder {
    /// Adds an exporter each collection tick's batch is delivered to. May be
    /// called multiple times; each exporter receives every batch.
    pub fn with_exporter(mut self, exporter: Box<dyn MetricsExporter>) -> Self {
        self.exporters.push(exporter);
        self
    }

    /// Sets the collection interval. The default is 60 seconds; the
    /// `MICROTEL_METRIC_EXPORT_INTERVAL` environment variable (milliseconds)
    /// overrides both.
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = Some(interval);
        self
    }

    /// Sets the per-tick gauge callback timeout. The default is 5 seconds;
    /// the `MICROTEL_METRIC_CALLBACK_TIMEOUT` environment variable
    /// (milliseconds) overrides both.
    pub fn with_callback_timeout(mut self, callback_timeout: Duration) -> Self {
        self.callback_timeout = Some(callback_timeout);
        self
    }

    /// Create a [`MeterProvider`], starting its collector thread.
    pub fn build(self) -> MeterProvider {
        let interval = env_millis(
            MICROTEL_METRIC_EXPORT_INTERVAL,
            self.interval
                .unwrap_or(Duration::from_millis(MICROTEL_METRIC_EXPORT_INTERVAL_DEFAULT)),
        );
        let callback_timeout = env_millis(
            MICROTEL_METRIC_CALLBACK_TIMEOUT,
            self.callback_timeout
                .unwrap_or(Duration::from_millis(MICROTEL_METRIC_CALLBACK_TIMEOUT_DEFAULT)),
        );
        let registry = Arc::new(InstrumentRegistry::default());
        let collector = PeriodicCollector::new(
            Arc::clone(&registry),
            self.exporters,
            interval,
            callback_timeout,
        );
        MeterProvider {
            inner: Arc::new(MeterProviderInner {
                registry,
                collector,
                is_shutdown: AtomicBool::new(false),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::{InMemoryMetricsExporter, MetricPoint, MetricValue};
    use std::sync::atomic::AtomicUsize;
    use std::thread;
    use std::time::Instant;

    fn test_provider() -> (MeterProvider, InMemoryMetricsExporter) {
        let exporter = InMemoryMetricsExporter::default();
        let provider = MeterProvider::builder()
            .with_exporter(Box::new(exporter.clone()))
            .with_callback_timeout(Duration::from_millis(200))
            .build();
        (provider, exporter)
    }

    #[derive(Clone, Debug, Default)]
    struct FailingExporter {
        calls: Arc<AtomicUsize>,
    }

    impl MetricsExporter for FailingExporter {
        fn export(&mut self, _batch: Vec<MetricPoint>) -> TelemetryResult {
            self.calls.fetch_add(1, Ordering::Relaxed);
            Err(TelemetryError::InternalFailure("sink offline".into()))
        }
    }

    #[test]
    fn counter_total_is_observed_once_per_tick() {
        let (provider, exporter) = test_provider();
        let counter = provider.meter().counter("requests").build();
        counter.add(3);
        counter.add(5);
        provider.force_flush().unwrap();

        let batches = exporter.get_finished_metrics().unwrap();
        assert_eq!(batches.len(), 1);
        assert_eq!(batches[0].len(), 1);
        assert_eq!(batches[0][0].name, "requests");
        assert_eq!(batches[0][0].value, MetricValue::U64(8));
        provider.shutdown().unwrap();
    }

    #[test]
    fn points_in_one_tick_share_a_timestamp() {
        let (provider, exporter) = test_provider();
        let meter = provider.meter();
        meter.counter("a").build().add(1);
        meter.counter("b").build().add(1);
        let _gauge = meter.observable_gauge("c", || Ok(1.5)).build();
        provider.force_flush().unwrap();

        let batches = exporter.get_finished_metrics().unwrap();
        let batch = &batches[0];
        assert_eq!(batch.len(), 3);
        assert!(batch.iter().all(|p| p.timestamp == batch[0].timestamp));
        provider.shutdown().unwrap();
    }

    #[test]
    fn failing_gauge_is_skipped_for_that_tick_only() {
        let (provider, exporter) = test_provider();
        let meter = provider.meter();
        let ticks = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&ticks);
        let _gauge = meter
            .observable_gauge("queue_depth", move || {
                if seen.fetch_add(1, Ordering::Relaxed) == 0 {
                    Err(TelemetryError::InternalFailure("probe offline".into()))
                } else {
                    Ok(42.0)
                }
            })
            .build();
        meter.counter("steady").build().add(1);

        provider.force_flush().unwrap();
        provider.force_flush().unwrap();
        provider.shutdown().unwrap();

        let batches = exporter.get_finished_metrics().unwrap();
        // Tick one: counter only. Tick two: counter and the recovered gauge.
        assert_eq!(batches[0].len(), 1);
        assert_eq!(batches[0][0].name, "steady");
        assert!(batches[1]
            .iter()
            .any(|p| p.name == "queue_depth" && p.value == MetricValue::F64(42.0)));
    }

    #[test]
    fn panicking_gauge_does_not_take_down_collection() {
        let (provider, exporter) = test_provider();
        let meter = provider.meter();
        let _gauge = meter
            .observable_gauge("volatile", || panic!("probe exploded"))
            .build();
        meter.counter("steady").build().add(7);

        provider.force_flush().unwrap();
        provider.shutdown().unwrap();

        let batches = exporter.get_finished_metrics().unwrap();
        assert_eq!(batches[0].len(), 1);
        assert_eq!(batches[0][0].value, MetricValue::U64(7));
    }

    #[test]
    fn slow_gauge_is_timed_out_and_skipped() {
        let (provider, exporter) = test_provider();
        let meter = provider.meter();
        let _gauge = meter
            .observable_gauge("glacial", || {
                thread::sleep(Duration::from_secs(10));
                Ok(1.0)
            })
            .build();
        meter.counter("steady").build().add(1);

        let started = Instant::now();
        provider.force_flush().unwrap();
        // The tick waited for the 200ms callback budget, not the callback.
        assert!(started.elapsed() < Duration::from_secs(5));

        let batches = exporter.get_finished_metrics().unwrap();
        assert_eq!(batches[0].len(), 1);
        assert_eq!(batches[0][0].name, "steady");
        provider.shutdown().unwrap();
    }

    #[test]
    fn empty_ticks_are_not_exported() {
        let (provider, exporter) = test_provider();
        provider.force_flush().unwrap();
        provider.shutdown().unwrap();
        assert!(exporter.get_finished_metrics().unwrap().is_empty());
    }

    #[test]
    fn failing_sink_does_not_starve_healthy_sink() {
        let failing = FailingExporter::default();
        let calls = Arc::clone(&failing.calls);
        let healthy = InMemoryMetricsExporter::default();
        let provider = MeterProvider::builder()
            .with_exporter(Box::new(failing))
            .with_exporter(Box::new(healthy.clone()))
            .build();
        provider.meter().counter("requests").build().add(1);

        assert!(provider.force_flush().is_err());
        assert_eq!(calls.load(Ordering::Relaxed), 1);
        assert_eq!(healthy.get_finished_metrics().unwrap().len(), 1);
        let _ = provider.shutdown();
    }

    #[test]
    fn interval_drives_collection_without_flushing() {
        let exporter = InMemoryMetricsExporter::default();
        let provider = MeterProvider::builder()
            .with_exporter(Box::new(exporter.clone()))
            .with_interval(Duration::from_millis(50))
            .build();
        provider.meter().counter("requests").build().add(1);

        let deadline = Instant::now() + Duration::from_secs(5);
        while exporter.get_finished_metrics().unwrap().is_empty() && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(10));
        }
        assert!(!exporter.get_finished_metrics().unwrap().is_empty());
        provider.shutdown().unwrap();
    }

    #[test]
    fn shutdown_performs_a_final_tick_and_is_terminal() {
        let (provider, exporter) = test_provider();
        provider.meter().counter("requests").build().add(4);
        provider.shutdown().unwrap();

        let batches = exporter.get_finished_metrics().unwrap();
        assert_eq!(batches.len(), 1);
        assert_eq!(batches[0][0].value, MetricValue::U64(4));

        assert!(matches!(
            provider.shutdown(),
            Err(TelemetryError::AlreadyShutdown)
        ));
        assert!(matches!(
            provider.force_flush(),
            Err(TelemetryError::AlreadyShutdown)
        ));
    }

    #[test]
    fn configuration_reads_environment_overrides() {
        temp_env::with_vars(
            [
                (MICROTEL_METRIC_EXPORT_INTERVAL, Some("40")),
                (MICROTEL_METRIC_CALLBACK_TIMEOUT, Some("100")),
            ],
            || {
                let exporter = InMemoryMetricsExporter::default();
                // The env interval (40ms) overrides the builder's hour.
                let provider = MeterProvider::builder()
                    .with_exporter(Box::new(exporter.clone()))
                    .with_interval(Duration::from_secs(3_600))
                    .build();
                provider.meter().counter("requests").build().add(1);

                let deadline = Instant::now() + Duration::from_secs(5);
                while exporter.get_finished_metrics().unwrap().is_empty()
                    && Instant::now() < deadline
                {
                    thread::sleep(Duration::from_millis(10));
                }
                assert!(!exporter.get_finished_metrics().unwrap().is_empty());
                provider.shutdown().unwrap();
            },
        );
    }
}
