//! The metrics half of the runtime: instruments, collection, and export.
//!
//! Applications create instruments from a [`Meter`]: push-style [`Counter`]s
//! that accumulate monotonically as code calls [`Counter::add`], and
//! pull-style [`ObservableGauge`]s whose callbacks are sampled when a
//! collection runs. A [`PeriodicCollector`] thread owned by the
//! [`MeterProvider`] gathers one [`MetricPoint`] batch per tick and delivers
//! it to every configured [`MetricsExporter`].
//!
//! # Example
//!
//! ```
//! use microtel::metrics::{InMemoryMetricsExporter, MeterProvider, MetricValue};
//!
//! let exporter = InMemoryMetricsExporter::default();
//! let provider = MeterProvider::builder()
//!     .with_exporter(Box::new(exporter.clone()))
//!     .build();
//! let meter = provider.meter();
//!
//! let requests = meter.counter("requests").with_unit("{requests}").build();
//! requests.add(2);
//! requests.add(3);
//!
//! provider.force_flush().unwrap();
//! let batches = exporter.get_finished_metrics().unwrap();
//! assert_eq!(batches[0][0].value, MetricValue::U64(5));
//! # provider.shutdown().unwrap();
//! ```

mod data;
mod exporter;
mod in_memory_exporter;
mod instrument;
mod meter;
mod meter_provider;
mod periodic_collector;

pub use data::{MetricPoint, MetricValue};
pub use exporter::MetricsExporter;
pub use in_memory_exporter::InMemoryMetricsExporter;
pub use instrument::{Counter, ObservableGauge};
pub use meter::{CounterBuilder, GaugeBuilder, Meter};
pub use meter_provider::{MeterProvider, MeterProviderBuilder};
pub use periodic_collector::PeriodicCollector;
