//! A minimal in-process observability runtime.
//!
//! `microtel` lets application code create hierarchical units of work
//! ([`trace::Span`]s), attach structured attributes and timestamped events to
//! them, propagate parent/child relationships implicitly through synchronous
//! and asynchronous call chains, and export finished spans to one or more
//! exporters. It also provides numeric instruments: push-style
//! [`metrics::Counter`]s that accumulate monotonically, and pull-style
//! [`metrics::ObservableGauge`]s sampled by a periodic collector.
//!
//! Recording telemetry never blocks or fails the instrumented code: full
//! buffers drop data (and count the drops), exporter errors are isolated and
//! logged, and API misuse such as finishing a span twice is a no-op.
//!
//! # Getting started with tracing
//!
//! ```
//! use microtel::trace::{
//!     InMemorySpanExporter, SimpleSpanProcessor, TraceContextExt, TracerProvider,
//! };
//! use microtel::KeyValue;
//!
//! let exporter = InMemorySpanExporter::default();
//! let provider = TracerProvider::builder()
//!     .with_span_processor(SimpleSpanProcessor::new(Box::new(exporter.clone())))
//!     .build();
//!
//! let tracer = provider.tracer("app");
//! tracer.in_span("do-work", |cx| {
//!     cx.span().set_attribute(KeyValue::new("input", "first"));
//!     cx.span().add_event("step one completed", vec![]);
//! });
//!
//! provider.shutdown().unwrap();
//! assert_eq!(exporter.get_finished_spans().unwrap().len(), 1);
//! ```
//!
//! # Getting started with metrics
//!
//! ```
//! use microtel::metrics::{InMemoryMetricsExporter, MeterProvider};
//!
//! let exporter = InMemoryMetricsExporter::default();
//! let provider = MeterProvider::builder()
//!     .with_exporter(Box::new(exporter.clone()))
//!     .build();
//!
//! let meter = provider.meter();
//! let sold = meter.counter("books_sold").with_unit("{books}").build();
//! sold.add(3);
//!
//! provider.force_flush().unwrap();
//! provider.shutdown().unwrap();
//! assert!(!exporter.get_finished_metrics().unwrap().is_empty());
//! ```

#![warn(missing_docs, unreachable_pub, missing_debug_implementations)]
#![cfg_attr(docsrs, feature(doc_cfg))]

pub mod common;
pub mod context;
pub mod error;
mod internal_logging;
pub mod metrics;
pub mod stdout;
pub mod time;
pub mod trace;

pub use common::{Key, KeyValue, Value};
pub use context::{Context, ContextGuard, FutureExt, WithContext};
pub use error::{TelemetryError, TelemetryResult};

#[cfg(feature = "internal-logs")]
#[doc(hidden)]
pub mod _private {
    pub use tracing::{debug, error, info, warn};
}
