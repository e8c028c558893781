//! The tracing half of the runtime: spans, ambient parenting, and export.
//!
//! Spans represent a single operation within a trace and can be nested to
//! form a trace tree. The [`Tracer`] resolves each new span's parent from the
//! ambient [`Context`](crate::Context), so instrumented code never threads
//! span handles explicitly. Finished spans flow to [`SpanProcessor`]s, which
//! batch and hand them to [`SpanExporter`]s.
//!
//! # Example
//!
//! ```
//! use microtel::trace::{InMemorySpanExporter, SimpleSpanProcessor, SpanKind, TracerProvider};
//!
//! let exporter = InMemorySpanExporter::default();
//! let provider = TracerProvider::builder()
//!     .with_span_processor(SimpleSpanProcessor::new(Box::new(exporter.clone())))
//!     .build();
//! let tracer = provider.tracer("worker");
//!
//! tracer.in_span("outer", |_cx| {
//!     // any span started here is automatically a child of "outer"
//!     tracer.in_span("inner", |_cx| {});
//! });
//!
//! let spans = exporter.get_finished_spans().unwrap();
//! assert_eq!(spans.len(), 2);
//! assert_eq!(spans[0].name, "inner"); // children finish first
//! ```

pub(crate) mod context;
mod export;
mod id_generator;
mod in_memory_exporter;
mod provider;
mod sampler;
mod span;
mod span_context;
mod span_processor;
mod tracer;

pub use context::{SpanRef, TraceContextExt};
pub use export::{ExportResult, SpanExporter};
pub use id_generator::{IdGenerator, RandomIdGenerator};
pub use in_memory_exporter::{InMemorySpanExporter, InMemorySpanExporterBuilder};
pub use provider::{Config, TracerProvider, TracerProviderBuilder};
pub use sampler::{Sampler, SamplingDecision, ShouldSample};
pub use span::{Span, SpanData};
pub use span_context::{SpanContext, SpanId, TraceFlags, TraceId};
pub use span_processor::{
    BatchConfig, BatchConfigBuilder, BatchSpanProcessor, BatchSpanProcessorBuilder, DropPolicy,
    SimpleSpanProcessor, SpanProcessor,
};
pub use tracer::{SpanBuilder, Tracer};

use crate::KeyValue;
use std::borrow::Cow;
use std::time::SystemTime;

/// Classifies a span's role relative to its peers in a trace.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SpanKind {
    /// Outgoing request handled by a remote service.
    Client,
    /// Incoming request from a remote client.
    Server,
    /// Output to an asynchronous destination such as a message queue.
    Producer,
    /// Input received from an asynchronous origin.
    Consumer,
    /// Operation internal to an application, the default.
    Internal,
}

/// The status of a [`Span`] once it has ended.
#[derive(Clone, Debug, Default, PartialEq)]
pub enum Status {
    /// The default status.
    #[default]
    Unset,

    /// The operation contains an error.
    Error {
        /// The description of the error
        description: Cow<'static, str>,
    },

    /// The operation has been validated by an application developer or
    /// operator to have completed successfully.
    Ok,
}

impl Status {
    /// Create a new error status with the given description.
    pub fn error(description: impl Into<Cow<'static, str>>) -> Self {
        Status::Error {
            description: description.into(),
        }
    }
}

/// A timestamped annotation appended to a [`Span`].
#[derive(Clone, Debug, PartialEq)]
pub struct Event {
    /// The name of this event.
    pub name: Cow<'static, str>,
    /// The time this event occurred.
    pub timestamp: SystemTime,
    /// Attributes describing this event.
    pub attributes: Vec<KeyValue>,
}

impl Event {
    /// Create a new event with the given timestamp.
    pub fn new<T: Into<Cow<'static, str>>>(
        name: T,
        timestamp: SystemTime,
        attributes: Vec<KeyValue>,
    ) -> Self {
        Event {
            name: name.into(),
            timestamp,
            attributes,
        }
    }
}
