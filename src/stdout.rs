//! Console exporters that write telemetry to stdout in a human-readable
//! form, for development and demos.
//!
//! # Example
//!
//! ```no_run
//! use microtel::{stdout, trace::TracerProvider};
//!
//! let provider = TracerProvider::builder()
//!     .with_simple_exporter(Box::new(stdout::SpanExporter::default()))
//!     .build();
//! provider.tracer("demo").in_span("hello", |_cx| {});
//! ```

use crate::metrics::{MetricPoint, MetricValue};
use crate::trace::{ExportResult, SpanData, SpanId, Status};
use crate::{metrics, trace, TelemetryError, TelemetryResult};

/// Writes each span batch to stdout.
#[derive(Debug, Default)]
pub struct SpanExporter {
    is_shutdown: bool,
}

impl trace::SpanExporter for SpanExporter {
    fn export(&mut self, batch: Vec<SpanData>) -> ExportResult {
        if self.is_shutdown {
            return Err(TelemetryError::AlreadyShutdown);
        }
        println!("Spans");
        for span in batch {
            println!("\tName         : {}", span.name);
            println!("\tTraceId      : {}", span.span_context.trace_id());
            println!("\tSpanId       : {}", span.span_context.span_id());
            if span.parent_span_id != SpanId::INVALID {
                println!("\tParentSpanId : {}", span.parent_span_id);
            }
            println!("\tKind         : {:?}", span.span_kind);
            println!("\tStart time   : {:?}", span.start_time);
            println!("\tEnd time     : {:?}", span.end_time);
            match span.status {
                Status::Unset => {}
                Status::Ok => println!("\tStatus       : Ok"),
                Status::Error { description } => {
                    println!("\tStatus       : Error ({description})")
                }
            }
            if !span.attributes.is_empty() {
                println!("\tAttributes:");
                for kv in span.attributes {
                    println!("\t\t{} : {}", kv.key, kv.value);
                }
            }
            if !span.events.is_empty() {
                println!("\tEvents:");
                for event in span.events {
                    println!("\t\t{} @ {:?}", event.name, event.timestamp);
                    for kv in event.attributes {
                        println!("\t\t\t{} : {}", kv.key, kv.value);
                    }
                }
            }
        }
        Ok(())
    }

    fn shutdown(&mut self) {
        self.is_shutdown = true;
    }
}

/// Writes each collected metric batch to stdout.
#[derive(Debug, Default)]
pub struct MetricsExporter {
    is_shutdown: bool,
}

impl metrics::MetricsExporter for MetricsExporter {
    fn export(&mut self, batch: Vec<MetricPoint>) -> TelemetryResult {
        if self.is_shutdown {
            return Err(TelemetryError::AlreadyShutdown);
        }
        println!("Metrics");
        for point in batch {
            let value = match point.value {
                MetricValue::U64(v) => v.to_string(),
                MetricValue::F64(v) => v.to_string(),
            };
            match point.unit {
                Some(unit) => println!("\t{} : {} {} @ {:?}", point.name, value, unit, point.timestamp),
                None => println!("\t{} : {} @ {:?}", point.name, value, point.timestamp),
            }
            for kv in point.attributes {
                println!("\t\t{} : {}", kv.key, kv.value);
            }
        }
        Ok(())
    }

    fn shutdown(&mut self) {
        self.is_shutdown = true;
    }
}
