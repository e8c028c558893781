use crate::trace::{SpanKind, TraceId};
use crate::{Context, KeyValue};
use std::fmt;

/// The decision reached by a sampler for a span about to start.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SamplingDecision {
    /// The span will be non-recording and never exported.
    Drop,
    /// The span records and is exported when it ends.
    RecordAndSample,
}

/// Decides, at span start, whether a span should record and export.
///
/// Sampling happens exactly once per span; there is no way to revisit the
/// decision later. A dropped span still hands out a valid [`SpanContext`] so
/// its descendants keep consistent trace identity.
///
/// [`SpanContext`]: crate::trace::SpanContext
pub trait ShouldSample: Send + Sync + fmt::Debug {
    /// Returns the sampling decision for a span to be created.
    fn should_sample(
        &self,
        parent_context: Option<&Context>,
        trace_id: TraceId,
        name: &str,
        span_kind: &SpanKind,
        attributes: &[KeyValue],
    ) -> SamplingDecision;
}

/// Built-in samplers.
#[derive(Clone, Debug)]
#[non_exhaustive]
pub enum Sampler {
    /// Always sample the trace
    AlwaysOn,
    /// Never sample the trace
    AlwaysOff,
}

impl ShouldSample for Sampler {
    fn should_sample(
        &self,
        _parent_context: Option<&Context>,
        _trace_id: TraceId,
        _name: &str,
        _span_kind: &SpanKind,
        _attributes: &[KeyValue],
    ) -> SamplingDecision {
        match self {
            Sampler::AlwaysOn => SamplingDecision::RecordAndSample,
            Sampler::AlwaysOff => SamplingDecision::Drop,
        }
    }
}
