//! # Span
//!
//! `Span`s represent a single operation within a trace. `Span`s can be nested
//! to form a trace tree. Each trace contains a root span, which typically
//! describes the end-to-end latency and, optionally, one or more sub-spans
//! for its sub-operations.
//!
//! A `Span`'s start time is set on creation. After the `Span` is created it is
//! possible to change its name, set its attributes, and append events. None of
//! these can be changed after the `Span`'s end time has been set: ending a
//! span moves its data out to the configured processors, and every later
//! mutation or end call is a no-op.

use crate::trace::{Event, SpanContext, SpanId, SpanKind, Status, Tracer};
use crate::{tel_debug, KeyValue};
use std::borrow::Cow;
use std::time::SystemTime;

/// Single operation within a trace.
#[derive(Debug)]
pub struct Span {
    span_context: SpanContext,
    data: Option<SpanData>,
    tracer: Tracer,
}

/// Immutable projection of a finished span, as handed to exporters.
#[derive(Clone, Debug, PartialEq)]
pub struct SpanData {
    /// Span identity within its trace.
    pub span_context: SpanContext,
    /// Id of the enclosing span, or [`SpanId::INVALID`] for a root span.
    pub parent_span_id: SpanId,
    /// Span kind
    pub span_kind: SpanKind,
    /// Span name
    pub name: Cow<'static, str>,
    /// Span start time
    pub start_time: SystemTime,
    /// Span end time
    pub end_time: SystemTime,
    /// Span attributes, unique by key.
    pub attributes: Vec<KeyValue>,
    /// Span events, in append order.
    pub events: Vec<Event>,
    /// Span status
    pub status: Status,
}

/// Insert an attribute, replacing any previous value recorded under its key.
pub(crate) fn merge_attribute(attributes: &mut Vec<KeyValue>, attribute: KeyValue) {
    if let Some(existing) = attributes.iter_mut().find(|kv| kv.key == attribute.key) {
        existing.value = attribute.value;
    } else {
        attributes.push(attribute);
    }
}

impl Span {
    pub(crate) fn new(span_context: SpanContext, data: Option<SpanData>, tracer: Tracer) -> Self {
        Span {
            span_context,
            data,
            tracer,
        }
    }

    /// Operate on a mutable reference to span data, if still recording.
    fn with_data<T, F>(&mut self, f: F) -> Option<T>
    where
        F: FnOnce(&mut SpanData) -> T,
    {
        self.data.as_mut().map(f)
    }

    /// Returns the `SpanContext` for the given `Span`.
    pub fn span_context(&self) -> &SpanContext {
        &self.span_context
    }

    /// Returns `true` if this `Span` is recording information like events,
    /// attributes or status. Always returns `false` after the span has ended.
    pub fn is_recording(&self) -> bool {
        self.data.is_some()
    }

    /// Sets a single attribute. Keys are unique: writing a key that is
    /// already present replaces its value.
    pub fn set_attribute(&mut self, attribute: KeyValue) {
        self.with_data(|data| merge_attribute(&mut data.attributes, attribute));
    }

    /// Appends an event occurring now.
    pub fn add_event<T>(&mut self, name: T, attributes: Vec<KeyValue>)
    where
        T: Into<Cow<'static, str>>,
    {
        self.add_event_with_timestamp(name, crate::time::now(), attributes)
    }

    /// Appends an event with the given timestamp. Events preserve their
    /// append order.
    pub fn add_event_with_timestamp<T>(
        &mut self,
        name: T,
        timestamp: SystemTime,
        attributes: Vec<KeyValue>,
    ) where
        T: Into<Cow<'static, str>>,
    {
        self.with_data(|data| {
            data.events.push(Event::new(name, timestamp, attributes));
        });
    }

    /// Sets the status of this `Span`.
    ///
    /// May be called multiple times while the span is recording; the last
    /// write wins. Setting the status after the span has ended is a no-op.
    pub fn set_status(&mut self, status: Status) {
        self.with_data(|data| data.status = status);
    }

    /// Updates the `Span`'s name.
    pub fn update_name<T>(&mut self, new_name: T)
    where
        T: Into<Cow<'static, str>>,
    {
        self.with_data(|data| data.name = new_name.into());
    }

    /// Finishes the `Span`.
    ///
    /// Ending is idempotent: the end time and status are fixed by the first
    /// call, and any later call (including the implicit end on drop) has no
    /// observable effect. Scoped exits and explicit completion may therefore
    /// race without double-exporting.
    pub fn end(&mut self) {
        self.ensure_ended_and_exported(None);
    }

    /// Finishes the `Span` with given timestamp.
    pub fn end_with_timestamp(&mut self, timestamp: SystemTime) {
        self.ensure_ended_and_exported(Some(timestamp));
    }

    fn ensure_ended_and_exported(&mut self, timestamp: Option<SystemTime>) {
        // Take data, skip if the span has already ended.
        let mut data = match self.data.take() {
            Some(data) => data,
            None => return,
        };
        data.end_time = timestamp.unwrap_or_else(crate::time::now);

        let provider = self.tracer.provider();
        if provider.is_shutdown() {
            tel_debug!(
                name: "Span.End.ProviderShutdown",
                message = "span finished after provider shutdown and was discarded"
            );
            return;
        }

        // Deliver the finished data to every processor, moving it into the
        // last one to avoid a needless clone in the single-processor case.
        if let Some((last, rest)) = provider.span_processors().split_last() {
            for processor in rest {
                processor.on_end(data.clone());
            }
            last.on_end(data);
        }
    }
}

impl Drop for Span {
    /// Ends the span at scope exit if it has not been ended explicitly.
    fn drop(&mut self) {
        self.ensure_ended_and_exported(None);
    }
}
