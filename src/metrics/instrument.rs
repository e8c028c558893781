//! Instrument handles and their shared state.

use crate::metrics::{MetricPoint, MetricValue};
use crate::{tel_warn, TelemetryError};
use std::borrow::Cow;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::SystemTime;

/// Identity and metadata shared by all instrument kinds.
#[derive(Clone, Debug)]
pub(crate) struct InstrumentDescriptor {
    pub(crate) name: Cow<'static, str>,
    pub(crate) unit: Option<Cow<'static, str>>,
    pub(crate) description: Option<Cow<'static, str>>,
}

impl InstrumentDescriptor {
    fn point(&self, timestamp: SystemTime, value: MetricValue) -> MetricPoint {
        MetricPoint {
            name: self.name.clone(),
            unit: self.unit.clone(),
            timestamp,
            value,
            attributes: Vec::new(),
        }
    }
}

#[derive(Debug)]
pub(crate) struct CounterInner {
    pub(crate) descriptor: InstrumentDescriptor,
    total: AtomicU64,
}

impl CounterInner {
    pub(crate) fn new(descriptor: InstrumentDescriptor) -> Self {
        CounterInner {
            descriptor,
            total: AtomicU64::new(0),
        }
    }

    pub(crate) fn observe(&self, timestamp: SystemTime) -> MetricPoint {
        self.descriptor
            .point(timestamp, MetricValue::U64(self.total.load(Ordering::Relaxed)))
    }
}

/// A monotonically increasing instrument.
///
/// Counters are cheap to clone; clones share one running total. The total
/// is read atomically by each collection tick, so a tick observes the sum
/// of every [`add`] that happened before it.
///
/// [`add`]: Counter::add
#[derive(Clone, Debug)]
pub struct Counter {
    inner: Arc<CounterInner>,
}

impl Counter {
    pub(crate) fn new(inner: Arc<CounterInner>) -> Self {
        Counter { inner }
    }

    /// Adds `delta` to the counter's running total.
    ///
    /// Counters are monotonic: a negative delta is rejected with a logged
    /// warning and does not change the total.
    pub fn add(&self, delta: i64) {
        if delta < 0 {
            tel_warn!(
                name: "Counter.Add.NegativeDelta",
                instrument = self.inner.descriptor.name.as_ref(),
                delta = delta
            );
            return;
        }
        self.inner.total.fetch_add(delta as u64, Ordering::Relaxed);
    }

    /// The counter's name.
    pub fn name(&self) -> &str {
        &self.inner.descriptor.name
    }

    /// The counter's unit of measure, if declared.
    pub fn unit(&self) -> Option<&str> {
        self.inner.descriptor.unit.as_deref()
    }

    /// The counter's description, if declared.
    pub fn description(&self) -> Option<&str> {
        self.inner.descriptor.description.as_deref()
    }
}

pub(crate) type GaugeCallback = dyn Fn() -> Result<f64, TelemetryError> + Send + Sync;

pub(crate) struct GaugeInner {
    pub(crate) descriptor: InstrumentDescriptor,
    pub(crate) callback: Arc<GaugeCallback>,
}

impl GaugeInner {
    pub(crate) fn new(descriptor: InstrumentDescriptor, callback: Arc<GaugeCallback>) -> Self {
        GaugeInner {
            descriptor,
            callback,
        }
    }

    pub(crate) fn point(&self, timestamp: SystemTime, value: f64) -> MetricPoint {
        self.descriptor.point(timestamp, MetricValue::F64(value))
    }
}

impl fmt::Debug for GaugeInner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GaugeInner")
            .field("descriptor", &self.descriptor)
            .finish()
    }
}

/// A pull-style instrument sampled by the collector.
///
/// The gauge holds no value of its own: each collection tick invokes the
/// registered callback (on a collector-owned thread, bounded by the
/// configured callback timeout) and records whatever it returns. The handle
/// exists to inspect metadata; application code never pushes to it.
#[derive(Clone, Debug)]
pub struct ObservableGauge {
    inner: Arc<GaugeInner>,
}

impl ObservableGauge {
    pub(crate) fn new(inner: Arc<GaugeInner>) -> Self {
        ObservableGauge { inner }
    }

    /// The gauge's name.
    pub fn name(&self) -> &str {
        &self.inner.descriptor.name
    }

    /// The gauge's unit of measure, if declared.
    pub fn unit(&self) -> Option<&str> {
        self.inner.descriptor.unit.as_deref()
    }

    /// The gauge's description, if declared.
    pub fn description(&self) -> Option<&str> {
        self.inner.descriptor.description.as_deref()
    }
}

/// A registered instrument of either kind, as seen by the collector.
#[derive(Clone, Debug)]
pub(crate) enum Instrument {
    Counter(Arc<CounterInner>),
    Gauge(Arc<GaugeInner>),
}

impl Instrument {
    pub(crate) fn name(&self) -> &str {
        match self {
            Instrument::Counter(inner) => &inner.descriptor.name,
            Instrument::Gauge(inner) => &inner.descriptor.name,
        }
    }
}
