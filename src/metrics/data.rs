//! Types exchanged between the collector and metrics exporters.

use crate::KeyValue;
use std::borrow::Cow;
use std::time::SystemTime;

/// The value carried by a [`MetricPoint`].
#[derive(Clone, Debug, PartialEq)]
pub enum MetricValue {
    /// A monotonic counter total.
    U64(u64),
    /// A sampled gauge reading.
    F64(f64),
}

/// One collected measurement, immutable once created.
///
/// Every instrument that yields a reading during a collection tick produces
/// one point, all stamped with the same collection timestamp.
#[derive(Clone, Debug, PartialEq)]
pub struct MetricPoint {
    /// The instrument name this point was read from.
    pub name: Cow<'static, str>,
    /// The instrument's unit of measure, if declared.
    pub unit: Option<Cow<'static, str>>,
    /// When the collection tick that produced this point ran.
    pub timestamp: SystemTime,
    /// The collected value.
    pub value: MetricValue,
    /// Attributes describing this point.
    pub attributes: Vec<KeyValue>,
}
