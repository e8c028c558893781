//! The interface for creating instruments.

use crate::metrics::instrument::{
    Counter, CounterInner, GaugeCallback, GaugeInner, Instrument, InstrumentDescriptor,
    ObservableGauge,
};
use crate::{tel_warn, TelemetryError};
use std::borrow::Cow;
use std::fmt;
use std::sync::{Arc, Mutex};

/// Holds every instrument created through a [`MeterProvider`], keyed by
/// name, for the collector to walk on each tick.
///
/// [`MeterProvider`]: crate::metrics::MeterProvider
#[derive(Debug, Default)]
pub(crate) struct InstrumentRegistry {
    instruments: Mutex<Vec<Instrument>>,
}

impl InstrumentRegistry {
    /// Snapshot of the registered instruments for one collection tick.
    pub(crate) fn instruments(&self) -> Vec<Instrument> {
        self.instruments
            .lock()
            .map(|instruments| instruments.clone())
            .unwrap_or_default()
    }

    fn register_counter(&self, descriptor: InstrumentDescriptor) -> Counter {
        let Ok(mut instruments) = self.instruments.lock() else {
            // Unreachable in practice; hand out a working but unregistered
            // instrument rather than failing the caller.
            return Counter::new(Arc::new(CounterInner::new(descriptor)));
        };
        if let Some(existing) = instruments.iter().find(|i| i.name() == descriptor.name) {
            return match existing {
                Instrument::Counter(inner) => {
                    tel_warn!(
                        name: "Meter.Counter.DuplicateName",
                        instrument = descriptor.name.as_ref(),
                        message = "returning the existing instrument"
                    );
                    Counter::new(Arc::clone(inner))
                }
                Instrument::Gauge(_) => {
                    tel_warn!(
                        name: "Meter.Counter.NameConflict",
                        instrument = descriptor.name.as_ref(),
                        message = "name already registered as a gauge, new instrument will not be collected"
                    );
                    Counter::new(Arc::new(CounterInner::new(descriptor)))
                }
            };
        }
        let inner = Arc::new(CounterInner::new(descriptor));
        instruments.push(Instrument::Counter(Arc::clone(&inner)));
        Counter::new(inner)
    }

    fn register_gauge(
        &self,
        descriptor: InstrumentDescriptor,
        callback: Arc<GaugeCallback>,
    ) -> ObservableGauge {
        let Ok(mut instruments) = self.instruments.lock() else {
            return ObservableGauge::new(Arc::new(GaugeInner::new(descriptor, callback)));
        };
        if let Some(existing) = instruments.iter().find(|i| i.name() == descriptor.name) {
            return match existing {
                Instrument::Gauge(inner) => {
                    tel_warn!(
                        name: "Meter.Gauge.DuplicateName",
                        instrument = descriptor.name.as_ref(),
                        message = "returning the existing instrument, new callback ignored"
                    );
                    ObservableGauge::new(Arc::clone(inner))
                }
                Instrument::Counter(_) => {
                    tel_warn!(
                        name: "Meter.Gauge.NameConflict",
                        instrument = descriptor.name.as_ref(),
                        message = "name already registered as a counter, new instrument will not be collected"
                    );
                    ObservableGauge::new(Arc::new(GaugeInner::new(descriptor, callback)))
                }
            };
        }
        let inner = Arc::new(GaugeInner::new(descriptor, callback));
        instruments.push(Instrument::Gauge(Arc::clone(&inner)));
        ObservableGauge::new(inner)
    }
}

/// Creates instruments registered with a [`MeterProvider`].
///
/// Meters are cheap to clone; all clones share the provider's registry.
/// Instrument names are unique within the registry: creating an instrument
/// under an existing name returns a handle to the existing one.
///
/// [`MeterProvider`]: crate::metrics::MeterProvider
#[derive(Clone, Debug)]
pub struct Meter {
    registry: Arc<InstrumentRegistry>,
}

impl Meter {
    pub(crate) fn new(registry: Arc<InstrumentRegistry>) -> Self {
        Meter { registry }
    }

    /// Starts building a monotonic [`Counter`] with the given name.
    pub fn counter(&self, name: impl Into<Cow<'static, str>>) -> CounterBuilder {
        CounterBuilder {
            registry: Arc::clone(&self.registry),
            name: name.into(),
            unit: None,
            description: None,
        }
    }

    /// Starts building an [`ObservableGauge`] sampled via `callback` on each
    /// collection tick.
    ///
    /// The callback runs on a collector-owned thread. Returning an error (or
    /// overrunning the callback timeout) skips the gauge for that tick.
    pub fn observable_gauge<F>(
        &self,
        name: impl Into<Cow<'static, str>>,
        callback: F,
    ) -> GaugeBuilder
    where
        F: Fn() -> Result<f64, TelemetryError> + Send + Sync + 'static,
    {
        GaugeBuilder {
            registry: Arc::clone(&self.registry),
            name: name.into(),
            unit: None,
            description: None,
            callback: Arc::new(callback),
        }
    }
}

/// Configures and registers a [`Counter`].
#[derive(Debug)]
pub struct CounterBuilder {
    registry: Arc<InstrumentRegistry>,
    name: Cow<'static, str>,
    unit: Option<Cow<'static, str>>,
    description: Option<Cow<'static, str>>,
}

impl CounterBuilder {
    /// Sets the unit of measure, e.g. `"{requests}"` or `"By"`.
    pub fn with_unit(mut self, unit: impl Into<Cow<'static, str>>) -> Self {
        self.unit = Some(unit.into());
        self
    }

    /// Sets a human-readable description.
    pub fn with_description(mut self, description: impl Into<Cow<'static, str>>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Registers the counter and returns its handle.
    pub fn build(self) -> Counter {
        self.registry.register_counter(InstrumentDescriptor {
            name: self.name,
            unit: self.unit,
            description: self.description,
        })
    }
}

/// Configures and registers an [`ObservableGauge`].
pub struct GaugeBuilder {
    registry: Arc<InstrumentRegistry>,
    name: Cow<'static, str>,
    unit: Option<Cow<'static, str>>,
    description: Option<Cow<'static, str>>,
    callback: Arc<GaugeCallback>,
}

impl fmt::Debug for GaugeBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GaugeBuilder")
            .field("name", &self.name)
            .field("unit", &self.unit)
            .field("description", &self.description)
            .finish()
    }
}

impl GaugeBuilder {
    /// Sets the unit of measure.
    pub fn with_unit(mut self, unit: impl Into<Cow<'static, str>>) -> Self {
        self.unit = Some(unit.into());
        self
    }

    /// Sets a human-readable description.
    pub fn with_description(mut self, description: impl Into<Cow<'static, str>>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Registers the gauge and returns its handle.
    pub fn build(self) -> ObservableGauge {
        self.registry.register_gauge(
            InstrumentDescriptor {
                name: self.name,
                unit: self.unit,
                description: self.description,
            },
            self.callback,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::MetricValue;

    #[test]
    fn duplicate_counter_name_returns_shared_handle() {
        let meter = Meter::new(Arc::new(InstrumentRegistry::default()));
        let first = meter.counter("requests").build();
        let second = meter.counter("requests").build();
        first.add(2);
        second.add(3);

        let instruments = meter.registry.instruments();
        assert_eq!(instruments.len(), 1);
        match &instruments[0] {
            Instrument::Counter(inner) => {
                let point = inner.observe(crate::time::now());
                assert_eq!(point.value, MetricValue::U64(5));
            }
            other => panic!("unexpected instrument {other:?}"),
        }
    }

    #[test]
    fn kind_conflict_yields_uncollected_instrument() {
        let meter = Meter::new(Arc::new(InstrumentRegistry::default()));
        let _counter = meter.counter("confused").build();
        let _gauge = meter.observable_gauge("confused", || Ok(1.0)).build();

        // The conflicting gauge was not registered.
        let instruments = meter.registry.instruments();
        assert_eq!(instruments.len(), 1);
        assert!(matches!(instruments[0], Instrument::Counter(_)));
    }

    #[test]
    fn builder_metadata_reaches_the_handle() {
        let meter = Meter::new(Arc::new(InstrumentRegistry::default()));
        let counter = meter
            .counter("bytes_sent")
            .with_unit("By")
            .with_description("payload bytes written to peers")
            .build();
        assert_eq!(counter.name(), "bytes_sent");
        assert_eq!(counter.unit(), Some("By"));
        assert_eq!(
            counter.description(),
            Some("payload bytes written to peers")
        );
    }
}
