//! The background thread that drives metric collection.

use crate::metrics::instrument::{GaugeInner, Instrument};
use crate::metrics::meter::InstrumentRegistry;
use crate::metrics::{MetricPoint, MetricsExporter};
use crate::{tel_debug, tel_error, tel_info, tel_warn, TelemetryError, TelemetryResult};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, sync_channel, Receiver, RecvTimeoutError, SyncSender};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

/// Extra time granted on top of the tick budget when waiting for a flush or
/// shutdown acknowledgement.
const ACK_GRACE: Duration = Duration::from_secs(5);

enum Message {
    Flush(SyncSender<TelemetryResult>),
    Shutdown(SyncSender<TelemetryResult>),
}

/// Collects every registered instrument on a fixed interval and exports one
/// batch per tick.
///
/// The collector owns a dedicated thread. Counters are read atomically on
/// that thread; each gauge callback runs on its own short-lived thread
/// bounded by the callback timeout, so a slow, failing, or panicking
/// callback is skipped for that tick without delaying the others. Interval
/// accounting subtracts the time a tick took, and a tick that overruns the
/// interval triggers the next collection immediately.
pub struct PeriodicCollector {
    message_sender: Mutex<mpsc::Sender<Message>>,
    handle: Mutex<Option<thread::JoinHandle<()>>>,
    is_shutdown: AtomicBool,
    ack_timeout: Duration,
}

impl fmt::Debug for PeriodicCollector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PeriodicCollector")
            .field("ack_timeout", &self.ack_timeout)
            .finish()
    }
}

impl PeriodicCollector {
    pub(crate) fn new(
        registry: Arc<InstrumentRegistry>,
        exporters: Vec<Box<dyn MetricsExporter>>,
        interval: Duration,
        callback_timeout: Duration,
    ) -> Self {
        let (message_sender, message_receiver) = mpsc::channel();
        let worker = CollectorWorker {
            registry,
            interval,
            callback_timeout,
            message_receiver,
        };
        let handle = thread::Builder::new()
            .name("microtel.metrics.collector".to_string())
            .spawn(move || worker.run(exporters))
            .expect("failed to spawn metrics collector thread");
        tel_info!(
            name: "PeriodicCollector.ThreadStarted",
            interval_ms = interval.as_millis() as u64,
            callback_timeout_ms = callback_timeout.as_millis() as u64
        );

        PeriodicCollector {
            message_sender: Mutex::new(message_sender),
            handle: Mutex::new(Some(handle)),
            is_shutdown: AtomicBool::new(false),
            // A request may land while a tick is in progress, so allow for
            // the running tick plus the requested one.
            ack_timeout: callback_timeout * 2 + ACK_GRACE,
        }
    }

    /// Performs an immediate collection tick and waits for its export.
    pub fn force_flush(&self) -> TelemetryResult {
        if self.is_shutdown.load(Ordering::Relaxed) {
            return Err(TelemetryError::AlreadyShutdown);
        }
        let (ack_tx, ack_rx) = sync_channel(1);
        self.message_sender
            .lock()?
            .send(Message::Flush(ack_tx))
            .map_err(|_| TelemetryError::InternalFailure("collector thread is gone".into()))?;
        ack_rx
            .recv_timeout(self.ack_timeout)
            .map_err(|_| TelemetryError::Timeout(self.ack_timeout))?
    }

    /// Performs a final collection tick, shuts the exporters down, and stops
    /// the collector thread.
    pub fn shutdown(&self) -> TelemetryResult {
        if self.is_shutdown.swap(true, Ordering::Relaxed) {
            return Err(TelemetryError::AlreadyShutdown);
        }
        let (ack_tx, ack_rx) = sync_channel(1);
        self.message_sender
            .lock()?
            .send(Message::Shutdown(ack_tx))
            .map_err(|_| TelemetryError::InternalFailure("collector thread is gone".into()))?;
        let result = ack_rx
            .recv_timeout(self.ack_timeout)
            .map_err(|_| TelemetryError::Timeout(self.ack_timeout))?;
        if let Some(handle) = self.handle.lock()?.take() {
            let _ = handle.join();
        }
        result
    }
}

struct CollectorWorker {
    registry: Arc<InstrumentRegistry>,
    interval: Duration,
    callback_timeout: Duration,
    message_receiver: Receiver<Message>,
}

impl CollectorWorker {
    fn run(self, mut exporters: Vec<Box<dyn MetricsExporter>>) {
        let mut remaining = self.interval;
        loop {
            match self.message_receiver.recv_timeout(remaining) {
                Ok(Message::Flush(ack)) => {
                    let result = self.collect_and_export(&mut exporters);
                    let _ = ack.send(result);
                    remaining = self.interval;
                }
                Ok(Message::Shutdown(ack)) => {
                    let result = self.collect_and_export(&mut exporters);
                    for exporter in exporters.iter_mut() {
                        exporter.shutdown();
                    }
                    let _ = ack.send(result);
                    tel_debug!(name: "PeriodicCollector.ThreadStopped");
                    return;
                }
                Err(RecvTimeoutError::Timeout) => {
                    let started = Instant::now();
                    if let Err(err) = self.collect_and_export(&mut exporters) {
                        tel_warn!(
                            name: "PeriodicCollector.Collect.Failed",
                            error = format!("{err}")
                        );
                    }
                    // Subtract the tick's own duration so ticks do not
                    // drift; an overrun makes the next tick immediate.
                    remaining = self.interval.saturating_sub(started.elapsed());
                }
                Err(RecvTimeoutError::Disconnected) => {
                    tel_debug!(name: "PeriodicCollector.ChannelClosed");
                    return;
                }
            }
        }
    }

    /// One collection tick: every instrument observed against one shared
    /// timestamp.
    fn collect(&self) -> Vec<MetricPoint> {
        let timestamp = crate::time::now();
        let instruments = self.registry.instruments();

        // Kick off every gauge observation first so the callbacks run
        // concurrently while counters are read.
        let pending: Vec<_> = instruments
            .iter()
            .filter_map(|instrument| match instrument {
                Instrument::Gauge(gauge) => {
                    Some((Arc::clone(gauge), observe_gauge(Arc::clone(gauge))))
                }
                Instrument::Counter(_) => None,
            })
            .collect();

        let mut points = Vec::with_capacity(instruments.len());
        for instrument in &instruments {
            if let Instrument::Counter(counter) = instrument {
                points.push(counter.observe(timestamp));
            }
        }

        let deadline = Instant::now() + self.callback_timeout;
        for (gauge, value_rx) in pending {
            let wait = deadline.saturating_duration_since(Instant::now());
            match value_rx.recv_timeout(wait) {
                Ok(Ok(value)) => points.push(gauge.point(timestamp, value)),
                Ok(Err(err)) => {
                    tel_warn!(
                        name: "PeriodicCollector.Gauge.CallbackFailed",
                        instrument = gauge.descriptor.name.as_ref(),
                        error = format!("{err}")
                    );
                }
                Err(RecvTimeoutError::Timeout) => {
                    tel_warn!(
                        name: "PeriodicCollector.Gauge.CallbackTimedOut",
                        instrument = gauge.descriptor.name.as_ref(),
                        timeout_ms = self.callback_timeout.as_millis() as u64
                    );
                }
                Err(RecvTimeoutError::Disconnected) => {
                    tel_warn!(
                        name: "PeriodicCollector.Gauge.CallbackPanicked",
                        instrument = gauge.descriptor.name.as_ref()
                    );
                }
            }
        }
        points
    }

    fn collect_and_export(&self, exporters: &mut [Box<dyn MetricsExporter>]) -> TelemetryResult {
        let points = self.collect();
        // Ticks that observe nothing export nothing.
        if points.is_empty() {
            return Ok(());
        }
        let mut result = Ok(());
        if let Some((last, rest)) = exporters.split_last_mut() {
            for exporter in rest.iter_mut() {
                if let Err(err) = exporter.export(points.clone()) {
                    tel_warn!(
                        name: "PeriodicCollector.Export.Failed",
                        error = format!("{err}")
                    );
                    result = Err(err);
                }
            }
            if let Err(err) = last.export(points) {
                tel_warn!(
                    name: "PeriodicCollector.Export.Failed",
                    error = format!("{err}")
                );
                result = Err(err);
            }
        }
        result
    }
}

/// Runs one gauge callback on a throwaway thread and returns the channel its
/// result will arrive on. A panicking callback drops the sender, which the
/// caller observes as a disconnect.
fn observe_gauge(gauge: Arc<GaugeInner>) -> Receiver<Result<f64, TelemetryError>> {
    let (value_tx, value_rx) = sync_channel(1);
    let spawned = thread::Builder::new()
        .name("microtel.metrics.observe".to_string())
        .spawn(move || {
            let _ = value_tx.send((gauge.callback)());
        });
    if let Err(err) = spawned {
        tel_error!(
            name: "PeriodicCollector.Gauge.SpawnFailed",
            error = format!("{err}")
        );
    }
    value_rx
}
