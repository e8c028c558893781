//! # Span Processor
//!
//! Span processors receive finished spans from [`Span`] ends and deliver them
//! to [`SpanExporter`]s. The [`SimpleSpanProcessor`] exports each span
//! inline as it ends; the [`BatchSpanProcessor`] buffers spans in a bounded
//! queue and exports them in batches from a dedicated worker thread, so
//! ending a span never blocks on an exporter.
//!
//! [`Span`]: crate::trace::Span

use crate::trace::{SpanData, SpanExporter};
use crate::{tel_debug, tel_error, tel_info, tel_warn, TelemetryError, TelemetryResult};
use std::collections::VecDeque;
use std::env;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::mpsc::{sync_channel, SyncSender};
use std::sync::{Arc, Condvar, Mutex};
use std::thread;
use std::time::{Duration, Instant};

/// Delay interval between two consecutive exports.
const MICROTEL_BSP_SCHEDULE_DELAY: &str = "MICROTEL_BSP_SCHEDULE_DELAY";
/// Default delay interval between two consecutive exports.
const MICROTEL_BSP_SCHEDULE_DELAY_DEFAULT: u64 = 5_000;
/// Maximum queue size.
const MICROTEL_BSP_MAX_QUEUE_SIZE: &str = "MICROTEL_BSP_MAX_QUEUE_SIZE";
/// Default maximum queue size.
const MICROTEL_BSP_MAX_QUEUE_SIZE_DEFAULT: usize = 2_048;
/// Maximum batch size, must be less than or equal to the maximum queue size.
const MICROTEL_BSP_MAX_EXPORT_BATCH_SIZE: &str = "MICROTEL_BSP_MAX_EXPORT_BATCH_SIZE";
/// Default maximum batch size.
const MICROTEL_BSP_MAX_EXPORT_BATCH_SIZE_DEFAULT: usize = 512;
/// Maximum allowed time to wait for an export or flush to complete.
const MICROTEL_BSP_EXPORT_TIMEOUT: &str = "MICROTEL_BSP_EXPORT_TIMEOUT";
/// Default maximum allowed time to wait for an export or flush to complete.
const MICROTEL_BSP_EXPORT_TIMEOUT_DEFAULT: u64 = 30_000;

/// Receives finished span data and forwards it towards exporters.
///
/// All methods take `&self`: one processor instance is shared by every span
/// the provider creates.
pub trait SpanProcessor: Send + Sync + fmt::Debug {
    /// Called when a sampled span ends, with the finished span data.
    ///
    /// Must not block the calling thread.
    fn on_end(&self, span: SpanData);

    /// Synchronously drains any buffered spans to the exporters.
    fn force_flush(&self) -> TelemetryResult;

    /// Flushes remaining spans and shuts the processor down.
    ///
    /// Subsequent calls return [`TelemetryError::AlreadyShutdown`].
    fn shutdown(&self) -> TelemetryResult;
}

/// A [`SpanProcessor`] that exports each finished span as it ends.
///
/// The export happens on the thread that ended the span, so this is only
/// suitable for tests, debugging, and exporters that are cheap to call.
#[derive(Debug)]
pub struct SimpleSpanProcessor {
    exporter: Mutex<Box<dyn SpanExporter>>,
    is_shutdown: AtomicBool,
}

impl SimpleSpanProcessor {
    /// Create a new simple processor delivering to the given exporter.
    pub fn new(exporter: Box<dyn SpanExporter>) -> Self {
        SimpleSpanProcessor {
            exporter: Mutex::new(exporter),
            is_shutdown: AtomicBool::new(false),
        }
    }
}

impl SpanProcessor for SimpleSpanProcessor {
    fn on_end(&self, span: SpanData) {
        if self.is_shutdown.load(Ordering::Relaxed) {
            return;
        }

        let result = self
            .exporter
            .lock()
            .map_err(TelemetryError::from)
            .and_then(|mut exporter| exporter.export(vec![span]));
        if let Err(err) = result {
            tel_warn!(
                name: "SimpleSpanProcessor.Export.Failed",
                error = format!("{err}")
            );
        }
    }

    fn force_flush(&self) -> TelemetryResult {
        Ok(())
    }

    fn shutdown(&self) -> TelemetryResult {
        if self.is_shutdown.swap(true, Ordering::Relaxed) {
            return Err(TelemetryError::AlreadyShutdown);
        }
        self.exporter.lock()?.shutdown();
        Ok(())
    }
}

/// What [`BatchSpanProcessor`] does with a finished span when its queue is
/// already full.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum DropPolicy {
    /// Evict the oldest buffered span to make room for the new one, keeping
    /// the freshest data.
    #[default]
    DropOldest,
    /// Discard the incoming span and keep the buffer as is.
    DropNewest,
}

/// Batching configuration for a [`BatchSpanProcessor`].
///
/// Obtained from a [`BatchConfigBuilder`]; environment variables override the
/// builder's values.
#[derive(Clone, Debug)]
pub struct BatchConfig {
    /// The maximum number of finished spans held in the buffer. Spans that
    /// arrive when the buffer is full are subject to the drop policy.
    max_queue_size: usize,

    /// The delay between two consecutive scheduled exports.
    scheduled_delay: Duration,

    /// The maximum number of spans delivered in a single export call.
    max_export_batch_size: usize,

    /// The maximum time to wait for a flush or shutdown to complete.
    export_timeout: Duration,

    /// How span overflow is handled when the queue is full.
    drop_policy: DropPolicy,
}

impl Default for BatchConfig {
    fn default() -> Self {
        BatchConfigBuilder::default().build()
    }
}

/// A builder for [`BatchConfig`].
#[derive(Clone, Debug)]
pub struct BatchConfigBuilder {
    max_queue_size: usize,
    scheduled_delay: Duration,
    max_export_batch_size: usize,
    export_timeout: Duration,
    drop_policy: DropPolicy,
}

impl Default for BatchConfigBuilder {
    fn default() -> Self {
        BatchConfigBuilder {
            max_queue_size: MICROTEL_BSP_MAX_QUEUE_SIZE_DEFAULT,
            scheduled_delay: Duration::from_millis(MICROTEL_BSP_SCHEDULE_DELAY_DEFAULT),
            max_export_batch_size: MICROTEL_BSP_MAX_EXPORT_BATCH_SIZE_DEFAULT,
            export_timeout: Duration::from_millis(MICROTEL_BSP_EXPORT_TIMEOUT_DEFAULT),
            drop_policy: DropPolicy::default(),
        }
    }
}

impl BatchConfigBuilder {
    /// Set `max_queue_size` for [`BatchConfig`]. The default is 2048.
    pub fn with_max_queue_size(mut self, max_queue_size: usize) -> Self {
        self.max_queue_size = max_queue_size;
        self
    }

    /// Set `scheduled_delay` for [`BatchConfig`]. The default is 5 seconds.
    pub fn with_scheduled_delay(mut self, scheduled_delay: Duration) -> Self {
        self.scheduled_delay = scheduled_delay;
        self
    }

    /// Set `max_export_batch_size` for [`BatchConfig`]. The default is 512,
    /// and the value is clamped to `max_queue_size`.
    pub fn with_max_export_batch_size(mut self, max_export_batch_size: usize) -> Self {
        self.max_export_batch_size = max_export_batch_size;
        self
    }

    /// Set `export_timeout` for [`BatchConfig`]. The default is 30 seconds.
    pub fn with_export_timeout(mut self, export_timeout: Duration) -> Self {
        self.export_timeout = export_timeout;
        self
    }

    /// Set the [`DropPolicy`] applied when the queue is full. The default is
    /// [`DropPolicy::DropOldest`].
    pub fn with_drop_policy(mut self, drop_policy: DropPolicy) -> Self {
        self.drop_policy = drop_policy;
        self
    }

    /// Build a [`BatchConfig`], applying any environment variable overrides.
    pub fn build(self) -> BatchConfig {
        let max_queue_size = env_usize(MICROTEL_BSP_MAX_QUEUE_SIZE, self.max_queue_size);
        let max_export_batch_size =
            env_usize(MICROTEL_BSP_MAX_EXPORT_BATCH_SIZE, self.max_export_batch_size)
                .min(max_queue_size);
        BatchConfig {
            max_queue_size,
            scheduled_delay: env_millis(MICROTEL_BSP_SCHEDULE_DELAY, self.scheduled_delay),
            max_export_batch_size,
            export_timeout: env_millis(MICROTEL_BSP_EXPORT_TIMEOUT, self.export_timeout),
            drop_policy: self.drop_policy,
        }
    }
}

fn env_usize(name: &str, default: usize) -> usize {
    match env::var(name) {
        Ok(raw) => match raw.parse() {
            Ok(value) => value,
            Err(_) => {
                tel_warn!(
                    name: "BatchConfig.InvalidEnvValue",
                    variable = name,
                    value = raw.as_str()
                );
                default
            }
        },
        Err(_) => default,
    }
}

fn env_millis(name: &str, default: Duration) -> Duration {
    match env::var(name) {
        Ok(raw) => match raw.parse() {
            Ok(millis) => Duration::from_millis(millis),
            Err(_) => {
                tel_warn!(
                    name: "BatchConfig.InvalidEnvValue",
                    variable = name,
                    value = raw.as_str()
                );
                default
            }
        },
        Err(_) => default,
    }
}

#[derive(Debug)]
struct QueueState {
    queue: VecDeque<SpanData>,
    flush_requests: Vec<SyncSender<TelemetryResult>>,
    shutdown_requested: bool,
    shutdown_ack: Option<SyncSender<TelemetryResult>>,
}

#[derive(Debug)]
struct Shared {
    state: Mutex<QueueState>,
    wakeup: Condvar,
    dropped_spans: AtomicUsize,
    max_queue_size: usize,
    max_export_batch_size: usize,
    drop_policy: DropPolicy,
}

/// A [`SpanProcessor`] that buffers finished spans and exports them in
/// batches from a dedicated worker thread.
///
/// Spans are exported when the buffer reaches the configured batch size or
/// when the scheduled delay elapses, whichever comes first. The buffer is
/// bounded: when it is full the configured [`DropPolicy`] decides which span
/// is lost, and the number of dropped spans is counted and reported.
///
/// The processor fans each batch out to every registered exporter. A failing
/// exporter is logged and does not prevent delivery to the others.
///
/// # Example
///
/// ```
/// use microtel::trace::{BatchSpanProcessor, InMemorySpanExporter, TracerProvider};
///
/// let exporter = InMemorySpanExporter::default();
/// let provider = TracerProvider::builder()
///     .with_span_processor(
///         BatchSpanProcessor::builder()
///             .with_exporter(Box::new(exporter.clone()))
///             .build(),
///     )
///     .build();
///
/// provider.tracer("test").in_span("buffered", |_cx| {});
/// provider.force_flush().unwrap();
/// assert_eq!(exporter.get_finished_spans().unwrap().len(), 1);
/// # provider.shutdown().unwrap();
/// ```
pub struct BatchSpanProcessor {
    shared: Arc<Shared>,
    handle: Mutex<Option<thread::JoinHandle<()>>>,
    is_shutdown: AtomicBool,
    overflow_logged: AtomicBool,
    export_timeout: Duration,
}

impl fmt::Debug for BatchSpanProcessor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BatchSpanProcessor")
            .field("max_queue_size", &self.shared.max_queue_size)
            .field("max_export_batch_size", &self.shared.max_export_batch_size)
            .field("drop_policy", &self.shared.drop_policy)
            .finish()
    }
}

impl BatchSpanProcessor {
    /// Create a builder for a batch processor.
    pub fn builder() -> BatchSpanProcessorBuilder {
        BatchSpanProcessorBuilder::default()
    }

    /// Create a batch processor delivering to a single exporter, using the
    /// given configuration.
    pub fn new(exporter: Box<dyn SpanExporter>, config: BatchConfig) -> Self {
        Self::spawn(vec![exporter], config)
    }

    /// The number of spans dropped so far because the queue was full or the
    /// processor had shut down.
    pub fn dropped_count(&self) -> usize {
        self.shared.dropped_spans.load(Ordering::Relaxed)
    }

    fn spawn(mut exporters: Vec<Box<dyn SpanExporter>>, config: BatchConfig) -> Self {
        let shared = Arc::new(Shared {
            state: Mutex::new(QueueState {
                queue: VecDeque::with_capacity(config.max_queue_size),
                flush_requests: Vec::new(),
                shutdown_requested: false,
                shutdown_ack: None,
            }),
            wakeup: Condvar::new(),
            dropped_spans: AtomicUsize::new(0),
            max_queue_size: config.max_queue_size,
            max_export_batch_size: config.max_export_batch_size,
            drop_policy: config.drop_policy,
        });

        let worker_shared = Arc::clone(&shared);
        let scheduled_delay = config.scheduled_delay;
        let handle = thread::Builder::new()
            .name("microtel.trace.batch_processor".to_string())
            .spawn(move || {
                Worker {
                    shared: worker_shared,
                    scheduled_delay,
                }
                .run(&mut exporters);
            })
            .expect("failed to spawn batch span processor thread");
        tel_info!(
            name: "BatchSpanProcessor.ThreadStarted",
            max_queue_size = config.max_queue_size,
            max_export_batch_size = config.max_export_batch_size,
            scheduled_delay_ms = scheduled_delay.as_millis() as u64
        );

        BatchSpanProcessor {
            shared,
            handle: Mutex::new(Some(handle)),
            is_shutdown: AtomicBool::new(false),
            overflow_logged: AtomicBool::new(false),
            export_timeout: config.export_timeout,
        }
    }

    fn count_drop(&self) {
        self.shared.dropped_spans.fetch_add(1, Ordering::Relaxed);
        // Log the first overflow only; the running total is reported at
        // shutdown.
        if !self.overflow_logged.swap(true, Ordering::Relaxed) {
            tel_warn!(
                name: "BatchSpanProcessor.SpanDropped",
                message = "span buffer overflow or processor shut down, dropping spans"
            );
        }
    }
}

impl SpanProcessor for BatchSpanProcessor {
    fn on_end(&self, span: SpanData) {
        if self.is_shutdown.load(Ordering::Relaxed) {
            self.count_drop();
            return;
        }
        let mut state = match self.shared.state.lock() {
            Ok(state) => state,
            Err(_) => {
                self.count_drop();
                return;
            }
        };
        if state.shutdown_requested {
            drop(state);
            self.count_drop();
            return;
        }

        if state.queue.len() >= self.shared.max_queue_size {
            match self.shared.drop_policy {
                DropPolicy::DropOldest => {
                    state.queue.pop_front();
                    state.queue.push_back(span);
                }
                DropPolicy::DropNewest => {}
            }
            drop(state);
            self.count_drop();
            return;
        }

        state.queue.push_back(span);
        if state.queue.len() >= self.shared.max_export_batch_size {
            self.shared.wakeup.notify_one();
        }
    }

    fn force_flush(&self) -> TelemetryResult {
        if self.is_shutdown.load(Ordering::Relaxed) {
            return Err(TelemetryError::AlreadyShutdown);
        }
        let (ack_tx, ack_rx) = sync_channel(1);
        self.shared.state.lock()?.flush_requests.push(ack_tx);
        self.shared.wakeup.notify_one();
        ack_rx
            .recv_timeout(self.export_timeout)
            .map_err(|_| TelemetryError::Timeout(self.export_timeout))?
    }

    fn shutdown(&self) -> TelemetryResult {
        if self.is_shutdown.swap(true, Ordering::Relaxed) {
            return Err(TelemetryError::AlreadyShutdown);
        }
        let (ack_tx, ack_rx) = sync_channel(1);
        {
            let mut state = self.shared.state.lock()?;
            state.shutdown_requested = true;
            state.shutdown_ack = Some(ack_tx);
        }
        self.shared.wakeup.notify_one();
        let result = ack_rx
            .recv_timeout(self.export_timeout)
            .map_err(|_| TelemetryError::Timeout(self.export_timeout))?;

        if let Some(handle) = self.handle.lock()?.take() {
            let _ = handle.join();
        }

        let dropped = self.dropped_count();
        if dropped > 0 {
            tel_warn!(
                name: "BatchSpanProcessor.Shutdown.SpansDropped",
                dropped_spans = dropped
            );
        }
        result
    }
}

struct Worker {
    shared: Arc<Shared>,
    scheduled_delay: Duration,
}

impl Worker {
    fn run(self, exporters: &mut [Box<dyn SpanExporter>]) {
        let mut next_export = Instant::now() + self.scheduled_delay;
        loop {
            let mut state = match self.shared.state.lock() {
                Ok(state) => state,
                Err(err) => {
                    tel_error!(
                        name: "BatchSpanProcessor.Worker.LockPoisoned",
                        error = format!("{err}")
                    );
                    return;
                }
            };

            // Sleep until there is something to do: a full batch, a flush or
            // shutdown request, or the scheduled deadline.
            while !state.shutdown_requested
                && state.flush_requests.is_empty()
                && state.queue.len() < self.shared.max_export_batch_size
                && Instant::now() < next_export
            {
                let timeout = next_export.saturating_duration_since(Instant::now());
                state = match self.shared.wakeup.wait_timeout(state, timeout) {
                    Ok((state, _)) => state,
                    Err(err) => {
                        tel_error!(
                            name: "BatchSpanProcessor.Worker.LockPoisoned",
                            error = format!("{err}")
                        );
                        return;
                    }
                };
            }

            let shutting_down = state.shutdown_requested;
            let flush_acks = std::mem::take(&mut state.flush_requests);
            let drain_fully = shutting_down || !flush_acks.is_empty();
            let take = if drain_fully {
                state.queue.len()
            } else {
                state.queue.len().min(self.shared.max_export_batch_size)
            };
            let mut spans: Vec<SpanData> = state.queue.drain(..take).collect();
            let shutdown_ack = if shutting_down {
                state.shutdown_ack.take()
            } else {
                None
            };
            drop(state);

            // Export outside the lock so span ends keep queueing meanwhile.
            let mut result = Ok(());
            while !spans.is_empty() {
                let rest = spans.split_off(spans.len().min(self.shared.max_export_batch_size));
                let batch = std::mem::replace(&mut spans, rest);
                if let Err(err) = export_batch(exporters, batch) {
                    result = Err(err);
                }
            }

            for ack in flush_acks {
                let _ = ack.send(result.clone());
            }

            if shutting_down {
                for exporter in exporters.iter_mut() {
                    exporter.shutdown();
                }
                if let Some(ack) = shutdown_ack {
                    let _ = ack.send(result);
                }
                tel_debug!(name: "BatchSpanProcessor.ThreadStopped");
                return;
            }

            next_export += self.scheduled_delay;
            let now = Instant::now();
            if next_export < now {
                // Exports took longer than the interval; realign rather than
                // firing a burst of catch-up exports.
                next_export = now + self.scheduled_delay;
            }
        }
    }
}

/// Delivers one batch to every exporter, cloning for all but the last.
///
/// Failures are logged and isolated per exporter; the returned result is the
/// last failure seen, if any.
fn export_batch(exporters: &mut [Box<dyn SpanExporter>], batch: Vec<SpanData>) -> TelemetryResult {
    if batch.is_empty() {
        return Ok(());
    }
    let mut result = Ok(());
    if let Some((last, rest)) = exporters.split_last_mut() {
        for exporter in rest.iter_mut() {
            if let Err(err) = exporter.export(batch.clone()) {
                tel_warn!(
                    name: "BatchSpanProcessor.Export.Failed",
                    error = format!("{err}")
                );
                result = Err(err);
            }
        }
        if let Err(err) = last.export(batch) {
            tel_warn!(
                name: "BatchSpanProcessor.Export.Failed",
                error = format!("{err}")
            );
            result = Err(err);
        }
    }
    result
}

/// A builder for [`BatchSpanProcessor`].
#[derive(Debug, Default)]
pub struct BatchSpanProcessorBuilder {
    exporters: Vec<Box<dyn SpanExporter>>,
    config: Option<BatchConfig>,
}

impl BatchSpanProcessorBuilder {
    /// Add an exporter the processor delivers batches to. May be called
    /// multiple times; each exporter receives every batch.
    pub fn with_exporter(mut self, exporter: Box<dyn SpanExporter>) -> Self {
        self.exporters.push(exporter);
        self
    }

    /// Use the given batching configuration instead of the default.
    pub fn with_batch_config(mut self, config: BatchConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// Build the processor, starting its worker thread.
    pub fn build(self) -> BatchSpanProcessor {
        BatchSpanProcessor::spawn(self.exporters, self.config.unwrap_or_default())
    }
}
