use crate::trace::{
    IdGenerator, RandomIdGenerator, Sampler, ShouldSample, SimpleSpanProcessor, SpanExporter,
    SpanProcessor, Tracer,
};
use crate::trace::span_processor::{BatchConfig, BatchSpanProcessor};
use crate::{tel_debug, TelemetryError, TelemetryResult};
use std::borrow::Cow;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Per-provider settings shared by every span it creates.
#[derive(Debug)]
pub struct Config {
    /// The sampler consulted when each span starts.
    pub sampler: Box<dyn ShouldSample>,
    /// The generator that mints trace and span ids.
    pub id_generator: Box<dyn IdGenerator>,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            sampler: Box::new(Sampler::AlwaysOn),
            id_generator: Box::new(RandomIdGenerator::default()),
        }
    }
}

#[derive(Debug)]
struct TracerProviderInner {
    processors: Vec<Box<dyn SpanProcessor>>,
    config: Config,
    is_shutdown: AtomicBool,
}

impl TracerProviderInner {
    /// Shuts down the registered processors, once.
    fn shutdown(&self) -> Vec<TelemetryError> {
        let mut errors = Vec::new();
        for processor in &self.processors {
            if let Err(err) = processor.shutdown() {
                tel_debug!(
                    name: "TracerProvider.Shutdown.Error",
                    error = format!("{err}")
                );
                errors.push(err);
            }
        }
        errors
    }
}

impl Drop for TracerProviderInner {
    fn drop(&mut self) {
        // The last reference going away flushes remaining telemetry even if
        // shutdown was never called explicitly.
        if !self.is_shutdown.swap(true, Ordering::SeqCst) {
            let _ = self.shutdown();
        }
    }
}

/// Creates and manages [`Tracer`]s, and owns the span processing pipeline.
///
/// Providers are cheap to clone; clones share the same pipeline. Spans that
/// finish after [`shutdown`] are discarded.
///
/// [`shutdown`]: TracerProvider::shutdown
#[derive(Clone, Debug)]
pub struct TracerProvider {
    inner: Arc<TracerProviderInner>,
}

impl Default for TracerProvider {
    /// A provider that samples everything and exports nowhere.
    fn default() -> Self {
        TracerProvider::builder().build()
    }
}

impl TracerProvider {
    /// Create a builder for a `TracerProvider`.
    pub fn builder() -> TracerProviderBuilder {
        TracerProviderBuilder::default()
    }

    /// Returns a [`Tracer`] with the given instrumentation scope name.
    pub fn tracer(&self, name: impl Into<Cow<'static, str>>) -> Tracer {
        Tracer::new(name.into(), self.clone())
    }

    /// Drains every processor's buffered spans to the exporters.
    ///
    /// Returns the first error encountered; the remaining processors are
    /// still flushed.
    pub fn force_flush(&self) -> TelemetryResult {
        let mut result = Ok(());
        for processor in &self.inner.processors {
            if let Err(err) = processor.force_flush() {
                if result.is_ok() {
                    result = Err(err);
                }
            }
        }
        result
    }

    /// Flushes remaining spans and shuts the pipeline down.
    ///
    /// Spans finishing after this call are discarded. Subsequent calls
    /// return [`TelemetryError::AlreadyShutdown`].
    pub fn shutdown(&self) -> TelemetryResult {
        if self.inner.is_shutdown.swap(true, Ordering::SeqCst) {
            return Err(TelemetryError::AlreadyShutdown);
        }
        match self.inner.shutdown().into_iter().next() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    pub(crate) fn is_shutdown(&self) -> bool {
        self.inner.is_shutdown.load(Ordering::SeqCst)
    }

    pub(crate) fn config(&self) -> &Config {
        &self.inner.config
    }

    pub(crate) fn span_processors(&self) -> &[Box<dyn SpanProcessor>] {
        &self.inner.processors
    }
}

/// Builder for [`TracerProvider`].
#[derive(Debug, Default)]
pub struct TracerProviderBuilder {
    processors: Vec<Box<dyn SpanProcessor>>,
    sampler: Option<Box<dyn ShouldSample>>,
    id_generator: Option<Box<dyn IdGenerator>>,
}

impl TracerProviderBuilder {
    /// The [`SpanExporter`] that spans are exported to, one at a time as they
    /// end, via a [`SimpleSpanProcessor`].
    pub fn with_simple_exporter(self, exporter: Box<dyn SpanExporter>) -> Self {
        self.with_span_processor(SimpleSpanProcessor::new(exporter))
    }

    /// The [`SpanExporter`] that spans are batched to via a
    /// [`BatchSpanProcessor`] with default configuration.
    pub fn with_batch_exporter(self, exporter: Box<dyn SpanExporter>) -> Self {
        self.with_span_processor(BatchSpanProcessor::new(exporter, BatchConfig::default()))
    }

    /// Adds a [`SpanProcessor`] to the pipeline. Every finished sampled span
    /// is delivered to each registered processor in registration order.
    pub fn with_span_processor<T: SpanProcessor + 'static>(mut self, processor: T) -> Self {
        self.processors.push(Box::new(processor));
        self
    }

    /// The sampler consulted when each span starts. Defaults to
    /// [`Sampler::AlwaysOn`].
    pub fn with_sampler<T: ShouldSample + 'static>(mut self, sampler: T) -> Self {
        self.sampler = Some(Box::new(sampler));
        self
    }

    /// The [`IdGenerator`] used to mint trace and span ids. Defaults to
    /// [`RandomIdGenerator`].
    pub fn with_id_generator<T: IdGenerator + 'static>(mut self, id_generator: T) -> Self {
        self.id_generator = Some(Box::new(id_generator));
        self
    }

    /// Create a [`TracerProvider`] with the given configuration.
    pub fn build(self) -> TracerProvider {
        let default_config = Config::default();
        TracerProvider {
            inner: Arc::new(TracerProviderInner {
                processors: self.processors,
                config: Config {
                    sampler: self.sampler.unwrap_or(default_config.sampler),
                    id_generator: self.id_generator.unwrap_or(default_config.id_generator),
                },
                is_shutdown: AtomicBool::new(false),
            }),
        }
    }
}
