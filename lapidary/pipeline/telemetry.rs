use std::{
    fmt,
    path::PathBuf,
    sync::Arc,
    time::{Duration, Instant},
};

use anyhow::Result;
use serde_json::Value;
use shared_event_bus::{EventPublisher, EventRecord};
use shared_logging::{JsonLogger, LogLevel, LogRecord};
use tokio::runtime::{Handle, Runtime};

/// Builder for pipeline telemetry sinks.
pub struct PipelineTelemetryBuilder {
    module: String,
    log_path: Option<PathBuf>,
    stderr: bool,
    min_level: Option<LogLevel>,
    event_publisher: Option<Arc<dyn EventPublisher>>,
}

impl PipelineTelemetryBuilder {
    /// Creates the builder.
    #[must_use]
    pub fn new(module: impl Into<String>) -> Self {
        Self {
            module: module.into(),
            log_path: None,
            stderr: false,
            min_level: None,
            event_publisher: None,
        }
    }

    /// Sets the JSON-lines log path.
    #[must_use]
    pub fn log_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.log_path = Some(path.into());
        self
    }

    /// Mirrors records to stderr.
    #[must_use]
    pub const fn stderr(mut self, echo: bool) -> Self {
        self.stderr = echo;
        self
    }

    /// Overrides the minimum level (otherwise taken from `LAPIDARY_LOG`).
    #[must_use]
    pub const fn min_level(mut self, level: LogLevel) -> Self {
        self.min_level = Some(level);
        self
    }

    /// Sets the event publisher.
    #[must_use]
    pub fn event_publisher(mut self, publisher: Arc<dyn EventPublisher>) -> Self {
        self.event_publisher = Some(publisher);
        self
    }

    /// Builds the telemetry handle.
    pub fn build(self) -> Result<PipelineTelemetry> {
        let logger = match (self.log_path, self.stderr) {
            (Some(path), echo) => Some(JsonLogger::new(path)?.with_stderr_echo(echo)),
            (None, true) => Some(JsonLogger::stderr()),
            (None, false) => None,
        };
        let logger = logger.map(|logger| match self.min_level {
            Some(level) => logger.with_min_level(level),
            None => logger.from_env(),
        });
        let event = self.event_publisher.map(EventHandle::new).transpose()?;
        Ok(PipelineTelemetry {
            inner: Some(Arc::new(TelemetryInner { logger, event })),
            module: self.module,
            run_id: None,
        })
    }
}

/// Telemetry handle shared across pipeline stages.
///
/// The default handle discards everything, so stages can always log.
#[derive(Clone, Default)]
pub struct PipelineTelemetry {
    inner: Option<Arc<TelemetryInner>>,
    module: String,
    run_id: Option<String>,
}

impl fmt::Debug for PipelineTelemetry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PipelineTelemetry")
            .field("module", &self.module)
            .field("run_id", &self.run_id)
            .field("enabled", &self.inner.is_some())
            .finish()
    }
}

struct TelemetryInner {
    logger: Option<JsonLogger>,
    event: Option<EventHandle>,
}

struct EventHandle {
    runtime: Runtime,
    publisher: Arc<dyn EventPublisher>,
}

impl EventHandle {
    fn new(publisher: Arc<dyn EventPublisher>) -> Result<Self> {
        Ok(Self {
            runtime: Runtime::new()?,
            publisher,
        })
    }

    fn publish(&self, record: EventRecord) -> Result<()> {
        if let Ok(handle) = Handle::try_current() {
            let publisher = Arc::clone(&self.publisher);
            handle.spawn(async move {
                if let Err(err) = publisher.publish(record).await {
                    eprintln!("telemetry event publish failed: {err:?}");
                }
            });
            Ok(())
        } else {
            self.runtime.block_on(self.publisher.publish(record))
        }
    }
}

impl PipelineTelemetry {
    /// Returns a builder.
    #[must_use]
    pub fn builder(module: impl Into<String>) -> PipelineTelemetryBuilder {
        PipelineTelemetryBuilder::new(module)
    }

    /// Handle that discards every record and event.
    #[must_use]
    pub fn disabled() -> Self {
        Self::default()
    }

    /// Same sinks, different component name.
    #[must_use]
    pub fn scoped(&self, module: impl Into<String>) -> Self {
        Self {
            inner: self.inner.clone(),
            module: module.into(),
            run_id: self.run_id.clone(),
        }
    }

    /// Same sinks, records tagged with `run_id`.
    #[must_use]
    pub fn with_run_id(&self, run_id: impl Into<String>) -> Self {
        Self {
            inner: self.inner.clone(),
            module: self.module.clone(),
            run_id: Some(run_id.into()),
        }
    }

    /// Run id attached to records, if any.
    #[must_use]
    pub fn run_id(&self) -> Option<&str> {
        self.run_id.as_deref()
    }

    /// Logs structured metadata.
    pub fn log(&self, level: LogLevel, message: &str, metadata: Value) -> Result<()> {
        let Some(logger) = self.inner.as_ref().and_then(|inner| inner.logger.as_ref()) else {
            return Ok(());
        };
        if !logger.enabled(level) {
            return Ok(());
        }
        let mut record = LogRecord::new(&self.module, level, message).with_metadata(metadata);
        if let Some(run_id) = &self.run_id {
            record = record.with_run_id(run_id.clone());
        }
        logger.log(&record)
    }

    /// Emits an event on the bus.
    pub fn event(&self, event_type: &str, payload: Value) -> Result<()> {
        if let Some(handle) = self.inner.as_ref().and_then(|inner| inner.event.as_ref()) {
            let payload = match (&self.run_id, payload) {
                (Some(run_id), Value::Object(mut map)) => {
                    map.entry("runId").or_insert_with(|| Value::String(run_id.clone()));
                    Value::Object(map)
                }
                (_, payload) => payload,
            };
            handle.publish(EventRecord::new(self.module.clone(), event_type, payload))?;
        }
        Ok(())
    }

    /// Runs `work` and measures its wall-clock duration.
    pub fn timed<T>(&self, work: impl FnOnce() -> T) -> (T, Duration) {
        let started = Instant::now();
        let out = work();
        (out, started.elapsed())
    }
}
