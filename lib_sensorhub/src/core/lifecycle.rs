//! # Driver Lifecycle
//!
//! `SensorDriver` is the state machine a host drives:
//!
//! ```text
//! Uninitialized --init--> Initialized --start--> Running --stop--> Stopped
//!                              ^                                      |
//!                              +----------------init------------------+
//! ```
//!
//! - `init` builds the schemas, runs the one-time capability query and opens
//!   the source. It is the only operation whose errors reach the host.
//! - `start` spawns the single acquisition task. Calling it while running is a
//!   no-op. A stopped driver needs a fresh `init` before it can start again.
//! - `stop` cancels the task's token and returns immediately. The current
//!   cycle finishes, then the task exits. Calling it again is a no-op.
//!   `shutdown` is `stop` followed by waiting for the task.
//!
//! Lifecycle methods take `&mut self`, so at most one transition happens at a
//! time and at most one acquisition task exists per driver.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use log::{info, warn};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::assemble::Assembler;
use crate::errors::{ConfigurationError, DriverError};
use crate::record::Record;
use crate::schema::RecordSchema;
use crate::source::SourceReader;

use super::acquisition::{AcquisitionLoop, Schedule};
use super::dispatcher::Dispatcher;
use super::publication::DataEvent;
use super::stats::{LoopStats, StatsSnapshot};

/// Everything `init` produces for one driver.
pub struct Prepared<R, A> {
    pub reader: R,
    pub assembler: A,
    /// One schema per output.
    pub schemas: Vec<Arc<RecordSchema>>,
    pub schedule: Schedule,
    /// Expected cadence of records. Equals the period for periodic schedules.
    pub sampling_period: Duration,
}

/// Driver-specific part of `init`.
#[async_trait]
pub trait DriverSetup: Send + Sync + 'static {
    type Config: Send + 'static;
    type Reader: SourceReader + 'static;
    type Assembler: Assembler<Unit = <Self::Reader as SourceReader>::Unit> + 'static;

    /// Short name used in log lines.
    fn name(&self) -> &str;

    /// Builds schemas, queries the device once if needed, and opens the source.
    async fn prepare(
        &self,
        config: Self::Config,
    ) -> Result<Prepared<Self::Reader, Self::Assembler>, ConfigurationError>;
}

enum State<R, A> {
    Uninitialized,
    Initialized { reader: R, assembler: A },
    Running { cancel: CancellationToken, worker: JoinHandle<()> },
    Stopped { worker: Option<JoinHandle<()>> },
}

impl<R, A> State<R, A> {
    fn label(&self) -> &'static str {
        match self {
            State::Uninitialized => "uninitialized",
            State::Initialized { .. } => "initialized",
            State::Running { .. } => "running",
            State::Stopped { .. } => "stopped",
        }
    }
}

/// A driver instance: lifecycle state plus its outputs.
pub struct SensorDriver<D: DriverSetup> {
    setup: D,
    state: State<D::Reader, D::Assembler>,
    dispatcher: Option<Arc<Dispatcher>>,
    stats: Arc<LoopStats>,
    schedule: Schedule,
    sampling_period: Option<Duration>,
}

impl<D: DriverSetup> SensorDriver<D> {
    pub fn new(setup: D) -> Self {
        Self {
            setup,
            state: State::Uninitialized,
            dispatcher: None,
            stats: Arc::new(LoopStats::default()),
            schedule: Schedule::Continuous,
            sampling_period: None,
        }
    }

    pub fn state_name(&self) -> &'static str {
        self.state.label()
    }

    pub fn is_running(&self) -> bool {
        matches!(self.state, State::Running { .. })
    }

    fn lifecycle_error(&self, operation: &'static str) -> DriverError {
        DriverError::Lifecycle {
            operation,
            state: self.state.label(),
        }
    }

    /// Prepares the driver. Allowed when uninitialized, initialized (re-init)
    /// or stopped with its worker gone.
    pub async fn init(&mut self, config: D::Config) -> Result<(), DriverError> {
        match &self.state {
            State::Running { .. } => return Err(self.lifecycle_error("init")),
            State::Stopped { worker: Some(worker) } if !worker.is_finished() => {
                return Err(DriverError::Lifecycle {
                    operation: "init",
                    state: "stopping",
                });
            }
            _ => {}
        }

        let prepared = self.setup.prepare(config).await?;
        let stats = Arc::new(LoopStats::default());
        let dispatcher = Dispatcher::new(prepared.schemas, Arc::clone(&stats));
        info!(
            "{} initialized with outputs [{}]",
            self.setup.name(),
            dispatcher.outputs().map(|o| o.name()).collect::<Vec<_>>().join(", ")
        );

        self.dispatcher = Some(Arc::new(dispatcher));
        self.stats = stats;
        self.schedule = prepared.schedule;
        self.sampling_period = Some(prepared.sampling_period);
        self.state = State::Initialized {
            reader: prepared.reader,
            assembler: prepared.assembler,
        };
        Ok(())
    }

    /// Spawns the acquisition task. Must be called inside a tokio runtime.
    pub fn start(&mut self) -> Result<(), DriverError> {
        if self.is_running() {
            return Ok(());
        }
        let Some(dispatcher) = self.dispatcher.clone() else {
            return Err(self.lifecycle_error("start"));
        };

        match std::mem::replace(&mut self.state, State::Uninitialized) {
            State::Initialized { reader, assembler } => {
                let cancel = CancellationToken::new();
                let acquisition = AcquisitionLoop::new(reader, assembler, dispatcher, Arc::clone(&self.stats));
                let worker = tokio::spawn(acquisition.run(self.schedule, cancel.clone()));
                self.state = State::Running { cancel, worker };
                info!("{} started", self.setup.name());
                Ok(())
            }
            other => {
                self.state = other;
                Err(self.lifecycle_error("start"))
            }
        }
    }

    /// Signals the acquisition task to exit and returns without waiting.
    pub fn stop(&mut self) {
        match std::mem::replace(&mut self.state, State::Uninitialized) {
            State::Running { cancel, worker } => {
                cancel.cancel();
                info!("{} stopping", self.setup.name());
                self.state = State::Stopped { worker: Some(worker) };
            }
            State::Initialized { .. } => {
                self.state = State::Stopped { worker: None };
            }
            other => self.state = other,
        }
    }

    /// `stop`, then waits for the acquisition task to finish its last cycle.
    pub async fn shutdown(&mut self) {
        self.stop();
        if let State::Stopped { worker } = &mut self.state {
            if let Some(handle) = worker.take() {
                if let Err(e) = handle.await {
                    warn!("{} worker ended abnormally: {}", self.setup.name(), e);
                }
            }
        }
    }

    /// Names of all outputs, sorted.
    pub fn output_names(&self) -> Vec<String> {
        self.dispatcher
            .iter()
            .flat_map(|d| d.outputs().map(|o| o.name().to_string()))
            .collect()
    }

    pub fn get_record_schema(&self, output: &str) -> Option<Arc<RecordSchema>> {
        self.dispatcher.as_ref()?.output(output).map(|o| Arc::clone(o.schema()))
    }

    /// Latest record of `output` and its capture time, `None` before the first cycle.
    pub fn get_latest(&self, output: &str) -> Option<(Arc<Record>, DateTime<Utc>)> {
        self.dispatcher.as_ref()?.output(output)?.latest()
    }

    pub fn subscribe(&self, output: &str) -> Option<mpsc::UnboundedReceiver<Arc<DataEvent>>> {
        Some(self.dispatcher.as_ref()?.output(output)?.subscribe())
    }

    pub fn get_average_sampling_period(&self) -> Option<Duration> {
        self.sampling_period
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }
}

impl<D: DriverSetup> Drop for SensorDriver<D> {
    fn drop(&mut self) {
        self.stop();
    }
}
