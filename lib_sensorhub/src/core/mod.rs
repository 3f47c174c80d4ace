//! # Core Pipeline Module
//!
//! Everything between a source reader and the host: the acquisition loop, the
//! output dispatcher with its per-output publications, loop statistics, and
//! the driver lifecycle state machine.
//!
//! ## Core Components:
//!
//! - **`acquisition`**: the timer-driven or continuous loop running
//!   fetch, assemble, publish cycles until cancelled.
//! - **`dispatcher`**: routes assembled records to the output named like
//!   their schema.
//! - **`publication`**: single-slot latest-record cache plus subscriber
//!   fan-out for one output.
//! - **`stats`**: lock-free loop counters.
//! - **`lifecycle`**: `SensorDriver`, the init/start/stop state machine that
//!   owns at most one acquisition task.

/// Fetch, assemble, publish cycles on a timer or back to back.
pub mod acquisition;
/// Routes records to outputs by schema name.
pub mod dispatcher;
/// Init/start/stop state machine.
pub mod lifecycle;
/// Latest-record cache and subscriber fan-out.
pub mod publication;
/// Atomic loop counters.
pub mod stats;

pub use acquisition::{AcquisitionLoop, CycleOutcome, Schedule};
pub use dispatcher::Dispatcher;
pub use lifecycle::{DriverSetup, Prepared, SensorDriver};
pub use publication::{DataEvent, Publication};
pub use stats::{LoopStats, StatsSnapshot};
