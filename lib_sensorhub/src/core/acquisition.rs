//! # Acquisition Loop
//!
//! Repeats one cycle (fetch a raw unit, assemble it, dispatch the records)
//! until cancelled. Two scheduling disciplines exist:
//!
//! - **`Schedule::Periodic`**: a `tokio::time::interval` tick starts each cycle.
//!   The cycle runs inside the tick handler, so cycles never overlap. A cycle
//!   that overruns the period delays the next tick instead of bursting.
//! - **`Schedule::Continuous`**: the next cycle starts as soon as the previous
//!   one ends. The reader's own idle wait (new file, stream bytes, reconnect
//!   backoff) paces the loop.
//!
//! Every per-cycle error is contained here: counted, logged, and the loop
//! carries on. Cancellation is checked at the loop head and inside the
//! reader's idle waits; an in-flight fetch is never interrupted.

use std::sync::Arc;
use std::time::Duration;

use log::{info, warn};
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::assemble::Assembler;
use crate::errors::DriverError;
use crate::source::SourceReader;

use super::dispatcher::Dispatcher;
use super::stats::LoopStats;

/// How cycles are triggered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Schedule {
    Periodic(Duration),
    Continuous,
}

/// Outcome of one cycle, mostly useful to tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleOutcome {
    Published(usize),
    Idle,
    Failed,
}

pub struct AcquisitionLoop<R, A> {
    reader: R,
    assembler: A,
    dispatcher: Arc<Dispatcher>,
    stats: Arc<LoopStats>,
}

impl<R, A> AcquisitionLoop<R, A>
where
    R: SourceReader,
    A: Assembler<Unit = R::Unit>,
{
    pub fn new(reader: R, assembler: A, dispatcher: Arc<Dispatcher>, stats: Arc<LoopStats>) -> Self {
        Self {
            reader,
            assembler,
            dispatcher,
            stats,
        }
    }

    /// Runs one fetch, assemble, publish cycle.
    pub async fn cycle(&mut self, cancel: &CancellationToken) -> CycleOutcome {
        self.stats.record_cycle();
        let unit = match self.reader.next_unit(cancel).await {
            Ok(Some(unit)) => unit,
            Ok(None) => {
                self.stats.record_idle();
                return CycleOutcome::Idle;
            }
            Err(e) => {
                self.report(&e);
                return CycleOutcome::Failed;
            }
        };

        let assembled = self.assembler.assemble(unit);
        for rejected in self.assembler.take_rejected() {
            self.stats.record_error(&rejected);
            warn!("{}: part skipped: {}", self.reader.describe(), rejected);
        }
        match assembled {
            Ok(records) => {
                let count = records.len();
                for record in records {
                    self.dispatcher.dispatch(record);
                }
                CycleOutcome::Published(count)
            }
            Err(e) => {
                self.report(&e);
                CycleOutcome::Failed
            }
        }
    }

    fn report(&self, err: &DriverError) {
        self.stats.record_error(err);
        warn!("{}: cycle skipped: {}", self.reader.describe(), err);
    }

    /// Runs cycles until `cancel` fires.
    pub async fn run(mut self, schedule: Schedule, cancel: CancellationToken) {
        info!("acquisition started on {} ({:?})", self.reader.describe(), schedule);
        match schedule {
            Schedule::Periodic(period) => {
                let mut ticker = interval(period);
                ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
                loop {
                    tokio::select! {
                        biased;
                        _ = cancel.cancelled() => break,
                        _ = ticker.tick() => {}
                    }
                    self.cycle(&cancel).await;
                }
            }
            Schedule::Continuous => {
                while !cancel.is_cancelled() {
                    self.cycle(&cancel).await;
                }
            }
        }
        info!("acquisition stopped on {}", self.reader.describe());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assemble::Assembled;
    use crate::errors::TransientFetchError;
    use crate::record::Record;
    use crate::schema::{RecordSchema, SchemaOptions};
    use async_trait::async_trait;
    use std::collections::VecDeque;

    struct Scripted(VecDeque<Result<Option<u32>, DriverError>>);

    #[async_trait]
    impl SourceReader for Scripted {
        type Unit = u32;

        fn describe(&self) -> String {
            "scripted".into()
        }

        async fn next_unit(&mut self, cancel: &CancellationToken) -> Result<Option<u32>, DriverError> {
            match self.0.pop_front() {
                Some(step) => step,
                None => {
                    cancel.cancelled().await;
                    Ok(None)
                }
            }
        }
    }

    struct Repeat(Arc<RecordSchema>);

    impl Assembler for Repeat {
        type Unit = u32;

        fn assemble(&mut self, n: u32) -> Result<Vec<Assembled>, DriverError> {
            Ok((0..n).map(|_| Assembled::complete(Record::new(Arc::clone(&self.0)))).collect())
        }
    }

    fn setup(steps: Vec<Result<Option<u32>, DriverError>>) -> (AcquisitionLoop<Scripted, Repeat>, Arc<LoopStats>) {
        let schema = Arc::new(RecordSchema::builder("out").time("time").build(&SchemaOptions::new()).unwrap());
        let stats = Arc::new(LoopStats::default());
        let dispatcher = Arc::new(Dispatcher::new([Arc::clone(&schema)], Arc::clone(&stats)));
        let lp = AcquisitionLoop::new(Scripted(steps.into()), Repeat(schema), dispatcher, Arc::clone(&stats));
        (lp, stats)
    }

    #[tokio::test]
    async fn errors_are_contained_and_the_loop_continues() {
        let (lp, stats) = setup(vec![
            Ok(Some(2)),
            Err(TransientFetchError::Closed.into()),
            Ok(None),
            Ok(Some(1)),
        ]);
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(lp.run(Schedule::Continuous, cancel.clone()));

        while stats.snapshot().published < 3 {
            tokio::task::yield_now().await;
        }
        cancel.cancel();
        handle.await.unwrap();

        let s = stats.snapshot();
        assert_eq!(s.published, 3);
        assert_eq!(s.fetch_failures, 1);
        assert!(s.idle >= 1);
    }

    #[tokio::test(start_paused = true)]
    async fn periodic_loop_stops_on_cancel() {
        let (lp, stats) = setup(vec![Ok(Some(1)), Ok(Some(1))]);
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(lp.run(Schedule::Periodic(Duration::from_secs(1)), cancel.clone()));

        tokio::time::sleep(Duration::from_millis(1500)).await;
        assert_eq!(stats.snapshot().published, 2);

        cancel.cancel();
        handle.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn cancelled_before_start_runs_no_cycle() {
        let (lp, stats) = setup(vec![Ok(Some(1))]);
        let cancel = CancellationToken::new();
        cancel.cancel();

        // The first tick is ready immediately, cancellation still wins.
        for _ in 0..20 {
            let (lp, stats) = setup(vec![Ok(Some(1))]);
            lp.run(Schedule::Periodic(Duration::from_secs(1)), cancel.clone()).await;
            assert_eq!(stats.snapshot().cycles, 0);
        }
        lp.run(Schedule::Continuous, cancel).await;
        assert_eq!(stats.snapshot().cycles, 0);
    }
}
