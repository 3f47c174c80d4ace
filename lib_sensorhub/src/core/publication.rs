//! # Publication and Latest-Record Cache
//!
//! One `Publication` exists per driver output. Publishing a record does two
//! things, in this order:
//!
//! 1.  **Cache**: the record and its capture time replace the single retained
//!     "latest" value. There is no history.
//! 2.  **Fan-out**: every subscriber receives an `Arc` to the same `DataEvent`
//!     over an unbounded channel. Sending never waits on the subscriber. A
//!     subscriber whose receiver was dropped is removed on the spot.
//!
//! A failing subscriber cannot affect the cache or the loop that publishes.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use log::{debug, info};
use tokio::sync::mpsc;

use crate::record::{Record, TextEncoding};
use crate::schema::RecordSchema;

/// What subscribers receive for every published record.
#[derive(Debug, Clone)]
pub struct DataEvent {
    /// Name of the output that produced the record.
    pub output: String,
    /// Capture time of the record.
    pub time: DateTime<Utc>,
    pub record: Arc<Record>,
}

struct Subscriber {
    id: u64,
    sender: mpsc::UnboundedSender<Arc<DataEvent>>,
}

#[derive(Default)]
struct Inner {
    latest: Option<(Arc<Record>, DateTime<Utc>)>,
    subscribers: Vec<Subscriber>,
    next_id: u64,
}

/// Single-writer, multi-reader cache plus subscriber list for one output.
pub struct Publication {
    schema: Arc<RecordSchema>,
    encoding: TextEncoding,
    inner: Mutex<Inner>,
}

impl Publication {
    pub fn new(schema: Arc<RecordSchema>) -> Self {
        Self {
            schema,
            encoding: TextEncoding::default(),
            inner: Mutex::new(Inner::default()),
        }
    }

    pub fn name(&self) -> &str {
        self.schema.name()
    }

    pub fn schema(&self) -> &Arc<RecordSchema> {
        &self.schema
    }

    /// Recommended text encoding for this output.
    pub fn encoding(&self) -> &TextEncoding {
        &self.encoding
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Registers a subscriber. Dropping the receiver unsubscribes.
    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<Arc<DataEvent>> {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut inner = self.lock();
        inner.next_id += 1;
        let id = inner.next_id;
        inner.subscribers.push(Subscriber { id, sender: tx });
        debug!("subscriber {} registered on '{}'", id, self.name());
        rx
    }

    pub fn subscriber_count(&self) -> usize {
        self.lock().subscribers.len()
    }

    /// Caches `record` as the latest value and notifies every subscriber.
    ///
    /// Returns the number of subscribers that received the event.
    pub fn publish(&self, record: Record) -> usize {
        let time = record.captured_at();
        let record = Arc::new(record);
        let event = Arc::new(DataEvent {
            output: self.name().to_string(),
            time,
            record: Arc::clone(&record),
        });

        let mut inner = self.lock();
        inner.latest = Some((record, time));

        let name = self.schema.name();
        inner.subscribers.retain(|sub| match sub.sender.send(Arc::clone(&event)) {
            Ok(()) => true,
            Err(_) => {
                info!("subscriber {} on '{}' is gone, removing it", sub.id, name);
                false
            }
        });
        inner.subscribers.len()
    }

    /// The most recent record and its capture time. `None` before the first publish.
    pub fn latest(&self) -> Option<(Arc<Record>, DateTime<Utc>)> {
        self.lock().latest.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::SchemaOptions;
    use chrono::TimeZone;

    fn publication() -> Publication {
        let schema = RecordSchema::builder("out")
            .time("time")
            .float("value", "1")
            .build(&SchemaOptions::new())
            .unwrap();
        Publication::new(Arc::new(schema))
    }

    fn record(p: &Publication, secs: i64, value: f64) -> Record {
        let mut r = Record::new(Arc::clone(p.schema()));
        r.stamp(Utc.timestamp_opt(secs, 0).unwrap());
        r.set_float("value", value).unwrap();
        r
    }

    #[test]
    fn latest_is_none_until_first_publish() {
        let p = publication();
        assert!(p.latest().is_none());
        p.publish(record(&p, 10, 1.0));
        p.publish(record(&p, 20, 2.0));
        let (latest, time) = p.latest().unwrap();
        assert_eq!(time.timestamp(), 20);
        assert_eq!(latest.float("value"), Some(2.0));
    }

    #[tokio::test]
    async fn subscribers_receive_events_and_dropped_ones_are_removed() {
        let p = publication();
        let mut alive = p.subscribe();
        let dropped = p.subscribe();
        drop(dropped);
        assert_eq!(p.subscriber_count(), 2);

        assert_eq!(p.publish(record(&p, 5, 3.5)), 1);
        assert_eq!(p.subscriber_count(), 1);

        let event = alive.recv().await.unwrap();
        assert_eq!(event.output, "out");
        assert_eq!(event.time.timestamp(), 5);
        assert_eq!(event.record.float("value"), Some(3.5));

        // Cache is updated regardless of subscriber failures.
        assert_eq!(p.latest().unwrap().1.timestamp(), 5);
    }
}
