//! Stream-name subscription dispatcher
//!
//! Maps inbound pushed records to the callbacks registered for their stream
//! name. The dispatcher is an owned object handed by reference to whichever
//! component performs ingestion; there is no process-wide registry.
//!
//! `dispatch` may run concurrently from many ingest threads while
//! `subscribe` races with it: the registry is a read-mostly lock, and every
//! dispatch clones the per-stream callback list out of the read lock
//! (copy-on-read snapshot) before invoking anything, so callbacks run
//! without the lock held.

use crate::metrics::Metrics;
use edgeflow_core::Record;
use rustc_hash::FxHashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use tracing::{debug, warn};

/// A registered callback. Failures are logged and isolated, never surfaced
/// to the dispatch caller.
pub type Callback = Arc<dyn Fn(Record) -> anyhow::Result<()> + Send + Sync>;

/// Handle identifying one registration, used to unsubscribe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Subscription {
    stream: String,
    id: u64,
}

impl Subscription {
    pub fn stream(&self) -> &str {
        &self.stream
    }
}

struct CallbackEntry {
    id: u64,
    callback: Callback,
}

/// Routes records to every callback registered for their stream name.
pub struct SubscriptionDispatcher {
    streams: RwLock<FxHashMap<String, Vec<CallbackEntry>>>,
    next_id: AtomicU64,
    metrics: Option<Arc<Metrics>>,
}

impl SubscriptionDispatcher {
    pub fn new() -> Self {
        Self {
            streams: RwLock::new(FxHashMap::default()),
            next_id: AtomicU64::new(0),
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Appends `callback` to the ordered list for `stream`. Registration
    /// order defines invocation order; multiple callbacks per stream are
    /// allowed.
    pub fn subscribe<F>(&self, stream: &str, callback: F) -> Subscription
    where
        F: Fn(Record) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let mut streams = self.streams.write().expect("dispatcher lock poisoned");
        streams
            .entry(stream.to_string())
            .or_default()
            .push(CallbackEntry {
                id,
                callback: Arc::new(callback),
            });
        debug!(stream, id, "callback subscribed");
        Subscription {
            stream: stream.to_string(),
            id,
        }
    }

    /// Removes exactly the registration behind `subscription`. Returns
    /// whether anything was removed.
    pub fn unsubscribe(&self, subscription: &Subscription) -> bool {
        let mut streams = self.streams.write().expect("dispatcher lock poisoned");
        let Some(entries) = streams.get_mut(&subscription.stream) else {
            return false;
        };
        let before = entries.len();
        entries.retain(|entry| entry.id != subscription.id);
        let removed = entries.len() < before;
        if entries.is_empty() {
            streams.remove(&subscription.stream);
        }
        if removed {
            debug!(stream = %subscription.stream, id = subscription.id, "callback unsubscribed");
        }
        removed
    }

    /// Number of callbacks currently registered for `stream`.
    pub fn callback_count(&self, stream: &str) -> usize {
        self.streams
            .read()
            .expect("dispatcher lock poisoned")
            .get(stream)
            .map(Vec::len)
            .unwrap_or(0)
    }

    /// Invokes every callback registered for `stream`, in registration
    /// order, with its own clone of `record`.
    ///
    /// An unmatched stream is a silent no-op. A callback error or panic is
    /// logged and never prevents the remaining callbacks for this record,
    /// or any later dispatch, from running. Returns the number of callbacks
    /// invoked.
    pub fn dispatch(&self, stream: &str, record: &Record) -> usize {
        let snapshot: Vec<(u64, Callback)> = {
            let streams = self.streams.read().expect("dispatcher lock poisoned");
            match streams.get(stream) {
                Some(entries) => entries
                    .iter()
                    .map(|e| (e.id, Arc::clone(&e.callback)))
                    .collect(),
                None => {
                    debug!(stream, "no subscription for stream, dropping record");
                    return 0;
                }
            }
        };

        for (id, callback) in &snapshot {
            match catch_unwind(AssertUnwindSafe(|| callback(record.clone()))) {
                Ok(Ok(())) => {}
                Ok(Err(error)) => {
                    warn!(stream, id, error = %error, "subscription callback failed");
                    if let Some(m) = &self.metrics {
                        m.record_callback_error(stream);
                    }
                }
                Err(_) => {
                    warn!(stream, id, "subscription callback panicked");
                    if let Some(m) = &self.metrics {
                        m.record_callback_error(stream);
                    }
                }
            }
        }

        if let Some(m) = &self.metrics {
            m.record_dispatched(stream, snapshot.len() as u64);
        }
        snapshot.len()
    }
}

impl Default for SubscriptionDispatcher {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    fn recorder(log: Arc<Mutex<Vec<String>>>, tag: &str) -> impl Fn(Record) -> anyhow::Result<()> {
        let tag = tag.to_string();
        move |_| {
            log.lock().unwrap().push(tag.clone());
            Ok(())
        }
    }

    #[test]
    fn callbacks_run_in_registration_order_exactly_once() {
        let dispatcher = SubscriptionDispatcher::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        dispatcher.subscribe("s1", recorder(Arc::clone(&log), "f1"));
        dispatcher.subscribe("s1", recorder(Arc::clone(&log), "f2"));

        let invoked = dispatcher.dispatch("s1", &Record::new("s1"));
        assert_eq!(invoked, 2);
        assert_eq!(*log.lock().unwrap(), vec!["f1", "f2"]);
    }

    #[test]
    fn unmatched_stream_is_a_silent_no_op() {
        let dispatcher = SubscriptionDispatcher::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        dispatcher.subscribe("s1", recorder(Arc::clone(&log), "f1"));

        assert_eq!(dispatcher.dispatch("s2", &Record::new("s2")), 0);
        assert!(log.lock().unwrap().is_empty());
    }

    #[test]
    fn failing_callback_does_not_block_siblings_or_later_dispatches() {
        let dispatcher = SubscriptionDispatcher::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        dispatcher.subscribe("s1", |_| anyhow::bail!("intentional failure"));
        dispatcher.subscribe("s1", recorder(Arc::clone(&log), "f2"));

        assert_eq!(dispatcher.dispatch("s1", &Record::new("s1")), 2);
        assert_eq!(dispatcher.dispatch("s1", &Record::new("s1")), 2);
        assert_eq!(*log.lock().unwrap(), vec!["f2", "f2"]);
    }

    #[test]
    fn panicking_callback_is_contained() {
        let dispatcher = SubscriptionDispatcher::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        dispatcher.subscribe("s1", |_| panic!("callback bug"));
        dispatcher.subscribe("s1", recorder(Arc::clone(&log), "f2"));

        assert_eq!(dispatcher.dispatch("s1", &Record::new("s1")), 2);
        assert_eq!(*log.lock().unwrap(), vec!["f2"]);
    }

    #[test]
    fn unsubscribe_removes_exactly_one_registration() {
        let dispatcher = SubscriptionDispatcher::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        let sub1 = dispatcher.subscribe("s1", recorder(Arc::clone(&log), "f1"));
        dispatcher.subscribe("s1", recorder(Arc::clone(&log), "f2"));

        assert!(dispatcher.unsubscribe(&sub1));
        assert!(!dispatcher.unsubscribe(&sub1));
        assert_eq!(dispatcher.callback_count("s1"), 1);

        dispatcher.dispatch("s1", &Record::new("s1"));
        assert_eq!(*log.lock().unwrap(), vec!["f2"]);
    }

    #[test]
    fn subscribe_races_with_dispatch() {
        let dispatcher = Arc::new(SubscriptionDispatcher::new());
        let hits = Arc::new(AtomicU64::new(0));

        let d = Arc::clone(&dispatcher);
        let h = Arc::clone(&hits);
        let subscriber = std::thread::spawn(move || {
            for _ in 0..100 {
                let h = Arc::clone(&h);
                d.subscribe("s1", move |_| {
                    h.fetch_add(1, Ordering::Relaxed);
                    Ok(())
                });
            }
        });

        let d = Arc::clone(&dispatcher);
        let dispatcher_thread = std::thread::spawn(move || {
            for _ in 0..100 {
                d.dispatch("s1", &Record::new("s1"));
            }
        });

        subscriber.join().unwrap();
        dispatcher_thread.join().unwrap();

        // All registrations survived the race.
        assert_eq!(dispatcher.callback_count("s1"), 100);
        // Once quiescent, one dispatch hits every callback exactly once.
        hits.store(0, Ordering::Relaxed);
        dispatcher.dispatch("s1", &Record::new("s1"));
        assert_eq!(hits.load(Ordering::Relaxed), 100);
    }
}
