//! Push-ingestion path: line-protocol decoding feeding the dispatcher.

use edgeflow_core::Record;
use edgeflow_runtime::{linefmt, SubscriptionDispatcher};
use std::sync::{Arc, Mutex};

/// The shape of the external listener: decode each pushed line, look up the
/// stream name, hand the record to the dispatcher.
fn ingest(dispatcher: &SubscriptionDispatcher, line: &str) -> usize {
    let Some(stream) = linefmt::stream_name(line) else {
        return 0;
    };
    match linefmt::decode(line) {
        Ok(record) => dispatcher.dispatch(stream, &record),
        Err(_) => 0,
    }
}

#[test]
fn pushed_lines_reach_subscribed_callbacks() {
    let dispatcher = SubscriptionDispatcher::new();
    let seen: Arc<Mutex<Vec<Record>>> = Arc::new(Mutex::new(Vec::new()));

    let sink = Arc::clone(&seen);
    dispatcher.subscribe("classifier_results", move |record| {
        sink.lock().unwrap().push(record);
        Ok(())
    });

    let invoked = ingest(
        &dispatcher,
        "classifier_results,cam_sn=B1 ImgHandle=\"img42\",idx=7i 1588791183",
    );
    assert_eq!(invoked, 1);

    let records = seen.lock().unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].topic.as_ref(), "classifier_results");
    assert_eq!(records[0].get_str("cam_sn"), Some("B1"));
    assert_eq!(records[0].get_str("ImgHandle"), Some("img42"));
    assert_eq!(records[0].get_int("idx"), Some(7));
    assert_eq!(records[0].get_int(linefmt::TIMESTAMP_KEY), Some(1588791183));
}

#[test]
fn unsubscribed_measurements_are_ignored() {
    let dispatcher = SubscriptionDispatcher::new();
    let hits = Arc::new(Mutex::new(0usize));

    let counter = Arc::clone(&hits);
    dispatcher.subscribe("point_data", move |_| {
        *counter.lock().unwrap() += 1;
        Ok(())
    });

    assert_eq!(ingest(&dispatcher, "other_stream v=1i"), 0);
    assert_eq!(ingest(&dispatcher, "point_data v=2i"), 1);
    assert_eq!(*hits.lock().unwrap(), 1);
}

#[test]
fn malformed_lines_never_reach_callbacks() {
    let dispatcher = SubscriptionDispatcher::new();
    let hits = Arc::new(Mutex::new(0usize));

    let counter = Arc::clone(&hits);
    dispatcher.subscribe("s", move |_| {
        *counter.lock().unwrap() += 1;
        Ok(())
    });

    // Measurement matches but the line has no field set.
    assert_eq!(ingest(&dispatcher, "s"), 0);
    assert_eq!(*hits.lock().unwrap(), 0);
}

#[test]
fn two_callbacks_fire_in_order_per_pushed_record() {
    let dispatcher = SubscriptionDispatcher::new();
    let order = Arc::new(Mutex::new(Vec::new()));

    for tag in ["first", "second"] {
        let log = Arc::clone(&order);
        dispatcher.subscribe("s", move |_| {
            log.lock().unwrap().push(tag);
            Ok(())
        });
    }

    assert_eq!(ingest(&dispatcher, "s v=1i"), 2);
    assert_eq!(*order.lock().unwrap(), vec!["first", "second"]);
}
