//! Concurrent ingestion, flushing and scanning through a shared connection.

#![allow(clippy::cast_sign_loss)]

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;

use strata::{Connection, Options, Point, Value, ValueKind};
use tempfile::tempdir;

const WRITERS: u64 = 4;
const POINTS_PER_WRITER: u64 = 2_000;

fn options() -> Options {
    Options {
        inserter_batch_size: 64,
        auto_flush_threshold: Some(500),
        sync_on_flush: false,
    }
}

#[test]
fn test_scans_stay_sorted_while_writers_run() {
    let temp_dir = tempdir().unwrap();
    let connection = Arc::new(Connection::open_with_options(temp_dir.path(), options()).unwrap());
    connection.create_stream("shared", ValueKind::UnsignedInteger).unwrap();

    let done = Arc::new(AtomicBool::new(false));

    let writers: Vec<_> = (0..WRITERS)
        .map(|writer| {
            let connection = Arc::clone(&connection);
            thread::spawn(move || {
                let mut inserter = connection.inserter("shared").unwrap();
                // interleaved timestamps so every flush carries points from all writers
                for i in 0..POINTS_PER_WRITER {
                    let ts = i * WRITERS + writer;
                    inserter.insert_unsigned(ts, ts).unwrap();
                }
                inserter.close().unwrap();
            })
        })
        .collect();

    let reader = {
        let connection = Arc::clone(&connection);
        let done = Arc::clone(&done);
        thread::spawn(move || {
            let mut scans = 0usize;
            while !done.load(Ordering::Acquire) {
                let points: Vec<Point> = connection
                    .prepare("shared", None, None)
                    .unwrap()
                    .collect::<strata::Result<_>>()
                    .unwrap();
                assert!(points.windows(2).all(|w| w[0].timestamp <= w[1].timestamp));
                assert!(
                    points
                        .iter()
                        .all(|p| p.value == Value::UnsignedInteger(p.timestamp))
                );
                scans += 1;
            }
            scans
        })
    };

    let flusher = {
        let connection = Arc::clone(&connection);
        let done = Arc::clone(&done);
        thread::spawn(move || {
            while !done.load(Ordering::Acquire) {
                connection.flush_all().unwrap();
                thread::yield_now();
            }
        })
    };

    for writer in writers {
        writer.join().unwrap();
    }
    done.store(true, Ordering::Release);
    assert!(reader.join().unwrap() > 0);
    flusher.join().unwrap();

    let total = WRITERS * POINTS_PER_WRITER;
    let mut count = connection.prepare("count(shared)", None, None).unwrap();
    assert_eq!(count.next_scalar().unwrap(), Some(Value::UnsignedInteger(total)));

    let mut sum = connection.prepare("sum(shared)", None, None).unwrap();
    assert_eq!(
        sum.next_scalar().unwrap(),
        Some(Value::UnsignedInteger(total * (total - 1) / 2))
    );
}

#[test]
fn test_statement_is_a_snapshot() {
    let temp_dir = tempdir().unwrap();
    let connection = Connection::open_with_options(temp_dir.path(), options()).unwrap();
    connection.create_stream("snap", ValueKind::SignedInteger).unwrap();

    let mut inserter = connection.inserter("snap").unwrap();
    for i in 0..10i64 {
        inserter.insert_signed(i as u64, i).unwrap();
    }
    inserter.flush().unwrap();

    let statement = connection.prepare("snap", None, None).unwrap();

    for i in 10..20i64 {
        inserter.insert_signed(i as u64, i).unwrap();
    }
    inserter.flush().unwrap();

    let seen = statement.map(|point| point.unwrap()).count();
    assert_eq!(seen, 10);

    let mut fresh = connection.prepare("count(snap)", None, None).unwrap();
    assert_eq!(fresh.next_scalar().unwrap(), Some(Value::UnsignedInteger(20)));
}

#[test]
fn test_streams_created_from_many_threads() {
    let temp_dir = tempdir().unwrap();
    let connection = Arc::new(Connection::open(temp_dir.path()).unwrap());

    let handles: Vec<_> = (0..8)
        .map(|i| {
            let connection = Arc::clone(&connection);
            thread::spawn(move || {
                // every thread races on the shared stream and owns one of its own
                connection.create_stream("common", ValueKind::Float).unwrap();
                connection
                    .create_stream(&format!(r#"own{{thread="{i}"}}"#), ValueKind::Float)
                    .unwrap()
                    .id
            })
        })
        .collect();

    let mut ids: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
    ids.sort();
    ids.dedup();
    assert_eq!(ids.len(), 8);
    assert_eq!(connection.streams().unwrap().len(), 9);
}
