//! Integration tests for prepare, the result protocol and aggregates.

use strata::error::{CatalogError, QueryError};
use strata::{Connection, ErrorKind, Point, QueryOutput, ReturnType, StrataError, Value, ValueKind};
use tempfile::{TempDir, tempdir};

const SELECTOR: &str = r#"test_stream{test="asdf"}"#;

/// Opens a connection holding points (i, i) for i in [0, 1000).
fn thousand_points() -> (TempDir, Connection) {
    let temp_dir = tempdir().unwrap();
    let connection = Connection::open(temp_dir.path()).unwrap();
    connection
        .create_stream(SELECTOR, ValueKind::UnsignedInteger)
        .unwrap();

    let mut inserter = connection.inserter(SELECTOR).unwrap();
    for i in 0..1000u64 {
        inserter.insert_unsigned(i, i).unwrap();
    }
    inserter.close().unwrap();
    (temp_dir, connection)
}

#[test]
fn test_vector_query_yields_every_point_then_done() {
    let (_dir, connection) = thousand_points();
    let mut statement = connection.prepare(SELECTOR, Some(0), Some(1000)).unwrap();
    assert_eq!(statement.return_type(), ReturnType::Vector);
    assert_eq!(statement.value_kind(), ValueKind::UnsignedInteger);

    let mut expected = 0u64;
    loop {
        match statement.next_output().unwrap() {
            QueryOutput::Vector(point) => {
                assert_eq!(point, Point::new(expected, expected));
                expected += 1;
            }
            QueryOutput::Done => break,
            QueryOutput::Scalar(value) => panic!("unexpected scalar {value}"),
        }
    }
    assert_eq!(expected, 1000);

    for _ in 0..5 {
        assert_eq!(statement.next_output().unwrap(), QueryOutput::Done);
    }
}

#[test]
fn test_sum_over_thousand_points() {
    let (_dir, connection) = thousand_points();
    let query = format!("sum({SELECTOR})");
    let mut statement = connection.prepare(&query, Some(0), Some(1000)).unwrap();

    assert_eq!(statement.return_type(), ReturnType::Scalar);
    assert_eq!(
        statement.next_output().unwrap(),
        QueryOutput::Scalar(Value::UnsignedInteger(499_500))
    );
    assert_eq!(statement.next_output().unwrap(), QueryOutput::Done);
}

#[test]
fn test_other_aggregates() {
    let (_dir, connection) = thousand_points();
    let cases = [
        ("count", Value::UnsignedInteger(1000)),
        ("min", Value::UnsignedInteger(0)),
        ("max", Value::UnsignedInteger(999)),
        ("avg", Value::Float(499.5)),
    ];
    for (function, expected) in cases {
        let query = format!("{function}({SELECTOR})");
        let mut statement = connection.prepare(&query, None, None).unwrap();
        assert_eq!(statement.value_kind(), expected.kind(), "{function}");
        assert_eq!(statement.next_scalar().unwrap(), Some(expected), "{function}");
    }
}

#[test]
fn test_empty_range_is_not_an_error() {
    let (_dir, connection) = thousand_points();

    let mut statement = connection.prepare(SELECTOR, Some(500), Some(500)).unwrap();
    assert_eq!(statement.next_output().unwrap(), QueryOutput::Done);

    let query = format!("sum({SELECTOR})");
    let mut statement = connection.prepare(&query, Some(500), Some(500)).unwrap();
    assert_eq!(
        statement.next_output().unwrap(),
        QueryOutput::Scalar(Value::UnsignedInteger(0))
    );
}

#[test]
fn test_sub_range_is_half_open() {
    let (_dir, connection) = thousand_points();
    let points: Vec<Point> = connection
        .prepare(SELECTOR, Some(10), Some(13))
        .unwrap()
        .collect::<strata::Result<_>>()
        .unwrap();
    assert_eq!(
        points,
        vec![Point::new(10, 10u64), Point::new(11, 11u64), Point::new(12, 12u64)]
    );

    let mut tail = connection.prepare(&format!("count({SELECTOR})"), Some(990), None).unwrap();
    assert_eq!(tail.next_scalar().unwrap(), Some(Value::UnsignedInteger(10)));
}

#[test]
fn test_nonexistent_stream() {
    let (_dir, connection) = thousand_points();
    let err = connection
        .prepare(r#"test_stream{test="nope"}"#, Some(0), Some(1000))
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::StreamNotFound);
    assert!(matches!(
        err,
        StrataError::Catalog(CatalogError::StreamNotFound { ref selector })
            if selector == r#"test_stream{test="nope"}"#
    ));
}

#[test]
fn test_prepare_errors() {
    let (_dir, connection) = thousand_points();

    let err = connection.prepare(r#"test_stream{test="asdf""#, None, None).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Syntax);

    let err = connection.prepare(r#"test_stream{test "asdf"}"#, None, None).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Syntax);

    let err = connection.prepare(r#"test_stream{test="asdf}"#, None, None).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Syntax);

    let err = connection.prepare(&format!("stddev({SELECTOR})"), None, None).unwrap_err();
    assert!(matches!(
        err,
        StrataError::Query(QueryError::AggregateUnsupported { ref name }) if name == "stddev"
    ));

    let err = connection.prepare(SELECTOR, Some(10), Some(5)).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidRange);
}

#[test]
fn test_selector_label_order_is_irrelevant() {
    let temp_dir = tempdir().unwrap();
    let connection = Connection::open(temp_dir.path()).unwrap();
    connection
        .create_stream(r#"http{method="GET",code="200"}"#, ValueKind::SignedInteger)
        .unwrap();

    let mut inserter = connection.inserter(r#"http{code="200",method="GET"}"#).unwrap();
    inserter.insert_signed(1, -4).unwrap();
    inserter.insert_signed(2, 6).unwrap();
    inserter.close().unwrap();

    let mut statement = connection
        .prepare(r#"sum(http{ method = 'GET', code = "200" })"#, None, None)
        .unwrap();
    assert_eq!(statement.next_scalar().unwrap(), Some(Value::SignedInteger(2)));
}

#[test]
fn test_signed_sum_wraps() {
    let temp_dir = tempdir().unwrap();
    let connection = Connection::open(temp_dir.path()).unwrap();
    connection.create_stream("s", ValueKind::SignedInteger).unwrap();

    let mut inserter = connection.inserter("s").unwrap();
    inserter.insert_signed(1, i64::MAX).unwrap();
    inserter.insert_signed(2, 2).unwrap();
    inserter.close().unwrap();

    let mut statement = connection.prepare("sum(s)", None, None).unwrap();
    assert_eq!(statement.next_scalar().unwrap(), Some(Value::SignedInteger(i64::MIN + 1)));
}

#[test]
fn test_query_sees_unflushed_points() {
    let temp_dir = tempdir().unwrap();
    let connection = Connection::open(temp_dir.path()).unwrap();
    connection.create_stream("f", ValueKind::Float).unwrap();

    let mut inserter = connection.inserter("f").unwrap();
    inserter.insert_float(1, 0.5).unwrap();
    inserter.flush().unwrap();
    inserter.insert_float(2, 0.25).unwrap();
    // push the local batch without flushing
    drop(inserter);

    let mut statement = connection.prepare("sum(f)", None, None).unwrap();
    assert_eq!(statement.next_scalar().unwrap(), Some(Value::Float(0.75)));
}

#[test]
fn test_query_sees_points_of_live_inserter() {
    let temp_dir = tempdir().unwrap();
    let connection = Connection::open(temp_dir.path()).unwrap();
    connection.create_stream("m", ValueKind::UnsignedInteger).unwrap();

    let mut inserter = connection.inserter("m").unwrap();
    for i in 0..5 {
        inserter.insert_unsigned(i, i).unwrap();
    }

    let mut count = connection.prepare("count(m)", None, None).unwrap();
    assert_eq!(count.next_scalar().unwrap(), Some(Value::UnsignedInteger(5)));

    let points: Vec<Point> = connection
        .prepare("m", Some(3), None)
        .unwrap()
        .collect::<Result<_, _>>()
        .unwrap();
    assert_eq!(points, vec![Point::new(3, 3u64), Point::new(4, 4u64)]);
    assert_eq!(inserter.pending(), 5);
}

/// Folds the points of a vector query by hand.
fn fold_by_hand(connection: &Connection, start: u64, end: u64) -> (i64, u64, i64, i64) {
    let values: Vec<i64> = connection
        .prepare("s", Some(start), Some(end))
        .unwrap()
        .map(|p| p.unwrap().value.as_signed().unwrap())
        .collect();
    let sum = values.iter().fold(0i64, |acc, v| acc.wrapping_add(*v));
    let min = values.iter().copied().min().unwrap();
    let max = values.iter().copied().max().unwrap();
    (sum, values.len() as u64, min, max)
}

#[test]
fn test_aggregates_agree_across_segments_and_buffer() {
    let temp_dir = tempdir().unwrap();
    let connection = Connection::open(temp_dir.path()).unwrap();
    connection.create_stream("s", ValueKind::SignedInteger).unwrap();

    let mut inserter = connection.inserter("s").unwrap();
    for chunk in 0..4i64 {
        for i in 0..50 {
            let ts = chunk * 50 + i;
            let value = if i % 7 == 0 { i64::MAX - ts } else { -ts * 3 };
            inserter.insert_signed(u64::try_from(ts).unwrap(), value).unwrap();
        }
        if chunk < 3 {
            inserter.flush().unwrap();
        }
    }

    // whole segments only, partial on both ends, and the buffer alone
    for (start, end) in [(0, 150), (25, 175), (10, 40), (150, 200), (0, 200)] {
        let (sum, count, min, max) = fold_by_hand(&connection, start, end);
        let scalar = |function: &str| {
            connection
                .prepare(&format!("{function}(s)"), Some(start), Some(end))
                .unwrap()
                .next_scalar()
                .unwrap()
        };
        assert_eq!(scalar("sum"), Some(Value::SignedInteger(sum)), "[{start}, {end})");
        assert_eq!(scalar("count"), Some(Value::UnsignedInteger(count)), "[{start}, {end})");
        assert_eq!(scalar("min"), Some(Value::SignedInteger(min)), "[{start}, {end})");
        assert_eq!(scalar("max"), Some(Value::SignedInteger(max)), "[{start}, {end})");
    }
}
