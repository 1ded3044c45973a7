//! Integration tests for stream creation, identity and type enforcement.

use strata::{Connection, ErrorKind, StreamId, ValueKind};
use tempfile::tempdir;

#[test]
fn test_create_is_idempotent_and_kind_checked() {
    let temp_dir = tempdir().unwrap();
    let connection = Connection::open(temp_dir.path()).unwrap();

    let first = connection
        .create_stream(r#"disk{dev="sda",host="a"}"#, ValueKind::UnsignedInteger)
        .unwrap();
    let second = connection
        .create_stream(r#"disk{host="a",dev="sda"}"#, ValueKind::UnsignedInteger)
        .unwrap();
    assert_eq!(first, second);
    assert_eq!(first.canonical, r#"disk{dev="sda",host="a"}"#);

    let err = connection
        .create_stream(r#"disk{dev="sda",host="a"}"#, ValueKind::Float)
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::AlreadyExists);
    assert_eq!(connection.streams().unwrap().len(), 1);
}

#[test]
fn test_invalid_selectors() {
    let temp_dir = tempdir().unwrap();
    let connection = Connection::open(temp_dir.path()).unwrap();

    let cases = [
        ("sum(cpu)", ErrorKind::Syntax),
        (r#"cpu{host="a",host="b"}"#, ErrorKind::Syntax),
        (r#"cpu{host="a""#, ErrorKind::Syntax),
        (r#"cpu{__name__="x"}"#, ErrorKind::InvalidArgument),
        ("", ErrorKind::Syntax),
    ];
    for (selector, kind) in cases {
        let err = connection
            .create_stream(selector, ValueKind::Float)
            .unwrap_err();
        assert_eq!(err.kind(), kind, "selector {selector:?}");
    }
    assert!(connection.streams().unwrap().is_empty());
}

#[test]
fn test_type_enforcement_leaves_store_unchanged() {
    let temp_dir = tempdir().unwrap();
    let connection = Connection::open(temp_dir.path()).unwrap();
    connection.create_stream("u", ValueKind::UnsignedInteger).unwrap();

    let mut inserter = connection.inserter("u").unwrap();
    inserter.insert_unsigned(1, 1).unwrap();
    assert_eq!(
        inserter.insert_signed(2, -1).unwrap_err().kind(),
        ErrorKind::TypeMismatch
    );
    assert_eq!(
        inserter.insert_float(3, 1.5).unwrap_err().kind(),
        ErrorKind::TypeMismatch
    );
    inserter.close().unwrap();

    let mut statement = connection.prepare("count(u)", None, None).unwrap();
    assert_eq!(
        statement.next_scalar().unwrap(),
        Some(strata::Value::UnsignedInteger(1))
    );
}

#[test]
fn test_ids_and_kinds_survive_reopen() {
    let temp_dir = tempdir().unwrap();
    {
        let connection = Connection::open(temp_dir.path()).unwrap();
        connection.create_stream("a", ValueKind::UnsignedInteger).unwrap();
        connection.create_stream(r#"b{x="1"}"#, ValueKind::SignedInteger).unwrap();
        connection.create_stream(r#"c{y="2"}"#, ValueKind::Float).unwrap();
    }

    let connection = Connection::open(temp_dir.path()).unwrap();
    let streams = connection.streams().unwrap();
    let summary: Vec<_> = streams
        .iter()
        .map(|info| (info.id, info.canonical.as_str(), info.kind))
        .collect();
    assert_eq!(
        summary,
        vec![
            (StreamId(0), "a", ValueKind::UnsignedInteger),
            (StreamId(1), r#"b{x="1"}"#, ValueKind::SignedInteger),
            (StreamId(2), r#"c{y="2"}"#, ValueKind::Float),
        ]
    );

    let err = connection.create_stream("a", ValueKind::Float).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::AlreadyExists);

    let info = connection.create_stream("d", ValueKind::Float).unwrap();
    assert_eq!(info.id, StreamId(3));
}

#[test]
fn test_exact_resolution_and_subset_matching() {
    let temp_dir = tempdir().unwrap();
    let connection = Connection::open(temp_dir.path()).unwrap();
    connection
        .create_stream(r#"cpu{host="a",core="0"}"#, ValueKind::Float)
        .unwrap();

    assert!(connection.stream_exists(r#"cpu{core="0",host="a"}"#).unwrap());
    assert!(!connection.stream_exists(r#"cpu{host="a"}"#).unwrap());
    assert!(!connection.stream_exists("cpu").unwrap());

    assert_eq!(
        connection.inserter(r#"cpu{host="a"}"#).unwrap_err().kind(),
        ErrorKind::StreamNotFound
    );

    let matches = connection.matching_streams(r#"cpu{host="a"}"#).unwrap();
    assert_eq!(matches.len(), 1);
    assert_eq!(matches[0].canonical, r#"cpu{core="0",host="a"}"#);
}

#[test]
fn test_get_or_create_stream() {
    let temp_dir = tempdir().unwrap();
    let connection = Connection::open(temp_dir.path()).unwrap();

    let (info, created) = connection
        .get_or_create_stream("implicit", ValueKind::SignedInteger)
        .unwrap();
    assert!(created);

    let (again, created) = connection
        .get_or_create_stream("implicit", ValueKind::SignedInteger)
        .unwrap();
    assert!(!created);
    assert_eq!(again.id, info.id);
}
