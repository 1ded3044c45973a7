//! CSV input for `strata insert`.

use std::fs::File;
use std::io::Read;
use std::path::Path;

use strata::{Point, Value, ValueKind};

/// Reads `timestamp,value` rows, skipping a leading header row if present.
pub fn read_points(path: &Path, kind: ValueKind) -> Result<Vec<Point>, Box<dyn std::error::Error>> {
    let file = File::open(path).map_err(|e| format!("cannot open '{}': {e}", path.display()))?;
    parse_points(file, kind)
}

fn parse_points<R: Read>(
    reader: R,
    kind: ValueKind,
) -> Result<Vec<Point>, Box<dyn std::error::Error>> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(reader);

    let mut points = Vec::new();
    for (idx, record) in reader.records().enumerate() {
        let record = record?;
        let line = idx + 1;

        let (Some(timestamp), Some(value)) = (record.get(0), record.get(1)) else {
            return Err(format!("line {line}: expected 'timestamp,value'").into());
        };

        let Ok(timestamp) = timestamp.parse::<u64>() else {
            if idx == 0 {
                continue;
            }
            return Err(format!("line {line}: invalid timestamp '{timestamp}'").into());
        };

        let value = parse_value(value, kind)
            .ok_or_else(|| format!("line {line}: '{value}' is not a valid {kind} value"))?;
        points.push(Point::new(timestamp, value));
    }

    Ok(points)
}

fn parse_value(raw: &str, kind: ValueKind) -> Option<Value> {
    match kind {
        ValueKind::UnsignedInteger => raw.parse::<u64>().ok().map(Value::UnsignedInteger),
        ValueKind::SignedInteger => raw.parse::<i64>().ok().map(Value::SignedInteger),
        ValueKind::Float => raw.parse::<f64>().ok().map(Value::Float),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_is_optional() {
        let kind = ValueKind::UnsignedInteger;
        let with_header = parse_points("timestamp,value\n1,2\n".as_bytes(), kind).unwrap();
        let without = parse_points("1,2\n".as_bytes(), kind).unwrap();
        assert_eq!(with_header, vec![Point::new(1, 2u64)]);
        assert_eq!(with_header, without);
    }

    #[test]
    fn test_values_follow_kind() {
        let points = parse_points("1, -3\n2, 4\n".as_bytes(), ValueKind::SignedInteger).unwrap();
        assert_eq!(points, vec![Point::new(1, -3i64), Point::new(2, 4i64)]);

        let points = parse_points("5,0.25\n".as_bytes(), ValueKind::Float).unwrap();
        assert_eq!(points, vec![Point::new(5, 0.25)]);
    }

    #[test]
    fn test_bad_rows_name_the_line() {
        let err = parse_points("1,1\n2,x\n".as_bytes(), ValueKind::UnsignedInteger).unwrap_err();
        assert!(err.to_string().starts_with("line 2:"), "{err}");

        let err = parse_points("1,1\nabc,1\n".as_bytes(), ValueKind::UnsignedInteger).unwrap_err();
        assert!(err.to_string().contains("invalid timestamp"), "{err}");

        let err = parse_points("1\n".as_bytes(), ValueKind::UnsignedInteger).unwrap_err();
        assert!(err.to_string().contains("expected 'timestamp,value'"), "{err}");
    }
}
