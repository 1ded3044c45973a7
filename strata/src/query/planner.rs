//! Turns a query string into an executable [`Plan`].
//!
//! Planning runs in a fixed order, and the first failure wins:
//!
//! 1. parse the query (syntax, unknown aggregate)
//! 2. resolve the selector to exactly one stream (stream not found)
//! 3. decide the result shape: a bare selector is a vector, an aggregate a scalar
//! 4. validate the time range (`start > end`)

use std::fmt;
use std::sync::{Arc, Weak};

use super::aggregate::AggregateFunction;
use super::ast::Expr;
use super::parser::parse;
use crate::catalog::StreamKey;
use crate::connection::Stream;
use crate::error::Result;
use crate::statement::ReturnType;
use crate::value::{TimeRange, Timestamp, ValueKind};

/// A resolved query, ready to be executed by a
/// [`Statement`](crate::statement::Statement).
#[derive(Debug, Clone)]
pub struct Plan {
    /// The parsed query.
    pub expr: Expr,
    /// Canonical identity of the resolved stream.
    pub key: StreamKey,
    /// The resolved stream; dead once the connection closes.
    pub stream: Weak<Stream>,
    /// Time bounds of the scan.
    pub range: TimeRange,
    /// Reduction applied over the scan, if any.
    pub aggregate: Option<AggregateFunction>,
    /// Declared kind of the stream.
    pub stream_kind: ValueKind,
    /// Kind of the values this plan produces.
    pub value_kind: ValueKind,
    /// Whether this plan produces one scalar or a vector of points.
    pub return_type: ReturnType,
}

impl fmt::Display for Plan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "scan {} over {}", self.key, self.range)?;
        if let Some(function) = self.aggregate {
            write!(f, " then {function}")?;
        }
        write!(f, " -> {} {}", self.value_kind, self.return_type)
    }
}

/// Plans `query` over `[start, end)`.
///
/// A `None` start means 0 and a `None` end means unbounded. `resolve` maps
/// the selector's canonical key to its stream and reports
/// [`CatalogError::StreamNotFound`](crate::error::CatalogError::StreamNotFound)
/// when there is none.
///
/// Returns the plan together with a strong handle to the stream so that the
/// caller can open the scan before the handle is released.
///
/// # Errors
///
/// Syntax, aggregate, resolution and range errors, in that order.
pub fn plan<F>(
    query: &str,
    start: Option<Timestamp>,
    end: Option<Timestamp>,
    resolve: F,
) -> Result<(Plan, Arc<Stream>)>
where
    F: FnOnce(&StreamKey) -> Result<Arc<Stream>>,
{
    let expr = parse(query)?;
    let key = StreamKey::from_selector(expr.selector())?;
    let stream = resolve(&key)?;
    let range = TimeRange::new(start, end)?;

    let aggregate = expr.aggregate();
    let stream_kind = stream.kind();
    let (value_kind, return_type) = match aggregate {
        Some(function) => (function.result_kind(stream_kind), ReturnType::Scalar),
        None => (stream_kind, ReturnType::Vector),
    };

    let plan = Plan {
        expr,
        key,
        stream: Arc::downgrade(&stream),
        range,
        aggregate,
        stream_kind,
        value_kind,
        return_type,
    };

    tracing::debug!("planned {plan}");
    Ok((plan, stream))
}
