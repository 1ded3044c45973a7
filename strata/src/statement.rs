//! Prepared statements and the pull-based result protocol.
//!
//! A [`Statement`] moves through `Prepared → Scanning → Exhausted`, or to
//! `Closed` once [`Statement::close`] is called. Vector statements yield one
//! point per pull; scalar statements consume their whole scan on the first
//! pull and yield a single value. Once exhausted, every pull returns
//! [`QueryOutput::Done`].

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::connection::Stream;
use crate::error::{QueryError, Result, StrataError};
use crate::query::aggregate::Accumulator;
use crate::query::planner::Plan;
use crate::scan::ScanCursor;
use crate::value::{Point, Value, ValueKind};

/// Shape of a statement's results.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum ReturnType {
    /// A single reduced value.
    Scalar = 0,
    /// A sequence of points.
    Vector = 1,
}

impl fmt::Display for ReturnType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Scalar => f.write_str("scalar"),
            Self::Vector => f.write_str("vector"),
        }
    }
}

/// One pull from a statement.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum QueryOutput {
    /// No more results.
    Done,
    /// The reduced value of an aggregate query.
    Scalar(Value),
    /// The next point of a vector query.
    Vector(Point),
}

/// Observable lifecycle state of a [`Statement`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatementState {
    /// Nothing pulled yet.
    Prepared,
    /// At least one point pulled, more may follow.
    Scanning,
    /// Every result has been returned.
    Exhausted,
    /// [`Statement::close`] was called.
    Closed,
}

#[derive(Debug)]
enum State {
    Prepared(ScanCursor),
    Scanning(ScanCursor),
    Exhausted,
    Closed,
}

/// A prepared query.
///
/// The scan is opened when the statement is prepared, so the results
/// reflect the store as it was at that moment.
///
/// # Example
///
/// ```rust
/// use strata::{Connection, QueryOutput, Value, ValueKind};
///
/// # fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let dir = tempfile::tempdir()?;
/// let connection = Connection::open(dir.path())?;
/// connection.create_stream(r#"test_stream{test="asdf"}"#, ValueKind::UnsignedInteger)?;
///
/// let mut inserter = connection.inserter(r#"test_stream{test="asdf"}"#)?;
/// for i in 0..1000u64 {
///     inserter.insert_unsigned(i, i)?;
/// }
/// inserter.close()?;
///
/// let query = r#"sum(test_stream{test="asdf"})"#;
/// let mut statement = connection.prepare(query, Some(0), Some(1000))?;
/// assert_eq!(statement.next_output()?, QueryOutput::Scalar(Value::UnsignedInteger(499_500)));
/// assert_eq!(statement.next_output()?, QueryOutput::Done);
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct Statement {
    plan: Plan,
    state: State,
    iter_failed: bool,
}

impl Statement {
    pub(crate) fn new(plan: Plan, stream: &Arc<Stream>) -> Result<Self> {
        let cursor = stream.store().scan(plan.range)?;
        Ok(Self {
            plan,
            state: State::Prepared(cursor),
            iter_failed: false,
        })
    }

    /// The plan this statement executes.
    pub fn plan(&self) -> &Plan {
        &self.plan
    }

    /// Kind of the values this statement yields.
    pub fn value_kind(&self) -> ValueKind {
        self.plan.value_kind
    }

    /// Whether this statement yields a scalar or a vector.
    pub fn return_type(&self) -> ReturnType {
        self.plan.return_type
    }

    /// Current lifecycle state.
    pub fn state(&self) -> StatementState {
        match self.state {
            State::Prepared(_) => StatementState::Prepared,
            State::Scanning(_) => StatementState::Scanning,
            State::Exhausted => StatementState::Exhausted,
            State::Closed => StatementState::Closed,
        }
    }

    /// Pulls the next result.
    ///
    /// # Errors
    ///
    /// - [`StrataError::UseAfterClose`] if the statement or its connection
    ///   was closed
    /// - [`StrataError::TypeMismatch`] if the scan yields a value of the
    ///   wrong kind
    /// - [`StorageError::CorruptedSegment`](crate::error::StorageError::CorruptedSegment)
    ///   if a segment fails to decode
    pub fn next_output(&mut self) -> Result<QueryOutput> {
        if matches!(self.state, State::Closed) {
            return Err(StrataError::UseAfterClose { handle: "statement" });
        }
        if self.plan.stream.strong_count() == 0 {
            return Err(StrataError::UseAfterClose { handle: "connection" });
        }

        let mut cursor = match std::mem::replace(&mut self.state, State::Exhausted) {
            State::Prepared(cursor) | State::Scanning(cursor) => cursor,
            State::Exhausted | State::Closed => return Ok(QueryOutput::Done),
        };

        match self.plan.aggregate {
            None => match cursor.next_point()? {
                Some(point) => {
                    self.state = State::Scanning(cursor);
                    Ok(QueryOutput::Vector(point))
                }
                None => Ok(QueryOutput::Done),
            },
            Some(function) => {
                let mut accumulator = Accumulator::new(function, self.plan.stream_kind);
                cursor.fold_into(&mut accumulator)?;
                Ok(accumulator.finish().map_or(QueryOutput::Done, QueryOutput::Scalar))
            }
        }
    }

    /// Pulls the next point of a vector statement; `None` once exhausted.
    ///
    /// # Errors
    ///
    /// [`QueryError::WrongReturnType`] on a scalar statement, and the errors
    /// of [`Statement::next_output`].
    pub fn next_vector(&mut self) -> Result<Option<Point>> {
        self.expect_return_type(ReturnType::Vector)?;
        match self.next_output()? {
            QueryOutput::Vector(point) => Ok(Some(point)),
            QueryOutput::Scalar(_) | QueryOutput::Done => Ok(None),
        }
    }

    /// Pulls the value of a scalar statement; `None` after it was returned
    /// once, or if the aggregate has no value over an empty range.
    ///
    /// # Errors
    ///
    /// [`QueryError::WrongReturnType`] on a vector statement, and the errors
    /// of [`Statement::next_output`].
    pub fn next_scalar(&mut self) -> Result<Option<Value>> {
        self.expect_return_type(ReturnType::Scalar)?;
        match self.next_output()? {
            QueryOutput::Scalar(value) => Ok(Some(value)),
            QueryOutput::Vector(_) | QueryOutput::Done => Ok(None),
        }
    }

    /// Releases the scan. Later pulls fail with
    /// [`StrataError::UseAfterClose`].
    pub fn close(&mut self) {
        self.state = State::Closed;
    }

    fn expect_return_type(&self, requested: ReturnType) -> Result<()> {
        if self.plan.return_type != requested {
            return Err(QueryError::WrongReturnType {
                actual: self.plan.return_type,
                requested,
            }
            .into());
        }
        Ok(())
    }
}

/// Iterates the points of a vector statement.
///
/// An error is yielded at most once and ends the iteration.
impl Iterator for Statement {
    type Item = Result<Point>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.iter_failed {
            return None;
        }
        match self.next_vector() {
            Ok(point) => point.map(Ok),
            Err(err) => {
                self.iter_failed = true;
                Some(Err(err))
            }
        }
    }
}
