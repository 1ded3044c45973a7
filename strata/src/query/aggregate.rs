//! Aggregate functions and their accumulators.
//!
//! Adding a function means adding a variant here; the grammar accepts any
//! identifier in call position and defers the name check to
//! [`AggregateFunction::from_name`].

use std::fmt;

use crate::error::Result;
use crate::segment::SegmentSummary;
use crate::value::{Value, ValueKind};

/// A reduction applied over every point of a scan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AggregateFunction {
    /// Sum of values using the stream kind's native arithmetic.
    Sum,
    /// Number of points.
    Count,
    /// Smallest value.
    Min,
    /// Largest value.
    Max,
    /// Arithmetic mean as a float.
    Avg,
}

impl AggregateFunction {
    /// Every supported function.
    pub const ALL: [AggregateFunction; 5] =
        [Self::Sum, Self::Count, Self::Min, Self::Max, Self::Avg];

    /// Looks up a function by its query-language name.
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|function| function.name() == name)
    }

    /// The query-language name.
    pub fn name(self) -> &'static str {
        match self {
            Self::Sum => "sum",
            Self::Count => "count",
            Self::Min => "min",
            Self::Max => "max",
            Self::Avg => "avg",
        }
    }

    /// The kind of the scalar this function yields over a stream of `input`.
    pub fn result_kind(self, input: ValueKind) -> ValueKind {
        match self {
            Self::Sum | Self::Min | Self::Max => input,
            Self::Count => ValueKind::UnsignedInteger,
            Self::Avg => ValueKind::Float,
        }
    }
}

impl fmt::Display for AggregateFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Running state of one aggregate evaluation.
#[derive(Debug, Clone)]
pub struct Accumulator {
    function: AggregateFunction,
    kind: ValueKind,
    acc: Option<Value>,
    count: u64,
    float_sum: f64,
}

impl Accumulator {
    /// Starts an accumulator for `function` over values of `kind`.
    pub fn new(function: AggregateFunction, kind: ValueKind) -> Self {
        Self {
            function,
            kind,
            acc: None,
            count: 0,
            float_sum: 0.0,
        }
    }

    /// Folds one value into the accumulator.
    ///
    /// # Errors
    ///
    /// Returns [`StrataError::TypeMismatch`](crate::error::StrataError::TypeMismatch)
    /// if `value` is not of the accumulator's input kind.
    pub fn push(&mut self, value: Value) -> Result<()> {
        if value.kind() != self.kind {
            return Err(crate::error::StrataError::TypeMismatch {
                expected: self.kind,
                found: value.kind(),
            });
        }

        self.count = self.count.wrapping_add(1);
        self.acc = match (self.function, self.acc) {
            (AggregateFunction::Sum, acc) => {
                Some(acc.unwrap_or(Value::zero(self.kind)).wrapping_add(value)?)
            }
            (AggregateFunction::Min, Some(acc)) => Some(acc.min_of(value)?),
            (AggregateFunction::Max, Some(acc)) => Some(acc.max_of(value)?),
            (AggregateFunction::Min | AggregateFunction::Max, None) => Some(value),
            (AggregateFunction::Avg, _) => {
                self.float_sum += value.as_f64();
                None
            }
            (AggregateFunction::Count, _) => None,
        };
        Ok(())
    }

    /// Returns `true` if the result does not depend on the order values
    /// are folded in.
    ///
    /// Float sums are excluded: IEEE-754 addition is not associative, and
    /// `sum` and `avg` fold floats in timestamp order.
    pub fn is_order_insensitive(&self) -> bool {
        match self.function {
            AggregateFunction::Count | AggregateFunction::Min | AggregateFunction::Max => true,
            AggregateFunction::Sum => self.kind != ValueKind::Float,
            AggregateFunction::Avg => false,
        }
    }

    /// Folds in the header aggregates of a whole segment, as if each of its
    /// values had been pushed.
    ///
    /// Only meaningful when [`Accumulator::is_order_insensitive`] holds.
    ///
    /// # Errors
    ///
    /// Returns [`StrataError::TypeMismatch`](crate::error::StrataError::TypeMismatch)
    /// if the segment holds a different kind.
    pub fn merge_summary(&mut self, summary: &SegmentSummary) -> Result<()> {
        if summary.sum.kind() != self.kind {
            return Err(crate::error::StrataError::TypeMismatch {
                expected: self.kind,
                found: summary.sum.kind(),
            });
        }

        self.count = self.count.wrapping_add(summary.count);
        self.acc = match (self.function, self.acc) {
            (AggregateFunction::Sum, acc) => {
                Some(acc.unwrap_or(Value::zero(self.kind)).wrapping_add(summary.sum)?)
            }
            (AggregateFunction::Min, Some(acc)) => Some(acc.min_of(summary.min)?),
            (AggregateFunction::Max, Some(acc)) => Some(acc.max_of(summary.max)?),
            (AggregateFunction::Min, None) => Some(summary.min),
            (AggregateFunction::Max, None) => Some(summary.max),
            (AggregateFunction::Avg, acc) => {
                self.float_sum += summary.sum.as_f64();
                acc
            }
            (AggregateFunction::Count, acc) => acc,
        };
        Ok(())
    }

    /// Produces the final scalar.
    ///
    /// `sum` and `count` yield their identity over an empty input; `min`,
    /// `max` and `avg` yield `None`.
    #[allow(clippy::cast_precision_loss)]
    pub fn finish(self) -> Option<Value> {
        match self.function {
            AggregateFunction::Sum => Some(self.acc.unwrap_or(Value::zero(self.kind))),
            AggregateFunction::Count => Some(Value::UnsignedInteger(self.count)),
            AggregateFunction::Min | AggregateFunction::Max => self.acc,
            AggregateFunction::Avg if self.count == 0 => None,
            AggregateFunction::Avg => Some(Value::Float(self.float_sum / self.count as f64)),
        }
    }
}
