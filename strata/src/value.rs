//! Value model shared by every layer of strata.
//!
//! A stream holds exactly one [`ValueKind`] for its lifetime. Values are
//! stored on disk as their 8-byte little-endian bit pattern, so the kind must
//! travel alongside the bits wherever they are decoded.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{QueryError, Result, StrataError};

/// Timestamps are unsigned 64-bit integers with caller-defined units.
pub type Timestamp = u64;

/// The kind of value a stream stores.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum ValueKind {
    /// 64-bit unsigned integer.
    UnsignedInteger = 0,
    /// 64-bit signed integer.
    SignedInteger = 1,
    /// 64-bit IEEE-754 float.
    Float = 2,
}

impl ValueKind {
    /// All kinds, in discriminant order.
    pub const ALL: [ValueKind; 3] = [Self::UnsignedInteger, Self::SignedInteger, Self::Float];
}

impl TryFrom<u8> for ValueKind {
    type Error = u8;

    fn try_from(value: u8) -> std::result::Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::UnsignedInteger),
            1 => Ok(Self::SignedInteger),
            2 => Ok(Self::Float),
            other => Err(other),
        }
    }
}

impl fmt::Display for ValueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnsignedInteger => f.write_str("u64"),
            Self::SignedInteger => f.write_str("i64"),
            Self::Float => f.write_str("f64"),
        }
    }
}

impl FromStr for ValueKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "u64" | "unsigned" => Ok(Self::UnsignedInteger),
            "i64" | "signed" => Ok(Self::SignedInteger),
            "f64" | "float" => Ok(Self::Float),
            other => Err(format!("unknown value kind '{other}' (expected u64, i64 or f64)")),
        }
    }
}

/// A single typed value.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Value {
    /// 64-bit unsigned integer.
    UnsignedInteger(u64),
    /// 64-bit signed integer.
    SignedInteger(i64),
    /// 64-bit IEEE-754 float.
    Float(f64),
}

impl Value {
    /// Returns the kind of this value.
    pub fn kind(&self) -> ValueKind {
        match self {
            Self::UnsignedInteger(_) => ValueKind::UnsignedInteger,
            Self::SignedInteger(_) => ValueKind::SignedInteger,
            Self::Float(_) => ValueKind::Float,
        }
    }

    /// Returns the additive identity for `kind`.
    pub fn zero(kind: ValueKind) -> Self {
        match kind {
            ValueKind::UnsignedInteger => Self::UnsignedInteger(0),
            ValueKind::SignedInteger => Self::SignedInteger(0),
            ValueKind::Float => Self::Float(0.0),
        }
    }

    /// Returns the raw 8-byte representation used on disk.
    #[allow(clippy::cast_sign_loss)] // bit-preserving reinterpretation
    pub fn to_bits(&self) -> u64 {
        match *self {
            Self::UnsignedInteger(v) => v,
            Self::SignedInteger(v) => v as u64,
            Self::Float(v) => v.to_bits(),
        }
    }

    /// Rebuilds a value of `kind` from its raw representation.
    #[allow(clippy::cast_possible_wrap)] // bit-preserving reinterpretation
    pub fn from_bits(kind: ValueKind, bits: u64) -> Self {
        match kind {
            ValueKind::UnsignedInteger => Self::UnsignedInteger(bits),
            ValueKind::SignedInteger => Self::SignedInteger(bits as i64),
            ValueKind::Float => Self::Float(f64::from_bits(bits)),
        }
    }

    /// Adds two values of the same kind using the kind's native arithmetic.
    ///
    /// Integer kinds wrap on overflow; floats follow IEEE-754.
    ///
    /// # Errors
    ///
    /// Returns [`StrataError::TypeMismatch`] if the kinds differ.
    pub fn wrapping_add(self, other: Self) -> Result<Self> {
        match (self, other) {
            (Self::UnsignedInteger(a), Self::UnsignedInteger(b)) => {
                Ok(Self::UnsignedInteger(a.wrapping_add(b)))
            }
            (Self::SignedInteger(a), Self::SignedInteger(b)) => {
                Ok(Self::SignedInteger(a.wrapping_add(b)))
            }
            (Self::Float(a), Self::Float(b)) => Ok(Self::Float(a + b)),
            (a, b) => Err(StrataError::TypeMismatch {
                expected: a.kind(),
                found: b.kind(),
            }),
        }
    }

    /// Returns the smaller of two same-kind values.
    ///
    /// # Errors
    ///
    /// Returns [`StrataError::TypeMismatch`] if the kinds differ.
    pub fn min_of(self, other: Self) -> Result<Self> {
        match (self, other) {
            (Self::UnsignedInteger(a), Self::UnsignedInteger(b)) => {
                Ok(Self::UnsignedInteger(a.min(b)))
            }
            (Self::SignedInteger(a), Self::SignedInteger(b)) => Ok(Self::SignedInteger(a.min(b))),
            (Self::Float(a), Self::Float(b)) => Ok(Self::Float(a.min(b))),
            (a, b) => Err(StrataError::TypeMismatch {
                expected: a.kind(),
                found: b.kind(),
            }),
        }
    }

    /// Returns the larger of two same-kind values.
    ///
    /// # Errors
    ///
    /// Returns [`StrataError::TypeMismatch`] if the kinds differ.
    pub fn max_of(self, other: Self) -> Result<Self> {
        match (self, other) {
            (Self::UnsignedInteger(a), Self::UnsignedInteger(b)) => {
                Ok(Self::UnsignedInteger(a.max(b)))
            }
            (Self::SignedInteger(a), Self::SignedInteger(b)) => Ok(Self::SignedInteger(a.max(b))),
            (Self::Float(a), Self::Float(b)) => Ok(Self::Float(a.max(b))),
            (a, b) => Err(StrataError::TypeMismatch {
                expected: a.kind(),
                found: b.kind(),
            }),
        }
    }

    /// Converts to `f64`, losing precision for integers beyond 2^53.
    #[allow(clippy::cast_precision_loss)]
    pub fn as_f64(&self) -> f64 {
        match *self {
            Self::UnsignedInteger(v) => v as f64,
            Self::SignedInteger(v) => v as f64,
            Self::Float(v) => v,
        }
    }

    /// Returns the payload of an unsigned value.
    ///
    /// # Errors
    ///
    /// Returns [`StrataError::TypeMismatch`] for any other kind.
    pub fn as_unsigned(&self) -> Result<u64> {
        match *self {
            Self::UnsignedInteger(v) => Ok(v),
            other => Err(StrataError::TypeMismatch {
                expected: ValueKind::UnsignedInteger,
                found: other.kind(),
            }),
        }
    }

    /// Returns the payload of a signed value.
    ///
    /// # Errors
    ///
    /// Returns [`StrataError::TypeMismatch`] for any other kind.
    pub fn as_signed(&self) -> Result<i64> {
        match *self {
            Self::SignedInteger(v) => Ok(v),
            other => Err(StrataError::TypeMismatch {
                expected: ValueKind::SignedInteger,
                found: other.kind(),
            }),
        }
    }

    /// Returns the payload of a float value.
    ///
    /// # Errors
    ///
    /// Returns [`StrataError::TypeMismatch`] for any other kind.
    pub fn as_float(&self) -> Result<f64> {
        match *self {
            Self::Float(v) => Ok(v),
            other => Err(StrataError::TypeMismatch {
                expected: ValueKind::Float,
                found: other.kind(),
            }),
        }
    }
}

impl From<u64> for Value {
    fn from(value: u64) -> Self {
        Self::UnsignedInteger(value)
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Self::SignedInteger(value)
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Self::Float(value)
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnsignedInteger(v) => write!(f, "{v}"),
            Self::SignedInteger(v) => write!(f, "{v}"),
            Self::Float(v) => write!(f, "{v}"),
        }
    }
}

/// A timestamped value.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Point {
    /// When the value was observed.
    pub timestamp: Timestamp,
    /// The observed value.
    pub value: Value,
}

impl Point {
    /// Creates a new point.
    pub fn new(timestamp: Timestamp, value: impl Into<Value>) -> Self {
        Self {
            timestamp,
            value: value.into(),
        }
    }
}

/// A half-open time range `[start, end)`.
///
/// `end == None` means the range is unbounded above.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeRange {
    /// Inclusive lower bound.
    pub start: Timestamp,
    /// Exclusive upper bound, or `None` for unbounded.
    pub end: Option<Timestamp>,
}

impl TimeRange {
    /// A range covering every timestamp.
    pub const ALL: TimeRange = TimeRange { start: 0, end: None };

    /// Builds a range from optional bounds; a missing start means 0.
    ///
    /// # Errors
    ///
    /// Returns [`QueryError::InvalidRange`] if `start > end`.
    pub fn new(start: Option<Timestamp>, end: Option<Timestamp>) -> Result<Self> {
        let start = start.unwrap_or(0);
        if let Some(end) = end {
            if start > end {
                return Err(QueryError::InvalidRange { start, end }.into());
            }
        }
        Ok(Self { start, end })
    }

    /// Returns `true` if `timestamp` falls inside the range.
    #[inline]
    pub fn contains(&self, timestamp: Timestamp) -> bool {
        timestamp >= self.start && self.end.is_none_or(|end| timestamp < end)
    }

    /// Returns `true` if no timestamp can fall inside the range.
    pub fn is_empty(&self) -> bool {
        self.end == Some(self.start)
    }

    /// Returns `true` if any timestamp in `[min, max]` falls inside the range.
    pub fn overlaps(&self, min: Timestamp, max: Timestamp) -> bool {
        !self.is_empty() && max >= self.start && self.end.is_none_or(|end| min < end)
    }
}

impl fmt::Display for TimeRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.end {
            Some(end) => write!(f, "[{}, {})", self.start, end),
            None => write!(f, "[{}, ∞)", self.start),
        }
    }
}
