//! The query language: a stream selector, optionally wrapped in one
//! aggregate function.
//!
//! ```text
//! test_stream{test="asdf"}          vector of points
//! sum(test_stream{test="asdf"})     one scalar
//! ```

pub mod aggregate;
pub mod ast;
pub mod lexer;
pub mod parser;
pub mod planner;

pub use aggregate::{Accumulator, AggregateFunction};
pub use ast::{Expr, Selector};
pub use parser::{parse, parse_selector};
pub use planner::{Plan, plan};
