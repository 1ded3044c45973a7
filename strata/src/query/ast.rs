//! Syntax tree produced by the query parser.

use std::fmt;

use super::aggregate::AggregateFunction;

/// A stream selector: `name{key="value", ...}`.
///
/// Labels are kept in the order they were written; use
/// [`StreamKey`](crate::catalog::StreamKey) for the canonical identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Selector {
    /// The metric name.
    pub name: String,
    /// Label key/value pairs.
    pub labels: Vec<(String, String)>,
}

impl Selector {
    /// Creates a selector.
    pub fn new(name: impl Into<String>, labels: Vec<(String, String)>) -> Self {
        Self {
            name: name.into(),
            labels,
        }
    }
}

impl fmt::Display for Selector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)?;
        if self.labels.is_empty() {
            return Ok(());
        }
        f.write_str("{")?;
        for (i, (key, value)) in self.labels.iter().enumerate() {
            if i > 0 {
                f.write_str(",")?;
            }
            write!(f, "{key}=\"{}\"", escape_label_value(value))?;
        }
        f.write_str("}")
    }
}

/// A parsed query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Expr {
    /// A bare selector; evaluates to a vector of points.
    Selector(Selector),
    /// An aggregate over a selector; evaluates to one scalar.
    Aggregate {
        /// The reduction to apply.
        function: AggregateFunction,
        /// The stream to reduce.
        selector: Selector,
    },
}

impl Expr {
    /// Returns the selector this expression reads from.
    pub fn selector(&self) -> &Selector {
        match self {
            Self::Selector(selector) => selector,
            Self::Aggregate { selector, .. } => selector,
        }
    }

    /// Returns the aggregate function, if any.
    pub fn aggregate(&self) -> Option<AggregateFunction> {
        match self {
            Self::Selector(_) => None,
            Self::Aggregate { function, .. } => Some(*function),
        }
    }
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Selector(selector) => write!(f, "{selector}"),
            Self::Aggregate { function, selector } => write!(f, "{function}({selector})"),
        }
    }
}

/// Escapes a label value for embedding in a double-quoted string.
pub(crate) fn escape_label_value(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '\\' => escaped.push_str("\\\\"),
            '"' => escaped.push_str("\\\""),
            '\n' => escaped.push_str("\\n"),
            '\t' => escaped.push_str("\\t"),
            c => escaped.push(c),
        }
    }
    escaped
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_selector_display() {
        let selector = Selector::new(
            "http_requests",
            vec![
                ("service".to_string(), "web".to_string()),
                ("path".to_string(), "/a\"b".to_string()),
            ],
        );
        assert_eq!(
            selector.to_string(),
            r#"http_requests{service="web",path="/a\"b"}"#
        );
        assert_eq!(Selector::new("up", vec![]).to_string(), "up");
    }

    #[test]
    fn test_expr_accessors() {
        let selector = Selector::new("up", vec![]);
        let expr = Expr::Aggregate {
            function: AggregateFunction::Sum,
            selector: selector.clone(),
        };
        assert_eq!(expr.selector(), &selector);
        assert_eq!(expr.aggregate(), Some(AggregateFunction::Sum));
        assert_eq!(expr.to_string(), "sum(up)");
        assert_eq!(Expr::Selector(selector).aggregate(), None);
    }
}
