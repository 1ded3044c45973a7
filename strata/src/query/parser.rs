//! Recursive-descent parser for the query language.
//!
//! ```text
//! query      := aggregate '(' selector ')' | selector
//! selector   := identifier [ '{' [ label_list ] '}' ]
//! label_list := label ( ',' label )* [ ',' ]
//! label      := identifier '=' string
//! ```

use std::collections::HashSet;

use super::aggregate::AggregateFunction;
use super::ast::{Expr, Selector};
use super::lexer::{Lexer, Token, TokenKind};
use crate::error::{QueryError, Result};

/// Parses a full query: a selector, optionally wrapped in an aggregate.
///
/// # Errors
///
/// - [`QueryError::Syntax`] for malformed input
/// - [`QueryError::AggregateUnsupported`] for a well-formed call to an
///   unknown function
///
/// # Examples
///
/// ```rust
/// use strata::query::{parse, AggregateFunction};
///
/// let expr = parse(r#"sum(test_stream{test="asdf"})"#)?;
/// assert_eq!(expr.aggregate(), Some(AggregateFunction::Sum));
/// assert_eq!(expr.selector().name, "test_stream");
/// # Ok::<(), strata::StrataError>(())
/// ```
pub fn parse(input: &str) -> Result<Expr> {
    let mut parser = Parser::new(input)?;
    let expr = parser.query()?;
    parser.expect_eof()?;
    Ok(expr)
}

/// Parses a bare selector, as accepted by stream creation and insertion.
///
/// # Errors
///
/// Returns [`QueryError::Syntax`] for malformed input or if the selector is
/// wrapped in a function call.
pub fn parse_selector(input: &str) -> Result<Selector> {
    let mut parser = Parser::new(input)?;
    let selector = parser.selector()?;
    parser.expect_eof()?;
    Ok(selector)
}

struct Parser {
    tokens: Vec<Token>,
    current: usize,
}

impl Parser {
    fn new(input: &str) -> Result<Self> {
        Ok(Self {
            tokens: Lexer::new(input).tokenize()?,
            current: 0,
        })
    }

    fn peek(&self) -> &Token {
        // tokenize() always ends with Eof and advance() never moves past it
        &self.tokens[self.current]
    }

    fn peek_kind_at(&self, offset: usize) -> Option<&TokenKind> {
        self.tokens.get(self.current + offset).map(|t| &t.kind)
    }

    fn advance(&mut self) -> Token {
        let token = self.tokens[self.current].clone();
        if token.kind != TokenKind::Eof {
            self.current += 1;
        }
        token
    }

    fn error<T>(&self, message: impl Into<String>) -> Result<T> {
        Err(QueryError::Syntax {
            position: self.peek().position,
            message: message.into(),
        }
        .into())
    }

    fn expect(&mut self, kind: &TokenKind, what: &str) -> Result<Token> {
        if &self.peek().kind == kind {
            Ok(self.advance())
        } else {
            self.error(format!("expected {what}, found {}", describe(&self.peek().kind)))
        }
    }

    fn expect_eof(&self) -> Result<()> {
        match &self.peek().kind {
            TokenKind::Eof => Ok(()),
            other => self.error(format!("unexpected {} after query", describe(other))),
        }
    }

    fn query(&mut self) -> Result<Expr> {
        if self.peek_kind_at(1) == Some(&TokenKind::LeftParen) {
            let name = self.identifier("function name")?;
            self.advance();
            let selector = self.selector()?;
            self.expect(&TokenKind::RightParen, "')'")?;

            let function = AggregateFunction::from_name(&name)
                .ok_or(QueryError::AggregateUnsupported { name })?;
            return Ok(Expr::Aggregate { function, selector });
        }

        Ok(Expr::Selector(self.selector()?))
    }

    fn selector(&mut self) -> Result<Selector> {
        if self.peek_kind_at(1) == Some(&TokenKind::LeftParen) {
            return self.error("expected a selector, found a function call");
        }

        let name = self.identifier("metric name")?;
        let mut labels = Vec::new();

        if self.peek().kind == TokenKind::LeftBrace {
            self.advance();
            let mut seen = HashSet::new();

            while self.peek().kind != TokenKind::RightBrace {
                let key_position = self.peek().position;
                let (key, value) = self.label()?;
                if !seen.insert(key.clone()) {
                    return Err(QueryError::Syntax {
                        position: key_position,
                        message: format!("duplicate label '{key}'"),
                    }
                    .into());
                }
                labels.push((key, value));

                match &self.peek().kind {
                    TokenKind::Comma => {
                        self.advance();
                    }
                    TokenKind::RightBrace => {}
                    TokenKind::Eof => return self.error("unmatched '{'"),
                    other => {
                        return self
                            .error(format!("expected ',' or '}}', found {}", describe(other)));
                    }
                }
            }
            self.advance();
        }

        Ok(Selector { name, labels })
    }

    fn label(&mut self) -> Result<(String, String)> {
        if self.peek().kind == TokenKind::Eof {
            return self.error("unmatched '{'");
        }

        let key = self.identifier("label name")?;
        if key.contains(['.', ':']) {
            return Err(QueryError::Syntax {
                position: self.tokens[self.current - 1].position,
                message: format!("invalid label name '{key}'"),
            }
            .into());
        }

        match &self.peek().kind {
            TokenKind::Equals => {
                self.advance();
            }
            TokenKind::UnsupportedMatcher(op) => {
                return self.error(format!("unsupported matcher '{op}', only '=' is allowed"));
            }
            other => {
                return self.error(format!(
                    "expected '=' after label '{key}', found {}",
                    describe(other)
                ));
            }
        }

        match self.advance().kind {
            TokenKind::String(value) => Ok((key, value)),
            other => Err(QueryError::Syntax {
                position: self.tokens[self.current.saturating_sub(1)].position,
                message: format!("expected quoted label value, found {}", describe(&other)),
            }
            .into()),
        }
    }

    fn identifier(&mut self, what: &str) -> Result<String> {
        match &self.peek().kind {
            TokenKind::Identifier(name) => {
                let name = name.clone();
                self.advance();
                Ok(name)
            }
            other => self.error(format!("expected {what}, found {}", describe(other))),
        }
    }
}

fn describe(kind: &TokenKind) -> String {
    match kind {
        TokenKind::Identifier(name) => format!("identifier '{name}'"),
        TokenKind::String(value) => format!("string {value:?}"),
        TokenKind::LeftBrace => "'{'".to_string(),
        TokenKind::RightBrace => "'}'".to_string(),
        TokenKind::LeftParen => "'('".to_string(),
        TokenKind::RightParen => "')'".to_string(),
        TokenKind::Comma => "','".to_string(),
        TokenKind::Equals => "'='".to_string(),
        TokenKind::UnsupportedMatcher(op) => format!("'{op}'"),
        TokenKind::Eof => "end of input".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{ErrorKind, StrataError};

    fn labels(pairs: &[(&str, &str)]) -> Vec<(String, String)> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_parse_bare_selector() {
        let expr = parse(r#"test_stream{test="asdf"}"#).unwrap();
        assert_eq!(
            expr,
            Expr::Selector(Selector::new("test_stream", labels(&[("test", "asdf")])))
        );
    }

    #[test]
    fn test_parse_name_only_and_empty_braces() {
        assert_eq!(parse("up").unwrap(), Expr::Selector(Selector::new("up", vec![])));
        assert_eq!(parse("up{}").unwrap(), Expr::Selector(Selector::new("up", vec![])));
    }

    #[test]
    fn test_parse_whitespace_and_trailing_comma() {
        let expr = parse(r#"  http_requests_total { service = "web" , code='200', }  "#).unwrap();
        assert_eq!(
            expr.selector().labels,
            labels(&[("service", "web"), ("code", "200")])
        );
    }

    #[test]
    fn test_parse_aggregates() {
        for function in AggregateFunction::ALL {
            let query = format!(r#"{}(cpu{{host="a"}})"#, function.name());
            let expr = parse(&query).unwrap();
            assert_eq!(expr.aggregate(), Some(function));
            assert_eq!(expr.selector().name, "cpu");
        }
    }

    #[test]
    fn test_unknown_aggregate() {
        let err = parse("rate(cpu)").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::AggregateUnsupported);
        assert!(matches!(
            err,
            StrataError::Query(QueryError::AggregateUnsupported { ref name }) if name == "rate"
        ));
    }

    #[test]
    fn test_malformed_aggregate_is_syntax_error() {
        assert_eq!(parse("rate(cpu").unwrap_err().kind(), ErrorKind::Syntax);
        assert_eq!(parse("sum()").unwrap_err().kind(), ErrorKind::Syntax);
        assert_eq!(parse("sum(sum(cpu))").unwrap_err().kind(), ErrorKind::Syntax);
    }

    #[test]
    fn test_syntax_errors() {
        let cases = [
            r#"cpu{host="a""#,
            r#"cpu{host "a"}"#,
            r#"cpu{host="a}"#,
            r#"cpu{host=a}"#,
            r#"cpu host="a"}"#,
            r#"cpu{host="a"} extra"#,
            r#"cpu{host="a" zone="b"}"#,
            r#"cpu{host!="a"}"#,
            r#"cpu{host=~"a"}"#,
            r#"cpu{host="a",host="b"}"#,
            r#"cpu{a.b="c"}"#,
            "",
            "{}",
        ];
        for case in cases {
            let err = parse(case).unwrap_err();
            assert_eq!(err.kind(), ErrorKind::Syntax, "case {case:?} gave {err}");
        }
    }

    #[test]
    fn test_error_position() {
        let err = parse(r#"cpu{host "a"}"#).unwrap_err();
        assert!(matches!(
            err,
            StrataError::Query(QueryError::Syntax { position: 9, .. })
        ));
    }

    #[test]
    fn test_parse_selector_rejects_aggregate() {
        assert!(parse_selector(r#"cpu{host="a"}"#).is_ok());
        let err = parse_selector("sum(cpu)").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Syntax);
    }

    #[test]
    fn test_display_roundtrip_parses_identically() {
        let expr = parse(r#"max(disk.io{dev="sda",path="a\"b"})"#).unwrap();
        assert_eq!(parse(&expr.to_string()).unwrap(), expr);
    }
}
