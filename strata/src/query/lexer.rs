//! Tokenizer for the query language.

use crate::error::{QueryError, Result};

/// A lexical token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TokenKind {
    /// Metric name, label key, or function name.
    Identifier(String),
    /// Quoted string with escapes already resolved.
    String(String),
    /// `{`
    LeftBrace,
    /// `}`
    RightBrace,
    /// `(`
    LeftParen,
    /// `)`
    RightParen,
    /// `,`
    Comma,
    /// `=`
    Equals,
    /// `!=`, `=~` or `!~`; recognized only so they can be rejected clearly.
    UnsupportedMatcher(&'static str),
    /// End of input.
    Eof,
}

/// A token together with its byte offset in the input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
    /// What was scanned.
    pub kind: TokenKind,
    /// Byte offset of the first character.
    pub position: usize,
}

/// Converts a query string into tokens.
pub struct Lexer<'a> {
    input: &'a str,
    position: usize,
}

impl<'a> Lexer<'a> {
    /// Creates a lexer over `input`.
    pub fn new(input: &'a str) -> Self {
        Self { input, position: 0 }
    }

    /// Scans the whole input, ending with a single [`TokenKind::Eof`].
    ///
    /// # Errors
    ///
    /// Returns [`QueryError::Syntax`] on an unterminated string, an invalid
    /// escape, or an unexpected character.
    pub fn tokenize(mut self) -> Result<Vec<Token>> {
        let mut tokens = Vec::new();
        loop {
            let token = self.next_token()?;
            let done = token.kind == TokenKind::Eof;
            tokens.push(token);
            if done {
                return Ok(tokens);
            }
        }
    }

    fn peek(&self) -> Option<char> {
        self.input[self.position..].chars().next()
    }

    fn peek_second(&self) -> Option<char> {
        let mut chars = self.input[self.position..].chars();
        chars.next();
        chars.next()
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.peek()?;
        self.position += c.len_utf8();
        Some(c)
    }

    fn skip_whitespace(&mut self) {
        while self.peek().is_some_and(char::is_whitespace) {
            self.bump();
        }
    }

    fn next_token(&mut self) -> Result<Token> {
        self.skip_whitespace();
        let position = self.position;

        let Some(c) = self.peek() else {
            return Ok(Token {
                kind: TokenKind::Eof,
                position,
            });
        };

        let kind = match c {
            '{' => self.single(TokenKind::LeftBrace),
            '}' => self.single(TokenKind::RightBrace),
            '(' => self.single(TokenKind::LeftParen),
            ')' => self.single(TokenKind::RightParen),
            ',' => self.single(TokenKind::Comma),
            '=' if self.peek_second() == Some('~') => {
                self.double(TokenKind::UnsupportedMatcher("=~"))
            }
            '=' => self.single(TokenKind::Equals),
            '!' if self.peek_second() == Some('=') => {
                self.double(TokenKind::UnsupportedMatcher("!="))
            }
            '!' if self.peek_second() == Some('~') => {
                self.double(TokenKind::UnsupportedMatcher("!~"))
            }
            '"' | '\'' => TokenKind::String(self.string(c)?),
            c if is_identifier_start(c) => TokenKind::Identifier(self.identifier()),
            c => {
                return Err(QueryError::Syntax {
                    position,
                    message: format!("unexpected character '{c}'"),
                }
                .into());
            }
        };

        Ok(Token { kind, position })
    }

    fn single(&mut self, kind: TokenKind) -> TokenKind {
        self.bump();
        kind
    }

    fn double(&mut self, kind: TokenKind) -> TokenKind {
        self.bump();
        self.bump();
        kind
    }

    fn identifier(&mut self) -> String {
        let start = self.position;
        while self.peek().is_some_and(is_identifier_continue) {
            self.bump();
        }
        self.input[start..self.position].to_string()
    }

    fn string(&mut self, quote: char) -> Result<String> {
        let start = self.position;
        self.bump();

        let mut value = String::new();
        loop {
            match self.bump() {
                None => {
                    return Err(QueryError::Syntax {
                        position: start,
                        message: "unterminated string literal".to_string(),
                    }
                    .into());
                }
                Some('\\') => {
                    let escape_position = self.position - 1;
                    let escaped = match self.bump() {
                        Some('\\') => '\\',
                        Some('"') => '"',
                        Some('\'') => '\'',
                        Some('n') => '\n',
                        Some('t') => '\t',
                        Some(other) => {
                            return Err(QueryError::Syntax {
                                position: escape_position,
                                message: format!("invalid escape sequence '\\{other}'"),
                            }
                            .into());
                        }
                        None => {
                            return Err(QueryError::Syntax {
                                position: start,
                                message: "unterminated string literal".to_string(),
                            }
                            .into());
                        }
                    };
                    value.push(escaped);
                }
                Some(c) if c == quote => return Ok(value),
                Some(c) => value.push(c),
            }
        }
    }
}

fn is_identifier_start(c: char) -> bool {
    c.is_ascii_alphabetic() || c == '_' || c == ':'
}

fn is_identifier_continue(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_' || c == ':' || c == '.'
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    fn kinds(input: &str) -> Vec<TokenKind> {
        Lexer::new(input)
            .tokenize()
            .unwrap()
            .into_iter()
            .map(|t| t.kind)
            .collect()
    }

    #[test]
    fn test_selector_tokens() {
        assert_eq!(
            kinds(r#"test_stream{test = "asdf"}"#),
            vec![
                TokenKind::Identifier("test_stream".to_string()),
                TokenKind::LeftBrace,
                TokenKind::Identifier("test".to_string()),
                TokenKind::Equals,
                TokenKind::String("asdf".to_string()),
                TokenKind::RightBrace,
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn test_aggregate_tokens() {
        assert_eq!(
            kinds("sum(cpu.usage)"),
            vec![
                TokenKind::Identifier("sum".to_string()),
                TokenKind::LeftParen,
                TokenKind::Identifier("cpu.usage".to_string()),
                TokenKind::RightParen,
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn test_string_escapes_and_quotes() {
        assert_eq!(
            kinds(r#"'it\'s' "a\"b\\c\n""#),
            vec![
                TokenKind::String("it's".to_string()),
                TokenKind::String("a\"b\\c\n".to_string()),
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn test_positions() {
        let tokens = Lexer::new("  a{b='c'}").tokenize().unwrap();
        let positions: Vec<_> = tokens.iter().map(|t| t.position).collect();
        assert_eq!(positions, vec![2, 3, 4, 5, 6, 9, 10]);
    }

    #[test]
    fn test_unsupported_matchers_are_tokens() {
        assert_eq!(
            kinds("a!=b=~c!~"),
            vec![
                TokenKind::Identifier("a".to_string()),
                TokenKind::UnsupportedMatcher("!="),
                TokenKind::Identifier("b".to_string()),
                TokenKind::UnsupportedMatcher("=~"),
                TokenKind::Identifier("c".to_string()),
                TokenKind::UnsupportedMatcher("!~"),
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn test_unterminated_string() {
        let err = Lexer::new(r#"a{b="c}"#).tokenize().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Syntax);
        assert!(err.to_string().contains("unterminated"));
    }

    #[test]
    fn test_unexpected_character() {
        let err = Lexer::new("a{b=1}").tokenize().unwrap_err();
        assert!(err.to_string().contains("unexpected character '1'"));
    }
}
