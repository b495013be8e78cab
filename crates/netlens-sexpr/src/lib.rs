//! A simple S-expression parser for the parenthesis-delimited nested-list
//! grammar used by KiCad design files.
//!
//! Atoms keep their exact source text, so pin numbers like `"01"` and numeric
//! values with exponents like `1.5e-3` survive a round trip unchanged. Every
//! parse failure reports the byte offset of the offending token.

use std::fmt;

/// An S-expression value
#[derive(Debug, Clone, PartialEq)]
pub enum Sexpr {
    /// A symbol - unquoted identifier or number
    Symbol(String),
    /// A string - quoted text
    String(String),
    /// A list of S-expressions
    List(Vec<Sexpr>),
}

impl Sexpr {
    /// Create a symbol (unquoted atom)
    pub fn symbol(s: impl Into<String>) -> Self {
        Sexpr::Symbol(s.into())
    }

    /// Create a string (quoted atom)
    pub fn string(s: impl Into<String>) -> Self {
        Sexpr::String(s.into())
    }

    /// Create a list from a vector of S-expressions
    pub fn list(items: Vec<Sexpr>) -> Self {
        Sexpr::List(items)
    }

    /// Get the atom value if this is an atom (symbol or string)
    pub fn as_atom(&self) -> Option<&str> {
        match self {
            Sexpr::Symbol(s) | Sexpr::String(s) => Some(s),
            _ => None,
        }
    }

    /// Get the list items if this is a list
    pub fn as_list(&self) -> Option<&[Sexpr]> {
        match self {
            Sexpr::List(items) => Some(items),
            _ => None,
        }
    }

    /// Interpret the atom as a number. KiCad writes plain decimals as well as
    /// exponent forms (`1.5e-3`); both go through `str::parse::<f64>`.
    pub fn as_f64(&self) -> Option<f64> {
        self.as_atom().and_then(|s| s.parse::<f64>().ok())
    }

    /// The tag of a list node: its first child, if that child is an atom.
    pub fn tag(&self) -> Option<&str> {
        self.as_list().and_then(|items| items.first()).and_then(|s| s.as_atom())
    }

    /// Positional access to an atom argument of a list node.
    /// `arg(1)` on `(name "VBUS")` yields `"VBUS"`.
    pub fn arg(&self, index: usize) -> Option<&str> {
        self.as_list().and_then(|items| items.get(index)).and_then(|s| s.as_atom())
    }

    /// Positional access to a numeric argument of a list node.
    pub fn arg_f64(&self, index: usize) -> Option<f64> {
        self.as_list().and_then(|items| items.get(index)).and_then(|s| s.as_f64())
    }

    /// Find the first child list whose tag matches `tag`.
    pub fn child<'a>(&'a self, tag: &'a str) -> Option<&'a Sexpr> {
        self.children(tag).next()
    }

    /// Iterate over all child lists whose tag matches `tag`.
    pub fn children<'a>(&'a self, tag: &'a str) -> impl Iterator<Item = &'a Sexpr> {
        self.as_list()
            .unwrap_or(&[])
            .iter()
            .filter(move |item| item.tag() == Some(tag))
    }

    /// Shorthand for `child(tag).and_then(|c| c.arg(1))` - the common
    /// `(tag value)` pattern.
    pub fn child_atom<'a>(&'a self, tag: &'a str) -> Option<&'a str> {
        self.child(tag).and_then(|c| c.arg(1))
    }
}

/// Parser for S-expressions
pub struct Parser<'a> {
    input: &'a str,
    chars: std::iter::Peekable<std::str::CharIndices<'a>>,
    current_pos: usize,
}

impl<'a> Parser<'a> {
    /// Create a new parser for the given input
    pub fn new(input: &'a str) -> Self {
        Parser {
            input,
            chars: input.char_indices().peekable(),
            current_pos: 0,
        }
    }

    /// Parse the input and return the S-expression
    pub fn parse(&mut self) -> Result<Sexpr, ParseError> {
        self.skip_whitespace();
        if self.is_at_end() {
            return Err(ParseError::UnexpectedEof {
                offset: self.current_pos,
            });
        }

        if self.peek_char() == Some('(') {
            self.parse_list()
        } else {
            self.parse_atom()
        }
    }

    /// Parse multiple S-expressions from the input
    pub fn parse_all(&mut self) -> Result<Vec<Sexpr>, ParseError> {
        let mut results = Vec::new();

        loop {
            self.skip_whitespace();
            if self.is_at_end() {
                break;
            }
            results.push(self.parse()?);
        }

        Ok(results)
    }

    fn parse_list(&mut self) -> Result<Sexpr, ParseError> {
        let start_pos = self.current_pos;
        self.expect('(')?;
        let mut items = Vec::new();
        let mut item_count = 0;

        loop {
            self.skip_whitespace();

            if self.is_at_end() {
                return Err(ParseError::UnclosedList { offset: start_pos });
            }

            if self.peek_char() == Some(')') {
                self.advance();
                break;
            }

            items.push(self.parse()?);
            item_count += 1;

            if item_count % 1000 == 0 {
                log::trace!("Parsed {item_count} items in list at offset {start_pos}");
            }
        }

        Ok(Sexpr::List(items))
    }

    fn parse_atom(&mut self) -> Result<Sexpr, ParseError> {
        self.skip_whitespace();

        if self.peek_char() == Some('"') {
            self.parse_string()
        } else {
            let start = self.current_pos;
            while let Some(ch) = self.peek_char() {
                if ch.is_whitespace() || ch == '(' || ch == ')' {
                    break;
                }
                self.advance();
            }

            if self.current_pos == start {
                return Err(ParseError::EmptyAtom { offset: start });
            }

            Ok(Sexpr::Symbol(
                self.input[start..self.current_pos].to_string(),
            ))
        }
    }

    fn parse_string(&mut self) -> Result<Sexpr, ParseError> {
        let start_pos = self.current_pos;
        self.expect('"')?;
        let mut result = String::new();

        loop {
            match self.peek_char() {
                None => return Err(ParseError::UnterminatedString { offset: start_pos }),
                Some('"') => {
                    self.advance();
                    break;
                }
                Some('\\') => {
                    self.advance();
                    match self.peek_char() {
                        Some('n') => {
                            result.push('\n');
                            self.advance();
                        }
                        Some('r') => {
                            result.push('\r');
                            self.advance();
                        }
                        Some('t') => {
                            result.push('\t');
                            self.advance();
                        }
                        Some('\\') => {
                            result.push('\\');
                            self.advance();
                        }
                        Some('"') => {
                            result.push('"');
                            self.advance();
                        }
                        Some(ch) => {
                            result.push(ch);
                            self.advance();
                        }
                        None => {
                            return Err(ParseError::UnterminatedString { offset: start_pos })
                        }
                    }
                }
                Some(ch) => {
                    result.push(ch);
                    self.advance();
                }
            }
        }

        Ok(Sexpr::String(result))
    }

    fn skip_whitespace(&mut self) {
        while let Some(ch) = self.peek_char() {
            if ch.is_whitespace() {
                self.advance();
            } else if ch == ';' {
                // Skip comment until end of line
                self.advance();
                while let Some(ch) = self.peek_char() {
                    self.advance();
                    if ch == '\n' {
                        break;
                    }
                }
            } else {
                break;
            }
        }
    }

    fn peek_char(&mut self) -> Option<char> {
        self.chars.peek().map(|(_, ch)| *ch)
    }

    fn advance(&mut self) {
        if let Some((pos, ch)) = self.chars.next() {
            self.current_pos = pos + ch.len_utf8();
        }
    }

    fn expect(&mut self, expected: char) -> Result<(), ParseError> {
        match self.peek_char() {
            Some(ch) if ch == expected => {
                self.advance();
                Ok(())
            }
            Some(ch) => Err(ParseError::UnexpectedChar {
                found: ch,
                expected,
                offset: self.current_pos,
            }),
            None => Err(ParseError::UnexpectedEof {
                offset: self.current_pos,
            }),
        }
    }

    fn is_at_end(&mut self) -> bool {
        self.chars.peek().is_none()
    }
}

/// Parse a string into an S-expression
pub fn parse(input: &str) -> Result<Sexpr, ParseError> {
    log::trace!("Parsing S-expression from {} bytes of input", input.len());
    let result = Parser::new(input).parse();
    if let Err(e) = &result {
        log::trace!("Failed to parse S-expression: {e}");
    }
    result
}

/// Parse a string into multiple S-expressions
pub fn parse_all(input: &str) -> Result<Vec<Sexpr>, ParseError> {
    Parser::new(input).parse_all()
}

/// Errors that can occur during parsing. Each variant records the byte
/// offset of the first unmatched or malformed token.
#[derive(Debug, Clone, PartialEq)]
pub enum ParseError {
    UnexpectedEof { offset: usize },
    UnexpectedChar { found: char, expected: char, offset: usize },
    UnclosedList { offset: usize },
    UnterminatedString { offset: usize },
    EmptyAtom { offset: usize },
}

impl ParseError {
    /// Byte offset of the token that triggered the error.
    pub fn offset(&self) -> usize {
        match self {
            ParseError::UnexpectedEof { offset }
            | ParseError::UnexpectedChar { offset, .. }
            | ParseError::UnclosedList { offset }
            | ParseError::UnterminatedString { offset }
            | ParseError::EmptyAtom { offset } => *offset,
        }
    }
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParseError::UnexpectedEof { offset } => {
                write!(f, "Unexpected end of input at byte {offset}")
            }
            ParseError::UnexpectedChar {
                found,
                expected,
                offset,
            } => {
                write!(f, "Expected '{expected}', found '{found}' at byte {offset}")
            }
            ParseError::UnclosedList { offset } => {
                write!(f, "Unclosed list starting at byte {offset}")
            }
            ParseError::UnterminatedString { offset } => {
                write!(f, "Unterminated string starting at byte {offset}")
            }
            ParseError::EmptyAtom { offset } => write!(f, "Empty atom at byte {offset}"),
        }
    }
}

impl std::error::Error for ParseError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_atom() {
        assert_eq!(parse("hello").unwrap(), Sexpr::Symbol("hello".to_string()));
        assert_eq!(parse("123").unwrap(), Sexpr::Symbol("123".to_string()));
        assert_eq!(parse("3.14").unwrap(), Sexpr::Symbol("3.14".to_string()));
        assert_eq!(
            parse("symbol-with-dashes").unwrap(),
            Sexpr::Symbol("symbol-with-dashes".to_string())
        );
    }

    #[test]
    fn test_parse_string() {
        assert_eq!(
            parse("\"hello world\"").unwrap(),
            Sexpr::String("hello world".to_string())
        );
        assert_eq!(
            parse("\"with\\\"quotes\\\"\"").unwrap(),
            Sexpr::String("with\"quotes\"".to_string())
        );
        assert_eq!(
            parse("\"parens (inside) ok\"").unwrap(),
            Sexpr::String("parens (inside) ok".to_string())
        );
    }

    #[test]
    fn test_parse_list() {
        assert_eq!(parse("()").unwrap(), Sexpr::List(vec![]));
        assert_eq!(
            parse("(a b c)").unwrap(),
            Sexpr::List(vec![
                Sexpr::Symbol("a".to_string()),
                Sexpr::Symbol("b".to_string()),
                Sexpr::Symbol("c".to_string()),
            ])
        );
    }

    #[test]
    fn test_parse_nested() {
        let input = "(wire (pts (xy 0 0) (xy 2.54 0)))";
        let parsed = parse(input).unwrap();
        assert_eq!(parsed.tag(), Some("wire"));
        let pts = parsed.child("pts").unwrap();
        assert_eq!(pts.children("xy").count(), 2);
    }

    #[test]
    fn test_numeric_atoms_with_exponents() {
        let parsed = parse("(at 1.5e-3 -2E2 90)").unwrap();
        assert_eq!(parsed.arg_f64(1), Some(0.0015));
        assert_eq!(parsed.arg_f64(2), Some(-200.0));
        assert_eq!(parsed.arg_f64(3), Some(90.0));
        // Source text is preserved exactly
        assert_eq!(parsed.arg(1), Some("1.5e-3"));
    }

    #[test]
    fn test_parse_kicad_pin() {
        let input = r#"(pin passive line (at 0 0 0) (length 2.54) (name "~") (number "01"))"#;
        let pin = parse(input).unwrap();
        assert_eq!(pin.tag(), Some("pin"));
        assert_eq!(pin.arg(1), Some("passive"));
        // Pin numbers remain strings - leading zeros intact
        assert_eq!(pin.child_atom("number"), Some("01"));
        assert_eq!(pin.child_atom("name"), Some("~"));
    }

    #[test]
    fn test_parse_with_comments() {
        let input = r#"
        ; This is a comment
        (test ; inline comment
          value)
        "#;
        let result = parse(input).unwrap();
        assert_eq!(
            result,
            Sexpr::List(vec![
                Sexpr::Symbol("test".to_string()),
                Sexpr::Symbol("value".to_string()),
            ])
        );
    }

    #[test]
    fn test_error_offsets() {
        let err = parse("(a (b c)").unwrap_err();
        assert_eq!(err, ParseError::UnclosedList { offset: 0 });

        let err = parse("   (a \"unterminated").unwrap_err();
        match err {
            ParseError::UnterminatedString { offset } => assert_eq!(offset, 6),
            other => panic!("unexpected error: {other:?}"),
        }

        let err = parse("").unwrap_err();
        assert_eq!(err.offset(), 0);
    }

    #[test]
    fn test_parse_all() {
        let exprs = parse_all("(a 1) (b 2)\n(c 3)").unwrap();
        assert_eq!(exprs.len(), 3);
        assert_eq!(exprs[2].tag(), Some("c"));
    }

    #[test]
    fn test_utf8_handling() {
        let input = r#"(symbol "résistance" "日本語")"#;
        let parsed = parse(input).unwrap();

        if let Sexpr::List(items) = parsed {
            assert_eq!(items.len(), 3);
            assert_eq!(items[1], Sexpr::String("résistance".to_string()));
            assert_eq!(items[2], Sexpr::String("日本語".to_string()));
        } else {
            panic!("Expected a list");
        }
    }
}
