//! Tokenizer and recursive-descent parser for graph query documents.
//!
//! Supports the executable subset the graph surface serves: `query` and
//! `mutation` operations (or the `{ ... }` shorthand), operation names,
//! variable definitions with defaults, aliases, arguments and nested
//! selections. Fragments, directives, floats, enums and object literals
//! are rejected with a positioned [`ParseError`].

use std::iter::Peekable;
use std::str::Chars;

use super::document::{
    Document, Field, InputValue, OperationDef, OperationKind, Pos, TypeRef, VariableDef,
};

/// Selection sets nested deeper than this are rejected.
pub const MAX_DEPTH: usize = 32;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{message} at {pos}")]
pub struct ParseError {
    pub message: String,
    pub pos: Pos,
}

impl ParseError {
    fn new(message: impl Into<String>, pos: Pos) -> Self {
        Self {
            message: message.into(),
            pos,
        }
    }
}

/// Parses `source` into a [`Document`].
///
/// # Errors
///
/// Returns the first syntax error, with its position.
pub fn parse(source: &str) -> Result<Document, ParseError> {
    let tokens = Lexer::new(source).tokenize()?;
    Parser { tokens, at: 0 }.document()
}

// ---------------------------------------------------------------------------
// Lexer
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
enum Tok {
    Punct(char),
    Spread,
    Name(String),
    Int(i64),
    Str(String),
    Eof,
}

impl Tok {
    fn describe(&self) -> String {
        match self {
            Self::Punct(c) => format!("'{c}'"),
            Self::Spread => "'...'".to_string(),
            Self::Name(n) => format!("name {n:?}"),
            Self::Int(n) => format!("integer {n}"),
            Self::Str(_) => "string".to_string(),
            Self::Eof => "end of document".to_string(),
        }
    }
}

#[derive(Debug, Clone)]
struct Token {
    tok: Tok,
    pos: Pos,
}

struct Lexer<'a> {
    chars: Peekable<Chars<'a>>,
    line: u32,
    column: u32,
}

impl<'a> Lexer<'a> {
    fn new(source: &'a str) -> Self {
        Self {
            chars: source.chars().peekable(),
            line: 1,
            column: 1,
        }
    }

    fn pos(&self) -> Pos {
        Pos {
            line: self.line,
            column: self.column,
        }
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.chars.next()?;
        if c == '\n' {
            self.line += 1;
            self.column = 1;
        } else {
            self.column += 1;
        }
        Some(c)
    }

    fn tokenize(mut self) -> Result<Vec<Token>, ParseError> {
        let mut tokens = Vec::new();
        loop {
            self.skip_ignored();
            let pos = self.pos();
            let Some(&c) = self.chars.peek() else {
                tokens.push(Token { tok: Tok::Eof, pos });
                return Ok(tokens);
            };
            let tok = match c {
                '{' | '}' | '(' | ')' | '[' | ']' | ':' | '$' | '!' | '=' | '@' => {
                    self.bump();
                    Tok::Punct(c)
                }
                '.' => self.spread(pos)?,
                '"' => Tok::Str(self.string(pos)?),
                '-' | '0'..='9' => Tok::Int(self.number(pos)?),
                c if c == '_' || c.is_ascii_alphabetic() => Tok::Name(self.name()),
                other => {
                    return Err(ParseError::new(format!("unexpected character {other:?}"), pos));
                }
            };
            tokens.push(Token { tok, pos });
        }
    }

    /// Whitespace, commas, byte order marks and `#` comments.
    fn skip_ignored(&mut self) {
        while let Some(&c) = self.chars.peek() {
            match c {
                ' ' | '\t' | '\n' | '\r' | ',' | '\u{feff}' => {
                    self.bump();
                }
                '#' => {
                    while let Some(&c) = self.chars.peek() {
                        if c == '\n' {
                            break;
                        }
                        self.bump();
                    }
                }
                _ => break,
            }
        }
    }

    fn spread(&mut self, pos: Pos) -> Result<Tok, ParseError> {
        for _ in 0..3 {
            if self.bump() != Some('.') {
                return Err(ParseError::new("expected '...'", pos));
            }
        }
        Ok(Tok::Spread)
    }

    fn name(&mut self) -> String {
        let mut name = String::new();
        while let Some(&c) = self.chars.peek() {
            if c == '_' || c.is_ascii_alphanumeric() {
                name.push(c);
                self.bump();
            } else {
                break;
            }
        }
        name
    }

    fn number(&mut self, pos: Pos) -> Result<i64, ParseError> {
        let mut text = String::new();
        if self.chars.peek() == Some(&'-') {
            text.push('-');
            self.bump();
        }
        while let Some(&c) = self.chars.peek() {
            if c.is_ascii_digit() {
                text.push(c);
                self.bump();
            } else {
                break;
            }
        }
        match self.chars.peek() {
            Some('.' | 'e' | 'E') => {
                return Err(ParseError::new("float values are not supported", pos));
            }
            Some(&c) if c == '_' || c.is_ascii_alphabetic() => {
                return Err(ParseError::new(format!("invalid number {text}{c}"), pos));
            }
            _ => {}
        }
        text.parse()
            .map_err(|_| ParseError::new(format!("invalid integer {text:?}"), pos))
    }

    fn string(&mut self, pos: Pos) -> Result<String, ParseError> {
        self.bump();
        if self.chars.peek() == Some(&'"') {
            self.bump();
            if self.chars.peek() == Some(&'"') {
                return Err(ParseError::new("block strings are not supported", pos));
            }
            return Ok(String::new());
        }

        let mut out = String::new();
        loop {
            match self.bump() {
                None | Some('\n' | '\r') => {
                    return Err(ParseError::new("unterminated string", pos));
                }
                Some('"') => return Ok(out),
                Some('\\') => out.push(self.escape(pos)?),
                Some(c) => out.push(c),
            }
        }
    }

    fn escape(&mut self, pos: Pos) -> Result<char, ParseError> {
        Ok(match self.bump() {
            Some('"') => '"',
            Some('\\') => '\\',
            Some('/') => '/',
            Some('b') => '\u{8}',
            Some('f') => '\u{c}',
            Some('n') => '\n',
            Some('r') => '\r',
            Some('t') => '\t',
            Some('u') => {
                let mut code = 0u32;
                for _ in 0..4 {
                    let digit = self
                        .bump()
                        .and_then(|c| c.to_digit(16))
                        .ok_or_else(|| ParseError::new("invalid unicode escape", pos))?;
                    code = code * 16 + digit;
                }
                char::from_u32(code).ok_or_else(|| ParseError::new("invalid unicode escape", pos))?
            }
            _ => return Err(ParseError::new("invalid escape sequence", pos)),
        })
    }
}

// ---------------------------------------------------------------------------
// Parser
// ---------------------------------------------------------------------------

struct Parser {
    tokens: Vec<Token>,
    at: usize,
}

impl Parser {
    fn peek(&self) -> &Token {
        // The lexer always terminates the stream with Eof.
        &self.tokens[self.at.min(self.tokens.len() - 1)]
    }

    fn advance(&mut self) -> Token {
        let token = self.peek().clone();
        if self.at < self.tokens.len() - 1 {
            self.at += 1;
        }
        token
    }

    fn at_punct(&self, c: char) -> bool {
        self.peek().tok == Tok::Punct(c)
    }

    fn eat_punct(&mut self, c: char) -> bool {
        if self.at_punct(c) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn expect_punct(&mut self, c: char) -> Result<Pos, ParseError> {
        let token = self.advance();
        if token.tok == Tok::Punct(c) {
            Ok(token.pos)
        } else {
            Err(ParseError::new(
                format!("expected '{c}', found {}", token.tok.describe()),
                token.pos,
            ))
        }
    }

    fn expect_name(&mut self) -> Result<(String, Pos), ParseError> {
        let token = self.advance();
        match token.tok {
            Tok::Name(name) => Ok((name, token.pos)),
            other => Err(ParseError::new(
                format!("expected a name, found {}", other.describe()),
                token.pos,
            )),
        }
    }

    fn document(mut self) -> Result<Document, ParseError> {
        let mut operations = Vec::new();
        while self.peek().tok != Tok::Eof {
            operations.push(self.operation()?);
        }
        if operations.is_empty() {
            return Err(ParseError::new("document contains no operations", self.peek().pos));
        }
        Ok(Document { operations })
    }

    fn operation(&mut self) -> Result<OperationDef, ParseError> {
        let pos = self.peek().pos;
        if self.at_punct('{') {
            return Ok(OperationDef {
                kind: OperationKind::Query,
                name: None,
                variables: Vec::new(),
                selection: self.selection_set(0)?,
                pos,
            });
        }

        let (keyword, _) = self.expect_name()?;
        let kind = match keyword.as_str() {
            "query" => OperationKind::Query,
            "mutation" => OperationKind::Mutation,
            "subscription" => return Err(ParseError::new("subscriptions are not supported", pos)),
            "fragment" => return Err(ParseError::new("fragments are not supported", pos)),
            other => {
                return Err(ParseError::new(format!("unexpected {other:?}, expected an operation"), pos));
            }
        };
        let name = match &self.peek().tok {
            Tok::Name(_) => Some(self.expect_name()?.0),
            _ => None,
        };
        let variables = if self.at_punct('(') {
            self.variable_defs()?
        } else {
            Vec::new()
        };
        if self.at_punct('@') {
            return Err(ParseError::new("directives are not supported", self.peek().pos));
        }
        Ok(OperationDef {
            kind,
            name,
            variables,
            selection: self.selection_set(0)?,
            pos,
        })
    }

    fn variable_defs(&mut self) -> Result<Vec<VariableDef>, ParseError> {
        self.expect_punct('(')?;
        let mut defs = Vec::new();
        while !self.eat_punct(')') {
            let pos = self.expect_punct('$')?;
            let (name, _) = self.expect_name()?;
            self.expect_punct(':')?;
            let ty = self.type_ref()?;
            let default = if self.eat_punct('=') {
                Some(self.value(true)?)
            } else {
                None
            };
            defs.push(VariableDef {
                name,
                ty,
                default,
                pos,
            });
        }
        Ok(defs)
    }

    fn type_ref(&mut self) -> Result<TypeRef, ParseError> {
        let base = if self.eat_punct('[') {
            let inner = self.type_ref()?;
            self.expect_punct(']')?;
            TypeRef::List(Box::new(inner))
        } else {
            TypeRef::Named(self.expect_name()?.0)
        };
        Ok(if self.eat_punct('!') {
            TypeRef::NonNull(Box::new(base))
        } else {
            base
        })
    }

    fn selection_set(&mut self, depth: usize) -> Result<Vec<Field>, ParseError> {
        let pos = self.expect_punct('{')?;
        if depth >= MAX_DEPTH {
            return Err(ParseError::new(
                format!("selections nest deeper than {MAX_DEPTH} levels"),
                pos,
            ));
        }
        let mut fields = Vec::new();
        while !self.eat_punct('}') {
            fields.push(self.field(depth)?);
        }
        if fields.is_empty() {
            return Err(ParseError::new("empty selection set", pos));
        }
        Ok(fields)
    }

    fn field(&mut self, depth: usize) -> Result<Field, ParseError> {
        let token = self.peek().clone();
        match token.tok {
            Tok::Spread => return Err(ParseError::new("fragments are not supported", token.pos)),
            Tok::Name(_) => {}
            other => {
                return Err(ParseError::new(
                    format!("expected a field, found {}", other.describe()),
                    token.pos,
                ));
            }
        }

        let (first, pos) = self.expect_name()?;
        let (alias, name) = if self.eat_punct(':') {
            (Some(first), self.expect_name()?.0)
        } else {
            (None, first)
        };

        let mut arguments = Vec::new();
        if self.eat_punct('(') {
            while !self.eat_punct(')') {
                let (arg, _) = self.expect_name()?;
                self.expect_punct(':')?;
                arguments.push((arg, self.value(false)?));
            }
        }
        if self.at_punct('@') {
            return Err(ParseError::new("directives are not supported", self.peek().pos));
        }
        let selection = if self.at_punct('{') {
            self.selection_set(depth + 1)?
        } else {
            Vec::new()
        };

        Ok(Field {
            alias,
            name,
            arguments,
            selection,
            pos,
        })
    }

    fn value(&mut self, constant: bool) -> Result<InputValue, ParseError> {
        let token = self.advance();
        match token.tok {
            Tok::Punct('$') if constant => Err(ParseError::new(
                "variables are not allowed in default values",
                token.pos,
            )),
            Tok::Punct('$') => Ok(InputValue::Variable(self.expect_name()?.0)),
            Tok::Int(n) => Ok(InputValue::Int(n)),
            Tok::Str(s) => Ok(InputValue::String(s)),
            Tok::Name(name) => match name.as_str() {
                "true" => Ok(InputValue::Bool(true)),
                "false" => Ok(InputValue::Bool(false)),
                "null" => Ok(InputValue::Null),
                _ => Err(ParseError::new(
                    format!("enum value {name} is not supported"),
                    token.pos,
                )),
            },
            Tok::Punct('[') => {
                let mut items = Vec::new();
                while !self.eat_punct(']') {
                    if self.peek().tok == Tok::Eof {
                        return Err(ParseError::new("unterminated list", token.pos));
                    }
                    items.push(self.value(constant)?);
                }
                Ok(InputValue::List(items))
            }
            Tok::Punct('{') => Err(ParseError::new("object values are not supported", token.pos)),
            other => Err(ParseError::new(
                format!("expected a value, found {}", other.describe()),
                token.pos,
            )),
        }
    }
}
