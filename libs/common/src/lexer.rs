//! A standalone GraphQL lexer, used to bound the size of an operation before
//! it is handed to the AST parser.
//!
//! Ignored tokens (whitespace, line terminators, commas, comments and the
//! unicode BOM) are skipped and never produced.

use std::fmt::{Display, Formatter};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKind {
  Bang,
  Dollar,
  Amp,
  ParenL,
  ParenR,
  Spread,
  Colon,
  Equals,
  At,
  BracketL,
  BracketR,
  BraceL,
  Pipe,
  BraceR,
  Name,
  Int,
  Float,
  String,
  BlockString,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Token<'a> {
  pub kind: TokenKind,
  pub value: &'a str,
  pub offset: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{message} (line {line}, column {column})")]
pub struct LexerError {
  pub message: String,
  pub line: usize,
  pub column: usize,
}

#[derive(Debug, Clone)]
pub struct Lexer<'a> {
  source: &'a str,
  offset: usize,
  failed: bool,
}

impl<'a> Lexer<'a> {
  pub fn new(source: &'a str) -> Self {
    Self {
      source,
      offset: 0,
      failed: false,
    }
  }

  fn peek(&self) -> Option<char> {
    self.source[self.offset..].chars().next()
  }

  fn peek_nth(&self, n: usize) -> Option<char> {
    self.source[self.offset..].chars().nth(n)
  }

  fn bump(&mut self) -> Option<char> {
    let c = self.peek()?;
    self.offset += c.len_utf8();
    Some(c)
  }

  fn error_at(&self, offset: usize, message: impl Into<String>) -> LexerError {
    let consumed = &self.source[..offset.min(self.source.len())];
    let line = consumed.matches('\n').count() + 1;
    let column = match consumed.rfind('\n') {
      Some(pos) => consumed[pos + 1..].chars().count() + 1,
      None => consumed.chars().count() + 1,
    };

    LexerError {
      message: message.into(),
      line,
      column,
    }
  }

  fn skip_ignored(&mut self) {
    while let Some(c) = self.peek() {
      match c {
        '\u{feff}' | ' ' | '\t' | '\n' | '\r' | ',' => {
          self.bump();
        }
        '#' => {
          while let Some(c) = self.peek() {
            if c == '\n' || c == '\r' {
              break;
            }
            self.bump();
          }
        }
        _ => break,
      }
    }
  }

  fn token(&self, kind: TokenKind, start: usize) -> Token<'a> {
    Token {
      kind,
      value: &self.source[start..self.offset],
      offset: start,
    }
  }

  fn lex_name(&mut self, start: usize) -> Token<'a> {
    while let Some(c) = self.peek() {
      if c == '_' || c.is_ascii_alphanumeric() {
        self.bump();
      } else {
        break;
      }
    }

    self.token(TokenKind::Name, start)
  }

  fn lex_digits(&mut self) -> Result<(), LexerError> {
    match self.peek() {
      Some(c) if c.is_ascii_digit() => {}
      other => {
        return Err(self.error_at(
          self.offset,
          format!("invalid number, expected digit but got: {}", describe(other)),
        ))
      }
    }

    while let Some(c) = self.peek() {
      if c.is_ascii_digit() {
        self.bump();
      } else {
        break;
      }
    }

    Ok(())
  }

  fn lex_number(&mut self, start: usize) -> Result<Token<'a>, LexerError> {
    let mut kind = TokenKind::Int;

    if self.peek() == Some('-') {
      self.bump();
    }

    if self.peek() == Some('0') {
      self.bump();
      if let Some(c) = self.peek() {
        if c.is_ascii_digit() {
          return Err(self.error_at(
            self.offset,
            format!("invalid number, unexpected digit after 0: {}", describe(Some(c))),
          ));
        }
      }
    } else {
      self.lex_digits()?;
    }

    if self.peek() == Some('.') {
      kind = TokenKind::Float;
      self.bump();
      self.lex_digits()?;
    }

    if let Some('e') | Some('E') = self.peek() {
      kind = TokenKind::Float;
      self.bump();
      if let Some('+') | Some('-') = self.peek() {
        self.bump();
      }
      self.lex_digits()?;
    }

    match self.peek() {
      Some(c) if c == '.' || c == '_' || c.is_ascii_alphabetic() => Err(self.error_at(
        self.offset,
        format!("invalid number, expected digit but got: {}", describe(Some(c))),
      )),
      _ => Ok(self.token(kind, start)),
    }
  }

  fn lex_string(&mut self, start: usize) -> Result<Token<'a>, LexerError> {
    // opening quote
    self.bump();

    loop {
      match self.bump() {
        None | Some('\n') | Some('\r') => {
          return Err(self.error_at(start, "unterminated string"));
        }
        Some('"') => return Ok(self.token(TokenKind::String, start)),
        Some('\\') => {
          let escape_offset = self.offset;
          match self.bump() {
            Some('"') | Some('\\') | Some('/') | Some('b') | Some('f') | Some('n') | Some('r')
            | Some('t') => {}
            Some('u') => {
              for _ in 0..4 {
                match self.bump() {
                  Some(c) if c.is_ascii_hexdigit() => {}
                  _ => {
                    return Err(self.error_at(escape_offset, "invalid unicode escape sequence"))
                  }
                }
              }
            }
            other => {
              return Err(self.error_at(
                escape_offset,
                format!("invalid escape sequence: \\{}", describe(other)),
              ))
            }
          }
        }
        Some(_) => {}
      }
    }
  }

  fn lex_block_string(&mut self, start: usize) -> Result<Token<'a>, LexerError> {
    // opening triple quote
    self.offset += 3;

    loop {
      let rest = &self.source[self.offset..];

      if rest.starts_with("\"\"\"") {
        self.offset += 3;
        return Ok(self.token(TokenKind::BlockString, start));
      }

      if rest.starts_with("\\\"\"\"") {
        self.offset += 4;
        continue;
      }

      if self.bump().is_none() {
        return Err(self.error_at(start, "unterminated block string"));
      }
    }
  }

  fn next_token(&mut self) -> Option<Result<Token<'a>, LexerError>> {
    self.skip_ignored();

    let start = self.offset;
    let c = self.peek()?;

    let punctuator = match c {
      '!' => Some(TokenKind::Bang),
      '$' => Some(TokenKind::Dollar),
      '&' => Some(TokenKind::Amp),
      '(' => Some(TokenKind::ParenL),
      ')' => Some(TokenKind::ParenR),
      ':' => Some(TokenKind::Colon),
      '=' => Some(TokenKind::Equals),
      '@' => Some(TokenKind::At),
      '[' => Some(TokenKind::BracketL),
      ']' => Some(TokenKind::BracketR),
      '{' => Some(TokenKind::BraceL),
      '|' => Some(TokenKind::Pipe),
      '}' => Some(TokenKind::BraceR),
      _ => None,
    };

    if let Some(kind) = punctuator {
      self.bump();
      return Some(Ok(self.token(kind, start)));
    }

    let result = match c {
      '.' => {
        if self.peek_nth(1) == Some('.') && self.peek_nth(2) == Some('.') {
          self.offset += 3;
          Ok(self.token(TokenKind::Spread, start))
        } else {
          Err(self.error_at(start, "unexpected '.', did you mean '...'?"))
        }
      }
      '"' => {
        if self.source[start..].starts_with("\"\"\"") {
          self.lex_block_string(start)
        } else {
          self.lex_string(start)
        }
      }
      '-' | '0'..='9' => self.lex_number(start),
      c if c == '_' || c.is_ascii_alphabetic() => Ok(self.lex_name(start)),
      other => Err(self.error_at(
        start,
        format!("unexpected character {}", describe(Some(other))),
      )),
    };

    Some(result)
  }
}

impl<'a> Iterator for Lexer<'a> {
  type Item = Result<Token<'a>, LexerError>;

  fn next(&mut self) -> Option<Self::Item> {
    if self.failed {
      return None;
    }

    let next = self.next_token();

    if let Some(Err(_)) = next {
      self.failed = true;
    }

    next
  }
}

fn describe(c: Option<char>) -> String {
  match c {
    Some(c) => format!("{:?}", c),
    None => "<EOF>".to_string(),
  }
}

/// Counts every significant token of `source` until end of input.
pub fn count_tokens(source: &str) -> Result<usize, LexerError> {
  let mut count = 0;

  for token in Lexer::new(source) {
    token?;
    count += 1;
  }

  Ok(count)
}

impl Display for TokenKind {
  fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
    let s = match self {
      TokenKind::Bang => "!",
      TokenKind::Dollar => "$",
      TokenKind::Amp => "&",
      TokenKind::ParenL => "(",
      TokenKind::ParenR => ")",
      TokenKind::Spread => "...",
      TokenKind::Colon => ":",
      TokenKind::Equals => "=",
      TokenKind::At => "@",
      TokenKind::BracketL => "[",
      TokenKind::BracketR => "]",
      TokenKind::BraceL => "{",
      TokenKind::Pipe => "|",
      TokenKind::BraceR => "}",
      TokenKind::Name => "Name",
      TokenKind::Int => "Int",
      TokenKind::Float => "Float",
      TokenKind::String => "String",
      TokenKind::BlockString => "BlockString",
    };

    write!(f, "{}", s)
  }
}
