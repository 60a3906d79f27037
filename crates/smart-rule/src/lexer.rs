//! 规则文本词法分析
//!
//! 按需产生 token，解析器读到最后一个 `|` 后直接截取剩余文本作为 cmdlet，
//! 因此 cmdlet 部分不经过词法分析。

use smart_core::ParseError;

const SECOND: i64 = 1000;
const MINUTE: i64 = 60 * SECOND;
const HOUR: i64 = 60 * MINUTE;
const DAY: i64 = 24 * HOUR;

#[derive(Debug, Clone, PartialEq)]
pub enum TokenKind {
    Ident(String),
    Integer(i64),
    /// 毫秒
    Duration(i64),
    /// 字节
    Size(i64),
    Str(String),
    Colon,
    Pipe,
    LParen,
    RParen,
    Comma,
    Dot,
    Plus,
    Minus,
    Gt,
    Ge,
    Lt,
    Le,
    Eq,
    Ne,
    Eof,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    pub start: usize,
    pub end: usize,
}

impl Token {
    pub fn is_keyword(&self, keyword: &str) -> bool {
        matches!(&self.kind, TokenKind::Ident(name) if name == keyword)
    }
}

pub struct Lexer<'a> {
    text: &'a str,
    pos: usize,
}

impl<'a> Lexer<'a> {
    pub fn new(text: &'a str) -> Self {
        Self { text, pos: 0 }
    }

    fn peek_char(&self) -> Option<char> {
        self.text[self.pos..].chars().next()
    }

    fn peek_char_at(&self, offset: usize) -> Option<char> {
        self.text[self.pos..].chars().nth(offset)
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.peek_char()?;
        self.pos += c.len_utf8();
        Some(c)
    }

    fn skip_whitespace(&mut self) {
        while matches!(self.peek_char(), Some(c) if c.is_whitespace()) {
            self.bump();
        }
    }

    pub fn next_token(&mut self) -> Result<Token, ParseError> {
        self.skip_whitespace();
        let start = self.pos;
        let Some(c) = self.bump() else {
            return Ok(Token {
                kind: TokenKind::Eof,
                start,
                end: start,
            });
        };

        let kind = match c {
            ':' => TokenKind::Colon,
            '|' => TokenKind::Pipe,
            '(' => TokenKind::LParen,
            ')' => TokenKind::RParen,
            ',' => TokenKind::Comma,
            '.' => TokenKind::Dot,
            '+' => TokenKind::Plus,
            '-' => TokenKind::Minus,
            '>' => self.with_eq(TokenKind::Ge, TokenKind::Gt),
            '<' => self.with_eq(TokenKind::Le, TokenKind::Lt),
            '=' if self.peek_char() == Some('=') => {
                self.bump();
                TokenKind::Eq
            }
            '!' if self.peek_char() == Some('=') => {
                self.bump();
                TokenKind::Ne
            }
            '"' => TokenKind::Str(self.string_literal(start)?),
            c if c.is_ascii_digit() => self.number(start)?,
            c if c.is_ascii_alphabetic() || c == '_' => {
                while matches!(self.peek_char(), Some(c) if c.is_ascii_alphanumeric() || c == '_') {
                    self.bump();
                }
                TokenKind::Ident(self.text[start..self.pos].to_string())
            }
            other => {
                return Err(ParseError::new(
                    format!("Unexpected character '{}' at {}", other, start),
                    start,
                ))
            }
        };

        Ok(Token {
            kind,
            start,
            end: self.pos,
        })
    }

    fn with_eq(&mut self, with: TokenKind, without: TokenKind) -> TokenKind {
        if self.peek_char() == Some('=') {
            self.bump();
            with
        } else {
            without
        }
    }

    fn string_literal(&mut self, start: usize) -> Result<String, ParseError> {
        let mut value = String::new();
        loop {
            match self.bump() {
                Some('"') => return Ok(value),
                Some('\\') => match self.bump() {
                    Some(escaped) => value.push(escaped),
                    None => break,
                },
                Some('\n') | None => break,
                Some(c) => value.push(c),
            }
        }
        Err(ParseError::new(
            format!("Unterminated string literal at {}", start),
            start,
        ))
    }

    fn digits(&mut self) -> &'a str {
        let start = self.pos;
        while matches!(self.peek_char(), Some(c) if c.is_ascii_digit()) {
            self.bump();
        }
        &self.text[start..self.pos]
    }

    fn unit(&mut self) -> &'a str {
        let start = self.pos;
        while matches!(self.peek_char(), Some(c) if c.is_ascii_alphabetic()) {
            self.bump();
        }
        &self.text[start..self.pos]
    }

    /// 整数，可带时长单位（可组合，如 `1h30min`）或容量单位
    fn number(&mut self, start: usize) -> Result<TokenKind, ParseError> {
        // 首位数字已被读取
        self.pos = start;
        let overflow = || ParseError::new(format!("Number out of range at {}", start), start);

        let value: i64 = self.digits().parse().map_err(|_| overflow())?;
        let unit = self.unit();
        if unit.is_empty() {
            return Ok(TokenKind::Integer(value));
        }

        if let Some(factor) = duration_factor(unit) {
            let mut total = value.checked_mul(factor).ok_or_else(overflow)?;
            while matches!(self.peek_char(), Some(c) if c.is_ascii_digit())
                && matches!(self.peek_char_at(1), Some(c) if c.is_ascii_alphanumeric())
            {
                let part_start = self.pos;
                let part: i64 = self.digits().parse().map_err(|_| overflow())?;
                let unit = self.unit();
                let factor = duration_factor(unit).ok_or_else(|| {
                    ParseError::new(
                        format!("Invalid time duration format: '{}'", &self.text[start..self.pos]),
                        part_start,
                    )
                })?;
                total = part
                    .checked_mul(factor)
                    .and_then(|p| total.checked_add(p))
                    .ok_or_else(overflow)?;
            }
            return Ok(TokenKind::Duration(total));
        }

        if let Some(factor) = size_factor(unit) {
            return Ok(TokenKind::Size(value.checked_mul(factor).ok_or_else(overflow)?));
        }

        Err(ParseError::new(
            format!("Unknown unit '{}' at {}", unit, start),
            start,
        ))
    }
}

fn duration_factor(unit: &str) -> Option<i64> {
    match unit {
        "ms" => Some(1),
        "s" | "sec" => Some(SECOND),
        "m" | "min" => Some(MINUTE),
        "h" | "hour" => Some(HOUR),
        "d" | "day" => Some(DAY),
        _ => None,
    }
}

fn size_factor(unit: &str) -> Option<i64> {
    let exp = match unit.to_ascii_uppercase().as_str() {
        "B" => 0,
        "KB" | "K" => 1,
        "MB" | "M" => 2,
        "GB" | "G" => 3,
        "TB" | "T" => 4,
        "PB" | "P" => 5,
        _ => return None,
    };
    Some(1024_i64.pow(exp))
}
