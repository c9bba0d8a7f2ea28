//! Tolerant extraction of a JSON object from free-form model output.
//!
//! Models routinely wrap valid JSON in prose or code fences, or answer with Python-style
//! literals. [`parse_json`] tries, in order: the raw text as JSON, the span between the first
//! `{` and the last `}` as JSON, and finally a permissive literal parse of that span that
//! accepts single quotes, `True`/`False`/`None`, tuples, and trailing commas.

use serde_json::{Map, Number, Value};
use thiserror::Error;

const PREVIEW_CHARS: usize = 120;

/// Errors raised when no structured object can be recovered.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ParseError {
    /// None of the parsing strategies produced a JSON object.
    #[error("String is not a valid structured object: {preview}")]
    NotStructured {
        /// Leading slice of the rejected text.
        preview: String,
    },
}

/// Recover a JSON object from `raw`.
pub fn parse_json(raw: &str) -> Result<Map<String, Value>, ParseError> {
    if let Ok(Value::Object(map)) = serde_json::from_str::<Value>(raw.trim()) {
        return Ok(map);
    }

    let candidate = brace_span(raw);
    if let Some(span) = candidate
        && let Ok(Value::Object(map)) = serde_json::from_str::<Value>(span)
    {
        tracing::debug!("Recovered JSON object from surrounding prose");
        return Ok(map);
    }

    let literal_source = candidate.unwrap_or(raw);
    match parse_literal(literal_source) {
        Ok(Value::Object(map)) => {
            tracing::debug!("Recovered object through literal parsing");
            Ok(map)
        }
        Ok(_) | Err(_) => {
            let preview: String = raw.chars().take(PREVIEW_CHARS).collect();
            tracing::warn!(preview = %preview, "Model output is not a structured object");
            Err(ParseError::NotStructured { preview })
        }
    }
}

/// Slice between the first `{` and the last `}`, inclusive.
fn brace_span(raw: &str) -> Option<&str> {
    let start = raw.find('{')?;
    let end = raw.rfind('}')?;
    (start < end).then(|| &raw[start..=end])
}

/// Parse a Python-style literal into a JSON value.
fn parse_literal(source: &str) -> Result<Value, String> {
    let mut parser = LiteralParser {
        chars: source.chars().collect(),
        pos: 0,
    };
    let value = parser.value()?;
    parser.skip_whitespace();
    if parser.pos != parser.chars.len() {
        return Err(format!("trailing input at offset {}", parser.pos));
    }
    Ok(value)
}

struct LiteralParser {
    chars: Vec<char>,
    pos: usize,
}

impl LiteralParser {
    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn bump(&mut self) -> Option<char> {
        let ch = self.peek()?;
        self.pos += 1;
        Some(ch)
    }

    fn skip_whitespace(&mut self) {
        while self.peek().is_some_and(char::is_whitespace) {
            self.pos += 1;
        }
    }

    fn expect(&mut self, expected: char) -> Result<(), String> {
        self.skip_whitespace();
        match self.bump() {
            Some(ch) if ch == expected => Ok(()),
            other => Err(format!("expected '{expected}', found {other:?}")),
        }
    }

    fn value(&mut self) -> Result<Value, String> {
        self.skip_whitespace();
        match self.peek() {
            Some('{') => self.object(),
            Some('[') => self.sequence('[', ']'),
            Some('(') => self.sequence('(', ')'),
            Some('\'') | Some('"') => self.string().map(Value::String),
            Some(ch) if ch == '-' || ch == '+' || ch == '.' || ch.is_ascii_digit() => {
                self.number()
            }
            Some(ch) if ch.is_alphabetic() => self.keyword(),
            other => Err(format!("unexpected {other:?} at offset {}", self.pos)),
        }
    }

    fn object(&mut self) -> Result<Value, String> {
        self.expect('{')?;
        let mut map = Map::new();
        loop {
            self.skip_whitespace();
            if self.peek() == Some('}') {
                self.pos += 1;
                return Ok(Value::Object(map));
            }
            let key = match self.value()? {
                Value::String(key) => key,
                Value::Number(number) => number.to_string(),
                Value::Bool(flag) => flag.to_string(),
                other => return Err(format!("unsupported key {other}")),
            };
            self.expect(':')?;
            let value = self.value()?;
            map.insert(key, value);
            self.skip_whitespace();
            match self.bump() {
                Some(',') => continue,
                Some('}') => return Ok(Value::Object(map)),
                other => return Err(format!("expected ',' or '}}', found {other:?}")),
            }
        }
    }

    fn sequence(&mut self, open: char, close: char) -> Result<Value, String> {
        self.expect(open)?;
        let mut items = Vec::new();
        loop {
            self.skip_whitespace();
            if self.peek() == Some(close) {
                self.pos += 1;
                return Ok(Value::Array(items));
            }
            items.push(self.value()?);
            self.skip_whitespace();
            match self.bump() {
                Some(',') => continue,
                Some(ch) if ch == close => return Ok(Value::Array(items)),
                other => return Err(format!("expected ',' or '{close}', found {other:?}")),
            }
        }
    }

    fn string(&mut self) -> Result<String, String> {
        let quote = self.bump().ok_or("unterminated string")?;
        let mut out = String::new();
        loop {
            match self.bump().ok_or("unterminated string")? {
                ch if ch == quote => return Ok(out),
                '\\' => {
                    let escaped = self.bump().ok_or("dangling escape")?;
                    match escaped {
                        'n' => out.push('\n'),
                        't' => out.push('\t'),
                        'r' => out.push('\r'),
                        '0' => out.push('\0'),
                        'u' => out.push(self.unicode_escape()?),
                        other => out.push(other),
                    }
                }
                ch => out.push(ch),
            }
        }
    }

    fn unicode_escape(&mut self) -> Result<char, String> {
        let digits: String = (0..4)
            .map(|_| self.bump().ok_or("short unicode escape"))
            .collect::<Result<_, _>>()?;
        let code = u32::from_str_radix(&digits, 16).map_err(|err| err.to_string())?;
        char::from_u32(code).ok_or_else(|| format!("invalid code point {code:#x}"))
    }

    fn number(&mut self) -> Result<Value, String> {
        let start = self.pos;
        while self
            .peek()
            .is_some_and(|ch| ch.is_ascii_digit() || matches!(ch, '-' | '+' | '.' | 'e' | 'E' | '_'))
        {
            self.pos += 1;
        }
        let text: String = self.chars[start..self.pos]
            .iter()
            .filter(|ch| **ch != '_')
            .collect();
        let text = text.strip_prefix('+').unwrap_or(&text);
        if let Ok(integer) = text.parse::<i64>() {
            return Ok(Value::Number(integer.into()));
        }
        let float: f64 = text
            .parse()
            .map_err(|_| format!("invalid number '{text}'"))?;
        Number::from_f64(float)
            .map(Value::Number)
            .ok_or_else(|| format!("non-finite number '{text}'"))
    }

    fn keyword(&mut self) -> Result<Value, String> {
        let start = self.pos;
        while self.peek().is_some_and(|ch| ch.is_alphanumeric() || ch == '_') {
            self.pos += 1;
        }
        let word: String = self.chars[start..self.pos].iter().collect();
        match word.as_str() {
            "True" | "true" => Ok(Value::Bool(true)),
            "False" | "false" => Ok(Value::Bool(false)),
            "None" | "null" => Ok(Value::Null),
            other => Err(format!("unknown identifier '{other}'")),
        }
    }
}
