//! Parser for line protocol.
//!
//! Reads lines in the form produced by [`LineProtocolEncoder`] back into
//! their parts. Escapes understood: `\,` `\=` `\ ` `\"` `\\` plus `\n`,
//! `\t` and `\r` for the matching control characters.
//!
//! [`LineProtocolEncoder`]: crate::encoder::LineProtocolEncoder

use std::collections::BTreeMap;

use ordered_float::OrderedFloat;

use crate::error::{Error, Result};
use crate::value::FieldValue;

/// One parsed line.
#[derive(Clone, Debug, PartialEq)]
pub struct ParsedLine {
    /// Measurement name.
    pub measurement: String,
    /// Tags by key.
    pub tags: BTreeMap<String, String>,
    /// Fields by key.
    pub fields: BTreeMap<String, FieldValue>,
    /// Raw timestamp, in whatever precision the line was written with.
    pub timestamp: Option<i64>,
}

/// Section of the line being read.
#[derive(PartialEq)]
enum ParsingState {
    Measurement,
    Tags,
    Fields,
    Timestamp,
}

struct Cursor<'a> {
    chars: std::iter::Peekable<std::str::Chars<'a>>,
}

impl<'a> Cursor<'a> {
    fn new(line: &'a str) -> Self {
        Self {
            chars: line.chars().peekable(),
        }
    }

    /// Read an escaped token up to (not including) one of `stops`.
    /// Returns the token and the stop character, `None` at end of line.
    fn token(&mut self, stops: &[char]) -> Result<(String, Option<char>)> {
        let mut out = String::new();
        while let Some(c) = self.chars.next() {
            if c == '\\' {
                let escaped = self
                    .chars
                    .next()
                    .ok_or_else(|| Error::parse("line ends with a dangling backslash"))?;
                out.push(unescape(escaped));
            } else if stops.contains(&c) {
                return Ok((out, Some(c)));
            } else {
                out.push(c);
            }
        }
        Ok((out, None))
    }

    /// Read a quoted string field value; the opening quote is already consumed.
    fn quoted(&mut self) -> Result<String> {
        let mut out = String::new();
        loop {
            match self.chars.next() {
                Some('\\') => match self.chars.next() {
                    Some(c) => out.push(c),
                    None => return Err(Error::parse("unterminated string field")),
                },
                Some('"') => return Ok(out),
                Some(c) => out.push(c),
                None => return Err(Error::parse("unterminated string field")),
            }
        }
    }

    fn rest(&mut self) -> String {
        self.chars.by_ref().collect()
    }
}

fn unescape(c: char) -> char {
    match c {
        'n' => '\n',
        't' => '\t',
        'r' => '\r',
        other => other,
    }
}

/// Parse a single line of line protocol.
pub fn parse_line(line: &str) -> Result<ParsedLine> {
    let mut cursor = Cursor::new(line);
    let mut state = ParsingState::Measurement;
    let mut parsed = ParsedLine {
        measurement: String::new(),
        tags: BTreeMap::new(),
        fields: BTreeMap::new(),
        timestamp: None,
    };

    loop {
        match state {
            ParsingState::Measurement => {
                let (name, stop) = cursor.token(&[',', ' '])?;
                if name.is_empty() {
                    return Err(Error::parse(format!("missing measurement in '{line}'")));
                }
                parsed.measurement = name;
                state = match stop {
                    Some(',') => ParsingState::Tags,
                    Some(_) => ParsingState::Fields,
                    None => return Err(Error::parse(format!("missing fields in '{line}'"))),
                };
            }
            ParsingState::Tags => {
                let (key, stop) = cursor.token(&['=', ',', ' '])?;
                if stop != Some('=') {
                    return Err(Error::parse(format!("tag '{key}' has no value")));
                }
                let (value, stop) = cursor.token(&[',', ' '])?;
                parsed.tags.insert(key, value);
                match stop {
                    Some(',') => {}
                    Some(_) => state = ParsingState::Fields,
                    None => return Err(Error::parse(format!("missing fields in '{line}'"))),
                }
            }
            ParsingState::Fields => {
                let (key, stop) = cursor.token(&['=', ',', ' '])?;
                if stop != Some('=') {
                    return Err(Error::parse(format!("field '{key}' has no value")));
                }

                let (value, stop) = if cursor.chars.peek() == Some(&'"') {
                    cursor.chars.next();
                    let s = cursor.quoted()?;
                    let stop = cursor.chars.next();
                    (FieldValue::String(s), stop)
                } else {
                    let (raw, stop) = cursor.token(&[',', ' '])?;
                    (parse_scalar(&raw, &key)?, stop)
                };
                parsed.fields.insert(key, value);

                match stop {
                    Some(',') => {}
                    Some(' ') => state = ParsingState::Timestamp,
                    Some(other) => {
                        return Err(Error::parse(format!("unexpected '{other}' after field value")));
                    }
                    None => return Ok(parsed),
                }
            }
            ParsingState::Timestamp => {
                let raw = cursor.rest();
                let raw = raw.trim();
                if !raw.is_empty() {
                    let ts = raw
                        .parse::<i64>()
                        .map_err(|e| Error::parse(format!("invalid timestamp '{raw}': {e}")))?;
                    parsed.timestamp = Some(ts);
                }
                return Ok(parsed);
            }
        }
    }
}

/// Parse every non-empty, non-comment line of a request body.
pub fn parse_lines(body: &str) -> impl Iterator<Item = Result<ParsedLine>> + '_ {
    body.lines()
        .map(str::trim_end)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(parse_line)
}

/// Parse an unquoted field value.
fn parse_scalar(raw: &str, key: &str) -> Result<FieldValue> {
    match raw {
        "t" | "T" | "true" | "True" | "TRUE" => return Ok(FieldValue::Boolean(true)),
        "f" | "F" | "false" | "False" | "FALSE" => return Ok(FieldValue::Boolean(false)),
        _ => {}
    }

    if let Some(int) = raw.strip_suffix('i') {
        let v = int.parse::<i64>().map_err(|e| {
            Error::parse(format!("Invalid integer '{raw}' for field '{key}': {e}"))
        })?;
        return Ok(FieldValue::Integer(v));
    }

    if let Some(uint) = raw.strip_suffix('u') {
        let v = uint.parse::<u64>().map_err(|e| {
            Error::parse(format!("Invalid unsigned integer '{raw}' for field '{key}': {e}"))
        })?;
        return Ok(FieldValue::UInteger(v));
    }

    let v = raw
        .parse::<f64>()
        .map_err(|e| Error::parse(format!("Invalid float '{raw}' for field '{key}': {e}")))?;
    Ok(FieldValue::Float(OrderedFloat(v)))
}
