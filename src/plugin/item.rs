//! Item keys and export results.

use std::fmt;

use thiserror::Error;

/// Successful export payload.
#[derive(Debug, Clone, PartialEq)]
pub enum ItemValue {
    /// Free-form text.
    Text(String),
    /// Integer value.
    Integer(i64),
    /// Floating point value.
    Float(f64),
    /// UTF-8 JSON document, passed through verbatim.
    Json(String),
}

impl ItemValue {
    /// Whether the payload is a structured document.
    pub fn is_document(&self) -> bool {
        matches!(self, Self::Json(_))
    }
}

impl fmt::Display for ItemValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Text(s) | Self::Json(s) => f.write_str(s),
            Self::Integer(v) => write!(f, "{v}"),
            Self::Float(v) => write!(f, "{v}"),
        }
    }
}

impl From<&str> for ItemValue {
    fn from(s: &str) -> Self {
        Self::Text(s.to_string())
    }
}

impl From<String> for ItemValue {
    fn from(s: String) -> Self {
        Self::Text(s)
    }
}

impl From<i64> for ItemValue {
    fn from(v: i64) -> Self {
        Self::Integer(v)
    }
}

impl From<f64> for ItemValue {
    fn from(v: f64) -> Self {
        Self::Float(v)
    }
}

/// Errors produced while parsing an item key.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum KeyParseError {
    /// The key part is empty.
    #[error("item key is empty")]
    Empty,

    /// The key contains a character outside `[A-Za-z0-9._-]`.
    #[error("invalid character {ch:?} at position {pos}")]
    InvalidChar { ch: char, pos: usize },

    /// A quoted parameter is not terminated.
    #[error("unterminated quoted parameter")]
    UnterminatedQuote,

    /// Missing closing bracket or trailing data after it.
    #[error("malformed parameter list")]
    MalformedParams,
}

/// Parsed item key: `name[param1,"param 2",,param4]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ItemKey {
    /// Key name, e.g. `pgsql.db.discovery`.
    pub key: String,
    /// Positional parameters.
    pub params: Vec<String>,
}

impl ItemKey {
    /// Parse an item key with an optional bracketed parameter list.
    ///
    /// Parameters are comma separated. A parameter wrapped in double quotes may
    /// contain commas and brackets; `\"` inside quotes is an escaped quote.
    pub fn parse(input: &str) -> Result<Self, KeyParseError> {
        let input = input.trim();
        let (key, rest) = match input.find('[') {
            Some(idx) => (&input[..idx], Some(&input[idx + 1..])),
            None => (input, None),
        };

        if key.is_empty() {
            return Err(KeyParseError::Empty);
        }
        if let Some((pos, ch)) = key
            .char_indices()
            .find(|(_, c)| !(c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-')))
        {
            return Err(KeyParseError::InvalidChar { ch, pos });
        }

        let params = match rest {
            Some(rest) => parse_params(rest)?,
            None => Vec::new(),
        };

        Ok(Self {
            key: key.to_string(),
            params,
        })
    }
}

impl fmt::Display for ItemKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.key)?;
        if self.params.is_empty() {
            return Ok(());
        }
        f.write_str("[")?;
        for (i, p) in self.params.iter().enumerate() {
            if i > 0 {
                f.write_str(",")?;
            }
            if p.contains([',', '[', ']', '"']) || p.starts_with(' ') {
                write!(f, "\"{}\"", p.replace('"', "\\\""))?;
            } else {
                f.write_str(p)?;
            }
        }
        f.write_str("]")
    }
}

/// Parse the text following `[`, up to and including the closing `]`.
fn parse_params(rest: &str) -> Result<Vec<String>, KeyParseError> {
    let mut params = Vec::new();
    let mut current = String::new();
    let mut chars = rest.chars().peekable();

    loop {
        // Leading spaces before a parameter are insignificant.
        while chars.peek() == Some(&' ') {
            chars.next();
        }

        if chars.peek() == Some(&'"') {
            chars.next();
            loop {
                match chars.next() {
                    Some('\\') if chars.peek() == Some(&'"') => {
                        chars.next();
                        current.push('"');
                    }
                    Some('"') => break,
                    Some(c) => current.push(c),
                    None => return Err(KeyParseError::UnterminatedQuote),
                }
            }
            while chars.peek() == Some(&' ') {
                chars.next();
            }
            match chars.next() {
                Some(',') => params.push(std::mem::take(&mut current)),
                Some(']') => {
                    params.push(current);
                    break;
                }
                _ => return Err(KeyParseError::MalformedParams),
            }
        } else {
            loop {
                match chars.next() {
                    Some(',') => {
                        params.push(std::mem::take(&mut current));
                        break;
                    }
                    Some(']') => {
                        params.push(std::mem::take(&mut current));
                        return finish(chars.next().is_none(), params);
                    }
                    Some(c) => current.push(c),
                    None => return Err(KeyParseError::MalformedParams),
                }
            }
        }
    }

    finish(chars.next().is_none(), params)
}

fn finish(at_end: bool, params: Vec<String>) -> Result<Vec<String>, KeyParseError> {
    if at_end {
        Ok(params)
    } else {
        Err(KeyParseError::MalformedParams)
    }
}
