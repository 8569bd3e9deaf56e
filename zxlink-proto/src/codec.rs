//! Line-command request encoding and JSON response decoding.
//!
//! A request is `"{command} {param}..."` with URL-encoded parameters,
//! terminated by `\r`. The reply is free text holding one JSON value,
//! possibly preceded by a status preamble.

use std::fmt::Write as _;

use serde_json::Value;

/// A line-command parameter.
#[derive(Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum Param {
    /// A single value.
    Text(String),
    /// Several values, joined with `+` before encoding.
    List(Vec<String>),
}

impl From<&str> for Param {
    fn from(s: &str) -> Self {
        Self::Text(s.to_owned())
    }
}

impl From<String> for Param {
    fn from(s: String) -> Self {
        Self::Text(s)
    }
}

impl From<Vec<String>> for Param {
    fn from(v: Vec<String>) -> Self {
        Self::List(v)
    }
}

impl From<bool> for Param {
    fn from(b: bool) -> Self {
        Self::Text(b.to_string())
    }
}

impl From<i64> for Param {
    fn from(n: i64) -> Self {
        Self::Text(n.to_string())
    }
}

/// Errors decoding a line-command response.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum ResponseError {
    /// The reply holds neither `{` nor `[`.
    #[error("serial command response missing")]
    Missing,

    /// The JSON after the first bracket did not parse.
    #[error("invalid JSON response")]
    Parse(#[from] serde_json::Error),

    /// The decoded payload carries an `error` member.
    #[error("serial command error: {message}")]
    Device {
        /// The device-reported error value.
        message: String,
    },
}

/// URL-encodes a parameter the way `encodeURIComponent` does.
///
/// Unreserved characters pass through; every other UTF-8 byte becomes
/// `%XX` with uppercase hex digits.
pub fn encode_param(param: &Param) -> String {
    let joined;
    let text = match param {
        Param::Text(t) => t.as_str(),
        Param::List(items) => {
            joined = items.join("+");
            joined.as_str()
        }
    };
    let mut out = String::with_capacity(text.len());
    for &b in text.as_bytes() {
        if b.is_ascii_alphanumeric() || b"-_.!~*'()".contains(&b) {
            out.push(char::from(b));
        } else {
            let _ = write!(out, "%{b:02X}");
        }
    }
    out
}

/// Builds the full request line, including the trailing `\r`.
pub fn encode_request(command: &str, params: &[Param]) -> String {
    let encoded: Vec<String> = params.iter().map(encode_param).collect();
    let line = format!("{command} {}", encoded.join(" "));
    format!("{}\r", line.trim_end())
}

/// Decodes the JSON value starting at the first `{` or `[` of `response`.
///
/// Anything after the first complete value is ignored.
pub fn decode_response(response: &[u8]) -> Result<Value, ResponseError> {
    let start = response
        .iter()
        .position(|b| matches!(b, b'{' | b'['))
        .ok_or(ResponseError::Missing)?;

    let value = serde_json::Deserializer::from_slice(&response[start..])
        .into_iter::<Value>()
        .next()
        .ok_or(ResponseError::Missing)??;

    if let Some(error) = value.get("error").filter(|e| is_truthy(e)) {
        let message = error
            .as_str()
            .map_or_else(|| error.to_string(), str::to_owned);
        return Err(ResponseError::Device { message });
    }
    Ok(value)
}

/// JavaScript truthiness of a JSON value.
fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}
