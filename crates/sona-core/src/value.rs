use serde::{Deserialize, Serialize};

pub const UNDEFINED_TEXT: &str = "--undefined--";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Numeric(f64),
    Str(String),
    Matrix(Vec<Vec<f64>>),
}

impl Value {
    pub fn as_numeric(&self) -> Option<f64> {
        match self {
            Self::Numeric(value) => Some(*value),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Str(value) => Some(value.as_str()),
            _ => None,
        }
    }
}

pub fn undefined() -> f64 {
    f64::NAN
}

/// Non-finite results (overflow, division by zero, failed parses) all count
/// as the single "undefined" value of the script language.
pub fn is_undefined(value: f64) -> bool {
    !value.is_finite()
}

pub fn format_numeric(value: f64) -> String {
    if is_undefined(value) {
        return UNDEFINED_TEXT.to_string();
    }
    if value == value.trunc() && value.abs() < 1e15 {
        format!("{}", value as i64)
    } else {
        format!("{}", value)
    }
}

pub fn format_fixed(value: f64, precision: usize) -> String {
    if is_undefined(value) {
        return UNDEFINED_TEXT.to_string();
    }
    format!("{:.*}", precision, value)
}

pub fn format_percent(value: f64, precision: usize) -> String {
    if is_undefined(value) {
        return UNDEFINED_TEXT.to_string();
    }
    format!("{:.*}%", precision, value * 100.0)
}

/// Leading-prefix number parse: "3.14e-3" -> 0.00314, "15.6%" -> 0.156,
/// "3.14 (= pi)" -> 3.14, non-numeric text -> undefined.
pub fn parse_numeric(text: &str) -> f64 {
    let text = text.trim_start();
    if text.starts_with(UNDEFINED_TEXT) {
        return undefined();
    }
    let bytes = text.as_bytes();
    let mut i = 0usize;
    if i < bytes.len() && (bytes[i] == b'+' || bytes[i] == b'-') {
        i += 1;
    }
    let integer_start = i;
    while i < bytes.len() && bytes[i].is_ascii_digit() {
        i += 1;
    }
    let mut any_digits = i > integer_start;
    if i < bytes.len() && bytes[i] == b'.' {
        i += 1;
        let fraction_start = i;
        while i < bytes.len() && bytes[i].is_ascii_digit() {
            i += 1;
        }
        any_digits |= i > fraction_start;
    }
    if !any_digits {
        return undefined();
    }
    let mut end = i;
    if i < bytes.len() && (bytes[i] == b'e' || bytes[i] == b'E') {
        let mut j = i + 1;
        if j < bytes.len() && (bytes[j] == b'+' || bytes[j] == b'-') {
            j += 1;
        }
        let exponent_start = j;
        while j < bytes.len() && bytes[j].is_ascii_digit() {
            j += 1;
        }
        if j > exponent_start {
            end = j;
        }
    }
    let mut value: f64 = match text[..end].parse() {
        Ok(value) => value,
        Err(_) => return undefined(),
    };
    if end < bytes.len() && bytes[end] == b'%' {
        value /= 100.0;
    }
    value
}
