//! Typed sensor values and the raw-payload decoder.
//!
//! Every payload arriving from the bus is a string. [`decode`] classifies it
//! into a boolean, a float rounded to one decimal place, or plain text, in
//! that order. Decoding is total: any input produces some typed value.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;

/// Kind tag for a decoded value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ValueKind {
    Boolean,
    Float,
    Text,
}

impl ValueKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ValueKind::Boolean => "BOOLEAN",
            ValueKind::Float => "FLOAT",
            ValueKind::Text => "TEXT",
        }
    }

    /// Parse a stored kind tag.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "BOOLEAN" => Some(ValueKind::Boolean),
            "FLOAT" => Some(ValueKind::Float),
            "TEXT" => Some(ValueKind::Text),
            _ => None,
        }
    }
}

impl fmt::Display for ValueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A decoded sensor value.
///
/// `Float` payloads are always pre-rounded to one decimal place by the
/// decoder, so derived equality compares the rounded values and never sees
/// NaN (non-finite parses decode as `Text`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TypedValue {
    Bool(bool),
    Float(f64),
    Text(String),
}

impl TypedValue {
    pub fn kind(&self) -> ValueKind {
        match self {
            TypedValue::Bool(_) => ValueKind::Boolean,
            TypedValue::Float(_) => ValueKind::Float,
            TypedValue::Text(_) => ValueKind::Text,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            TypedValue::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            TypedValue::Float(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            TypedValue::Text(s) => Some(s.as_str()),
            _ => None,
        }
    }
}

impl fmt::Display for TypedValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TypedValue::Bool(b) => write!(f, "{}", b),
            TypedValue::Float(n) => {
                if n.fract() == 0.0 && n.abs() < 1e15 {
                    write!(f, "{}", *n as i64)
                } else {
                    write!(f, "{}", n)
                }
            },
            TypedValue::Text(s) => f.write_str(s),
        }
    }
}

/// Decode a raw payload into a typed value.
///
/// Classification order: `"true"`/`"1"` and `"false"`/`"0"` (trimmed,
/// case-insensitive) become booleans; anything parsing as a finite number
/// becomes a float rounded to one decimal place, half away from zero;
/// everything else is text carrying the original payload.
pub fn decode(raw: &str) -> TypedValue {
    let trimmed = raw.trim();
    if trimmed.eq_ignore_ascii_case("true") || trimmed == "1" {
        return TypedValue::Bool(true);
    }
    if trimmed.eq_ignore_ascii_case("false") || trimmed == "0" {
        return TypedValue::Bool(false);
    }
    if let Ok(n) = trimmed.parse::<f64>() {
        if n.is_finite() {
            return TypedValue::Float(round_one_decimal(trimmed, n));
        }
    }
    TypedValue::Text(raw.to_string())
}

/// Sentinel payloads that never become readings.
///
/// Some device firmwares publish `"null"` or `"-1"` for "no measurement";
/// channels configured with those sentinels drop the payload before a
/// reading exists. The default policy rejects nothing.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DecodePolicy {
    #[serde(default)]
    reject: HashSet<String>,
}

impl DecodePolicy {
    /// Build a policy from sentinel strings (trimmed, lowercased on entry).
    pub fn rejecting<I, S>(sentinels: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            reject: sentinels
                .into_iter()
                .map(|s| s.as_ref().trim().to_ascii_lowercase())
                .collect(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.reject.is_empty()
    }

    pub fn is_rejected(&self, raw: &str) -> bool {
        !self.reject.is_empty() && self.reject.contains(&raw.trim().to_ascii_lowercase())
    }
}

/// Decode under a sentinel policy; `None` means the payload is dropped.
pub fn decode_with_policy(raw: &str, policy: &DecodePolicy) -> Option<TypedValue> {
    if policy.is_rejected(raw) {
        None
    } else {
        Some(decode(raw))
    }
}

/// Round a parsed number to one decimal place, half away from zero.
///
/// Works on the decimal text when the payload is a plain decimal literal:
/// the nearest f64 to "23.45" sits just below the half, so scaling and
/// rounding the binary value would give 23.4. Exponent and other forms fall
/// back to scaled rounding, where a tenth of an ulp no longer matters.
fn round_one_decimal(trimmed: &str, n: f64) -> f64 {
    round_decimal_text(trimmed).unwrap_or_else(|| (n * 10.0).round() / 10.0)
}

fn round_decimal_text(s: &str) -> Option<f64> {
    let (sign, digits) = match s.strip_prefix('-') {
        Some(rest) => (-1.0, rest),
        None => (1.0, s.strip_prefix('+').unwrap_or(s)),
    };
    let (int_part, frac_part) = match digits.split_once('.') {
        Some((i, f)) => (i, f),
        None => (digits, ""),
    };
    if int_part.is_empty() && frac_part.is_empty() {
        return None;
    }
    if !int_part.bytes().all(|b| b.is_ascii_digit())
        || !frac_part.bytes().all(|b| b.is_ascii_digit())
    {
        return None;
    }

    let int_val: f64 = if int_part.is_empty() {
        0.0
    } else {
        int_part.parse().ok()?
    };
    let mut frac = frac_part.bytes();
    let tenths = frac.next().map_or(0, |b| b - b'0') as f64;
    // Half away from zero: the remainder is >= 0.05 exactly when its first
    // digit is >= 5.
    let round_up = frac.next().is_some_and(|b| b >= b'5');
    let tenths = tenths + if round_up { 1.0 } else { 0.0 };
    Some(sign * (int_val + tenths / 10.0))
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;

    #[test]
    fn test_decode_booleans() {
        assert_eq!(decode("true"), TypedValue::Bool(true));
        assert_eq!(decode("TRUE"), TypedValue::Bool(true));
        assert_eq!(decode("1"), TypedValue::Bool(true));
        assert_eq!(decode("false"), TypedValue::Bool(false));
        assert_eq!(decode("False"), TypedValue::Bool(false));
        assert_eq!(decode("0"), TypedValue::Bool(false));
        assert_eq!(decode(" true "), TypedValue::Bool(true));
    }

    #[test]
    fn test_decode_floats_round_to_one_decimal() {
        assert_eq!(decode("31"), TypedValue::Float(31.0));
        assert_eq!(decode("23.45"), TypedValue::Float(23.5));
        assert_eq!(decode("23.44"), TypedValue::Float(23.4));
        assert_eq!(decode("23.449"), TypedValue::Float(23.4));
        assert_eq!(decode("-23.45"), TypedValue::Float(-23.5));
        assert_eq!(decode("0.05"), TypedValue::Float(0.1));
        assert_eq!(decode("-0.05"), TypedValue::Float(-0.1));
        assert_eq!(decode("1.95"), TypedValue::Float(2.0));
        assert_eq!(decode("2.5"), TypedValue::Float(2.5));
    }

    #[test]
    fn test_decode_exponent_form() {
        assert_eq!(decode("1.23e2"), TypedValue::Float(123.0));
        assert_eq!(decode("5e-1"), TypedValue::Float(0.5));
    }

    #[test]
    fn test_decode_text_fallback() {
        assert_eq!(decode("hello"), TypedValue::Text("hello".to_string()));
        assert_eq!(decode(""), TypedValue::Text(String::new()));
        assert_eq!(decode("12abc"), TypedValue::Text("12abc".to_string()));
        // Non-finite parses stay text
        assert_eq!(decode("NaN"), TypedValue::Text("NaN".to_string()));
        assert_eq!(decode("inf"), TypedValue::Text("inf".to_string()));
    }

    #[test]
    fn test_decode_exact_one_keeps_bool_priority() {
        // "1" is boolean by the classification order, but "1.0" is a float
        assert_eq!(decode("1"), TypedValue::Bool(true));
        assert_eq!(decode("1.0"), TypedValue::Float(1.0));
        assert_eq!(decode("0.0"), TypedValue::Float(0.0));
    }

    #[test]
    fn test_decode_policy() {
        let policy = DecodePolicy::rejecting(["null", "-1"]);
        assert_eq!(decode_with_policy("null", &policy), None);
        assert_eq!(decode_with_policy("NULL", &policy), None);
        assert_eq!(decode_with_policy(" -1 ", &policy), None);
        assert_eq!(
            decode_with_policy("31", &policy),
            Some(TypedValue::Float(31.0))
        );

        let empty = DecodePolicy::default();
        assert_eq!(
            decode_with_policy("null", &empty),
            Some(TypedValue::Text("null".to_string()))
        );
    }

    #[test]
    fn test_display_trims_integral_floats() {
        assert_eq!(TypedValue::Float(31.0).to_string(), "31");
        assert_eq!(TypedValue::Float(23.5).to_string(), "23.5");
        assert_eq!(TypedValue::Bool(true).to_string(), "true");
        assert_eq!(TypedValue::Text("on".to_string()).to_string(), "on");
    }

    #[test]
    fn test_value_serde_untagged() {
        let v: TypedValue = serde_json::from_value(serde_json::json!(23.5)).unwrap();
        assert_eq!(v, TypedValue::Float(23.5));
        let v: TypedValue = serde_json::from_value(serde_json::json!(true)).unwrap();
        assert_eq!(v, TypedValue::Bool(true));
        let v: TypedValue = serde_json::from_value(serde_json::json!("x")).unwrap();
        assert_eq!(v, TypedValue::Text("x".to_string()));
    }

    #[test]
    fn test_kind_tags() {
        assert_eq!(ValueKind::Boolean.as_str(), "BOOLEAN");
        assert_eq!(ValueKind::parse("FLOAT"), Some(ValueKind::Float));
        assert_eq!(ValueKind::parse("float"), None);
    }
}
