//! Interpretation of parameter value text.

use crate::error::{DtsError, Result};

/// How a `dtparam` value maps onto a boolean. An absent or empty value means
/// "enable".
pub fn boolean_value(value: Option<&str>) -> Result<bool> {
    let value = match value {
        None => return Ok(true),
        Some(s) if s.is_empty() => return Ok(true),
        Some(s) => s,
    };
    match value {
        "y" | "yes" | "on" | "true" | "okay" => Ok(true),
        "n" | "no" | "off" | "false" | "disabled" => Ok(false),
        other => parse_int(other)
            .map(|n| n != 0)
            .ok_or_else(|| DtsError::BadBoolean(other.to_string())),
    }
}

/// An interpreted integer-override value: either a number masked to the
/// target width, or a label reference passed through verbatim.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IntValue {
    Num(u64),
    Ref(String),
}

/// How a `dtparam` value maps onto an integer of `width` bytes. The GPIO
/// pull synonyms (`none`/`down`/`up`) are folded in here; `&label` is only
/// meaningful in a 32-bit cell.
pub fn integer_value(value: &str, width: usize) -> Result<IntValue> {
    match value {
        "y" | "yes" | "on" | "true" | "down" => return Ok(IntValue::Num(1)),
        "n" | "no" | "off" | "false" | "none" => return Ok(IntValue::Num(0)),
        "up" => return Ok(IntValue::Num(2)),
        _ => {}
    }
    if let Some(label) = value.strip_prefix('&') {
        if width == 4 {
            return Ok(IntValue::Ref(label.to_string()));
        }
        return Err(DtsError::BadInteger(value.to_string()));
    }
    let n = parse_int(value).ok_or_else(|| DtsError::BadInteger(value.to_string()))?;
    Ok(IntValue::Num(n & width_mask(width)))
}

pub(crate) fn width_mask(width: usize) -> u64 {
    if width >= 8 {
        u64::MAX
    } else {
        (1u64 << (8 * width)) - 1
    }
}

/// True for a literal zero in any base, the "no target node" marker in
/// override declarations.
pub(crate) fn is_zero(text: &str) -> bool {
    let digits = text
        .strip_prefix("0x")
        .or_else(|| text.strip_prefix("0X"))
        .unwrap_or(text);
    !digits.is_empty() && digits.bytes().all(|b| b == b'0')
}

/// Parse a possibly negative, possibly parenthesized, decimal or hex
/// integer. Negative values wrap to the unsigned representation and are
/// masked to the target width by the caller.
fn parse_int(text: &str) -> Option<u64> {
    let text = text.trim();
    let text = text
        .strip_prefix('(')
        .and_then(|t| t.strip_suffix(')'))
        .map(str::trim)
        .unwrap_or(text);
    let (negative, text) = match text.strip_prefix('-') {
        Some(t) => (true, t.trim()),
        None => (false, text),
    };
    let n = if let Some(hex) = text.strip_prefix("0x").or_else(|| text.strip_prefix("0X")) {
        u64::from_str_radix(hex, 16).ok()?
    } else {
        text.parse::<u64>().ok()?
    };
    Some(if negative { n.wrapping_neg() } else { n })
}
