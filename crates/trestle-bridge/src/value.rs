//! Wire value model.
//!
//! Everything crossing the script/native boundary is a [`WireValue`]: a
//! tagged union of null, bool, number, string, array, and map. `serde_json`'s
//! value type is exactly that union, so it is used directly rather than
//! wrapped.

use crate::error::{BridgeError, BridgeResult};

/// A value carried over the wire between script engine and native code.
pub type WireValue = serde_json::Value;

/// Human-readable tag of a wire value, for error messages.
pub fn wire_kind(value: &WireValue) -> &'static str {
    match value {
        WireValue::Null => "null",
        WireValue::Bool(_) => "bool",
        WireValue::Number(_) => "number",
        WireValue::String(_) => "string",
        WireValue::Array(_) => "array",
        WireValue::Object(_) => "map",
    }
}

/// Borrow `value` as an array, or fail naming `what`.
pub fn expect_array<'a>(value: &'a WireValue, what: &'static str) -> BridgeResult<&'a Vec<WireValue>> {
    value.as_array().ok_or_else(|| {
        BridgeError::invalid_argument(what, format!("expected array, got {}", wire_kind(value)))
    })
}

/// Extract a wire id: a non-negative integer that fits `usize`.
///
/// Fractional numbers, negatives, strings, and anything else are rejected;
/// these are protocol addresses, not data.
pub fn index_as_usize(value: &WireValue, what: &'static str) -> BridgeResult<usize> {
    value
        .as_u64()
        .and_then(|n| usize::try_from(n).ok())
        .ok_or_else(|| {
            BridgeError::invalid_argument(
                what,
                format!("expected non-negative integer index, got {}", wire_kind(value)),
            )
        })
}
