//! Integers the management API carries as decimal strings

use crate::error::MapError;

/// Parse a base-10 integer from a remote string value
pub fn parse_decimal(field: &str, raw: &str) -> Result<i64, MapError> {
    raw.parse::<i64>().map_err(|e| {
        MapError::malformed(field, raw, format!("not a base-10 integer: {}", e))
    })
}

/// Decimal string form for the wire
pub fn format_decimal(value: i64) -> String {
    value.to_string()
}

/// Strict boolean from a remote `"true"`/`"false"` string
pub fn parse_bool(field: &str, raw: &str) -> Result<bool, MapError> {
    match raw {
        "true" => Ok(true),
        "false" => Ok(false),
        _ => Err(MapError::malformed(field, raw, "expected \"true\" or \"false\"")),
    }
}
