//! Hex text encoding for key material and payloads.
//!
//! The module takes keys as uppercase hex and payloads as lowercase hex,
//! two characters per byte with no separators. Downlink payloads come back
//! as hex text in either case.

/// Encode bytes as uppercase hex (EUIs, keys, addresses).
pub fn to_hex_upper(bytes: &[u8]) -> String {
    hex::encode_upper(bytes)
}

/// Encode bytes as lowercase hex (uplink payloads).
pub fn to_hex_lower(bytes: &[u8]) -> String {
    hex::encode(bytes)
}

/// Decode hex text in either case.
///
/// Returns `None` for odd-length input or non-hex characters.
pub fn from_hex(text: &str) -> Option<Vec<u8>> {
    hex::decode(text).ok()
}
