//! Codec operations applied before and after a value is mutated
//!
//! Operations are pure string transforms. A chain applies its operations in
//! order to a running value; an operation that fails leaves the value as it
//! was and the chain carries on with the next one.

use crate::error::{MutatorError, MutatorResult};
use base64::engine::general_purpose::{GeneralPurpose, GeneralPurposeConfig, STANDARD};
use base64::engine::DecodePaddingMode;
use base64::{alphabet, Engine};
use serde::{Deserialize, Serialize};
use std::fmt::Write;
use tracing::debug;
use url::form_urlencoded;

/// Standard alphabet; `=` padding is optional on input
const BASE64_LENIENT: GeneralPurpose = GeneralPurpose::new(
    &alphabet::STANDARD,
    GeneralPurposeConfig::new().with_decode_padding_mode(DecodePaddingMode::Indifferent),
);

/// A single string transform
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CodecOp {
    NoOp,
    UrlDecode,
    UrlEncode,
    Base64Decode,
    Base64Encode,
    UnicodeDecode,
    UnicodeEncode,
    Uppercase,
    Lowercase,
}

impl CodecOp {
    /// Every operation, in display order
    pub const ALL: [CodecOp; 9] = [
        CodecOp::NoOp,
        CodecOp::UrlDecode,
        CodecOp::UrlEncode,
        CodecOp::Base64Decode,
        CodecOp::Base64Encode,
        CodecOp::UnicodeDecode,
        CodecOp::UnicodeEncode,
        CodecOp::Uppercase,
        CodecOp::Lowercase,
    ];

    /// Apply this operation to a value
    pub fn apply(self, value: &str) -> MutatorResult<String> {
        match self {
            CodecOp::NoOp => Ok(value.to_string()),
            CodecOp::UrlDecode => url_decode(value).map_err(|reason| MutatorError::codec(self, reason)),
            CodecOp::UrlEncode => Ok(form_urlencoded::byte_serialize(value.as_bytes()).collect()),
            CodecOp::Base64Decode => BASE64_LENIENT
                .decode(value.as_bytes())
                .map(|bytes| String::from_utf8_lossy(&bytes).into_owned())
                .map_err(|e| MutatorError::codec(self, e.to_string())),
            CodecOp::Base64Encode => Ok(STANDARD.encode(value.as_bytes())),
            CodecOp::UnicodeDecode => Ok(unicode_decode(value)),
            CodecOp::UnicodeEncode => Ok(unicode_encode(value)),
            CodecOp::Uppercase => Ok(value.to_uppercase()),
            CodecOp::Lowercase => Ok(value.to_lowercase()),
        }
    }

    /// Whether this operation reverses an encoding
    pub fn is_decode(self) -> bool {
        matches!(
            self,
            CodecOp::UrlDecode | CodecOp::Base64Decode | CodecOp::UnicodeDecode
        )
    }

    /// Whether this operation applies an encoding
    pub fn is_encode(self) -> bool {
        matches!(
            self,
            CodecOp::UrlEncode | CodecOp::Base64Encode | CodecOp::UnicodeEncode
        )
    }
}

/// Ordered application of codec operations
pub struct CodecChain;

impl CodecChain {
    /// Apply a decode chain to a value.
    ///
    /// Encode operations are accepted in a decode chain but do nothing, and
    /// the other way round for [`CodecChain::apply_encode_chain`].
    pub fn apply_decode_chain(value: &str, ops: &[CodecOp]) -> String {
        Self::apply_decode_with(value, ops, |_, _| {})
    }

    /// Apply an encode chain to a value
    pub fn apply_encode_chain(value: &str, ops: &[CodecOp]) -> String {
        Self::apply_encode_with(value, ops, |_, _| {})
    }

    pub fn apply_decode_with<F>(value: &str, ops: &[CodecOp], on_error: F) -> String
    where
        F: FnMut(CodecOp, &MutatorError),
    {
        Self::run(value, ops, CodecOp::is_encode, on_error)
    }

    pub fn apply_encode_with<F>(value: &str, ops: &[CodecOp], on_error: F) -> String
    where
        F: FnMut(CodecOp, &MutatorError),
    {
        Self::run(value, ops, CodecOp::is_decode, on_error)
    }

    /// Apply `ops` in order, skipping those for which `skip` holds and
    /// reporting each failed step to `on_error`. A failed step keeps the
    /// running value unchanged.
    fn run<F>(value: &str, ops: &[CodecOp], skip: fn(CodecOp) -> bool, mut on_error: F) -> String
    where
        F: FnMut(CodecOp, &MutatorError),
    {
        let mut current = value.to_string();
        for &op in ops {
            if skip(op) {
                debug!("Codec step {:?} ignored in this chain", op);
                continue;
            }
            match op.apply(&current) {
                Ok(next) => current = next,
                Err(e) => {
                    debug!("Codec step {:?} skipped: {}", op, e);
                    on_error(op, &e);
                }
            }
        }
        current
    }
}

/// Form-style percent decoding: `+` becomes a space, `%XX` a byte.
/// Incomplete or non-hex escapes are an error.
fn url_decode(value: &str) -> Result<String, String> {
    let bytes = value.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;

    while i < bytes.len() {
        match bytes[i] {
            b'+' => {
                out.push(b' ');
                i += 1;
            }
            b'%' => {
                let hi = bytes.get(i + 1).copied().and_then(hex_value);
                let lo = bytes.get(i + 2).copied().and_then(hex_value);
                match (hi, lo) {
                    (Some(hi), Some(lo)) => {
                        out.push(hi << 4 | lo);
                        i += 3;
                    }
                    _ => return Err(format!("malformed escape at offset {}", i)),
                }
            }
            b => {
                out.push(b);
                i += 1;
            }
        }
    }

    Ok(String::from_utf8_lossy(&out).into_owned())
}

fn hex_value(b: u8) -> Option<u8> {
    match b {
        b'0'..=b'9' => Some(b - b'0'),
        b'a'..=b'f' => Some(b - b'a' + 10),
        b'A'..=b'F' => Some(b - b'A' + 10),
        _ => None,
    }
}

/// Rewrite `\uXXXX` escapes (and surrogate pairs of them) to characters.
/// Anything that does not form a valid character is copied through.
fn unicode_decode(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    let mut rest = value;

    while let Some(pos) = rest.find("\\u") {
        out.push_str(&rest[..pos]);
        let tail = &rest[pos..];
        match decode_escape(tail) {
            Some((ch, consumed)) => {
                out.push(ch);
                rest = &tail[consumed..];
            }
            None => {
                out.push('\\');
                rest = &tail[1..];
            }
        }
    }

    out.push_str(rest);
    out
}

fn parse_utf16_unit(escape: &str) -> Option<u16> {
    if !escape.starts_with("\\u") {
        return None;
    }
    let hex = escape.get(2..6)?;
    if !hex.bytes().all(|b| b.is_ascii_hexdigit()) {
        return None;
    }
    u16::from_str_radix(hex, 16).ok()
}

fn decode_escape(escape: &str) -> Option<(char, usize)> {
    let unit = parse_utf16_unit(escape)?;

    if (0xD800..0xDC00).contains(&unit) {
        let low = escape.get(6..).and_then(parse_utf16_unit)?;
        if !(0xDC00..0xE000).contains(&low) {
            return None;
        }
        let code = 0x10000 + ((u32::from(unit) - 0xD800) << 10) + (u32::from(low) - 0xDC00);
        return char::from_u32(code).map(|ch| (ch, 12));
    }

    char::from_u32(u32::from(unit)).map(|ch| (ch, 6))
}

/// Escape every character outside the digit, upper-case and
/// lower-case-through-tilde ranges as `\uXXXX` (UTF-16 units, lower-case hex).
fn unicode_encode(value: &str) -> String {
    let mut out = String::with_capacity(value.len() * 6);
    let mut units = [0u16; 2];

    for ch in value.chars() {
        if keeps_literal(ch) {
            out.push(ch);
            continue;
        }
        for unit in ch.encode_utf16(&mut units) {
            // Writing into a String cannot fail
            let _ = write!(out, "\\u{:04x}", unit);
        }
    }

    out
}

fn keeps_literal(ch: char) -> bool {
    matches!(ch, '0'..='9' | 'A'..='Z' | 'a'..='~')
}
