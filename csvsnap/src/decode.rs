//! Turn fetched bytes into text, resolving the character encoding.
//!
//! We try, in order:
//!
//! 1. UTF-8 with a byte-order mark, which we strip.
//! 2. Strict UTF-8.
//! 3. Latin-1, which maps every byte to the code point with the same value
//!    and therefore never fails.
//!
//! All attempts run against the same buffer, so falling back never costs a
//! second download.

use std::{fmt, str};

use crate::common::*;

/// The UTF-8 byte-order mark.
const UTF8_BOM: &[u8] = b"\xEF\xBB\xBF";

/// How strict to be about encodings.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct DecodePolicy {
    /// Fall back to Latin-1 when the input isn't valid UTF-8.
    pub legacy_fallback: bool,
}

impl Default for DecodePolicy {
    fn default() -> Self {
        DecodePolicy {
            legacy_fallback: true,
        }
    }
}

/// The encoding we resolved for a payload.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum TextEncoding {
    Utf8,
    Utf8Bom,
    Latin1,
}

impl fmt::Display for TextEncoding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TextEncoding::Utf8 => "utf-8".fmt(f),
            TextEncoding::Utf8Bom => "utf-8-bom".fmt(f),
            TextEncoding::Latin1 => "latin-1".fmt(f),
        }
    }
}

/// Decoded text, plus the encoding it was decoded from.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct DecodedText {
    pub text: String,
    pub encoding: TextEncoding,
}

/// Decode `raw` according to `policy`.
pub fn decode(raw: &[u8], policy: DecodePolicy) -> Result<DecodedText, DecodeError> {
    if let Some(rest) = raw.strip_prefix(UTF8_BOM) {
        match str::from_utf8(rest) {
            Ok(text) => {
                return Ok(DecodedText {
                    text: text.to_owned(),
                    encoding: TextEncoding::Utf8Bom,
                })
            }
            // Still drop the marker, but report offsets relative to the whole
            // payload.
            Err(err) => {
                return legacy_fallback(
                    rest,
                    UTF8_BOM.len() + err.valid_up_to(),
                    policy,
                )
            }
        }
    }
    match str::from_utf8(raw) {
        Ok(text) => Ok(DecodedText {
            text: text.to_owned(),
            encoding: TextEncoding::Utf8,
        }),
        Err(err) => legacy_fallback(raw, err.valid_up_to(), policy),
    }
}

/// Decode `raw` as Latin-1 if `policy` allows it. `valid_up_to` is only used
/// for reporting.
fn legacy_fallback(
    raw: &[u8],
    valid_up_to: usize,
    policy: DecodePolicy,
) -> Result<DecodedText, DecodeError> {
    if !policy.legacy_fallback {
        return Err(DecodeError { valid_up_to });
    }
    warn!(
        "source is not valid UTF-8 (first bad byte at offset {}), decoding as Latin-1",
        valid_up_to,
    );
    Ok(DecodedText {
        text: latin1_to_string(raw),
        encoding: TextEncoding::Latin1,
    })
}

/// Latin-1 is the first 256 Unicode code points, so each byte maps straight
/// across.
fn latin1_to_string(raw: &[u8]) -> String {
    raw.iter().map(|&b| char::from(b)).collect()
}
