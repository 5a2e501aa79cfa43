//! Text encodings for encrypted name bytes.
//!
//! - `base64`: URL-safe alphabet, no padding
//! - `base32`: lower-case base32hex, no padding (case-insensitive on decode)
//! - `base32768`: 15 bits per code point, for backends that count name length
//!   in characters rather than bytes

use std::fmt;
use std::str::FromStr;

use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use data_encoding::BASE32HEX_NOPAD;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// 15-bit groups map to `U+4E00 + value`, a contiguous run of assigned scalars.
const BLOCK_15_START: u32 = 0x4E00;
/// A trailing group of at most 7 bits maps to `U+0180 + value`.
const BLOCK_7_START: u32 = 0x0180;

/// Encoding applied to encrypted name bytes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase", try_from = "String")]
pub enum NameEncoding {
    #[default]
    Base64,
    Base32,
    Base32768,
}

/// Encoded name text that does not decode under the configured encoding.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("invalid {encoding} text: {reason}")]
pub struct DecodeError {
    pub encoding: NameEncoding,
    pub reason: String,
}

impl NameEncoding {
    pub fn as_str(self) -> &'static str {
        match self {
            NameEncoding::Base64 => "base64",
            NameEncoding::Base32 => "base32",
            NameEncoding::Base32768 => "base32768",
        }
    }

    pub fn encode(self, data: &[u8]) -> String {
        match self {
            NameEncoding::Base64 => URL_SAFE_NO_PAD.encode(data),
            NameEncoding::Base32 => BASE32HEX_NOPAD.encode(data).to_ascii_lowercase(),
            NameEncoding::Base32768 => encode_base32768(data),
        }
    }

    pub fn decode(self, text: &str) -> Result<Vec<u8>, DecodeError> {
        let error = |reason: String| DecodeError { encoding: self, reason };
        match self {
            NameEncoding::Base64 => URL_SAFE_NO_PAD
                .decode(text.as_bytes())
                .map_err(|e| error(e.to_string())),
            NameEncoding::Base32 => BASE32HEX_NOPAD
                .decode(text.to_ascii_uppercase().as_bytes())
                .map_err(|e| error(e.to_string())),
            NameEncoding::Base32768 => decode_base32768(text).map_err(error),
        }
    }
}

impl fmt::Display for NameEncoding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for NameEncoding {
    type Err = String;

    /// An empty value selects the default (`base64`).
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "" | "base64" => Ok(NameEncoding::Base64),
            "base32" => Ok(NameEncoding::Base32),
            "base32768" => Ok(NameEncoding::Base32768),
            other => Err(format!("unknown name encoding '{other}' (expected base64, base32 or base32768)")),
        }
    }
}

impl TryFrom<String> for NameEncoding {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

fn push_scalar(out: &mut String, code_point: u32) {
    // Both blocks are well clear of the surrogate range.
    if let Some(c) = char::from_u32(code_point) {
        out.push(c);
    }
}

fn encode_base32768(data: &[u8]) -> String {
    let mut out = String::with_capacity(data.len() * 3 / 2 + 3);
    let mut acc: u32 = 0;
    let mut bits: u32 = 0;

    for &byte in data {
        acc = (acc << 8) | u32::from(byte);
        bits += 8;
        while bits >= 15 {
            bits -= 15;
            push_scalar(&mut out, BLOCK_15_START + ((acc >> bits) & 0x7FFF));
        }
        acc &= (1 << bits) - 1;
    }

    // Pad the last group with 1 bits.
    if bits > 0 {
        if bits <= 7 {
            let pad = 7 - bits;
            push_scalar(&mut out, BLOCK_7_START + ((acc << pad) | ((1 << pad) - 1)));
        } else {
            let pad = 15 - bits;
            push_scalar(&mut out, BLOCK_15_START + ((acc << pad) | ((1 << pad) - 1)));
        }
    }

    out
}

fn decode_base32768(text: &str) -> Result<Vec<u8>, String> {
    let mut out = Vec::with_capacity(text.len());
    let mut acc: u32 = 0;
    let mut bits: u32 = 0;
    let mut chars = text.chars().peekable();

    while let Some(c) = chars.next() {
        let cp = u32::from(c);
        let (value, width) = if (BLOCK_15_START..BLOCK_15_START + 0x8000).contains(&cp) {
            (cp - BLOCK_15_START, 15)
        } else if (BLOCK_7_START..BLOCK_7_START + 0x80).contains(&cp) {
            if chars.peek().is_some() {
                return Err(format!("7-bit character {c:?} before end of input"));
            }
            (cp - BLOCK_7_START, 7)
        } else {
            return Err(format!("character {c:?} outside the alphabet"));
        };

        acc = (acc << width) | value;
        bits += width;
        while bits >= 8 {
            bits -= 8;
            out.push(((acc >> bits) & 0xFF) as u8);
        }
        acc &= (1 << bits) - 1;
    }

    if acc != (1 << bits) - 1 {
        return Err("non-canonical padding bits".to_string());
    }
    Ok(out)
}
