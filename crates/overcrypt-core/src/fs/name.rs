use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use aes_siv::{KeyInit, siv::Aes256Siv};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::crypto::keys::CipherKeys;

use super::encoding::NameEncoding;

/// Separator between the checksum prefix and the rotated text of an
/// obfuscated name. Not `.`, so that extension splitting stays unambiguous.
const OBFUSCATE_SEPARATOR: char = '_';
const OBFUSCATE_QUOTE: char = '!';

/// How path segments are turned into backend names.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NameEncryptionMode {
    /// Names are stored as-is.
    #[default]
    Off,
    /// AES-SIV, then text-encoded.
    Standard,
    /// Keyed character rotation. Hides names from casual inspection only.
    Obfuscate,
}

impl NameEncryptionMode {
    pub fn as_str(self) -> &'static str {
        match self {
            NameEncryptionMode::Off => "off",
            NameEncryptionMode::Standard => "standard",
            NameEncryptionMode::Obfuscate => "obfuscate",
        }
    }
}

impl fmt::Display for NameEncryptionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for NameEncryptionMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "off" => Ok(NameEncryptionMode::Off),
            "standard" => Ok(NameEncryptionMode::Standard),
            "obfuscate" => Ok(NameEncryptionMode::Obfuscate),
            other => Err(format!("unknown filename encryption '{other}' (expected off, standard or obfuscate)")),
        }
    }
}

/// Context for filename operations, providing debugging information.
#[derive(Debug, Clone, Default)]
pub struct NameContext {
    /// The encrypted name (if available)
    pub encrypted_name: Option<String>,
    /// The cleartext name (if available, e.g., during encryption)
    pub cleartext_name: Option<String>,
    /// The name encryption mode in effect
    pub mode: Option<NameEncryptionMode>,
}

impl NameContext {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_encrypted_name(mut self, name: impl Into<String>) -> Self {
        self.encrypted_name = Some(name.into());
        self
    }

    #[must_use]
    pub fn with_cleartext_name(mut self, name: impl Into<String>) -> Self {
        self.cleartext_name = Some(name.into());
        self
    }

    #[must_use]
    pub fn with_mode(mut self, mode: NameEncryptionMode) -> Self {
        self.mode = Some(mode);
        self
    }
}

impl fmt::Display for NameContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut parts = Vec::new();

        if let Some(ref name) = self.cleartext_name {
            parts.push(format!("name '{name}'"));
        } else if let Some(ref enc_name) = self.encrypted_name {
            // Truncate long encrypted names for readability
            let display_name = if enc_name.chars().count() > 40 {
                format!("{}...", enc_name.chars().take(37).collect::<String>())
            } else {
                enc_name.clone()
            };
            parts.push(format!("encrypted name '{display_name}'"));
        }

        if let Some(mode) = self.mode {
            parts.push(format!("({mode} mode)"));
        }

        if parts.is_empty() {
            write!(f, "(no context)")
        } else {
            write!(f, "{}", parts.join(" "))
        }
    }
}

/// Errors that can occur during name encryption/decryption.
///
/// Decryption failures are expected for foreign or corrupt backend entries and
/// are handled by the overlay (listings drop the entry, lookups fall back to
/// the raw name).
#[derive(Error, Debug)]
pub enum NameError {
    /// **[INTEGRITY VIOLATION]** AES-SIV authentication failed: the name was
    /// not produced with this key, or it was altered.
    #[error("[INTEGRITY VIOLATION] Failed to decrypt {context}: authentication failed")]
    DecryptionFailed { context: NameContext },

    /// The encrypted text does not decode under the configured encoding.
    #[error("Invalid {encoding} encoding for {context}: {reason}")]
    Decode {
        encoding: NameEncoding,
        reason: String,
        context: NameContext,
    },

    /// UTF-8 decoding failed after decryption.
    #[error("Invalid UTF-8 after decryption for {context}: {reason}")]
    Utf8Decode { reason: String, context: NameContext },

    /// The text is not a well-formed obfuscated name.
    #[error("Failed to deobfuscate {context}: {reason}")]
    Deobfuscate { reason: String, context: NameContext },

    /// **[PROGRAMMING ERROR]** AES-SIV encryption should not fail with valid inputs.
    #[error("Unexpected encryption failure for {context}")]
    EncryptionFailed { context: NameContext },
}

impl NameError {
    /// Add or update context on an existing error
    #[must_use]
    pub fn with_context(self, new_context: NameContext) -> Self {
        match self {
            NameError::DecryptionFailed { .. } => NameError::DecryptionFailed { context: new_context },
            NameError::Decode { encoding, reason, .. } => NameError::Decode {
                encoding,
                reason,
                context: new_context,
            },
            NameError::Utf8Decode { reason, .. } => NameError::Utf8Decode { reason, context: new_context },
            NameError::Deobfuscate { reason, .. } => NameError::Deobfuscate { reason, context: new_context },
            NameError::EncryptionFailed { .. } => NameError::EncryptionFailed { context: new_context },
        }
    }
}

/// Split a segment at its last `.`: `("archive.tar", ".gz")`.
///
/// A leading dot counts, so `.hidden` is all extension and has an empty base.
pub fn split_extension(name: &str) -> (&str, &str) {
    match name.rfind('.') {
        Some(idx) => name.split_at(idx),
        None => (name, ""),
    }
}

/// Segment-level name cipher. Knows nothing about extensions or paths.
#[derive(Debug, Clone)]
pub struct NameCipher {
    keys: Arc<CipherKeys>,
    mode: NameEncryptionMode,
    encoding: NameEncoding,
}

impl NameCipher {
    pub fn new(keys: Arc<CipherKeys>, mode: NameEncryptionMode, encoding: NameEncoding) -> Self {
        Self { keys, mode, encoding }
    }

    pub fn mode(&self) -> NameEncryptionMode {
        self.mode
    }

    pub fn encoding(&self) -> NameEncoding {
        self.encoding
    }

    /// Deterministically encrypt one segment. The empty segment maps to itself.
    pub fn encrypt_segment(&self, segment: &str) -> Result<String, NameError> {
        if segment.is_empty() {
            return Ok(String::new());
        }
        match self.mode {
            NameEncryptionMode::Off => Ok(segment.to_string()),
            NameEncryptionMode::Standard => self.encrypt_standard(segment),
            NameEncryptionMode::Obfuscate => Ok(obfuscate_segment(segment, self.keys.name_key_sum())),
        }
    }

    /// Inverse of [`encrypt_segment`](Self::encrypt_segment).
    pub fn decrypt_segment(&self, segment: &str) -> Result<String, NameError> {
        if segment.is_empty() {
            return Ok(String::new());
        }
        match self.mode {
            NameEncryptionMode::Off => Ok(segment.to_string()),
            NameEncryptionMode::Standard => self.decrypt_standard(segment),
            NameEncryptionMode::Obfuscate => deobfuscate_segment(segment, self.keys.name_key_sum())
                .map_err(|reason| NameError::Deobfuscate {
                    reason,
                    context: NameContext::new()
                        .with_encrypted_name(segment)
                        .with_mode(self.mode),
                }),
        }
    }

    fn encrypt_standard(&self, segment: &str) -> Result<String, NameError> {
        let encrypted = self.keys.with_siv_key(|key| {
            let mut cipher = Aes256Siv::new(key);
            let associated_data: &[&[u8]] = &[];
            cipher.encrypt(associated_data, segment.as_bytes())
        });

        let encrypted = encrypted.map_err(|_| NameError::EncryptionFailed {
            context: NameContext::new()
                .with_cleartext_name(segment)
                .with_mode(self.mode),
        })?;
        Ok(self.encoding.encode(&encrypted))
    }

    fn decrypt_standard(&self, segment: &str) -> Result<String, NameError> {
        let context = NameContext::new()
            .with_encrypted_name(segment)
            .with_mode(self.mode);

        let decoded = self.encoding.decode(segment).map_err(|e| NameError::Decode {
            encoding: e.encoding,
            reason: e.reason,
            context: context.clone(),
        })?;

        let decrypted = self
            .keys
            .with_siv_key(|key| {
                let mut cipher = Aes256Siv::new(key);
                let associated_data: &[&[u8]] = &[];
                cipher.decrypt(associated_data, &decoded)
            })
            .map_err(|_| NameError::DecryptionFailed { context: context.clone() })?;

        String::from_utf8(decrypted).map_err(|e| NameError::Utf8Decode {
            reason: e.to_string(),
            context,
        })
    }
}

// ============================================================================
// Obfuscation
// ============================================================================

const LETTERS: u32 = 52;

fn letter_position(c: char) -> Option<u32> {
    match c {
        'A'..='Z' => Some(u32::from(c) - u32::from('A')),
        'a'..='z' => Some(u32::from(c) - u32::from('a') + 26),
        _ => None,
    }
}

fn letter_at(pos: u32) -> char {
    let cp = if pos < 26 { u32::from('A') + pos } else { u32::from('a') + pos - 26 };
    char::from_u32(cp).unwrap_or('?')
}

fn checksum(text: &str) -> u32 {
    text.chars().map(u32::from).fold(0, |acc, cp| (acc + cp) % 256)
}

/// `<checksum>_<rotated>`: each character is rotated within its class by an
/// amount derived from the checksum and the name key.
fn obfuscate_segment(plain: &str, key_sum: u32) -> String {
    let prefix = checksum(plain);
    let dir = prefix + key_sum;

    let mut out = format!("{prefix}{OBFUSCATE_SEPARATOR}");
    for c in plain.chars() {
        let cp = u32::from(c);
        if c == OBFUSCATE_QUOTE {
            out.push(OBFUSCATE_QUOTE);
            out.push(OBFUSCATE_QUOTE);
        } else if c.is_ascii_digit() {
            let shift = dir % 9 + 1;
            out.push(char::from_digit((cp - u32::from('0') + shift) % 10, 10).unwrap_or(c));
        } else if let Some(pos) = letter_position(c) {
            let shift = dir % 25 + 1;
            out.push(letter_at((pos + shift) % LETTERS));
        } else if (0xA0..0x100).contains(&cp) {
            let shift = dir % 95 + 1;
            push_or_quote(&mut out, c, 0xA0 + (cp - 0xA0 + shift) % 96);
        } else if cp >= 0x100 {
            let shift = dir % 127 + 1;
            let base = cp - cp % 256;
            push_or_quote(&mut out, c, base + (cp - base + shift) % 256);
        } else {
            out.push(c);
        }
    }
    out
}

fn push_or_quote(out: &mut String, original: char, rotated: u32) {
    match char::from_u32(rotated) {
        Some(r) => out.push(r),
        None => {
            out.push(OBFUSCATE_QUOTE);
            out.push(original);
        }
    }
}

fn deobfuscate_segment(text: &str, key_sum: u32) -> Result<String, String> {
    let (prefix, rotated) = text
        .split_once(OBFUSCATE_SEPARATOR)
        .ok_or_else(|| "missing checksum separator".to_string())?;
    if prefix.is_empty() || !prefix.bytes().all(|b| b.is_ascii_digit()) {
        return Err(format!("invalid checksum prefix '{prefix}'"));
    }
    let expected: u32 = prefix
        .parse()
        .map_err(|_| format!("invalid checksum prefix '{prefix}'"))?;
    let dir = expected + key_sum;

    let mut out = String::with_capacity(rotated.len());
    let mut quoted = false;
    for c in rotated.chars() {
        let cp = u32::from(c);
        if quoted {
            out.push(c);
            quoted = false;
        } else if c == OBFUSCATE_QUOTE {
            quoted = true;
        } else if c.is_ascii_digit() {
            let shift = dir % 9 + 1;
            out.push(char::from_digit((cp - u32::from('0') + 10 - shift) % 10, 10).unwrap_or(c));
        } else if let Some(pos) = letter_position(c) {
            let shift = dir % 25 + 1;
            out.push(letter_at((pos + LETTERS - shift) % LETTERS));
        } else if (0xA0..0x100).contains(&cp) {
            let shift = dir % 95 + 1;
            let original = 0xA0 + (cp - 0xA0 + 96 - shift) % 96;
            out.push(char::from_u32(original).ok_or_else(|| format!("invalid character {c:?}"))?);
        } else if cp >= 0x100 {
            let shift = dir % 127 + 1;
            let base = cp - cp % 256;
            let original = base + (cp - base + 256 - shift) % 256;
            out.push(char::from_u32(original).ok_or_else(|| format!("invalid character {c:?}"))?);
        } else {
            out.push(c);
        }
    }

    if quoted {
        return Err("dangling quote character".to_string());
    }
    if checksum(&out) != expected {
        return Err("checksum mismatch".to_string());
    }
    Ok(out)
}
