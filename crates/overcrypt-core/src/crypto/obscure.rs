//! Reversible obscuring of secrets stored in configuration.
//!
//! This is **not** encryption: the key is a public constant. It only keeps
//! passwords from sitting in configuration files as plain text. A value that
//! has been obscured carries [`OBFUSCATED_PREFIX`], which makes
//! [`obfuscate`] idempotent across repeated initialization.

use std::borrow::Cow;

use aes::Aes256;
use aes::cipher::{KeyIvInit, StreamCipher};
use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use rand::RngCore;

use super::CryptoError;

type Aes256Ctr = ctr::Ctr128BE<Aes256>;

/// Marker prepended to every stored secret that is already obscured.
pub const OBFUSCATED_PREFIX: &str = "___Obfuscated___";

const IV_SIZE: usize = 16;

const OBSCURE_KEY: [u8; 32] = [
    0x9c, 0x93, 0x5b, 0x48, 0x73, 0x0a, 0x55, 0x4d, 0x6b, 0xfd, 0x7c, 0x63, 0xc8, 0x86, 0xa9, 0x2b,
    0xd3, 0x90, 0x19, 0x8e, 0xb8, 0x12, 0x8a, 0xfb, 0xf4, 0xde, 0x16, 0x2b, 0x8b, 0x95, 0xf6, 0x38,
];

/// Obscure `plain` with a random IV. Output is URL-safe base64 of `iv || ciphertext`.
pub fn obscure(plain: &str) -> String {
    let mut iv = [0u8; IV_SIZE];
    rand::rng().fill_bytes(&mut iv);

    let mut buf = Vec::with_capacity(IV_SIZE + plain.len());
    buf.extend_from_slice(&iv);
    buf.extend_from_slice(plain.as_bytes());

    let mut cipher = Aes256Ctr::new(&OBSCURE_KEY.into(), &iv.into());
    cipher.apply_keystream(&mut buf[IV_SIZE..]);

    URL_SAFE_NO_PAD.encode(buf)
}

/// Reverse [`obscure`].
pub fn reveal(obscured: &str) -> Result<String, CryptoError> {
    let mut buf = URL_SAFE_NO_PAD
        .decode(obscured.as_bytes())
        .map_err(|e| CryptoError::InvalidObscuredSecret { reason: e.to_string() })?;

    if buf.len() < IV_SIZE {
        return Err(CryptoError::InvalidObscuredSecret {
            reason: format!("expected at least {IV_SIZE} bytes, got {}", buf.len()),
        });
    }

    let (iv, ciphertext) = buf.split_at_mut(IV_SIZE);
    let iv: [u8; IV_SIZE] = (&*iv).try_into().map_err(|_| CryptoError::InvalidObscuredSecret {
        reason: "truncated IV".to_string(),
    })?;
    let mut cipher = Aes256Ctr::new(&OBSCURE_KEY.into(), &iv.into());
    cipher.apply_keystream(ciphertext);

    String::from_utf8(ciphertext.to_vec())
        .map_err(|e| CryptoError::InvalidObscuredSecret { reason: e.to_string() })
}

/// Whether `value` already carries the obscured marker.
pub fn is_obfuscated(value: &str) -> bool {
    value.starts_with(OBFUSCATED_PREFIX)
}

/// Tag and obscure `value` unless it is already tagged.
///
/// Returns `Cow::Borrowed` when nothing changed, so callers can tell whether the
/// configuration needs to be persisted again.
pub fn obfuscate(value: &str) -> Cow<'_, str> {
    if is_obfuscated(value) {
        Cow::Borrowed(value)
    } else {
        Cow::Owned(format!("{OBFUSCATED_PREFIX}{}", obscure(value)))
    }
}

/// Recover the plain secret from a stored value.
///
/// Untagged values are returned as-is: they have not been persisted in
/// obscured form yet.
pub fn deobfuscate(value: &str) -> Result<String, CryptoError> {
    match value.strip_prefix(OBFUSCATED_PREFIX) {
        Some(obscured) => reveal(obscured),
        None => Ok(value.to_string()),
    }
}
