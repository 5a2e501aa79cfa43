//! Key material and secret handling for the overlay cipher

pub mod keys;
pub mod obscure;

use thiserror::Error;

/// Errors that can occur while preparing key material or revealing secrets.
///
/// # Security Classification
///
/// None of these indicate tampering with stored data. They are either **user
/// errors** (empty or mangled configuration values) or **programming errors**
/// (invalid key derivation parameters).
#[derive(Error, Debug)]
pub enum CryptoError {
    // =========================================================================
    // USER ERRORS - Missing or malformed configuration values
    // =========================================================================
    /// No password was supplied.
    #[error("Password must not be empty")]
    EmptyPassword,

    /// Key derivation failed, typically due to scrypt computation error.
    #[error("Key derivation failed: {0}")]
    KeyDerivationFailed(String),

    /// An obscured secret could not be decoded.
    ///
    /// **[USER ERROR]** The stored value carries the obscured marker but the
    /// remainder is not valid obscured text, usually because it was edited by hand.
    #[error("Invalid obscured secret: {reason}")]
    InvalidObscuredSecret { reason: String },

    // =========================================================================
    // PROGRAMMING ERRORS - Invalid parameters or implementation bugs
    // =========================================================================
    /// Invalid scrypt parameters.
    #[error("Invalid scrypt parameters: {0}")]
    InvalidScryptParams(String),
}
