#![forbid(unsafe_code)]

use generic_array::{GenericArray, typenum::U64};
use secrecy::{ExposeSecret, SecretBox};
use tracing::{debug, instrument};
use zeroize::Zeroizing;

use super::CryptoError;

/// Default scrypt cost (N = 2^14), block size 8, parallelization 1.
pub const DEFAULT_SCRYPT_COST_PARAM_LOG2: u8 = 14;
const SCRYPT_BLOCK_SIZE: u32 = 8;
const SCRYPT_PARALLELIZATION: u32 = 1;

/// Length of the derived key material: content key (32) followed by the name key (64).
pub const DERIVED_KEY_LEN: usize = 96;

/// Salt mixed into key derivation when the configuration leaves it empty.
pub const DEFAULT_SALT: [u8; 16] = [
    0xA8, 0x0D, 0xF4, 0x3A, 0x8F, 0xBD, 0x03, 0x08, 0xA7, 0xCA, 0xB8, 0x3E, 0x58, 0x1F, 0x86, 0xB1,
];

/// Key material shared by every name and content operation of one overlay.
///
/// Holds a 256-bit content master key (wraps per-file content keys in the file
/// header) and a 512-bit AES-SIV key for deterministic name encryption. Both
/// live in [`SecretBox`] containers and are zeroed on drop.
///
/// Access goes through scoped methods (`with_content_key`, `with_siv_key`) so the
/// raw bytes never escape into long-lived bindings.
pub struct CipherKeys {
    content_key: SecretBox<[u8; 32]>,
    name_key: SecretBox<[u8; 64]>,
}

impl std::fmt::Debug for CipherKeys {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CipherKeys").finish_non_exhaustive()
    }
}

impl CipherKeys {
    /// Derive keys from a password and optional salt with the default scrypt cost.
    pub fn derive(password: &str, salt: &str) -> Result<Self, CryptoError> {
        Self::derive_with_cost(password, salt, DEFAULT_SCRYPT_COST_PARAM_LOG2)
    }

    /// Derive keys with an explicit scrypt cost (`N = 2^log2_n`).
    ///
    /// An empty `salt` falls back to [`DEFAULT_SALT`]. Low costs are only meant
    /// for tests.
    #[instrument(level = "debug", skip(password, salt), fields(log2_n = log2_n, default_salt = salt.is_empty()))]
    pub fn derive_with_cost(password: &str, salt: &str, log2_n: u8) -> Result<Self, CryptoError> {
        if password.is_empty() {
            return Err(CryptoError::EmptyPassword);
        }

        let params = scrypt::Params::new(log2_n, SCRYPT_BLOCK_SIZE, SCRYPT_PARALLELIZATION, DERIVED_KEY_LEN)
            .map_err(|e| {
                CryptoError::InvalidScryptParams(format!(
                    "N=2^{log2_n}, r={SCRYPT_BLOCK_SIZE}, p={SCRYPT_PARALLELIZATION}: {e}"
                ))
            })?;

        let salt_bytes: &[u8] = if salt.is_empty() { &DEFAULT_SALT } else { salt.as_bytes() };

        let mut derived = Zeroizing::new([0u8; DERIVED_KEY_LEN]);
        scrypt::scrypt(password.as_bytes(), salt_bytes, &params, &mut derived[..])
            .map_err(|e| CryptoError::KeyDerivationFailed(format!("Scrypt derivation failed: {e}")))?;

        debug!("Cipher keys derived");
        Ok(Self::from_bytes(&derived))
    }

    /// Build keys from raw material laid out as `content_key || name_key`.
    pub fn from_bytes(material: &[u8; DERIVED_KEY_LEN]) -> Self {
        let mut content_key = Box::new([0u8; 32]);
        let mut name_key = Box::new([0u8; 64]);
        content_key.copy_from_slice(&material[..32]);
        name_key.copy_from_slice(&material[32..]);

        Self {
            content_key: SecretBox::new(content_key),
            name_key: SecretBox::new(name_key),
        }
    }

    /// Run `f` with the content master key.
    pub fn with_content_key<F, R>(&self, f: F) -> R
    where
        F: FnOnce(&[u8; 32]) -> R,
    {
        f(self.content_key.expose_secret())
    }

    /// Run `f` with the 512-bit AES-SIV name key.
    pub fn with_siv_key<F, R>(&self, f: F) -> R
    where
        F: FnOnce(&GenericArray<u8, U64>) -> R,
    {
        f(GenericArray::from_slice(self.name_key.expose_secret()))
    }

    /// Sum of the name key bytes; seeds the rotation of obfuscated names.
    pub(crate) fn name_key_sum(&self) -> u32 {
        self.name_key.expose_secret().iter().map(|&b| u32::from(b)).sum()
    }
}
