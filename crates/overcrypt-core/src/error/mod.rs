//! Error types for the overlay crate
//!
//! Re-exports every public error type and the context structures used in
//! error messages.

pub use crate::crypto::CryptoError;
pub use crate::fs::encoding::DecodeError;
pub use crate::fs::header::HeaderError;
pub use crate::fs::name::{NameContext, NameError};
pub use crate::fs::size::SizeError;
pub use crate::fs::streaming::{StreamingContext, StreamingError};
pub use crate::overlay::backend::BackendError;
pub use crate::overlay::config::ConfigError;
pub use crate::overlay::operations::{OverlayContext, OverlayError};
