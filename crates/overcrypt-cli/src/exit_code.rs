//! Process exit codes.
//!
//! Values follow `sysexits.h` where a matching category exists, so scripts can
//! tell a missing path from a bad configuration without parsing stderr.

pub const SUCCESS: u8 = 0;
pub const GENERAL_ERROR: u8 = 1;
/// Path missing in the overlay or on the local filesystem.
pub const NOT_FOUND: u8 = 66;
/// Content failed authentication, usually a wrong password or salt.
pub const AUTH_FAILED: u8 = 65;
pub const PERMISSION_DENIED: u8 = 77;
/// Configuration file missing required values or unparsable.
pub const CONFIG_INVALID: u8 = 78;
pub const CANCELLED: u8 = 130;
