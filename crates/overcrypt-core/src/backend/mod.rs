//! Concrete backends.

pub mod local;
#[cfg(any(test, feature = "testing"))]
pub mod memory;

pub use local::LocalBackend;
#[cfg(any(test, feature = "testing"))]
pub use memory::{LinkMode, MemoryBackend, MemoryUrlOpener, UploadRecord};
