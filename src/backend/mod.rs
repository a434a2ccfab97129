//! Backend module - inference backend trait, HTTP client and loader

pub mod http_backend;
pub mod loader;
pub mod traits;

pub use loader::{ConfiguredLoader, ModelLoader};
pub use traits::{BackendVariant, InferenceBackend, ModelKey};
