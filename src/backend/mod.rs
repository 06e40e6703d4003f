pub mod client;
pub mod listings;
pub mod media;
pub mod posts;

pub use client::{BackendError, CredentialSource, HttpBackend, StaticCredential};
