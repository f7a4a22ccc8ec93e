//! Credential handling

mod credentials;

pub use credentials::*;
