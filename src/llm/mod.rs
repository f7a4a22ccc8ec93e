//! Model endpoint access
//!
//! Streaming chat completions against OpenAI-compatible services, frame
//! decoding for their event streams, reasoning extraction, and the model
//! status service that reports which services are deployed.

pub mod provider;
pub mod types;
pub mod openai;
pub mod errors;
pub mod sse;
pub mod status;
pub mod thought;

pub use provider::*;
pub use types::*;
pub use errors::*;
pub use thought::extract_thought;
