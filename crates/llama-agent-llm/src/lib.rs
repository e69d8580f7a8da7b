//! Chat data model and the completion-backend contract for llama-agent.
//!
//! The inference engine itself lives behind [`CompletionBackend`]; this crate
//! only defines the message shapes the agent loop exchanges with it.

pub mod backend;
pub mod server;
pub mod types;

pub use backend::*;
pub use server::*;
pub use types::*;
