//! The `/plan` workflow: a persistent state machine coordinating an explorer
//! subagent, a persistent planning agent, and interactive Q&A refinement.

pub mod format;
pub mod questions;
pub mod state;
pub mod workflow;

pub use format::*;
pub use questions::*;
pub use state::*;
pub use workflow::*;
