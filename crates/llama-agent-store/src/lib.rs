//! On-disk persistence for llama-agent: conversations, compaction archives,
//! and plan files, all written atomically under a single data directory.
//!
//! Layout per context:
//!
//! ```text
//! <base>/contexts/<uuid>/conversation.json
//! <base>/contexts/<uuid>/conversation_<YYYYMMDD_HHMMSS>.json
//! <base>/contexts/<uuid>/compact_<YYYYMMDD_HHMMSS>.json
//! <base>/contexts/<uuid>/plan.md
//! <base>/contexts/<uuid>/plan_state.json
//! ```

pub mod store;
pub mod types;

pub use store::*;
pub use types::*;
