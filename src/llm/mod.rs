//! LLM provider abstraction layer
//!
//! Provider-agnostic completion interface used by the content agents.

pub mod provider;
pub mod providers;

pub use provider::*;
pub use providers::*;
