//! Testing utilities and mock implementations
//!
//! Mocks for the pipeline's external collaborators so the workflow can be
//! tested without an LLM API, the network or a Redis server.

pub mod mocks;

pub use mocks::*;
