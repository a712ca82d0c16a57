//! Request, result and envelope types exchanged over the workflow endpoint

pub mod messages;

pub use messages::*;
