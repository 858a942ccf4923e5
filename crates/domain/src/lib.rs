//! Shared types for the StateCanvas dialog manager.
//!
//! Everything the other crates agree on lives here: the scenario data
//! model, the NLU envelope, the per-session snapshot (memory + frame
//! stack), the outbound response record, configuration, and the shared
//! error type.

pub mod config;
pub mod error;
pub mod nlu;
pub mod response;
pub mod scenario;
pub mod session;
pub mod trace;

pub use error::{Error, Result};
