//! Shared domain types for the Switchboard runtime.
//!
//! Everything here is provider-, transport-, and storage-agnostic: the error
//! taxonomy, the internal message/tool-call model, streaming events, and the
//! configuration tree.

pub mod config;
pub mod error;
pub mod message;
pub mod stream;

pub use error::{Error, Result};
