//! Session persistence: session rows, append-only message logs, and the
//! session-key scheme that routes inbound traffic to workers.

pub mod log;
pub mod session_key;
pub mod store;

pub use log::{MessageLog, MessageRecord};
pub use store::{SessionEntry, SessionState, SessionStore};
