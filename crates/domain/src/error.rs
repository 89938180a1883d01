/// Shared error type used across all Switchboard crates.
///
/// The variants mirror the runtime's error vocabulary: deadline and
/// cancellation outcomes terminate a run, tool-level failures are folded back
/// into the conversation, and lifecycle preconditions surface as
/// `NotRunning`/`NotReady`.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("IO: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("HTTP: {0}")]
    Http(String),

    /// A run- or tool-level deadline fired.
    #[error("timeout")]
    Timeout,

    /// An explicit cancel was issued while a run was in flight.
    #[error("cancelled")]
    Cancelled,

    /// The dispatcher could not resolve a tool name.
    #[error("tool not found: {0}")]
    ToolNotFound(String),

    /// The provider rejected a request before streaming began.
    #[error("api error (HTTP {status}): {body}")]
    ApiError { status: u16, body: String },

    /// A sub-task panicked or otherwise died unexpectedly.
    #[error("crashed: {0}")]
    Crashed(String),

    /// The session worker terminated while a caller was waiting on it.
    #[error("session worker died")]
    WorkerDied,

    /// A lifecycle precondition failed (e.g. browser not started).
    #[error("not running: {0}")]
    NotRunning(String),

    #[error("not ready: {0}")]
    NotReady(String),

    /// The credential provider could not serve a required secret.
    #[error("missing credential: {0}")]
    MissingCredential(String),

    /// Schedule / tool-argument parsing failed.
    #[error("parse error ({kind}): {message}")]
    Parse { kind: String, message: String },

    /// The persistence layer failed; the current run is aborted.
    #[error("persistence: {0}")]
    Persistence(String),

    #[error("config: {0}")]
    Config(String),

    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Convenience constructor for parse failures.
    pub fn parse(kind: impl Into<String>, message: impl std::fmt::Display) -> Self {
        Self::Parse {
            kind: kind.into(),
            message: message.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_carries_taxonomy_labels() {
        assert_eq!(Error::Timeout.to_string(), "timeout");
        assert_eq!(Error::Cancelled.to_string(), "cancelled");
        assert_eq!(
            Error::ToolNotFound("calc".into()).to_string(),
            "tool not found: calc"
        );
        assert_eq!(
            Error::ApiError {
                status: 429,
                body: "overloaded".into()
            }
            .to_string(),
            "api error (HTTP 429): overloaded"
        );
    }

    #[test]
    fn parse_constructor() {
        let e = Error::parse("schedule", "expected 5 fields");
        assert_eq!(e.to_string(), "parse error (schedule): expected 5 fields");
    }
}
