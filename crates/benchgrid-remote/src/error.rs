//! Channel-level errors.

use std::time::Duration;

use thiserror::Error;

pub type RemoteResult<T> = Result<T, RemoteError>;

/// Failures of the channel itself. A command that runs and exits non-zero
/// is not an error at this layer.
#[derive(Debug, Error)]
pub enum RemoteError {
    #[error("cannot connect to {host}: {reason}")]
    Connect { host: String, reason: String },

    #[error("connection not found: {0}")]
    NotConnected(String),

    #[error("failed to spawn `{command}`: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("i/o error on {host}: {source}")]
    Io {
        host: String,
        #[source]
        source: std::io::Error,
    },

    #[error("command on {host} did not finish within {timeout:?}: {command}")]
    Timeout {
        host: String,
        command: String,
        timeout: Duration,
    },

    #[error("cannot fetch {remote_path} from {host}: {reason}")]
    Fetch {
        host: String,
        remote_path: String,
        reason: String,
    },

    #[error("command task failed: {0}")]
    Join(String),
}
