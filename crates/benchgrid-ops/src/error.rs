//! Host operation error types.

use std::path::PathBuf;

use thiserror::Error;

use benchgrid_remote::RemoteError;

/// A host operation that ran but did not succeed, or whose channel failed.
#[derive(Debug, Error)]
pub enum OpError {
    #[error("{action} failed on {host}: {detail}")]
    Provision {
        host: String,
        action: &'static str,
        detail: String,
    },

    #[error("cannot start {action} on {host}: {detail}")]
    Startup {
        host: String,
        action: &'static str,
        detail: String,
    },

    #[error("local i/o error on {path}: {source}")]
    Local {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("remote channel error: {0}")]
    Remote(#[from] RemoteError),
}

impl OpError {
    pub fn host(&self) -> Option<&str> {
        match self {
            Self::Provision { host, .. } | Self::Startup { host, .. } => Some(host),
            _ => None,
        }
    }
}

pub type OpResult<T> = Result<T, OpError>;
