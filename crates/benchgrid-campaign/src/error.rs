//! Campaign error types.

use std::path::PathBuf;

use thiserror::Error;

use bench_core::TopologyError;
use benchgrid_client::ClientError;
use benchgrid_ops::OpError;
use benchgrid_remote::RemoteError;

use crate::phase::CampaignPhase;

#[derive(Debug, Error)]
pub enum CampaignError {
    #[error("invalid campaign configuration: {0}")]
    Config(#[from] TopologyError),

    #[error(transparent)]
    Remote(#[from] RemoteError),

    #[error(transparent)]
    Op(#[from] OpError),

    #[error(transparent)]
    Client(#[from] ClientError),

    #[error("{category}: {found} disks reported peak IOPS, expected {expected}")]
    Validation {
        category: String,
        expected: usize,
        found: usize,
    },

    #[error("workload {workload} failed on {host}: {reason}")]
    Workload {
        workload: String,
        host: String,
        reason: String,
    },

    #[error("no workload named {0}")]
    UnknownWorkload(String),

    #[error("cannot move from phase {from} to {to}")]
    Phase {
        from: CampaignPhase,
        to: CampaignPhase,
    },

    #[error("i/o error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed {path} line {line}: {reason}")]
    Parse {
        path: PathBuf,
        line: usize,
        reason: String,
    },

    #[error("task for {host} did not complete: {reason}")]
    Join { host: String, reason: String },
}

impl CampaignError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

pub type CampaignResult<T> = Result<T, CampaignError>;
