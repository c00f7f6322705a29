//! benchgrid-ops — lifecycle operations on the hosts of a campaign.
//!
//! Every operation is one or more commands over the campaign's
//! [`ConnectionPool`](benchgrid_remote::ConnectionPool). A command that
//! exits non-zero becomes an [`OpError`] naming the host, the action and
//! whatever the command printed.
//!
//! # Components
//!
//! - **`host`** — [`HostOps`], directories, iokerneld, machine setup, teardown
//! - **`repo`** — repository clone, pull and build
//! - **`services`** — controller, disk servers, disk preconditioning, block devices
//! - **`output`** — trace gathering and output retrieval

pub mod error;
pub mod host;
pub mod output;
pub mod repo;
pub mod services;

pub use error::{OpError, OpResult};
pub use host::HostOps;
pub use output::OUTPUT_ARCHIVE;
pub use repo::RepoOptions;
