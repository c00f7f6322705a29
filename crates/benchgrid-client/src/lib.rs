//! benchgrid-client — runtime handle for one load-generating client.
//!
//! A [`ClientHandle`] is built once the controller and the disk servers are
//! up. Building it writes the client's per-run configuration files on its
//! host and reads the host's CPU layout. Block devices served by the storage
//! system are attached in a second step, after the host's network runtime
//! is started.

pub mod cpu;
pub mod error;
pub mod generated;
pub mod handle;

pub use cpu::CpuTopology;
pub use error::{ClientError, ClientResult};
pub use handle::ClientHandle;
