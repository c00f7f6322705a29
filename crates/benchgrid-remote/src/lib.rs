//! benchgrid-remote — uniform command execution on the local and remote hosts.
//!
//! Commands are plain shell lines ([`CommandLine`]). They run either on the
//! orchestrating host ([`run_local`]) or on a fleet host through a
//! [`ConnectionPool`], which caches one authenticated channel per hostname
//! and serializes the commands issued over it.
//!
//! Non-zero exits are never errors at this layer: callers receive a
//! [`CommandOutput`] and decide. [`RemoteError`] is reserved for channel
//! failures (cannot connect, unknown host, cannot spawn, timeout).
//!
//! # Components
//!
//! - **`transport`** — the [`Transport`] seam between the pool and the wire
//! - **`ssh`** — [`SshTransport`], driving the system `ssh`/`scp` over a
//!   control master per host
//! - **`pool`** — [`ConnectionPool`] with sync, async and background modes
//! - **`responder`** — answers interactive prompts found in command output
//! - **`mock`** — [`ScriptedTransport`], an in-memory transport for tests
//!   (behind the `test-util` feature)

pub mod command;
pub mod error;
pub mod local;
#[cfg(any(test, feature = "test-util"))]
pub mod mock;
pub mod pool;
mod process;
pub mod responder;
pub mod ssh;
pub mod transport;

pub use command::{CommandLine, CommandOutput};
pub use error::{RemoteError, RemoteResult};
pub use local::run_local;
#[cfg(any(test, feature = "test-util"))]
pub use mock::{RecordedCommand, ScriptedTransport};
pub use pool::{BackgroundProcess, ConnectionPool, ExecMode, PendingCommand, RemoteResponse};
pub use process::ManagedChild;
pub use responder::Responder;
pub use ssh::SshTransport;
pub use transport::{Credentials, RemoteChild, Transport};
