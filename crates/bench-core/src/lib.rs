//! bench-core — shared types for benchgrid campaigns.
//!
//! A campaign file declares which hosts take part in a benchmark run and
//! which roles each of them plays. This crate parses that file into an
//! immutable [`Topology`] and describes where things live on the remote
//! hosts ([`RemoteLayout`]).

pub mod config;
pub mod layout;
pub mod topology;
pub mod types;

pub use config::{CampaignFile, LayoutConfig, MachineConfig};
pub use layout::RemoteLayout;
pub use topology::{Topology, TopologyError, TopologyResult};
pub use types::*;
