//! benchgrid-campaign — runs one benchmark campaign end to end.
//!
//! A [`Campaign`] connects to every host of a [`Topology`](bench_core::Topology),
//! provisions them, brings up the controller, the disk servers and the
//! clients, and hands the clients to a [`Workload`]. Afterwards, whether or
//! not setup succeeded, reached hosts are torn down (clients first, the
//! controller last), their output is fetched and the controller's peak
//! IOPS reports are checked against the configured disk count.
//!
//! # Components
//!
//! - **`campaign`** — [`Campaign`], phase sequencing and guaranteed teardown
//! - **`phase`** — [`CampaignPhase`] state machine
//! - **`fanout`** — one task per host, joined before the next phase
//! - **`workload`** — [`Workload`] trait, the [`Loadgen`] load generator and
//!   [`ServersOnly`] for campaigns without clients
//! - **`validate`** — peak IOPS totals and disk-count check
//! - **`buckets`** — merging per-client latency histograms

pub mod buckets;
pub mod campaign;
pub mod error;
pub mod fanout;
pub mod options;
pub mod phase;
mod stats;
pub mod validate;
pub mod workload;

pub use buckets::merge_buckets;
pub use campaign::{Campaign, CampaignReport};
pub use error::{CampaignError, CampaignResult};
pub use options::CampaignOptions;
pub use phase::CampaignPhase;
pub use validate::{CategoryStats, ValidationReport, validate_output};
pub use workload::{Loadgen, ServersOnly, Workload, workload_for};
