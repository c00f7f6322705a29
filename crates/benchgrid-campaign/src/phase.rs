//! Campaign phases.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Where a campaign is in its lifecycle. Setup phases advance strictly in
/// order; any of them can jump straight to [`CampaignPhase::TornDown`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum CampaignPhase {
    Idle,
    Connected,
    Provisioned,
    PreLaunched,
    DisksReady,
    ControllerUp,
    DiskServersUp,
    ClientsReady,
    Running,
    TornDown,
    Collected,
    Validated,
}

impl CampaignPhase {
    pub fn next(self) -> Option<Self> {
        use CampaignPhase::*;
        Some(match self {
            Idle => Connected,
            Connected => Provisioned,
            Provisioned => PreLaunched,
            PreLaunched => DisksReady,
            DisksReady => ControllerUp,
            ControllerUp => DiskServersUp,
            DiskServersUp => ClientsReady,
            ClientsReady => Running,
            Running => TornDown,
            TornDown => Collected,
            Collected => Validated,
            Validated => return None,
        })
    }

    pub fn can_move_to(self, to: Self) -> bool {
        self.next() == Some(to) || (to == Self::TornDown && self < Self::TornDown)
    }

    pub fn label(self) -> &'static str {
        use CampaignPhase::*;
        match self {
            Idle => "idle",
            Connected => "connected",
            Provisioned => "provisioned",
            PreLaunched => "pre-launched",
            DisksReady => "disks-ready",
            ControllerUp => "controller-up",
            DiskServersUp => "disk-servers-up",
            ClientsReady => "clients-ready",
            Running => "running",
            TornDown => "torn-down",
            Collected => "collected",
            Validated => "validated",
        }
    }
}

impl fmt::Display for CampaignPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}
