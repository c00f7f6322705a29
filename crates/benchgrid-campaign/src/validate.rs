//! Post-run checks over the collected output tree.
//!
//! Every disk server reports its peak IOPS per operation category through
//! the controller's log. A run is valid when, for each category that was
//! reported at all, every configured disk reported.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use regex::Regex;
use serde::Serialize;
use tracing::{info, warn};
use walkdir::WalkDir;

use crate::error::{CampaignError, CampaignResult};
use crate::stats::{py_float, sample_stdev, saturating_sum};

pub const CATEGORIES: [&str; 3] = ["read", "write", "mix"];

static PEAK_IOPS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"Peak IOPS \((read|write|mix)\): (\d+)").expect("static pattern")
});

/// Markers of the disk server summary lines worth surfacing.
const DISK_SERVER_MARKERS: [&str; 6] = [
    "Serial",
    "Pure",
    "Impure",
    "Failed reads",
    "Failed writes",
    "Mixed",
];

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CategoryStats {
    pub category: String,
    /// Sum of the per-disk peaks.
    pub total: u64,
    /// Sample standard deviation of the per-disk peaks.
    pub stdev: f64,
    /// Number of disks that reported.
    pub disks: usize,
}

impl CategoryStats {
    fn from_samples(category: &str, samples: &[u64]) -> Self {
        let values: Vec<f64> = samples.iter().map(|&v| v as f64).collect();
        Self {
            category: category.to_string(),
            total: saturating_sum(samples.iter().copied()),
            stdev: sample_stdev(&values),
            disks: samples.len(),
        }
    }

    /// `Total IOPS for <op> = <total> [stdev = <stdev>] (<n> SSDs)`
    pub fn summary(&self) -> String {
        format!(
            "Total IOPS for {} = {} [stdev = {}] ({} SSDs)",
            self.category,
            self.total,
            py_float(self.stdev),
            self.disks
        )
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ValidationReport {
    pub expected_disks: usize,
    /// Categories that had at least one report, in read, write, mix order.
    pub categories: Vec<CategoryStats>,
}

impl ValidationReport {
    pub fn passed(&self) -> bool {
        !self.categories.is_empty()
            && self
                .categories
                .iter()
                .all(|c| c.disks == self.expected_disks)
    }

    pub fn category(&self, name: &str) -> Option<&CategoryStats> {
        self.categories.iter().find(|c| c.category == name)
    }
}

/// Files under `root` whose name starts with `prefix` and ends in `.log`,
/// sorted by path.
fn logs_named(root: &Path, prefix: &str) -> Vec<PathBuf> {
    let mut files: Vec<PathBuf> = WalkDir::new(root)
        .into_iter()
        .filter_map(Result::ok)
        .filter(|e| e.file_type().is_file())
        .filter(|e| {
            let name = e.file_name().to_string_lossy();
            name.starts_with(prefix) && name.ends_with(".log")
        })
        .map(|e| e.into_path())
        .collect();
    files.sort();
    files
}

/// Per-category peak IOPS samples from the controller logs under `root`.
pub fn peak_iops(root: &Path) -> CampaignResult<Vec<(String, Vec<u64>)>> {
    let mut samples: Vec<(String, Vec<u64>)> = CATEGORIES
        .iter()
        .map(|c| (c.to_string(), Vec::new()))
        .collect();

    for path in logs_named(root, "controller") {
        let content = fs::read(&path).map_err(|e| CampaignError::io(&path, e))?;
        let content = String::from_utf8_lossy(&content);
        for line in content.lines() {
            let Some(caps) = PEAK_IOPS.captures(line) else {
                continue;
            };
            let Ok(value) = caps[2].parse::<u64>() else {
                warn!(path = %path.display(), line, "peak IOPS out of range");
                continue;
            };
            if let Some((_, values)) = samples.iter_mut().find(|(c, _)| c == &caps[1]) {
                values.push(value);
            }
        }
    }
    Ok(samples)
}

/// Summarize peak IOPS under `root` and check that `expected_disks` disks
/// reported in every category that appears.
///
/// Every reported category is logged before the first mismatch is raised.
/// Nothing reported at all is a mismatch too, unless no disks were
/// configured.
pub fn validate_output(root: &Path, expected_disks: usize) -> CampaignResult<ValidationReport> {
    let mut report = ValidationReport {
        expected_disks,
        categories: Vec::new(),
    };
    for (category, values) in peak_iops(root)? {
        if values.is_empty() {
            continue;
        }
        let stats = CategoryStats::from_samples(&category, &values);
        info!("{}", stats.summary());
        report.categories.push(stats);
    }

    if report.categories.is_empty() && expected_disks > 0 {
        return Err(CampaignError::Validation {
            category: "any".to_string(),
            expected: expected_disks,
            found: 0,
        });
    }
    if let Some(bad) = report
        .categories
        .iter()
        .find(|c| c.disks != expected_disks)
    {
        return Err(CampaignError::Validation {
            category: bad.category.clone(),
            expected: expected_disks,
            found: bad.disks,
        });
    }
    Ok(report)
}

/// Log the summary lines of every disk server log under `root`.
pub fn log_disk_server_stats(root: &Path) {
    for path in logs_named(root, "disk_server") {
        let content = match fs::read(&path) {
            Ok(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "cannot read disk server log");
                continue;
            }
        };
        info!(path = %path.display(), "disk server stats");
        for line in content
            .lines()
            .filter(|l| DISK_SERVER_MARKERS.iter().any(|m| l.contains(m)))
        {
            info!(path = %path.display(), "{line}");
        }
    }
}
