//! Merging the load generator's per-client latency histograms.
//!
//! Each client writes one `loadgen_latencies*.txt` per epoch. Every data
//! line carries the epoch's load counters followed by one latency bucket:
//!
//! ```text
//! Distribution,Target,Actual,Dropped,Never Sent,Start,StartTsc,Latency,Count
//! ```
//!
//! Merging an epoch sums the load counters across clients, takes the
//! descriptive fields from the first file and computes percentiles over the
//! union of all buckets.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

use crate::error::{CampaignError, CampaignResult};
use crate::stats::{py_float, saturating_sum};

pub const HEADER: &str =
    "Distribution,Target,Actual,Dropped,Never Sent,Median,90th,99th,99.9th,99.99th,Start,StartTsc";
pub const INPUT_PREFIX: &str = "loadgen_latencies";
pub const MERGED_FILE: &str = "loadgen_merged.csv";

/// Header lines written by the different load generator versions.
const HEADER_PREFIXES: [&str; 2] = ["Distribution", "Opcode"];
const MAX_EPOCH: u32 = 999;
const PERCENTILES: [f64; 5] = [50.0, 90.0, 99.0, 99.9, 99.99];

/// Load counters from the first data line of one file.
#[derive(Debug, Clone, PartialEq)]
struct FileSummary {
    distribution: String,
    target: u64,
    actual: u64,
    dropped: u64,
    never_sent: u64,
    start: u64,
    start_tsc: u64,
}

/// One merged epoch.
#[derive(Debug, Clone, PartialEq)]
pub struct EpochRow {
    pub distribution: String,
    pub target: u64,
    pub actual: u64,
    pub dropped: u64,
    pub never_sent: u64,
    /// Median, 90th, 99th, 99.9th and 99.99th percentile latencies. `None`
    /// when the buckets never reach the rank, e.g. with many drops.
    pub percentiles: [Option<f64>; 5],
    pub start: u64,
    pub start_tsc: u64,
}

impl EpochRow {
    pub fn to_csv(&self) -> String {
        let mut fields = vec![
            self.distribution.clone(),
            self.target.to_string(),
            self.actual.to_string(),
            self.dropped.to_string(),
            self.never_sent.to_string(),
        ];
        fields.extend(self.percentiles.iter().map(|p| match p {
            Some(v) => py_float(*v),
            None => "None".to_string(),
        }));
        fields.push(self.start.to_string());
        fields.push(self.start_tsc.to_string());
        fields.join(",")
    }
}

/// Latency buckets keyed by the latency's bit pattern, so equal latencies
/// from different files land in the same bucket.
#[derive(Debug, Default)]
struct Histogram {
    counts: HashMap<u64, u64>,
}

impl Histogram {
    fn add(&mut self, latency: f64, count: u64) {
        let bucket = self.counts.entry(latency.to_bits()).or_default();
        *bucket = bucket.saturating_add(count);
    }

    fn sorted(&self) -> Vec<(f64, u64)> {
        let mut buckets: Vec<(f64, u64)> = self
            .counts
            .iter()
            .map(|(bits, count)| (f64::from_bits(*bits), *count))
            .collect();
        buckets.sort_by(|a, b| a.0.total_cmp(&b.0));
        buckets
    }

    fn total(&self) -> u64 {
        saturating_sum(self.counts.values().copied())
    }

    /// First latency whose cumulative count reaches `p` percent of every
    /// request, dropped ones included.
    fn percentile(&self, dropped: u64, p: f64) -> Option<f64> {
        let rank = self.total().saturating_add(dropped) as f64 * p / 100.0;
        let mut seen = 0u64;
        for (latency, count) in self.sorted() {
            seen = seen.saturating_add(count);
            if seen as f64 >= rank {
                return Some(latency);
            }
        }
        None
    }
}

/// `loadgen_latencies*.txt` files directly in `dir`, sorted.
pub fn input_files(dir: &Path) -> CampaignResult<Vec<PathBuf>> {
    let entries = fs::read_dir(dir).map_err(|e| CampaignError::io(dir, e))?;
    let mut files = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|e| CampaignError::io(dir, e))?;
        let name = entry.file_name();
        let name = name.to_string_lossy();
        if name.starts_with(INPUT_PREFIX) && name.ends_with(".txt") {
            files.push(entry.path());
        }
    }
    files.sort();
    Ok(files)
}

fn field<T: std::str::FromStr>(
    tokens: &[&str],
    index: usize,
    path: &Path,
    line: usize,
) -> CampaignResult<T> {
    let raw = tokens.get(index).ok_or_else(|| CampaignError::Parse {
        path: path.to_path_buf(),
        line,
        reason: format!("expected at least {} fields, got {}", index + 1, tokens.len()),
    })?;
    raw.trim().parse().map_err(|_| CampaignError::Parse {
        path: path.to_path_buf(),
        line,
        reason: format!("field {index} is not a number: {raw:?}"),
    })
}

/// Add one file's buckets to `histogram` and return its load counters, or
/// `None` when the file has no data lines.
fn read_file(path: &Path, histogram: &mut Histogram) -> CampaignResult<Option<FileSummary>> {
    let content = fs::read_to_string(path).map_err(|e| CampaignError::io(path, e))?;
    let mut summary = None;
    for (i, line) in content.lines().enumerate() {
        let line = line.trim();
        let lineno = i + 1;
        if line.is_empty() || HEADER_PREFIXES.iter().any(|p| line.starts_with(p)) {
            continue;
        }
        let tokens: Vec<&str> = line.split(',').collect();
        if summary.is_none() {
            summary = Some(FileSummary {
                distribution: tokens[0].to_string(),
                target: field(&tokens, 1, path, lineno)?,
                actual: field(&tokens, 2, path, lineno)?,
                dropped: field(&tokens, 3, path, lineno)?,
                never_sent: field(&tokens, 4, path, lineno)?,
                start: field(&tokens, 5, path, lineno)?,
                start_tsc: field(&tokens, 6, path, lineno)?,
            });
        }
        let latency: f64 = field(&tokens, 7, path, lineno)?;
        let count: u64 = field(&tokens, 8, path, lineno)?;
        histogram.add(latency, count);
    }
    Ok(summary)
}

/// Merge the files of a single epoch. `None` when none of them has data.
fn merge_epoch(files: &[&PathBuf]) -> CampaignResult<Option<EpochRow>> {
    let mut histogram = Histogram::default();
    let mut summaries = Vec::new();
    for path in files {
        if let Some(summary) = read_file(path, &mut histogram)? {
            summaries.push(summary);
        }
    }
    let Some(first) = summaries.first() else {
        return Ok(None);
    };

    let dropped = saturating_sum(summaries.iter().map(|s| s.dropped));
    let mut percentiles = [None; 5];
    for (slot, p) in percentiles.iter_mut().zip(PERCENTILES) {
        *slot = histogram.percentile(dropped, p);
    }
    Ok(Some(EpochRow {
        distribution: first.distribution.clone(),
        target: saturating_sum(summaries.iter().map(|s| s.target)),
        actual: saturating_sum(summaries.iter().map(|s| s.actual)),
        dropped,
        never_sent: saturating_sum(summaries.iter().map(|s| s.never_sent)),
        percentiles,
        start: first.start,
        start_tsc: first.start_tsc,
    }))
}

/// One row per epoch present among `files`, in epoch order.
pub fn merge_files(files: &[PathBuf]) -> CampaignResult<Vec<EpochRow>> {
    let mut rows = Vec::new();
    for epoch in 1..=MAX_EPOCH {
        let marker = format!("epoch{epoch}_");
        let of_epoch: Vec<&PathBuf> = files
            .iter()
            .filter(|f| {
                f.file_name()
                    .is_some_and(|n| n.to_string_lossy().contains(&marker))
            })
            .collect();
        if of_epoch.is_empty() {
            continue;
        }
        match merge_epoch(&of_epoch)? {
            Some(row) => rows.push(row),
            None => warn!(epoch, files = of_epoch.len(), "epoch has no samples"),
        }
    }
    Ok(rows)
}

/// Merge every latency file in `input_dir` into a CSV at `output_path`,
/// replacing any previous file. Returns the number of epochs written.
pub fn merge_buckets(input_dir: &Path, output_path: &Path) -> CampaignResult<usize> {
    let files = input_files(input_dir)?;
    debug!(dir = %input_dir.display(), files = files.len(), "merging latency buckets");
    let rows = merge_files(&files)?;

    let mut lines = vec![HEADER.to_string()];
    lines.extend(rows.iter().map(EpochRow::to_csv));
    fs::write(output_path, lines.join("\n")).map_err(|e| CampaignError::io(output_path, e))?;
    info!(path = %output_path.display(), epochs = rows.len(), "merged latency buckets");
    Ok(rows.len())
}
