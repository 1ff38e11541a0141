//! Ratio-history export sinks.
//!
//! The guard periodically appends `(query_count, ratio)` evaluations; at
//! session end a summary record follows. The on-disk format is JSON
//! lines: one ratio record per line, the summary as the final line.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::Result;
use crate::guard::GuardSummary;

/// One aggregate-ratio evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RatioRecord {
    pub query_count: u64,
    pub ratio: f64,
}

/// Write-only destination for the ratio history and final summary.
pub trait RatioSink {
    fn append_ratio(&mut self, query_count: u64, ratio: f64) -> Result<()>;

    /// Write the final summary row and flush. Called once, last.
    fn finish(&mut self, summary: &GuardSummary) -> Result<()>;
}

/// JSON-lines file sink.
pub struct FileRatioSink {
    writer: BufWriter<File>,
    path: PathBuf,
    rows: usize,
}

impl FileRatioSink {
    pub fn create(path: &Path) -> Result<Self> {
        let file = File::create(path)?;
        Ok(Self {
            writer: BufWriter::new(file),
            path: path.to_path_buf(),
            rows: 0,
        })
    }
}

impl RatioSink for FileRatioSink {
    fn append_ratio(&mut self, query_count: u64, ratio: f64) -> Result<()> {
        let record = RatioRecord { query_count, ratio };
        let json = serde_json::to_string(&record)?;
        writeln!(self.writer, "{json}")?;
        self.rows += 1;
        Ok(())
    }

    fn finish(&mut self, summary: &GuardSummary) -> Result<()> {
        let json = serde_json::to_string(summary)?;
        writeln!(self.writer, "{json}")?;
        self.writer.flush()?;
        debug!(
            path = %self.path.display(),
            rows = self.rows,
            "ratio history exported"
        );
        Ok(())
    }
}

/// In-memory sink for tests and programmatic consumers.
#[derive(Debug, Default)]
pub struct VecSink {
    pub rows: Vec<RatioRecord>,
    pub summary: Option<GuardSummary>,
}

impl RatioSink for VecSink {
    fn append_ratio(&mut self, query_count: u64, ratio: f64) -> Result<()> {
        self.rows.push(RatioRecord { query_count, ratio });
        Ok(())
    }

    fn finish(&mut self, summary: &GuardSummary) -> Result<()> {
        self.summary = Some(summary.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn summary() -> GuardSummary {
        GuardSummary {
            global_query_count: 42,
            leaf_count: 3,
            last_ratio: 0.25,
            mean_leaf_ratio: 0.2,
            leaf_ratio_variance: 0.01,
            detected: false,
        }
    }

    #[test]
    fn test_file_sink_writes_json_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ratios.jsonl");
        let mut sink = FileRatioSink::create(&path).unwrap();
        sink.append_ratio(10, 0.1).unwrap();
        sink.append_ratio(20, 0.25).unwrap();
        sink.finish(&summary()).unwrap();

        let contents = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines.len(), 3);

        let first: RatioRecord = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(first.query_count, 10);
        assert!((first.ratio - 0.1).abs() < 1e-12);

        let last: GuardSummary = serde_json::from_str(lines[2]).unwrap();
        assert_eq!(last.global_query_count, 42);
        assert_eq!(last.leaf_count, 3);
    }

    #[test]
    fn test_vec_sink_collects_rows_and_summary() {
        let mut sink = VecSink::default();
        sink.append_ratio(5, 0.5).unwrap();
        sink.finish(&summary()).unwrap();
        assert_eq!(sink.rows.len(), 1);
        assert_eq!(sink.summary.as_ref().unwrap().leaf_count, 3);
    }
}
