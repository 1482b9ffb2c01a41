//! Candidate input from the scanner side of the tool.
//!
//! Scanners drop one markdown report per ticker per run into a directory.
//! Each report opens with a frontmatter block the engine can parse; the
//! prose body below it is for humans and ignored here. The engine never
//! writes to the report directory.

use crate::error::Result;
use crate::models::Candidate;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::path::PathBuf;

#[async_trait]
pub trait ScanSource: Send + Sync {
    /// Candidates from the most recent scan run of the given type
    async fn latest_candidates(&self, scan_type: &str) -> Result<Vec<Candidate>>;
}

/// Reads reports shaped like:
///
/// ```text
/// ---
/// ticker: AAPL
/// score: 92
/// scan_type: swing
/// generated: 2024-06-04T13:30:00Z
/// ---
/// (analysis body, ignored)
/// ```
pub struct ReportDirSource {
    dir: PathBuf,
}

impl ReportDirSource {
    pub fn new(dir: PathBuf) -> Self {
        Self { dir }
    }

    /// Parse one report's frontmatter. Returns None for files that are not
    /// reports or are missing required fields; callers skip those.
    fn parse_report(contents: &str) -> Option<Candidate> {
        let mut lines = contents.lines();
        if lines.next()?.trim() != "---" {
            return None;
        }

        let mut symbol = None;
        let mut score = None;
        let mut scan_type = None;
        let mut report_time = None;

        for line in lines {
            let line = line.trim();
            if line == "---" {
                break;
            }
            // Lines that are not `key: value` (blank lines, stray prose)
            // are skipped, not treated as a malformed report
            let Some((key, value)) = line.split_once(':') else {
                continue;
            };
            let value = value.trim();
            match key.trim() {
                "ticker" => symbol = Some(value.to_uppercase()),
                "score" => score = value.parse::<f64>().ok(),
                "scan_type" => scan_type = Some(value.to_string()),
                "generated" => {
                    report_time = DateTime::parse_from_rfc3339(value)
                        .ok()
                        .map(|t| t.with_timezone(&Utc))
                }
                _ => {}
            }
        }

        Some(Candidate {
            symbol: symbol?,
            score: score?,
            scan_type: scan_type?,
            report_time: report_time?,
        })
    }
}

#[async_trait]
impl ScanSource for ReportDirSource {
    async fn latest_candidates(&self, scan_type: &str) -> Result<Vec<Candidate>> {
        let mut all = Vec::new();
        let entries = match std::fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            // No report directory yet just means no candidates
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        for entry in entries {
            let entry = entry?;
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("md") {
                continue;
            }
            let contents = std::fs::read_to_string(&path)?;
            match Self::parse_report(&contents) {
                Some(c) if c.scan_type == scan_type => all.push(c),
                Some(_) => {}
                None => tracing::debug!("Skipping unparseable report {:?}", path),
            }
        }

        // Files from one run share a generated stamp; the newest stamp is
        // the current run, older files are stale runs not yet cleaned up
        let Some(newest) = all.iter().map(|c| c.report_time).max() else {
            return Ok(Vec::new());
        };
        all.retain(|c| c.report_time == newest);
        all.sort_by(|a, b| a.symbol.cmp(&b.symbol));
        Ok(all)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn write_report(dir: &TempDir, name: &str, ticker: &str, score: f64, generated: &str) {
        let contents = format!(
            "---\nticker: {}\nscore: {}\nscan_type: swing\ngenerated: {}\n---\n\n# {} analysis\n\nBody text.\n",
            ticker, score, generated, ticker
        );
        fs::write(dir.path().join(name), contents).unwrap();
    }

    #[tokio::test]
    async fn test_reads_newest_run_only() {
        let dir = TempDir::new().unwrap();
        write_report(&dir, "aapl.md", "AAPL", 92.0, "2024-06-04T13:30:00Z");
        write_report(&dir, "msft.md", "MSFT", 88.0, "2024-06-04T13:30:00Z");
        // Stale report from yesterday's run
        write_report(&dir, "nvda.md", "NVDA", 95.0, "2024-06-03T13:30:00Z");

        let source = ReportDirSource::new(dir.path().to_path_buf());
        let candidates = source.latest_candidates("swing").await.unwrap();

        let symbols: Vec<&str> = candidates.iter().map(|c| c.symbol.as_str()).collect();
        assert_eq!(symbols, vec!["AAPL", "MSFT"]);
    }

    #[tokio::test]
    async fn test_filters_by_scan_type() {
        let dir = TempDir::new().unwrap();
        write_report(&dir, "aapl.md", "AAPL", 92.0, "2024-06-04T13:30:00Z");
        fs::write(
            dir.path().join("tsla.md"),
            "---\nticker: TSLA\nscore: 90\nscan_type: momentum\ngenerated: 2024-06-04T13:30:00Z\n---\n",
        )
        .unwrap();

        let source = ReportDirSource::new(dir.path().to_path_buf());
        let candidates = source.latest_candidates("swing").await.unwrap();

        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].symbol, "AAPL");
    }

    #[tokio::test]
    async fn test_skips_files_without_frontmatter() {
        let dir = TempDir::new().unwrap();
        write_report(&dir, "aapl.md", "AAPL", 92.0, "2024-06-04T13:30:00Z");
        fs::write(dir.path().join("README.md"), "# Reports\n\nNot a report.\n").unwrap();
        fs::write(dir.path().join("notes.txt"), "scratch\n").unwrap();

        let source = ReportDirSource::new(dir.path().to_path_buf());
        let candidates = source.latest_candidates("swing").await.unwrap();

        assert_eq!(candidates.len(), 1);
    }

    #[tokio::test]
    async fn test_missing_directory_yields_no_candidates() {
        let dir = TempDir::new().unwrap();
        let source = ReportDirSource::new(dir.path().join("does-not-exist"));
        let candidates = source.latest_candidates("swing").await.unwrap();
        assert!(candidates.is_empty());
    }

    #[test]
    fn test_parse_report_lowercase_ticker_normalized() {
        let contents =
            "---\nticker: aapl\nscore: 92.5\nscan_type: swing\ngenerated: 2024-06-04T13:30:00Z\n---\n";
        let c = ReportDirSource::parse_report(contents).unwrap();
        assert_eq!(c.symbol, "AAPL");
        assert_eq!(c.score, 92.5);
    }

    #[test]
    fn test_parse_report_tolerates_non_key_value_lines() {
        // A blank line and a stray note inside the frontmatter must not
        // drop an otherwise valid candidate
        let contents = "---\nticker: AAPL\n\nhigh conviction\nscore: 92\nscan_type: swing\ngenerated: 2024-06-04T13:30:00Z\n---\n";
        let c = ReportDirSource::parse_report(contents).unwrap();
        assert_eq!(c.symbol, "AAPL");
        assert_eq!(c.score, 92.0);
    }

    #[test]
    fn test_parse_report_missing_score_is_rejected() {
        let contents = "---\nticker: AAPL\nscan_type: swing\ngenerated: 2024-06-04T13:30:00Z\n---\n";
        assert!(ReportDirSource::parse_report(contents).is_none());
    }
}
