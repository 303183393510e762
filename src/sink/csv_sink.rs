// 📁 CSV Report Sink - report directory, published all-or-nothing
//
// Files are written into `.<output>.staging-<uuid>` next to the target, then
// swapped in with renames on commit. The previous directory is parked next to
// the target until the publish finishes, so a later sink failing can still
// put it back.

use crate::concentration::Dimension;
use crate::error::{ReconError, ReconResult};
use crate::report::{ConcentrationRow, PublishedReport, ReportSet, ReportSink, StagedReport};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fs;
use std::path::{Component, Path, PathBuf};

pub const DETAIL_FILE: &str = "reconciliation_report.csv";
pub const SUMMARY_FILE: &str = "summary_metrics.csv";
pub const QUALITY_FILE: &str = "data_quality_report.csv";
pub const KPI_JSON_FILE: &str = "kpis.json";
pub const KPI_CSV_FILE: &str = "kpis.csv";
pub const MANIFEST_FILE: &str = "manifest.json";

pub fn concentration_file(dimension: Dimension) -> &'static str {
    match dimension {
        Dimension::CostCenter => "concentration_by_center.csv",
        Dimension::RiskSegment => "concentration_by_risk_segment.csv",
        Dimension::PdBucket => "concentration_by_pd_bucket.csv",
    }
}

// ============================================================================
// MANIFEST
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ManifestEntry {
    pub file: String,
    pub sha256: String,
    pub bytes: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Manifest {
    pub run_id: String,
    pub generated_at: DateTime<Utc>,
    pub files: Vec<ManifestEntry>,
}

impl Manifest {
    pub fn read(dir: &Path) -> ReconResult<Self> {
        let content = fs::read_to_string(dir.join(MANIFEST_FILE))?;
        Ok(serde_json::from_str(&content)?)
    }

    /// Names of files whose current content no longer matches the manifest
    pub fn verify(&self, dir: &Path) -> ReconResult<Vec<String>> {
        let mut changed = Vec::new();
        for entry in &self.files {
            let bytes = fs::read(dir.join(&entry.file))?;
            if sha256_hex(&bytes) != entry.sha256 {
                changed.push(entry.file.clone());
            }
        }
        Ok(changed)
    }
}

fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

// ============================================================================
// SINK
// ============================================================================

pub struct CsvReportSink {
    output_dir: PathBuf,
}

impl CsvReportSink {
    pub fn new(output_dir: impl Into<PathBuf>) -> Self {
        CsvReportSink {
            output_dir: output_dir.into(),
        }
    }

    /// Write every report file into `dir` (which must exist) and return the
    /// file names, manifest last.
    pub fn write_files(&self, dir: &Path, reports: &ReportSet) -> ReconResult<Vec<String>> {
        let mut files = Vec::new();

        write_rows(&dir.join(DETAIL_FILE), &reports.detail_rows())?;
        files.push(DETAIL_FILE.to_string());

        write_rows(&dir.join(SUMMARY_FILE), &reports.summary_rows())?;
        files.push(SUMMARY_FILE.to_string());

        write_rows(&dir.join(QUALITY_FILE), &reports.quality_rows())?;
        files.push(QUALITY_FILE.to_string());

        fs::write(dir.join(KPI_JSON_FILE), serde_json::to_string_pretty(&reports.kpis)?)?;
        files.push(KPI_JSON_FILE.to_string());

        let mut wtr = csv::Writer::from_path(dir.join(KPI_CSV_FILE))?;
        wtr.serialize(&reports.kpis)?;
        wtr.flush()?;
        files.push(KPI_CSV_FILE.to_string());

        for dimension in Dimension::ALL {
            let name = concentration_file(dimension);
            write_concentration(&dir.join(name), dimension, &reports.concentration_rows(dimension))?;
            files.push(name.to_string());
        }

        #[cfg(feature = "charts")]
        for chart in crate::charts::render_all(reports) {
            let name = format!("{}.txt", chart.file_name);
            fs::write(dir.join(&name), chart.to_text())?;
            files.push(name);
        }

        let mut entries = Vec::with_capacity(files.len());
        for file in &files {
            let bytes = fs::read(dir.join(file))?;
            entries.push(ManifestEntry {
                file: file.clone(),
                sha256: sha256_hex(&bytes),
                bytes: bytes.len() as u64,
            });
        }
        let manifest = Manifest {
            run_id: reports.run_id.clone(),
            generated_at: reports.generated_at,
            files: entries,
        };
        fs::write(dir.join(MANIFEST_FILE), serde_json::to_string_pretty(&manifest)?)?;
        files.push(MANIFEST_FILE.to_string());

        Ok(files)
    }

    /// Absolute, `.`/`..`-free form of the output directory. A path with no
    /// final name (`/`) is rejected since the staging dir lives beside it.
    pub fn resolved_output_dir(&self) -> ReconResult<PathBuf> {
        let absolute = if self.output_dir.is_absolute() {
            self.output_dir.clone()
        } else {
            std::env::current_dir()?.join(&self.output_dir)
        };

        let mut resolved = PathBuf::new();
        for component in absolute.components() {
            match component {
                Component::CurDir => {}
                Component::ParentDir => {
                    resolved.pop();
                }
                other => resolved.push(other.as_os_str()),
            }
        }

        if resolved.file_name().is_none() {
            return Err(ReconError::InvalidConfig(format!(
                "output directory '{}' has no name to publish under",
                self.output_dir.display()
            )));
        }
        Ok(resolved)
    }
}

/// Next to `target`, hidden: `.<name>.<tag>-<uuid>`
fn sibling(target: &Path, tag: &str) -> PathBuf {
    let name = target
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "reports".to_string());
    target.with_file_name(format!(".{}.{}-{}", name, tag, uuid::Uuid::new_v4()))
}

/// Report directory written to a staging sibling, waiting for its swap.
pub struct StagedCsvReport {
    target: PathBuf,
    staging: PathBuf,
    previous: Option<PathBuf>,
    committed: bool,
    artifacts: Vec<String>,
}

impl StagedReport for StagedCsvReport {
    fn commit(&mut self) -> ReconResult<()> {
        if self.committed {
            return Ok(());
        }

        if self.target.exists() {
            let previous = sibling(&self.target, "previous");
            fs::rename(&self.target, &previous)?;
            if let Err(e) = fs::rename(&self.staging, &self.target) {
                // put the old reports back before giving up
                fs::rename(&previous, &self.target)?;
                return Err(e.into());
            }
            self.previous = Some(previous);
        } else {
            fs::rename(&self.staging, &self.target)?;
        }

        self.committed = true;
        Ok(())
    }

    fn revert(&mut self) -> ReconResult<()> {
        if !self.committed {
            return Ok(());
        }

        // the new reports go back to staging so Drop clears them
        fs::rename(&self.target, &self.staging)?;
        self.committed = false;
        if let Some(previous) = self.previous.take() {
            fs::rename(&previous, &self.target)?;
        }
        log::warn!("reports at {} reverted to the previous run", self.target.display());
        Ok(())
    }

    fn finish(self: Box<Self>) -> PublishedReport {
        PublishedReport {
            location: self.target.display().to_string(),
            artifacts: self.artifacts.clone(),
        }
    }
}

impl Drop for StagedCsvReport {
    fn drop(&mut self) {
        let leftover = if self.committed {
            self.previous.take()
        } else {
            Some(self.staging.clone())
        };

        if let Some(dir) = leftover {
            if dir.exists() {
                if let Err(e) = fs::remove_dir_all(&dir) {
                    log::warn!("could not remove {}: {}", dir.display(), e);
                }
            }
        }
    }
}

impl ReportSink for CsvReportSink {
    fn stage(&self, reports: &ReportSet) -> ReconResult<Box<dyn StagedReport>> {
        let target = self.resolved_output_dir()?;
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)?;
        }

        let staging = sibling(&target, "staging");
        fs::create_dir_all(&staging)?;

        let mut staged = StagedCsvReport {
            target,
            staging,
            previous: None,
            committed: false,
            artifacts: Vec::new(),
        };
        // on error `staged` drops here and takes the staging dir with it
        staged.artifacts = self.write_files(&staged.staging, reports).map_err(|e| {
            log::error!("report staging failed, previous reports kept: {}", e);
            e
        })?;

        Ok(Box::new(staged))
    }

    fn name(&self) -> &str {
        "csv"
    }
}

fn write_rows<T: Serialize>(path: &Path, rows: &[T]) -> ReconResult<()> {
    let mut wtr = csv::Writer::from_path(path)?;
    for row in rows {
        wtr.serialize(row)?;
    }
    wtr.flush()?;
    Ok(())
}

fn write_concentration(path: &Path, dimension: Dimension, rows: &[ConcentrationRow]) -> ReconResult<()> {
    let mut wtr = csv::WriterBuilder::new().has_headers(false).from_path(path)?;
    wtr.write_record(ConcentrationRow::headers(dimension))?;
    for row in rows {
        wtr.serialize(row)?;
    }
    wtr.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PipelineConfig;
    use crate::loader::PortfolioSnapshot;
    use crate::pipeline::Pipeline;
    use crate::records::{LedgerRecord, LoanRecord, RiskRecord};
    use tempfile::TempDir;

    fn sample_reports() -> ReportSet {
        let snapshot = PortfolioSnapshot::new(
            vec![
                LoanRecord::new("L1", "C1", Some(10_000.0)),
                LoanRecord::new("L2", "C2", Some(2_000.0)),
            ],
            vec![
                LedgerRecord::new("L1", "C1", Some(4_000.0)),
                LedgerRecord::new("L2", "C2", Some(2_000.0)),
            ],
            vec![
                RiskRecord::new("L1").with_pd(0.05).with_lgd(0.4).with_cost_center("CC-01"),
                RiskRecord::new("L2").with_pd(0.01).with_lgd(0.4).with_cost_center("CC-02"),
            ],
        );
        Pipeline::new(PipelineConfig::default()).unwrap().run(&snapshot).unwrap()
    }

    #[test]
    fn test_publish_writes_full_set_and_manifest() {
        let tmp = TempDir::new().unwrap();
        let out = tmp.path().join("reports");
        let reports = sample_reports();

        let published = CsvReportSink::new(&out).publish(&reports).unwrap();

        for file in [DETAIL_FILE, SUMMARY_FILE, QUALITY_FILE, KPI_JSON_FILE, KPI_CSV_FILE, MANIFEST_FILE] {
            assert!(out.join(file).exists(), "missing {}", file);
        }
        assert!(out.join("concentration_by_pd_bucket.csv").exists());

        let manifest = Manifest::read(&out).unwrap();
        assert_eq!(manifest.run_id, reports.run_id);
        assert_eq!(manifest.files.len() + 1, published.artifacts.len());
        assert!(manifest.verify(&out).unwrap().is_empty());

        // no staging leftovers next to the output
        let siblings = fs::read_dir(tmp.path()).unwrap().count();
        assert_eq!(siblings, 1);
    }

    #[test]
    fn test_republish_replaces_previous_reports() {
        let tmp = TempDir::new().unwrap();
        let out = tmp.path().join("reports");
        fs::create_dir_all(&out).unwrap();
        fs::write(out.join("stale.csv"), "old").unwrap();

        CsvReportSink::new(&out).publish(&sample_reports()).unwrap();

        assert!(!out.join("stale.csv").exists());
        assert!(out.join(DETAIL_FILE).exists());
        assert_eq!(fs::read_dir(tmp.path()).unwrap().count(), 1);
    }

    #[test]
    fn test_concentration_header_follows_dimension() {
        let tmp = TempDir::new().unwrap();
        let out = tmp.path().join("reports");
        CsvReportSink::new(&out).publish(&sample_reports()).unwrap();

        let content = fs::read_to_string(out.join("concentration_by_center.csv")).unwrap();
        assert!(content.starts_with("CentroCosto,mismatch,num_loans,total_abs_diff"));

        let detail = fs::read_to_string(out.join(DETAIL_FILE)).unwrap();
        assert!(detail.starts_with("LoanID,ClienteID,FechaDesembolso,ImporteAprobado"));
    }

    #[test]
    fn test_output_dir_is_resolved_before_staging() {
        let tmp = TempDir::new().unwrap();
        let out = tmp.path().join("reports");
        let dotted = out.join("sub").join("..");

        let sink = CsvReportSink::new(&dotted);
        assert_eq!(sink.resolved_output_dir().unwrap(), out);
        let published = sink.publish(&sample_reports()).unwrap();

        assert_eq!(published.location, out.display().to_string());
        assert!(out.join(DETAIL_FILE).exists());
        assert!(!out.join("sub").exists());
        assert_eq!(fs::read_dir(tmp.path()).unwrap().count(), 1);
    }

    #[test]
    fn test_output_dir_without_a_name_is_rejected() {
        let err = CsvReportSink::new("/").publish(&sample_reports()).unwrap_err();
        assert!(matches!(err, ReconError::InvalidConfig(_)));
    }

    #[test]
    fn test_revert_restores_previous_reports() {
        let tmp = TempDir::new().unwrap();
        let out = tmp.path().join("reports");
        let first = sample_reports();
        CsvReportSink::new(&out).publish(&first).unwrap();

        let mut staged = CsvReportSink::new(&out).stage(&sample_reports()).unwrap();
        // staged but not committed: old reports still live
        assert_eq!(Manifest::read(&out).unwrap().run_id, first.run_id);

        staged.commit().unwrap();
        assert_ne!(Manifest::read(&out).unwrap().run_id, first.run_id);

        staged.revert().unwrap();
        drop(staged);
        assert_eq!(Manifest::read(&out).unwrap().run_id, first.run_id);
        assert_eq!(fs::read_dir(tmp.path()).unwrap().count(), 1);
    }

    #[test]
    fn test_dropped_stage_leaves_nothing_behind() {
        let tmp = TempDir::new().unwrap();
        let out = tmp.path().join("reports");

        let staged = CsvReportSink::new(&out).stage(&sample_reports()).unwrap();
        assert_eq!(fs::read_dir(tmp.path()).unwrap().count(), 1);
        drop(staged);

        assert!(!out.exists());
        assert_eq!(fs::read_dir(tmp.path()).unwrap().count(), 0);
    }

    #[test]
    fn test_manifest_detects_tampering() {
        let tmp = TempDir::new().unwrap();
        let out = tmp.path().join("reports");
        CsvReportSink::new(&out).publish(&sample_reports()).unwrap();

        fs::write(out.join(SUMMARY_FILE), "tampered").unwrap();
        let manifest = Manifest::read(&out).unwrap();
        assert_eq!(manifest.verify(&out).unwrap(), vec![SUMMARY_FILE.to_string()]);
    }
}
