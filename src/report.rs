// 🧾 Report assembly - everything a run hands to its sinks
//
// A ReportSet is the complete output of one run. Sinks only ever see a
// finished ReportSet, so a failed run publishes nothing.

use crate::anomaly::AnomalyOutcome;
use crate::concentration::{ConcentrationAggregate, ConcentrationReport, Dimension, SummaryMetrics};
use crate::config::PipelineConfig;
use crate::data_quality::QualityRecord;
use crate::enrichment::EnrichedRecord;
use crate::error::ReconResult;
use crate::kpi::KpiSet;
use crate::reconciliation::ReconciliationSummary;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

// ============================================================================
// REPORT SET
// ============================================================================

#[derive(Debug, Clone, Serialize)]
pub struct ReportSet {
    pub run_id: String,
    pub generated_at: DateTime<Utc>,
    pub config: PipelineConfig,
    pub reconciliation: ReconciliationSummary,
    pub anomaly: AnomalyOutcome,
    pub records: Vec<EnrichedRecord>,
    pub summary: Vec<SummaryMetrics>,
    pub quality: Vec<QualityRecord>,
    pub kpis: KpiSet,
    pub concentration: ConcentrationReport,
}

impl ReportSet {
    pub fn detail_rows(&self) -> Vec<DetailRow> {
        self.records.iter().map(DetailRow::from).collect()
    }

    pub fn summary_rows(&self) -> Vec<SummaryRow> {
        self.summary.iter().map(SummaryRow::from).collect()
    }

    pub fn quality_rows(&self) -> Vec<QualityRow> {
        self.quality.iter().map(QualityRow::from).collect()
    }

    pub fn concentration_rows(&self, dimension: Dimension) -> Vec<ConcentrationRow> {
        self.concentration
            .table(dimension)
            .iter()
            .map(ConcentrationRow::from)
            .collect()
    }
}

// ============================================================================
// REPORT SINK
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PublishedReport {
    /// Directory or database the reports ended up in
    pub location: String,
    /// Files or tables written
    pub artifacts: Vec<String>,
}

/// A report set written somewhere but not yet visible to readers.
///
/// `commit` makes it live. `revert` takes back a commit when a later sink
/// fails. Dropping a stage that was never committed discards it.
pub trait StagedReport {
    fn commit(&mut self) -> ReconResult<()>;

    fn revert(&mut self) -> ReconResult<()>;

    fn finish(self: Box<Self>) -> PublishedReport;
}

/// Destination for a finished report set.
pub trait ReportSink {
    fn stage(&self, reports: &ReportSet) -> ReconResult<Box<dyn StagedReport>>;

    /// Short name for logs
    fn name(&self) -> &str;

    fn publish(&self, reports: &ReportSet) -> ReconResult<PublishedReport> {
        let mut staged = self.stage(reports)?;
        staged.commit()?;
        Ok(staged.finish())
    }
}

/// Publish to every sink or to none.
///
/// Every sink stages first. Commits then run in order, and a failed commit
/// reverts the ones before it.
pub fn publish_all(sinks: &[Box<dyn ReportSink>], reports: &ReportSet) -> ReconResult<Vec<PublishedReport>> {
    let mut staged = Vec::with_capacity(sinks.len());
    for sink in sinks {
        let stage = sink.stage(reports).map_err(|e| {
            log::error!("staging via {} failed, nothing published: {}", sink.name(), e);
            e
        })?;
        staged.push((sink.name(), stage));
    }

    for i in 0..staged.len() {
        if let Err(e) = staged[i].1.commit() {
            log::error!("commit via {} failed: {}", staged[i].0, e);
            for (name, done) in staged[..i].iter_mut().rev() {
                match done.revert() {
                    Ok(()) => log::warn!("reverted {} publish", name),
                    Err(undo) => log::error!("could not revert {} publish: {}", name, undo),
                }
            }
            return Err(e);
        }
    }

    Ok(staged
        .into_iter()
        .map(|(name, stage)| {
            let published = stage.finish();
            log::info!(
                "published {} artifacts via {} to {}",
                published.artifacts.len(),
                name,
                published.location
            );
            published
        })
        .collect())
}

// ============================================================================
// FLAT ROWS (one struct per output table)
// ============================================================================

/// One line of reconciliation_report.csv
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetailRow {
    #[serde(rename = "LoanID")]
    pub loan_id: String,
    #[serde(rename = "ClienteID")]
    pub client_id: String,
    #[serde(rename = "FechaDesembolso")]
    pub disbursement_date: Option<NaiveDate>,
    #[serde(rename = "ImporteAprobado")]
    pub approved_amount: f64,
    #[serde(rename = "Fecha")]
    pub ledger_date: Option<NaiveDate>,
    #[serde(rename = "SaldoContable")]
    pub ledger_balance: f64,
    pub difference: f64,
    pub abs_difference: f64,
    pub mismatch: bool,
    pub anomaly: bool,
    #[serde(rename = "Risk_Mismatch_Score")]
    pub risk_mismatch_score: f64,
    #[serde(rename = "RiesgoAsignado")]
    pub risk_segment: Option<String>,
    #[serde(rename = "PD")]
    pub pd: Option<f64>,
    #[serde(rename = "LGD")]
    pub lgd: Option<f64>,
    #[serde(rename = "EAD")]
    pub ead: Option<f64>,
    #[serde(rename = "Provision")]
    pub provision: Option<f64>,
    #[serde(rename = "CentroCosto")]
    pub cost_center: Option<String>,
    #[serde(rename = "PD_bucket")]
    pub pd_bucket: Option<String>,
    #[serde(rename = "_merge")]
    pub join_origin: String,
}

impl From<&EnrichedRecord> for DetailRow {
    fn from(record: &EnrichedRecord) -> Self {
        let r = &record.reconciled;
        DetailRow {
            loan_id: r.loan_id.clone(),
            client_id: r.client_id.clone(),
            disbursement_date: r.disbursement_date,
            approved_amount: r.approved_amount,
            ledger_date: r.ledger_date,
            ledger_balance: r.ledger_balance,
            difference: r.difference,
            abs_difference: r.abs_difference,
            mismatch: r.mismatch,
            anomaly: record.anomaly,
            risk_mismatch_score: record.risk_mismatch_score,
            risk_segment: record.risk_segment.clone(),
            pd: record.pd,
            lgd: record.lgd,
            ead: record.ead,
            provision: record.provision,
            cost_center: record.cost_center.clone(),
            pd_bucket: record.pd_bucket.map(|b| b.label().to_string()),
            join_origin: r.join_origin.as_str().to_string(),
        }
    }
}

/// One line of summary_metrics.csv
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SummaryRow {
    #[serde(rename = "CentroCosto")]
    pub cost_center: Option<String>,
    pub mismatch: bool,
    pub num_loans: usize,
    pub total_approved: f64,
    pub total_ledger: f64,
    pub total_abs_difference: f64,
}

impl From<&SummaryMetrics> for SummaryRow {
    fn from(s: &SummaryMetrics) -> Self {
        SummaryRow {
            cost_center: s.cost_center.value(),
            mismatch: s.mismatch,
            num_loans: s.num_loans,
            total_approved: s.total_approved,
            total_ledger: s.total_ledger,
            total_abs_difference: s.total_abs_difference,
        }
    }
}

/// One line of data_quality_report.csv
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QualityRow {
    #[serde(rename = "LoanID")]
    pub loan_id: String,
    #[serde(rename = "missing_PD")]
    pub missing_pd: bool,
    #[serde(rename = "missing_LGD")]
    pub missing_lgd: bool,
    #[serde(rename = "missing_EAD")]
    pub missing_ead: bool,
    pub negative_saldo: bool,
    pub negative_importe_aprobado: bool,
    pub inconsistent_provision: bool,
    pub missing_centro_costo: bool,
    pub any_quality_issue: bool,
}

impl From<&QualityRecord> for QualityRow {
    fn from(q: &QualityRecord) -> Self {
        QualityRow {
            loan_id: q.loan_id.clone(),
            missing_pd: q.missing_pd,
            missing_lgd: q.missing_lgd,
            missing_ead: q.missing_ead,
            negative_saldo: q.negative_ledger_balance,
            negative_importe_aprobado: q.negative_approved_amount,
            inconsistent_provision: q.inconsistent_provision,
            missing_centro_costo: q.missing_cost_center,
            any_quality_issue: q.any_issue,
        }
    }
}

/// One line of a concentration table. The value column is named after the
/// dimension when written (see `Dimension::column`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConcentrationRow {
    pub value: Option<String>,
    pub mismatch: bool,
    pub num_loans: usize,
    pub total_abs_diff: f64,
}

impl ConcentrationRow {
    pub fn headers(dimension: Dimension) -> [&'static str; 4] {
        [dimension.column(), "mismatch", "num_loans", "total_abs_diff"]
    }
}

impl From<&ConcentrationAggregate> for ConcentrationRow {
    fn from(a: &ConcentrationAggregate) -> Self {
        ConcentrationRow {
            value: a.key.value(),
            mismatch: a.mismatch,
            num_loans: a.num_loans,
            total_abs_diff: a.total_abs_diff,
        }
    }
}
