// 🔁 Pipeline - one batch run, end to end
//
// load -> reconcile -> enrich -> anomalies + quality -> KPIs + concentration
//
// Pure over its inputs: the same snapshot and config always give the same
// records, KPIs and aggregates. Only run_id / generated_at differ per run.

use crate::anomaly::AnomalyDetector;
use crate::concentration::{summarize_by_cost_center, ConcentrationReport};
use crate::config::{PipelineConfig, RunPaths};
use crate::data_quality::DataQualityEngine;
use crate::enrichment::RiskEnricher;
use crate::error::ReconResult;
use crate::kpi::compute_kpis;
use crate::loader::PortfolioSnapshot;
use crate::reconciliation::{ReconciliationEngine, ReconciliationSummary};
use crate::report::{publish_all, PublishedReport, ReportSet, ReportSink};
use crate::sink::{CsvReportSink, SqliteReportSink};
use chrono::Utc;

pub struct Pipeline {
    config: PipelineConfig,
}

impl Pipeline {
    pub fn new(config: PipelineConfig) -> ReconResult<Self> {
        config.validate()?;
        Ok(Pipeline { config })
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn run(&self, snapshot: &PortfolioSnapshot) -> ReconResult<ReportSet> {
        let reconciled = ReconciliationEngine::with_tolerance(self.config.tolerance)
            .reconcile(&snapshot.origination, &snapshot.accounting)?;
        let reconciliation = ReconciliationSummary::from_records(&reconciled, self.config.tolerance);

        let enricher = RiskEnricher {
            strict_risk_keys: self.config.strict_risk_keys,
        };
        let mut records = enricher.enrich(reconciled, &snapshot.risk)?;

        let anomaly = AnomalyDetector::with_quantile(self.config.anomaly_quantile).detect(&mut records)?;
        let quality = DataQualityEngine::new().check_batch(&records);

        let kpis = compute_kpis(&records, &quality);
        let summary = summarize_by_cost_center(&records);
        let concentration = ConcentrationReport::build(&records);

        Ok(ReportSet {
            run_id: uuid::Uuid::new_v4().to_string(),
            generated_at: Utc::now(),
            config: self.config.clone(),
            reconciliation,
            anomaly,
            records,
            summary,
            quality,
            kpis,
            concentration,
        })
    }

    /// Load from `paths.data_dir`, run, and publish to the output directory
    /// (plus the archive database when one is configured). Either every sink
    /// ends up with the new run or none does.
    pub fn run_and_publish(&self, paths: &RunPaths) -> ReconResult<(ReportSet, Vec<PublishedReport>)> {
        let snapshot = PortfolioSnapshot::load(&paths.data_dir)?;
        let reports = self.run(&snapshot)?;

        let mut sinks: Vec<Box<dyn ReportSink>> = vec![Box::new(CsvReportSink::new(&paths.output_dir))];
        if let Some(db) = &paths.archive_db {
            sinks.push(Box::new(SqliteReportSink::new(db)));
        }

        let published = publish_all(&sinks, &reports)?;
        Ok((reports, published))
    }
}
