// Loan Reconciliation - Core Library
// Origination vs accounting reconciliation, risk enrichment and portfolio reports.
// Exposes all modules for use in the CLI, the read API server, and tests.

pub mod error;
pub mod config;
pub mod records;
pub mod loader;
pub mod reconciliation;
pub mod enrichment;
pub mod anomaly;
pub mod data_quality;
pub mod kpi;
pub mod concentration;
pub mod report;
pub mod pipeline;
pub mod sink;
#[cfg(feature = "charts")]
pub mod charts;

// Re-export commonly used types
pub use error::{ReconError, ReconResult, SchemaError};
pub use config::{PipelineConfig, RunPaths, DEFAULT_ANOMALY_QUANTILE, DEFAULT_TOLERANCE};
pub use records::{Dataset, LedgerRecord, LoanRecord, RiskRecord};
pub use loader::{parse_date, read_accounting, read_origination, read_risk, PortfolioSnapshot};
pub use reconciliation::{reconcile, JoinOrigin, ReconciledRecord, ReconciliationEngine, ReconciliationSummary};
pub use enrichment::{enrich, risk_mismatch_score, EnrichedRecord, PdBucket, RiskEnricher};
pub use anomaly::{detect_anomalies, quantile_linear, AnomalyDetector, AnomalyOutcome};
pub use data_quality::{check_quality, DataQualityEngine, QualityCheck, QualityRecord, QualitySummary};
pub use kpi::{compute_kpis, KpiSet};
pub use concentration::{
    aggregate, summarize_by_cost_center, ConcentrationAccumulator, ConcentrationAggregate,
    ConcentrationReport, Dimension, GroupKey, SummaryMetrics,
};
pub use report::{
    publish_all, ConcentrationRow, DetailRow, PublishedReport, QualityRow, ReportSet, ReportSink, StagedReport,
    SummaryRow,
};
pub use pipeline::Pipeline;
pub use sink::{CsvReportSink, SqliteReportSink};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
