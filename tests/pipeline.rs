//! End-to-end runs: CSV inputs on disk -> pipeline -> published reports.

use loan_reconciliation::sink::csv_sink::{Manifest, DETAIL_FILE, KPI_JSON_FILE};
use loan_reconciliation::sink::sqlite::{latest_run_id, list_runs, load_kpis, load_loan_details, open_archive};
use loan_reconciliation::{
    publish_all, CsvReportSink, Dimension, KpiSet, LedgerRecord, LoanRecord, PdBucket, Pipeline, PipelineConfig,
    PortfolioSnapshot, PublishedReport, ReconError, ReconResult, ReportSet, ReportSink, RiskRecord, RunPaths,
    SchemaError, SqliteReportSink, StagedReport,
};
use std::fs;
use std::path::Path;
use tempfile::TempDir;

// ── fixtures ─────────────────────────────────────────────────────────────────

const ORIGINATION: &str = "\
LoanID,ClienteID,ImporteAprobado,FechaDesembolso
L1,C1,10000,2024-01-15
L2,C2,5000,2024-02-01
L3,C3,2500,02/20/2024
";

const ACCOUNTING: &str = "\
LoanID,ClienteID,SaldoContable,Fecha
L2,C2,5000,2024-03-31
L3,C3,2400,2024-03-31
L4,C4,800,2024-03-31
";

const RISK: &str = "\
LoanID,PD,LGD,EAD,Provision,CentroCosto,RiesgoAsignado
L1,0.05,0.45,10000,225,CC-01,Alto
L2,0.01,0.40,5000,20,CC-02,Bajo
L2,0.01,0.40,5000,20,CC-03,Bajo
L3,,0.40,2500,,CC-01,Medio
";

fn write_inputs(dir: &Path, origination: &str, accounting: &str, risk: &str) {
    fs::create_dir_all(dir).unwrap();
    fs::write(dir.join("originacion.csv"), origination).unwrap();
    fs::write(dir.join("contabilidad.csv"), accounting).unwrap();
    fs::write(dir.join("riesgo.csv"), risk).unwrap();
}

fn default_pipeline() -> Pipeline {
    Pipeline::new(PipelineConfig::default()).unwrap()
}

// ── scenarios ────────────────────────────────────────────────────────────────

#[test]
fn origination_only_loan_is_a_mismatch_against_zero() {
    let snapshot = PortfolioSnapshot::new(
        vec![LoanRecord::new("L1", "C1", Some(10_000.0))],
        vec![],
        vec![],
    );
    let reports = default_pipeline().run(&snapshot).unwrap();

    let l1 = &reports.records[0].reconciled;
    assert_eq!(l1.ledger_balance, 0.0);
    assert_eq!(l1.difference, 10_000.0);
    assert_eq!(l1.abs_difference, 10_000.0);
    assert!(l1.mismatch);
}

#[test]
fn risk_fan_out_duplicates_rows_but_not_loans() {
    let tmp = TempDir::new().unwrap();
    write_inputs(tmp.path(), ORIGINATION, ACCOUNTING, RISK);
    let snapshot = PortfolioSnapshot::load(tmp.path()).unwrap();
    let reports = default_pipeline().run(&snapshot).unwrap();

    let l2_rows = reports.records.iter().filter(|r| r.loan_id() == "L2").count();
    assert_eq!(l2_rows, 2);
    // L1, L2, L3, L4
    assert_eq!(reports.kpis.total_loans, 4);
    assert_eq!(reports.records.len(), 5);
}

#[test]
fn pd_buckets_follow_thresholds() {
    let tmp = TempDir::new().unwrap();
    write_inputs(tmp.path(), ORIGINATION, ACCOUNTING, RISK);
    let snapshot = PortfolioSnapshot::load(tmp.path()).unwrap();
    let reports = default_pipeline().run(&snapshot).unwrap();

    let bucket_of = |id: &str| reports.records.iter().find(|r| r.loan_id() == id).unwrap().pd_bucket;
    assert_eq!(bucket_of("L1"), Some(PdBucket::From3To7));
    // PD blank -> treated as 0
    assert_eq!(bucket_of("L3"), Some(PdBucket::UpTo1));
}

#[test]
fn one_percent_tail_flags_exactly_the_maximum() {
    let loans: Vec<LoanRecord> = (1..=100)
        .map(|i| LoanRecord::new(&format!("L{i}"), "C", Some(i as f64 * 10.0)))
        .collect();
    let snapshot = PortfolioSnapshot::new(loans, vec![], vec![]);

    let reports = default_pipeline().run(&snapshot).unwrap();

    let flagged: Vec<&str> = reports.records.iter().filter(|r| r.anomaly).map(|r| r.loan_id()).collect();
    assert_eq!(flagged, vec!["L100"]);
    assert_eq!(reports.kpis.num_anomalies, 1);
}

#[test]
fn every_loan_from_either_side_is_reported() {
    let tmp = TempDir::new().unwrap();
    write_inputs(tmp.path(), ORIGINATION, ACCOUNTING, RISK);
    let snapshot = PortfolioSnapshot::load(tmp.path()).unwrap();
    let reports = default_pipeline().run(&snapshot).unwrap();

    for id in ["L1", "L2", "L3", "L4"] {
        assert!(reports.records.iter().any(|r| r.loan_id() == id), "{id} missing");
    }
    // L3: 2500 vs 2400 is within the default tolerance
    let l3 = reports.records.iter().find(|r| r.loan_id() == "L3").unwrap();
    assert!(!l3.mismatch());
}

#[test]
fn empty_portfolio_has_zero_percentages() {
    let snapshot = PortfolioSnapshot::new(vec![], vec![], vec![]);
    let reports = default_pipeline().run(&snapshot).unwrap();

    assert_eq!(reports.kpis, KpiSet::default());
    assert_eq!(reports.anomaly.threshold, None);
    assert!(reports.concentration.table(Dimension::CostCenter).is_empty());
}

// ── determinism ──────────────────────────────────────────────────────────────

#[test]
fn rerun_on_same_inputs_is_identical() {
    let tmp = TempDir::new().unwrap();
    write_inputs(tmp.path(), ORIGINATION, ACCOUNTING, RISK);
    let snapshot = PortfolioSnapshot::load(tmp.path()).unwrap();

    let a = default_pipeline().run(&snapshot).unwrap();
    let b = default_pipeline().run(&snapshot).unwrap();

    assert_ne!(a.run_id, b.run_id);
    assert_eq!(a.kpis, b.kpis);
    assert_eq!(a.records, b.records);
    assert_eq!(a.summary, b.summary);
    assert_eq!(a.concentration, b.concentration);
    assert_eq!(a.quality, b.quality);
}

// ── failures ─────────────────────────────────────────────────────────────────

#[test]
fn missing_column_publishes_nothing() {
    let tmp = TempDir::new().unwrap();
    let data = tmp.path().join("data");
    let out = tmp.path().join("reports");
    write_inputs(&data, ORIGINATION, "LoanID,SaldoContable\nL2,5000\n", RISK);

    let err = default_pipeline().run_and_publish(&RunPaths::new(&data, &out)).unwrap_err();

    assert!(matches!(
        err,
        ReconError::Schema(SchemaError::MissingColumn { ref column, .. }) if column == "ClienteID"
    ));
    assert!(!out.exists());
}

#[test]
fn strict_risk_keys_rejects_fan_out() {
    let tmp = TempDir::new().unwrap();
    write_inputs(tmp.path(), ORIGINATION, ACCOUNTING, RISK);
    let snapshot = PortfolioSnapshot::load(tmp.path()).unwrap();

    let config = PipelineConfig {
        strict_risk_keys: true,
        ..Default::default()
    };
    let err = Pipeline::new(config).unwrap().run(&snapshot).unwrap_err();
    assert!(matches!(
        err,
        ReconError::Schema(SchemaError::DuplicateRiskKey { ref loan_id, .. }) if loan_id == "L2"
    ));
}

// ── publishing ───────────────────────────────────────────────────────────────

#[test]
fn run_and_publish_writes_reports_and_archive() {
    let tmp = TempDir::new().unwrap();
    let data = tmp.path().join("data");
    let out = tmp.path().join("reports");
    let db = tmp.path().join("recon.db");
    write_inputs(&data, ORIGINATION, ACCOUNTING, RISK);

    let paths = RunPaths::new(&data, &out).with_archive(&db);
    let (reports, published) = default_pipeline().run_and_publish(&paths).unwrap();
    assert_eq!(published.len(), 2);

    // CSV side
    let detail = fs::read_to_string(out.join(DETAIL_FILE)).unwrap();
    assert_eq!(detail.lines().count(), reports.records.len() + 1);
    let kpis: KpiSet = serde_json::from_str(&fs::read_to_string(out.join(KPI_JSON_FILE)).unwrap()).unwrap();
    assert_eq!(kpis, reports.kpis);
    assert!(Manifest::read(&out).unwrap().verify(&out).unwrap().is_empty());

    // archive side
    let conn = open_archive(&db).unwrap();
    let run_id = latest_run_id(&conn).unwrap().unwrap();
    assert_eq!(run_id, reports.run_id);
    assert_eq!(load_kpis(&conn, &run_id).unwrap(), reports.kpis);
    assert_eq!(load_loan_details(&conn, &run_id, "L2").unwrap().len(), 2);
}

#[test]
fn snapshot_built_in_memory_matches_loaded_one() {
    let tmp = TempDir::new().unwrap();
    write_inputs(tmp.path(), ORIGINATION, ACCOUNTING, RISK);
    let loaded = PortfolioSnapshot::load(tmp.path()).unwrap();

    let built = PortfolioSnapshot::new(
        loaded.origination.rows.clone(),
        loaded.accounting.rows.clone(),
        vec![
            RiskRecord::new("L1").with_pd(0.05).with_lgd(0.45).with_ead(10_000.0).with_provision(225.0)
                .with_cost_center("CC-01").with_risk_segment("Alto"),
            RiskRecord::new("L2").with_pd(0.01).with_lgd(0.40).with_ead(5_000.0).with_provision(20.0)
                .with_cost_center("CC-02").with_risk_segment("Bajo"),
            RiskRecord::new("L2").with_pd(0.01).with_lgd(0.40).with_ead(5_000.0).with_provision(20.0)
                .with_cost_center("CC-03").with_risk_segment("Bajo"),
            RiskRecord::new("L3").with_lgd(0.40).with_ead(2_500.0)
                .with_cost_center("CC-01").with_risk_segment("Medio"),
        ],
    );

    let a = default_pipeline().run(&loaded).unwrap();
    let b = default_pipeline().run(&built).unwrap();
    assert_eq!(a.kpis, b.kpis);
    assert_eq!(a.concentration, b.concentration);

    // sanity on an extra ledger-only row
    assert!(built.accounting.rows.contains(&LedgerRecord::new("L4", "C4", Some(800.0))
        .with_ledger_date(chrono::NaiveDate::from_ymd_opt(2024, 3, 31).unwrap())));
}

// ── all-or-nothing publishing ────────────────────────────────────────────────

fn entries(dir: &Path) -> Vec<String> {
    let mut names: Vec<String> = fs::read_dir(dir)
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    names.sort();
    names
}

#[test]
fn unopenable_archive_publishes_no_reports() {
    let tmp = TempDir::new().unwrap();
    let data = tmp.path().join("data");
    let out = tmp.path().join("reports");
    let db = tmp.path().join("no-such-dir").join("recon.db");
    write_inputs(&data, ORIGINATION, ACCOUNTING, RISK);

    let paths = RunPaths::new(&data, &out).with_archive(&db);
    let err = default_pipeline().run_and_publish(&paths).unwrap_err();

    assert!(matches!(err, ReconError::Database(_)));
    assert!(!out.exists());
    assert_eq!(entries(tmp.path()), vec!["data"]);
}

#[test]
fn unopenable_archive_keeps_previous_reports() {
    let tmp = TempDir::new().unwrap();
    let data = tmp.path().join("data");
    let out = tmp.path().join("reports");
    write_inputs(&data, ORIGINATION, ACCOUNTING, RISK);

    let (first, _) = default_pipeline().run_and_publish(&RunPaths::new(&data, &out)).unwrap();

    let db = tmp.path().join("no-such-dir").join("recon.db");
    let paths = RunPaths::new(&data, &out).with_archive(&db);
    assert!(default_pipeline().run_and_publish(&paths).is_err());

    let manifest = Manifest::read(&out).unwrap();
    assert_eq!(manifest.run_id, first.run_id);
    assert!(manifest.verify(&out).unwrap().is_empty());
    assert_eq!(entries(tmp.path()), vec!["data", "reports"]);
}

/// Stages fine, refuses to commit
struct RefusingSink;

struct RefusedStage;

impl StagedReport for RefusedStage {
    fn commit(&mut self) -> ReconResult<()> {
        Err(std::io::Error::new(std::io::ErrorKind::Other, "disk full").into())
    }

    fn revert(&mut self) -> ReconResult<()> {
        Ok(())
    }

    fn finish(self: Box<Self>) -> PublishedReport {
        unreachable!("never committed")
    }
}

impl ReportSink for RefusingSink {
    fn stage(&self, _reports: &ReportSet) -> ReconResult<Box<dyn StagedReport>> {
        Ok(Box::new(RefusedStage))
    }

    fn name(&self) -> &str {
        "refusing"
    }
}

#[test]
fn late_commit_failure_reverts_earlier_sinks() {
    let tmp = TempDir::new().unwrap();
    let data = tmp.path().join("data");
    let out = tmp.path().join("reports");
    let db = tmp.path().join("recon.db");
    write_inputs(&data, ORIGINATION, ACCOUNTING, RISK);

    let paths = RunPaths::new(&data, &out).with_archive(&db);
    let (first, _) = default_pipeline().run_and_publish(&paths).unwrap();

    let snapshot = PortfolioSnapshot::load(&data).unwrap();
    let second = default_pipeline().run(&snapshot).unwrap();
    let sinks: Vec<Box<dyn ReportSink>> = vec![
        Box::new(CsvReportSink::new(&out)),
        Box::new(SqliteReportSink::new(&db)),
        Box::new(RefusingSink),
    ];

    let err = publish_all(&sinks, &second).unwrap_err();
    assert!(matches!(err, ReconError::Io(_)));

    // report directory is back to the first run, nothing parked beside it
    assert_eq!(Manifest::read(&out).unwrap().run_id, first.run_id);
    assert!(entries(tmp.path()).iter().all(|name| !name.starts_with(".reports.")));

    // and the archive never kept the second run
    let conn = open_archive(&db).unwrap();
    let runs = list_runs(&conn).unwrap();
    assert_eq!(runs.len(), 1);
    assert_eq!(runs[0].run_id, first.run_id);
}
