// 🗄️ SQLite Report Sink - run archive (WAL mode, one transaction per run)
//
// Staging opens the transaction and writes the run; commit ends it. A run
// reverted after its commit is deleted again.
//
// Every published run is a row in `runs`; the other tables hang off run_id.
// The read helpers below back the HTTP read API.

use crate::concentration::Dimension;
use crate::error::ReconResult;
use crate::kpi::KpiSet;
use crate::report::{
    ConcentrationRow, DetailRow, PublishedReport, QualityRow, ReportSet, ReportSink, StagedReport, SummaryRow,
};
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

pub const TABLES: [&str; 6] = [
    "runs",
    "loan_details",
    "quality_flags",
    "kpis",
    "summary_metrics",
    "concentration",
];

/// Open (or create) the archive and make sure the schema exists
pub fn open_archive(path: &Path) -> ReconResult<Connection> {
    let conn = Connection::open(path)?;
    setup_archive(&conn)?;
    Ok(conn)
}

pub fn setup_archive(conn: &Connection) -> ReconResult<()> {
    // Enable WAL mode for crash recovery
    conn.pragma_update(None, "journal_mode", "WAL")?;

    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS runs (
            run_id TEXT PRIMARY KEY,
            generated_at TEXT NOT NULL,
            tolerance REAL NOT NULL,
            anomaly_quantile REAL NOT NULL,
            strict_risk_keys INTEGER NOT NULL,
            anomaly_threshold REAL,
            num_records INTEGER NOT NULL,
            config TEXT NOT NULL,
            created_at DATETIME DEFAULT CURRENT_TIMESTAMP
        );

        CREATE TABLE IF NOT EXISTS loan_details (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            run_id TEXT NOT NULL REFERENCES runs(run_id),
            position INTEGER NOT NULL,
            loan_id TEXT NOT NULL,
            client_id TEXT NOT NULL,
            abs_difference REAL NOT NULL,
            mismatch INTEGER NOT NULL,
            anomaly INTEGER NOT NULL,
            cost_center TEXT,
            data TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS quality_flags (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            run_id TEXT NOT NULL REFERENCES runs(run_id),
            position INTEGER NOT NULL,
            loan_id TEXT NOT NULL,
            missing_pd INTEGER NOT NULL,
            missing_lgd INTEGER NOT NULL,
            missing_ead INTEGER NOT NULL,
            negative_saldo INTEGER NOT NULL,
            negative_importe_aprobado INTEGER NOT NULL,
            inconsistent_provision INTEGER NOT NULL,
            missing_centro_costo INTEGER NOT NULL,
            any_quality_issue INTEGER NOT NULL
        );

        CREATE TABLE IF NOT EXISTS kpis (
            run_id TEXT NOT NULL REFERENCES runs(run_id),
            key TEXT NOT NULL,
            value REAL NOT NULL,
            PRIMARY KEY (run_id, key)
        );

        CREATE TABLE IF NOT EXISTS summary_metrics (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            run_id TEXT NOT NULL REFERENCES runs(run_id),
            cost_center TEXT,
            mismatch INTEGER NOT NULL,
            num_loans INTEGER NOT NULL,
            total_approved REAL NOT NULL,
            total_ledger REAL NOT NULL,
            total_abs_difference REAL NOT NULL
        );

        CREATE TABLE IF NOT EXISTS concentration (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            run_id TEXT NOT NULL REFERENCES runs(run_id),
            dimension TEXT NOT NULL,
            value TEXT,
            mismatch INTEGER NOT NULL,
            num_loans INTEGER NOT NULL,
            total_abs_diff REAL NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_loan_details_run_loan ON loan_details(run_id, loan_id);
        CREATE INDEX IF NOT EXISTS idx_concentration_run_dim ON concentration(run_id, dimension);",
    )?;

    Ok(())
}

// ============================================================================
// SINK
// ============================================================================

pub struct SqliteReportSink {
    db_path: PathBuf,
}

impl SqliteReportSink {
    pub fn new(db_path: impl Into<PathBuf>) -> Self {
        SqliteReportSink {
            db_path: db_path.into(),
        }
    }

    /// Insert one run in its own transaction.
    pub fn insert_run(conn: &mut Connection, reports: &ReportSet) -> ReconResult<()> {
        let tx = conn.transaction()?;
        write_run(&tx, reports)?;
        tx.commit()?;
        Ok(())
    }
}

/// Every row of one run. The caller owns the transaction.
fn write_run(tx: &Connection, reports: &ReportSet) -> ReconResult<()> {
    let run_id = reports.run_id.as_str();

    tx.execute(
        "INSERT INTO runs (run_id, generated_at, tolerance, anomaly_quantile, strict_risk_keys,
                           anomaly_threshold, num_records, config)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        params![
            run_id,
            reports.generated_at.to_rfc3339(),
            reports.config.tolerance,
            reports.config.anomaly_quantile,
            reports.config.strict_risk_keys,
            reports.anomaly.threshold,
            reports.records.len() as i64,
            serde_json::to_string(&reports.config)?,
        ],
    )?;

    {
        let mut stmt = tx.prepare(
            "INSERT INTO loan_details (run_id, position, loan_id, client_id, abs_difference,
                                       mismatch, anomaly, cost_center, data)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
        )?;
        for (position, row) in reports.detail_rows().iter().enumerate() {
            stmt.execute(params![
                run_id,
                position as i64,
                row.loan_id,
                row.client_id,
                row.abs_difference,
                row.mismatch,
                row.anomaly,
                row.cost_center,
                serde_json::to_string(row)?,
            ])?;
        }

        let mut stmt = tx.prepare(
            "INSERT INTO quality_flags (run_id, position, loan_id, missing_pd, missing_lgd, missing_ead,
                                        negative_saldo, negative_importe_aprobado, inconsistent_provision,
                                        missing_centro_costo, any_quality_issue)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
        )?;
        for (position, q) in reports.quality_rows().iter().enumerate() {
            stmt.execute(params![
                run_id,
                position as i64,
                q.loan_id,
                q.missing_pd,
                q.missing_lgd,
                q.missing_ead,
                q.negative_saldo,
                q.negative_importe_aprobado,
                q.inconsistent_provision,
                q.missing_centro_costo,
                q.any_quality_issue,
            ])?;
        }

        let mut stmt = tx.prepare("INSERT INTO kpis (run_id, key, value) VALUES (?1, ?2, ?3)")?;
        for (key, value) in reports.kpis.to_key_values() {
            stmt.execute(params![run_id, key, value])?;
        }

        let mut stmt = tx.prepare(
            "INSERT INTO summary_metrics (run_id, cost_center, mismatch, num_loans,
                                          total_approved, total_ledger, total_abs_difference)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        )?;
        for s in reports.summary_rows() {
            stmt.execute(params![
                run_id,
                s.cost_center,
                s.mismatch,
                s.num_loans as i64,
                s.total_approved,
                s.total_ledger,
                s.total_abs_difference,
            ])?;
        }

        let mut stmt = tx.prepare(
            "INSERT INTO concentration (run_id, dimension, value, mismatch, num_loans, total_abs_diff)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        )?;
        for dimension in Dimension::ALL {
            for c in reports.concentration_rows(dimension) {
                stmt.execute(params![
                    run_id,
                    dimension.as_str(),
                    c.value,
                    c.mismatch,
                    c.num_loans as i64,
                    c.total_abs_diff,
                ])?;
            }
        }
    }

    Ok(())
}

/// Drop every row of one run, children first.
pub fn delete_run(conn: &Connection, run_id: &str) -> ReconResult<()> {
    for table in TABLES.iter().rev() {
        conn.execute(&format!("DELETE FROM {} WHERE run_id = ?1", table), params![run_id])?;
    }
    Ok(())
}

/// One run written inside an open transaction.
pub struct StagedArchiveRun {
    conn: Connection,
    db_path: PathBuf,
    run_id: String,
    committed: bool,
}

impl StagedReport for StagedArchiveRun {
    fn commit(&mut self) -> ReconResult<()> {
        if !self.committed {
            self.conn.execute_batch("COMMIT")?;
            self.committed = true;
            log::info!("archived run {}", self.run_id);
        }
        Ok(())
    }

    fn revert(&mut self) -> ReconResult<()> {
        if !self.committed {
            return Ok(());
        }
        let tx = self.conn.transaction()?;
        delete_run(&tx, &self.run_id)?;
        tx.commit()?;
        self.committed = false;
        log::warn!("run {} removed from archive {}", self.run_id, self.db_path.display());
        Ok(())
    }

    fn finish(self: Box<Self>) -> PublishedReport {
        PublishedReport {
            location: self.db_path.display().to_string(),
            artifacts: TABLES.iter().map(|t| t.to_string()).collect(),
        }
    }
}

impl Drop for StagedArchiveRun {
    fn drop(&mut self) {
        if !self.committed && !self.conn.is_autocommit() {
            if let Err(e) = self.conn.execute_batch("ROLLBACK") {
                log::warn!("rollback of run {} failed: {}", self.run_id, e);
            }
        }
    }
}

impl ReportSink for SqliteReportSink {
    fn stage(&self, reports: &ReportSet) -> ReconResult<Box<dyn StagedReport>> {
        let conn = open_archive(&self.db_path)?;
        conn.execute_batch("BEGIN IMMEDIATE")?;

        let staged = StagedArchiveRun {
            conn,
            db_path: self.db_path.clone(),
            run_id: reports.run_id.clone(),
            committed: false,
        };
        // on error `staged` drops and rolls the transaction back
        write_run(&staged.conn, reports)?;
        log::debug!("staged run {} ({} records)", reports.run_id, reports.records.len());

        Ok(Box::new(staged))
    }

    fn name(&self) -> &str {
        "sqlite"
    }
}

// ============================================================================
// READ HELPERS
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunRecord {
    pub run_id: String,
    pub generated_at: String,
    pub tolerance: f64,
    pub anomaly_quantile: f64,
    pub strict_risk_keys: bool,
    pub anomaly_threshold: Option<f64>,
    pub num_records: i64,
}

/// Most recently generated run, if any
pub fn latest_run_id(conn: &Connection) -> ReconResult<Option<String>> {
    let run_id = conn
        .query_row(
            "SELECT run_id FROM runs ORDER BY generated_at DESC, rowid DESC LIMIT 1",
            [],
            |row| row.get(0),
        )
        .optional()?;
    Ok(run_id)
}

/// All runs, newest first
pub fn list_runs(conn: &Connection) -> ReconResult<Vec<RunRecord>> {
    let mut stmt = conn.prepare(
        "SELECT run_id, generated_at, tolerance, anomaly_quantile, strict_risk_keys,
                anomaly_threshold, num_records
         FROM runs
         ORDER BY generated_at DESC, rowid DESC",
    )?;

    let runs = stmt
        .query_map([], |row| {
            Ok(RunRecord {
                run_id: row.get(0)?,
                generated_at: row.get(1)?,
                tolerance: row.get(2)?,
                anomaly_quantile: row.get(3)?,
                strict_risk_keys: row.get(4)?,
                anomaly_threshold: row.get(5)?,
                num_records: row.get(6)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;

    Ok(runs)
}

pub fn load_kpis(conn: &Connection, run_id: &str) -> ReconResult<KpiSet> {
    let mut stmt = conn.prepare("SELECT key, value FROM kpis WHERE run_id = ?1")?;
    let values = stmt
        .query_map(params![run_id], |row| Ok((row.get::<_, String>(0)?, row.get::<_, f64>(1)?)))?
        .collect::<Result<BTreeMap<_, _>, _>>()?;
    Ok(KpiSet::from_key_values(&values))
}

pub fn load_summary(conn: &Connection, run_id: &str) -> ReconResult<Vec<SummaryRow>> {
    let mut stmt = conn.prepare(
        "SELECT cost_center, mismatch, num_loans, total_approved, total_ledger, total_abs_difference
         FROM summary_metrics WHERE run_id = ?1 ORDER BY id",
    )?;
    let rows = stmt
        .query_map(params![run_id], |row| {
            Ok(SummaryRow {
                cost_center: row.get(0)?,
                mismatch: row.get(1)?,
                num_loans: row.get::<_, i64>(2)? as usize,
                total_approved: row.get(3)?,
                total_ledger: row.get(4)?,
                total_abs_difference: row.get(5)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

pub fn load_concentration(conn: &Connection, run_id: &str, dimension: Dimension) -> ReconResult<Vec<ConcentrationRow>> {
    let mut stmt = conn.prepare(
        "SELECT value, mismatch, num_loans, total_abs_diff
         FROM concentration WHERE run_id = ?1 AND dimension = ?2 ORDER BY id",
    )?;
    let rows = stmt
        .query_map(params![run_id, dimension.as_str()], |row| {
            Ok(ConcentrationRow {
                value: row.get(0)?,
                mismatch: row.get(1)?,
                num_loans: row.get::<_, i64>(2)? as usize,
                total_abs_diff: row.get(3)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// Every detail row for a LoanID (several when the risk join fanned out)
pub fn load_loan_details(conn: &Connection, run_id: &str, loan_id: &str) -> ReconResult<Vec<DetailRow>> {
    let mut stmt = conn.prepare(
        "SELECT data FROM loan_details WHERE run_id = ?1 AND loan_id = ?2 ORDER BY position",
    )?;
    let raw = stmt
        .query_map(params![run_id, loan_id], |row| row.get::<_, String>(0))?
        .collect::<Result<Vec<_>, _>>()?;

    let mut rows = Vec::with_capacity(raw.len());
    for json in raw {
        rows.push(serde_json::from_str(&json)?);
    }
    Ok(rows)
}

pub fn load_quality(conn: &Connection, run_id: &str) -> ReconResult<Vec<QualityRow>> {
    let mut stmt = conn.prepare(
        "SELECT loan_id, missing_pd, missing_lgd, missing_ead, negative_saldo, negative_importe_aprobado,
                inconsistent_provision, missing_centro_costo, any_quality_issue
         FROM quality_flags WHERE run_id = ?1 ORDER BY position",
    )?;
    let rows = stmt
        .query_map(params![run_id], |row| {
            Ok(QualityRow {
                loan_id: row.get(0)?,
                missing_pd: row.get(1)?,
                missing_lgd: row.get(2)?,
                missing_ead: row.get(3)?,
                negative_saldo: row.get(4)?,
                negative_importe_aprobado: row.get(5)?,
                inconsistent_provision: row.get(6)?,
                missing_centro_costo: row.get(7)?,
                any_quality_issue: row.get(8)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}
