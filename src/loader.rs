// 📂 Dataset Loader - CSV files -> typed datasets
//
// Reads originacion.csv, contabilidad.csv and riesgo.csv. Columns are located
// by header (canonical name or an accepted alias), so column order in the file
// does not matter. A missing required column aborts the load with a
// SchemaError before any row is parsed.

use crate::error::{ReconError, ReconResult, SchemaError};
use crate::records::{columns, Dataset, LedgerRecord, LoanRecord, RiskRecord, Tabular};
use chrono::{NaiveDate, NaiveDateTime};
use csv::{ReaderBuilder, StringRecord};
use std::io::Read;
use std::path::Path;

pub const ORIGINATION_FILE: &str = "originacion.csv";
pub const ACCOUNTING_FILE: &str = "contabilidad.csv";
pub const RISK_FILE: &str = "riesgo.csv";

// ============================================================================
// COLUMN SPECS
// ============================================================================

/// A required column and the header spellings accepted for it.
struct ColumnSpec {
    canonical: &'static str,
    aliases: &'static [&'static str],
}

const ORIGINATION_COLUMNS: &[ColumnSpec] = &[
    ColumnSpec { canonical: columns::LOAN_ID, aliases: &["LoanId", "loan_id"] },
    ColumnSpec { canonical: columns::CLIENT_ID, aliases: &["ClientID", "client_id"] },
    ColumnSpec { canonical: columns::APPROVED_AMOUNT, aliases: &["ApprovedAmount", "approved_amount"] },
    ColumnSpec { canonical: columns::DISBURSEMENT_DATE, aliases: &["DisbursementDate", "disbursement_date"] },
];

const ACCOUNTING_COLUMNS: &[ColumnSpec] = &[
    ColumnSpec { canonical: columns::LOAN_ID, aliases: &["LoanId", "loan_id"] },
    ColumnSpec { canonical: columns::CLIENT_ID, aliases: &["ClientID", "client_id"] },
    ColumnSpec { canonical: columns::LEDGER_BALANCE, aliases: &["LedgerBalance", "ledger_balance"] },
    ColumnSpec { canonical: columns::LEDGER_DATE, aliases: &["Date", "LedgerDate", "ledger_date"] },
];

const RISK_COLUMNS: &[ColumnSpec] = &[
    ColumnSpec { canonical: columns::LOAN_ID, aliases: &["LoanId", "loan_id"] },
    ColumnSpec { canonical: columns::PD, aliases: &["ProbabilityOfDefault", "pd"] },
    ColumnSpec { canonical: columns::LGD, aliases: &["LossGivenDefault", "lgd"] },
    ColumnSpec { canonical: columns::EAD, aliases: &["ExposureAtDefault", "ead"] },
    ColumnSpec { canonical: columns::PROVISION, aliases: &["provision"] },
    ColumnSpec { canonical: columns::COST_CENTER, aliases: &["CostCenter", "cost_center"] },
    ColumnSpec { canonical: columns::RISK_SEGMENT, aliases: &["AssignedRiskSegment", "RiskSegment", "risk_segment"] },
];

/// Resolved header: canonical column list + index of each required column
struct HeaderMap {
    columns: Vec<String>,
    indices: Vec<usize>,
}

fn resolve_headers(
    dataset: &str,
    headers: &StringRecord,
    specs: &[ColumnSpec],
) -> Result<HeaderMap, SchemaError> {
    let mut indices = Vec::with_capacity(specs.len());
    let mut columns: Vec<String> = headers.iter().map(|h| h.trim().to_string()).collect();

    for wanted in specs {
        let position = columns.iter().position(|h| {
            h == wanted.canonical || wanted.aliases.iter().any(|alias| h == alias)
        });
        match position {
            Some(idx) => {
                columns[idx] = wanted.canonical.to_string();
                indices.push(idx);
            }
            None => {
                return Err(SchemaError::MissingColumn {
                    dataset: dataset.to_string(),
                    column: wanted.canonical.to_string(),
                })
            }
        }
    }

    Ok(HeaderMap { columns, indices })
}

// ============================================================================
// CELL PARSING
// ============================================================================

/// Parsing context for one data line
struct Cells<'a> {
    dataset: &'static str,
    line: usize,
    record: &'a StringRecord,
    header: &'a HeaderMap,
}

impl<'a> Cells<'a> {
    fn raw(&self, slot: usize) -> &'a str {
        self.record.get(self.header.indices[slot]).unwrap_or("").trim()
    }

    fn invalid(&self, slot: usize, value: &str) -> ReconError {
        ReconError::InvalidValue {
            dataset: self.dataset.to_string(),
            line: self.line,
            column: self.header.columns[self.header.indices[slot]].clone(),
            value: value.to_string(),
        }
    }

    fn text(&self, slot: usize) -> Option<String> {
        let value = self.raw(slot);
        if value.is_empty() {
            None
        } else {
            Some(value.to_string())
        }
    }

    /// Key columns are always present as strings; blank keys stay blank.
    fn key(&self, slot: usize) -> String {
        self.raw(slot).to_string()
    }

    fn number(&self, slot: usize) -> ReconResult<Option<f64>> {
        let value = self.raw(slot);
        if value.is_empty() || value.eq_ignore_ascii_case("nan") {
            return Ok(None);
        }
        value
            .parse::<f64>()
            .map(Some)
            .map_err(|_| self.invalid(slot, value))
    }

    fn date(&self, slot: usize) -> ReconResult<Option<NaiveDate>> {
        let value = self.raw(slot);
        if value.is_empty() {
            return Ok(None);
        }
        parse_date(value)
            .map(Some)
            .ok_or_else(|| self.invalid(slot, value))
    }
}

/// Accepts YYYY-MM-DD, MM/DD/YYYY and ISO datetimes (date part kept).
pub fn parse_date(value: &str) -> Option<NaiveDate> {
    if let Ok(date) = NaiveDate::parse_from_str(value, "%Y-%m-%d") {
        return Some(date);
    }
    if let Ok(date) = NaiveDate::parse_from_str(value, "%m/%d/%Y") {
        return Some(date);
    }
    for format in ["%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M:%S"] {
        if let Ok(datetime) = NaiveDateTime::parse_from_str(value, format) {
            return Some(datetime.date());
        }
    }
    None
}

// ============================================================================
// READERS
// ============================================================================

fn read_dataset<T, R, F>(reader: R, specs: &[ColumnSpec], parse_row: F) -> ReconResult<Dataset<T>>
where
    T: Tabular,
    R: Read,
    F: Fn(&Cells) -> ReconResult<T>,
{
    let mut rdr = ReaderBuilder::new()
        .has_headers(true)
        .trim(csv::Trim::Headers)
        .from_reader(reader);

    let headers = rdr.headers()?.clone();
    let header = resolve_headers(T::DATASET, &headers, specs)?;

    let mut rows = Vec::new();
    for (idx, result) in rdr.records().enumerate() {
        let record = result?;
        let cells = Cells {
            dataset: T::DATASET,
            line: idx + 2, // 1-indexed + header row
            record: &record,
            header: &header,
        };
        rows.push(parse_row(&cells)?);
    }

    Ok(Dataset::with_columns(header.columns, rows))
}

pub fn read_origination<R: Read>(reader: R) -> ReconResult<Dataset<LoanRecord>> {
    read_dataset(reader, ORIGINATION_COLUMNS, |c| {
        Ok(LoanRecord {
            loan_id: c.key(0),
            client_id: c.key(1),
            approved_amount: c.number(2)?,
            disbursement_date: c.date(3)?,
        })
    })
}

pub fn read_accounting<R: Read>(reader: R) -> ReconResult<Dataset<LedgerRecord>> {
    read_dataset(reader, ACCOUNTING_COLUMNS, |c| {
        Ok(LedgerRecord {
            loan_id: c.key(0),
            client_id: c.key(1),
            ledger_balance: c.number(2)?,
            ledger_date: c.date(3)?,
        })
    })
}

pub fn read_risk<R: Read>(reader: R) -> ReconResult<Dataset<RiskRecord>> {
    read_dataset(reader, RISK_COLUMNS, |c| {
        Ok(RiskRecord {
            loan_id: c.key(0),
            pd: c.number(1)?,
            lgd: c.number(2)?,
            ead: c.number(3)?,
            provision: c.number(4)?,
            cost_center: c.text(5),
            risk_segment: c.text(6),
        })
    })
}

fn open(path: &Path) -> ReconResult<std::fs::File> {
    std::fs::File::open(path).map_err(|e| {
        ReconError::Other(anyhow::anyhow!("Failed to open {}: {}", path.display(), e))
    })
}

// ============================================================================
// PORTFOLIO SNAPSHOT
// ============================================================================

/// The three input tables for one run.
#[derive(Debug, Clone)]
pub struct PortfolioSnapshot {
    pub origination: Dataset<LoanRecord>,
    pub accounting: Dataset<LedgerRecord>,
    pub risk: Dataset<RiskRecord>,
}

impl PortfolioSnapshot {
    pub fn new(
        origination: Vec<LoanRecord>,
        accounting: Vec<LedgerRecord>,
        risk: Vec<RiskRecord>,
    ) -> Self {
        PortfolioSnapshot {
            origination: Dataset::new(origination),
            accounting: Dataset::new(accounting),
            risk: Dataset::new(risk),
        }
    }

    /// Load the three CSVs from `data_dir`.
    pub fn load(data_dir: &Path) -> ReconResult<Self> {
        let origination = read_origination(open(&data_dir.join(ORIGINATION_FILE))?)?;
        let accounting = read_accounting(open(&data_dir.join(ACCOUNTING_FILE))?)?;
        let risk = read_risk(open(&data_dir.join(RISK_FILE))?)?;

        log::info!(
            "loaded {} origination, {} accounting, {} risk rows from {}",
            origination.len(),
            accounting.len(),
            risk.len(),
            data_dir.display()
        );

        Ok(PortfolioSnapshot {
            origination,
            accounting,
            risk,
        })
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_read_origination_spanish_headers() {
        let csv = "LoanID,ClienteID,ImporteAprobado,FechaDesembolso\n\
                   L1,C1,10000.50,2024-03-15\n\
                   L2,C2,,03/20/2024\n";

        let dataset = read_origination(csv.as_bytes()).unwrap();

        assert_eq!(dataset.len(), 2);
        assert_eq!(dataset.rows[0].approved_amount, Some(10_000.5));
        assert_eq!(
            dataset.rows[0].disbursement_date,
            NaiveDate::from_ymd_opt(2024, 3, 15)
        );
        assert_eq!(dataset.rows[1].approved_amount, None);
        assert_eq!(
            dataset.rows[1].disbursement_date,
            NaiveDate::from_ymd_opt(2024, 3, 20)
        );
    }

    #[test]
    fn test_read_accounting_english_aliases_any_order() {
        let csv = "Date,LedgerBalance,ClienteID,LoanID,Extra\n\
                   2024-01-31 00:00:00,-250,C9,L9,x\n";

        let dataset = read_accounting(csv.as_bytes()).unwrap();

        assert!(dataset.has_column("SaldoContable"));
        assert!(dataset.has_column("Fecha"));
        assert!(dataset.has_column("Extra"));
        assert_eq!(dataset.rows[0].loan_id, "L9");
        assert_eq!(dataset.rows[0].ledger_balance, Some(-250.0));
        assert_eq!(dataset.rows[0].ledger_date, NaiveDate::from_ymd_opt(2024, 1, 31));
    }

    #[test]
    fn test_read_risk_nullable_fields() {
        let csv = "LoanID,PD,LGD,EAD,Provision,CentroCosto,RiesgoAsignado\n\
                   L1,0.05,0.45,10000,120,CC-01,Alto\n\
                   L2,,NaN,,,,\n";

        let dataset = read_risk(csv.as_bytes()).unwrap();

        assert_eq!(dataset.rows[0].pd, Some(0.05));
        assert_eq!(dataset.rows[0].cost_center.as_deref(), Some("CC-01"));
        assert_eq!(dataset.rows[0].risk_segment.as_deref(), Some("Alto"));
        assert_eq!(dataset.rows[1].pd, None);
        assert_eq!(dataset.rows[1].lgd, None);
        assert_eq!(dataset.rows[1].cost_center, None);
    }

    #[test]
    fn test_missing_column_is_schema_error() {
        let csv = "LoanID,ImporteAprobado,FechaDesembolso\nL1,100,2024-01-01\n";

        let err = read_origination(csv.as_bytes()).unwrap_err();

        assert!(matches!(
            err,
            ReconError::Schema(SchemaError::MissingColumn { ref dataset, ref column })
                if dataset == "origination" && column == "ClienteID"
        ));
    }

    #[test]
    fn test_bad_number_reports_line_and_column() {
        let csv = "LoanID,ClienteID,SaldoContable,Fecha\nL1,C1,12x,2024-01-01\n";

        let err = read_accounting(csv.as_bytes()).unwrap_err();

        match err {
            ReconError::InvalidValue { line, column, value, .. } => {
                assert_eq!(line, 2);
                assert_eq!(column, "SaldoContable");
                assert_eq!(value, "12x");
            }
            other => panic!("unexpected error: {}", other),
        }
    }

    #[test]
    fn test_load_snapshot_from_directory() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join(ORIGINATION_FILE),
            "LoanID,ClienteID,ImporteAprobado,FechaDesembolso\nL1,C1,100,2024-01-01\n",
        )
        .unwrap();
        std::fs::write(
            dir.path().join(ACCOUNTING_FILE),
            "LoanID,ClienteID,SaldoContable,Fecha\nL1,C1,100,2024-01-31\n",
        )
        .unwrap();
        std::fs::write(
            dir.path().join(RISK_FILE),
            "LoanID,PD,LGD,EAD,Provision,CentroCosto,RiesgoAsignado\nL1,0.01,0.4,100,1,CC,Bajo\n",
        )
        .unwrap();

        let snapshot = PortfolioSnapshot::load(dir.path()).unwrap();

        assert_eq!(snapshot.origination.len(), 1);
        assert_eq!(snapshot.accounting.len(), 1);
        assert_eq!(snapshot.risk.len(), 1);
    }

    #[test]
    fn test_missing_file_fails() {
        let dir = tempfile::tempdir().unwrap();
        assert!(PortfolioSnapshot::load(dir.path()).is_err());
    }
}
