// 📄 Portfolio records - the three input tables
//
// Origination, accounting and risk rows as typed values. A `Dataset` keeps the
// column names alongside the rows so the join steps can enforce schema
// requirements regardless of who supplied the data.

use crate::error::SchemaError;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

// ============================================================================
// COLUMN NAMES
// ============================================================================

pub mod columns {
    pub const LOAN_ID: &str = "LoanID";
    pub const CLIENT_ID: &str = "ClienteID";
    pub const APPROVED_AMOUNT: &str = "ImporteAprobado";
    pub const DISBURSEMENT_DATE: &str = "FechaDesembolso";
    pub const LEDGER_BALANCE: &str = "SaldoContable";
    pub const LEDGER_DATE: &str = "Fecha";
    pub const PD: &str = "PD";
    pub const LGD: &str = "LGD";
    pub const EAD: &str = "EAD";
    pub const PROVISION: &str = "Provision";
    pub const COST_CENTER: &str = "CentroCosto";
    pub const RISK_SEGMENT: &str = "RiesgoAsignado";
}

/// A table type with a fixed set of canonical columns.
pub trait Tabular {
    const DATASET: &'static str;
    const COLUMNS: &'static [&'static str];
}

// ============================================================================
// ORIGINATION
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoanRecord {
    pub loan_id: String,
    pub client_id: String,
    pub approved_amount: Option<f64>,
    pub disbursement_date: Option<NaiveDate>,
}

impl LoanRecord {
    pub fn new(loan_id: &str, client_id: &str, approved_amount: Option<f64>) -> Self {
        LoanRecord {
            loan_id: loan_id.to_string(),
            client_id: client_id.to_string(),
            approved_amount,
            disbursement_date: None,
        }
    }

    pub fn with_disbursement_date(mut self, date: NaiveDate) -> Self {
        self.disbursement_date = Some(date);
        self
    }
}

impl Tabular for LoanRecord {
    const DATASET: &'static str = "origination";
    const COLUMNS: &'static [&'static str] = &[
        columns::LOAN_ID,
        columns::CLIENT_ID,
        columns::APPROVED_AMOUNT,
        columns::DISBURSEMENT_DATE,
    ];
}

// ============================================================================
// ACCOUNTING
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerRecord {
    pub loan_id: String,
    pub client_id: String,
    pub ledger_balance: Option<f64>,
    pub ledger_date: Option<NaiveDate>,
}

impl LedgerRecord {
    pub fn new(loan_id: &str, client_id: &str, ledger_balance: Option<f64>) -> Self {
        LedgerRecord {
            loan_id: loan_id.to_string(),
            client_id: client_id.to_string(),
            ledger_balance,
            ledger_date: None,
        }
    }

    pub fn with_ledger_date(mut self, date: NaiveDate) -> Self {
        self.ledger_date = Some(date);
        self
    }
}

impl Tabular for LedgerRecord {
    const DATASET: &'static str = "accounting";
    const COLUMNS: &'static [&'static str] = &[
        columns::LOAN_ID,
        columns::CLIENT_ID,
        columns::LEDGER_BALANCE,
        columns::LEDGER_DATE,
    ];
}

// ============================================================================
// RISK
// ============================================================================

/// Risk parameters per loan. PD/LGD/EAD/Provision arrive precomputed.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RiskRecord {
    pub loan_id: String,
    pub pd: Option<f64>,
    pub lgd: Option<f64>,
    pub ead: Option<f64>,
    pub provision: Option<f64>,
    pub cost_center: Option<String>,
    pub risk_segment: Option<String>,
}

impl RiskRecord {
    pub fn new(loan_id: &str) -> Self {
        RiskRecord {
            loan_id: loan_id.to_string(),
            ..Default::default()
        }
    }

    pub fn with_pd(mut self, pd: f64) -> Self {
        self.pd = Some(pd);
        self
    }

    pub fn with_lgd(mut self, lgd: f64) -> Self {
        self.lgd = Some(lgd);
        self
    }

    pub fn with_ead(mut self, ead: f64) -> Self {
        self.ead = Some(ead);
        self
    }

    pub fn with_provision(mut self, provision: f64) -> Self {
        self.provision = Some(provision);
        self
    }

    pub fn with_cost_center(mut self, cost_center: &str) -> Self {
        self.cost_center = Some(cost_center.to_string());
        self
    }

    pub fn with_risk_segment(mut self, segment: &str) -> Self {
        self.risk_segment = Some(segment.to_string());
        self
    }
}

impl Tabular for RiskRecord {
    const DATASET: &'static str = "risk";
    const COLUMNS: &'static [&'static str] = &[
        columns::LOAN_ID,
        columns::PD,
        columns::LGD,
        columns::EAD,
        columns::PROVISION,
        columns::COST_CENTER,
        columns::RISK_SEGMENT,
    ];
}

// ============================================================================
// DATASET
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
pub struct Dataset<T> {
    pub name: String,
    pub columns: Vec<String>,
    pub rows: Vec<T>,
}

impl<T: Tabular> Dataset<T> {
    /// Build a dataset carrying the full canonical schema of `T`.
    pub fn new(rows: Vec<T>) -> Self {
        Dataset {
            name: T::DATASET.to_string(),
            columns: T::COLUMNS.iter().map(|c| c.to_string()).collect(),
            rows,
        }
    }

    /// Build a dataset with an explicit column list (as found in a file header).
    pub fn with_columns(columns: Vec<String>, rows: Vec<T>) -> Self {
        Dataset {
            name: T::DATASET.to_string(),
            columns,
            rows,
        }
    }
}

impl<T> Dataset<T> {
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn has_column(&self, column: &str) -> bool {
        self.columns.iter().any(|c| c == column)
    }

    /// Fail with the first required column that is not present.
    pub fn require_columns(&self, required: &[&str]) -> Result<(), SchemaError> {
        match required.iter().find(|c| !self.has_column(c)) {
            Some(missing) => Err(SchemaError::MissingColumn {
                dataset: self.name.clone(),
                column: missing.to_string(),
            }),
            None => Ok(()),
        }
    }
}
