// ✅ Data Quality Engine - per-row issue flags
//
// Seven independent checks, evaluated for every enriched row (no dedup by
// LoanID). `any_issue` is the OR of all of them. Flags are flat on purpose:
// downstream consumers filter on them; nothing here weights or ranks them.

use crate::enrichment::EnrichedRecord;
use serde::{Deserialize, Serialize};

// ============================================================================
// QUALITY CHECK
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QualityCheck {
    MissingPd,
    MissingLgd,
    MissingEad,
    NegativeLedgerBalance,
    NegativeApprovedAmount,
    InconsistentProvision,
    MissingCostCenter,
}

impl QualityCheck {
    pub const ALL: [QualityCheck; 7] = [
        QualityCheck::MissingPd,
        QualityCheck::MissingLgd,
        QualityCheck::MissingEad,
        QualityCheck::NegativeLedgerBalance,
        QualityCheck::NegativeApprovedAmount,
        QualityCheck::InconsistentProvision,
        QualityCheck::MissingCostCenter,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            QualityCheck::MissingPd => "missing_PD",
            QualityCheck::MissingLgd => "missing_LGD",
            QualityCheck::MissingEad => "missing_EAD",
            QualityCheck::NegativeLedgerBalance => "negative_saldo",
            QualityCheck::NegativeApprovedAmount => "negative_importe_aprobado",
            QualityCheck::InconsistentProvision => "inconsistent_provision",
            QualityCheck::MissingCostCenter => "missing_centro_costo",
        }
    }

    pub fn field(&self) -> &'static str {
        match self {
            QualityCheck::MissingPd => "PD",
            QualityCheck::MissingLgd => "LGD",
            QualityCheck::MissingEad => "EAD",
            QualityCheck::NegativeLedgerBalance => "SaldoContable",
            QualityCheck::NegativeApprovedAmount => "ImporteAprobado",
            QualityCheck::InconsistentProvision => "Provision",
            QualityCheck::MissingCostCenter => "CentroCosto",
        }
    }

    /// True when the record fails this check.
    pub fn fails(&self, record: &EnrichedRecord) -> bool {
        match self {
            QualityCheck::MissingPd => is_null(record.pd),
            QualityCheck::MissingLgd => is_null(record.lgd),
            QualityCheck::MissingEad => is_null(record.ead),
            QualityCheck::NegativeLedgerBalance => record.reconciled.ledger_balance < 0.0,
            QualityCheck::NegativeApprovedAmount => record.reconciled.approved_amount < 0.0,
            QualityCheck::InconsistentProvision => match record.provision {
                Some(p) if !p.is_nan() => p < 0.0,
                _ => true,
            },
            QualityCheck::MissingCostCenter => record.cost_center.is_none(),
        }
    }
}

fn is_null(value: Option<f64>) -> bool {
    value.map_or(true, |v| v.is_nan())
}

// ============================================================================
// QUALITY RECORD
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QualityRecord {
    pub loan_id: String,
    pub missing_pd: bool,
    pub missing_lgd: bool,
    pub missing_ead: bool,
    pub negative_ledger_balance: bool,
    pub negative_approved_amount: bool,
    pub inconsistent_provision: bool,
    pub missing_cost_center: bool,
    pub any_issue: bool,
}

impl QualityRecord {
    pub fn flag(&self, check: QualityCheck) -> bool {
        match check {
            QualityCheck::MissingPd => self.missing_pd,
            QualityCheck::MissingLgd => self.missing_lgd,
            QualityCheck::MissingEad => self.missing_ead,
            QualityCheck::NegativeLedgerBalance => self.negative_ledger_balance,
            QualityCheck::NegativeApprovedAmount => self.negative_approved_amount,
            QualityCheck::InconsistentProvision => self.inconsistent_provision,
            QualityCheck::MissingCostCenter => self.missing_cost_center,
        }
    }

    /// Checks this row failed, in check order
    pub fn issues(&self) -> Vec<QualityCheck> {
        QualityCheck::ALL
            .iter()
            .copied()
            .filter(|c| self.flag(*c))
            .collect()
    }
}

// ============================================================================
// DATA QUALITY ENGINE
// ============================================================================

pub struct DataQualityEngine;

impl DataQualityEngine {
    pub fn new() -> Self {
        DataQualityEngine
    }

    pub fn check(&self, record: &EnrichedRecord) -> QualityRecord {
        let missing_pd = QualityCheck::MissingPd.fails(record);
        let missing_lgd = QualityCheck::MissingLgd.fails(record);
        let missing_ead = QualityCheck::MissingEad.fails(record);
        let negative_ledger_balance = QualityCheck::NegativeLedgerBalance.fails(record);
        let negative_approved_amount = QualityCheck::NegativeApprovedAmount.fails(record);
        let inconsistent_provision = QualityCheck::InconsistentProvision.fails(record);
        let missing_cost_center = QualityCheck::MissingCostCenter.fails(record);

        QualityRecord {
            loan_id: record.loan_id().to_string(),
            missing_pd,
            missing_lgd,
            missing_ead,
            negative_ledger_balance,
            negative_approved_amount,
            inconsistent_provision,
            missing_cost_center,
            any_issue: missing_pd
                || missing_lgd
                || missing_ead
                || negative_ledger_balance
                || negative_approved_amount
                || inconsistent_provision
                || missing_cost_center,
        }
    }

    /// One quality record per input row, same order
    pub fn check_batch(&self, records: &[EnrichedRecord]) -> Vec<QualityRecord> {
        let report: Vec<QualityRecord> = records.iter().map(|r| self.check(r)).collect();
        let summary = self.batch_summary(&report);
        log::info!("quality: {}", summary.summary());
        report
    }

    pub fn batch_summary(&self, report: &[QualityRecord]) -> QualitySummary {
        let mut summary = QualitySummary {
            total_rows: report.len(),
            ..Default::default()
        };

        for record in report {
            if record.any_issue {
                summary.rows_with_issues += 1;
            }
            for check in record.issues() {
                match check {
                    QualityCheck::MissingPd => summary.missing_pd += 1,
                    QualityCheck::MissingLgd => summary.missing_lgd += 1,
                    QualityCheck::MissingEad => summary.missing_ead += 1,
                    QualityCheck::NegativeLedgerBalance => summary.negative_ledger_balance += 1,
                    QualityCheck::NegativeApprovedAmount => summary.negative_approved_amount += 1,
                    QualityCheck::InconsistentProvision => summary.inconsistent_provision += 1,
                    QualityCheck::MissingCostCenter => summary.missing_cost_center += 1,
                }
            }
        }

        summary
    }
}

impl Default for DataQualityEngine {
    fn default() -> Self {
        Self::new()
    }
}

/// Run every quality check over every row.
pub fn check_quality(records: &[EnrichedRecord]) -> Vec<QualityRecord> {
    DataQualityEngine::new().check_batch(records)
}

// ============================================================================
// QUALITY SUMMARY
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QualitySummary {
    pub total_rows: usize,
    pub rows_with_issues: usize,
    pub missing_pd: usize,
    pub missing_lgd: usize,
    pub missing_ead: usize,
    pub negative_ledger_balance: usize,
    pub negative_approved_amount: usize,
    pub inconsistent_provision: usize,
    pub missing_cost_center: usize,
}

impl QualitySummary {
    pub fn summary(&self) -> String {
        format!(
            "{} rows, {} with issues | PD {}, LGD {}, EAD {}, saldo<0 {}, aprobado<0 {}, provision {}, centro {}",
            self.total_rows,
            self.rows_with_issues,
            self.missing_pd,
            self.missing_lgd,
            self.missing_ead,
            self.negative_ledger_balance,
            self.negative_approved_amount,
            self.inconsistent_provision,
            self.missing_cost_center
        )
    }
}

// ============================================================================
// TESTS
// ============================================================================
