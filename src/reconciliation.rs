// ⚖️ Reconciliation Engine - Origination vs accounting
//
// Full outer join on (LoanID, ClienteID). A missing side counts as zero:
//   difference     = approved_amount - ledger_balance
//   abs_difference = |difference|
//   mismatch       = abs_difference > tolerance   (strict)
//
// Zero-filling is what surfaces orphaned ledger entries and un-booked
// approvals as discrepancies, so it must not be replaced by a null.

use crate::config::{self, DEFAULT_TOLERANCE};
use crate::error::ReconResult;
use crate::records::{columns, Dataset, LedgerRecord, LoanRecord};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

// ============================================================================
// JOIN ORIGIN
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JoinOrigin {
    /// Approved but never booked in accounting
    OriginationOnly,
    /// Booked in accounting with no origination record
    AccountingOnly,
    Both,
}

impl JoinOrigin {
    pub fn as_str(&self) -> &'static str {
        match self {
            JoinOrigin::OriginationOnly => "origination_only",
            JoinOrigin::AccountingOnly => "accounting_only",
            JoinOrigin::Both => "both",
        }
    }
}

// ============================================================================
// RECONCILED RECORD
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReconciledRecord {
    pub loan_id: String,
    pub client_id: String,
    pub disbursement_date: Option<NaiveDate>,
    /// Zero when the origination side is missing or blank
    pub approved_amount: f64,
    pub ledger_date: Option<NaiveDate>,
    /// Zero when the accounting side is missing or blank
    pub ledger_balance: f64,
    pub join_origin: JoinOrigin,
    pub difference: f64,
    pub abs_difference: f64,
    pub mismatch: bool,
}

impl ReconciledRecord {
    fn from_sides(
        loan: Option<&LoanRecord>,
        ledger: Option<&LedgerRecord>,
        tolerance: f64,
    ) -> Self {
        let join_origin = match (loan, ledger) {
            (Some(_), Some(_)) => JoinOrigin::Both,
            (Some(_), None) => JoinOrigin::OriginationOnly,
            _ => JoinOrigin::AccountingOnly,
        };

        // Key columns come from whichever side exists; they are equal when both do.
        let (loan_id, client_id) = match (loan, ledger) {
            (Some(l), _) => (l.loan_id.clone(), l.client_id.clone()),
            (None, Some(g)) => (g.loan_id.clone(), g.client_id.clone()),
            (None, None) => (String::new(), String::new()),
        };

        let approved_amount = loan.and_then(|l| l.approved_amount).unwrap_or(0.0);
        let ledger_balance = ledger.and_then(|g| g.ledger_balance).unwrap_or(0.0);
        let difference = approved_amount - ledger_balance;
        let abs_difference = difference.abs();

        ReconciledRecord {
            loan_id,
            client_id,
            disbursement_date: loan.and_then(|l| l.disbursement_date),
            approved_amount,
            ledger_date: ledger.and_then(|g| g.ledger_date),
            ledger_balance,
            join_origin,
            difference,
            abs_difference,
            mismatch: abs_difference > tolerance,
        }
    }
}

// ============================================================================
// RECONCILIATION SUMMARY
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReconciliationSummary {
    pub rows: usize,
    pub matched_both: usize,
    pub origination_only: usize,
    pub accounting_only: usize,
    pub mismatches: usize,
    pub within_tolerance: usize,
    pub total_abs_difference: f64,
    pub tolerance: f64,
}

impl ReconciliationSummary {
    pub fn from_records(records: &[ReconciledRecord], tolerance: f64) -> Self {
        let mut summary = ReconciliationSummary {
            tolerance,
            ..Default::default()
        };

        for record in records {
            summary.rows += 1;
            match record.join_origin {
                JoinOrigin::Both => summary.matched_both += 1,
                JoinOrigin::OriginationOnly => summary.origination_only += 1,
                JoinOrigin::AccountingOnly => summary.accounting_only += 1,
            }
            if record.mismatch {
                summary.mismatches += 1;
            } else {
                summary.within_tolerance += 1;
            }
            summary.total_abs_difference += record.abs_difference;
        }

        summary
    }

    pub fn summary(&self) -> String {
        format!(
            "Reconciled {} rows ({} both, {} origination-only, {} accounting-only): {} mismatches above {:.2}, total |diff| {:.2}",
            self.rows,
            self.matched_both,
            self.origination_only,
            self.accounting_only,
            self.mismatches,
            self.tolerance,
            self.total_abs_difference
        )
    }
}

// ============================================================================
// RECONCILIATION ENGINE
// ============================================================================

pub struct ReconciliationEngine {
    /// Discrepancies at or below this absolute amount are ignored (default: 1000.0)
    pub tolerance: f64,
}

impl ReconciliationEngine {
    pub fn new() -> Self {
        ReconciliationEngine {
            tolerance: DEFAULT_TOLERANCE,
        }
    }

    pub fn with_tolerance(tolerance: f64) -> Self {
        ReconciliationEngine { tolerance }
    }

    /// Full outer join of origination and accounting on (LoanID, ClienteID).
    ///
    /// Rows sharing a key on both sides produce their cross product. Output
    /// order: origination rows in input order (each followed by its matches),
    /// then accounting rows that matched nothing, in input order.
    pub fn reconcile(
        &self,
        origination: &Dataset<LoanRecord>,
        accounting: &Dataset<LedgerRecord>,
    ) -> ReconResult<Vec<ReconciledRecord>> {
        config::validate_tolerance(self.tolerance)?;
        origination.require_columns(&[columns::LOAN_ID, columns::CLIENT_ID])?;
        accounting.require_columns(&[columns::LOAN_ID, columns::CLIENT_ID])?;

        let mut ledger_index: HashMap<(&str, &str), Vec<usize>> = HashMap::new();
        for (idx, ledger) in accounting.rows.iter().enumerate() {
            ledger_index
                .entry((ledger.loan_id.as_str(), ledger.client_id.as_str()))
                .or_default()
                .push(idx);
        }

        let mut ledger_matched = vec![false; accounting.rows.len()];
        let mut reconciled = Vec::with_capacity(origination.rows.len() + accounting.rows.len());

        for loan in &origination.rows {
            match ledger_index.get(&(loan.loan_id.as_str(), loan.client_id.as_str())) {
                Some(matches) => {
                    for &idx in matches {
                        ledger_matched[idx] = true;
                        reconciled.push(ReconciledRecord::from_sides(
                            Some(loan),
                            Some(&accounting.rows[idx]),
                            self.tolerance,
                        ));
                    }
                }
                None => {
                    reconciled.push(ReconciledRecord::from_sides(Some(loan), None, self.tolerance));
                }
            }
        }

        for (idx, ledger) in accounting.rows.iter().enumerate() {
            if !ledger_matched[idx] {
                reconciled.push(ReconciledRecord::from_sides(None, Some(ledger), self.tolerance));
            }
        }

        let summary = ReconciliationSummary::from_records(&reconciled, self.tolerance);
        log::info!("reconcile: {}", summary.summary());

        Ok(reconciled)
    }
}

impl Default for ReconciliationEngine {
    fn default() -> Self {
        Self::new()
    }
}

/// Reconcile origination against accounting with the given tolerance.
pub fn reconcile(
    origination: &Dataset<LoanRecord>,
    accounting: &Dataset<LedgerRecord>,
    tolerance: f64,
) -> ReconResult<Vec<ReconciledRecord>> {
    ReconciliationEngine::with_tolerance(tolerance).reconcile(origination, accounting)
}

// ============================================================================
// TESTS
// ============================================================================
