// 📊 Portfolio KPIs
//
// total_loans is a DISTINCT count of non-blank LoanIDs; every other counter
// and sum is row-level, so risk fan-out inflates the numerators but not the
// denominator. Rows with a blank LoanID still count toward the row-level sums.

use crate::data_quality::QualityRecord;
use crate::enrichment::EnrichedRecord;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct KpiSet {
    pub total_loans: u64,
    pub num_mismatches: u64,
    pub pct_mismatches: f64,
    pub num_anomalies: u64,
    pub total_approved: f64,
    pub total_ledger: f64,
    pub total_abs_difference: f64,
    pub num_quality_issues: u64,
    pub pct_quality_issues: f64,
}

impl KpiSet {
    /// Flat key -> value view, in field declaration order.
    pub fn to_key_values(&self) -> Vec<(&'static str, f64)> {
        vec![
            ("total_loans", self.total_loans as f64),
            ("num_mismatches", self.num_mismatches as f64),
            ("pct_mismatches", self.pct_mismatches),
            ("num_anomalies", self.num_anomalies as f64),
            ("total_approved", self.total_approved),
            ("total_ledger", self.total_ledger),
            ("total_abs_difference", self.total_abs_difference),
            ("num_quality_issues", self.num_quality_issues as f64),
            ("pct_quality_issues", self.pct_quality_issues),
        ]
    }

    /// Rebuild from a flat map (e.g. rows read back from the archive).
    /// Absent keys default to zero.
    pub fn from_key_values(values: &BTreeMap<String, f64>) -> Self {
        let get = |key: &str| values.get(key).copied().unwrap_or(0.0);
        KpiSet {
            total_loans: get("total_loans") as u64,
            num_mismatches: get("num_mismatches") as u64,
            pct_mismatches: get("pct_mismatches"),
            num_anomalies: get("num_anomalies") as u64,
            total_approved: get("total_approved"),
            total_ledger: get("total_ledger"),
            total_abs_difference: get("total_abs_difference"),
            num_quality_issues: get("num_quality_issues") as u64,
            pct_quality_issues: get("pct_quality_issues"),
        }
    }

    pub fn summary(&self) -> String {
        format!(
            "{} loans | {} mismatches ({:.1}%) | {} anomalies | {} quality issues ({:.1}%) | total |diff| {:.2}",
            self.total_loans,
            self.num_mismatches,
            self.pct_mismatches * 100.0,
            self.num_anomalies,
            self.num_quality_issues,
            self.pct_quality_issues * 100.0,
            self.total_abs_difference
        )
    }
}

/// `numerator / total_loans`, or 0.0 when there are no loans.
fn guarded_ratio(numerator: u64, total_loans: u64) -> f64 {
    if total_loans == 0 {
        0.0
    } else {
        numerator as f64 / total_loans as f64
    }
}

pub fn compute_kpis(enriched: &[EnrichedRecord], quality: &[QualityRecord]) -> KpiSet {
    let total_loans = enriched
        .iter()
        .map(|r| r.loan_id())
        .filter(|id| !id.is_empty())
        .collect::<HashSet<&str>>()
        .len() as u64;

    let num_mismatches = enriched.iter().filter(|r| r.mismatch()).count() as u64;
    let num_anomalies = enriched.iter().filter(|r| r.anomaly).count() as u64;
    let num_quality_issues = quality.iter().filter(|q| q.any_issue).count() as u64;

    let total_approved: f64 = enriched.iter().map(|r| r.reconciled.approved_amount).sum();
    let total_ledger: f64 = enriched.iter().map(|r| r.reconciled.ledger_balance).sum();
    let total_abs_difference: f64 = enriched.iter().map(|r| r.abs_difference()).sum();

    let kpis = KpiSet {
        total_loans,
        num_mismatches,
        pct_mismatches: guarded_ratio(num_mismatches, total_loans),
        num_anomalies,
        total_approved,
        total_ledger,
        total_abs_difference,
        num_quality_issues,
        pct_quality_issues: guarded_ratio(num_quality_issues, total_loans),
    };

    log::info!("kpis: {}", kpis.summary());
    kpis
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data_quality::check_quality;
    use crate::enrichment::enrich;
    use crate::reconciliation::reconcile;
    use crate::records::{Dataset, LedgerRecord, LoanRecord, RiskRecord};

    #[test]
    fn test_empty_portfolio_is_all_zero() {
        let kpis = compute_kpis(&[], &[]);
        assert_eq!(kpis, KpiSet::default());
        assert_eq!(kpis.pct_mismatches, 0.0);
        assert_eq!(kpis.pct_quality_issues, 0.0);
    }

    #[test]
    fn test_fan_out_counts_loans_once_and_rows_separately() {
        let orig = Dataset::new(vec![
            LoanRecord::new("L1", "C1", Some(1_000.0)),
            LoanRecord::new("L2", "C2", Some(9_000.0)),
        ]);
        let acct = Dataset::new(vec![
            LedgerRecord::new("L1", "C1", Some(1_000.0)),
            LedgerRecord::new("L2", "C2", Some(2_000.0)),
        ]);
        let risk = Dataset::new(vec![
            RiskRecord::new("L2").with_cost_center("A"),
            RiskRecord::new("L2").with_cost_center("B"),
        ]);

        let reconciled = reconcile(&orig, &acct, 1000.0).unwrap();
        let enriched = enrich(reconciled, &risk).unwrap();
        let quality = check_quality(&enriched);
        let kpis = compute_kpis(&enriched, &quality);

        assert_eq!(enriched.len(), 3);
        assert_eq!(kpis.total_loans, 2);
        assert_eq!(kpis.num_mismatches, 2);
        assert_eq!(kpis.pct_mismatches, 1.0);
        assert_eq!(kpis.total_approved, 19_000.0);
        assert_eq!(kpis.total_ledger, 5_000.0);
        assert_eq!(kpis.total_abs_difference, 14_000.0);
        // every row misses PD/LGD/EAD
        assert_eq!(kpis.num_quality_issues, 3);
        assert_eq!(kpis.pct_quality_issues, 1.5);
    }

    #[test]
    fn test_blank_loan_ids_are_not_a_loan() {
        let orig = Dataset::new(vec![
            LoanRecord::new("L1", "C1", Some(5_000.0)),
            LoanRecord::new("", "C2", Some(7_000.0)),
            LoanRecord::new("", "C3", Some(9_000.0)),
        ]);
        let acct = Dataset::new(vec![]);
        let reconciled = reconcile(&orig, &acct, 1000.0).unwrap();
        let enriched = enrich(reconciled, &Dataset::new(vec![])).unwrap();
        let kpis = compute_kpis(&enriched, &check_quality(&enriched));

        assert_eq!(kpis.total_loans, 1);
        assert_eq!(kpis.num_mismatches, 3);
        assert_eq!(kpis.total_approved, 21_000.0);
    }

    #[test]
    fn test_key_values_round_trip() {
        let kpis = KpiSet {
            total_loans: 10,
            num_mismatches: 3,
            pct_mismatches: 0.3,
            num_anomalies: 1,
            total_approved: 100.0,
            total_ledger: 90.0,
            total_abs_difference: 12.5,
            num_quality_issues: 2,
            pct_quality_issues: 0.2,
        };

        let flat: BTreeMap<String, f64> = kpis
            .to_key_values()
            .into_iter()
            .map(|(k, v)| (k.to_string(), v))
            .collect();

        assert_eq!(flat.len(), 9);
        assert_eq!(KpiSet::from_key_values(&flat), kpis);
    }
}
