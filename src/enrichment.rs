// 🧮 Risk Enricher - Left join with risk parameters
//
// Every reconciled row survives. Rows without a risk record keep null risk
// fields. A LoanID repeated in the risk table fans out into one row per risk
// record; this is the defined behavior of the join, not a bug to guard
// against (strict mode is opt-in via `strict_risk_keys`).

use crate::error::{ReconResult, SchemaError};
use crate::reconciliation::ReconciledRecord;
use crate::records::{columns, Dataset, RiskRecord};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

// ============================================================================
// PD BUCKET
// ============================================================================

/// Probability-of-default band. Lowest band is closed at 0; the others are
/// open below and closed above; the top band is open-ended above 7%.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum PdBucket {
    #[serde(rename = "[0-1%]")]
    UpTo1,
    #[serde(rename = "(1-3%]")]
    From1To3,
    #[serde(rename = "(3-7%]")]
    From3To7,
    #[serde(rename = "(>7%)")]
    Above7,
}

impl PdBucket {
    pub const ALL: [PdBucket; 4] = [
        PdBucket::UpTo1,
        PdBucket::From1To3,
        PdBucket::From3To7,
        PdBucket::Above7,
    ];

    /// Bucket for an optional PD. A missing PD buckets as 0.
    /// PDs outside 0..=1 (or NaN) fall outside every band.
    pub fn from_pd(pd: Option<f64>) -> Option<PdBucket> {
        let pd = pd.unwrap_or(0.0);
        if pd.is_nan() || !(0.0..=1.0).contains(&pd) {
            None
        } else if pd <= 0.01 {
            Some(PdBucket::UpTo1)
        } else if pd <= 0.03 {
            Some(PdBucket::From1To3)
        } else if pd <= 0.07 {
            Some(PdBucket::From3To7)
        } else {
            Some(PdBucket::Above7)
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            PdBucket::UpTo1 => "[0-1%]",
            PdBucket::From1To3 => "(1-3%]",
            PdBucket::From3To7 => "(3-7%]",
            PdBucket::Above7 => "(>7%)",
        }
    }
}

impl std::fmt::Display for PdBucket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

// ============================================================================
// ENRICHED RECORD
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnrichedRecord {
    pub reconciled: ReconciledRecord,

    // Risk side (None when no risk row matched)
    pub pd: Option<f64>,
    pub lgd: Option<f64>,
    pub ead: Option<f64>,
    pub provision: Option<f64>,
    pub cost_center: Option<String>,
    pub risk_segment: Option<String>,

    // Derived
    pub pd_bucket: Option<PdBucket>,
    pub risk_mismatch_score: f64,
    /// Set by the anomaly detector; false until then
    pub anomaly: bool,
}

impl EnrichedRecord {
    pub fn new(reconciled: ReconciledRecord, risk: Option<&RiskRecord>) -> Self {
        let pd = risk.and_then(|r| r.pd);
        let lgd = risk.and_then(|r| r.lgd);
        let risk_mismatch_score = risk_mismatch_score(pd, lgd, reconciled.abs_difference);

        EnrichedRecord {
            pd,
            lgd,
            ead: risk.and_then(|r| r.ead),
            provision: risk.and_then(|r| r.provision),
            cost_center: risk.and_then(|r| r.cost_center.clone()),
            risk_segment: risk.and_then(|r| r.risk_segment.clone()),
            pd_bucket: PdBucket::from_pd(pd),
            risk_mismatch_score,
            anomaly: false,
            reconciled,
        }
    }

    pub fn loan_id(&self) -> &str {
        &self.reconciled.loan_id
    }

    pub fn abs_difference(&self) -> f64 {
        self.reconciled.abs_difference
    }

    pub fn mismatch(&self) -> bool {
        self.reconciled.mismatch
    }
}

/// PD x LGD x |difference|, with every missing operand counted as 0.
pub fn risk_mismatch_score(pd: Option<f64>, lgd: Option<f64>, abs_difference: f64) -> f64 {
    let abs_difference = if abs_difference.is_nan() { 0.0 } else { abs_difference };
    pd.unwrap_or(0.0) * lgd.unwrap_or(0.0) * abs_difference
}

// ============================================================================
// RISK ENRICHER
// ============================================================================

pub struct RiskEnricher {
    /// Reject repeated LoanIDs in the risk table instead of fanning out
    pub strict_risk_keys: bool,
}

impl RiskEnricher {
    pub fn new() -> Self {
        RiskEnricher {
            strict_risk_keys: false,
        }
    }

    pub fn strict() -> Self {
        RiskEnricher {
            strict_risk_keys: true,
        }
    }

    pub fn enrich(
        &self,
        reconciled: Vec<ReconciledRecord>,
        risk: &Dataset<RiskRecord>,
    ) -> ReconResult<Vec<EnrichedRecord>> {
        risk.require_columns(&[columns::LOAN_ID])?;

        let mut risk_index: HashMap<&str, Vec<&RiskRecord>> = HashMap::new();
        for record in &risk.rows {
            risk_index.entry(record.loan_id.as_str()).or_default().push(record);
        }

        let repeated: Vec<(&str, usize)> = risk_index
            .iter()
            .filter(|(_, rows)| rows.len() > 1)
            .map(|(loan_id, rows)| (*loan_id, rows.len()))
            .collect();

        if !repeated.is_empty() {
            if self.strict_risk_keys {
                let (loan_id, rows) = repeated
                    .iter()
                    .min_by_key(|(loan_id, _)| *loan_id)
                    .copied()
                    .unwrap_or(repeated[0]);
                return Err(SchemaError::DuplicateRiskKey {
                    loan_id: loan_id.to_string(),
                    rows,
                }
                .into());
            }
            log::warn!(
                "enrich: {} LoanIDs have more than one risk row; matching rows fan out",
                repeated.len()
            );
        }

        let mut enriched = Vec::with_capacity(reconciled.len());
        let mut unmatched = 0usize;

        for record in reconciled {
            match risk_index.get(record.loan_id.as_str()) {
                Some(matches) => {
                    for risk_record in matches {
                        enriched.push(EnrichedRecord::new(record.clone(), Some(risk_record)));
                    }
                }
                None => {
                    unmatched += 1;
                    enriched.push(EnrichedRecord::new(record, None));
                }
            }
        }

        log::info!(
            "enrich: {} rows after risk join ({} without risk data)",
            enriched.len(),
            unmatched
        );

        Ok(enriched)
    }
}

impl Default for RiskEnricher {
    fn default() -> Self {
        Self::new()
    }
}

/// Left join reconciled rows with the risk table on LoanID (fan-out on repeats).
pub fn enrich(
    reconciled: Vec<ReconciledRecord>,
    risk: &Dataset<RiskRecord>,
) -> ReconResult<Vec<EnrichedRecord>> {
    RiskEnricher::new().enrich(reconciled, risk)
}

// ============================================================================
// TESTS
// ============================================================================
