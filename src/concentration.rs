// 🧭 Concentration analysis - where the discrepancies cluster
//
// Groups enriched rows by (dimension value, mismatch). A missing dimension
// value is a group of its own (`GroupKey::Missing`), never dropped and never
// merged into another value. Groups come out ordered by value with the
// missing group last, then `mismatch = false` before `true`.

use crate::enrichment::{EnrichedRecord, PdBucket};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

// ============================================================================
// DIMENSIONS + GROUP KEYS
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Dimension {
    CostCenter,
    RiskSegment,
    PdBucket,
}

impl Dimension {
    pub const ALL: [Dimension; 3] = [
        Dimension::CostCenter,
        Dimension::RiskSegment,
        Dimension::PdBucket,
    ];

    /// Column header used in the concentration tables
    pub fn column(&self) -> &'static str {
        match self {
            Dimension::CostCenter => "CentroCosto",
            Dimension::RiskSegment => "RiesgoAsignado",
            Dimension::PdBucket => "PD_bucket",
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Dimension::CostCenter => "cost_center",
            Dimension::RiskSegment => "risk_segment",
            Dimension::PdBucket => "pd_bucket",
        }
    }

    pub fn parse(value: &str) -> Option<Dimension> {
        match value.to_lowercase().replace('-', "_").as_str() {
            "cost_center" | "center" | "centrocosto" => Some(Dimension::CostCenter),
            "risk_segment" | "segment" | "riesgoasignado" => Some(Dimension::RiskSegment),
            "pd_bucket" | "pd" => Some(Dimension::PdBucket),
            _ => None,
        }
    }

    pub fn key_of(&self, record: &EnrichedRecord) -> GroupKey {
        match self {
            Dimension::CostCenter => GroupKey::from_label(record.cost_center.as_deref()),
            Dimension::RiskSegment => GroupKey::from_label(record.risk_segment.as_deref()),
            Dimension::PdBucket => match record.pd_bucket {
                Some(bucket) => GroupKey::Bucket(bucket),
                None => GroupKey::Missing,
            },
        }
    }
}

/// Grouping key with an explicit variant for missing values.
/// Derived ordering puts `Missing` after every present value.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum GroupKey {
    Label(String),
    Bucket(PdBucket),
    Missing,
}

impl GroupKey {
    pub fn from_label(value: Option<&str>) -> GroupKey {
        match value {
            Some(v) => GroupKey::Label(v.to_string()),
            None => GroupKey::Missing,
        }
    }

    /// Display value; None for the missing group
    pub fn value(&self) -> Option<String> {
        match self {
            GroupKey::Label(v) => Some(v.clone()),
            GroupKey::Bucket(b) => Some(b.label().to_string()),
            GroupKey::Missing => None,
        }
    }

    pub fn display(&self) -> String {
        self.value().unwrap_or_else(|| "(missing)".to_string())
    }

    pub fn is_missing(&self) -> bool {
        matches!(self, GroupKey::Missing)
    }
}

// ============================================================================
// CONCENTRATION AGGREGATE
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConcentrationAggregate {
    pub dimension: Dimension,
    pub key: GroupKey,
    pub mismatch: bool,
    pub num_loans: usize,
    pub total_abs_diff: f64,
}

/// Partial (count, sum) per group. Merging is a plain add, so partitions
/// can be aggregated independently as long as every row lands in exactly one.
#[derive(Debug, Clone, PartialEq)]
pub struct ConcentrationAccumulator {
    dimension: Dimension,
    groups: BTreeMap<(GroupKey, bool), (usize, f64)>,
}

impl ConcentrationAccumulator {
    pub fn new(dimension: Dimension) -> Self {
        ConcentrationAccumulator {
            dimension,
            groups: BTreeMap::new(),
        }
    }

    pub fn add(&mut self, record: &EnrichedRecord) {
        let key = (self.dimension.key_of(record), record.mismatch());
        let entry = self.groups.entry(key).or_insert((0, 0.0));
        entry.0 += 1;
        entry.1 += record.abs_difference();
    }

    pub fn extend<'a>(&mut self, records: impl IntoIterator<Item = &'a EnrichedRecord>) {
        for record in records {
            self.add(record);
        }
    }

    pub fn merge(mut self, other: ConcentrationAccumulator) -> Self {
        debug_assert_eq!(self.dimension, other.dimension);
        for (key, (count, sum)) in other.groups {
            let entry = self.groups.entry(key).or_insert((0, 0.0));
            entry.0 += count;
            entry.1 += sum;
        }
        self
    }

    pub fn finish(self) -> Vec<ConcentrationAggregate> {
        let dimension = self.dimension;
        self.groups
            .into_iter()
            .map(|((key, mismatch), (num_loans, total_abs_diff))| ConcentrationAggregate {
                dimension,
                key,
                mismatch,
                num_loans,
                total_abs_diff,
            })
            .collect()
    }
}

/// Count + sum of abs_difference per (dimension value, mismatch).
pub fn aggregate(enriched: &[EnrichedRecord], dimension: Dimension) -> Vec<ConcentrationAggregate> {
    let mut acc = ConcentrationAccumulator::new(dimension);
    acc.extend(enriched);
    acc.finish()
}

// ============================================================================
// CONCENTRATION REPORT (all three dimensions)
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConcentrationReport {
    pub by_cost_center: Vec<ConcentrationAggregate>,
    pub by_risk_segment: Vec<ConcentrationAggregate>,
    pub by_pd_bucket: Vec<ConcentrationAggregate>,
}

impl ConcentrationReport {
    pub fn build(enriched: &[EnrichedRecord]) -> Self {
        let report = ConcentrationReport {
            by_cost_center: aggregate(enriched, Dimension::CostCenter),
            by_risk_segment: aggregate(enriched, Dimension::RiskSegment),
            by_pd_bucket: aggregate(enriched, Dimension::PdBucket),
        };
        log::info!(
            "concentration: {} cost-center groups, {} risk-segment groups, {} PD-bucket groups",
            report.by_cost_center.len(),
            report.by_risk_segment.len(),
            report.by_pd_bucket.len()
        );
        report
    }

    pub fn table(&self, dimension: Dimension) -> &[ConcentrationAggregate] {
        match dimension {
            Dimension::CostCenter => &self.by_cost_center,
            Dimension::RiskSegment => &self.by_risk_segment,
            Dimension::PdBucket => &self.by_pd_bucket,
        }
    }
}

// ============================================================================
// SUMMARY METRICS (cost center x mismatch)
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SummaryMetrics {
    pub cost_center: GroupKey,
    pub mismatch: bool,
    pub num_loans: usize,
    pub total_approved: f64,
    pub total_ledger: f64,
    pub total_abs_difference: f64,
}

pub fn summarize_by_cost_center(enriched: &[EnrichedRecord]) -> Vec<SummaryMetrics> {
    let mut groups: BTreeMap<(GroupKey, bool), SummaryMetrics> = BTreeMap::new();

    for record in enriched {
        let key = Dimension::CostCenter.key_of(record);
        let entry = groups
            .entry((key.clone(), record.mismatch()))
            .or_insert_with(|| SummaryMetrics {
                cost_center: key,
                mismatch: record.mismatch(),
                num_loans: 0,
                total_approved: 0.0,
                total_ledger: 0.0,
                total_abs_difference: 0.0,
            });
        entry.num_loans += 1;
        entry.total_approved += record.reconciled.approved_amount;
        entry.total_ledger += record.reconciled.ledger_balance;
        entry.total_abs_difference += record.abs_difference();
    }

    groups.into_values().collect()
}

// ============================================================================
// TESTS
// ============================================================================
