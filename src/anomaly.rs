// 📈 Anomaly Detector - percentile threshold on |difference|
//
// The threshold is recomputed from every run's own distribution, so it is
// relative to the batch and never a fixed amount.
//
// Quantile method: linear interpolation between closest ranks. For n sorted
// values v[0..n) and quantile q the position is h = q * (n - 1) and the result
// is v[floor(h)] + (h - floor(h)) * (v[ceil(h)] - v[floor(h)]).

use crate::config::{self, DEFAULT_ANOMALY_QUANTILE};
use crate::enrichment::EnrichedRecord;
use crate::error::ReconResult;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AnomalyOutcome {
    pub quantile: f64,
    /// None when there was no usable abs_difference to compute it from
    pub threshold: Option<f64>,
    pub flagged: usize,
}

/// Linear-interpolation quantile of the non-NaN values. None if there are none.
pub fn quantile_linear(values: &[f64], quantile: f64) -> Option<f64> {
    let mut sorted: Vec<f64> = values.iter().copied().filter(|v| !v.is_nan()).collect();
    if sorted.is_empty() {
        return None;
    }
    sorted.sort_by(|a, b| a.total_cmp(b));

    let q = quantile.clamp(0.0, 1.0);
    let position = q * (sorted.len() - 1) as f64;
    let lower = position.floor() as usize;
    let upper = position.ceil() as usize;
    let fraction = position - lower as f64;

    Some(sorted[lower] + fraction * (sorted[upper] - sorted[lower]))
}

pub struct AnomalyDetector {
    pub quantile: f64,
}

impl AnomalyDetector {
    pub fn new() -> Self {
        AnomalyDetector {
            quantile: DEFAULT_ANOMALY_QUANTILE,
        }
    }

    pub fn with_quantile(quantile: f64) -> Self {
        AnomalyDetector { quantile }
    }

    /// Flag rows whose abs_difference is strictly above the percentile threshold.
    pub fn detect(&self, records: &mut [EnrichedRecord]) -> ReconResult<AnomalyOutcome> {
        config::validate_quantile(self.quantile)?;

        let values: Vec<f64> = records.iter().map(|r| r.abs_difference()).collect();

        let threshold = match quantile_linear(&values, self.quantile) {
            Some(threshold) => threshold,
            None => {
                log::info!("anomalies: empty abs_difference distribution, nothing flagged");
                for record in records.iter_mut() {
                    record.anomaly = false;
                }
                return Ok(AnomalyOutcome {
                    quantile: self.quantile,
                    threshold: None,
                    flagged: 0,
                });
            }
        };

        let mut flagged = 0;
        for record in records.iter_mut() {
            // NaN compares false, so a missing difference is never anomalous
            record.anomaly = record.abs_difference() > threshold;
            if record.anomaly {
                flagged += 1;
            }
        }

        log::info!(
            "anomalies: p{:.2} threshold {:.2}, {} rows flagged",
            self.quantile * 100.0,
            threshold,
            flagged
        );

        Ok(AnomalyOutcome {
            quantile: self.quantile,
            threshold: Some(threshold),
            flagged,
        })
    }
}

impl Default for AnomalyDetector {
    fn default() -> Self {
        Self::new()
    }
}

/// Set `anomaly` on every record using the given quantile of abs_difference.
pub fn detect_anomalies(
    records: &mut [EnrichedRecord],
    quantile: f64,
) -> ReconResult<AnomalyOutcome> {
    AnomalyDetector::with_quantile(quantile).detect(records)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reconciliation::{JoinOrigin, ReconciledRecord};

    fn record_with_abs_difference(idx: usize, abs_difference: f64) -> EnrichedRecord {
        let reconciled = ReconciledRecord {
            loan_id: format!("L{}", idx),
            client_id: format!("C{}", idx),
            disbursement_date: None,
            approved_amount: abs_difference,
            ledger_date: None,
            ledger_balance: 0.0,
            join_origin: JoinOrigin::Both,
            difference: abs_difference,
            abs_difference,
            mismatch: abs_difference > 1000.0,
        };
        EnrichedRecord::new(reconciled, None)
    }

    #[test]
    fn test_quantile_linear_interpolates() {
        let values: Vec<f64> = (1..=100).map(|i| (i * 10) as f64).collect();
        let threshold = quantile_linear(&values, 0.99).unwrap();
        assert!((threshold - 990.1).abs() < 1e-9);

        assert_eq!(quantile_linear(&[5.0, 1.0, 3.0], 0.5), Some(3.0));
        assert_eq!(quantile_linear(&[1.0, 2.0], 0.5), Some(1.5));
        assert_eq!(quantile_linear(&[7.0], 0.99), Some(7.0));
    }

    #[test]
    fn test_quantile_ignores_nan_and_empty() {
        assert_eq!(quantile_linear(&[], 0.99), None);
        assert_eq!(quantile_linear(&[f64::NAN], 0.99), None);
        assert_eq!(quantile_linear(&[f64::NAN, 4.0, 2.0], 1.0), Some(4.0));
    }

    #[test]
    fn test_flags_only_the_maximum_of_one_hundred() {
        let mut records: Vec<EnrichedRecord> = (1..=100)
            .map(|i| record_with_abs_difference(i, (i * 10) as f64))
            .collect();

        let outcome = detect_anomalies(&mut records, 0.99).unwrap();

        assert_eq!(outcome.flagged, 1);
        let flagged: Vec<&EnrichedRecord> = records.iter().filter(|r| r.anomaly).collect();
        assert_eq!(flagged.len(), 1);
        assert_eq!(flagged[0].abs_difference(), 1000.0);
    }

    #[test]
    fn test_empty_dataset_flags_nothing() {
        let mut records: Vec<EnrichedRecord> = vec![];
        let outcome = detect_anomalies(&mut records, 0.99).unwrap();
        assert_eq!(outcome.threshold, None);
        assert_eq!(outcome.flagged, 0);
    }

    #[test]
    fn test_all_nan_distribution_flags_nothing() {
        let mut records = vec![
            record_with_abs_difference(1, f64::NAN),
            record_with_abs_difference(2, f64::NAN),
        ];
        records[0].anomaly = true;

        let outcome = detect_anomalies(&mut records, 0.5).unwrap();

        assert_eq!(outcome.threshold, None);
        assert!(records.iter().all(|r| !r.anomaly));
    }

    #[test]
    fn test_threshold_depends_on_batch() {
        let mut small: Vec<EnrichedRecord> =
            (1..=10).map(|i| record_with_abs_difference(i, i as f64)).collect();
        let mut large: Vec<EnrichedRecord> =
            (1..=10).map(|i| record_with_abs_difference(i, (i * 1000) as f64)).collect();

        let a = detect_anomalies(&mut small, 0.9).unwrap();
        let b = detect_anomalies(&mut large, 0.9).unwrap();

        assert_ne!(a.threshold, b.threshold);
        assert_eq!(a.flagged, 1);
        assert_eq!(b.flagged, 1);
    }

    #[test]
    fn test_rejects_invalid_quantile() {
        let mut records = vec![record_with_abs_difference(1, 10.0)];
        assert!(detect_anomalies(&mut records, 1.01).is_err());
    }
}
