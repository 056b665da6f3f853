//! Precision/recall/F1 accumulator for supervised evaluation (spec.md §4.5
//! "target metric"), ported from `Meter` in
//! `examples/original_source/src/meter.cc`.

use std::collections::HashMap;

#[derive(Debug, Clone, Default)]
struct Counts {
    gold: u64,
    predicted: u64,
    predicted_gold: u64,
}

impl Counts {
    fn precision(&self) -> f64 {
        if self.predicted == 0 {
            f64::NAN
        } else {
            self.predicted_gold as f64 / self.predicted as f64
        }
    }

    fn recall(&self) -> f64 {
        if self.gold == 0 {
            f64::NAN
        } else {
            self.predicted_gold as f64 / self.gold as f64
        }
    }

    fn f1(&self) -> f64 {
        if self.predicted + self.gold == 0 {
            f64::NAN
        } else {
            2.0 * self.predicted_gold as f64 / (self.predicted + self.gold) as f64
        }
    }
}

/// Accumulates per-example predicted/gold label sets, example by example,
/// and reports aggregate or per-label precision/recall/F1 and
/// precision-recall-curve queries for autotune's target metric.
#[derive(Debug, Default)]
pub struct Meter {
    overall: Counts,
    by_label: HashMap<i32, Counts>,
    score_vs_true: Vec<(f32, bool)>,
    examples: u64,
}

impl Meter {
    pub fn new() -> Self {
        Meter::default()
    }

    /// Records one example's gold label ids against its scored predictions.
    pub fn log(&mut self, gold: &[i32], predictions: &[(f32, i32)]) {
        self.examples += 1;
        self.overall.gold += gold.len() as u64;
        self.overall.predicted += predictions.len() as u64;

        for &(score, label) in predictions {
            let entry = self.by_label.entry(label).or_default();
            entry.predicted += 1;
            let correct = gold.contains(&label);
            if correct {
                entry.predicted_gold += 1;
                self.overall.predicted_gold += 1;
            }
            self.score_vs_true.push((score, correct));
        }
        for &label in gold {
            self.by_label.entry(label).or_default().gold += 1;
        }
    }

    pub fn examples(&self) -> u64 {
        self.examples
    }

    pub fn precision(&self) -> f64 {
        self.overall.precision()
    }

    pub fn recall(&self) -> f64 {
        self.overall.recall()
    }

    pub fn f1_score(&self) -> f64 {
        self.overall.f1()
    }

    pub fn f1_score_label(&self, label: i32) -> f64 {
        self.by_label.get(&label).map(Counts::f1).unwrap_or(f64::NAN)
    }

    pub fn precision_label(&self, label: i32) -> f64 {
        self.by_label.get(&label).map(Counts::precision).unwrap_or(f64::NAN)
    }

    pub fn recall_label(&self, label: i32) -> f64 {
        self.by_label.get(&label).map(Counts::recall).unwrap_or(f64::NAN)
    }

    /// Gold-label count for `label`, for `test-label`'s support column.
    pub fn gold_count_label(&self, label: i32) -> u64 {
        self.by_label.get(&label).map(|c| c.gold).unwrap_or(0)
    }

    /// Precision at the smallest prediction-set (scanned score-descending)
    /// whose cumulative recall first reaches `recall`.
    pub fn precision_at_recall(&self, recall: f64) -> f64 {
        self.sweep(recall, true)
    }

    /// Largest cumulative recall among prediction-sets (scanned
    /// score-descending) whose precision is still `>= precision`.
    pub fn recall_at_precision(&self, precision: f64) -> f64 {
        self.sweep(precision, false)
    }

    fn sweep(&self, target: f64, by_recall: bool) -> f64 {
        let total_gold = self.overall.gold;
        if total_gold == 0 || self.score_vs_true.is_empty() {
            return f64::NAN;
        }
        let mut pairs = self.score_vs_true.clone();
        pairs.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));

        let mut tp = 0u64;
        let mut result = f64::NAN;
        for (i, &(_, correct)) in pairs.iter().enumerate() {
            if correct {
                tp += 1;
            }
            let predicted = (i + 1) as f64;
            let precision = tp as f64 / predicted;
            let recall = tp as f64 / total_gold as f64;
            if by_recall {
                if recall >= target {
                    return precision;
                }
            } else if precision >= target {
                result = recall;
            }
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn overall_f1_matches_manual_count() {
        let mut meter = Meter::new();
        meter.log(&[1], &[(0.9, 1)]);
        meter.log(&[2], &[(0.8, 3)]);
        assert!((meter.precision() - 0.5).abs() < 1e-9);
        assert!((meter.recall() - 0.5).abs() < 1e-9);
        assert!((meter.f1_score() - 0.5).abs() < 1e-9);
    }

    #[test]
    fn per_label_f1_isolates_that_label() {
        let mut meter = Meter::new();
        meter.log(&[1], &[(0.9, 1)]);
        meter.log(&[2], &[(0.8, 1)]);
        assert!((meter.f1_score_label(1) - (2.0 / 3.0)).abs() < 1e-9);
    }

    #[test]
    fn precision_at_recall_reaches_full_recall_eventually() {
        let mut meter = Meter::new();
        meter.log(&[1], &[(0.9, 1), (0.1, 2)]);
        meter.log(&[2], &[(0.8, 2), (0.2, 1)]);
        let p = meter.precision_at_recall(1.0);
        assert!(p.is_finite());
    }

    #[test]
    fn empty_meter_reports_nan_curve_queries() {
        let meter = Meter::new();
        assert!(meter.precision_at_recall(0.5).is_nan());
        assert!(meter.recall_at_precision(0.5).is_nan());
    }
}
