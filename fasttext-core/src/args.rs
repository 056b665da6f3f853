//! Training configuration.
//!
//! A single plain value threaded through the dictionary, model and training
//! driver, replacing the original C++ implementation's global `Args`
//! singleton (spec.md §9 redesign flag). Defaults mirror fastText's.

use serde::{Deserialize, Serialize};

use crate::error::{FastTextError, Result};

/// Which of the three training loops to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelKind {
    Cbow,
    SkipGram,
    Supervised,
}

/// Which loss the model family uses during training and prediction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LossKind {
    HierarchicalSoftmax,
    NegativeSampling,
    Softmax,
    OneVsAll,
}

/// Autotune target metric.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum MetricKind {
    F1Score,
    F1ScoreLabel(String),
    PrecisionAtRecall(f64),
    PrecisionAtRecallLabel(String, f64),
    RecallAtPrecision(f64),
    RecallAtPrecisionLabel(String, f64),
}

impl MetricKind {
    /// Parses the `-autotune-metric` flag: `f1`, `f1:<label>`,
    /// `precisionAtRecall:<value>[:<label>]`, `recallAtPrecision:<value>[:<label>]`
    /// — `value` is a percentage (`30` means `0.30`), matching
    /// `Args::getAutotuneMetric` in `examples/original_source/src/args.cc`.
    pub fn parse(spec: &str) -> Result<Self> {
        if spec == "f1" {
            return Ok(MetricKind::F1Score);
        }
        if let Some(label) = spec.strip_prefix("f1:") {
            return Ok(MetricKind::F1ScoreLabel(label.to_string()));
        }
        if let Some(rest) = spec.strip_prefix("precisionAtRecall:") {
            return Self::parse_at_value(rest, MetricKind::PrecisionAtRecall, MetricKind::PrecisionAtRecallLabel);
        }
        if let Some(rest) = spec.strip_prefix("recallAtPrecision:") {
            return Self::parse_at_value(rest, MetricKind::RecallAtPrecision, MetricKind::RecallAtPrecisionLabel);
        }
        Err(FastTextError::InvalidArgument(format!("unknown autotune metric: {spec}")))
    }

    fn parse_at_value(
        rest: &str,
        plain: impl Fn(f64) -> Self,
        labeled: impl Fn(String, f64) -> Self,
    ) -> Result<Self> {
        let mut parts = rest.splitn(2, ':');
        let value: f64 = parts
            .next()
            .and_then(|s| s.parse().ok())
            .ok_or_else(|| FastTextError::InvalidArgument(format!("malformed autotune metric value: {rest}")))?;
        let value = value / 100.0;
        match parts.next() {
            Some(label) => Ok(labeled(label.to_string(), value)),
            None => Ok(plain(value)),
        }
    }
}

/// Training hyper-parameters and I/O paths.
///
/// This is a plain data value: nothing here is global, nothing here is
/// mutated by training threads. Only [`crate::train::Trainer`] and
/// [`crate::dictionary::Dictionary`] read it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Args {
    pub input: String,
    pub output: String,

    pub lr: f64,
    pub lr_update_rate: i32,
    pub dim: i32,
    pub ws: i32,
    pub epoch: i32,
    pub min_count: i32,
    pub min_count_label: i32,
    pub neg: i32,
    pub word_ngrams: i32,
    pub loss: LossKind,
    pub model: ModelKind,
    pub bucket: i32,
    pub minn: i32,
    pub maxn: i32,
    pub thread: i32,
    pub t: f64,
    pub label: String,
    pub verbose: i32,
    pub pretrained_vectors: String,
    pub save_output: bool,
    pub seed: i32,

    pub qout: bool,
    pub retrain: bool,
    pub qnorm: bool,
    pub cutoff: usize,
    pub dsub: usize,

    pub autotune_validation_file: String,
    pub autotune_metric: String,
    pub autotune_predictions: i32,
    pub autotune_duration: i32,
    pub autotune_model_size: String,
}

impl Default for Args {
    fn default() -> Self {
        Self {
            input: String::new(),
            output: String::new(),
            lr: 0.05,
            lr_update_rate: 100,
            dim: 100,
            ws: 5,
            epoch: 5,
            min_count: 5,
            min_count_label: 0,
            neg: 5,
            word_ngrams: 1,
            loss: LossKind::NegativeSampling,
            model: ModelKind::SkipGram,
            bucket: 2_000_000,
            minn: 3,
            maxn: 6,
            thread: num_cpus_hint(),
            t: 1e-4,
            label: "__label__".to_string(),
            verbose: 2,
            pretrained_vectors: String::new(),
            save_output: false,
            seed: 0,
            qout: false,
            retrain: false,
            qnorm: false,
            cutoff: 0,
            dsub: 2,
            autotune_validation_file: String::new(),
            autotune_metric: "f1".to_string(),
            autotune_predictions: 1,
            autotune_duration: 60 * 5,
            autotune_model_size: String::new(),
        }
    }
}

impl Args {
    /// Supervised training defaults collapse subwords to the word itself
    /// unless the caller explicitly widens `minn`/`maxn` (spec.md §4.1).
    pub fn for_supervised(mut self) -> Self {
        self.model = ModelKind::Supervised;
        self.loss = LossKind::Softmax;
        self.minn = 0;
        self.maxn = 0;
        self.bucket = 0;
        self.lr = 0.1;
        self
    }
}

fn num_cpus_hint() -> i32 {
    std::thread::available_parallelism()
        .map(|n| n.get() as i32)
        .unwrap_or(1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_matches_fasttext_defaults() {
        let args = Args::default();
        assert_eq!(args.dim, 100);
        assert_eq!(args.bucket, 2_000_000);
        assert_eq!(args.minn, 3);
        assert_eq!(args.maxn, 6);
    }

    #[test]
    fn supervised_preset_disables_subwords() {
        let args = Args::default().for_supervised();
        assert_eq!(args.minn, 0);
        assert_eq!(args.maxn, 0);
        assert_eq!(args.bucket, 0);
        assert_eq!(args.loss, LossKind::Softmax);
    }

    #[test]
    fn metric_parses_plain_and_labeled_f1() {
        assert_eq!(MetricKind::parse("f1").unwrap(), MetricKind::F1Score);
        assert_eq!(
            MetricKind::parse("f1:__label__pos").unwrap(),
            MetricKind::F1ScoreLabel("__label__pos".to_string())
        );
    }

    #[test]
    fn metric_parses_precision_and_recall_at_value() {
        assert_eq!(MetricKind::parse("precisionAtRecall:30").unwrap(), MetricKind::PrecisionAtRecall(0.3));
        assert_eq!(
            MetricKind::parse("recallAtPrecision:50:__label__x").unwrap(),
            MetricKind::RecallAtPrecisionLabel("__label__x".to_string(), 0.5)
        );
    }

    #[test]
    fn metric_rejects_unknown_spec() {
        assert!(MetricKind::parse("bogus").is_err());
    }
}
