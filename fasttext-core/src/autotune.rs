//! Gaussian-perturbation hyperparameter search (spec.md §4.5).
//!
//! Each trial perturbs the current best arguments with decaying-variance
//! Gaussian noise, trains, optionally quantizes under a model-size budget,
//! and scores against a validation file. Ported from fastText's
//! `AutotuneStrategy`/`Autotune` (`examples/original_source/src/autotune.cc`);
//! the direct calls into a concrete `FastText` there become calls through
//! [`TrialRunner`] here so this module stays independent of [`crate::facade`].

use std::collections::HashSet;
use std::time::Instant;

use rand::SeedableRng;
use rand_distr::{Distribution, Normal};
use rand_xorshift::XorShiftRng;

use crate::args::{Args, LossKind};
use crate::error::{FastTextError, Result};
use crate::train::AbortToken;

/// Sentinel for "no trial has produced a score yet" (`autotune.cc` line 59).
pub const UNKNOWN_BEST_SCORE: f64 = -1.0;
const CUTOFF_LIMIT: i64 = 256;
const UNLIMITED_MODEL_SIZE: i64 = -1;

const MINN_CHOICES: [i32; 3] = [0, 2, 3];

/// `123K` / `4M` / `2G` / empty (unlimited) — the `autotune-modelsize` flag.
pub fn parse_model_size(spec: &str) -> i64 {
    let spec = spec.trim();
    if spec.is_empty() {
        return UNLIMITED_MODEL_SIZE;
    }
    let (digits, mult) = match spec.chars().last() {
        Some('k') | Some('K') => (&spec[..spec.len() - 1], 1_000f64),
        Some('m') | Some('M') => (&spec[..spec.len() - 1], 1_000_000f64),
        Some('g') | Some('G') => (&spec[..spec.len() - 1], 1_000_000_000f64),
        _ => (spec, 1f64),
    };
    digits
        .trim()
        .parse::<f64>()
        .map(|v| (v * mult) as i64)
        .unwrap_or(UNLIMITED_MODEL_SIZE)
}

/// Fields the caller pinned explicitly on the command line; autotune leaves
/// these untouched across trials (`Args::isManual` in the original).
#[derive(Debug, Clone, Default)]
pub struct ManualArgs(HashSet<&'static str>);

impl ManualArgs {
    pub fn new() -> Self {
        ManualArgs(HashSet::new())
    }

    pub fn mark(&mut self, name: &'static str) {
        self.0.insert(name);
    }

    fn is_manual(&self, name: &str) -> bool {
        self.0.contains(name)
    }
}

/// What a trial needs to report back about the model it trained, so
/// [`Autotune::get_cutoff_for_file_size`] can size a quantized model without
/// depending on [`crate::matrix`] directly.
pub trait TrialRunner {
    fn train(&mut self, args: &Args) -> Result<()>;
    /// `(rows, cols)` of the output matrix after the most recent `train`.
    fn output_dims(&self) -> (i64, i64);
    /// Input matrix column count (the embedding dimension) after `train`.
    fn input_dim(&self) -> i64;
    fn quantize(&mut self, args: &Args) -> Result<()>;
    /// Score on the validation file under `args.autotune_metric`.
    fn evaluate(&mut self, args: &Args) -> Result<f64>;
}

fn sigma(start: f64, end: f64, t: f64) -> f64 {
    start - ((start - end) / 0.5) * (t - 0.25).max(0.0).min(0.5)
}

fn arg_gauss_f64(
    val: f64,
    min: f64,
    max: f64,
    start_sigma: f64,
    end_sigma: f64,
    t: f64,
    linear: bool,
    rng: &mut XorShiftRng,
) -> f64 {
    let stddev = sigma(start_sigma, end_sigma, t).max(1e-12);
    let normal = Normal::new(0.0, stddev).expect("positive stddev");
    let coeff = normal.sample(rng);
    let raw = if linear { coeff + val } else { 2f64.powf(coeff) * val };
    raw.clamp(min, max)
}

fn arg_gauss_i32(
    val: i32,
    min: i32,
    max: i32,
    start_sigma: f64,
    end_sigma: f64,
    t: f64,
    linear: bool,
    rng: &mut XorShiftRng,
) -> i32 {
    arg_gauss_f64(val as f64, min as f64, max as f64, start_sigma, end_sigma, t, linear, rng).round() as i32
}

/// Samples the next trial's arguments from the current best.
pub struct AutotuneStrategy {
    best_args: Args,
    max_duration: f64,
    rng: XorShiftRng,
    trials: u32,
    best_minn_index: usize,
    best_dsub_exponent: i32,
    best_nonzero_bucket: i32,
    original_bucket: i32,
    manual: ManualArgs,
}

impl AutotuneStrategy {
    pub fn new(original_args: Args, manual: ManualArgs, seed: u64) -> Self {
        let original_bucket = original_args.bucket;
        let max_duration = original_args.autotune_duration as f64;
        let mut strategy = AutotuneStrategy {
            best_args: original_args.clone(),
            max_duration,
            rng: XorShiftRng::seed_from_u64(seed.max(1)),
            trials: 0,
            best_minn_index: 0,
            best_dsub_exponent: 1,
            best_nonzero_bucket: 2_000_000,
            original_bucket,
            manual,
        };
        strategy.update_best(&original_args);
        strategy
    }

    /// The first trial always returns the starting arguments unperturbed, so
    /// a user-supplied baseline is always among the candidates tried.
    pub fn ask(&mut self, elapsed: f64) -> Args {
        let t = (elapsed / self.max_duration).min(1.0);
        self.trials += 1;
        if self.trials == 1 {
            return self.best_args.clone();
        }

        let mut args = self.best_args.clone();
        if !self.manual.is_manual("epoch") {
            args.epoch = arg_gauss_i32(args.epoch, 1, 100, 2.8, 2.5, t, false, &mut self.rng);
        }
        if !self.manual.is_manual("lr") {
            args.lr = arg_gauss_f64(args.lr, 0.01, 5.0, 1.9, 1.0, t, false, &mut self.rng);
        }
        if !self.manual.is_manual("dim") {
            args.dim = arg_gauss_i32(args.dim, 1, 1000, 1.4, 0.3, t, false, &mut self.rng);
        }
        if !self.manual.is_manual("word_ngrams") {
            args.word_ngrams = arg_gauss_i32(args.word_ngrams, 1, 5, 4.3, 2.4, t, true, &mut self.rng);
        }
        if !self.manual.is_manual("dsub") {
            let dsub_exponent =
                arg_gauss_i32(self.best_dsub_exponent, 1, 4, 2.0, 1.0, t, true, &mut self.rng);
            args.dsub = 1usize << dsub_exponent;
        }
        if !self.manual.is_manual("minn") {
            let minn_index = arg_gauss_i32(
                self.best_minn_index as i32,
                0,
                (MINN_CHOICES.len() - 1) as i32,
                4.0,
                1.4,
                t,
                true,
                &mut self.rng,
            );
            args.minn = MINN_CHOICES[minn_index as usize];
        }
        if !self.manual.is_manual("maxn") {
            args.maxn = if args.minn == 0 { 0 } else { args.minn + 3 };
        }
        if !self.manual.is_manual("bucket") {
            args.bucket = arg_gauss_i32(
                self.best_nonzero_bucket,
                10_000,
                10_000_000,
                2.0,
                1.5,
                t,
                false,
                &mut self.rng,
            );
        } else {
            args.bucket = self.original_bucket;
        }
        if args.word_ngrams <= 1 && args.maxn == 0 {
            args.bucket = 0;
        }
        if !self.manual.is_manual("loss") {
            args.loss = LossKind::Softmax;
        }
        args
    }

    fn get_index(val: i32, choices: &[i32]) -> usize {
        choices.iter().position(|&c| c == val).unwrap_or(0)
    }

    pub fn update_best(&mut self, args: &Args) {
        self.best_args = args.clone();
        self.best_minn_index = Self::get_index(args.minn, &MINN_CHOICES);
        self.best_dsub_exponent = (args.dsub as f64).log2().round() as i32;
        if args.bucket != 0 {
            self.best_nonzero_bucket = args.bucket;
        }
    }
}

/// Drives the trial loop against a [`TrialRunner`] until the time budget
/// runs out or the caller aborts, returning the best arguments found.
pub struct Autotune<'a, T: TrialRunner> {
    runner: &'a mut T,
    best_score: f64,
    trials: u32,
    size_constraint_failed: u32,
    abort: AbortToken,
}

impl<'a, T: TrialRunner> Autotune<'a, T> {
    pub fn new(runner: &'a mut T, abort: AbortToken) -> Self {
        Autotune {
            runner,
            best_score: UNKNOWN_BEST_SCORE,
            trials: 0,
            size_constraint_failed: 0,
            abort,
        }
    }

    /// Model size of a trial's output given `qout`/`qnorm`/`dsub`, used to
    /// pick a product-quantizer cutoff that fits `file_size` bytes
    /// (`Autotune::getCutoffForFileSize`).
    fn get_cutoff_for_file_size(&self, qout: bool, qnorm: bool, dsub: usize, file_size: i64) -> i64 {
        let (out_rows, out_cols) = self.runner.output_dims();
        let dim = self.runner.input_dim();
        let out_model_size = if qout {
            let output_pq_size = 16 + 4 * (out_cols * 256);
            21 + (out_rows * ((out_cols + 1) / 2)) + output_pq_size + if qnorm { out_rows } else { 0 }
        } else {
            16 + 4 * (out_rows * out_cols)
        };
        let dsub = dsub.max(1) as i64;
        let target = file_size - 107 - 4 * 256 * dim - out_model_size;
        let cutoff = target / ((dim + dsub - 1) / dsub + if qnorm { 1 } else { 0 } + 10);
        cutoff.max(CUTOFF_LIMIT)
    }

    /// `Autotune::quantize`: `Ok(true)` if the size constraint (if any) was
    /// met and the trial was quantized; `Ok(false)` if no cutoff fits.
    fn quantize(&mut self, args: &mut Args, model_size: i64) -> Result<bool> {
        if model_size == UNLIMITED_MODEL_SIZE {
            return Ok(true);
        }
        let (out_rows, _) = self.runner.output_dims();
        args.qnorm = true;
        args.qout = out_rows >= CUTOFF_LIMIT;
        args.retrain = true;
        let cutoff = self.get_cutoff_for_file_size(args.qout, args.qnorm, args.dsub, model_size);
        args.cutoff = cutoff as usize;
        if cutoff == CUTOFF_LIMIT {
            return Ok(false);
        }
        self.runner.quantize(args)?;
        Ok(true)
    }

    /// Runs trials until `args.autotune_duration` elapses or `abort` fires,
    /// then retrains and (if size-constrained) requantizes at the best
    /// arguments found.
    pub fn run(&mut self, args: &Args, manual: ManualArgs, model_size: i64) -> Result<Args> {
        let mut strategy = AutotuneStrategy::new(args.clone(), manual, args.seed as u64);
        let start = Instant::now();
        let max_duration = args.autotune_duration as f64;
        let mut size_constraint_warned = false;
        let mut best_args = args.clone();

        loop {
            let elapsed = start.elapsed().as_secs_f64();
            if self.abort.is_aborted() || elapsed >= max_duration {
                break;
            }
            self.trials += 1;
            let mut trial_args = strategy.ask(elapsed);

            if self.runner.train(&trial_args).is_err() {
                // NaN divergence or an out-of-memory sample: skip and retry.
                continue;
            }

            match self.quantize(&mut trial_args, model_size) {
                Ok(true) => {}
                Ok(false) => {
                    self.size_constraint_failed += 1;
                    if !size_constraint_warned && self.trials > 10 && self.size_constraint_failed > self.trials / 2 {
                        size_constraint_warned = true;
                        tracing::warn!("requested model size is probably too small; consider raising autotune_model_size");
                    }
                    continue;
                }
                Err(_) => continue,
            }

            let score = match self.runner.evaluate(&trial_args) {
                Ok(s) => s,
                Err(_) => continue,
            };

            if self.best_score == UNKNOWN_BEST_SCORE || score > self.best_score {
                self.best_score = score;
                best_args = trial_args.clone();
                strategy.update_best(&trial_args);
            }
        }

        if self.best_score == UNKNOWN_BEST_SCORE {
            return Err(FastTextError::InvalidArgument(
                "autotune did not complete a single trial; raise autotune_duration or autotune_model_size".into(),
            ));
        }

        self.runner.train(&best_args)?;
        if model_size != UNLIMITED_MODEL_SIZE {
            self.quantize(&mut best_args, model_size)?;
        }
        Ok(best_args)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FakeRunner {
        out_rows: i64,
        out_cols: i64,
        dim: i64,
        trained: u32,
    }

    impl TrialRunner for FakeRunner {
        fn train(&mut self, args: &Args) -> Result<()> {
            self.trained += 1;
            self.dim = args.dim as i64;
            Ok(())
        }
        fn output_dims(&self) -> (i64, i64) {
            (self.out_rows, self.out_cols)
        }
        fn input_dim(&self) -> i64 {
            self.dim
        }
        fn quantize(&mut self, _args: &Args) -> Result<()> {
            Ok(())
        }
        fn evaluate(&mut self, args: &Args) -> Result<f64> {
            // Prefers dim close to 50, so the search has a real optimum to climb.
            Ok(1.0 - ((args.dim - 50).abs() as f64 / 1000.0))
        }
    }

    #[test]
    fn parse_model_size_handles_suffixes_and_empty() {
        assert_eq!(parse_model_size(""), UNLIMITED_MODEL_SIZE);
        assert_eq!(parse_model_size("2M"), 2_000_000);
        assert_eq!(parse_model_size("500K"), 500_000);
        assert_eq!(parse_model_size("1G"), 1_000_000_000);
    }

    #[test]
    fn strategy_first_trial_returns_baseline_unperturbed() {
        let mut args = Args::default();
        args.autotune_duration = 60;
        let mut strategy = AutotuneStrategy::new(args.clone(), ManualArgs::new(), 7);
        let first = strategy.ask(0.0);
        assert_eq!(first.dim, args.dim);
        assert_eq!(first.epoch, args.epoch);
    }

    #[test]
    fn strategy_respects_manual_overrides() {
        let mut args = Args::default();
        args.autotune_duration = 60;
        args.dim = 123;
        let mut manual = ManualArgs::new();
        manual.mark("dim");
        let mut strategy = AutotuneStrategy::new(args, manual, 7);
        strategy.ask(0.0);
        for _ in 0..20 {
            let trial = strategy.ask(10.0);
            assert_eq!(trial.dim, 123);
        }
    }

    #[test]
    fn strategy_keeps_params_within_bounds_over_many_trials() {
        let mut args = Args::default();
        args.autotune_duration = 60;
        let mut strategy = AutotuneStrategy::new(args, ManualArgs::new(), 11);
        for i in 0..200 {
            let trial = strategy.ask(i as f64 * 0.3);
            assert!(trial.dim >= 1 && trial.dim <= 1000);
            assert!(trial.lr >= 0.01 && trial.lr <= 5.0);
            assert!(trial.epoch >= 1 && trial.epoch <= 100);
            assert!(MINN_CHOICES.contains(&trial.minn));
            assert!(trial.bucket >= 0);
        }
    }

    #[test]
    fn forced_bucket_zero_when_no_ngrams_and_no_subwords() {
        let mut args = Args::default();
        args.autotune_duration = 60;
        args.word_ngrams = 1;
        let mut manual = ManualArgs::new();
        manual.mark("word_ngrams");
        manual.mark("minn");
        manual.mark("maxn");
        args.minn = 0;
        args.maxn = 0;
        let mut strategy = AutotuneStrategy::new(args, manual, 3);
        strategy.ask(0.0);
        for _ in 0..10 {
            let trial = strategy.ask(5.0);
            assert_eq!(trial.bucket, 0);
        }
    }

    #[test]
    fn cutoff_never_drops_below_the_limit() {
        let mut runner = FakeRunner { out_rows: 10, out_cols: 100, dim: 100, trained: 0 };
        let autotune = Autotune::new(&mut runner, AbortToken::new());
        let cutoff = autotune.get_cutoff_for_file_size(true, true, 2, 1);
        assert_eq!(cutoff, CUTOFF_LIMIT);
    }

    #[test]
    fn run_finds_a_better_score_than_the_starting_point() {
        let mut args = Args::default();
        args.autotune_duration = 2;
        args.dim = 900;
        let mut runner = FakeRunner { out_rows: 10, out_cols: 50, dim: args.dim as i64, trained: 0 };
        let mut autotune = Autotune::new(&mut runner, AbortToken::new());
        let best = autotune.run(&args, ManualArgs::new(), UNLIMITED_MODEL_SIZE).unwrap();
        assert!((best.dim - 50).abs() < (900i32 - 50).abs());
        assert!(runner.trained >= 1);
    }
}
