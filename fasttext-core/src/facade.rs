//! Top-level `FastText` facade: ties the dictionary, parameter matrices,
//! loss and the training/quantization/autotune pipelines into the single
//! public entry point the CLI drives (spec.md §2, §6).

use std::io::{BufRead, BufReader, BufWriter, Cursor, Write};
use std::sync::Arc;

use rand::SeedableRng;
use rand_xorshift::XorShiftRng;
use rayon::prelude::*;

use crate::args::{Args, MetricKind, ModelKind};
use crate::autotune::{Autotune, ManualArgs, TrialRunner};
use crate::dictionary::{Dictionary, EOS};
use crate::error::{FastTextError, Result};
use crate::io;
use crate::loss::{self, Loss};
use crate::matrix::{AnyMatrix, DenseMatrix, MatrixOps, QuantizedMatrix};
use crate::meter::Meter;
use crate::model::Model;
use crate::train::{self, AbortToken, Trainer};
use crate::vector::Vector;

/// A trained or loaded model: vocabulary, input/output parameter matrices
/// (dense or product-quantized) and the loss used to score predictions.
pub struct FastText {
    pub args: Args,
    pub dict: Dictionary,
    pub wi: AnyMatrix,
    pub wo: AnyMatrix,
    pub loss: Arc<dyn Loss>,
    pub abort: AbortToken,
}

impl FastText {
    /// Builds the dictionary from `args.input`, optionally seeds the input
    /// matrix from pretrained vectors, and runs the configured training
    /// loop to completion (spec.md §4 end to end).
    pub fn train(args: Args) -> Result<FastText> {
        let file = std::fs::File::open(&args.input).map_err(|e| FastTextError::io_at(args.input.as_str(), e))?;
        let mut reader = BufReader::new(file);
        let mut dict = Dictionary::new(&args);
        dict.read_from_file(&mut reader)?;

        let input_rows = (dict.nwords() + args.bucket) as usize;
        let wi = DenseMatrix::zeros(input_rows, args.dim as usize);
        let mut init_rng = XorShiftRng::seed_from_u64(args.seed as u64 + 1);
        wi.init_uniform_range(0, input_rows, &mut init_rng);

        if !args.pretrained_vectors.is_empty() {
            let pv_file = std::fs::File::open(&args.pretrained_vectors)
                .map_err(|e| FastTextError::io_at(args.pretrained_vectors.as_str(), e))?;
            let mut pv_reader = BufReader::new(pv_file);
            io::load_pretrained_vectors(&mut pv_reader, &mut dict, &wi)?;
        }

        let output_rows = if args.model == ModelKind::Supervised {
            dict.nlabels()
        } else {
            dict.nwords()
        } as usize;
        let wo = DenseMatrix::zeros(output_rows, args.dim as usize);

        let loss = loss::build(&args, &dict);
        let model = Arc::new(Model::new(wi, wo, loss, args.model == ModelKind::Supervised));

        let dict = Arc::new(dict);
        let ntokens = dict.ntokens();
        let mut trainer = Trainer::new(args.clone(), dict.clone(), model.clone(), ntokens);
        let abort = AbortToken::new();
        trainer.abort = abort.clone();
        trainer.run(&args.input)?;
        drop(trainer);

        let dict = Arc::try_unwrap(dict).ok().expect("trainer releases its dictionary handle on return");

        Ok(FastText {
            args,
            dict,
            wi: AnyMatrix::Dense(model.wi.clone()),
            wo: AnyMatrix::Dense(model.wo.clone()),
            loss: model.loss.clone(),
            abort,
        })
    }

    /// Re-runs training against the current (possibly pruned) dictionary
    /// and dense matrices, in place — the `retrain` step of quantization
    /// (spec.md §4.6 step 1).
    fn retrain(&mut self) -> Result<()> {
        let wi_dense = self
            .wi
            .as_dense()
            .cloned()
            .ok_or_else(|| FastTextError::InvalidArgument("retrain requires a dense input matrix".into()))?;
        let wo_dense = self
            .wo
            .as_dense()
            .cloned()
            .ok_or_else(|| FastTextError::InvalidArgument("retrain requires a dense output matrix".into()))?;

        let loss = loss::build(&self.args, &self.dict);
        let model = Arc::new(Model::new(wi_dense, wo_dense, loss, self.args.model == ModelKind::Supervised));

        let empty = Dictionary::new(&self.args);
        let dict = Arc::new(std::mem::replace(&mut self.dict, empty));
        let ntokens = dict.ntokens();
        let mut trainer = Trainer::new(self.args.clone(), dict.clone(), model.clone(), ntokens);
        trainer.abort = self.abort.clone();
        trainer.run(&self.args.input)?;
        drop(trainer);

        self.dict = Arc::try_unwrap(dict).ok().expect("trainer releases its dictionary handle on return");
        self.wi = AnyMatrix::Dense(model.wi.clone());
        self.wo = AnyMatrix::Dense(model.wo.clone());
        self.loss = model.loss.clone();
        Ok(())
    }

    /// Post-training compression (spec.md §4.6): optionally prune the
    /// dictionary to `cutoff` highest-L2-norm word rows (pinning `</s>`),
    /// retrain on the pruned model, then product-quantize the input (and
    /// output, with `dsub = 2`, if `qout`).
    pub fn quantize(&mut self, qout: bool, qnorm: bool, dsub: usize, cutoff: usize, retrain: bool) -> Result<()> {
        let nwords = self.dict.nwords();
        // Cutoff pruning reindexes wi and the dictionary's word ids; wo only
        // needs the same treatment when it is word-indexed (cbow/skipgram).
        // Supervised wo is label-indexed and untouched by word pruning.
        if cutoff > 0 && (cutoff as i32) < nwords {
            let dense_wi = self
                .wi
                .as_dense()
                .cloned()
                .ok_or_else(|| FastTextError::InvalidArgument("quantize requires a dense input matrix".into()))?;
            let cols = dense_wi.cols();
            let eos_id = self.dict.get_id(EOS);

            let mut order: Vec<i32> = (0..nwords).filter(|&id| id != eos_id).collect();
            order.sort_by(|&a, &b| {
                dense_wi
                    .row_norm(b as usize)
                    .partial_cmp(&dense_wi.row_norm(a as usize))
                    .unwrap_or(std::cmp::Ordering::Equal)
            });
            let mut keep: Vec<i32> = if eos_id >= 0 { vec![eos_id] } else { Vec::new() };
            keep.extend(order);
            keep.truncate(cutoff);

            let mut keep_sorted = keep.clone();
            keep_sorted.sort_unstable();

            let new_nwords = keep_sorted.len() as i32;
            let new_rows = (new_nwords + self.args.bucket) as usize;
            let mut data = vec![0f32; new_rows * cols];
            for (new_id, &old_id) in keep_sorted.iter().enumerate() {
                data[new_id * cols..(new_id + 1) * cols].copy_from_slice(dense_wi.row(old_id as usize));
            }
            let delta = nwords - new_nwords;
            for old_bucket_id in nwords..(nwords + self.args.bucket) {
                let new_bucket_id = (old_bucket_id - delta) as usize;
                data[new_bucket_id * cols..(new_bucket_id + 1) * cols].copy_from_slice(dense_wi.row(old_bucket_id as usize));
            }

            self.dict.prune(&keep_sorted);
            self.wi = AnyMatrix::Dense(DenseMatrix::from_rows(new_rows, cols, data));

            if retrain {
                self.retrain()?;
            }
        }

        let dense_wi = self
            .wi
            .as_dense()
            .cloned()
            .ok_or_else(|| FastTextError::InvalidArgument("quantize requires a dense input matrix".into()))?;
        let qwi = QuantizedMatrix::train(&dense_wi.snapshot(), dense_wi.rows(), dense_wi.cols(), dsub, qnorm);
        self.wi = AnyMatrix::Quantized(qwi);

        if qout {
            let dense_wo = self
                .wo
                .as_dense()
                .cloned()
                .ok_or_else(|| FastTextError::InvalidArgument("quantize requires a dense output matrix".into()))?;
            let qwo = QuantizedMatrix::train(&dense_wo.snapshot(), dense_wo.rows(), dense_wo.cols(), 2, qnorm);
            self.wo = AnyMatrix::Quantized(qwo);
        }

        self.args.qout = qout;
        self.args.qnorm = qnorm;
        self.args.cutoff = cutoff;
        self.args.dsub = dsub;
        self.args.retrain = retrain;
        Ok(())
    }

    /// Averaged hidden state over `input`, then the loss's top-`k` predict
    /// (shared by [`FastText::predict`] and [`FastText::test`]).
    fn score(&self, input: &[i32], k: usize, threshold: f32) -> Result<Vec<(f32, i32)>> {
        if input.is_empty() {
            return Ok(Vec::new());
        }
        let dim = self.wi.cols();
        let mut hidden = Vector::zeros(dim);
        for &id in input {
            self.wi.add_row_to_vector(&mut hidden, id as usize, 1.0);
        }
        hidden.mul_scalar(1.0 / input.len() as f32);
        self.loss.predict(&self.wo, k, threshold, &hidden)
    }

    /// Tokenizes `text` as a supervised line and returns the top-`k` labels
    /// with log-probability `>= log(threshold)`, sorted descending (spec.md
    /// §8 predict invariant).
    pub fn predict(&self, text: &str, k: usize, threshold: f32) -> Result<Vec<(f32, String)>> {
        if self.args.model != ModelKind::Supervised {
            return Err(FastTextError::InvalidArgument("predict requires a supervised model".into()));
        }
        if k == 0 {
            return Err(FastTextError::InvalidArgument("k must be > 0".into()));
        }
        let mut words = Vec::new();
        let mut labels = Vec::new();
        let mut reader = Cursor::new(text.as_bytes().to_vec());
        self.dict.get_line_supervised(&mut reader, &mut words, &mut labels)?;
        let input = train::expand_subwords(&self.dict, &words);

        let scored = self.score(&input, k, threshold)?;
        Ok(scored
            .into_iter()
            .map(|(score, label_id)| (score, self.dict.get_label(label_id).to_string()))
            .collect())
    }

    /// [`FastText::predict`], with scores converted from log-probability to
    /// probability.
    pub fn predict_proba(&self, text: &str, k: usize, threshold: f32) -> Result<Vec<(f32, String)>> {
        Ok(self
            .predict(text, k, threshold)?
            .into_iter()
            .map(|(score, label)| (score.exp(), label))
            .collect())
    }

    /// Runs one line of `validation_path` at a time through [`Self::predict`]'s
    /// scoring path and accumulates a [`Meter`] over gold vs. predicted labels.
    pub fn test(&self, validation_path: &str, k: usize) -> Result<Meter> {
        self.test_with_threshold(validation_path, k, 0.0)
    }

    /// [`Self::test`], filtering each line's prediction set to scores
    /// `>= log(threshold)` as [`Self::predict`] does.
    pub fn test_with_threshold(&self, validation_path: &str, k: usize, threshold: f32) -> Result<Meter> {
        let file = std::fs::File::open(validation_path).map_err(|e| FastTextError::io_at(validation_path, e))?;
        let reader = BufReader::new(file);
        let mut meter = Meter::new();

        for line in reader.lines() {
            let line = line.map_err(|e| FastTextError::io_at(validation_path, e))?;
            if line.trim().is_empty() {
                continue;
            }
            let mut words = Vec::new();
            let mut labels = Vec::new();
            let mut cursor = Cursor::new(line.into_bytes());
            self.dict.get_line_supervised(&mut cursor, &mut words, &mut labels)?;
            if labels.is_empty() {
                continue;
            }
            let input = train::expand_subwords(&self.dict, &words);
            let predictions = self.score(&input, k, threshold)?;
            meter.log(&labels, &predictions);
        }
        Ok(meter)
    }

    /// Scores `self` against `validation_path` under the `-autotune-metric`
    /// spec (`f1`, `f1:<label>`, `precisionAtRecall:<v>[:label]`,
    /// `recallAtPrecision:<v>[:label]`). The per-label precision/recall-curve
    /// variants reuse the overall curve — [`Meter`] only tracks per-label
    /// counts, not a per-label score history.
    pub fn evaluate_metric(&self, validation_path: &str, metric: &str, k: usize) -> Result<f64> {
        let meter = self.test(validation_path, k)?;
        let score = match MetricKind::parse(metric)? {
            MetricKind::F1Score => meter.f1_score(),
            MetricKind::F1ScoreLabel(label) => {
                let id = self.dict.get_id(&label);
                if id < 0 {
                    return Err(FastTextError::InvalidArgument(format!("unknown autotune metric label {label}")));
                }
                meter.f1_score_label(id - self.dict.nwords())
            }
            MetricKind::PrecisionAtRecall(r) | MetricKind::PrecisionAtRecallLabel(_, r) => meter.precision_at_recall(r),
            MetricKind::RecallAtPrecision(p) | MetricKind::RecallAtPrecisionLabel(_, p) => meter.recall_at_precision(p),
        };
        if score.is_nan() {
            return Err(FastTextError::InvalidArgument(
                "autotune metric score is NaN (no validation examples scored)".into(),
            ));
        }
        Ok(score)
    }

    /// Average of `word`'s subword rows; unknown words contribute only
    /// their (possibly empty) hash ngrams (spec.md §8 boundary behavior).
    pub fn get_word_vector(&self, word: &str) -> Vector {
        let subwords = self.dict.subwords_for(word);
        let dim = self.wi.cols();
        let mut v = Vector::zeros(dim);
        for &id in &subwords {
            self.wi.add_row_to_vector(&mut v, id as usize, 1.0);
        }
        if !subwords.is_empty() {
            v.mul_scalar(1.0 / subwords.len() as f32);
        }
        v
    }

    /// Average of [`Self::get_word_vector`] over `text`'s whitespace tokens.
    pub fn get_sentence_vector(&self, text: &str) -> Vector {
        let dim = self.wi.cols();
        let mut v = Vector::zeros(dim);
        let tokens: Vec<&str> = text.split_whitespace().collect();
        if tokens.is_empty() {
            return v;
        }
        for token in &tokens {
            v.add_scaled(&self.get_word_vector(token), 1.0);
        }
        v.mul_scalar(1.0 / tokens.len() as f32);
        v
    }

    /// `(substring, vector)` for every character ngram of `word`, for the
    /// CLI's `print-ngrams` subcommand.
    pub fn get_ngram_vectors(&self, word: &str) -> Vec<(String, Vector)> {
        let dim = self.wi.cols();
        self.dict
            .ngram_substrings(word)
            .into_iter()
            .map(|(text, id)| {
                let mut v = Vector::zeros(dim);
                self.wi.add_row_to_vector(&mut v, id as usize, 1.0);
                (text, v)
            })
            .collect()
    }

    /// Cosine-similarity scan over the vocabulary's word vectors, excluding
    /// `word` itself, top-`k` descending.
    pub fn nn(&self, word: &str, k: usize) -> Vec<(f32, String)> {
        let query = self.get_word_vector(word);
        self.ranked_by_cosine(&query, &[word], k)
    }

    /// `vec(b) − vec(a) + vec(c)`, then the same cosine scan excluding the
    /// three input words.
    pub fn analogies(&self, a: &str, b: &str, c: &str, k: usize) -> Vec<(f32, String)> {
        let mut query = self.get_word_vector(b);
        query.add_scaled(&self.get_word_vector(a), -1.0);
        query.add_scaled(&self.get_word_vector(c), 1.0);
        self.ranked_by_cosine(&query, &[a, b, c], k)
    }

    fn ranked_by_cosine(&self, query: &Vector, excluded: &[&str], k: usize) -> Vec<(f32, String)> {
        let query_norm = query.norm();
        if query_norm == 0.0 {
            return Vec::new();
        }
        let nwords = self.dict.nwords();
        let mut scored: Vec<(f32, String)> = (0..nwords)
            .into_par_iter()
            .filter_map(|id| {
                let candidate = self.dict.get_word(id);
                if excluded.contains(&candidate) {
                    return None;
                }
                let v = self.get_word_vector(candidate);
                let norm = v.norm();
                if norm == 0.0 {
                    return None;
                }
                Some((v.dot(query) / (norm * query_norm), candidate.to_string()))
            })
            .collect();
        scored.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(k);
        scored
    }

    pub fn save_model(&self, path: &str) -> Result<()> {
        let file = std::fs::File::create(path).map_err(|e| FastTextError::io_at(path, e))?;
        let mut writer = BufWriter::new(file);
        io::save_model(&mut writer, &self.args, &self.dict, &self.wi, &self.wo)?;
        writer.flush().map_err(|e| FastTextError::io_at(path, e))?;
        Ok(())
    }

    pub fn load_model(path: &str) -> Result<FastText> {
        let file = std::fs::File::open(path).map_err(|e| FastTextError::io_at(path, e))?;
        let mut reader = BufReader::new(file);
        let model_file = io::load_model(&mut reader)?;
        Ok(FastText {
            args: model_file.args,
            dict: model_file.dict,
            wi: model_file.wi,
            wo: model_file.wo,
            loss: model_file.loss,
            abort: AbortToken::new(),
        })
    }

    pub fn save_vectors(&self, path: &str) -> Result<()> {
        let file = std::fs::File::create(path).map_err(|e| FastTextError::io_at(path, e))?;
        let mut writer = BufWriter::new(file);
        io::write_word_vectors(&mut writer, &self.dict, &self.wi)
    }
}

/// Drives [`Autotune`]'s trial loop by fully training a [`FastText`] model
/// per trial and scoring it against a validation file (spec.md §4.5). The
/// direct calls into a concrete model in the original implementation become
/// this [`TrialRunner`] so [`crate::autotune`] stays independent of this module.
pub struct AutotuneRunner {
    input_path: String,
    validation_path: String,
    metric: String,
    trained: Option<FastText>,
}

impl AutotuneRunner {
    pub fn new(input_path: String, validation_path: String, metric: String) -> Self {
        AutotuneRunner {
            input_path,
            validation_path,
            metric,
            trained: None,
        }
    }

    pub fn into_model(self) -> Option<FastText> {
        self.trained
    }
}

impl TrialRunner for AutotuneRunner {
    fn train(&mut self, args: &Args) -> Result<()> {
        let mut trial_args = args.clone();
        trial_args.input = self.input_path.clone();
        self.trained = Some(FastText::train(trial_args)?);
        Ok(())
    }

    fn output_dims(&self) -> (i64, i64) {
        let ft = self.trained.as_ref().expect("train must run before output_dims");
        (ft.wo.rows() as i64, ft.wo.cols() as i64)
    }

    fn input_dim(&self) -> i64 {
        self.trained.as_ref().expect("train must run before input_dim").wi.cols() as i64
    }

    fn quantize(&mut self, args: &Args) -> Result<()> {
        let ft = self.trained.as_mut().expect("train must run before quantize");
        ft.quantize(args.qout, args.qnorm, args.dsub, args.cutoff, args.retrain)
    }

    fn evaluate(&mut self, args: &Args) -> Result<f64> {
        let ft = self.trained.as_ref().expect("train must run before evaluate");
        ft.evaluate_metric(&self.validation_path, &self.metric, args.autotune_predictions.max(1) as usize)
    }
}

/// Runs the autotune search (spec.md §4.5) and returns the model trained at
/// the best arguments found — `args.autotune_validation_file` is required.
pub fn train_with_autotune(args: Args, manual: ManualArgs) -> Result<FastText> {
    if args.autotune_validation_file.is_empty() {
        return Err(FastTextError::InvalidArgument(
            "autotune requires -autotune-validation".into(),
        ));
    }
    let model_size = crate::autotune::parse_model_size(&args.autotune_model_size);
    let mut runner = AutotuneRunner::new(
        args.input.clone(),
        args.autotune_validation_file.clone(),
        args.autotune_metric.clone(),
    );
    let abort = AbortToken::new();
    let mut autotune = Autotune::new(&mut runner, abort);
    autotune.run(&args, manual, model_size)?;
    runner
        .into_model()
        .ok_or_else(|| FastTextError::InvalidArgument("autotune did not produce a trained model".into()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::args::LossKind;
    use std::io::Write as _;

    fn write_corpus(text: &str) -> std::path::PathBuf {
        let path = std::env::temp_dir().join(format!("fasttext-facade-test-{}-{}.txt", std::process::id(), fastrand_like()));
        std::fs::File::create(&path).unwrap().write_all(text.as_bytes()).unwrap();
        path
    }

    // A tiny, dependency-free counter standing in for a random suffix so
    // parallel tests don't collide on the same temp file name.
    fn fastrand_like() -> u64 {
        use std::sync::atomic::{AtomicU64, Ordering};
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        COUNTER.fetch_add(1, Ordering::Relaxed)
    }

    fn supervised_args(input: &str) -> Args {
        let mut args = Args::default().for_supervised();
        args.input = input.to_string();
        args.dim = 4;
        args.epoch = 20;
        args.lr = 0.5;
        args.thread = 1;
        args.min_count = 1;
        args.loss = LossKind::Softmax;
        args.seed = 1;
        args
    }

    #[test]
    fn train_then_predict_recovers_the_seen_label() {
        let text = "__label__pos good great wonderful\n__label__neg bad awful terrible\n".repeat(40);
        let path = write_corpus(&text);
        let args = supervised_args(path.to_str().unwrap());

        let model = FastText::train(args).unwrap();
        let preds = model.predict("good great", 1, 0.0).unwrap();
        std::fs::remove_file(&path).ok();

        assert_eq!(preds.len(), 1);
        assert_eq!(preds[0].1, "__label__pos");
    }

    #[test]
    fn predict_rejects_non_supervised_models() {
        let text = "a b c a b c\n".repeat(10);
        let path = write_corpus(&text);
        let mut args = Args::default();
        args.input = path.to_str().unwrap().to_string();
        args.model = ModelKind::SkipGram;
        args.dim = 4;
        args.epoch = 1;
        args.thread = 1;
        args.min_count = 1;

        let model = FastText::train(args).unwrap();
        let err = model.predict("a b", 1, 0.0).unwrap_err();
        std::fs::remove_file(&path).ok();
        assert!(matches!(err, FastTextError::InvalidArgument(_)));
    }

    #[test]
    fn save_and_load_round_trips_predictions() {
        let text = "__label__pos good great\n__label__neg bad awful\n".repeat(40);
        let path = write_corpus(&text);
        let args = supervised_args(path.to_str().unwrap());
        let model = FastText::train(args).unwrap();

        let model_path = std::env::temp_dir().join(format!("fasttext-facade-model-{}.bin", std::process::id()));
        model.save_model(model_path.to_str().unwrap()).unwrap();
        let reloaded = FastText::load_model(model_path.to_str().unwrap()).unwrap();

        let before = model.predict("good great", 1, 0.0).unwrap();
        let after = reloaded.predict("good great", 1, 0.0).unwrap();

        std::fs::remove_file(&path).ok();
        std::fs::remove_file(&model_path).ok();
        assert_eq!(before, after);
    }

    #[test]
    fn quantize_shrinks_the_vocabulary_to_the_cutoff() {
        let text = "__label__a one two three four five\n__label__b six seven eight nine ten\n".repeat(30);
        let path = write_corpus(&text);
        let args = supervised_args(path.to_str().unwrap());
        let mut model = FastText::train(args).unwrap();
        let nwords_before = model.dict.nwords();

        model.quantize(false, true, 2, 4, false).unwrap();
        std::fs::remove_file(&path).ok();

        assert!(model.dict.nwords() <= 4);
        assert!(model.dict.nwords() < nwords_before);
        assert!(matches!(model.wi, AnyMatrix::Quantized(_)));
        // predict should still work over the pruned, quantized input.
        let _ = model.predict("one two", 1, 0.0).unwrap();
    }

    #[test]
    fn get_word_vector_is_empty_for_unknown_word_with_no_subwords() {
        let text = "a b c a b c\n".repeat(5);
        let path = write_corpus(&text);
        let mut args = Args::default();
        args.input = path.to_str().unwrap().to_string();
        args.model = ModelKind::SkipGram;
        args.dim = 4;
        args.epoch = 1;
        args.thread = 1;
        args.min_count = 1;
        args.minn = 0;
        args.maxn = 0;
        args.bucket = 0;

        let model = FastText::train(args).unwrap();
        let v = model.get_word_vector("never-seen-word");
        std::fs::remove_file(&path).ok();
        assert_eq!(v.as_slice(), &[0.0, 0.0, 0.0, 0.0]);
    }

    #[test]
    fn nn_excludes_the_query_word_itself() {
        let text = "a b c a b c a b c\n".repeat(30);
        let path = write_corpus(&text);
        let mut args = Args::default();
        args.input = path.to_str().unwrap().to_string();
        args.model = ModelKind::SkipGram;
        args.dim = 4;
        args.ws = 2;
        args.epoch = 5;
        args.thread = 1;
        args.min_count = 1;
        args.minn = 0;
        args.maxn = 0;
        args.bucket = 0;
        args.seed = 2;

        let model = FastText::train(args).unwrap();
        let neighbors = model.nn("a", 5);
        std::fs::remove_file(&path).ok();
        assert!(neighbors.iter().all(|(_, w)| w != "a"));
    }
}
