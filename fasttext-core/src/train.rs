//! Hogwild-style parallel SGD training driver (spec.md §4.4, §5).
//!
//! Workers are plain [`std::thread::scope`] threads rather than a `rayon`
//! pool: each owns a long-running loop and independent file-seek state,
//! unlike the embarrassingly-parallel flat scans in [`crate::facade`] that
//! `rayon` fits (spec.md §9).

use std::fs::File;
use std::io::{BufReader, Seek, SeekFrom};
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use rand::{Rng, SeedableRng};
use rand_xorshift::XorShiftRng;

use crate::args::{Args, ModelKind};
use crate::dictionary::{CorpusReader, Dictionary};
use crate::error::{FastTextError, Result};
use crate::model::{Model, ModelState};

/// Cooperative cancellation shared between the trainer and its caller
/// (autotune's budget monitor, or an interactive abort).
#[derive(Clone, Default)]
pub struct AbortToken(Arc<AtomicBool>);

impl AbortToken {
    pub fn new() -> Self {
        AbortToken(Arc::new(AtomicBool::new(false)))
    }

    pub fn abort(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_aborted(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Seeks to `thread_id · file_len / n` then scans forward to the next
/// whitespace byte, so each worker starts mid-stream on a clean token
/// boundary (spec.md §9 "align to next record").
fn align_to_next_record<R: CorpusReader>(reader: &mut R) -> Result<()> {
    loop {
        let buf = reader.fill_buf()?;
        if buf.is_empty() {
            return Ok(());
        }
        let c = buf[0];
        reader.consume(1);
        if c.is_ascii_whitespace() {
            return Ok(());
        }
    }
}

fn open_worker_reader(path: &str, thread_id: i32, n_threads: i32) -> Result<BufReader<File>> {
    let file = File::open(path).map_err(|e| FastTextError::io_at(path, e))?;
    let len = file.metadata().map_err(|e| FastTextError::io_at(path, e))?.len();
    let mut reader = BufReader::new(file);
    let offset = (thread_id as u64) * len / n_threads.max(1) as u64;
    reader.seek(SeekFrom::Start(offset))?;
    if offset > 0 {
        align_to_next_record(&mut reader)?;
    }
    Ok(reader)
}

/// Expands raw word ids into their subword lists; ids already in the
/// bucket range (word-n-grams, appended by [`Dictionary::get_line_supervised`])
/// pass through unchanged.
pub(crate) fn expand_subwords(dict: &Dictionary, raw: &[i32]) -> Vec<i32> {
    let mut out = Vec::new();
    for &id in raw {
        if id < dict.nwords() {
            out.extend_from_slice(dict.get_subwords(id));
        } else {
            out.push(id);
        }
    }
    out
}

pub struct Trainer {
    pub args: Args,
    pub dict: Arc<Dictionary>,
    pub model: Arc<Model>,
    pub ntokens: i64,
    pub abort: AbortToken,
}

impl Trainer {
    pub fn new(args: Args, dict: Arc<Dictionary>, model: Arc<Model>, ntokens: i64) -> Self {
        Trainer {
            abort: AbortToken::new(),
            args,
            dict,
            model,
            ntokens,
        }
    }

    pub fn run(&self, input_path: &str) -> Result<()> {
        let n_threads = self.args.thread.max(1);
        let total_tokens = (self.args.epoch as i64 * self.ntokens).max(1);
        let token_count = Arc::new(AtomicI64::new(0));
        let loss_bits = Arc::new(AtomicU64::new(0f64.to_bits()));
        let errors: Arc<std::sync::Mutex<Vec<FastTextError>>> = Arc::new(std::sync::Mutex::new(Vec::new()));

        std::thread::scope(|scope| {
            for tid in 0..n_threads {
                let token_count = Arc::clone(&token_count);
                let loss_bits = Arc::clone(&loss_bits);
                let errors = Arc::clone(&errors);
                scope.spawn(move || {
                    if let Err(e) = self.worker(tid, n_threads, input_path, total_tokens, &token_count, &loss_bits) {
                        errors.lock().unwrap().push(e);
                        self.abort.abort();
                    }
                });
            }

            let monitor_token_count = Arc::clone(&token_count);
            let monitor_loss_bits = Arc::clone(&loss_bits);
            let monitor_abort = self.abort.clone();
            scope.spawn(move || {
                while !monitor_abort.is_aborted() {
                    let progress = monitor_token_count.load(Ordering::Relaxed) as f64 / total_tokens as f64;
                    let loss = f64::from_bits(monitor_loss_bits.load(Ordering::Relaxed));
                    tracing::info!(progress = progress.min(1.0), loss, "training progress");
                    if progress >= 1.0 {
                        break;
                    }
                    std::thread::sleep(Duration::from_millis(100));
                }
            });
        });

        let mut errs = errors.lock().unwrap();
        if let Some(e) = errs.pop() {
            return Err(e);
        }
        Ok(())
    }

    fn worker(
        &self,
        thread_id: i32,
        n_threads: i32,
        input_path: &str,
        total_tokens: i64,
        token_count: &AtomicI64,
        loss_bits: &AtomicU64,
    ) -> Result<()> {
        let mut reader = open_worker_reader(input_path, thread_id, n_threads)?;
        let seed = self.args.seed as u64 + thread_id as u64;
        let mut rng = XorShiftRng::seed_from_u64(seed.max(1));
        let mut state = ModelState::new(self.args.dim as usize, XorShiftRng::seed_from_u64(seed.max(1) + 1));

        let mut local_tokens = 0i64;
        let mut words = Vec::new();
        let mut labels = Vec::new();

        while token_count.load(Ordering::Relaxed) < total_tokens {
            if self.abort.is_aborted() {
                break;
            }
            let progress = (token_count.load(Ordering::Relaxed) as f64 / total_tokens as f64).min(1.0);
            let lr = (self.args.lr * (1.0 - progress)).max(0.0) as f32;

            let read = match self.args.model {
                ModelKind::Supervised => {
                    let n = self.dict.get_line_supervised(&mut reader, &mut words, &mut labels)?;
                    self.step_supervised(&words, &labels, lr, &mut state, &mut rng)?;
                    n
                }
                ModelKind::Cbow => {
                    let n = self.dict.get_line(&mut reader, &mut words, &mut rng)?;
                    self.step_cbow(&words, lr, &mut state, &mut rng)?;
                    n
                }
                ModelKind::SkipGram => {
                    let n = self.dict.get_line(&mut reader, &mut words, &mut rng)?;
                    self.step_skipgram(&words, lr, &mut state, &mut rng)?;
                    n
                }
            };

            local_tokens += read;
            if local_tokens >= self.args.lr_update_rate as i64 {
                token_count.fetch_add(local_tokens, Ordering::Relaxed);
                local_tokens = 0;
                if thread_id == 0 {
                    loss_bits.store(state.average_loss().to_bits(), Ordering::Relaxed);
                }
            }
        }
        token_count.fetch_add(local_tokens, Ordering::Relaxed);
        Ok(())
    }

    fn step_supervised<R: rand::Rng>(
        &self,
        words: &[i32],
        labels: &[i32],
        lr: f32,
        state: &mut ModelState<XorShiftRng>,
        rng: &mut R,
    ) -> Result<()> {
        if labels.is_empty() || words.is_empty() {
            return Ok(());
        }
        let input = expand_subwords(&self.dict, words);
        let label_idx = rng.gen_range(0..labels.len());
        let target_index = if matches!(self.args.loss, crate::args::LossKind::OneVsAll) {
            -1
        } else {
            label_idx as i32
        };
        self.model.update(&input, labels, target_index, lr, state)?;
        Ok(())
    }

    fn step_cbow<R: rand::Rng>(
        &self,
        line: &[i32],
        lr: f32,
        state: &mut ModelState<XorShiftRng>,
        rng: &mut R,
    ) -> Result<()> {
        if line.is_empty() {
            return Ok(());
        }
        let ws = self.args.ws.max(1) as usize;
        for w in 0..line.len() {
            let b = rng.gen_range(1..=ws);
            let lo = w.saturating_sub(b);
            let hi = (w + b).min(line.len() - 1);
            let mut bow = Vec::new();
            for c in lo..=hi {
                if c == w {
                    continue;
                }
                bow.extend_from_slice(self.dict.get_subwords(line[c]));
            }
            self.model.update(&bow, line, w as i32, lr, state)?;
        }
        Ok(())
    }

    fn step_skipgram<R: rand::Rng>(
        &self,
        line: &[i32],
        lr: f32,
        state: &mut ModelState<XorShiftRng>,
        rng: &mut R,
    ) -> Result<()> {
        if line.is_empty() {
            return Ok(());
        }
        let ws = self.args.ws.max(1) as usize;
        for w in 0..line.len() {
            let b = rng.gen_range(1..=ws);
            let ngrams = self.dict.get_subwords(line[w]).to_vec();
            let lo = w.saturating_sub(b) as isize;
            let hi = (w + b).min(line.len() - 1) as isize;
            for c in lo..=hi {
                if c == w as isize || c < 0 || c as usize >= line.len() {
                    continue;
                }
                self.model.update(&ngrams, line, c as i32, lr, state)?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::args::LossKind;
    use crate::loss::SoftmaxLoss;
    use crate::matrix::DenseMatrix;
    use std::io::Write;

    fn toy_setup(text: &str) -> (Args, Arc<Dictionary>, Arc<Model>) {
        let mut args = Args::default().for_supervised();
        args.dim = 4;
        args.epoch = 3;
        args.lr = 0.5;
        args.thread = 1;
        args.min_count = 1;
        args.loss = LossKind::Softmax;

        let mut dict = Dictionary::new(&args);
        let mut reader = std::io::BufReader::new(std::io::Cursor::new(text.as_bytes().to_vec()));
        dict.read_from_file(&mut reader).unwrap();

        let wi = DenseMatrix::zeros((dict.nwords() + args.bucket) as usize, args.dim as usize);
        wi.init_uniform_range(0, (dict.nwords() + args.bucket) as usize, &mut XorShiftRng::seed_from_u64(1));
        let wo = DenseMatrix::zeros(dict.nlabels() as usize, args.dim as usize);
        let model = Model::new(wi, wo, Arc::new(SoftmaxLoss::new()), true);
        (args, Arc::new(dict), Arc::new(model))
    }

    #[test]
    fn single_threaded_training_runs_to_completion() {
        let text = "__label__pos good\n__label__neg bad\n".repeat(50);
        let (args, dict, model) = toy_setup(&text);
        let ntokens = dict.ntokens();

        let tmp = std::env::temp_dir().join(format!("fasttext-train-test-{}.txt", std::process::id()));
        std::fs::File::create(&tmp).unwrap().write_all(text.as_bytes()).unwrap();

        let trainer = Trainer::new(args, dict, model, ntokens);
        trainer.run(tmp.to_str().unwrap()).unwrap();

        std::fs::remove_file(&tmp).ok();
    }

    #[test]
    fn align_to_next_record_stops_after_whitespace() {
        let mut reader = std::io::BufReader::new(std::io::Cursor::new(b"abc def".to_vec()));
        reader.seek(SeekFrom::Start(1)).unwrap();
        align_to_next_record(&mut reader).unwrap();
        let mut rest = String::new();
        std::io::Read::read_to_string(&mut reader, &mut rest).unwrap();
        assert_eq!(rest, "def");
    }
}
