//! Command-line front end for `fasttext-core` (spec.md §6): train a
//! supervised classifier or word-embedding model, evaluate it, quantize it,
//! and query it for predictions, nearest neighbors and analogies.
//!
//! This crate is a thin driver — it never touches a matrix or a loss
//! directly, only [`fasttext_core::facade::FastText`].

use std::io::{self, BufRead, Write};
use std::process::ExitCode;

use clap::{Args as ClapArgs, Parser, Subcommand};
use fasttext_core::autotune::ManualArgs;
use fasttext_core::{Args, FastText, LossKind, ModelKind, Result as FtResult};
use tracing::{error, info};

#[derive(Parser)]
#[command(name = "fasttext", about = "Train and query fastText-style text models")]
struct Cli {
    /// Enables debug-level logging (repeat for trace).
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Trains a supervised text classifier.
    Supervised(TrainOpts),
    /// Trains skip-gram word embeddings.
    Skipgram(TrainOpts),
    /// Trains CBOW word embeddings.
    Cbow(TrainOpts),
    /// Evaluates a model against labeled validation data.
    Test {
        model: String,
        data: String,
        #[arg(default_value_t = 1)]
        k: usize,
        #[arg(default_value_t = 0.0)]
        threshold: f32,
    },
    /// Evaluates a model and reports precision/recall/F1 per label.
    TestLabel {
        model: String,
        data: String,
        #[arg(default_value_t = 1)]
        k: usize,
        #[arg(default_value_t = 0.0)]
        threshold: f32,
    },
    /// Predicts the top-k labels for each line of `data` (or stdin if `-`).
    Predict {
        model: String,
        data: String,
        #[arg(default_value_t = 1)]
        k: usize,
        #[arg(default_value_t = 0.0)]
        threshold: f32,
    },
    /// Like `predict`, but prints probabilities instead of log-probabilities.
    PredictProb {
        model: String,
        data: String,
        #[arg(default_value_t = 1)]
        k: usize,
        #[arg(default_value_t = 0.0)]
        threshold: f32,
    },
    /// Interactive nearest-neighbor query loop.
    Nn {
        model: String,
        #[arg(default_value_t = 10)]
        k: usize,
    },
    /// Interactive `a : b :: c : ?` analogy query loop.
    Analogies {
        model: String,
        #[arg(default_value_t = 10)]
        k: usize,
    },
    /// Product-quantizes an already-trained model.
    Quantize(QuantizeOpts),
    /// Prints one section of a saved model: `args`, `dict`, `input` or `output`.
    Dump { model: String, target: String },
    /// Prints one vector per line, for each word the model knows.
    PrintWordVectors { model: String },
    /// Averages word vectors per line of stdin into a sentence vector.
    PrintSentenceVectors { model: String },
    /// Prints the hashed character n-grams of a single word and their vectors.
    PrintNgrams { model: String, word: String },
}

/// Flags shared by the three training subcommands, mirroring the
/// `-flag value` pairs `fastText` itself accepts (spec.md §6).
#[derive(ClapArgs)]
struct TrainOpts {
    #[arg(long = "input")]
    input: String,
    #[arg(long = "output")]
    output: String,

    #[arg(long = "lr")]
    lr: Option<f64>,
    #[arg(long = "lr-update-rate")]
    lr_update_rate: Option<i32>,
    #[arg(long = "dim")]
    dim: Option<i32>,
    #[arg(long = "ws")]
    ws: Option<i32>,
    #[arg(long = "epoch")]
    epoch: Option<i32>,
    #[arg(long = "min-count")]
    min_count: Option<i32>,
    #[arg(long = "min-count-label")]
    min_count_label: Option<i32>,
    #[arg(long = "neg")]
    neg: Option<i32>,
    #[arg(long = "word-ngrams")]
    word_ngrams: Option<i32>,
    /// `ns`, `hs`, `softmax` or `ova`.
    #[arg(long = "loss")]
    loss: Option<String>,
    #[arg(long = "bucket")]
    bucket: Option<i32>,
    #[arg(long = "minn")]
    minn: Option<i32>,
    #[arg(long = "maxn")]
    maxn: Option<i32>,
    #[arg(long = "thread")]
    thread: Option<i32>,
    #[arg(long = "t")]
    t: Option<f64>,
    #[arg(long = "label")]
    label: Option<String>,
    #[arg(long = "pretrained-vectors")]
    pretrained_vectors: Option<String>,
    #[arg(long = "save-output")]
    save_output: bool,
    #[arg(long = "seed")]
    seed: Option<i32>,

    #[arg(long = "autotune-validation")]
    autotune_validation: Option<String>,
    #[arg(long = "autotune-metric")]
    autotune_metric: Option<String>,
    #[arg(long = "autotune-predictions")]
    autotune_predictions: Option<i32>,
    #[arg(long = "autotune-duration")]
    autotune_duration: Option<i32>,
    #[arg(long = "autotune-modelsize")]
    autotune_model_size: Option<String>,
}

#[derive(ClapArgs)]
struct QuantizeOpts {
    #[arg(long = "output")]
    output: String,
    #[arg(long = "cutoff", default_value_t = 0)]
    cutoff: usize,
    #[arg(long = "dsub", default_value_t = 2)]
    dsub: usize,
    #[arg(long = "qnorm")]
    qnorm: bool,
    #[arg(long = "qout")]
    qout: bool,
    #[arg(long = "retrain")]
    retrain: bool,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let level = match cli.verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    tracing_subscriber::fmt().with_env_filter(level).init();

    match run(cli.command) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{e}");
            eprintln!("fasttext: {e}");
            ExitCode::FAILURE
        }
    }
}

fn run(command: Command) -> FtResult<()> {
    match command {
        Command::Supervised(opts) => train(opts, ModelKind::Supervised),
        Command::Skipgram(opts) => train(opts, ModelKind::SkipGram),
        Command::Cbow(opts) => train(opts, ModelKind::Cbow),
        Command::Test { model, data, k, threshold } => cmd_test(&model, &data, k, threshold, false),
        Command::TestLabel { model, data, k, threshold } => cmd_test(&model, &data, k, threshold, true),
        Command::Predict { model, data, k, threshold } => cmd_predict(&model, &data, k, threshold, false),
        Command::PredictProb { model, data, k, threshold } => cmd_predict(&model, &data, k, threshold, true),
        Command::Nn { model, k } => cmd_nn(&model, k),
        Command::Analogies { model, k } => cmd_analogies(&model, k),
        Command::Quantize(opts) => cmd_quantize(opts),
        Command::Dump { model, target } => cmd_dump(&model, &target),
        Command::PrintWordVectors { model } => cmd_print_word_vectors(&model),
        Command::PrintSentenceVectors { model } => cmd_print_sentence_vectors(&model),
        Command::PrintNgrams { model, word } => cmd_print_ngrams(&model, &word),
    }
}

fn train(opts: TrainOpts, kind: ModelKind) -> FtResult<()> {
    let mut args = Args::default();
    if kind == ModelKind::Supervised {
        args = args.for_supervised();
    } else {
        args.model = kind;
    }
    let mut manual = ManualArgs::new();
    args.input = opts.input;
    args.output = opts.output.clone();

    macro_rules! apply {
        ($field:ident, $name:literal) => {
            if let Some(v) = opts.$field {
                args.$field = v;
                manual.mark($name);
            }
        };
    }
    apply!(lr, "lr");
    apply!(lr_update_rate, "lr_update_rate");
    apply!(dim, "dim");
    apply!(ws, "ws");
    apply!(epoch, "epoch");
    apply!(min_count, "min_count");
    apply!(min_count_label, "min_count_label");
    apply!(neg, "neg");
    apply!(word_ngrams, "word_ngrams");
    apply!(bucket, "bucket");
    apply!(minn, "minn");
    apply!(maxn, "maxn");
    apply!(thread, "thread");
    apply!(t, "t");
    apply!(seed, "seed");
    if let Some(label) = opts.label {
        args.label = label;
    }
    if let Some(pv) = opts.pretrained_vectors {
        args.pretrained_vectors = pv;
    }
    args.save_output = opts.save_output;
    if let Some(loss) = opts.loss {
        args.loss = parse_loss(&loss)?;
        manual.mark("loss");
    }

    if let Some(validation) = opts.autotune_validation {
        args.autotune_validation_file = validation;
        if let Some(metric) = opts.autotune_metric {
            args.autotune_metric = metric;
        }
        if let Some(predictions) = opts.autotune_predictions {
            args.autotune_predictions = predictions;
        }
        if let Some(duration) = opts.autotune_duration {
            args.autotune_duration = duration;
        }
        if let Some(size) = opts.autotune_model_size {
            args.autotune_model_size = size;
        }
        info!("running autotune against {}", args.autotune_validation_file);
        let model = fasttext_core::train_with_autotune(args, manual)?;
        model.save_model(&format!("{}.bin", opts.output))?;
        model.save_vectors(&format!("{}.vec", opts.output))?;
        return Ok(());
    }

    info!("training {:?} model from {}", kind, args.input);
    let model = FastText::train(args)?;
    model.save_model(&format!("{}.bin", opts.output))?;
    model.save_vectors(&format!("{}.vec", opts.output))?;
    Ok(())
}

fn parse_loss(name: &str) -> FtResult<LossKind> {
    match name {
        "ns" => Ok(LossKind::NegativeSampling),
        "hs" => Ok(LossKind::HierarchicalSoftmax),
        "softmax" => Ok(LossKind::Softmax),
        "ova" => Ok(LossKind::OneVsAll),
        other => Err(fasttext_core::FastTextError::InvalidArgument(format!(
            "unknown loss: {other} (expected ns, hs, softmax or ova)"
        ))),
    }
}

fn cmd_test(model_path: &str, data: &str, k: usize, threshold: f32, per_label: bool) -> FtResult<()> {
    let model = FastText::load_model(model_path)?;
    let meter = model.test_with_threshold(data, k, threshold)?;

    if per_label {
        let nwords = model.dict.nwords();
        for label_id in nwords..(nwords + model.dict.nlabels()) {
            let label = model.dict.get_label(label_id);
            let rel = label_id - nwords;
            println!(
                "{label}\tprecision {:.3}\trecall {:.3}\tf1 {:.3}\tsupport {}",
                meter.precision_label(rel),
                meter.recall_label(rel),
                meter.f1_score_label(rel),
                meter.gold_count_label(rel),
            );
        }
    }
    println!(
        "N\t{}\nP@{k}\t{:.3}\nR@{k}\t{:.3}",
        meter.examples(),
        meter.precision(),
        meter.recall(),
    );
    Ok(())
}

fn cmd_predict(model_path: &str, data: &str, k: usize, threshold: f32, proba: bool) -> FtResult<()> {
    let model = FastText::load_model(model_path)?;
    let lines: Box<dyn Iterator<Item = io::Result<String>>> = if data == "-" {
        Box::new(io::stdin().lock().lines())
    } else {
        let file = std::fs::File::open(data).map_err(|e| fasttext_core::FastTextError::io_at(data, e))?;
        Box::new(io::BufReader::new(file).lines())
    };

    let stdout = io::stdout();
    let mut out = stdout.lock();
    for line in lines {
        let line = line.map_err(|e| fasttext_core::FastTextError::io_at(data, e))?;
        if line.trim().is_empty() {
            continue;
        }
        let predictions = if proba {
            model.predict_proba(&line, k, threshold)?
        } else {
            model.predict(&line, k, threshold)?
        };
        let rendered: Vec<String> = predictions.iter().map(|(score, label)| format!("{label} {score:.6}")).collect();
        writeln!(out, "{}", rendered.join(" ")).ok();
    }
    Ok(())
}

fn cmd_nn(model_path: &str, k: usize) -> FtResult<()> {
    let model = FastText::load_model(model_path)?;
    println!("Query word? ");
    for line in io::stdin().lock().lines() {
        let word = line.map_err(|e| fasttext_core::FastTextError::io_at(model_path, e))?;
        let word = word.trim();
        if word.is_empty() {
            break;
        }
        for (score, neighbor) in model.nn(word, k) {
            println!("{neighbor} {score:.6}");
        }
        println!("Query word? ");
    }
    Ok(())
}

fn cmd_analogies(model_path: &str, k: usize) -> FtResult<()> {
    let model = FastText::load_model(model_path)?;
    println!("Query triplet (A - B + C)? ");
    for line in io::stdin().lock().lines() {
        let line = line.map_err(|e| fasttext_core::FastTextError::io_at(model_path, e))?;
        let words: Vec<&str> = line.split_whitespace().collect();
        if words.len() != 3 {
            break;
        }
        for (score, candidate) in model.analogies(words[0], words[1], words[2], k) {
            println!("{candidate} {score:.6}");
        }
        println!("Query triplet (A - B + C)? ");
    }
    Ok(())
}

fn cmd_quantize(opts: QuantizeOpts) -> FtResult<()> {
    let mut model = FastText::load_model(&format!("{}.bin", opts.output))?;
    model.quantize(opts.qout, opts.qnorm, opts.dsub, opts.cutoff, opts.retrain)?;
    model.save_model(&format!("{}.ftz", opts.output))?;
    Ok(())
}

fn cmd_dump(model_path: &str, target: &str) -> FtResult<()> {
    let model = FastText::load_model(model_path)?;
    match target {
        "args" => println!("{}", serde_json::to_string_pretty(&model.args).unwrap_or_default()),
        "dict" => print!("{}", model.dict.dump_words()),
        "input" => dump_matrix(&model.wi),
        "output" => dump_matrix(&model.wo),
        other => {
            return Err(fasttext_core::FastTextError::InvalidArgument(format!(
                "unknown dump target: {other} (expected args, dict, input or output)"
            )))
        }
    }
    Ok(())
}

fn dump_matrix(matrix: &fasttext_core::matrix::AnyMatrix) {
    use fasttext_core::matrix::MatrixOps;
    use fasttext_core::vector::Vector;
    println!("{} {}", matrix.rows(), matrix.cols());
    for i in 0..matrix.rows() {
        let mut row = Vector::zeros(matrix.cols());
        matrix.add_row_to_vector(&mut row, i, 1.0);
        println!("{}", format_vector(row.as_slice()));
    }
}

fn cmd_print_word_vectors(model_path: &str) -> FtResult<()> {
    let model = FastText::load_model(model_path)?;
    for line in io::stdin().lock().lines() {
        let word = line.map_err(|e| fasttext_core::FastTextError::io_at(model_path, e))?;
        let word = word.trim();
        if word.is_empty() {
            continue;
        }
        let v = model.get_word_vector(word);
        println!("{word} {}", format_vector(v.as_slice()));
    }
    Ok(())
}

fn cmd_print_sentence_vectors(model_path: &str) -> FtResult<()> {
    let model = FastText::load_model(model_path)?;
    for line in io::stdin().lock().lines() {
        let line = line.map_err(|e| fasttext_core::FastTextError::io_at(model_path, e))?;
        if line.trim().is_empty() {
            continue;
        }
        let v = model.get_sentence_vector(&line);
        println!("{}", format_vector(v.as_slice()));
    }
    Ok(())
}

fn cmd_print_ngrams(model_path: &str, word: &str) -> FtResult<()> {
    let model = FastText::load_model(model_path)?;
    println!("{word} {}", format_vector(model.get_word_vector(word).as_slice()));
    for (ngram, vector) in model.get_ngram_vectors(word) {
        println!("{ngram} {}", format_vector(vector.as_slice()));
    }
    Ok(())
}

fn format_vector(values: &[f32]) -> String {
    values.iter().map(|v| format!("{v:.5}")).collect::<Vec<_>>().join(" ")
}
