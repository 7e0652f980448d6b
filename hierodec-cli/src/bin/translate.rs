//! Batch translation binary: loads the model bundle, decodes sentences from
//! a file or stdin, and writes one translation per line to stdout.

use std::fs::File;
use std::io::{self, BufRead, BufReader, BufWriter, Write};
use std::path::PathBuf;
use std::time::Instant;

use anyhow::Context;
use clap::Parser;
use hierodec_engine::{ModelPaths, Models, SentenceDecoder, Settings};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Hierarchical phrase-based translation decoder
#[derive(Parser, Debug)]
#[command(name = "hierodec")]
#[command(about = "Hierarchical phrase-based translation decoder", long_about = None)]
struct Args {
    /// Decoder configuration (TOML)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Source vocabulary, one word per line
    #[arg(long)]
    src_vocab: PathBuf,

    /// Target vocabulary, one word per line
    #[arg(long)]
    tgt_vocab: PathBuf,

    /// Rule table
    #[arg(long)]
    ruletable: PathBuf,

    /// ARPA language model (omit to decode without one)
    #[arg(long)]
    lm: Option<PathBuf>,

    /// Source function-word list, one word per line
    #[arg(long)]
    fwords: Option<PathBuf>,

    /// Input sentences, one per line of `surface#TAG` tokens (default: stdin)
    #[arg(short, long)]
    input: Option<PathBuf>,

    /// Write n-best entries as JSON lines to this file
    #[arg(long)]
    nbest: Option<PathBuf>,

    /// Print the derivation trace of each best candidate to stderr
    #[arg(long)]
    trace: bool,

    /// Enable verbose logging (debug level)
    #[arg(short, long)]
    verbose: bool,
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let default_level = if args.verbose { "debug" } else { "info" };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level)),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(io::stderr))
        .init();

    let settings = match &args.config {
        Some(path) => {
            Settings::load(path).with_context(|| format!("loading config {}", path.display()))?
        }
        None => Settings::default(),
    };

    let paths = ModelPaths {
        src_vocab: args.src_vocab.clone(),
        tgt_vocab: args.tgt_vocab.clone(),
        ruletable: args.ruletable.clone(),
        lm: args.lm.clone(),
        function_words: args.fwords.clone(),
    };
    let models = Models::load(&paths, &settings).context("loading models")?;

    let reader: Box<dyn BufRead> = match &args.input {
        Some(path) => Box::new(BufReader::new(
            File::open(path).with_context(|| format!("opening input {}", path.display()))?,
        )),
        None => Box::new(BufReader::new(io::stdin())),
    };
    let mut nbest_out = match &args.nbest {
        Some(path) => Some(BufWriter::new(File::create(path).with_context(|| {
            format!("creating n-best output {}", path.display())
        })?)),
        None => None,
    };

    let stdout = io::stdout();
    let mut out = BufWriter::new(stdout.lock());
    for (sen_id, line) in reader.lines().enumerate() {
        let line = line.context("reading input")?;
        let started = Instant::now();
        let mut decoder = SentenceDecoder::new(&models, &settings, &line);
        let translation = decoder.translate_sentence();
        writeln!(out, "{}", translation)?;
        tracing::debug!(
            sen_id,
            tokens = decoder.sen_len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "sentence decoded"
        );

        if let Some(w) = nbest_out.as_mut() {
            for info in decoder.get_tune_info(sen_id) {
                serde_json::to_writer(&mut *w, &info)?;
                writeln!(w)?;
            }
        }
        if args.trace {
            eprintln!("{}", decoder.get_applied_rules(sen_id).concat());
        }
    }
    out.flush()?;
    if let Some(mut w) = nbest_out {
        w.flush()?;
    }
    Ok(())
}
