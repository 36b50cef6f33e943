//! PFA training binary.
//!
//! Loads `<pattern>_Features.csv`, `<pattern>_TD.csv` and (for attention < 1)
//! `<pattern>_AmSegs.csv` from the data directory, trains every language and
//! writes the per-epoch probability log to the output directory.

use clap::{Parser, ValueEnum};
use pfa::data::{load_ambiguity_table, FeatureTable, PatternFiles, TrainingData};
use pfa::logging::init_tracing;
use pfa::{
    prepare, Config, CsvSink, CsvViolationStore, JsonlSink, OutputSink, PfaResult, Simulation,
    UniverseShape,
};
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use std::fs::{self, File};
use std::io::BufWriter;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::{debug, error, info};

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
enum OutputFormat {
    Csv,
    Jsonl,
}

impl OutputFormat {
    fn extension(self) -> &'static str {
        match self {
            OutputFormat::Csv => "csv",
            OutputFormat::Jsonl => "jsonl",
        }
    }
}

#[derive(Parser, Debug)]
#[command(
    name = "pfa-train",
    about = "Train a MaxEnt phonotactic learner with probabilistic feature attention"
)]
struct Args {
    /// Number of training epochs per repetition
    epochs: usize,

    /// Learning rate (eta)
    eta: f64,

    /// Pattern name selecting the input files
    pattern: String,

    /// Probability of attending to each feature, in [0, 1]
    attention: f64,

    /// Repetitions per language
    reps: usize,

    /// Directory containing the input CSV files
    #[arg(long, default_value = ".")]
    data_dir: PathBuf,

    /// Directory for the output log and violation cache
    #[arg(long, default_value = ".")]
    output_dir: PathBuf,

    /// RNG seed (random if omitted)
    #[arg(long)]
    seed: Option<u64>,

    /// Output log format
    #[arg(long, value_enum, default_value_t = OutputFormat::Csv)]
    format: OutputFormat,

    /// Enumerate only words of exactly the maximum length
    #[arg(long, default_value_t = false)]
    exact_length: bool,

    /// Log progress every N epochs
    #[arg(long, default_value_t = 10)]
    progress_every: usize,

    /// Tracing filter directive
    #[arg(long, default_value = "info")]
    log_level: String,
}

fn main() -> ExitCode {
    let args = Args::parse();
    init_tracing(&args.log_level);

    match run(args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "run failed");
            ExitCode::FAILURE
        }
    }
}

fn run(args: Args) -> PfaResult<()> {
    let config = Config {
        epochs: args.epochs,
        eta: args.eta,
        attention: args.attention,
        reps: args.reps,
        seed: args.seed,
        progress_every: args.progress_every,
        universe: if args.exact_length {
            UniverseShape::Exact
        } else {
            UniverseShape::UpTo
        },
    };
    config.validate()?;

    let files = PatternFiles::new(&args.data_dir, &args.output_dir, &args.pattern);
    info!(
        pattern = files.pattern(),
        epochs = config.epochs,
        eta = config.eta,
        attention = config.attention,
        reps = config.reps,
        "starting run"
    );

    let feature_table = FeatureTable::from_path(&files.features())?;
    let training = TrainingData::from_path(&files.training())?;
    let ambiguity = if config.attention < 1.0 {
        Some(load_ambiguity_table(&files.ambiguous_segments())?)
    } else {
        None
    };

    fs::create_dir_all(files.output_dir())?;
    let store = CsvViolationStore::new(files.output_dir());
    let prepared = prepare(
        &feature_table,
        &training,
        ambiguity.as_ref(),
        &config,
        &store,
        files.pattern(),
    )?;

    let seed = config.seed.unwrap_or_else(rand::random);
    info!(seed, "rng seeded");
    let mut rng = ChaCha8Rng::seed_from_u64(seed);

    let output_path = files.output(config.attention, args.format.extension());
    let writer = BufWriter::new(File::create(&output_path)?);
    let mut sink: Box<dyn OutputSink> = match args.format {
        OutputFormat::Csv => Box::new(CsvSink::new(writer)?),
        OutputFormat::Jsonl => Box::new(JsonlSink::new(writer)),
    };

    let summary = Simulation::new(&prepared, &config).run(&training, &mut sink, &mut rng)?;
    info!(
        records = summary.records,
        output = %output_path.display(),
        "run complete"
    );

    for outcome in &summary.languages {
        for (name, weight) in outcome.ranked(&prepared.constraints).iter().take(10) {
            debug!(language = %outcome.name, constraint = %name, weight, "final weight");
        }
    }
    Ok(())
}
