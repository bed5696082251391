use rep_tracker::classifier::{Classifier, CommandClassifier, MockClassifier};
use rep_tracker::config;
use rep_tracker::error::TrackerError;
use rep_tracker::input;
use rep_tracker::protocol::{self, Dispatcher};
use rep_tracker::session::{SessionStore, Tracker};

use std::io::{self, Write};
use std::path::PathBuf;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(
    name = "rep-tracker",
    about = "Count exercise repetitions from form-classifier confidences",
    version
)]
struct Args {
    #[command(subcommand)]
    command: Commands,
    /// Increase verbosity (-v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,
    /// Directory with one folder of model artifacts (meta.json) per exercise
    #[arg(long, env = "REP_TRACKER_MODELS_DIR", global = true)]
    models_dir: Option<PathBuf>,
    /// External classifier program; reads a sequence on stdin, prints a score
    #[arg(long, env = "REP_TRACKER_CLASSIFIER_CMD", global = true)]
    classifier_cmd: Option<String>,
    /// Argument passed to the classifier program (repeatable)
    #[arg(long = "classifier-arg", global = true, allow_hyphen_values = true)]
    classifier_args: Vec<String>,
    /// Confidence returned by the mock classifier when no program is set
    #[arg(long, default_value_t = 0.75, global = true)]
    mock_confidence: f32,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Handle one JSON request read from stdin and print one JSON response
    Predict,
    /// Handle line-delimited JSON requests, keeping per-session state
    Serve {
        /// Evict sessions idle for longer than this many seconds
        #[arg(long, default_value_t = 300)]
        session_ttl_secs: u64,
    },
}

fn init_tracing(verbosity: u8) {
    let level = match verbosity {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };

    let subscriber = tracing_subscriber::FmtSubscriber::builder()
        .with_env_filter(level)
        .with_writer(std::io::stderr)
        .finish();

    let _ = tracing::subscriber::set_global_default(subscriber);
}

fn build_classifier(args: &Args) -> Box<dyn Classifier> {
    match &args.classifier_cmd {
        Some(program) => {
            info!(program = %program, args = ?args.classifier_args, "using external classifier");
            Box::new(CommandClassifier::new(program.clone(), args.classifier_args.clone()))
        }
        None => {
            warn!(
                confidence = args.mock_confidence,
                "no classifier configured; using mock predictions"
            );
            Box::new(MockClassifier {
                confidence: args.mock_confidence,
            })
        }
    }
}

fn emit(out: &mut impl Write, response: &serde_json::Value, pretty: bool) -> Result<()> {
    let text = if pretty {
        serde_json::to_string_pretty(response)
    } else {
        serde_json::to_string(response)
    }
    .context("failed to encode response")?;
    writeln!(out, "{text}").context("failed to write response")?;
    out.flush().context("failed to flush stdout")
}

fn main() -> Result<()> {
    let args = Args::parse();
    init_tracing(args.verbose);

    let table = config::load_profile_table(args.models_dir.as_deref());
    let dispatcher = Dispatcher::new(table, build_classifier(&args));
    let mut stdout = io::stdout().lock();

    match args.command {
        Commands::Predict => {
            let response = match input::load_payload() {
                Ok(raw) => dispatcher.handle_raw(&mut Tracker::new(), &raw),
                Err(e) => protocol::error_response(&TrackerError::InvalidInput(format!("{e:#}"))),
            };
            emit(&mut stdout, &response, true)?;
        }
        Commands::Serve { session_ttl_secs } => {
            let mut store = SessionStore::new(Duration::from_secs(session_ttl_secs));
            info!(session_ttl_secs, "serving line-delimited requests");
            let mut handled = 0usize;
            for line in input::request_lines(io::stdin().lock()) {
                let response = match line {
                    Ok(raw) => dispatcher.handle_session(&mut store, &raw, Instant::now()),
                    Err(e) => {
                        protocol::error_response(&TrackerError::InvalidInput(format!("{e:#}")))
                    }
                };
                emit(&mut stdout, &response, false)?;
                handled += 1;
            }
            info!(handled, sessions = store.len(), "input closed; shutting down");
        }
    }

    Ok(())
}
