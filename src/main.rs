//! papercast: Daily narrated audio programs generated from article feeds.

use std::path::PathBuf;
use std::sync::Arc;

use chrono::{Local, NaiveDate};
use clap::{Parser, Subcommand};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use papercast::article::{ArticleSource, HttpArticleSource};
use papercast::audio::{AudioAssembler, FfmpegTool, MediaRunner};
use papercast::builder::{resolve_source, DailyStrategy, ProgramBuilder};
use papercast::config::Config;
use papercast::error::error_chain;
use papercast::generation::{LanguageModel, OllamaClient};
use papercast::program::{BuildOutcome, RegenerationMode};
use papercast::speech::{HttpSynthesizer, Normalizer, SpeechSynthesizer};
use papercast::storage::{HttpBucketStore, ObjectStorage};
use papercast::store::{generate_attempts_report, JsonStore, ProgramStore};

#[derive(Parser, Debug)]
#[command(name = "papercast", about = "Daily narrated audio programs from article feeds")]
struct Args {
    /// Path to papercast.yaml
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Enable verbose (debug) logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Build the daily program
    Build {
        /// Program date (YYYY-MM-DD, defaults to today)
        #[arg(long)]
        date: Option<NaiveDate>,

        /// Listener note worked into the greeting
        #[arg(long)]
        note: Option<String>,
    },

    /// Build every active personalized feed program
    BuildFeeds {
        /// Program date (YYYY-MM-DD, defaults to today)
        #[arg(long)]
        date: Option<NaiveDate>,
    },

    /// Rebuild a stored program's audio, optionally with a fresh script
    Regenerate {
        /// Program id to regenerate
        #[arg(long)]
        program: String,

        /// script-and-audio or audio-only
        #[arg(long)]
        mode: RegenerationMode,
    },

    /// Print a Markdown report of the day's build attempts
    Attempts {
        /// Report date (YYYY-MM-DD, defaults to today)
        #[arg(long)]
        date: Option<NaiveDate>,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    // Initialize logging (suppress noisy hyper/reqwest internals)
    let filter = if args.verbose {
        EnvFilter::new("debug,hyper=info,reqwest=info")
    } else {
        EnvFilter::new("info,hyper=warn,reqwest=warn")
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!("papercast starting");

    let config = Config::load(args.config.as_deref());

    match args.command {
        Command::Build { date, note } => build_daily(&config, date.unwrap_or_else(today), note).await,
        Command::BuildFeeds { date } => build_feeds(&config, date.unwrap_or_else(today)).await,
        Command::Regenerate { program, mode } => regenerate(&config, &program, mode).await,
        Command::Attempts { date } => attempts(&config, date.unwrap_or_else(today)).await,
    }
}

fn today() -> NaiveDate {
    Local::now().date_naive()
}

/// Wires the builder against the configured external services. Returns
/// the default article source too so strategies can share it.
fn wire(config: &Config) -> Result<(Arc<ProgramBuilder>, Arc<dyn ArticleSource>), Box<dyn std::error::Error>> {
    let source_config = resolve_source(config, &config.build.source)?;
    let source: Arc<dyn ArticleSource> = Arc::new(HttpArticleSource::new(
        &source_config.host,
        source_config.timeout_secs,
    ));

    let model: Arc<dyn LanguageModel> = Arc::new(OllamaClient::new(
        &config.ollama.host,
        &config.ollama.model,
        &config.ollama.embedding_model,
        config.ollama.timeout_secs,
    ));

    let normalizer = Normalizer::new(&config.tts.pause_marker, config.tts.glossary.clone());
    let synthesizer: Arc<dyn SpeechSynthesizer> = Arc::new(HttpSynthesizer::new(
        &config.tts.host,
        &config.tts.model,
        config.tts.speed,
        config.tts.timeout_secs,
        normalizer,
    ));

    let runner: Arc<dyn MediaRunner> = Arc::new(FfmpegTool::new(
        &config.audio.ffmpeg_bin,
        &config.audio.ffprobe_bin,
        config.audio.command_timeout_secs,
    ));
    let assembler = AudioAssembler::new(runner, config.audio.clone());

    let storage: Arc<dyn ObjectStorage> = Arc::new(HttpBucketStore::new(
        &config.storage.endpoint,
        config.storage.public_base(),
        config.storage.token.as_deref(),
        config.storage.timeout_secs,
    ));

    let store: Arc<dyn ProgramStore> = Arc::new(JsonStore::new(config.store.resolve_data_dir()));

    let builder = ProgramBuilder::new(
        store,
        model,
        synthesizer,
        storage,
        assembler,
        source.clone(),
        config,
    );
    Ok((Arc::new(builder), source))
}

async fn build_daily(
    config: &Config,
    date: NaiveDate,
    note: Option<String>,
) -> Result<(), Box<dyn std::error::Error>> {
    let (builder, source) = wire(config)?;
    let strategy = DailyStrategy::new(source, config.build.clone(), &config.tts.voice, note);
    match builder.build_program(&strategy, date).await? {
        BuildOutcome::Built(program) => {
            info!(
                "Built {} ({} ms, {} chapters): {}",
                program.title,
                program.duration_ms,
                program.chapters.chapters.len(),
                program.audio_url
            );
        }
        BuildOutcome::Skipped { reason } => info!("Skipped: {reason}"),
    }
    Ok(())
}

async fn build_feeds(config: &Config, date: NaiveDate) -> Result<(), Box<dyn std::error::Error>> {
    let (builder, _source) = wire(config)?;
    let feeds = config.active_feeds();
    if feeds.is_empty() {
        info!("No active feeds configured");
        return Ok(());
    }

    // Each feed builds on its own; a misconfigured feed fails only itself.
    let shared = Arc::new(config.clone());
    let mut handles = Vec::with_capacity(feeds.len());
    for feed in feeds {
        let builder = builder.clone();
        let config = shared.clone();
        let feed = feed.clone();
        let name = feed.name.clone();
        handles.push((
            name,
            tokio::spawn(async move { builder.build_feed(&config, &feed, date).await }),
        ));
    }

    let mut failures = 0usize;
    for (name, handle) in handles {
        match handle.await {
            Ok(Ok(BuildOutcome::Built(program))) => {
                info!("{name}: built ({})", program.audio_url);
            }
            Ok(Ok(BuildOutcome::Skipped { reason })) => info!("{name}: skipped ({reason})"),
            Ok(Err(e)) => {
                error!("{name}: {}", error_chain(&e));
                failures += 1;
            }
            Err(e) => {
                error!("{name}: build task panicked: {e}");
                failures += 1;
            }
        }
    }

    if failures > 0 {
        return Err(format!("{failures} feed build(s) failed").into());
    }
    Ok(())
}

async fn regenerate(
    config: &Config,
    program_id: &str,
    mode: RegenerationMode,
) -> Result<(), Box<dyn std::error::Error>> {
    let (builder, _source) = wire(config)?;
    let program = builder.regenerate_program(program_id, mode).await?;
    info!("Regenerated {}: {}", program.id, program.audio_url);
    Ok(())
}

async fn attempts(config: &Config, date: NaiveDate) -> Result<(), Box<dyn std::error::Error>> {
    let store = JsonStore::new(config.store.resolve_data_dir());
    let attempts = store.attempts_on(date).await?;
    println!("{}", generate_attempts_report(date, &attempts));
    Ok(())
}
