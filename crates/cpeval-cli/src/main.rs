mod config;

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde_json::Value;
use tracing::{info, warn};
use tracing_subscriber::fmt::writer::MakeWriterExt;

use cpeval_core::{
    score_streams, PromptBuilder, PromptStyle, SamplingParams, ScoreSummary, TextGenerator,
    Thresholds, TokenCounter,
};
use cpeval_gen::{
    jsonl_records, postprocess_records, read_jsonl, run_batch, ApproxTokenCounter, BatchOptions,
    ProviderConfig, ResilientGenerator,
};

use crate::config::{load_config, show_config_path, Config};

#[derive(Parser)]
#[command(
    name = "cpeval",
    version,
    about = "Competitive-programming code generation benchmark runner"
)]
struct Cli {
    /// Path to a TOML config file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Also write logs to this file
    #[arg(long, global = true)]
    log_file: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Generate candidate solutions for every problem in a JSONL dataset
    Generate {
        /// Problem dataset (one JSON object per line)
        #[arg(short, long)]
        input: PathBuf,

        /// Output JSONL. Default: program_synthesis_eval_<model>_<timestamp>.jsonl
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Model identifier (overrides config)
        #[arg(short, long)]
        model: Option<String>,

        /// Provider kind: openai or gemini (overrides config)
        #[arg(long)]
        provider: Option<String>,

        /// Provider endpoint (overrides config)
        #[arg(long)]
        endpoint: Option<String>,

        /// API key (default: read from the configured environment variable)
        #[arg(long)]
        api_key: Option<String>,

        /// Sampling temperature
        #[arg(short, long)]
        temperature: Option<f64>,

        /// Candidates per problem
        #[arg(short = 'k', long)]
        candidate_num: Option<usize>,

        /// Output token budget per candidate
        #[arg(long)]
        max_output_tokens: Option<usize>,

        /// Embed the worked example before each problem
        #[arg(long)]
        one_shot: bool,

        /// Store extracted payloads instead of raw model output
        #[arg(long)]
        extract: bool,
    },

    /// Extract code from every candidate slot of a generation output file
    Postprocess {
        /// Generation output JSONL
        #[arg(short, long)]
        input: PathBuf,

        /// Postprocessed JSONL
        #[arg(short, long)]
        output: PathBuf,

        /// Candidate slots per record (default: config candidate_num)
        #[arg(short = 'k', long)]
        candidate_num: Option<usize>,
    },

    /// Compute Easy/Hard pass@k from attempted and solved records
    Score {
        /// All attempted problems (JSONL with `difficulty`)
        #[arg(long)]
        results: PathBuf,

        /// Problems the execution harness marked solved (JSONL with `difficulty`)
        #[arg(long)]
        exec_results: PathBuf,

        /// Label for the summary
        #[arg(short, long)]
        model_name: String,

        /// Print only the JSON summary
        #[arg(long)]
        json: bool,
    },

    /// Show the resolved configuration
    Config,
}

/// `RUST_LOG` directives when set and valid, `info` otherwise.
fn log_filter(directives: Option<&str>) -> tracing_subscriber::EnvFilter {
    directives
        .filter(|d| !d.trim().is_empty())
        .and_then(|d| tracing_subscriber::EnvFilter::try_new(d).ok())
        .unwrap_or_else(|| tracing_subscriber::EnvFilter::new("info"))
}

fn init_logging(log_file: Option<&Path>) -> Result<()> {
    let filter = log_filter(std::env::var("RUST_LOG").ok().as_deref());

    match log_file {
        Some(path) => {
            let file = File::create(path)
                .with_context(|| format!("creating log file {}", path.display()))?;
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_ansi(false)
                .with_writer(std::io::stderr.and(Mutex::new(file)))
                .init();
        }
        None => {
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(std::io::stderr)
                .init();
        }
    }
    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.log_file.as_deref())?;
    let config = load_config(cli.config.as_deref())?;

    match cli.command {
        Commands::Generate {
            input,
            output,
            model,
            provider,
            endpoint,
            api_key,
            temperature,
            candidate_num,
            max_output_tokens,
            one_shot,
            extract,
        } => cmd_generate(
            &config,
            GenerateArgs {
                input,
                output,
                model,
                provider,
                endpoint,
                api_key,
                temperature,
                candidate_num,
                max_output_tokens,
                one_shot,
                extract,
            },
        ),
        Commands::Postprocess {
            input,
            output,
            candidate_num,
        } => cmd_postprocess(
            &input,
            &output,
            candidate_num.unwrap_or(config.generation.candidate_num),
        ),
        Commands::Score {
            results,
            exec_results,
            model_name,
            json,
        } => cmd_score(&results, &exec_results, &model_name, json),
        Commands::Config => cmd_config(&config, cli.config.as_deref()),
    }
}

// ---------------------------------------------------------------------------
// Generation
// ---------------------------------------------------------------------------

struct GenerateArgs {
    input: PathBuf,
    output: Option<PathBuf>,
    model: Option<String>,
    provider: Option<String>,
    endpoint: Option<String>,
    api_key: Option<String>,
    temperature: Option<f64>,
    candidate_num: Option<usize>,
    max_output_tokens: Option<usize>,
    one_shot: bool,
    extract: bool,
}

fn default_output_path(model: &str) -> PathBuf {
    let stamp = chrono::Local::now().format("%Y%m%d-%H%M%S");
    let model = model.replace(['/', ':'], "_");
    PathBuf::from(format!("program_synthesis_eval_{model}_{stamp}.jsonl"))
}

#[cfg(feature = "hf-tokenizer")]
fn token_counter(config: &Config) -> Result<Box<dyn TokenCounter>> {
    match &config.tokenizer.path {
        Some(path) => Ok(Box::new(cpeval_gen::HfTokenCounter::from_file(Path::new(path))?)),
        None => Ok(Box::new(ApproxTokenCounter::new(config.tokenizer.bytes_per_token))),
    }
}

#[cfg(not(feature = "hf-tokenizer"))]
fn token_counter(config: &Config) -> Result<Box<dyn TokenCounter>> {
    if config.tokenizer.path.is_some() {
        warn!("tokenizer.path is set but the hf-tokenizer feature is disabled; estimating tokens");
    }
    Ok(Box::new(ApproxTokenCounter::new(config.tokenizer.bytes_per_token)))
}

fn cmd_generate(config: &Config, args: GenerateArgs) -> Result<()> {
    let kind = match &args.provider {
        Some(p) => p.parse()?,
        None => config.provider.kind()?,
    };
    let model = args.model.unwrap_or_else(|| config.provider.model.clone());
    let api_key = args
        .api_key
        .or_else(|| std::env::var(config.provider.api_key_env(kind)).ok());
    if api_key.is_none() {
        warn!(
            "no API key given and ${} is unset; sending unauthenticated requests",
            config.provider.api_key_env(kind)
        );
    }

    let provider: Box<dyn TextGenerator> = ProviderConfig {
        kind,
        endpoint: args.endpoint.unwrap_or_else(|| config.provider.endpoint(kind)),
        model: model.clone(),
        api_key,
        timeout: Duration::from_secs(config.provider.timeout_secs),
        max_context_tokens: config.provider.max_context_tokens,
    }
    .build();

    let style = if args.one_shot {
        PromptStyle::OneShot
    } else {
        config.generation.prompt_style()?
    };
    let builder = PromptBuilder::new(config.generation.catalogue()?)
        .with_style(style)
        .with_template(config.generation.chat_template()?);

    let generator = ResilientGenerator::new(
        provider,
        token_counter(config)?,
        config.retry.policy()?,
        config.generation.generator_config()?,
    );

    let options = BatchOptions {
        params: SamplingParams {
            temperature: args.temperature.unwrap_or(config.generation.temperature),
            candidate_count: args.candidate_num.unwrap_or(config.generation.candidate_num),
            max_output_tokens: args
                .max_output_tokens
                .unwrap_or(config.generation.max_output_tokens),
        },
        extract: args.extract,
    };

    let records = read_jsonl(&args.input)
        .with_context(|| format!("reading problems from {}", args.input.display()))?;
    let output = args.output.unwrap_or_else(|| default_output_path(&model));
    let file = File::create(&output).with_context(|| format!("creating {}", output.display()))?;
    let mut out = BufWriter::new(file);

    info!(
        "generating {} candidate(s) for {} problems with {} (temperature {})",
        options.params.candidate_count,
        records.len(),
        generator.model_name(),
        options.params.temperature
    );
    let stats = run_batch(records, &builder, &generator, &options, &mut out)
        .context("generation run aborted")?;
    out.flush()?;

    println!(
        "Generated {} problems ({} fully failed, {} empty slots, {} over budget, {} over context) -> {}",
        stats.problems,
        stats.failed,
        stats.empty_slots,
        stats.discarded_slots,
        stats.over_context,
        output.display()
    );
    Ok(())
}

// ---------------------------------------------------------------------------
// Postprocess / score / config
// ---------------------------------------------------------------------------

fn cmd_postprocess(input: &Path, output: &Path, candidate_num: usize) -> Result<()> {
    let records =
        jsonl_records(input).with_context(|| format!("opening {}", input.display()))?;
    let file = File::create(output).with_context(|| format!("creating {}", output.display()))?;
    let mut out = BufWriter::new(file);
    let written = postprocess_records(records, candidate_num, &mut out)
        .with_context(|| format!("postprocessing {}", input.display()))?;
    out.flush()?;
    println!("Postprocessed {written} records -> {}", output.display());
    Ok(())
}

/// `{model: {"Easy": pct, "Hard": pct}}`
fn score_report(model_name: &str, summary: &ScoreSummary) -> Result<Value> {
    let mut report = serde_json::Map::new();
    report.insert(model_name.to_string(), serde_json::to_value(summary)?);
    Ok(Value::Object(report))
}

fn cmd_score(results: &Path, exec_results: &Path, model_name: &str, json_only: bool) -> Result<()> {
    let attempted =
        jsonl_records(results).with_context(|| format!("opening {}", results.display()))?;
    let solved = jsonl_records(exec_results)
        .with_context(|| format!("opening {}", exec_results.display()))?;
    let summary = score_streams(Thresholds::default(), attempted, solved)
        .context("scoring failed")?;

    if !json_only {
        println!("{:<10} {:>10} {:>10} {:>10}", "Band", "Attempted", "Solved", "Pass@k");
        println!("{}", "-".repeat(43));
        for stratum in [&summary.easy, &summary.hard] {
            println!(
                "{:<10} {:>10} {:>10} {:>9.2}%",
                stratum.band.to_string(),
                stratum.attempted,
                stratum.solved,
                stratum.percentage
            );
        }
        println!();
    }
    println!("{}", serde_json::to_string(&score_report(model_name, &summary)?)?);
    Ok(())
}

fn cmd_config(config: &Config, explicit: Option<&Path>) -> Result<()> {
    println!("Config: {}", show_config_path(explicit));
    println!();
    let kind = config.provider.kind()?;
    println!("[provider]");
    println!("  kind               = {}", config.provider.kind);
    println!("  endpoint           = {}", config.provider.endpoint(kind));
    println!("  model              = {}", config.provider.model);
    println!("  api_key_env        = {}", config.provider.api_key_env(kind));
    println!("  timeout_secs       = {}", config.provider.timeout_secs);
    match config.provider.max_context_tokens {
        Some(n) => println!("  max_context_tokens = {n}"),
        None => println!("  max_context_tokens = (unknown)"),
    }
    println!("[generation]");
    println!("  temperature        = {}", config.generation.temperature);
    println!("  candidate_num      = {}", config.generation.candidate_num);
    println!("  max_output_tokens  = {}", config.generation.max_output_tokens);
    println!("  cooldown_secs      = {}", config.generation.cooldown_secs);
    println!("  prompt_style       = {}", config.generation.prompt_style);
    println!("  chat_template      = {}", config.generation.chat_template);
    println!("  catalogue          = {}", config.generation.catalogue);
    println!("[retry]");
    println!("  max_attempts       = {}", config.retry.max_attempts);
    println!("  min_delay_secs     = {}", config.retry.min_delay_secs);
    println!("  max_delay_secs     = {}", config.retry.max_delay_secs);
    println!("  jitter             = {}", config.retry.jitter);
    println!("[tokenizer]");
    match &config.tokenizer.path {
        Some(p) => println!("  path               = {p}"),
        None => println!(
            "  path               = (none, ~{} bytes/token)",
            config.tokenizer.bytes_per_token
        ),
    }
    let thresholds = Thresholds::default();
    println!();
    println!(
        "Difficulty bands: Easy < {} <= Hard < {} (higher excluded)",
        thresholds.hard_bar, thresholds.non_bar
    );
    Ok(())
}
