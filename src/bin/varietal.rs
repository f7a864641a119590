//! Varietal CLI - generate marketing copy across configured LLM providers
//!
//! `generate` calls real providers; `distribute`, `varieties` and
//! `providers` work offline.

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use serde::Serialize;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use varietal::core::variety::config_for;
use varietal::core::{AdReference, VarietyAllocation};
use varietal::{
    distribute, Config, EventBus, GenerationMode, GenerationOutcome, GenerationRequest, IntentData,
    LoggingObserver, MetricsObserver, OrchestrationRequest, Orchestrator, ProviderRegistry, Tone,
    Variety,
};

/// Varietal - multi-model marketing copy generation
#[derive(Parser)]
#[command(name = "varietal")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Path to a TOML configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Output format
    #[arg(short, long, value_enum, default_value = "text", global = true)]
    format: OutputFormat,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Validate configuration and exit
    #[arg(long)]
    validate_config: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

/// Output format for CLI responses
#[derive(Clone, Copy, ValueEnum, Default)]
enum OutputFormat {
    /// Human-readable text output
    #[default]
    Text,
    /// JSON output for programmatic use
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// Generate copy candidates
    Generate {
        /// Copy brief (or - for stdin)
        #[arg(short, long)]
        prompt: String,

        /// single, ensemble or variety
        #[arg(short, long, default_value = "variety")]
        mode: GenerationMode,

        /// Total candidates requested
        #[arg(short = 'n', long, default_value = "8")]
        count: usize,

        /// Minimum characters per copy
        #[arg(long, default_value = "30")]
        min_chars: usize,

        /// Maximum characters per copy
        #[arg(long, default_value = "120")]
        max_chars: usize,

        /// Restrict variety mode to these varieties (repeatable)
        #[arg(long = "variety")]
        varieties: Vec<Variety>,

        /// Tone of voice
        #[arg(long)]
        tone: Option<Tone>,

        /// Registry key tried first
        #[arg(long)]
        model: Option<String>,

        /// Copies kept after reranking
        #[arg(long)]
        top_n: Option<usize>,

        /// Ensemble mode total, overriding the config
        #[arg(long)]
        ensemble_total: Option<usize>,

        /// Skip the judge rerank
        #[arg(long)]
        no_rerank: bool,

        /// Product name for the intent block
        #[arg(long)]
        product: Option<String>,

        /// Target audience for the intent block
        #[arg(long)]
        audience: Option<String>,

        /// Product benefit (repeatable)
        #[arg(long = "benefit")]
        benefits: Vec<String>,

        /// Keyword to weave in (repeatable)
        #[arg(long = "keyword")]
        keywords: Vec<String>,

        /// JSON file with ad references ([{"headline", "body", "platform"}])
        #[arg(long)]
        references: Option<PathBuf>,

        /// Print the metrics report after the copies
        #[arg(long)]
        metrics: bool,
    },

    /// Show how a total is split across varieties
    Distribute {
        /// Total candidates
        #[arg(short, long)]
        total: usize,

        /// Varieties to split across (repeatable; default all)
        #[arg(long = "variety")]
        varieties: Vec<Variety>,
    },

    /// Print the variety strategy table
    Varieties,

    /// Show registered providers and whether they have credentials
    Providers,
}

// ============================================================================
// Main Entry Point
// ============================================================================

fn main() -> ExitCode {
    let cli = Cli::parse();

    let log_level = match cli.verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();

    if cli.validate_config {
        return execute_validate_config(cli.config.as_deref());
    }

    let command = match cli.command {
        Some(cmd) => cmd,
        None => {
            eprintln!("Error: A subcommand is required. Use --help for usage.");
            return ExitCode::from(2);
        }
    };

    let result = load_config(cli.config.as_deref()).and_then(|config| match command {
        Commands::Generate {
            prompt,
            mode,
            count,
            min_chars,
            max_chars,
            varieties,
            tone,
            model,
            top_n,
            ensemble_total,
            no_rerank,
            product,
            audience,
            benefits,
            keywords,
            references,
            metrics,
        } => {
            let mut generation =
                GenerationRequest::new(read_prompt(prompt)?, min_chars, max_chars, count);
            if let Some(tone) = tone {
                generation = generation.with_tone(tone);
            }

            let mut intent = IntentData::default().with_benefits(benefits).with_keywords(keywords);
            intent.product_name = product.unwrap_or_default();
            intent.target_audience = audience.unwrap_or_default();
            intent.tone = tone;

            let mut request = OrchestrationRequest::new(generation)
                .with_intent(intent)
                .with_varieties(varieties)
                .with_references(load_references(references.as_deref())?);
            request.preferred_model = model;
            request.top_n = top_n;
            request.ensemble_total = ensemble_total;
            if no_rerank {
                request.rerank = Some(false);
            }

            execute_generate(cli.format, &config, request, mode, metrics)
        }

        Commands::Distribute { total, varieties } => {
            execute_distribute(cli.format, total, &varieties)
        }

        Commands::Varieties => execute_varieties(cli.format),

        Commands::Providers => execute_providers(cli.format, &config),
    });

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

// ============================================================================
// Helpers
// ============================================================================

fn load_config(path: Option<&Path>) -> Result<Config> {
    match path {
        Some(path) => Config::load(path).with_context(|| format!("loading {}", path.display())),
        None => Ok(Config::default()),
    }
}

fn read_prompt(prompt: String) -> Result<String> {
    if prompt != "-" {
        return Ok(prompt);
    }
    let mut buf = String::new();
    io::stdin()
        .read_to_string(&mut buf)
        .context("reading prompt from stdin")?;
    if buf.trim().is_empty() {
        bail!("prompt on stdin was empty");
    }
    Ok(buf)
}

fn load_references(path: Option<&Path>) -> Result<Vec<AdReference>> {
    let Some(path) = path else {
        return Ok(Vec::new());
    };
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("reading {}", path.display()))?;
    serde_json::from_str(&text).with_context(|| format!("parsing references in {}", path.display()))
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

// ============================================================================
// Command Implementations
// ============================================================================

fn execute_validate_config(path: Option<&Path>) -> ExitCode {
    let config = match path {
        Some(path) => match std::fs::read_to_string(path) {
            Ok(text) => match toml::from_str::<Config>(&text) {
                Ok(config) => config,
                Err(e) => {
                    eprintln!("Configuration errors:\n  - {}", e);
                    return ExitCode::FAILURE;
                }
            },
            Err(e) => {
                eprintln!("Error: cannot read {}: {}", path.display(), e);
                return ExitCode::FAILURE;
            }
        },
        None => Config::default(),
    };

    match config.validate() {
        Ok(()) => {
            println!("Configuration is valid.");
            ExitCode::SUCCESS
        }
        Err(errors) => {
            eprintln!("Configuration errors:");
            for error in errors {
                eprintln!("  - {}", error);
            }
            ExitCode::FAILURE
        }
    }
}

fn execute_generate(
    format: OutputFormat,
    config: &Config,
    request: OrchestrationRequest,
    mode: GenerationMode,
    show_metrics: bool,
) -> Result<()> {
    let runtime = tokio::runtime::Runtime::new().context("starting tokio runtime")?;

    let (outcome, report) = runtime.block_on(async {
        let bus = EventBus::default();
        let logging = tokio::spawn(LoggingObserver::new(&bus).run());
        let observer = MetricsObserver::new(&bus);
        let metrics = observer.metrics();
        let collector = tokio::spawn(observer.run());

        let orchestrator = Orchestrator::from_config(config).with_event_bus(bus);
        let outcome = orchestrator.orchestrate(&request, mode).await;

        // Closing the last sender lets both observers drain and stop
        drop(orchestrator);
        let _ = tokio::join!(logging, collector);

        let report = metrics.lock().map(|m| m.report()).unwrap_or_default();
        (outcome, report)
    });
    let outcome = outcome?;

    match format {
        OutputFormat::Json => print_json(&outcome)?,
        OutputFormat::Text => print_outcome(&outcome),
    }
    if show_metrics {
        eprintln!("{}", report);
    }
    Ok(())
}

fn print_outcome(outcome: &GenerationOutcome) {
    if outcome.copies.is_empty() {
        println!("No copies survived generation and filtering.");
    }
    for (i, copy) in outcome.copies.iter().enumerate() {
        let variety = copy.source_variety.map(|v| v.to_string()).unwrap_or_else(|| "-".into());
        let rank = copy.rank.map(|r| format!("#{} ", r)).unwrap_or_default();
        println!(
            "{:>2}. {}[{} / {}] ({} chars)",
            i + 1,
            rank,
            copy.source_model,
            variety,
            copy.char_count
        );
        println!("    {}", copy.content);
        if let Some(reason) = &copy.rank_reason {
            println!("    judge: {}", reason);
        }
    }

    let m = &outcome.metrics;
    println!();
    println!(
        "{} copies from {} | {} tokens | ${:.4} | {} ms",
        outcome.copies.len(),
        if outcome.models_used.is_empty() {
            "no model".to_string()
        } else {
            outcome.models_used.join(", ")
        },
        outcome.total_usage.total(),
        outcome.total_cost,
        outcome.elapsed_ms
    );
    println!(
        "units: {} (failed {}, fallback {}) | tolerated {} | rejected {} | duplicates {}{}",
        m.units,
        m.failed_units,
        m.fallbacks_used,
        m.tolerated,
        m.rejected,
        m.duplicates_dropped,
        if m.rerank_degraded {
            " | rerank degraded"
        } else if m.reranked {
            " | reranked"
        } else {
            ""
        }
    );
}

fn execute_distribute(format: OutputFormat, total: usize, varieties: &[Variety]) -> Result<()> {
    let allocations: Vec<VarietyAllocation> = distribute(total, varieties);
    match format {
        OutputFormat::Json => print_json(&allocations),
        OutputFormat::Text => {
            for a in &allocations {
                println!("{:<16} {}", a.variety, a.count);
            }
            println!("{:<16} {}", "total", allocations.iter().map(|a| a.count).sum::<usize>());
            Ok(())
        }
    }
}

fn execute_varieties(format: OutputFormat) -> Result<()> {
    let table: Vec<_> = Variety::ALL.into_iter().map(config_for).collect();
    match format {
        OutputFormat::Json => print_json(&table),
        OutputFormat::Text => {
            for c in &table {
                println!(
                    "{:<16} {:<24} {:<6} {:<12} t={:.2}",
                    c.variety,
                    c.model_chain().collect::<Vec<_>>().join(" > "),
                    c.formula.name(),
                    c.style.register(),
                    c.temperature
                );
            }
            Ok(())
        }
    }
}

fn execute_providers(format: OutputFormat, config: &Config) -> Result<()> {
    let registry = ProviderRegistry::from_config(config);
    let status = registry.status();
    match format {
        OutputFormat::Json => print_json(&status),
        OutputFormat::Text => {
            for s in &status {
                println!(
                    "{:<10} {:<28} {:<14} {}{}",
                    s.name,
                    s.model,
                    if s.configured { "configured" } else { "missing key" },
                    if s.in_priority { "priority " } else { "" },
                    if s.in_ensemble { "ensemble" } else { "" }
                );
            }
            println!("{} of {} configured", registry.configured_count(), registry.len());
            Ok(())
        }
    }
}
