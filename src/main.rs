use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;
use tokio::runtime::Runtime;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use feedlens::cli::commands::analyze::{AnalyzeOptions, ReportFormat};
use feedlens::config::ProviderKind;
use feedlens::pipeline::RunStatus;

#[derive(Parser)]
#[command(name = "feedlens")]
#[command(
    version,
    about = "Rate-aware batch LLM analysis of customer comments"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    #[arg(long, short, global = true, help = "Extra config file (merged over global and project)")]
    config: Option<PathBuf>,

    #[arg(long, global = true)]
    verbose: bool,

    #[arg(long, short, global = true)]
    quiet: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Analyze a file of comments and write the report
    Analyze {
        #[arg(help = "Comments as a JSON array, JSON Lines, or a YAML list")]
        input: PathBuf,
        #[arg(long, short, help = "Report path (stdout when omitted)")]
        output: Option<PathBuf>,
        #[arg(
            long,
            short = 'f',
            help = "Report format: json, yaml (default: from output extension)"
        )]
        format: Option<ReportFormat>,
        #[arg(long, short = 'w', help = "Worker ceiling (default: available parallelism, max 12)")]
        workers: Option<usize>,
        #[arg(long, help = "Maximum comments per batch")]
        batch_size: Option<usize>,
        #[arg(long, env = "FEEDLENS_TIER", help = "Provider rate tier")]
        tier: Option<String>,
        #[arg(long = "lang", help = "Prompt language: es, en, gn")]
        language: Option<String>,
        #[arg(long, help = "LLM provider: synthetic, openai")]
        provider: Option<ProviderKind>,
        #[arg(long, help = "Hard run timeout in seconds")]
        timeout: Option<u64>,
        #[arg(long, help = "Fail batches instead of using synthetic analysis")]
        no_fallback: bool,
    },

    /// Manage configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Show current configuration (merged from all sources)
    Show {
        #[arg(
            short = 'f',
            long,
            default_value = "toml",
            help = "Output format: toml, json"
        )]
        format: String,
    },
    /// Show configuration file paths
    Path,
    /// Initialize configuration
    Init {
        #[arg(long, short, help = "Initialize global config")]
        global: bool,
        #[arg(long, help = "Overwrite existing config")]
        force: bool,
    },
}

/// Set up panic handler for graceful error reporting
fn setup_panic_handler() {
    let default_hook = std::panic::take_hook();

    std::panic::set_hook(Box::new(move |panic_info| {
        let message = if let Some(s) = panic_info.payload().downcast_ref::<&str>() {
            s.to_string()
        } else if let Some(s) = panic_info.payload().downcast_ref::<String>() {
            s.clone()
        } else {
            "Unknown panic".to_string()
        };

        eprintln!("\n\x1b[1;31m━━━ PANIC ━━━\x1b[0m");
        eprintln!("\x1b[31mfeedlens encountered an unexpected error:\x1b[0m");
        eprintln!("  {}", message);

        if let Some(location) = panic_info.location() {
            eprintln!(
                "\x1b[90mLocation: {}:{}:{}\x1b[0m",
                location.file(),
                location.line(),
                location.column()
            );
        }
        eprintln!();

        // Call default hook for backtrace (if RUST_BACKTRACE=1)
        default_hook(panic_info);
    }));
}

fn main() -> ExitCode {
    setup_panic_handler();

    match run_cli() {
        Ok(code) => code,
        Err(e) => {
            eprintln!("\x1b[31mError:\x1b[0m {}", e);
            ExitCode::FAILURE
        }
    }
}

fn run_cli() -> anyhow::Result<ExitCode> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        "feedlens=debug"
    } else if cli.quiet {
        "error"
    } else {
        "warn"
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| filter.into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    match cli.command {
        Commands::Analyze {
            input,
            output,
            format,
            workers,
            batch_size,
            tier,
            language,
            provider,
            timeout,
            no_fallback,
        } => {
            let rt = Runtime::new()?;
            let status = rt.block_on(feedlens::cli::commands::analyze::run(AnalyzeOptions {
                input,
                output,
                format,
                config: cli.config,
                workers,
                batch_size,
                tier,
                language,
                provider,
                timeout_secs: timeout,
                no_fallback,
                quiet: cli.quiet,
            }))?;

            // Cancelled runs still wrote their partial report
            if status == RunStatus::Cancelled {
                return Ok(ExitCode::from(130));
            }
        }
        Commands::Config { action } => match action {
            ConfigAction::Show { format } => {
                feedlens::cli::commands::config::show(cli.config.as_deref(), &format)?;
            }
            ConfigAction::Path => {
                feedlens::cli::commands::config::path()?;
            }
            ConfigAction::Init { global, force } => {
                feedlens::cli::commands::config::init(global, force)?;
            }
        },
    }

    Ok(ExitCode::SUCCESS)
}
