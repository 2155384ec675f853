//! Analyze Command
//!
//! Runs the pipeline over an input file through the background host and
//! writes the aggregate report.
//!
//! Usage:
//!   feedlens analyze comments.json [--output report.yaml] [--workers 4] [--tier tier1]

use std::fs;
use std::path::{Path, PathBuf};

use tracing::info;

use crate::ai::{SharedCollaborator, create_collaborator};
use crate::cli::input::load_comments;
use crate::cli::render::ConsoleRenderer;
use crate::cli::ui::Output;
use crate::config::{Config, ConfigLoader, ProviderKind};
use crate::pipeline::{
    BackgroundExecutionHost, PipelineOrchestrator, PipelineReport, PipelineRun, RunStatus,
};
use crate::types::{LensError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReportFormat {
    #[default]
    Json,
    Yaml,
}

impl std::str::FromStr for ReportFormat {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "json" => Ok(Self::Json),
            "yaml" | "yml" => Ok(Self::Yaml),
            _ => Err(format!("Invalid format '{}'. Valid values: json, yaml", s)),
        }
    }
}

impl ReportFormat {
    /// Explicit choice first, then the output extension
    fn resolve(explicit: Option<Self>, output: Option<&Path>) -> Self {
        explicit.unwrap_or_else(|| {
            match output.and_then(|p| p.extension()).and_then(|e| e.to_str()) {
                Some("yaml" | "yml") => Self::Yaml,
                _ => Self::Json,
            }
        })
    }
}

/// Command-line overrides layered on top of the loaded configuration
#[derive(Debug, Clone, Default)]
pub struct AnalyzeOptions {
    pub input: PathBuf,
    pub output: Option<PathBuf>,
    pub format: Option<ReportFormat>,
    pub config: Option<PathBuf>,
    pub workers: Option<usize>,
    pub batch_size: Option<usize>,
    pub tier: Option<String>,
    pub language: Option<String>,
    pub provider: Option<ProviderKind>,
    pub timeout_secs: Option<u64>,
    pub no_fallback: bool,
    pub quiet: bool,
}

impl AnalyzeOptions {
    pub fn apply(&self, config: &mut Config) {
        if let Some(workers) = self.workers {
            config.pipeline.workers = Some(workers);
        }
        if let Some(size) = self.batch_size {
            config.batching.max_batch_size = size;
        }
        if let Some(tier) = &self.tier {
            config.rate.tier = tier.clone();
        }
        if let Some(language) = &self.language {
            config.pipeline.language = language.clone();
        }
        if let Some(provider) = self.provider {
            config.llm.provider = provider;
        }
        if let Some(secs) = self.timeout_secs {
            config.pipeline.timeout_secs = secs;
        }
        if self.no_fallback {
            config.retry.synthetic_fallback = false;
        }
    }
}

pub async fn run(options: AnalyzeOptions) -> Result<RunStatus> {
    let mut config = ConfigLoader::load(options.config.as_deref())?;
    options.apply(&mut config);
    config.validate()?;

    let collaborator = create_collaborator(&config.llm)?;
    run_with(options, config, collaborator).await
}

/// Run with an already-resolved configuration and collaborator
pub async fn run_with(
    options: AnalyzeOptions,
    config: Config,
    collaborator: Option<SharedCollaborator>,
) -> Result<RunStatus> {
    let out = Output::new().quiet(options.quiet);
    let comments = load_comments(&options.input)?;
    out.info(&format!(
        "Loaded {} comments from {}",
        comments.len(),
        options.input.display()
    ));
    info!(
        provider = %config.llm.provider,
        tier = %config.rate.tier,
        workers = config.pipeline.effective_workers(),
        "Starting analysis"
    );

    let orchestrator = PipelineOrchestrator::new(config, collaborator)?;
    let host = BackgroundExecutionHost::from_orchestrator(orchestrator);
    let handle = host.start(comments);

    if !options.quiet {
        ConsoleRenderer::new().follow(&handle).await;
    }
    let run = handle.wait().await?;

    let usage = host.orchestrator().usage();
    let report = PipelineReport::build(&run, usage.alerts(), usage.recommendations());
    let format = ReportFormat::resolve(options.format, options.output.as_deref());
    let rendered = match format {
        ReportFormat::Json => report.to_json()?,
        ReportFormat::Yaml => report.to_yaml()?,
    };

    match &options.output {
        Some(path) => {
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                fs::create_dir_all(parent)?;
            }
            fs::write(path, rendered)?;
            out.success(&format!("Report written to {}", path.display()));
        }
        None => println!("{}", rendered),
    }

    print_summary(&out, &run, &report);

    if run.status == RunStatus::Failed {
        return Err(LensError::Pipeline(
            run.error.unwrap_or_else(|| "run failed".to_string()),
        ));
    }
    Ok(run.status)
}

fn print_summary(out: &Output, run: &PipelineRun, report: &PipelineReport) {
    out.section("Run summary");
    out.info(&format!(
        "{} rows: {} analyzed, {} errored",
        report.rows.total, report.rows.analyzed, report.rows.errored
    ));
    out.info(&format!(
        "NPS {:.1} ({} promoters, {} passives, {} detractors)",
        report.nps.nps_score, report.nps.promoters, report.nps.passives, report.nps.detractors
    ));
    out.info(&format!(
        "Churn risk avg {:.2}, {} at risk",
        report.churn.average, report.churn.at_risk
    ));
    out.info(&format!(
        "{} calls, {} tokens, ${:.4}",
        run.usage.calls, run.usage.total_tokens, run.usage.cost_usd
    ));

    let perf = &run.performance;
    let timing = format!(
        "{} ms for {} batches ({:.1} rows/s)",
        perf.elapsed_ms, perf.batches_completed, perf.rows_per_sec
    );
    if perf.sla_met {
        out.success(&timing);
    } else {
        out.warning(&format!("{} exceeds SLA target of {} ms", timing, perf.sla_target_ms));
    }

    match run.status {
        RunStatus::Succeeded => out.success("Analysis complete"),
        RunStatus::Cancelled => out.warning(&format!(
            "Run cancelled with {} of {} rows",
            run.results.len(),
            perf.rows_total
        )),
        _ => {}
    }
}
