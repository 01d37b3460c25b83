//! funnel-report — computes a conversion funnel over an event log and prints
//! the step counts and conversion rates.

use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, ValueEnum};
use funnel_core::config::{AppConfig, InputFormat};
use funnel_reporting::export::{self, ExportFormat};
use funnel_reporting::{input, FunnelAnalyzer};
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(name = "funnel-report")]
#[command(about = "Conversion funnel over the most active groups of an event log")]
#[command(version)]
struct Cli {
    /// Event log to read
    #[arg(long, short)]
    input: PathBuf,

    /// TOML configuration file
    #[arg(long, env = "FUNNEL_REPORT_CONFIG")]
    config: Option<PathBuf>,

    /// Funnel steps in order, comma-separated (overrides config)
    #[arg(long, value_delimiter = ',')]
    steps: Option<Vec<String>>,

    /// Number of groups to keep (overrides config)
    #[arg(long, allow_negative_numbers = true)]
    top_n: Option<i64>,

    /// Input format (overrides config)
    #[arg(long, value_enum)]
    format: Option<InputArg>,

    /// Output format
    #[arg(long, value_enum, default_value_t = OutputArg::Csv)]
    output: OutputArg,

    /// Use the parallel dedup and ranking stages
    #[arg(long, default_value_t = false)]
    parallel: bool,

    /// Fail when more than this fraction of input rows is malformed
    #[arg(long)]
    max_drop_ratio: Option<f64>,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum InputArg {
    Csv,
    Jsonl,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum OutputArg {
    Csv,
    Json,
}

impl From<InputArg> for InputFormat {
    fn from(arg: InputArg) -> Self {
        match arg {
            InputArg::Csv => InputFormat::Csv,
            InputArg::Jsonl => InputFormat::Jsonl,
        }
    }
}

fn main() -> anyhow::Result<()> {
    // Tables go to stdout, logs to stderr
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "funnel_report=info,funnel_reporting=info".into()),
        )
        .with_writer(std::io::stderr)
        .json()
        .init();

    let cli = Cli::parse();

    let mut config = match cli.config.as_deref() {
        Some(path) => AppConfig::load(Some(path))
            .with_context(|| format!("failed to load config from {}", path.display()))?,
        None => AppConfig::load(None).unwrap_or_else(|e| {
            warn!(error = %e, "Failed to load config, using defaults");
            AppConfig::default()
        }),
    };

    // Apply CLI overrides
    if let Some(steps) = cli.steps {
        config.funnel.funnel_steps = steps;
    }
    if let Some(top_n) = cli.top_n {
        config.funnel.top_n_groups = top_n;
    }
    if let Some(format) = cli.format {
        config.input.format = format.into();
    }
    if cli.parallel {
        config.funnel.parallel = true;
    }

    config.funnel.validate().context("invalid funnel configuration")?;
    let definition = config.funnel.definition()?;

    info!(
        funnel = %definition.name(),
        steps = ?definition.steps(),
        top_n = config.funnel.top_n_groups,
        rank_by = ?config.funnel.rank_by,
        parallel = config.funnel.parallel,
        input = %cli.input.display(),
        "Configuration loaded"
    );

    let analyzer = FunnelAnalyzer::new(config.funnel.clone())?;
    analyzer.define_funnel(definition.clone());

    let rows = input::open(&cli.input, config.input.format)
        .with_context(|| format!("failed to open {}", cli.input.display()))?;
    let report = analyzer.analyze(definition.name(), rows)?;

    if let Some(err) = &report.dropped {
        warn!(
            dropped = err.dropped,
            read = report.records_read,
            ratio = report.drop_ratio(),
            "Some input rows were dropped"
        );
    }
    if let Some(max_ratio) = cli.max_drop_ratio {
        report.check_drop_ratio(max_ratio)?;
    }

    match cli.output {
        OutputArg::Csv => {
            print!("{}", export::render(&report.funnel_counts, ExportFormat::Csv)?);
            println!();
            print!("{}", export::render(&report.conversion_rows, ExportFormat::Csv)?);
        }
        OutputArg::Json => println!("{}", serde_json::to_string_pretty(&report)?),
    }

    info!(
        groups = report.top_groups.len(),
        rows = report.funnel_counts.len(),
        "Funnel report written"
    );

    Ok(())
}
