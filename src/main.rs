use std::{io, path::PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use heaptrail::{
    FirefoxProfile, ReportConfig, SizeUnit, DEFAULT_GAP_SLACK, layout_at, read_trace, report,
    summarize, usage_over_time,
};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "heaptrail", about = "Analyze heap allocation traces")]
struct Cli {
    /// Heap trace (`seconds,nanoseconds,function,address,size` per line).
    trace: PathBuf,
    /// Enable debug logging (overridden by RUST_LOG).
    #[arg(short, long, global = true)]
    verbose: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Allocation counts, bytes allocated and blocks still live at exit.
    Summary {
        #[arg(long)]
        json: bool,
    },
    /// Live blocks just before the given time, in address order.
    Layout {
        /// Seconds since the first event.
        #[arg(long, allow_negative_numbers = true)]
        at: f64,
        /// Bytes between blocks tolerated before a gap is marked.
        #[arg(long, default_value_t = DEFAULT_GAP_SLACK)]
        gap_slack: u64,
        #[arg(long)]
        json: bool,
    },
    /// Live bytes after every event.
    Usage {
        /// Write an HTML chart instead of printing samples.
        #[arg(long)]
        html: Option<PathBuf>,
        #[arg(long, value_enum, default_value_t = SizeUnit::KiB)]
        unit: SizeUnit,
        #[arg(long)]
        json: bool,
    },
    /// Export the trace as a Firefox Profiler profile.
    Profile {
        #[arg(long, default_value = "heap-profile.json")]
        out: PathBuf,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let env_filter = if std::env::var("RUST_LOG").is_ok() {
        EnvFilter::from_default_env()
    } else if cli.verbose {
        EnvFilter::new("heaptrail=debug")
    } else {
        EnvFilter::new("heaptrail=info")
    };
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(io::stderr)
        .with_target(false)
        .init();

    let trace = read_trace(&cli.trace)
        .with_context(|| format!("failed to load trace {}", cli.trace.display()))?;
    info!(events = trace.len(), "loaded {}", cli.trace.display());

    let stdout = io::stdout().lock();
    match cli.command {
        Commands::Summary { json } => {
            let summary = summarize(trace.events()).context("summary failed")?;
            if json {
                report::write_json(stdout, &summary)?;
            } else {
                report::write_summary(stdout, &summary)?;
            }
        }
        Commands::Layout { at, gap_slack, json } => {
            let layout = layout_at(trace.events(), at).context("layout failed")?;
            if json {
                report::write_json(stdout, &layout)?;
            } else {
                let config = ReportConfig {
                    gap_slack,
                    ..ReportConfig::default()
                };
                report::write_layout(stdout, &layout, &config)?;
            }
        }
        Commands::Usage { html, unit, json } => {
            let usage = usage_over_time(trace.events()).context("usage replay failed")?;
            let config = ReportConfig {
                unit,
                ..ReportConfig::default()
            };
            match html {
                Some(path) => {
                    report::write_usage_chart(&usage, &config, &path)
                        .with_context(|| format!("failed to write {}", path.display()))?;
                    info!("usage chart saved to {}", path.display());
                }
                None if json => report::write_json(stdout, &usage)?,
                None => report::write_usage(stdout, &usage, &config)?,
            }
        }
        Commands::Profile { out } => {
            let profile = FirefoxProfile::from_trace(&trace).context("profile export failed")?;
            profile
                .write_json(&out)
                .with_context(|| format!("failed to write {}", out.display()))?;
            info!("Firefox profile saved to {}", out.display());
        }
    }

    Ok(())
}
