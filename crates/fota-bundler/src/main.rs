use clap::Parser;
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use fota_bundler::Result;
use fota_bundler::config::{self, BundleConfig};
use fota_bundler::pipeline::BundlePipeline;
use fota_bundler::preflight;
use fota_bundler::runner::SystemInvoker;

#[derive(Debug, Parser)]
#[command(name = "fota", author, version, about = "Build firmware update bundles")]
struct Args {
    /// Path to the bundle configuration TOML
    conf: PathBuf,
    /// Log every tool invocation and its output
    #[arg(short, long)]
    verbose: bool,
    /// Kill any external tool running longer than this many seconds
    #[arg(long, value_name = "SECS")]
    timeout: Option<u64>,
    /// Do not check for required host tools before building
    #[arg(long)]
    skip_preflight: bool,
}

fn main() -> ExitCode {
    let args = Args::parse();

    let default_level = if args.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level)),
        )
        .with_target(false)
        .init();

    match run(&args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            tracing::error!("{err}");
            ExitCode::from(u8::try_from(err.exit_code()).unwrap_or(1))
        }
    }
}

fn run(args: &Args) -> Result<()> {
    let doc = config::load(&args.conf)?;
    let mut cfg = BundleConfig::from_doc(&doc)?;
    cfg.apply_env_defaults()?;
    if let Some(secs) = args.timeout {
        cfg.tool_timeout = (secs > 0).then(|| Duration::from_secs(secs));
    }

    if !args.skip_preflight {
        preflight::ensure_host_tools(&cfg)?;
    }

    let tools = SystemInvoker::with_timeout(cfg.tool_timeout);
    let summary = BundlePipeline::new(&cfg, &tools).run()?;

    println!("bundle: {}", summary.archive.display());
    println!("manifest: {}", summary.manifest.display());
    for meta in &summary.components {
        println!("  {} {} -> {}", meta.id, meta.vendor_version, meta.file_name);
    }
    for name in &summary.skipped {
        println!("  {name} (disabled)");
    }
    if let Some(report) = &summary.report {
        println!("report: {}", report.display());
    }
    Ok(())
}
