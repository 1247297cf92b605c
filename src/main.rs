use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use log::{error, info};
use tracing_subscriber::EnvFilter;

use smali_native::config::Config;
use smali_native::pipeline::{self, RunOptions, DEFAULT_LOADER};
use smali_native::tools::Toolchain;

#[derive(Parser)]
#[command(name = "smali-native")]
#[command(about = "Compile selected methods of an Android package to native code", long_about = None)]
struct Cli {
    /// Input package, or a decompiled tree with smali directories
    #[arg(short = 'a', long = "input")]
    input: PathBuf,
    /// Output package
    #[arg(short = 'o', long = "out")]
    out: Option<PathBuf>,
    /// Method filter rules
    #[arg(long, default_value = "filter.txt")]
    filter: PathBuf,
    /// Fully qualified loader class injected into the package
    #[arg(long, default_value = DEFAULT_LOADER)]
    custom_loader: String,
    /// Never compile synthetic methods
    #[arg(long)]
    skip_synthetic: bool,
    /// Only generate the native sources
    #[arg(long)]
    no_build: bool,
    /// Keep packaged libraries of ABIs the project cannot build
    #[arg(long)]
    force_keep_libs: bool,
    /// Keep the generated native project in this directory
    #[arg(long)]
    source_dir: Option<PathBuf>,
    /// Archive of the generated project when it is neither kept nor built
    #[arg(long, default_value = "project-source.zip")]
    project_archive: PathBuf,
    /// Tool locations and signing settings
    #[arg(long, default_value = "dcc.cfg")]
    config: PathBuf,
    /// Parallel jobs for the native build
    #[arg(short = 'j', long)]
    jobs: Option<usize>,
}

fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

fn main() -> ExitCode {
    init_logging();
    let cli = Cli::parse();

    let options = RunOptions {
        input: cli.input,
        output: cli.out,
        filter: cli.filter,
        custom_loader: cli.custom_loader,
        skip_synthetic: cli.skip_synthetic,
        no_build: cli.no_build,
        force_keep_libs: cli.force_keep_libs,
        source_dir: cli.source_dir,
        project_archive: cli.project_archive,
        jobs: cli.jobs,
    };

    let result = Config::load(&cli.config)
        .and_then(|config| pipeline::run(&options, &config, &Toolchain::from_config(&config)));

    match result {
        Ok(report) => {
            info!(
                "{:?}: {} compiled, {} failed, {} skipped for symbol length, {} warnings",
                report.status,
                report.compiled.len(),
                report.failures.len(),
                report.too_long.len(),
                report.warnings.len()
            );
            ExitCode::from(report.status.exit_code() as u8)
        }
        Err(e) => {
            error!("{}", e);
            for failure in e.failures() {
                error!("  not compiled: {}", failure);
            }
            ExitCode::FAILURE
        }
    }
}
