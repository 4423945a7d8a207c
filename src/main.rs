use clap::Parser;
use register_stac::catalog::Verification;
use register_stac::config::{Config, DEFAULT_CONFIG_FILE};
use register_stac::error::PipelineError;
use register_stac::lock::LockFile;
use register_stac::pipeline::{Pipeline, RunReport};
use register_stac::product::ProductIdentifier;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "register-stac")]
#[command(about = "Register a source archive product in a STAC catalog")]
#[command(version)]
struct Cli {
    /// Source archive product identifier
    product_id: String,

    #[arg(long, default_value = DEFAULT_CONFIG_FILE)]
    config: PathBuf,

    /// Download every file again, ignoring local copies
    #[arg(long)]
    no_cache: bool,
}

fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_file(true)
        .with_line_number(true)
        .init();
}

fn exit_code(code: i32) -> ExitCode {
    ExitCode::from(u8::try_from(code).unwrap_or(1))
}

fn summarize(report: &RunReport) -> ExitCode {
    info!(
        product = %report.product.name,
        collection = %report.collection,
        downloaded = report.files.downloaded.len(),
        skipped = report.files.skipped.len(),
        failed = report.files.failed.len(),
        item = %report.item.display(),
        feature_id = %report.feature_id,
        "run finished"
    );
    match &report.verification {
        Verification::Verified => {}
        Verification::Mismatch { found } => {
            warn!(expected = %report.feature_id, found = ?found, "upload not verified");
        }
        Verification::Unavailable => {
            warn!(expected = %report.feature_id, "upload could not be read back");
        }
    }
    ExitCode::from(report.verification.exit_code())
}

async fn run(cli: Cli) -> Result<RunReport, PipelineError> {
    let id = ProductIdentifier::parse(&cli.product_id)?;
    let mut config = Config::read(&cli.config)?;
    if cli.no_cache {
        config = config.without_cache();
    }

    let _lock = LockFile::acquire(&config.output_dir)?;
    let pipeline = Pipeline::new(&config)?;
    tokio::select! {
        result = pipeline.run(&id) => result,
        _ = tokio::signal::ctrl_c() => Err(PipelineError::Interrupted),
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    init_logging();
    let cli = Cli::parse();

    match run(cli).await {
        Ok(report) => summarize(&report),
        Err(err) => {
            error!(error = %err, source = ?std::error::Error::source(&err), "run failed");
            exit_code(err.exit_code())
        }
    }
}
