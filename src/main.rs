use clap::Parser;
use colored::*;
use eyre::{Context, Result, eyre};
use log::{info, warn};
use std::fs;
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;

mod cli;
mod config;

use cli::Cli;
use cli::commands::Commands;
use cli::report::ConsoleReporter;
use cli::show::render_record;
use config::Config;
use conntrace::runner::{DiagnosticLoop, InstrumentedExecutor};
use conntrace::storage::{JsonlSink, latest_artifact, read_artifact};
use conntrace::transport::Transport;

fn setup_logging(level: Option<&str>) -> Result<()> {
    // Create log directory
    let log_dir = dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("conntrace")
        .join("logs");

    fs::create_dir_all(&log_dir).context("Failed to create log directory")?;

    let log_file = log_dir.join("conntrace.log");

    // Setup env_logger with file output
    let target = Box::new(
        fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&log_file)
            .context("Failed to open log file")?,
    );

    // RUST_LOG wins over the configured level
    let env = env_logger::Env::default().default_filter_or(level.unwrap_or("info"));
    env_logger::Builder::from_env(env)
        .target(env_logger::Target::Pipe(target))
        .init();

    info!("Logging initialized, writing to: {}", log_file.display());
    Ok(())
}

async fn run_application(cli: &Cli, config: &Config) -> Result<()> {
    info!("Starting application");

    if cli.is_verbose() {
        println!("{}", "Verbose mode enabled".yellow());
    }

    match &cli.command {
        None => handle_capture_command(None, None, cli.is_verbose(), config).await,
        Some(Commands::Capture { url, out_dir }) => {
            handle_capture_command(url.as_deref(), out_dir.as_ref(), cli.is_verbose(), config).await
        }
        Some(Commands::Show { path, out_dir }) => handle_show_command(path.as_ref(), out_dir.as_ref(), config),
    }
}

async fn handle_capture_command(
    url: Option<&str>,
    out_dir: Option<&PathBuf>,
    verbose: bool,
    config: &Config,
) -> Result<()> {
    let mut template = config.request_template();
    if let Some(url) = url {
        template.url = url.to_string();
    }
    let out_dir = out_dir.cloned().unwrap_or_else(|| config.output.dir.clone());
    info!("Capturing {} {} into {}", template.method, template.url, out_dir.display());

    let transport = Transport::new(config.transport_config(), config.proxy_config()?).context("Failed to build transport")?;
    let sink = JsonlSink::new(&out_dir).context(format!("Failed to prepare output dir {}", out_dir.display()))?;

    let cancel = CancellationToken::new();
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, stopping after the current attempt");
            on_interrupt.cancel();
        }
    });

    println!(
        "{} {} {} -> {}",
        "Capturing:".green(),
        template.method,
        template.url,
        out_dir.display()
    );

    let executor = InstrumentedExecutor::new(transport, template);
    let mut diagnostic = DiagnosticLoop::new(executor, sink);
    let mut reporter = ConsoleReporter::new(out_dir, verbose);
    let summary = diagnostic
        .run(&cancel, &mut reporter)
        .await
        .context("Capture aborted")?;

    info!("Run {} finished after {} attempts: {:?}", summary.run_id, summary.attempts, summary.stop);
    Ok(())
}

fn handle_show_command(path: Option<&PathBuf>, out_dir: Option<&PathBuf>, config: &Config) -> Result<()> {
    let path = match path {
        Some(path) => path.clone(),
        None => {
            let dir = out_dir.unwrap_or(&config.output.dir);
            latest_artifact(dir)
                .context(format!("Failed to scan {}", dir.display()))?
                .ok_or_else(|| eyre!("No artifacts found in {}", dir.display()))?
        }
    };
    info!("Showing artifact {}", path.display());

    let records = read_artifact(&path).context(format!("Failed to read {}", path.display()))?;
    println!("{} {}", "Artifact:".green(), path.display());
    for record in &records {
        println!("{}", render_record(record));
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    // Parse CLI arguments
    let cli = Cli::parse();

    // Load configuration
    let config = Config::load(cli.config.as_ref()).context("Failed to load configuration")?;

    // Setup logging once the configured level is known
    setup_logging(config.log_level.as_deref()).context("Failed to setup logging")?;

    info!("Starting with config from: {:?}", cli.config);

    // Run the main application logic
    run_application(&cli, &config).await.context("Application failed")?;

    Ok(())
}
