use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tokio::sync::broadcast::error::RecvError;
use tracing_subscriber::{fmt, layer::SubscriberExt, EnvFilter};

use barcodepack::config::apply_env_overrides;
use barcodepack::progress::PackageEvent;
use barcodepack::{load_config, Config, JobRequest, PackageService};

/// Batch UPC-A / EAN-13 barcode packages.
#[derive(Parser, Debug)]
#[command(name = "barcodepack", author, version, about, long_about = None)]
struct Cli {
    /// JSON configuration file.
    #[arg(short, long, global = true, env = "BARCODEPACK_CONFIG")]
    config: Option<PathBuf>,

    /// Output directory, overriding the configuration.
    #[arg(short, long, global = true)]
    output: Option<String>,

    /// Emit logs as JSON lines.
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Render a range of codes and wait for the package.
    Generate {
        /// First 11-digit base code.
        start: String,
        /// Last 11-digit base code, inclusive.
        end: String,
        #[arg(long)]
        order: String,
        /// Subset of jpg,pdf,eps,xls.
        #[arg(long, value_delimiter = ',')]
        formats: Option<Vec<String>>,
        #[arg(long)]
        callback_url: Option<String>,
        #[arg(long, env = "BARCODES_CALLBACK_TOKEN", hide_env_values = true)]
        callback_token: Option<String>,
        /// Give up waiting after this many seconds.
        #[arg(long, default_value_t = 6 * 60 * 60)]
        timeout_secs: u64,
    },
    /// Show the progress of a job.
    Status { job_id: String },
    /// Package a job now, regardless of what triggered it before.
    Finalize { job_id: String },
}

fn init_logging(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let registry = tracing_subscriber::registry().with(filter);
    let installed = if json {
        tracing::subscriber::set_global_default(registry.with(fmt::layer().json()))
    } else {
        tracing::subscriber::set_global_default(
            registry.with(fmt::layer().with_writer(std::io::stderr)),
        )
    };
    if let Err(e) = installed {
        eprintln!("Failed to install log subscriber: {}", e);
    }
    // Route `log` records from the worker pool and storage into tracing.
    if let Err(e) = tracing_log::LogTracer::init() {
        eprintln!("Failed to bridge log records: {}", e);
    }
}

fn load(cli: &Cli) -> barcodepack::Result<Config> {
    let mut config = match &cli.config {
        Some(path) => load_config(path)?,
        None => {
            let mut config = Config::with_output_directory("barcodes");
            apply_env_overrides(&mut config, |name| std::env::var(name).ok())?;
            config
        }
    };
    if let Some(output) = &cli.output {
        config.output_directory = output.clone();
    }
    Ok(config)
}

fn print_json<T: serde::Serialize>(value: &T) {
    match serde_json::to_string_pretty(value) {
        Ok(json) => println!("{}", json),
        Err(e) => tracing::error!("Failed to encode output: {}", e),
    }
}

/// Prints chunk progress until the event channel closes.
fn follow_events(service: &PackageService) {
    let mut events = service.events().subscribe();
    std::thread::spawn(move || loop {
        match events.blocking_recv() {
            Ok(PackageEvent::ChunkCompleted {
                job_id,
                done,
                total,
                failures,
                ..
            }) => {
                tracing::info!(job_id = %job_id, done, total, failures, "Progress");
            }
            Ok(PackageEvent::JobFailed { job_id, error }) => {
                tracing::error!(job_id = %job_id, error = %error, "Job failed");
            }
            Ok(_) => {}
            Err(RecvError::Lagged(_)) => continue,
            Err(RecvError::Closed) => break,
        }
    });
}

fn run(cli: Cli, interrupted: Arc<AtomicBool>) -> barcodepack::Result<ExitCode> {
    let config = load(&cli)?;
    let service = PackageService::from_config(config)?;

    let code = match cli.command {
        Command::Generate {
            start,
            end,
            order,
            formats,
            callback_url,
            callback_token,
            timeout_secs,
        } => {
            follow_events(&service);
            let request = JobRequest {
                start,
                end,
                order_no: order,
                formats,
                callback_url,
                callback_token,
            };
            let submission = service.submit(&request)?;
            tracing::info!(
                job_id = %submission.job_id,
                chunks = submission.total_chunks,
                "Waiting for package"
            );
            match service.wait_until_ready(
                &submission.job_id,
                Duration::from_secs(timeout_secs),
                &interrupted,
            )? {
                Some(view) => {
                    print_json(&view);
                    ExitCode::SUCCESS
                }
                None if interrupted.load(Ordering::Relaxed) => {
                    tracing::warn!("Interrupted, package not ready");
                    ExitCode::from(130)
                }
                None => {
                    tracing::error!(job_id = %submission.job_id, "Timed out waiting for package");
                    ExitCode::FAILURE
                }
            }
        }
        Command::Status { job_id } => match service.status(&job_id)? {
            Some(view) => {
                print_json(&view);
                ExitCode::SUCCESS
            }
            None => {
                tracing::error!(job_id = %job_id, "Job not found");
                ExitCode::FAILURE
            }
        },
        Command::Finalize { job_id } => {
            let outcome = service.finalize_now(&job_id)?;
            print_json(&outcome);
            ExitCode::SUCCESS
        }
    };

    service.shutdown();
    Ok(code)
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.json_logs);

    let interrupted = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&interrupted);
    if let Err(e) = ctrlc::set_handler(move || {
        tracing::info!("Received shutdown signal, finishing in-flight work...");
        flag.store(true, Ordering::Relaxed);
    }) {
        tracing::warn!("Failed to set Ctrl-C handler: {}", e);
    }

    match run(cli, interrupted) {
        Ok(code) => code,
        Err(e) => {
            tracing::error!("{}", e);
            ExitCode::FAILURE
        }
    }
}
