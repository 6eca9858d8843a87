//! `lull-host`: a worker that reads jobs from stdin and closes itself once
//! idle.
//!
//! ```text
//! $ LULL_IDLE_MS=2000 lull-host
//! sleep 500
//! task 1 dispatched
//! task 1 completed
//! ```
//!
//! The process exits when the worker auto-closes or on Ctrl+C / SIGTERM.

mod host;

use clap::Parser;
use host::command::Command;
use host::config::{CliArgs, HostConfig};
use host::job::{Job, JobHandler};
use host::telemetry::Telemetry;
use lull::{TaskEvent, WorkerService};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::signal;
use tokio::sync::broadcast::{Receiver, error::RecvError};

// Using mimalloc for better performance under contention, especially in musl
// environments.
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

type Service = WorkerService<Job, JobHandler>;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load from .env
    let _ = dotenvy::dotenv();
    let args = CliArgs::parse();
    let config = HostConfig::try_from(args)?;

    let _telemetry = Telemetry::install()?;
    log_startup_info(&config);

    let service = Service::new(JobHandler, config.coordinator)?;
    service.on_create()?;
    let reporter = tokio::spawn(report_events(service.coordinator().subscribe()));

    let res = run(&service).await;

    service.on_terminate().await;
    reporter.abort();

    #[cfg(feature = "tracing")]
    tracing::info!("Worker shut down successfully");
    res
}

/// Feeds stdin into the worker until it closes itself or a signal arrives.
async fn run(service: &Service) -> anyhow::Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdin_open = true;
    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            () = service.coordinator().terminated() => {
                #[cfg(feature = "tracing")]
                tracing::info!("Worker closed itself after going idle");
                return Ok(());
            }
            () = &mut shutdown => return Ok(()),
            line = lines.next_line(), if stdin_open => match line? {
                Some(line) if line.trim().is_empty() => {}
                Some(line) => handle_line(service, &line),
                None => {
                    #[cfg(feature = "tracing")]
                    tracing::info!("stdin closed; waiting for the worker to go idle");
                    stdin_open = false;
                }
            },
        }
    }
}

fn handle_line(service: &Service, line: &str) {
    let command = match line.parse::<Command>() {
        Ok(command) => command,
        Err(e) => {
            eprintln!("error: {e:#}");
            return;
        }
    };

    let coordinator = service.coordinator();
    match command {
        Command::Run(job) => match service.on_request(job) {
            Some(id) => println!("task {id} dispatched"),
            None => println!("worker is shutting down; job dropped"),
        },
        Command::Cancel(id) => {
            if coordinator.cancel(id) {
                println!("task {id} cancelled");
            } else {
                println!("task {id} is not outstanding");
            }
        }
        Command::Idle(idle) => {
            coordinator.set_auto_close_duration(idle);
            println!("idle period set to {idle:?}");
        }
        Command::AutoClose(enabled) => {
            coordinator.set_auto_close_enabled(enabled);
            println!("auto-close {}", if enabled { "on" } else { "off" });
        }
    }
}

async fn report_events(mut events: Receiver<TaskEvent>) {
    loop {
        match events.recv().await {
            Ok(TaskEvent { id, outcome }) => println!("task {id} {outcome}"),
            Err(RecvError::Lagged(_skipped)) => {
                #[cfg(feature = "tracing")]
                tracing::warn!("Dropped {_skipped} task events");
            }
            Err(RecvError::Closed) => break,
        }
    }
}

fn log_startup_info(_config: &HostConfig) {
    if cfg!(debug_assertions) {
        #[cfg(feature = "tracing")]
        tracing::info!("Starting worker with full config: {:#?}", _config);
    } else {
        #[cfg(feature = "tracing")]
        tracing::info!(
            "Starting worker (auto-close: {:?})",
            _config.coordinator.auto_close
        );
    }
}

async fn shutdown_signal() {
    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(_e) => {
                #[cfg(feature = "tracing")]
                tracing::error!("Failed to install SIGTERM handler: {_e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    let ctrl_c = async {
        if let Err(_e) = signal::ctrl_c().await {
            #[cfg(feature = "tracing")]
            tracing::error!("Failed to install Ctrl+C handler: {_e}");
            std::future::pending::<()>().await;
        }
    };

    tokio::select! {
        () = ctrl_c => {
            #[cfg(feature = "tracing")]
            tracing::info!("Received Ctrl+C signal");
        },
        () = terminate => {
            #[cfg(feature = "tracing")]
            tracing::info!("Received SIGTERM signal");
        },
    }
}
