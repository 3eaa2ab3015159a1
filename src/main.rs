// src/main.rs - state notify host: config, logging, web API and the host loop
use clap::Parser;
use krusty_state_notify::config;
use krusty_state_notify::printer::Printer;
use krusty_state_notify::scheduler::time_interface::{StdTimeSync, TimeInterface};
use krusty_state_notify::web;
use krusty_state_notify::web::printer_channel::{PrinterRequest, handle_request};
use std::path::PathBuf;
use std::time::Instant;
use tokio::sync::mpsc;
use tokio::task::LocalSet;

#[derive(Debug, Parser)]
#[command(name = "state-notify-host", version, about = "Printer state tracking and notification host")]
struct Args {
    /// Path to the TOML configuration file
    #[arg(short, long, default_value = "printer.toml")]
    config: PathBuf,

    /// Maximum log level
    #[arg(long, default_value = "info")]
    log_level: tracing::Level,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync + 'static>> {
    let args = Args::parse();

    // Initialize logging
    tracing_subscriber::fmt().with_max_level(args.log_level).init();

    tracing::info!("Starting state notify host");
    tracing::info!("Version: {}", env!("CARGO_PKG_VERSION"));
    tracing::info!("Loading configuration from: {}", args.config.display());

    let config = config::load_config(&args.config).map_err(|e| {
        tracing::error!("Please ensure the configuration file exists and is properly formatted");
        Box::new(e) as Box<dyn std::error::Error + Send + Sync + 'static>
    })?;

    tracing::info!(
        "Printer: {}",
        config.printer.printer_name.as_deref().unwrap_or("Unknown")
    );
    tracing::info!(
        "Inactive timeout: {}s, idle timeout: {}s",
        config.state_notify.inactive_timeout,
        config.idle_timeout.timeout
    );

    let web_config = config.web.clone();
    let printer = Printer::new(config).map_err(|e| {
        tracing::error!("Failed to initialize printer: {}", e);
        Box::new(e) as Box<dyn std::error::Error + Send + Sync + 'static>
    })?;

    // Set up a channel for communication between Axum handlers and the printer task.
    let (printer_tx, printer_rx) = mpsc::channel::<PrinterRequest>(16);

    // The printer is !Send; everything runs on one LocalSet.
    let local = LocalSet::new();

    if web_config.enabled {
        let app = web::api::create_router(printer_tx);
        let listener = tokio::net::TcpListener::bind(&web_config.listen).await?;
        tracing::info!("Web API listening on http://{}", listener.local_addr()?);
        local.spawn_local(async move {
            if let Err(e) = axum::serve(listener, app).await {
                tracing::error!("Web server error: {}", e);
            }
        });
    } else {
        drop(printer_tx);
    }

    local.run_until(run_host(printer, printer_rx)).await;
    Ok(())
}

/// Drive the printer in real time until ctrl-c or until every client is gone.
async fn run_host(mut printer: Printer, mut printer_rx: mpsc::Receiver<PrinterRequest>) {
    let clock = StdTimeSync::new();
    tracing::info!("Host clock started at {:?}", clock.now_wallclock());
    printer.start(clock.now_monotonic());

    let mut accepting = true;
    loop {
        let deadline = clock.instant_at(printer.next_waketime());
        tokio::select! {
            request = printer_rx.recv(), if accepting => match request {
                Some(request) => {
                    printer.advance_to(clock.now_monotonic());
                    handle_request(&mut printer, request);
                    if printer.is_shutdown() {
                        tracing::info!("Shutdown requested by client");
                        break;
                    }
                }
                None => accepting = false,
            },
            _ = sleep_until(deadline) => {
                printer.advance_to(clock.now_monotonic());
            }
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Received ctrl-c");
                break;
            }
        }
    }

    printer.advance_to(clock.now_monotonic());
    printer.shutdown();
    tracing::info!("Final state: {}", printer.status().state);
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline.into()).await,
        None => std::future::pending().await,
    }
}
