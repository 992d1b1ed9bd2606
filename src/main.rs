//! vesselcast - marine weather forecasts along a vessel's predicted track
//!
//! Reads navigation updates and commands as JSON lines on stdin and writes
//! published forecast records, query answers and engine events as JSON lines
//! on stdout. Logs go to stderr.

use std::io;
use std::sync::Arc;

use chrono::Utc;
use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tracing::{info, warn};

use vesselcast::cli::{Cli, Command, StartupConfig};
use vesselcast::commands::{HostCommand, HostOutput, JsonLinePublisher};
use vesselcast::data::MeteoblueClient;
use vesselcast::forecast::ForecastEngine;
use vesselcast::logging;
use vesselcast::refresh::{EngineHandle, HandleError, RefreshConfig};

type Output = JsonLinePublisher<io::Stdout>;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    logging::init_logging(cli.verbose);

    let startup = match StartupConfig::from_cli(&cli) {
        Ok(startup) => startup,
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(2);
        }
    };

    match cli.command {
        Command::PrintConfig => {
            print!("{}", startup.config.to_toml()?);
            Ok(())
        }
        Command::Run { .. } => run(startup).await,
    }
}

async fn run(startup: StartupConfig) -> Result<(), Box<dyn std::error::Error>> {
    let config = startup.config;
    let client = MeteoblueClient::new(config.api_key.clone(), config.request_timeout())?
        .with_base_url(config.base_url.clone());

    let output: Arc<Output> = Arc::new(JsonLinePublisher::new(io::stdout()));
    let (events_tx, mut events_rx) = mpsc::channel(64);

    let mut engine = ForecastEngine::new(config.engine_config()?, Arc::new(client))
        .with_publisher(output.clone())
        .with_events(events_tx);
    if startup.engage {
        engine.set_engagement(true);
    }
    let handle = EngineHandle::spawn(engine, RefreshConfig::default());

    // Ends once the engine, and with it the event sender, is dropped
    let event_output = output.clone();
    let forwarder = tokio::spawn(async move {
        while let Some(event) = events_rx.recv().await {
            event_output.write_line(&event);
        }
    });

    info!("reading host commands from stdin");
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        match HostCommand::parse(line) {
            Ok(command) => dispatch(&handle, &output, command).await?,
            Err(e) => {
                warn!(%e, "rejected host command");
                output.write_line(&HostOutput::Rejected {
                    kind: "invalid_command",
                    message: e.to_string(),
                });
            }
        }
    }

    info!("stdin closed, shutting down");
    handle.shutdown().await;
    let _ = forwarder.await;
    Ok(())
}

async fn dispatch(handle: &EngineHandle, output: &Output, command: HostCommand) -> Result<(), HandleError> {
    match command {
        HostCommand::Position(p) => handle.position(p.into_position(Utc::now())).await?,
        HostCommand::Heading(heading) => handle.heading(heading).await?,
        HostCommand::Sog(sog) => handle.sog(sog).await?,
        HostCommand::Engage(value) => match handle.engagement_command(value).await {
            Ok(engaged) => output.write_line(&HostOutput::Engagement { engaged }),
            // Already reported through the engine's event stream
            Err(HandleError::Rejected(_)) => {}
            Err(e) => return Err(e),
        },
        HostCommand::Query(query) => output.write_line(&HostOutput::Forecasts {
            kind: query.kind,
            forecasts: handle.forecasts(query.kind, query.count),
        }),
        HostCommand::Refresh(true) => handle.request_refresh().await?,
        HostCommand::Refresh(false) => {}
    }
    Ok(())
}
