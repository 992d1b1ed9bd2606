//! Engine actor and periodic refresh
//!
//! The forecast engine is owned by one background task. Navigation updates,
//! engagement commands and timer ticks all reach it through a single channel,
//! so a refresh cycle always sees the state it snapshotted and two cycles can
//! never run at once. Queries bypass the task and read the shared record store.

use std::time::Duration;

use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info};

use crate::data::Position;
use crate::forecast::{ForecastEngine, ForecastError, QueryKind, WeatherData, WeatherQuery};

/// Messages sent from the host to the engine task
#[derive(Debug)]
pub enum EngineCommand {
    /// New vessel position
    Position(Position),
    /// Heading in radians, `None` when unavailable
    Heading(Option<f64>),
    /// Speed over ground in m/s, `None` when unavailable
    Sog(Option<f64>),
    /// Raw engagement value, acknowledged once applied or rejected
    Engage {
        value: serde_json::Value,
        ack: oneshot::Sender<Result<bool, ForecastError>>,
    },
    /// Run a cycle now
    Refresh,
}

/// Configuration for the periodic timer
#[derive(Debug, Clone)]
pub struct RefreshConfig {
    /// How often the engine checks whether the refresh interval has elapsed
    pub tick: Duration,
    /// Whether the periodic timer runs at all
    pub enabled: bool,
}

impl Default for RefreshConfig {
    fn default() -> Self {
        Self {
            tick: Duration::from_secs(60),
            enabled: true,
        }
    }
}

/// Errors from talking to the engine task
#[derive(Debug, Error)]
pub enum HandleError {
    /// The task has shut down
    #[error("Forecast engine has stopped")]
    Stopped,

    /// The engine rejected the command
    #[error(transparent)]
    Rejected(#[from] ForecastError),
}

/// Handle for controlling the engine task
pub struct EngineHandle {
    commands: mpsc::Sender<EngineCommand>,
    shutdown_tx: mpsc::Sender<()>,
    query: WeatherQuery,
    task: JoinHandle<()>,
}

impl EngineHandle {
    /// Moves the engine into a background task
    ///
    /// # Arguments
    /// * `engine` - Engine to own; its event channel, if any, stays attached
    /// * `config` - Periodic timer settings
    ///
    /// # Returns
    /// An EngineHandle that forwards commands to the task
    pub fn spawn(mut engine: ForecastEngine, config: RefreshConfig) -> Self {
        let (cmd_tx, mut cmd_rx) = mpsc::channel::<EngineCommand>(32);
        let (shutdown_tx, mut shutdown_rx) = mpsc::channel::<()>(1);
        let query = WeatherQuery::new(engine.store().clone(), engine.config().selection.clone());

        let task = tokio::spawn(async move {
            let mut interval = tokio::time::interval(config.tick.max(Duration::from_millis(1)));
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
            // Skip the first tick (immediate)
            interval.tick().await;

            loop {
                tokio::select! {
                    command = cmd_rx.recv() => {
                        let Some(mut command) = command else {
                            debug!("all engine handles dropped");
                            break;
                        };
                        loop {
                            if !matches!(command, EngineCommand::Refresh) {
                                apply_command(&mut engine, command).await;
                                break;
                            }
                            // Refreshes queued behind this one would republish the same state
                            let (coalesced, next) = drain_refreshes(&mut cmd_rx);
                            if coalesced > 0 {
                                debug!(coalesced, "coalesced queued refresh requests");
                            }
                            engine.refresh_now().await;
                            match next {
                                Some(next) => command = next,
                                None => break,
                            }
                        }
                    }
                    _ = interval.tick(), if config.enabled => {
                        engine.run_periodic_cycle().await;
                    }
                    _ = shutdown_rx.recv() => {
                        break;
                    }
                }
            }

            info!("forecast engine stopped");
        });

        Self {
            commands: cmd_tx,
            shutdown_tx,
            query,
            task,
        }
    }

    async fn send(&self, command: EngineCommand) -> Result<(), HandleError> {
        self.commands.send(command).await.map_err(|_| HandleError::Stopped)
    }

    /// Forward a position update
    pub async fn position(&self, position: Position) -> Result<(), HandleError> {
        self.send(EngineCommand::Position(position)).await
    }

    /// Forward a heading update in radians
    pub async fn heading(&self, heading: Option<f64>) -> Result<(), HandleError> {
        self.send(EngineCommand::Heading(heading)).await
    }

    /// Forward a speed over ground update in m/s
    pub async fn sog(&self, sog: Option<f64>) -> Result<(), HandleError> {
        self.send(EngineCommand::Sog(sog)).await
    }

    /// Engage or disengage moving forecasts
    pub async fn set_engagement(&self, engaged: bool) -> Result<bool, HandleError> {
        self.engagement_command(serde_json::Value::Bool(engaged)).await
    }

    /// Apply a raw engagement value and wait for the engine's verdict
    ///
    /// # Returns
    /// * `Ok(bool)` - The engagement now in effect
    /// * `Err(HandleError::Rejected)` - The value was not a boolean
    pub async fn engagement_command(&self, value: serde_json::Value) -> Result<bool, HandleError> {
        let (ack, reply) = oneshot::channel();
        self.send(EngineCommand::Engage { value, ack }).await?;
        let verdict = reply.await.map_err(|_| HandleError::Stopped)?;
        Ok(verdict?)
    }

    /// Ask for a cycle regardless of the trigger
    pub async fn request_refresh(&self) -> Result<(), HandleError> {
        self.send(EngineCommand::Refresh).await
    }

    /// Last published forecasts, without waiting for the engine task
    pub fn forecasts(&self, kind: QueryKind, count: usize) -> Vec<WeatherData> {
        self.query.forecasts(kind, count)
    }

    /// Stops the task once any running cycle finishes
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(()).await;
        let _ = self.task.await;
    }
}

/// Pops consecutive queued refresh requests.
///
/// # Returns
/// How many were dropped, and the first other command if one was reached
fn drain_refreshes(commands: &mut mpsc::Receiver<EngineCommand>) -> (usize, Option<EngineCommand>) {
    let mut dropped = 0;
    while let Ok(command) = commands.try_recv() {
        match command {
            EngineCommand::Refresh => dropped += 1,
            other => return (dropped, Some(other)),
        }
    }
    (dropped, None)
}

async fn apply_command(engine: &mut ForecastEngine, command: EngineCommand) {
    match command {
        EngineCommand::Position(position) => {
            engine.handle_position_update(position).await;
        }
        EngineCommand::Heading(heading) => engine.handle_heading_update(heading),
        EngineCommand::Sog(sog) => engine.handle_sog_update(sog),
        EngineCommand::Engage { value, ack } => {
            let _ = ack.send(engine.engagement_command(&value));
        }
        EngineCommand::Refresh => {
            engine.refresh_now().await;
        }
    }
}
