//! Host command and output line formats
//!
//! The `run` subcommand reads one JSON object per stdin line and writes one
//! JSON object per stdout line. Each input object has a single key naming the
//! command, e.g. `{"sog": 3.2}` or `{"query": {"type": "daily", "count": 3}}`.

use std::io::Write;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;

use crate::data::{Granularity, NormalizedRecord, Package, Position};
use crate::forecast::{Publisher, QueryKind, WeatherData};

/// Number of forecasts returned when a query omits `count`
pub const DEFAULT_QUERY_COUNT: usize = 12;

/// Error types for host command parsing
#[derive(Debug, Error)]
pub enum CommandError {
    #[error("Invalid command line: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Position out of range: latitude {latitude}, longitude {longitude}")]
    PositionOutOfRange { latitude: f64, longitude: f64 },
}

/// Position payload; `timestamp` defaults to the time of receipt
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub struct PositionCommand {
    pub latitude: f64,
    pub longitude: f64,
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
}

/// Forecast query payload
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub struct QueryCommand {
    #[serde(rename = "type")]
    pub kind: QueryKind,
    #[serde(default = "default_count")]
    pub count: usize,
}

fn default_count() -> usize {
    DEFAULT_QUERY_COUNT
}

/// One line of host input
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HostCommand {
    Position(PositionCommand),
    /// Heading in radians; `null` clears it
    Heading(Option<f64>),
    /// Speed over ground in m/s; `null` clears it
    Sog(Option<f64>),
    /// Kept raw so the engine can reject non-boolean values itself
    Engage(serde_json::Value),
    Query(QueryCommand),
    Refresh(bool),
}

impl HostCommand {
    /// Parses one input line
    ///
    /// # Returns
    /// * `Ok(HostCommand)` - A well-formed command
    /// * `Err(CommandError)` - Malformed JSON, unknown command, or an impossible position
    pub fn parse(line: &str) -> Result<Self, CommandError> {
        let command: HostCommand = serde_json::from_str(line)?;
        if let HostCommand::Position(p) = &command {
            if !(-90.0..=90.0).contains(&p.latitude) || !(-180.0..=180.0).contains(&p.longitude) {
                return Err(CommandError::PositionOutOfRange {
                    latitude: p.latitude,
                    longitude: p.longitude,
                });
            }
        }
        Ok(command)
    }
}

impl PositionCommand {
    pub fn into_position(self, received_at: DateTime<Utc>) -> Position {
        Position::new(self.latitude, self.longitude, self.timestamp.unwrap_or(received_at))
    }
}

/// One line of host output besides engine events
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "camelCase")]
pub enum HostOutput<'a> {
    /// A published record
    Record {
        package: Package,
        granularity: Granularity,
        index: usize,
        record: &'a NormalizedRecord,
    },
    /// Answer to a query command
    Forecasts {
        #[serde(rename = "type")]
        kind: QueryKind,
        forecasts: Vec<WeatherData>,
    },
    /// Answer to an engage command
    Engagement { engaged: bool },
    /// A command that could not be applied
    Rejected { kind: &'static str, message: String },
}

/// Publisher writing each record as a JSON line
pub struct JsonLinePublisher<W: Write + Send> {
    writer: Mutex<W>,
}

impl<W: Write + Send> JsonLinePublisher<W> {
    pub fn new(writer: W) -> Self {
        Self {
            writer: Mutex::new(writer),
        }
    }

    /// Serialize and write one line
    pub fn write_line<T: Serialize>(&self, value: &T) {
        let mut writer = self.writer.lock().unwrap_or_else(|e| e.into_inner());
        let result = serde_json::to_writer(&mut *writer, value)
            .map_err(std::io::Error::from)
            .and_then(|_| writer.write_all(b"\n"))
            .and_then(|_| writer.flush());
        if let Err(err) = result {
            warn!(%err, "failed to write output line");
        }
    }

    pub fn into_inner(self) -> W {
        self.writer.into_inner().unwrap_or_else(|e| e.into_inner())
    }
}

impl<W: Write + Send> Publisher for JsonLinePublisher<W> {
    fn publish(&self, record: &NormalizedRecord, package: Package, granularity: Granularity, index: usize) {
        self.write_line(&HostOutput::Record {
            package,
            granularity,
            index,
            record,
        });
    }
}
