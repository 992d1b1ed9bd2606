//! Forecast engine state machine
//!
//! Holds the session state (navigation, engagement, cycle bookkeeping),
//! applies the refresh trigger to inbound events and dispatches each cycle to
//! either a single stationary fetch or the moving-vessel assembler.
//!
//! The engine is a plain `&mut self` object. Serializing access to it is the
//! job of its owner, see [`crate::refresh::EngineHandle`].

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use super::assembler::MovingForecastAssembler;
use super::normalize::{daily_records, hourly_records};
use super::query::collect_records;
use super::store::{Publisher, RecordStore};
use super::trigger::should_refresh;
use super::ForecastError;
use crate::data::{
    is_moving, ForecastFetcher, Granularity, NavigationState, NormalizedRecord, Package, PackageSelection,
    Position, RawProviderFrame,
};

/// Clock capability
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Wall clock
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Session settings fixed at startup
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Enabled (package, granularity) pairs
    pub selection: PackageSelection,
    /// Time-based refresh interval
    pub interval_minutes: u64,
    /// Hourly records per package, and hours predicted when moving
    pub max_forecast_hours: u32,
    /// Daily records per package
    pub max_forecast_days: u32,
    /// Speed above which the vessel counts as moving
    pub speed_threshold_knots: f64,
    /// Engage moving forecasts automatically when speed crosses the threshold
    pub auto_enable_moving: bool,
    /// Delay between per-hour fetches
    pub pacing: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            selection: PackageSelection::new([
                (Package::Basic, Granularity::Hourly),
                (Package::Basic, Granularity::Daily),
            ]),
            interval_minutes: 60,
            max_forecast_hours: 12,
            max_forecast_days: 7,
            speed_threshold_knots: 1.0,
            auto_enable_moving: false,
            pacing: Duration::from_millis(1000),
        }
    }
}

/// Observable engine state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum EngineState {
    /// No position yet
    Idle,
    /// Position known, no movement prediction
    Stationary,
    /// Engaged, heading known and speed above threshold
    Moving,
}

/// How a cycle produced its records
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum ForecastMode {
    Stationary,
    Moving,
    /// The moving path failed and a stationary fetch replaced it
    MovingFallback,
}

/// What a successful cycle published
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CycleSummary {
    pub mode: ForecastMode,
    pub hourly_records: usize,
    pub daily_records: usize,
    pub fetches: usize,
}

/// Result of one refresh cycle
#[derive(Debug)]
pub enum CycleOutcome {
    Published(CycleSummary),
    Failed(ForecastError),
}

impl CycleOutcome {
    pub fn is_published(&self) -> bool {
        matches!(self, CycleOutcome::Published(_))
    }
}

/// Structured messages for the host
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "camelCase")]
pub enum EngineEvent {
    /// Something the host should tell the user about
    Notification { message: String },
    /// A cycle finished and published records
    #[serde(rename_all = "camelCase")]
    CycleCompleted {
        mode: ForecastMode,
        hourly_records: usize,
        daily_records: usize,
    },
    /// An error occurred; the engine keeps running
    Error { kind: String, message: String },
}

impl EngineEvent {
    fn from_error(err: &ForecastError) -> Self {
        EngineEvent::Error {
            kind: err.kind().to_string(),
            message: err.to_string(),
        }
    }
}

/// Accept only JSON booleans as engagement values.
///
/// # Returns
/// * `Ok(bool)` - The requested engagement
/// * `Err(ForecastError::InvalidCommand)` - For any other JSON value
pub fn parse_engagement_value(value: &serde_json::Value) -> Result<bool, ForecastError> {
    value.as_bool().ok_or_else(|| {
        ForecastError::InvalidCommand(format!("engagement value must be a boolean, got {}", value))
    })
}

/// The forecast decision and prediction engine
pub struct ForecastEngine {
    config: EngineConfig,
    fetcher: Arc<dyn ForecastFetcher>,
    store: RecordStore,
    publisher: Option<Arc<dyn Publisher>>,
    clock: Arc<dyn Clock>,
    events: Option<mpsc::Sender<EngineEvent>>,
    navigation: NavigationState,
    moving_forecast_engaged: bool,
    last_forecast_update: Option<DateTime<Utc>>,
    current_position: Option<Position>,
    fetch_count: usize,
}

impl ForecastEngine {
    /// Creates an engine with a wall clock, a fresh store and no extra sink.
    ///
    /// Engagement always starts cleared.
    pub fn new(config: EngineConfig, fetcher: Arc<dyn ForecastFetcher>) -> Self {
        Self {
            config,
            fetcher,
            store: RecordStore::new(),
            publisher: None,
            clock: Arc::new(SystemClock),
            events: None,
            navigation: NavigationState::default(),
            moving_forecast_engaged: false,
            last_forecast_update: None,
            current_position: None,
            fetch_count: 0,
        }
    }

    /// Use another clock
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Also deliver every published record to `publisher`
    pub fn with_publisher(mut self, publisher: Arc<dyn Publisher>) -> Self {
        self.publisher = Some(publisher);
        self
    }

    /// Publish into an existing store
    pub fn with_store(mut self, store: RecordStore) -> Self {
        self.store = store;
        self
    }

    /// Send structured events to the host
    pub fn with_events(mut self, events: mpsc::Sender<EngineEvent>) -> Self {
        self.events = Some(events);
        self
    }

    /// Store the engine publishes into
    pub fn store(&self) -> &RecordStore {
        &self.store
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn navigation(&self) -> &NavigationState {
        &self.navigation
    }

    pub fn is_engaged(&self) -> bool {
        self.moving_forecast_engaged
    }

    pub fn last_forecast_update(&self) -> Option<DateTime<Utc>> {
        self.last_forecast_update
    }

    /// Position the last completed cycle ran for
    pub fn current_position(&self) -> Option<&Position> {
        self.current_position.as_ref()
    }

    /// Number of provider fetches issued so far
    pub fn fetch_count(&self) -> usize {
        self.fetch_count
    }

    /// Current state derived from navigation and engagement
    pub fn state(&self) -> EngineState {
        if self.navigation.position.is_none() {
            EngineState::Idle
        } else if self.movement(&self.navigation).is_some() {
            EngineState::Moving
        } else {
            EngineState::Stationary
        }
    }

    /// Heading and speed to predict with, if movement prediction applies
    fn movement(&self, navigation: &NavigationState) -> Option<(f64, f64)> {
        if !self.moving_forecast_engaged {
            return None;
        }
        let heading = navigation.heading?;
        let sog = navigation.sog?;
        is_moving(sog, self.config.speed_threshold_knots).then_some((heading, sog))
    }

    /// Ingest a new position, running a cycle when the trigger fires
    pub async fn handle_position_update(&mut self, position: Position) -> Option<CycleOutcome> {
        let before = self.state();
        self.navigation.position = Some(position);
        self.log_transition(before);

        let due = should_refresh(
            self.current_position.as_ref(),
            self.last_forecast_update,
            &position,
            self.config.interval_minutes,
            self.clock.now(),
        );
        if !due {
            debug!("position update does not require a refresh");
            return None;
        }

        Some(self.run_cycle().await)
    }

    /// Ingest a heading in radians, or clear it
    pub fn handle_heading_update(&mut self, heading: Option<f64>) {
        let before = self.state();
        self.navigation.heading = heading;
        self.log_transition(before);
    }

    /// Ingest speed over ground in m/s, or clear it
    ///
    /// With auto-enable configured, crossing the speed threshold engages
    /// moving forecasts and notifies the host.
    pub fn handle_sog_update(&mut self, sog: Option<f64>) {
        let before = self.state();
        self.navigation.sog = sog;

        if let Some(sog) = sog {
            if self.config.auto_enable_moving
                && !self.moving_forecast_engaged
                && is_moving(sog, self.config.speed_threshold_knots)
            {
                self.moving_forecast_engaged = true;
                let message = format!(
                    "Speed {:.1} kn exceeds {:.1} kn threshold, moving forecast engaged",
                    sog / crate::data::geodesy::KNOTS_TO_MPS,
                    self.config.speed_threshold_knots
                );
                info!("{}", message);
                self.emit(EngineEvent::Notification { message });
            }
        }

        self.log_transition(before);
    }

    /// Explicitly engage or disengage moving forecasts
    pub fn set_engagement(&mut self, engaged: bool) {
        let before = self.state();
        self.moving_forecast_engaged = engaged;
        info!(engaged, "moving forecast engagement set");
        self.log_transition(before);
    }

    /// Engagement command boundary; non-boolean values leave state unchanged
    pub fn engagement_command(&mut self, value: &serde_json::Value) -> Result<bool, ForecastError> {
        match parse_engagement_value(value) {
            Ok(engaged) => {
                self.set_engagement(engaged);
                Ok(engaged)
            }
            Err(err) => {
                warn!(%err, "rejected engagement command");
                self.emit(EngineEvent::from_error(&err));
                Err(err)
            }
        }
    }

    /// Timer entry point: runs a cycle if one is due for the known position
    pub async fn run_periodic_cycle(&mut self) -> Option<CycleOutcome> {
        let Some(position) = self.navigation.position else {
            debug!("periodic refresh skipped, no position yet");
            return None;
        };

        let due = should_refresh(
            self.current_position.as_ref(),
            self.last_forecast_update,
            &position,
            self.config.interval_minutes,
            self.clock.now(),
        );
        if !due {
            return None;
        }

        Some(self.run_cycle().await)
    }

    /// Run a cycle now regardless of the trigger
    pub async fn refresh_now(&mut self) -> CycleOutcome {
        self.run_cycle().await
    }

    /// Last published records for a granularity, at most `max_count`
    pub fn query_forecasts(&self, granularity: Granularity, max_count: usize) -> Vec<NormalizedRecord> {
        collect_records(&self.store, &self.config.selection, granularity, max_count)
    }

    async fn run_cycle(&mut self) -> CycleOutcome {
        // Snapshot taken once; events arriving mid-cycle are queued by the owner
        let navigation = self.navigation;
        let now = self.clock.now();

        let outcome = match self.execute_cycle(&navigation, now).await {
            Ok(summary) => {
                info!(
                    mode = ?summary.mode,
                    hourly = summary.hourly_records,
                    daily = summary.daily_records,
                    fetches = summary.fetches,
                    "forecast cycle completed"
                );
                self.emit(EngineEvent::CycleCompleted {
                    mode: summary.mode,
                    hourly_records: summary.hourly_records,
                    daily_records: summary.daily_records,
                });
                CycleOutcome::Published(summary)
            }
            Err(err) => {
                error!(%err, "forecast cycle failed");
                self.emit(EngineEvent::from_error(&err));
                CycleOutcome::Failed(err)
            }
        };

        // Failed cycles advance the bookkeeping too, the next trigger retries
        self.last_forecast_update = Some(self.clock.now());
        if navigation.position.is_some() {
            self.current_position = navigation.position;
        }

        outcome
    }

    async fn execute_cycle(
        &mut self,
        navigation: &NavigationState,
        now: DateTime<Utc>,
    ) -> Result<CycleSummary, ForecastError> {
        if self.config.selection.is_empty() {
            return Err(ForecastError::Configuration(
                "no forecast packages enabled".to_string(),
            ));
        }
        let position = navigation.position.ok_or(ForecastError::NoPosition)?;
        let fetches_before = self.fetch_count;

        let Some((heading, sog)) = self.movement(navigation) else {
            return self
                .stationary_cycle(&position, now, ForecastMode::Stationary, fetches_before)
                .await;
        };

        let assembled = {
            let assembler = MovingForecastAssembler::new(
                self.fetcher.as_ref(),
                &self.config.selection,
                self.config.max_forecast_hours,
                self.config.pacing,
            );
            assembler.assemble(&position, heading, sog, now).await
        };

        let assembly = match assembled {
            Ok(assembly) => assembly,
            Err(failure) => {
                self.fetch_count += failure.fetches;
                let err = ForecastError::Fetch(failure.error);
                warn!(%err, "moving forecast abandoned, falling back to stationary fetch");
                self.emit(EngineEvent::from_error(&err));
                return self
                    .stationary_cycle(&position, now, ForecastMode::MovingFallback, fetches_before)
                    .await;
            }
        };
        self.fetch_count += assembly.fetches;

        for err in &assembly.shape_errors {
            self.emit(EngineEvent::from_error(err));
        }

        let mut hourly_count = 0;
        for (package, records) in &assembly.series {
            hourly_count += records.len();
            self.publish_series(*package, Granularity::Hourly, records);
        }

        let daily_count = self.moving_daily(&position, now).await;

        Ok(CycleSummary {
            mode: ForecastMode::Moving,
            hourly_records: hourly_count,
            daily_records: daily_count,
            fetches: self.fetch_count - fetches_before,
        })
    }

    /// Daily records for a moving vessel, always from the current position
    async fn moving_daily(&mut self, position: &Position, now: DateTime<Utc>) -> usize {
        let requests = self.config.selection.requests(Granularity::Daily);
        if requests.is_empty() {
            return 0;
        }

        self.fetch_count += 1;
        match self
            .fetcher
            .fetch_forecast(position.latitude, position.longitude, &requests)
            .await
        {
            Ok(frame) => self.publish_granularity(&frame, Granularity::Daily, now),
            Err(err) => {
                let err = ForecastError::Fetch(err);
                warn!(%err, "daily forecast fetch failed");
                self.emit(EngineEvent::from_error(&err));
                0
            }
        }
    }

    async fn stationary_cycle(
        &mut self,
        position: &Position,
        now: DateTime<Utc>,
        mode: ForecastMode,
        fetches_before: usize,
    ) -> Result<CycleSummary, ForecastError> {
        let requests = self.config.selection.all_requests();
        self.fetch_count += 1;
        let frame = self
            .fetcher
            .fetch_forecast(position.latitude, position.longitude, &requests)
            .await?;

        let hourly_records = self.publish_granularity(&frame, Granularity::Hourly, now);
        let daily_records = self.publish_granularity(&frame, Granularity::Daily, now);

        Ok(CycleSummary {
            mode,
            hourly_records,
            daily_records,
            fetches: self.fetch_count - fetches_before,
        })
    }

    /// Normalize and publish every enabled package at one granularity.
    ///
    /// A package whose data lacks a time column is reported and skipped; the
    /// others still publish.
    fn publish_granularity(&mut self, frame: &RawProviderFrame, granularity: Granularity, now: DateTime<Utc>) -> usize {
        let local_now = frame.local_time(now);
        let mut published = 0;

        for package in self.config.selection.packages(granularity) {
            let records = match granularity {
                Granularity::Hourly => {
                    hourly_records(frame, package, local_now, self.config.max_forecast_hours as usize)
                }
                Granularity::Daily => {
                    daily_records(frame, package, local_now, self.config.max_forecast_days as usize)
                }
            };

            match records {
                Ok(records) => {
                    published += records.len();
                    self.publish_series(package, granularity, &records);
                }
                Err(err) => {
                    warn!(%err, "skipping package");
                    self.emit(EngineEvent::from_error(&err));
                }
            }
        }

        published
    }

    fn publish_series(&self, package: Package, granularity: Granularity, records: &[NormalizedRecord]) {
        for (index, record) in records.iter().enumerate() {
            self.store.publish(record, package, granularity, index);
            if let Some(publisher) = &self.publisher {
                publisher.publish(record, package, granularity, index);
            }
        }
        self.store.truncate(package, granularity, records.len());
    }

    fn emit(&self, event: EngineEvent) {
        if let Some(events) = &self.events {
            if events.try_send(event).is_err() {
                debug!("engine event dropped, host not keeping up");
            }
        }
    }

    fn log_transition(&self, before: EngineState) {
        let after = self.state();
        if before != after {
            info!(from = ?before, to = ?after, "engine state changed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::geodesy::KNOTS_TO_MPS;
    use crate::data::provider::FieldTable;
    use crate::data::{FetchError, PackageRequest};
    use async_trait::async_trait;
    use chrono::{NaiveDate, TimeZone};
    use std::sync::Mutex;

    struct FixedClock(Mutex<DateTime<Utc>>);

    impl FixedClock {
        fn at(h: u32, m: u32) -> Arc<Self> {
            Arc::new(Self(Mutex::new(
                Utc.with_ymd_and_hms(2024, 7, 15, h, m, 0).unwrap(),
            )))
        }

        fn advance(&self, minutes: i64) {
            let mut now = self.0.lock().unwrap();
            *now += chrono::Duration::minutes(minutes);
        }
    }

    impl Clock for FixedClock {
        fn now(&self) -> DateTime<Utc> {
            *self.0.lock().unwrap()
        }
    }

    /// Serves a 48-hour series from 2024-07-15 00:00 UTC with 10 °C everywhere
    struct MockFetcher {
        calls: Mutex<Vec<(f64, f64, Vec<PackageRequest>)>>,
        fail_from_call: Option<usize>,
        omit_daily_time: bool,
    }

    impl MockFetcher {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                calls: Mutex::new(Vec::new()),
                fail_from_call: None,
                omit_daily_time: false,
            })
        }

        fn failing_from(call: usize) -> Arc<Self> {
            Arc::new(Self {
                calls: Mutex::new(Vec::new()),
                fail_from_call: Some(call),
                omit_daily_time: false,
            })
        }

        fn calls(&self) -> Vec<(f64, f64, Vec<PackageRequest>)> {
            self.calls.lock().unwrap().clone()
        }
    }

    fn frame(omit_daily_time: bool) -> RawProviderFrame {
        let start = NaiveDate::from_ymd_opt(2024, 7, 15)
            .unwrap()
            .and_hms_opt(0, 0, 0)
            .unwrap();
        let mut hourly = FieldTable {
            time: Some(
                (0..48)
                    .map(|i| (start + chrono::Duration::hours(i)).format("%Y-%m-%d %H:%M").to_string())
                    .collect(),
            ),
            ..Default::default()
        };
        hourly
            .columns
            .insert("temperature".into(), vec![serde_json::json!(10.0); 48]);
        hourly
            .columns
            .insert("significantwaveheight".into(), vec![serde_json::json!(0.8); 48]);

        let mut daily = FieldTable {
            time: (!omit_daily_time).then(|| vec!["2024-07-15".to_string(), "2024-07-16".to_string()]),
            ..Default::default()
        };
        daily
            .columns
            .insert("temperature_max".into(), vec![serde_json::json!(20.0); 2]);

        RawProviderFrame {
            hourly: Some(hourly),
            daily: Some(daily),
            ..Default::default()
        }
    }

    #[async_trait]
    impl ForecastFetcher for MockFetcher {
        async fn fetch_forecast(
            &self,
            latitude: f64,
            longitude: f64,
            packages: &[PackageRequest],
        ) -> Result<RawProviderFrame, FetchError> {
            let mut calls = self.calls.lock().unwrap();
            calls.push((latitude, longitude, packages.to_vec()));
            if self.fail_from_call.is_some_and(|n| calls.len() >= n) {
                return Err(FetchError::Provider("service unavailable".into()));
            }
            Ok(frame(self.omit_daily_time))
        }
    }

    fn config(pairs: &[(Package, Granularity)]) -> EngineConfig {
        EngineConfig {
            selection: PackageSelection::new(pairs.iter().copied()),
            max_forecast_hours: 2,
            max_forecast_days: 7,
            pacing: Duration::ZERO,
            ..Default::default()
        }
    }

    fn engine(fetcher: Arc<MockFetcher>, clock: Arc<FixedClock>, config: EngineConfig) -> ForecastEngine {
        ForecastEngine::new(config, fetcher).with_clock(clock)
    }

    fn position(lat: f64, lon: f64) -> Position {
        Position::new(lat, lon, Utc.with_ymd_and_hms(2024, 7, 15, 14, 0, 0).unwrap())
    }

    #[tokio::test]
    async fn test_stationary_cycle_publishes_kelvin_without_waves() {
        let fetcher = MockFetcher::new();
        let mut engine = engine(
            fetcher.clone(),
            FixedClock::at(14, 10),
            EngineConfig {
                max_forecast_hours: 3,
                ..config(&[(Package::Basic, Granularity::Hourly)])
            },
        );

        let outcome = engine.handle_position_update(position(49.0, -123.0)).await;

        match outcome {
            Some(CycleOutcome::Published(summary)) => {
                assert_eq!(summary.mode, ForecastMode::Stationary);
                assert_eq!(summary.hourly_records, 3);
                assert_eq!(summary.daily_records, 0);
            }
            other => panic!("Expected published cycle, got {:?}", other),
        }

        let record = engine
            .store()
            .get(Package::Basic, Granularity::Hourly, 0)
            .expect("record 0 should be published");
        assert!((record.number("temperature").unwrap() - 283.15).abs() < 1e-9);
        assert!(!record.fields.contains_key("significantwaveheight"));
        assert!(!record.vessel_moving);
        assert_eq!(fetcher.calls().len(), 1);
        assert_eq!(engine.state(), EngineState::Stationary);
    }

    #[tokio::test]
    async fn test_moving_cycle_fetches_each_hour_further_north() {
        let fetcher = MockFetcher::new();
        let mut engine = engine(
            fetcher.clone(),
            FixedClock::at(14, 10),
            config(&[(Package::Basic, Granularity::Hourly)]),
        );
        engine.set_engagement(true);
        engine.handle_heading_update(Some(0.0));
        engine.handle_sog_update(Some(5.0 * KNOTS_TO_MPS));

        let outcome = engine.handle_position_update(position(49.0, -123.0)).await;
        assert!(matches!(
            outcome,
            Some(CycleOutcome::Published(CycleSummary {
                mode: ForecastMode::Moving,
                hourly_records: 2,
                ..
            }))
        ));

        let calls = fetcher.calls();
        assert_eq!(calls.len(), 2);
        assert!(calls[1].0 > calls[0].0);
        assert_ne!((calls[0].0, calls[0].1), (calls[1].0, calls[1].1));

        let record = engine.store().get(Package::Basic, Granularity::Hourly, 1).unwrap();
        assert!(record.vessel_moving);
        assert_eq!(record.predicted_latitude, Some(calls[1].0));
        assert_eq!(engine.state(), EngineState::Moving);
    }

    #[tokio::test]
    async fn test_moving_cycle_fetches_daily_once_at_current_position() {
        let fetcher = MockFetcher::new();
        let mut engine = engine(
            fetcher.clone(),
            FixedClock::at(14, 10),
            config(&[
                (Package::Basic, Granularity::Hourly),
                (Package::Basic, Granularity::Daily),
            ]),
        );
        engine.set_engagement(true);
        engine.handle_heading_update(Some(0.0));
        engine.handle_sog_update(Some(3.0));

        let outcome = engine.handle_position_update(position(49.0, -123.0)).await;
        assert!(matches!(
            outcome,
            Some(CycleOutcome::Published(CycleSummary { daily_records: 2, fetches: 3, .. }))
        ));

        let calls = fetcher.calls();
        assert_eq!(calls.len(), 3);
        let daily_call = &calls[2];
        assert_eq!((daily_call.0, daily_call.1), (49.0, -123.0));
        assert!(daily_call.2.iter().all(|r| r.granularity == Granularity::Daily));
        assert!(calls[0].2.iter().all(|r| r.granularity == Granularity::Hourly));

        let daily = engine.store().get(Package::Basic, Granularity::Daily, 0).unwrap();
        assert!(daily.predicted_latitude.is_none());
        assert!(!daily.vessel_moving);
    }

    #[tokio::test]
    async fn test_moving_fetch_error_falls_back_to_stationary() {
        // Second per-hour fetch fails, the fallback (third call) fails as well
        let fetcher = MockFetcher::failing_from(2);
        let mut engine = engine(
            fetcher.clone(),
            FixedClock::at(14, 10),
            config(&[(Package::Basic, Granularity::Hourly)]),
        );
        engine.set_engagement(true);
        engine.handle_heading_update(Some(0.0));
        engine.handle_sog_update(Some(3.0));

        let outcome = engine.handle_position_update(position(49.0, -123.0)).await;

        assert!(matches!(
            outcome,
            Some(CycleOutcome::Failed(ForecastError::Fetch(_)))
        ));
        let calls = fetcher.calls();
        assert_eq!(calls.len(), 3);
        assert_eq!((calls[2].0, calls[2].1), (49.0, -123.0));
        assert_eq!(engine.fetch_count(), 3, "both track fetches and the fallback count");
        // Nothing from the abandoned track was published
        assert!(engine.store().is_empty());
        assert!(engine.last_forecast_update().is_some());
    }

    #[tokio::test]
    async fn test_moving_fallback_publishes_stationary_records() {
        struct FailSecond(Mutex<usize>);

        #[async_trait]
        impl ForecastFetcher for FailSecond {
            async fn fetch_forecast(
                &self,
                _latitude: f64,
                _longitude: f64,
                _packages: &[PackageRequest],
            ) -> Result<RawProviderFrame, FetchError> {
                let mut n = self.0.lock().unwrap();
                *n += 1;
                if *n == 2 {
                    return Err(FetchError::Provider("rate limited".into()));
                }
                Ok(frame(false))
            }
        }

        let mut engine = ForecastEngine::new(
            config(&[(Package::Basic, Granularity::Hourly)]),
            Arc::new(FailSecond(Mutex::new(0))),
        )
        .with_clock(FixedClock::at(14, 10));
        engine.set_engagement(true);
        engine.handle_heading_update(Some(0.0));
        engine.handle_sog_update(Some(3.0));

        let outcome = engine.handle_position_update(position(49.0, -123.0)).await;

        assert!(matches!(
            outcome,
            Some(CycleOutcome::Published(CycleSummary {
                mode: ForecastMode::MovingFallback,
                hourly_records: 2,
                fetches: 3,
                ..
            }))
        ));
        assert_eq!(engine.fetch_count(), 3);
        let record = engine.store().get(Package::Basic, Granularity::Hourly, 0).unwrap();
        assert!(!record.vessel_moving);
        assert!(record.predicted_latitude.is_none());
    }

    #[tokio::test]
    async fn test_fallback_counts_every_abandoned_track_fetch() {
        // Third of four per-hour fetches fails, fallback fails too
        let fetcher = MockFetcher::failing_from(3);
        let mut engine = engine(
            fetcher.clone(),
            FixedClock::at(14, 10),
            EngineConfig {
                max_forecast_hours: 4,
                ..config(&[(Package::Basic, Granularity::Hourly)])
            },
        );
        engine.set_engagement(true);
        engine.handle_heading_update(Some(0.0));
        engine.handle_sog_update(Some(3.0));

        engine.handle_position_update(position(49.0, -123.0)).await;

        assert_eq!(fetcher.calls().len(), 4);
        assert_eq!(engine.fetch_count(), fetcher.calls().len());
    }

    #[tokio::test]
    async fn test_moving_hour_without_time_column_reports_data_shape() {
        struct NoHourlyTime;

        #[async_trait]
        impl ForecastFetcher for NoHourlyTime {
            async fn fetch_forecast(
                &self,
                _latitude: f64,
                _longitude: f64,
                _packages: &[PackageRequest],
            ) -> Result<RawProviderFrame, FetchError> {
                let mut frame = frame(false);
                if let Some(table) = frame.hourly.as_mut() {
                    table.time = None;
                }
                Ok(frame)
            }
        }

        let (tx, mut rx) = mpsc::channel(16);
        let mut engine = ForecastEngine::new(
            config(&[(Package::Basic, Granularity::Hourly)]),
            Arc::new(NoHourlyTime),
        )
        .with_clock(FixedClock::at(14, 10))
        .with_events(tx);
        engine.set_engagement(true);
        engine.handle_heading_update(Some(0.0));
        engine.handle_sog_update(Some(3.0));

        let outcome = engine.handle_position_update(position(49.0, -123.0)).await;

        assert!(matches!(
            outcome,
            Some(CycleOutcome::Published(CycleSummary {
                mode: ForecastMode::Moving,
                hourly_records: 0,
                fetches: 2,
                ..
            }))
        ));
        let mut shape_errors = 0;
        while let Ok(event) = rx.try_recv() {
            if let EngineEvent::Error { kind, .. } = event {
                assert_eq!(kind, "data_shape");
                shape_errors += 1;
            }
        }
        assert_eq!(shape_errors, 2, "one per skipped hour");
    }

    #[tokio::test]
    async fn test_failed_cycle_advances_last_update_and_is_not_retried() {
        let fetcher = MockFetcher::failing_from(1);
        let clock = FixedClock::at(14, 10);
        let mut engine = engine(
            fetcher.clone(),
            clock.clone(),
            config(&[(Package::Basic, Granularity::Hourly)]),
        );

        let outcome = engine.handle_position_update(position(49.0, -123.0)).await;
        assert!(matches!(outcome, Some(CycleOutcome::Failed(_))));
        assert_eq!(engine.last_forecast_update(), Some(clock.now()));

        // Same place, moments later: no new cycle
        clock.advance(1);
        assert!(engine.handle_position_update(position(49.0, -123.0)).await.is_none());
        assert_eq!(fetcher.calls().len(), 1);
    }

    #[tokio::test]
    async fn test_no_packages_is_configuration_error() {
        let fetcher = MockFetcher::new();
        let (tx, mut rx) = mpsc::channel(8);
        let mut engine = engine(fetcher.clone(), FixedClock::at(14, 10), config(&[])).with_events(tx);

        let outcome = engine.handle_position_update(position(49.0, -123.0)).await;

        assert!(matches!(
            outcome,
            Some(CycleOutcome::Failed(ForecastError::Configuration(_)))
        ));
        assert!(fetcher.calls().is_empty());
        assert!(engine.store().is_empty());
        match rx.try_recv() {
            Ok(EngineEvent::Error { kind, .. }) => assert_eq!(kind, "configuration"),
            other => panic!("Expected error event, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_data_shape_error_skips_only_that_granularity() {
        let fetcher = Arc::new(MockFetcher {
            calls: Mutex::new(Vec::new()),
            fail_from_call: None,
            omit_daily_time: true,
        });
        let mut engine = engine(
            fetcher,
            FixedClock::at(14, 10),
            config(&[
                (Package::Basic, Granularity::Hourly),
                (Package::Basic, Granularity::Daily),
            ]),
        );

        let outcome = engine.handle_position_update(position(49.0, -123.0)).await;

        assert!(matches!(
            outcome,
            Some(CycleOutcome::Published(CycleSummary {
                hourly_records: 2,
                daily_records: 0,
                ..
            }))
        ));
        assert!(engine.store().contains(Package::Basic, Granularity::Hourly, 0));
        assert!(!engine.store().contains(Package::Basic, Granularity::Daily, 0));
    }

    #[tokio::test]
    async fn test_distance_trigger_runs_new_cycle() {
        let fetcher = MockFetcher::new();
        let mut engine = engine(
            fetcher.clone(),
            FixedClock::at(14, 10),
            config(&[(Package::Basic, Granularity::Hourly)]),
        );

        assert!(engine.handle_position_update(position(49.0, -123.0)).await.is_some());
        assert!(engine.handle_position_update(position(49.01, -123.0)).await.is_none());
        assert!(engine.handle_position_update(position(49.2, -123.0)).await.is_some());
        assert_eq!(fetcher.calls().len(), 2);
        assert_eq!(engine.current_position().map(|p| p.latitude), Some(49.2));
    }

    #[tokio::test]
    async fn test_periodic_cycle_respects_interval() {
        let fetcher = MockFetcher::new();
        let clock = FixedClock::at(14, 10);
        let mut engine = engine(
            fetcher.clone(),
            clock.clone(),
            config(&[(Package::Basic, Granularity::Hourly)]),
        );

        assert!(engine.run_periodic_cycle().await.is_none());
        engine.handle_position_update(position(49.0, -123.0)).await;

        clock.advance(30);
        assert!(engine.run_periodic_cycle().await.is_none());
        clock.advance(30);
        assert!(engine.run_periodic_cycle().await.is_some());
        assert_eq!(fetcher.calls().len(), 2);
    }

    #[test]
    fn test_auto_enable_engages_above_threshold_and_notifies() {
        let (tx, mut rx) = mpsc::channel(8);
        let mut engine = ForecastEngine::new(
            EngineConfig {
                auto_enable_moving: true,
                ..Default::default()
            },
            MockFetcher::new(),
        )
        .with_events(tx);

        engine.handle_sog_update(Some(1.0 * KNOTS_TO_MPS));
        assert!(!engine.is_engaged(), "exactly at threshold is not moving");

        engine.handle_sog_update(Some(2.0));
        assert!(engine.is_engaged());
        assert!(matches!(rx.try_recv(), Ok(EngineEvent::Notification { .. })));
    }

    #[test]
    fn test_without_auto_enable_speed_does_not_engage() {
        let mut engine = ForecastEngine::new(EngineConfig::default(), MockFetcher::new());
        engine.handle_sog_update(Some(5.0));
        assert!(!engine.is_engaged());
    }

    #[tokio::test]
    async fn test_state_transitions() {
        let mut engine = ForecastEngine::new(
            EngineConfig {
                selection: PackageSelection::default(),
                ..Default::default()
            },
            MockFetcher::new(),
        )
        .with_clock(FixedClock::at(14, 10));
        assert_eq!(engine.state(), EngineState::Idle);

        engine.handle_position_update(position(49.0, -123.0)).await;
        assert_eq!(engine.state(), EngineState::Stationary);

        engine.set_engagement(true);
        engine.handle_sog_update(Some(3.0));
        assert_eq!(engine.state(), EngineState::Stationary, "heading unknown");

        engine.handle_heading_update(Some(1.2));
        assert_eq!(engine.state(), EngineState::Moving);

        engine.handle_sog_update(Some(0.2));
        assert_eq!(engine.state(), EngineState::Stationary);

        engine.handle_sog_update(Some(3.0));
        engine.handle_heading_update(None);
        assert_eq!(engine.state(), EngineState::Stationary);

        engine.handle_heading_update(Some(1.2));
        engine.set_engagement(false);
        assert_eq!(engine.state(), EngineState::Stationary);
    }

    #[test]
    fn test_engagement_command_accepts_only_booleans() {
        let mut engine = ForecastEngine::new(EngineConfig::default(), MockFetcher::new());

        assert_eq!(engine.engagement_command(&serde_json::json!(true)).unwrap(), true);
        assert!(engine.is_engaged());

        let result = engine.engagement_command(&serde_json::json!("false"));
        assert!(matches!(result, Err(ForecastError::InvalidCommand(_))));
        assert!(engine.is_engaged(), "state unchanged after rejection");

        assert!(engine.engagement_command(&serde_json::json!(1)).is_err());
        assert!(engine.engagement_command(&serde_json::Value::Null).is_err());
    }

    #[tokio::test]
    async fn test_query_forecasts_reads_published_records() {
        let fetcher = MockFetcher::new();
        let mut engine = engine(
            fetcher,
            FixedClock::at(14, 10),
            config(&[
                (Package::Basic, Granularity::Hourly),
                (Package::Basic, Granularity::Daily),
            ]),
        );
        engine.handle_position_update(position(49.0, -123.0)).await;

        assert_eq!(engine.query_forecasts(Granularity::Hourly, 10).len(), 2);
        assert_eq!(engine.query_forecasts(Granularity::Daily, 1).len(), 1);
    }

    #[tokio::test]
    async fn test_extra_publisher_receives_every_record() {
        #[derive(Default)]
        struct Collecting(Mutex<Vec<(Package, Granularity, usize)>>);

        impl Publisher for Collecting {
            fn publish(&self, _record: &NormalizedRecord, package: Package, granularity: Granularity, index: usize) {
                self.0.lock().unwrap().push((package, granularity, index));
            }
        }

        let sink = Arc::new(Collecting::default());
        let mut engine = engine(
            MockFetcher::new(),
            FixedClock::at(14, 10),
            config(&[
                (Package::Basic, Granularity::Hourly),
                (Package::Sea, Granularity::Hourly),
            ]),
        )
        .with_publisher(sink.clone());

        engine.handle_position_update(position(49.0, -123.0)).await;

        let published = sink.0.lock().unwrap().clone();
        assert_eq!(published.len(), 4);
        assert!(published.contains(&(Package::Sea, Granularity::Hourly, 1)));
    }
}
