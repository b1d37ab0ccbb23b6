//! Command dispatch for the telemetry protocol.
//!
//! Maps one framed message to a handler and returns the response text
//! plus whether the connection should stay open. Matching is
//! case-sensitive; anything outside the vocabulary gets the fixed
//! unknown-request response and never closes the connection.

use crate::analytics;
use crate::config::MetricksSource;
use crate::error::{AnalyticsError, StoreError};
use crate::metrics::{self, MetricsRegistry};
use crate::server::ServerState;
use crate::storage::RecordStore;
use std::fmt::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, trace, warn};

pub const UNKNOWN_RESPONSE: &str = "Unknown request\n";

/// Records shown by VISUALIZE.
const SPARKLINE_WIDTH: usize = 48;
const SPARK_LEVELS: [char; 8] = ['▁', '▂', '▃', '▄', '▅', '▆', '▇', '█'];

/// Parsed request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Echo,
    Quit,
    Info,
    TelemetryData,
    Metricks,
    List,
    Cd(String),
    Statistics,
    Predict,
    Visualize,
    Unknown(String),
}

impl Command {
    pub fn parse(message: &str) -> Command {
        match message {
            "ECHO" => Command::Echo,
            "QUIT" => Command::Quit,
            "INFO" => Command::Info,
            "TELEMETRYDATA" => Command::TelemetryData,
            "METRICKS" => Command::Metricks,
            "LIST" => Command::List,
            "STATISTICS" => Command::Statistics,
            "PREDICT" => Command::Predict,
            "VISUALIZE" => Command::Visualize,
            other => match other.strip_prefix("CD ") {
                Some(dir) => Command::Cd(dir.to_string()),
                None => Command::Unknown(other.to_string()),
            },
        }
    }
}

/// What the session does after a dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Effect {
    Continue,
    CloseConnection,
}

/// Outcome of dispatching one message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dispatch {
    /// Response text; `None` when nothing is written back.
    pub response: Option<String>,
    pub effect: Effect,
}

impl Dispatch {
    fn reply(text: impl Into<String>) -> Self {
        Self {
            response: Some(text.into()),
            effect: Effect::Continue,
        }
    }

    fn close() -> Self {
        Self {
            response: None,
            effect: Effect::CloseConnection,
        }
    }
}

/// Per-session command handler.
///
/// Holds the session's working directory for LIST/CD; everything else
/// lives in the shared server state.
pub struct Handler {
    state: Arc<ServerState>,
    cwd: PathBuf,
}

impl Handler {
    pub fn new(state: Arc<ServerState>) -> Self {
        let cwd = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("/"));
        Self::with_cwd(state, cwd)
    }

    pub fn with_cwd(state: Arc<ServerState>, cwd: PathBuf) -> Self {
        Self { state, cwd }
    }

    pub fn cwd(&self) -> &Path {
        &self.cwd
    }

    pub fn metrics(&self) -> &Arc<MetricsRegistry> {
        &self.state.metrics
    }

    pub fn dispatch(&mut self, message: &str) -> Dispatch {
        self.state.metrics.increment(metrics::REQUESTS);

        let command = Command::parse(message);
        trace!(?command, "Dispatching command");

        match command {
            Command::Echo => Dispatch::reply(format!("{message}\n")),
            Command::Quit => Dispatch::close(),
            Command::Info => Dispatch::reply(self.info()),
            Command::TelemetryData => Dispatch::reply(self.telemetry()),
            Command::Metricks => Dispatch::reply(self.metricks()),
            Command::List => Dispatch::reply(self.list()),
            Command::Cd(dir) => Dispatch::reply(self.change_directory(&dir)),
            Command::Statistics => Dispatch::reply(self.analyze(analytics::statistics_report)),
            Command::Predict => Dispatch::reply(self.analyze(analytics::prediction_report)),
            Command::Visualize => Dispatch::reply(self.visualize()),
            Command::Unknown(text) => {
                debug!(request = %text, "Unknown request");
                Dispatch::reply(UNKNOWN_RESPONSE)
            }
        }
    }

    fn info(&self) -> String {
        let sessions = self.state.live_sessions();
        format!(
            "Server information:\n\
             Name: {}\n\
             Version: {}\n\
             Started: {}\n\
             Active sessions: {sessions}\n\
             Commands: ECHO QUIT INFO TELEMETRYDATA METRICKS LIST CD STATISTICS PREDICT VISUALIZE\n",
            env!("CARGO_PKG_NAME"),
            env!("CARGO_PKG_VERSION"),
            self.state.started_at.format("%Y-%m-%d %H:%M:%S %z"),
        )
    }

    fn telemetry(&self) -> String {
        let result = {
            let mut generator = self
                .state
                .generator
                .lock()
                .unwrap_or_else(|e| e.into_inner());
            generator.generate_into(self.state.store.as_ref())
        };

        match result {
            Ok(reading) => reading.to_string(),
            Err(e) => {
                warn!(error = %e, "Failed to record telemetry");
                self.state.metrics.increment(metrics::ERRORS);
                "Failed to record telemetry\n".to_string()
            }
        }
    }

    fn metricks(&self) -> String {
        let counters = &self.state.metrics;
        match self.state.metricks {
            MetricksSource::Sent => format!("Messages sent: {}\n", counters.get(metrics::SENT)),
            MetricksSource::Requests => {
                format!("Requests received: {}\n", counters.get(metrics::REQUESTS))
            }
        }
    }

    fn list(&self) -> String {
        let entries = match std::fs::read_dir(&self.cwd) {
            Ok(entries) => entries,
            Err(e) => {
                debug!(error = %e, cwd = %self.cwd.display(), "Failed to list directory");
                return "Failed to list directory\n".to_string();
            }
        };

        let mut names: Vec<String> = entries
            .filter_map(Result::ok)
            .map(|entry| entry.file_name().to_string_lossy().into_owned())
            .filter(|name| name != "." && name != "..")
            .collect();
        names.sort();

        let mut out = String::new();
        for name in names {
            out.push_str(&name);
            out.push('\n');
        }
        out
    }

    fn change_directory(&mut self, dir: &str) -> String {
        match self.cwd.join(dir).canonicalize() {
            Ok(path) if path.is_dir() => {
                let response = format!("Directory changed to: {}\n", path.display());
                self.cwd = path;
                response
            }
            _ => "Failed to change directory\n".to_string(),
        }
    }

    fn load_failed(&self, error: &StoreError) -> String {
        warn!(%error, "Failed to load records");
        self.state.metrics.increment(metrics::ERRORS);
        "Failed to load telemetry records\n".to_string()
    }

    fn analyze(&self, report: fn(&dyn RecordStore) -> Result<String, AnalyticsError>) -> String {
        match report(self.state.store.as_ref()) {
            Ok(text) => text,
            Err(AnalyticsError::Store(e)) => self.load_failed(&e),
            Err(e) => format!("{e}\n"),
        }
    }

    fn visualize(&self) -> String {
        let records = match self.state.store.load() {
            Ok(records) => records,
            Err(e) => return self.load_failed(&e),
        };
        if records.is_empty() {
            return "No telemetry recorded\n".to_string();
        }

        let recent = &records[records.len().saturating_sub(SPARKLINE_WIDTH)..];
        let temperature: Vec<f64> = recent.iter().map(|r| r.temperature).collect();
        let humidity: Vec<f64> = recent.iter().map(|r| r.humidity).collect();

        let mut out = String::new();
        for (label, values) in [("Temperature", temperature), ("Humidity", humidity)] {
            let (min, max) = bounds(&values);
            let _ = writeln!(
                out,
                "{label}: {} (min {min:.2}, max {max:.2})",
                sparkline(&values, min, max)
            );
        }
        out
    }
}

fn bounds(values: &[f64]) -> (f64, f64) {
    values
        .iter()
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &v| {
            (lo.min(v), hi.max(v))
        })
}

fn sparkline(values: &[f64], min: f64, max: f64) -> String {
    let span = max - min;
    values
        .iter()
        .map(|&v| {
            if span <= f64::EPSILON {
                return SPARK_LEVELS[0];
            }
            let level = ((v - min) / span * (SPARK_LEVELS.len() - 1) as f64).round() as usize;
            SPARK_LEVELS[level.min(SPARK_LEVELS.len() - 1)]
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{MemoryStore, Record};
    use crate::telemetry::NormalNoise;

    /// Store whose every operation fails.
    struct BrokenStore;

    impl RecordStore for BrokenStore {
        fn append(&self, _record: Record) -> Result<(), StoreError> {
            Err(StoreError::Poisoned)
        }

        fn load(&self) -> Result<Vec<Record>, StoreError> {
            Err(StoreError::Poisoned)
        }
    }

    fn handler_with(store: Arc<dyn RecordStore>, metricks: MetricksSource) -> Handler {
        let state = ServerState::new(
            store,
            Box::new(NormalNoise::new(Some(1))),
            MetricsRegistry::with_defaults(),
            metricks,
        );
        Handler::with_cwd(Arc::new(state), std::env::temp_dir())
    }

    fn handler() -> (Handler, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        (handler_with(store.clone(), MetricksSource::Sent), store)
    }

    #[test]
    fn test_parse_vocabulary() {
        assert_eq!(Command::parse("ECHO"), Command::Echo);
        assert_eq!(Command::parse("QUIT"), Command::Quit);
        assert_eq!(Command::parse("CD /tmp"), Command::Cd("/tmp".to_string()));
        assert_eq!(Command::parse("echo"), Command::Unknown("echo".to_string()));
        assert_eq!(Command::parse("ECHO "), Command::Unknown("ECHO ".to_string()));
        assert_eq!(Command::parse("CD"), Command::Unknown("CD".to_string()));
        assert_eq!(Command::parse(""), Command::Unknown(String::new()));
    }

    #[test]
    fn test_echo_is_stable() {
        let (mut handler, _) = handler();
        for _ in 0..3 {
            assert_eq!(
                handler.dispatch("ECHO"),
                Dispatch {
                    response: Some("ECHO\n".to_string()),
                    effect: Effect::Continue
                }
            );
        }
    }

    #[test]
    fn test_quit_closes_without_response() {
        let (mut handler, _) = handler();
        let dispatch = handler.dispatch("QUIT");
        assert_eq!(dispatch.effect, Effect::CloseConnection);
        assert!(dispatch.response.is_none());
    }

    #[test]
    fn test_unknown_requests_continue() {
        let (mut handler, _) = handler();
        for message in ["", "HELLO", "quit", "TELEMETRY", "LIST please"] {
            let dispatch = handler.dispatch(message);
            assert_eq!(dispatch.response.as_deref(), Some(UNKNOWN_RESPONSE));
            assert_eq!(dispatch.effect, Effect::Continue);
        }
    }

    #[test]
    fn test_telemetry_appends_one_record() {
        let (mut handler, store) = handler();
        let response = handler.dispatch("TELEMETRYDATA").response.unwrap();
        assert!(response.starts_with("Temperature: "));
        assert!(response.contains("\nHumidity: "));
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_metricks_reports_configured_counter() {
        let (mut handler, _) = handler();
        handler.metrics().increment(metrics::SENT);
        handler.metrics().increment(metrics::SENT);
        assert_eq!(
            handler.dispatch("METRICKS").response.as_deref(),
            Some("Messages sent: 2\n")
        );

        let mut handler = handler_with(Arc::new(MemoryStore::new()), MetricksSource::Requests);
        handler.dispatch("ECHO");
        assert_eq!(
            handler.dispatch("METRICKS").response.as_deref(),
            Some("Requests received: 2\n")
        );
    }

    #[test]
    fn test_info() {
        let (mut handler, _) = handler();
        let response = handler.dispatch("INFO").response.unwrap();
        assert!(response.starts_with("Server information:\n"));
        assert!(response.contains("Active sessions: 0\n"));
    }

    #[test]
    fn test_analytics_need_two_records() {
        let (mut handler, store) = handler();
        store.append(Record::new(1.0, 2.0)).unwrap();
        assert_eq!(
            handler.dispatch("STATISTICS").response.as_deref(),
            Some("insufficient data: need at least 2 records, have 1\n")
        );
        assert_eq!(
            handler.dispatch("PREDICT").response.as_deref(),
            Some("insufficient data: need at least 2 records, have 1\n")
        );
    }

    #[test]
    fn test_predict_linear_records() {
        let store = Arc::new(MemoryStore::with_records([
            Record::new(0.0, 10.0),
            Record::new(1.0, 12.0),
            Record::new(2.0, 14.0),
        ]));
        let mut handler = handler_with(store, MetricksSource::Sent);
        let response = handler.dispatch("PREDICT").response.unwrap();
        assert!(response.contains("Predicted value: 16.0000"));
    }

    #[test]
    fn test_list_and_cd() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("sub")).unwrap();
        std::fs::write(dir.path().join("b.txt"), b"").unwrap();
        std::fs::write(dir.path().join("sub").join("a.txt"), b"").unwrap();

        let (handler, _) = handler();
        let mut handler = Handler::with_cwd(Arc::clone(&handler.state), dir.path().to_path_buf());

        assert_eq!(handler.dispatch("LIST").response.as_deref(), Some("b.txt\nsub\n"));

        let response = handler.dispatch("CD sub").response.unwrap();
        assert!(response.starts_with("Directory changed to: "));
        assert_eq!(handler.dispatch("LIST").response.as_deref(), Some("a.txt\n"));

        assert_eq!(
            handler.dispatch("CD missing").response.as_deref(),
            Some("Failed to change directory\n")
        );
        assert_eq!(
            handler.dispatch("CD a.txt").response.as_deref(),
            Some("Failed to change directory\n")
        );
    }

    #[test]
    fn test_visualize() {
        let (mut handler, store) = handler();
        assert_eq!(
            handler.dispatch("VISUALIZE").response.as_deref(),
            Some("No telemetry recorded\n")
        );

        for i in 0..8 {
            store.append(Record::new(i as f64, 50.0)).unwrap();
        }
        let response = handler.dispatch("VISUALIZE").response.unwrap();
        assert_eq!(
            response,
            "Temperature: ▁▂▃▄▅▆▇█ (min 0.00, max 7.00)\n\
             Humidity: ▁▁▁▁▁▁▁▁ (min 50.00, max 50.00)\n"
        );
    }

    #[test]
    fn test_requests_counted() {
        let (mut handler, _) = handler();
        handler.dispatch("ECHO");
        handler.dispatch("nope");
        handler.dispatch("QUIT");
        assert_eq!(handler.metrics().get(metrics::REQUESTS), 3);
    }

    #[test]
    fn test_store_failures_are_reported_and_counted() {
        let mut handler = handler_with(Arc::new(BrokenStore), MetricksSource::Sent);
        for command in ["STATISTICS", "PREDICT", "VISUALIZE"] {
            assert_eq!(
                handler.dispatch(command).response.as_deref(),
                Some("Failed to load telemetry records\n")
            );
        }
        assert_eq!(
            handler.dispatch("TELEMETRYDATA").response.as_deref(),
            Some("Failed to record telemetry\n")
        );
        assert_eq!(handler.metrics().get(metrics::ERRORS), 4);
    }
}
