//! Bounded activity log
//!
//! Entries are level-filtered on the way in and evicted oldest-first so the
//! running size estimate never exceeds the configured budget. All mutation of
//! the log happens under one mutex, so the invariant holds with concurrent
//! writers.

use crate::error::MutatorResult;
use chrono::{DateTime, Local, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, VecDeque};
use std::fmt::Write;
use std::sync::{Mutex, MutexGuard};
use tracing::debug;

/// Default budget: 100 MiB
pub const DEFAULT_MAX_SIZE_BYTES: u64 = 100 * 1024 * 1024;

/// Fixed per-entry overhead added to the size estimate
const ENTRY_OVERHEAD_BYTES: u64 = 40;

const CSV_COLUMNS: [&str; 5] = ["Level", "Origin", "Path", "DateTime", "Message"];

/// Log verbosity, most verbose first.
///
/// An entry is kept when its level is at or above the configured minimum, so
/// `Full` keeps everything and `Off` keeps nothing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LogLevel {
    #[default]
    Full,
    Info,
    Off,
}

impl LogLevel {
    pub fn name(self) -> &'static str {
        match self {
            LogLevel::Full => "FULL",
            LogLevel::Info => "INFO",
            LogLevel::Off => "OFF",
        }
    }
}

impl std::fmt::Display for LogLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

impl std::str::FromStr for LogLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "FULL" => Ok(LogLevel::Full),
            "INFO" => Ok(LogLevel::Info),
            "OFF" => Ok(LogLevel::Off),
            other => Err(format!("unknown log level '{}'", other)),
        }
    }
}

/// Log configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogSettings {
    pub level: LogLevel,
    pub max_size_bytes: u64,
}

impl Default for LogSettings {
    fn default() -> Self {
        Self {
            level: LogLevel::Full,
            max_size_bytes: DEFAULT_MAX_SIZE_BYTES,
        }
    }
}

/// One logged event
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEntry {
    pub level: LogLevel,
    pub origin: String,
    pub path: String,
    pub timestamp: DateTime<Utc>,
    /// Flat JSON object, or plain text for diagnostics
    pub message: String,
}

impl LogEntry {
    /// Estimated footprint used for the size budget
    pub fn estimated_size(&self) -> u64 {
        (self.level.name().len() + self.origin.len() + self.path.len() + self.message.len()) as u64
            + ENTRY_OVERHEAD_BYTES
    }
}

#[derive(Debug)]
struct LogState {
    entries: VecDeque<LogEntry>,
    current_size: u64,
    max_size: u64,
    min_level: LogLevel,
}

impl LogState {
    fn evict_until_fits(&mut self, incoming: u64) {
        while self.current_size + incoming > self.max_size {
            match self.entries.pop_front() {
                Some(removed) => self.current_size -= removed.estimated_size(),
                None => break,
            }
        }
    }

    fn recalculate_size(&mut self) {
        self.current_size = self.entries.iter().map(LogEntry::estimated_size).sum();
    }
}

/// Size-budgeted, level-filtered, FIFO-evicting log
#[derive(Debug)]
pub struct BoundedLog {
    state: Mutex<LogState>,
}

impl Default for BoundedLog {
    fn default() -> Self {
        Self::new(LogSettings::default())
    }
}

impl BoundedLog {
    pub fn new(settings: LogSettings) -> Self {
        Self {
            state: Mutex::new(LogState {
                entries: VecDeque::new(),
                current_size: 0,
                max_size: settings.max_size_bytes,
                min_level: settings.level,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, LogState> {
        // Every critical section leaves the state consistent
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Record an event. Returns whether it was stored.
    ///
    /// Events below the minimum level are dropped before they are counted.
    /// Older entries are evicted until the new one fits; an event larger than
    /// the whole budget is not stored.
    pub fn log(&self, level: LogLevel, origin: &str, path: &str, message: &str) -> bool {
        let mut state = self.lock();
        if level < state.min_level {
            return false;
        }

        let entry = LogEntry {
            level,
            origin: origin.to_string(),
            path: path.to_string(),
            timestamp: Utc::now(),
            message: message.to_string(),
        };
        let size = entry.estimated_size();

        if size > state.max_size {
            debug!("Dropping log entry of {} bytes; budget is {}", size, state.max_size);
            return false;
        }

        state.evict_until_fits(size);
        state.entries.push_back(entry);
        state.current_size += size;
        true
    }

    /// Log a flat key/value map as a JSON object.
    ///
    /// A message that cannot be built is reported at FULL level instead.
    pub fn log_json(
        &self,
        level: LogLevel,
        origin: &str,
        path: &str,
        values: &BTreeMap<String, String>,
    ) -> bool {
        match json_object(values) {
            Ok(json) => self.log(level, origin, path, &json),
            Err(e) => {
                debug!("Failed to build log message: {}", e);
                self.log(LogLevel::Full, origin, path, &format!("Failed to build log message: {}", e))
            }
        }
    }

    pub fn min_level(&self) -> LogLevel {
        self.lock().min_level
    }

    /// Change the minimum level for future events. Stored entries are kept;
    /// the size counter is rebuilt from them.
    pub fn set_min_level(&self, level: LogLevel) {
        let mut state = self.lock();
        state.min_level = level;
        state.recalculate_size();
    }

    pub fn max_size(&self) -> u64 {
        self.lock().max_size
    }

    /// Change the budget, evicting oldest entries until it is respected
    pub fn set_max_size(&self, max_size: u64) {
        let mut state = self.lock();
        state.max_size = max_size;
        state.evict_until_fits(0);
    }

    pub fn current_size(&self) -> u64 {
        self.lock().current_size
    }

    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().entries.is_empty()
    }

    /// Remove every entry
    pub fn clear(&self) {
        let mut state = self.lock();
        state.entries.clear();
        state.current_size = 0;
    }

    /// Copy of the stored entries, oldest first
    pub fn entries(&self) -> Vec<LogEntry> {
        self.lock().entries.iter().cloned().collect()
    }

    /// Render the log as CSV with a header row
    pub fn to_csv(&self) -> String {
        let state = self.lock();
        let mut out = CSV_COLUMNS.join(",");
        out.push('\n');

        for entry in &state.entries {
            let timestamp = csv_timestamp(&entry.timestamp);
            let cells = [
                entry.level.name(),
                entry.origin.as_str(),
                entry.path.as_str(),
                timestamp.as_str(),
                entry.message.as_str(),
            ];
            let row: Vec<String> = cells.iter().map(|cell| csv_quote(cell)).collect();
            out.push_str(&row.join(","));
            out.push('\n');
        }

        out
    }
}

/// Entry time in the local time zone
fn csv_timestamp(timestamp: &DateTime<Utc>) -> String {
    timestamp.with_timezone(&Local).format("%Y-%m-%d %H:%M:%S%.3f").to_string()
}

fn csv_quote(cell: &str) -> String {
    format!("\"{}\"", cell.replace('"', "\"\""))
}

/// Build a flat JSON object from string keys and values.
///
/// Backslash, double quote, backspace, form feed, newline, carriage return
/// and tab are escaped to their two-character forms; other control
/// characters use `\u00XX`.
pub fn json_object(values: &BTreeMap<String, String>) -> MutatorResult<String> {
    let mut out = String::from("{");
    for (i, (key, value)) in values.iter().enumerate() {
        if i > 0 {
            out.push(',');
        }
        write_json_string(&mut out, key)?;
        out.push(':');
        write_json_string(&mut out, value)?;
    }
    out.push('}');
    Ok(out)
}

fn write_json_string(out: &mut String, value: &str) -> std::fmt::Result {
    out.push('"');
    for ch in value.chars() {
        match ch {
            '\\' => out.push_str("\\\\"),
            '"' => out.push_str("\\\""),
            '\u{8}' => out.push_str("\\b"),
            '\u{c}' => out.push_str("\\f"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c if c < ' ' => write!(out, "\\u{:04x}", c as u32)?,
            c => out.push(c),
        }
    }
    out.push('"');
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn log_with(max_size: u64, level: LogLevel) -> BoundedLog {
        BoundedLog::new(LogSettings {
            level,
            max_size_bytes: max_size,
        })
    }

    // FULL(4) + origin(1) + path(1) + message(4) + 40
    const ENTRY_SIZE: u64 = 50;

    #[test]
    fn test_size_estimate() {
        let log = log_with(1000, LogLevel::Full);
        assert!(log.log(LogLevel::Full, "o", "p", "mmmm"));
        assert_eq!(log.current_size(), ENTRY_SIZE);
    }

    #[test]
    fn test_eviction_keeps_size_within_budget() {
        let log = log_with(ENTRY_SIZE * 3, LogLevel::Full);
        for i in 0..5 {
            log.log(LogLevel::Full, "o", "p", &format!("m{:03}", i));
            assert!(log.current_size() <= log.max_size());
        }

        let messages: Vec<String> = log.entries().into_iter().map(|e| e.message).collect();
        assert_eq!(messages, vec!["m002", "m003", "m004"]);
        assert_eq!(log.current_size(), ENTRY_SIZE * 3);
    }

    #[test]
    fn test_lowering_budget_evicts_immediately() {
        let log = log_with(ENTRY_SIZE * 4, LogLevel::Full);
        for i in 0..4 {
            log.log(LogLevel::Full, "o", "p", &format!("m{:03}", i));
        }
        log.set_max_size(ENTRY_SIZE + 10);
        assert_eq!(log.len(), 1);
        assert_eq!(log.entries()[0].message, "m003");
        assert!(log.current_size() <= log.max_size());

        log.set_max_size(0);
        assert!(log.is_empty());
        assert_eq!(log.current_size(), 0);
    }

    #[test]
    fn test_below_minimum_level_is_never_counted() {
        let log = log_with(1000, LogLevel::Info);
        assert!(!log.log(LogLevel::Full, "o", "p", "dropped"));
        assert!(log.is_empty());
        assert_eq!(log.current_size(), 0);
        assert!(log.log(LogLevel::Info, "o", "p", "kept"));
        assert_eq!(log.len(), 1);
    }

    #[test]
    fn test_off_keeps_nothing() {
        let log = log_with(1000, LogLevel::Off);
        assert!(!log.log(LogLevel::Info, "o", "p", "x"));
        assert!(!log.log(LogLevel::Full, "o", "p", "x"));
        assert!(log.is_empty());
    }

    #[test]
    fn test_raising_level_keeps_existing_entries() {
        let log = log_with(1000, LogLevel::Full);
        log.log(LogLevel::Full, "o", "p", "mmmm");
        log.log(LogLevel::Info, "o", "p", "mmmm");
        log.set_min_level(LogLevel::Info);

        assert_eq!(log.len(), 2);
        assert_eq!(log.current_size(), ENTRY_SIZE * 2);
        assert!(!log.log(LogLevel::Full, "o", "p", "mmmm"));
    }

    #[test]
    fn test_oversized_entry_is_rejected() {
        let log = log_with(ENTRY_SIZE, LogLevel::Full);
        log.log(LogLevel::Full, "o", "p", "mmmm");
        assert!(!log.log(LogLevel::Full, "o", "p", &"x".repeat(100)));
        assert_eq!(log.len(), 1);
        assert!(log.current_size() <= log.max_size());
    }

    #[test]
    fn test_clear() {
        let log = log_with(1000, LogLevel::Full);
        log.log(LogLevel::Info, "o", "p", "x");
        log.clear();
        assert!(log.is_empty());
        assert_eq!(log.current_size(), 0);
    }

    #[test]
    fn test_json_object_escaping() {
        let mut values = BTreeMap::new();
        values.insert("a\"b".to_string(), "line\nnext\ttab\\\r\u{8}\u{c}".to_string());
        values.insert("z".to_string(), "\u{1}".to_string());

        let json = json_object(&values).unwrap();
        assert_eq!(json, r#"{"a\"b":"line\nnext\ttab\\\r\b\f","z":"\u0001"}"#);

        let parsed: BTreeMap<String, String> = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, values);
    }

    #[test]
    fn test_json_object_empty() {
        assert_eq!(json_object(&BTreeMap::new()).unwrap(), "{}");
    }

    #[test]
    fn test_csv_export() {
        let log = log_with(1000, LogLevel::Full);
        log.log(LogLevel::Info, "https://example.com", "/a", r#"{"q":"x"}"#);

        let csv = log.to_csv();
        let mut lines = csv.lines();
        assert_eq!(lines.next(), Some("Level,Origin,Path,DateTime,Message"));
        let row = lines.next().unwrap();
        assert!(row.starts_with(r#""INFO","https://example.com","/a","#));
        assert!(row.ends_with(r#""{""q"":""x""}""#));
    }

    #[test]
    fn test_csv_timestamp_uses_local_time() {
        let log = log_with(1000, LogLevel::Full);
        log.log(LogLevel::Full, "o", "/", "m");
        let entry = &log.entries()[0];

        let local = entry.timestamp.with_timezone(&Local).format("%Y-%m-%d %H:%M:%S%.3f").to_string();
        let csv = log.to_csv();
        let row = csv.lines().nth(1).unwrap();
        assert!(row.contains(&format!("\"{}\"", local)), "row {} lacks {}", row, local);
        assert_eq!(csv_timestamp(&entry.timestamp), local);
    }

    #[test]
    fn test_level_parsing_and_order() {
        assert_eq!("info".parse::<LogLevel>().unwrap(), LogLevel::Info);
        assert!("verbose".parse::<LogLevel>().is_err());
        assert!(LogLevel::Full < LogLevel::Info && LogLevel::Info < LogLevel::Off);
    }

    #[test]
    fn test_concurrent_writers_respect_budget() {
        let log = std::sync::Arc::new(log_with(ENTRY_SIZE * 10, LogLevel::Full));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let log = log.clone();
                std::thread::spawn(move || {
                    for _ in 0..200 {
                        log.log(LogLevel::Full, "o", "p", "mmmm");
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(log.len(), 10);
        assert_eq!(log.current_size(), ENTRY_SIZE * 10);
    }

    proptest! {
        #[test]
        fn prop_size_never_exceeds_budget(
            max_size in 0u64..2000,
            messages in prop::collection::vec(".{0,80}", 0..50),
        ) {
            let log = log_with(max_size, LogLevel::Full);
            for message in &messages {
                log.log(LogLevel::Full, "origin", "/path", message);
                prop_assert!(log.current_size() <= max_size);
            }
            let recount: u64 = log.entries().iter().map(LogEntry::estimated_size).sum();
            prop_assert_eq!(recount, log.current_size());
        }
    }
}
