//! Structured JSONL logging for harness runs.
//!
//! Provides:
//! - [`LogEntry`]: one JSONL record with required + optional fields.
//! - [`LogEmitter`]: writes records to a file, a buffer, or nowhere.
//! - [`validate_log_line`] / [`validate_log_file`]: schema checks used by the
//!   `validate-log` subcommand.
//!
//! Allocator lifecycle records from `tieralloc-core` are lifted into the same
//! schema with [`LogEntry::from_lifecycle`], so one file carries both the
//! harness timeline and the allocator's slow-path decisions.

use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use tieralloc_core::size_class::NUM_SIZE_CLASSES;
use tieralloc_core::{AllocatorLogLevel, AllocatorLogRecord};

// ---------------------------------------------------------------------------
// Log entry
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
    Fatal,
}

impl From<AllocatorLogLevel> for LogLevel {
    fn from(level: AllocatorLogLevel) -> Self {
        match level {
            AllocatorLogLevel::Trace => Self::Trace,
            AllocatorLogLevel::Debug => Self::Debug,
            AllocatorLogLevel::Info => Self::Info,
            AllocatorLogLevel::Warn => Self::Warn,
            AllocatorLogLevel::Error => Self::Error,
        }
    }
}

/// Scenario verdict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Outcome {
    Pass,
    Fail,
    Skip,
    Error,
}

/// Canonical structured log entry.
///
/// Required fields: `timestamp`, `trace_id`, `level`, `event`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogEntry {
    // Required
    pub timestamp: String,
    pub trace_id: String,
    pub level: LogLevel,
    pub event: String,

    // Optional
    #[serde(skip_serializing_if = "Option::is_none")]
    pub run_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scenario: Option<String>,
    /// Allocator entry point involved (`allocate`, `reallocate`, ...).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub symbol: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size: Option<usize>,
    /// Size-class index, `0..16`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub class: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub outcome: Option<Outcome>,
    /// Allocator-side outcome label of a lifecycle event (`success`,
    /// `forwarded`, `retry`, ...).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub alloc_outcome: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub decision_id: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub heap_size: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pool_bytes_left: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl LogEntry {
    /// Create a new log entry with required fields only.
    #[must_use]
    pub fn new(trace_id: impl Into<String>, level: LogLevel, event: impl Into<String>) -> Self {
        Self {
            timestamp: now_utc(),
            trace_id: trace_id.into(),
            level,
            event: event.into(),
            run_id: None,
            scenario: None,
            symbol: None,
            size: None,
            class: None,
            outcome: None,
            alloc_outcome: None,
            decision_id: None,
            heap_size: None,
            pool_bytes_left: None,
            duration_ms: None,
            details: None,
        }
    }

    /// Lifts an allocator lifecycle record into the JSONL schema.
    #[must_use]
    pub fn from_lifecycle(record: &AllocatorLogRecord, scenario: &str) -> Self {
        let mut entry = Self::new(record.trace_id.clone(), record.level.into(), record.event)
            .with_scenario(scenario)
            .with_details(serde_json::json!({
                "note": record.details,
                "growth_events": record.growth_events,
                "cannibalizations": record.cannibalizations,
                "free_blocks_total": record.free_blocks_total,
            }));
        entry.symbol = Some(record.symbol.to_string());
        entry.size = record.size;
        entry.class = record.class;
        entry.alloc_outcome = Some(record.outcome.to_string());
        entry.decision_id = Some(record.decision_id);
        entry.heap_size = Some(record.heap_size);
        entry.pool_bytes_left = Some(record.pool_bytes_left);
        entry
    }

    #[must_use]
    pub fn with_scenario(mut self, scenario: impl Into<String>) -> Self {
        self.scenario = Some(scenario.into());
        self
    }

    #[must_use]
    pub fn with_outcome(mut self, outcome: Outcome) -> Self {
        self.outcome = Some(outcome);
        self
    }

    /// Records the pool footprint at the time of the event.
    #[must_use]
    pub fn with_pool(mut self, heap_size: usize, pool_bytes_left: usize) -> Self {
        self.heap_size = Some(heap_size);
        self.pool_bytes_left = Some(pool_bytes_left);
        self
    }

    #[must_use]
    pub fn with_duration_ms(mut self, ms: u64) -> Self {
        self.duration_ms = Some(ms);
        self
    }

    #[must_use]
    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }

    /// Serialize to a single JSONL line (no trailing newline).
    pub fn to_jsonl(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

// ---------------------------------------------------------------------------
// Log emitter
// ---------------------------------------------------------------------------

/// Writes structured JSONL log entries.
pub struct LogEmitter<W: Write> {
    writer: W,
    seq: u64,
    run_id: String,
}

impl LogEmitter<BufWriter<File>> {
    /// Create an emitter that writes to a file.
    pub fn to_file(path: &Path, run_id: &str) -> std::io::Result<Self> {
        let file = File::create(path)?;
        Ok(Self::new(BufWriter::new(file), run_id))
    }
}

impl LogEmitter<Vec<u8>> {
    /// Create an emitter that writes to an in-memory buffer.
    #[must_use]
    pub fn to_buffer(run_id: &str) -> Self {
        Self::new(Vec::new(), run_id)
    }
}

impl LogEmitter<std::io::Sink> {
    /// Create an emitter that discards everything.
    #[must_use]
    pub fn discard(run_id: &str) -> Self {
        Self::new(std::io::sink(), run_id)
    }
}

impl<W: Write> LogEmitter<W> {
    pub fn new(writer: W, run_id: &str) -> Self {
        Self {
            writer,
            seq: 0,
            run_id: run_id.to_string(),
        }
    }

    #[must_use]
    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    /// Entries written so far.
    #[must_use]
    pub fn emitted(&self) -> u64 {
        self.seq
    }

    fn next_trace_id(&self) -> String {
        format!("tieralloc::{}::{:04}", self.run_id, self.seq + 1)
    }

    /// Emit a bare entry with an auto-generated trace id.
    pub fn emit(&mut self, level: LogLevel, event: &str) -> std::io::Result<LogEntry> {
        let entry = LogEntry::new(self.next_trace_id(), level, event);
        self.emit_entry(entry.clone())?;
        Ok(entry)
    }

    /// Emit a fully-populated entry, filling in `trace_id` and `run_id` when
    /// absent.
    pub fn emit_entry(&mut self, mut entry: LogEntry) -> std::io::Result<()> {
        if entry.trace_id.is_empty() {
            entry.trace_id = self.next_trace_id();
        }
        if entry.run_id.is_none() {
            entry.run_id = Some(self.run_id.clone());
        }
        let line = entry.to_jsonl().map_err(std::io::Error::other)?;
        writeln!(self.writer, "{line}")?;
        self.seq += 1;
        Ok(())
    }

    pub fn flush(&mut self) -> std::io::Result<()> {
        self.writer.flush()
    }

    #[must_use]
    pub fn get_ref(&self) -> &W {
        &self.writer
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

/// Validation error for a log line.
#[derive(Debug)]
pub struct LogValidationError {
    pub line_number: usize,
    pub field: String,
    pub message: String,
}

impl std::fmt::Display for LogValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "line {}: field '{}': {}",
            self.line_number, self.field, self.message
        )
    }
}

/// Validate a single JSONL line against the schema.
pub fn validate_log_line(
    line: &str,
    line_number: usize,
) -> Result<LogEntry, Vec<LogValidationError>> {
    let mut errors = Vec::new();
    let mut fail = |field: &str, message: String| {
        errors.push(LogValidationError {
            line_number,
            field: field.to_string(),
            message,
        });
    };

    let value: serde_json::Value = match serde_json::from_str(line) {
        Ok(v) => v,
        Err(e) => {
            fail("<json>", format!("invalid JSON: {e}"));
            return Err(errors);
        }
    };
    let Some(obj) = value.as_object() else {
        fail("<root>", "expected JSON object".to_string());
        return Err(errors);
    };

    for field in ["timestamp", "trace_id", "level", "event"] {
        if !obj.contains_key(field) {
            fail(field, "required field missing".to_string());
        }
    }

    if let Some(level) = obj.get("level").and_then(|v| v.as_str())
        && !["trace", "debug", "info", "warn", "error", "fatal"].contains(&level)
    {
        fail("level", format!("invalid level: '{level}'"));
    }

    if let Some(outcome) = obj.get("outcome").and_then(|v| v.as_str())
        && !["pass", "fail", "skip", "error"].contains(&outcome)
    {
        fail("outcome", format!("invalid outcome: '{outcome}'"));
    }

    if let Some(class) = obj.get("class") {
        match class.as_u64() {
            Some(c) if (c as usize) < NUM_SIZE_CLASSES => {}
            _ => fail(
                "class",
                format!("size class must be an integer in 0..{NUM_SIZE_CLASSES}, got {class}"),
            ),
        }
    }

    for field in ["size", "heap_size", "pool_bytes_left", "decision_id"] {
        if let Some(v) = obj.get(field)
            && v.as_u64().is_none()
        {
            fail(field, format!("expected non-negative integer, got {v}"));
        }
    }

    if let Some(trace_id) = obj.get("trace_id").and_then(|v| v.as_str())
        && !trace_id.starts_with("tieralloc::")
    {
        fail(
            "trace_id",
            format!("trace_id should start with 'tieralloc::', got: '{trace_id}'"),
        );
    }

    if !errors.is_empty() {
        return Err(errors);
    }

    serde_json::from_value::<LogEntry>(value).map_err(|e| {
        vec![LogValidationError {
            line_number,
            field: "<deserialization>".to_string(),
            message: format!("failed to deserialize: {e}"),
        }]
    })
}

/// Validate an entire JSONL file.
///
/// Returns the non-empty line count and any validation errors found.
pub fn validate_log_file(path: &Path) -> Result<(usize, Vec<LogValidationError>), std::io::Error> {
    let content = std::fs::read_to_string(path)?;
    let mut all_errors = Vec::new();
    let mut line_count = 0;

    for (i, line) in content.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        line_count += 1;
        if let Err(errs) = validate_log_line(line, i + 1) {
            all_errors.extend(errs);
        }
    }

    Ok((line_count, all_errors))
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// RFC 3339 UTC timestamp with millisecond precision.
pub(crate) fn now_utc() -> String {
    let elapsed = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default();
    let secs = elapsed.as_secs();
    let (year, month, day) = civil_from_days((secs / 86_400) as i64);
    format!(
        "{year:04}-{month:02}-{day:02}T{:02}:{:02}:{:02}.{:03}Z",
        (secs % 86_400) / 3600,
        (secs % 3600) / 60,
        secs % 60,
        elapsed.subsec_millis(),
    )
}

/// Days since 1970-01-01 to a proleptic Gregorian date.
fn civil_from_days(days: i64) -> (i64, u32, u32) {
    let z = days + 719_468;
    let era = z.div_euclid(146_097);
    let doe = z.rem_euclid(146_097);
    let yoe = (doe - doe / 1460 + doe / 36_524 - doe / 146_096) / 365;
    let doy = doe - (365 * yoe + yoe / 4 - yoe / 100);
    let mp = (5 * doy + 2) / 153;
    let day = (doy - (153 * mp + 2) / 5 + 1) as u32;
    let month = (if mp < 10 { mp + 3 } else { mp - 9 }) as u32;
    let year = yoe + era * 400 + i64::from(month <= 2);
    (year, month, day)
}
