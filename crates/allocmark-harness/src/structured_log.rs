//! Structured logging for verification runs.
//!
//! Provides:
//! - [`LogEntry`]: one JSONL record with required and optional fields.
//! - [`LogEmitter`]: writes JSONL lines with sequential trace ids.
//! - [`ArtifactIndex`]: links a run's log and report with SHA-256 digests.
//! - [`validate_log_line`] / [`validate_log_file`]: schema checks.

use std::io::Write;
use std::path::Path;

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Log entry
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Info,
    Warn,
    Error,
}

/// Verification outcome of one case or of a whole run.
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
    pub strategy: Option<String>,
    /// Strategy family (`runtime-array`, `third-party`, ...).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub family: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub iterations: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub outcome: Option<Outcome>,
    /// Mean wall-clock time per cycle, probe overhead included.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latency_ns: Option<u64>,
    /// Wall-clock time of the whole run, on `verify_end`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
    /// Report files written by the run, on `verify_end`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub artifact_refs: Option<Vec<String>>,
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
            strategy: None,
            family: None,
            size: None,
            iterations: None,
            outcome: None,
            latency_ns: None,
            duration_ms: None,
            artifact_refs: None,
            details: None,
        }
    }

    /// Set the strategy name and its family.
    #[must_use]
    pub fn with_strategy(mut self, name: impl Into<String>, family: impl Into<String>) -> Self {
        self.strategy = Some(name.into());
        self.family = Some(family.into());
        self
    }

    #[must_use]
    pub fn with_size(mut self, size: usize) -> Self {
        self.size = Some(size);
        self
    }

    #[must_use]
    pub fn with_iterations(mut self, iterations: usize) -> Self {
        self.iterations = Some(iterations);
        self
    }

    #[must_use]
    pub fn with_outcome(mut self, outcome: Outcome) -> Self {
        self.outcome = Some(outcome);
        self
    }

    #[must_use]
    pub fn with_latency_ns(mut self, ns: u64) -> Self {
        self.latency_ns = Some(ns);
        self
    }

    #[must_use]
    pub fn with_duration_ms(mut self, ms: u64) -> Self {
        self.duration_ms = Some(ms);
        self
    }

    #[must_use]
    pub fn with_artifacts(mut self, refs: Vec<String>) -> Self {
        self.artifact_refs = Some(refs);
        self
    }

    /// Set free-form details.
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
// Artifact index
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArtifactEntry {
    pub path: String,
    pub kind: String,
    pub sha256: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size_bytes: Option<u64>,
}

/// Artifacts produced by one verification run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArtifactIndex {
    pub index_version: u32,
    pub run_id: String,
    pub generated_utc: String,
    pub artifacts: Vec<ArtifactEntry>,
}

impl ArtifactIndex {
    #[must_use]
    pub fn new(run_id: impl Into<String>) -> Self {
        Self {
            index_version: 1,
            run_id: run_id.into(),
            generated_utc: now_utc(),
            artifacts: Vec::new(),
        }
    }

    /// Hash `path` and add it with its size.
    pub fn add_file(&mut self, path: &Path, kind: impl Into<String>) -> std::io::Result<&mut Self> {
        let data = std::fs::read(path)?;
        self.artifacts.push(ArtifactEntry {
            path: path.display().to_string(),
            kind: kind.into(),
            sha256: sha256_hex(&data),
            size_bytes: Some(data.len() as u64),
        });
        Ok(self)
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }
}

/// Lowercase hex SHA-256 of `data`.
#[must_use]
pub fn sha256_hex(data: &[u8]) -> String {
    use sha2::Digest;
    hex_lower(&sha2::Sha256::digest(data))
}

fn hex_lower(bytes: &[u8]) -> String {
    use std::fmt::Write as _;
    let mut out = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        let _ = write!(&mut out, "{b:02x}");
    }
    out
}

// ---------------------------------------------------------------------------
// Log emitter
// ---------------------------------------------------------------------------

/// Writes JSONL entries with trace ids `<run_id>::<campaign>::<seq>`.
pub struct LogEmitter<W: Write> {
    writer: W,
    seq: u64,
    run_id: String,
    campaign: String,
}

impl LogEmitter<std::io::BufWriter<std::fs::File>> {
    /// Create an emitter that writes to a file.
    pub fn to_file(path: &Path, run_id: &str, campaign: &str) -> std::io::Result<Self> {
        let file = std::fs::File::create(path)?;
        Ok(Self::new(std::io::BufWriter::new(file), run_id, campaign))
    }
}

impl LogEmitter<Vec<u8>> {
    /// Create an emitter that writes to memory.
    #[must_use]
    pub fn to_buffer(run_id: &str, campaign: &str) -> Self {
        Self::new(Vec::new(), run_id, campaign)
    }
}

impl<W: Write> LogEmitter<W> {
    pub fn new(writer: W, run_id: &str, campaign: &str) -> Self {
        Self {
            writer,
            seq: 0,
            run_id: run_id.to_owned(),
            campaign: campaign.to_owned(),
        }
    }

    fn next_trace_id(&mut self) -> String {
        self.seq += 1;
        format!("{}::{}::{:03}", self.run_id, self.campaign, self.seq)
    }

    /// Emit an entry with only the required fields.
    pub fn emit(&mut self, level: LogLevel, event: &str) -> std::io::Result<LogEntry> {
        let entry = LogEntry::new(String::new(), level, event);
        self.emit_entry(entry)
    }

    /// Emit a populated entry, filling in the trace id and run id when unset.
    pub fn emit_entry(&mut self, mut entry: LogEntry) -> std::io::Result<LogEntry> {
        if entry.trace_id.is_empty() {
            entry.trace_id = self.next_trace_id();
        }
        if entry.run_id.is_none() {
            entry.run_id = Some(self.run_id.clone());
        }
        let line = serde_json::to_string(&entry).map_err(std::io::Error::other)?;
        writeln!(self.writer, "{line}")?;
        Ok(entry)
    }

    pub fn flush(&mut self) -> std::io::Result<()> {
        self.writer.flush()
    }

    /// Number of entries emitted so far.
    #[must_use]
    pub fn emitted(&self) -> u64 {
        self.seq
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

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
    let mut error = |field: &str, message: String| {
        errors.push(LogValidationError {
            line_number,
            field: field.to_owned(),
            message,
        });
    };

    let value: serde_json::Value = match serde_json::from_str(line) {
        Ok(v) => v,
        Err(e) => {
            error("<json>", format!("invalid JSON: {e}"));
            return Err(errors);
        }
    };

    let Some(obj) = value.as_object() else {
        error("<root>", "expected JSON object".to_owned());
        return Err(errors);
    };

    for field in ["timestamp", "trace_id", "level", "event"] {
        if !obj.contains_key(field) {
            error(field, "required field missing".to_owned());
        }
    }

    if let Some(level) = obj.get("level").and_then(|v| v.as_str())
        && !["info", "warn", "error"].contains(&level)
    {
        error("level", format!("invalid level: '{level}'"));
    }

    if let Some(outcome) = obj.get("outcome").and_then(|v| v.as_str())
        && !["pass", "fail", "skip", "error"].contains(&outcome)
    {
        error("outcome", format!("invalid outcome: '{outcome}'"));
    }

    // A size is only meaningful together with the strategy it was run with.
    if obj.contains_key("size") && !obj.get("strategy").is_some_and(serde_json::Value::is_string) {
        error("strategy", "entries with a size must name their strategy".to_owned());
    }

    if let Some(trace_id) = obj.get("trace_id").and_then(|v| v.as_str())
        && trace_id.split("::").count() != 3
    {
        error(
            "trace_id",
            format!("trace_id should follow <run_id>::<campaign>::<seq> format, got: '{trace_id}'"),
        );
    }

    if !errors.is_empty() {
        return Err(errors);
    }

    serde_json::from_value::<LogEntry>(value).map_err(|e| {
        vec![LogValidationError {
            line_number,
            field: "<deserialization>".to_owned(),
            message: format!("failed to deserialize: {e}"),
        }]
    })
}

/// Validate an entire JSONL file.
///
/// Returns the non-empty line count and every validation error found.
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
    let duration = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default();
    format_utc(duration.as_secs(), duration.subsec_millis())
}

fn format_utc(secs: u64, millis: u32) -> String {
    let (year, month, day) = civil_from_days((secs / 86_400) as i64);
    format!(
        "{year:04}-{month:02}-{day:02}T{:02}:{:02}:{:02}.{millis:03}Z",
        (secs % 86_400) / 3600,
        (secs % 3600) / 60,
        secs % 60,
    )
}

/// Proleptic Gregorian date of `days` since 1970-01-01.
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn log_entry_serializes_required_fields_only() {
        let entry = LogEntry::new("run-1::verify::001", LogLevel::Info, "case_start");
        let parsed: serde_json::Value =
            serde_json::from_str(&entry.to_jsonl().unwrap()).unwrap();
        assert!(parsed["timestamp"].is_string());
        assert_eq!(parsed["trace_id"], "run-1::verify::001");
        assert_eq!(parsed["level"], "info");
        assert_eq!(parsed["event"], "case_start");
        assert!(parsed.get("strategy").is_none());
        assert!(parsed.get("size").is_none());
    }

    #[test]
    fn case_entry_carries_strategy_context() {
        let entry = LogEntry::new("run-1::verify::002", LogLevel::Error, "case_result")
            .with_strategy("libc_aligned", "native-heap-aligned")
            .with_size(1024)
            .with_iterations(100)
            .with_outcome(Outcome::Fail)
            .with_latency_ns(85)
            .with_details(serde_json::json!({"failures": ["misaligned"]}));
        let parsed: serde_json::Value =
            serde_json::from_str(&entry.to_jsonl().unwrap()).unwrap();
        assert_eq!(parsed["strategy"], "libc_aligned");
        assert_eq!(parsed["family"], "native-heap-aligned");
        assert_eq!(parsed["size"], 1024);
        assert_eq!(parsed["outcome"], "fail");
        assert!(validate_log_line(&entry.to_jsonl().unwrap(), 1).is_ok());
    }

    #[test]
    fn run_end_entry_carries_duration_and_artifacts() {
        let entry = LogEntry::new("run-1::verify::003", LogLevel::Info, "verify_end")
            .with_outcome(Outcome::Pass)
            .with_duration_ms(1_250)
            .with_artifacts(vec!["out/report.json".into(), "out/report.md".into()]);
        let line = entry.to_jsonl().unwrap();
        let parsed: serde_json::Value = serde_json::from_str(&line).unwrap();
        assert_eq!(parsed["duration_ms"], 1_250);
        assert_eq!(parsed["artifact_refs"][1], "out/report.md");
        let back = validate_log_line(&line, 1).expect("valid");
        assert_eq!(back.duration_ms, Some(1_250));
    }

    #[test]
    fn validate_rejects_unknown_level() {
        let json = r#"{"timestamp":"t","trace_id":"a::b::001","level":"trace","event":"x"}"#;
        let errors = validate_log_line(json, 1).unwrap_err();
        assert_eq!(errors[0].field, "level");
    }

    #[test]
    fn validate_missing_required_field() {
        let json = r#"{"timestamp":"2026-01-01T00:00:00Z","level":"info","event":"x"}"#;
        let errors = validate_log_line(json, 1).unwrap_err();
        assert!(errors.iter().any(|e| e.field == "trace_id"));
    }

    #[test]
    fn validate_rejects_size_without_strategy() {
        let json = r#"{"timestamp":"t","trace_id":"a::b::001","level":"info","event":"x","size":16}"#;
        let errors = validate_log_line(json, 3).unwrap_err();
        assert_eq!(errors[0].field, "strategy");
        assert_eq!(errors[0].line_number, 3);
    }

    #[test]
    fn validate_bad_trace_id_and_outcome() {
        let json = r#"{"timestamp":"t","trace_id":"nosep","level":"info","event":"x","outcome":"timeout"}"#;
        let errors = validate_log_line(json, 1).unwrap_err();
        assert!(errors.iter().any(|e| e.field == "trace_id"));
        assert!(errors.iter().any(|e| e.field == "outcome"));
    }

    #[test]
    fn emitter_generates_sequential_trace_ids() {
        let mut emitter = LogEmitter::to_buffer("run-42", "verify");
        let first = emitter.emit(LogLevel::Info, "start").unwrap();
        let second = emitter.emit(LogLevel::Info, "end").unwrap();
        assert_eq!(first.trace_id, "run-42::verify::001");
        assert_eq!(second.trace_id, "run-42::verify::002");
        assert_eq!(emitter.emitted(), 2);
        let text = String::from_utf8(emitter.into_inner()).unwrap();
        assert_eq!(text.lines().count(), 2);
        for (i, line) in text.lines().enumerate() {
            assert!(validate_log_line(line, i + 1).is_ok());
        }
    }

    #[test]
    fn sha256_of_empty_input() {
        assert_eq!(
            sha256_hex(b""),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }

    #[test]
    fn utc_formatting_uses_calendar_dates() {
        assert_eq!(format_utc(0, 0), "1970-01-01T00:00:00.000Z");
        // 2024-02-29T12:34:56Z, a leap day.
        assert_eq!(format_utc(1_709_210_096, 7), "2024-02-29T12:34:56.007Z");
        assert_eq!(civil_from_days(-1), (1969, 12, 31));
    }
}
