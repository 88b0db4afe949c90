//! Turns a [`BatchResult`] into what a front end shows: per-attempt status
//! and ACK breakdown, a summary table, throughput figures and the error that
//! stopped the batch, if any.

use std::io::{self, Write};

use serde::Serialize;

use crate::batch::{AckRecord, BatchMetrics, BatchResult, MetricsHistory};
use crate::hl7::{self, AckStatus};

pub const PREVIEW_LIMIT: usize = 120;
const ELLIPSIS: &str = "...";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Success,
    Warning,
    Error,
}

impl From<AckStatus> for Severity {
    fn from(status: AckStatus) -> Self {
        if status.is_accept() {
            Self::Success
        } else if status == AckStatus::Unknown {
            Self::Warning
        } else {
            Self::Error
        }
    }
}

/// MSA-1 as received, or `UNKNOWN` when there is none.
pub fn status_code(ack: &str) -> &str {
    hl7::ack_code(ack)
        .filter(|code| !code.is_empty())
        .unwrap_or("UNKNOWN")
}

pub fn status_label(ack: &str) -> String {
    match hl7::parse_status(ack) {
        AckStatus::Accept => "ACK Status: AA (Application Accept)".to_string(),
        AckStatus::Error => "ACK Status: AE (Application Error)".to_string(),
        AckStatus::Reject => "ACK Status: AR (Application Reject)".to_string(),
        AckStatus::Unknown => format!("Unknown ACK status: {}", status_code(ack)),
    }
}

pub fn ack_segments(ack: &str) -> Vec<&str> {
    ack.trim().split(hl7::SEGMENT_SEPARATOR).collect()
}

/// First `limit` characters on one line, with `...` appended when cut.
pub fn preview(text: &str, limit: usize) -> String {
    let mut chars = text.chars();
    let mut out: String = chars
        .by_ref()
        .take(limit)
        .map(|c| if c == '\r' || c == '\n' { ' ' } else { c })
        .collect();
    if chars.next().is_some() {
        out.push_str(ELLIPSIS);
    }
    out
}

#[derive(Debug, Clone, Serialize)]
pub struct AttemptReport {
    pub message: usize,
    pub attempt: usize,
    pub status: AckStatus,
    pub severity: Severity,
    pub status_label: String,
    pub raw_ack: String,
    pub segments: Vec<String>,
}

impl From<&AckRecord> for AttemptReport {
    fn from(record: &AckRecord) -> Self {
        let status = record.status();
        Self {
            message: record.message_index,
            attempt: record.attempt_index,
            status,
            severity: status.into(),
            status_label: status_label(&record.ack_text),
            raw_ack: record.ack_text.clone(),
            segments: ack_segments(&record.ack_text)
                .into_iter()
                .map(str::to_string)
                .collect(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SummaryRow {
    pub message: usize,
    pub attempt: usize,
    pub control_id: Option<String>,
    pub status: String,
    pub ack_preview: String,
}

impl From<&AckRecord> for SummaryRow {
    fn from(record: &AckRecord) -> Self {
        Self {
            message: record.message_index,
            attempt: record.attempt_index,
            control_id: record.message_control_id.clone(),
            status: status_code(&record.ack_text).to_string(),
            ack_preview: preview(&record.ack_text, PREVIEW_LIMIT),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct MetricsReport {
    pub attempts: usize,
    pub messages_per_sec: f64,
    pub avg_duration_ms: f64,
    pub elapsed_ms: f64,
}

impl From<&BatchMetrics> for MetricsReport {
    fn from(metrics: &BatchMetrics) -> Self {
        Self {
            attempts: metrics.attempts,
            messages_per_sec: metrics.messages_per_sec,
            avg_duration_ms: metrics.avg_duration.as_secs_f64() * 1000.0,
            elapsed_ms: metrics.elapsed.as_secs_f64() * 1000.0,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct BatchReport {
    pub attempts: Vec<AttemptReport>,
    pub summary: Vec<SummaryRow>,
    pub metrics: MetricsReport,
    pub error: Option<String>,
}

impl BatchReport {
    pub fn new(result: &BatchResult) -> Self {
        Self {
            attempts: result.records.iter().map(AttemptReport::from).collect(),
            summary: result.records.iter().map(SummaryRow::from).collect(),
            metrics: MetricsReport::from(&result.metrics),
            error: result.failure.as_ref().map(ToString::to_string),
        }
    }

    pub fn write_text<W: Write>(&self, out: &mut W) -> io::Result<()> {
        for attempt in &self.attempts {
            writeln!(
                out,
                "[message {} / attempt {}] {}",
                attempt.message, attempt.attempt, attempt.status_label
            )?;
            writeln!(out, "Raw ACK: {}", attempt.raw_ack.escape_debug())?;
            writeln!(out, "Parsed ACK segments:")?;
            for segment in &attempt.segments {
                writeln!(out, "  {segment}")?;
            }
            writeln!(out)?;
        }

        if !self.summary.is_empty() {
            writeln!(
                out,
                "{:>7}  {:>7}  {:<20}  {:<7}  ACK",
                "MESSAGE", "ATTEMPT", "CONTROL ID", "STATUS"
            )?;
            for row in &self.summary {
                writeln!(
                    out,
                    "{:>7}  {:>7}  {:<20}  {:<7}  {}",
                    row.message,
                    row.attempt,
                    row.control_id.as_deref().unwrap_or("-"),
                    row.status,
                    row.ack_preview
                )?;
            }
            writeln!(out)?;
        }

        writeln!(out, "Attempts: {}", self.metrics.attempts)?;
        writeln!(out, "Messages/sec: {:.2}", self.metrics.messages_per_sec)?;
        writeln!(out, "Average duration: {:.2} ms", self.metrics.avg_duration_ms)?;

        if let Some(error) = &self.error {
            writeln!(out, "Error: {error}")?;
        }
        Ok(())
    }
}

/// One line per run, then the running totals.
pub fn write_history<W: Write>(history: &MetricsHistory, out: &mut W) -> io::Result<()> {
    for (i, run) in history.runs().iter().enumerate() {
        let run = MetricsReport::from(run);
        writeln!(
            out,
            "run {}: {} attempts, {:.2} msg/s, avg {:.2} ms",
            i + 1,
            run.attempts,
            run.messages_per_sec,
            run.avg_duration_ms
        )?;
    }
    writeln!(
        out,
        "total: {} attempts, {:.2} msg/s",
        history.total_attempts(),
        history.overall_messages_per_sec()
    )
}
