//! Just enough HL7v2 to drive a test sender: positional segment access,
//! splitting pasted text into messages, reading ACK codes and stamping
//! fresh control ids. This is not a validating parser; malformed input is
//! passed through rather than rejected.

use std::fmt;

use serde::Serialize;
use tracing::warn;
use uuid::Uuid;

pub const SEGMENT_SEPARATOR: char = '\r';
pub const HEADER_SEGMENT: &str = "MSH";
pub const ACK_SEGMENT: &str = "MSA";
pub const DEFAULT_FIELD_SEPARATOR: char = '|';
pub const DEFAULT_ENCODING_CHARACTERS: &str = "^~\\&";

/// MSH-10 once the segment name is counted as field 0.
pub const CONTROL_ID_FIELD: usize = 9;
/// MSH-10 is limited to 20 characters in v2.3.
const CONTROL_ID_LEN: usize = 20;

/// One segment split into its fields. Field 0 is the segment name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Segment<'a> {
    separator: char,
    fields: Vec<&'a str>,
}

impl<'a> Segment<'a> {
    pub fn parse(line: &'a str, separator: char) -> Self {
        Self {
            separator,
            fields: line.split(separator).collect(),
        }
    }

    pub fn name(&self) -> &'a str {
        self.fields.first().copied().unwrap_or_default()
    }

    pub fn separator(&self) -> char {
        self.separator
    }

    pub fn field(&self, index: usize) -> Option<&'a str> {
        self.fields.get(index).copied()
    }

    /// Like [`Segment::field`], but missing and empty fields both yield `default`.
    pub fn field_or(&self, index: usize, default: &'a str) -> &'a str {
        match self.field(index) {
            Some(value) if !value.is_empty() => value,
            _ => default,
        }
    }

    /// Sets a field, padding with empty fields when the segment is short.
    pub fn set_field(&mut self, index: usize, value: &'a str) {
        if self.fields.len() <= index {
            self.fields.resize(index + 1, "");
        }
        self.fields[index] = value;
    }
}

impl fmt::Display for Segment<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let separator = self.separator.to_string();
        f.write_str(&self.fields.join(separator.as_str()))
    }
}

/// Finds the first `MSH` segment long enough to carry a field separator,
/// returning its position among the message's segments.
pub fn find_header(message: &str) -> Option<(usize, Segment<'_>)> {
    message
        .split(SEGMENT_SEPARATOR)
        .enumerate()
        .find_map(|(index, line)| {
            let separator = line.strip_prefix(HEADER_SEGMENT)?.chars().next()?;
            Some((index, Segment::parse(line, separator)))
        })
}

/// Splits pasted or uploaded text into individual messages. Every line
/// starting with `MSH` opens a new message; text without any header line is
/// returned whole.
pub fn split_messages(raw: &str) -> Vec<String> {
    let lines: Vec<&str> = raw
        .split(|c: char| c == '\r' || c == '\n')
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .collect();

    if lines.is_empty() {
        return Vec::new();
    }
    if !lines.iter().any(|line| line.starts_with(HEADER_SEGMENT)) {
        return vec![raw.trim().to_string()];
    }

    let mut messages = Vec::new();
    let mut current: Vec<&str> = Vec::new();
    let mut orphaned = 0;
    for line in lines {
        if line.starts_with(HEADER_SEGMENT) {
            if !current.is_empty() {
                messages.push(current.join("\r"));
                current.clear();
            }
            current.push(line);
        } else if current.is_empty() {
            orphaned += 1;
        } else {
            current.push(line);
        }
    }
    if !current.is_empty() {
        messages.push(current.join("\r"));
    }

    if orphaned > 0 {
        warn!(lines = orphaned, "dropped lines preceding the first MSH segment");
    }
    messages
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum AckStatus {
    #[serde(rename = "AA")]
    Accept,
    #[serde(rename = "AE")]
    Error,
    #[serde(rename = "AR")]
    Reject,
    #[serde(rename = "UNKNOWN")]
    Unknown,
}

impl AckStatus {
    pub fn from_code(code: &str) -> Self {
        match code {
            "AA" => Self::Accept,
            "AE" => Self::Error,
            "AR" => Self::Reject,
            _ => Self::Unknown,
        }
    }

    pub fn code(self) -> &'static str {
        match self {
            Self::Accept => "AA",
            Self::Error => "AE",
            Self::Reject => "AR",
            Self::Unknown => "UNKNOWN",
        }
    }

    pub fn is_accept(self) -> bool {
        self == Self::Accept
    }
}

impl fmt::Display for AckStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

/// Raw MSA-1 value of the first `MSA` segment, if there is one.
pub fn ack_code(ack: &str) -> Option<&str> {
    ack.trim()
        .split(SEGMENT_SEPARATOR)
        .find(|segment| segment.starts_with(ACK_SEGMENT))
        .and_then(|segment| Segment::parse(segment, DEFAULT_FIELD_SEPARATOR).field(1))
}

pub fn parse_status(ack: &str) -> AckStatus {
    ack_code(ack).map_or(AckStatus::Unknown, AckStatus::from_code)
}

/// Replaces MSH-10. Messages without a usable header come back unchanged.
pub fn rewrite_control_id(message: &str, new_id: &str) -> String {
    let Some((index, mut header)) = find_header(message) else {
        return message.to_string();
    };
    header.set_field(CONTROL_ID_FIELD, new_id);
    let header = header.to_string();

    message
        .split(SEGMENT_SEPARATOR)
        .enumerate()
        .map(|(i, segment)| if i == index { header.as_str() } else { segment })
        .collect::<Vec<_>>()
        .join("\r")
}

/// Random 20 hex character identifier, suitable for MSH-10.
pub fn generate_control_id() -> String {
    let mut id = Uuid::new_v4().simple().to_string();
    id.truncate(CONTROL_ID_LEN);
    id
}
