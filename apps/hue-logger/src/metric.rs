use chrono::{DateTime, SubsecRound, Utc};
use std::collections::BTreeMap;
use std::fmt::Write as _;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FieldValue {
    Integer(i64),
    Float(f64),
}

impl From<i64> for FieldValue {
    fn from(value: i64) -> Self {
        FieldValue::Integer(value)
    }
}

impl From<f64> for FieldValue {
    fn from(value: f64) -> Self {
        FieldValue::Float(value)
    }
}

/// One point of the light time series. Tags and fields are kept in key order
/// so the encoded line is stable across cycles.
#[derive(Debug, Clone, PartialEq)]
pub struct MetricRecord {
    pub measurement: String,
    pub tags: BTreeMap<String, String>,
    pub fields: BTreeMap<String, FieldValue>,
    pub timestamp: DateTime<Utc>,
}

impl MetricRecord {
    pub fn new(measurement: impl Into<String>, timestamp: DateTime<Utc>) -> Self {
        Self {
            measurement: measurement.into(),
            tags: BTreeMap::new(),
            fields: BTreeMap::new(),
            timestamp,
        }
    }

    pub fn tag(&mut self, key: &str, value: impl Into<String>) -> &mut Self {
        self.tags.insert(key.to_string(), value.into());
        self
    }

    pub fn field(&mut self, key: &str, value: impl Into<FieldValue>) -> &mut Self {
        self.fields.insert(key.to_string(), value.into());
        self
    }

    pub fn tag_value(&self, key: &str) -> Option<&str> {
        self.tags.get(key).map(String::as_str)
    }

    pub fn field_value(&self, key: &str) -> Option<FieldValue> {
        self.fields.get(key).copied()
    }

    /// Encodes the record as a single InfluxDB line-protocol line with a
    /// second-precision timestamp.
    pub fn to_line_protocol(&self) -> String {
        let mut line = escape_measurement(&self.measurement);
        for (key, value) in &self.tags {
            if value.is_empty() {
                tracing::warn!(
                    measurement = %self.measurement,
                    tag = %key,
                    "dropping tag with empty value"
                );
                continue;
            }
            let _ = write!(line, ",{}={}", escape_key(key), escape_key(value));
        }

        let mut separator = ' ';
        for (key, value) in &self.fields {
            line.push(separator);
            separator = ',';
            line.push_str(&escape_key(key));
            line.push('=');
            match value {
                FieldValue::Integer(v) => {
                    let _ = write!(line, "{v}i");
                }
                FieldValue::Float(v) => {
                    let _ = write!(line, "{v}");
                }
            }
        }

        let _ = write!(line, " {}", self.timestamp.timestamp());
        line
    }
}

/// Records of one sampling cycle. Every record carries the batch timestamp.
#[derive(Debug, Clone)]
pub struct Batch {
    timestamp: DateTime<Utc>,
    records: Vec<MetricRecord>,
}

impl Batch {
    pub fn new(timestamp: DateTime<Utc>) -> Self {
        Self {
            timestamp: timestamp.trunc_subsecs(0),
            records: Vec::new(),
        }
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    pub fn push(&mut self, mut record: MetricRecord) {
        record.timestamp = self.timestamp;
        self.records.push(record);
    }

    pub fn records(&self) -> &[MetricRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn to_line_protocol(&self) -> String {
        self.records
            .iter()
            .map(MetricRecord::to_line_protocol)
            .collect::<Vec<_>>()
            .join("\n")
    }
}

fn escape_measurement(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for ch in raw.chars() {
        if ch == ',' || ch == ' ' {
            out.push('\\');
        }
        out.push(ch);
    }
    out
}

/// Newlines end a line-protocol row, so they are written as escaped spaces.
/// A trailing backslash is doubled so it cannot escape the separator after it.
fn escape_key(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for ch in raw.chars() {
        let ch = if ch == '\n' || ch == '\r' { ' ' } else { ch };
        if ch == ',' || ch == '=' || ch == ' ' {
            out.push('\\');
        }
        out.push(ch);
    }
    if raw.ends_with('\\') {
        out.push('\\');
    }
    out
}
