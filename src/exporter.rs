//! CSV and JSON export of request metrics.
//!
//! One run uses one duration representation ([`DurationUnit`]) for every
//! duration column and field. Timestamps are RFC 3339 in UTC with millisecond
//! precision. Absent optional values are empty CSV cells.

use std::io::{self, Write};

use chrono::{DateTime, SecondsFormat, Utc};
use serde::Serialize;
use std::time::Duration;

use crate::errors::ExportError;
use crate::metrics::RequestMetric;

/// How durations are written for a whole run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum DurationUnit {
    /// Integer milliseconds
    #[default]
    #[value(name = "ms")]
    Millis,

    /// Integer nanoseconds
    #[value(name = "ns")]
    Nanos,

    /// Human readable, e.g. `12.5ms` or `1.2s`
    #[value(name = "human")]
    Human,
}

impl DurationUnit {
    fn column(&self, name: &str) -> String {
        match self {
            DurationUnit::Millis => format!("{} (ms)", name),
            DurationUnit::Nanos => format!("{} (ns)", name),
            DurationUnit::Human => name.to_string(),
        }
    }

    fn value(&self, duration: Duration) -> DurationValue {
        match self {
            DurationUnit::Millis => {
                DurationValue::Integer(u64::try_from(duration.as_millis()).unwrap_or(u64::MAX))
            }
            DurationUnit::Nanos => {
                DurationValue::Integer(u64::try_from(duration.as_nanos()).unwrap_or(u64::MAX))
            }
            DurationUnit::Human => DurationValue::Text(format!("{:?}", duration)),
        }
    }

    pub fn render(&self, duration: Duration) -> String {
        match self.value(duration) {
            DurationValue::Integer(value) => value.to_string(),
            DurationValue::Text(text) => text,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
enum DurationValue {
    Integer(u64),
    Text(String),
}

/// Run-wide export choices.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExportSettings {
    pub unit: DurationUnit,
    /// Whether the phase duration columns are part of this run's output.
    pub include_phases: bool,
}

pub fn format_timestamp(timestamp: &DateTime<Utc>) -> String {
    timestamp.to_rfc3339_opts(SecondsFormat::Millis, true)
}

pub fn csv_header(settings: &ExportSettings) -> Vec<String> {
    let mut header = vec![
        "ID".to_string(),
        "Start Time".to_string(),
        settings.unit.column("Duration"),
    ];
    if settings.include_phases {
        header.push(settings.unit.column("DNS Duration"));
        header.push(settings.unit.column("Dial Duration"));
        header.push(settings.unit.column("Conn Acquire Duration"));
    }
    header.push("Status Line".to_string());
    header.push("Status Code".to_string());
    header.push("Error".to_string());
    header
}

pub fn csv_row(metric: &RequestMetric, settings: &ExportSettings) -> Vec<String> {
    let optional = |d: Option<Duration>| d.map(|d| settings.unit.render(d)).unwrap_or_default();

    let mut row = vec![
        metric.id.clone(),
        format_timestamp(&metric.start_time),
        settings.unit.render(metric.duration),
    ];
    if settings.include_phases {
        row.push(optional(metric.dns_duration));
        row.push(optional(metric.dial_duration));
        row.push(optional(metric.conn_acquire_duration));
    }
    row.push(metric.status_line.clone().unwrap_or_default());
    row.push(
        metric
            .status_code
            .map(|code| code.to_string())
            .unwrap_or_default(),
    );
    row.push(metric.error.clone().unwrap_or_default());
    row
}

/// Assembles the complete CSV document (buffered discipline).
pub fn to_csv(metrics: &[RequestMetric], settings: &ExportSettings) -> Result<String, ExportError> {
    let mut writer = csv::Writer::from_writer(Vec::new());
    writer.write_record(csv_header(settings))?;
    for metric in metrics {
        writer.write_record(csv_row(metric, settings))?;
    }
    writer.flush()?;

    let bytes = writer
        .into_inner()
        .map_err(|e| ExportError::Io(io::Error::new(e.error().kind(), e.error().to_string())))?;
    String::from_utf8(bytes).map_err(|e| ExportError::Io(io::Error::new(io::ErrorKind::InvalidData, e)))
}

#[derive(Debug, Serialize)]
struct JsonRecord<'a> {
    id: &'a str,
    start_time: String,
    duration: DurationValue,
    #[serde(skip_serializing_if = "Option::is_none")]
    dns_duration: Option<Option<DurationValue>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    dial_duration: Option<Option<DurationValue>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    conn_acquire_duration: Option<Option<DurationValue>>,
    status_line: Option<&'a str>,
    status_code: Option<u16>,
    error: Option<&'a str>,
}

impl<'a> JsonRecord<'a> {
    fn new(metric: &'a RequestMetric, settings: &ExportSettings) -> Self {
        let phase = |d: Option<Duration>| {
            settings
                .include_phases
                .then(|| d.map(|d| settings.unit.value(d)))
        };
        Self {
            id: &metric.id,
            start_time: format_timestamp(&metric.start_time),
            duration: settings.unit.value(metric.duration),
            dns_duration: phase(metric.dns_duration),
            dial_duration: phase(metric.dial_duration),
            conn_acquire_duration: phase(metric.conn_acquire_duration),
            status_line: metric.status_line.as_deref(),
            status_code: metric.status_code,
            error: metric.error.as_deref(),
        }
    }
}

/// Serializes the whole collection as one JSON array (buffered discipline only).
pub fn to_json(metrics: &[RequestMetric], settings: &ExportSettings) -> Result<String, ExportError> {
    let records: Vec<JsonRecord<'_>> = metrics
        .iter()
        .map(|metric| JsonRecord::new(metric, settings))
        .collect();
    let mut json = serde_json::to_string_pretty(&records)?;
    json.push('\n');
    Ok(json)
}

/// Receives metrics one at a time as the streaming consumer pops them.
pub trait MetricSink: Send {
    fn write_metric(&mut self, metric: &RequestMetric) -> Result<(), ExportError>;

    /// Called once after the last metric.
    fn finish(&mut self) -> Result<(), ExportError>;
}

/// Writes CSV rows as they arrive and flushes after each one.
pub struct CsvStreamWriter<W: Write> {
    writer: csv::Writer<W>,
    settings: ExportSettings,
    header_written: bool,
}

impl<W: Write> CsvStreamWriter<W> {
    pub fn new(inner: W, settings: ExportSettings) -> Self {
        Self {
            writer: csv::Writer::from_writer(inner),
            settings,
            header_written: false,
        }
    }

    fn ensure_header(&mut self) -> Result<(), ExportError> {
        if !self.header_written {
            self.writer.write_record(csv_header(&self.settings))?;
            self.header_written = true;
        }
        Ok(())
    }

    pub fn into_inner(self) -> Result<W, ExportError> {
        self.writer
            .into_inner()
            .map_err(|e| ExportError::Io(io::Error::new(e.error().kind(), e.error().to_string())))
    }
}

impl<W: Write + Send> MetricSink for CsvStreamWriter<W> {
    fn write_metric(&mut self, metric: &RequestMetric) -> Result<(), ExportError> {
        self.ensure_header()?;
        self.writer.write_record(csv_row(metric, &self.settings))?;
        self.writer.flush()?;
        Ok(())
    }

    fn finish(&mut self) -> Result<(), ExportError> {
        // An empty run still gets its header row.
        self.ensure_header()?;
        self.writer.flush()?;
        Ok(())
    }
}
