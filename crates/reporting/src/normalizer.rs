//! Turns raw rows into [`EventRecord`]s, dropping and counting the rows that
//! cannot be read.

use chrono::{DateTime, NaiveDateTime, Utc};
use funnel_core::config::FieldMapping;
use funnel_core::error::{DropReason, DroppedRow, FunnelError, FunnelResult, MalformedRecordError};
use funnel_core::types::{EventRecord, RawRecord};
use serde_json::Value;
use tracing::warn;

/// Running tally of rows read and dropped by a [`Normalizer`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DropReport {
    pub read: u64,
    pub dropped: u64,
    pub samples: Vec<DroppedRow>,
    max_samples: usize,
}

impl DropReport {
    pub fn new(max_samples: usize) -> Self {
        Self {
            max_samples,
            ..Self::default()
        }
    }

    fn record(&mut self, index: u64, reason: DropReason) {
        self.dropped += 1;
        if self.samples.len() < self.max_samples {
            self.samples.push(DroppedRow { index, reason });
        }
    }

    pub fn accepted(&self) -> u64 {
        self.read - self.dropped
    }

    pub fn drop_ratio(&self) -> f64 {
        if self.read == 0 {
            0.0
        } else {
            self.dropped as f64 / self.read as f64
        }
    }

    /// The drops as an error value, or `None` if every row was kept.
    pub fn to_error(&self) -> Option<MalformedRecordError> {
        (self.dropped > 0).then(|| MalformedRecordError {
            dropped: self.dropped,
            samples: self.samples.clone(),
        })
    }

    /// Fail if more than `max_ratio` of the rows read were dropped.
    pub fn check(&self, max_ratio: f64) -> Result<(), MalformedRecordError> {
        match self.to_error() {
            Some(err) if self.drop_ratio() > max_ratio => Err(err),
            _ => Ok(()),
        }
    }
}

/// Lazy single-pass adapter from raw rows to normalized events.
///
/// Malformed rows are skipped and tallied in the [`DropReport`]. A fatal
/// source error (see [`FunnelError::is_fatal`]) ends iteration and is
/// returned from [`Normalizer::finish`].
pub struct Normalizer<I> {
    rows: I,
    fields: FieldMapping,
    report: DropReport,
    fatal: Option<FunnelError>,
}

impl<I> Normalizer<I>
where
    I: Iterator<Item = FunnelResult<RawRecord>>,
{
    pub fn new(rows: I, fields: FieldMapping, max_samples: usize) -> Self {
        Self {
            rows,
            fields,
            report: DropReport::new(max_samples),
            fatal: None,
        }
    }

    pub fn report(&self) -> &DropReport {
        &self.report
    }

    pub fn finish(self) -> FunnelResult<DropReport> {
        match self.fatal {
            Some(err) => Err(err),
            None => Ok(self.report),
        }
    }
}

impl<I> Iterator for Normalizer<I>
where
    I: Iterator<Item = FunnelResult<RawRecord>>,
{
    type Item = EventRecord;

    fn next(&mut self) -> Option<EventRecord> {
        if self.fatal.is_some() {
            return None;
        }

        loop {
            let row = self.rows.next()?;
            let index = self.report.read;

            let outcome = match row {
                Ok(row) => normalize_row(&row, &self.fields, index),
                Err(err) if err.is_fatal() => {
                    self.fatal = Some(err);
                    return None;
                }
                Err(err) => Err(DropReason::Unreadable(err.to_string())),
            };

            self.report.read += 1;
            match outcome {
                Ok(record) => return Some(record),
                Err(reason) => {
                    warn!(row = index, reason = %reason, "Dropping malformed record");
                    self.report.record(index, reason);
                }
            }
        }
    }
}

/// Normalize a single raw row. `seq` becomes the record's tie-break key.
pub fn normalize_row(
    row: &RawRecord,
    fields: &FieldMapping,
    seq: u64,
) -> Result<EventRecord, DropReason> {
    let user_id = required_text(row, &fields.user_id)?;
    let event_type = required_text(row, &fields.event_type)?;
    let timestamp = match row.get(&fields.timestamp) {
        None | Some(Value::Null) => {
            return Err(DropReason::MissingField(fields.timestamp.clone()))
        }
        Some(value) => parse_timestamp(value).map_err(|detail| DropReason::InvalidField {
            field: fields.timestamp.clone(),
            detail,
        })?,
    };
    let group = optional_text(row, &fields.group)?;

    Ok(EventRecord {
        user_id,
        event_type,
        timestamp,
        group,
        seq,
    })
}

fn required_text(row: &RawRecord, field: &str) -> Result<String, DropReason> {
    optional_text(row, field)?.ok_or_else(|| DropReason::MissingField(field.to_string()))
}

/// Scalar field as trimmed text. Absent, null and blank all read as `None`.
fn optional_text(row: &RawRecord, field: &str) -> Result<Option<String>, DropReason> {
    let text = match row.get(field) {
        None | Some(Value::Null) => return Ok(None),
        Some(Value::String(s)) => s.trim().to_string(),
        Some(Value::Number(n)) => n.to_string(),
        Some(Value::Bool(b)) => b.to_string(),
        Some(_) => {
            return Err(DropReason::InvalidField {
                field: field.to_string(),
                detail: "expected a scalar value".into(),
            })
        }
    };
    Ok((!text.is_empty()).then_some(text))
}

/// Accepts RFC 3339, `YYYY-MM-DD HH:MM:SS[.fff]` (UTC, optional ` UTC`
/// suffix), or integer epoch microseconds as a number or numeric string.
pub fn parse_timestamp(value: &Value) -> Result<DateTime<Utc>, String> {
    match value {
        Value::Number(n) => match n.as_i64() {
            Some(micros) => from_micros(micros),
            None => Err(format!("`{n}` is not an integer epoch value")),
        },
        Value::String(s) => parse_timestamp_str(s.trim()),
        _ => Err("expected a string or integer timestamp".into()),
    }
}

fn parse_timestamp_str(s: &str) -> Result<DateTime<Utc>, String> {
    if s.is_empty() {
        return Err("timestamp is blank".into());
    }
    if let Ok(micros) = s.parse::<i64>() {
        return from_micros(micros);
    }
    if let Ok(ts) = DateTime::parse_from_rfc3339(s) {
        return Ok(ts.with_timezone(&Utc));
    }

    let naive = s.strip_suffix(" UTC").unwrap_or(s);
    ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(naive, fmt).ok())
        .map(|ts| ts.and_utc())
        .ok_or_else(|| format!("unrecognized timestamp `{s}`"))
}

fn from_micros(micros: i64) -> Result<DateTime<Utc>, String> {
    DateTime::from_timestamp_micros(micros)
        .ok_or_else(|| format!("epoch value {micros} is out of range"))
}
