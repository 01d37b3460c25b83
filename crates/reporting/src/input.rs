//! Raw row sources: CSV with a header row, and JSON lines.
//!
//! Rows are yielded lazily. I/O failures come through as fatal errors;
//! rows that cannot be parsed come through as non-fatal ones and end up in
//! the normalizer's drop report.

use std::fs::File;
use std::io::{self, BufRead, BufReader, Read};
use std::path::Path;

use funnel_core::config::InputFormat;
use funnel_core::error::{FunnelError, FunnelResult};
use funnel_core::types::RawRecord;
use serde_json::Value;

pub type RowIter = Box<dyn Iterator<Item = FunnelResult<RawRecord>>>;

/// Rows of a CSV document, keyed by the header row. Every value is a string.
pub fn csv_rows<R: Read>(reader: R) -> FunnelResult<impl Iterator<Item = FunnelResult<RawRecord>>> {
    let mut reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_reader(reader);
    let headers = reader.headers()?.clone();

    Ok(reader.into_records().map(move |record| -> FunnelResult<RawRecord> {
        let record = record?;
        Ok(headers
            .iter()
            .zip(record.iter())
            .map(|(name, value)| (name.to_string(), Value::String(value.to_string())))
            .collect())
    }))
}

/// One JSON object per line. Blank lines are skipped.
pub fn jsonl_rows<R: BufRead>(reader: R) -> impl Iterator<Item = FunnelResult<RawRecord>> {
    reader
        .lines()
        .enumerate()
        .filter_map(|(i, line)| match line {
            // The bad line is already consumed, so the rows after it still read.
            Err(e) if e.kind() == io::ErrorKind::InvalidData => Some(Err(FunnelError::Input(
                format!("line {} is not valid UTF-8", i + 1),
            ))),
            Err(e) => Some(Err(FunnelError::Io(e))),
            Ok(line) if line.trim().is_empty() => None,
            Ok(line) => Some(match serde_json::from_str::<Value>(&line) {
                Ok(Value::Object(map)) => Ok(map),
                Ok(_) => Err(FunnelError::Input(format!(
                    "line {} is not a JSON object",
                    i + 1
                ))),
                Err(e) => Err(FunnelError::Serialization(e)),
            }),
        })
}

pub fn open(path: &Path, format: InputFormat) -> FunnelResult<RowIter> {
    let file = BufReader::new(File::open(path)?);
    Ok(match format {
        InputFormat::Csv => Box::new(csv_rows(file)?),
        InputFormat::Jsonl => Box::new(jsonl_rows(file)),
    })
}
