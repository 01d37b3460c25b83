//! Tabular export of funnel results as CSV or JSON text.

use funnel_core::error::{FunnelError, FunnelResult};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExportFormat {
    #[default]
    Csv,
    Json,
}

/// Render rows in `format`. Undefined rates become an empty CSV cell or a
/// JSON `null`. No rows renders as an empty document (`""` or `[]`).
pub fn render<T: Serialize>(rows: &[T], format: ExportFormat) -> FunnelResult<String> {
    match format {
        ExportFormat::Csv => to_csv(rows),
        ExportFormat::Json => to_json(rows),
    }
}

pub fn to_csv<T: Serialize>(rows: &[T]) -> FunnelResult<String> {
    let mut writer = csv::Writer::from_writer(Vec::new());
    for row in rows {
        writer.serialize(row)?;
    }
    let bytes = writer
        .into_inner()
        .map_err(|e| FunnelError::Io(e.into_error()))?;
    String::from_utf8(bytes).map_err(|e| FunnelError::Internal(e.into()))
}

pub fn to_json<T: Serialize>(rows: &[T]) -> FunnelResult<String> {
    Ok(serde_json::to_string_pretty(rows)?)
}
