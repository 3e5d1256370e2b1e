use crate::utils::error::{EtlError, Result};
use serde::Serialize;

/// Serializes rows with a header line taken from the first row's field names.
pub fn to_csv<T: Serialize>(rows: &[T]) -> Result<String> {
    let mut writer = csv::Writer::from_writer(Vec::new());
    for row in rows {
        writer.serialize(row)?;
    }
    let bytes = writer
        .into_inner()
        .map_err(|e| EtlError::processing(format!("CSV flush failed: {}", e)))?;
    String::from_utf8(bytes).map_err(|e| EtlError::processing(e.to_string()))
}
