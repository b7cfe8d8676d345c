use std::path::Path;

use crate::engine::ProjectionResult;
use crate::error::Result;
use crate::io::result_rows;

/// Write a projection result to a CSV file, one row per species (or layer
/// aggregate), utilization class and year.
pub fn write_snapshots_csv(result: &ProjectionResult, path: impl AsRef<Path>) -> Result<()> {
    let mut writer = csv::Writer::from_path(path.as_ref())?;
    for row in result_rows(result) {
        writer.serialize(row)?;
    }
    writer.flush()?;
    Ok(())
}
