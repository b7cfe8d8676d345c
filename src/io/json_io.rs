use std::path::Path;

use serde::Serialize;

use crate::engine::ProjectionResult;
use crate::error::Result;
use crate::io::{result_rows, PolygonSource, SnapshotRow};
use crate::models::Polygon;

/// Read and validate a single polygon from a JSON file.
pub fn read_polygon(path: impl AsRef<Path>) -> Result<Polygon> {
    let content = std::fs::read_to_string(path.as_ref())?;
    let polygon: Polygon = serde_json::from_str(&content)?;
    polygon.validate()?;
    Ok(polygon)
}

/// Read one or more polygons from a JSON file holding either a single
/// polygon document or an array of them.
pub fn read_polygons(path: impl AsRef<Path>) -> Result<Vec<Polygon>> {
    let content = std::fs::read_to_string(path.as_ref())?;
    let polygons: Vec<Polygon> = match serde_json::from_str::<Vec<Polygon>>(&content) {
        Ok(polygons) => polygons,
        Err(_) => vec![serde_json::from_str::<Polygon>(&content)?],
    };
    for polygon in &polygons {
        polygon.validate()?;
    }
    Ok(polygons)
}

/// A `PolygonSource` over the contents of a JSON file.
pub struct JsonPolygonSource {
    remaining: std::vec::IntoIter<Polygon>,
}

impl JsonPolygonSource {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        Ok(JsonPolygonSource {
            remaining: read_polygons(path)?.into_iter(),
        })
    }
}

impl PolygonSource for JsonPolygonSource {
    fn next_polygon(&mut self) -> Result<Option<Polygon>> {
        Ok(self.remaining.next())
    }
}

#[derive(Serialize)]
struct SnapshotDocument<'a> {
    polygon_id: &'a str,
    reference_year: i32,
    target_year: i32,
    rows: Vec<SnapshotRow>,
}

/// Write a projection result to a JSON file.
pub fn write_snapshots_json(
    result: &ProjectionResult,
    path: impl AsRef<Path>,
    pretty: bool,
) -> Result<()> {
    let document = SnapshotDocument {
        polygon_id: &result.polygon_id,
        reference_year: result.reference_year,
        target_year: result.target_year,
        rows: result_rows(result),
    };
    let content = if pretty {
        serde_json::to_string_pretty(&document)?
    } else {
        serde_json::to_string(&document)?
    };
    std::fs::write(path.as_ref(), content)?;
    Ok(())
}
