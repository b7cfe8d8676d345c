//! Polygon input and snapshot output.

mod csv_io;
mod json_io;

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::engine::{LayerSnapshot, ProjectionResult};
use crate::error::Result;
use crate::models::{Polygon, UtilizationClass};

pub use csv_io::write_snapshots_csv;
pub use json_io::{read_polygon, read_polygons, write_snapshots_json, JsonPolygonSource};

/// A stream of polygons to project.
pub trait PolygonSource {
    fn next_polygon(&mut self) -> Result<Option<Polygon>>;
}

/// Trait for writing projection snapshots to a file.
pub trait SnapshotWriter {
    fn write(&self, result: &ProjectionResult, path: &Path) -> Result<()>;
}

/// CSV snapshot writer.
pub struct CsvFormat;

impl SnapshotWriter for CsvFormat {
    fn write(&self, result: &ProjectionResult, path: &Path) -> Result<()> {
        write_snapshots_csv(result, path)
    }
}

/// JSON snapshot writer.
pub struct JsonFormat {
    pub pretty: bool,
}

impl Default for JsonFormat {
    fn default() -> Self {
        Self { pretty: false }
    }
}

impl SnapshotWriter for JsonFormat {
    fn write(&self, result: &ProjectionResult, path: &Path) -> Result<()> {
        write_snapshots_json(result, path, self.pretty)
    }
}

/// One output row: a species (or the layer aggregate) in one utilization
/// class in one projected year. Missing values serialize as empty fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotRow {
    pub polygon_id: String,
    pub year: i32,
    /// Species alias; `ALL` for the layer aggregate.
    pub species: String,
    pub utilization_class: String,
    pub basal_area: Option<f32>,
    pub trees_per_hectare: Option<f32>,
    pub quad_mean_diameter: Option<f32>,
    pub lorey_height: Option<f32>,
    pub whole_stem_volume: Option<f32>,
    pub close_utilization_volume: Option<f32>,
    pub volume_net_decay: Option<f32>,
    pub volume_net_decay_waste: Option<f32>,
    /// Layer dominant height, on aggregate `all` rows only.
    pub dominant_height: Option<f32>,
}

fn class_label(uc: UtilizationClass) -> &'static str {
    match uc {
        UtilizationClass::Small => "small",
        UtilizationClass::All => "all",
        UtilizationClass::U75To125 => "7.5-12.5",
        UtilizationClass::U125To175 => "12.5-17.5",
        UtilizationClass::U175To225 => "17.5-22.5",
        UtilizationClass::Over225 => "22.5+",
    }
}

fn finite(value: f32) -> Option<f32> {
    value.is_finite().then_some(value)
}

const ALL_CLASSES: [UtilizationClass; 6] = [
    UtilizationClass::Small,
    UtilizationClass::All,
    UtilizationClass::U75To125,
    UtilizationClass::U125To175,
    UtilizationClass::U175To225,
    UtilizationClass::Over225,
];

/// Flatten one snapshot into per-species, per-class rows. Slot 0 (the layer
/// aggregate) comes first.
pub fn snapshot_rows(polygon_id: &str, snapshot: &LayerSnapshot) -> Vec<SnapshotRow> {
    let bank = &snapshot.bank;
    let mut rows = Vec::new();

    for slot in 0..=bank.n_species() {
        let species = if slot == 0 {
            "ALL".to_string()
        } else {
            bank.species_names[slot].clone()
        };
        for uc in ALL_CLASSES {
            let lorey_height = match uc {
                UtilizationClass::Small => finite(bank.lorey_heights[slot][0]),
                UtilizationClass::All => finite(bank.lorey_heights[slot][1]),
                _ => None,
            };
            let dominant_height = (slot == 0 && uc == UtilizationClass::All)
                .then_some(snapshot.dominant_height)
                .and_then(finite);
            rows.push(SnapshotRow {
                polygon_id: polygon_id.to_string(),
                year: snapshot.year,
                species: species.clone(),
                utilization_class: class_label(uc).to_string(),
                basal_area: finite(bank.basal_areas[slot].get(uc)),
                trees_per_hectare: finite(bank.trees_per_hectare[slot].get(uc)),
                quad_mean_diameter: finite(bank.quad_mean_diameters[slot].get(uc)),
                lorey_height,
                whole_stem_volume: finite(bank.whole_stem_volumes[slot].get(uc)),
                close_utilization_volume: finite(bank.close_utilization_volumes[slot].get(uc)),
                volume_net_decay: finite(bank.cu_volumes_minus_decay[slot].get(uc)),
                volume_net_decay_waste: finite(
                    bank.cu_volumes_minus_decay_and_wastage[slot].get(uc),
                ),
                dominant_height,
            });
        }
    }
    rows
}

/// All rows for a full projection result, in year order.
pub fn result_rows(result: &ProjectionResult) -> Vec<SnapshotRow> {
    result
        .snapshots
        .iter()
        .flat_map(|snapshot| snapshot_rows(&result.polygon_id, snapshot))
        .collect()
}
