use serde::{Deserialize, Serialize};

use crate::error::{ProjectionError, Result};
use crate::models::bec::{bec_zone, BecZone};
use crate::models::layer::{Layer, LayerType};

/// The earliest inventory year the engine accepts.
pub const MINIMUM_INVENTORY_YEAR: i32 = 1900;

/// A forest inventory polygon: the spatial unit a projection runs over.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Polygon {
    pub id: String,

    /// Year the inventory measurements were taken; projection starts here.
    pub reference_year: i32,

    /// BEC zone alias, e.g. "CWH" or "IDF".
    pub bec_zone: String,

    /// Percent of the polygon that is forested land.
    #[serde(default = "default_percent_forest_land")]
    pub percent_forest_land: f32,

    /// Last year to project to; the CLI can override this.
    #[serde(default)]
    pub target_year: Option<i32>,

    pub layers: Vec<Layer>,
}

fn default_percent_forest_land() -> f32 {
    100.0
}

impl Polygon {
    pub fn primary_layer(&self) -> Result<&Layer> {
        self.layers
            .iter()
            .find(|l| l.layer_type == LayerType::Primary)
            .ok_or_else(|| {
                ProjectionError::Validation(format!("Polygon {} has no primary layer", self.id))
            })
    }

    pub fn veteran_layer(&self) -> Option<&Layer> {
        self.layers.iter().find(|l| l.layer_type == LayerType::Veteran)
    }

    pub fn bec(&self) -> Result<&'static BecZone> {
        bec_zone(&self.bec_zone)
    }

    /// Structural validation run before any processing.
    pub fn validate(&self) -> Result<()> {
        if self.reference_year < MINIMUM_INVENTORY_YEAR {
            return Err(ProjectionError::Validation(format!(
                "Polygon {}: inventory year {} is before {}",
                self.id, self.reference_year, MINIMUM_INVENTORY_YEAR
            )));
        }
        self.bec()?;
        let primary = self.primary_layer()?;
        if primary.species.is_empty() {
            return Err(ProjectionError::Validation(format!(
                "Polygon {}: primary layer has no species",
                self.id
            )));
        }
        if let Some(target) = self.target_year {
            if target < self.reference_year {
                return Err(ProjectionError::Validation(format!(
                    "Polygon {}: target year {} precedes inventory year {}",
                    self.id, target, self.reference_year
                )));
            }
        }
        for species in &primary.species {
            species.genus_index()?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn minimal_polygon(year: i32) -> Polygon {
        let json = format!(
            r#"{{
                "id": "093C090-1",
                "reference_year": {year},
                "bec_zone": "IDF",
                "layers": [
                    {{
                        "layer_type": "primary",
                        "species": [ {{ "genus": "PL", "percent_forested": 100.0 }} ]
                    }}
                ]
            }}"#
        );
        serde_json::from_str(&json).unwrap()
    }

    #[test]
    fn test_validate_accepts_minimal_polygon() {
        assert!(minimal_polygon(1985).validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_pre_1900_year() {
        let err = minimal_polygon(1899).validate().unwrap_err();
        assert!(err.to_string().contains("before 1900"));
    }

    #[test]
    fn test_validate_rejects_unknown_genus() {
        let mut polygon = minimal_polygon(1985);
        polygon.layers[0].species[0].genus = "ZZ".into();
        assert!(matches!(
            polygon.validate(),
            Err(ProjectionError::UnknownSpecies(_))
        ));
    }

    #[test]
    fn test_percent_forest_land_defaults_to_full() {
        assert_eq!(minimal_polygon(1985).percent_forest_land, 100.0);
    }
}
