use serde::{Deserialize, Serialize};

use crate::error::{ProjectionError, Result};
use crate::models::utilization::UtilizationClass;

/// Recognized genus aliases, in genus-index order (index = position + 1).
pub const GENERA: [&str; 16] = [
    "AC", "AT", "B", "C", "D", "E", "F", "H", "L", "MB", "PA", "PL", "PW", "PY", "S", "Y",
];

/// Genus index (1-based) for an alias. Unknown aliases are fatal.
pub fn genus_index(alias: &str) -> Result<usize> {
    GENERA
        .iter()
        .position(|g| g.eq_ignore_ascii_case(alias))
        .map(|p| p + 1)
        .ok_or_else(|| ProjectionError::UnknownSpecies(alias.to_string()))
}

/// One utilization-class row of a species record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UtilizationRecord {
    pub class: UtilizationClass,
    #[serde(default)]
    pub basal_area: f32,
    #[serde(default)]
    pub trees_per_hectare: f32,
    #[serde(default)]
    pub quad_mean_diameter: f32,
    #[serde(default)]
    pub lorey_height: Option<f32>,
    #[serde(default)]
    pub whole_stem_volume: f32,
    #[serde(default)]
    pub close_utilization_volume: f32,
    #[serde(default)]
    pub volume_net_decay: f32,
    #[serde(default)]
    pub volume_net_decay_waste: f32,
}

/// One species (genus) of a layer, as read from input.
///
/// Optional site fields left out of the input are derived by the engine's
/// missing-value estimation steps.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpeciesRecord {
    /// Genus alias, e.g. "F" (Douglas fir) or "PL" (lodgepole pine).
    pub genus: String,

    /// Alias of the leading sub-species used for site-curve resolution when
    /// it differs from the genus.
    #[serde(default)]
    pub site_species: Option<String>,

    /// Percent of the layer's forested land occupied by this species.
    pub percent_forested: f32,

    #[serde(default)]
    pub site_index: Option<f32>,
    #[serde(default)]
    pub dominant_height: Option<f32>,
    #[serde(default)]
    pub total_age: Option<f32>,
    #[serde(default)]
    pub years_to_breast_height: Option<f32>,
    #[serde(default)]
    pub years_at_breast_height: Option<f32>,
    #[serde(default)]
    pub site_curve_number: Option<u16>,

    /// Per-utilization-class metrics. Classes not listed are zero.
    #[serde(default)]
    pub utilizations: Vec<UtilizationRecord>,
}

impl SpeciesRecord {
    pub fn genus_index(&self) -> Result<usize> {
        genus_index(&self.genus)
    }

    pub fn utilization(&self, class: UtilizationClass) -> Option<&UtilizationRecord> {
        self.utilizations.iter().find(|u| u.class == class)
    }

    /// Basal area of the `All` class; zero when absent.
    pub fn basal_area_all(&self) -> f32 {
        self.utilization(UtilizationClass::All)
            .map(|u| u.basal_area)
            .unwrap_or(0.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_genus_index_order() {
        assert_eq!(genus_index("AC").unwrap(), 1);
        assert_eq!(genus_index("F").unwrap(), 7);
        assert_eq!(genus_index("Y").unwrap(), 16);
    }

    #[test]
    fn test_genus_index_unknown_is_fatal() {
        assert!(matches!(
            genus_index("QQ"),
            Err(ProjectionError::UnknownSpecies(_))
        ));
    }

    #[test]
    fn test_species_record_deserializes_with_defaults() {
        let json = r#"{ "genus": "F", "percent_forested": 60.0 }"#;
        let record: SpeciesRecord = serde_json::from_str(json).unwrap();
        assert_eq!(record.genus, "F");
        assert!(record.site_index.is_none());
        assert!(record.utilizations.is_empty());
        assert_eq!(record.basal_area_all(), 0.0);
    }
}
