use serde::{Deserialize, Serialize};

use crate::models::species::{SpeciesRecord, UtilizationRecord};
use crate::models::utilization::UtilizationClass;

/// Layer kind within a polygon. Only the primary layer is grown; a veteran
/// layer contributes overstory basal area to the yield models.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LayerType {
    Primary,
    Veteran,
}

/// One layer of a polygon: its species records plus an optional layer-level
/// default utilization set used to seed the aggregate slot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Layer {
    pub layer_type: LayerType,
    pub species: Vec<SpeciesRecord>,
    #[serde(default)]
    pub default_utilization: Option<Vec<UtilizationRecord>>,
}

impl Layer {
    /// Total basal area over all species, `All` class.
    pub fn basal_area_all(&self) -> f32 {
        self.species.iter().map(|s| s.basal_area_all()).sum()
    }

    pub fn default_utilization_record(&self, class: UtilizationClass) -> Option<&UtilizationRecord> {
        self.default_utilization
            .as_ref()
            .and_then(|records| records.iter().find(|u| u.class == class))
    }
}
