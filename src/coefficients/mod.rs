//! Coefficient tables driving the estimators and the growth models.
//!
//! Tables are keyed the way the estimators look them up: by species alias,
//! BEC alias, region, diameter band, or equation-group number. Lookups that
//! have a documented fallback take it here; everything else surfaces a
//! `MissingCoefficients` error naming the table and key.

mod defaults;
mod fiat;
mod limits;
mod site_curve;

pub use defaults::with_defaults;
pub use fiat::GrowthFiatDetails;
pub use limits::ComponentSizeLimits;
pub use site_curve::SiteCurve;

use std::collections::HashMap;

use crate::error::{ProjectionError, Result};
use crate::models::Region;

/// Basal-area stratum per genus index, used to key the species growth
/// models. Index 0 is unused.
const BASAL_AREA_GROUPS: [usize; 17] = [0, 1, 2, 3, 4, 1, 2, 5, 6, 7, 1, 9, 8, 9, 9, 10, 4];

/// Genus indices whose stratum shifts by 20 in the interior.
const INTERIOR_SHIFTED_GROUPS: [usize; 5] = [3, 4, 5, 6, 10];

/// Stratum number for a genus in a region.
pub fn basal_area_group(genus_index: usize, region: Region) -> usize {
    let base = BASAL_AREA_GROUPS[genus_index];
    if region == Region::Interior && INTERIOR_SHIFTED_GROUPS.contains(&genus_index) {
        base + 20
    } else {
        base
    }
}

/// A growth model choice plus its three coefficients.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ModelCoefficients {
    pub model: u8,
    pub coefficients: [f32; 3],
}

/// Lorey-height relation for a non-primary species: which of the two
/// equation forms to use, and its two coefficients.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NonprimaryHeightCoefficients {
    pub equation_index: u8,
    pub coefficients: [f32; 2],
}

impl NonprimaryHeightCoefficients {
    pub const DEFAULT: NonprimaryHeightCoefficients = NonprimaryHeightCoefficients {
        equation_index: 1,
        coefficients: [1.0, 1.0],
    };
}

/// Multipliers applied to compatibility variables after each growth period.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CompVarAdjustments {
    pub volume: f32,
    pub basal_area: f32,
    pub quad_mean_diameter: f32,
    pub small: f32,
    pub lorey_height_primary: f32,
    pub lorey_height_other: f32,
}

impl Default for CompVarAdjustments {
    fn default() -> Self {
        CompVarAdjustments {
            volume: 1.0,
            basal_area: 1.0,
            quad_mean_diameter: 1.0,
            small: 1.0,
            lorey_height_primary: 1.0,
            lorey_height_other: 1.0,
        }
    }
}

type SpeciesKey = String;
type BecSpeciesKey = (String, String);
type SpeciesRegionKey = (String, Region);
type SpeciesStratumKey = (String, usize);
type BandGroupKey = (usize, u16);

/// Every coefficient table the projection needs, fully resolved at load.
#[derive(Debug, Clone, Default)]
pub struct CoefficientStore {
    // Yield curves (layer level).
    pub basal_area_yield: HashMap<BecSpeciesKey, [f32; 7]>,
    pub quad_mean_diameter_yield: HashMap<BecSpeciesKey, [f32; 5]>,
    pub basal_area_growth_fiat: HashMap<Region, GrowthFiatDetails>,
    pub quad_mean_diameter_growth_fiat: HashMap<Region, GrowthFiatDetails>,
    pub basal_area_growth_empirical: HashMap<BecSpeciesKey, [f32; 8]>,
    pub quad_mean_diameter_growth_empirical: HashMap<usize, [f32; 7]>,
    pub quad_mean_diameter_growth_limits: HashMap<usize, [f32; 8]>,
    pub upper_bounds_by_group: HashMap<usize, (f32, f32)>,
    pub upper_bounds_by_species: HashMap<SpeciesRegionKey, (f32, f32)>,

    // Species-level growth models.
    pub primary_basal_area_growth: HashMap<usize, ModelCoefficients>,
    pub non_primary_basal_area_growth: HashMap<SpeciesStratumKey, [f32; 3]>,
    pub primary_quad_mean_diameter_growth: HashMap<usize, [f32; 3]>,
    pub non_primary_quad_mean_diameter_growth: HashMap<SpeciesStratumKey, [f32; 3]>,

    // Heights and diameters.
    pub primary_lorey_height: HashMap<SpeciesRegionKey, [f32; 3]>,
    pub non_primary_lorey_height: HashMap<(String, String, Region), NonprimaryHeightCoefficients>,
    pub species_quad_mean_diameter: HashMap<SpeciesKey, [f32; 3]>,
    pub component_size_limits: HashMap<SpeciesRegionKey, ComponentSizeLimits>,

    // Utilization splits.
    pub utilization_basal_area: HashMap<(usize, String, String), [f32; 2]>,
    pub utilization_quad_mean_diameter: HashMap<(usize, String), [f32; 4]>,

    // Volumes.
    pub whole_stem_volume: HashMap<u16, [f32; 9]>,
    pub whole_stem_utilization: HashMap<BandGroupKey, [f32; 4]>,
    pub close_utilization: HashMap<BandGroupKey, [f32; 3]>,
    pub net_decay: HashMap<BandGroupKey, [f32; 3]>,
    pub decay_modifiers: HashMap<SpeciesRegionKey, f32>,
    pub waste_modifiers: HashMap<SpeciesRegionKey, f32>,
    pub net_decay_waste: HashMap<SpeciesKey, [f32; 6]>,

    // Small component.
    pub small_probability: HashMap<SpeciesKey, [f32; 4]>,
    pub small_basal_area: HashMap<SpeciesKey, [f32; 4]>,
    pub small_quad_mean_diameter: HashMap<SpeciesKey, [f32; 2]>,
    pub small_lorey_height: HashMap<SpeciesKey, [f32; 2]>,
    pub small_whole_stem_volume: HashMap<SpeciesKey, [f32; 4]>,

    // Equation-group assignments.
    pub volume_equation_groups: HashMap<SpeciesKey, u16>,
    pub decay_equation_groups: HashMap<SpeciesKey, u16>,

    // Site curves.
    pub site_curves: HashMap<u16, SiteCurve>,
    pub default_site_curves: HashMap<SpeciesRegionKey, u16>,
    pub site_index_conversions: HashMap<(String, String), (f32, f32)>,

    pub adjustments: CompVarAdjustments,
}

fn missing(table: &str, key: impl std::fmt::Debug) -> ProjectionError {
    ProjectionError::MissingCoefficients(format!("{table} has no entry for {key:?}"))
}

impl CoefficientStore {
    pub fn basal_area_yield(&self, bec: &str, species: &str) -> Result<&[f32; 7]> {
        self.basal_area_yield
            .get(&(bec.to_string(), species.to_string()))
            .ok_or_else(|| missing("basal area yield", (bec, species)))
    }

    pub fn quad_mean_diameter_yield(&self, decay_bec: &str, species: &str) -> Result<&[f32; 5]> {
        self.quad_mean_diameter_yield
            .get(&(decay_bec.to_string(), species.to_string()))
            .ok_or_else(|| missing("quad mean diameter yield", (decay_bec, species)))
    }

    pub fn basal_area_growth_fiat(&self, region: Region) -> Result<&GrowthFiatDetails> {
        self.basal_area_growth_fiat
            .get(&region)
            .ok_or_else(|| missing("basal area growth fiat", region))
    }

    pub fn quad_mean_diameter_growth_fiat(&self, region: Region) -> Result<&GrowthFiatDetails> {
        self.quad_mean_diameter_growth_fiat
            .get(&region)
            .ok_or_else(|| missing("quad mean diameter growth fiat", region))
    }

    pub fn basal_area_growth_empirical(&self, bec: &str, species: &str) -> Result<&[f32; 8]> {
        self.basal_area_growth_empirical
            .get(&(bec.to_string(), species.to_string()))
            .ok_or_else(|| missing("basal area growth empirical", (bec, species)))
    }

    pub fn quad_mean_diameter_growth_empirical(&self, stratum: usize) -> Result<&[f32; 7]> {
        self.quad_mean_diameter_growth_empirical
            .get(&stratum)
            .ok_or_else(|| missing("quad mean diameter growth empirical", stratum))
    }

    pub fn quad_mean_diameter_growth_limits(&self, stratum: usize) -> Result<&[f32; 8]> {
        self.quad_mean_diameter_growth_limits
            .get(&stratum)
            .ok_or_else(|| missing("quad mean diameter growth limits", stratum))
    }

    pub fn upper_bounds_by_group(&self, stratum: usize) -> Result<(f32, f32)> {
        self.upper_bounds_by_group
            .get(&stratum)
            .copied()
            .ok_or_else(|| missing("upper bounds by group", stratum))
    }

    pub fn upper_bounds_by_species(&self, species: &str, region: Region) -> Result<(f32, f32)> {
        self.upper_bounds_by_species
            .get(&(species.to_string(), region))
            .copied()
            .ok_or_else(|| missing("upper bounds by species", (species, region)))
    }

    pub fn primary_basal_area_growth(&self, stratum: usize) -> Result<&ModelCoefficients> {
        self.primary_basal_area_growth
            .get(&stratum)
            .ok_or_else(|| missing("primary species basal area growth", stratum))
    }

    /// Falls back from (species, stratum) to (species, 0).
    pub fn non_primary_basal_area_growth(
        &self,
        species: &str,
        stratum: usize,
    ) -> Result<&[f32; 3]> {
        self.non_primary_basal_area_growth
            .get(&(species.to_string(), stratum))
            .or_else(|| {
                self.non_primary_basal_area_growth
                    .get(&(species.to_string(), 0))
            })
            .ok_or_else(|| missing("non-primary species basal area growth", (species, stratum)))
    }

    pub fn primary_quad_mean_diameter_growth(&self, stratum: usize) -> Result<&[f32; 3]> {
        self.primary_quad_mean_diameter_growth
            .get(&stratum)
            .ok_or_else(|| missing("primary species quad mean diameter growth", stratum))
    }

    /// Falls back from (species, stratum) to (species, 0).
    pub fn non_primary_quad_mean_diameter_growth(
        &self,
        species: &str,
        stratum: usize,
    ) -> Result<&[f32; 3]> {
        self.non_primary_quad_mean_diameter_growth
            .get(&(species.to_string(), stratum))
            .or_else(|| {
                self.non_primary_quad_mean_diameter_growth
                    .get(&(species.to_string(), 0))
            })
            .ok_or_else(|| {
                missing(
                    "non-primary species quad mean diameter growth",
                    (species, stratum),
                )
            })
    }

    pub fn primary_lorey_height(&self, species: &str, region: Region) -> Result<&[f32; 3]> {
        self.primary_lorey_height
            .get(&(species.to_string(), region))
            .ok_or_else(|| missing("primary Lorey height", (species, region)))
    }

    /// Missing entries fall back to the identity relation.
    pub fn non_primary_lorey_height(
        &self,
        species: &str,
        primary_species: &str,
        region: Region,
    ) -> NonprimaryHeightCoefficients {
        self.non_primary_lorey_height
            .get(&(species.to_string(), primary_species.to_string(), region))
            .copied()
            .unwrap_or(NonprimaryHeightCoefficients::DEFAULT)
    }

    pub fn species_quad_mean_diameter(&self, species: &str) -> Result<&[f32; 3]> {
        self.species_quad_mean_diameter
            .get(species)
            .ok_or_else(|| missing("species quad mean diameter", species))
    }

    pub fn component_size_limits(
        &self,
        species: &str,
        region: Region,
    ) -> Result<ComponentSizeLimits> {
        self.component_size_limits
            .get(&(species.to_string(), region))
            .copied()
            .ok_or_else(|| missing("component size limits", (species, region)))
    }

    pub fn utilization_basal_area(
        &self,
        band_index: usize,
        species: &str,
        growth_bec: &str,
    ) -> Result<&[f32; 2]> {
        self.utilization_basal_area
            .get(&(band_index, species.to_string(), growth_bec.to_string()))
            .ok_or_else(|| {
                missing("utilization basal area split", (band_index, species, growth_bec))
            })
    }

    pub fn utilization_quad_mean_diameter(
        &self,
        band_index: usize,
        species: &str,
    ) -> Result<&[f32; 4]> {
        self.utilization_quad_mean_diameter
            .get(&(band_index, species.to_string()))
            .ok_or_else(|| {
                missing("utilization quad mean diameter split", (band_index, species))
            })
    }

    pub fn whole_stem_volume(&self, volume_group: u16) -> Result<&[f32; 9]> {
        self.whole_stem_volume
            .get(&volume_group)
            .ok_or_else(|| missing("whole stem volume", volume_group))
    }

    pub fn whole_stem_utilization(
        &self,
        band_index: usize,
        volume_group: u16,
    ) -> Result<&[f32; 4]> {
        self.whole_stem_utilization
            .get(&(band_index, volume_group))
            .ok_or_else(|| missing("whole stem utilization", (band_index, volume_group)))
    }

    pub fn close_utilization(&self, band_index: usize, volume_group: u16) -> Result<&[f32; 3]> {
        self.close_utilization
            .get(&(band_index, volume_group))
            .ok_or_else(|| missing("close utilization", (band_index, volume_group)))
    }

    pub fn net_decay(&self, band_index: usize, decay_group: u16) -> Result<&[f32; 3]> {
        self.net_decay
            .get(&(band_index, decay_group))
            .ok_or_else(|| missing("net decay", (band_index, decay_group)))
    }

    /// Zero when no modifier is registered.
    pub fn decay_modifier(&self, species: &str, region: Region) -> f32 {
        self.decay_modifiers
            .get(&(species.to_string(), region))
            .copied()
            .unwrap_or(0.0)
    }

    /// Zero when no modifier is registered.
    pub fn waste_modifier(&self, species: &str, region: Region) -> f32 {
        self.waste_modifiers
            .get(&(species.to_string(), region))
            .copied()
            .unwrap_or(0.0)
    }

    pub fn net_decay_waste(&self, species: &str) -> Result<&[f32; 6]> {
        self.net_decay_waste
            .get(species)
            .ok_or_else(|| missing("net decay and waste", species))
    }

    pub fn small_probability(&self, species: &str) -> Result<&[f32; 4]> {
        self.small_probability
            .get(species)
            .ok_or_else(|| missing("small component probability", species))
    }

    pub fn small_basal_area(&self, species: &str) -> Result<&[f32; 4]> {
        self.small_basal_area
            .get(species)
            .ok_or_else(|| missing("small component basal area", species))
    }

    pub fn small_quad_mean_diameter(&self, species: &str) -> Result<&[f32; 2]> {
        self.small_quad_mean_diameter
            .get(species)
            .ok_or_else(|| missing("small component quad mean diameter", species))
    }

    pub fn small_lorey_height(&self, species: &str) -> Result<&[f32; 2]> {
        self.small_lorey_height
            .get(species)
            .ok_or_else(|| missing("small component Lorey height", species))
    }

    pub fn small_whole_stem_volume(&self, species: &str) -> Result<&[f32; 4]> {
        self.small_whole_stem_volume
            .get(species)
            .ok_or_else(|| missing("small component whole stem volume", species))
    }

    pub fn volume_equation_group(&self, species: &str) -> Result<u16> {
        self.volume_equation_groups
            .get(species)
            .copied()
            .ok_or_else(|| missing("volume equation groups", species))
    }

    pub fn decay_equation_group(&self, species: &str) -> Result<u16> {
        self.decay_equation_groups
            .get(species)
            .copied()
            .ok_or_else(|| missing("decay equation groups", species))
    }

    pub fn site_curve(&self, number: u16) -> Result<&SiteCurve> {
        self.site_curves
            .get(&number)
            .ok_or_else(|| ProjectionError::SiteCurve(format!("Unknown site curve {number}")))
    }

    pub fn default_site_curve(&self, species: &str, region: Region) -> Result<u16> {
        self.default_site_curves
            .get(&(species.to_string(), region))
            .copied()
            .ok_or_else(|| missing("default site curves", (species, region)))
    }

    /// Linear site index conversion between species, if one is defined.
    pub fn site_index_conversion(&self, from: &str, to: &str) -> Option<(f32, f32)> {
        if from == to {
            return Some((0.0, 1.0));
        }
        self.site_index_conversions
            .get(&(from.to_string(), to.to_string()))
            .copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_basal_area_group_interior_shift() {
        // Genus 3 (B) shifts by 20 in the interior, genus 7 (F) does not.
        assert_eq!(basal_area_group(3, Region::Coastal), 3);
        assert_eq!(basal_area_group(3, Region::Interior), 23);
        assert_eq!(basal_area_group(7, Region::Coastal), 5);
        assert_eq!(basal_area_group(7, Region::Interior), 5);
    }

    #[test]
    fn test_missing_lookup_names_table() {
        let store = CoefficientStore::default();
        let err = store.basal_area_yield("IDF", "PL").unwrap_err();
        assert!(err.to_string().contains("basal area yield"));
    }

    #[test]
    fn test_non_primary_lorey_height_falls_back_to_default() {
        let store = CoefficientStore::default();
        let coefs = store.non_primary_lorey_height("S", "F", Region::Interior);
        assert_eq!(coefs, NonprimaryHeightCoefficients::DEFAULT);
    }

    #[test]
    fn test_site_index_conversion_identity() {
        let store = CoefficientStore::default();
        assert_eq!(store.site_index_conversion("PL", "PL"), Some((0.0, 1.0)));
        assert_eq!(store.site_index_conversion("PL", "S"), None);
    }
}
