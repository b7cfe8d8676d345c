use crate::error::{ProjectionError, Result};
use crate::estimators::density;
use crate::models::{Layer, SpeciesRecord, UtilizationClass, UtilizationVector};

/// Species with less basal area than this are dropped at load.
pub const MIN_BASAL_AREA: f32 = 0.001;

/// Dense per-species columnar storage for one layer snapshot.
///
/// Arrays are indexed 1..=n_species with slot 0 holding the layer aggregate;
/// every array has length `n_species + 1` for the Bank's lifetime. Missing
/// floating values are NaN.
#[derive(Debug, Clone)]
pub struct Bank {
    n_species: usize,

    pub species_names: Vec<String>,
    pub genus_indices: Vec<usize>,
    pub site_species: Vec<Option<String>>,

    pub percentages_of_forested_land: Vec<f32>,
    pub site_indices: Vec<f32>,
    pub dominant_heights: Vec<f32>,
    pub ages_total: Vec<f32>,
    pub years_to_breast_height: Vec<f32>,
    pub years_at_breast_height: Vec<f32>,
    pub site_curve_numbers: Vec<Option<u16>>,

    pub basal_areas: Vec<UtilizationVector>,
    pub trees_per_hectare: Vec<UtilizationVector>,
    pub quad_mean_diameters: Vec<UtilizationVector>,
    pub whole_stem_volumes: Vec<UtilizationVector>,
    pub close_utilization_volumes: Vec<UtilizationVector>,
    pub cu_volumes_minus_decay: Vec<UtilizationVector>,
    pub cu_volumes_minus_decay_and_wastage: Vec<UtilizationVector>,

    /// Lorey heights carry only the small (0) and all (1) slots.
    pub lorey_heights: Vec<[f32; 2]>,
}

impl Bank {
    /// Build a Bank from a layer's species records.
    ///
    /// Species failing the retain predicate are dropped; survivors are
    /// sorted by genus index. The aggregate slot is seeded from the layer's
    /// default utilization records when present, otherwise derived by
    /// summing the species.
    pub fn from_layer(layer: &Layer, retain: impl Fn(&SpeciesRecord) -> bool) -> Result<Bank> {
        let mut retained: Vec<&SpeciesRecord> = layer.species.iter().filter(|s| retain(s)).collect();
        if retained.is_empty() {
            return Err(ProjectionError::Validation(
                "No species were retained after filtering".to_string(),
            ));
        }
        for s in &retained {
            s.genus_index()?;
        }
        retained.sort_by_key(|s| s.genus_index().unwrap_or(usize::MAX));

        let n = retained.len();
        let mut bank = Bank::with_capacity(n);

        for (slot, species) in retained.iter().enumerate().map(|(i, s)| (i + 1, s)) {
            bank.species_names[slot] = species.genus.to_uppercase();
            bank.genus_indices[slot] = species.genus_index()?;
            bank.site_species[slot] = species.site_species.clone();
            bank.percentages_of_forested_land[slot] = species.percent_forested;
            bank.site_indices[slot] = species.site_index.unwrap_or(f32::NAN);
            bank.dominant_heights[slot] = species.dominant_height.unwrap_or(f32::NAN);
            bank.ages_total[slot] = species.total_age.unwrap_or(f32::NAN);
            bank.years_to_breast_height[slot] =
                species.years_to_breast_height.unwrap_or(f32::NAN);
            bank.years_at_breast_height[slot] =
                species.years_at_breast_height.unwrap_or(f32::NAN);
            bank.site_curve_numbers[slot] = species.site_curve_number;

            for record in &species.utilizations {
                let uc = record.class;
                bank.basal_areas[slot].set(uc, record.basal_area);
                bank.trees_per_hectare[slot].set(uc, record.trees_per_hectare);
                bank.quad_mean_diameters[slot].set(uc, record.quad_mean_diameter);
                bank.whole_stem_volumes[slot].set(uc, record.whole_stem_volume);
                bank.close_utilization_volumes[slot].set(uc, record.close_utilization_volume);
                bank.cu_volumes_minus_decay[slot].set(uc, record.volume_net_decay);
                bank.cu_volumes_minus_decay_and_wastage[slot]
                    .set(uc, record.volume_net_decay_waste);
                if let Some(lh) = record.lorey_height {
                    match uc {
                        UtilizationClass::Small => bank.lorey_heights[slot][0] = lh,
                        UtilizationClass::All => bank.lorey_heights[slot][1] = lh,
                        _ => {}
                    }
                }
            }

            // Derive the breast-height age pair where one side is missing.
            let total = bank.ages_total[slot];
            let ytbh = bank.years_to_breast_height[slot];
            let yabh = bank.years_at_breast_height[slot];
            if yabh.is_nan() && !total.is_nan() && !ytbh.is_nan() {
                bank.years_at_breast_height[slot] = total - ytbh;
            } else if ytbh.is_nan() && !total.is_nan() && !yabh.is_nan() {
                bank.years_to_breast_height[slot] = total - yabh;
            } else if total.is_nan() && !ytbh.is_nan() && !yabh.is_nan() {
                bank.ages_total[slot] = ytbh + yabh;
            }
        }

        bank.seed_aggregate(layer);
        Ok(bank)
    }

    fn with_capacity(n: usize) -> Bank {
        Bank {
            n_species: n,
            species_names: vec![String::new(); n + 1],
            genus_indices: vec![0; n + 1],
            site_species: vec![None; n + 1],
            percentages_of_forested_land: vec![f32::NAN; n + 1],
            site_indices: vec![f32::NAN; n + 1],
            dominant_heights: vec![f32::NAN; n + 1],
            ages_total: vec![f32::NAN; n + 1],
            years_to_breast_height: vec![f32::NAN; n + 1],
            years_at_breast_height: vec![f32::NAN; n + 1],
            site_curve_numbers: vec![None; n + 1],
            basal_areas: vec![UtilizationVector::zero(); n + 1],
            trees_per_hectare: vec![UtilizationVector::zero(); n + 1],
            quad_mean_diameters: vec![UtilizationVector::zero(); n + 1],
            whole_stem_volumes: vec![UtilizationVector::zero(); n + 1],
            close_utilization_volumes: vec![UtilizationVector::zero(); n + 1],
            cu_volumes_minus_decay: vec![UtilizationVector::zero(); n + 1],
            cu_volumes_minus_decay_and_wastage: vec![UtilizationVector::zero(); n + 1],
            lorey_heights: vec![[f32::NAN; 2]; n + 1],
        }
    }

    fn seed_aggregate(&mut self, layer: &Layer) {
        if let Some(defaults) = &layer.default_utilization {
            for record in defaults {
                let uc = record.class;
                self.basal_areas[0].set(uc, record.basal_area);
                self.trees_per_hectare[0].set(uc, record.trees_per_hectare);
                self.quad_mean_diameters[0].set(uc, record.quad_mean_diameter);
                self.whole_stem_volumes[0].set(uc, record.whole_stem_volume);
                self.close_utilization_volumes[0].set(uc, record.close_utilization_volume);
                self.cu_volumes_minus_decay[0].set(uc, record.volume_net_decay);
                self.cu_volumes_minus_decay_and_wastage[0]
                    .set(uc, record.volume_net_decay_waste);
                if let Some(lh) = record.lorey_height {
                    match uc {
                        UtilizationClass::Small => self.lorey_heights[0][0] = lh,
                        UtilizationClass::All => self.lorey_heights[0][1] = lh,
                        _ => {}
                    }
                }
            }
            return;
        }

        for uc in UtilizationClass::ALL_BUT_SMALL {
            let mut ba = 0.0;
            let mut tph = 0.0;
            let mut ws = 0.0;
            let mut cu = 0.0;
            let mut cud = 0.0;
            let mut cudw = 0.0;
            for i in self.indices() {
                ba += self.basal_areas[i].get(uc);
                tph += self.trees_per_hectare[i].get(uc);
                ws += self.whole_stem_volumes[i].get(uc);
                cu += self.close_utilization_volumes[i].get(uc);
                cud += self.cu_volumes_minus_decay[i].get(uc);
                cudw += self.cu_volumes_minus_decay_and_wastage[i].get(uc);
            }
            self.basal_areas[0].set(uc, ba);
            self.trees_per_hectare[0].set(uc, tph);
            self.quad_mean_diameters[0].set(uc, density::quad_mean_diameter(ba, tph));
            self.whole_stem_volumes[0].set(uc, ws);
            self.close_utilization_volumes[0].set(uc, cu);
            self.cu_volumes_minus_decay[0].set(uc, cud);
            self.cu_volumes_minus_decay_and_wastage[0].set(uc, cudw);
        }

        let mut lh_weighted = 0.0;
        let mut ba_sum = 0.0;
        for i in self.indices() {
            let ba = self.basal_areas[i].all();
            let lh = self.lorey_heights[i][1];
            if ba > 0.0 && !lh.is_nan() {
                lh_weighted += ba * lh;
                ba_sum += ba;
            }
        }
        if ba_sum > 0.0 {
            self.lorey_heights[0][1] = lh_weighted / ba_sum;
        }
    }

    /// Structure-only copy: identical shape and identity columns, every
    /// scalar metric NaN. Used to pre-allocate the next period's end state.
    pub fn nan_shell(&self) -> Bank {
        let n = self.n_species;
        Bank {
            n_species: n,
            species_names: self.species_names.clone(),
            genus_indices: self.genus_indices.clone(),
            site_species: self.site_species.clone(),
            site_curve_numbers: self.site_curve_numbers.clone(),
            percentages_of_forested_land: vec![f32::NAN; n + 1],
            site_indices: vec![f32::NAN; n + 1],
            dominant_heights: vec![f32::NAN; n + 1],
            ages_total: vec![f32::NAN; n + 1],
            years_to_breast_height: vec![f32::NAN; n + 1],
            years_at_breast_height: vec![f32::NAN; n + 1],
            basal_areas: vec![UtilizationVector::nan(); n + 1],
            trees_per_hectare: vec![UtilizationVector::nan(); n + 1],
            quad_mean_diameters: vec![UtilizationVector::nan(); n + 1],
            whole_stem_volumes: vec![UtilizationVector::nan(); n + 1],
            close_utilization_volumes: vec![UtilizationVector::nan(); n + 1],
            cu_volumes_minus_decay: vec![UtilizationVector::nan(); n + 1],
            cu_volumes_minus_decay_and_wastage: vec![UtilizationVector::nan(); n + 1],
            lorey_heights: vec![[f32::NAN; 2]; n + 1],
        }
    }

    pub fn n_species(&self) -> usize {
        self.n_species
    }

    /// Species slot indices, 1..=n.
    pub fn indices(&self) -> std::ops::RangeInclusive<usize> {
        1..=self.n_species
    }

    /// Per-species share of the aggregate basal area, `All` class.
    pub fn basal_area_proportions(&self) -> Vec<f32> {
        let total = self.basal_areas[0].all();
        let mut proportions = vec![0.0; self.n_species + 1];
        if total > 0.0 {
            for i in self.indices() {
                proportions[i] = self.basal_areas[i].all() / total;
            }
        }
        proportions
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{LayerType, UtilizationRecord};
    use assert_approx_eq::assert_approx_eq;

    fn species(genus: &str, percent: f32, ba: f32) -> SpeciesRecord {
        SpeciesRecord {
            genus: genus.into(),
            site_species: None,
            percent_forested: percent,
            site_index: Some(18.0),
            dominant_height: Some(25.0),
            total_age: Some(60.0),
            years_to_breast_height: Some(8.0),
            years_at_breast_height: None,
            site_curve_number: None,
            utilizations: vec![UtilizationRecord {
                class: UtilizationClass::All,
                basal_area: ba,
                trees_per_hectare: ba * 18.0,
                quad_mean_diameter: 24.0,
                lorey_height: Some(22.0),
                whole_stem_volume: ba * 9.0,
                close_utilization_volume: ba * 8.0,
                volume_net_decay: ba * 7.5,
                volume_net_decay_waste: ba * 7.2,
            }],
        }
    }

    fn two_species_layer() -> Layer {
        Layer {
            layer_type: LayerType::Primary,
            species: vec![species("S", 30.0, 12.0), species("F", 70.0, 28.0)],
            default_utilization: None,
        }
    }

    #[test]
    fn test_from_layer_sorts_by_genus_index() {
        let bank = Bank::from_layer(&two_species_layer(), |_| true).unwrap();
        // F (index 7) sorts before S (index 15).
        assert_eq!(bank.species_names[1], "F");
        assert_eq!(bank.species_names[2], "S");
        assert_eq!(bank.n_species(), 2);
    }

    #[test]
    fn test_from_layer_applies_retain_predicate() {
        let bank =
            Bank::from_layer(&two_species_layer(), |s| s.basal_area_all() >= 20.0).unwrap();
        assert_eq!(bank.n_species(), 1);
        assert_eq!(bank.species_names[1], "F");
    }

    #[test]
    fn test_from_layer_rejects_empty_result() {
        let result = Bank::from_layer(&two_species_layer(), |_| false);
        assert!(matches!(result, Err(ProjectionError::Validation(_))));
    }

    #[test]
    fn test_aggregate_slot_derived_from_species() {
        let bank = Bank::from_layer(&two_species_layer(), |_| true).unwrap();
        assert_approx_eq!(bank.basal_areas[0].all(), 40.0, 1e-4);
        // BA-weighted Lorey height of identical heights is that height.
        assert_approx_eq!(bank.lorey_heights[0][1], 22.0, 1e-4);
    }

    #[test]
    fn test_breast_height_age_derivation() {
        let bank = Bank::from_layer(&two_species_layer(), |_| true).unwrap();
        assert_approx_eq!(bank.years_at_breast_height[1], 52.0, 1e-4);
    }

    #[test]
    fn test_nan_shell_preserves_shape_and_identity() {
        let bank = Bank::from_layer(&two_species_layer(), |_| true).unwrap();
        let shell = bank.nan_shell();
        assert_eq!(shell.n_species(), bank.n_species());
        assert_eq!(shell.species_names, bank.species_names);
        assert!(shell.basal_areas[1].all().is_nan());
        assert!(shell.lorey_heights[0][1].is_nan());
    }

    #[test]
    fn test_basal_area_proportions() {
        let bank = Bank::from_layer(&two_species_layer(), |_| true).unwrap();
        let proportions = bank.basal_area_proportions();
        assert_approx_eq!(proportions[1], 0.7, 1e-4);
        assert_approx_eq!(proportions[2], 0.3, 1e-4);
    }
}
