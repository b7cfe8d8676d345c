//! Recomputation of the merchantable utilization components after growth.
//!
//! Once the per-species aggregate basal area, stem count, diameter, and
//! Lorey height are known for the end of a period, this splits them over
//! the diameter bands and runs the volume chain, applying the stored
//! compatibility variables so the estimates stay anchored to the inputs.

use crate::config::{CompatibilityVariableApplication, ControlSettings};
use crate::engine::state::{band_index, LayerState, VolumeVariable};
use crate::error::Result;
use crate::estimators::{density, utilization_split, volumes};
use crate::models::{BecZone, UtilizationClass, UtilizationVector};

/// Split each species' aggregate values over the diameter bands, apply the
/// compatibility variables, and re-derive the four stem volumes; then roll
/// the species back up into the layer slot.
pub fn compute_utilization_components_primary(
    store: &crate::coefficients::CoefficientStore,
    settings: &ControlSettings,
    bec: &BecZone,
    state: &mut LayerState,
) -> Result<()> {
    let cv_mode = settings.compatibility_variables;
    let cvs = state.compatibility_variables()?.to_vec();
    let layer_breast_height_age = state.primary_species_details()?.years_at_breast_height;
    let bank = &mut state.end;

    for i in bank.indices() {
        let genus = bank.species_names[i].clone();
        let volume_group = store.volume_equation_group(&genus)?;
        let decay_group = store.decay_equation_group(&genus)?;
        let cv = &cvs[i];

        let lorey_height = bank.lorey_heights[i][1];

        // Whole-stem volume for the species as a whole, from the mean tree.
        let mean_volume = volumes::whole_stem_volume_per_tree(
            store,
            volume_group,
            lorey_height,
            bank.quad_mean_diameters[i].all(),
        )?;
        let tph_all = bank.trees_per_hectare[i].all();
        bank.whole_stem_volumes[i].set_all(tph_all * mean_volume);

        let mut basal_areas = UtilizationVector::zero();
        let mut quad_mean_diameters = UtilizationVector::zero();
        let mut trees_per_hectare = UtilizationVector::zero();
        let mut whole_stem = UtilizationVector::zero();
        let mut close_util = UtilizationVector::zero();
        let mut net_decay = UtilizationVector::zero();
        let mut net_decay_waste = UtilizationVector::zero();

        basal_areas.set_all(bank.basal_areas[i].all());
        quad_mean_diameters.set_all(bank.quad_mean_diameters[i].all());
        trees_per_hectare.set_all(tph_all);
        whole_stem.set_all(bank.whole_stem_volumes[i].all());

        let mut adjust_close_util = UtilizationVector::zero();
        let mut adjust_decay = UtilizationVector::zero();
        let mut adjust_decay_waste = UtilizationVector::zero();

        utilization_split::quad_mean_diameter_by_utilization(
            store,
            &genus,
            &mut quad_mean_diameters,
        )?;
        utilization_split::basal_area_by_utilization(
            store,
            bec,
            &genus,
            &quad_mean_diameters,
            &mut basal_areas,
        )?;

        for uc in UtilizationClass::BANDS {
            trees_per_hectare.set(
                uc,
                density::trees_per_hectare(basal_areas.get(uc), quad_mean_diameters.get(uc)),
            );
        }

        utilization_split::reconcile_components(
            &mut basal_areas,
            &mut trees_per_hectare,
            &mut quad_mean_diameters,
        )?;

        if cv_mode != CompatibilityVariableApplication::None {
            let mut band_basal_area_sum = 0.0_f32;
            for uc in UtilizationClass::BANDS {
                let adjusted = basal_areas.get(uc) + cv.basal_area[band_index(uc)];
                basal_areas.set(uc, adjusted.max(0.0));
                band_basal_area_sum += basal_areas.get(uc);

                let dq = quad_mean_diameters.get(uc) + cv.quad_mean_diameter[band_index(uc)];
                quad_mean_diameters.set(uc, dq.clamp(uc.low_bound(), uc.high_bound()));
            }

            // The basal-area offsets shift mass between bands; rescale so
            // the bands still sum to the aggregate.
            if band_basal_area_sum > 0.0 {
                let multiplier = basal_areas.all() / band_basal_area_sum;
                for uc in UtilizationClass::BANDS {
                    basal_areas.set(uc, basal_areas.get(uc) * multiplier);
                }
            }
        }

        for uc in UtilizationClass::BANDS {
            trees_per_hectare.set(
                uc,
                density::trees_per_hectare(basal_areas.get(uc), quad_mean_diameters.get(uc)),
            );
        }

        // The diameters may have moved out from under the first pass.
        utilization_split::reconcile_components(
            &mut basal_areas,
            &mut trees_per_hectare,
            &mut quad_mean_diameters,
        )?;

        volumes::whole_stem_volume(
            store,
            UtilizationClass::All,
            0.0,
            volume_group,
            lorey_height,
            &quad_mean_diameters,
            &basal_areas,
            &mut whole_stem,
        )?;

        if cv_mode == CompatibilityVariableApplication::All {
            let mut whole_stem_sum = 0.0_f32;
            for uc in UtilizationClass::BANDS {
                let adjusted = whole_stem.get(uc) * cv.whole_stem[band_index(uc)].exp();
                whole_stem.set(uc, adjusted);
                whole_stem_sum += adjusted;
            }
            whole_stem.set_all(whole_stem_sum);

            for uc in UtilizationClass::BANDS {
                adjust_close_util.set(uc, cv.volume_for(uc, VolumeVariable::CloseUtil));
                adjust_decay.set(uc, cv.volume_for(uc, VolumeVariable::CloseUtilLessDecay));
                adjust_decay_waste
                    .set(uc, cv.volume_for(uc, VolumeVariable::CloseUtilLessDecayLessWaste));
            }
        }

        volumes::close_utilization_volume(
            store,
            UtilizationClass::All,
            &adjust_close_util,
            volume_group,
            lorey_height,
            &quad_mean_diameters,
            &whole_stem,
            &mut close_util,
        )?;

        volumes::net_decay_volume(
            store,
            &genus,
            bec.region,
            UtilizationClass::All,
            &adjust_decay,
            decay_group,
            layer_breast_height_age,
            &quad_mean_diameters,
            &close_util,
            &mut net_decay,
        )?;

        volumes::net_decay_and_waste_volume(
            store,
            &genus,
            bec.region,
            UtilizationClass::All,
            &adjust_decay_waste,
            lorey_height,
            &quad_mean_diameters,
            &close_util,
            &net_decay,
            &mut net_decay_waste,
        )?;

        // Band slots carry the split results; the aggregate slots of the
        // size fields keep the values growth computed.
        for uc in UtilizationClass::BANDS {
            bank.basal_areas[i].set(uc, basal_areas.get(uc));
            bank.trees_per_hectare[i].set(uc, trees_per_hectare.get(uc));
            bank.quad_mean_diameters[i].set(uc, quad_mean_diameters.get(uc));
        }
        for uc in UtilizationClass::ALL_BUT_SMALL {
            bank.whole_stem_volumes[i].set(uc, whole_stem.get(uc));
            bank.close_utilization_volumes[i].set(uc, close_util.get(uc));
            bank.cu_volumes_minus_decay[i].set(uc, net_decay.get(uc));
            bank.cu_volumes_minus_decay_and_wastage[i].set(uc, net_decay_waste.get(uc));
        }
    }

    aggregate_layer_from_species(bank);
    Ok(())
}

/// Rebuild the layer slot (index 0) from the species: sums for the summable
/// vectors, basal-area weighted means for Lorey height, and diameters
/// re-derived from the summed basal area and stem count.
fn aggregate_layer_from_species(bank: &mut crate::bank::Bank) {
    const CLASSES: [UtilizationClass; 6] = [
        UtilizationClass::Small,
        UtilizationClass::All,
        UtilizationClass::U75To125,
        UtilizationClass::U125To175,
        UtilizationClass::U175To225,
        UtilizationClass::Over225,
    ];

    for uc in CLASSES {
        let mut ba = 0.0_f32;
        let mut tph = 0.0_f32;
        let mut ws = 0.0_f32;
        let mut cu = 0.0_f32;
        let mut nd = 0.0_f32;
        let mut ndw = 0.0_f32;
        for i in bank.indices() {
            ba += bank.basal_areas[i].get(uc);
            tph += bank.trees_per_hectare[i].get(uc);
            ws += bank.whole_stem_volumes[i].get(uc);
            cu += bank.close_utilization_volumes[i].get(uc);
            nd += bank.cu_volumes_minus_decay[i].get(uc);
            ndw += bank.cu_volumes_minus_decay_and_wastage[i].get(uc);
        }
        bank.basal_areas[0].set(uc, ba);
        bank.trees_per_hectare[0].set(uc, tph);
        bank.whole_stem_volumes[0].set(uc, ws);
        bank.close_utilization_volumes[0].set(uc, cu);
        bank.cu_volumes_minus_decay[0].set(uc, nd);
        bank.cu_volumes_minus_decay_and_wastage[0].set(uc, ndw);
        bank.quad_mean_diameters[0].set(uc, density::quad_mean_diameter(ba, tph));
    }

    for (slot, uc) in [(0, UtilizationClass::Small), (1, UtilizationClass::All)] {
        let mut weighted = 0.0_f32;
        let mut ba_sum = 0.0_f32;
        for i in bank.indices() {
            weighted += bank.lorey_heights[i][slot] * bank.basal_areas[i].get(uc);
            ba_sum += bank.basal_areas[i].get(uc);
        }
        bank.lorey_heights[0][slot] = if ba_sum > 0.0 { weighted / ba_sum } else { 0.0 };
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bank::Bank;
    use crate::coefficients::with_defaults;
    use crate::engine::state::CompatibilityVariables;
    use crate::models::{bec_zone, Layer, LayerType, SpeciesRecord, UtilizationRecord};
    use assert_approx_eq::assert_approx_eq;

    fn species(genus: &str, percent: f32, ba: f32, dq: f32) -> SpeciesRecord {
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
                trees_per_hectare: crate::estimators::density::trees_per_hectare(ba, dq),
                quad_mean_diameter: dq,
                lorey_height: Some(22.0),
                whole_stem_volume: ba * 9.0,
                close_utilization_volume: ba * 8.0,
                volume_net_decay: ba * 7.5,
                volume_net_decay_waste: ba * 7.2,
            }],
        }
    }

    fn state() -> LayerState {
        let layer = Layer {
            layer_type: LayerType::Primary,
            species: vec![species("F", 70.0, 28.0, 25.0), species("S", 30.0, 12.0, 22.0)],
            default_utilization: None,
        };
        let bank = Bank::from_layer(&layer, |_| true).unwrap();
        let n = bank.n_species();
        let mut state = LayerState::new(bank);
        state
            .set_compatibility_variables(vec![CompatibilityVariables::default(); n + 1])
            .unwrap();
        state.set_species_rankings(1, Some(2), 4).unwrap();
        state.set_stratum(5).unwrap();
        state
            .set_primary_species_details(crate::engine::state::PrimarySpeciesDetails {
                index: 1,
                site_index: 18.0,
                dominant_height: 25.0,
                total_age: 60.0,
                years_to_breast_height: 8.0,
                years_at_breast_height: 52.0,
                site_curve: 16,
            })
            .unwrap();
        state.end = state.start.clone();
        state
    }

    #[test]
    fn test_bands_sum_to_aggregate_after_split() {
        let store = with_defaults();
        let bec = bec_zone("IDF").unwrap();
        let settings = ControlSettings::default();
        let mut state = state();

        compute_utilization_components_primary(&store, &settings, bec, &mut state).unwrap();

        for i in 1..=2 {
            let ba = &state.end.basal_areas[i];
            assert_approx_eq!(ba.band_sum(), ba.all(), 1e-3);
        }
    }

    #[test]
    fn test_volume_chain_is_monotone_per_band() {
        let store = with_defaults();
        let bec = bec_zone("IDF").unwrap();
        let settings = ControlSettings::default();
        let mut state = state();

        compute_utilization_components_primary(&store, &settings, bec, &mut state).unwrap();

        let bank = &state.end;
        for uc in UtilizationClass::BANDS {
            let ws = bank.whole_stem_volumes[1].get(uc);
            let cu = bank.close_utilization_volumes[1].get(uc);
            let nd = bank.cu_volumes_minus_decay[1].get(uc);
            let ndw = bank.cu_volumes_minus_decay_and_wastage[1].get(uc);
            assert!(ws >= cu, "whole stem {ws} < close util {cu} in {uc:?}");
            assert!(cu >= nd, "close util {cu} < net decay {nd} in {uc:?}");
            assert!(nd >= ndw, "net decay {nd} < net decay+waste {ndw} in {uc:?}");
        }
    }

    #[test]
    fn test_layer_aggregates_are_species_sums() {
        let store = with_defaults();
        let bec = bec_zone("IDF").unwrap();
        let settings = ControlSettings::default();
        let mut state = state();

        compute_utilization_components_primary(&store, &settings, bec, &mut state).unwrap();

        let bank = &state.end;
        let species_ba: f32 = (1..=2).map(|i| bank.basal_areas[i].all()).sum();
        assert_approx_eq!(bank.basal_areas[0].all(), species_ba, 1e-3);
        let species_ws: f32 = (1..=2).map(|i| bank.whole_stem_volumes[i].all()).sum();
        assert_approx_eq!(bank.whole_stem_volumes[0].all(), species_ws, 1e-3);
    }
}
