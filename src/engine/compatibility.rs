//! Compatibility variables anchor the estimated utilization components to
//! the observed inputs. At the start of a projection each species' observed
//! band values are compared against what the estimators would have produced
//! from the aggregates alone; the differences (additive for basal area and
//! diameter, logit- or log-scale for the volumes) are stored and re-applied
//! after every growth period.

use crate::coefficients::{CoefficientStore, CompVarAdjustments};
use crate::engine::state::{band_index, CompatibilityVariables, LayerState, VolumeVariable};
use crate::error::Result;
use crate::estimators::{density, small, utilization_split, volumes};
use crate::models::{BecZone, UtilizationClass, UtilizationVector};

/// Below this volume no ratio is stable enough to anchor against.
const VOLUME_BASE_MINIMUM: f32 = 0.1;
/// Below this basal area a band is treated as empty.
const BASAL_AREA_BASE_MINIMUM: f32 = 0.01;

/// Stand-in diameters for bands whose input diameter is absent, indexed by
/// band (7.5-12.5 cm first).
const DEFAULT_BAND_QUAD_MEAN_DIAMETERS: [f32; 4] = [10.0, 15.0, 20.0, 25.0];

/// Compute the per-species compatibility variables from the input bank and
/// store them on the layer. Runs once, before the first growth period.
pub fn set_compatibility_variables(
    store: &CoefficientStore,
    bec: &BecZone,
    state: &mut LayerState,
) -> Result<()> {
    let primary_years_at_breast_height = state.primary_species_details()?.years_at_breast_height;
    let bank = &state.start;

    let mut all_variables = vec![CompatibilityVariables::default()];

    for i in bank.indices() {
        let genus = bank.species_names[i].clone();
        let volume_group = store.volume_equation_group(&genus)?;
        let decay_group = store.decay_equation_group(&genus)?;
        let lorey_height = bank.lorey_heights[i][1];

        let mut cv = CompatibilityVariables::default();

        // Working copies of the observed components. The volume estimators
        // overwrite bands with their fitted values, so each fitted value must
        // be taken before the next estimator runs.
        let mut basal_areas = UtilizationVector::zero();
        let mut quad_mean_diameters = UtilizationVector::zero();
        let mut trees_per_hectare = UtilizationVector::zero();
        let mut whole_stem = UtilizationVector::zero();
        let mut close_util = UtilizationVector::zero();
        let mut net_decay = UtilizationVector::zero();
        let mut net_decay_waste = UtilizationVector::zero();
        let zero_adjust = UtilizationVector::zero();

        for uc in UtilizationClass::ALL_BUT_SMALL {
            basal_areas.set(uc, bank.basal_areas[i].get(uc));
            trees_per_hectare.set(uc, bank.trees_per_hectare[i].get(uc));
            whole_stem.set(uc, bank.whole_stem_volumes[i].get(uc));
            close_util.set(uc, bank.close_utilization_volumes[i].get(uc));
            net_decay.set(uc, bank.cu_volumes_minus_decay[i].get(uc));
            net_decay_waste.set(uc, bank.cu_volumes_minus_decay_and_wastage[i].get(uc));

            let dq = bank.quad_mean_diameters[i].get(uc);
            if uc != UtilizationClass::All && !(dq > 0.0) {
                quad_mean_diameters.set(uc, DEFAULT_BAND_QUAD_MEAN_DIAMETERS[band_index(uc)]);
            } else {
                quad_mean_diameters.set(uc, dq);
            }
        }

        for uc in UtilizationClass::BANDS {
            // Net of decay and waste, anchored on the volume net of decay.
            let base = bank.cu_volumes_minus_decay[i].get(uc);
            if base > VOLUME_BASE_MINIMUM {
                volumes::net_decay_and_waste_volume(
                    store,
                    &genus,
                    bec.region,
                    uc,
                    &zero_adjust,
                    lorey_height,
                    &quad_mean_diameters,
                    &close_util,
                    &net_decay,
                    &mut net_decay_waste,
                )?;
                let fitted = net_decay_waste.get(uc);
                let actual = bank.cu_volumes_minus_decay_and_wastage[i].get(uc);
                cv.set_volume_for(
                    uc,
                    VolumeVariable::CloseUtilLessDecayLessWaste,
                    calculate_compatibility_variable(actual, base, fitted),
                );
            }

            // Net of decay, anchored on the close-utilization volume.
            let base = bank.close_utilization_volumes[i].get(uc);
            if base > VOLUME_BASE_MINIMUM {
                volumes::net_decay_volume(
                    store,
                    &genus,
                    bec.region,
                    uc,
                    &zero_adjust,
                    decay_group,
                    primary_years_at_breast_height,
                    &quad_mean_diameters,
                    &close_util,
                    &mut net_decay,
                )?;
                let fitted = net_decay.get(uc);
                let actual = bank.cu_volumes_minus_decay[i].get(uc);
                cv.set_volume_for(
                    uc,
                    VolumeVariable::CloseUtilLessDecay,
                    calculate_compatibility_variable(actual, base, fitted),
                );
            }

            // Close utilization, anchored on the whole-stem volume.
            let base = bank.whole_stem_volumes[i].get(uc);
            if base > VOLUME_BASE_MINIMUM {
                volumes::close_utilization_volume(
                    store,
                    uc,
                    &zero_adjust,
                    volume_group,
                    lorey_height,
                    &quad_mean_diameters,
                    &whole_stem,
                    &mut close_util,
                )?;
                let fitted = close_util.get(uc);
                let actual = bank.close_utilization_volumes[i].get(uc);
                cv.set_volume_for(
                    uc,
                    VolumeVariable::CloseUtil,
                    calculate_compatibility_variable(actual, base, fitted),
                );
            }
        }

        // Whole-stem volume per band, fitted from the mean tree.
        let mean_volume = volumes::whole_stem_volume_per_tree(
            store,
            volume_group,
            lorey_height,
            quad_mean_diameters.all(),
        )?;
        whole_stem.set_all(trees_per_hectare.all() * mean_volume);
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
        for uc in UtilizationClass::BANDS {
            if basal_areas.get(uc) > BASAL_AREA_BASE_MINIMUM {
                cv.whole_stem[band_index(uc)] = calculate_whole_stem_variable(
                    bank.whole_stem_volumes[i].get(uc),
                    basal_areas.get(uc),
                    whole_stem.get(uc),
                );
            }
        }

        // Fitted band split of diameter and basal area, then the additive
        // offsets that recover the observed split.
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
        trees_per_hectare.set_all(bank.trees_per_hectare[i].all());
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

        for uc in UtilizationClass::BANDS {
            cv.basal_area[band_index(uc)] =
                bank.basal_areas[i].get(uc) - basal_areas.get(uc);

            let observed = bank.quad_mean_diameters[i].get(uc);
            let fitted = quad_mean_diameters.get(uc);
            cv.quad_mean_diameter[band_index(uc)] = if observed < BASAL_AREA_BASE_MINIMUM {
                0.0
            } else if observed > 0.0 && fitted > 0.0 {
                observed - fitted
            } else {
                0.0
            };
        }

        calculate_small_component_variables(
            store,
            bec,
            bank,
            i,
            primary_years_at_breast_height,
            &mut cv,
        )?;

        all_variables.push(cv);
    }

    state.set_compatibility_variables(all_variables)
}

/// Offsets for the sub-merchantable component, compared against the small
/// component regressions run on the species aggregates.
fn calculate_small_component_variables(
    store: &CoefficientStore,
    bec: &BecZone,
    bank: &crate::bank::Bank,
    i: usize,
    primary_years_at_breast_height: f32,
    cv: &mut CompatibilityVariables,
) -> Result<()> {
    let alias = &bank.species_names[i];
    let lorey_height_all = bank.lorey_heights[i][1];
    let quad_mean_diameter_all = bank.quad_mean_diameters[i].all();
    let basal_area_all = bank.basal_areas[i].all();

    let probability = small::small_component_probability(
        store,
        alias,
        bec.region,
        primary_years_at_breast_height,
        lorey_height_all,
    )?;
    let conditional_basal_area =
        small::conditional_small_basal_area(store, alias, basal_area_all, lorey_height_all)?;
    let fitted_basal_area = probability * conditional_basal_area;
    let fitted_quad_mean_diameter =
        small::small_quad_mean_diameter(store, alias, lorey_height_all)?;
    let fitted_lorey_height = small::small_lorey_height(
        store,
        alias,
        lorey_height_all,
        fitted_quad_mean_diameter,
        quad_mean_diameter_all,
    )?;
    let fitted_mean_volume =
        small::mean_volume_small(store, alias, fitted_quad_mean_diameter, fitted_lorey_height)?;

    let input_basal_area = bank.basal_areas[i].small();
    let input_quad_mean_diameter = bank.quad_mean_diameters[i].small();
    let input_lorey_height = bank.lorey_heights[i][0];
    let input_trees_per_hectare = bank.trees_per_hectare[i].small();
    let input_whole_stem = bank.whole_stem_volumes[i].small();

    cv.small_basal_area = input_basal_area - fitted_basal_area;

    cv.small_quad_mean_diameter = if input_basal_area > BASAL_AREA_BASE_MINIMUM {
        input_quad_mean_diameter - fitted_quad_mean_diameter
    } else {
        0.0
    };

    cv.small_lorey_height =
        if input_lorey_height > 1.3 && fitted_lorey_height > 1.3 && input_basal_area > 0.0 {
            ((input_lorey_height - 1.3) / (fitted_lorey_height - 1.3)).ln()
        } else {
            0.0
        };

    cv.small_whole_stem_volume = if input_whole_stem > 0.0
        && fitted_mean_volume > 0.0
        && input_basal_area >= BASAL_AREA_BASE_MINIMUM
    {
        (input_whole_stem / input_trees_per_hectare / fitted_mean_volume).ln()
    } else {
        0.0
    };

    Ok(())
}

/// Difference of the observed and fitted volume ratios on the logit scale,
/// each ratio taken against the same base volume and saturated at ±7.
fn calculate_compatibility_variable(actual: f32, base: f32, fitted: f32) -> f32 {
    ratio_logit(actual / base) - ratio_logit(fitted / base)
}

fn ratio_logit(ratio: f32) -> f32 {
    if ratio <= 0.0 {
        -7.0
    } else if ratio >= 1.0 {
        7.0
    } else {
        (ratio / (1.0 - ratio)).ln().clamp(-7.0, 7.0)
    }
}

/// Difference of the observed and fitted volume-to-basal-area ratios on the
/// log scale, each floored at -2.
fn calculate_whole_stem_variable(actual: f32, basal_area: f32, fitted: f32) -> f32 {
    volume_ratio_log(actual / basal_area) - volume_ratio_log(fitted / basal_area)
}

fn volume_ratio_log(ratio: f32) -> f32 {
    if ratio <= 0.0 {
        -2.0
    } else {
        ratio.ln()
    }
}

/// Damp or amplify the stored offsets after a growth period. The default
/// multipliers are all 1, leaving the offsets untouched.
pub fn update_compatibility_variables_after_growth(
    state: &mut LayerState,
    adjustments: &CompVarAdjustments,
) -> Result<()> {
    for cv in state.compatibility_variables_mut()? {
        cv.small_basal_area *= adjustments.small;
        cv.small_quad_mean_diameter *= adjustments.small;
        cv.small_lorey_height *= adjustments.small;
        cv.small_whole_stem_volume *= adjustments.small;

        for band in 0..4 {
            cv.basal_area[band] *= adjustments.basal_area;
            cv.quad_mean_diameter[band] *= adjustments.quad_mean_diameter;
            cv.whole_stem[band] *= adjustments.volume;
            for stage in 0..3 {
                cv.volume[band][stage] *= adjustments.volume;
            }
        }
    }
    Ok(())
}
