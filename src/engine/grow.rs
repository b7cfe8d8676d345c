//! One-year growth of the primary layer.
//!
//! The layer grows top-down: dominant height first, then layer basal area
//! and quadratic mean diameter, then the disaggregation of those deltas to
//! the individual species, and finally the derived heights, utilization
//! components and small-component yields at the end of the period.

use crate::bank::Bank;
use crate::coefficients::CoefficientStore;
use crate::config::{ControlSettings, GrowthModelKind, SpeciesDynamicsMode};
use crate::engine::{compatibility, utilization};
use crate::engine::state::LayerState;
use crate::error::{ProjectionError, Result};
use crate::estimators::yields::EMPIRICAL_OCCUPANCY;
use crate::estimators::{density, lorey, small, yields};
use crate::models::{BecZone, Region, UtilizationClass, GENERA};

/// Anchor diameter for the per-species diameter-rate model.
const DQ_RATE_BASE: f32 = 7.45;

/// Advance the layer one year. Start-of-period values are read from
/// `state.start`; the results land in `state.end`.
#[allow(clippy::too_many_arguments)]
pub fn grow(
    store: &CoefficientStore,
    settings: &ControlSettings,
    bec: &BecZone,
    state: &mut LayerState,
    veteran_basal_area: f32,
    fraction_available: f32,
) -> Result<()> {
    let details = state.primary_species_details()?;
    let primary = details.index;
    let stratum = state.stratum()?;

    state.end = state.start.clone();

    let dh_start = details.dominant_height;
    let psp_yabh_start = details.years_at_breast_height;

    let (ba_start, tph_start, dq_start, lh_start, psp_lh_start, psp_tph_start) = {
        let bank = &state.end;
        (
            bank.basal_areas[0].all(),
            bank.trees_per_hectare[0].all(),
            bank.quad_mean_diameters[0].all(),
            bank.lorey_heights[0][1],
            bank.lorey_heights[primary][1],
            bank.trees_per_hectare[primary].all(),
        )
    };

    let species_mix: Vec<(String, f32)> = {
        let bank = &state.end;
        let proportions = bank.basal_area_proportions();
        bank.indices()
            .map(|i| (bank.species_names[i].clone(), proportions[i]))
            .collect()
    };
    let mix: Vec<(&str, f32)> = species_mix.iter().map(|(s, p)| (s.as_str(), *p)).collect();
    let primary_alias = state.end.species_names[primary].clone();

    // (1) Dominant height growth.
    let dh_delta = grow_dominant_height(
        store,
        bec.region,
        details.site_curve,
        dh_start,
        details.site_index,
        details.years_to_breast_height,
    )?;

    // (2) Layer basal area growth.
    let mut ba_delta = grow_basal_area(
        store,
        settings,
        bec,
        &primary_alias,
        stratum,
        &mix,
        psp_yabh_start,
        dh_start,
        ba_start,
        veteran_basal_area,
        dh_delta,
    )?;

    // (3) Layer quadratic mean diameter growth.
    let (dq_delta, dq_limit_applied) = grow_quad_mean_diameter(
        store,
        settings,
        bec,
        &primary_alias,
        stratum,
        &mix,
        psp_yabh_start,
        ba_start,
        dh_start,
        dq_start,
        dh_delta,
    )?;

    if settings.cap_basal_area_when_diameter_limited && dq_limit_applied {
        let dq_end = dq_start + dq_delta;
        let ba_end_max = ba_start * (dq_end * dq_end) / (dq_start * dq_start);
        ba_delta = ba_delta.min(ba_end_max - ba_start);
    }

    let ba_change_rate = ba_delta / ba_start;

    // (4) Layer-level end values.
    let dh_end = dh_start + dh_delta;
    let dq_end = dq_start + dq_delta;
    let ba_end = ba_start + ba_delta;
    let tph_end = density::trees_per_hectare(ba_end, dq_end);
    let tph_multiplier = tph_end / tph_start;

    {
        let bank = &mut state.end;
        bank.quad_mean_diameters[0].set_all(dq_end);
        bank.basal_areas[0].set_all(ba_end);
        bank.trees_per_hectare[0].set_all(tph_end);
    }

    // (5) Disaggregate the layer deltas to the species.
    let mut solved = false;
    if settings.species_dynamics == SpeciesDynamicsMode::Partial {
        solved = grow_using_partial_species_dynamics(state.end.n_species(), ba_delta, dq_delta);
    }
    if !solved {
        if settings.species_dynamics == SpeciesDynamicsMode::Proportional
            || state.end.n_species() == 1
        {
            grow_using_no_species_dynamics(&mut state.end, ba_change_rate, tph_multiplier);
        } else {
            grow_using_full_species_dynamics(
                store,
                bec,
                &mut state.end,
                primary,
                stratum,
                ba_start,
                ba_delta,
                dq_start,
                dq_delta,
                tph_start,
                lh_start,
            )?;
        }
    }

    // (6) Layer trees-per-hectare from the species values.
    let tph_end_sum: f32 = state
        .end
        .indices()
        .filter(|&i| state.end.basal_areas[i].all() > 0.0)
        .map(|i| state.end.trees_per_hectare[i].all())
        .sum();
    if tph_end_sum < 0.0 {
        return Err(ProjectionError::InvalidState(format!(
            "Layer trees-per-hectare was calculated to be negative ({tph_end_sum})"
        )));
    }
    state.end.trees_per_hectare[0].set_all(tph_end_sum);

    // (7) Layer quadratic mean diameter from the species values.
    let layer_dq = density::quad_mean_diameter(state.end.basal_areas[0].all(), tph_end_sum);
    state.end.quad_mean_diameters[0].set_all(layer_dq);

    // (8) Per-species Lorey heights.
    let psp_tph_end = state.end.trees_per_hectare[primary].all();
    grow_lorey_heights(
        store,
        bec,
        &mut state.end,
        primary,
        dh_start,
        dh_end,
        psp_tph_start,
        psp_tph_end,
        psp_lh_start,
    )?;

    // (9) Basal area percentages.
    let layer_ba = state.end.basal_areas[0].all();
    for i in state.end.indices() {
        state.end.percentages_of_forested_land[i] =
            100.0 * state.end.basal_areas[i].all() / layer_ba;
    }

    // (10) Advance the site values one year.
    state.update_primary_species_details_after_growth(dh_end)?;
    for i in state.end.indices() {
        if i == primary {
            continue;
        }
        let sp_si = state.end.site_indices[i];
        let sp_dh = state.end.dominant_heights[i];
        let sp_ytbh = state.end.years_to_breast_height[i];
        let sp_yabh = state.end.years_at_breast_height[i];
        if !sp_si.is_nan() && !sp_dh.is_nan() && !sp_ytbh.is_nan() && !sp_yabh.is_nan() {
            let sp_dh_delta = grow_dominant_height(
                store,
                bec.region,
                details.site_curve,
                sp_dh,
                sp_si,
                sp_ytbh,
            )?;
            state.end.dominant_heights[i] += sp_dh_delta;
        } else {
            state.end.dominant_heights[i] = f32::NAN;
        }
    }

    // (11) Decay the compatibility variables for the next period.
    compatibility::update_compatibility_variables_after_growth(state, &store.adjustments)?;

    // (12) Recompute the merchantable utilization components and volumes.
    utilization::compute_utilization_components_primary(store, settings, bec, state)?;

    // (13) Recompute the small-component yields.
    calculate_small_component_yields(store, settings, bec, state, fraction_available)?;

    Ok(())
}

/// Growth in dominant height over one year, following the species' site
/// curve. Past the curve's age limit, growth tapers along an exponential
/// extension and then stops.
pub fn grow_dominant_height(
    store: &CoefficientStore,
    region: Region,
    site_curve_number: u16,
    dominant_height_start: f32,
    site_index: f32,
    years_to_breast_height: f32,
) -> Result<f32> {
    if dominant_height_start <= 1.3 {
        return Err(ProjectionError::InvalidState(format!(
            "Dominant height {dominant_height_start} is out of range (must be above 1.3)"
        )));
    }

    let curve = store.site_curve(site_curve_number)?;

    let age_start = match curve.age_at_height(site_index, dominant_height_start) {
        Some(age) if age > 0.0 => age,
        _ => {
            if dominant_height_start > site_index {
                return Ok(0.0);
            }
            return Err(ProjectionError::SiteCurve(format!(
                "Curve {site_curve_number} has no breast-height age for height \
                 {dominant_height_start} at site index {site_index}"
            )));
        }
    };
    let mut age_end = age_start + 1.0;

    // The age limit is stored as a total age; convert to breast-height age.
    let age_limit = curve.age_maximum(region);
    let bh_age_limit = if age_limit > 0.0 {
        age_limit - years_to_breast_height
    } else {
        0.0
    };

    if age_start <= bh_age_limit || curve.extension_half_life <= 0.0 {
        let mut year_part = 1.0_f32;

        if curve.extension_half_life <= 0.0
            && bh_age_limit > 0.0
            && age_end > bh_age_limit
        {
            if age_start > bh_age_limit {
                return Ok(0.0);
            }
            year_part = bh_age_limit - age_start + 0.01;
            age_end = age_start + year_part;
        }

        // The age inversion allows small height errors; re-evaluate the
        // start height on the curve so the increment itself is right.
        let current_height = curve.height_at_age(site_index, age_start);
        let next_height = curve.height_at_age(site_index, age_end);
        if next_height < 0.0 {
            return Err(ProjectionError::SiteCurve(format!(
                "Curve {site_curve_number} returned height {next_height} at age {age_end}"
            )));
        }

        if next_height < current_height && year_part == 1.0 {
            if (current_height - next_height).abs() < 0.01 {
                return Ok(0.0);
            }
            return Err(ProjectionError::SiteCurve(format!(
                "New dominant height {next_height} is less than the current \
                 dominant height {current_height}"
            )));
        }

        Ok(next_height - current_height)
    } else {
        // Past the age limit: growth follows a decaying-rate extension of
        // the curve with half-life t1, cut off entirely at t2.
        let limit_height = curve.height_at_age(site_index, bh_age_limit);
        let rate =
            (curve.height_at_age(site_index, bh_age_limit + 1.0) - limit_height).max(0.0005);

        let a = 0.5_f32.ln() / curve.extension_half_life;

        let t = if dominant_height_start > limit_height {
            let term = 1.0 + (dominant_height_start - limit_height) * a / rate;
            if term <= 1.0e-7 {
                return Ok(0.0);
            }
            term.ln() / a
        } else {
            0.0
        };

        if t > curve.extension_cutoff {
            Ok(0.0)
        } else {
            Ok(rate / a * (-(a * t).exp() + (a * (t + 1.0)).exp()))
        }
    }
}

/// Growth in layer basal area over one year: the yield-curve difference
/// with a fiat convergence adjustment, optionally blended with or replaced
/// by the empirical regression model.
#[allow(clippy::too_many_arguments)]
pub fn grow_basal_area(
    store: &CoefficientStore,
    settings: &ControlSettings,
    bec: &BecZone,
    primary_species: &str,
    stratum: usize,
    species_mix: &[(&str, f32)],
    psp_yabh_start: f32,
    dh_start: f32,
    ba_start: f32,
    veteran_basal_area: f32,
    dh_delta: f32,
) -> Result<f32> {
    let (ba_upper_bound, _) = yields::upper_bounds(
        store,
        settings.per_species_upper_bounds,
        primary_species,
        stratum,
        bec,
    )?;

    let ba_yield_start = yields::basal_area_yield(
        store,
        bec,
        species_mix,
        psp_yabh_start,
        dh_start,
        veteran_basal_area,
        ba_upper_bound,
        true,
        settings.yield_age_cap(),
    )?;
    let ba_yield_end = yields::basal_area_yield(
        store,
        bec,
        species_mix,
        psp_yabh_start + 1.0,
        dh_start + dh_delta,
        veteran_basal_area,
        ba_upper_bound,
        true,
        settings.yield_age_cap(),
    )?;

    let fiat = store.basal_area_growth_fiat(bec.region)?;
    let convergence = fiat.calculate_coefficient(psp_yabh_start);

    let mut ba_growth = ba_yield_end - ba_yield_start - convergence * (ba_start - ba_yield_start);

    // A young stand far ahead of the yield curve keeps its own pace for a
    // while rather than converging.
    if psp_yabh_start < 40.0 && ba_start > 5.0 * ba_yield_start {
        ba_growth = (ba_yield_start / psp_yabh_start).min(0.5_f32.min(ba_growth));
    }

    match settings.basal_area_growth_model {
        GrowthModelKind::Fiat => {}
        GrowthModelKind::Empirical => {
            ba_growth = empirical_basal_area_growth(
                store,
                bec,
                species_mix,
                ba_start,
                psp_yabh_start,
                dh_start,
                ba_yield_start,
                ba_yield_end,
            )?;
        }
        GrowthModelKind::Mixed => {
            let empirical = empirical_basal_area_growth(
                store,
                bec,
                species_mix,
                ba_start,
                psp_yabh_start,
                dh_start,
                ba_yield_start,
                ba_yield_end,
            )?;
            let share = fiat.empirical_share(psp_yabh_start);
            ba_growth = share * empirical + (1.0 - share) * ba_growth;
        }
    }

    let ba_limit = (ba_upper_bound / EMPIRICAL_OCCUPANCY).max(ba_start);
    if ba_start + ba_growth > ba_limit {
        ba_growth = (ba_limit - ba_start).max(0.0);
    }

    // Keep a shrinking stand from dropping below 1 m²/ha.
    if ba_growth < 0.0 && ba_start + ba_growth < 1.0 {
        ba_growth = 1.0 - ba_start;
    }

    Ok(ba_growth)
}

/// The empirical basal-area growth regression. The height and age terms
/// come from the first genus row; the age-decay terms are weighted over
/// the layer's species mix.
#[allow(clippy::too_many_arguments)]
fn empirical_basal_area_growth(
    store: &CoefficientStore,
    bec: &BecZone,
    species_mix: &[(&str, f32)],
    ba_start: f32,
    psp_yabh_start: f32,
    dh_start: f32,
    ba_yield_start: f32,
    ba_yield_end: f32,
) -> Result<f32> {
    let age = psp_yabh_start.clamp(1.0, 999.0);

    let first = store.basal_area_growth_empirical(bec.alias, GENERA[0])?;
    let b0 = first[0];
    let b1 = first[1];
    let b2 = first[2];
    let b3 = first[3];
    let b6 = first[6];
    let b7 = first[7];

    let mut b4 = 0.0_f32;
    let mut b5 = 0.0_f32;
    for (alias, proportion) in species_mix {
        let row = store.basal_area_growth_empirical(bec.alias, alias)?;
        b4 += proportion * row[4];
        b5 += proportion * row[5];
    }
    b4 = b4.max(0.0);
    b5 = b5.min(0.0);

    let term1 = if dh_start > b0 {
        1.0 - (b1 * (dh_start - b0)).exp()
    } else {
        0.0
    };

    let logit = -0.05 * (age - 350.0);
    let term2a = logit.exp() / (1.0 + logit.exp());
    let term2 = b2 * (dh_start / 20.0).powf(b3) * term2a;
    let term3 = b4 * (b5 * age).exp();

    let yield_delta = ba_yield_end - ba_yield_start;
    let term4 = if yield_delta > 0.0 {
        b6 * yield_delta.powf(b7)
    } else {
        0.0
    };

    let mut ba_delta = term1 * (term2 + term3) + term4;
    if ba_delta < 0.0 && ba_start + ba_delta < 1.0 {
        ba_delta = 1.0 - ba_start;
    }
    Ok(ba_delta)
}

/// Growth in layer quadratic mean diameter over one year. The second
/// element of the result is true when the upper diameter limit cut the
/// growth short.
#[allow(clippy::too_many_arguments)]
pub fn grow_quad_mean_diameter(
    store: &CoefficientStore,
    settings: &ControlSettings,
    bec: &BecZone,
    primary_species: &str,
    stratum: usize,
    species_mix: &[(&str, f32)],
    psp_yabh_start: f32,
    ba_start: f32,
    dh_start: f32,
    dq_start: f32,
    dh_delta: f32,
) -> Result<(f32, bool)> {
    let (_, dq_upper_bound) = yields::upper_bounds(
        store,
        settings.per_species_upper_bounds,
        primary_species,
        stratum,
        bec,
    )?;
    let dq_limit = dq_upper_bound.max(dq_start);

    let dq_yield_start = yields::quad_mean_diameter_yield(
        store,
        bec,
        species_mix,
        psp_yabh_start,
        dh_start,
        dq_limit,
        settings.yield_age_cap(),
    )?;
    let dq_yield_end = yields::quad_mean_diameter_yield(
        store,
        bec,
        species_mix,
        psp_yabh_start + 1.0,
        dh_start + dh_delta,
        dq_limit,
        settings.yield_age_cap(),
    )?;
    let dq_yield_growth = dq_yield_end - dq_yield_start;

    let fiat = store.quad_mean_diameter_growth_fiat(bec.region)?;
    let fiat_growth = {
        let convergence = fiat.calculate_coefficient(psp_yabh_start);
        dq_yield_growth - convergence * (dq_start - dq_yield_start)
    };

    let mut dq_growth = match settings.quad_mean_diameter_growth_model {
        GrowthModelKind::Fiat => fiat_growth,
        GrowthModelKind::Empirical => empirical_quad_mean_diameter_growth(
            store,
            stratum,
            psp_yabh_start,
            dh_start,
            ba_start,
            dq_start,
            dh_delta,
            dq_yield_growth,
        )?,
        GrowthModelKind::Mixed => {
            let empirical = empirical_quad_mean_diameter_growth(
                store,
                stratum,
                psp_yabh_start,
                dh_start,
                ba_start,
                dq_start,
                dh_delta,
                dq_yield_growth,
            )?;
            let share = fiat.empirical_share(psp_yabh_start);
            share * empirical + (1.0 - share) * fiat_growth
        }
    };

    if dq_start + dq_growth < 7.6 {
        dq_growth = 7.6 - dq_start;
    }

    if dq_start + dq_growth > dq_limit - 0.001 {
        Ok(((dq_limit - dq_start).max(0.0), true))
    } else {
        Ok((dq_growth, false))
    }
}

/// The empirical quadratic-mean-diameter growth regression, clamped to the
/// stratum's growth limits.
#[allow(clippy::too_many_arguments)]
fn empirical_quad_mean_diameter_growth(
    store: &CoefficientStore,
    stratum: usize,
    psp_yabh_start: f32,
    dh_start: f32,
    ba_start: f32,
    dq_start: f32,
    dh_delta: f32,
    dq_yield_growth: f32,
) -> Result<f32> {
    let a = store.quad_mean_diameter_growth_empirical(stratum)?;
    let age = psp_yabh_start.max(1.0);

    let mut dq_delta = (a[0]
        + a[2] * age.ln()
        + a[3] * dq_start
        + a[4] * dh_start
        + a[5] * ba_start
        + a[6] * dh_delta)
        .exp()
        + a[1] * dq_yield_growth;
    dq_delta = dq_delta.max(0.0);

    let limits = store.quad_mean_diameter_growth_limits(stratum)?;
    let x = dq_start - 7.5;
    let xsq = x * x;
    let growth_min = (limits[0] + limits[1] * x + limits[2] * xsq / 100.0).max(limits[6]);
    let mut growth_max = (limits[3] + limits[4] * x + limits[5] * xsq / 100.0).min(limits[7]);
    growth_max = growth_max.max(growth_min);

    Ok(dq_delta.clamp(growth_min, growth_max))
}

/// Basal area growth of the primary species as a shift in its share of the
/// layer total, on the logit scale.
fn grow_primary_species_basal_area(
    store: &CoefficientStore,
    stratum: usize,
    ba_start: f32,
    ba_delta: f32,
    psp_ba_start: f32,
    lh_start: f32,
    psp_yabh_start: f32,
    psp_lh_start: f32,
) -> Result<f32> {
    let proportion_start = psp_ba_start / ba_start;
    if proportion_start > 0.999 {
        return Ok(ba_delta);
    }

    let mc = store.primary_basal_area_growth(stratum)?;
    let [a0, a1, a2] = mc.coefficients;

    let logit_start = (proportion_start / (1.0 - proportion_start)).ln();

    let logit_delta = match mc.model {
        3 => a0 + a1 * lh_start,
        8 => a0 + a1 * psp_yabh_start + a2 * psp_lh_start / lh_start,
        9 => a0 + a1 * logit_start + a2 * ba_start,
        other => {
            return Err(ProjectionError::InvalidState(format!(
                "Primary species basal area growth model {other} for stratum \
                 {stratum} is out of range"
            )))
        }
    };

    let x = (logit_start + logit_delta).exp();
    let proportion_end = x / (1.0 + x);
    Ok(proportion_end * (ba_start + ba_delta) - psp_ba_start)
}

/// Basal area growth of a non-primary species, also as a logit shift of
/// its share.
#[allow(clippy::too_many_arguments)]
fn grow_non_primary_species_basal_area(
    store: &CoefficientStore,
    species: &str,
    stratum: usize,
    ba_start: f32,
    ba_delta: f32,
    psp_lh_start: f32,
    sp_ba_start: f32,
    sp_dq_start: f32,
    sp_lh_start: f32,
) -> Result<f32> {
    if sp_ba_start <= 0.0 || sp_ba_start >= ba_start {
        return Err(ProjectionError::InvalidState(format!(
            "Species basal area {sp_ba_start} is out of range; it must be positive \
             and less than the layer basal area {ba_start}"
        )));
    }

    let [a0, a1, a2] = *store.non_primary_basal_area_growth(species, stratum)?;

    let proportion_start = sp_ba_start / ba_start;
    let logit_start = (proportion_start / (1.0 - proportion_start)).ln();
    let logit_delta = a0 + a1 * sp_dq_start.ln() + a2 * sp_lh_start / psp_lh_start;

    let logit_end = logit_start + logit_delta;
    let proportion_end = logit_end.exp() / (1.0 + logit_end.exp());

    Ok(proportion_end * (ba_start + ba_delta) - sp_ba_start)
}

/// Shared diameter-rate model behind the primary and non-primary species
/// QMD deltas: the species' diameter tracks the layer's as a ratio above
/// a fixed anchor.
fn species_quad_mean_diameter_delta(
    coefficients: &[f32; 3],
    dq_start: f32,
    dq_delta: f32,
    sp_dq_start: f32,
    lh_start: f32,
    sp_lh_start: f32,
) -> f32 {
    let [a0, a1, a2] = *coefficients;

    let rate_start = (sp_dq_start - DQ_RATE_BASE) / (dq_start - DQ_RATE_BASE);
    let log_rate_delta = a0 + a1 * sp_dq_start.ln() + a2 * sp_lh_start / lh_start;
    let rate_end = (rate_start.ln() + log_rate_delta).exp();

    let sp_dq_end = (rate_end * (dq_start + dq_delta - DQ_RATE_BASE) + DQ_RATE_BASE).max(7.51);
    sp_dq_end - sp_dq_start
}

/// Proportional disaggregation: every species keeps its share of the layer
/// and scales by the layer change rates.
pub fn grow_using_no_species_dynamics(bank: &mut Bank, ba_change_rate: f32, tph_change_rate: f32) {
    for i in bank.indices() {
        let sp_ba_start = bank.basal_areas[i].all();
        if sp_ba_start <= 0.0 {
            continue;
        }
        let sp_ba_end = sp_ba_start * (1.0 + ba_change_rate);
        let mut sp_tph_end = bank.trees_per_hectare[i].all() * tph_change_rate;
        let mut sp_dq_end = density::quad_mean_diameter(sp_ba_end, sp_tph_end);
        if sp_dq_end < 7.51 {
            sp_dq_end = 7.51;
            sp_tph_end = density::trees_per_hectare(sp_ba_end, sp_dq_end);
        }
        bank.basal_areas[i].set_all(sp_ba_end);
        bank.trees_per_hectare[i].set_all(sp_tph_end);
        bank.quad_mean_diameters[i].set_all(sp_dq_end);
    }
}

/// The staged bounded search needs a multi-species stand with movement in
/// both layer deltas; anything else reports no solution and the caller
/// falls back.
pub fn grow_using_partial_species_dynamics(
    n_species: usize,
    ba_delta: f32,
    dq_delta: f32,
) -> bool {
    if dq_delta == 0.0 || ba_delta == 0.0 || n_species == 1 {
        return false;
    }
    false
}

/// Full species dynamics: per-species logit models give first estimates of
/// the basal-area and diameter deltas, then two iterations reconcile them
/// with the layer totals.
#[allow(clippy::too_many_arguments)]
pub fn grow_using_full_species_dynamics(
    store: &CoefficientStore,
    bec: &BecZone,
    bank: &mut Bank,
    primary: usize,
    stratum: usize,
    ba_start: f32,
    ba_delta: f32,
    dq_start: f32,
    dq_delta: f32,
    tph_start: f32,
    lh_start: f32,
) -> Result<()> {
    let n = bank.n_species();
    let mut sp_ba_end = vec![f32::NAN; n + 1];
    let mut sp_tph_end = vec![f32::NAN; n + 1];
    let mut sp_dq_end = vec![f32::NAN; n + 1];
    let mut skip = vec![false; n + 1];

    let psp_lh_start = bank.lorey_heights[primary][1];
    let psp_yabh_start = bank.years_at_breast_height[primary];

    // First estimates of the species basal-area deltas.
    let mut sp_ba_delta = vec![0.0_f32; n + 1];
    let mut sum_sp_ba_delta = 0.0_f32;
    for i in bank.indices() {
        sp_ba_delta[i] = if i == primary {
            grow_primary_species_basal_area(
                store,
                stratum,
                ba_start,
                ba_delta,
                bank.basal_areas[i].all(),
                lh_start,
                psp_yabh_start,
                psp_lh_start,
            )?
        } else {
            grow_non_primary_species_basal_area(
                store,
                &bank.species_names[i],
                stratum,
                ba_start,
                ba_delta,
                psp_lh_start,
                bank.basal_areas[i].all(),
                bank.quad_mean_diameters[i].all(),
                bank.lorey_heights[i][1],
            )?
        };
        sum_sp_ba_delta += sp_ba_delta[i];
    }

    // Find f such that scaling every remaining species' delta by
    // (f * spBaStart) makes the deltas sum to the layer delta, dropping
    // species whose basal area would go negative.
    {
        let mut ba_base = ba_start;
        let mut pass_number = 0;

        loop {
            let f = (ba_delta - sum_sp_ba_delta) / ba_base;

            let mut n_skipped = 0;
            sum_sp_ba_delta = 0.0;

            for i in bank.indices() {
                if skip[i] {
                    continue;
                }
                let sp_ba_start = bank.basal_areas[i].all();
                sp_ba_end[i] = sp_ba_start + sp_ba_delta[i] + f * sp_ba_start;
                if sp_ba_end[i] < 0.0 {
                    sp_ba_end[i] = 0.0;
                    skip[i] = true;
                    n_skipped += 1;
                    sum_sp_ba_delta -= sp_ba_start;
                    ba_base -= sp_ba_start;
                } else {
                    sum_sp_ba_delta += sp_ba_end[i] - sp_ba_start;
                }
            }

            if n_skipped == 0 {
                break;
            }

            pass_number += 1;
            if pass_number > 5 || ba_base <= 0.0 {
                return Err(ProjectionError::NonConvergence(format!(
                    "Unable to converge on a basal area scalar in full species \
                     dynamics (baStart {ba_start}, baDelta {ba_delta}, dqStart \
                     {dq_start}, dqDelta {dq_delta}, tphStart {tph_start})"
                )));
            }
        }
    }

    // Search for a uniform diameter-delta offset f that brings the implied
    // layer QMD to the wanted value, respecting per-species size limits.
    {
        let mut pass_number = 0;
        let mut best_score = 1000.0_f32;
        let mut best_f = f32::NAN;
        let mut f = 0.0_f32;

        loop {
            let mut n_skipped = 0;
            let mut basal_area_skipped = 0.0_f32;

            for i in bank.indices() {
                let sp_dq_start = bank.quad_mean_diameters[i].all();
                let sp_lh_start = bank.lorey_heights[i][1];

                let mut sp_dq_delta = if i == primary {
                    let coe = store.primary_quad_mean_diameter_growth(stratum)?;
                    species_quad_mean_diameter_delta(
                        coe, dq_start, dq_delta, sp_dq_start, lh_start, sp_lh_start,
                    )
                } else {
                    let coe = store
                        .non_primary_quad_mean_diameter_growth(&bank.species_names[i], stratum)?;
                    species_quad_mean_diameter_delta(
                        coe, dq_start, dq_delta, sp_dq_start, lh_start, sp_lh_start,
                    )
                };
                sp_dq_delta += f;

                let limits = store.component_size_limits(&bank.species_names[i], bec.region)?;

                let sp_dq_maximum = limits
                    .quad_mean_diameter_maximum
                    .min(limits.max_quad_mean_diameter_lorey_height_ratio * sp_lh_start);
                if sp_dq_start + sp_dq_delta > sp_dq_maximum {
                    sp_dq_delta = 0.0_f32.min(sp_dq_maximum - sp_dq_start);
                    n_skipped += 1;
                    basal_area_skipped += bank.basal_areas[i].all();
                }

                let sp_dq_minimum =
                    7.6_f32.max(limits.min_quad_mean_diameter_lorey_height_ratio * sp_lh_start);
                if sp_dq_start + sp_dq_delta < sp_dq_minimum {
                    sp_dq_delta = sp_dq_minimum - sp_dq_start;
                    n_skipped += 1;
                    basal_area_skipped += bank.basal_areas[i].all();
                }

                sp_dq_end[i] = sp_dq_start + sp_dq_delta;
            }

            let mut tph = 0.0_f32;
            for i in bank.indices() {
                sp_tph_end[i] = if sp_ba_end[i] > 0.0 {
                    density::trees_per_hectare(sp_ba_end[i], sp_dq_end[i])
                } else {
                    0.0
                };
                tph += sp_tph_end[i];
            }

            if pass_number == 15 || (n_skipped == n && pass_number > 2) {
                break;
            }

            let dq_new_bar = density::quad_mean_diameter(ba_start + ba_delta, tph);
            let dq_want = density::quad_mean_diameter(ba_start, tph_start) + dq_delta;

            let mut score = (dq_want - dq_new_bar).abs();
            if score < best_score {
                best_score = score;
                best_f = f;
            }
            if score < 0.001 {
                break;
            }

            if basal_area_skipped > 0.7 {
                basal_area_skipped = 0.7 * ba_start;
            }
            score = score * ba_start / (ba_start - basal_area_skipped);
            f += score;

            pass_number += 1;
            if pass_number == 15 {
                f = best_f;
            }
        }
    }

    for i in bank.indices() {
        bank.basal_areas[i].set_all(sp_ba_end[i]);
        bank.trees_per_hectare[i].set_all(sp_tph_end[i]);
        if sp_ba_end[i] > 0.0 {
            bank.quad_mean_diameters[i]
                .set_all(density::quad_mean_diameter(sp_ba_end[i], sp_tph_end[i]));
        }
    }

    Ok(())
}

/// Carry every species' Lorey height across the growth period, holding the
/// ratio of its actual height to its estimated height.
#[allow(clippy::too_many_arguments)]
pub fn grow_lorey_heights(
    store: &CoefficientStore,
    bec: &BecZone,
    bank: &mut Bank,
    primary: usize,
    dh_start: f32,
    dh_end: f32,
    psp_tph_start: f32,
    psp_tph_end: f32,
    psp_lh_start: f32,
) -> Result<()> {
    let primary_alias = bank.species_names[primary].clone();

    let psp_lh_start_estimate =
        lorey::primary_lorey_height(store, &primary_alias, bec.region, dh_start, psp_tph_start)?;
    let psp_lh_end_estimate =
        lorey::primary_lorey_height(store, &primary_alias, bec.region, dh_end, psp_tph_end)?;

    let mut primary_ratio = (psp_lh_start - 1.3) / (psp_lh_start_estimate - 1.3);
    primary_ratio = 1.0 + (primary_ratio - 1.0) * store.adjustments.lorey_height_primary;

    let psp_lh_end = 1.3 + (psp_lh_end_estimate - 1.3) * primary_ratio;
    bank.lorey_heights[primary][1] = psp_lh_end;

    for i in bank.indices() {
        if i == primary || bank.basal_areas[i].all() <= 0.0 {
            continue;
        }
        let alias = bank.species_names[i].clone();
        let estimate_start = lorey::non_primary_lorey_height(
            store,
            &alias,
            &primary_alias,
            bec.region,
            dh_start,
            psp_lh_start,
        )?;
        let estimate_end = lorey::non_primary_lorey_height(
            store,
            &alias,
            &primary_alias,
            bec.region,
            dh_end,
            psp_lh_end,
        )?;

        let mut ratio = (bank.lorey_heights[i][1] - 1.3) / (estimate_start - 1.3);
        ratio = 1.0 + (ratio - 1.0) * store.adjustments.lorey_height_other;
        bank.lorey_heights[i][1] = 1.3 + (estimate_end - 1.3) * ratio;
    }

    // Layer Lorey height is the basal-area weighted mean of the species.
    let mut weighted = 0.0_f32;
    let mut ba_sum = 0.0_f32;
    for i in bank.indices() {
        weighted += bank.basal_areas[i].all() * bank.lorey_heights[i][1];
        ba_sum += bank.basal_areas[i].all();
    }
    if ba_sum > 0.0 {
        bank.lorey_heights[0][1] = weighted / ba_sum;
    }

    Ok(())
}

/// Recompute the small-component (under 7.5 cm) utilization values for
/// every species and the layer, applying the small compatibility variables
/// when configured.
pub fn calculate_small_component_yields(
    store: &CoefficientStore,
    settings: &ControlSettings,
    bec: &BecZone,
    state: &mut LayerState,
    fraction_available: f32,
) -> Result<()> {
    use crate::config::CompatibilityVariableApplication as CvApply;

    let cvs = state.compatibility_variables()?.to_vec();
    let psp_yabh = state.primary_species_details()?.years_at_breast_height;
    let bank = &mut state.end;

    let mut lh_sum = 0.0_f32;
    let mut ba_sum = 0.0_f32;
    let mut tph_sum = 0.0_f32;
    let mut ws_volume_sum = 0.0_f32;

    for i in bank.indices() {
        let alias = bank.species_names[i].clone();
        let sp_lh_all = bank.lorey_heights[i][1];
        let mut sp_ba_all = bank.basal_areas[i].all();
        let sp_dq_all = bank.quad_mean_diameters[i].all();
        let probability =
            small::small_component_probability(store, &alias, bec.region, psp_yabh, sp_lh_all)?;

        // The regression runs on actual (not fully-occupied) basal areas.
        if fraction_available > 0.0 {
            sp_ba_all *= fraction_available;
        }
        let mut conditional_ba =
            small::conditional_small_basal_area(store, &alias, sp_ba_all, sp_lh_all)?;
        if fraction_available > 0.0 {
            conditional_ba /= fraction_available;
        }

        let mut sp_ba_small = probability * conditional_ba;
        let mut sp_dq_small = small::small_quad_mean_diameter(store, &alias, sp_lh_all)?;
        let mut sp_lh_small =
            small::small_lorey_height(store, &alias, sp_lh_all, sp_dq_small, sp_dq_all)?;
        let mut mean_volume =
            small::mean_volume_small(store, &alias, sp_dq_small, sp_lh_small)?;

        if settings.compatibility_variables != CvApply::None {
            let cv = &cvs[i];
            sp_ba_small = (sp_ba_small + cv.small_basal_area).max(0.0);
            sp_dq_small = (sp_dq_small + cv.small_quad_mean_diameter).clamp(4.01, 7.49);
            sp_lh_small = 1.3 + (sp_lh_small - 1.3) * cv.small_lorey_height.exp();
            if settings.compatibility_variables == CvApply::All && mean_volume > 0.0 {
                mean_volume *= cv.small_whole_stem_volume.exp();
            }
        }

        let sp_tph_small = density::trees_per_hectare(sp_ba_small, sp_dq_small);
        let sp_ws_volume_small = sp_tph_small * mean_volume;

        bank.lorey_heights[i][0] = sp_lh_small;
        bank.basal_areas[i].set(UtilizationClass::Small, sp_ba_small);
        bank.trees_per_hectare[i].set(UtilizationClass::Small, sp_tph_small);
        bank.quad_mean_diameters[i].set(UtilizationClass::Small, sp_dq_small);
        bank.whole_stem_volumes[i].set(UtilizationClass::Small, sp_ws_volume_small);
        bank.close_utilization_volumes[i].set(UtilizationClass::Small, 0.0);
        bank.cu_volumes_minus_decay[i].set(UtilizationClass::Small, 0.0);
        bank.cu_volumes_minus_decay_and_wastage[i].set(UtilizationClass::Small, 0.0);

        lh_sum += sp_ba_small * sp_dq_small;
        ba_sum += sp_ba_small;
        tph_sum += sp_tph_small;
        ws_volume_sum += sp_ws_volume_small;
    }

    bank.lorey_heights[0][0] = if ba_sum > 0.0 { lh_sum / ba_sum } else { 0.0 };
    bank.basal_areas[0].set(UtilizationClass::Small, ba_sum);
    bank.trees_per_hectare[0].set(UtilizationClass::Small, tph_sum);
    bank.quad_mean_diameters[0]
        .set(UtilizationClass::Small, density::quad_mean_diameter(ba_sum, tph_sum));
    bank.whole_stem_volumes[0].set(UtilizationClass::Small, ws_volume_sum);
    bank.close_utilization_volumes[0].set(UtilizationClass::Small, 0.0);
    bank.cu_volumes_minus_decay[0].set(UtilizationClass::Small, 0.0);
    bank.cu_volumes_minus_decay_and_wastage[0].set(UtilizationClass::Small, 0.0);

    Ok(())
}
