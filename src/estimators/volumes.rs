//! Per-species stem volume estimation, stepping down from whole stem to
//! close utilization, then net of decay, then net of decay and waste.

use crate::coefficients::CoefficientStore;
use crate::error::{ProjectionError, Result};
use crate::models::{Region, UtilizationClass, UtilizationVector};

/// Clamped logistic: 0 below `-radius`, 1 above `radius`.
fn clamped_ratio(arg: f32, radius: f32) -> f32 {
    if arg < -radius {
        0.0
    } else if arg > radius {
        1.0
    } else {
        arg.exp() / (1.0 + arg.exp())
    }
}

/// Bands to process for a given target class: all of them for `All`,
/// otherwise just the target.
fn active(target: UtilizationClass, uc: UtilizationClass) -> bool {
    target == UtilizationClass::All || target == uc
}

/// Mean whole-stem volume of a single tree (m³).
pub fn whole_stem_volume_per_tree(
    store: &CoefficientStore,
    volume_group: u16,
    lorey_height: f32,
    quad_mean_diameter: f32,
) -> Result<f32> {
    let c = store.whole_stem_volume(volume_group)?;
    let log_mean_volume = c[0]
        + c[1] * quad_mean_diameter.ln()
        + c[2] * lorey_height.ln()
        + c[3] * quad_mean_diameter
        + c[4] / quad_mean_diameter
        + c[5] * lorey_height
        + c[6] * quad_mean_diameter * quad_mean_diameter
        + c[7] * lorey_height * quad_mean_diameter
        + c[8] * lorey_height / quad_mean_diameter;
    Ok(log_mean_volume.exp())
}

/// Distribute the whole-stem volume over the diameter bands from their
/// basal areas. In `All` mode the bands are then scaled to match the
/// aggregate slot.
#[allow(clippy::too_many_arguments)]
pub fn whole_stem_volume(
    store: &CoefficientStore,
    target: UtilizationClass,
    adjust_close_util: f32,
    volume_group: u16,
    lorey_height: f32,
    quad_mean_diameters: &UtilizationVector,
    basal_areas: &UtilizationVector,
    whole_stem_volumes: &mut UtilizationVector,
) -> Result<()> {
    let dq_all = quad_mean_diameters.all();

    for (band, uc) in UtilizationClass::BANDS.into_iter().enumerate() {
        let ba = basal_areas.get(uc);
        if ba < 0.0 {
            whole_stem_volumes.set(uc, 0.0);
            continue;
        }
        if !active(target, uc) {
            continue;
        }
        let a = store.whole_stem_utilization(band, volume_group)?;
        let mut arg = a[0]
            + a[1] * lorey_height.ln()
            + a[2] * quad_mean_diameters.get(uc).ln()
            + if uc != UtilizationClass::Over225 {
                a[3] * dq_all.ln()
            } else {
                a[3] * dq_all
            };
        if uc == target {
            arg += adjust_close_util;
        }
        whole_stem_volumes.set(uc, ba * arg.exp());
    }

    if target == UtilizationClass::All {
        whole_stem_volumes
            .normalize_bands()
            .map_err(ProjectionError::InvalidState)?;
    }
    Ok(())
}

/// Close-utilization volume from whole-stem volume.
#[allow(clippy::too_many_arguments)]
pub fn close_utilization_volume(
    store: &CoefficientStore,
    target: UtilizationClass,
    adjust: &UtilizationVector,
    volume_group: u16,
    lorey_height: f32,
    quad_mean_diameters: &UtilizationVector,
    whole_stem_volumes: &UtilizationVector,
    close_utilization_volumes: &mut UtilizationVector,
) -> Result<()> {
    for (band, uc) in UtilizationClass::BANDS.into_iter().enumerate() {
        if !active(target, uc) {
            continue;
        }
        let a = store.close_utilization(band, volume_group)?;
        let arg =
            a[0] + a[1] * quad_mean_diameters.get(uc) + a[2] * lorey_height + adjust.get(uc);
        let ratio = clamped_ratio(arg, 7.0);
        close_utilization_volumes.set(uc, whole_stem_volumes.get(uc) * ratio);
    }

    if target == UtilizationClass::All {
        close_utilization_volumes.store_band_sum();
    }
    Ok(())
}

/// Volume net of decay from close-utilization volume.
#[allow(clippy::too_many_arguments)]
pub fn net_decay_volume(
    store: &CoefficientStore,
    genus: &str,
    region: Region,
    target: UtilizationClass,
    adjust: &UtilizationVector,
    decay_group: u16,
    age_at_breast_height: f32,
    quad_mean_diameters: &UtilizationVector,
    close_utilization_volumes: &UtilizationVector,
    net_decay_volumes: &mut UtilizationVector,
) -> Result<()> {
    let dq_all = quad_mean_diameters.all();
    let age_term = 20.0_f32.max(age_at_breast_height).ln();

    for (band, uc) in UtilizationClass::BANDS.into_iter().enumerate() {
        if !active(target, uc) {
            continue;
        }
        let a = store.net_decay(band, decay_group)?;
        let diameter = if uc != UtilizationClass::Over225 {
            dq_all
        } else {
            quad_mean_diameters.get(uc)
        };
        let arg = a[0] + a[1] * diameter.ln() + a[2] * age_term
            + adjust.get(uc)
            + store.decay_modifier(genus, region);
        let ratio = clamped_ratio(arg, 8.0);
        net_decay_volumes.set(uc, close_utilization_volumes.get(uc) * ratio);
    }

    if target == UtilizationClass::All {
        net_decay_volumes.store_band_sum();
    }
    Ok(())
}

/// Volume net of decay and waste from the two volumes above it.
#[allow(clippy::too_many_arguments)]
pub fn net_decay_and_waste_volume(
    store: &CoefficientStore,
    genus: &str,
    region: Region,
    target: UtilizationClass,
    adjust: &UtilizationVector,
    lorey_height: f32,
    quad_mean_diameters: &UtilizationVector,
    close_utilization_volumes: &UtilizationVector,
    net_decay_volumes: &UtilizationVector,
    net_decay_waste_volumes: &mut UtilizationVector,
) -> Result<()> {
    for uc in UtilizationClass::BANDS {
        if !active(target, uc) {
            continue;
        }
        let net_decay = net_decay_volumes.get(uc);
        if net_decay.is_nan() || net_decay <= 0.0 {
            net_decay_waste_volumes.set(uc, 0.0);
            continue;
        }
        let coe = store.net_decay_waste(genus)?;
        let [mut a0, a1, a2, a3, a4, a5] = *coe;
        if uc == UtilizationClass::Over225 {
            a0 += a5;
        }

        let close_util = close_utilization_volumes.get(uc);
        let decay_fraction = 1.0 - net_decay / close_util;

        let mut arg = a0
            + a1 * decay_fraction
            + a3 * quad_mean_diameters.get(uc).ln()
            + a4 * lorey_height.ln();
        arg += store.waste_modifier(genus, region);
        arg = arg.clamp(-10.0, 10.0);

        let mut waste_fraction =
            (1.0 - (a2 * decay_fraction).exp()) * arg.exp() / (1.0 + arg.exp()) * (1.0 - decay_fraction);
        waste_fraction = waste_fraction.min(decay_fraction);

        let mut result = close_util * (1.0 - decay_fraction - waste_fraction);

        // Post-hoc logit adjustment; applied after the waste clamp.
        if adjust.get(uc) != 0.0 {
            let ratio = result / net_decay;
            if ratio > 0.0 && ratio < 1.0 {
                let mut logit = (ratio / (1.0 - ratio)).ln() + adjust.get(uc);
                logit = logit.clamp(-10.0, 10.0);
                result = logit.exp() / (1.0 + logit.exp()) * net_decay;
            }
        }
        net_decay_waste_volumes.set(uc, result);
    }

    if target == UtilizationClass::All {
        net_decay_waste_volumes.store_band_sum();
    }
    Ok(())
}
