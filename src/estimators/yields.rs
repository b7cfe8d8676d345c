//! Layer-level yield curves: expected basal area and quadratic mean
//! diameter for a stand of a given age, height, and species mix.

use crate::coefficients::CoefficientStore;
use crate::error::{ProjectionError, Result};
use crate::models::BecZone;

/// Yield tables are fitted at 85% stocking.
pub const EMPIRICAL_OCCUPANCY: f32 = 0.85;

/// Species-proportion weighted coefficient row for the basal area yield
/// table. The linear height term is clamped non-positive.
fn weighted_basal_area_coefficients(
    store: &CoefficientStore,
    bec: &BecZone,
    species: &[(&str, f32)],
) -> Result<[f32; 7]> {
    let mut coe = [0.0_f32; 7];
    for (alias, proportion) in species {
        let row = store.basal_area_yield(bec.alias, alias)?;
        for (c, r) in coe.iter_mut().zip(row.iter()) {
            *c += proportion * r;
        }
    }
    coe[5] = coe[5].min(0.0);
    Ok(coe)
}

fn weighted_diameter_coefficients(
    store: &CoefficientStore,
    bec: &BecZone,
    species: &[(&str, f32)],
) -> Result<[f32; 5]> {
    let mut coe = [0.0_f32; 5];
    for (alias, proportion) in species {
        let row = store.quad_mean_diameter_yield(bec.decay_alias, alias)?;
        for (c, r) in coe.iter_mut().zip(row.iter()) {
            *c += proportion * r;
        }
    }
    Ok(coe)
}

/// Expected basal area (m²/ha) at a breast-height age and dominant height.
///
/// `species` pairs aliases with their basal-area proportions, which must
/// sum to one. `veteran_basal_area` is zero for stands without an overstory.
#[allow(clippy::too_many_arguments)]
pub fn basal_area_yield(
    store: &CoefficientStore,
    bec: &BecZone,
    species: &[(&str, f32)],
    breast_height_age: f32,
    dominant_height: f32,
    veteran_basal_area: f32,
    upper_bound: f32,
    full_occupancy: bool,
    age_cap: Option<f32>,
) -> Result<f32> {
    let coe = weighted_basal_area_coefficients(store, bec, species)?;

    let mut age = breast_height_age;
    if let Some(cap) = age_cap {
        age = age.min(cap);
    }
    if age <= 0.0 {
        return Err(ProjectionError::InvalidState(format!(
            "Breast height age {age} must be positive for a basal area yield"
        )));
    }

    let a00 = (coe[0] + coe[1] * age.ln()).max(0.0);
    let ap = (coe[3] + coe[4] * age.ln()).max(0.0);

    let mut yield_ba = if dominant_height <= coe[2] {
        0.0
    } else {
        a00 * (dominant_height - coe[2]).powf(ap)
            * (coe[5] * dominant_height + coe[6] * veteran_basal_area).exp()
    };
    yield_ba = yield_ba.min(upper_bound);
    if full_occupancy {
        yield_ba /= EMPIRICAL_OCCUPANCY;
    }
    Ok(yield_ba)
}

/// Expected quadratic mean diameter (cm) at a breast-height age and
/// dominant height, clamped to `[7.6, upper_bound]`.
pub fn quad_mean_diameter_yield(
    store: &CoefficientStore,
    bec: &BecZone,
    species: &[(&str, f32)],
    breast_height_age: f32,
    dominant_height: f32,
    upper_bound: f32,
    age_cap: Option<f32>,
) -> Result<f32> {
    if dominant_height <= 5.0 {
        return Ok(7.6);
    }

    let mut age = breast_height_age;
    if let Some(cap) = age_cap {
        age = age.min(cap);
    }
    if age <= 0.0 {
        return Err(ProjectionError::InvalidState(format!(
            "Breast height age {age} must be positive for a diameter yield"
        )));
    }

    let coe = weighted_diameter_coefficients(store, bec, species)?;
    let c1 = (coe[1] + coe[2] * age.ln()).max(0.0);
    let c2 = (coe[3] + coe[4] * age.ln()).max(0.0);

    let dq = coe[0] + c1 * (dominant_height - 5.0).powf(c2);
    Ok(dq.clamp(7.6, upper_bound))
}

/// Basal area and diameter ceilings for a layer, either per stratum or
/// per primary species.
pub fn upper_bounds(
    store: &CoefficientStore,
    per_species: bool,
    primary_species: &str,
    stratum: usize,
    bec: &BecZone,
) -> Result<(f32, f32)> {
    if per_species {
        store.upper_bounds_by_species(primary_species, bec.region)
    } else {
        store.upper_bounds_by_group(stratum)
    }
}
