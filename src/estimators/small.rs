//! Estimators for the sub-merchantable (under 7.5 cm) component.

use crate::coefficients::CoefficientStore;
use crate::error::Result;
use crate::models::Region;

/// Probability that a species carries any sub-merchantable basal area.
pub fn small_component_probability(
    store: &CoefficientStore,
    species: &str,
    region: Region,
    years_at_breast_height: f32,
    lorey_height: f32,
) -> Result<f32> {
    let a = store.small_probability(species)?;
    let coastal = if region == Region::Coastal { a[1] } else { 0.0 };
    let logit = a[0] + coastal + a[2] * years_at_breast_height + a[3] * lorey_height;
    Ok(logit.exp() / (1.0 + logit.exp()))
}

/// Expected small basal area, conditional on it being present.
///
/// The regional multiplier slot is kept but forced to zero, matching the
/// behavior the projection has always had.
pub fn conditional_small_basal_area(
    store: &CoefficientStore,
    species: &str,
    basal_area: f32,
    lorey_height: f32,
) -> Result<f32> {
    let a = store.small_basal_area(species)?;
    let region_multiplier = 0.0;
    let ba = (a[0] + a[1] * region_multiplier + a[2] * basal_area) * (a[3] * lorey_height).exp();
    Ok(ba.max(0.0))
}

/// Quadratic mean diameter of the small component, in (4.0, 7.5).
pub fn small_quad_mean_diameter(
    store: &CoefficientStore,
    species: &str,
    lorey_height: f32,
) -> Result<f32> {
    let a = store.small_quad_mean_diameter(species)?;
    let logit = a[0] + a[1] * lorey_height;
    Ok(4.0 + 3.5 * logit.exp() / (1.0 + logit.exp()))
}

/// Lorey height of the small component, scaled down from the species'
/// merchantable Lorey height by the diameter gap.
pub fn small_lorey_height(
    store: &CoefficientStore,
    species: &str,
    lorey_height_all: f32,
    small_quad_mean_diameter: f32,
    quad_mean_diameter_all: f32,
) -> Result<f32> {
    let a = store.small_lorey_height(species)?;
    Ok(1.3
        + (lorey_height_all - 1.3)
            * (a[0] * (small_quad_mean_diameter.powf(a[1]) - quad_mean_diameter_all.powf(a[1])))
                .exp())
}

/// Mean whole-stem volume (m³) of one small-component tree.
pub fn mean_volume_small(
    store: &CoefficientStore,
    species: &str,
    small_quad_mean_diameter: f32,
    small_lorey_height: f32,
) -> Result<f32> {
    let a = store.small_whole_stem_volume(species)?;
    Ok((a[0]
        + a[1] * small_quad_mean_diameter.ln()
        + a[2] * small_lorey_height.ln()
        + a[3] * small_quad_mean_diameter)
        .exp())
}
