//! Lorey height estimation from dominant height.

use crate::coefficients::CoefficientStore;
use crate::error::{ProjectionError, Result};
use crate::models::Region;

/// Lorey height of the primary species from dominant height and its stem
/// density. Dense stands pull the mean height further below the dominant.
pub fn primary_lorey_height(
    store: &CoefficientStore,
    primary_species: &str,
    region: Region,
    dominant_height: f32,
    primary_trees_per_hectare: f32,
) -> Result<f32> {
    let a = store.primary_lorey_height(primary_species, region)?;
    let height_multiplier =
        a[0] - a[1] + a[1] * (a[2] * (primary_trees_per_hectare - 100.0)).exp();
    Ok(1.3 + (dominant_height - 1.3) * height_multiplier)
}

/// Lorey height of a non-primary species, related either to the layer
/// dominant height or to the primary species' Lorey height.
pub fn non_primary_lorey_height(
    store: &CoefficientStore,
    species: &str,
    primary_species: &str,
    region: Region,
    dominant_height: f32,
    primary_lorey_height: f32,
) -> Result<f32> {
    let coe = store.non_primary_lorey_height(species, primary_species, region);
    let [a0, a1] = coe.coefficients;
    match coe.equation_index {
        1 => Ok(1.3 + a0 * (dominant_height - 1.3).powf(a1)),
        2 => Ok(1.3 + a0 * (primary_lorey_height - 1.3).powf(a1)),
        other => Err(ProjectionError::InvalidState(format!(
            "Unknown non-primary Lorey height equation {other} for {species}"
        ))),
    }
}
