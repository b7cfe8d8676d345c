//! Allocation of the stand quadratic mean diameter to one species.
//!
//! Splits the stand's stems between a target species and the rest so the
//! target's diameter reflects its height standing relative to the others,
//! then keeps the result inside the species' size limits.

use crate::coefficients::CoefficientStore;
use crate::error::{ProjectionError, Result};
use crate::models::Region;

use super::density;

/// Basal area in m² of a single 7.5 cm tree.
const SINGLE_TREE_BASAL_AREA: f32 = 0.004_417_864_67;

/// Estimate the quadratic mean diameter of one species within a stand.
///
/// `others` lists the remaining species with their basal-area fractions.
/// Returns the stand diameter unchanged for a (nearly) pure stand or a
/// stand already below the merchantable diameter.
#[allow(clippy::too_many_arguments)]
pub fn species_quad_mean_diameter(
    store: &CoefficientStore,
    region: Region,
    species: &str,
    species_fraction: f32,
    species_lorey_height: f32,
    species_basal_area: f32,
    others: &[(&str, f32)],
    stand_quad_mean_diameter: f32,
    stand_basal_area: f32,
    stand_trees_per_hectare: f32,
    stand_lorey_height: f32,
) -> Result<f32> {
    let min_diameter = 7.6_f32.min(stand_quad_mean_diameter);
    if species_fraction >= 1.0 || stand_quad_mean_diameter < min_diameter {
        return Ok(stand_quad_mean_diameter);
    }
    let fraction_other = 1.0 - species_fraction;

    // Relation coefficients: the target's row less the fraction-weighted
    // rows of everything else.
    let mut a = *store.species_quad_mean_diameter(species)?;
    for (alias, fraction) in others {
        let row = store.species_quad_mean_diameter(alias)?;
        for (c, r) in a.iter_mut().zip(row.iter()) {
            *c -= fraction / fraction_other * r;
        }
    }

    let height_target = species_lorey_height.max(4.0);
    let height_other =
        (stand_lorey_height - species_lorey_height * species_fraction) / fraction_other;
    let height_ratio = ((height_target - 3.0) / (height_other - 3.0)).clamp(0.05, 20.0);
    let r = (a[0] + a[1] * height_ratio.ln() + a[2] * stand_quad_mean_diameter.ln()).exp();

    // Solve for the target's stem count: both groups share the stand's
    // stems and basal area, with `r` the ratio of their mean tree sizes.
    let basal_area_other = stand_basal_area - species_basal_area;
    let aa = (r - 1.0) * SINGLE_TREE_BASAL_AREA;
    let bb = SINGLE_TREE_BASAL_AREA * (1.0 - r) * stand_trees_per_hectare
        + species_basal_area
        + basal_area_other * r;
    let cc = -species_basal_area * stand_trees_per_hectare;

    let species_tph = if aa.abs() < 1.0e-8 {
        -cc / bb
    } else {
        let discriminant = bb * bb - 4.0 * aa * cc;
        if discriminant <= 0.0 {
            return Err(ProjectionError::NonConvergence(format!(
                "No real stem split for species {species}"
            )));
        }
        let root = discriminant.sqrt();
        let candidate_a = (-bb + root) / (2.0 * aa);
        let candidate_b = (-bb - root) / (2.0 * aa);
        if candidate_a > 0.0 && candidate_a < stand_trees_per_hectare {
            candidate_a
        } else if candidate_b > 0.0 && candidate_b < stand_trees_per_hectare {
            candidate_b
        } else {
            return Err(ProjectionError::NonConvergence(format!(
                "Stem split for species {species} fell outside the stand"
            )));
        }
    };

    let diameter = density::quad_mean_diameter(species_basal_area, species_tph);

    let limits = store.component_size_limits(species, region)?;
    let lower = min_diameter
        .max(limits.min_quad_mean_diameter_lorey_height_ratio * species_lorey_height);
    let upper = 7.6_f32
        .max(limits.diameter_maximum(species_lorey_height))
        .max(lower);
    Ok(diameter.clamp(lower, upper))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coefficients::with_defaults;

    #[test]
    fn test_pure_stand_keeps_stand_diameter() {
        let store = with_defaults();
        let dq = species_quad_mean_diameter(
            &store, Region::Interior, "PL", 1.0, 22.0, 40.0, &[], 25.0, 40.0, 815.0, 22.0,
        )
        .unwrap();
        assert_eq!(dq, 25.0);
    }

    #[test]
    fn test_mixed_stand_diameter_is_merchantable() {
        let store = with_defaults();
        let dq = species_quad_mean_diameter(
            &store,
            Region::Interior,
            "F",
            0.7,
            23.0,
            28.0,
            &[("S", 0.3)],
            25.0,
            40.0,
            815.0,
            22.0,
        )
        .unwrap();
        assert!(dq >= 7.6, "diameter {dq} below merchantable floor");
        assert!(dq < 60.0, "diameter {dq} implausibly large");
    }

    #[test]
    fn test_taller_species_gets_larger_diameter() {
        let store = with_defaults();
        let tall = species_quad_mean_diameter(
            &store, Region::Interior, "F", 0.5, 26.0, 20.0, &[("S", 0.5)], 25.0, 40.0, 815.0,
            22.0,
        )
        .unwrap();
        let short = species_quad_mean_diameter(
            &store, Region::Interior, "F", 0.5, 16.0, 20.0, &[("S", 0.5)], 25.0, 40.0, 815.0,
            22.0,
        )
        .unwrap();
        assert!(tall >= short, "tall {tall} should not be below short {short}");
    }
}
