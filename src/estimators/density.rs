//! Conversions between basal area, stem density, and quadratic mean
//! diameter. `ba = PI_40K * dq^2 * tph` ties the three together.

/// Basal area in m² of a 1 cm diameter circle, times 10 000 stems.
pub const PI_40K: f32 = std::f32::consts::PI / 40_000.0;

/// Stems per hectare implied by a basal area and quadratic mean diameter.
/// Zero when either input is not positive.
pub fn trees_per_hectare(basal_area: f32, quad_mean_diameter: f32) -> f32 {
    if basal_area <= 0.0 || quad_mean_diameter <= 0.0 {
        return 0.0;
    }
    basal_area / PI_40K / (quad_mean_diameter * quad_mean_diameter)
}

/// Quadratic mean diameter implied by a basal area and stem density.
/// Zero for non-positive, NaN, or absurdly large inputs.
pub fn quad_mean_diameter(basal_area: f32, trees_per_hectare: f32) -> f32 {
    if basal_area.is_nan() || trees_per_hectare.is_nan() {
        return 0.0;
    }
    if basal_area > 1.0e6 || trees_per_hectare > 1.0e6 {
        return 0.0;
    }
    if basal_area <= 0.0 || trees_per_hectare <= 0.0 {
        return 0.0;
    }
    (basal_area / trees_per_hectare / PI_40K).sqrt()
}

/// Basal area implied by a quadratic mean diameter and stem density.
pub fn basal_area(quad_mean_diameter: f32, trees_per_hectare: f32) -> f32 {
    if quad_mean_diameter > 0.0 && trees_per_hectare > 0.0 {
        quad_mean_diameter * quad_mean_diameter * PI_40K * trees_per_hectare
    } else {
        0.0
    }
}
