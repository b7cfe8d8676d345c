/// Per-species bounds on the quadratic mean diameter relative to height.
///
/// Diameters are kept within `[min_ratio, max_ratio]` times the species
/// Lorey height, with `quad_mean_diameter_maximum` as an absolute ceiling.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ComponentSizeLimits {
    pub lorey_height_maximum: f32,
    pub quad_mean_diameter_maximum: f32,
    pub min_quad_mean_diameter_lorey_height_ratio: f32,
    pub max_quad_mean_diameter_lorey_height_ratio: f32,
}

impl ComponentSizeLimits {
    /// Upper diameter bound for a species with Lorey height `lorey_height`.
    pub fn diameter_maximum(&self, lorey_height: f32) -> f32 {
        self.quad_mean_diameter_maximum
            .min(self.max_quad_mean_diameter_lorey_height_ratio * lorey_height)
    }

    /// Lower diameter bound, never below the 7.6 cm merchantable floor.
    pub fn diameter_minimum(&self, lorey_height: f32) -> f32 {
        7.6_f32.max(self.min_quad_mean_diameter_lorey_height_ratio * lorey_height)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_approx_eq::assert_approx_eq;

    #[test]
    fn test_diameter_bounds() {
        let limits = ComponentSizeLimits {
            lorey_height_maximum: 55.0,
            quad_mean_diameter_maximum: 80.0,
            min_quad_mean_diameter_lorey_height_ratio: 0.3,
            max_quad_mean_diameter_lorey_height_ratio: 2.5,
        };
        assert_approx_eq!(limits.diameter_maximum(20.0), 50.0, 1e-4);
        assert_approx_eq!(limits.diameter_maximum(40.0), 80.0, 1e-4);
        assert_approx_eq!(limits.diameter_minimum(10.0), 7.6, 1e-4);
        assert_approx_eq!(limits.diameter_minimum(30.0), 9.0, 1e-4);
    }
}
