/// Piecewise-linear convergence schedule for the fiat growth models.
///
/// Four (age, coefficient) knots define how strongly projected values are
/// pulled back toward the yield curves as a stand ages; the value is held
/// constant outside the knot range. The mixed-model coefficients describe
/// the blend between the fiat and empirical deltas.
#[derive(Debug, Clone, PartialEq)]
pub struct GrowthFiatDetails {
    pub ages: [f32; 4],
    pub coefficients: [f32; 4],
    pub mixed_coefficients: [f32; 3],
}

impl GrowthFiatDetails {
    /// Interpolate the convergence coefficient at `age`.
    pub fn calculate_coefficient(&self, age: f32) -> f32 {
        if age <= self.ages[0] {
            return self.coefficients[0];
        }
        for k in 1..4 {
            if age <= self.ages[k] {
                let span = self.ages[k] - self.ages[k - 1];
                if span <= 0.0 {
                    return self.coefficients[k];
                }
                let t = (age - self.ages[k - 1]) / span;
                return self.coefficients[k - 1]
                    + t * (self.coefficients[k] - self.coefficients[k - 1]);
            }
        }
        self.coefficients[3]
    }

    /// Share of the empirical delta in a mixed-model blend at `age`.
    ///
    /// Fully empirical below the first threshold, fully fiat above the
    /// second, with a power-curve ramp in between.
    pub fn empirical_share(&self, age: f32) -> f32 {
        let [m0, m1, m2] = self.mixed_coefficients;
        if age <= m0 {
            1.0
        } else if age >= m1 {
            0.0
        } else {
            1.0 - ((age - m0) / (m1 - m0)).powf(m2)
        }
    }
}
