use crate::models::Region;

/// An invertible height-age curve in a Chapman-Richards family.
///
/// Height above breast height follows `(1 - exp(-k * age))^p`, anchored so
/// that height equals the site index at breast-height age 50. The closed
/// form inverts exactly, which the height-growth step relies on to recover
/// breast-height age from a measured dominant height.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SiteCurve {
    pub number: u16,
    pub shape_k: f32,
    pub shape_p: f32,
    /// Years-to-breast-height model `b0 + b1 / site_index`.
    pub ytbh_b0: f32,
    pub ytbh_b1: f32,
    pub age_maximum_coastal: f32,
    pub age_maximum_interior: f32,
    /// Half-life of the growth-rate decay used past the curve's age limit.
    /// Non-positive disables the extension.
    pub extension_half_life: f32,
    /// Years after the age limit at which extended growth is cut to zero.
    pub extension_cutoff: f32,
}

impl SiteCurve {
    fn shape(&self, age: f32) -> f32 {
        if age <= 0.0 {
            return 0.0;
        }
        (1.0 - (-self.shape_k * age).exp()).powf(self.shape_p)
    }

    fn anchor(&self) -> f32 {
        self.shape(50.0)
    }

    /// Dominant height at breast-height `age` for a stand of `site_index`.
    pub fn height_at_age(&self, site_index: f32, age: f32) -> f32 {
        1.3 + (site_index - 1.3) * self.shape(age) / self.anchor()
    }

    /// Breast-height age at which the curve reaches `height`, or `None`
    /// when the height is at or above the curve's asymptote.
    pub fn age_at_height(&self, site_index: f32, height: f32) -> Option<f32> {
        if height <= 1.3 || site_index <= 1.3 {
            return None;
        }
        let ratio = (height - 1.3) / (site_index - 1.3) * self.anchor();
        let inner = ratio.powf(1.0 / self.shape_p);
        if inner >= 1.0 {
            return None;
        }
        Some(-(1.0 - inner).ln() / self.shape_k)
    }

    /// Height the curve approaches as age grows without bound.
    pub fn asymptote(&self, site_index: f32) -> f32 {
        1.3 + (site_index - 1.3) / self.anchor()
    }

    pub fn years_to_breast_height(&self, site_index: f32) -> f32 {
        self.ytbh_b0 + self.ytbh_b1 / site_index
    }

    pub fn age_maximum(&self, region: Region) -> f32 {
        match region {
            Region::Coastal => self.age_maximum_coastal,
            Region::Interior => self.age_maximum_interior,
        }
    }
}
