use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Diameter-threshold buckets over which stand metrics are reported.
///
/// `Small` covers trees below the 7.5 cm merchantability limit, `All` is the
/// aggregate of the four merchantable bands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UtilizationClass {
    Small,
    All,
    U75To125,
    U125To175,
    U175To225,
    Over225,
}

impl UtilizationClass {
    /// The four merchantable diameter bands, smallest first.
    pub const BANDS: [UtilizationClass; 4] = [
        UtilizationClass::U75To125,
        UtilizationClass::U125To175,
        UtilizationClass::U175To225,
        UtilizationClass::Over225,
    ];

    /// All classes except `Small`, starting with the aggregate.
    pub const ALL_BUT_SMALL: [UtilizationClass; 5] = [
        UtilizationClass::All,
        UtilizationClass::U75To125,
        UtilizationClass::U125To175,
        UtilizationClass::U175To225,
        UtilizationClass::Over225,
    ];

    pub fn index(self) -> usize {
        match self {
            UtilizationClass::Small => 0,
            UtilizationClass::All => 1,
            UtilizationClass::U75To125 => 2,
            UtilizationClass::U125To175 => 3,
            UtilizationClass::U175To225 => 4,
            UtilizationClass::Over225 => 5,
        }
    }

    /// Lower diameter bound in cm. Zero for `Small` and `All`.
    pub fn low_bound(self) -> f32 {
        match self {
            UtilizationClass::Small | UtilizationClass::All => 0.0,
            UtilizationClass::U75To125 => 7.5,
            UtilizationClass::U125To175 => 12.5,
            UtilizationClass::U175To225 => 17.5,
            UtilizationClass::Over225 => 22.5,
        }
    }

    /// Upper diameter bound in cm.
    pub fn high_bound(self) -> f32 {
        match self {
            UtilizationClass::Small => 7.5,
            UtilizationClass::All => 10000.0,
            UtilizationClass::U75To125 => 12.5,
            UtilizationClass::U125To175 => 17.5,
            UtilizationClass::U175To225 => 22.5,
            UtilizationClass::Over225 => 10000.0,
        }
    }

    /// The next-smaller band, with `U75To125` falling back to `All`.
    pub fn previous(self) -> Option<UtilizationClass> {
        match self {
            UtilizationClass::U75To125 => Some(UtilizationClass::All),
            UtilizationClass::U125To175 => Some(UtilizationClass::U75To125),
            UtilizationClass::U175To225 => Some(UtilizationClass::U125To175),
            UtilizationClass::Over225 => Some(UtilizationClass::U175To225),
            _ => None,
        }
    }
}

impl fmt::Display for UtilizationClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            UtilizationClass::Small => "small",
            UtilizationClass::All => "all",
            UtilizationClass::U75To125 => "7.5-12.5",
            UtilizationClass::U125To175 => "12.5-17.5",
            UtilizationClass::U175To225 => "17.5-22.5",
            UtilizationClass::Over225 => "22.5+",
        };
        write!(f, "{name}")
    }
}

impl FromStr for UtilizationClass {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "small" => Ok(UtilizationClass::Small),
            "all" => Ok(UtilizationClass::All),
            "7.5-12.5" => Ok(UtilizationClass::U75To125),
            "12.5-17.5" => Ok(UtilizationClass::U125To175),
            "17.5-22.5" => Ok(UtilizationClass::U175To225),
            "22.5+" => Ok(UtilizationClass::Over225),
            other => Err(format!("Unknown utilization class: {other}")),
        }
    }
}

/// Fixed six-slot vector of per-utilization-class values.
///
/// Slot layout matches `UtilizationClass::index`: small, all, then the four
/// bands in ascending diameter order.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct UtilizationVector(pub [f32; 6]);

impl UtilizationVector {
    pub fn zero() -> Self {
        UtilizationVector([0.0; 6])
    }

    pub fn nan() -> Self {
        UtilizationVector([f32::NAN; 6])
    }

    pub fn get(&self, uc: UtilizationClass) -> f32 {
        self.0[uc.index()]
    }

    pub fn set(&mut self, uc: UtilizationClass, value: f32) {
        self.0[uc.index()] = value;
    }

    pub fn all(&self) -> f32 {
        self.get(UtilizationClass::All)
    }

    pub fn set_all(&mut self, value: f32) {
        self.set(UtilizationClass::All, value);
    }

    pub fn small(&self) -> f32 {
        self.get(UtilizationClass::Small)
    }

    /// Sum of the four merchantable bands.
    pub fn band_sum(&self) -> f32 {
        UtilizationClass::BANDS.iter().map(|uc| self.get(*uc)).sum()
    }

    /// Store the band sum into the `All` slot and return it.
    pub fn store_band_sum(&mut self) -> f32 {
        let sum = self.band_sum();
        self.set_all(sum);
        sum
    }

    /// Scale the four bands so they sum to the `All` slot.
    ///
    /// Errors when the band sum is not positive.
    pub fn normalize_bands(&mut self) -> Result<f32, String> {
        let sum = self.band_sum();
        if sum <= 0.0 {
            return Err(format!("Total {sum} was not positive"));
        }
        let k = self.all() / sum;
        for uc in UtilizationClass::BANDS {
            self.set(uc, self.get(uc) * k);
        }
        Ok(k)
    }
}

impl Default for UtilizationVector {
    fn default() -> Self {
        UtilizationVector::zero()
    }
}
