use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::Result;

/// How per-species growth is disaggregated from the layer deltas.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SpeciesDynamicsMode {
    /// Per-species logit allocation with iterative reconciliation.
    #[default]
    Full,
    /// Staged bounded search; falls back to proportional scaling when no
    /// solution is found.
    Partial,
    /// Scale every species by the layer-level change rates.
    Proportional,
}

/// Which growth model produces the layer basal-area and QMD deltas.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum GrowthModelKind {
    /// Yield-curve difference with a convergence adjustment.
    #[default]
    Fiat,
    /// Empirical regression model.
    Empirical,
    /// Age-weighted blend of the two.
    Mixed,
}

/// How stored compatibility variables are applied when utilization
/// components are recomputed after growth.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum CompatibilityVariableApplication {
    None,
    /// Apply to basal area, QMD and Lorey height only.
    Sizes,
    /// Also apply the volume corrections.
    #[default]
    All,
}

/// Named control settings for a projection run.
///
/// Each maps to a decision point in the growth step; all fields are optional
/// in the TOML source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ControlSettings {
    pub species_dynamics: SpeciesDynamicsMode,
    pub basal_area_growth_model: GrowthModelKind,
    pub quad_mean_diameter_growth_model: GrowthModelKind,
    pub compatibility_variables: CompatibilityVariableApplication,

    /// Re-derive coverages and the dominant height/age/site index between
    /// grown years.
    pub update_during_growth: bool,

    /// Treat the basal-area yield curve as a full-occupancy curve.
    pub full_occupancy: bool,

    /// Use per-species-and-region growth upper bounds instead of the
    /// per-group defaults.
    pub per_species_upper_bounds: bool,

    /// Re-cap the basal-area delta when the QMD delta was truncated by its
    /// upper limit.
    pub cap_basal_area_when_diameter_limited: bool,

    /// Cap the breast-height age fed to the yield curves, in centuries.
    pub max_breast_height_age_centuries: Option<u8>,

    /// Years to project when neither the polygon nor the CLI names a target
    /// year.
    pub default_projection_years: u32,
}

impl Default for ControlSettings {
    fn default() -> Self {
        ControlSettings {
            species_dynamics: SpeciesDynamicsMode::default(),
            basal_area_growth_model: GrowthModelKind::default(),
            quad_mean_diameter_growth_model: GrowthModelKind::default(),
            compatibility_variables: CompatibilityVariableApplication::default(),
            update_during_growth: true,
            full_occupancy: false,
            per_species_upper_bounds: false,
            cap_basal_area_when_diameter_limited: true,
            max_breast_height_age_centuries: None,
            default_projection_years: 20,
        }
    }
}

impl ControlSettings {
    pub fn from_toml_str(s: &str) -> Result<Self> {
        Ok(toml::from_str(s)?)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_toml_str(&contents)
    }

    /// Age cap in years for the yield curves, when configured.
    pub fn yield_age_cap(&self) -> Option<f32> {
        self.max_breast_height_age_centuries
            .map(|c| f32::from(c) * 100.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_settings() {
        let settings = ControlSettings::default();
        assert_eq!(settings.species_dynamics, SpeciesDynamicsMode::Full);
        assert_eq!(settings.basal_area_growth_model, GrowthModelKind::Fiat);
        assert!(settings.update_during_growth);
        assert!(settings.yield_age_cap().is_none());
    }

    #[test]
    fn test_settings_parse_from_toml() {
        let toml_src = r#"
            species_dynamics = "proportional"
            basal_area_growth_model = "mixed"
            update_during_growth = false
            max_breast_height_age_centuries = 4
        "#;
        let settings = ControlSettings::from_toml_str(toml_src).unwrap();
        assert_eq!(settings.species_dynamics, SpeciesDynamicsMode::Proportional);
        assert_eq!(settings.basal_area_growth_model, GrowthModelKind::Mixed);
        assert!(!settings.update_during_growth);
        assert_eq!(settings.yield_age_cap(), Some(400.0));
        // Unspecified fields keep their defaults.
        assert_eq!(
            settings.compatibility_variables,
            CompatibilityVariableApplication::All
        );
    }

    #[test]
    fn test_settings_reject_bad_mode() {
        let toml_src = r#"species_dynamics = "quadratic""#;
        assert!(ControlSettings::from_toml_str(toml_src).is_err());
    }
}
