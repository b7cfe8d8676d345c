//! Mutable per-layer state carried through one polygon's projection.

use crate::bank::Bank;
use crate::error::{ProjectionError, Result};
use crate::models::UtilizationClass;

/// The three volume stages that carry compatibility variables.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VolumeVariable {
    CloseUtil,
    CloseUtilLessDecay,
    CloseUtilLessDecayLessWaste,
}

impl VolumeVariable {
    pub const ALL: [VolumeVariable; 3] = [
        VolumeVariable::CloseUtil,
        VolumeVariable::CloseUtilLessDecay,
        VolumeVariable::CloseUtilLessDecayLessWaste,
    ];

    pub fn index(self) -> usize {
        match self {
            VolumeVariable::CloseUtil => 0,
            VolumeVariable::CloseUtilLessDecay => 1,
            VolumeVariable::CloseUtilLessDecayLessWaste => 2,
        }
    }
}

/// Index of a merchantable band within the per-band arrays below.
pub fn band_index(uc: UtilizationClass) -> usize {
    debug_assert!(UtilizationClass::BANDS.contains(&uc));
    uc.index() - 2
}

/// Per-species correction terms that keep estimated utilization components
/// consistent with the observed ones as the stand grows.
#[derive(Debug, Clone, Default)]
pub struct CompatibilityVariables {
    /// Band-by-stage logit offsets for the three derived volumes.
    pub volume: [[f32; 3]; 4],
    /// Band log-scale offsets for whole-stem volume.
    pub whole_stem: [f32; 4],
    /// Band additive offsets for basal area.
    pub basal_area: [f32; 4],
    /// Band additive offsets for quadratic mean diameter.
    pub quad_mean_diameter: [f32; 4],
    pub small_basal_area: f32,
    pub small_quad_mean_diameter: f32,
    pub small_lorey_height: f32,
    pub small_whole_stem_volume: f32,
}

impl CompatibilityVariables {
    pub fn volume_for(&self, uc: UtilizationClass, variable: VolumeVariable) -> f32 {
        self.volume[band_index(uc)][variable.index()]
    }

    pub fn set_volume_for(&mut self, uc: UtilizationClass, variable: VolumeVariable, value: f32) {
        self.volume[band_index(uc)][variable.index()] = value;
    }
}

/// Identity and site information of the layer's primary species, fixed at
/// the start of each growth period.
#[derive(Debug, Clone, Copy)]
pub struct PrimarySpeciesDetails {
    pub index: usize,
    pub site_index: f32,
    pub dominant_height: f32,
    pub total_age: f32,
    pub years_to_breast_height: f32,
    pub years_at_breast_height: f32,
    pub site_curve: u16,
}

/// State of one layer while it is being projected.
///
/// Fields derived during the ranking and site phases are set once per
/// polygon; setting them twice is a programming error surfaced as
/// `InvalidState`.
#[derive(Debug, Clone)]
pub struct LayerState {
    pub start: Bank,
    pub end: Bank,
    primary_species_index: Option<usize>,
    secondary_species_index: Option<usize>,
    inventory_type_group: Option<u16>,
    stratum: Option<usize>,
    primary_details: Option<PrimarySpeciesDetails>,
    compatibility_variables: Option<Vec<CompatibilityVariables>>,
}

impl LayerState {
    pub fn new(start: Bank) -> LayerState {
        let end = start.nan_shell();
        LayerState {
            start,
            end,
            primary_species_index: None,
            secondary_species_index: None,
            inventory_type_group: None,
            stratum: None,
            primary_details: None,
            compatibility_variables: None,
        }
    }

    fn set_once<T>(slot: &mut Option<T>, value: T, what: &str) -> Result<()> {
        if slot.is_some() {
            return Err(ProjectionError::InvalidState(format!("{what} was already set")));
        }
        *slot = Some(value);
        Ok(())
    }

    fn get<'a, T>(slot: &'a Option<T>, what: &str) -> Result<&'a T> {
        slot.as_ref()
            .ok_or_else(|| ProjectionError::InvalidState(format!("{what} has not been set")))
    }

    pub fn set_species_rankings(
        &mut self,
        primary_index: usize,
        secondary_index: Option<usize>,
        inventory_type_group: u16,
    ) -> Result<()> {
        Self::set_once(&mut self.primary_species_index, primary_index, "Primary species")?;
        if let Some(secondary) = secondary_index {
            Self::set_once(
                &mut self.secondary_species_index,
                secondary,
                "Secondary species",
            )?;
        }
        Self::set_once(
            &mut self.inventory_type_group,
            inventory_type_group,
            "Inventory type group",
        )
    }

    pub fn primary_species_index(&self) -> Result<usize> {
        Self::get(&self.primary_species_index, "Primary species").copied()
    }

    pub fn secondary_species_index(&self) -> Option<usize> {
        self.secondary_species_index
    }

    pub fn inventory_type_group(&self) -> Result<u16> {
        Self::get(&self.inventory_type_group, "Inventory type group").copied()
    }

    pub fn set_stratum(&mut self, stratum: usize) -> Result<()> {
        Self::set_once(&mut self.stratum, stratum, "Basal area stratum")
    }

    pub fn stratum(&self) -> Result<usize> {
        Self::get(&self.stratum, "Basal area stratum").copied()
    }

    /// Record the primary species' site values and backfill any the input
    /// left missing on the start bank.
    pub fn set_primary_species_details(&mut self, details: PrimarySpeciesDetails) -> Result<()> {
        let i = details.index;
        let bank = &mut self.start;
        if bank.site_indices[i].is_nan() || bank.site_indices[i] <= 0.0 {
            bank.site_indices[i] = details.site_index;
        }
        if bank.dominant_heights[i].is_nan() || bank.dominant_heights[i] <= 0.0 {
            bank.dominant_heights[i] = details.dominant_height;
        }
        if bank.ages_total[i].is_nan() || bank.ages_total[i] <= 0.0 {
            bank.ages_total[i] = details.total_age;
        }
        if bank.years_to_breast_height[i].is_nan() || bank.years_to_breast_height[i] <= 0.0 {
            bank.years_to_breast_height[i] = details.years_to_breast_height;
        }
        if bank.years_at_breast_height[i].is_nan() || bank.years_at_breast_height[i] <= 0.0 {
            bank.years_at_breast_height[i] = details.years_at_breast_height;
        }
        bank.site_curve_numbers[i] = Some(details.site_curve);
        Self::set_once(&mut self.primary_details, details, "Primary species details")
    }

    /// Replace the frozen details wholesale. Used by the between-year
    /// recalculation, which re-derives them from the grown bank.
    pub(crate) fn refresh_primary_species_details(&mut self, details: PrimarySpeciesDetails) {
        self.primary_details = Some(details);
    }

    pub fn primary_species_details(&self) -> Result<PrimarySpeciesDetails> {
        Self::get(&self.primary_details, "Primary species details").copied()
    }

    /// Advance the primary species one year and adopt the new dominant
    /// height, on both the details and the end bank.
    pub fn update_primary_species_details_after_growth(
        &mut self,
        new_dominant_height: f32,
    ) -> Result<()> {
        let mut details = self.primary_species_details()?;
        details.total_age += 1.0;
        details.years_at_breast_height += 1.0;
        details.dominant_height = new_dominant_height;
        let i = details.index;
        self.end.ages_total[i] = details.total_age;
        self.end.years_at_breast_height[i] = details.years_at_breast_height;
        self.end.years_to_breast_height[i] = details.years_to_breast_height;
        self.end.dominant_heights[i] = new_dominant_height;
        self.end.site_indices[i] = details.site_index;
        self.primary_details = Some(details);
        Ok(())
    }

    pub fn set_compatibility_variables(
        &mut self,
        variables: Vec<CompatibilityVariables>,
    ) -> Result<()> {
        Self::set_once(
            &mut self.compatibility_variables,
            variables,
            "Compatibility variables",
        )
    }

    pub fn compatibility_variables(&self) -> Result<&[CompatibilityVariables]> {
        Self::get(&self.compatibility_variables, "Compatibility variables").map(|v| v.as_slice())
    }

    pub fn compatibility_variables_mut(&mut self) -> Result<&mut [CompatibilityVariables]> {
        self.compatibility_variables
            .as_mut()
            .map(|v| v.as_mut_slice())
            .ok_or_else(|| {
                ProjectionError::InvalidState("Compatibility variables have not been set".to_string())
            })
    }

    /// Promote the end-of-period bank to the start of the next period.
    pub fn advance(&mut self) {
        std::mem::swap(&mut self.start, &mut self.end);
        self.end = self.start.nan_shell();
    }
}
