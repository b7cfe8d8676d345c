//! The forward projection pipeline.
//!
//! A polygon is processed in a fixed order: validate and load the primary
//! layer into a bank, fill in missing site curves, coverages, rankings,
//! site indices and breast-height ages, freeze the primary species details,
//! compute the compatibility variables, then grow the layer year by year
//! until the target year. `ExecutionStep` names the stages so a run can be
//! stopped after any of them for inspection.

pub mod compatibility;
pub mod grow;
pub mod rankings;
pub mod state;
pub mod utilization;

use std::str::FromStr;

use tracing::{debug, info, warn};

use crate::bank::Bank;
use crate::coefficients::{basal_area_group, CoefficientStore};
use crate::config::{ControlSettings, SpeciesDynamicsMode};
use crate::error::{ProjectionError, Result};
use crate::models::{BecZone, Polygon};

pub use state::{CompatibilityVariables, LayerState, PrimarySpeciesDetails};

pub use crate::bank::MIN_BASAL_AREA;

/// The ordered stages of the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ExecutionStep {
    CheckForWork,
    CalculateMissingSiteCurves,
    CalculateCoverages,
    DeterminePolygonRankings,
    EstimateMissingSiteIndices,
    EstimateMissingYearsToBreastHeight,
    CalculateDominantHeightAgeSiteIndex,
    SetCompatibilityVariables,
    Grow,
    All,
}

impl ExecutionStep {
    pub const NAMES: [(&'static str, ExecutionStep); 10] = [
        ("check_for_work", ExecutionStep::CheckForWork),
        (
            "calculate_missing_site_curves",
            ExecutionStep::CalculateMissingSiteCurves,
        ),
        ("calculate_coverages", ExecutionStep::CalculateCoverages),
        (
            "determine_polygon_rankings",
            ExecutionStep::DeterminePolygonRankings,
        ),
        (
            "estimate_missing_site_indices",
            ExecutionStep::EstimateMissingSiteIndices,
        ),
        (
            "estimate_missing_years_to_breast_height",
            ExecutionStep::EstimateMissingYearsToBreastHeight,
        ),
        (
            "calculate_dominant_height_age_site_index",
            ExecutionStep::CalculateDominantHeightAgeSiteIndex,
        ),
        (
            "set_compatibility_variables",
            ExecutionStep::SetCompatibilityVariables,
        ),
        ("grow", ExecutionStep::Grow),
        ("all", ExecutionStep::All),
    ];

    pub fn name(self) -> &'static str {
        Self::NAMES
            .iter()
            .find(|(_, step)| *step == self)
            .map(|(name, _)| *name)
            .unwrap_or("all")
    }
}

impl FromStr for ExecutionStep {
    type Err = ProjectionError;

    fn from_str(s: &str) -> Result<ExecutionStep> {
        Self::NAMES
            .iter()
            .find(|(name, _)| *name == s)
            .map(|(_, step)| *step)
            .ok_or_else(|| ProjectionError::Validation(format!("Unknown execution step: {s}")))
    }
}

/// The state of the layer at the end of one projected year.
#[derive(Debug, Clone)]
pub struct LayerSnapshot {
    pub year: i32,
    pub dominant_height: f32,
    pub site_index: f32,
    pub bank: Bank,
}

/// Everything a projection run produced for one polygon.
#[derive(Debug, Clone)]
pub struct ProjectionResult {
    pub polygon_id: String,
    pub reference_year: i32,
    pub target_year: i32,
    pub snapshots: Vec<LayerSnapshot>,
}

/// Drives the pipeline over polygons using a shared coefficient store and
/// control settings.
pub struct ForwardProcessingEngine<'a> {
    store: &'a CoefficientStore,
    settings: ControlSettings,
}

impl<'a> ForwardProcessingEngine<'a> {
    pub fn new(store: &'a CoefficientStore, settings: ControlSettings) -> Self {
        ForwardProcessingEngine { store, settings }
    }

    pub fn settings(&self) -> &ControlSettings {
        &self.settings
    }

    /// Run the full pipeline for one polygon.
    pub fn process_polygon(&self, polygon: &Polygon) -> Result<ProjectionResult> {
        self.run(polygon, ExecutionStep::All).map(|(result, _)| result)
    }

    /// Run the pipeline up to and including `last_step`, returning the
    /// processing state for inspection along with whatever was produced.
    pub fn run_to_step(
        &self,
        polygon: &Polygon,
        last_step: ExecutionStep,
    ) -> Result<(ProjectionResult, LayerState)> {
        self.run(polygon, last_step)
    }

    fn run(
        &self,
        polygon: &Polygon,
        last_step: ExecutionStep,
    ) -> Result<(ProjectionResult, LayerState)> {
        polygon.validate()?;
        let bec = polygon.bec()?;

        info!(polygon = %polygon.id, "starting projection of the primary layer");

        // CheckForWork: loading the bank drops sub-minimal species and
        // fails when none remain.
        let bank = Bank::from_layer(polygon.primary_layer()?, |s| {
            s.basal_area_all() > MIN_BASAL_AREA
        })?;
        let mut state = LayerState::new(bank);

        let reference_year = polygon.reference_year;
        let target_year = polygon.target_year.unwrap_or(
            reference_year + self.settings.default_projection_years as i32,
        );

        let mut result = ProjectionResult {
            polygon_id: polygon.id.clone(),
            reference_year,
            target_year,
            snapshots: Vec::new(),
        };

        if last_step >= ExecutionStep::CalculateMissingSiteCurves {
            debug!(polygon = %polygon.id, "calculating missing site curves");
            calculate_missing_site_curves(self.store, bec, &mut state.start)?;
        }
        if last_step >= ExecutionStep::CalculateCoverages {
            debug!(polygon = %polygon.id, "calculating coverages");
            calculate_coverages(&mut state.start);
        }
        if last_step >= ExecutionStep::DeterminePolygonRankings {
            debug!(polygon = %polygon.id, "determining polygon rankings");
            let (primary, secondary, itg) = rankings::determine_rankings(&state.start)?;
            state.set_species_rankings(primary, secondary, itg)?;
            state.set_stratum(basal_area_group(
                state.start.genus_indices[primary],
                bec.region,
            ))?;
            state.start.site_curve_numbers[0] = state.start.site_curve_numbers[primary];
        }
        if last_step >= ExecutionStep::EstimateMissingSiteIndices {
            debug!(polygon = %polygon.id, "estimating missing site indices");
            estimate_missing_site_indices(self.store, &mut state)?;
        }
        if last_step >= ExecutionStep::EstimateMissingYearsToBreastHeight {
            debug!(polygon = %polygon.id, "estimating missing years to breast height");
            estimate_missing_years_to_breast_height(self.store, &mut state)?;
        }
        if last_step >= ExecutionStep::CalculateDominantHeightAgeSiteIndex {
            debug!(polygon = %polygon.id, "deriving primary species details");
            let primary = state.primary_species_index()?;
            let secondary = state.secondary_species_index();
            let details =
                derive_primary_species_details(self.store, bec, &state.start, primary, secondary)?;
            state.set_primary_species_details(details)?;
        }
        if last_step >= ExecutionStep::SetCompatibilityVariables {
            debug!(polygon = %polygon.id, "setting compatibility variables");
            compatibility::set_compatibility_variables(self.store, bec, &mut state)?;
        }
        if last_step >= ExecutionStep::Grow {
            self.grow_to_target(polygon, bec, &mut state, &mut result)?;
        }

        Ok((result, state))
    }

    fn grow_to_target(
        &self,
        polygon: &Polygon,
        bec: &'static BecZone,
        state: &mut LayerState,
        result: &mut ProjectionResult,
    ) -> Result<()> {
        let veteran_basal_area = polygon
            .veteran_layer()
            .map(|layer| layer.basal_area_all())
            .unwrap_or(0.0);
        let fraction_available = (polygon.percent_forest_land / 100.0).clamp(0.0, 1.0);

        let details = state.primary_species_details()?;
        result.snapshots.push(LayerSnapshot {
            year: result.reference_year,
            dominant_height: details.dominant_height,
            site_index: details.site_index,
            bank: state.start.clone(),
        });

        // With per-species dynamics in play the coverages are refreshed
        // before each snapshot; under proportional scaling they cannot
        // change, so the refresh is deferred to after output when
        // update-during-growth asks for it.
        let recalculate_before_output = self.settings.species_dynamics
            != SpeciesDynamicsMode::Proportional
            && state.start.n_species() > 1;

        for year in (result.reference_year + 1)..=result.target_year {
            info!(polygon = %polygon.id, year, "growing primary layer");

            grow::grow(
                self.store,
                &self.settings,
                bec,
                state,
                veteran_basal_area,
                fraction_available,
            )?;

            if recalculate_before_output {
                calculate_coverages(&mut state.end);
                let primary = state.primary_species_index()?;
                let secondary = state.secondary_species_index();
                let details = derive_primary_species_details(
                    self.store,
                    bec,
                    &state.end,
                    primary,
                    secondary,
                )?;
                state.refresh_primary_species_details(details);
            }

            let details = state.primary_species_details()?;
            result.snapshots.push(LayerSnapshot {
                year,
                dominant_height: details.dominant_height,
                site_index: details.site_index,
                bank: state.end.clone(),
            });

            state.advance();

            if !recalculate_before_output && self.settings.update_during_growth {
                calculate_coverages(&mut state.start);
                let primary = state.primary_species_index()?;
                let secondary = state.secondary_species_index();
                let details = derive_primary_species_details(
                    self.store,
                    bec,
                    &state.start,
                    primary,
                    secondary,
                )?;
                state.refresh_primary_species_details(details);
            }
        }

        Ok(())
    }
}

/// Assign a default site curve, by site species first and genus second, to
/// every species the input left without one.
pub fn calculate_missing_site_curves(
    store: &CoefficientStore,
    bec: &BecZone,
    bank: &mut Bank,
) -> Result<()> {
    for i in bank.indices() {
        if bank.site_curve_numbers[i].is_some() {
            continue;
        }
        if let Some(site_species) = bank.site_species[i].clone() {
            if let Ok(curve) = store.default_site_curve(&site_species, bec.region) {
                bank.site_curve_numbers[i] = Some(curve);
                continue;
            }
        }
        let curve = store.default_site_curve(&bank.species_names[i], bec.region)?;
        bank.site_curve_numbers[i] = Some(curve);
    }
    Ok(())
}

/// Recompute each species' percent of forested land as its share of the
/// layer basal area.
pub fn calculate_coverages(bank: &mut Bank) {
    let layer_basal_area = bank.basal_areas[0].all();
    for i in bank.indices() {
        bank.percentages_of_forested_land[i] =
            bank.basal_areas[i].all() / layer_basal_area * 100.0;
    }
}

/// Fill in missing site indices: the primary species from the average of
/// the others' converted indices, then the others from the primary's.
pub fn estimate_missing_site_indices(
    store: &CoefficientStore,
    state: &mut LayerState,
) -> Result<()> {
    let primary = state.primary_species_index()?;
    let bank = &mut state.start;
    let primary_alias = bank.species_names[primary].clone();

    if bank.site_indices[primary].is_nan() {
        let mut sum = 0.0_f32;
        let mut count = 0;
        for i in bank.indices() {
            if i == primary || bank.site_indices[i].is_nan() {
                continue;
            }
            let alias = &bank.species_names[i];
            match store.site_index_conversion(alias, &primary_alias) {
                Some((a, b)) => {
                    let converted = a + b * bank.site_indices[i];
                    if converted <= 0.0 {
                        return Err(ProjectionError::SiteCurve(format!(
                            "Site index {} of {alias} converts to non-positive {converted} for {primary_alias}",
                            bank.site_indices[i]
                        )));
                    }
                    if converted > 1.3 {
                        sum += converted;
                        count += 1;
                    }
                }
                None => {
                    warn!(
                        from = %alias,
                        to = %primary_alias,
                        "no site index conversion; excluding species from the estimate"
                    );
                }
            }
        }
        if count > 0 {
            bank.site_indices[primary] = sum / count as f32;
        }
    }

    let primary_site_index = bank.site_indices[primary];
    if !primary_site_index.is_nan() {
        for i in bank.indices() {
            if i == primary || !bank.site_indices[i].is_nan() {
                continue;
            }
            let alias = bank.species_names[i].clone();
            match store.site_index_conversion(&primary_alias, &alias) {
                Some((a, b)) => {
                    let converted = a + b * primary_site_index;
                    if converted <= 0.0 {
                        return Err(ProjectionError::SiteCurve(format!(
                            "Site index {primary_site_index} of {primary_alias} converts to non-positive {converted} for {alias}"
                        )));
                    }
                    bank.site_indices[i] = converted;
                }
                None => {
                    warn!(
                        from = %primary_alias,
                        to = %alias,
                        "no site index conversion; leaving site index unset"
                    );
                }
            }
        }
    }

    bank.site_indices[0] = bank.site_indices[primary];
    Ok(())
}

/// Fill in missing years-to-breast-height values, from the age pair when
/// both halves are present and from the site curve otherwise.
pub fn estimate_missing_years_to_breast_height(
    store: &CoefficientStore,
    state: &mut LayerState,
) -> Result<()> {
    let primary = state.primary_species_index()?;
    let bank = &mut state.start;

    let mut default_site_index = bank.site_indices[primary];
    if default_site_index.is_nan() {
        for i in bank.indices() {
            if !bank.site_indices[i].is_nan() {
                default_site_index = bank.site_indices[i];
                break;
            }
        }
    }

    for i in bank.indices() {
        if !bank.years_to_breast_height[i].is_nan() {
            continue;
        }
        if !bank.years_at_breast_height[i].is_nan()
            && bank.ages_total[i] > bank.years_at_breast_height[i]
        {
            bank.years_to_breast_height[i] = bank.ages_total[i] - bank.years_at_breast_height[i];
            continue;
        }

        let site_index = if bank.site_indices[i].is_nan() {
            default_site_index
        } else {
            bank.site_indices[i]
        };
        match bank.site_curve_numbers[i] {
            Some(number) => {
                let curve = store.site_curve(number)?;
                bank.years_to_breast_height[i] = curve.years_to_breast_height(site_index);
            }
            None => {
                warn!(
                    species = %bank.species_names[i],
                    "no site curve; years to breast height left unset"
                );
            }
        }
    }
    Ok(())
}

/// Derive the primary species' dominant height, ages and site index from
/// the bank, borrowing from the secondary or any other species where the
/// primary's own values are missing.
pub fn derive_primary_species_details(
    store: &CoefficientStore,
    bec: &BecZone,
    bank: &Bank,
    primary: usize,
    secondary: Option<usize>,
) -> Result<PrimarySpeciesDetails> {
    let mut dominant_height = bank.dominant_heights[primary];
    if dominant_height.is_nan() {
        let lorey_height = bank.lorey_heights[primary][1];
        if lorey_height.is_nan() {
            return Err(ProjectionError::Validation(format!(
                "Neither dominant nor Lorey height is available for primary species {}",
                bank.species_names[primary]
            )));
        }
        let a = store.primary_lorey_height(&bank.species_names[primary], bec.region)?;
        let trees_per_hectare = bank.trees_per_hectare[primary].all();
        let height_multiplier = a[0] - a[1] + a[1] * (a[2] * (trees_per_hectare - 100.0)).exp();
        dominant_height = 1.3 + (lorey_height - 1.3) / height_multiplier;
    }

    let mut total_age = bank.ages_total[primary];
    let mut years_at_breast_height = bank.years_at_breast_height[primary];
    let mut years_to_breast_height = bank.years_to_breast_height[primary];
    let mut active_index = None;

    if total_age.is_nan() {
        if let Some(s) = secondary.filter(|&s| !bank.ages_total[s].is_nan()) {
            active_index = Some(s);
        } else {
            active_index = bank.indices().find(|&i| !bank.ages_total[i].is_nan());
        }
        let active = active_index.ok_or_else(|| {
            ProjectionError::Validation("Age data unavailable for all species".to_string())
        })?;
        total_age = bank.ages_total[active];
        if !years_to_breast_height.is_nan() {
            years_at_breast_height = total_age - years_to_breast_height;
        } else if !years_at_breast_height.is_nan() {
            years_to_breast_height = total_age - years_at_breast_height;
        } else {
            years_at_breast_height = bank.years_at_breast_height[active];
            years_to_breast_height = bank.years_to_breast_height[active];
        }
    }

    let mut site_index = bank.site_indices[primary];
    if site_index.is_nan() {
        if let Some(s) = secondary.filter(|&s| !bank.site_indices[s].is_nan()) {
            active_index = Some(s);
        } else if active_index.is_none()
            || bank.site_indices[active_index.unwrap_or(0)].is_nan()
        {
            active_index = bank.indices().find(|&i| !bank.site_indices[i].is_nan());
        }
        let active = active_index.ok_or_else(|| {
            ProjectionError::Validation("Site index data unavailable for all species".to_string())
        })?;
        site_index = bank.site_indices[active];

        // Convert the borrowed index to the primary species' scale.
        if let Some((a, b)) = store.site_index_conversion(
            &bank.species_names[active],
            &bank.species_names[primary],
        ) {
            let converted = a + b * site_index;
            if converted > 1.3 {
                site_index = converted;
            }
        }
    }

    let site_curve = bank.site_curve_numbers[primary].ok_or_else(|| {
        ProjectionError::InvalidState(format!(
            "Primary species {} has no site curve",
            bank.species_names[primary]
        ))
    })?;

    Ok(PrimarySpeciesDetails {
        index: primary,
        site_index,
        dominant_height,
        total_age,
        years_to_breast_height,
        years_at_breast_height,
        site_curve,
    })
}
