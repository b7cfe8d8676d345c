//! Stand and species level estimators used by the projection engine.

pub mod density;
pub mod lorey;
pub mod small;
pub mod species_diameter;
pub mod utilization_split;
pub mod volumes;
pub mod yields;
