mod bec;
mod layer;
mod polygon;
mod species;
mod utilization;

pub use bec::{bec_zone, BecZone, Region, BEC_ZONES};
pub use layer::{Layer, LayerType};
pub use polygon::{Polygon, MINIMUM_INVENTORY_YEAR};
pub use species::{genus_index, SpeciesRecord, UtilizationRecord, GENERA};
pub use utilization::{UtilizationClass, UtilizationVector};
