pub mod bank;
pub mod coefficients;
pub mod config;
pub mod engine;
pub mod error;
pub mod estimators;
pub mod io;
pub mod models;
pub mod visualization;

pub use bank::Bank;
pub use config::ControlSettings;
pub use engine::{ExecutionStep, ForwardProcessingEngine, ProjectionResult};
pub use error::{ProjectionError, Result};
pub use io::{PolygonSource, SnapshotWriter};
pub use models::Polygon;
