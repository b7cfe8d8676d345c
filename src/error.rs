use thiserror::Error;

/// Errors raised while projecting a polygon.
///
/// Every fatal condition aborts the current polygon only; callers decide
/// whether to continue with the next polygon in the stream.
#[derive(Error, Debug)]
pub enum ProjectionError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Config error: {0}")]
    Config(#[from] toml::de::Error),

    #[error("Missing coefficients: {0}")]
    MissingCoefficients(String),

    #[error("Unknown species: {0}")]
    UnknownSpecies(String),

    #[error("Site curve error: {0}")]
    SiteCurve(String),

    #[error("Failed to converge: {0}")]
    NonConvergence(String),

    #[error("Invalid processing state: {0}")]
    InvalidState(String),

    #[error("Validation error: {0}")]
    Validation(String),
}

pub type Result<T> = std::result::Result<T, ProjectionError>;
