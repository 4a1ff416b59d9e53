use thiserror::Error;

/// Error types for the specparam library.
#[derive(Error, Debug)]
pub enum SpecParamError {
    /// Malformed input data: invalid values, non-finite power after the log
    /// transform, or an empty post-trim frequency range.
    #[error("Data error: {0}")]
    Data(String),

    /// Input arrays whose lengths do not match.
    #[error("Inconsistent data: {0}")]
    InconsistentData(String),

    /// A fit was requested but no spectrum is available.
    #[error("No data available: add data before fitting")]
    NoData,

    /// Model results were requested but no successful fit is present.
    #[error("No model fit results are available")]
    NoModel,

    /// Failure inside a nonlinear optimization stage: non-convergence,
    /// exceeded evaluation budget, or a numerical singularity.
    #[error("Model fit failed: {0}")]
    Fit(String),

    /// Error for invalid parameter selectors or option values.
    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),
}

/// Result type alias for specparam operations.
pub type Result<T> = std::result::Result<T, SpecParamError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = SpecParamError::InconsistentData("expected 50, got 49".to_string());
        assert!(format!("{}", err).contains("expected 50, got 49"));

        let err = SpecParamError::Fit("exceeded maximum function evaluations".to_string());
        assert!(format!("{}", err).contains("exceeded maximum function evaluations"));
    }
}
