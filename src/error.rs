use thiserror::Error;

/// Result type alias for simulation and analysis operations.
pub type Result<T> = std::result::Result<T, SimError>;

/// Top-level error returned by every core operation.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SimError {
    /// Caller-supplied data is malformed or inconsistent.
    #[error("invalid input: {0}")]
    InvalidInput(#[from] InvalidInputError),

    /// A numerical step could not produce a usable result.
    #[error("numerical error: {0}")]
    Numerical(#[from] NumericalError),

    /// The call was cancelled through its cancellation token.
    #[error("operation cancelled")]
    Cancelled,
}

/// Malformed or inconsistent caller-supplied data. Always detected before
/// any expensive computation starts.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum InvalidInputError {
    #[error("price for asset '{asset}' at row {row} must be positive, got {value}")]
    NonPositivePrice { asset: String, row: usize, value: f64 },

    #[error("log return for asset '{asset}' at row {row} is not finite (price {previous} -> {current})")]
    NonFiniteReturn { asset: String, row: usize, previous: f64, current: f64 },

    #[error("{what}: expected {expected}, got {actual}")]
    DimensionMismatch { what: &'static str, expected: usize, actual: usize },

    #[error("weights must sum to 1 (tolerance {tolerance}), got {sum}")]
    WeightSum { sum: f64, tolerance: f64 },

    #[error("{what} contains a non-finite value at index {index}")]
    NonFiniteValue { what: &'static str, index: usize },

    #[error("insufficient data: need at least {required} rows, got {available}")]
    InsufficientData { required: usize, available: usize },

    #[error("invalid parameter '{name}': {message}")]
    InvalidParameter { name: &'static str, message: String },

    #[error("asset set must not be empty")]
    EmptyAssetSet,

    #[error("dates must be strictly increasing (row {row})")]
    UnorderedDates { row: usize },
}

/// Failures inside the numerical core. Deterministic, so never retried.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum NumericalError {
    #[error("covariance factorization failed at pivot {pivot} (residual {value})")]
    FactorizationFailed { pivot: usize, value: f64 },

    #[error("portfolio volatility is zero for draw {draw}; Sharpe ratio undefined")]
    ZeroVolatility { draw: usize },

    #[error("non-finite result in {what}")]
    NonFiniteResult { what: &'static str },
}

impl SimError {
    pub fn dimension_mismatch(what: &'static str, expected: usize, actual: usize) -> Self {
        InvalidInputError::DimensionMismatch { what, expected, actual }.into()
    }

    pub fn invalid_parameter(name: &'static str, message: impl Into<String>) -> Self {
        InvalidInputError::InvalidParameter {
            name,
            message: message.into(),
        }
        .into()
    }

    pub fn non_finite_value(what: &'static str, index: usize) -> Self {
        InvalidInputError::NonFiniteValue { what, index }.into()
    }

    pub fn insufficient_data(required: usize, available: usize) -> Self {
        InvalidInputError::InsufficientData {
            required,
            available,
        }
        .into()
    }

    pub fn is_invalid_input(&self) -> bool {
        matches!(self, Self::InvalidInput(_))
    }

    pub fn is_numerical(&self) -> bool {
        matches!(self, Self::Numerical(_))
    }
}

/// Checks that `weights` matches the asset count, is finite and sums to one
/// within `1e-8 + tolerance`.
pub(crate) fn validate_weights(weights: &[f64], n_assets: usize, tolerance: f64) -> Result<()> {
    if weights.len() != n_assets {
        return Err(SimError::dimension_mismatch("weight count", n_assets, weights.len()));
    }
    if let Some(index) = weights.iter().position(|w| !w.is_finite()) {
        return Err(SimError::non_finite_value("weights", index));
    }
    let sum: f64 = weights.iter().sum();
    if (sum - 1.0).abs() > 1e-8 + tolerance {
        return Err(InvalidInputError::WeightSum { sum, tolerance }.into());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_weight_validation() {
        assert!(validate_weights(&[0.6, 0.4], 2, 0.01).is_ok());
        assert!(validate_weights(&[0.6, 0.405], 2, 0.01).is_ok());
        assert!(validate_weights(&[1.2, -0.2], 2, 0.01).is_ok());

        let err = validate_weights(&[0.5, 0.4], 2, 0.01).unwrap_err();
        assert!(matches!(
            err,
            SimError::InvalidInput(InvalidInputError::WeightSum { .. })
        ));

        let err = validate_weights(&[1.0], 2, 0.01).unwrap_err();
        assert_eq!(err, SimError::dimension_mismatch("weight count", 2, 1));

        let err = validate_weights(&[f64::NAN, 1.0], 2, 0.01).unwrap_err();
        assert!(err.is_invalid_input());
    }

    #[test]
    fn test_error_messages_carry_context() {
        let err: SimError = InvalidInputError::NonPositivePrice {
            asset: "GC=F".to_string(),
            row: 3,
            value: -1.5,
        }
        .into();
        let msg = err.to_string();
        assert!(msg.contains("GC=F"));
        assert!(msg.contains("row 3"));
        assert!(msg.contains("-1.5"));
    }
}
