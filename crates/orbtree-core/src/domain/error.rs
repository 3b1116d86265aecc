//! Domain-level error taxonomy for orbtree.

/// orbtree domain errors.
#[derive(Debug, thiserror::Error)]
pub enum OrbError {
    /// Input that cannot be reconciled into a tree at all.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("invalid config: {0}")]
    InvalidConfig(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for orbtree domain operations.
pub type Result<T> = std::result::Result<T, OrbError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_input_display() {
        let err = OrbError::InvalidInput("record 3 has an empty branch name".to_string());
        assert!(err.to_string().contains("invalid input"));
        assert!(err.to_string().contains("record 3"));
    }

    #[test]
    fn test_serialization_error_converts() {
        let bad = serde_json::from_str::<serde_json::Value>("{not json").unwrap_err();
        let err: OrbError = bad.into();
        assert!(err.to_string().starts_with("serialization error"));
    }
}
