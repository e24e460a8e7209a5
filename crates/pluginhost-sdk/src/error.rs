//! Extension error types.

/// Errors an extension (or the glue around it) can report.
#[derive(Debug, thiserror::Error)]
pub enum ExtensionError {
    /// The input could not be processed.
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Execution failed.
    #[error("Execution failed: {0}")]
    ExecutionFailed(String),

    /// The extension panicked while executing.
    #[error("Extension panicked: {0}")]
    Panicked(String),

    /// A descriptor failed structural validation.
    #[error("Invalid descriptor: {0}")]
    InvalidDescriptor(String),

    /// The extension could not be instantiated.
    #[error("Instantiation failed: {0}")]
    InstantiationFailed(String),

    /// Custom error
    #[error("{0}")]
    Custom(String),
}

/// Extension result type
pub type Result<T> = std::result::Result<T, ExtensionError>;

impl ExtensionError {
    /// Build an error from a caught panic payload.
    pub fn from_panic(payload: &(dyn std::any::Any + Send)) -> Self {
        let message = if let Some(s) = payload.downcast_ref::<&str>() {
            (*s).to_string()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "unknown panic payload".to_string()
        };
        ExtensionError::Panicked(message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = ExtensionError::ExecutionFailed("test error".to_string());
        assert_eq!(err.to_string(), "Execution failed: test error");

        let err = ExtensionError::Custom("plain".to_string());
        assert_eq!(err.to_string(), "plain");
    }

    #[test]
    fn test_from_panic_payloads() {
        let payload = std::panic::catch_unwind(|| panic!("boom")).unwrap_err();
        let err = ExtensionError::from_panic(payload.as_ref());
        assert_eq!(err.to_string(), "Extension panicked: boom");

        let payload = std::panic::catch_unwind(|| panic!("{} items", 3)).unwrap_err();
        let err = ExtensionError::from_panic(payload.as_ref());
        assert_eq!(err.to_string(), "Extension panicked: 3 items");
    }
}
