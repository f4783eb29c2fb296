//! Error types for the Flotilla control plane
//!
//! Errors are structured with fields to aid debugging in production.
//! Each error variant includes contextual information like hostnames,
//! field paths, and underlying causes.

use thiserror::Error;

/// Main error type for Flotilla operations
#[derive(Debug, Error)]
pub enum Error {
    /// Kubernetes API error
    #[error("kubernetes error: {source}")]
    Kube {
        /// The underlying kube-rs error
        #[from]
        source: kube::Error,
    },

    /// VIP allocation error against the address-store ConfigMap
    #[error("address allocation error for {se_name}: {message}")]
    Allocation {
        /// ServiceEntry name the address was requested for
        se_name: String,
        /// Description of what failed
        message: String,
    },

    /// Validation error for configuration or persisted state
    #[error("validation error: {message}")]
    Validation {
        /// Description of what's invalid
        message: String,
        /// The invalid field path (e.g., "entryAddresses")
        field: Option<String>,
    },

    /// Serialization/deserialization error
    #[error("serialization error: {message}")]
    Serialization {
        /// Description of what failed
        message: String,
        /// The resource kind being serialized (if known)
        kind: Option<String>,
    },

    /// Internal/operational error
    #[error("internal error [{context}]: {message}")]
    Internal {
        /// Description of what failed
        message: String,
        /// Context where the error occurred (e.g., "resolver", "writer")
        context: String,
    },
}

impl Error {
    /// Create an allocation error for a ServiceEntry name
    pub fn allocation(se_name: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Allocation {
            se_name: se_name.into(),
            message: msg.into(),
        }
    }

    /// Create a validation error with a field path
    pub fn validation_for_field(field: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Validation {
            message: msg.into(),
            field: Some(field.into()),
        }
    }

    /// Create a serialization error with resource kind context
    pub fn serialization_for_kind(kind: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Serialization {
            message: msg.into(),
            kind: Some(kind.into()),
        }
    }

    /// Create an internal error with context
    pub fn internal_with_context(context: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Internal {
            message: msg.into(),
            context: context.into(),
        }
    }

    /// Check if this error is retryable
    ///
    /// Validation and serialization errors are not retryable (require a fix).
    /// Allocation errors are retried in-line by the allocation path.
    /// Kubernetes errors depend on the status code: 4xx (conflict excepted)
    /// means the request itself is wrong and a retry cannot help.
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Kube { source } => !matches!(
                source,
                kube::Error::Api(ae) if (400..500).contains(&ae.code) && ae.code != 409
            ),
            Error::Allocation { .. } => true,
            Error::Validation { .. } => false,
            Error::Serialization { .. } => false,
            Error::Internal { .. } => true,
        }
    }

    /// Whether this is a Kubernetes optimistic-concurrency conflict.
    /// The writer demotes conflicts to a debug log; the losing write is
    /// re-driven by the next watcher event, not retried in-line.
    pub fn is_conflict(&self) -> bool {
        matches!(self, Error::Kube { source: kube::Error::Api(ae) } if ae.code == 409)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kube::core::ErrorResponse;

    fn kube_api_error(code: u16) -> Error {
        Error::from(kube::Error::Api(ErrorResponse {
            status: "Failure".to_string(),
            message: "test".to_string(),
            reason: "test".to_string(),
            code,
        }))
    }

    #[test]
    fn allocation_errors_are_retryable() {
        let err = Error::allocation("stage.greeting.global-se", "configmap write conflict");
        assert!(err.is_retryable());
        assert!(err.to_string().contains("stage.greeting.global-se"));
    }

    #[test]
    fn validation_errors_are_not_retryable() {
        let err = Error::validation_for_field("entryAddresses", "duplicate VIP 240.0.10.1");
        assert!(!err.is_retryable());
        match &err {
            Error::Validation { field, .. } => {
                assert_eq!(field.as_deref(), Some("entryAddresses"));
            }
            _ => panic!("Expected Validation variant"),
        }
    }

    #[test]
    fn serialization_errors_carry_kind() {
        let err = Error::serialization_for_kind("ServiceEntry", "missing field `hosts`");
        match &err {
            Error::Serialization { kind, .. } => {
                assert_eq!(kind.as_deref(), Some("ServiceEntry"));
            }
            _ => panic!("Expected Serialization variant"),
        }
        assert!(!err.is_retryable());
    }

    #[test]
    fn internal_errors_carry_context() {
        let err = Error::internal_with_context("writer", "cluster disappeared mid-write");
        assert!(err.is_retryable());
        assert!(err.to_string().contains("[writer]"));
    }

    #[test]
    fn conflicts_are_retryable_and_detected() {
        let conflict = kube_api_error(409);
        assert!(conflict.is_conflict());
        assert!(conflict.is_retryable());
    }

    #[test]
    fn client_errors_are_neither_conflicts_nor_retryable() {
        let not_found = kube_api_error(404);
        assert!(!not_found.is_conflict());
        assert!(!not_found.is_retryable());

        let server_error = kube_api_error(500);
        assert!(!server_error.is_conflict());
        assert!(server_error.is_retryable());
    }
}
