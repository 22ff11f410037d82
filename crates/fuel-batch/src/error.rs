//! Batch error types.

use std::sync::Arc;

/// Why a `load(key)` did not produce a value.
#[derive(Debug, thiserror::Error)]
pub enum LoadError<E> {
    /// The bulk function returned a different number of values than keys.
    #[error("batch function returned {actual} values for {expected} keys")]
    ContractViolation { expected: usize, actual: usize },

    /// The bulk function failed; every key of the batch shares this error.
    #[error("batch load failed: {0}")]
    Batch(Arc<E>),

    /// The batch was dropped before it produced a result.
    #[error("batch was dropped before completion")]
    Dropped,
}

impl<E> LoadError<E> {
    pub fn is_contract_violation(&self) -> bool {
        matches!(self, Self::ContractViolation { .. })
    }

    /// The bulk function's error, if that is what failed.
    pub fn batch_error(&self) -> Option<&E> {
        match self {
            Self::Batch(e) => Some(e),
            _ => None,
        }
    }

    pub(crate) fn dropped() -> Self {
        Self::Dropped
    }
}

impl<E> Clone for LoadError<E> {
    fn clone(&self) -> Self {
        match self {
            Self::ContractViolation { expected, actual } => Self::ContractViolation {
                expected: *expected,
                actual: *actual,
            },
            Self::Batch(e) => Self::Batch(Arc::clone(e)),
            Self::Dropped => Self::Dropped,
        }
    }
}

/// Why an `add(thunk)` did not produce a value.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BatchError<E> {
    /// This item's own request failed.
    #[error("request failed: {0}")]
    Request(E),

    /// The item was dropped before it ran to completion.
    #[error("request was dropped before completion")]
    Dropped,
}

impl<E> BatchError<E> {
    /// The request's own error, if that is what failed.
    pub fn request_error(&self) -> Option<&E> {
        match self {
            Self::Request(e) => Some(e),
            Self::Dropped => None,
        }
    }

    pub fn into_request_error(self) -> Option<E> {
        match self {
            Self::Request(e) => Some(e),
            Self::Dropped => None,
        }
    }

    pub(crate) fn dropped() -> Self {
        Self::Dropped
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_load_error_display() {
        let err: LoadError<String> = LoadError::ContractViolation {
            expected: 3,
            actual: 2,
        };
        assert_eq!(err.to_string(), "batch function returned 2 values for 3 keys");
        assert!(err.is_contract_violation());

        let err = LoadError::Batch(Arc::new("upstream down".to_string()));
        assert_eq!(err.to_string(), "batch load failed: upstream down");
        assert_eq!(err.batch_error().map(String::as_str), Some("upstream down"));
        assert!(!err.is_contract_violation());
    }

    #[test]
    fn test_load_error_clone_shares_batch_error() {
        let err = LoadError::Batch(Arc::new("boom".to_string()));
        let copy = err.clone();
        match (err, copy) {
            (LoadError::Batch(a), LoadError::Batch(b)) => assert!(Arc::ptr_eq(&a, &b)),
            _ => panic!("expected batch errors"),
        }
    }

    #[test]
    fn test_batch_error_accessors() {
        let err = BatchError::Request(404u16);
        assert_eq!(err.request_error(), Some(&404));
        assert_eq!(err.to_string(), "request failed: 404");
        assert_eq!(BatchError::<u16>::Dropped.into_request_error(), None);
    }
}
