//! Error types for retried operations
use std::fmt;
use std::sync::Arc;

/// Cap the number of stored failures inside `RetryExhausted` to avoid unbounded growth.
pub const MAX_RETRY_FAILURES: usize = 10;

/// Outcome of a retried operation that did not succeed.
#[derive(Debug, Clone)]
pub enum RetryError<E> {
    /// Every allowed attempt failed.
    RetryExhausted { attempts: usize, failures: Arc<Vec<E>> },
    /// The operation failed with an error the retry predicate declined to retry.
    Inner(E),
}

impl<E: fmt::Display> fmt::Display for RetryError<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::RetryExhausted { attempts, failures } => {
                let recorded = failures.len();
                let truncated_note = if recorded < *attempts {
                    format!(" (recorded last {} failures)", recorded)
                } else {
                    String::new()
                };
                match failures.last() {
                    Some(last) => write!(
                        f,
                        "retry exhausted after {} attempts{}; last error: {}",
                        attempts, truncated_note, last
                    ),
                    None => write!(
                        f,
                        "retry exhausted after {} attempts{}; no recorded failures",
                        attempts, truncated_note
                    ),
                }
            }
            Self::Inner(e) => write!(f, "{}", e),
        }
    }
}

impl<E: std::error::Error + 'static> std::error::Error for RetryError<E> {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Inner(e) => Some(e),
            Self::RetryExhausted { failures, .. } => {
                failures.last().map(|e| e as &dyn std::error::Error)
            }
        }
    }
}

impl<E> RetryError<E> {
    /// Construct a `RetryExhausted` variant, keeping only the most recent
    /// `MAX_RETRY_FAILURES` failures.
    pub fn retry_exhausted(attempts: usize, failures: Vec<E>) -> Self {
        let trimmed = if failures.len() > MAX_RETRY_FAILURES {
            let skip = failures.len() - MAX_RETRY_FAILURES;
            failures.into_iter().skip(skip).collect()
        } else {
            failures
        };
        RetryError::RetryExhausted { attempts, failures: Arc::new(trimmed) }
    }

    pub fn is_retry_exhausted(&self) -> bool {
        matches!(self, Self::RetryExhausted { .. })
    }

    pub fn is_inner(&self) -> bool {
        matches!(self, Self::Inner(_))
    }

    /// Total attempts made, if the retry budget was spent.
    pub fn attempts(&self) -> Option<usize> {
        match self {
            Self::RetryExhausted { attempts, .. } => Some(*attempts),
            Self::Inner(_) => None,
        }
    }

    /// Recorded failures for `RetryExhausted`, oldest first.
    pub fn failures(&self) -> Option<&[E]> {
        match self {
            Self::RetryExhausted { failures, .. } => Some(failures.as_slice()),
            Self::Inner(_) => None,
        }
    }

    /// The most recent underlying error, whichever variant this is.
    pub fn last_error(&self) -> Option<&E> {
        match self {
            Self::RetryExhausted { failures, .. } => failures.last(),
            Self::Inner(e) => Some(e),
        }
    }

    pub fn into_inner(self) -> Option<E> {
        match self {
            Self::Inner(e) => Some(e),
            Self::RetryExhausted { .. } => None,
        }
    }
}
