//! Deadlines and bounded retries for calls to external services.

use std::{fmt, future::Future, time::Duration};

use tracing::warn;

/// Failure of a call to an external service.
#[derive(Debug)]
pub enum Upstream<E> {
    TimedOut {
        operation: &'static str,
        limit: Duration,
    },
    Failed(E),
}

impl<E> Upstream<E> {
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::TimedOut { .. })
    }

    /// Returns the underlying service error, if the call completed.
    pub fn failure(&self) -> Option<&E> {
        match self {
            Self::Failed(err) => Some(err),
            Self::TimedOut { .. } => None,
        }
    }
}

impl<E: fmt::Display> fmt::Display for Upstream<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::TimedOut { operation, limit } => {
                write!(f, "{operation} timed out after {}ms", limit.as_millis())
            }
            Self::Failed(err) => write!(f, "{err}"),
        }
    }
}

impl<E: std::error::Error + 'static> std::error::Error for Upstream<E> {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Failed(err) => Some(err),
            Self::TimedOut { .. } => None,
        }
    }
}

/// Runs `call` under a deadline.
pub async fn with_deadline<T, E, F>(
    operation: &'static str,
    limit: Duration,
    call: F,
) -> Result<T, Upstream<E>>
where
    F: Future<Output = Result<T, E>>,
{
    match tokio::time::timeout(limit, call).await {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(err)) => Err(Upstream::Failed(err)),
        Err(_) => Err(Upstream::TimedOut { operation, limit }),
    }
}

/// Runs an idempotent read under a deadline, retrying once after a timeout
/// or a failure `is_transient` accepts.
///
/// Only for reads. Calls with side effects (token exchange, appends) go
/// through [`with_deadline`] alone.
pub async fn read_with_retry<T, E, F, Fut, P>(
    operation: &'static str,
    limit: Duration,
    is_transient: P,
    mut call: F,
) -> Result<T, Upstream<E>>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    P: Fn(&E) -> bool,
    E: fmt::Display,
{
    match with_deadline(operation, limit, call()).await {
        Ok(value) => Ok(value),
        Err(err) if err.failure().map_or(true, &is_transient) => {
            warn!(stage = "upstream", operation, error = %err, "retrying idempotent read once");
            with_deadline(operation, limit, call()).await
        }
        Err(err) => Err(err),
    }
}
