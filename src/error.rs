use std::{fmt, time::Duration};

use anyhow::anyhow;

/// Failures surfaced by the client operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("{0} not found")]
    NotFound(String),
    /// The object changed between read and write.
    #[error("conflict on {0}: the object has been modified")]
    Conflict(String),
    #[error("timeout after {0:?} waiting for condition")]
    Timeout(Duration),
    #[error(transparent)]
    Fatal(#[from] anyhow::Error),
}

impl Error {
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::NotFound(_))
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, Error::Conflict(_))
    }
}

impl From<kube::Error> for Error {
    fn from(error: kube::Error) -> Self {
        match error {
            kube::Error::Api(response) if response.code == 404 => Error::NotFound(response.message),
            kube::Error::Api(response) if response.code == 409 => Error::Conflict(response.message),
            other => Error::Fatal(anyhow!(other)),
        }
    }
}

/// Terminal failure of a convergence wait.
#[derive(Debug, thiserror::Error)]
pub enum WaitError<T: fmt::Debug> {
    #[error("timeout after {waited:?} waiting for condition")]
    TimedOut { waited: Duration, last: Option<T> },
    #[error(transparent)]
    Fatal(Error),
}

impl<T: fmt::Debug> WaitError<T> {
    /// Last object seen before the deadline, if any event arrived at all.
    pub fn last_observed(&self) -> Option<&T> {
        match self {
            WaitError::TimedOut { last, .. } => last.as_ref(),
            WaitError::Fatal(_) => None,
        }
    }
}

impl<T: fmt::Debug> From<WaitError<T>> for Error {
    fn from(error: WaitError<T>) -> Self {
        match error {
            WaitError::TimedOut { waited, .. } => Error::Timeout(waited),
            WaitError::Fatal(error) => error,
        }
    }
}

#[cfg(test)]
mod tests {
    use kube::core::ErrorResponse;

    use super::*;

    fn api_error(code: u16) -> kube::Error {
        kube::Error::Api(ErrorResponse {
            status: "Failure".to_string(),
            message: format!("status {code}"),
            reason: String::new(),
            code,
        })
    }

    #[test]
    fn kube_status_codes_map_to_taxonomy() {
        assert!(Error::from(api_error(404)).is_not_found());
        assert!(Error::from(api_error(409)).is_conflict());
        assert!(matches!(Error::from(api_error(500)), Error::Fatal(_)));
    }

    #[test]
    fn timed_out_wait_keeps_last_object() {
        let error: WaitError<&str> = WaitError::TimedOut {
            waited: Duration::from_secs(3),
            last: Some("app"),
        };
        assert_eq!(error.last_observed(), Some(&"app"));
        assert!(matches!(Error::from(error), Error::Timeout(d) if d == Duration::from_secs(3)));
    }
}
