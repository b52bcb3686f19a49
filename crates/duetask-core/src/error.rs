//! Crate-level error: every boundary error of the core in one enum.

use thiserror::Error;

use crate::app::{BuildError, CatchUpError, ScheduleError};
use crate::config::ConfigError;
use crate::domain::ErrorKind;
use crate::ports::{QueueError, StoreError};

#[derive(Debug, Error)]
pub enum CoreError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Queue(#[from] QueueError),

    #[error(transparent)]
    Schedule(#[from] ScheduleError),

    #[error(transparent)]
    CatchUp(#[from] CatchUpError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Build(#[from] BuildError),
}

impl CoreError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            CoreError::Store(err) => err.kind(),
            CoreError::Queue(err) => err.kind(),
            CoreError::Schedule(ScheduleError::Unavailable(err)) => err.kind(),
            CoreError::Schedule(ScheduleError::Store(err)) => err.kind(),
            CoreError::CatchUp(err) => err.kind(),
            CoreError::Config(_) => ErrorKind::Permanent,
            CoreError::Build(BuildError::Config(_)) => ErrorKind::Permanent,
            CoreError::Build(BuildError::Store(err)) => err.kind(),
        }
    }

    pub fn is_retryable(&self) -> bool {
        self.kind().is_retryable()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_follow_the_wrapped_error() {
        let store: CoreError = StoreError::Unavailable("down".into()).into();
        assert!(store.is_retryable());

        let closed: CoreError = ScheduleError::from(QueueError::Closed).into();
        assert_eq!(closed.kind(), ErrorKind::Permanent);

        let config: CoreError = ConfigError::Invalid("bad".into()).into();
        assert!(!config.is_retryable());

        let incomplete: CoreError = CatchUpError::Incomplete {
            remaining: 3,
            passes: 2,
        }
        .into();
        assert!(incomplete.is_retryable());
        assert!(incomplete.to_string().contains("3 overdue"));
    }
}
