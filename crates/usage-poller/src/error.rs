use std::fmt;

use thiserror::Error;

pub type CollectResult<T> = Result<T, CollectError>;

/// Failure of a single metric collection
#[derive(Debug, Error)]
pub enum CollectError {
    /// Query or command could not be executed
    #[error("transient I/O failure: {0}")]
    TransientIo(String),

    /// Output or result set could not be turned into a value
    #[error("malformed input: {0}")]
    MalformedInput(String),

    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("no strategy registered for metric '{0}'")]
    UnknownMetric(String),
}

/// Coarse failure class used for logging and containment decisions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    TransientIo,
    MalformedInput,
    Configuration,
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::TransientIo => "transient-io",
            Self::MalformedInput => "malformed-input",
            Self::Configuration => "configuration",
        };
        f.write_str(name)
    }
}

impl CollectError {
    pub fn kind(&self) -> FailureKind {
        match self {
            Self::TransientIo(_) => FailureKind::TransientIo,
            Self::MalformedInput(_) => FailureKind::MalformedInput,
            Self::Configuration(_) | Self::UnknownMetric(_) => FailureKind::Configuration,
        }
    }
}

impl From<rusqlite::Error> for CollectError {
    fn from(error: rusqlite::Error) -> Self {
        match error {
            rusqlite::Error::InvalidColumnType(..)
            | rusqlite::Error::InvalidColumnIndex(_)
            | rusqlite::Error::InvalidColumnName(_)
            | rusqlite::Error::FromSqlConversionFailure(..)
            | rusqlite::Error::IntegralValueOutOfRange(..)
            | rusqlite::Error::QueryReturnedNoRows => Self::MalformedInput(error.to_string()),
            other => Self::TransientIo(other.to_string()),
        }
    }
}

impl From<std::io::Error> for CollectError {
    fn from(error: std::io::Error) -> Self {
        Self::TransientIo(error.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sqlite_shape_errors_are_malformed() {
        let error = CollectError::from(rusqlite::Error::QueryReturnedNoRows);
        assert_eq!(error.kind(), FailureKind::MalformedInput);

        let error = CollectError::from(rusqlite::Error::InvalidColumnIndex(3));
        assert_eq!(error.kind(), FailureKind::MalformedInput);
    }

    #[test]
    fn other_sqlite_errors_are_transient() {
        let error = CollectError::from(rusqlite::Error::InvalidQuery);
        assert_eq!(error.kind(), FailureKind::TransientIo);
    }

    #[test]
    fn io_errors_are_transient() {
        let error = CollectError::from(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            "no such probe",
        ));
        assert_eq!(error.kind(), FailureKind::TransientIo);
        assert!(error.to_string().contains("no such probe"));
    }

    #[test]
    fn unknown_metric_is_configuration() {
        let error = CollectError::UnknownMetric("db.x".to_string());
        assert_eq!(error.kind(), FailureKind::Configuration);
        assert_eq!(error.kind().to_string(), "configuration");
    }
}
