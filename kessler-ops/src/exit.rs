//! Process exit statuses
//!
//! | code | meaning                                        |
//! |------|------------------------------------------------|
//! | 0    | success                                        |
//! | 1    | fatal: storage or configuration                |
//! | 2    | validation error (bad path, filter or input)   |
//! | 3    | partial failure: completed with record errors  |
//! | 4    | cancelled at the confirmation prompt           |

use kessler_common::field_path::FieldPathError;
use kessler_common::Error;
use std::process::ExitCode;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitStatus {
    Success,
    Fatal,
    Validation,
    PartialFailure,
    Cancelled,
}

impl ExitStatus {
    pub fn code(self) -> u8 {
        match self {
            ExitStatus::Success => 0,
            ExitStatus::Fatal => 1,
            ExitStatus::Validation => 2,
            ExitStatus::PartialFailure => 3,
            ExitStatus::Cancelled => 4,
        }
    }

    /// Classify a top-level error
    pub fn for_error(error: &anyhow::Error) -> Self {
        if error.downcast_ref::<FieldPathError>().is_some() {
            return ExitStatus::Validation;
        }
        match error.downcast_ref::<Error>() {
            Some(Error::FieldPath(_) | Error::InvalidInput(_)) => ExitStatus::Validation,
            _ => ExitStatus::Fatal,
        }
    }

    /// Success unless some records failed
    pub fn from_error_count(errors: usize) -> Self {
        if errors > 0 {
            ExitStatus::PartialFailure
        } else {
            ExitStatus::Success
        }
    }
}

impl From<ExitStatus> for ExitCode {
    fn from(status: ExitStatus) -> Self {
        ExitCode::from(status.code())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Context;

    #[test]
    fn test_validation_errors_survive_context() {
        let err: anyhow::Result<()> = Err(Error::InvalidInput("bad filter".into())).context("parsing --filter");
        assert_eq!(ExitStatus::for_error(&err.unwrap_err()), ExitStatus::Validation);

        let err = anyhow::Error::new(FieldPathError::Empty);
        assert_eq!(ExitStatus::for_error(&err), ExitStatus::Validation);
    }

    #[test]
    fn test_other_errors_are_fatal() {
        let err = anyhow::Error::new(Error::Config("broken".into()));
        assert_eq!(ExitStatus::for_error(&err), ExitStatus::Fatal);
        assert_eq!(ExitStatus::for_error(&anyhow::anyhow!("boom")), ExitStatus::Fatal);
    }

    #[test]
    fn test_codes() {
        assert_eq!(ExitStatus::Success.code(), 0);
        assert_eq!(ExitStatus::Cancelled.code(), 4);
        assert_eq!(ExitStatus::from_error_count(0), ExitStatus::Success);
        assert_eq!(ExitStatus::from_error_count(2), ExitStatus::PartialFailure);
    }
}
