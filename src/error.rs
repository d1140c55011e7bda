use crate::{
    options::MergeError,
    runner::{host::RequirementError, CommandError},
    source::SourceError,
    verify::VerificationError,
};
use std::fmt;

/// Coarse classification of a failed operation, derived from the typed
/// errors found anywhere in an [`anyhow::Error`] chain.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorKind {
    RequirementMissing,
    SourceAcquisitionFailure,
    CommandFailure,
    UnmergeableOption,
    VerificationFailure,
    Cancelled,
    Other,
}

impl ErrorKind {
    pub fn of(err: &anyhow::Error) -> Self {
        for cause in err.chain() {
            if cause.downcast_ref::<RequirementError>().is_some() {
                return ErrorKind::RequirementMissing;
            }

            if let Some(source_err) = cause.downcast_ref::<SourceError>() {
                if matches!(source_err, SourceError::Cancelled) {
                    return ErrorKind::Cancelled;
                }
                return ErrorKind::SourceAcquisitionFailure;
            }

            if let Some(command_err) = cause.downcast_ref::<CommandError>() {
                if matches!(command_err, CommandError::Cancelled { .. }) {
                    return ErrorKind::Cancelled;
                }
                return ErrorKind::CommandFailure;
            }

            if cause.downcast_ref::<MergeError>().is_some() {
                return ErrorKind::UnmergeableOption;
            }

            if cause.downcast_ref::<VerificationError>().is_some() {
                return ErrorKind::VerificationFailure;
            }
        }

        ErrorKind::Other
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorKind::RequirementMissing => "requirement missing",
            ErrorKind::SourceAcquisitionFailure => "source acquisition failure",
            ErrorKind::CommandFailure => "command failure",
            ErrorKind::UnmergeableOption => "unmergeable option",
            ErrorKind::VerificationFailure => "verification failure",
            ErrorKind::Cancelled => "cancelled",
            ErrorKind::Other => "other",
        };

        write!(f, "{}", name)
    }
}
