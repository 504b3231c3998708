//! Status codes for Detour operations

/// Status of an asynchronous or partially completed Detour operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(
    feature = "serialization",
    derive(serde::Serialize, serde::Deserialize)
)]
pub enum Status {
    /// Operation was successful
    Success,
    /// Operation succeeded but did not reach the requested goal
    PartialResult,
    /// Operation failed
    #[default]
    Failure,
    /// Query already in progress
    InProgress,
    /// Provided parameter was invalid
    InvalidParam,
    /// Value does not exist or is not found
    NotFound,
}

impl Status {
    /// Checks if the status is a failure
    pub fn is_failure(&self) -> bool {
        matches!(
            self,
            Status::Failure | Status::InvalidParam | Status::NotFound
        )
    }

    /// Checks if the status is a success
    pub fn is_success(&self) -> bool {
        matches!(self, Status::Success | Status::PartialResult)
    }

    /// Checks if the operation is still running
    pub fn is_in_progress(&self) -> bool {
        *self == Status::InProgress
    }

    /// Checks if a successful result only partially reached its goal
    pub fn is_partial(&self) -> bool {
        *self == Status::PartialResult
    }
}

impl std::fmt::Display for Status {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Status::Success => write!(f, "Success"),
            Status::PartialResult => write!(f, "Partial result"),
            Status::Failure => write!(f, "Failure"),
            Status::InProgress => write!(f, "Operation in progress"),
            Status::InvalidParam => write!(f, "Invalid parameter"),
            Status::NotFound => write!(f, "Value not found"),
        }
    }
}
