use core::fmt;

use crate::profile::ProfileError;

/// Errors returned synchronously, before any run starts.
#[derive(Debug, Clone, PartialEq)]
pub enum Error {
    InvalidProfile(ProfileError),
    InvalidParams(&'static str),
    /// A run is already `Running` in the status store.
    AlreadyRunning,
    /// The store cannot be cleared while a run is active.
    RunInProgress,
    /// A recipe file could not be decoded.
    Recipe(&'static str),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::InvalidProfile(e) => write!(f, "invalid profile: {}", e),
            Error::InvalidParams(reason) => write!(f, "invalid pid parameters: {}", reason),
            Error::AlreadyRunning => write!(f, "process is already running"),
            Error::RunInProgress => write!(f, "process is alive"),
            Error::Recipe(reason) => write!(f, "invalid recipe: {}", reason),
        }
    }
}

impl std::error::Error for Error {}

impl From<ProfileError> for Error {
    fn from(e: ProfileError) -> Self {
        Error::InvalidProfile(e)
    }
}
