/// Device directory errors
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum DeviceError {
    /// Backend could not establish its notification channel or native handles
    #[error("{backend} initialization failed: {details}")]
    InitializationFailed {
        /// Backend that failed to start
        backend: &'static str,
        /// Native failure details
        details: String,
    },

    /// A native query failed; cached device state is left untouched
    #[error("{backend} query failed: {details}")]
    QueryFailed {
        /// Backend that issued the query
        backend: &'static str,
        /// Native failure details
        details: String,
    },

    /// The backend thread is no longer reachable
    #[error("{backend} backend thread is not running")]
    ThreadCommunication {
        /// Backend whose thread went away
        backend: &'static str,
    },

    /// The manager is being disposed
    #[error("device manager has been stopped")]
    Stopped,

    /// Backend is unavailable on this platform or configuration
    #[error("unsupported: {0}")]
    Unsupported(String),
}

impl DeviceError {
    /// Creates an initialization failure for `backend`.
    pub fn initialization(backend: &'static str, details: impl std::fmt::Display) -> Self {
        DeviceError::InitializationFailed {
            backend,
            details: details.to_string(),
        }
    }

    /// Creates a transient query failure for `backend`.
    pub fn query(backend: &'static str, details: impl std::fmt::Display) -> Self {
        DeviceError::QueryFailed {
            backend,
            details: details.to_string(),
        }
    }

    /// Whether the failure is fatal for the manager as a whole.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            DeviceError::InitializationFailed { .. }
                | DeviceError::ThreadCommunication { .. }
                | DeviceError::Stopped
        )
    }
}
