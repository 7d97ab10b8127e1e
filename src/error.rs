use thiserror::Error;

/// Errors surfaced by the scheduler and its collaborators.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Error {
    /// An allocation failed.
    #[error("out of memory")]
    OutOfMemory,
    /// A DMA buffer or bounce buffer is temporarily unavailable.
    ///
    /// This is the only locally-recovered condition: the scheduler releases
    /// the operation and re-queues the request instead of failing it.
    #[error("resource busy")]
    Busy,
    /// The submitting team may not access the buffer's pages.
    #[error("permission denied")]
    PermissionDenied,
    /// The buffer's pages could not be locked for I/O.
    #[error("memory lock failed: {0}")]
    LockFailed(String),
    /// The DMA translator rejected the request slice.
    #[error("translation failed: {0}")]
    TranslationFailed(String),
    /// The device reported an I/O failure.
    #[error("device fault: {0}")]
    DeviceFault(String),
    /// The request was aborted by the client.
    #[error("aborted")]
    Aborted,
    /// The scheduler is shutting down.
    #[error("shutting down")]
    ShuttingDown,
    /// Invalid configuration or a missing collaborator.
    #[error("invalid setup: {0}")]
    InvalidSetup(String),
}

/// Completion status of a request or operation.
///
/// `Pending` is the in-flight sentinel. Completion paths treat any other
/// value as terminal, which is what makes a duplicate completion delivery
/// a no-op.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IoStatus {
    /// Still being processed.
    Pending,
    /// Completed successfully.
    Ok,
    /// Completed with an error.
    Failed(Error),
}

impl IoStatus {
    pub fn is_pending(&self) -> bool {
        matches!(self, IoStatus::Pending)
    }

    pub fn is_ok(&self) -> bool {
        matches!(self, IoStatus::Ok)
    }

    /// Whether the status is a final verdict (anything but `Pending`).
    pub fn is_terminal(&self) -> bool {
        !self.is_pending()
    }

    /// The error carried by a failed status.
    pub fn error(&self) -> Option<&Error> {
        match self {
            IoStatus::Failed(err) => Some(err),
            _ => None,
        }
    }
}

impl From<Result<(), Error>> for IoStatus {
    fn from(result: Result<(), Error>) -> Self {
        match result {
            Ok(()) => IoStatus::Ok,
            Err(err) => IoStatus::Failed(err),
        }
    }
}
