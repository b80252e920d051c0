use thiserror::Error;

/// Failures the tracker distinguishes because each one has its own recovery policy.
/// Everything else travels as [anyhow::Error].
#[derive(Error, Debug)]
pub enum TrackerError {
    /// Active tab or its URL is unavailable. The tracker goes idle.
    #[error("Can't resolve active tab: {0}")]
    TabResolution(String),

    /// Local store failure. The triggering event is dropped; the next flush retries.
    #[error("Local storage error: {0:#}")]
    Storage(anyhow::Error),

    /// Sync attempted without a signed-in user. Pushes are skipped, nothing is lost.
    #[error("No authenticated user")]
    NotAuthenticated,

    #[error("Remote write failed for {doc_id}: {cause:#}")]
    RemoteWrite { doc_id: String, cause: anyhow::Error },

    #[error("Remote read failed for {doc_id}: {cause:#}")]
    RemoteRead { doc_id: String, cause: anyhow::Error },
}

impl From<anyhow::Error> for TrackerError {
    fn from(err: anyhow::Error) -> Self {
        TrackerError::Storage(err)
    }
}

pub type TrackerResult<T> = Result<T, TrackerError>;
