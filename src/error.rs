use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{}", .0.join("; "))]
pub struct ValidationError(pub Vec<String>);

/// Failures on the explicit save paths. These are always surfaced to the user.
#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("not signed in")]
    Unauthenticated,
    #[error("invalid item")]
    Invalid(#[from] ValidationError),
    #[error("no highlight to save")]
    NothingToSave,
    #[error("item store rejected the write")]
    Store(#[source] Box<dyn std::error::Error + Send + Sync + 'static>),
}

impl CaptureError {
    pub fn store(err: anyhow::Error) -> Self {
        CaptureError::Store(err.into())
    }
}
