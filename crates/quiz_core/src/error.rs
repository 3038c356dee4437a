use thiserror::Error;

/// The only failure the image collaborator reports. Not-found, transport and
/// server errors are deliberately collapsed into one kind.
#[derive(Debug, Clone, Error)]
#[error("failed to fetch flag for '{country}': {reason}")]
pub struct FetchError {
    pub country: String,
    pub reason: String,
}

impl FetchError {
    pub fn new(country: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            country: country.into(),
            reason: reason.into(),
        }
    }
}

#[derive(Debug, Error)]
pub enum RoundError {
    #[error(transparent)]
    Fetch(#[from] FetchError),
    #[error("game already started")]
    AlreadyStarted,
    #[error("game has not been started")]
    NotStarted,
    #[error("no flag is currently displayed")]
    NothingToReveal,
    #[error("current flag is already revealed")]
    AlreadyRevealed,
}

impl RoundError {
    /// Precondition violations, as opposed to collaborator failures.
    pub fn is_precondition(&self) -> bool {
        !matches!(self, Self::Fetch(_))
    }
}
