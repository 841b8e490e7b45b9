use thiserror::Error;

/// Errors that end an attempt sequence.
///
/// A failing test run is not represented here: it is an ordinary
/// [`TestOutcome`](crate::runner::TestOutcome) that drives the next iteration.
#[derive(Debug, Error)]
pub enum Error {
    /// The model response could not be parsed or was missing a required field.
    #[error("malformed response: {reason}")]
    MalformedResponse { reason: String, raw: String },

    /// The squash step could not obtain a commit message.
    #[error("could not summarize attempt commits: {0}")]
    Summarization(String),

    /// The completion provider was unreachable or returned an error status.
    #[error("completion provider request failed: {0}")]
    Transport(String),

    #[error("`git {command}` failed: {stderr}")]
    Vcs { command: String, stderr: String },

    #[error("file watcher error: {0}")]
    Watch(#[from] notify::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl Error {
    pub fn malformed(reason: impl Into<String>, raw: impl Into<String>) -> Self {
        Error::MalformedResponse {
            reason: reason.into(),
            raw: raw.into(),
        }
    }
}

impl From<reqwest::Error> for Error {
    fn from(e: reqwest::Error) -> Self {
        Error::Transport(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, Error>;
