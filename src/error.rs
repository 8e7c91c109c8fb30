use std::path::PathBuf;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Missing or invalid model configuration; the AI client stays uninitialized.
    #[error("{0}")]
    Config(String),

    /// Bad user input for a setup or management step; the step is re-prompted.
    #[error("{0}")]
    Validation(String),

    #[error("could not write {}: {source}", path.display())]
    Persistence {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Failure talking to the model API. Shown to the user as text.
    #[error("{0}")]
    Client(String),
}

impl Error {
    pub fn persistence(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Error::Persistence {
            path: path.into(),
            source,
        }
    }
}

impl From<reqwest::Error> for Error {
    fn from(e: reqwest::Error) -> Self {
        Error::Client(e.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Client(format!("unexpected response payload: {e}"))
    }
}
