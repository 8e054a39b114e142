//! Error types for kic

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("command failed ({reason}): {command}\noutput: {output}")]
    Execution {
        command: String,
        output: String,
        reason: String,
    },

    #[error("unexpected output: {0}")]
    Parse(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("address resolution failed: {0}")]
    Resolution(String),

    #[error("template error: {0}")]
    Template(#[from] tera::Error),

    #[error("Invalid state: node is {current}, expected {expected}")]
    InvalidState { current: String, expected: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("{context}: {source}")]
    Context {
        context: String,
        #[source]
        source: Box<Error>,
    },
}

pub type Result<T> = std::result::Result<T, Error>;

/// Coarse classification of an [`Error`], stable across context wrapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Execution,
    Parse,
    Config,
    Resolution,
    InvalidState,
    Io,
}

impl Error {
    /// Kind of the innermost error, looking through any added context
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Execution { .. } => ErrorKind::Execution,
            Error::Parse(_) | Error::Json(_) => ErrorKind::Parse,
            Error::Config(_) | Error::Template(_) => ErrorKind::Config,
            Error::Resolution(_) => ErrorKind::Resolution,
            Error::InvalidState { .. } => ErrorKind::InvalidState,
            Error::Io(_) => ErrorKind::Io,
            Error::Context { source, .. } => source.kind(),
        }
    }

    /// Captured process output, if this error came from a failed command
    pub fn output(&self) -> Option<&str> {
        match self {
            Error::Execution { output, .. } => Some(output),
            Error::Context { source, .. } => source.output(),
            _ => None,
        }
    }

    pub(crate) fn execution(command: impl ToString, output: impl Into<String>, reason: impl Into<String>) -> Self {
        Error::Execution {
            command: command.to_string(),
            output: output.into(),
            reason: reason.into(),
        }
    }
}

/// Adds operation context to an error as it unwinds
pub trait Context<T> {
    fn context(self, context: impl Into<String>) -> Result<T>;

    fn with_context<F, S>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> S,
        S: Into<String>;
}

impl<T, E: Into<Error>> Context<T> for std::result::Result<T, E> {
    fn context(self, context: impl Into<String>) -> Result<T> {
        self.map_err(|e| Error::Context {
            context: context.into(),
            source: Box::new(e.into()),
        })
    }

    fn with_context<F, S>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> S,
        S: Into<String>,
    {
        self.map_err(|e| Error::Context {
            context: f().into(),
            source: Box::new(e.into()),
        })
    }
}
