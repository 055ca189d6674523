use std::fmt;
use std::io;

use crate::grammars::CompileError;

pub(crate) type LucernaResult<T> = Result<T, Error>;

/// Errors that can occur during lucerna usage
#[derive(Debug)]
#[non_exhaustive]
pub enum Error {
    /// An I/O error occurred when reading a grammar or a settings file
    Io(io::Error),

    /// JSON parsing failed when loading a grammar or settings.
    Json(serde_json::Error),

    /// A grammar or settings file was parsed but could not be compiled.
    /// The grammar is rejected as a whole when that happens.
    Compile(CompileError),

    /// A grammar was not found in the registry.
    /// Only happens when asking to tokenize something with a grammar we can't find
    GrammarNotFound(String),

    /// A regex compilation error occurred during tokenization.
    /// End patterns are instantiated with the text captured by their begin pattern so
    /// they can only be compiled once we see the text.
    TokenizeRegex(String),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Io(err) => write!(f, "I/O error: {}", err),
            Error::Json(err) => write!(f, "JSON parsing error: {}", err),
            Error::Compile(err) => write!(f, "grammar compilation error: {}", err),
            Error::GrammarNotFound(name) => write!(f, "grammar '{}' not found", name),
            Error::TokenizeRegex(message) => write!(f, "regex compilation error: {}", message),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Io(err) => Some(err),
            Error::Json(err) => Some(err),
            Error::Compile(err) => Some(err),
            Error::GrammarNotFound(_) | Error::TokenizeRegex(_) => None,
        }
    }
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Self {
        Error::Io(err)
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Json(err)
    }
}

impl From<CompileError> for Error {
    fn from(err: CompileError) -> Self {
        Error::Compile(err)
    }
}
