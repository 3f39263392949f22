use std::fmt;
use std::io;
use std::result;

#[derive(fmt::Debug)]
pub enum Error {
    /// Invalid configuration detected while constructing a cube: unknown
    /// reducer or cube type, mismatched views for a join, malformed chunk
    /// sizes, and the like. Fatal and non-retryable.
    Config(String),

    /// A band or cube parameter referred to by name does not exist.
    BadName(String),

    /// A pixel expression failed to compile.
    Expr(String),

    /// The geospatial backend failed to open or warp a source raster.
    Gdal(String),

    /// A stream child process failed.
    Stream(String),

    Io(io::Error),
    Json(serde_json::Error),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Config(msg) => write!(f, "invalid configuration: {msg}"),
            Self::BadName(name) => write!(f, "no such name: {name}"),
            Self::Expr(msg) => write!(f, "expression error: {msg}"),
            Self::Gdal(msg) => write!(f, "raster backend error: {msg}"),
            Self::Stream(msg) => write!(f, "stream error: {msg}"),
            Self::Io(err) => write!(f, "i/o error: {err}"),
            Self::Json(err) => write!(f, "json error: {err}"),
        }
    }
}

impl std::error::Error for Error {}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Self {
        Self::Io(err)
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Self::Json(err)
    }
}

pub type Result<T> = result::Result<T, Error>;
