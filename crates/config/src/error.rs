use std::path::PathBuf;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("failed to read {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to write {}: {source}", .path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse {} as {format}: {message}", .path.display())]
    Parse {
        path: PathBuf,
        format: &'static str,
        message: String,
    },

    #[error("unsupported config format: .{extension}")]
    UnsupportedFormat { extension: String },

    #[error("failed to serialize config: {message}")]
    Serialize { message: String },
}

impl Error {
    #[must_use]
    pub fn parse(path: impl Into<PathBuf>, format: &'static str, err: impl std::fmt::Display) -> Self {
        Self::Parse {
            path: path.into(),
            format,
            message: err.to_string(),
        }
    }
}
