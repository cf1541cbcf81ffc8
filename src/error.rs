use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised while reading a trace or answering a query over it.
///
/// Double frees are not errors: they are collected as [`crate::Anomaly`]
/// records and replay continues.
#[derive(Debug, Error)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("line {line}: {reason}")]
    Parse { line: usize, reason: String },

    #[error(
        "malformed event #{index}{}: `{function}` at {address:#x} has no size",
        line_suffix(.line)
    )]
    MalformedEvent {
        index: usize,
        line: Option<usize>,
        function: String,
        address: u64,
    },

    #[error("invalid query parameter `{name}`: {reason}")]
    InvalidQuery { name: &'static str, reason: String },

    #[error("failed to serialize report: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    pub(crate) fn parse(line: usize, reason: impl Into<String>) -> Self {
        Error::Parse {
            line,
            reason: reason.into(),
        }
    }
}

fn line_suffix(line: &Option<usize>) -> String {
    line.map(|l| format!(" (line {l})")).unwrap_or_default()
}
