use thiserror::Error;

#[derive(Error, Debug)]
pub enum MatrixError {
    #[error("layout error: {0}")]
    Layout(String),
    #[error("config error: {0}")]
    Config(String),
    #[error("embedding dimension mismatch: expected {expected}, found {found}")]
    DimensionMismatch { expected: usize, found: usize },
    #[error("provider error: {0}")]
    Provider(String),
    #[error("no context retrieved for query")]
    NoContext,
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("workbook error: {0}")]
    Workbook(#[from] calamine::Error),
    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),
    #[error("serde json error: {0}")]
    SerdeJson(#[from] serde_json::Error),
}

impl MatrixError {
    pub fn layout(message: impl Into<String>) -> Self {
        Self::Layout(message.into())
    }

    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    /// Wraps an upstream provider failure, keeping the whole cause chain.
    pub fn provider(err: impl std::fmt::Display) -> Self {
        Self::Provider(format!("{err:#}"))
    }

    pub fn is_layout(&self) -> bool {
        matches!(self, Self::Layout(_))
    }
}

pub type Result<T> = std::result::Result<T, MatrixError>;

impl From<anyhow::Error> for MatrixError {
    fn from(value: anyhow::Error) -> Self {
        Self::Provider(format!("{value:#}"))
    }
}
