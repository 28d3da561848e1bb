use thiserror::Error;

/// Errors raised while assembling, loading or running an [`EfficientCfl`](crate::models::cfl::EfficientCfl) model.
#[derive(Error, Debug)]
pub enum CflError {
    /// Unknown model name, malformed block arguments or an unusable configuration.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Two tensors that must agree in shape do not.
    #[error("shape mismatch: {0}")]
    ShapeMismatch(String),

    /// A weight record does not fit the assembled model.
    #[error("weight loading mismatch: {0}")]
    WeightMismatch(String),

    /// The burn recorder failed to read or write a record.
    #[error("record error: {0}")]
    Record(String),

    #[error(transparent)]
    Image(#[from] image::ImageError),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, CflError>;

impl CflError {
    pub(crate) fn invalid(msg: impl Into<String>) -> Self {
        CflError::InvalidArgument(msg.into())
    }

    pub(crate) fn shape(msg: impl Into<String>) -> Self {
        CflError::ShapeMismatch(msg.into())
    }
}
