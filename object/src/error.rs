use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ObjectError {
    #[error("{method}: index {index} out of bounds for size {size}")]
    BoundsExceeded {
        method: &'static str,
        index: i64,
        size: usize,
    },
    #[error("negative tuple size: {size}")]
    NegativeSize { size: i64 },
}

pub type ObjectResult<T> = Result<T, ObjectError>;
