use garnet_object::{ObjectError, Value};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum VmError {
    #[error(transparent)]
    Object(#[from] ObjectError),
    /// Resolution found nothing and the resolver chose to raise rather
    /// than hand back a method-missing dispatch.
    #[error("undefined method `{name}` for {receiver:?}")]
    NoMethod { name: String, receiver: Value },
    /// A language-level exception raised by a collaborator.
    #[error("exception raised: {exception:?}")]
    Raised { exception: Value },
}

pub type VmResult<T> = Result<T, VmError>;
