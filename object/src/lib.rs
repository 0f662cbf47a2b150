mod barrier;
mod error;
mod header;
mod symbol;
mod tuple;
mod value;

pub use barrier::{Field, Memory, Traceable, Tracer, relocate_owned};
pub use error::{ObjectError, ObjectResult};
pub use header::{Header, HeaderFlags, ObjectType};
pub use symbol::{Symbol, SymbolTable};
pub use tuple::Tuple;
pub use value::{ImmediateTag, Value};
