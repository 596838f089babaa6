mod op_error;

pub use op_error::{OpError, OpErrorKind};
