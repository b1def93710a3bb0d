pub mod error;
pub mod format;
pub mod schema;
pub mod value;

pub use error::{ErrorKind, RowError};
pub use schema::{Schema, Type};
pub use value::{Row, Value};
