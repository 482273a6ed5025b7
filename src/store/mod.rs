mod gateway;
mod placeholder;

pub use gateway::{Column, Gateway, QueryResult};
pub use placeholder::{substitute, Param};
