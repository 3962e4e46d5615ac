mod catalog;
mod connection;
mod execute;
mod schema;

pub use catalog::*;
pub use connection::*;
pub use execute::*;
pub use schema::*;
