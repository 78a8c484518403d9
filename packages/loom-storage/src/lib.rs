pub mod db;
pub mod documents;
pub mod models;
pub mod schema;
pub mod search_records;
pub mod sources;
pub mod tags;
pub mod users;
pub mod vector;

mod error;

pub use error::Error;

pub type Result<T, E = Error> = std::result::Result<T, E>;
