mod shutdown;

pub mod console;
pub mod controller;

mod error;
pub use error::Error;

pub type Result<T> = std::result::Result<T, Error>;
