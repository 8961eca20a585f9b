pub mod config;
pub mod domain;
pub mod error;
pub mod infra;

pub use error::{Error, WaitError};
