pub mod config;
pub mod error;
pub mod media;

#[cfg(test)]
mod config_test;

pub use config::*;
pub use error::*;
pub use media::*;
