pub mod config;
pub mod error;
pub mod features;
pub mod labels;
pub mod pose;

pub use error::{Error, Result};

/// `git describe` of the build, or the crate version outside a checkout
pub const BUILD_VERSION: &str = env!("ROTTA_BUILD_VERSION");
