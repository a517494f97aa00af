pub mod builders;
pub mod config;
pub mod delta;
pub mod error;
pub mod fsutil;
pub mod manifest;
pub mod pipeline;
pub mod preflight;
pub mod report;
pub mod runner;
pub mod snapshot;
pub mod staging;

pub use error::{Error, Result};
