//! Common types for the mount table refresher workspace

mod error;

pub use error::{Error, Result};
