//! Common utilities and types shared across vaultpack crates.

pub mod error;
pub mod hash;
pub mod mode;
pub mod path;
pub mod timestamp;

pub use error::{Error, Result};
pub use mode::ImportBehaviorMode;
pub use timestamp::Timestamp;
