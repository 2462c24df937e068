//! # modhost-core
//!
//! Core crate for modhost. Contains the configuration schemas and the
//! unified error system shared by the plugin manager and the CLI.
//!
//! This crate has **no** internal dependencies on other modhost crates.

pub mod config;
pub mod error;
pub mod result;

pub use error::AppError;
pub use result::AppResult;
