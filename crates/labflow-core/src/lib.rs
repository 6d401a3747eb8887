/*!
 * LabFlow Core
 *
 * This crate provides the ambient pieces shared by the LabFlow crates:
 * layered configuration, logging setup, the core error type, and the
 * parameter values carried by device journals.
 */

#![warn(missing_docs)]

pub mod config;
pub mod error;
pub mod logging;
pub mod prelude;
pub mod types;

pub use error::{Error, Result};

/// Re-export of dependencies that are part of the public API
pub mod deps {
    pub use anyhow;
    pub use chrono;
    pub use serde;
    pub use tracing;
}

/// LabFlow core crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library initialization
pub fn init() -> Result<()> {
    logging::init()?;
    tracing::info!("LabFlow Core {} initialized", VERSION);
    Ok(())
}
