/*!
 * Prelude module for LabFlow Core.
 *
 * This module re-exports commonly used types and functions from the LabFlow Core crate
 * to make them easier to import.
 */

// Re-export error types
pub use crate::error::{Error, Result};

// Re-export core types
pub use crate::types::{ParamValue, Params, Timestamp};

// Re-export config types
pub use crate::config::{
    Config, ConfigBuilder, DensitometerConfig, DiscoveryConfig, SharedConfig,
};

// Re-export the params builder
pub use crate::params;
pub use tracing::{debug, error, info, trace, warn};

// Re-export core initialization
pub use crate::init;
