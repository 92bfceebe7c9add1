//! Run configuration: interpreter options, optionally loaded from TOML.
//!
//! Command-line flags override whatever the file sets.

use serde::Deserialize;

use atomc_runtime::DEFAULT_STACK_CELLS;

/// Options for executing a compiled program.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RunConfig {
    /// Capacity of the value stack, in cells.
    pub stack_size: usize,
    /// Print every executed instruction to stderr.
    pub trace: bool,
}

impl Default for RunConfig {
    fn default() -> Self {
        RunConfig {
            stack_size: DEFAULT_STACK_CELLS,
            trace: false,
        }
    }
}

impl RunConfig {
    pub fn from_toml(content: &str) -> Result<Self, String> {
        toml::from_str(content).map_err(|e| format!("invalid run configuration: {}", e))
    }
}
