//! Pipeline options.
//!
//! Every field has a default, so a partial document deserializes:
//!
//! ```
//! let options: kiln::CompileOptions = serde_json::from_str(r#"{ "target": "1.3" }"#).unwrap();
//! assert!(options.validate);
//! ```

use kiln_ir::Capabilities;
use kiln_passes::{ForkConfig, TargetVersion, ValueToLetConfig};
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CompileOptions {
    /// Selects the layout rules and whether `copy_logical` is available.
    pub target: TargetVersion,
    pub value_to_let: ValueToLetConfig,
    /// Validate the module around every pass.
    pub validate: bool,
    /// Optional features the consumer of the module accepts.
    pub capabilities: Capabilities,
}

impl Default for CompileOptions {
    fn default() -> Self {
        Self {
            target: TargetVersion::default(),
            value_to_let: ValueToLetConfig::default(),
            validate: true,
            capabilities: Capabilities::new(),
        }
    }
}

impl CompileOptions {
    pub fn fork_config(&self) -> ForkConfig {
        ForkConfig {
            target: self.target,
        }
    }
}
