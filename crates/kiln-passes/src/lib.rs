//! Transformation passes over kiln IR.
//!
//! Each pass takes `&mut Module`, rewrites it in place, and reports what it
//! changed. [`run_pass`] wraps a pass in validation gates.

pub mod fork_explicit_layout_types;
pub mod pass;
pub mod target;
pub mod value_to_let;

pub use fork_explicit_layout_types::{ForkConfig, ForkResult, fork_explicit_layout_types};
pub use pass::{PassError, Stage, run_pass};
pub use target::{ParseTargetVersionError, TargetVersion};
pub use value_to_let::{ValueToLetConfig, ValueToLetResult, value_to_let, value_to_let_with_config};
