//! Kiln shader IR core.
//!
//! The IR itself lives in [`kiln_ir`] and the passes in [`kiln_passes`]. This
//! crate ties them into a pipeline: a front end hands over a well-formed
//! [`Module`], [`compile`] legalizes it in place, and the encoder takes it
//! from there.

pub mod error;
pub mod options;
pub mod pipeline;

pub use error::{Error, Result};
pub use kiln_ir::Module;
pub use options::CompileOptions;
pub use pipeline::{CompileReport, compile};
