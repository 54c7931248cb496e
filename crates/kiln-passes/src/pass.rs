//! Pass runner: validation gates around a transformation.

use derive_more::{Display, Error};
use kiln_ir::{Capabilities, Module, ValidationFailure, validate};
use tracing::{debug, warn};

/// When a validation gate fired.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Display)]
pub enum Stage {
    #[display("before")]
    Before,
    #[display("after")]
    After,
}

#[derive(Clone, Debug, PartialEq, Eq, Display, Error)]
pub enum PassError {
    #[display("IR validation failed {stage} `{pass}`:\n{reason}")]
    Validation {
        pass: &'static str,
        stage: Stage,
        #[error(source)]
        reason: ValidationFailure,
    },
}

/// Validate `module`, run `f`, and validate again.
///
/// The transformation only runs on a module that validates, and a module that
/// fails afterwards is reported as a failure of this pass.
pub fn run_pass<R>(
    module: &mut Module,
    name: &'static str,
    capabilities: &Capabilities,
    f: impl FnOnce(&mut Module) -> R,
) -> Result<R, PassError> {
    check(module, name, Stage::Before, capabilities)?;
    debug!(pass = name, "running pass");
    let result = f(module);
    check(module, name, Stage::After, capabilities)?;
    Ok(result)
}

fn check(
    module: &Module,
    pass: &'static str,
    stage: Stage,
    capabilities: &Capabilities,
) -> Result<(), PassError> {
    validate(module, capabilities).map_err(|reason| {
        warn!(
            pass,
            %stage,
            count = reason.diagnostics.len(),
            "IR validation failed"
        );
        PassError::Validation {
            pass,
            stage,
            reason,
        }
    })
}
