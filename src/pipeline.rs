//! Compilation pipeline.
//!
//! ```text
//! Module (from the front end)
//!     │
//!     ▼
//! value_to_let ─► sequenced values bound, unused results discarded
//!     │
//!     ▼
//! fork_explicit_layout_types ─► host-shareable types carry explicit layout
//!     │
//!     ▼
//! Module (to the encoder)
//! ```
//!
//! With [`CompileOptions::validate`] set, the module is validated before and
//! after every pass and the first failure aborts the pipeline.

use kiln_ir::Module;
use kiln_passes::{
    ForkResult, ValueToLetResult, fork_explicit_layout_types, run_pass, value_to_let_with_config,
};
use serde::Serialize;
use tracing::debug;

use crate::error::Result;
use crate::options::CompileOptions;

/// Statistics from each pass.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct CompileReport {
    pub value_to_let: ValueToLetResult,
    pub fork_explicit_layout_types: ForkResult,
}

/// Run every pass over `module` in order.
pub fn compile(module: &mut Module, options: &CompileOptions) -> Result<CompileReport> {
    debug!(
        version = %options.target,
        validate = options.validate,
        functions = module.functions().len(),
        "compile: start"
    );

    let value_to_let = stage(module, options, "value_to_let", |m| {
        value_to_let_with_config(m, &options.value_to_let)
    })?;

    let fork_config = options.fork_config();
    let fork = stage(module, options, "fork_explicit_layout_types", |m| {
        fork_explicit_layout_types(m, &fork_config)
    })?;

    debug!("compile: done");
    Ok(CompileReport {
        value_to_let,
        fork_explicit_layout_types: fork,
    })
}

fn stage<R>(
    module: &mut Module,
    options: &CompileOptions,
    name: &'static str,
    f: impl FnOnce(&mut Module) -> R,
) -> Result<R> {
    if options.validate {
        return Ok(run_pass(module, name, &options.capabilities, f)?);
    }
    debug!(pass = name, "running pass without validation");
    Ok(f(module))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use kiln_ir::{Builder, Symbol};
    use kiln_passes::{PassError, Stage};

    fn unterminated_module() -> Module {
        let mut module = Module::new();
        let void = module.types.void();
        module.create_function(Symbol::new("main"), &[], void);
        module
    }

    #[test]
    fn invalid_input_stops_the_pipeline() {
        let mut module = unterminated_module();
        let err = compile(&mut module, &CompileOptions::default()).unwrap_err();
        let Error::Pass(PassError::Validation { pass, stage, .. }) = err;
        assert_eq!(pass, "value_to_let");
        assert_eq!(stage, Stage::Before);
    }

    #[test]
    fn validation_can_be_skipped() {
        let mut module = unterminated_module();
        let options = CompileOptions {
            validate: false,
            ..CompileOptions::default()
        };
        let report = compile(&mut module, &options).unwrap();
        assert_eq!(report, CompileReport::default());
    }

    #[test]
    fn empty_function_compiles_to_itself() {
        let mut module = unterminated_module();
        let main = module.functions()[0];
        let body = module.func(main).body;
        Builder::at_end(&mut module, body).ret(None);

        let report = compile(&mut module, &CompileOptions::default()).unwrap();
        assert_eq!(report, CompileReport::default());
    }
}
