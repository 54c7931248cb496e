//! Shared helpers for the pipeline integration tests.

use kiln::Module;
use kiln_ir::{Access, AddressSpace, BlockRef, Builder, FuncRef, PipelineStage, Symbol, TypeRef, ValueRef};

/// Route `tracing` output through the test harness. Honors `RUST_LOG`.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Declare a named module-scope variable.
pub fn global(module: &mut Module, name: &'static str, space: AddressSpace, store: TypeRef) -> ValueRef {
    let access = match space {
        AddressSpace::Uniform => Access::Read,
        _ => Access::ReadWrite,
    };
    let ptr_ty = module.types.ptr(space, store, access);
    let root = module.root_block();
    let mut b = Builder::at_end(module, root);
    let var = b.var(ptr_ty, None);
    let ptr = b.value(var);
    module.set_name(ptr, Symbol::new(name));
    ptr
}

/// `@compute fn main() -> void` with an empty body.
#[allow(dead_code)]
pub fn compute_entry_point(module: &mut Module) -> (FuncRef, BlockRef) {
    let void = module.types.void();
    let main = module.create_function(Symbol::new("main"), &[], void);
    module.func_mut(main).stage = Some(PipelineStage::Compute);
    (main, module.func(main).body)
}
