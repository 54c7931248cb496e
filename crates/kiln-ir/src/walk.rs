//! Recursive instruction traversal.
//!
//! Provides `walk_*` functions for visiting instructions together with the
//! contents of their nested blocks, in program order.

use std::ops::ControlFlow;

use crate::module::Module;
use crate::refs::{BlockRef, FuncRef, InstRef};

/// Controls whether to descend into children during a walk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WalkAction {
    /// Continue walking and descend into nested blocks.
    Advance,
    /// Skip the nested blocks of the current instruction.
    Skip,
}

/// Walk all instructions in a block recursively.
///
/// The block is snapshotted before visiting, so the callback may not rely on
/// seeing instructions it inserts.
pub fn walk_block<B>(
    module: &Module,
    block: BlockRef,
    f: &mut dyn FnMut(InstRef) -> ControlFlow<B, WalkAction>,
) -> ControlFlow<B, ()> {
    for inst in module.block_insts(block) {
        walk_inst(module, inst, f)?;
    }
    ControlFlow::Continue(())
}

/// Walk an instruction and its nested blocks recursively.
pub fn walk_inst<B>(
    module: &Module,
    inst: InstRef,
    f: &mut dyn FnMut(InstRef) -> ControlFlow<B, WalkAction>,
) -> ControlFlow<B, ()> {
    match f(inst) {
        ControlFlow::Break(b) => return ControlFlow::Break(b),
        ControlFlow::Continue(WalkAction::Skip) => return ControlFlow::Continue(()),
        ControlFlow::Continue(WalkAction::Advance) => {}
    }
    for &block in module.inst(inst).blocks() {
        walk_block(module, block, f)?;
    }
    ControlFlow::Continue(())
}

/// Walk the body of a function.
pub fn walk_function<B>(
    module: &Module,
    func: FuncRef,
    f: &mut dyn FnMut(InstRef) -> ControlFlow<B, WalkAction>,
) -> ControlFlow<B, ()> {
    walk_block(module, module.func(func).body, f)
}

/// Walk the root block, then every function in declaration order.
pub fn walk_module<B>(
    module: &Module,
    f: &mut dyn FnMut(InstRef) -> ControlFlow<B, WalkAction>,
) -> ControlFlow<B, ()> {
    walk_block(module, module.root_block(), f)?;
    for &func in module.functions() {
        walk_function(module, func, f)?;
    }
    ControlFlow::Continue(())
}

/// Every block of the module: the root block, function bodies, and nested
/// blocks, parents before children.
pub fn all_blocks(module: &Module) -> Vec<BlockRef> {
    let mut out = vec![module.root_block()];
    out.extend(module.functions().iter().map(|&f| module.func(f).body));
    let mut cursor = 0;
    while cursor < out.len() {
        let block = out[cursor];
        cursor += 1;
        for inst in module.block_insts(block) {
            out.extend_from_slice(module.inst(inst).blocks());
        }
    }
    out
}
