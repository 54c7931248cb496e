//! Structural cloning of instructions and blocks.

use std::collections::HashMap;

use smallvec::SmallVec;

use crate::module::Module;
use crate::refs::*;

/// Value and block remapping used while cloning.
///
/// Values without an entry map to themselves, so operands defined outside
/// the cloned region keep pointing at the original definitions.
#[derive(Debug, Default)]
pub struct CloneContext {
    values: HashMap<ValueRef, ValueRef>,
    blocks: HashMap<BlockRef, BlockRef>,
}

impl CloneContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pre-seed a value mapping, e.g. to substitute parameters.
    pub fn map_value(&mut self, from: ValueRef, to: ValueRef) {
        self.values.insert(from, to);
    }

    pub fn lookup_value(&self, v: ValueRef) -> ValueRef {
        self.values.get(&v).copied().unwrap_or(v)
    }

    pub fn lookup_block(&self, b: BlockRef) -> Option<BlockRef> {
        self.blocks.get(&b).copied()
    }
}

impl Module {
    /// Clone an instruction into a new detached instruction.
    ///
    /// Results are fresh values recorded in `ctx`; operands are remapped
    /// through `ctx`; nested blocks are cloned recursively. Value names are
    /// not copied.
    pub fn clone_inst(&mut self, ctx: &mut CloneContext, inst: InstRef) -> InstRef {
        let data = &self.insts[inst];
        let kind = data.kind.clone();
        let sequenced = data.flags.sequenced;
        let operands: SmallVec<[Option<ValueRef>; 4]> = data
            .operands
            .iter()
            .map(|slot| slot.map(|v| ctx.lookup_value(v)))
            .collect();
        let results: SmallVec<[ValueRef; 1]> = data.results.clone();
        let blocks: SmallVec<[BlockRef; 2]> = data.blocks.clone();

        let result_types: SmallVec<[TypeRef; 1]> =
            results.iter().map(|&v| self.value_type(v)).collect();
        let new = self.create_inst(kind, &[], &result_types);
        for slot in operands {
            match slot {
                Some(v) => self.push_operand(new, v),
                None => self.push_operand_slot(new),
            }
        }
        self.set_sequenced(new, sequenced);

        for (&old, &fresh) in results.iter().zip(self.insts[new].results.clone().iter()) {
            ctx.map_value(old, fresh);
        }
        for block in blocks {
            let cloned = self.clone_block(ctx, block);
            self.attach_block(new, cloned);
        }
        new
    }

    /// Clone a block and its contents into a new detached block.
    pub fn clone_block(&mut self, ctx: &mut CloneContext, block: BlockRef) -> BlockRef {
        let params: SmallVec<[ValueRef; 1]> = self.blocks[block].params.clone();
        let param_types: SmallVec<[TypeRef; 1]> =
            params.iter().map(|&v| self.value_type(v)).collect();
        let new = self.create_block(&param_types);
        ctx.blocks.insert(block, new);
        for (&old, &fresh) in params.iter().zip(self.blocks[new].params.clone().iter()) {
            ctx.map_value(old, fresh);
        }
        for inst in self.block_insts(block) {
            let cloned = self.clone_inst(ctx, inst);
            self.append(new, cloned);
        }
        new
    }

    fn push_operand_slot(&mut self, inst: InstRef) {
        self.insts[inst].operands.push(None);
    }
}
