//! Module: arena-based storage for one compiled program.
//!
//! All IR entities (instructions, values, blocks, functions) are stored in
//! `PrimaryMap`s owned by [`Module`]. Instructions inside a block form a
//! doubly linked list through explicit `prev`/`next` handles, so splicing is
//! O(1) and never invalidates other handles.

use std::collections::HashMap;
use std::fmt;

use cranelift_entity::{PrimaryMap, SecondaryMap};
use smallvec::SmallVec;

use crate::inst::InstData;
use crate::refs::*;
use crate::symbol::Symbol;
use crate::types::{ConstantValue, TypeInterner};

// ============================================================================
// Entity data types
// ============================================================================

/// Data for a single value.
#[derive(Clone, Debug)]
pub struct ValueData {
    pub def: ValueDef,
    pub ty: TypeRef,
}

/// Who owns a block.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BlockParent {
    /// The module-scope declaration block.
    Root,
    /// Body of a function.
    Function(FuncRef),
    /// Nested block of a control instruction.
    Inst(InstRef),
    /// Not attached yet.
    Detached,
}

/// Data for a block.
#[derive(Clone, Debug)]
pub struct BlockData {
    pub(crate) params: SmallVec<[ValueRef; 1]>,
    pub(crate) first: Option<InstRef>,
    pub(crate) last: Option<InstRef>,
    pub(crate) parent: BlockParent,
}

impl BlockData {
    pub fn params(&self) -> &[ValueRef] {
        &self.params
    }

    pub fn front(&self) -> Option<InstRef> {
        self.first
    }

    pub fn back(&self) -> Option<InstRef> {
        self.last
    }

    pub fn parent(&self) -> BlockParent {
        self.parent
    }

    pub fn is_empty(&self) -> bool {
        self.first.is_none()
    }
}

/// Pipeline stage of an entry point.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum PipelineStage {
    Compute,
    Vertex,
    Fragment,
}

impl fmt::Display for PipelineStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            PipelineStage::Compute => "@compute",
            PipelineStage::Vertex => "@vertex",
            PipelineStage::Fragment => "@fragment",
        })
    }
}

/// Data for a function.
#[derive(Clone, Debug)]
pub struct FunctionData {
    pub name: Symbol,
    pub params: Vec<ValueRef>,
    pub return_type: TypeRef,
    /// Entry point stage, if this function is an entry point.
    pub stage: Option<PipelineStage>,
    /// The result of a call must be consumed.
    pub must_use: bool,
    pub body: BlockRef,
}

// ============================================================================
// Module
// ============================================================================

/// Arena-based mutable IR module.
///
/// Owns all IR entities and provides methods for creating, querying and
/// mutating them. Use-chains are maintained by every operand write.
pub struct Module {
    pub(crate) insts: PrimaryMap<InstRef, InstData>,
    pub(crate) values: PrimaryMap<ValueRef, ValueData>,
    pub(crate) blocks: PrimaryMap<BlockRef, BlockData>,
    pub(crate) funcs: PrimaryMap<FuncRef, FunctionData>,

    /// Use-chain: for each value, the operand slots that read it.
    pub(crate) uses: SecondaryMap<ValueRef, SmallVec<[Usage; 2]>>,
    pub(crate) names: SecondaryMap<ValueRef, Option<Symbol>>,

    constants: HashMap<(TypeRef, ConstantValue), ValueRef>,
    function_order: Vec<FuncRef>,
    root: BlockRef,

    pub types: TypeInterner,
}

impl Module {
    /// Create an empty module with its root block.
    pub fn new() -> Self {
        let mut blocks = PrimaryMap::new();
        let root = blocks.push(BlockData {
            params: SmallVec::new(),
            first: None,
            last: None,
            parent: BlockParent::Root,
        });
        Self {
            insts: PrimaryMap::new(),
            values: PrimaryMap::new(),
            blocks,
            funcs: PrimaryMap::new(),
            uses: SecondaryMap::new(),
            names: SecondaryMap::new(),
            constants: HashMap::new(),
            function_order: Vec::new(),
            root,
            types: TypeInterner::new(),
        }
    }

    /// Block holding module-scope declarations.
    pub fn root_block(&self) -> BlockRef {
        self.root
    }

    // ========================================================================
    // Functions
    // ========================================================================

    /// Create a function with an empty body block.
    pub fn create_function(
        &mut self,
        name: Symbol,
        param_types: &[TypeRef],
        return_type: TypeRef,
    ) -> FuncRef {
        let body = self.create_block(&[]);
        let func = self.funcs.push(FunctionData {
            name,
            params: Vec::new(),
            return_type,
            stage: None,
            must_use: false,
            body,
        });
        let params = param_types
            .iter()
            .enumerate()
            .map(|(idx, &ty)| {
                self.values.push(ValueData {
                    def: ValueDef::FunctionParam(func, idx as u32),
                    ty,
                })
            })
            .collect();
        self.funcs[func].params = params;
        self.blocks[body].parent = BlockParent::Function(func);
        self.function_order.push(func);
        func
    }

    /// Functions in declaration order.
    pub fn functions(&self) -> &[FuncRef] {
        &self.function_order
    }

    pub fn func(&self, f: FuncRef) -> &FunctionData {
        &self.funcs[f]
    }

    pub fn func_mut(&mut self, f: FuncRef) -> &mut FunctionData {
        &mut self.funcs[f]
    }

    /// Find a function by name.
    pub fn function_named(&self, name: &str) -> Option<FuncRef> {
        self.function_order
            .iter()
            .copied()
            .find(|&f| self.funcs[f].name == name)
    }

    // ========================================================================
    // Blocks
    // ========================================================================

    /// Create a detached block with parameters of the given types.
    pub fn create_block(&mut self, param_types: &[TypeRef]) -> BlockRef {
        let block = self.blocks.push(BlockData {
            params: SmallVec::new(),
            first: None,
            last: None,
            parent: BlockParent::Detached,
        });
        let params = param_types
            .iter()
            .enumerate()
            .map(|(idx, &ty)| {
                self.values.push(ValueData {
                    def: ValueDef::BlockParam(block, idx as u32),
                    ty,
                })
            })
            .collect();
        self.blocks[block].params = params;
        block
    }

    pub fn block(&self, b: BlockRef) -> &BlockData {
        &self.blocks[b]
    }

    /// Attach a detached block to a control instruction.
    ///
    /// # Panics
    ///
    /// Panics if the block already has an owner.
    pub fn attach_block(&mut self, inst: InstRef, block: BlockRef) {
        assert_eq!(
            self.blocks[block].parent,
            BlockParent::Detached,
            "attach_block: {block} already has an owner",
        );
        self.blocks[block].parent = BlockParent::Inst(inst);
        self.insts[inst].blocks.push(block);
    }

    pub fn block_front(&self, b: BlockRef) -> Option<InstRef> {
        self.blocks[b].first
    }

    pub fn block_back(&self, b: BlockRef) -> Option<InstRef> {
        self.blocks[b].last
    }

    /// Snapshot of a block's instructions, front to back.
    pub fn block_insts(&self, b: BlockRef) -> Vec<InstRef> {
        let mut out = Vec::new();
        let mut cursor = self.blocks[b].first;
        while let Some(inst) = cursor {
            out.push(inst);
            cursor = self.insts[inst].next;
        }
        out
    }

    /// Function whose body (transitively) contains `block`.
    pub fn enclosing_function(&self, mut block: BlockRef) -> Option<FuncRef> {
        loop {
            match self.blocks[block].parent {
                BlockParent::Function(f) => return Some(f),
                BlockParent::Inst(inst) => block = self.insts[inst].block?,
                BlockParent::Root | BlockParent::Detached => return None,
            }
        }
    }

    // ========================================================================
    // Splicing
    // ========================================================================

    /// Append an instruction to the end of a block.
    ///
    /// # Panics
    ///
    /// Panics if the instruction already belongs to a block.
    pub fn append(&mut self, block: BlockRef, inst: InstRef) {
        self.assert_unlinked("append", inst);
        let last = self.blocks[block].last;
        self.link(block, last, None, inst);
    }

    /// Insert `inst` immediately before `anchor`.
    pub fn insert_before(&mut self, anchor: InstRef, inst: InstRef) {
        self.assert_unlinked("insert_before", inst);
        let block = self.insts[anchor]
            .block
            .unwrap_or_else(|| panic!("insert_before: anchor {anchor} is not in a block"));
        let prev = self.insts[anchor].prev;
        self.link(block, prev, Some(anchor), inst);
    }

    /// Insert `inst` immediately after `anchor`.
    pub fn insert_after(&mut self, anchor: InstRef, inst: InstRef) {
        self.assert_unlinked("insert_after", inst);
        let block = self.insts[anchor]
            .block
            .unwrap_or_else(|| panic!("insert_after: anchor {anchor} is not in a block"));
        let next = self.insts[anchor].next;
        self.link(block, Some(anchor), next, inst);
    }

    /// Unlink an instruction from its block without destroying it.
    pub fn remove(&mut self, inst: InstRef) {
        let Some(block) = self.insts[inst].block else {
            return;
        };
        let prev = self.insts[inst].prev;
        let next = self.insts[inst].next;
        match prev {
            Some(p) => self.insts[p].next = next,
            None => self.blocks[block].first = next,
        }
        match next {
            Some(n) => self.insts[n].prev = prev,
            None => self.blocks[block].last = prev,
        }
        let data = &mut self.insts[inst];
        data.block = None;
        data.prev = None;
        data.next = None;
    }

    /// Put `new` in `old`'s place and reroute every result of `old` to the
    /// result of `new` at the same index. `old` is unlinked but stays alive.
    ///
    /// # Panics
    ///
    /// Panics if the result counts differ.
    pub fn replace_with(&mut self, old: InstRef, new: InstRef) {
        let old_results: SmallVec<[ValueRef; 1]> = self.insts[old].results.clone();
        let new_results: SmallVec<[ValueRef; 1]> = self.insts[new].results.clone();
        assert_eq!(
            old_results.len(),
            new_results.len(),
            "replace_with: {old} has {} result(s) but {new} has {}",
            old_results.len(),
            new_results.len(),
        );
        self.insert_before(old, new);
        for (&from, &to) in old_results.iter().zip(&new_results) {
            self.replace_all_uses_with(from, to);
        }
        self.remove(old);
    }

    fn assert_unlinked(&self, what: &str, inst: InstRef) {
        assert!(
            self.insts[inst].block.is_none(),
            "{what}: {inst} already belongs to {:?}; remove it first",
            self.insts[inst].block,
        );
        assert!(!self.insts[inst].flags.dead, "{what}: {inst} is dead");
    }

    fn link(
        &mut self,
        block: BlockRef,
        prev: Option<InstRef>,
        next: Option<InstRef>,
        inst: InstRef,
    ) {
        {
            let data = &mut self.insts[inst];
            data.block = Some(block);
            data.prev = prev;
            data.next = next;
        }
        match prev {
            Some(p) => self.insts[p].next = Some(inst),
            None => self.blocks[block].first = Some(inst),
        }
        match next {
            Some(n) => self.insts[n].prev = Some(inst),
            None => self.blocks[block].last = Some(inst),
        }
    }

    // ========================================================================
    // Constants
    // ========================================================================

    /// Get or create the constant `value` of type `ty`.
    pub fn constant(&mut self, ty: TypeRef, value: ConstantValue) -> ValueRef {
        if let Some(&existing) = self.constants.get(&(ty, value.clone())) {
            return existing;
        }
        let v = self.values.push(ValueData {
            def: ValueDef::Constant(value.clone()),
            ty,
        });
        self.constants.insert((ty, value), v);
        v
    }

    pub fn constant_i32(&mut self, value: i32) -> ValueRef {
        let ty = self.types.i32();
        self.constant(ty, ConstantValue::I32(value))
    }

    pub fn constant_u32(&mut self, value: u32) -> ValueRef {
        let ty = self.types.u32();
        self.constant(ty, ConstantValue::U32(value))
    }

    pub fn constant_f32(&mut self, value: f32) -> ValueRef {
        let ty = self.types.f32();
        self.constant(ty, ConstantValue::F32(value.to_bits()))
    }

    pub fn constant_bool(&mut self, value: bool) -> ValueRef {
        let ty = self.types.bool();
        self.constant(ty, ConstantValue::Bool(value))
    }

    /// Zero value of `ty`.
    pub fn zero(&mut self, ty: TypeRef) -> ValueRef {
        self.constant(ty, ConstantValue::Zero)
    }
}

impl Default for Module {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inst::{BinaryOp, InstKind};

    fn leaf(module: &mut Module) -> InstRef {
        let i32_ty = module.types.i32();
        module.create_inst(InstKind::Binary(BinaryOp::Add), &[], &[i32_ty])
    }

    /// Forward and backward traversal must describe the same order.
    fn assert_links_agree(module: &Module, block: BlockRef) -> Vec<InstRef> {
        let forward = module.block_insts(block);
        let mut backward = Vec::new();
        let mut cursor = module.block_back(block);
        while let Some(inst) = cursor {
            backward.push(inst);
            cursor = module.inst(inst).prev();
        }
        backward.reverse();
        assert_eq!(forward, backward);
        for &inst in &forward {
            assert_eq!(module.inst(inst).parent_block(), Some(block));
        }
        forward
    }

    #[test]
    fn append_insert_remove() {
        let mut module = Module::new();
        let block = module.create_block(&[]);
        let a = leaf(&mut module);
        let c = leaf(&mut module);
        module.append(block, a);
        module.append(block, c);

        let b = leaf(&mut module);
        module.insert_before(c, b);
        let d = leaf(&mut module);
        module.insert_after(c, d);
        let z = leaf(&mut module);
        module.insert_before(a, z);
        assert_eq!(assert_links_agree(&module, block), vec![z, a, b, c, d]);

        module.remove(z);
        module.remove(c);
        module.remove(d);
        assert_eq!(assert_links_agree(&module, block), vec![a, b]);
        assert_eq!(module.inst(c).parent_block(), None);

        module.append(block, c);
        assert_eq!(assert_links_agree(&module, block), vec![a, b, c]);
    }

    #[test]
    fn pseudo_random_splicing_keeps_links_consistent() {
        let mut module = Module::new();
        let block = module.create_block(&[]);
        let mut expected: Vec<InstRef> = Vec::new();
        let mut seed = 0x2545_f491_u32;
        for _ in 0..200 {
            seed ^= seed << 13;
            seed ^= seed >> 17;
            seed ^= seed << 5;
            let choice = seed % 4;
            if expected.is_empty() || choice == 0 {
                let inst = leaf(&mut module);
                module.append(block, inst);
                expected.push(inst);
            } else {
                let pos = (seed as usize / 4) % expected.len();
                match choice {
                    1 => {
                        let inst = leaf(&mut module);
                        module.insert_before(expected[pos], inst);
                        expected.insert(pos, inst);
                    }
                    2 => {
                        let inst = leaf(&mut module);
                        module.insert_after(expected[pos], inst);
                        expected.insert(pos + 1, inst);
                    }
                    _ => {
                        let inst = expected.remove(pos);
                        module.remove(inst);
                    }
                }
            }
        }
        assert_eq!(assert_links_agree(&module, block), expected);
    }

    #[test]
    #[should_panic(expected = "already belongs to")]
    fn append_twice_panics() {
        let mut module = Module::new();
        let block = module.create_block(&[]);
        let a = leaf(&mut module);
        module.append(block, a);
        module.append(block, a);
    }

    #[test]
    fn replace_with_reroutes_results() {
        let mut module = Module::new();
        let i32_ty = module.types.i32();
        let block = module.create_block(&[]);
        let old = leaf(&mut module);
        module.append(block, old);
        let old_v = module.result(old, 0);
        let user = module.create_inst(InstKind::Let, &[old_v], &[i32_ty]);
        module.append(block, user);

        let new = leaf(&mut module);
        let new_v = module.result(new, 0);
        module.replace_with(old, new);

        assert_eq!(module.block_insts(block), vec![new, user]);
        assert_eq!(module.operand(user, 0), Some(new_v));
        assert!(!module.has_uses(old_v));
        assert_eq!(module.inst(old).parent_block(), None);
    }

    #[test]
    fn constants_are_interned() {
        let mut module = Module::new();
        let a = module.constant_i32(7);
        let b = module.constant_i32(7);
        let c = module.constant_u32(7);
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(module.value_def(a), &ValueDef::Constant(ConstantValue::I32(7)));
    }

    #[test]
    fn functions_and_params() {
        let mut module = Module::new();
        let i32_ty = module.types.i32();
        let f32_ty = module.types.f32();
        let f = module.create_function(Symbol::new("mix"), &[i32_ty, f32_ty], f32_ty);
        let data = module.func(f);
        assert_eq!(data.params.len(), 2);
        assert_eq!(module.value_type(data.params[1]), f32_ty);
        assert_eq!(module.block(data.body).parent(), BlockParent::Function(f));
        assert_eq!(module.function_named("mix"), Some(f));
        assert_eq!(module.enclosing_function(module.func(f).body), Some(f));
    }
}
