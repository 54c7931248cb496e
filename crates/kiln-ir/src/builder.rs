//! Instruction builder with an insertion point.
//!
//! Each constructor creates one instruction, infers its result type where the
//! kind defines one, and places it at the current insertion point.

use crate::inst::{BinaryOp, BuiltinFn, InstKind};
use crate::module::Module;
use crate::refs::*;
use crate::symbol::Symbol;
use crate::types::TypeData;

/// Where the next instruction goes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum InsertPoint {
    /// At the end of a block.
    Append(BlockRef),
    /// Immediately before an instruction.
    Before(InstRef),
    /// Immediately after an instruction. Advances to each inserted
    /// instruction so consecutive inserts keep their order.
    After(InstRef),
    /// Leave the instruction unlinked.
    Detached,
}

pub struct Builder<'m> {
    module: &'m mut Module,
    point: InsertPoint,
}

impl<'m> Builder<'m> {
    pub fn new(module: &'m mut Module, point: InsertPoint) -> Self {
        Self { module, point }
    }

    pub fn at_end(module: &'m mut Module, block: BlockRef) -> Self {
        Self::new(module, InsertPoint::Append(block))
    }

    pub fn before(module: &'m mut Module, inst: InstRef) -> Self {
        Self::new(module, InsertPoint::Before(inst))
    }

    pub fn after(module: &'m mut Module, inst: InstRef) -> Self {
        Self::new(module, InsertPoint::After(inst))
    }

    pub fn module(&mut self) -> &mut Module {
        self.module
    }

    pub fn insert_point(&self) -> InsertPoint {
        self.point
    }

    pub fn set_insert_point(&mut self, point: InsertPoint) {
        self.point = point;
    }

    /// Place an already created instruction at the insertion point.
    pub fn insert(&mut self, inst: InstRef) -> InstRef {
        match self.point {
            InsertPoint::Append(block) => self.module.append(block, inst),
            InsertPoint::Before(anchor) => self.module.insert_before(anchor, inst),
            InsertPoint::After(anchor) => {
                self.module.insert_after(anchor, inst);
                self.point = InsertPoint::After(inst);
            }
            InsertPoint::Detached => {}
        }
        inst
    }

    fn build(&mut self, kind: InstKind, operands: &[ValueRef], results: &[TypeRef]) -> InstRef {
        let inst = self.module.create_inst(kind, operands, results);
        self.insert(inst)
    }

    /// Result value of a single-result instruction built by this builder.
    pub fn value(&self, inst: InstRef) -> ValueRef {
        self.module.result(inst, 0)
    }

    // ========================================================================
    // Memory
    // ========================================================================

    /// Declare a variable. `ptr_ty` is the pointer type of the result.
    pub fn var(&mut self, ptr_ty: TypeRef, init: Option<ValueRef>) -> InstRef {
        assert!(
            self.module.types.pointee(ptr_ty).is_some(),
            "var: {} is not a pointer type",
            self.module.types.display(ptr_ty),
        );
        let operands: Vec<ValueRef> = init.into_iter().collect();
        self.build(InstKind::Var, &operands, &[ptr_ty])
    }

    pub fn load(&mut self, ptr: ValueRef) -> InstRef {
        let ptr_ty = self.module.value_type(ptr);
        let store = self.module.types.pointee(ptr_ty).unwrap_or_else(|| {
            panic!(
                "load: {ptr} has non-pointer type {}",
                self.module.types.display(ptr_ty)
            )
        });
        self.build(InstKind::Load, &[ptr], &[store])
    }

    pub fn store(&mut self, ptr: ValueRef, value: ValueRef) -> InstRef {
        self.build(InstKind::Store, &[ptr, value], &[])
    }

    /// Index into a composite value or through a pointer. The caller names
    /// the result type since it depends on the index values.
    pub fn access(&mut self, object: ValueRef, indices: &[ValueRef], result_ty: TypeRef) -> InstRef {
        let mut operands = Vec::with_capacity(indices.len() + 1);
        operands.push(object);
        operands.extend_from_slice(indices);
        self.build(InstKind::Access, &operands, &[result_ty])
    }

    // ========================================================================
    // Values
    // ========================================================================

    pub fn let_(&mut self, value: ValueRef) -> InstRef {
        let ty = self.module.value_type(value);
        self.build(InstKind::Let, &[value], &[ty])
    }

    pub fn phony(&mut self, value: ValueRef) -> InstRef {
        self.build(InstKind::Phony, &[value], &[])
    }

    pub fn construct(&mut self, ty: TypeRef, members: &[ValueRef]) -> InstRef {
        self.build(InstKind::Construct, members, &[ty])
    }

    pub fn binary(&mut self, op: BinaryOp, lhs: ValueRef, rhs: ValueRef) -> InstRef {
        let ty = match op {
            BinaryOp::Equal | BinaryOp::LessThan => self.module.types.bool(),
            BinaryOp::Add | BinaryOp::Sub | BinaryOp::Mul | BinaryOp::Div => {
                self.module.value_type(lhs)
            }
        };
        self.build(InstKind::Binary(op), &[lhs, rhs], &[ty])
    }

    /// Reinterpret `value` as the layout-compatible type `ty`.
    pub fn copy_logical(&mut self, value: ValueRef, ty: TypeRef) -> InstRef {
        self.build(InstKind::CopyLogical, &[value], &[ty])
    }

    // ========================================================================
    // Calls
    // ========================================================================

    /// Call a function. A `void` callee produces no result.
    pub fn call(&mut self, func: FuncRef, args: &[ValueRef]) -> InstRef {
        let ret = self.module.func(func).return_type;
        if self.module.types.is_void(ret) {
            self.build(InstKind::Call(func), args, &[])
        } else {
            self.build(InstKind::Call(func), args, &[ret])
        }
    }

    pub fn builtin(&mut self, builtin: BuiltinFn, args: &[ValueRef]) -> InstRef {
        match builtin {
            BuiltinFn::ArrayLength => {
                let u32_ty = self.module.types.u32();
                self.build(InstKind::Builtin(builtin), args, &[u32_ty])
            }
            BuiltinFn::WorkgroupBarrier => self.build(InstKind::Builtin(builtin), args, &[]),
        }
    }

    pub fn intrinsic(
        &mut self,
        name: Symbol,
        args: &[ValueRef],
        result_types: &[TypeRef],
        sequenced: bool,
    ) -> InstRef {
        let inst = self.build(InstKind::Intrinsic(name), args, result_types);
        self.module.set_sequenced(inst, sequenced);
        inst
    }

    // ========================================================================
    // Control flow
    // ========================================================================

    /// `if` with fresh true and false blocks.
    pub fn if_(&mut self, cond: ValueRef) -> (InstRef, BlockRef, BlockRef) {
        let inst = self.build(InstKind::If, &[cond], &[]);
        let then_block = self.module.create_block(&[]);
        let else_block = self.module.create_block(&[]);
        self.module.attach_block(inst, then_block);
        self.module.attach_block(inst, else_block);
        (inst, then_block, else_block)
    }

    /// Counted loop over `start..end`. The body block's single parameter is
    /// the `u32` induction variable.
    pub fn loop_range(&mut self, start: ValueRef, end: ValueRef) -> (InstRef, BlockRef) {
        let inst = self.build(InstKind::LoopRange, &[start, end], &[]);
        let u32_ty = self.module.types.u32();
        let body = self.module.create_block(&[u32_ty]);
        self.module.attach_block(inst, body);
        (inst, body)
    }

    pub fn ret(&mut self, value: Option<ValueRef>) -> InstRef {
        let operands: Vec<ValueRef> = value.into_iter().collect();
        self.build(InstKind::Return, &operands, &[])
    }

    pub fn exit_if(&mut self) -> InstRef {
        self.build(InstKind::ExitIf, &[], &[])
    }

    pub fn continue_(&mut self) -> InstRef {
        self.build(InstKind::Continue, &[], &[])
    }

    pub fn unreachable(&mut self) -> InstRef {
        self.build(InstKind::Unreachable, &[], &[])
    }
}

/// Type of element `index` reached through an `access` on `object_ty`.
///
/// Pointers yield a pointer to the element in the same address space.
pub fn access_result_type(
    module: &mut Module,
    object_ty: TypeRef,
    index: Option<u32>,
) -> Option<TypeRef> {
    match module.types.get(object_ty).clone() {
        TypeData::Pointer {
            space,
            store,
            access,
        } => {
            let elem = module.types.element_type(store, index)?;
            Some(module.types.ptr(space, elem, access))
        }
        _ => module.types.element_type(object_ty, index),
    }
}
