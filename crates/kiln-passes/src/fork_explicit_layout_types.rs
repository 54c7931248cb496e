//! Fork aggregate types whose layout rules differ between address spaces.
//!
//! Host-shareable memory (uniform, storage, push constants) needs explicit
//! layout decorations, and from 1.4 on shader-private memory must not carry
//! them. A struct reachable from both kinds of declaration is duplicated: the
//! host-shareable declaration switches to the explicit-layout copy and every
//! whole-value load or store through it converts between the two.
//!
//! The pass runs in three steps:
//!
//! 1. Classify every `var`. Host-shareable ones go on a worklist, and the
//!    aggregates reachable from private ones are recorded as must-not-mark.
//! 2. Fork the store type of each worklist entry. Results are memoized per
//!    type, so a type shared by several declarations forks once.
//! 3. Retype each forked declaration and repair its uses: pointer
//!    derivations are retyped, loads and stores get a conversion.
//!
//! Conversions use `copy_logical` when the target has it and a synthesized
//! helper function otherwise.

use std::collections::{HashMap, HashSet};

use kiln_ir::walk::all_blocks;
use kiln_ir::{
    Access, AddressSpace, ArrayCount, ArrayType, Builder, BuiltinFn, FuncRef, InsertPoint,
    InstKind, InstRef, Module, StructMember, StructType, Symbol, TypeData, TypeRef, ValueRef,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use crate::target::TargetVersion;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ForkConfig {
    pub target: TargetVersion,
}

/// What [`fork_explicit_layout_types`] changed.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct ForkResult {
    /// New explicit-layout types created.
    pub types_forked: usize,
    /// Structs marked explicit in place instead of being duplicated.
    pub structs_marked: usize,
    pub vars_retyped: usize,
    pub conversions_inserted: usize,
    pub helpers_created: usize,
}

/// Give every host-shareable declaration an explicit-layout store type.
pub fn fork_explicit_layout_types(module: &mut Module, config: &ForkConfig) -> ForkResult {
    debug!(version = %config.target, "fork_explicit_layout_types: start");
    let mut pass = ForkLayouts {
        module,
        target: config.target,
        must_not_mark: HashSet::new(),
        forked: HashMap::new(),
        helpers: HashMap::new(),
        result: ForkResult::default(),
    };
    for var in pass.classify_vars() {
        pass.fork_var(var);
    }
    let result = pass.result;
    debug!(
        types_forked = result.types_forked,
        structs_marked = result.structs_marked,
        vars_retyped = result.vars_retyped,
        conversions = result.conversions_inserted,
        helpers = result.helpers_created,
        "fork_explicit_layout_types: done"
    );
    result
}

struct ForkLayouts<'m> {
    module: &'m mut Module,
    target: TargetVersion,
    /// Aggregates reachable from memory that must not carry explicit layout.
    must_not_mark: HashSet<TypeRef>,
    /// Fork result per original type; identity when nothing changed.
    forked: HashMap<TypeRef, TypeRef>,
    /// Conversion helper per (source, destination) type.
    helpers: HashMap<(TypeRef, TypeRef), FuncRef>,
    result: ForkResult,
}

impl ForkLayouts<'_> {
    // ========================================================================
    // Classification
    // ========================================================================

    fn classify_vars(&mut self) -> Vec<InstRef> {
        let mut worklist = Vec::new();
        for block in all_blocks(self.module) {
            for inst in self.module.block_insts(block) {
                if !matches!(self.module.kind(inst), InstKind::Var) {
                    continue;
                }
                let ptr_ty = self.module.value_type(self.module.result(inst, 0));
                let TypeData::Pointer { space, store, .. } = *self.module.types.get(ptr_ty) else {
                    continue;
                };
                if self.target.requires_explicit_layout(space) {
                    worklist.push(inst);
                } else if self.target.forbids_explicit_layout(space) {
                    self.forbid_marking(store);
                }
            }
        }
        worklist
    }

    fn forbid_marking(&mut self, ty: TypeRef) {
        let nested: Vec<TypeRef> = match self.module.types.get(ty) {
            TypeData::Struct(s) => s.members.iter().map(|m| m.ty).collect(),
            TypeData::Array(a) => vec![a.elem],
            _ => return,
        };
        if !self.must_not_mark.insert(ty) {
            return;
        }
        for ty in nested {
            self.forbid_marking(ty);
        }
    }

    // ========================================================================
    // Forking
    // ========================================================================

    fn fork_type(&mut self, ty: TypeRef) -> TypeRef {
        if let Some(&forked) = self.forked.get(&ty) {
            return forked;
        }
        let forked = match self.module.types.get(ty).clone() {
            TypeData::Struct(s) => self.fork_struct(ty, s),
            TypeData::Array(a) => self.fork_array(ty, a),
            _ => ty,
        };
        self.forked.insert(ty, forked);
        forked
    }

    fn fork_struct(&mut self, ty: TypeRef, s: StructType) -> TypeRef {
        let members: Vec<StructMember> = s
            .members
            .iter()
            .map(|m| StructMember {
                ty: self.fork_type(m.ty),
                ..m.clone()
            })
            .collect();
        let unchanged = members.iter().zip(&s.members).all(|(new, old)| new.ty == old.ty);

        if unchanged && !self.must_not_mark.contains(&ty) {
            if !self.module.types.has_explicit_layout(ty) {
                self.module.types.mark_explicit_layout(ty);
                self.result.structs_marked += 1;
                trace!(name = %s.name, "marked struct explicit in place");
            }
            return ty;
        }

        let name = self
            .module
            .types
            .unique_struct_name(&format!("{}_explicit_layout", s.name));
        let forked = self.module.types.intern(TypeData::Struct(StructType {
            name,
            members,
            ..s
        }));
        self.module.types.mark_explicit_layout(forked);
        self.result.types_forked += 1;
        trace!(from = %s.name, to = %name, "forked struct");
        forked
    }

    fn fork_array(&mut self, ty: TypeRef, a: ArrayType) -> TypeRef {
        let elem = self.fork_type(a.elem);
        let forked = self.module.types.intern(TypeData::Array(ArrayType {
            elem,
            explicit_stride: true,
            ..a
        }));
        if forked != ty {
            self.result.types_forked += 1;
            trace!(to = %self.module.types.display(forked), "forked array");
        }
        forked
    }

    /// Pointer to the forked store type, keeping space and access.
    fn fork_pointer(&mut self, ptr_ty: TypeRef) -> TypeRef {
        match self.module.types.get(ptr_ty).clone() {
            TypeData::Pointer {
                space,
                store,
                access,
            } => {
                let store = self.fork_type(store);
                self.module.types.ptr(space, store, access)
            }
            _ => ptr_ty,
        }
    }

    // ========================================================================
    // Propagation
    // ========================================================================

    fn fork_var(&mut self, var: InstRef) {
        let ptr = self.module.result(var, 0);
        let old_ty = self.module.value_type(ptr);
        let new_ty = self.fork_pointer(old_ty);
        if new_ty == old_ty {
            return;
        }
        assert!(
            self.module.operand(var, 0).is_none(),
            "fork_explicit_layout_types: host-shareable variable {ptr} has an initializer",
        );
        self.module.set_value_type(ptr, new_ty);
        self.result.vars_retyped += 1;
        trace!(
            var = %ptr,
            ty = %self.module.types.display(new_ty),
            "retyped variable"
        );
        self.repair_uses(ptr);
    }

    /// Fix up the consumers of a pointer whose store type was just forked.
    fn repair_uses(&mut self, ptr: ValueRef) {
        let uses = self.module.uses(ptr).to_vec();
        for usage in uses {
            let inst = usage.inst;
            match self.module.kind(inst).clone() {
                InstKind::Access | InstKind::Let if usage.operand == 0 => {
                    let derived = self.module.result(inst, 0);
                    let old_ty = self.module.value_type(derived);
                    let new_ty = self.fork_pointer(old_ty);
                    if new_ty != old_ty {
                        self.module.set_value_type(derived, new_ty);
                        self.repair_uses(derived);
                    }
                }
                InstKind::Builtin(BuiltinFn::ArrayLength) => {}
                InstKind::Load => self.repair_load(inst),
                InstKind::Store if usage.operand == 0 => self.repair_store(inst),
                kind => unreachable!(
                    "fork_explicit_layout_types: unexpected use of {ptr} by `{kind}` at {inst}"
                ),
            }
        }
    }

    /// Load the forked type and convert back for the original consumers.
    fn repair_load(&mut self, load: InstRef) {
        let loaded = self.module.result(load, 0);
        let original = self.module.value_type(loaded);
        let forked = self.fork_type(original);
        if forked == original {
            return;
        }
        let consumers = self.module.uses(loaded).to_vec();
        self.module.set_value_type(loaded, forked);
        let mut point = InsertPoint::After(load);
        let converted = self.convert(loaded, original, &mut point);
        for usage in consumers {
            self.module
                .set_operand(usage.inst, usage.operand as usize, Some(converted));
        }
    }

    /// Convert the stored value to the forked type.
    fn repair_store(&mut self, store: InstRef) {
        let Some(value) = self.module.operand(store, 1) else {
            return;
        };
        let original = self.module.value_type(value);
        let forked = self.fork_type(original);
        if forked == original {
            return;
        }
        let mut point = InsertPoint::Before(store);
        let converted = self.convert(value, forked, &mut point);
        self.module.set_operand(store, 1, Some(converted));
    }

    // ========================================================================
    // Conversion
    // ========================================================================

    /// Convert `value` to the layout variant `to`, inserting at `point`.
    fn convert(&mut self, value: ValueRef, to: TypeRef, point: &mut InsertPoint) -> ValueRef {
        let from = self.module.value_type(value);
        if from == to {
            return value;
        }
        let helper = (!self.target.has_copy_logical()).then(|| self.helper(from, to));
        let mut b = Builder::new(self.module, *point);
        let inst = match helper {
            Some(func) => b.call(func, &[value]),
            None => b.copy_logical(value, to),
        };
        *point = b.insert_point();
        self.result.conversions_inserted += 1;
        self.module.result(inst, 0)
    }

    fn helper(&mut self, from: TypeRef, to: TypeRef) -> FuncRef {
        if let Some(&func) = self.helpers.get(&(from, to)) {
            return func;
        }
        let func = match (
            self.module.types.get(from).clone(),
            self.module.types.get(to).clone(),
        ) {
            (TypeData::Struct(src), TypeData::Struct(dst)) => {
                self.struct_helper(from, to, &src, &dst)
            }
            (TypeData::Array(src), TypeData::Array(dst)) => self.array_helper(from, to, &src, &dst),
            _ => panic!(
                "fork_explicit_layout_types: no conversion from {} to {}",
                self.module.types.display(from),
                self.module.types.display(to),
            ),
        };
        self.helpers.insert((from, to), func);
        self.result.helpers_created += 1;
        debug!(helper = %self.module.func(func).name, "synthesized conversion helper");
        func
    }

    /// `fn(S) -> S'`: extract, convert and reassemble each member.
    fn struct_helper(
        &mut self,
        from: TypeRef,
        to: TypeRef,
        src: &StructType,
        dst: &StructType,
    ) -> FuncRef {
        let name = self.helper_name(&format!("convert_{}_to_{}", src.name, dst.name));
        let func = self.module.create_function(name, &[from], to);
        let param = self.module.func(func).params[0];
        let body = self.module.func(func).body;

        let mut point = InsertPoint::Append(body);
        let mut members = Vec::with_capacity(dst.members.len());
        for (src_member, dst_member) in src.members.iter().zip(&dst.members) {
            let index = self.module.constant_u32(src_member.index);
            let mut b = Builder::new(self.module, point);
            let access = b.access(param, &[index], src_member.ty);
            let extracted = b.value(access);
            members.push(self.convert(extracted, dst_member.ty, &mut point));
        }

        let mut b = Builder::at_end(self.module, body);
        let construct = b.construct(to, &members);
        let value = b.value(construct);
        b.ret(Some(value));
        func
    }

    /// `fn(array<T, N>) -> array<T', N>`: convert element-wise into a local.
    fn array_helper(
        &mut self,
        from: TypeRef,
        to: TypeRef,
        src: &ArrayType,
        dst: &ArrayType,
    ) -> FuncRef {
        let count = match (src.count, dst.count) {
            (ArrayCount::Fixed(a), ArrayCount::Fixed(b)) if a == b => a,
            _ => panic!(
                "fork_explicit_layout_types: cannot convert {} to {} by value",
                self.module.types.display(from),
                self.module.types.display(to),
            ),
        };
        let name = self.helper_name("convert_array");
        let func = self.module.create_function(name, &[from], to);
        let param = self.module.func(func).params[0];
        let body = self.module.func(func).body;

        let tmp_ty = self.module.types.ptr(AddressSpace::Function, to, Access::ReadWrite);
        let slot_ty = self
            .module
            .types
            .ptr(AddressSpace::Function, dst.elem, Access::ReadWrite);
        let start = self.module.constant_u32(0);
        let end = self.module.constant_u32(count);

        let mut b = Builder::at_end(self.module, body);
        let tmp = b.var(tmp_ty, None);
        let tmp = b.value(tmp);
        let (_, loop_body) = b.loop_range(start, end);
        let index = self.module.block(loop_body).params()[0];

        let mut b = Builder::at_end(self.module, loop_body);
        let access = b.access(param, &[index], src.elem);
        let elem = b.value(access);
        let converted = self.convert(elem, dst.elem, &mut InsertPoint::Append(loop_body));

        let mut b = Builder::at_end(self.module, loop_body);
        let slot = b.access(tmp, &[index], slot_ty);
        let slot = b.value(slot);
        b.store(slot, converted);
        b.continue_();

        let mut b = Builder::at_end(self.module, body);
        let load = b.load(tmp);
        let value = b.value(load);
        b.ret(Some(value));
        func
    }

    fn helper_name(&self, base: &str) -> Symbol {
        if self.module.function_named(base).is_none() {
            return Symbol::from_dynamic(base);
        }
        (1..)
            .map(|n| format!("{base}_{n}"))
            .find(|name| self.module.function_named(name).is_none())
            .map(|name| Symbol::from_dynamic(&name))
            .expect("unbounded suffix search always finds a free name")
    }
}
