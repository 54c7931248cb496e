//! Entity references for the arena IR.
//!
//! Each ref type is a thin `u32` wrapper providing type-safe indexing
//! into the `PrimaryMap` storage owned by [`Module`](crate::Module).

use cranelift_entity::entity_impl;
use std::fmt;

use crate::types::ConstantValue;

/// Reference to an instruction in the arena.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct InstRef(u32);
entity_impl!(InstRef, "inst");

/// Reference to a value (result, parameter or constant).
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ValueRef(u32);
entity_impl!(ValueRef, "v");

/// Reference to a block of instructions.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BlockRef(u32);
entity_impl!(BlockRef, "block");

/// Reference to a function.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FuncRef(u32);
entity_impl!(FuncRef, "fn");

/// Reference to an interned type.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TypeRef(u32);
entity_impl!(TypeRef, "ty");

/// Where a value is defined.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum ValueDef {
    /// Result of an instruction at the given index.
    InstResult(InstRef, u32),
    /// Parameter of a function at the given index.
    FunctionParam(FuncRef, u32),
    /// Parameter of a block at the given index.
    BlockParam(BlockRef, u32),
    /// Module-owned constant.
    Constant(ConstantValue),
}

impl fmt::Display for ValueDef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValueDef::InstResult(inst, idx) => write!(f, "{inst}#{idx}"),
            ValueDef::FunctionParam(func, idx) => write!(f, "{func}#{idx}"),
            ValueDef::BlockParam(block, idx) => write!(f, "{block}#{idx}"),
            ValueDef::Constant(c) => write!(f, "const {c:?}"),
        }
    }
}

/// A single use of a value: which instruction reads it, at which operand slot.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Usage {
    pub inst: InstRef,
    pub operand: u32,
}

#[cfg(test)]
mod tests {
    use super::*;
    use cranelift_entity::EntityRef;

    #[test]
    fn entity_ref_display() {
        assert_eq!(format!("{}", InstRef::new(0)), "inst0");
        assert_eq!(format!("{}", ValueRef::new(5)), "v5");
        assert_eq!(format!("{}", BlockRef::new(2)), "block2");
        assert_eq!(format!("{}", FuncRef::new(1)), "fn1");
        assert_eq!(format!("{}", TypeRef::new(3)), "ty3");
    }

    #[test]
    fn value_def_display() {
        let def = ValueDef::InstResult(InstRef::new(4), 0);
        assert_eq!(def.to_string(), "inst4#0");
        let def = ValueDef::BlockParam(BlockRef::new(1), 2);
        assert_eq!(def.to_string(), "block1#2");
    }
}
