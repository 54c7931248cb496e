//! Kiln IR crate.
//!
//! Arena-based mutable intermediate representation for shader programs.
//! Entities live in `cranelift-entity` arenas owned by a [`Module`] and are
//! addressed by `u32` handles. Operands and usage lists are kept in sync on
//! every write, which makes in-place rewriting and RAUW (replace all uses
//! with) cheap.

// === Entities ===
pub mod inst;
pub mod refs;
pub mod symbol;
pub mod types;

// === Storage and mutation ===
pub mod builder;
pub mod clone;
pub mod graph;
pub mod module;

// === Analysis and debugging ===
pub mod eval;
pub mod printer;
pub mod validation;
pub mod walk;

// Re-export smallvec for downstream crates
pub use smallvec;

pub use builder::{Builder, InsertPoint};
pub use clone::CloneContext;
pub use inst::{BinaryOp, BuiltinFn, InstData, InstFlags, InstKind};
pub use module::{BlockData, BlockParent, FunctionData, Module, PipelineStage, ValueData};
pub use refs::{BlockRef, FuncRef, InstRef, TypeRef, Usage, ValueDef, ValueRef};
pub use symbol::Symbol;
pub use types::{
    Access, AddressSpace, ArrayCount, ArrayType, ConstantValue, StructMember, StructType,
    TypeData, TypeInterner,
};
pub use validation::{Capabilities, Capability, ValidationFailure, validate};
pub use walk::WalkAction;
