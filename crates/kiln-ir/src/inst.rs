//! Instruction kinds and per-instruction data.

use std::fmt;

use smallvec::SmallVec;

use crate::refs::{BlockRef, FuncRef, InstRef, ValueRef};
use crate::symbol::Symbol;

/// Binary arithmetic and comparison operators.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Equal,
    LessThan,
}

impl BinaryOp {
    pub fn name(self) -> &'static str {
        match self {
            BinaryOp::Add => "add",
            BinaryOp::Sub => "sub",
            BinaryOp::Mul => "mul",
            BinaryOp::Div => "div",
            BinaryOp::Equal => "eq",
            BinaryOp::LessThan => "lt",
        }
    }
}

/// Built-in functions known to the core.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum BuiltinFn {
    /// Element count of a runtime-sized array behind a pointer.
    ArrayLength,
    /// Execution and memory barrier across a workgroup.
    WorkgroupBarrier,
}

impl BuiltinFn {
    pub fn name(self) -> &'static str {
        match self {
            BuiltinFn::ArrayLength => "array_length",
            BuiltinFn::WorkgroupBarrier => "workgroup_barrier",
        }
    }

    /// Whether calling the builtin has effects beyond producing its result.
    pub fn has_side_effects(self) -> bool {
        match self {
            BuiltinFn::ArrayLength => false,
            BuiltinFn::WorkgroupBarrier => true,
        }
    }

    /// Whether a non-void result must be consumed by convention.
    pub fn is_must_use(self) -> bool {
        match self {
            BuiltinFn::ArrayLength => true,
            BuiltinFn::WorkgroupBarrier => false,
        }
    }
}

/// The closed set of instruction kinds.
///
/// Operand layouts:
///
/// | kind | operands | results | blocks |
/// |---|---|---|---|
/// | `Var` | `[init?]` | pointer | |
/// | `Let` | `[value]` | value | |
/// | `Phony` | `[value]` | | |
/// | `Load` | `[ptr]` | pointee | |
/// | `Store` | `[ptr, value]` | | |
/// | `Access` | `[object, index...]` | element (pointer when `object` is) | |
/// | `Construct` | `[member...]` | composite | |
/// | `Binary` | `[lhs, rhs]` | value | |
/// | `Call` | `[arg...]` | return value | |
/// | `Builtin` | `[arg...]` | value | |
/// | `CopyLogical` | `[value]` | value of a layout-compatible type | |
/// | `Intrinsic` | any | any | |
/// | `If` | `[cond]` | | `[true, false]` |
/// | `LoopRange` | `[start, end]` | | `[body]` (one `u32` param) |
/// | `Return` | `[value?]` | | |
/// | `ExitIf`, `Continue`, `Unreachable` | | | |
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum InstKind {
    Var,
    Let,
    Phony,
    Load,
    Store,
    Access,
    Construct,
    Binary(BinaryOp),
    Call(FuncRef),
    Builtin(BuiltinFn),
    CopyLogical,
    /// Target-specific operation opaque to the core. Sequencing is decided
    /// per instance by whoever creates it.
    Intrinsic(Symbol),
    If,
    LoopRange,
    Return,
    ExitIf,
    Continue,
    Unreachable,
}

impl InstKind {
    /// Whether instances of this kind are sequenced when created.
    pub fn is_sequenced_by_default(&self) -> bool {
        match self {
            InstKind::Var
            | InstKind::Load
            | InstKind::Store
            | InstKind::Call(_)
            | InstKind::If
            | InstKind::LoopRange
            | InstKind::Return
            | InstKind::ExitIf
            | InstKind::Continue
            | InstKind::Unreachable => true,
            InstKind::Builtin(b) => b.has_side_effects(),
            InstKind::Let
            | InstKind::Phony
            | InstKind::Access
            | InstKind::Construct
            | InstKind::Binary(_)
            | InstKind::CopyLogical
            | InstKind::Intrinsic(_) => false,
        }
    }

    /// Block terminators.
    pub fn is_terminator(&self) -> bool {
        matches!(
            self,
            InstKind::Return | InstKind::ExitIf | InstKind::Continue | InstKind::Unreachable
        )
    }

    /// Instructions that already name or discard a value: `var`, `let`, `phony`.
    pub fn is_binding(&self) -> bool {
        matches!(self, InstKind::Var | InstKind::Let | InstKind::Phony)
    }

    /// Direct calls and builtin calls.
    pub fn is_call(&self) -> bool {
        matches!(self, InstKind::Call(_) | InstKind::Builtin(_))
    }
}

impl fmt::Display for InstKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InstKind::Var => f.write_str("var"),
            InstKind::Let => f.write_str("let"),
            InstKind::Phony => f.write_str("phony"),
            InstKind::Load => f.write_str("load"),
            InstKind::Store => f.write_str("store"),
            InstKind::Access => f.write_str("access"),
            InstKind::Construct => f.write_str("construct"),
            InstKind::Binary(op) => f.write_str(op.name()),
            InstKind::Call(_) => f.write_str("call"),
            InstKind::Builtin(b) => f.write_str(b.name()),
            InstKind::CopyLogical => f.write_str("copy_logical"),
            InstKind::Intrinsic(name) => write!(f, "intrinsic \"{name}\""),
            InstKind::If => f.write_str("if"),
            InstKind::LoopRange => f.write_str("loop_range"),
            InstKind::Return => f.write_str("ret"),
            InstKind::ExitIf => f.write_str("exit_if"),
            InstKind::Continue => f.write_str("continue"),
            InstKind::Unreachable => f.write_str("unreachable"),
        }
    }
}

/// Per-instruction flags.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct InstFlags {
    /// Destroyed; must not be referenced.
    pub dead: bool,
    /// Order relative to other sequenced instructions must be preserved.
    pub sequenced: bool,
}

/// Data for a single instruction in the arena.
#[derive(Clone, Debug)]
pub struct InstData {
    pub kind: InstKind,
    pub(crate) operands: SmallVec<[Option<ValueRef>; 4]>,
    pub(crate) results: SmallVec<[ValueRef; 1]>,
    pub(crate) blocks: SmallVec<[BlockRef; 2]>,
    pub(crate) flags: InstFlags,
    pub(crate) block: Option<BlockRef>,
    pub(crate) prev: Option<InstRef>,
    pub(crate) next: Option<InstRef>,
}

impl InstData {
    pub(crate) fn new(kind: InstKind) -> Self {
        let sequenced = kind.is_sequenced_by_default();
        Self {
            kind,
            operands: SmallVec::new(),
            results: SmallVec::new(),
            blocks: SmallVec::new(),
            flags: InstFlags {
                dead: false,
                sequenced,
            },
            block: None,
            prev: None,
            next: None,
        }
    }

    pub fn operands(&self) -> &[Option<ValueRef>] {
        &self.operands
    }

    pub fn results(&self) -> &[ValueRef] {
        &self.results
    }

    /// Nested blocks owned by a control instruction.
    pub fn blocks(&self) -> &[BlockRef] {
        &self.blocks
    }

    pub fn flags(&self) -> InstFlags {
        self.flags
    }

    pub fn is_dead(&self) -> bool {
        self.flags.dead
    }

    pub fn is_sequenced(&self) -> bool {
        self.flags.sequenced
    }

    /// The block the instruction is linked into, if any.
    pub fn parent_block(&self) -> Option<BlockRef> {
        self.block
    }

    pub fn prev(&self) -> Option<InstRef> {
        self.prev
    }

    pub fn next(&self) -> Option<InstRef> {
        self.next
    }
}
