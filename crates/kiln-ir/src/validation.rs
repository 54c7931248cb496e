//! Structural validation of a module.
//!
//! Checks use-chain consistency in both directions, result back-links, the
//! block linked lists, block termination, typing of the layout-sensitive
//! instructions, and the capability-gated module rules. Every problem found
//! is reported, not just the first one.

use std::collections::{BTreeSet, HashSet};
use std::fmt;

use derive_more::{Display, Error};
use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use crate::inst::InstKind;
use crate::module::{BlockParent, Module};
use crate::refs::*;
use crate::symbol::Symbol;
use crate::types::TypeData;

/// Optional module features a consumer may accept.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    /// More than one function may carry a pipeline stage.
    AllowMultipleEntryPoints,
    /// Struct members may have pointer type.
    AllowPointersInStructures,
}

pub type Capabilities = BTreeSet<Capability>;

// ============================================================================
// Error types
// ============================================================================

/// A single validation problem.
#[derive(Clone, Debug, PartialEq, Eq, Display)]
pub enum Diagnostic {
    #[display("operand #{index} of {inst} reads {value} but the use-chain has no matching entry")]
    MissingUsage {
        inst: InstRef,
        index: u32,
        value: ValueRef,
    },
    #[display("operand #{index} of {inst} is listed {count} times in the use-chain of {value}")]
    DuplicateUsage {
        inst: InstRef,
        index: u32,
        value: ValueRef,
        count: usize,
    },
    #[display("use-chain of {value} lists {inst} operand #{index}, which does not read it")]
    StaleUsage {
        value: ValueRef,
        inst: InstRef,
        index: u32,
    },
    #[display("operand #{index} of {inst} reads {value}, a result of destroyed {producer}")]
    DeadOperand {
        inst: InstRef,
        index: u32,
        value: ValueRef,
        producer: InstRef,
    },
    #[display("result {value} of {inst} does not point back to it")]
    ResultMismatch { inst: InstRef, value: ValueRef },
    #[display("{block} has a broken instruction list: {reason}")]
    BrokenList { block: BlockRef, reason: String },
    #[display("{block} does not end with a terminator")]
    MissingTerminator { block: BlockRef },
    #[display("terminator {inst} is not the last instruction of {block}")]
    MisplacedTerminator { block: BlockRef, inst: InstRef },
    #[display("module scope may only declare variables, found `{kind}` at {inst}")]
    NonVarAtModuleScope { inst: InstRef, kind: String },
    #[display("{inst}: {reason}")]
    TypeMismatch { inst: InstRef, reason: String },
    #[display("{count} entry points found but multiple entry points are not allowed")]
    MultipleEntryPoints { count: usize },
    #[display("struct {name} has pointer member {member}")]
    PointerInStructure { name: Symbol, member: Symbol },
}

/// Every problem found by [`validate`].
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub struct ValidationFailure {
    pub diagnostics: Vec<Diagnostic>,
}

impl fmt::Display for ValidationFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{} validation error(s) found:", self.diagnostics.len())?;
        for d in &self.diagnostics {
            writeln!(f, "  - {d}")?;
        }
        Ok(())
    }
}

// ============================================================================
// Entry points
// ============================================================================

/// Validate the whole module.
pub fn validate(module: &Module, capabilities: &Capabilities) -> Result<(), ValidationFailure> {
    let mut v = Validator {
        module,
        capabilities,
        diagnostics: Vec::new(),
    };
    v.check_use_chains();
    v.check_results();
    v.check_blocks();
    v.check_types();
    v.check_entry_points();
    v.check_structs();
    if v.diagnostics.is_empty() {
        trace!(insts = module.inst_count(), "module is valid");
        Ok(())
    } else {
        debug!(count = v.diagnostics.len(), "module failed validation");
        Err(ValidationFailure {
            diagnostics: v.diagnostics,
        })
    }
}

/// Debug-only validation that panics on any error.
///
/// Only runs under `cfg!(debug_assertions)`. Useful as a checkpoint after a
/// transformation in tests.
pub fn debug_assert_valid(module: &Module, pass_name: &str) {
    if !cfg!(debug_assertions) {
        return;
    }
    if let Err(failure) = validate(module, &Capabilities::new()) {
        panic!("validation failed after `{pass_name}`:\n{failure}");
    }
}

struct Validator<'a> {
    module: &'a Module,
    capabilities: &'a Capabilities,
    diagnostics: Vec<Diagnostic>,
}

impl Validator<'_> {
    fn report(&mut self, d: Diagnostic) {
        self.diagnostics.push(d);
    }

    // ========================================================================
    // Use-chains
    // ========================================================================

    fn check_use_chains(&mut self) {
        let module = self.module;

        // Direction 1: operand -> exactly one use-chain entry.
        for (inst, data) in module.insts.iter() {
            if data.flags.dead {
                continue;
            }
            for (index, slot) in data.operands.iter().enumerate() {
                let Some(value) = *slot else {
                    continue;
                };
                let index = index as u32;
                let count = module.uses[value]
                    .iter()
                    .filter(|u| u.inst == inst && u.operand == index)
                    .count();
                match count {
                    0 => self.report(Diagnostic::MissingUsage { inst, index, value }),
                    1 => {}
                    count => self.report(Diagnostic::DuplicateUsage {
                        inst,
                        index,
                        value,
                        count,
                    }),
                }
                if let ValueDef::InstResult(producer, _) = module.values[value].def
                    && module.insts[producer].flags.dead
                {
                    self.report(Diagnostic::DeadOperand {
                        inst,
                        index,
                        value,
                        producer,
                    });
                }
            }
        }

        // Direction 2: use-chain entry -> operand of a live instruction.
        for value in module.values.keys() {
            for u in &module.uses[value] {
                let data = &module.insts[u.inst];
                let reads = !data.flags.dead
                    && data.operands.get(u.operand as usize).copied().flatten() == Some(value);
                if !reads {
                    self.report(Diagnostic::StaleUsage {
                        value,
                        inst: u.inst,
                        index: u.operand,
                    });
                }
            }
        }
    }

    fn check_results(&mut self) {
        let module = self.module;
        for (inst, data) in module.insts.iter() {
            if data.flags.dead {
                continue;
            }
            for (index, &value) in data.results.iter().enumerate() {
                if module.values[value].def != ValueDef::InstResult(inst, index as u32) {
                    self.report(Diagnostic::ResultMismatch { inst, value });
                }
            }
        }
    }

    // ========================================================================
    // Blocks
    // ========================================================================

    fn check_blocks(&mut self) {
        let module = self.module;
        let mut worklist = vec![module.root_block()];
        worklist.extend(module.functions().iter().map(|&f| module.func(f).body));
        let mut seen = HashSet::new();

        while let Some(block) = worklist.pop() {
            if !seen.insert(block) {
                continue;
            }
            let Some(insts) = self.linked_insts(block) else {
                continue;
            };
            for &inst in &insts {
                worklist.extend_from_slice(&module.insts[inst].blocks);
            }
            self.check_termination(block, &insts);
        }
    }

    /// Walk a block's list, checking both directions. `None` when the list
    /// is too broken to trust.
    fn linked_insts(&mut self, block: BlockRef) -> Option<Vec<InstRef>> {
        let module = self.module;
        let data = &module.blocks[block];
        let mut out = Vec::new();
        let mut prev = None;
        let mut cursor = data.first;
        while let Some(inst) = cursor {
            if out.len() > module.insts.len() {
                self.report(Diagnostic::BrokenList {
                    block,
                    reason: "cycle in next links".to_owned(),
                });
                return None;
            }
            let i = &module.insts[inst];
            if i.flags.dead {
                self.report(Diagnostic::BrokenList {
                    block,
                    reason: format!("destroyed {inst} is still linked"),
                });
            }
            if i.block != Some(block) {
                self.report(Diagnostic::BrokenList {
                    block,
                    reason: format!("{inst} claims to live in {:?}", i.block),
                });
            }
            if i.prev != prev {
                self.report(Diagnostic::BrokenList {
                    block,
                    reason: format!("{inst} has prev {:?}, expected {prev:?}", i.prev),
                });
            }
            out.push(inst);
            prev = Some(inst);
            cursor = i.next;
        }
        if data.last != prev {
            self.report(Diagnostic::BrokenList {
                block,
                reason: format!("last is {:?}, expected {prev:?}", data.last),
            });
        }
        Some(out)
    }

    fn check_termination(&mut self, block: BlockRef, insts: &[InstRef]) {
        let module = self.module;
        if module.blocks[block].parent == BlockParent::Root {
            for &inst in insts {
                let kind = &module.insts[inst].kind;
                if *kind != InstKind::Var {
                    self.report(Diagnostic::NonVarAtModuleScope {
                        inst,
                        kind: kind.to_string(),
                    });
                }
            }
            return;
        }
        match insts.split_last() {
            Some((&last, rest)) => {
                if !module.insts[last].kind.is_terminator() {
                    self.report(Diagnostic::MissingTerminator { block });
                }
                for &inst in rest {
                    if module.insts[inst].kind.is_terminator() {
                        self.report(Diagnostic::MisplacedTerminator { block, inst });
                    }
                }
            }
            None => self.report(Diagnostic::MissingTerminator { block }),
        }
    }

    // ========================================================================
    // Typing
    // ========================================================================

    fn check_types(&mut self) {
        let module = self.module;
        for (inst, data) in module.insts.iter() {
            if data.flags.dead {
                continue;
            }
            if let Err(reason) = self.type_check(inst) {
                self.report(Diagnostic::TypeMismatch { inst, reason });
            }
        }
    }

    fn type_check(&self, inst: InstRef) -> Result<(), String> {
        let module = self.module;
        let types = &module.types;
        let data = &module.insts[inst];
        let show = |ty: TypeRef| types.display(ty).to_string();
        let operand = |index: usize| {
            data.operands
                .get(index)
                .copied()
                .flatten()
                .ok_or_else(|| format!("`{}` is missing operand #{index}", data.kind))
        };
        let result = || {
            module
                .single_result(inst)
                .ok_or_else(|| format!("`{}` must have exactly one result", data.kind))
        };

        match &data.kind {
            InstKind::Var => {
                let ty = module.value_type(result()?);
                let store = types
                    .pointee(ty)
                    .ok_or_else(|| format!("var result has non-pointer type {}", show(ty)))?;
                if let Some(Some(init)) = data.operands.first() {
                    let init_ty = module.value_type(*init);
                    if init_ty != store {
                        return Err(format!(
                            "var of {} initialized with {}",
                            show(store),
                            show(init_ty)
                        ));
                    }
                }
            }
            InstKind::Let => {
                let value_ty = module.value_type(operand(0)?);
                let result_ty = module.value_type(result()?);
                if value_ty != result_ty {
                    return Err(format!(
                        "let result has type {} but its operand has type {}",
                        show(result_ty),
                        show(value_ty)
                    ));
                }
            }
            InstKind::Phony => {
                operand(0)?;
                if !data.results.is_empty() {
                    return Err("phony must not produce a result".to_owned());
                }
            }
            InstKind::Load => {
                let ptr_ty = module.value_type(operand(0)?);
                let result_ty = module.value_type(result()?);
                let store = types
                    .pointee(ptr_ty)
                    .ok_or_else(|| format!("load from non-pointer type {}", show(ptr_ty)))?;
                if store != result_ty {
                    return Err(format!(
                        "load of {} produces {}",
                        show(store),
                        show(result_ty)
                    ));
                }
            }
            InstKind::Store => {
                let ptr_ty = module.value_type(operand(0)?);
                let value_ty = module.value_type(operand(1)?);
                let store = types
                    .pointee(ptr_ty)
                    .ok_or_else(|| format!("store to non-pointer type {}", show(ptr_ty)))?;
                if store != value_ty {
                    return Err(format!(
                        "store of {} through a pointer to {}",
                        show(value_ty),
                        show(store)
                    ));
                }
            }
            _ => {}
        }
        Ok(())
    }

    // ========================================================================
    // Module rules
    // ========================================================================

    fn check_entry_points(&mut self) {
        let module = self.module;
        let count = module
            .functions()
            .iter()
            .filter(|&&f| module.func(f).stage.is_some())
            .count();
        if count > 1
            && !self
                .capabilities
                .contains(&Capability::AllowMultipleEntryPoints)
        {
            self.report(Diagnostic::MultipleEntryPoints { count });
        }
    }

    fn check_structs(&mut self) {
        if self
            .capabilities
            .contains(&Capability::AllowPointersInStructures)
        {
            return;
        }
        let module = self.module;
        for (_, data) in module.types.iter() {
            let TypeData::Struct(s) = data else {
                continue;
            };
            for m in &s.members {
                if module.types.pointee(m.ty).is_some() {
                    self.report(Diagnostic::PointerInStructure {
                        name: s.name,
                        member: m.name,
                    });
                }
            }
        }
    }
}
