//! Value/instruction graph: instruction creation, operands, results and the
//! use-chains that tie them together.
//!
//! Every write to an operand slot goes through this module so the usage list
//! of the referenced value is updated in the same step.

use smallvec::SmallVec;

use crate::inst::{InstData, InstKind};
use crate::module::{Module, ValueData};
use crate::refs::*;
use crate::symbol::Symbol;

impl Module {
    // ========================================================================
    // Instructions
    // ========================================================================

    /// Create a detached instruction.
    ///
    /// Uses are registered for every operand and one fresh result value is
    /// allocated per entry of `result_types`.
    pub fn create_inst(
        &mut self,
        kind: InstKind,
        operands: &[ValueRef],
        result_types: &[TypeRef],
    ) -> InstRef {
        let inst = self.insts.push(InstData::new(kind));
        for &v in operands {
            self.push_operand(inst, v);
        }
        self.alloc_results(inst, result_types);
        inst
    }

    pub fn inst(&self, inst: InstRef) -> &InstData {
        &self.insts[inst]
    }

    pub fn kind(&self, inst: InstRef) -> &InstKind {
        &self.insts[inst].kind
    }

    pub fn operand(&self, inst: InstRef, index: usize) -> Option<ValueRef> {
        self.insts[inst].operands.get(index).copied().flatten()
    }

    pub fn operands(&self, inst: InstRef) -> &[Option<ValueRef>] {
        &self.insts[inst].operands
    }

    /// Get the `index`-th result of an instruction.
    pub fn result(&self, inst: InstRef, index: usize) -> ValueRef {
        self.insts[inst].results[index]
    }

    pub fn results(&self, inst: InstRef) -> &[ValueRef] {
        &self.insts[inst].results
    }

    /// The result of a single-result instruction.
    pub fn single_result(&self, inst: InstRef) -> Option<ValueRef> {
        match self.insts[inst].results.as_slice() {
            [v] => Some(*v),
            _ => None,
        }
    }

    /// Total number of instructions ever created, dead ones included.
    pub fn inst_count(&self) -> usize {
        self.insts.len()
    }

    pub fn set_sequenced(&mut self, inst: InstRef, sequenced: bool) {
        self.insts[inst].flags.sequenced = sequenced;
    }

    // ========================================================================
    // Operands
    // ========================================================================

    /// Write operand slot `index`, keeping the use-chains in sync.
    ///
    /// # Panics
    ///
    /// Panics if `index` is out of range.
    pub fn set_operand(&mut self, inst: InstRef, index: usize, value: Option<ValueRef>) {
        let len = self.insts[inst].operands.len();
        assert!(
            index < len,
            "set_operand: index {index} out of range for {inst} with {len} operand(s)",
        );
        if let Some(old) = self.insts[inst].operands[index] {
            self.remove_usage(old, inst, index);
        }
        self.insts[inst].operands[index] = value;
        if let Some(new) = value {
            self.uses[new].push(Usage {
                inst,
                operand: index as u32,
            });
        }
    }

    /// Append an operand slot holding `value`.
    pub fn push_operand(&mut self, inst: InstRef, value: ValueRef) {
        let index = self.insts[inst].operands.len();
        self.insts[inst].operands.push(Some(value));
        self.uses[value].push(Usage {
            inst,
            operand: index as u32,
        });
    }

    /// Replace the whole operand list.
    pub fn set_operands(&mut self, inst: InstRef, operands: &[ValueRef]) {
        self.clear_operands(inst);
        for &v in operands {
            self.push_operand(inst, v);
        }
    }

    fn clear_operands(&mut self, inst: InstRef) {
        let old = std::mem::take(&mut self.insts[inst].operands);
        for (index, slot) in old.iter().enumerate() {
            if let Some(v) = *slot {
                self.remove_usage(v, inst, index);
            }
        }
    }

    fn remove_usage(&mut self, value: ValueRef, inst: InstRef, index: usize) {
        let uses = &mut self.uses[value];
        let pos = uses
            .iter()
            .position(|u| u.inst == inst && u.operand as usize == index)
            .unwrap_or_else(|| {
                panic!("use-chain of {value} is missing the entry for {inst} operand {index}")
            });
        uses.swap_remove(pos);
    }

    // ========================================================================
    // Results
    // ========================================================================

    /// Replace the result list with fresh values of the given types.
    ///
    /// # Panics
    ///
    /// Panics if any current result still has uses.
    pub fn set_results(&mut self, inst: InstRef, result_types: &[TypeRef]) {
        self.assert_results_unused("set_results", inst);
        self.insts[inst].results.clear();
        self.alloc_results(inst, result_types);
    }

    fn alloc_results(&mut self, inst: InstRef, result_types: &[TypeRef]) {
        let results: SmallVec<[ValueRef; 1]> = result_types
            .iter()
            .enumerate()
            .map(|(idx, &ty)| {
                self.values.push(ValueData {
                    def: ValueDef::InstResult(inst, idx as u32),
                    ty,
                })
            })
            .collect();
        self.insts[inst].results = results;
    }

    fn assert_results_unused(&self, what: &str, inst: InstRef) {
        for &val in &self.insts[inst].results {
            assert!(
                self.uses[val].is_empty(),
                "{what}: result {val} of {inst} still has {} use(s); \
                 replace all uses first",
                self.uses[val].len(),
            );
        }
    }

    // ========================================================================
    // Destruction
    // ========================================================================

    /// Destroy an instruction together with the contents of its nested blocks.
    ///
    /// Unlinks it from its block, clears all operand usages and marks every
    /// destroyed instruction dead.
    ///
    /// # Panics
    ///
    /// Panics if a result of the instruction, or of anything nested in it, is
    /// still used from outside the destroyed subtree.
    pub fn destroy(&mut self, inst: InstRef) {
        assert!(!self.insts[inst].flags.dead, "destroy: {inst} is already dead");
        self.assert_results_unused("destroy", inst);

        let mut doomed = vec![inst];
        let mut cursor = 0;
        while cursor < doomed.len() {
            let current = doomed[cursor];
            cursor += 1;
            for &block in &self.insts[current].blocks {
                doomed.extend(self.block_insts(block));
            }
        }

        self.remove(inst);
        for &d in &doomed {
            self.clear_operands(d);
        }
        for &d in &doomed {
            self.assert_results_unused("destroy", d);
            self.insts[d].flags.dead = true;
        }
    }

    // ========================================================================
    // Use-chain
    // ========================================================================

    /// Every operand slot that reads `v`.
    pub fn uses(&self, v: ValueRef) -> &[Usage] {
        &self.uses[v]
    }

    pub fn has_uses(&self, v: ValueRef) -> bool {
        !self.uses[v].is_empty()
    }

    /// Rewrite every use of `old` to read `new` instead.
    pub fn replace_all_uses_with(&mut self, old: ValueRef, new: ValueRef) {
        if old == new {
            return;
        }
        let old_uses = std::mem::take(&mut self.uses[old]);
        for u in &old_uses {
            let slot = &mut self.insts[u.inst].operands[u.operand as usize];
            debug_assert_eq!(*slot, Some(old));
            *slot = Some(new);
            self.uses[new].push(*u);
        }
    }

    // ========================================================================
    // Values
    // ========================================================================

    pub fn value_type(&self, v: ValueRef) -> TypeRef {
        self.values[v].ty
    }

    pub fn set_value_type(&mut self, v: ValueRef, ty: TypeRef) {
        self.values[v].ty = ty;
    }

    pub fn value_def(&self, v: ValueRef) -> &ValueDef {
        &self.values[v].def
    }

    /// Instruction producing `v`, if it is an instruction result.
    pub fn defining_inst(&self, v: ValueRef) -> Option<InstRef> {
        match self.values[v].def {
            ValueDef::InstResult(inst, _) => Some(inst),
            _ => None,
        }
    }

    pub fn name_of(&self, v: ValueRef) -> Option<Symbol> {
        self.names[v]
    }

    pub fn set_name(&mut self, v: ValueRef, name: Symbol) {
        self.names[v] = Some(name);
    }

    /// Remove and return the name of `v`.
    pub fn clear_name(&mut self, v: ValueRef) -> Option<Symbol> {
        self.names[v].take()
    }
}
