//! ValueToLet: sequencing legalization.
//!
//! Decides, per instruction result, whether the value can stay inlined at its
//! single use or has to be materialized as a `let` binding (or discarded with
//! a `phony`), so that emitting every inlined value at its use site preserves
//! the relative order of sequenced instructions.
//!
//! Each block is scanned front to back with a `pending` list holding results
//! of sequenced instructions that could still be inlined into a later
//! consumer:
//!
//! * A consumer whose only pending operand is the most recent pending entry
//!   takes it inline and becomes sequenced itself.
//! * Any other pending operand forces everything up to and including it to be
//!   bound, oldest first. A consumer of two pending values therefore binds
//!   both, since not every target fixes operand evaluation order.
//! * A sequenced instruction that does not itself become pending is an
//!   ordering barrier and binds everything still pending.
//!
//! The second rule is stricter than popping whichever pending operand happens
//! to be last: `h(f(), g())` binds both calls on purpose.
//!
//! A result whose only use is a `let` or `phony` sitting right after its
//! producer is already bound and is left alone, so a second run is a no-op.
//!
//! Nested blocks are processed after their control instruction, each with its
//! own pending list.

use std::collections::{HashMap, VecDeque};

use kiln_ir::{BlockRef, InstKind, InstRef, Module, ValueRef};
use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

/// Configuration for ValueToLet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ValueToLetConfig {
    /// Discard unused non-void results of must-use callees through a
    /// `phony` instead of leaving the call as a bare statement. Default: true.
    pub discard_must_use_results: bool,
}

impl Default for ValueToLetConfig {
    fn default() -> Self {
        Self {
            discard_must_use_results: true,
        }
    }
}

/// Result of running ValueToLet.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ValueToLetResult {
    /// Number of `let` bindings created.
    pub lets_created: usize,
    /// Number of `phony` discards created.
    pub phonies_created: usize,
    /// Number of sequenced values inlined into their consumer.
    pub inlined: usize,
}

/// Run ValueToLet with the default configuration.
pub fn value_to_let(module: &mut Module) -> ValueToLetResult {
    value_to_let_with_config(module, &ValueToLetConfig::default())
}

/// Run ValueToLet over the root block and every function body.
pub fn value_to_let_with_config(module: &mut Module, config: &ValueToLetConfig) -> ValueToLetResult {
    debug!(functions = module.functions().len(), "value_to_let: start");
    let mut pass = ValueToLet {
        module,
        config,
        result: ValueToLetResult::default(),
    };
    let root = pass.module.root_block();
    pass.process_block(root);
    for func in pass.module.functions().to_vec() {
        let body = pass.module.func(func).body;
        pass.process_block(body);
    }
    let result = pass.result;
    debug!(
        lets = result.lets_created,
        phonies = result.phonies_created,
        inlined = result.inlined,
        "value_to_let: done"
    );
    result
}

// ============================================================================
// Pending list
// ============================================================================

/// Ordered list of deferred results with O(1) membership and position
/// queries.
///
/// Entries are numbered by insertion; `front_seq` is the number of the
/// oldest entry still present, so positions stay valid as the front drains.
#[derive(Default)]
struct PendingList {
    entries: VecDeque<ValueRef>,
    index: HashMap<ValueRef, u64>,
    front_seq: u64,
}

impl PendingList {
    fn push(&mut self, v: ValueRef) {
        let seq = self.front_seq + self.entries.len() as u64;
        self.index.insert(v, seq);
        self.entries.push_back(v);
    }

    fn contains(&self, v: ValueRef) -> bool {
        self.index.contains_key(&v)
    }

    fn is_last(&self, v: ValueRef) -> bool {
        self.entries.back() == Some(&v)
    }

    fn pop_last(&mut self) -> Option<ValueRef> {
        let v = self.entries.pop_back()?;
        self.index.remove(&v);
        Some(v)
    }

    /// Remove every entry up to and including `v`, oldest first.
    fn drain_through(&mut self, v: ValueRef) -> Vec<ValueRef> {
        let Some(&seq) = self.index.get(&v) else {
            return Vec::new();
        };
        let count = (seq - self.front_seq + 1) as usize;
        self.front_seq = seq + 1;
        let drained: Vec<ValueRef> = self.entries.drain(..count).collect();
        for d in &drained {
            self.index.remove(d);
        }
        drained
    }

    fn drain_all(&mut self) -> Vec<ValueRef> {
        self.front_seq += self.entries.len() as u64;
        self.index.clear();
        self.entries.drain(..).collect()
    }
}

// ============================================================================
// Pass
// ============================================================================

struct ValueToLet<'a> {
    module: &'a mut Module,
    config: &'a ValueToLetConfig,
    result: ValueToLetResult,
}

impl ValueToLet<'_> {
    fn process_block(&mut self, block: BlockRef) {
        let mut pending = PendingList::default();
        for inst in self.module.block_insts(block) {
            self.process_inst(inst, &mut pending);
            for nested in self.module.inst(inst).blocks().to_vec() {
                self.process_block(nested);
            }
        }
        for v in pending.drain_all() {
            self.materialize(v);
        }
    }

    fn process_inst(&mut self, inst: InstRef, pending: &mut PendingList) {
        let mut sequenced = self.module.inst(inst).is_sequenced();

        // Operands, right to left.
        let operands: Vec<ValueRef> = self.module.operands(inst).iter().flatten().copied().collect();
        let pending_operands = operands.iter().filter(|&&v| pending.contains(v)).count();
        for &v in operands.iter().rev() {
            if !pending.contains(v) {
                continue;
            }
            if pending_operands == 1 && pending.is_last(v) {
                pending.pop_last();
                sequenced = true;
                self.result.inlined += 1;
                trace!(value = %v, consumer = %inst, "inlined into consumer");
            } else {
                for flushed in pending.drain_through(v) {
                    self.materialize(flushed);
                }
            }
        }
        if sequenced && !self.module.inst(inst).is_sequenced() {
            self.module.set_sequenced(inst, true);
        }

        // Results.
        let mut deferred = false;
        if !self.module.kind(inst).is_binding() {
            for r in self.module.results(inst).to_vec() {
                if self.is_inline_candidate(r) {
                    if sequenced {
                        trace!(value = %r, "deferred");
                        pending.push(r);
                        deferred = true;
                    }
                } else {
                    self.materialize(r);
                }
            }
        }

        if sequenced && !deferred {
            for v in pending.drain_all() {
                self.materialize(v);
            }
        }
    }

    /// Single result, unnamed, used exactly once, neither a handle nor void.
    fn is_inline_candidate(&self, v: ValueRef) -> bool {
        let module = &*self.module;
        let Some(inst) = module.defining_inst(v) else {
            return false;
        };
        let ty = module.value_type(v);
        module.results(inst).len() == 1
            && module.name_of(v).is_none()
            && module.uses(v).len() == 1
            && !module.types.is_handle(ty)
            && !module.types.is_void(ty)
    }

    /// Unnamed `v` whose single use is a `let`/`phony` directly after its
    /// producer, possibly behind bindings of the producer's other results.
    fn is_bound(&self, v: ValueRef) -> bool {
        let module = &*self.module;
        let (Some(producer), [usage]) = (module.defining_inst(v), module.uses(v)) else {
            return false;
        };
        let binds = |inst: InstRef| matches!(module.kind(inst), InstKind::Let | InstKind::Phony);
        if module.name_of(v).is_some() || !binds(usage.inst) {
            return false;
        }
        let siblings = module.results(producer);
        let mut cursor = module.inst(producer).next();
        while let Some(inst) = cursor {
            if inst == usage.inst {
                return true;
            }
            let binds_sibling =
                binds(inst) && module.operand(inst, 0).is_some_and(|o| siblings.contains(&o));
            if !binds_sibling {
                return false;
            }
            cursor = module.inst(inst).next();
        }
        false
    }

    /// Bind `v` with a `let` right after its producer, or discard it.
    fn materialize(&mut self, v: ValueRef) {
        if self.is_bound(v) {
            trace!(value = %v, "already bound");
            return;
        }
        let module = &mut *self.module;
        let Some(producer) = module.defining_inst(v) else {
            return;
        };
        let ty = module.value_type(v);
        let producer_sequenced = module.inst(producer).is_sequenced();
        let named = module.name_of(v).is_some();

        if module.has_uses(v) || named {
            let uses = module.uses(v).to_vec();
            let binding = module.create_inst(InstKind::Let, &[v], &[ty]);
            module.set_sequenced(binding, producer_sequenced);
            module.insert_after(producer, binding);
            let bound = module.result(binding, 0);
            for u in uses {
                module.set_operand(u.inst, u.operand as usize, Some(bound));
            }
            if let Some(name) = module.clear_name(v) {
                module.set_name(bound, name);
            }
            self.result.lets_created += 1;
            trace!(value = %v, binding = %binding, "bound with let");
            return;
        }

        if module.types.is_void(ty) || !self.should_discard(producer) {
            return;
        }
        let module = &mut *self.module;
        let discard = module.create_inst(InstKind::Phony, &[v], &[]);
        module.set_sequenced(discard, producer_sequenced);
        module.insert_after(producer, discard);
        self.result.phonies_created += 1;
        trace!(value = %v, "discarded with phony");
    }

    /// Whether an unused, unnamed result of `producer` gets a `phony`.
    fn should_discard(&self, producer: InstRef) -> bool {
        let module = &*self.module;
        let must_use = match module.kind(producer) {
            InstKind::Call(callee) => module.func(*callee).must_use,
            InstKind::Builtin(builtin) => builtin.is_must_use(),
            _ => return true,
        };
        must_use && self.config.discard_must_use_results
    }
}
