//! Text format printer for the IR.
//!
//! ```text
//! struct Params {
//!   scale: f32 @offset(0)
//! }
//!
//! %params: ptr<uniform, Params, read> = var
//!
//! @compute fn main() -> void {
//!   %0: ptr<uniform, f32, read> = access %params, 0u
//!   %1: f32 = load %0
//!   ret
//! }
//! ```
//!
//! Named values print as `%name`, unnamed ones are numbered in definition
//! order. Constants print inline (`1i`, `2u`, `0.5f`, `true`, `zero<T>`).

use std::collections::HashMap;
use std::fmt;
use std::fmt::Write;

use crate::inst::InstKind;
use crate::module::Module;
use crate::refs::*;
use crate::types::{ConstantValue, TypeData};

/// Print state for value numbering.
struct PrintState<'a> {
    module: &'a Module,
    value_names: HashMap<ValueRef, String>,
    next_value_num: usize,
}

impl<'a> PrintState<'a> {
    fn new(module: &'a Module) -> Self {
        let mut state = Self {
            module,
            value_names: HashMap::new(),
            next_value_num: 0,
        };
        for inst in module.block_insts(module.root_block()) {
            for &v in module.results(inst) {
                state.assign_value_name(v);
            }
        }
        state
    }

    fn assign_value_name(&mut self, v: ValueRef) -> String {
        if let Some(existing) = self.value_names.get(&v) {
            return existing.clone();
        }
        let name = match self.module.name_of(v) {
            Some(sym) => format!("%{sym}"),
            None => {
                let n = self.next_value_num;
                self.next_value_num += 1;
                format!("%{n}")
            }
        };
        self.value_names.insert(v, name.clone());
        name
    }

    fn value_name(&self, v: ValueRef) -> String {
        if let ValueDef::Constant(c) = self.module.value_def(v) {
            return self.constant_text(self.module.value_type(v), c);
        }
        self.value_names
            .get(&v)
            .cloned()
            .unwrap_or_else(|| "%?".to_owned())
    }

    fn constant_text(&self, ty: TypeRef, c: &ConstantValue) -> String {
        match c {
            ConstantValue::Bool(b) => b.to_string(),
            ConstantValue::I32(v) => format!("{v}i"),
            ConstantValue::U32(v) => format!("{v}u"),
            ConstantValue::F32(bits) => format!("{:?}f", f32::from_bits(*bits)),
            ConstantValue::Zero => format!("zero<{}>", self.module.types.display(ty)),
        }
    }
}

// ============================================================================
// Public API
// ============================================================================

/// Print a whole module: struct declarations, module-scope variables, then
/// every function.
pub fn print_module(module: &Module) -> String {
    let mut state = PrintState::new(module);
    let mut sections = Vec::new();

    let mut structs = String::new();
    write_struct_decls(module, &mut structs).expect("fmt::Write to String never fails");
    if !structs.is_empty() {
        sections.push(structs);
    }

    let root = module.root_block();
    if !module.block(root).is_empty() {
        let mut out = String::new();
        print_block_body(&mut state, &mut out, root, 0).expect("fmt::Write to String never fails");
        sections.push(out);
    }

    for &func in module.functions() {
        let mut out = String::new();
        print_function_inner(&mut state, &mut out, func).expect("fmt::Write to String never fails");
        sections.push(out);
    }
    sections.join("\n")
}

/// Print a single function.
pub fn print_function(module: &Module, func: FuncRef) -> String {
    let mut state = PrintState::new(module);
    let mut out = String::new();
    print_function_inner(&mut state, &mut out, func).expect("fmt::Write to String never fails");
    out
}

// ============================================================================
// Declarations
// ============================================================================

fn write_struct_decls(module: &Module, f: &mut impl Write) -> fmt::Result {
    for (ty, data) in module.types.iter() {
        let TypeData::Struct(s) = data else {
            continue;
        };
        write!(f, "struct {}", s.name)?;
        if module.types.has_explicit_layout(ty) {
            f.write_str(" @explicit_layout")?;
        }
        f.write_str(" {\n")?;
        for m in &s.members {
            writeln!(
                f,
                "  {}: {} @offset({})",
                m.name,
                module.types.display(m.ty),
                m.offset
            )?;
        }
        f.write_str("}\n")?;
    }
    Ok(())
}

fn print_function_inner(
    state: &mut PrintState<'_>,
    f: &mut impl Write,
    func: FuncRef,
) -> fmt::Result {
    let module = state.module;
    let data = module.func(func);
    if let Some(stage) = data.stage {
        write!(f, "{stage} ")?;
    }
    if data.must_use {
        f.write_str("@must_use ")?;
    }
    write!(f, "fn {}(", data.name)?;
    for (i, &param) in data.params.iter().enumerate() {
        if i > 0 {
            f.write_str(", ")?;
        }
        let name = state.assign_value_name(param);
        write!(f, "{name}: {}", module.types.display(module.value_type(param)))?;
    }
    writeln!(f, ") -> {} {{", module.types.display(data.return_type))?;
    print_block_body(state, f, data.body, 1)?;
    f.write_str("}\n")
}

// ============================================================================
// Instructions
// ============================================================================

fn print_block_body(
    state: &mut PrintState<'_>,
    f: &mut impl Write,
    block: BlockRef,
    indent: usize,
) -> fmt::Result {
    for inst in state.module.block_insts(block) {
        print_inst(state, f, inst, indent)?;
    }
    Ok(())
}

fn print_inst(
    state: &mut PrintState<'_>,
    f: &mut impl Write,
    inst: InstRef,
    indent: usize,
) -> fmt::Result {
    let module = state.module;
    write_indent(f, indent)?;

    let results = module.results(inst);
    if !results.is_empty() {
        for (i, &r) in results.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            let name = state.assign_value_name(r);
            write!(f, "{name}: {}", module.types.display(module.value_type(r)))?;
        }
        f.write_str(" = ")?;
    }

    match module.kind(inst) {
        InstKind::Call(callee) => write!(f, "call {}", module.func(*callee).name)?,
        kind => write!(f, "{kind}")?,
    }

    let operands = module.operands(inst);
    for (i, slot) in operands.iter().enumerate() {
        f.write_str(if i == 0 { " " } else { ", " })?;
        match slot {
            Some(v) => f.write_str(&state.value_name(*v))?,
            None => f.write_str("undef")?,
        }
    }

    let blocks = module.inst(inst).blocks();
    for (i, &block) in blocks.iter().enumerate() {
        f.write_str(if i == 0 { " " } else { " else " })?;
        let params = module.block(block).params();
        if !params.is_empty() {
            f.write_str("|")?;
            for (j, &p) in params.iter().enumerate() {
                if j > 0 {
                    f.write_str(", ")?;
                }
                let name = state.assign_value_name(p);
                write!(f, "{name}: {}", module.types.display(module.value_type(p)))?;
            }
            f.write_str("| ")?;
        }
        f.write_str("{\n")?;
        print_block_body(state, f, block, indent + 1)?;
        write_indent(f, indent)?;
        f.write_str("}")?;
    }
    f.write_str("\n")
}

fn write_indent(f: &mut impl Write, indent: usize) -> fmt::Result {
    for _ in 0..indent {
        f.write_str("  ")?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::{Builder, InsertPoint};
    use crate::inst::BinaryOp;
    use crate::module::PipelineStage;
    use crate::symbol::Symbol;
    use crate::types::{Access, AddressSpace};

    #[test]
    fn test_print_simple_function() {
        let mut module = Module::new();
        let i32_ty = module.types.i32();
        let f = module.create_function(Symbol::new("add"), &[i32_ty, i32_ty], i32_ty);
        let [x, y] = [module.func(f).params[0], module.func(f).params[1]];
        module.set_name(x, Symbol::new("x"));
        let body = module.func(f).body;

        let mut b = Builder::at_end(&mut module, body);
        let sum = b.binary(BinaryOp::Add, x, y);
        let sum_v = b.value(sum);
        b.ret(Some(sum_v));

        insta::assert_snapshot!(print_function(&module, f), @r"
        fn add(%x: i32, %0: i32) -> i32 {
          %1: i32 = add %x, %0
          ret %1
        }
        ");
    }

    #[test]
    fn test_print_module() {
        let mut module = Module::new();
        let f32_ty = module.types.f32();
        let void = module.types.void();
        let params_ty = module
            .types
            .struct_type(Symbol::new("Params"), &[(Symbol::new("scale"), f32_ty)]);
        let ptr_ty = module.types.ptr(AddressSpace::Uniform, params_ty, Access::Read);
        let root = module.root_block();
        let var = Builder::at_end(&mut module, root).var(ptr_ty, None);
        let params = module.result(var, 0);
        module.set_name(params, Symbol::new("params"));

        let main = module.create_function(Symbol::new("main"), &[], void);
        module.func_mut(main).stage = Some(PipelineStage::Compute);
        let body = module.func(main).body;
        let elem_ptr_ty = module.types.ptr(AddressSpace::Uniform, f32_ty, Access::Read);
        let zero = module.constant_u32(0);
        let cond = module.constant_bool(true);

        let mut b = Builder::at_end(&mut module, body);
        let access = b.access(params, &[zero], elem_ptr_ty);
        let ptr = b.value(access);
        let load = b.load(ptr);
        let loaded = b.value(load);
        let (_, then_block, else_block) = b.if_(cond);
        b.ret(None);
        b.set_insert_point(InsertPoint::Append(then_block));
        b.phony(loaded);
        b.exit_if();
        b.set_insert_point(InsertPoint::Append(else_block));
        b.exit_if();

        insta::assert_snapshot!(print_module(&module), @r"
        struct Params {
          scale: f32 @offset(0)
        }

        %params: ptr<uniform, Params, read> = var

        @compute fn main() -> void {
          %0: ptr<uniform, f32, read> = access %params, 0u
          %1: f32 = load %0
          if true {
            phony %1
            exit_if
          } else {
            exit_if
          }
          ret
        }
        ");
    }

    #[test]
    fn test_print_loop_and_constants() {
        let mut module = Module::new();
        let void = module.types.void();
        let f = module.create_function(Symbol::new("spin"), &[], void);
        let body = module.func(f).body;
        let start = module.constant_u32(0);
        let end = module.constant_u32(4);
        let half = module.constant_f32(0.5);
        let f32_ty = module.types.f32();
        let zero = module.zero(f32_ty);

        let mut b = Builder::at_end(&mut module, body);
        let (_, loop_body) = b.loop_range(start, end);
        b.ret(None);
        b.set_insert_point(InsertPoint::Append(loop_body));
        let mul = b.binary(BinaryOp::Mul, half, zero);
        let v = b.value(mul);
        b.phony(v);
        b.continue_();

        insta::assert_snapshot!(print_function(&module, f), @r"
        fn spin() -> void {
          loop_range 0u, 4u |%0: u32| {
            %1: f32 = mul 0.5f, zero<f32>
            phony %1
            continue
          }
          ret
        }
        ");
    }

    #[test]
    fn test_rauw_reflected_in_print() {
        let mut module = Module::new();
        let i32_ty = module.types.i32();
        let f = module.create_function(Symbol::new("f"), &[i32_ty], i32_ty);
        let p = module.func(f).params[0];
        let body = module.func(f).body;
        let one = module.constant_i32(1);
        let mut b = Builder::at_end(&mut module, body);
        let l = b.let_(p);
        let lv = b.value(l);
        b.ret(Some(lv));

        module.replace_all_uses_with(lv, one);
        let output = print_function(&module, f);
        assert!(output.contains("ret 1i"));
    }
}
