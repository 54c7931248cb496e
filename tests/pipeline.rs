//! End-to-end runs of the pass pipeline.

mod common;

use common::{compute_entry_point, global, init_tracing};
use kiln::{CompileOptions, CompileReport, Module, compile};
use kiln_ir::eval::{Evaluator, Value};
use kiln_ir::printer::print_module;
use kiln_ir::{AddressSpace, BinaryOp, BuiltinFn, Builder, Capability, FuncRef, Symbol, ValueRef};
use kiln_passes::{ForkResult, TargetVersion, ValueToLetResult};

/// A compute shader that copies uniform parameters into workgroup memory and
/// scales one of them by the result of a call.
fn params_shader() -> Module {
    let mut module = Module::new();
    let f32_ty = module.types.f32();
    let params_ty = module.types.struct_type(
        Symbol::new("Params"),
        &[(Symbol::new("scale"), f32_ty), (Symbol::new("bias"), f32_ty)],
    );
    let params = global(&mut module, "params", AddressSpace::Uniform, params_ty);
    let shared = global(&mut module, "shared", AddressSpace::Workgroup, params_ty);

    let scale_factor = module.create_function(Symbol::new("scale_factor"), &[], f32_ty);
    let body = module.func(scale_factor).body;
    let two = module.constant_f32(2.0);
    Builder::at_end(&mut module, body).ret(Some(two));

    let (_, body) = compute_entry_point(&mut module);
    let uniform_f32 = module.types.ptr(AddressSpace::Uniform, f32_ty, kiln_ir::Access::Read);
    let shared_f32 = module
        .types
        .ptr(AddressSpace::Workgroup, f32_ty, kiln_ir::Access::ReadWrite);
    let zero = module.constant_u32(0);
    let one = module.constant_u32(1);
    let mut b = Builder::at_end(&mut module, body);
    let all = b.load(params);
    let all = b.value(all);
    b.store(shared, all);
    let scale_ptr = b.access(params, &[zero], uniform_f32);
    let scale_ptr = b.value(scale_ptr);
    let scale = b.load(scale_ptr);
    let scale = b.value(scale);
    let factor = b.call(scale_factor, &[]);
    let factor = b.value(factor);
    let scaled = b.binary(BinaryOp::Mul, scale, factor);
    let scaled = b.value(scaled);
    let bias_ptr = b.access(shared, &[one], shared_f32);
    let bias_ptr = b.value(bias_ptr);
    b.store(bias_ptr, scaled);
    b.builtin(BuiltinFn::WorkgroupBarrier, &[]);
    b.ret(None);
    module
}

#[test]
fn full_pipeline_at_1_4() {
    init_tracing();
    let mut module = params_shader();

    let report = compile(&mut module, &CompileOptions::default()).unwrap();

    assert_eq!(
        report,
        CompileReport {
            value_to_let: ValueToLetResult {
                lets_created: 2,
                phonies_created: 0,
                inlined: 1,
            },
            fork_explicit_layout_types: ForkResult {
                types_forked: 1,
                structs_marked: 0,
                vars_retyped: 1,
                conversions_inserted: 1,
                helpers_created: 0,
            },
        }
    );
    insta::assert_snapshot!(print_module(&module), @r"
    struct Params {
      scale: f32 @offset(0)
      bias: f32 @offset(4)
    }
    struct Params_explicit_layout @explicit_layout {
      scale: f32 @offset(0)
      bias: f32 @offset(4)
    }

    %params: ptr<uniform, Params_explicit_layout, read> = var
    %shared: ptr<workgroup, Params, read_write> = var

    fn scale_factor() -> f32 {
      ret 2.0f
    }

    @compute fn main() -> void {
      %0: Params_explicit_layout = load %params
      %1: Params = copy_logical %0
      store %shared, %1
      %2: ptr<uniform, f32, read> = access %params, 0u
      %3: f32 = load %2
      %4: f32 = let %3
      %5: f32 = call scale_factor
      %6: f32 = let %5
      %7: f32 = mul %4, %6
      %8: ptr<workgroup, f32, read_write> = access %shared, 1u
      store %8, %7
      workgroup_barrier
      ret
    }
    ");
}

#[test]
fn older_targets_mark_shared_structs_in_place() {
    init_tracing();
    let mut module = params_shader();
    let options = CompileOptions {
        target: TargetVersion::V1_3,
        ..CompileOptions::default()
    };

    let report = compile(&mut module, &options).unwrap();

    let fork = report.fork_explicit_layout_types;
    assert_eq!(fork.types_forked, 0);
    assert_eq!(fork.structs_marked, 1);
    assert_eq!(fork.conversions_inserted, 0);
    let params = module.types.struct_named(Symbol::new("Params")).unwrap();
    assert!(module.types.has_explicit_layout(params));
}

#[test]
fn compiling_twice_is_stable() {
    init_tracing();
    let mut module = params_shader();
    let options = CompileOptions::default();
    compile(&mut module, &options).unwrap();
    let first = print_module(&module);

    let report = compile(&mut module, &options).unwrap();

    // The conversion inserted by the first run is still inlined into its
    // consumer, but nothing new gets bound or forked.
    assert_eq!(report.value_to_let.lets_created, 0);
    assert_eq!(report.value_to_let.phonies_created, 0);
    assert_eq!(report.fork_explicit_layout_types, ForkResult::default());
    assert_eq!(print_module(&module), first);
}

/// `fn sum() -> f32` reading `buf.b[2]` through a private copy of the buffer
/// and `buf.b[0]` directly.
fn buffer_sum() -> (Module, ValueRef, FuncRef) {
    let mut module = Module::new();
    let i32_ty = module.types.i32();
    let f32_ty = module.types.f32();
    let arr = module.types.array(f32_ty, 3);
    let s = module.types.struct_type(
        Symbol::new("S"),
        &[(Symbol::new("a"), i32_ty), (Symbol::new("b"), arr)],
    );
    let buf = global(&mut module, "buf", AddressSpace::Storage, s);

    let sum = module.create_function(Symbol::new("sum"), &[], f32_ty);
    let body = module.func(sum).body;
    let local_ty = module
        .types
        .ptr(AddressSpace::Function, s, kiln_ir::Access::ReadWrite);
    let local_f32 = module
        .types
        .ptr(AddressSpace::Function, f32_ty, kiln_ir::Access::ReadWrite);
    let storage_f32 = module
        .types
        .ptr(AddressSpace::Storage, f32_ty, kiln_ir::Access::ReadWrite);
    let [zero, one, two] = [0, 1, 2].map(|i| module.constant_u32(i));

    let mut b = Builder::at_end(&mut module, body);
    let local = b.var(local_ty, None);
    let local = b.value(local);
    let copy = b.load(buf);
    let copy = b.value(copy);
    b.store(local, copy);
    let last = b.access(local, &[one, two], local_f32);
    let last = b.value(last);
    let x = b.load(last);
    let x = b.value(x);
    let first = b.access(buf, &[one, zero], storage_f32);
    let first = b.value(first);
    let y = b.load(first);
    let y = b.value(y);
    let total = b.binary(BinaryOp::Add, x, y);
    let total = b.value(total);
    b.ret(Some(total));
    (module, buf, sum)
}

fn run_sum(module: &Module, buf: ValueRef, sum: FuncRef) -> Option<Value> {
    let contents = Value::Composite(vec![
        Value::I32(7),
        Value::Composite(vec![Value::F32(1.0), Value::F32(2.5), Value::F32(-4.0)]),
    ]);
    let mut eval = Evaluator::new(module).unwrap();
    eval.write_global(buf, contents).unwrap();
    eval.call(sum, &[]).unwrap()
}

#[test]
fn pipeline_preserves_behavior() {
    init_tracing();
    let (reference, buf, sum) = buffer_sum();
    let expected = run_sum(&reference, buf, sum);
    assert_eq!(expected, Some(Value::F32(-3.0)));

    for target in [TargetVersion::V1_3, TargetVersion::V1_4] {
        let (mut module, buf, sum) = buffer_sum();
        let options = CompileOptions {
            target,
            ..CompileOptions::default()
        };
        let report = compile(&mut module, &options).unwrap();
        assert!(report.fork_explicit_layout_types.conversions_inserted > 0);
        assert_eq!(run_sum(&module, buf, sum), expected, "target {target}");
    }
}

#[test]
fn options_from_json() {
    let options: CompileOptions = serde_json::from_str(
        r#"{
            "target": "1.3",
            "value_to_let": { "discard_must_use_results": false },
            "capabilities": ["allow_multiple_entry_points"]
        }"#,
    )
    .unwrap();

    assert_eq!(options.target, TargetVersion::V1_3);
    assert!(!options.value_to_let.discard_must_use_results);
    assert!(options.validate);
    assert!(CompileOptions::default().value_to_let.discard_must_use_results);
    let partial: CompileOptions = serde_json::from_str(r#"{ "value_to_let": {} }"#).unwrap();
    assert!(partial.value_to_let.discard_must_use_results);
    assert!(options.capabilities.contains(&Capability::AllowMultipleEntryPoints));

    let err = serde_json::from_str::<CompileOptions>(r#"{ "target": "latest" }"#).unwrap_err();
    assert!(
        err.to_string().contains("invalid target version `latest`"),
        "{err}"
    );
}

#[test]
fn multiple_entry_points_need_a_capability() {
    init_tracing();
    let mut module = params_shader();
    let void = module.types.void();
    let other = module.create_function(Symbol::new("other"), &[], void);
    module.func_mut(other).stage = Some(kiln_ir::PipelineStage::Fragment);
    let body = module.func(other).body;
    Builder::at_end(&mut module, body).ret(None);

    let err = compile(&mut module, &CompileOptions::default()).unwrap_err();
    insta::assert_snapshot!(err.to_string(), @r"
    IR validation failed before `value_to_let`:
    1 validation error(s) found:
      - 2 entry points found but multiple entry points are not allowed
    ");

    let options = CompileOptions {
        capabilities: [Capability::AllowMultipleEntryPoints].into(),
        ..CompileOptions::default()
    };
    compile(&mut module, &options).unwrap();
}
