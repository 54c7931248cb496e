//! Reference interpreter over the closed instruction set.
//!
//! Values are logical: a struct or array is a list of its members, no matter
//! which memory layout its type carries. Two layout variants of the same
//! data therefore evaluate to equal [`Value`]s, which is what conversion
//! checks rely on.

use std::collections::HashMap;

use derive_more::{Display, Error};
use smallvec::SmallVec;

use crate::inst::{BinaryOp, BuiltinFn, InstKind};
use crate::module::Module;
use crate::refs::*;
use crate::symbol::Symbol;
use crate::types::{ArrayCount, ConstantValue, TypeData, TypeInterner};

const MAX_CALL_DEPTH: usize = 64;

#[derive(Clone, Debug, PartialEq, Display, Error)]
pub enum EvalError {
    #[display("{value} has no value in the current frame")]
    Unbound { value: ValueRef },
    #[display("type mismatch at {inst}: {reason}")]
    TypeMismatch { inst: InstRef, reason: String },
    #[display("index {index} out of bounds at {inst}")]
    OutOfBounds { inst: InstRef, index: u32 },
    #[display("division by zero at {inst}")]
    DivisionByZero { inst: InstRef },
    #[display("reached unreachable at {inst}")]
    Unreachable { inst: InstRef },
    #[display("`{kind}` at {inst} is not supported by the evaluator")]
    Unsupported { inst: InstRef, kind: String },
    #[display("cannot build a value of type {ty}")]
    UnsupportedType { ty: String },
    #[display("call depth limit exceeded")]
    StackOverflow,
    #[display("wrong number of arguments to {func}: expected {expected}, got {got}")]
    ArgumentCount {
        func: Symbol,
        expected: usize,
        got: usize,
    },
    #[display("{var} is not a module-scope variable")]
    NotAGlobal { var: ValueRef },
    #[display("access path {path:?} leaves the stored value")]
    InvalidPath { path: Vec<u32> },
}

/// A logical runtime value.
#[derive(Clone, Debug, PartialEq)]
pub enum Value {
    Bool(bool),
    I32(i32),
    U32(u32),
    F32(f32),
    /// Vector, matrix, array or struct contents, in member order.
    Composite(Vec<Value>),
    Pointer(Pointer),
}

/// A location in evaluator memory: a variable slot plus an access path.
#[derive(Clone, Debug, PartialEq)]
pub struct Pointer {
    slot: usize,
    path: SmallVec<[u32; 4]>,
}

/// Control-flow outcome of running a block.
enum Flow {
    Normal,
    Return(Option<Value>),
    ExitIf,
    Continue,
}

/// Interpreter state: memory for variables plus module-scope bindings.
pub struct Evaluator<'m> {
    module: &'m Module,
    memory: Vec<Value>,
    globals: HashMap<ValueRef, Value>,
    depth: usize,
}

type Frame = HashMap<ValueRef, Value>;

impl<'m> Evaluator<'m> {
    /// Allocate every module-scope variable, zero-initialized unless it has
    /// an initializer.
    pub fn new(module: &'m Module) -> Result<Self, EvalError> {
        let mut eval = Self {
            module,
            memory: Vec::new(),
            globals: HashMap::new(),
            depth: 0,
        };
        let mut frame = Frame::new();
        for inst in module.block_insts(module.root_block()) {
            eval.exec_inst(inst, &mut frame)?;
        }
        eval.globals = frame;
        Ok(eval)
    }

    /// Contents of the module-scope variable whose pointer is `var`.
    pub fn read_global(&self, var: ValueRef) -> Result<Value, EvalError> {
        match self.globals.get(&var) {
            Some(Value::Pointer(p)) => self.read(p),
            _ => Err(EvalError::NotAGlobal { var }),
        }
    }

    /// Overwrite the module-scope variable whose pointer is `var`.
    pub fn write_global(&mut self, var: ValueRef, value: Value) -> Result<(), EvalError> {
        match self.globals.get(&var).cloned() {
            Some(Value::Pointer(p)) => self.write(&p, value),
            _ => Err(EvalError::NotAGlobal { var }),
        }
    }

    /// Run a function and return its result, if any.
    pub fn call(&mut self, func: FuncRef, args: &[Value]) -> Result<Option<Value>, EvalError> {
        let data = self.module.func(func);
        if data.params.len() != args.len() {
            return Err(EvalError::ArgumentCount {
                func: data.name,
                expected: data.params.len(),
                got: args.len(),
            });
        }
        if self.depth >= MAX_CALL_DEPTH {
            return Err(EvalError::StackOverflow);
        }
        let mut frame: Frame = data.params.iter().copied().zip(args.iter().cloned()).collect();
        self.depth += 1;
        let flow = self.exec_block(data.body, &mut frame);
        self.depth -= 1;
        match flow? {
            Flow::Return(v) => Ok(v),
            _ => Ok(None),
        }
    }

    // ========================================================================
    // Execution
    // ========================================================================

    fn exec_block(&mut self, block: BlockRef, frame: &mut Frame) -> Result<Flow, EvalError> {
        for inst in self.module.block_insts(block) {
            match self.exec_inst(inst, frame)? {
                Flow::Normal => {}
                flow => return Ok(flow),
            }
        }
        Ok(Flow::Normal)
    }

    fn exec_inst(&mut self, inst: InstRef, frame: &mut Frame) -> Result<Flow, EvalError> {
        let module = self.module;
        let data = module.inst(inst);
        let operands: SmallVec<[Value; 4]> = data
            .operands()
            .iter()
            .map(|slot| match slot {
                Some(v) => self.value(*v, frame),
                None => Err(EvalError::TypeMismatch {
                    inst,
                    reason: "empty operand slot".to_owned(),
                }),
            })
            .collect::<Result<_, _>>()?;

        let result = match &data.kind {
            InstKind::Var => {
                let ptr_ty = module.value_type(module.result(inst, 0));
                let init = match operands.first() {
                    Some(v) => v.clone(),
                    None => {
                        let store = module.types.pointee(ptr_ty).ok_or_else(|| {
                            mismatch(inst, "var result is not a pointer")
                        })?;
                        zero_value(&module.types, store)?
                    }
                };
                self.memory.push(init);
                Some(Value::Pointer(Pointer {
                    slot: self.memory.len() - 1,
                    path: SmallVec::new(),
                }))
            }
            InstKind::Let | InstKind::CopyLogical => Some(operands[0].clone()),
            InstKind::Phony => None,
            InstKind::Load => Some(self.read(as_pointer(inst, &operands[0])?)?),
            InstKind::Store => {
                let ptr = as_pointer(inst, &operands[0])?.clone();
                self.write(&ptr, operands[1].clone())?;
                None
            }
            InstKind::Access => {
                let indices = operands[1..]
                    .iter()
                    .map(|v| as_index(inst, v))
                    .collect::<Result<SmallVec<[u32; 4]>, _>>()?;
                Some(match &operands[0] {
                    Value::Pointer(p) => {
                        let mut p = p.clone();
                        p.path.extend(indices);
                        Value::Pointer(p)
                    }
                    object => {
                        let mut current = object;
                        for index in indices {
                            current = member(inst, current, index)?;
                        }
                        current.clone()
                    }
                })
            }
            InstKind::Construct => Some(Value::Composite(operands.to_vec())),
            InstKind::Binary(op) => Some(binary(inst, *op, &operands[0], &operands[1])?),
            InstKind::Call(func) => self.call(*func, &operands)?,
            InstKind::Builtin(BuiltinFn::ArrayLength) => {
                match self.read(as_pointer(inst, &operands[0])?)? {
                    Value::Composite(elems) => Some(Value::U32(elems.len() as u32)),
                    _ => return Err(mismatch(inst, "array_length of a non-array")),
                }
            }
            InstKind::Builtin(BuiltinFn::WorkgroupBarrier) => None,
            InstKind::If => {
                let branch = match operands[0] {
                    Value::Bool(true) => 0,
                    Value::Bool(false) => 1,
                    _ => return Err(mismatch(inst, "if condition is not a bool")),
                };
                let block = data.blocks()[branch];
                match self.exec_block(block, frame)? {
                    Flow::Normal | Flow::ExitIf => None,
                    flow => return Ok(flow),
                }
            }
            InstKind::LoopRange => {
                let (start, end) = (as_index(inst, &operands[0])?, as_index(inst, &operands[1])?);
                let body = data.blocks()[0];
                let induction = module.block(body).params()[0];
                for i in start..end {
                    frame.insert(induction, Value::U32(i));
                    match self.exec_block(body, frame)? {
                        Flow::Normal | Flow::Continue => {}
                        Flow::Return(v) => return Ok(Flow::Return(v)),
                        Flow::ExitIf => return Err(mismatch(inst, "exit_if outside of an if")),
                    }
                }
                None
            }
            InstKind::Return => return Ok(Flow::Return(operands.first().cloned())),
            InstKind::ExitIf => return Ok(Flow::ExitIf),
            InstKind::Continue => return Ok(Flow::Continue),
            InstKind::Unreachable => return Err(EvalError::Unreachable { inst }),
            kind @ InstKind::Intrinsic(_) => {
                return Err(EvalError::Unsupported {
                    inst,
                    kind: kind.to_string(),
                });
            }
        };

        if let (Some(value), Some(r)) = (result, module.single_result(inst)) {
            frame.insert(r, value);
        }
        Ok(Flow::Normal)
    }

    fn value(&self, v: ValueRef, frame: &Frame) -> Result<Value, EvalError> {
        if let ValueDef::Constant(c) = self.module.value_def(v) {
            return constant_value(&self.module.types, self.module.value_type(v), c);
        }
        frame
            .get(&v)
            .or_else(|| self.globals.get(&v))
            .cloned()
            .ok_or(EvalError::Unbound { value: v })
    }

    // ========================================================================
    // Memory
    // ========================================================================

    fn read(&self, p: &Pointer) -> Result<Value, EvalError> {
        let mut current = &self.memory[p.slot];
        for &index in &p.path {
            current = match current {
                Value::Composite(members) => members.get(index as usize),
                _ => None,
            }
            .ok_or_else(|| invalid_path(p))?;
        }
        Ok(current.clone())
    }

    fn write(&mut self, p: &Pointer, value: Value) -> Result<(), EvalError> {
        let mut current = &mut self.memory[p.slot];
        for &index in &p.path {
            current = match current {
                Value::Composite(members) => members.get_mut(index as usize),
                _ => None,
            }
            .ok_or_else(|| invalid_path(p))?;
        }
        *current = value;
        Ok(())
    }
}

fn invalid_path(p: &Pointer) -> EvalError {
    EvalError::InvalidPath {
        path: p.path.to_vec(),
    }
}

fn mismatch(inst: InstRef, reason: &str) -> EvalError {
    EvalError::TypeMismatch {
        inst,
        reason: reason.to_owned(),
    }
}

fn as_pointer(inst: InstRef, v: &Value) -> Result<&Pointer, EvalError> {
    match v {
        Value::Pointer(p) => Ok(p),
        _ => Err(mismatch(inst, "expected a pointer")),
    }
}

fn as_index(inst: InstRef, v: &Value) -> Result<u32, EvalError> {
    match *v {
        Value::U32(i) => Ok(i),
        Value::I32(i) if i >= 0 => Ok(i as u32),
        _ => Err(mismatch(inst, "expected a non-negative integer index")),
    }
}

fn member(inst: InstRef, v: &Value, index: u32) -> Result<&Value, EvalError> {
    match v {
        Value::Composite(members) => members
            .get(index as usize)
            .ok_or(EvalError::OutOfBounds { inst, index }),
        _ => Err(mismatch(inst, "indexing into a scalar")),
    }
}

fn binary(inst: InstRef, op: BinaryOp, lhs: &Value, rhs: &Value) -> Result<Value, EvalError> {
    use Value::*;
    Ok(match (op, lhs, rhs) {
        (_, Composite(a), Composite(b)) if a.len() == b.len() => Composite(
            a.iter()
                .zip(b)
                .map(|(x, y)| binary(inst, op, x, y))
                .collect::<Result<_, _>>()?,
        ),
        (BinaryOp::Add, I32(a), I32(b)) => I32(a.wrapping_add(*b)),
        (BinaryOp::Sub, I32(a), I32(b)) => I32(a.wrapping_sub(*b)),
        (BinaryOp::Mul, I32(a), I32(b)) => I32(a.wrapping_mul(*b)),
        (BinaryOp::Div, I32(_), I32(0)) | (BinaryOp::Div, U32(_), U32(0)) => {
            return Err(EvalError::DivisionByZero { inst });
        }
        (BinaryOp::Div, I32(a), I32(b)) => I32(a.wrapping_div(*b)),
        (BinaryOp::Add, U32(a), U32(b)) => U32(a.wrapping_add(*b)),
        (BinaryOp::Sub, U32(a), U32(b)) => U32(a.wrapping_sub(*b)),
        (BinaryOp::Mul, U32(a), U32(b)) => U32(a.wrapping_mul(*b)),
        (BinaryOp::Div, U32(a), U32(b)) => U32(a / b),
        (BinaryOp::Add, F32(a), F32(b)) => F32(a + b),
        (BinaryOp::Sub, F32(a), F32(b)) => F32(a - b),
        (BinaryOp::Mul, F32(a), F32(b)) => F32(a * b),
        (BinaryOp::Div, F32(a), F32(b)) => F32(a / b),
        (BinaryOp::Equal, a, b) => Bool(a == b),
        (BinaryOp::LessThan, I32(a), I32(b)) => Bool(a < b),
        (BinaryOp::LessThan, U32(a), U32(b)) => Bool(a < b),
        (BinaryOp::LessThan, F32(a), F32(b)) => Bool(a < b),
        _ => return Err(mismatch(inst, "unsupported operand types")),
    })
}

fn constant_value(types: &TypeInterner, ty: TypeRef, c: &ConstantValue) -> Result<Value, EvalError> {
    Ok(match *c {
        ConstantValue::Bool(b) => Value::Bool(b),
        ConstantValue::I32(v) => Value::I32(v),
        ConstantValue::U32(v) => Value::U32(v),
        ConstantValue::F32(bits) => Value::F32(f32::from_bits(bits)),
        ConstantValue::Zero => zero_value(types, ty)?,
    })
}

/// Zero value of `ty`. Runtime-sized arrays start out empty.
pub fn zero_value(types: &TypeInterner, ty: TypeRef) -> Result<Value, EvalError> {
    let composite = |elem: TypeRef, n: u32| -> Result<Value, EvalError> {
        let zero = zero_value(types, elem)?;
        Ok(Value::Composite(vec![zero; n as usize]))
    };
    match types.get(ty) {
        TypeData::Bool => Ok(Value::Bool(false)),
        TypeData::I32 => Ok(Value::I32(0)),
        TypeData::U32 => Ok(Value::U32(0)),
        TypeData::F32 | TypeData::F16 => Ok(Value::F32(0.0)),
        TypeData::Vector { elem, width } => composite(*elem, u32::from(*width)),
        TypeData::Matrix { column, columns } => composite(*column, u32::from(*columns)),
        TypeData::Array(a) => match a.count {
            ArrayCount::Fixed(n) => composite(a.elem, n),
            ArrayCount::RuntimeSized => Ok(Value::Composite(Vec::new())),
        },
        TypeData::Struct(s) => s
            .members
            .iter()
            .map(|m| zero_value(types, m.ty))
            .collect::<Result<_, _>>()
            .map(Value::Composite),
        TypeData::Void | TypeData::Pointer { .. } | TypeData::Sampler | TypeData::Texture { .. } => {
            Err(EvalError::UnsupportedType {
                ty: types.display(ty).to_string(),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::{Builder, InsertPoint};
    use crate::types::{Access, AddressSpace};

    #[test]
    fn sum_in_a_loop() {
        // fn sum(n: u32) -> u32 { var acc = 0; for i in 0..n { acc = acc + i; } return acc; }
        let mut module = Module::new();
        let u32_ty = module.types.u32();
        let ptr_ty = module.types.ptr(AddressSpace::Function, u32_ty, Access::ReadWrite);
        let f = module.create_function(Symbol::new("sum"), &[u32_ty], u32_ty);
        let n = module.func(f).params[0];
        let body = module.func(f).body;
        let zero = module.constant_u32(0);

        let mut b = Builder::at_end(&mut module, body);
        let acc = b.var(ptr_ty, Some(zero));
        let acc = b.value(acc);
        let (_, loop_body) = b.loop_range(zero, n);
        let result = b.load(acc);
        let result = b.value(result);
        b.ret(Some(result));

        b.set_insert_point(InsertPoint::Append(loop_body));
        let i = b.module().block(loop_body).params()[0];
        let cur = b.load(acc);
        let cur = b.value(cur);
        let next = b.binary(BinaryOp::Add, cur, i);
        let next = b.value(next);
        b.store(acc, next);
        b.continue_();

        let mut eval = Evaluator::new(&module).unwrap();
        assert_eq!(eval.call(f, &[Value::U32(5)]).unwrap(), Some(Value::U32(10)));
    }

    #[test]
    fn globals_and_access_paths() {
        let mut module = Module::new();
        let f32_ty = module.types.f32();
        let arr = module.types.array(f32_ty, 3);
        let s = module.types.struct_type(
            Symbol::new("Data"),
            &[(Symbol::new("scale"), f32_ty), (Symbol::new("values"), arr)],
        );
        let ptr_ty = module.types.ptr(AddressSpace::Storage, s, Access::ReadWrite);
        let elem_ptr = module.types.ptr(AddressSpace::Storage, f32_ty, Access::ReadWrite);
        let root = module.root_block();
        let var = Builder::at_end(&mut module, root).var(ptr_ty, None);
        let global = module.result(var, 0);

        let void = module.types.void();
        let f = module.create_function(Symbol::new("write"), &[], void);
        let body = module.func(f).body;
        let one = module.constant_u32(1);
        let two = module.constant_u32(2);
        let value = module.constant_f32(4.0);
        let mut b = Builder::at_end(&mut module, body);
        let p = b.access(global, &[one, two], elem_ptr);
        let p = b.value(p);
        b.store(p, value);
        b.ret(None);

        let mut eval = Evaluator::new(&module).unwrap();
        assert_eq!(
            eval.read_global(global).unwrap(),
            Value::Composite(vec![
                Value::F32(0.0),
                Value::Composite(vec![Value::F32(0.0); 3])
            ])
        );
        eval.call(f, &[]).unwrap();
        assert_eq!(
            eval.read_global(global).unwrap(),
            Value::Composite(vec![
                Value::F32(0.0),
                Value::Composite(vec![Value::F32(0.0), Value::F32(0.0), Value::F32(4.0)])
            ])
        );
    }

    #[test]
    fn division_by_zero_is_reported() {
        let mut module = Module::new();
        let i32_ty = module.types.i32();
        let f = module.create_function(Symbol::new("div"), &[i32_ty], i32_ty);
        let x = module.func(f).params[0];
        let body = module.func(f).body;
        let zero = module.constant_i32(0);
        let mut b = Builder::at_end(&mut module, body);
        let d = b.binary(BinaryOp::Div, x, zero);
        let dv = b.value(d);
        b.ret(Some(dv));

        let mut eval = Evaluator::new(&module).unwrap();
        assert_eq!(
            eval.call(f, &[Value::I32(1)]),
            Err(EvalError::DivisionByZero { inst: d })
        );
        assert!(matches!(
            eval.call(f, &[]),
            Err(EvalError::ArgumentCount { expected: 1, got: 0, .. })
        ));
    }
}
