//! The stack machine.
//!
//! One [`Frame`] executes one descriptor: an operand stack, a locals array
//! initialised from the declared local types, and the argument slots
//! (receiver first for instance methods). Control moves by offset, either
//! to the instruction's `next_offset` or to a branch target.
//!
//! Calls first consult the catalogue snapshot held by the [`ExecContext`]
//! so a patched callee is interpreted in turn; everything else goes to the
//! symbol table.

use std::fmt;
use std::sync::Arc;

use ilpatch_file::{
    FieldRef, Instruction, MethodDescriptor, MethodRef, Operand, Signature, TypeName,
};
use ilpatch_isa::Opcode as Op;

use crate::catalogue::Catalogue;
use crate::engine::Engine;
use crate::error::{Error, Result};
use crate::ops::{self, BinaryOp, Conv};
use crate::resolver::{BoundMethod, FieldHandle, GenericContext};
use crate::symbols::MethodDef;
use crate::value::{Array, Callable, FromValue, Object, Value};

/// Where a resolved method's body lives.
#[derive(Clone)]
pub enum Target {
    Patched(Arc<MethodDescriptor>),
    Native(Arc<MethodDef>),
}

/// A method bound at a call site and ready to invoke.
#[derive(Clone)]
pub struct Method {
    /// Closed signature.
    pub signature: Signature,
    /// Bindings for the method's own body.
    pub context: GenericContext,
    pub is_static: bool,
    pub returns_void: bool,
    pub target: Target,
}

impl Method {
    pub fn is_patched(&self) -> bool {
        matches!(self.target, Target::Patched(_))
    }

    pub fn param_count(&self) -> usize {
        self.signature.parameters.len()
    }
}

impl fmt::Debug for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Method")
            .field("signature", &self.signature.to_string())
            .field("is_static", &self.is_static)
            .field("patched", &self.is_patched())
            .finish()
    }
}

/// The state shared by every frame of one top-level invocation: the engine
/// and the catalogue snapshot taken when the invocation began.
pub struct ExecContext<'e> {
    engine: &'e Engine,
    catalogue: Arc<Catalogue>,
}

impl<'e> ExecContext<'e> {
    pub fn new(engine: &'e Engine) -> Self {
        Self {
            engine,
            catalogue: engine.catalogue(),
        }
    }

    pub fn engine(&self) -> &'e Engine {
        self.engine
    }

    pub fn catalogue(&self) -> &Catalogue {
        &self.catalogue
    }

    /// Pick the implementation for a bound method: a catalogued descriptor
    /// under the closed or the open signature, else a host method.
    pub fn bind(&self, bound: BoundMethod) -> Result<Method> {
        let patched = bound
            .keys()
            .iter()
            .find_map(|key| self.catalogue.get(key).cloned());
        if let Some(descriptor) = patched {
            return Ok(Method {
                is_static: descriptor.is_static,
                returns_void: descriptor.returns_void(),
                signature: bound.signature,
                context: bound.context,
                target: Target::Patched(descriptor),
            });
        }
        let def = self.engine.resolver().resolve_native(&bound)?;
        Ok(Method {
            is_static: def.is_static(),
            returns_void: def.returns_void(),
            signature: bound.signature,
            context: bound.context,
            target: Target::Native(def),
        })
    }

    pub fn call(&self, method: &Method, receiver: Option<Value>, args: Vec<Value>) -> Result<Value> {
        match &method.target {
            Target::Patched(descriptor) => {
                let mut slots = Vec::with_capacity(args.len() + 1);
                if !method.is_static {
                    slots.push(receiver.unwrap_or_default());
                }
                slots.extend(args);
                self.run(descriptor, method.context.clone(), slots)
            }
            Target::Native(def) => {
                let mut call = NativeCall {
                    cx: self,
                    method,
                    this: receiver.unwrap_or_default(),
                    args,
                };
                def.call(&mut call)
            }
        }
    }

    pub fn call_callable(&self, callable: &Callable, args: Vec<Value>) -> Result<Value> {
        self.call(&callable.method, callable.receiver.clone(), args)
    }

    /// Interpret `descriptor`. `args` holds every argument slot, receiver
    /// included.
    pub fn run(
        &self,
        descriptor: &MethodDescriptor,
        context: GenericContext,
        args: Vec<Value>,
    ) -> Result<Value> {
        log::debug!("interpreting {} ({} args)", descriptor.name, args.len());
        Frame::new(self, descriptor, context, args)?.run()
    }
}

/// Arguments and services handed to a host method.
pub struct NativeCall<'a> {
    cx: &'a ExecContext<'a>,
    method: &'a Method,
    /// The receiver; [`Value::Null`] for static methods and constructors.
    pub this: Value,
    pub args: Vec<Value>,
}

impl<'a> NativeCall<'a> {
    pub fn engine(&self) -> &'a Engine {
        self.cx.engine()
    }

    /// Closed signature being called.
    pub fn signature(&self) -> &Signature {
        &self.method.signature
    }

    pub fn generic_context(&self) -> &GenericContext {
        &self.method.context
    }

    pub fn arg(&self, index: usize) -> Result<&Value> {
        self.args.get(index).ok_or_else(|| {
            Error::Native(format!(
                "{}: missing argument {index}",
                self.method.signature
            ))
        })
    }

    pub fn arg_as<T: FromValue>(&self, index: usize) -> Result<T> {
        T::from_value(self.arg(index)?.clone())
    }

    pub fn this_as<T: FromValue>(&self) -> Result<T> {
        T::from_value(self.this.clone())
    }

    /// Call any method by closed signature, patched or not.
    pub fn invoke(
        &self,
        signature: &Signature,
        receiver: Option<Value>,
        args: Vec<Value>,
    ) -> Result<Value> {
        let method = self.cx.bind(BoundMethod::from_signature(signature, None))?;
        self.cx.call(&method, receiver, args)
    }

    pub fn invoke_callable(&self, callable: &Callable, args: Vec<Value>) -> Result<Value> {
        self.cx.call_callable(callable, args)
    }
}

enum Flow {
    Next,
    Jump(u32),
    Return(Value),
}

struct Frame<'a, 'e> {
    cx: &'a ExecContext<'e>,
    method: &'a MethodDescriptor,
    context: GenericContext,
    args: Vec<Value>,
    locals: Vec<Value>,
    stack: Vec<Value>,
    offset: u32,
    /// A delegate construction must also drop the target slot left under
    /// the function pointer (static `ldftn`, `ldvirtftn`).
    pending_target: bool,
}

impl<'a, 'e> Frame<'a, 'e> {
    fn new(
        cx: &'a ExecContext<'e>,
        method: &'a MethodDescriptor,
        context: GenericContext,
        args: Vec<Value>,
    ) -> Result<Self> {
        let entry = method.body.entry().unwrap_or(0);
        if args.len() != method.arg_count() {
            return Err(Error::MalformedDescriptor {
                method: method.name.to_string(),
                offset: entry,
                reason: format!("expected {} arguments, got {}", method.arg_count(), args.len()),
            });
        }
        let resolver = cx.engine().resolver();
        let locals = method
            .body
            .variables
            .iter()
            .map(|ty| resolver.default_value(&context.close(ty)?))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self {
            cx,
            method,
            context,
            args,
            locals,
            stack: Vec::with_capacity(method.body.max_stack_size as usize),
            offset: entry,
            pending_target: false,
        })
    }

    fn run(&mut self) -> Result<Value> {
        let method = self.method;
        let body = &method.body;
        let mut offset = body
            .entry()
            .ok_or_else(|| self.malformed("method body is empty"))?;
        loop {
            self.offset = offset;
            let insn = body
                .get(offset)
                .ok_or_else(|| self.malformed("no instruction at this offset"))?;
            log::trace!("{} IL_{offset:04x}: {insn}", method.name);
            offset = match self.step(insn)? {
                Flow::Next => {
                    let next = insn
                        .next_offset
                        .ok_or_else(|| self.malformed("falls off the end of the method"))?;
                    self.checked(next, "next offset")?
                }
                Flow::Jump(target) => self.checked(target, "branch target")?,
                Flow::Return(value) => return Ok(value),
            };
        }
    }

    fn checked(&self, target: u32, what: &str) -> Result<u32> {
        if self.method.body.instructions.contains_key(&target) {
            Ok(target)
        } else {
            Err(self.malformed(format!("{what} IL_{target:04x} is not an instruction")))
        }
    }

    fn malformed(&self, reason: impl Into<String>) -> Error {
        Error::MalformedDescriptor {
            method: self.method.name.to_string(),
            offset: self.offset,
            reason: reason.into(),
        }
    }

    fn push(&mut self, value: Value) -> Flow {
        self.stack.push(value);
        Flow::Next
    }

    fn pop(&mut self) -> Result<Value> {
        self.stack.pop().ok_or_else(|| Error::StackUnderflow {
            method: self.method.name.to_string(),
            offset: self.offset,
        })
    }

    /// Pop `count` values, returned in push order.
    fn pop_n(&mut self, count: usize) -> Result<Vec<Value>> {
        let at = self
            .stack
            .len()
            .checked_sub(count)
            .ok_or_else(|| Error::StackUnderflow {
                method: self.method.name.to_string(),
                offset: self.offset,
            })?;
        Ok(self.stack.split_off(at))
    }

    fn pop2(&mut self) -> Result<(Value, Value)> {
        let right = self.pop()?;
        let left = self.pop()?;
        Ok((left, right))
    }

    fn step(&mut self, insn: &Instruction) -> Result<Flow> {
        Ok(match insn.opcode {
            Op::Nop
            | Op::Break
            | Op::Volatile
            | Op::Tail
            | Op::Unaligned
            | Op::Constrained
            | Op::Readonly
            | Op::No => Flow::Next,

            Op::Ldarg0 => self.load_arg(0)?,
            Op::Ldarg1 => self.load_arg(1)?,
            Op::Ldarg2 => self.load_arg(2)?,
            Op::Ldarg3 => self.load_arg(3)?,
            // no managed pointers: address loads read the value
            Op::LdargS | Op::Ldarg | Op::LdargaS | Op::Ldarga => {
                let slot = self.slot(insn)?;
                self.load_arg(slot)?
            }
            Op::StargS | Op::Starg => {
                let slot = self.slot(insn)?;
                let value = self.pop()?;
                *self.arg_slot(slot)? = value;
                Flow::Next
            }
            Op::Ldloc0 => self.load_local(0)?,
            Op::Ldloc1 => self.load_local(1)?,
            Op::Ldloc2 => self.load_local(2)?,
            Op::Ldloc3 => self.load_local(3)?,
            Op::LdlocS | Op::Ldloc | Op::LdlocaS | Op::Ldloca => {
                let slot = self.slot(insn)?;
                self.load_local(slot)?
            }
            Op::Stloc0 => self.store_local(0)?,
            Op::Stloc1 => self.store_local(1)?,
            Op::Stloc2 => self.store_local(2)?,
            Op::Stloc3 => self.store_local(3)?,
            Op::StlocS | Op::Stloc => {
                let slot = self.slot(insn)?;
                self.store_local(slot)?
            }

            Op::Ldnull => self.push(Value::Null),
            Op::LdcI4M1 => self.push(Value::I32(-1)),
            Op::LdcI40 => self.push(Value::I32(0)),
            Op::LdcI41 => self.push(Value::I32(1)),
            Op::LdcI42 => self.push(Value::I32(2)),
            Op::LdcI43 => self.push(Value::I32(3)),
            Op::LdcI44 => self.push(Value::I32(4)),
            Op::LdcI45 => self.push(Value::I32(5)),
            Op::LdcI46 => self.push(Value::I32(6)),
            Op::LdcI47 => self.push(Value::I32(7)),
            Op::LdcI48 => self.push(Value::I32(8)),
            Op::LdcI4S | Op::LdcI4 => {
                let n = self.int(insn)?;
                let n = i32::try_from(n)
                    .map_err(|_| self.malformed(format!("{n} does not fit in 32 bits")))?;
                self.push(Value::I32(n))
            }
            Op::LdcI8 => {
                let n = self.int(insn)?;
                self.push(Value::I64(n))
            }
            Op::LdcR4 => {
                let x = self.float(insn)?;
                self.push(Value::F32(x as f32))
            }
            Op::LdcR8 => {
                let x = self.float(insn)?;
                self.push(Value::F64(x))
            }
            Op::Ldstr => match &insn.operand {
                Operand::String(s) => self.push(Value::str(s)),
                other => return Err(self.bad_operand(insn, other)),
            },

            Op::Dup => {
                let top = self.pop()?;
                self.stack.push(top.clone());
                self.push(top)
            }
            Op::Pop => {
                self.pop()?;
                Flow::Next
            }

            Op::Call | Op::Callvirt => self.call(insn)?,
            Op::Newobj => self.new_object(insn)?,
            Op::Ldftn => self.load_function(insn, false)?,
            Op::Ldvirtftn => self.load_function(insn, true)?,
            Op::Ret => {
                let value = if self.method.returns_void() {
                    Value::Null
                } else {
                    self.pop()?
                };
                Flow::Return(value)
            }

            Op::Br | Op::BrS | Op::Leave | Op::LeaveS => Flow::Jump(self.target(insn)?),
            Op::Brfalse | Op::BrfalseS => {
                let value = self.pop()?;
                if value.is_float() || matches!(value, Value::Str(_)) {
                    return Err(Error::TypeMismatch {
                        op: "brfalse",
                        left: value.type_name(),
                        right: "System.Boolean".into(),
                    });
                }
                self.branch(insn, ops::is_falsy(&value))?
            }
            Op::Brtrue | Op::BrtrueS => {
                let value = self.pop()?;
                self.branch(insn, !ops::is_falsy(&value))?
            }
            Op::Beq | Op::BeqS => {
                let (a, b) = self.pop2()?;
                self.branch(insn, same(&a, &b)?)?
            }
            Op::BneUn | Op::BneUnS => {
                let (a, b) = self.pop2()?;
                self.branch(insn, !same(&a, &b)?)?
            }
            Op::Bge | Op::BgeS => self.compare_branch(insn, ">=", |o| o.is_some_and(|o| o.is_ge()))?,
            Op::Bgt | Op::BgtS => self.compare_branch(insn, ">", |o| o.is_some_and(|o| o.is_gt()))?,
            Op::Ble | Op::BleS => self.compare_branch(insn, "<=", |o| o.is_some_and(|o| o.is_le()))?,
            Op::Blt | Op::BltS => self.compare_branch(insn, "<", |o| o.is_some_and(|o| o.is_lt()))?,
            // unordered operands take the branch
            Op::BgeUn | Op::BgeUnS => self.compare_branch(insn, ">=", |o| !o.is_some_and(|o| o.is_lt()))?,
            Op::BgtUn | Op::BgtUnS => self.compare_branch(insn, ">", |o| !o.is_some_and(|o| o.is_le()))?,
            Op::BleUn | Op::BleUnS => self.compare_branch(insn, "<=", |o| !o.is_some_and(|o| o.is_gt()))?,
            Op::BltUn | Op::BltUnS => self.compare_branch(insn, "<", |o| !o.is_some_and(|o| o.is_ge()))?,
            Op::Switch => {
                let index = self.pop()?;
                let Operand::Targets(targets) = &insn.operand else {
                    return Err(self.bad_operand(insn, &insn.operand));
                };
                let Some(index) = index.as_i64().filter(|_| index.is_integer()) else {
                    return Err(Error::TypeMismatch {
                        op: "switch",
                        left: index.type_name(),
                        right: "System.Int32".into(),
                    });
                };
                match usize::try_from(index).ok().and_then(|i| targets.get(i)) {
                    Some(&target) => Flow::Jump(target),
                    None => Flow::Next,
                }
            }

            Op::Ceq => {
                let (a, b) = self.pop2()?;
                self.push(Value::I32(same(&a, &b)?.into()))
            }
            Op::Cgt => self.compare_push(">", |o| o.is_some_and(|o| o.is_gt()))?,
            Op::Clt => self.compare_push("<", |o| o.is_some_and(|o| o.is_lt()))?,
            Op::CgtUn => {
                let (a, b) = self.pop2()?;
                // `x != null` compiles to `ldnull; cgt.un`
                let result = match null_test(&a, &b) {
                    Some(equal) => !equal,
                    None => !ops::compare(">", &a, &b)?.is_some_and(|o| o.is_le()),
                };
                self.push(Value::I32(result.into()))
            }
            Op::CltUn => self.compare_push("<", |o| !o.is_some_and(|o| o.is_ge()))?,

            Op::Add => self.binary(ops::add)?,
            Op::Sub => self.binary(ops::sub)?,
            Op::Mul => self.binary(ops::mul)?,
            Op::Div => self.binary(ops::div)?,
            Op::Rem => self.binary(ops::rem)?,
            Op::DivUn => self.binary(|a, b| ops::div_un(BinaryOp::Div, a, b))?,
            Op::RemUn => self.binary(|a, b| ops::div_un(BinaryOp::Rem, a, b))?,
            Op::And => self.binary(|a, b| ops::bitwise(BinaryOp::And, a, b))?,
            Op::Or => self.binary(|a, b| ops::bitwise(BinaryOp::Or, a, b))?,
            Op::Xor => self.binary(|a, b| ops::bitwise(BinaryOp::Xor, a, b))?,
            Op::Shl => self.binary(|a, b| ops::bitwise(BinaryOp::Shl, a, b))?,
            Op::Shr => self.binary(|a, b| ops::bitwise(BinaryOp::Shr, a, b))?,
            Op::ShrUn => self.binary(|a, b| ops::bitwise(BinaryOp::ShrUn, a, b))?,
            Op::AddOvf => self.binary(|a, b| ops::checked(BinaryOp::Add, false, a, b))?,
            Op::AddOvfUn => self.binary(|a, b| ops::checked(BinaryOp::Add, true, a, b))?,
            Op::SubOvf => self.binary(|a, b| ops::checked(BinaryOp::Sub, false, a, b))?,
            Op::SubOvfUn => self.binary(|a, b| ops::checked(BinaryOp::Sub, true, a, b))?,
            Op::MulOvf => self.binary(|a, b| ops::checked(BinaryOp::Mul, false, a, b))?,
            Op::MulOvfUn => self.binary(|a, b| ops::checked(BinaryOp::Mul, true, a, b))?,
            Op::Neg => self.unary(ops::neg)?,
            Op::Not => self.unary(ops::not)?,

            Op::ConvI1 => self.unary(|v| ops::convert(Conv::I1, v))?,
            Op::ConvI2 => self.unary(|v| ops::convert(Conv::I2, v))?,
            Op::ConvI4 => self.unary(|v| ops::convert(Conv::I4, v))?,
            Op::ConvI8 => self.unary(|v| ops::convert(Conv::I8, v))?,
            Op::ConvU1 => self.unary(|v| ops::convert(Conv::U1, v))?,
            Op::ConvU2 => self.unary(|v| ops::convert(Conv::U2, v))?,
            Op::ConvU4 => self.unary(|v| ops::convert(Conv::U4, v))?,
            Op::ConvU8 => self.unary(|v| ops::convert(Conv::U8, v))?,
            Op::ConvI => self.unary(|v| ops::convert(Conv::I, v))?,
            Op::ConvU => self.unary(|v| ops::convert(Conv::U, v))?,
            Op::ConvR4 => self.unary(|v| ops::convert(Conv::R4, v))?,
            Op::ConvR8 => self.unary(|v| ops::convert(Conv::R8, v))?,
            Op::ConvRUn => self.unary(|v| ops::convert(Conv::RUn, v))?,
            Op::ConvOvfI1 => self.unary(|v| ops::convert_checked(Conv::I1, false, v))?,
            Op::ConvOvfI2 => self.unary(|v| ops::convert_checked(Conv::I2, false, v))?,
            Op::ConvOvfI4 => self.unary(|v| ops::convert_checked(Conv::I4, false, v))?,
            Op::ConvOvfI8 => self.unary(|v| ops::convert_checked(Conv::I8, false, v))?,
            Op::ConvOvfU1 => self.unary(|v| ops::convert_checked(Conv::U1, false, v))?,
            Op::ConvOvfU2 => self.unary(|v| ops::convert_checked(Conv::U2, false, v))?,
            Op::ConvOvfU4 => self.unary(|v| ops::convert_checked(Conv::U4, false, v))?,
            Op::ConvOvfU8 => self.unary(|v| ops::convert_checked(Conv::U8, false, v))?,
            Op::ConvOvfI => self.unary(|v| ops::convert_checked(Conv::I, false, v))?,
            Op::ConvOvfU => self.unary(|v| ops::convert_checked(Conv::U, false, v))?,
            Op::ConvOvfI1Un => self.unary(|v| ops::convert_checked(Conv::I1, true, v))?,
            Op::ConvOvfI2Un => self.unary(|v| ops::convert_checked(Conv::I2, true, v))?,
            Op::ConvOvfI4Un => self.unary(|v| ops::convert_checked(Conv::I4, true, v))?,
            Op::ConvOvfI8Un => self.unary(|v| ops::convert_checked(Conv::I8, true, v))?,
            Op::ConvOvfU1Un => self.unary(|v| ops::convert_checked(Conv::U1, true, v))?,
            Op::ConvOvfU2Un => self.unary(|v| ops::convert_checked(Conv::U2, true, v))?,
            Op::ConvOvfU4Un => self.unary(|v| ops::convert_checked(Conv::U4, true, v))?,
            Op::ConvOvfU8Un => self.unary(|v| ops::convert_checked(Conv::U8, true, v))?,
            Op::ConvOvfIUn => self.unary(|v| ops::convert_checked(Conv::I, true, v))?,
            Op::ConvOvfUUn => self.unary(|v| ops::convert_checked(Conv::U, true, v))?,
            Op::Ckfinite => {
                let value = self.pop()?;
                if value.as_f64().is_some_and(|x| !x.is_finite()) {
                    return Err(Error::Overflow("ckfinite"));
                }
                self.push(value)
            }

            // values carry their own tags
            Op::Box | Op::Unbox | Op::UnboxAny => Flow::Next,
            Op::Castclass => {
                let value = self.pop()?;
                let ty = self.type_operand(insn)?;
                let resolver = self.cx.engine().resolver();
                let target = resolver.resolve_type(&ty)?;
                let value = resolver.cast(value, &target)?;
                self.push(value)
            }
            Op::Isinst => {
                let value = self.pop()?;
                let ty = self.type_operand(insn)?;
                let resolver = self.cx.engine().resolver();
                let target = resolver.resolve_type(&ty)?;
                if resolver.is_instance(&value, &target) {
                    self.push(value)
                } else {
                    self.push(Value::Null)
                }
            }

            Op::Ldfld | Op::Ldflda => {
                let field = self.field_operand(insn)?;
                let target = self.pop()?;
                let value = self.load_field(&field, &target, "ldfld")?;
                self.push(value)
            }
            Op::Stfld => {
                let field = self.field_operand(insn)?;
                let value = self.pop()?;
                let target = self.pop()?;
                self.store_field(&field, &target, value)?;
                Flow::Next
            }
            Op::Ldsfld | Op::Ldsflda => {
                let field = self.field_operand(insn)?;
                let value = self.load_static(&field)?;
                self.push(value)
            }
            Op::Stsfld => {
                let field = self.field_operand(insn)?;
                let value = self.pop()?;
                match field.accessor() {
                    Some(accessor) => accessor.set(&field.key, &Value::Null, value)?,
                    None => self.cx.engine().store_static(&field.key, value),
                }
                Flow::Next
            }

            Op::Newarr => {
                let length = self.pop()?;
                let element = self.type_operand(insn)?;
                let len = length
                    .as_i64()
                    .filter(|_| length.is_integer())
                    .ok_or_else(|| Error::TypeMismatch {
                        op: "newarr",
                        left: length.type_name(),
                        right: "System.Int32".into(),
                    })?;
                let len = usize::try_from(len).map_err(|_| Error::IndexOutOfRange { index: len, len: 0 })?;
                let fill = self.cx.engine().resolver().default_value(&element)?;
                let items = (0..len)
                    .map(|_| match &fill {
                        // each element of a struct array is its own instance
                        Value::Object(obj) => Value::object(Object::new(obj.class().clone())),
                        other => other.clone(),
                    })
                    .collect();
                self.push(Value::Array(Arc::new(Array::new(element, items))))
            }
            Op::Ldlen => {
                let array = self.pop_array("ldlen")?;
                self.push(Value::I32(array.len() as i32))
            }
            Op::Ldelema
            | Op::Ldelem
            | Op::LdelemI1
            | Op::LdelemU1
            | Op::LdelemI2
            | Op::LdelemU2
            | Op::LdelemI4
            | Op::LdelemU4
            | Op::LdelemI8
            | Op::LdelemI
            | Op::LdelemR4
            | Op::LdelemR8
            | Op::LdelemRef => {
                let index = self.pop_index()?;
                let array = self.pop_array("ldelem")?;
                let value = array.get(index)?;
                self.push(value)
            }
            Op::Stelem
            | Op::StelemI
            | Op::StelemI1
            | Op::StelemI2
            | Op::StelemI4
            | Op::StelemI8
            | Op::StelemR4
            | Op::StelemR8
            | Op::StelemRef => {
                let value = self.pop()?;
                let index = self.pop_index()?;
                let array = self.pop_array("stelem")?;
                array.set(index, value)?;
                Flow::Next
            }

            Op::Ldtoken => {
                let Operand::Token(text) = &insn.operand else {
                    return Err(self.bad_operand(insn, &insn.operand));
                };
                let ty = self.context.close(&TypeName::parse(text)?)?;
                self.cx.engine().resolver().resolve_type(&ty)?;
                self.push(Value::Type(Arc::new(ty)))
            }

            Op::Throw => {
                let value = self.pop()?;
                return Err(Error::Thrown(describe_exception(&value)));
            }
            Op::Rethrow => return Err(Error::Thrown("rethrow outside of a handler".into())),

            opcode => {
                return Err(Error::UnrecognizedOpcode {
                    opcode,
                    offset: self.offset,
                });
            }
        })
    }

    fn slot(&self, insn: &Instruction) -> Result<usize> {
        match insn.operand {
            Operand::Variable(slot) => Ok(slot.into()),
            Operand::Int(slot) => {
                usize::try_from(slot).map_err(|_| self.malformed(format!("slot {slot} is negative")))
            }
            ref other => Err(self.bad_operand(insn, other)),
        }
    }

    fn int(&self, insn: &Instruction) -> Result<i64> {
        match insn.operand {
            Operand::Int(n) => Ok(n),
            ref other => Err(self.bad_operand(insn, other)),
        }
    }

    fn float(&self, insn: &Instruction) -> Result<f64> {
        match insn.operand {
            Operand::Float(x) => Ok(x),
            Operand::Int(n) => Ok(n as f64),
            ref other => Err(self.bad_operand(insn, other)),
        }
    }

    fn target(&self, insn: &Instruction) -> Result<u32> {
        match insn.operand {
            Operand::Target(target) => Ok(target),
            ref other => Err(self.bad_operand(insn, other)),
        }
    }

    fn method_operand(&self, insn: &Instruction) -> Result<MethodRef> {
        match &insn.operand {
            Operand::Method(text) => Ok(MethodRef::parse(text)?),
            other => Err(self.bad_operand(insn, other)),
        }
    }

    /// Type operand, closed against the current bindings.
    fn type_operand(&self, insn: &Instruction) -> Result<TypeName> {
        match &insn.operand {
            Operand::Type(text) => self.context.close(&TypeName::parse(text)?),
            other => Err(self.bad_operand(insn, other)),
        }
    }

    fn field_operand(&self, insn: &Instruction) -> Result<FieldHandle> {
        match &insn.operand {
            Operand::Field(text) => {
                let field = FieldRef::parse(text)?;
                self.cx.engine().resolver().resolve_field(&field, &self.context)
            }
            other => Err(self.bad_operand(insn, other)),
        }
    }

    fn bad_operand(&self, insn: &Instruction, found: &Operand) -> Error {
        self.malformed(format!(
            "{} takes a {} operand, found {}",
            insn.opcode,
            insn.opcode.operand_kind(),
            found.kind()
        ))
    }

    fn arg_slot(&mut self, slot: usize) -> Result<&mut Value> {
        let count = self.args.len();
        match self.args.get_mut(slot) {
            Some(value) => Ok(value),
            None => Err(Error::MalformedDescriptor {
                method: self.method.name.to_string(),
                offset: self.offset,
                reason: format!("argument {slot} out of range ({count} arguments)"),
            }),
        }
    }

    fn load_arg(&mut self, slot: usize) -> Result<Flow> {
        let value = self.arg_slot(slot)?.clone();
        Ok(self.push(value))
    }

    fn local_slot(&mut self, slot: usize) -> Result<&mut Value> {
        let count = self.locals.len();
        match self.locals.get_mut(slot) {
            Some(value) => Ok(value),
            None => Err(Error::MalformedDescriptor {
                method: self.method.name.to_string(),
                offset: self.offset,
                reason: format!("local {slot} out of range ({count} locals)"),
            }),
        }
    }

    fn load_local(&mut self, slot: usize) -> Result<Flow> {
        let value = self.local_slot(slot)?.clone();
        Ok(self.push(value))
    }

    fn store_local(&mut self, slot: usize) -> Result<Flow> {
        let value = self.pop()?;
        *self.local_slot(slot)? = value;
        Ok(Flow::Next)
    }

    fn branch(&self, insn: &Instruction, taken: bool) -> Result<Flow> {
        Ok(if taken {
            Flow::Jump(self.target(insn)?)
        } else {
            Flow::Next
        })
    }

    fn compare_branch<F>(&mut self, insn: &Instruction, op: &'static str, taken: F) -> Result<Flow>
    where
        F: FnOnce(Option<std::cmp::Ordering>) -> bool,
    {
        let (a, b) = self.pop2()?;
        let ordering = ops::compare(op, &a, &b)?;
        self.branch(insn, taken(ordering))
    }

    fn compare_push<F>(&mut self, op: &'static str, holds: F) -> Result<Flow>
    where
        F: FnOnce(Option<std::cmp::Ordering>) -> bool,
    {
        let (a, b) = self.pop2()?;
        let result = holds(ops::compare(op, &a, &b)?);
        Ok(self.push(Value::I32(result.into())))
    }

    fn binary<F>(&mut self, op: F) -> Result<Flow>
    where
        F: FnOnce(&Value, &Value) -> Result<Value>,
    {
        let (a, b) = self.pop2()?;
        let result = op(&a, &b)?;
        Ok(self.push(result))
    }

    fn unary<F>(&mut self, op: F) -> Result<Flow>
    where
        F: FnOnce(&Value) -> Result<Value>,
    {
        let value = self.pop()?;
        let result = op(&value)?;
        Ok(self.push(result))
    }

    fn pop_index(&mut self) -> Result<i64> {
        let index = self.pop()?;
        index
            .as_i64()
            .filter(|_| index.is_integer())
            .ok_or_else(|| Error::TypeMismatch {
                op: "[]",
                left: index.type_name(),
                right: "System.Int32".into(),
            })
    }

    fn pop_array(&mut self, op: &'static str) -> Result<Arc<Array>> {
        match self.pop()? {
            Value::Array(array) => Ok(array),
            Value::Null => Err(Error::NullReference(op)),
            other => Err(Error::InvalidCast {
                from: other.type_name(),
                to: "System.Array".into(),
            }),
        }
    }

    fn call(&mut self, insn: &Instruction) -> Result<Flow> {
        let cx = self.cx;
        let reference = self.method_operand(insn)?;
        let resolver = cx.engine().resolver();
        if reference.name == "Invoke" {
            let declaring_type = self.context.close(&reference.declaring_type)?;
            if resolver
                .resolve_type(&declaring_type)
                .is_ok_and(|ty| ty.is_delegate())
            {
                return self.invoke_delegate(&reference);
            }
        }
        let method = cx.bind(resolver.bind_method(&reference, &self.context)?)?;
        let args = self.pop_n(method.param_count())?;
        let receiver = if method.is_static {
            None
        } else {
            Some(self.pop()?)
        };
        let result = cx.call(&method, receiver, args)?;
        if !method.returns_void {
            self.stack.push(result);
        }
        Ok(Flow::Next)
    }

    fn invoke_delegate(&mut self, reference: &MethodRef) -> Result<Flow> {
        let args = self.pop_n(reference.parameters.len())?;
        let callable = match self.pop()? {
            Value::Callable(callable) => callable,
            Value::Null => return Err(Error::NullReference("Invoke")),
            other => {
                return Err(Error::InvalidCast {
                    from: other.type_name(),
                    to: reference.declaring_type.to_string(),
                });
            }
        };
        let result = self.cx.call_callable(&callable, args)?;
        if !reference.returns_void() {
            self.stack.push(result);
        }
        Ok(Flow::Next)
    }

    fn new_object(&mut self, insn: &Instruction) -> Result<Flow> {
        let cx = self.cx;
        let reference = self.method_operand(insn)?;
        let resolver = cx.engine().resolver();
        let class = resolver.resolve_type(&self.context.close(&reference.declaring_type)?)?;

        if class.is_delegate() {
            let callable = self.pop()?;
            if !matches!(callable, Value::Callable(_)) {
                return Err(self.malformed(format!(
                    "delegate construction expects a function, found {}",
                    callable.type_name()
                )));
            }
            if std::mem::take(&mut self.pending_target) {
                self.pop()?;
            }
            return Ok(self.push(callable));
        }

        let bound = resolver.bind_method(&reference, &self.context)?;
        let args = self.pop_n(bound.signature.parameters.len())?;
        let instance = match cx.bind(bound) {
            Ok(ctor) if ctor.is_patched() => {
                let instance = Value::object(Object::new(class.name.clone()));
                cx.call(&ctor, Some(instance.clone()), args)?;
                instance
            }
            Ok(ctor) => cx.call(&ctor, None, args)?,
            // a registered type with no registered default constructor
            Err(Error::Resolution(_)) if args.is_empty() => {
                Value::object(Object::new(class.name.clone()))
            }
            Err(e) => return Err(e),
        };
        Ok(self.push(instance))
    }

    fn load_function(&mut self, insn: &Instruction, virtual_call: bool) -> Result<Flow> {
        let cx = self.cx;
        let reference = self.method_operand(insn)?;
        let bound = cx.engine().resolver().bind_method(&reference, &self.context)?;
        let method = Arc::new(cx.bind(bound)?);
        let receiver = if method.is_static {
            None
        } else {
            Some(self.pop()?)
        };
        self.pending_target = virtual_call || method.is_static;
        Ok(self.push(Value::Callable(Arc::new(Callable { method, receiver }))))
    }

    fn field_default(&self, field: &FieldHandle) -> Result<Value> {
        match &field.field_type {
            Some(ty) => self.cx.engine().resolver().default_value(ty),
            None => Ok(Value::Null),
        }
    }

    fn load_field(&self, field: &FieldHandle, target: &Value, op: &'static str) -> Result<Value> {
        if let Some(accessor) = field.accessor() {
            return accessor.get(target);
        }
        match target {
            Value::Object(obj) => match obj.field(&field.name) {
                Some(value) => Ok(value),
                None => self.field_default(field),
            },
            Value::Null => Err(Error::NullReference(op)),
            other => Err(Error::InvalidCast {
                from: other.type_name(),
                to: field.declaring_type.to_string(),
            }),
        }
    }

    fn store_field(&self, field: &FieldHandle, target: &Value, value: Value) -> Result<()> {
        if let Some(accessor) = field.accessor() {
            return accessor.set(&field.key, target, value);
        }
        match target {
            Value::Object(obj) => {
                obj.set_field(field.name.clone(), value);
                Ok(())
            }
            Value::Null => Err(Error::NullReference("stfld")),
            other => Err(Error::InvalidCast {
                from: other.type_name(),
                to: field.declaring_type.to_string(),
            }),
        }
    }

    fn load_static(&self, field: &FieldHandle) -> Result<Value> {
        if let Some(accessor) = field.accessor() {
            return accessor.get(&Value::Null);
        }
        match self.cx.engine().load_static(&field.key) {
            Some(value) => Ok(value),
            None => self.field_default(field),
        }
    }
}

/// Reference comparison against null. `None` when neither side is null or
/// a side is not a reference, leaving the comparison to the value model.
fn null_test(a: &Value, b: &Value) -> Option<bool> {
    let reference = |v: &Value| {
        matches!(
            v,
            Value::Null | Value::Object(_) | Value::Array(_) | Value::Callable(_) | Value::Str(_) | Value::Type(_)
        )
    };
    ((a.is_null() || b.is_null()) && reference(a) && reference(b)).then(|| a == b)
}

/// `ceq` and `beq`: null tests and object identity for references, the
/// value model otherwise.
fn same(a: &Value, b: &Value) -> Result<bool> {
    if let Some(equal) = null_test(a, b) {
        return Ok(equal);
    }
    match (a, b) {
        (Value::Object(_), Value::Object(_))
        | (Value::Array(_), Value::Array(_))
        | (Value::Callable(_), Value::Callable(_)) => Ok(a == b),
        _ => ops::equal(a, b),
    }
}

fn describe_exception(value: &Value) -> String {
    let message = value
        .as_object()
        .and_then(|obj| obj.field("message").or_else(|| obj.field("_message")));
    match message {
        Some(message) => format!("{}: {message}", value.type_name()),
        None => value.type_name(),
    }
}
