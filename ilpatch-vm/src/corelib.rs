//! Host symbols for the `System` namespace: primitive types, the delegate
//! families and a handful of common methods.

use ilpatch_file::TypeName;

use crate::error::{Error, Result};
use crate::interpreter::NativeCall;
use crate::symbols::{Module, SymbolTable, TypeDef};
use crate::value::{ArrayRef, Object, Value};

/// A symbol table holding only the core library.
pub fn symbol_table() -> Result<SymbolTable> {
    let mut table = SymbolTable::new();
    table.register(module()?);
    Ok(table)
}

pub fn module() -> Result<Module> {
    let mut m = Module::new("System");
    types(&mut m);
    objects(&mut m)?;
    strings(&mut m)?;
    formatting(&mut m)?;
    math(&mut m)?;
    Ok(m)
}

fn types(m: &mut Module) {
    let object = || TypeName::named("System.Object");
    let value_type = || TypeName::named("System.ValueType");
    m.add_type(TypeDef::class("System.Object"))
        .add_type(TypeDef::class("System.ValueType").with_base(object()))
        .add_type(TypeDef::class("System.String").with_base(object()))
        .add_type(TypeDef::class("System.Array").with_base(object()))
        .add_type(TypeDef::class("System.Exception").with_base(object()))
        .add_type(TypeDef::class("System.Math"))
        .add_type(TypeDef::class("System.Type").with_base(object()))
        .add_type(TypeDef::class("System.Delegate").with_base(object()))
        .add_type(TypeDef::class("System.MulticastDelegate").with_base(TypeName::named("System.Delegate")))
        .add_type(TypeDef::value_type("System.Void", || Value::Null))
        .add_type(TypeDef::value_type("System.RuntimeTypeHandle", || Value::Null));

    let primitives: [(&str, fn() -> Value); 14] = [
        ("System.Boolean", || Value::Bool(false)),
        ("System.SByte", || Value::I8(0)),
        ("System.Byte", || Value::I32(0)),
        ("System.Int16", || Value::I32(0)),
        ("System.UInt16", || Value::I32(0)),
        ("System.Char", || Value::I32(0)),
        ("System.Int32", || Value::I32(0)),
        ("System.UInt32", || Value::I32(0)),
        ("System.Int64", || Value::I64(0)),
        ("System.UInt64", || Value::I64(0)),
        ("System.IntPtr", || Value::I64(0)),
        ("System.UIntPtr", || Value::I64(0)),
        ("System.Single", || Value::F32(0.0)),
        ("System.Double", || Value::F64(0.0)),
    ];
    for (name, zero) in primitives {
        m.add_type(TypeDef::value_type(name, zero).with_base(value_type()));
    }

    m.add_type(TypeDef::delegate("System.Action"));
    for arity in 1..=16 {
        m.add_type(TypeDef::delegate(format!("System.Action`{arity}")));
    }
    for arity in 1..=17 {
        m.add_type(TypeDef::delegate(format!("System.Func`{arity}")));
    }
    m.add_type(TypeDef::delegate("System.Predicate`1"))
        .add_type(TypeDef::delegate("System.Comparison`1"));
}

fn objects(m: &mut Module) -> Result<()> {
    // constructors return the new object under `newobj` and nothing when
    // chained from a derived constructor
    m.instance_method("System.Void System.Object::.ctor()", |call| {
        Ok(match call.this {
            Value::Null => Value::object(Object::new(TypeName::named("System.Object"))),
            _ => Value::Null,
        })
    })?
    .instance_method("System.String System.Object::ToString()", |call| {
        Ok(Value::from(call.this.to_string()))
    })?
    .instance_method("System.Boolean System.Object::Equals(System.Object)", |call| {
        Ok(Value::Bool(call.this == *call.arg(0)?))
    })?
    .instance_method("System.Void System.Exception::.ctor(System.String)", |call| {
        let message = call.arg(0)?.clone();
        match &call.this {
            Value::Object(derived) => {
                derived.set_field("message", message);
                Ok(Value::Null)
            }
            _ => {
                let exception = Object::new(TypeName::named("System.Exception"));
                exception.set_field("message", message);
                Ok(Value::object(exception))
            }
        }
    })?;
    Ok(())
}

/// Concatenates every argument's text; null reads as empty.
fn concat(call: &mut NativeCall<'_>) -> Result<Value> {
    Ok(Value::from(call.args.iter().map(ToString::to_string).collect::<String>()))
}

fn strings(m: &mut Module) -> Result<()> {
    m.static_method("System.String System.String::Concat(System.Object)", concat)?
        .static_method("System.String System.String::Concat(System.Object,System.Object)", concat)?
        .static_method(
            "System.String System.String::Concat(System.Object,System.Object,System.Object)",
            concat,
        )?
        .static_method("System.String System.String::Concat(System.String,System.String)", concat)?
        .static_method(
            "System.String System.String::Concat(System.String,System.String,System.String)",
            concat,
        )?
        .static_method(
            "System.String System.String::Concat(System.String,System.String,System.String,System.String)",
            concat,
        )?
        .static_method("System.String System.String::Concat(System.String[])", |call| {
            let parts: ArrayRef = call.arg_as(0)?;
            Ok(Value::from(
                parts.to_vec().iter().map(ToString::to_string).collect::<String>(),
            ))
        })?
        .instance_method("System.Int32 System.String::get_Length()", |call| {
            let text: String = call.this_as()?;
            Ok(Value::I32(text.encode_utf16().count() as i32))
        })?
        .static_method("System.Boolean System.String::IsNullOrEmpty(System.String)", |call| {
            let text: Option<String> = call.arg_as(0)?;
            Ok(Value::Bool(text.is_none_or(|t| t.is_empty())))
        })?
        .static_method(
            "System.Boolean System.String::op_Equality(System.String,System.String)",
            |call| {
                let a: Option<String> = call.arg_as(0)?;
                let b: Option<String> = call.arg_as(1)?;
                Ok(Value::Bool(a == b))
            },
        )?
        .static_method("System.String System.String::Format(System.String,System.Object)", string_format)?
        .static_method(
            "System.String System.String::Format(System.String,System.Object,System.Object)",
            string_format,
        )?;
    Ok(())
}

/// `{N}` placeholders only; alignment and format strings are not supported.
fn string_format(call: &mut NativeCall<'_>) -> Result<Value> {
    let template: String = call.arg_as(0)?;
    let mut out = template;
    for (i, arg) in call.args.iter().enumerate().skip(1) {
        out = out.replace(&format!("{{{}}}", i - 1), &arg.to_string());
    }
    Ok(Value::from(out))
}

fn to_string(call: &mut NativeCall<'_>) -> Result<Value> {
    Ok(Value::from(call.this.to_string()))
}

fn formatting(m: &mut Module) -> Result<()> {
    for ty in [
        "System.Boolean",
        "System.Int32",
        "System.Int64",
        "System.Single",
        "System.Double",
    ] {
        m.instance_method(&format!("System.String {ty}::ToString()"), to_string)?;
    }
    Ok(())
}

fn math(m: &mut Module) -> Result<()> {
    fn f64_arg(call: &NativeCall<'_>, i: usize) -> Result<f64> {
        call.arg(i)?.as_f64().ok_or_else(|| {
            Error::Native(format!("{}: argument {i} is not numeric", call.signature()))
        })
    }

    m.static_method("System.Int32 System.Math::Abs(System.Int32)", |call| {
        let n: i32 = call.arg_as(0)?;
        n.checked_abs()
            .map(Value::I32)
            .ok_or(Error::Overflow("Math.Abs"))
    })?
    .static_method("System.Int32 System.Math::Max(System.Int32,System.Int32)", |call| {
        Ok(Value::I32(call.arg_as::<i32>(0)?.max(call.arg_as(1)?)))
    })?
    .static_method("System.Int32 System.Math::Min(System.Int32,System.Int32)", |call| {
        Ok(Value::I32(call.arg_as::<i32>(0)?.min(call.arg_as(1)?)))
    })?
    .static_method("System.Double System.Math::Abs(System.Double)", |call| {
        Ok(Value::F64(f64_arg(call, 0)?.abs()))
    })?
    .static_method("System.Double System.Math::Max(System.Double,System.Double)", |call| {
        Ok(Value::F64(f64_arg(call, 0)?.max(f64_arg(call, 1)?)))
    })?
    .static_method("System.Double System.Math::Min(System.Double,System.Double)", |call| {
        Ok(Value::F64(f64_arg(call, 0)?.min(f64_arg(call, 1)?)))
    })?
    .static_method("System.Double System.Math::Sqrt(System.Double)", |call| {
        Ok(Value::F64(f64_arg(call, 0)?.sqrt()))
    })?
    .static_method("System.Double System.Math::Pow(System.Double,System.Double)", |call| {
        Ok(Value::F64(f64_arg(call, 0)?.powf(f64_arg(call, 1)?)))
    })?
    .static_method("System.Double System.Math::Floor(System.Double)", |call| {
        Ok(Value::F64(f64_arg(call, 0)?.floor()))
    })?
    .static_method("System.Double System.Math::Ceiling(System.Double)", |call| {
        Ok(Value::F64(f64_arg(call, 0)?.ceil()))
    })?
    .static_method("System.Double System.Math::Round(System.Double)", |call| {
        Ok(Value::F64(f64_arg(call, 0)?.round_ties_even()))
    })?;
    Ok(())
}
