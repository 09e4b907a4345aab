//! Tagged runtime values.
//!
//! Every operand on the evaluation stack, in a local or argument slot, or
//! passed across the native boundary is a [`Value`]. Primitive tags carry
//! their payload inline; everything else is an object reference shared
//! through an `Arc`.

use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use ilpatch_file::TypeName;
use parking_lot::RwLock;

use crate::error::{Error, Result};
use crate::interpreter::Method;

pub type ObjectRef = Arc<Object>;
pub type ArrayRef = Arc<Array>;

#[derive(Clone)]
pub enum Value {
    Null,
    Bool(bool),
    I8(i8),
    I32(i32),
    I64(i64),
    F32(f32),
    F64(f64),
    Str(Arc<str>),
    Object(ObjectRef),
    Array(ArrayRef),
    /// A delegate: a resolved method plus its bound receiver.
    Callable(Arc<Callable>),
    /// A runtime type handle, as pushed by `ldtoken`.
    Type(Arc<TypeName>),
}

/// The value-model tag of a [`Value`]. Every reference variant reports
/// [`ValueKind::Object`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ValueKind {
    Int32,
    Int64,
    Int8,
    Float32,
    Float64,
    Bool,
    String,
    Object,
}

impl Value {
    pub fn kind(&self) -> ValueKind {
        match self {
            Value::I32(_) => ValueKind::Int32,
            Value::I64(_) => ValueKind::Int64,
            Value::I8(_) => ValueKind::Int8,
            Value::F32(_) => ValueKind::Float32,
            Value::F64(_) => ValueKind::Float64,
            Value::Bool(_) => ValueKind::Bool,
            Value::Str(_) => ValueKind::String,
            Value::Null
            | Value::Object(_)
            | Value::Array(_)
            | Value::Callable(_)
            | Value::Type(_) => ValueKind::Object,
        }
    }

    /// Name of the runtime type, as used in error messages and casts.
    pub fn type_name(&self) -> String {
        match self {
            Value::Null => "null".into(),
            Value::Bool(_) => "System.Boolean".into(),
            Value::I8(_) => "System.SByte".into(),
            Value::I32(_) => "System.Int32".into(),
            Value::I64(_) => "System.Int64".into(),
            Value::F32(_) => "System.Single".into(),
            Value::F64(_) => "System.Double".into(),
            Value::Str(_) => "System.String".into(),
            Value::Object(obj) => obj.class().to_string(),
            Value::Array(arr) => TypeName::array_of(arr.element().clone()).to_string(),
            Value::Callable(_) => "System.Delegate".into(),
            Value::Type(_) => "System.RuntimeTypeHandle".into(),
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn is_integer(&self) -> bool {
        matches!(self, Value::I8(_) | Value::I32(_) | Value::I64(_))
    }

    pub fn is_float(&self) -> bool {
        matches!(self, Value::F32(_) | Value::F64(_))
    }

    pub fn str(text: impl AsRef<str>) -> Self {
        Value::Str(Arc::from(text.as_ref()))
    }

    pub fn object(obj: Object) -> Self {
        Value::Object(Arc::new(obj))
    }

    /// Tag a host value by its runtime kind. Anything that is not a
    /// primitive, a string or already a [`Value`] becomes an opaque object
    /// of class `System.Object` carrying the value as its payload.
    pub fn from_any(value: Box<dyn Any + Send + Sync>) -> Self {
        let value = match value.downcast::<Value>() {
            Ok(v) => return *v,
            Err(other) => other,
        };
        macro_rules! try_tag {
            ($value:ident, $($ty:ty => $ctor:expr),* $(,)?) => {
                $(
                    let $value = match $value.downcast::<$ty>() {
                        Ok(v) => return $ctor(*v),
                        Err(other) => other,
                    };
                )*
            };
        }
        try_tag!(value,
            i32 => Value::I32,
            i64 => Value::I64,
            i8 => Value::I8,
            f32 => Value::F32,
            f64 => Value::F64,
            bool => Value::Bool,
            String => Value::str,
            &'static str => Value::str,
        );
        Value::object(Object::with_payload(TypeName::named("System.Object"), value))
    }

    /// Integer payload widened to 64 bits. Booleans read as 0 or 1.
    pub fn as_i64(&self) -> Option<i64> {
        match *self {
            Value::I8(v) => Some(v.into()),
            Value::I32(v) => Some(v.into()),
            Value::I64(v) => Some(v),
            Value::Bool(v) => Some(v.into()),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match *self {
            Value::F32(v) => Some(v.into()),
            Value::F64(v) => Some(v),
            _ => self.as_i64().map(|v| v as f64),
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_object(&self) -> Option<&ObjectRef> {
        match self {
            Value::Object(obj) => Some(obj),
            _ => None,
        }
    }
}

impl Default for Value {
    fn default() -> Self {
        Value::Null
    }
}

impl PartialEq for Value {
    /// Primitives compare by payload, references by identity.
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Null, Value::Null) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::I8(a), Value::I8(b)) => a == b,
            (Value::I32(a), Value::I32(b)) => a == b,
            (Value::I64(a), Value::I64(b)) => a == b,
            (Value::F32(a), Value::F32(b)) => a == b,
            (Value::F64(a), Value::F64(b)) => a == b,
            (Value::Str(a), Value::Str(b)) => a == b,
            (Value::Object(a), Value::Object(b)) => Arc::ptr_eq(a, b),
            (Value::Array(a), Value::Array(b)) => Arc::ptr_eq(a, b),
            (Value::Callable(a), Value::Callable(b)) => Arc::ptr_eq(a, b),
            (Value::Type(a), Value::Type(b)) => a == b,
            _ => false,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => Ok(()),
            Value::Bool(true) => f.write_str("True"),
            Value::Bool(false) => f.write_str("False"),
            Value::I8(v) => write!(f, "{v}"),
            Value::I32(v) => write!(f, "{v}"),
            Value::I64(v) => write!(f, "{v}"),
            Value::F32(v) => write!(f, "{v}"),
            Value::F64(v) => write!(f, "{v}"),
            Value::Str(s) => f.write_str(s),
            Value::Object(obj) => write!(f, "{}", obj.class()),
            Value::Array(_) | Value::Callable(_) => f.write_str(&self.type_name()),
            Value::Type(ty) => write!(f, "{ty}"),
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => f.write_str("Null"),
            Value::Bool(v) => write!(f, "Bool({v})"),
            Value::I8(v) => write!(f, "I8({v})"),
            Value::I32(v) => write!(f, "I32({v})"),
            Value::I64(v) => write!(f, "I64({v})"),
            Value::F32(v) => write!(f, "F32({v})"),
            Value::F64(v) => write!(f, "F64({v})"),
            Value::Str(s) => write!(f, "Str({s:?})"),
            Value::Object(obj) => write!(f, "Object({})", obj.class()),
            Value::Array(arr) => write!(f, "Array({}[{}])", arr.element(), arr.len()),
            Value::Callable(c) => write!(f, "Callable({})", c.method.signature),
            Value::Type(ty) => write!(f, "Type({ty})"),
        }
    }
}

macro_rules! impl_from {
    ($($ty:ty => $variant:ident),* $(,)?) => {
        $(
            impl From<$ty> for Value {
                fn from(v: $ty) -> Self {
                    Value::$variant(v)
                }
            }
        )*
    };
}

impl_from! {
    bool => Bool,
    i8 => I8,
    i32 => I32,
    i64 => I64,
    f32 => F32,
    f64 => F64,
    ObjectRef => Object,
    ArrayRef => Array,
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::str(v)
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Str(Arc::from(v))
    }
}

impl From<()> for Value {
    fn from(_: ()) -> Self {
        Value::Null
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map_or(Value::Null, Into::into)
    }
}

/// Conversion out of a [`Value`] at the native boundary.
pub trait FromValue: Sized {
    fn from_value(value: Value) -> Result<Self>;
}

fn cast_error(value: &Value, to: &str) -> Error {
    Error::InvalidCast {
        from: value.type_name(),
        to: to.into(),
    }
}

macro_rules! impl_from_value {
    ($($ty:ty, $name:literal, $pat:pat => $out:expr);* $(;)?) => {
        $(
            impl FromValue for $ty {
                fn from_value(value: Value) -> Result<Self> {
                    match value {
                        $pat => Ok($out),
                        other => Err(cast_error(&other, $name)),
                    }
                }
            }
        )*
    };
}

impl_from_value! {
    bool, "System.Boolean", Value::Bool(v) => v;
    i8, "System.SByte", Value::I8(v) => v;
    f32, "System.Single", Value::F32(v) => v;
    f64, "System.Double", Value::F64(v) => v;
    ObjectRef, "System.Object", Value::Object(v) => v;
    ArrayRef, "System.Array", Value::Array(v) => v;
    Arc<Callable>, "System.Delegate", Value::Callable(v) => v;
}

impl FromValue for i32 {
    fn from_value(value: Value) -> Result<Self> {
        match value {
            Value::I32(v) => Ok(v),
            Value::I8(v) => Ok(v.into()),
            Value::Bool(v) => Ok(v.into()),
            other => Err(cast_error(&other, "System.Int32")),
        }
    }
}

impl FromValue for i64 {
    fn from_value(value: Value) -> Result<Self> {
        value
            .as_i64()
            .ok_or_else(|| cast_error(&value, "System.Int64"))
    }
}

impl FromValue for String {
    fn from_value(value: Value) -> Result<Self> {
        match value {
            Value::Str(s) => Ok(s.to_string()),
            other => Err(cast_error(&other, "System.String")),
        }
    }
}

impl FromValue for Value {
    fn from_value(value: Value) -> Result<Self> {
        Ok(value)
    }
}

impl FromValue for () {
    fn from_value(_: Value) -> Result<Self> {
        Ok(())
    }
}

impl<T: FromValue> FromValue for Option<T> {
    fn from_value(value: Value) -> Result<Self> {
        match value {
            Value::Null => Ok(None),
            other => T::from_value(other).map(Some),
        }
    }
}

/// A heap object: its class, named fields and an optional host payload.
pub struct Object {
    class: TypeName,
    fields: RwLock<HashMap<String, Value>>,
    payload: Option<Box<dyn Any + Send + Sync>>,
}

impl Object {
    pub fn new(class: TypeName) -> Self {
        Self {
            class,
            fields: RwLock::new(HashMap::new()),
            payload: None,
        }
    }

    pub fn with_payload(class: TypeName, payload: Box<dyn Any + Send + Sync>) -> Self {
        Self {
            payload: Some(payload),
            ..Self::new(class)
        }
    }

    pub fn class(&self) -> &TypeName {
        &self.class
    }

    pub fn field(&self, name: &str) -> Option<Value> {
        self.fields.read().get(name).cloned()
    }

    pub fn set_field(&self, name: impl Into<String>, value: Value) {
        self.fields.write().insert(name.into(), value);
    }

    pub fn payload<T: Any>(&self) -> Option<&T> {
        self.payload.as_ref()?.downcast_ref()
    }
}

impl fmt::Debug for Object {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Object")
            .field("class", &self.class.to_string())
            .field("fields", &*self.fields.read())
            .field("payload", &self.payload.is_some())
            .finish()
    }
}

/// A single-dimension array.
#[derive(Debug)]
pub struct Array {
    element: TypeName,
    items: RwLock<Vec<Value>>,
}

impl Array {
    pub fn new(element: TypeName, items: Vec<Value>) -> Self {
        Self {
            element,
            items: RwLock::new(items),
        }
    }

    pub fn element(&self) -> &TypeName {
        &self.element
    }

    pub fn len(&self) -> usize {
        self.items.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.read().is_empty()
    }

    pub fn get(&self, index: i64) -> Result<Value> {
        let items = self.items.read();
        usize::try_from(index)
            .ok()
            .and_then(|i| items.get(i).cloned())
            .ok_or(Error::IndexOutOfRange {
                index,
                len: items.len(),
            })
    }

    pub fn set(&self, index: i64, value: Value) -> Result<()> {
        let mut items = self.items.write();
        let len = items.len();
        let slot = usize::try_from(index)
            .ok()
            .and_then(|i| items.get_mut(i))
            .ok_or(Error::IndexOutOfRange { index, len })?;
        *slot = value;
        Ok(())
    }

    pub fn to_vec(&self) -> Vec<Value> {
        self.items.read().clone()
    }
}

/// A bound delegate. Invoking it goes through the same dispatch as a direct
/// call to `method`, with `receiver` in argument slot 0 for instance
/// targets.
#[derive(Debug)]
pub struct Callable {
    pub method: Arc<Method>,
    pub receiver: Option<Value>,
}

impl Callable {
    pub fn is_patched(&self) -> bool {
        self.method.is_patched()
    }
}
