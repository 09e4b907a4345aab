//! Symbol resolution.
//!
//! Textual references from descriptors are closed against the generic
//! context of the calling method, then looked up in the [`SymbolTable`].
//! Only closed names are memoized; a reference that still carries `!N` or
//! `!!N` is rebound at every call site.

use std::collections::HashMap;
use std::sync::Arc;

use ilpatch_file::{FieldRef, MethodRef, Signature, TypeName};
use parking_lot::RwLock;

use crate::error::{Error, Result};
use crate::ops::{self, Conv};
use crate::symbols::{FieldDef, MethodDef, SymbolTable, TypeDef, field_key};
use crate::value::Value;

/// Generic arguments bound for the method currently executing.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct GenericContext {
    /// Arguments of the declaring type, read by `!N`.
    pub type_args: Vec<TypeName>,
    /// Arguments of the method itself, read by `!!N`.
    pub method_args: Vec<TypeName>,
}

impl GenericContext {
    pub fn new(type_args: Vec<TypeName>, method_args: Vec<TypeName>) -> Self {
        Self {
            type_args,
            method_args,
        }
    }

    /// The bindings a closed signature implies for its own body.
    pub fn of(signature: &Signature) -> Self {
        Self::new(
            signature.declaring_type.args().to_vec(),
            signature.generic_args.clone(),
        )
    }

    pub fn close(&self, ty: &TypeName) -> Result<TypeName> {
        ty.substitute(&self.type_args, &self.method_args)
            .map_err(|e| Error::Resolution(format!("{ty}: {e}")))
    }
}

/// A closed type and its registered definition. Arrays, by-refs and
/// pointers have no definition of their own.
#[derive(Clone, Debug)]
pub struct TypeHandle {
    pub name: TypeName,
    def: Option<Arc<TypeDef>>,
}

impl TypeHandle {
    pub fn def(&self) -> Option<&TypeDef> {
        self.def.as_deref()
    }

    pub fn is_delegate(&self) -> bool {
        self.def().is_some_and(TypeDef::is_delegate)
    }

    pub fn is_value_type(&self) -> bool {
        self.def().is_some_and(TypeDef::is_value_type)
    }

    pub fn default_value(&self) -> Value {
        match self.def() {
            Some(def) => def.default_value(&self.name),
            None => Value::Null,
        }
    }
}

/// A method reference bound at one call site.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BoundMethod {
    /// Fully closed signature.
    pub signature: Signature,
    /// The open generic definition the signature instantiates.
    pub definition: Signature,
    /// Bindings for the callee's own body.
    pub context: GenericContext,
    pub return_type: Option<TypeName>,
}

impl BoundMethod {
    /// Bind a closed signature supplied by host code. `definition_params`
    /// gives the parameters as declared when they mention generic
    /// parameters; otherwise the closed parameters are used.
    pub fn from_signature(signature: &Signature, definition_params: Option<&[TypeName]>) -> Self {
        let definition = Signature {
            declaring_type: signature.declaring_type.definition(),
            name: signature.name.clone(),
            generic_args: (0..signature.generic_args.len() as u32)
                .map(TypeName::MethodParam)
                .collect(),
            parameters: definition_params
                .map(<[TypeName]>::to_vec)
                .unwrap_or_else(|| signature.parameters.clone()),
        };
        Self {
            context: GenericContext::of(signature),
            signature: signature.clone(),
            definition,
            return_type: None,
        }
    }

    /// Catalogue keys to try, most specific first.
    pub fn keys(&self) -> Vec<String> {
        let closed = self.signature.to_string();
        let open = self.definition.to_string();
        if closed == open {
            vec![closed]
        } else {
            vec![closed, open]
        }
    }
}

/// A field reference bound at one access site.
#[derive(Clone, Debug)]
pub struct FieldHandle {
    /// `Decl::name` with the declaring type closed; also the static slot key.
    pub key: String,
    pub name: String,
    pub declaring_type: TypeName,
    pub field_type: Option<TypeName>,
    def: Option<Arc<FieldDef>>,
}

impl FieldHandle {
    /// The registered accessor, if any. Without one the field is stored:
    /// in the object's field map for instance fields, in an engine-wide
    /// slot for static ones.
    pub fn accessor(&self) -> Option<&FieldDef> {
        self.def.as_deref()
    }
}

pub struct Resolver {
    symbols: Arc<SymbolTable>,
    types: RwLock<HashMap<String, TypeHandle>>,
    methods: RwLock<HashMap<String, Option<Arc<MethodDef>>>>,
}

impl Resolver {
    pub fn new(symbols: Arc<SymbolTable>) -> Self {
        Self {
            symbols,
            types: RwLock::new(HashMap::new()),
            methods: RwLock::new(HashMap::new()),
        }
    }

    pub fn symbols(&self) -> &SymbolTable {
        &self.symbols
    }

    pub fn resolve_type(&self, ty: &TypeName) -> Result<TypeHandle> {
        if ty.has_placeholders() {
            return Err(Error::Resolution(format!("{ty}: unbound generic parameter")));
        }
        let key = ty.to_string();
        if let Some(handle) = self.types.read().get(&key) {
            return Ok(handle.clone());
        }
        let handle = self.lookup_type(ty)?;
        self.types.write().insert(key, handle.clone());
        Ok(handle)
    }

    /// Parse and resolve a type name that must already be closed.
    pub fn resolve_type_str(&self, text: &str) -> Result<TypeHandle> {
        self.resolve_type(&TypeName::parse(text)?)
    }

    fn lookup_type(&self, ty: &TypeName) -> Result<TypeHandle> {
        match ty {
            TypeName::Named { name, args } => {
                let def = self
                    .symbols
                    .find_type(name)
                    .ok_or_else(|| Error::Resolution(ty.to_string()))?;
                if !args.is_empty() && ty.arity() != args.len() {
                    return Err(Error::Resolution(format!(
                        "{ty}: {name} takes {} type arguments, got {}",
                        ty.arity(),
                        args.len()
                    )));
                }
                for arg in args {
                    self.resolve_type(arg)?;
                }
                Ok(TypeHandle {
                    name: ty.clone(),
                    def: Some(def.clone()),
                })
            }
            TypeName::Array(inner) | TypeName::ByRef(inner) | TypeName::Pointer(inner) => {
                self.resolve_type(inner)?;
                Ok(TypeHandle {
                    name: ty.clone(),
                    def: None,
                })
            }
            TypeName::TypeParam(_) | TypeName::MethodParam(_) => {
                Err(Error::Resolution(format!("{ty}: unbound generic parameter")))
            }
        }
    }

    /// Close a method reference from a descriptor against the caller's
    /// bindings. The declaring type and method arguments are written
    /// relative to the caller; the parameter and return types relative to
    /// the callee.
    pub fn bind_method(&self, method: &MethodRef, caller: &GenericContext) -> Result<BoundMethod> {
        let unbound = |e: Error| match e {
            Error::Resolution(reason) => Error::Resolution(format!("{method}: {reason}")),
            other => other,
        };
        let declaring_type = caller.close(&method.declaring_type).map_err(unbound)?;
        let generic_args = method
            .generic_args
            .iter()
            .map(|arg| caller.close(arg))
            .collect::<Result<Vec<_>>>()
            .map_err(unbound)?;
        let context = GenericContext::new(declaring_type.args().to_vec(), generic_args.clone());
        let parameters = method
            .parameters
            .iter()
            .map(|param| context.close(param))
            .collect::<Result<Vec<_>>>()
            .map_err(unbound)?;
        let return_type = method
            .return_type
            .as_ref()
            .map(|ty| context.close(ty))
            .transpose()
            .map_err(unbound)?;
        Ok(BoundMethod {
            signature: Signature {
                declaring_type,
                name: method.name.clone(),
                generic_args,
                parameters,
            },
            definition: method.definition(),
            context,
            return_type,
        })
    }

    /// The host implementation of a bound method, looked up by its open
    /// definition, then by its closed signature.
    pub fn native(&self, bound: &BoundMethod) -> Option<Arc<MethodDef>> {
        let key = bound.signature.to_string();
        if let Some(hit) = self.methods.read().get(&key) {
            return hit.clone();
        }
        let found = self
            .symbols
            .find_method(&bound.definition.to_string())
            .or_else(|| self.symbols.find_method(&key))
            .cloned();
        self.methods.write().insert(key, found.clone());
        found
    }

    pub fn resolve_native(&self, bound: &BoundMethod) -> Result<Arc<MethodDef>> {
        self.native(bound)
            .ok_or_else(|| Error::Resolution(bound.signature.to_string()))
    }

    /// Close a field reference and find its accessor. A field with no
    /// registered accessor still resolves when its declaring type does.
    pub fn resolve_field(&self, field: &FieldRef, caller: &GenericContext) -> Result<FieldHandle> {
        let closed = field
            .substitute(&caller.type_args, &caller.method_args)
            .map_err(|e| Error::Resolution(format!("{field}: {e}")))?;
        let def = self
            .symbols
            .find_field(&field_key(&closed.declaring_type, &closed.name))
            .or_else(|| self.symbols.find_field(&closed.key()))
            .cloned();
        if def.is_none() {
            self.resolve_type(&closed.declaring_type)
                .map_err(|_| Error::Resolution(closed.to_string()))?;
        }
        Ok(FieldHandle {
            key: closed.key(),
            name: closed.name,
            declaring_type: closed.declaring_type,
            field_type: closed.field_type,
            def,
        })
    }

    /// Initial value of a local or field of type `ty`.
    pub fn default_value(&self, ty: &TypeName) -> Result<Value> {
        match ty {
            TypeName::Named { .. } => Ok(self.resolve_type(ty)?.default_value()),
            _ => Ok(Value::Null),
        }
    }

    /// The canonical signature of a host method instantiated with
    /// `context`: the inverse of [`Resolver::bind_method`].
    pub fn signature_of(&self, def: &MethodDef, context: &GenericContext) -> Result<Signature> {
        def.definition()
            .substitute(&context.type_args, &context.method_args)
            .map_err(|e| Error::Resolution(format!("{}: {e}", def.definition())))
    }

    /// Whether `value` is an instance of `target`, following registered
    /// base types.
    pub fn is_instance(&self, value: &Value, target: &TypeHandle) -> bool {
        let name = &target.name;
        let base_name = name.name();
        if base_name == Some("System.Object") {
            return !value.is_null();
        }
        match value {
            Value::Null => false,
            Value::Object(obj) => {
                let mut class = Some(obj.class().clone());
                // bounded walk; base chains are short and must not cycle
                for _ in 0..64 {
                    let Some(current) = class else { break };
                    if &current == name {
                        return true;
                    }
                    class = current
                        .name()
                        .and_then(|n| self.symbols.find_type(n))
                        .and_then(|def| def.base().cloned());
                }
                false
            }
            Value::Array(arr) => match name {
                TypeName::Array(element) => **element == *arr.element(),
                _ => base_name == Some("System.Array"),
            },
            Value::Callable(_) => {
                target.is_delegate()
                    || matches!(base_name, Some("System.Delegate" | "System.MulticastDelegate"))
            }
            Value::Type(_) => base_name == Some("System.RuntimeTypeHandle"),
            Value::Str(_) => base_name == Some("System.String"),
            primitive => {
                base_name == Some("System.ValueType")
                    || base_name.is_some_and(|n| n == primitive.type_name())
            }
        }
    }

    /// `castclass`: null passes, instances pass unchanged, primitives are
    /// converted to the named primitive type.
    pub fn cast(&self, value: Value, target: &TypeHandle) -> Result<Value> {
        if value.is_null() || self.is_instance(&value, target) {
            return Ok(value);
        }
        let invalid = || Error::InvalidCast {
            from: value.type_name(),
            to: target.name.to_string(),
        };
        if value.as_i64().is_none() && !value.is_float() {
            return Err(invalid());
        }
        let conv = match target.name.name() {
            Some("System.Boolean") => {
                return Ok(Value::Bool(!ops::is_falsy(&value) && value.as_f64() != Some(0.0)));
            }
            Some("System.SByte") => Conv::I1,
            Some("System.Byte") => Conv::U1,
            Some("System.Int16") => Conv::I2,
            Some("System.UInt16" | "System.Char") => Conv::U2,
            Some("System.Int32") => Conv::I4,
            Some("System.UInt32") => Conv::U4,
            Some("System.Int64") => Conv::I8,
            Some("System.UInt64") => Conv::U8,
            Some("System.Single") => Conv::R4,
            Some("System.Double") => Conv::R8,
            _ => return Err(invalid()),
        };
        ops::convert(conv, &value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interpreter::NativeCall;
    use crate::symbols::Module;
    use crate::value::Object;

    fn table() -> Arc<SymbolTable> {
        let mut module = Module::new("Game");
        module
            .add_type(TypeDef::value_type("System.Int32", || Value::I32(0)))
            .add_type(TypeDef::class("System.String"))
            .add_type(TypeDef::class("System.Object"))
            .add_type(TypeDef::class("Game.Entity"))
            .add_type(TypeDef::class("Game.Player").with_base(TypeName::named("Game.Entity")))
            .add_type(TypeDef::class("Game.Box`1"));
        module
            .instance_method("!!0 Game.Box`1::Map<!!0>(System.Func`2<!0,!!0>)", |_: &mut NativeCall<'_>| {
                Ok(Value::Null)
            })
            .unwrap();
        let mut table = SymbolTable::new();
        table.register(module);
        Arc::new(table)
    }

    #[test]
    fn binds_type_and_method_placeholders() {
        let resolver = Resolver::new(table());
        let method =
            MethodRef::parse("!!0 Game.Box`1<!0>::Map<!!0>(System.Func`2<!0,!!0>)").unwrap();
        let caller = GenericContext::new(
            vec![TypeName::named("System.String")],
            vec![TypeName::named("System.Int32")],
        );
        let bound = resolver.bind_method(&method, &caller).unwrap();
        assert_eq!(
            bound.signature.to_string(),
            "Game.Box`1<System.String>::Map<System.Int32>(System.Func`2<System.String,System.Int32>)"
        );
        assert_eq!(bound.return_type, Some(TypeName::named("System.Int32")));
        assert_eq!(
            bound.definition.to_string(),
            "Game.Box`1<!0>::Map<!!0>(System.Func`2<!0,!!0>)"
        );

        let def = resolver.resolve_native(&bound).unwrap();
        let back = resolver.signature_of(&def, &bound.context).unwrap();
        assert_eq!(back, bound.signature);
    }

    #[test]
    fn unbound_placeholder_names_the_reference() {
        let resolver = Resolver::new(table());
        let method = MethodRef::parse("System.Void Game.Box`1<!0>::Clear()").unwrap();
        let err = resolver
            .bind_method(&method, &GenericContext::default())
            .unwrap_err();
        match err {
            Error::Resolution(text) => assert!(text.contains("Game.Box`1<!0>::Clear()"), "{text}"),
            other => panic!("expected Resolution, got {other}"),
        }
    }

    #[test]
    fn unknown_type_is_fatal() {
        let resolver = Resolver::new(table());
        let err = resolver.resolve_type_str("Game.Missing").unwrap_err();
        assert!(
            matches!(err, Error::Resolution(ref name) if name == "Game.Missing"),
            "expected Resolution, got {err}"
        );
    }

    #[test]
    fn generic_arity_must_match() {
        let resolver = Resolver::new(table());
        let err = resolver
            .resolve_type_str("Game.Box`1<System.Int32,System.Int32>")
            .unwrap_err();
        assert!(matches!(err, Error::Resolution(_)), "expected Resolution, got {err}");
    }

    #[test]
    fn instance_checks_follow_base_types() {
        let resolver = Resolver::new(table());
        let player = Value::object(Object::new(TypeName::named("Game.Player")));
        let entity = resolver.resolve_type_str("Game.Entity").unwrap();
        let string = resolver.resolve_type_str("System.String").unwrap();
        assert!(resolver.is_instance(&player, &entity));
        assert!(!resolver.is_instance(&player, &string));
        let err = resolver.cast(player, &string).unwrap_err();
        assert!(matches!(err, Error::InvalidCast { .. }), "expected InvalidCast, got {err}");
    }

    #[test]
    fn cast_converts_primitives() {
        let resolver = Resolver::new(table());
        let int = resolver.resolve_type_str("System.Int32").unwrap();
        assert_eq!(resolver.cast(Value::I64(9), &int).unwrap(), Value::I32(9));
        assert_eq!(resolver.cast(Value::Null, &int).unwrap(), Value::Null);
        assert_eq!(resolver.default_value(&TypeName::named("System.Int32")).unwrap(), Value::I32(0));
        assert_eq!(resolver.default_value(&TypeName::named("System.String")).unwrap(), Value::Null);
    }
}
