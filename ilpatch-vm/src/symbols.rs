//! The host symbol table.
//!
//! Host code registers, ahead of time, every type, method and field that
//! patched bodies may touch. Entries are grouped into [`Module`]s and the
//! table searches modules in registration order, first match wins.
//!
//! Methods and fields are keyed by their open definition: a method
//! registered as `System.Void Game.Box`1::Set(!0)` answers calls on every
//! instantiation of `Game.Box`1`.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use ilpatch_file::{FieldRef, MethodRef, Signature, TypeName};

use crate::error::{Error, Result};
use crate::interpreter::NativeCall;
use crate::value::{Object, Value};

/// A host method implementation.
pub type NativeFn = Arc<dyn Fn(&mut NativeCall<'_>) -> Result<Value> + Send + Sync>;
/// Reads a field. Static accessors receive [`Value::Null`].
pub type FieldGetter = Arc<dyn Fn(&Value) -> Result<Value> + Send + Sync>;
pub type FieldSetter = Arc<dyn Fn(&Value, Value) -> Result<()> + Send + Sync>;
pub type DefaultFn = Arc<dyn Fn() -> Value + Send + Sync>;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TypeKind {
    Class,
    ValueType,
    Interface,
    /// `System.Action`, `System.Func`2` and other callable types.
    Delegate,
}

#[derive(Clone)]
pub struct TypeDef {
    name: String,
    kind: TypeKind,
    base: Option<TypeName>,
    default: Option<DefaultFn>,
}

impl TypeDef {
    fn new(name: impl Into<String>, kind: TypeKind) -> Self {
        Self {
            name: name.into(),
            kind,
            base: None,
            default: None,
        }
    }

    pub fn class(name: impl Into<String>) -> Self {
        Self::new(name, TypeKind::Class)
    }

    pub fn interface(name: impl Into<String>) -> Self {
        Self::new(name, TypeKind::Interface)
    }

    pub fn delegate(name: impl Into<String>) -> Self {
        Self::new(name, TypeKind::Delegate)
    }

    /// A value type whose locals start out as `default()`.
    pub fn value_type<F>(name: impl Into<String>, default: F) -> Self
    where
        F: Fn() -> Value + Send + Sync + 'static,
    {
        Self {
            default: Some(Arc::new(default)),
            ..Self::new(name, TypeKind::ValueType)
        }
    }

    /// A value type with no registered default; fresh instances are empty
    /// objects of the type.
    pub fn structure(name: impl Into<String>) -> Self {
        Self::new(name, TypeKind::ValueType)
    }

    pub fn with_base(mut self, base: TypeName) -> Self {
        self.base = Some(base);
        self
    }

    /// Definition name, `` `N `` suffix included for generic types.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> TypeKind {
        self.kind
    }

    pub fn base(&self) -> Option<&TypeName> {
        self.base.as_ref()
    }

    pub fn is_value_type(&self) -> bool {
        self.kind == TypeKind::ValueType
    }

    pub fn is_delegate(&self) -> bool {
        self.kind == TypeKind::Delegate
    }

    /// Initial content of a local or field of the closed type `closed`.
    pub fn default_value(&self, closed: &TypeName) -> Value {
        match (self.kind, &self.default) {
            (TypeKind::ValueType, Some(default)) => default(),
            (TypeKind::ValueType, None) => Value::object(Object::new(closed.clone())),
            _ => Value::Null,
        }
    }
}

impl fmt::Debug for TypeDef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TypeDef")
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("base", &self.base.as_ref().map(ToString::to_string))
            .finish()
    }
}

/// A registered host method.
#[derive(Clone)]
pub struct MethodDef {
    definition: Signature,
    return_type: TypeName,
    is_static: bool,
    imp: NativeFn,
}

impl MethodDef {
    /// Open definition signature, the registration key.
    pub fn definition(&self) -> &Signature {
        &self.definition
    }

    pub fn return_type(&self) -> &TypeName {
        &self.return_type
    }

    pub fn is_static(&self) -> bool {
        self.is_static
    }

    pub fn returns_void(&self) -> bool {
        self.return_type.name() == Some("System.Void")
    }

    pub fn call(&self, call: &mut NativeCall<'_>) -> Result<Value> {
        (self.imp)(call)
    }
}

impl fmt::Debug for MethodDef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MethodDef")
            .field("definition", &self.definition.to_string())
            .field("return_type", &self.return_type.to_string())
            .field("is_static", &self.is_static)
            .finish_non_exhaustive()
    }
}

#[derive(Clone)]
pub struct FieldDef {
    is_static: bool,
    get: FieldGetter,
    set: Option<FieldSetter>,
}

impl FieldDef {
    pub fn is_static(&self) -> bool {
        self.is_static
    }

    pub fn get(&self, target: &Value) -> Result<Value> {
        (self.get)(target)
    }

    pub fn set(&self, key: &str, target: &Value, value: Value) -> Result<()> {
        match &self.set {
            Some(set) => set(target, value),
            None => Err(Error::Native(format!("field '{key}' is read-only"))),
        }
    }
}

impl fmt::Debug for FieldDef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FieldDef")
            .field("is_static", &self.is_static)
            .field("writable", &self.set.is_some())
            .finish()
    }
}

/// One searchable unit of host symbols, the analogue of an assembly.
#[derive(Default)]
pub struct Module {
    name: String,
    types: HashMap<String, Arc<TypeDef>>,
    methods: HashMap<String, Arc<MethodDef>>,
    fields: HashMap<String, Arc<FieldDef>>,
}

impl Module {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn add_type(&mut self, def: TypeDef) -> &mut Self {
        self.types.insert(def.name.clone(), Arc::new(def));
        self
    }

    /// Register a static method from its full reference,
    /// `ReturnType Decl::Name(P1,P2)`.
    pub fn static_method<F>(&mut self, reference: &str, imp: F) -> Result<&mut Self>
    where
        F: Fn(&mut NativeCall<'_>) -> Result<Value> + Send + Sync + 'static,
    {
        self.add_method(reference, true, Arc::new(imp))
    }

    /// Register an instance method. Constructors (`.ctor`) are instance
    /// methods that receive a null receiver and return the new object.
    pub fn instance_method<F>(&mut self, reference: &str, imp: F) -> Result<&mut Self>
    where
        F: Fn(&mut NativeCall<'_>) -> Result<Value> + Send + Sync + 'static,
    {
        self.add_method(reference, false, Arc::new(imp))
    }

    fn add_method(&mut self, reference: &str, is_static: bool, imp: NativeFn) -> Result<&mut Self> {
        let method = MethodRef::parse(reference)?;
        let return_type = method.return_type.clone().ok_or_else(|| {
            ilpatch_file::Error::InvalidSignature {
                text: reference.to_string(),
                reason: "missing return type".into(),
            }
        })?;
        let definition = method.definition();
        let key = definition.to_string();
        if self.methods.contains_key(&key) {
            return Err(Error::DuplicateSignature(key));
        }
        log::trace!("{}: registered {key}", self.name);
        self.methods.insert(
            key,
            Arc::new(MethodDef {
                definition,
                return_type,
                is_static,
                imp,
            }),
        );
        Ok(self)
    }

    /// Register a field accessor from `FieldType Decl::name`. A field with
    /// no setter rejects stores.
    pub fn field<G>(
        &mut self,
        reference: &str,
        is_static: bool,
        get: G,
        set: Option<FieldSetter>,
    ) -> Result<&mut Self>
    where
        G: Fn(&Value) -> Result<Value> + Send + Sync + 'static,
    {
        let field = FieldRef::parse(reference)?;
        let key = field_key(&field.declaring_type, &field.name);
        self.fields.insert(
            key,
            Arc::new(FieldDef {
                is_static,
                get: Arc::new(get),
                set,
            }),
        );
        Ok(self)
    }
}

/// Registration key of a field: `Decl::name` on the open declaring type.
pub(crate) fn field_key(declaring_type: &TypeName, name: &str) -> String {
    format!("{}::{name}", declaring_type.definition())
}

/// Registered modules, searched in order.
#[derive(Default)]
pub struct SymbolTable {
    modules: Vec<Module>,
}

impl SymbolTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, module: Module) -> &mut Self {
        log::debug!(
            "registered module {} ({} types, {} methods, {} fields)",
            module.name,
            module.types.len(),
            module.methods.len(),
            module.fields.len()
        );
        self.modules.push(module);
        self
    }

    pub fn modules(&self) -> impl Iterator<Item = &Module> {
        self.modules.iter()
    }

    /// Type definition by base name (`Game.Box`1`, no argument list).
    pub fn find_type(&self, name: &str) -> Option<&Arc<TypeDef>> {
        self.modules.iter().find_map(|m| m.types.get(name))
    }

    /// Method by canonical signature text.
    pub fn find_method(&self, key: &str) -> Option<&Arc<MethodDef>> {
        self.modules.iter().find_map(|m| m.methods.get(key))
    }

    /// Field by `Decl::name`, declaring type in definition form.
    pub fn find_field(&self, key: &str) -> Option<&Arc<FieldDef>> {
        self.modules.iter().find_map(|m| m.fields.get(key))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn noop(_: &mut NativeCall<'_>) -> Result<Value> {
        Ok(Value::Null)
    }

    #[test]
    fn methods_are_keyed_by_definition() {
        let mut module = Module::new("Game");
        module
            .instance_method("System.Void Game.Box`1<System.Int32>::Set(!0)", noop)
            .unwrap();
        let mut table = SymbolTable::new();
        table.register(module);
        let def = table.find_method("Game.Box`1<!0>::Set(!0)").unwrap();
        assert!(!def.is_static());
        assert!(def.returns_void());
    }

    #[test]
    fn first_module_wins() {
        let mut first = Module::new("first");
        first.add_type(TypeDef::class("Game.Player"));
        let mut second = Module::new("second");
        second.add_type(TypeDef::structure("Game.Player"));
        let mut table = SymbolTable::new();
        table.register(first).register(second);
        assert!(!table.find_type("Game.Player").unwrap().is_value_type());
    }

    #[test]
    fn duplicate_method_is_rejected() {
        let mut module = Module::new("Game");
        module.static_method("System.Void Game.Main::Run()", noop).unwrap();
        let err = module
            .static_method("System.Void Game.Main::Run()", noop)
            .map(|_| ())
            .unwrap_err();
        assert!(
            matches!(err, Error::DuplicateSignature(ref key) if key == "Game.Main::Run()"),
            "expected DuplicateSignature, got {err}"
        );
    }

    #[test]
    fn method_without_return_type_is_rejected() {
        let mut module = Module::new("Game");
        let err = module
            .static_method("Game.Main::Run()", noop)
            .map(|_| ())
            .unwrap_err();
        assert!(matches!(err, Error::File(_)), "expected File error, got {err}");
    }

    #[test]
    fn value_type_defaults() {
        let int = TypeDef::value_type("System.Int32", || Value::I32(0));
        assert_eq!(int.default_value(&TypeName::named("System.Int32")), Value::I32(0));
        let point = TypeDef::structure("Game.Point");
        let value = point.default_value(&TypeName::named("Game.Point"));
        assert_eq!(value.type_name(), "Game.Point");
        assert_eq!(TypeDef::class("Game.Player").default_value(&TypeName::named("Game.Player")), Value::Null);
    }
}
