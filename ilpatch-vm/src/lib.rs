//! Execution engine for patched method bodies.
//!
//! A host registers its symbols in a [`SymbolTable`], loads the published
//! [`Catalogue`] of descriptors, and builds an [`Engine`] from both.
//! Rewritten call sites then ask a [`Redirector`] whether they are patched
//! and, if so, run the interpreted body instead of their own.

pub mod catalogue;
pub mod corelib;
pub mod engine;
pub mod error;
pub mod interpreter;
pub mod ops;
pub mod redirector;
pub mod resolver;
pub mod symbols;
pub mod value;

pub use catalogue::{
    Catalogue, CatalogueBuilder, CatalogueCell, DescriptorSource, DirSource, LoadHandle,
    LoadOptions, Loader, MemorySource, load,
};
pub use engine::Engine;
pub use error::{Error, Result};
pub use interpreter::{ExecContext, Method, NativeCall, Target};
pub use redirector::{CallSite, Redirector};
pub use resolver::{BoundMethod, FieldHandle, GenericContext, Resolver, TypeHandle};
pub use symbols::{FieldDef, MethodDef, Module, NativeFn, SymbolTable, TypeDef, TypeKind};
pub use value::{Array, ArrayRef, Callable, FromValue, Object, ObjectRef, Value, ValueKind};
