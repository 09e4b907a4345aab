//! The shared execution context: catalogue, resolver and static field slots.

use std::collections::HashMap;
use std::sync::Arc;

use ilpatch_file::Signature;
use parking_lot::RwLock;

use crate::catalogue::{Catalogue, CatalogueCell};
use crate::error::Result;
use crate::interpreter::ExecContext;
use crate::resolver::{BoundMethod, Resolver};
use crate::symbols::SymbolTable;
use crate::value::Value;

/// Everything an interpreted call needs: the ready catalogue, the host
/// symbols and the static field slots of stored fields.
///
/// An engine is built once the catalogue has finished loading and is
/// shared by reference with every caller.
pub struct Engine {
    catalogue: CatalogueCell,
    resolver: Resolver,
    statics: RwLock<HashMap<String, Value>>,
}

impl Engine {
    pub fn new(catalogue: Catalogue, symbols: SymbolTable) -> Self {
        Self::with_symbols(catalogue, Arc::new(symbols))
    }

    pub fn with_symbols(catalogue: Catalogue, symbols: Arc<SymbolTable>) -> Self {
        Self {
            catalogue: CatalogueCell::new(catalogue),
            resolver: Resolver::new(symbols),
            statics: RwLock::new(HashMap::new()),
        }
    }

    /// The current catalogue. Invocations keep the snapshot they started
    /// with across a concurrent [`Engine::reload`].
    pub fn catalogue(&self) -> Arc<Catalogue> {
        self.catalogue.snapshot()
    }

    /// Replace the whole catalogue, returning the previous one.
    pub fn reload(&self, next: Catalogue) -> Arc<Catalogue> {
        self.catalogue.swap(next)
    }

    pub fn resolver(&self) -> &Resolver {
        &self.resolver
    }

    pub fn symbols(&self) -> &SymbolTable {
        self.resolver.symbols()
    }

    /// Call a method by closed signature, interpreting it when patched.
    pub fn invoke(
        &self,
        signature: &Signature,
        receiver: Option<Value>,
        args: Vec<Value>,
    ) -> Result<Value> {
        let cx = ExecContext::new(self);
        let method = cx.bind(BoundMethod::from_signature(signature, None))?;
        cx.call(&method, receiver, args)
    }

    pub(crate) fn load_static(&self, key: &str) -> Option<Value> {
        self.statics.read().get(key).cloned()
    }

    pub(crate) fn store_static(&self, key: &str, value: Value) {
        self.statics.write().insert(key.to_string(), value);
    }
}
