//! Entry points for rewritten call sites.
//!
//! A patched host method starts with a probe: if [`Redirector::is_patched`]
//! answers true, the method forwards its receiver and arguments to
//! [`Redirector::invoke`] (or [`Redirector::invoke_void`]) and returns what
//! the interpreter produced.

use std::sync::Arc;

use ilpatch_file::{Signature, TypeName};

use crate::engine::Engine;
use crate::error::{Error, Result};
use crate::interpreter::ExecContext;
use crate::resolver::BoundMethod;
use crate::value::{FromValue, Value};

/// Identity of an interceptable method.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CallSite {
    signature: Signature,
    definition_params: Option<Vec<TypeName>>,
}

impl CallSite {
    pub fn new(declaring_type: TypeName, name: impl Into<String>, parameters: Vec<TypeName>) -> Self {
        Self::from_signature(Signature::new(declaring_type, name).with_parameters(parameters))
    }

    pub fn from_signature(signature: Signature) -> Self {
        Self {
            signature,
            definition_params: None,
        }
    }

    pub fn parse(text: &str) -> Result<Self> {
        Ok(Self::from_signature(Signature::parse(text)?))
    }

    /// Arguments of a generic method instantiation.
    pub fn with_generic_args(mut self, args: Vec<TypeName>) -> Self {
        self.signature.generic_args = args;
        self
    }

    /// Parameters as declared on the open definition, for call sites whose
    /// parameter types mention generic parameters.
    pub fn with_definition_params(mut self, params: Vec<TypeName>) -> Self {
        self.definition_params = Some(params);
        self
    }

    pub fn signature(&self) -> &Signature {
        &self.signature
    }

    fn bind(&self) -> BoundMethod {
        BoundMethod::from_signature(&self.signature, self.definition_params.as_deref())
    }
}

#[derive(Clone)]
pub struct Redirector {
    engine: Arc<Engine>,
}

impl Redirector {
    pub fn new(engine: Arc<Engine>) -> Self {
        Self { engine }
    }

    pub fn engine(&self) -> &Arc<Engine> {
        &self.engine
    }

    pub fn is_patched(&self, site: &CallSite) -> bool {
        let catalogue = self.engine.catalogue();
        site.bind().keys().iter().any(|key| catalogue.contains(key))
    }

    /// Interpret the patched body of `site`. A site with no descriptor is a
    /// [`Error::MissingDescriptor`]; there is no fallback to host code.
    pub fn invoke<R: FromValue>(
        &self,
        site: &CallSite,
        receiver: Option<Value>,
        args: Vec<Value>,
    ) -> Result<R> {
        let cx = ExecContext::new(&self.engine);
        let bound = site.bind();
        let descriptor = bound
            .keys()
            .iter()
            .find_map(|key| cx.catalogue().get(key).cloned())
            .ok_or_else(|| Error::MissingDescriptor(site.signature.to_string()))?;

        let mut slots = Vec::with_capacity(args.len() + 1);
        if !descriptor.is_static {
            slots.push(receiver.unwrap_or_default());
        }
        slots.extend(args);
        R::from_value(cx.run(&descriptor, bound.context, slots)?)
    }

    pub fn invoke_void(
        &self,
        site: &CallSite,
        receiver: Option<Value>,
        args: Vec<Value>,
    ) -> Result<()> {
        self.invoke::<()>(site, receiver, args)
    }
}
