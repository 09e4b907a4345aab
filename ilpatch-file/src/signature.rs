//! Method and field references.
//!
//! A [`Signature`] is the canonical identity of a method:
//! `Decl::Name<M1,M2>(P1,P2)`. The method argument list is present only for
//! generic methods. Operands in descriptors carry the longer reference form
//! with a leading return type (`System.Int32 Decl::Name(P1)`), parsed by
//! [`MethodRef`]; field operands read `FieldType Decl::name` ([`FieldRef`]).

use std::fmt;

use crate::error::{Error, Result};
use crate::type_name::{Cursor, TypeName, write_list};

/// Canonical method identity, the catalogue key.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Signature {
    pub declaring_type: TypeName,
    pub name: String,
    pub generic_args: Vec<TypeName>,
    pub parameters: Vec<TypeName>,
}

impl Signature {
    pub fn new(declaring_type: TypeName, name: impl Into<String>) -> Self {
        Self {
            declaring_type,
            name: name.into(),
            generic_args: Vec::new(),
            parameters: Vec::new(),
        }
    }

    pub fn with_parameters(mut self, parameters: Vec<TypeName>) -> Self {
        self.parameters = parameters;
        self
    }

    pub fn with_generic_args(mut self, generic_args: Vec<TypeName>) -> Self {
        self.generic_args = generic_args;
        self
    }

    /// Parse a signature, dropping a leading return type if present.
    pub fn parse(text: &str) -> Result<Self> {
        Ok(MethodRef::parse(text)?.signature())
    }

    /// Like [`Signature::parse`], also reporting whether a return type was
    /// dropped.
    pub fn parse_lenient(text: &str) -> Result<(Self, bool)> {
        let method = MethodRef::parse(text)?;
        let had_return_type = method.return_type.is_some();
        Ok((method.signature(), had_return_type))
    }

    pub fn has_placeholders(&self) -> bool {
        self.declaring_type.has_placeholders()
            || self.generic_args.iter().any(TypeName::has_placeholders)
            || self.parameters.iter().any(TypeName::has_placeholders)
    }

    pub fn is_generic(&self) -> bool {
        self.declaring_type.is_generic_instance() || !self.generic_args.is_empty()
    }

    /// Bind every placeholder in the signature.
    pub fn substitute(&self, type_args: &[TypeName], method_args: &[TypeName]) -> Result<Self> {
        Ok(Self {
            declaring_type: self.declaring_type.substitute(type_args, method_args)?,
            name: self.name.clone(),
            generic_args: substitute_all(&self.generic_args, type_args, method_args)?,
            parameters: substitute_all(&self.parameters, type_args, method_args)?,
        })
    }
}

impl fmt::Display for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}::{}", self.declaring_type, self.name)?;
        if !self.generic_args.is_empty() {
            f.write_str("<")?;
            write_list(f, &self.generic_args)?;
            f.write_str(">")?;
        }
        f.write_str("(")?;
        write_list(f, &self.parameters)?;
        f.write_str(")")
    }
}

impl std::str::FromStr for Signature {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Signature::parse(s)
    }
}

impl serde::Serialize for Signature {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> serde::Deserialize<'de> for Signature {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let text = String::deserialize(deserializer)?;
        Signature::parse(&text).map_err(serde::de::Error::custom)
    }
}

/// A method reference as it appears in `call`, `newobj` and `ldftn`
/// operands.
///
/// Parameter types are written relative to the method's definition: `!N`
/// refers to the declaring type's parameters and `!!N` to the method's own.
/// The declaring type and method arguments are written relative to the
/// calling method.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct MethodRef {
    pub return_type: Option<TypeName>,
    pub declaring_type: TypeName,
    pub name: String,
    pub generic_args: Vec<TypeName>,
    pub parameters: Vec<TypeName>,
}

impl MethodRef {
    pub fn parse(text: &str) -> Result<Self> {
        let invalid = |err: Error| match err {
            Error::InvalidTypeName { column, reason, .. } => Error::InvalidSignature {
                text: text.to_string(),
                reason: format!("{reason} at column {column}"),
            },
            other => other,
        };
        let mut cursor = Cursor::new(text);
        let (return_type, declaring_type) = leading_types(&mut cursor).map_err(invalid)?;
        let name = cursor.ident().map_err(invalid)?;
        let generic_args = if cursor.peek() == Some('<') {
            cursor.type_list('<', '>').map_err(invalid)?
        } else {
            Vec::new()
        };
        cursor.skip_ws();
        if cursor.peek() != Some('(') {
            return Err(Error::InvalidSignature {
                text: text.to_string(),
                reason: "missing parameter list".into(),
            });
        }
        let parameters = cursor.type_list('(', ')').map_err(invalid)?;
        cursor.finish().map_err(invalid)?;
        Ok(Self {
            return_type,
            declaring_type,
            name,
            generic_args,
            parameters,
        })
    }

    pub fn is_constructor(&self) -> bool {
        self.name == ".ctor" || self.name == ".cctor"
    }

    pub fn returns_void(&self) -> bool {
        self.return_type
            .as_ref()
            .is_none_or(|ty| ty.name() == Some("System.Void"))
    }

    /// The signature exactly as written, placeholders included.
    pub fn signature(&self) -> Signature {
        Signature {
            declaring_type: self.declaring_type.clone(),
            name: self.name.clone(),
            generic_args: self.generic_args.clone(),
            parameters: self.parameters.clone(),
        }
    }

    /// Signature of the open generic definition this reference instantiates:
    /// declaring type arguments become `!N`, method arguments `!!N`, and
    /// parameters stay as written.
    pub fn definition(&self) -> Signature {
        Signature {
            declaring_type: self.declaring_type.definition(),
            name: self.name.clone(),
            generic_args: (0..self.generic_args.len() as u32)
                .map(TypeName::MethodParam)
                .collect(),
            parameters: self.parameters.clone(),
        }
    }
}

impl fmt::Display for MethodRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(ret) = &self.return_type {
            write!(f, "{ret} ")?;
        }
        write!(f, "{}", self.signature())
    }
}

/// A field reference, `FieldType Decl::name`.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct FieldRef {
    pub field_type: Option<TypeName>,
    pub declaring_type: TypeName,
    pub name: String,
}

impl FieldRef {
    pub fn parse(text: &str) -> Result<Self> {
        let invalid = |err: Error| match err {
            Error::InvalidTypeName { column, reason, .. } => Error::InvalidSignature {
                text: text.to_string(),
                reason: format!("{reason} at column {column}"),
            },
            other => other,
        };
        let mut cursor = Cursor::new(text);
        let (field_type, declaring_type) = leading_types(&mut cursor).map_err(invalid)?;
        let name = cursor.ident().map_err(invalid)?;
        cursor.finish().map_err(invalid)?;
        Ok(Self {
            field_type,
            declaring_type,
            name,
        })
    }

    /// `Decl::name`, the key field accessors are registered under.
    pub fn key(&self) -> String {
        format!("{}::{}", self.declaring_type, self.name)
    }

    pub fn substitute(&self, type_args: &[TypeName], method_args: &[TypeName]) -> Result<Self> {
        Ok(Self {
            field_type: self
                .field_type
                .as_ref()
                .map(|ty| ty.substitute(type_args, method_args))
                .transpose()?,
            declaring_type: self.declaring_type.substitute(type_args, method_args)?,
            name: self.name.clone(),
        })
    }
}

impl fmt::Display for FieldRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(ty) = &self.field_type {
            write!(f, "{ty} ")?;
        }
        write!(f, "{}::{}", self.declaring_type, self.name)
    }
}

/// `[Type ws] Decl "::"`. Returns the optional leading type and the
/// declaring type, leaving the cursor after `::`.
fn leading_types(cursor: &mut Cursor<'_>) -> Result<(Option<TypeName>, TypeName)> {
    let first = cursor.type_name()?;
    cursor.skip_ws();
    if cursor.eat_str("::") {
        return Ok((None, first));
    }
    let declaring = cursor.type_name()?;
    cursor.skip_ws();
    if !cursor.eat_str("::") {
        return Err(cursor.error("expected '::'"));
    }
    Ok((Some(first), declaring))
}

fn substitute_all(
    items: &[TypeName],
    type_args: &[TypeName],
    method_args: &[TypeName],
) -> Result<Vec<TypeName>> {
    items
        .iter()
        .map(|item| item.substitute(type_args, method_args))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn canonical_signature_roundtrip() {
        let text = "Game.Calculator::Add(System.Int32,System.Int32)";
        let sig = Signature::parse(text).unwrap();
        assert_eq!(sig.declaring_type, TypeName::named("Game.Calculator"));
        assert_eq!(sig.name, "Add");
        assert_eq!(sig.parameters.len(), 2);
        assert_eq!(sig.to_string(), text);
    }

    #[test]
    fn leading_return_type_is_dropped() {
        let (sig, had_ret) =
            Signature::parse_lenient("System.Int32 Game.Calculator::Add(System.Int32,System.Int32)")
                .unwrap();
        assert!(had_ret);
        assert_eq!(sig.to_string(), "Game.Calculator::Add(System.Int32,System.Int32)");
    }

    #[test]
    fn empty_parameter_list() {
        let sig = Signature::parse("Game.Main::Start()").unwrap();
        assert!(sig.parameters.is_empty());
        assert_eq!(sig.to_string(), "Game.Main::Start()");
    }

    #[test]
    fn generic_method_reference() {
        let text = "!!0 Game.Box`1<System.String>::Map<System.Int32>(System.Func`2<!0,!!0>)";
        let method = MethodRef::parse(text).unwrap();
        assert_eq!(method.return_type, Some(TypeName::MethodParam(0)));
        assert_eq!(method.generic_args, vec![TypeName::named("System.Int32")]);
        assert_eq!(method.to_string(), text);
        assert_eq!(
            method.definition().to_string(),
            "Game.Box`1<!0>::Map<!!0>(System.Func`2<!0,!!0>)"
        );
    }

    #[test]
    fn constructor_reference() {
        let method = MethodRef::parse("System.Void Game.Player::.ctor(System.String)").unwrap();
        assert!(method.is_constructor());
        assert!(method.returns_void());
    }

    #[test]
    fn compiler_generated_method_names() {
        let method =
            MethodRef::parse("System.Void Game.Main/<>c::<Start>b__0_0(System.Int32)").unwrap();
        assert_eq!(method.name, "<Start>b__0_0");
        assert_eq!(method.declaring_type.name(), Some("Game.Main/<>c"));
    }

    #[test]
    fn field_reference() {
        let field = FieldRef::parse("System.Int32 Game.Counter`1<!0>::count").unwrap();
        assert_eq!(field.name, "count");
        let bound = field
            .substitute(&[TypeName::named("System.String")], &[])
            .unwrap();
        assert_eq!(bound.key(), "Game.Counter`1<System.String>::count");
    }

    #[test]
    fn missing_parameter_list_is_rejected() {
        let err = Signature::parse("Game.Main::Start").unwrap_err();
        assert!(
            matches!(err, Error::InvalidSignature { .. }),
            "expected InvalidSignature, got {err}"
        );
    }
}
