//! Type name grammar.
//!
//! ```text
//! type     := ( "!!" digits | "!" digits | name [ "<" type ( "," type )* ">" ] ) suffix*
//! suffix   := "[]" | "&" | "*"
//! ```
//!
//! Generic type definitions carry their arity in the name (`List`1`), and
//! instantiations list their arguments in angle brackets, nested to any
//! depth. `!N` names the Nth generic parameter of the declaring type, `!!N`
//! the Nth generic parameter of the method.
//!
//! Compiler-generated names such as `<>c__DisplayClass0_0` or
//! `<Start>d__0` are accepted: a `<` that opens a name segment is part of
//! the name, not an argument list.

use std::fmt;

use crate::error::{Error, Result};

/// A parsed type reference.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum TypeName {
    /// A named type, with generic arguments when instantiated.
    Named { name: String, args: Vec<TypeName> },
    /// `!N`: generic parameter of the declaring type.
    TypeParam(u32),
    /// `!!N`: generic parameter of the method.
    MethodParam(u32),
    /// `T[]`
    Array(Box<TypeName>),
    /// `T&`
    ByRef(Box<TypeName>),
    /// `T*`
    Pointer(Box<TypeName>),
}

impl TypeName {
    pub fn named(name: impl Into<String>) -> Self {
        TypeName::Named {
            name: name.into(),
            args: Vec::new(),
        }
    }

    pub fn generic(name: impl Into<String>, args: Vec<TypeName>) -> Self {
        TypeName::Named {
            name: name.into(),
            args,
        }
    }

    pub fn array_of(element: TypeName) -> Self {
        TypeName::Array(Box::new(element))
    }

    pub fn parse(text: &str) -> Result<Self> {
        let mut cursor = Cursor::new(text);
        let ty = cursor.type_name()?;
        cursor.finish()?;
        Ok(ty)
    }

    /// Base name without arguments, for named types.
    pub fn name(&self) -> Option<&str> {
        match self {
            TypeName::Named { name, .. } => Some(name),
            _ => None,
        }
    }

    pub fn args(&self) -> &[TypeName] {
        match self {
            TypeName::Named { args, .. } => args,
            _ => &[],
        }
    }

    /// Declared generic arity, read from the `` `N `` suffix of the name.
    pub fn arity(&self) -> usize {
        self.name()
            .and_then(|name| name.rsplit_once('`'))
            .and_then(|(_, digits)| digits.parse().ok())
            .unwrap_or(0)
    }

    pub fn is_generic_instance(&self) -> bool {
        !self.args().is_empty()
    }

    /// Element type of an array, by-ref or pointer type.
    pub fn element(&self) -> Option<&TypeName> {
        match self {
            TypeName::Array(inner) | TypeName::ByRef(inner) | TypeName::Pointer(inner) => {
                Some(inner)
            }
            _ => None,
        }
    }

    /// The open generic definition: `List`1<System.Int32>` becomes
    /// `List`1<!0>`. Non-generic names are returned unchanged.
    pub fn definition(&self) -> TypeName {
        match self {
            TypeName::Named { name, .. } => {
                let arity = self.arity().max(self.args().len());
                TypeName::Named {
                    name: name.clone(),
                    args: (0..arity as u32).map(TypeName::TypeParam).collect(),
                }
            }
            other => other.clone(),
        }
    }

    /// Whether any `!N` or `!!N` token occurs in this name.
    pub fn has_placeholders(&self) -> bool {
        match self {
            TypeName::TypeParam(_) | TypeName::MethodParam(_) => true,
            TypeName::Named { args, .. } => args.iter().any(TypeName::has_placeholders),
            TypeName::Array(inner) | TypeName::ByRef(inner) | TypeName::Pointer(inner) => {
                inner.has_placeholders()
            }
        }
    }

    /// Replace `!N` with `type_args[N]` and `!!N` with `method_args[N]`.
    pub fn substitute(&self, type_args: &[TypeName], method_args: &[TypeName]) -> Result<TypeName> {
        Ok(match self {
            TypeName::TypeParam(index) => type_args
                .get(*index as usize)
                .cloned()
                .ok_or_else(|| Error::UnboundPlaceholder(self.to_string()))?,
            TypeName::MethodParam(index) => method_args
                .get(*index as usize)
                .cloned()
                .ok_or_else(|| Error::UnboundPlaceholder(self.to_string()))?,
            TypeName::Named { name, args } => TypeName::Named {
                name: name.clone(),
                args: args
                    .iter()
                    .map(|arg| arg.substitute(type_args, method_args))
                    .collect::<Result<_>>()?,
            },
            TypeName::Array(inner) => {
                TypeName::Array(Box::new(inner.substitute(type_args, method_args)?))
            }
            TypeName::ByRef(inner) => {
                TypeName::ByRef(Box::new(inner.substitute(type_args, method_args)?))
            }
            TypeName::Pointer(inner) => {
                TypeName::Pointer(Box::new(inner.substitute(type_args, method_args)?))
            }
        })
    }
}

impl fmt::Display for TypeName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TypeName::Named { name, args } => {
                f.write_str(name)?;
                if !args.is_empty() {
                    f.write_str("<")?;
                    write_list(f, args)?;
                    f.write_str(">")?;
                }
                Ok(())
            }
            TypeName::TypeParam(index) => write!(f, "!{index}"),
            TypeName::MethodParam(index) => write!(f, "!!{index}"),
            TypeName::Array(inner) => write!(f, "{inner}[]"),
            TypeName::ByRef(inner) => write!(f, "{inner}&"),
            TypeName::Pointer(inner) => write!(f, "{inner}*"),
        }
    }
}

impl std::str::FromStr for TypeName {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        TypeName::parse(s)
    }
}

impl TryFrom<String> for TypeName {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        TypeName::parse(&value)
    }
}

impl From<TypeName> for String {
    fn from(value: TypeName) -> Self {
        value.to_string()
    }
}

impl serde::Serialize for TypeName {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> serde::Deserialize<'de> for TypeName {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let text = String::deserialize(deserializer)?;
        TypeName::parse(&text).map_err(serde::de::Error::custom)
    }
}

pub(crate) fn write_list(f: &mut fmt::Formatter<'_>, items: &[TypeName]) -> fmt::Result {
    for (i, item) in items.iter().enumerate() {
        if i > 0 {
            f.write_str(",")?;
        }
        write!(f, "{item}")?;
    }
    Ok(())
}

/// Hand-written scanner shared by the type, method and field grammars.
pub(crate) struct Cursor<'a> {
    text: &'a str,
    pos: usize,
}

impl<'a> Cursor<'a> {
    pub(crate) fn new(text: &'a str) -> Self {
        Self { text, pos: 0 }
    }

    pub(crate) fn rest(&self) -> &'a str {
        &self.text[self.pos..]
    }

    pub(crate) fn peek(&self) -> Option<char> {
        self.rest().chars().next()
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.peek()?;
        self.pos += c.len_utf8();
        Some(c)
    }

    pub(crate) fn eat(&mut self, c: char) -> bool {
        if self.peek() == Some(c) {
            self.pos += c.len_utf8();
            true
        } else {
            false
        }
    }

    pub(crate) fn eat_str(&mut self, s: &str) -> bool {
        if self.rest().starts_with(s) {
            self.pos += s.len();
            true
        } else {
            false
        }
    }

    pub(crate) fn skip_ws(&mut self) -> bool {
        let start = self.pos;
        while let Some(c) = self.peek().filter(|c| c.is_whitespace()) {
            self.pos += c.len_utf8();
        }
        self.pos != start
    }

    pub(crate) fn at_end(&self) -> bool {
        self.pos >= self.text.len()
    }

    pub(crate) fn error(&self, reason: impl Into<String>) -> Error {
        Error::InvalidTypeName {
            text: self.text.to_string(),
            column: self.pos,
            reason: reason.into(),
        }
    }

    pub(crate) fn expect(&mut self, c: char) -> Result<()> {
        if self.eat(c) {
            Ok(())
        } else {
            Err(self.error(format!("expected '{c}'")))
        }
    }

    pub(crate) fn finish(&mut self) -> Result<()> {
        self.skip_ws();
        if self.at_end() {
            Ok(())
        } else {
            Err(self.error("trailing characters"))
        }
    }

    fn digits(&mut self) -> Result<u32> {
        let start = self.pos;
        while self.peek().is_some_and(|c| c.is_ascii_digit()) {
            self.pos += 1;
        }
        self.text[start..self.pos]
            .parse()
            .map_err(|_| self.error("expected placeholder index"))
    }

    /// A name: everything up to a delimiter, with `<...>` allowed at the
    /// start of a segment.
    pub(crate) fn ident(&mut self) -> Result<String> {
        let start = self.pos;
        loop {
            let segment_start = self.pos == start
                || matches!(self.text[..self.pos].chars().last(), Some('.' | '/'));
            match self.peek() {
                Some('<') if segment_start => self.generated_segment()?,
                Some(c) if is_name_char(c) => {
                    self.bump();
                }
                _ => break,
            }
        }
        if self.pos == start {
            return Err(self.error("expected a name"));
        }
        Ok(self.text[start..self.pos].to_string())
    }

    fn generated_segment(&mut self) -> Result<()> {
        let mut depth = 0usize;
        while let Some(c) = self.bump() {
            match c {
                '<' => depth += 1,
                '>' => {
                    depth -= 1;
                    if depth == 0 {
                        return Ok(());
                    }
                }
                _ => {}
            }
        }
        Err(self.error("unterminated '<' in name"))
    }

    pub(crate) fn type_name(&mut self) -> Result<TypeName> {
        self.skip_ws();
        let mut ty = if self.eat_str("!!") {
            TypeName::MethodParam(self.digits()?)
        } else if self.eat('!') {
            TypeName::TypeParam(self.digits()?)
        } else {
            let name = self.ident()?;
            let args = if self.peek() == Some('<') {
                self.type_list('<', '>')?
            } else {
                Vec::new()
            };
            TypeName::Named { name, args }
        };
        loop {
            if self.eat_str("[]") {
                ty = TypeName::Array(Box::new(ty));
            } else if self.eat('&') {
                ty = TypeName::ByRef(Box::new(ty));
            } else if self.eat('*') {
                ty = TypeName::Pointer(Box::new(ty));
            } else if self.peek() == Some('[') {
                return Err(self.error("only single-dimension arrays are supported"));
            } else {
                return Ok(ty);
            }
        }
    }

    /// `open type ("," type)* close`, or an empty pair.
    pub(crate) fn type_list(&mut self, open: char, close: char) -> Result<Vec<TypeName>> {
        self.expect(open)?;
        let mut items = Vec::new();
        self.skip_ws();
        if self.eat(close) {
            return Ok(items);
        }
        loop {
            items.push(self.type_name()?);
            self.skip_ws();
            if self.eat(',') {
                continue;
            }
            if self.eat(close) {
                return Ok(items);
            }
            return Err(self.error(format!("expected ',' or '{close}'")));
        }
    }
}

fn is_name_char(c: char) -> bool {
    !c.is_whitespace() && !matches!(c, '<' | '>' | ',' | '(' | ')' | '[' | ']' | '&' | '*' | ':')
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roundtrip(text: &str) {
        let ty = TypeName::parse(text).unwrap();
        assert_eq!(ty.to_string(), text, "display of parsed '{text}'");
    }

    #[test]
    fn plain_names() {
        let ty = TypeName::parse("System.Int32").unwrap();
        assert_eq!(ty, TypeName::named("System.Int32"));
        roundtrip("Game.Player/Inventory");
    }

    #[test]
    fn nested_generic_arguments_are_not_split_naively() {
        let text = "System.Collections.Generic.Dictionary`2<System.String,System.Collections.Generic.List`1<System.Int32>>";
        let ty = TypeName::parse(text).unwrap();
        assert_eq!(ty.args().len(), 2, "got {ty:?}");
        assert_eq!(ty.args()[1].args(), &[TypeName::named("System.Int32")]);
        assert_eq!(ty.arity(), 2);
        roundtrip(text);
    }

    #[test]
    fn placeholders_and_suffixes() {
        let ty = TypeName::parse("System.Func`2<!0,!!1[]>&").unwrap();
        assert!(ty.has_placeholders());
        let TypeName::ByRef(inner) = &ty else {
            panic!("expected by-ref, got {ty:?}");
        };
        assert_eq!(inner.args()[0], TypeName::TypeParam(0));
        assert_eq!(
            inner.args()[1],
            TypeName::array_of(TypeName::MethodParam(1))
        );
        roundtrip("System.Func`2<!0,!!1[]>&");
    }

    #[test]
    fn whitespace_after_commas_is_tolerated() {
        let ty = TypeName::parse("System.Tuple`2<System.Int32, System.String>").unwrap();
        assert_eq!(ty.to_string(), "System.Tuple`2<System.Int32,System.String>");
    }

    #[test]
    fn compiler_generated_names() {
        roundtrip("Game.Main/<>c__DisplayClass0_0");
        roundtrip("Game.Main/<Start>d__0");
        let ty = TypeName::parse("System.Action`1<Game.Main/<>c>").unwrap();
        assert_eq!(ty.args()[0].name(), Some("Game.Main/<>c"));
    }

    #[test]
    fn substitute_binds_both_namespaces() {
        let ty = TypeName::parse("System.Collections.Generic.KeyValuePair`2<!0,!!0>").unwrap();
        let bound = ty
            .substitute(
                &[TypeName::named("System.String")],
                &[TypeName::named("System.Int64")],
            )
            .unwrap();
        assert_eq!(
            bound.to_string(),
            "System.Collections.Generic.KeyValuePair`2<System.String,System.Int64>"
        );
        assert!(!bound.has_placeholders());
    }

    #[test]
    fn unbound_placeholder_is_reported() {
        let err = TypeName::TypeParam(2).substitute(&[], &[]).unwrap_err();
        assert!(
            matches!(err, Error::UnboundPlaceholder(ref p) if p == "!2"),
            "expected UnboundPlaceholder, got {err}"
        );
    }

    #[test]
    fn definition_reopens_instantiation() {
        let ty = TypeName::parse("Game.Box`1<System.Int32>").unwrap();
        assert_eq!(ty.definition().to_string(), "Game.Box`1<!0>");
        let bare = TypeName::parse("Game.Box`1").unwrap();
        assert_eq!(bare.definition().to_string(), "Game.Box`1<!0>");
    }

    #[test]
    fn malformed_names_are_rejected() {
        for text in ["", "List`1<System.Int32", "A<>>", "System.Int32[,]", "!x", "A B"] {
            let err = TypeName::parse(text).unwrap_err();
            assert!(
                matches!(err, Error::InvalidTypeName { .. }),
                "'{text}': expected InvalidTypeName, got {err}"
            );
        }
    }
}
