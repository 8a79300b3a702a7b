//! Typed attribute values and the registry of well-known attribute kinds.
//!
//! Every chapter carries an [`Attributes`] map of [`Variant`] values. A
//! process-wide [`TypeRegistry`] pins the kind of well-known names such as
//! `title` or `date`; names that are not registered accept any kind.
//!
//! ```
//! use pmab::variant::{Attributes, Variant};
//!
//! let mut attrs = Attributes::new();
//! assert!(attrs.set("date", "not-a-date-string").is_err());
//! assert!(attrs.set("some-unregistered-key", 42).is_ok());
//! assert_eq!(attrs.get_as("some-unregistered-key", 0_i64).unwrap(), 42);
//! ```

use std::collections::HashMap;
use std::fmt;
use std::sync::{LazyLock, PoisonError, RwLock};

use time::PrimitiveDateTime;

use crate::flob::Flob;
use crate::locale::Locale;
use crate::text::Text;

/// The kind of a [`Variant`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Kind {
    String,
    Text,
    Date,
    Locale,
    Integer,
    Real,
    Boolean,
    Flob,
}

impl fmt::Display for Kind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::String => "string",
            Self::Text => "text",
            Self::Date => "date",
            Self::Locale => "locale",
            Self::Integer => "integer",
            Self::Real => "real",
            Self::Boolean => "boolean",
            Self::Flob => "flob",
        };
        f.write_str(name)
    }
}

/// A tagged attribute value.
#[derive(Clone, Debug)]
pub enum Variant {
    String(String),
    Text(Text),
    Date(PrimitiveDateTime),
    Locale(Locale),
    Integer(i64),
    Real(f64),
    Boolean(bool),
    Flob(Flob),
}

impl Variant {
    pub fn kind(&self) -> Kind {
        match self {
            Self::String(_) => Kind::String,
            Self::Text(_) => Kind::Text,
            Self::Date(_) => Kind::Date,
            Self::Locale(_) => Kind::Locale,
            Self::Integer(_) => Kind::Integer,
            Self::Real(_) => Kind::Real,
            Self::Boolean(_) => Kind::Boolean,
            Self::Flob(_) => Kind::Flob,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }
}

macro_rules! variant_from {
    ($($ty:ty => $kind:ident),* $(,)?) => {
        $(
            impl From<$ty> for Variant {
                fn from(v: $ty) -> Self {
                    Self::$kind(v.into())
                }
            }
        )*
    };
}

variant_from! {
    String => String,
    &str => String,
    Text => Text,
    PrimitiveDateTime => Date,
    Locale => Locale,
    i64 => Integer,
    i32 => Integer,
    u32 => Integer,
    f64 => Real,
    bool => Boolean,
    Flob => Flob,
}

/// Conversion out of a [`Variant`] of exactly one kind.
///
/// There is no coercion between kinds: asking for a date stored as a
/// string fails instead of parsing it.
pub trait FromVariant: Sized {
    const KIND: Kind;

    fn from_variant(value: &Variant) -> Option<Self>;
}

macro_rules! from_variant {
    ($($ty:ty => $kind:ident),* $(,)?) => {
        $(
            impl FromVariant for $ty {
                const KIND: Kind = Kind::$kind;

                fn from_variant(value: &Variant) -> Option<Self> {
                    match value {
                        Variant::$kind(v) => Some(v.clone()),
                        _ => None,
                    }
                }
            }
        )*
    };
}

from_variant! {
    String => String,
    Text => Text,
    PrimitiveDateTime => Date,
    Locale => Locale,
    i64 => Integer,
    f64 => Real,
    bool => Boolean,
    Flob => Flob,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Attribute {name:?} expects {expected} but got {actual}")]
pub struct TypeMismatch {
    pub name: String,
    pub expected: Kind,
    pub actual: Kind,
}

static REGISTRY: LazyLock<RwLock<HashMap<String, Kind>>> = LazyLock::new(|| {
    let mut kinds = HashMap::new();
    for name in [
        "title",
        "author",
        "genre",
        "state",
        "publisher",
        "rights",
        "keywords",
        "vendor",
        "isbn",
        "protagonists",
        "translators",
        "illustrators",
        "series",
        "edition",
    ] {
        kinds.insert(name.to_string(), Kind::String);
    }
    kinds.insert("intro".to_string(), Kind::Text);
    kinds.insert("cover".to_string(), Kind::Flob);
    kinds.insert("words".to_string(), Kind::Integer);
    kinds.insert("price".to_string(), Kind::Real);
    kinds.insert("date".to_string(), Kind::Date);
    kinds.insert("pubdate".to_string(), Kind::Date);
    kinds.insert("language".to_string(), Kind::Locale);
    RwLock::new(kinds)
});

/// Global catalog of well-known attribute names and their required kind.
pub struct TypeRegistry;

impl TypeRegistry {
    /// Returns the kind registered for `name`, if any.
    pub fn kind_of(name: &str) -> Option<Kind> {
        let kinds = REGISTRY.read().unwrap_or_else(PoisonError::into_inner);
        kinds.get(name).copied()
    }

    /// Registers (or overrides) the kind for `name`.
    pub fn register(name: &str, kind: Kind) {
        let mut kinds = REGISTRY.write().unwrap_or_else(PoisonError::into_inner);
        kinds.insert(name.to_string(), kind);
    }

    pub fn check(name: &str, value: &Variant) -> Result<(), TypeMismatch> {
        match Self::kind_of(name) {
            Some(expected) if expected != value.kind() => Err(TypeMismatch {
                name: name.to_string(),
                expected,
                actual: value.kind(),
            }),
            _ => Ok(()),
        }
    }
}

/// An open attribute map validated against the [`TypeRegistry`].
#[derive(Clone, Debug, Default)]
pub struct Attributes {
    values: HashMap<String, Variant>,
}

impl Attributes {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores `value` under `name`, returning the previous value.
    ///
    /// # Errors
    ///
    /// Returns [`TypeMismatch`] if `name` is registered with another kind.
    pub fn set<V: Into<Variant>>(
        &mut self,
        name: &str,
        value: V,
    ) -> Result<Option<Variant>, TypeMismatch> {
        let value = value.into();
        TypeRegistry::check(name, &value)?;
        Ok(self.values.insert(name.to_string(), value))
    }

    pub fn get(&self, name: &str) -> Option<&Variant> {
        self.values.get(name)
    }

    /// Returns the value of `name` as `T`, or `default` when it's not set.
    ///
    /// # Errors
    ///
    /// Returns [`TypeMismatch`] if the stored value is not of `T`'s kind.
    pub fn get_as<T: FromVariant>(&self, name: &str, default: T) -> Result<T, TypeMismatch> {
        match self.values.get(name) {
            None => Ok(default),
            Some(value) => T::from_variant(value).ok_or_else(|| TypeMismatch {
                name: name.to_string(),
                expected: T::KIND,
                actual: value.kind(),
            }),
        }
    }

    pub fn remove(&mut self, name: &str) -> Option<Variant> {
        self.values.remove(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.values.contains_key(name)
    }

    /// Attribute names, sorted so that serialized output is stable.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.values.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Variant)> {
        self.values.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn clear(&mut self) {
        self.values.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registered_kinds() {
        assert_eq!(TypeRegistry::kind_of("title"), Some(Kind::String));
        assert_eq!(TypeRegistry::kind_of("cover"), Some(Kind::Flob));
        assert_eq!(TypeRegistry::kind_of("language"), Some(Kind::Locale));
        assert_eq!(TypeRegistry::kind_of("nothing-here"), None);
    }

    #[test]
    fn mismatch_reports_both_kinds() {
        let mut attrs = Attributes::new();
        let err = attrs.set("words", "many").unwrap_err();
        assert_eq!(err.name, "words");
        assert_eq!(err.expected, Kind::Integer);
        assert_eq!(err.actual, Kind::String);
        assert!(attrs.is_empty());
    }

    #[test]
    fn get_as_does_not_coerce() {
        let mut attrs = Attributes::new();
        attrs.set("note", "2020-01-01").unwrap();
        assert!(attrs.get_as::<i64>("note", 0).is_err());
        assert_eq!(attrs.get_as("missing", 7_i64).unwrap(), 7);
        assert_eq!(attrs.get_as("note", String::new()).unwrap(), "2020-01-01");
    }
}
