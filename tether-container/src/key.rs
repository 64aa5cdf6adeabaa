//! Dependency identification keys.
//!
//! A [`Key`] identifies a requested dependency: a fully specified type plus
//! an optional [`Qualifier`]. A [`Dependency`] is a key as it appears in an
//! injection plan, together with whether `None` is acceptable for it.

use std::any::{TypeId, type_name};
use std::borrow::Cow;
use std::fmt;
use std::hash::{Hash, Hasher};

use tether_support::rendering::shorten_type_name;

use crate::error::Message;

/// Describes a type as the configuration front-end sees it.
///
/// Concrete descriptors come from [`TypeDescriptor::of`]. A front-end that
/// works with generic declarations may also hand over a
/// [`TypeDescriptor::Parameter`], an open type parameter that cannot be used
/// as a key.
#[derive(Clone, Copy)]
pub enum TypeDescriptor {
    /// A fully specified Rust type.
    Concrete {
        id: TypeId,
        name: &'static str,
    },
    /// An unresolved type parameter such as `T`.
    Parameter { name: &'static str },
}

impl TypeDescriptor {
    /// Describes type `T`.
    #[inline]
    pub fn of<T: ?Sized + 'static>() -> Self {
        TypeDescriptor::Concrete {
            id: TypeId::of::<T>(),
            name: type_name::<T>(),
        }
    }

    /// Describes an open type parameter.
    #[inline]
    pub const fn parameter(name: &'static str) -> Self {
        TypeDescriptor::Parameter { name }
    }

    /// Returns the [`TypeId`] for concrete descriptors.
    #[inline]
    pub fn type_id(&self) -> Option<TypeId> {
        match self {
            TypeDescriptor::Concrete { id, .. } => Some(*id),
            TypeDescriptor::Parameter { .. } => None,
        }
    }

    /// Returns the human-readable type name.
    #[inline]
    pub fn name(&self) -> &'static str {
        match self {
            TypeDescriptor::Concrete { name, .. } | TypeDescriptor::Parameter { name } => name,
        }
    }

    /// Returns `true` if this descriptor names a concrete type.
    #[inline]
    pub fn is_fully_specified(&self) -> bool {
        matches!(self, TypeDescriptor::Concrete { .. })
    }

    /// Returns `true` if this descriptor names type `T`.
    #[inline]
    pub fn is<T: ?Sized + 'static>(&self) -> bool {
        self.type_id() == Some(TypeId::of::<T>())
    }
}

impl PartialEq for TypeDescriptor {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (TypeDescriptor::Concrete { id: a, .. }, TypeDescriptor::Concrete { id: b, .. }) => a == b,
            (TypeDescriptor::Parameter { name: a }, TypeDescriptor::Parameter { name: b }) => a == b,
            _ => false,
        }
    }
}

impl Eq for TypeDescriptor {}

impl Hash for TypeDescriptor {
    fn hash<H: Hasher>(&self, state: &mut H) {
        match self {
            TypeDescriptor::Concrete { id, .. } => id.hash(state),
            TypeDescriptor::Parameter { name } => name.hash(state),
        }
    }
}

impl fmt::Debug for TypeDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TypeDescriptor::Concrete { name, .. } => write!(f, "TypeDescriptor({name})"),
            TypeDescriptor::Parameter { name } => write!(f, "TypeDescriptor(<{name}>)"),
        }
    }
}

impl fmt::Display for TypeDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&shorten_type_name(self.name()))
    }
}

/// Distinguishes several bindings of the same type.
#[derive(Clone, PartialEq, Eq, Hash)]
pub enum Qualifier {
    /// A string name, the equivalent of `@Named("...")`.
    Named(Cow<'static, str>),
    /// A marker type used as a binding annotation.
    Marker(TypeDescriptor),
}

impl Qualifier {
    /// A named qualifier.
    pub fn named(name: impl Into<Cow<'static, str>>) -> Self {
        Qualifier::Named(name.into())
    }

    /// A qualifier identified by marker type `M`.
    pub fn marker<M: ?Sized + 'static>() -> Self {
        Qualifier::Marker(TypeDescriptor::of::<M>())
    }
}

impl fmt::Debug for Qualifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

impl fmt::Display for Qualifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Qualifier::Named(name) => write!(f, "@Named({name:?})"),
            Qualifier::Marker(marker) => write!(f, "@{marker}"),
        }
    }
}

/// Uniquely identifies a dependency.
///
/// Two keys are equal iff their types and qualifiers are equal.
///
/// # Examples
/// ```
/// use tether_container::key::Key;
///
/// let key = Key::of::<String>();
/// assert_eq!(key.type_name(), "alloc::string::String");
/// assert_eq!(key.qualifier(), None);
///
/// let primary = Key::named::<String>("primary_db");
/// let replica = Key::named::<String>("replica_db");
/// assert_ne!(primary, replica);
/// ```
#[derive(Clone)]
pub struct Key {
    type_id: TypeId,
    type_name: &'static str,
    qualifier: Option<Qualifier>,
}

impl Key {
    /// Creates a key for type `T`.
    #[inline]
    pub fn of<T: ?Sized + 'static>() -> Self {
        Self {
            type_id: TypeId::of::<T>(),
            type_name: type_name::<T>(),
            qualifier: None,
        }
    }

    /// Creates a key for type `T` qualified by a name.
    #[inline]
    pub fn named<T: ?Sized + 'static>(name: impl Into<Cow<'static, str>>) -> Self {
        Self::qualified::<T>(Qualifier::named(name))
    }

    /// Creates a key for type `T` qualified by marker type `M`.
    #[inline]
    pub fn marked<T: ?Sized + 'static, M: ?Sized + 'static>() -> Self {
        Self::qualified::<T>(Qualifier::marker::<M>())
    }

    /// Creates a key for type `T` with an explicit qualifier.
    #[inline]
    pub fn qualified<T: ?Sized + 'static>(qualifier: Qualifier) -> Self {
        Self {
            qualifier: Some(qualifier),
            ..Self::of::<T>()
        }
    }

    /// Creates a key from a type descriptor handed over by a front-end.
    ///
    /// # Errors
    /// Fails with a `KeyNotFullySpecified` message when `descriptor` is an
    /// open type parameter.
    pub fn new(descriptor: TypeDescriptor, qualifier: Option<Qualifier>) -> Result<Self, Message> {
        match descriptor {
            TypeDescriptor::Concrete { id, name } => Ok(Self {
                type_id: id,
                type_name: name,
                qualifier,
            }),
            TypeDescriptor::Parameter { .. } => Err(Message::key_not_fully_specified(&descriptor)),
        }
    }

    /// Returns a copy of this key with a different qualifier.
    pub fn with_qualifier(&self, qualifier: Option<Qualifier>) -> Self {
        Self {
            qualifier,
            ..self.clone()
        }
    }

    /// Returns the [`TypeId`] of the keyed type.
    #[inline]
    pub fn type_id(&self) -> TypeId {
        self.type_id
    }

    /// Returns the full type name.
    #[inline]
    pub fn type_name(&self) -> &'static str {
        self.type_name
    }

    /// Returns the keyed type as a descriptor.
    #[inline]
    pub fn type_descriptor(&self) -> TypeDescriptor {
        TypeDescriptor::Concrete {
            id: self.type_id,
            name: self.type_name,
        }
    }

    /// Returns the qualifier, if any.
    #[inline]
    pub fn qualifier(&self) -> Option<&Qualifier> {
        self.qualifier.as_ref()
    }

    /// Returns `true` if this key is for type `T`, regardless of qualifier.
    #[inline]
    pub fn is<T: ?Sized + 'static>(&self) -> bool {
        self.type_id == TypeId::of::<T>()
    }
}

impl PartialEq for Key {
    fn eq(&self, other: &Self) -> bool {
        self.type_id == other.type_id && self.qualifier == other.qualifier
    }
}

impl Eq for Key {}

impl Hash for Key {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.type_id.hash(state);
        self.qualifier.hash(state);
    }
}

impl fmt::Debug for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.qualifier {
            Some(ref qualifier) => write!(f, "Key({}, {qualifier})", self.type_name),
            None => write!(f, "Key({})", self.type_name),
        }
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = shorten_type_name(self.type_name);
        match self.qualifier {
            Some(ref qualifier) => write!(f, "{name} annotated with {qualifier}"),
            None => f.write_str(&name),
        }
    }
}

/// A key as it appears in an injection plan.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct Dependency {
    key: Key,
    nullable: bool,
}

impl Dependency {
    /// A dependency that must not be satisfied with `None`.
    pub fn new(key: Key) -> Self {
        Self { key, nullable: false }
    }

    /// A dependency that accepts `None` from its provider.
    pub fn nullable(key: Key) -> Self {
        Self { key, nullable: true }
    }

    /// Shorthand for `Dependency::new(Key::of::<T>())`.
    pub fn of<T: ?Sized + 'static>() -> Self {
        Self::new(Key::of::<T>())
    }

    pub fn key(&self) -> &Key {
        &self.key
    }

    pub fn is_nullable(&self) -> bool {
        self.nullable
    }
}

impl From<Key> for Dependency {
    fn from(key: Key) -> Self {
        Dependency::new(key)
    }
}

impl fmt::Debug for Dependency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.nullable {
            write!(f, "Dependency({:?}, nullable)", self.key)
        } else {
            write!(f, "Dependency({:?})", self.key)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    struct MyStruct;
    struct Primary;

    #[test]
    fn key_of_type() {
        let key = Key::of::<MyStruct>();
        assert!(key.type_name().contains("MyStruct"));
        assert_eq!(key.qualifier(), None);
    }

    #[test]
    fn key_equality_same_type() {
        assert_eq!(Key::of::<String>(), Key::of::<String>());
        assert_ne!(Key::of::<String>(), Key::of::<i32>());
    }

    #[test]
    fn qualified_keys_differ() {
        assert_ne!(Key::named::<String>("a"), Key::named::<String>("b"));
        assert_ne!(Key::named::<String>("a"), Key::of::<String>());
        assert_ne!(Key::marked::<String, Primary>(), Key::named::<String>("Primary"));
        assert_eq!(Key::marked::<String, Primary>(), Key::marked::<String, Primary>());
    }

    #[test]
    fn key_in_hashmap() {
        use std::collections::HashMap;
        let mut map = HashMap::new();
        map.insert(Key::of::<String>(), "string");
        map.insert(Key::named::<String>("x"), "named");
        assert_eq!(map.get(&Key::of::<String>()), Some(&"string"));
        assert_eq!(map.get(&Key::named::<String>("x")), Some(&"named"));
        assert_eq!(map.get(&Key::of::<bool>()), None);
    }

    #[test]
    fn open_parameter_rejected() {
        let err = Key::new(TypeDescriptor::parameter("T"), None).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::KeyNotFullySpecified);
    }

    #[test]
    fn concrete_descriptor_accepted() {
        let key = Key::new(TypeDescriptor::of::<u8>(), Some(Qualifier::named("port"))).unwrap();
        assert_eq!(key, Key::named::<u8>("port"));
    }

    #[test]
    fn display_is_short() {
        let key = Key::named::<std::sync::Arc<String>>("db");
        assert_eq!(key.to_string(), "Arc<String> annotated with @Named(\"db\")");
    }

    #[test]
    fn unsized_type_key() {
        trait MyTrait {}
        let _key = Key::of::<dyn MyTrait>();
    }
}
