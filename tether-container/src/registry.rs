//! Binding registry: the bindings of one environment.
//!
//! The registry maps [`Key`] to [`Binding`] and remembers insertion order,
//! which drives eager singleton initialization and keeps duplicate
//! diagnostics deterministic.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::{debug, trace};

use crate::binding::Binding;
use crate::error::Message;
use crate::key::Key;
use crate::source::Source;

/// A second, different binding was inserted for a key.
#[derive(Debug, Clone, thiserror::Error)]
#[error("A binding to {key} was already configured at {original} (duplicate at {duplicate})")]
pub struct DuplicateBindingError {
    pub key: Key,
    pub original: Source,
    pub duplicate: Source,
}

impl From<DuplicateBindingError> for Message {
    fn from(err: DuplicateBindingError) -> Self {
        Message::binding_already_set(&err.key, &err.original).with_source(&err.duplicate)
    }
}

/// Stores the bindings of one environment.
///
/// Populated during the build pass and read-only once the environment is
/// sealed.
#[derive(Debug, Default)]
pub struct BindingRegistry {
    bindings: Vec<Arc<Binding>>,
    index: HashMap<Key, usize>,
}

impl BindingRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a binding.
    ///
    /// Re-inserting an equivalent binding is accepted and keeps the first.
    ///
    /// # Errors
    /// Returns [`DuplicateBindingError`] if a different binding for the same
    /// key exists. The registry is left unchanged.
    pub fn insert(&mut self, binding: Binding) -> Result<(), DuplicateBindingError> {
        if let Some(&position) = self.index.get(binding.key()) {
            let existing = &self.bindings[position];
            if existing.is_equivalent(&binding) {
                debug!(key = %binding.key(), "Ignoring equivalent duplicate binding");
                return Ok(());
            }
            return Err(DuplicateBindingError {
                key: binding.key().clone(),
                original: existing.source().clone(),
                duplicate: binding.source().clone(),
            });
        }

        debug!(
            key = %binding.key(),
            target = binding.target().kind(),
            scope = %binding.scoping(),
            "Registered binding"
        );
        self.index.insert(binding.key().clone(), self.bindings.len());
        self.bindings.push(Arc::new(binding));
        Ok(())
    }

    /// Looks up a binding in this registry only.
    pub fn lookup(&self, key: &Key) -> Option<&Arc<Binding>> {
        trace!(key = %key, "Registry lookup");
        self.index.get(key).map(|&position| &self.bindings[position])
    }

    pub fn contains(&self, key: &Key) -> bool {
        self.index.contains_key(key)
    }

    /// All bindings, in insertion order.
    pub fn all(&self) -> impl Iterator<Item = (&Key, &Arc<Binding>)> {
        self.bindings.iter().map(|binding| (binding.key(), binding))
    }

    pub fn keys(&self) -> impl Iterator<Item = &Key> {
        self.bindings.iter().map(|binding| binding.key())
    }

    pub fn len(&self) -> usize {
        self.bindings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::binding::BindingTarget;
    use crate::plan::instance;
    use crate::scope::Scoping;

    struct Database;

    fn linked(key: Key, to: Key, source: &'static str) -> Binding {
        Binding::new(key, BindingTarget::ToImplementation(to), Scoping::Unscoped, Source::label(source))
    }

    #[test]
    fn insert_and_lookup() {
        let mut registry = BindingRegistry::new();
        let key = Key::of::<Database>();
        registry
            .insert(linked(key.clone(), Key::named::<Database>("pg"), "a"))
            .unwrap();
        assert!(registry.lookup(&key).is_some());
        assert!(registry.lookup(&Key::named::<Database>("pg")).is_none());
    }

    #[test]
    fn duplicate_names_both_sources() {
        let mut registry = BindingRegistry::new();
        let key = Key::of::<Database>();
        registry
            .insert(linked(key.clone(), Key::named::<Database>("pg"), "first"))
            .unwrap();
        let err = registry
            .insert(linked(key.clone(), Key::named::<Database>("mysql"), "second"))
            .unwrap_err();

        assert_eq!(err.key, key);
        assert_eq!(err.original, Source::label("first"));
        assert_eq!(err.duplicate, Source::label("second"));
        assert_eq!(registry.len(), 1);

        let message = Message::from(err);
        assert_eq!(message.sources().len(), 2);
    }

    #[test]
    fn equivalent_duplicate_is_ignored() {
        let mut registry = BindingRegistry::new();
        let value = instance(Database);
        for source in ["a", "b"] {
            registry
                .insert(Binding::new(
                    Key::of::<Database>(),
                    BindingTarget::ToInstance(value.clone()),
                    Scoping::Unscoped,
                    Source::label(source),
                ))
                .unwrap();
        }
        assert_eq!(registry.len(), 1);
        assert_eq!(
            registry.lookup(&Key::of::<Database>()).unwrap().source(),
            &Source::label("a")
        );
    }

    #[test]
    fn all_preserves_insertion_order() {
        let mut registry = BindingRegistry::new();
        for name in ["c", "a", "b"] {
            registry
                .insert(linked(Key::named::<String>(name), Key::of::<String>(), name))
                .unwrap();
        }
        let order: Vec<String> = registry.keys().map(ToString::to_string).collect();
        assert_eq!(
            order,
            vec![
                "String annotated with @Named(\"c\")",
                "String annotated with @Named(\"a\")",
                "String annotated with @Named(\"b\")",
            ]
        );
    }
}
