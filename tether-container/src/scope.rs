//! Dependency lifecycle scopes.
//!
//! A binding's [`Scoping`] decides how often its construction strategy runs:
//! - [`Scoping::Unscoped`]: every request constructs a new instance
//! - [`Scoping::Singleton`]: at most once per environment
//! - [`Scoping::EagerSingleton`]: like `Singleton`, constructed at seal time
//! - [`Scoping::Scope`]: a custom [`Scope`] capability decides
//!
//! Bindings may also name a scope indirectly through a [`ScopeAnnotation`],
//! which the graph builder resolves against the scope declarations visible
//! to the binding's environment.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::error::{Message, ProvisionError};
use crate::key::{Key, TypeDescriptor};
use crate::plan::Instance;

/// Outcome of one scoped provision: an instance, `None` for a provider that
/// produced nothing, or the failure.
pub type Provided = std::result::Result<Option<Instance>, ProvisionError>;

/// A custom caching policy.
///
/// `scope` is called on every request for a key bound in this scope. It
/// either returns a cached value or calls `unscoped` to construct a fresh
/// one. Failures from `unscoped` must be returned, never cached.
pub trait Scope: Send + Sync {
    fn scope(&self, key: &Key, unscoped: &mut dyn FnMut() -> Provided) -> Provided;

    /// Name used in diagnostics.
    fn name(&self) -> &str {
        "custom scope"
    }
}

/// Marker for the built-in singleton scope annotation.
///
/// Every root environment pre-declares `ScopeAnnotation::of::<Singleton>()`.
pub struct Singleton;

/// Names a scope by marker type, the equivalent of a scope annotation.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct ScopeAnnotation(TypeDescriptor);

impl ScopeAnnotation {
    pub fn of<A: ?Sized + 'static>() -> Self {
        ScopeAnnotation(TypeDescriptor::of::<A>())
    }

    pub fn descriptor(&self) -> TypeDescriptor {
        self.0
    }

    /// Returns `true` for the built-in [`Singleton`] annotation.
    pub fn is_singleton(&self) -> bool {
        self.0.is::<Singleton>()
    }
}

impl fmt::Debug for ScopeAnnotation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ScopeAnnotation({})", self.0)
    }
}

impl fmt::Display for ScopeAnnotation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "@{}", self.0)
    }
}

/// The scope attached to a binding.
#[derive(Clone, Default)]
pub enum Scoping {
    /// Construct on every request.
    #[default]
    Unscoped,

    /// One instance per environment, created on first request.
    Singleton,

    /// One instance per environment, created when the environment is sealed.
    EagerSingleton,

    /// Not yet resolved against the scope declarations.
    ///
    /// Only present before a build pass completes.
    Annotation(ScopeAnnotation),

    /// A custom scope capability.
    Scope(Arc<dyn Scope>),
}

impl Scoping {
    /// Wraps a custom scope.
    pub fn custom(scope: impl Scope + 'static) -> Self {
        Scoping::Scope(Arc::new(scope))
    }

    /// Returns `true` if instances are cached per environment.
    #[inline]
    pub fn is_singleton(&self) -> bool {
        matches!(self, Scoping::Singleton | Scoping::EagerSingleton)
    }

    /// Returns `true` if the instance is created at seal time.
    #[inline]
    pub fn is_eager(&self) -> bool {
        matches!(self, Scoping::EagerSingleton)
    }

    #[inline]
    pub fn is_unscoped(&self) -> bool {
        matches!(self, Scoping::Unscoped)
    }

    /// Returns `true` if this scoping still refers to an annotation.
    #[inline]
    pub fn is_unresolved(&self) -> bool {
        matches!(self, Scoping::Annotation(_))
    }
}

impl PartialEq for Scoping {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Scoping::Unscoped, Scoping::Unscoped)
            | (Scoping::Singleton, Scoping::Singleton)
            | (Scoping::EagerSingleton, Scoping::EagerSingleton) => true,
            (Scoping::Annotation(a), Scoping::Annotation(b)) => a == b,
            (Scoping::Scope(a), Scoping::Scope(b)) => same_scope(a, b),
            _ => false,
        }
    }
}

/// Identity comparison of two scope capabilities.
pub(crate) fn same_scope(a: &Arc<dyn Scope>, b: &Arc<dyn Scope>) -> bool {
    std::ptr::eq(Arc::as_ptr(a) as *const (), Arc::as_ptr(b) as *const ())
}

impl fmt::Display for Scoping {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Scoping::Unscoped => write!(f, "Unscoped"),
            Scoping::Singleton => write!(f, "Singleton"),
            Scoping::EagerSingleton => write!(f, "EagerSingleton"),
            Scoping::Annotation(annotation) => write!(f, "{annotation}"),
            Scoping::Scope(scope) => write!(f, "Scope({})", scope.name()),
        }
    }
}

impl fmt::Debug for Scoping {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

// ═══════════════════════════════════════════════════════════════
// Simple custom scope
// ═══════════════════════════════════════════════════════════════

/// A scope that caches instances between [`ActivityScope::enter`] and the
/// drop of the returned guard, such as the lifetime of one request.
///
/// Requests outside of an active period fail with `OutOfScope`.
pub struct ActivityScope {
    name: String,
    cache: Mutex<Option<HashMap<Key, Option<Instance>>>>,
}

impl ActivityScope {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            cache: Mutex::new(None),
        }
    }

    /// Starts an active period. Entering twice keeps the current cache.
    pub fn enter(&self) -> ActivityGuard<'_> {
        self.cache.lock().get_or_insert_with(HashMap::new);
        ActivityGuard { scope: self }
    }

    pub fn is_active(&self) -> bool {
        self.cache.lock().is_some()
    }
}

impl Scope for ActivityScope {
    fn scope(&self, key: &Key, unscoped: &mut dyn FnMut() -> Provided) -> Provided {
        match self.cache.lock().as_ref() {
            None => return Err(Message::out_of_scope(key, &self.name).into()),
            Some(cache) => {
                if let Some(cached) = cache.get(key) {
                    return Ok(cached.clone());
                }
            }
        }

        // The lock is released while constructing; scoped dependencies of
        // this key re-enter `scope`.
        let fresh = unscoped()?;

        let mut guard = self.cache.lock();
        match guard.as_mut() {
            Some(cache) => Ok(cache.entry(key.clone()).or_insert(fresh).clone()),
            None => Ok(fresh),
        }
    }

    fn name(&self) -> &str {
        &self.name
    }
}

/// Ends the active period of an [`ActivityScope`] when dropped.
pub struct ActivityGuard<'a> {
    scope: &'a ActivityScope,
}

impl Drop for ActivityGuard<'_> {
    fn drop(&mut self) {
        self.scope.cache.lock().take();
    }
}
