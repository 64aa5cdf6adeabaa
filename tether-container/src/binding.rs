//! Bindings: a key's construction strategy plus scope and provenance.

use std::any::type_name;
use std::fmt;
use std::sync::Arc;

use crate::environment::Injector;
use crate::error::{BoxError, Message, ProvisionError};
use crate::key::{Dependency, Key};
use crate::plan::{Arguments, ConstructionPlan, Instance};
use crate::scope::Scoping;
use crate::source::Source;

/// How a binding came to exist.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BindingOrigin {
    /// Declared by configuration elements.
    Explicit,
    /// Synthesised on first request.
    JustInTime,
    /// Provided by the container itself.
    Framework,
}

/// The construction strategy of a binding.
#[derive(Clone)]
pub enum BindingTarget {
    /// Redirect to another key.
    ToImplementation(Key),
    /// Construction delegated to a provider capability.
    ToProvider(Arc<dyn ProviderFactory>),
    /// A fixed value supplied at configuration time.
    ToInstance(Instance),
    /// Direct construction via an injection plan.
    ToConstructor(ConstructionPlan),
    /// A key exposed by the private environment at this index of the
    /// owning environment's private children.
    Exposed(usize),
    /// The environment's own [`Injector`] handle.
    Injector,
}

impl BindingTarget {
    /// Short name of the variant for diagnostics.
    pub fn kind(&self) -> &'static str {
        match self {
            BindingTarget::ToImplementation(_) => "linked",
            BindingTarget::ToProvider(_) => "provider",
            BindingTarget::ToInstance(_) => "instance",
            BindingTarget::ToConstructor(_) => "constructor",
            BindingTarget::Exposed(_) => "exposed",
            BindingTarget::Injector => "injector",
        }
    }

    fn same_as(&self, other: &BindingTarget) -> bool {
        match (self, other) {
            (BindingTarget::ToImplementation(a), BindingTarget::ToImplementation(b)) => a == b,
            (BindingTarget::ToProvider(a), BindingTarget::ToProvider(b)) => {
                std::ptr::eq(Arc::as_ptr(a) as *const (), Arc::as_ptr(b) as *const ())
            }
            (BindingTarget::ToInstance(a), BindingTarget::ToInstance(b)) => Arc::ptr_eq(a, b),
            (BindingTarget::ToConstructor(a), BindingTarget::ToConstructor(b)) => a.same_constructor(b),
            (BindingTarget::Exposed(a), BindingTarget::Exposed(b)) => a == b,
            (BindingTarget::Injector, BindingTarget::Injector) => true,
            _ => false,
        }
    }
}

impl fmt::Debug for BindingTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BindingTarget::ToImplementation(key) => write!(f, "ToImplementation({key:?})"),
            BindingTarget::ToProvider(_) => write!(f, "ToProvider"),
            BindingTarget::ToInstance(_) => write!(f, "ToInstance"),
            BindingTarget::ToConstructor(plan) => write!(f, "ToConstructor({:?})", plan.ty()),
            BindingTarget::Exposed(index) => write!(f, "Exposed(#{index})"),
            BindingTarget::Injector => write!(f, "Injector"),
        }
    }
}

/// A resolved binding.
///
/// Immutable once its environment is sealed.
#[derive(Clone)]
pub struct Binding {
    key: Key,
    target: BindingTarget,
    scoping: Scoping,
    source: Source,
    origin: BindingOrigin,
}

impl Binding {
    pub fn new(key: Key, target: BindingTarget, scoping: Scoping, source: Source) -> Self {
        Self {
            key,
            target,
            scoping,
            source,
            origin: BindingOrigin::Explicit,
        }
    }

    pub(crate) fn just_in_time(key: Key, plan: ConstructionPlan, scoping: Scoping) -> Self {
        Self {
            key,
            target: BindingTarget::ToConstructor(plan),
            scoping,
            source: Source::JustInTime,
            origin: BindingOrigin::JustInTime,
        }
    }

    pub(crate) fn framework(key: Key, target: BindingTarget) -> Self {
        Self {
            key,
            target,
            scoping: Scoping::Unscoped,
            source: Source::Framework,
            origin: BindingOrigin::Framework,
        }
    }

    pub fn key(&self) -> &Key {
        &self.key
    }

    pub fn target(&self) -> &BindingTarget {
        &self.target
    }

    pub fn scoping(&self) -> &Scoping {
        &self.scoping
    }

    pub fn source(&self) -> &Source {
        &self.source
    }

    pub fn origin(&self) -> BindingOrigin {
        self.origin
    }

    /// Dependencies this binding resolves when it constructs an instance.
    pub fn dependencies(&self) -> Vec<Dependency> {
        match &self.target {
            BindingTarget::ToImplementation(target) => vec![Dependency::new(target.clone())],
            BindingTarget::ToProvider(provider) => provider.dependencies(),
            BindingTarget::ToConstructor(plan) => plan.dependencies(),
            BindingTarget::ToInstance(_) | BindingTarget::Exposed(_) | BindingTarget::Injector => {
                Vec::new()
            }
        }
    }

    /// Returns `true` if `other` would construct the same thing the same way.
    ///
    /// Equivalent duplicates are accepted silently by the registry.
    pub fn is_equivalent(&self, other: &Binding) -> bool {
        self.key == other.key && self.scoping == other.scoping && self.target.same_as(&other.target)
    }
}

impl fmt::Debug for Binding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Binding")
            .field("key", &self.key)
            .field("target", &self.target)
            .field("scoping", &self.scoping)
            .field("source", &self.source)
            .field("origin", &self.origin)
            .finish()
    }
}

// ═══════════════════════════════════════════════════════════════
// Resolver & providers
// ═══════════════════════════════════════════════════════════════

/// Resolves dependencies for provider code.
///
/// Handed to [`ProviderFactory::provide`]; resolution happens on the same
/// provision path as the request that invoked the provider, so cycles are
/// detected across provider boundaries.
pub trait Resolver {
    /// Resolves one dependency. `None` is only returned for nullable
    /// dependencies.
    fn resolve(&mut self, dependency: &Dependency) -> Result<Option<Instance>, ProvisionError>;

    /// The environment the provider is bound in.
    fn injector(&self) -> Injector;
}

impl dyn Resolver + '_ {
    /// Resolves `Key::of::<T>()`.
    pub fn get<T: Send + Sync + 'static>(&mut self) -> Result<Arc<T>, ProvisionError> {
        self.get_key(&Key::of::<T>())
    }

    /// Resolves `key`, which must be keyed by type `T`.
    pub fn get_key<T: Send + Sync + 'static>(&mut self, key: &Key) -> Result<Arc<T>, ProvisionError> {
        match self.resolve(&Dependency::new(key.clone()))? {
            Some(instance) => downcast(key, instance),
            None => Err(Message::null_injected(key).into()),
        }
    }
}

pub(crate) fn downcast<T: Send + Sync + 'static>(key: &Key, instance: Instance) -> Result<Arc<T>, ProvisionError> {
    instance
        .downcast::<T>()
        .map_err(|_| Message::type_mismatch(key, type_name::<T>()).into())
}

/// A factory capability that constructs instances on demand.
pub trait ProviderFactory: Send + Sync {
    /// Produces an instance, or `None` if the provider has nothing to give.
    ///
    /// A [`ProvisionError`] returned from a nested `resolver` call may be
    /// passed through unchanged; it is merged rather than wrapped.
    fn provide(&self, resolver: &mut dyn Resolver) -> Result<Option<Instance>, BoxError>;

    /// Keys this provider declares up front, validated at build time.
    fn dependencies(&self) -> Vec<Dependency> {
        Vec::new()
    }
}

type MethodFn = Arc<dyn Fn(&Arguments) -> Result<Option<Instance>, BoxError> + Send + Sync>;

/// A provider defined by a dependency list and a function of the resolved
/// arguments, the equivalent of a provider method on a module.
#[derive(Clone)]
pub struct ProviderMethod {
    dependencies: Vec<Dependency>,
    method: MethodFn,
}

impl ProviderMethod {
    /// A provider method producing a `T`.
    pub fn new<T, F>(dependencies: Vec<Dependency>, method: F) -> Self
    where
        T: Send + Sync + 'static,
        F: Fn(&Arguments) -> Result<T, BoxError> + Send + Sync + 'static,
    {
        Self {
            dependencies,
            method: Arc::new(move |args: &Arguments| method(args).map(|value| Some(Arc::new(value) as Instance))),
        }
    }

    /// A provider method that may produce nothing.
    pub fn optional<T, F>(dependencies: Vec<Dependency>, method: F) -> Self
    where
        T: Send + Sync + 'static,
        F: Fn(&Arguments) -> Result<Option<T>, BoxError> + Send + Sync + 'static,
    {
        Self {
            dependencies,
            method: Arc::new(move |args: &Arguments| {
                method(args).map(|value| value.map(|value| Arc::new(value) as Instance))
            }),
        }
    }
}

impl ProviderFactory for ProviderMethod {
    fn provide(&self, resolver: &mut dyn Resolver) -> Result<Option<Instance>, BoxError> {
        let mut values = Vec::with_capacity(self.dependencies.len());
        for dependency in &self.dependencies {
            values.push(resolver.resolve(dependency)?);
        }
        let keys = self.dependencies.iter().map(|d| d.key().clone()).collect();
        (self.method)(&Arguments::new(keys, values))
    }

    fn dependencies(&self) -> Vec<Dependency> {
        self.dependencies.clone()
    }
}

/// A provider backed by a closure that resolves what it needs itself.
pub struct FnProvider<F>(F);

/// Wraps a closure as a [`ProviderFactory`].
///
/// # Examples
/// ```
/// use std::sync::Arc;
/// use tether_container::binding::provider_fn;
/// use tether_container::plan::Instance;
///
/// let provider = provider_fn(|resolver| {
///     let name = resolver.get::<String>()?;
///     Ok(Some(Arc::new(format!("hello {name}")) as Instance))
/// });
/// # let _ = provider;
/// ```
pub fn provider_fn<F>(f: F) -> FnProvider<F>
where
    F: Fn(&mut dyn Resolver) -> Result<Option<Instance>, BoxError> + Send + Sync,
{
    FnProvider(f)
}

impl<F> ProviderFactory for FnProvider<F>
where
    F: Fn(&mut dyn Resolver) -> Result<Option<Instance>, BoxError> + Send + Sync,
{
    fn provide(&self, resolver: &mut dyn Resolver) -> Result<Option<Instance>, BoxError> {
        (self.0)(resolver)
    }
}
