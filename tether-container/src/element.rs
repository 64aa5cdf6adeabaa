//! Configuration elements: the flat input of a build pass.
//!
//! A configuration front-end turns user declarations into an ordered list of
//! [`Element`]s. Constructors marked `#[track_caller]` record the calling
//! line as the element's [`Source`].
//!
//! # Examples
//! ```
//! use tether_container::element::Element;
//! use tether_container::key::Key;
//! use tether_container::scope::Scoping;
//!
//! let elements = vec![
//!     Element::bind(Key::named::<String>("greeting")).to_value(String::from("hello")),
//!     Element::bind(Key::of::<String>())
//!         .to(Key::named::<String>("greeting"))
//!         .in_scope(Scoping::Singleton)
//!         .into(),
//!     Element::constant(Key::named::<u16>("port"), "8080"),
//! ];
//! assert_eq!(elements.len(), 3);
//! ```

use std::fmt;
use std::sync::Arc;

use crate::binding::{ProviderFactory, ProviderMethod};
use crate::converter::TypeConverter;
use crate::error::BoxError;
use crate::key::{Key, TypeDescriptor};
use crate::plan::{ConstructionPlan, Instance};
use crate::proxy::{ForwardHandle, ProxyFactory};
use crate::scope::{Scope, ScopeAnnotation, Scoping};
use crate::source::Source;

/// One configuration statement.
#[derive(Clone, Debug)]
pub enum Element {
    Binding(BindingElement),
    Constant(ConstantElement),
    ProviderMethod(ProviderMethodElement),
    ScopeDeclaration(ScopeDeclaration),
    Converter(ConverterDeclaration),
    StaticInjection(StaticInjectionRequest),
    PrivateEnvironment(PrivateElements),
    Listener(ListenerDeclaration),
    Interceptor(InterceptorDeclaration),
    Proxy(ProxyDeclaration),
    Option(OptionElement),
}

impl Element {
    /// Starts a binding for `key`. Without a target it is untargetted and
    /// resolves to the type's construction plan.
    #[track_caller]
    pub fn bind(key: Key) -> BindingElement {
        BindingElement {
            key,
            spec: BindingSpec::Untargetted,
            scoping: Scoping::Unscoped,
            source: Source::caller(),
        }
    }

    /// A string constant, converted to the key's type at build time.
    #[track_caller]
    pub fn constant(key: Key, value: impl Into<String>) -> Element {
        Element::Constant(ConstantElement {
            key,
            value: value.into(),
            source: Source::caller(),
        })
    }

    /// A provider method bound to `key`.
    #[track_caller]
    pub fn provider_method(key: Key, method: ProviderMethod) -> ProviderMethodElement {
        ProviderMethodElement {
            key,
            method,
            scoping: Scoping::Unscoped,
            source: Source::caller(),
        }
    }

    /// Declares the scope implementation for `annotation`.
    #[track_caller]
    pub fn scope(annotation: ScopeAnnotation, scope: Arc<dyn Scope>) -> Element {
        Element::ScopeDeclaration(ScopeDeclaration {
            annotation,
            scope,
            source: Source::caller(),
        })
    }

    /// Registers a type converter for constant bindings.
    #[track_caller]
    pub fn converter(matcher: Matcher<TypeDescriptor>, converter: Arc<dyn TypeConverter>) -> Element {
        Element::Converter(ConverterDeclaration {
            matcher,
            converter,
            source: Source::caller(),
        })
    }

    /// Requests static injection for `ty`.
    #[track_caller]
    pub fn request_static_injection(ty: TypeDescriptor) -> Element {
        Element::StaticInjection(StaticInjectionRequest {
            ty,
            source: Source::caller(),
        })
    }

    /// Starts a private environment around `elements`.
    #[track_caller]
    pub fn private(elements: Vec<Element>) -> PrivateElements {
        PrivateElements {
            elements,
            exposed: Vec::new(),
            source: Source::caller(),
        }
    }

    #[track_caller]
    pub fn listener(matcher: Matcher<Key>, listener: Arc<dyn ProvisionListener>) -> Element {
        Element::Listener(ListenerDeclaration {
            matcher,
            listener,
            source: Source::caller(),
        })
    }

    #[track_caller]
    pub fn interceptor(matcher: Matcher<Key>, interceptor: Arc<dyn Interceptor>) -> Element {
        Element::Interceptor(InterceptorDeclaration {
            matcher,
            interceptor,
            source: Source::caller(),
        })
    }

    /// Declares how to build a circular proxy for `Key::of::<T>()`.
    #[track_caller]
    pub fn proxy<T, F>(factory: F) -> Element
    where
        T: Send + Sync + 'static,
        F: Fn(ForwardHandle) -> T + Send + Sync + 'static,
    {
        Element::Proxy(ProxyDeclaration::of::<T, F>(factory))
    }

    #[track_caller]
    pub fn option(option: EnvironmentOption) -> Element {
        Element::Option(OptionElement {
            option,
            source: Source::caller(),
        })
    }

    /// Where this element was declared.
    pub fn source(&self) -> &Source {
        match self {
            Element::Binding(e) => &e.source,
            Element::Constant(e) => &e.source,
            Element::ProviderMethod(e) => &e.source,
            Element::ScopeDeclaration(e) => &e.source,
            Element::Converter(e) => &e.source,
            Element::StaticInjection(e) => &e.source,
            Element::PrivateEnvironment(e) => &e.source,
            Element::Listener(e) => &e.source,
            Element::Interceptor(e) => &e.source,
            Element::Proxy(e) => &e.source,
            Element::Option(e) => &e.source,
        }
    }

    /// The key a binding-like element binds.
    pub fn key(&self) -> Option<&Key> {
        match self {
            Element::Binding(e) => Some(&e.key),
            Element::Constant(e) => Some(&e.key),
            Element::ProviderMethod(e) => Some(&e.key),
            _ => None,
        }
    }
}

// ═══════════════════════════════════════════════════════════════
// Bindings
// ═══════════════════════════════════════════════════════════════

/// Target of a declared binding.
#[derive(Clone)]
pub enum BindingSpec {
    Untargetted,
    To(Key),
    ToProvider(Arc<dyn ProviderFactory>),
    ToInstance(Instance),
    ToConstructor(ConstructionPlan),
}

impl fmt::Debug for BindingSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BindingSpec::Untargetted => write!(f, "Untargetted"),
            BindingSpec::To(key) => write!(f, "To({key:?})"),
            BindingSpec::ToProvider(_) => write!(f, "ToProvider"),
            BindingSpec::ToInstance(_) => write!(f, "ToInstance"),
            BindingSpec::ToConstructor(plan) => write!(f, "ToConstructor({:?})", plan.ty()),
        }
    }
}

#[derive(Clone, Debug)]
pub struct BindingElement {
    pub key: Key,
    pub spec: BindingSpec,
    pub scoping: Scoping,
    pub source: Source,
}

impl BindingElement {
    /// Links this key to another key.
    pub fn to(mut self, target: Key) -> Self {
        self.spec = BindingSpec::To(target);
        self
    }

    pub fn to_provider(mut self, provider: Arc<dyn ProviderFactory>) -> Self {
        self.spec = BindingSpec::ToProvider(provider);
        self
    }

    pub fn to_instance(mut self, instance: Instance) -> Self {
        self.spec = BindingSpec::ToInstance(instance);
        self
    }

    /// Binds to `value` and finishes the element.
    pub fn to_value<T: Send + Sync + 'static>(self, value: T) -> Element {
        self.to_instance(Arc::new(value)).into()
    }

    pub fn to_constructor(mut self, plan: ConstructionPlan) -> Self {
        self.spec = BindingSpec::ToConstructor(plan);
        self
    }

    pub fn in_scope(mut self, scoping: Scoping) -> Self {
        self.scoping = scoping;
        self
    }

    /// Scopes the binding by annotation, resolved at build time.
    pub fn in_annotated_scope(self, annotation: ScopeAnnotation) -> Self {
        self.in_scope(Scoping::Annotation(annotation))
    }

    pub fn as_eager_singleton(self) -> Self {
        self.in_scope(Scoping::EagerSingleton)
    }

    pub fn with_source(mut self, source: Source) -> Self {
        self.source = source;
        self
    }
}

impl From<BindingElement> for Element {
    fn from(element: BindingElement) -> Self {
        Element::Binding(element)
    }
}

#[derive(Clone, Debug)]
pub struct ConstantElement {
    pub key: Key,
    pub value: String,
    pub source: Source,
}

#[derive(Clone)]
pub struct ProviderMethodElement {
    pub key: Key,
    pub method: ProviderMethod,
    pub scoping: Scoping,
    pub source: Source,
}

impl ProviderMethodElement {
    pub fn in_scope(mut self, scoping: Scoping) -> Self {
        self.scoping = scoping;
        self
    }
}

impl fmt::Debug for ProviderMethodElement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProviderMethodElement")
            .field("key", &self.key)
            .field("dependencies", &self.method.dependencies())
            .field("scoping", &self.scoping)
            .field("source", &self.source)
            .finish()
    }
}

impl From<ProviderMethodElement> for Element {
    fn from(element: ProviderMethodElement) -> Self {
        Element::ProviderMethod(element)
    }
}

// ═══════════════════════════════════════════════════════════════
// Declarations
// ═══════════════════════════════════════════════════════════════

#[derive(Clone)]
pub struct ScopeDeclaration {
    pub annotation: ScopeAnnotation,
    pub scope: Arc<dyn Scope>,
    pub source: Source,
}

impl fmt::Debug for ScopeDeclaration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ScopeDeclaration({}, {})", self.annotation, self.scope.name())
    }
}

#[derive(Clone)]
pub struct ConverterDeclaration {
    pub matcher: Matcher<TypeDescriptor>,
    pub converter: Arc<dyn TypeConverter>,
    pub source: Source,
}

impl fmt::Debug for ConverterDeclaration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ConverterDeclaration(at {})", self.source)
    }
}

#[derive(Clone, Debug)]
pub struct StaticInjectionRequest {
    pub ty: TypeDescriptor,
    pub source: Source,
}

/// Elements of a private environment and the keys it exposes.
#[derive(Clone, Debug)]
pub struct PrivateElements {
    pub elements: Vec<Element>,
    pub exposed: Vec<(Key, Source)>,
    pub source: Source,
}

impl PrivateElements {
    /// Makes `key` visible to the enclosing environment.
    #[track_caller]
    pub fn expose(mut self, key: Key) -> Self {
        self.exposed.push((key, Source::caller()));
        self
    }
}

impl From<PrivateElements> for Element {
    fn from(element: PrivateElements) -> Self {
        Element::PrivateEnvironment(element)
    }
}

/// Observes fresh constructions.
pub trait ProvisionListener: Send + Sync {
    fn on_provision(&self, key: &Key, instance: &Instance) -> Result<(), BoxError>;
}

/// Wraps instances built from construction plans.
///
/// The returned instance replaces the original and must have the same type.
pub trait Interceptor: Send + Sync {
    fn intercept(&self, key: &Key, instance: Instance) -> Result<Instance, BoxError>;
}

#[derive(Clone)]
pub struct ListenerDeclaration {
    pub matcher: Matcher<Key>,
    pub listener: Arc<dyn ProvisionListener>,
    pub source: Source,
}

impl fmt::Debug for ListenerDeclaration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ListenerDeclaration(at {})", self.source)
    }
}

#[derive(Clone)]
pub struct InterceptorDeclaration {
    pub matcher: Matcher<Key>,
    pub interceptor: Arc<dyn Interceptor>,
    pub source: Source,
}

impl fmt::Debug for InterceptorDeclaration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "InterceptorDeclaration(at {})", self.source)
    }
}

/// The capability to build a circular proxy for one key.
#[derive(Clone)]
pub struct ProxyDeclaration {
    pub key: Key,
    pub factory: ProxyFactory,
    pub source: Source,
}

impl ProxyDeclaration {
    /// A proxy for `Key::of::<T>()`.
    #[track_caller]
    pub fn of<T, F>(factory: F) -> Self
    where
        T: Send + Sync + 'static,
        F: Fn(ForwardHandle) -> T + Send + Sync + 'static,
    {
        Self {
            key: Key::of::<T>(),
            factory: Arc::new(move |handle: ForwardHandle| Arc::new(factory(handle)) as Instance),
            source: Source::caller(),
        }
    }
}

impl fmt::Debug for ProxyDeclaration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ProxyDeclaration({:?})", self.key)
    }
}

/// Environment restrictions declared as elements.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnvironmentOption {
    DisableCircularProxies,
    RequireExplicitBindings,
    JitMustBeInRoot,
}

#[derive(Clone, Debug)]
pub struct OptionElement {
    pub option: EnvironmentOption,
    pub source: Source,
}

// ═══════════════════════════════════════════════════════════════
// Matcher
// ═══════════════════════════════════════════════════════════════

/// A predicate over keys or types.
pub struct Matcher<T: ?Sized>(Arc<dyn Fn(&T) -> bool + Send + Sync>);

impl<T: ?Sized> Clone for Matcher<T> {
    fn clone(&self) -> Self {
        Matcher(self.0.clone())
    }
}

impl<T: ?Sized> Matcher<T> {
    pub fn any() -> Self {
        Matcher(Arc::new(|_| true))
    }

    pub fn from_fn(f: impl Fn(&T) -> bool + Send + Sync + 'static) -> Self {
        Matcher(Arc::new(f))
    }

    pub fn matches(&self, value: &T) -> bool {
        (self.0)(value)
    }
}

impl Matcher<Key> {
    /// Matches exactly `key`.
    pub fn only(key: Key) -> Self {
        Matcher::from_fn(move |candidate: &Key| *candidate == key)
    }

    /// Matches every key of type `T`, whatever its qualifier.
    pub fn of_type<T: ?Sized + 'static>() -> Self {
        Matcher::from_fn(|candidate: &Key| candidate.is::<T>())
    }
}

impl Matcher<TypeDescriptor> {
    /// Matches type `T`.
    pub fn of<T: ?Sized + 'static>() -> Self {
        Matcher::from_fn(|candidate: &TypeDescriptor| candidate.is::<T>())
    }
}

impl<T: ?Sized> fmt::Debug for Matcher<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Matcher")
    }
}
