//! Environments: the sealed tree of registries and its public handle.
//!
//! # Architecture
//! ```text
//! GraphBuilder ──build()──> Injector (root)
//!                             │  owns
//!                             ├── private environments (from elements)
//!                             └── child environments   (create_child)
//! ```
//!
//! Every environment is owned by its parent, and children point back at
//! the parent through a weak reference. An [`Injector`] keeps the root
//! alive, so every environment reachable from it stays valid.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use dashmap::DashMap;
use parking_lot::{ReentrantMutex, RwLock};
use tracing::trace;

use crate::binding::{Binding, downcast};
use crate::builder::GraphBuilder;
use crate::element::{
    ConverterDeclaration, Element, InterceptorDeclaration, ListenerDeclaration, ProxyDeclaration,
    StaticInjectionRequest,
};
use crate::engine::ProvisionEngine;
use crate::error::{ConfigurationError, CreationError, Message, ProvisionError};
use crate::jit;
use crate::key::{Dependency, Key, TypeDescriptor};
use crate::options::{InjectorOptions, Settings};
use crate::plan::{Instance, PlanLookup};
use crate::registry::BindingRegistry;
use crate::scope::{ScopeAnnotation, Scoping};
use crate::singleton::SingletonCell;
use crate::source::Source;

/// Unique identity of an environment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EnvId(u64);

impl EnvId {
    pub(crate) fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        EnvId(NEXT.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for EnvId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "env#{}", self.0)
    }
}

/// Relationship of an environment to its parent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnvironmentKind {
    Root,
    /// Inherits every parent binding and may add its own.
    Child,
    /// Hidden from the parent except for exposed keys.
    Private,
}

/// A resolved scope declaration.
#[derive(Debug, Clone)]
pub(crate) struct ScopeEntry {
    pub scoping: Scoping,
    pub source: Source,
}

/// One sealed environment.
pub(crate) struct Node {
    pub id: EnvId,
    pub kind: EnvironmentKind,
    pub parent: Option<Weak<Node>>,
    pub registry: BindingRegistry,
    pub private_children: Vec<Arc<Node>>,
    pub children: RwLock<Vec<Arc<Node>>>,
    pub jit: DashMap<Key, Arc<Binding>>,
    pub jit_lock: ReentrantMutex<()>,
    pub blacklist: DashMap<Key, Source>,
    pub provision_cache: DashMap<Key, SingletonCell>,
    pub settings: Settings,
    pub scopes: HashMap<ScopeAnnotation, ScopeEntry>,
    pub converters: Vec<ConverterDeclaration>,
    pub proxies: HashMap<Key, ProxyDeclaration>,
    pub listeners: Vec<ListenerDeclaration>,
    pub interceptors: Vec<InterceptorDeclaration>,
    pub statics: Vec<StaticInjectionRequest>,
    pub plans: Arc<dyn PlanLookup>,
}

impl Node {
    pub fn parent(&self) -> Option<Arc<Node>> {
        self.parent.as_ref().and_then(Weak::upgrade)
    }

    /// This node followed by its ancestors, nearest first.
    pub fn lineage(self: &Arc<Self>) -> Vec<Arc<Node>> {
        let mut lineage = vec![self.clone()];
        while let Some(parent) = lineage.last().and_then(|node| node.parent()) {
            lineage.push(parent);
        }
        lineage
    }

    pub fn root(self: &Arc<Self>) -> Arc<Node> {
        let mut current = self.clone();
        while let Some(parent) = current.parent() {
            current = parent;
        }
        current
    }

    /// Finds an explicit binding on the ancestor chain.
    pub fn find_explicit(self: &Arc<Self>, key: &Key) -> Option<(Arc<Node>, Arc<Binding>)> {
        self.lineage()
            .into_iter()
            .find_map(|node| node.registry.lookup(key).cloned().map(|binding| (node, binding)))
    }

    /// Finds an explicit binding, then a just-in-time binding, on the
    /// ancestor chain.
    pub fn find_existing(self: &Arc<Self>, key: &Key) -> Option<(Arc<Node>, Arc<Binding>)> {
        let lineage = self.lineage();
        lineage
            .iter()
            .find_map(|node| node.registry.lookup(key).map(|binding| (node.clone(), binding.clone())))
            .or_else(|| {
                lineage.iter().find_map(|node| {
                    node.jit
                        .get(key)
                        .map(|binding| (node.clone(), binding.value().clone()))
                })
            })
    }

    /// The proxy capability for `key`, searching the ancestor chain.
    ///
    /// A capability declared for the unqualified type also covers its
    /// qualified keys.
    pub fn find_proxy(self: &Arc<Self>, key: &Key) -> Option<ProxyDeclaration> {
        let unqualified = key.with_qualifier(None);
        let lineage = self.lineage();
        lineage
            .iter()
            .find_map(|node| node.proxies.get(key).cloned())
            .or_else(|| lineage.iter().find_map(|node| node.proxies.get(&unqualified).cloned()))
    }

    /// Listeners matching `key`, outermost environment first.
    pub fn listeners_for(self: &Arc<Self>, key: &Key) -> Vec<ListenerDeclaration> {
        let mut lineage = self.lineage();
        lineage.reverse();
        lineage
            .iter()
            .flat_map(|node| node.listeners.iter())
            .filter(|declaration| declaration.matcher.matches(key))
            .cloned()
            .collect()
    }

    /// Interceptors matching `key`, outermost environment first.
    pub fn interceptors_for(self: &Arc<Self>, key: &Key) -> Vec<InterceptorDeclaration> {
        let mut lineage = self.lineage();
        lineage.reverse();
        lineage
            .iter()
            .flat_map(|node| node.interceptors.iter())
            .filter(|declaration| declaration.matcher.matches(key))
            .cloned()
            .collect()
    }

    /// The singleton cell for `key`, created on first use.
    pub fn singleton_cell(&self, key: &Key) -> SingletonCell {
        self.provision_cache
            .entry(key.clone())
            .or_insert_with(|| SingletonCell::new(key.clone()))
            .clone()
    }

    /// This node and every private descendant, parents before children.
    pub fn private_tree(self: &Arc<Self>) -> Vec<Arc<Node>> {
        let mut nodes = vec![self.clone()];
        let mut index = 0;
        while index < nodes.len() {
            let children = nodes[index].private_children.clone();
            nodes.extend(children);
            index += 1;
        }
        nodes
    }
}

impl fmt::Debug for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Node")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .field("bindings", &self.registry.len())
            .field("jit_bindings", &self.jit.len())
            .field("private_children", &self.private_children.len())
            .finish()
    }
}

// ═══════════════════════════════════════════════════════════════
// Injector
// ═══════════════════════════════════════════════════════════════

/// Handle to a sealed environment.
///
/// Cheap to clone and safe to share between threads.
///
/// # Examples
/// ```
/// use tether_container::element::Element;
/// use tether_container::environment::Injector;
/// use tether_container::key::Key;
///
/// let injector = Injector::builder()
///     .element(Element::bind(Key::named::<String>("greeting")).to_value(String::from("hello")))
///     .build()
///     .unwrap();
///
/// let greeting = injector.get_named::<String>("greeting").unwrap();
/// assert_eq!(greeting.as_str(), "hello");
/// ```
#[derive(Clone)]
pub struct Injector {
    root: Arc<Node>,
    node: Arc<Node>,
}

impl Injector {
    /// Starts building a root environment.
    pub fn builder() -> GraphBuilder {
        GraphBuilder::new()
    }

    pub(crate) fn from_node(node: &Arc<Node>) -> Self {
        Self {
            root: node.root(),
            node: node.clone(),
        }
    }

    pub(crate) fn node(&self) -> &Arc<Node> {
        &self.node
    }

    pub fn id(&self) -> EnvId {
        self.node.id
    }

    pub fn kind(&self) -> EnvironmentKind {
        self.node.kind
    }

    /// Effective options of this environment, inherited flags included.
    pub fn options(&self) -> InjectorOptions {
        self.node.settings.to_options()
    }

    /// Provides an instance for `key`.
    ///
    /// # Errors
    /// Returns a [`ProvisionError`] carrying every message raised during
    /// the request and the dependency chain to the failure point.
    pub fn get_instance(&self, key: &Key) -> Result<Instance, ProvisionError> {
        trace!(key = %key, env = %self.node.id, "Resolving");
        let mut engine = ProvisionEngine::new();
        engine
            .provide(&self.node, &Dependency::new(key.clone()))?
            .ok_or_else(|| Message::null_injected(key).with_chain(vec![key.clone()]).into())
    }

    /// Provides `Key::of::<T>()` as `Arc<T>`.
    pub fn get<T: Send + Sync + 'static>(&self) -> Result<Arc<T>, ProvisionError> {
        self.get_key(&Key::of::<T>())
    }

    /// Provides `Key::named::<T>(name)` as `Arc<T>`.
    pub fn get_named<T: Send + Sync + 'static>(&self, name: &'static str) -> Result<Arc<T>, ProvisionError> {
        self.get_key(&Key::named::<T>(name))
    }

    /// Provides `key`, which must be keyed by type `T`.
    pub fn get_key<T: Send + Sync + 'static>(&self, key: &Key) -> Result<Arc<T>, ProvisionError> {
        downcast(key, self.get_instance(key)?)
    }

    /// A handle that provisions `key` on demand.
    pub fn provider(&self, key: Key) -> ProviderHandle {
        ProviderHandle {
            injector: self.clone(),
            key,
        }
    }

    /// Looks up an existing binding without creating a just-in-time one.
    pub fn get_binding(&self, key: &Key) -> Option<Arc<Binding>> {
        self.node.find_existing(key).map(|(_, binding)| binding)
    }

    /// Looks up a binding, creating a just-in-time binding if allowed.
    ///
    /// # Errors
    /// Returns a [`ConfigurationError`] if no binding exists and none can
    /// be synthesised.
    pub fn get_or_create_binding(&self, key: &Key) -> Result<Arc<Binding>, ConfigurationError> {
        jit::ensure_binding(&self.node, key)
            .map(|(_, binding)| binding)
            .map_err(ConfigurationError::from)
    }

    /// Explicit bindings of this environment, in declaration order.
    pub fn bindings(&self) -> Vec<Arc<Binding>> {
        self.node.registry.all().map(|(_, binding)| binding.clone()).collect()
    }

    /// Just-in-time bindings created in this environment so far.
    pub fn jit_bindings(&self) -> Vec<Arc<Binding>> {
        self.node.jit.iter().map(|entry| entry.value().clone()).collect()
    }

    pub fn parent(&self) -> Option<Injector> {
        self.node.parent().map(|parent| Injector {
            root: self.root.clone(),
            node: parent,
        })
    }

    /// Private environments declared in this environment's elements.
    pub fn private_environments(&self) -> Vec<Injector> {
        self.node
            .private_children
            .iter()
            .map(|child| Injector {
                root: self.root.clone(),
                node: child.clone(),
            })
            .collect()
    }

    /// Child environments created with [`Injector::create_child`].
    pub fn children(&self) -> Vec<Injector> {
        self.node
            .children
            .read()
            .iter()
            .map(|child| Injector {
                root: self.root.clone(),
                node: child.clone(),
            })
            .collect()
    }

    /// Starts building a child environment.
    pub fn child_builder(&self) -> GraphBuilder {
        GraphBuilder::child_of(self.clone())
    }

    /// Builds a child environment that inherits every binding of this one.
    ///
    /// # Errors
    /// Returns a [`CreationError`] with every configuration error found.
    pub fn create_child(&self, elements: Vec<Element>) -> Result<Injector, CreationError> {
        self.child_builder().elements(elements).build()
    }

    /// Runs the member injection points of `ty` on an existing instance.
    pub fn inject_members(&self, instance: &Instance, ty: &TypeDescriptor) -> Result<(), ProvisionError> {
        let mut engine = ProvisionEngine::new();
        engine.inject_members(&self.node, ty, instance)
    }
}

impl fmt::Debug for Injector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Injector")
            .field("id", &self.node.id)
            .field("kind", &self.node.kind)
            .field("bindings", &self.node.registry.len())
            .finish()
    }
}

/// Provisions one key on demand.
#[derive(Clone)]
pub struct ProviderHandle {
    injector: Injector,
    key: Key,
}

impl ProviderHandle {
    pub fn key(&self) -> &Key {
        &self.key
    }

    pub fn get(&self) -> Result<Instance, ProvisionError> {
        self.injector.get_instance(&self.key)
    }

    /// Provides the key as `Arc<T>`.
    pub fn get_as<T: Send + Sync + 'static>(&self) -> Result<Arc<T>, ProvisionError> {
        self.injector.get_key(&self.key)
    }
}

impl fmt::Debug for ProviderHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ProviderHandle({:?})", self.key)
    }
}
