//! The graph builder: turns configuration elements into sealed environments.
//!
//! A build pass runs in three phases:
//! 1. **Registration**: elements are turned into bindings, declarations and
//!    private environments. Scope annotations, constants and untargetted
//!    bindings are resolved here.
//! 2. **Validation**: the sealed tree is checked by the
//!    [`GraphValidator`](crate::graph::GraphValidator).
//! 3. **Initialization**: static injections run, then eager singletons are
//!    constructed in declaration order.
//!
//! Registration and validation both run even when registration reports
//! errors, skipping dependencies on keys whose bindings were rejected.
//! Initialization only runs on a clean graph. The pass fails with one
//! [`CreationError`] carrying every error.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Weak};

use dashmap::DashMap;
use parking_lot::{ReentrantMutex, RwLock};
use tracing::{debug, info, instrument, warn};

use crate::binding::{Binding, BindingOrigin, BindingTarget, ProviderFactory};
use crate::converter::{builtin_converters, convert_constant};
use crate::element::{
    BindingElement, BindingSpec, ConverterDeclaration, Element, EnvironmentOption, InterceptorDeclaration,
    ListenerDeclaration, PrivateElements, ProxyDeclaration, ScopeDeclaration, StaticInjectionRequest,
};
use crate::engine::ProvisionEngine;
use crate::environment::{EnvId, EnvironmentKind, Injector, Node, ProviderHandle, ScopeEntry};
use crate::error::{CreationError, ErrorKind, Errors, Message};
use crate::graph::GraphValidator;
use crate::jit;
use crate::key::Key;
use crate::module::{Elements, Module};
use crate::options::{InjectorOptions, Settings, Stage};
use crate::plan::{ConstructionPlan, PlanChain, PlanLookup, RegisteredPlans, instance_type_id};
use crate::registry::BindingRegistry;
use crate::scope::{ScopeAnnotation, Scoping, Singleton, same_scope};
use crate::source::Source;

/// Builds an [`Injector`] from configuration elements.
///
/// # Examples
/// ```
/// use tether_container::builder::GraphBuilder;
/// use tether_container::element::Element;
/// use tether_container::key::Key;
/// use tether_container::options::Stage;
///
/// let injector = GraphBuilder::new()
///     .stage(Stage::Production)
///     .element(Element::constant(Key::named::<u16>("port"), "8080"))
///     .build()
///     .unwrap();
///
/// assert_eq!(*injector.get_named::<u16>("port").unwrap(), 8080);
/// ```
pub struct GraphBuilder {
    elements: Vec<Element>,
    options: InjectorOptions,
    plans: PlanChain,
    parent: Option<Injector>,
}

impl GraphBuilder {
    /// Starts a root environment.
    pub fn new() -> Self {
        Self {
            elements: Vec::new(),
            options: InjectorOptions::default(),
            plans: PlanChain::new(),
            parent: None,
        }
    }

    pub(crate) fn child_of(parent: Injector) -> Self {
        Self {
            parent: Some(parent),
            ..Self::new()
        }
    }

    pub fn element(mut self, element: impl Into<Element>) -> Self {
        self.elements.push(element.into());
        self
    }

    pub fn elements(mut self, elements: impl IntoIterator<Item = Element>) -> Self {
        self.elements.extend(elements);
        self
    }

    /// Adds the elements of a [`Module`].
    pub fn install(mut self, module: &dyn Module) -> Self {
        let mut elements = Elements::new();
        elements.install(module);
        self.elements.extend(elements.into_vec());
        self
    }

    /// Replaces all options at once.
    pub fn options(mut self, options: InjectorOptions) -> Self {
        self.options = options;
        self
    }

    /// Sets the stage. Ignored for child environments, which use the root's.
    pub fn stage(mut self, stage: Stage) -> Self {
        self.options.stage = stage;
        self
    }

    pub fn require_explicit_bindings(mut self, require: bool) -> Self {
        self.options.require_explicit_bindings = require;
        self
    }

    pub fn jit_must_be_in_root(mut self, in_root: bool) -> Self {
        self.options.jit_must_be_in_root = in_root;
        self
    }

    pub fn disable_circular_proxies(mut self, disable: bool) -> Self {
        self.options.disable_circular_proxies = disable;
        self
    }

    /// Allow child environments to override this environment's bindings.
    pub fn allow_override(mut self, allow: bool) -> Self {
        self.options.allow_override = allow;
        self
    }

    pub fn disable_interception(mut self, disable: bool) -> Self {
        self.options.disable_interception = disable;
        self
    }

    /// Adds a source of injection plans, consulted before those added
    /// later, the parent's and the statically registered ones.
    pub fn plans(mut self, lookup: impl PlanLookup + 'static) -> Self {
        self.plans.push(Arc::new(lookup));
        self
    }

    /// Builds and seals the environment.
    ///
    /// # Errors
    /// Returns a [`CreationError`] listing every problem found.
    #[instrument(skip(self), name = "environment_build", fields(elements = self.elements.len()))]
    pub fn build(self) -> Result<Injector, CreationError> {
        info!(child = self.parent.is_some(), "Building environment");

        let GraphBuilder {
            elements,
            options,
            mut plans,
            parent,
        } = self;

        match &parent {
            Some(parent) => plans.push(parent.node().plans.clone()),
            None => plans.push(Arc::new(RegisteredPlans)),
        }
        let plans: Arc<dyn PlanLookup> = Arc::new(plans);

        let mut errors = Errors::new();

        // ── Phase 1: registration ──
        let (kind, lineage) = match &parent {
            Some(parent) => (EnvironmentKind::Child, Lineage::Built(parent.node())),
            None => (EnvironmentKind::Root, Lineage::Root),
        };
        let draft = draft_environment(elements, options, kind, &lineage, &plans, &mut errors);
        let rejected = draft.rejected_keys();

        let weak_parent = parent.as_ref().map(|parent| Arc::downgrade(parent.node()));
        let node = seal(draft, weak_parent, &plans);
        debug!(env = %node.id, bindings = node.registry.len(), "Environment sealed");

        // ── Phase 2: validation ──
        let mut validator = GraphValidator::new().skipping(rejected);
        validator.validate(&node, &mut errors);
        if errors.has_errors() {
            jit::discard(validator.into_created());
            return fail(errors);
        }

        // ── Phase 3: initialization ──
        if node.settings.stage != Stage::Tool {
            initialize(&node, &mut errors);
            if errors.has_errors() {
                return fail(errors);
            }
        }

        if let Some(parent) = &parent {
            attach_child(parent.node(), &node);
        }

        info!(env = %node.id, "Environment built successfully");
        Ok(Injector::from_node(&node))
    }
}

impl Default for GraphBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Builds a root environment from `elements` with default options.
pub fn build_environment(elements: Vec<Element>) -> Result<Injector, CreationError> {
    GraphBuilder::new().elements(elements).build()
}

fn fail(errors: Errors) -> Result<Injector, CreationError> {
    warn!(errors = errors.len(), "Environment build failed");
    Err(CreationError::new(errors.into_messages()))
}

// ═══════════════════════════════════════════════════════════════
// Phase 1: registration
// ═══════════════════════════════════════════════════════════════

/// An environment under construction.
struct NodeDraft {
    id: EnvId,
    kind: EnvironmentKind,
    registry: BindingRegistry,
    settings: Settings,
    scopes: HashMap<ScopeAnnotation, ScopeEntry>,
    converters: Vec<ConverterDeclaration>,
    proxies: HashMap<Key, ProxyDeclaration>,
    listeners: Vec<ListenerDeclaration>,
    interceptors: Vec<InterceptorDeclaration>,
    statics: Vec<StaticInjectionRequest>,
    private_children: Vec<NodeDraft>,
    blacklist: HashMap<Key, Source>,
    /// Keys whose binding could not be registered.
    rejected: HashSet<Key>,
}

impl NodeDraft {
    /// Rejected keys of this draft and its private drafts.
    fn rejected_keys(&self) -> HashSet<Key> {
        let mut keys = self.rejected.clone();
        for child in &self.private_children {
            keys.extend(child.rejected_keys());
        }
        keys
    }
}

/// What a draft can see above itself.
enum Lineage<'a> {
    Root,
    Built(&'a Arc<Node>),
    Draft(&'a NodeDraft, &'a Lineage<'a>),
}

impl Lineage<'_> {
    fn settings(&self) -> Option<Settings> {
        match self {
            Lineage::Root => None,
            Lineage::Built(node) => Some(node.settings),
            Lineage::Draft(draft, _) => Some(draft.settings),
        }
    }

    fn scopes(&self) -> HashMap<ScopeAnnotation, ScopeEntry> {
        match self {
            Lineage::Root => HashMap::from([(
                ScopeAnnotation::of::<Singleton>(),
                ScopeEntry {
                    scoping: Scoping::Singleton,
                    source: Source::Framework,
                },
            )]),
            Lineage::Built(node) => node.scopes.clone(),
            Lineage::Draft(draft, _) => draft.scopes.clone(),
        }
    }

    fn converters(&self) -> Vec<ConverterDeclaration> {
        match self {
            Lineage::Root => builtin_converters(),
            Lineage::Built(node) => node.converters.clone(),
            Lineage::Draft(draft, _) => draft.converters.clone(),
        }
    }

    /// The nearest user binding for `key` above the draft, and whether its
    /// environment lets descendants override it.
    fn find_binding(&self, key: &Key) -> Option<(Arc<Binding>, bool)> {
        match self {
            Lineage::Root => None,
            Lineage::Built(node) => node
                .find_explicit(key)
                .filter(|(_, binding)| binding.origin() != BindingOrigin::Framework)
                .map(|(owner, binding)| (binding, owner.settings.allow_override)),
            Lineage::Draft(draft, parent) => draft
                .registry
                .lookup(key)
                .filter(|binding| binding.origin() != BindingOrigin::Framework)
                .map(|binding| (binding.clone(), draft.settings.allow_override))
                .or_else(|| parent.find_binding(key)),
        }
    }

    fn has_jit(&self, key: &Key) -> bool {
        match self {
            Lineage::Root => false,
            Lineage::Built(node) => node.lineage().iter().any(|node| node.jit.contains_key(key)),
            Lineage::Draft(_, parent) => parent.has_jit(key),
        }
    }
}

/// Elements of one environment, sorted by what they declare.
#[derive(Default)]
struct Partition {
    bindings: Vec<Element>,
    scopes: Vec<ScopeDeclaration>,
    converters: Vec<ConverterDeclaration>,
    statics: Vec<StaticInjectionRequest>,
    privates: Vec<PrivateElements>,
    listeners: Vec<ListenerDeclaration>,
    interceptors: Vec<InterceptorDeclaration>,
    proxies: Vec<ProxyDeclaration>,
    options: Vec<EnvironmentOption>,
}

impl Partition {
    fn new(elements: Vec<Element>) -> Self {
        let mut partition = Partition::default();
        for element in elements {
            match element {
                Element::Binding(_) | Element::Constant(_) | Element::ProviderMethod(_) => {
                    partition.bindings.push(element)
                }
                Element::ScopeDeclaration(declaration) => partition.scopes.push(declaration),
                Element::Converter(declaration) => partition.converters.push(declaration),
                Element::StaticInjection(request) => partition.statics.push(request),
                Element::PrivateEnvironment(private) => partition.privates.push(private),
                Element::Listener(declaration) => partition.listeners.push(declaration),
                Element::Interceptor(declaration) => partition.interceptors.push(declaration),
                Element::Proxy(declaration) => partition.proxies.push(declaration),
                Element::Option(option) => partition.options.push(option.option),
            }
        }
        partition
    }
}

fn draft_environment(
    elements: Vec<Element>,
    mut options: InjectorOptions,
    kind: EnvironmentKind,
    lineage: &Lineage<'_>,
    plans: &Arc<dyn PlanLookup>,
    errors: &mut Errors,
) -> NodeDraft {
    let partition = Partition::new(elements);

    for option in &partition.options {
        match option {
            EnvironmentOption::DisableCircularProxies => options.disable_circular_proxies = true,
            EnvironmentOption::RequireExplicitBindings => options.require_explicit_bindings = true,
            EnvironmentOption::JitMustBeInRoot => options.jit_must_be_in_root = true,
        }
    }
    let parent_settings = lineage.settings();
    let settings = Settings::derive(parent_settings.as_ref(), &options);

    let mut draft = NodeDraft {
        id: EnvId::next(),
        kind,
        registry: BindingRegistry::new(),
        settings,
        scopes: lineage.scopes(),
        converters: lineage.converters(),
        proxies: HashMap::new(),
        listeners: partition.listeners,
        interceptors: Vec::new(),
        statics: partition.statics,
        private_children: Vec::new(),
        blacklist: HashMap::new(),
        rejected: HashSet::new(),
    };
    debug!(env = %draft.id, kind = ?kind, "Registering elements");

    declare_scopes(&mut draft, partition.scopes, errors);
    draft.converters.extend(partition.converters);

    for declaration in partition.proxies {
        match draft.proxies.get(&declaration.key) {
            Some(existing) => {
                let message = Message::duplicate_proxy(&declaration.key, &existing.source);
                errors.with_source(&declaration.source, |errors| {
                    errors.push(message);
                });
            }
            None => {
                draft.proxies.insert(declaration.key.clone(), declaration);
            }
        }
    }

    if settings.interception {
        draft.interceptors = partition.interceptors;
    } else {
        for declaration in &partition.interceptors {
            errors.with_source(&declaration.source, |errors| {
                errors.push(Message::aop_disabled());
            });
        }
    }

    draft
        .registry
        .insert(Binding::framework(Key::of::<Injector>(), BindingTarget::Injector))
        .ok();

    for element in &partition.bindings {
        let source = element.source().clone();
        errors.with_source(&source, |errors| match binding_from_element(element, &draft, plans) {
            Ok(binding) => register(&mut draft, lineage, binding, errors),
            Err(message) => {
                draft.rejected.extend(element.key().cloned());
                errors.push(message);
            }
        });
    }

    let mut children = Vec::with_capacity(partition.privates.len());
    for private in partition.privates {
        let child = errors.with_source(&private.source, |errors| {
            draft_environment(
                private.elements,
                InjectorOptions::default(),
                EnvironmentKind::Private,
                &Lineage::Draft(&draft, lineage),
                plans,
                errors,
            )
        });
        children.push((child, private.exposed));
    }

    for (index, (child, exposed)) in children.into_iter().enumerate() {
        for (key, source) in exposed {
            errors.with_source(&source, |errors| {
                if child.registry.contains(&key) {
                    let binding = Binding::new(key, BindingTarget::Exposed(index), Scoping::Unscoped, source.clone());
                    register(&mut draft, lineage, binding, errors);
                } else {
                    errors.push(Message::exposed_but_not_bound(&key));
                    draft.rejected.insert(key);
                }
            });
        }

        for (key, binding) in child.registry.all() {
            if binding.origin() != BindingOrigin::Framework {
                draft.blacklist.entry(key.clone()).or_insert_with(|| binding.source().clone());
            }
        }
        for (key, source) in &child.blacklist {
            draft.blacklist.entry(key.clone()).or_insert_with(|| source.clone());
        }
        draft.private_children.push(child);
    }

    draft
}

fn declare_scopes(draft: &mut NodeDraft, declarations: Vec<ScopeDeclaration>, errors: &mut Errors) {
    for declaration in declarations {
        let conflict = match draft.scopes.get(&declaration.annotation) {
            None => None,
            Some(ScopeEntry {
                scoping: Scoping::Scope(existing),
                ..
            }) if same_scope(existing, &declaration.scope) => None,
            Some(entry) => Some(entry.source.clone()),
        };

        match conflict {
            Some(existing) => errors.with_source(&declaration.source, |errors| {
                errors.push(Message::duplicate_scopes(&declaration.annotation, &existing));
            }),
            None => {
                debug!(annotation = %declaration.annotation, scope = declaration.scope.name(), "Declared scope");
                draft.scopes.insert(
                    declaration.annotation,
                    ScopeEntry {
                        scoping: Scoping::Scope(declaration.scope),
                        source: declaration.source,
                    },
                );
            }
        }
    }
}

/// Turns a binding-like element into a binding of the draft environment.
fn binding_from_element(element: &Element, draft: &NodeDraft, plans: &Arc<dyn PlanLookup>) -> Result<Binding, Message> {
    match element {
        Element::Binding(binding) => {
            check_bindable(&binding.key)?;
            let (target, scoping) = target_of(binding, plans)?;
            let scoping = resolve_scoping(scoping, &draft.scopes)?;
            Ok(Binding::new(binding.key.clone(), target, scoping, binding.source.clone()))
        }
        Element::Constant(constant) => {
            check_bindable(&constant.key)?;
            let instance = convert_constant(&draft.converters, &constant.key, &constant.value)?;
            Ok(Binding::new(
                constant.key.clone(),
                BindingTarget::ToInstance(instance),
                Scoping::Unscoped,
                constant.source.clone(),
            ))
        }
        Element::ProviderMethod(method) => {
            check_bindable(&method.key)?;
            let scoping = resolve_scoping(method.scoping.clone(), &draft.scopes)?;
            Ok(Binding::new(
                method.key.clone(),
                BindingTarget::ToProvider(Arc::new(method.method.clone())),
                scoping,
                method.source.clone(),
            ))
        }
        other => Err(Message::new(
            ErrorKind::Other,
            format!("{other:?} does not declare a binding."),
        )),
    }
}

/// Rejects keys the container reserves for itself.
fn check_bindable(key: &Key) -> Result<(), Message> {
    if key.is::<Injector>() {
        return Err(Message::binding_to_framework_type(key));
    }
    if key.is::<ProviderHandle>() || key.is::<Arc<dyn ProviderFactory>>() {
        return Err(Message::binding_to_provider(key));
    }
    Ok(())
}

fn target_of(binding: &BindingElement, plans: &Arc<dyn PlanLookup>) -> Result<(BindingTarget, Scoping), Message> {
    let key = &binding.key;
    match &binding.spec {
        BindingSpec::Untargetted => {
            if key.qualifier().is_some() {
                return Err(Message::missing_implementation(key, &[]));
            }
            let ty = key.type_descriptor();
            let mut candidates = plans.constructors(&ty);
            let plan = match candidates.len() {
                0 => return Err(Message::missing_constructor(&ty)),
                1 => candidates.remove(0),
                count => return Err(Message::too_many_constructors(&ty, count)),
            };
            Ok(constructor_target(plan, &binding.scoping))
        }
        BindingSpec::To(target) => {
            if target.type_id() != key.type_id() {
                return Err(Message::new(
                    ErrorKind::TypeMismatch,
                    format!("{key} cannot be linked to {target}, which has a different type."),
                ));
            }
            Ok((BindingTarget::ToImplementation(target.clone()), binding.scoping.clone()))
        }
        BindingSpec::ToProvider(provider) => Ok((BindingTarget::ToProvider(provider.clone()), binding.scoping.clone())),
        BindingSpec::ToInstance(instance) => {
            if instance_type_id(instance) != key.type_id() {
                return Err(Message::type_mismatch(key, &key.type_descriptor().to_string()));
            }
            Ok((BindingTarget::ToInstance(instance.clone()), binding.scoping.clone()))
        }
        BindingSpec::ToConstructor(plan) => {
            if *plan.ty() != key.type_descriptor() {
                return Err(Message::new(
                    ErrorKind::TypeMismatch,
                    format!("The constructor for {} cannot build {key}.", plan.ty()),
                ));
            }
            Ok(constructor_target(plan.clone(), &binding.scoping))
        }
    }
}

/// A plan's own scope annotation applies unless the binding names a scope.
fn constructor_target(plan: ConstructionPlan, scoping: &Scoping) -> (BindingTarget, Scoping) {
    let scoping = match (scoping, plan.scope()) {
        (Scoping::Unscoped, Some(annotation)) => Scoping::Annotation(annotation),
        (scoping, _) => scoping.clone(),
    };
    (BindingTarget::ToConstructor(plan), scoping)
}

fn resolve_scoping(scoping: Scoping, scopes: &HashMap<ScopeAnnotation, ScopeEntry>) -> Result<Scoping, Message> {
    match scoping {
        Scoping::Annotation(annotation) => scopes
            .get(&annotation)
            .map(|entry| entry.scoping.clone())
            .ok_or_else(|| Message::scope_not_found(&annotation)),
        other => Ok(other),
    }
}

/// Adds a binding to the draft after checking it against its ancestors.
fn register(draft: &mut NodeDraft, lineage: &Lineage<'_>, binding: Binding, errors: &mut Errors) {
    let key = binding.key().clone();

    if let Some((existing, allow_override)) = lineage.find_binding(&key) {
        if !allow_override {
            errors.push(Message::parent_binding_already_set(&key, existing.source()));
            return;
        }
        debug!(key = %key, "Overriding parent binding");
    }

    if lineage.has_jit(&key) {
        errors.push(Message::jit_binding_already_set(&key));
        return;
    }

    if let Err(duplicate) = draft.registry.insert(binding) {
        errors.push(duplicate.into());
    }
}

/// Freezes a draft tree into nodes.
fn seal(draft: NodeDraft, parent: Option<Weak<Node>>, plans: &Arc<dyn PlanLookup>) -> Arc<Node> {
    Arc::new_cyclic(|weak| {
        let private_children = draft
            .private_children
            .into_iter()
            .map(|child| seal(child, Some(weak.clone()), plans))
            .collect();

        Node {
            id: draft.id,
            kind: draft.kind,
            parent,
            registry: draft.registry,
            private_children,
            children: RwLock::new(Vec::new()),
            jit: DashMap::new(),
            jit_lock: ReentrantMutex::new(()),
            blacklist: draft.blacklist.into_iter().collect(),
            provision_cache: DashMap::new(),
            settings: draft.settings,
            scopes: draft.scopes,
            converters: draft.converters,
            proxies: draft.proxies,
            listeners: draft.listeners,
            interceptors: draft.interceptors,
            statics: draft.statics,
            plans: plans.clone(),
        }
    })
}

// ═══════════════════════════════════════════════════════════════
// Phase 3: initialization
// ═══════════════════════════════════════════════════════════════

fn initialize(node: &Arc<Node>, errors: &mut Errors) {
    let tree = node.private_tree();

    for env in &tree {
        for request in &env.statics {
            let result = ProvisionEngine::new().inject_static(env, request);
            if let Err(err) = result {
                errors.with_source(&request.source, |errors| {
                    errors.merge(err.into_messages());
                });
            }
        }
    }

    let production = node.settings.stage == Stage::Production;
    for env in &tree {
        let mut eager: Vec<Arc<Binding>> = env
            .registry
            .all()
            .map(|(_, binding)| binding.clone())
            .filter(|binding| is_eager(binding, production))
            .collect();
        if production {
            eager.extend(
                env.jit
                    .iter()
                    .map(|entry| entry.value().clone())
                    .filter(|binding| binding.scoping().is_singleton()),
            );
        }

        for binding in eager {
            debug!(key = %binding.key(), env = %env.id, "Initializing eager singleton");
            if let Err(err) = ProvisionEngine::new().provide_binding(env, &binding) {
                errors.with_source(binding.source(), |errors| {
                    errors.merge(err.into_messages());
                });
            }
        }
    }
}

fn is_eager(binding: &Binding, production: bool) -> bool {
    if matches!(binding.target(), BindingTarget::Exposed(_)) {
        return false;
    }
    binding.scoping().is_eager() || (production && binding.scoping().is_singleton())
}

/// Records a runtime child under its parent and keeps ancestors from
/// synthesising bindings for keys the child binds.
fn attach_child(parent: &Arc<Node>, child: &Arc<Node>) {
    let mut bound: Vec<(Key, Source)> = child
        .registry
        .all()
        .filter(|(_, binding)| binding.origin() != BindingOrigin::Framework)
        .map(|(key, binding)| (key.clone(), binding.source().clone()))
        .collect();
    bound.extend(
        child
            .blacklist
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone())),
    );

    for ancestor in parent.lineage() {
        for (key, source) in &bound {
            ancestor.blacklist.entry(key.clone()).or_insert_with(|| source.clone());
        }
    }
    parent.children.write().push(child.clone());
}
