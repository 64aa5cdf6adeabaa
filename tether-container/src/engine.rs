//! Runtime provisioning.
//!
//! One [`ProvisionEngine`] serves one top-level request. It keeps the
//! provision path (the stack of bindings under construction) so that a key
//! requested again while it is still being built is detected as a cycle:
//! answered with the partially built instance during member injection,
//! with a circular proxy when allowed, or with an error.

use std::iter;
use std::sync::Arc;

use tracing::{debug, trace, warn};

use crate::binding::{Binding, BindingTarget, Resolver};
use crate::element::StaticInjectionRequest;
use crate::environment::{EnvId, Injector, Node};
use crate::error::{BoxError, ErrorKind, Message, ProvisionError};
use crate::jit;
use crate::key::{Dependency, Key, TypeDescriptor};
use crate::plan::{Arguments, ConstructionPlan, Instance, instance_type_id};
use crate::proxy::ForwardHandle;
use crate::scope::{Provided, Scoping};
use crate::singleton::{Acquired, SingletonCell};
use crate::source::Source;

/// A binding under construction.
struct Frame {
    env: EnvId,
    key: Key,
    /// Set once the constructor has returned, before member injection.
    current: Option<Instance>,
    /// Proxies handed out for this key, resolved when construction ends.
    handles: Vec<ForwardHandle>,
}

impl Frame {
    fn new(env: EnvId, key: Key) -> Self {
        Self {
            env,
            key,
            current: None,
            handles: Vec::new(),
        }
    }
}

pub(crate) struct ProvisionEngine {
    path: Vec<Frame>,
}

impl ProvisionEngine {
    pub fn new() -> Self {
        Self { path: Vec::new() }
    }

    fn chain(&self) -> Vec<Key> {
        self.path.iter().map(|frame| frame.key.clone()).collect()
    }

    fn chain_with(&self, key: &Key) -> Vec<Key> {
        self.path
            .iter()
            .map(|frame| frame.key.clone())
            .chain(iter::once(key.clone()))
            .collect()
    }

    /// Provides `dependency` as seen from `requester`.
    pub fn provide(&mut self, requester: &Arc<Node>, dependency: &Dependency) -> Provided {
        let key = dependency.key();
        trace!(key = %key, env = %requester.id, depth = self.path.len(), "Provisioning");

        let (owner, binding) = jit::ensure_binding(requester, key)
            .map_err(|message| ProvisionError::from(message.with_chain(self.chain_with(key))))?;

        let provided = self.provide_binding(&owner, &binding)?;
        if provided.is_none() && !dependency.is_nullable() {
            return Err(Message::null_injected(key)
                .with_source(binding.source())
                .with_chain(self.chain_with(key))
                .into());
        }
        Ok(provided)
    }

    /// Provides one binding owned by `owner`.
    pub fn provide_binding(&mut self, owner: &Arc<Node>, binding: &Arc<Binding>) -> Provided {
        let key = binding.key();
        if let Some(position) = self
            .path
            .iter()
            .position(|frame| frame.env == owner.id && frame.key == *key)
        {
            return self.reenter(owner, position, key);
        }

        self.path.push(Frame::new(owner.id, key.clone()));
        let result = self.scoped(owner, binding);
        let frame = self.path.pop();

        if let (Ok(Some(instance)), Some(frame)) = (&result, frame) {
            for handle in frame.handles {
                handle.resolve(instance);
            }
        }
        result
    }

    /// A key that is already on the path was requested again.
    fn reenter(&mut self, owner: &Arc<Node>, position: usize, key: &Key) -> Provided {
        if let Some(current) = &self.path[position].current {
            trace!(key = %key, "Re-entered during member injection");
            return Ok(Some(current.clone()));
        }

        if !owner.settings.circular_proxies {
            let cycle: Vec<Key> = self.path[position..]
                .iter()
                .map(|frame| frame.key.clone())
                .chain(iter::once(key.clone()))
                .collect();
            warn!(key = %key, "Circular dependency detected and circular proxies are disabled");
            return Err(Message::circular_dependency(&cycle)
                .with_chain(self.chain_with(key))
                .into());
        }

        let Some(declaration) = owner.find_proxy(key) else {
            return Err(Message::cannot_proxy(key).with_chain(self.chain_with(key)).into());
        };

        warn!(key = %key, "Circular dependency detected, providing a proxy");
        let handle = ForwardHandle::new(key.clone());
        self.path[position].handles.push(handle.clone());
        Ok(Some((declaration.factory)(handle)))
    }

    /// A singleton under construction elsewhere waits, directly or not, on
    /// a singleton this thread is building.
    fn cross_thread_cycle(&mut self, owner: &Arc<Node>, cell: &SingletonCell, key: &Key, mut cycle: Vec<Key>) -> Provided {
        cycle.push(key.clone());
        if !owner.settings.circular_proxies {
            warn!(key = %key, "Circular dependency across threads and circular proxies are disabled");
            return Err(Message::circular_dependency(&cycle)
                .with_chain(self.chain_with(key))
                .into());
        }

        let Some(declaration) = owner.find_proxy(key) else {
            return Err(Message::cannot_proxy(key).with_chain(self.chain_with(key)).into());
        };

        warn!(key = %key, "Circular dependency across threads, providing a proxy");
        let handle = ForwardHandle::new(key.clone());
        cell.defer(handle.clone());
        Ok(Some((declaration.factory)(handle)))
    }

    fn scoped(&mut self, owner: &Arc<Node>, binding: &Arc<Binding>) -> Provided {
        match binding.scoping() {
            Scoping::Unscoped | Scoping::Annotation(_) => self.construct(owner, binding),
            Scoping::Singleton | Scoping::EagerSingleton => {
                let cell = owner.singleton_cell(binding.key());
                match cell.acquire() {
                    Acquired::Ready(provided) => Ok(provided),
                    Acquired::Owned(guard) => {
                        debug!(key = %binding.key(), env = %owner.id, "Constructing singleton");
                        let provided = self.construct(owner, binding)?;
                        guard.complete(provided.clone());
                        Ok(provided)
                    }
                    Acquired::Cycle(cycle) => self.cross_thread_cycle(owner, &cell, binding.key(), cycle),
                }
            }
            Scoping::Scope(scope) => {
                let result = scope.scope(binding.key(), &mut || self.construct(owner, binding));
                result.map_err(|err| attach_chain(err, self.chain()))
            }
        }
    }

    fn construct(&mut self, owner: &Arc<Node>, binding: &Arc<Binding>) -> Provided {
        let key = binding.key();
        match binding.target() {
            BindingTarget::ToInstance(instance) => Ok(Some(instance.clone())),
            BindingTarget::ToImplementation(target) => self.provide(owner, &Dependency::nullable(target.clone())),
            BindingTarget::ToProvider(provider) => {
                let provided = {
                    let mut context = ProvisionContext { engine: self, env: owner };
                    provider.provide(&mut context)
                };
                let provided = provided.map_err(|cause| {
                    self.user_failure(cause, |cause| Message::error_in_custom_provider(key, cause), binding.source())
                })?;
                if let Some(instance) = &provided {
                    self.check_type(key, instance, binding.source())?;
                    self.notify(owner, key, instance)?;
                }
                Ok(provided)
            }
            BindingTarget::ToConstructor(plan) => self.construct_with_plan(owner, key, plan, binding.source()),
            BindingTarget::Exposed(index) => {
                let exposed = owner
                    .private_children
                    .get(*index)
                    .and_then(|child| child.registry.lookup(key).map(|binding| (child.clone(), binding.clone())));
                match exposed {
                    Some((child, exposed)) => self.provide_binding(&child, &exposed),
                    None => Err(Message::exposed_but_not_bound(key)
                        .with_source(binding.source())
                        .with_chain(self.chain())
                        .into()),
                }
            }
            BindingTarget::Injector => Ok(Some(Arc::new(Injector::from_node(owner)) as Instance)),
        }
    }

    fn construct_with_plan(
        &mut self,
        owner: &Arc<Node>,
        key: &Key,
        plan: &ConstructionPlan,
        source: &Source,
    ) -> Provided {
        let arguments = self.resolve_all(owner, plan.constructor_dependencies())?;
        let instance = plan
            .construct(&arguments)
            .map_err(|cause| self.user_failure(cause, |cause| Message::error_injecting_constructor(key, cause), source))?;
        self.check_type(key, &instance, source)?;

        if let Some(frame) = self.path.last_mut() {
            frame.current = Some(instance.clone());
        }

        for member in plan.members() {
            let arguments = self.resolve_all(owner, member.dependencies())?;
            member.inject(&instance, &arguments).map_err(|cause| {
                self.user_failure(
                    cause,
                    |cause| Message::error_injecting_member(key, member.name(), cause),
                    source,
                )
            })?;
        }

        let mut instance = instance;
        for declaration in owner.interceptors_for(key) {
            instance = declaration.interceptor.intercept(key, instance).map_err(|cause| {
                self.user_failure(
                    cause,
                    |cause| Message::error_in_user_code(format!("Error in interceptor for {key}"), cause),
                    &declaration.source,
                )
            })?;
            self.check_type(key, &instance, &declaration.source)?;
        }

        self.notify(owner, key, &instance)?;
        Ok(Some(instance))
    }

    fn resolve_all(&mut self, owner: &Arc<Node>, dependencies: &[Dependency]) -> Result<Arguments, ProvisionError> {
        let mut values = Vec::with_capacity(dependencies.len());
        for dependency in dependencies {
            values.push(self.provide(owner, dependency)?);
        }
        let keys = dependencies.iter().map(|dependency| dependency.key().clone()).collect();
        Ok(Arguments::new(keys, values))
    }

    fn notify(&self, owner: &Arc<Node>, key: &Key, instance: &Instance) -> Result<(), ProvisionError> {
        for declaration in owner.listeners_for(key) {
            declaration.listener.on_provision(key, instance).map_err(|cause| {
                self.user_failure(
                    cause,
                    |cause| Message::error_notifying_listener(key, cause),
                    &declaration.source,
                )
            })?;
        }
        Ok(())
    }

    fn check_type(&self, key: &Key, instance: &Instance, source: &Source) -> Result<(), ProvisionError> {
        if instance_type_id(instance) == key.type_id() {
            return Ok(());
        }
        Err(Message::type_mismatch(key, &key.type_descriptor().to_string())
            .with_source(source)
            .with_chain(self.chain())
            .into())
    }

    /// Wraps a user-code error, passing nested provision errors through.
    fn user_failure(
        &self,
        cause: BoxError,
        wrap: impl FnOnce(BoxError) -> Message,
        source: &Source,
    ) -> ProvisionError {
        match cause.downcast::<ProvisionError>() {
            Ok(nested) => *nested,
            Err(cause) => wrap(cause).with_source(source).with_chain(self.chain()).into(),
        }
    }

    /// Runs the static injection points of a requested type.
    pub fn inject_static(&mut self, node: &Arc<Node>, request: &StaticInjectionRequest) -> Result<(), ProvisionError> {
        for injection in node.plans.static_injections(&request.ty) {
            debug!(ty = %request.ty, point = injection.name(), "Static injection");
            let arguments = self.resolve_all(node, injection.dependencies())?;
            injection.inject(&arguments).map_err(|cause| {
                self.user_failure(
                    cause,
                    |cause| Message::error_injecting_member(request.ty, injection.name(), cause),
                    &request.source,
                )
            })?;
        }
        Ok(())
    }

    /// Runs the member injection points of `ty` on an existing instance.
    pub fn inject_members(&mut self, node: &Arc<Node>, ty: &TypeDescriptor, instance: &Instance) -> Result<(), ProvisionError> {
        if ty.type_id() != Some(instance_type_id(instance)) {
            return Err(Message::new(
                ErrorKind::TypeMismatch,
                format!("The instance handed to member injection is not a {ty}."),
            )
            .into());
        }
        for member in node.plans.members(ty) {
            let arguments = self.resolve_all(node, member.dependencies())?;
            member.inject(instance, &arguments).map_err(|cause| {
                self.user_failure(
                    cause,
                    |cause| Message::error_injecting_member(ty, member.name(), cause),
                    &Source::Unknown,
                )
            })?;
        }
        Ok(())
    }
}

/// Gives provider code access to the engine's provision path.
struct ProvisionContext<'a> {
    engine: &'a mut ProvisionEngine,
    env: &'a Arc<Node>,
}

impl Resolver for ProvisionContext<'_> {
    fn resolve(&mut self, dependency: &Dependency) -> Provided {
        self.engine.provide(self.env, dependency)
    }

    fn injector(&self) -> Injector {
        Injector::from_node(self.env)
    }
}

/// Fills in the chain of messages raised without one, such as scope errors.
fn attach_chain(err: ProvisionError, chain: Vec<Key>) -> ProvisionError {
    let messages = err
        .into_messages()
        .into_iter()
        .map(|message| {
            if message.chain().is_empty() {
                message.with_chain(chain.clone())
            } else {
                message
            }
        })
        .collect();
    ProvisionError::new(messages)
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use once_cell::sync::OnceCell;

    use super::*;
    use crate::binding::ProviderMethod;
    use crate::element::{Element, Matcher, ProvisionListener};
    use crate::plan::{MemberInjection, PlanTable};

    #[derive(Debug)]
    struct Clock;

    #[derive(Debug)]
    struct Service {
        clock: Arc<Clock>,
    }

    struct Peer {
        peer: OnceCell<Arc<Peer>>,
    }

    fn table() -> PlanTable {
        PlanTable::new()
            .with(ConstructionPlan::new::<Clock, _>(vec![], |_| Ok(Clock)))
            .with(ConstructionPlan::new::<Service, _>(vec![Dependency::of::<Clock>()], |args| {
                Ok(Service { clock: args.get::<Clock>(0)? })
            }))
    }

    #[test]
    fn constructs_dependencies_fresh_each_time() {
        let injector = Injector::builder().plans(table()).build().unwrap();
        let a = injector.get::<Service>().unwrap();
        let b = injector.get::<Service>().unwrap();
        assert!(!Arc::ptr_eq(&a, &b));
        assert!(!Arc::ptr_eq(&a.clock, &b.clock));
    }

    #[test]
    fn member_injection_reentry_sees_current_instance() {
        let plans = PlanTable::new().with(
            ConstructionPlan::new::<Peer, _>(vec![], |_| Ok(Peer { peer: OnceCell::new() }))
                .member(MemberInjection::field::<Peer, _>(
                    "peer",
                    Dependency::of::<Peer>(),
                    |node, args| {
                        let _ = node.peer.set(args.get::<Peer>(0)?);
                        Ok(())
                    },
                )),
        );
        let injector = Injector::builder().plans(plans).build().unwrap();
        let node = injector.get::<Peer>().unwrap();
        assert!(Arc::ptr_eq(node.peer.get().unwrap(), &node));
    }

    #[test]
    fn provider_errors_are_wrapped_with_chain() {
        let injector = Injector::builder()
            .plans(table())
            .element(Element::provider_method(
                Key::of::<Clock>(),
                ProviderMethod::new::<Clock, _>(vec![], |_| Err("clock is broken".into())),
            ))
            .build()
            .unwrap();

        let err = injector.get::<Service>().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ErrorInCustomProvider);
        assert_eq!(err.chain(), &[Key::of::<Service>(), Key::of::<Clock>()]);
        assert!(err.messages()[0].cause().is_some());
    }

    #[test]
    fn listeners_see_fresh_constructions_only() {
        struct Counting(AtomicUsize);

        impl ProvisionListener for Counting {
            fn on_provision(&self, _key: &Key, _instance: &Instance) -> Result<(), BoxError> {
                self.0.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        }

        let listener = Arc::new(Counting(AtomicUsize::new(0)));
        let injector = Injector::builder()
            .plans(table())
            .element(Element::bind(Key::of::<Clock>()).in_scope(Scoping::Singleton))
            .element(Element::listener(Matcher::<Key>::of_type::<Clock>(), listener.clone()))
            .build()
            .unwrap();

        injector.get::<Service>().unwrap();
        injector.get::<Service>().unwrap();
        assert_eq!(listener.0.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn nullable_dependency_accepts_empty_provider() {
        let injector = Injector::builder()
            .element(Element::provider_method(
                Key::named::<String>("nickname"),
                ProviderMethod::optional::<String, _>(vec![], |_| Ok(None)),
            ))
            .element(Element::provider_method(
                Key::of::<String>(),
                ProviderMethod::new::<String, _>(
                    vec![Dependency::nullable(Key::named::<String>("nickname"))],
                    |args| {
                        Ok(args
                            .optional::<String>(0)?
                            .map_or_else(|| String::from("anonymous"), |name| (*name).clone()))
                    },
                ),
            ))
            .build()
            .unwrap();

        assert_eq!(injector.get::<String>().unwrap().as_str(), "anonymous");

        let err = injector.get_named::<String>("nickname").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NullInjectedIntoNonNullable);
    }
}
