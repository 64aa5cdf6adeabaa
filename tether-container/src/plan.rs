//! Injection plans: how a type is constructed and which members it needs.
//!
//! The container never inspects types. A front-end (hand-written code, a
//! macro, static registration) describes each injectable type with a
//! [`ConstructionPlan`] and hands the plans over through a [`PlanLookup`].

use std::any::{Any, TypeId};
use std::borrow::Cow;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::error::BoxError;
use crate::key::{Dependency, Key, TypeDescriptor};
use crate::scope::ScopeAnnotation;

/// A provisioned value, type-erased.
///
/// An instance provided for `Key::of::<T>()` is always an `Arc<T>`.
pub type Instance = Arc<dyn Any + Send + Sync>;

/// The concrete type of the value behind an instance.
pub fn instance_type_id(instance: &Instance) -> TypeId {
    let any: &dyn Any = &**instance;
    any.type_id()
}

/// Wraps a value as an [`Instance`].
pub fn instance<T: Send + Sync + 'static>(value: T) -> Instance {
    Arc::new(value)
}

/// Error raised while reading resolved arguments.
#[derive(Debug, thiserror::Error)]
pub enum ArgumentError {
    #[error("argument {index} is out of range, the plan declares {len} dependencies")]
    OutOfRange { index: usize, len: usize },

    #[error("argument {index} ({key}) is empty")]
    Empty { index: usize, key: Key },

    #[error("argument {index} ({key}) is not a {expected}")]
    TypeMismatch {
        index: usize,
        key: Key,
        expected: &'static str,
    },

    #[error("injection target is not a {expected}")]
    Target { expected: &'static str },
}

/// Resolved dependencies, in the order the plan declared them.
pub struct Arguments {
    keys: Vec<Key>,
    values: Vec<Option<Instance>>,
}

impl Arguments {
    pub(crate) fn new(keys: Vec<Key>, values: Vec<Option<Instance>>) -> Self {
        Self { keys, values }
    }

    /// Returns argument `index` as `Arc<T>`.
    ///
    /// # Errors
    /// Fails if the index is out of range, the argument was provided as
    /// `None` or has another type.
    pub fn get<T: Send + Sync + 'static>(&self, index: usize) -> Result<Arc<T>, ArgumentError> {
        let value = self.optional::<T>(index)?;
        value.ok_or_else(|| ArgumentError::Empty {
            index,
            key: self.keys[index].clone(),
        })
    }

    /// Returns a clone of argument `index`.
    pub fn cloned<T: Clone + Send + Sync + 'static>(&self, index: usize) -> Result<T, ArgumentError> {
        self.get::<T>(index).map(|value| (*value).clone())
    }

    /// Returns argument `index`, which may be absent for nullable dependencies.
    pub fn optional<T: Send + Sync + 'static>(
        &self,
        index: usize,
    ) -> Result<Option<Arc<T>>, ArgumentError> {
        let len = self.values.len();
        let Some(value) = self.values.get(index) else {
            return Err(ArgumentError::OutOfRange { index, len });
        };

        match value {
            None => Ok(None),
            Some(instance) => instance
                .clone()
                .downcast::<T>()
                .map(Some)
                .map_err(|_| ArgumentError::TypeMismatch {
                    index,
                    key: self.keys[index].clone(),
                    expected: std::any::type_name::<T>(),
                }),
        }
    }

    /// Returns argument `index` without downcasting.
    pub fn instance(&self, index: usize) -> Option<&Instance> {
        self.values.get(index).and_then(Option::as_ref)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

pub type ConstructFn = Arc<dyn Fn(&Arguments) -> Result<Instance, BoxError> + Send + Sync>;
pub type MemberFn = Arc<dyn Fn(&Instance, &Arguments) -> Result<(), BoxError> + Send + Sync>;
pub type StaticFn = Arc<dyn Fn(&Arguments) -> Result<(), BoxError> + Send + Sync>;

// ═══════════════════════════════════════════════════════════════
// ConstructionPlan
// ═══════════════════════════════════════════════════════════════

/// How to construct one type.
#[derive(Clone)]
pub struct ConstructionPlan {
    ty: TypeDescriptor,
    constructor_dependencies: Vec<Dependency>,
    construct: ConstructFn,
    members: Vec<MemberInjection>,
    scope: Option<ScopeAnnotation>,
}

impl ConstructionPlan {
    /// A plan that builds a `T` from its constructor arguments.
    ///
    /// # Examples
    /// ```
    /// use tether_container::key::Dependency;
    /// use tether_container::plan::ConstructionPlan;
    ///
    /// struct Greeter {
    ///     greeting: String,
    /// }
    ///
    /// let plan = ConstructionPlan::new::<Greeter, _>(
    ///     vec![Dependency::of::<String>()],
    ///     |args| Ok(Greeter { greeting: args.cloned::<String>(0)? }),
    /// );
    /// assert_eq!(plan.constructor_dependencies().len(), 1);
    /// ```
    pub fn new<T, F>(dependencies: Vec<Dependency>, construct: F) -> Self
    where
        T: Send + Sync + 'static,
        F: Fn(&Arguments) -> Result<T, BoxError> + Send + Sync + 'static,
    {
        Self::from_fn(
            TypeDescriptor::of::<T>(),
            dependencies,
            Arc::new(move |args: &Arguments| construct(args).map(|value| Arc::new(value) as Instance)),
        )
    }

    /// A plan for an already type-erased constructor.
    pub fn from_fn(ty: TypeDescriptor, dependencies: Vec<Dependency>, construct: ConstructFn) -> Self {
        Self {
            ty,
            constructor_dependencies: dependencies,
            construct,
            members: Vec::new(),
            scope: None,
        }
    }

    /// Adds a member injection point, applied after construction in the
    /// order they were added.
    pub fn member(mut self, member: MemberInjection) -> Self {
        self.members.push(member);
        self
    }

    /// Declares the type's own scope annotation.
    pub fn in_scope(mut self, annotation: ScopeAnnotation) -> Self {
        self.scope = Some(annotation);
        self
    }

    pub fn ty(&self) -> &TypeDescriptor {
        &self.ty
    }

    pub fn constructor_dependencies(&self) -> &[Dependency] {
        &self.constructor_dependencies
    }

    pub fn members(&self) -> &[MemberInjection] {
        &self.members
    }

    pub fn scope(&self) -> Option<ScopeAnnotation> {
        self.scope
    }

    /// Constructor dependencies followed by every member dependency.
    pub fn dependencies(&self) -> Vec<Dependency> {
        self.constructor_dependencies
            .iter()
            .chain(self.members.iter().flat_map(|m| m.dependencies.iter()))
            .cloned()
            .collect()
    }

    pub(crate) fn construct(&self, args: &Arguments) -> Result<Instance, BoxError> {
        (self.construct)(args)
    }

    /// Returns `true` if both plans share the same constructor function.
    pub(crate) fn same_constructor(&self, other: &ConstructionPlan) -> bool {
        self.ty == other.ty
            && std::ptr::eq(
                Arc::as_ptr(&self.construct) as *const (),
                Arc::as_ptr(&other.construct) as *const (),
            )
    }
}

impl fmt::Debug for ConstructionPlan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConstructionPlan")
            .field("ty", &self.ty)
            .field("constructor_dependencies", &self.constructor_dependencies)
            .field("members", &self.members)
            .field("scope", &self.scope)
            .finish()
    }
}

/// Kind of a member injection point.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemberKind {
    Field,
    Method,
}

/// A field or method injected after construction.
#[derive(Clone)]
pub struct MemberInjection {
    kind: MemberKind,
    name: Cow<'static, str>,
    dependencies: Vec<Dependency>,
    inject: MemberFn,
}

impl MemberInjection {
    /// A method injection point on a `T`.
    pub fn method<T, F>(name: impl Into<Cow<'static, str>>, dependencies: Vec<Dependency>, inject: F) -> Self
    where
        T: Send + Sync + 'static,
        F: Fn(&T, &Arguments) -> Result<(), BoxError> + Send + Sync + 'static,
    {
        Self::typed(MemberKind::Method, name.into(), dependencies, inject)
    }

    /// A field injection point on a `T`.
    ///
    /// Instances are shared, so the field needs interior mutability
    /// (usually a `OnceCell`).
    pub fn field<T, F>(name: impl Into<Cow<'static, str>>, dependency: Dependency, inject: F) -> Self
    where
        T: Send + Sync + 'static,
        F: Fn(&T, &Arguments) -> Result<(), BoxError> + Send + Sync + 'static,
    {
        Self::typed(MemberKind::Field, name.into(), vec![dependency], inject)
    }

    fn typed<T, F>(kind: MemberKind, name: Cow<'static, str>, dependencies: Vec<Dependency>, inject: F) -> Self
    where
        T: Send + Sync + 'static,
        F: Fn(&T, &Arguments) -> Result<(), BoxError> + Send + Sync + 'static,
    {
        let inject: MemberFn = Arc::new(move |target: &Instance, args: &Arguments| {
            let target = target.downcast_ref::<T>().ok_or(ArgumentError::Target {
                expected: std::any::type_name::<T>(),
            })?;
            inject(target, args)
        });
        Self {
            kind,
            name,
            dependencies,
            inject,
        }
    }

    pub fn kind(&self) -> MemberKind {
        self.kind
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn dependencies(&self) -> &[Dependency] {
        &self.dependencies
    }

    pub(crate) fn inject(&self, target: &Instance, args: &Arguments) -> Result<(), BoxError> {
        (self.inject)(target, args)
    }
}

impl fmt::Debug for MemberInjection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}({}, {:?})", self.kind, self.name, self.dependencies)
    }
}

/// A static injection point, run once per static-injection request.
#[derive(Clone)]
pub struct StaticInjection {
    name: Cow<'static, str>,
    dependencies: Vec<Dependency>,
    inject: StaticFn,
}

impl StaticInjection {
    pub fn new<F>(name: impl Into<Cow<'static, str>>, dependencies: Vec<Dependency>, inject: F) -> Self
    where
        F: Fn(&Arguments) -> Result<(), BoxError> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            dependencies,
            inject: Arc::new(inject),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn dependencies(&self) -> &[Dependency] {
        &self.dependencies
    }

    pub(crate) fn inject(&self, args: &Arguments) -> Result<(), BoxError> {
        (self.inject)(args)
    }
}

impl fmt::Debug for StaticInjection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "StaticInjection({}, {:?})", self.name, self.dependencies)
    }
}

// ═══════════════════════════════════════════════════════════════
// Plan lookup
// ═══════════════════════════════════════════════════════════════

/// Source of injection plans.
pub trait PlanLookup: Send + Sync {
    /// Every eligible constructor plan for `ty`.
    ///
    /// Just-in-time binding requires exactly one.
    fn constructors(&self, ty: &TypeDescriptor) -> Vec<ConstructionPlan>;

    /// Member injection points of `ty`, used by `inject_members`.
    fn members(&self, ty: &TypeDescriptor) -> Vec<MemberInjection> {
        match self.constructors(ty).as_slice() {
            [plan] => plan.members().to_vec(),
            _ => Vec::new(),
        }
    }

    /// Static injection points of `ty`.
    fn static_injections(&self, _ty: &TypeDescriptor) -> Vec<StaticInjection> {
        Vec::new()
    }
}

#[derive(Default, Clone)]
struct TypeEntry {
    constructors: Vec<ConstructionPlan>,
    members: Option<Vec<MemberInjection>>,
    statics: Vec<StaticInjection>,
}

/// A plan lookup filled in by hand.
#[derive(Default, Clone)]
pub struct PlanTable {
    entries: HashMap<TypeDescriptor, TypeEntry>,
}

impl PlanTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a constructor plan. Adding two plans for one type makes it
    /// ambiguous for just-in-time binding.
    pub fn insert(&mut self, plan: ConstructionPlan) -> &mut Self {
        self.entries.entry(*plan.ty()).or_default().constructors.push(plan);
        self
    }

    /// Registers member injection points for a type that has no
    /// constructor plan, or overrides those of its plan.
    pub fn insert_members(&mut self, ty: TypeDescriptor, members: Vec<MemberInjection>) -> &mut Self {
        self.entries.entry(ty).or_default().members = Some(members);
        self
    }

    pub fn insert_static(&mut self, ty: TypeDescriptor, injection: StaticInjection) -> &mut Self {
        self.entries.entry(ty).or_default().statics.push(injection);
        self
    }

    /// Builder form of [`PlanTable::insert`].
    pub fn with(mut self, plan: ConstructionPlan) -> Self {
        self.insert(plan);
        self
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl PlanLookup for PlanTable {
    fn constructors(&self, ty: &TypeDescriptor) -> Vec<ConstructionPlan> {
        self.entries
            .get(ty)
            .map(|entry| entry.constructors.clone())
            .unwrap_or_default()
    }

    fn members(&self, ty: &TypeDescriptor) -> Vec<MemberInjection> {
        match self.entries.get(ty) {
            Some(TypeEntry {
                members: Some(members),
                ..
            }) => members.clone(),
            Some(TypeEntry { constructors, .. }) if constructors.len() == 1 => {
                constructors[0].members().to_vec()
            }
            _ => Vec::new(),
        }
    }

    fn static_injections(&self, ty: &TypeDescriptor) -> Vec<StaticInjection> {
        self.entries
            .get(ty)
            .map(|entry| entry.statics.clone())
            .unwrap_or_default()
    }
}

/// Compile-time registration of a construction plan.
///
/// ```ignore
/// inventory::submit! {
///     PlanRegistration::new(TypeDescriptor::of::<Clock>, Clock::plan)
/// }
/// ```
pub struct PlanRegistration {
    pub describe: fn() -> TypeDescriptor,
    pub plan: fn() -> ConstructionPlan,
}

impl PlanRegistration {
    pub const fn new(describe: fn() -> TypeDescriptor, plan: fn() -> ConstructionPlan) -> Self {
        Self { describe, plan }
    }
}

inventory::collect!(PlanRegistration);

/// Plans submitted with `inventory::submit!`.
#[derive(Debug, Default, Clone, Copy)]
pub struct RegisteredPlans;

impl PlanLookup for RegisteredPlans {
    fn constructors(&self, ty: &TypeDescriptor) -> Vec<ConstructionPlan> {
        inventory::iter::<PlanRegistration>
            .into_iter()
            .filter(|registration| (registration.describe)() == *ty)
            .map(|registration| (registration.plan)())
            .collect()
    }
}

/// Several lookups consulted in order; the first with any constructor wins.
#[derive(Clone, Default)]
pub struct PlanChain {
    lookups: Vec<Arc<dyn PlanLookup>>,
}

impl PlanChain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, lookup: Arc<dyn PlanLookup>) {
        self.lookups.push(lookup);
    }
}

impl PlanLookup for PlanChain {
    fn constructors(&self, ty: &TypeDescriptor) -> Vec<ConstructionPlan> {
        self.lookups
            .iter()
            .map(|lookup| lookup.constructors(ty))
            .find(|plans| !plans.is_empty())
            .unwrap_or_default()
    }

    fn members(&self, ty: &TypeDescriptor) -> Vec<MemberInjection> {
        self.lookups
            .iter()
            .map(|lookup| lookup.members(ty))
            .find(|members| !members.is_empty())
            .unwrap_or_default()
    }

    fn static_injections(&self, ty: &TypeDescriptor) -> Vec<StaticInjection> {
        self.lookups
            .iter()
            .flat_map(|lookup| lookup.static_injections(ty))
            .collect()
    }
}
