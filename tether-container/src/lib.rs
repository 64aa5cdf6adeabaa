//! Core binding resolution and provisioning for tether.
//!
//! # Architecture
//! ```text
//! Elements ──GraphBuilder::build()──> Injector (root)
//!                                        │
//!                      ┌─────────────────┼──────────────────┐
//!                      ▼                 ▼                  ▼
//!              private environments   child_builder()   get / provider
//!                                        │
//!                                        ▼
//!                                  Injector (child)
//! ```
//!
//! A build pass registers elements, validates the dependency graph and
//! initializes eager singletons. Errors are collected across the whole pass
//! and reported together.

pub mod binding;
pub mod builder;
pub mod converter;
pub mod element;
pub(crate) mod engine;
pub mod environment;
pub mod error;
pub(crate) mod graph;
pub(crate) mod jit;
pub mod key;
pub mod module;
pub mod options;
pub mod plan;
pub mod proxy;
pub mod registry;
pub mod scope;
pub(crate) mod singleton;
pub mod source;

pub use binding::{Binding, BindingOrigin, BindingTarget, ProviderFactory, ProviderMethod, Resolver, provider_fn};
pub use builder::{GraphBuilder, build_environment};
pub use element::{Element, EnvironmentOption, Matcher};
pub use environment::{EnvId, EnvironmentKind, Injector, ProviderHandle};
pub use error::{ConfigurationError, CreationError, ErrorKind, Message, ProvisionError, Result, TetherError};
pub use key::{Dependency, Key, Qualifier, TypeDescriptor};
pub use module::{Elements, Module};
pub use options::{InjectorOptions, Stage};
pub use plan::{ConstructionPlan, Instance, MemberInjection, PlanTable, StaticInjection};
pub use scope::{Scope, ScopeAnnotation, Scoping, Singleton};
pub use source::Source;

pub mod prelude {
    pub use crate::binding::{ProviderFactory, ProviderMethod, Resolver, provider_fn};
    pub use crate::builder::GraphBuilder;
    pub use crate::element::{Element, Matcher};
    pub use crate::environment::{Injector, ProviderHandle};
    pub use crate::error::{CreationError, ErrorKind, ProvisionError, Result, TetherError};
    pub use crate::key::{Dependency, Key};
    pub use crate::module::{Elements, Module};
    pub use crate::options::Stage;
    pub use crate::plan::{ConstructionPlan, Instance, PlanTable};
    pub use crate::scope::{ScopeAnnotation, Scoping, Singleton};
}
