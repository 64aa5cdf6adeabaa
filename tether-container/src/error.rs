//! Error types for tether operations.
//!
//! Every problem is recorded as a [`Message`]: an [`ErrorKind`], the source
//! tokens it relates to, a human-readable text, the dependency chain that
//! led to it and an optional user-code cause. Messages are collected in an
//! [`Errors`] sink and surface as one of three reports:
//!
//! - [`CreationError`]: the whole batch from one build pass
//! - [`ConfigurationError`]: a binding lookup that could not be satisfied
//! - [`ProvisionError`]: a failed request for an instance

use std::error::Error as StdError;
use std::fmt;
use std::sync::Arc;

use serde::ser::SerializeStruct;
use serde::{Deserialize, Serialize, Serializer};
use tether_support::rendering::{TrailEntry, render_chain, render_report, render_trail};

use crate::key::{Key, TypeDescriptor};
use crate::scope::ScopeAnnotation;
use crate::source::Source;

/// Boxed error returned by user code (constructors, providers, converters).
pub type BoxError = Box<dyn StdError + Send + Sync>;

/// Identifies a specific kind of failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorKind {
    /// A key was bound twice in one environment.
    BindingAlreadySet,
    /// A child environment bound a key its parent already binds.
    ChildBindingAlreadySet,
    /// A child environment bound a key an ancestor holds as a just-in-time binding.
    JitBindingAlreadySet,
    /// A binding targets a type reserved by the container.
    BindingToFrameworkType,
    /// A binding targets a bare provider capability.
    BindingToProvider,
    /// A linked binding points back at itself.
    RecursiveBinding,
    /// A private environment exposes a key it never binds.
    ExposedButNotBound,
    /// A key was built from an open type parameter.
    KeyNotFullySpecified,
    /// A scope annotation has no matching declaration.
    ScopeNotFound,
    /// Two scopes were declared for one annotation.
    DuplicateScopes,
    /// No converter can produce the type of a constant binding.
    MissingConverter,
    /// Several converters match the type of a constant binding.
    AmbiguousTypeConversion,
    /// A converter failed.
    ConversionError,
    /// A converter produced nothing.
    ConverterReturnedNull,
    /// A converter produced a value of the wrong type.
    ConversionTypeError,
    /// No binding exists and none can be synthesised.
    MissingImplementation,
    /// Just-in-time bindings are disabled in this environment.
    JitDisabled,
    /// Just-in-time bindings are disabled by an ancestor environment.
    JitDisabledInParent,
    /// The type has no eligible constructor.
    MissingConstructor,
    /// The type has more than one eligible constructor.
    TooManyConstructors,
    /// Interceptors were declared while interception is disabled.
    AopDisabled,
    /// Two proxy capabilities were declared for one key.
    DuplicateProxy,
    /// A dependency cycle could not be broken.
    CircularDependency,
    /// A cycle needs a proxy for a key that has no proxy capability.
    CannotProxy,
    /// A constructor returned an error.
    ErrorInjectingConstructor,
    /// A field or method injection point returned an error.
    ErrorInjectingMember,
    /// A provider returned an error.
    ErrorInCustomProvider,
    /// A provision listener returned an error.
    ErrorNotifyingListener,
    /// Any other user code (scopes, interceptors) returned an error.
    ErrorInUserCode,
    /// `None` was produced for a dependency that does not accept it.
    NullInjectedIntoNonNullable,
    /// A provisioned instance does not have the requested type.
    TypeMismatch,
    /// A custom scope was used outside of its active period.
    OutOfScope,
    /// Anything else.
    Other,
}

/// One structured error record.
#[derive(Clone)]
pub struct Message {
    kind: ErrorKind,
    sources: Vec<Source>,
    message: String,
    chain: Vec<Key>,
    cause: Option<Arc<dyn StdError + Send + Sync>>,
}

impl Message {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            sources: Vec::new(),
            message: message.into(),
            chain: Vec::new(),
            cause: None,
        }
    }

    /// Adds a source token to this message.
    pub fn with_source(mut self, source: &Source) -> Self {
        if source.is_known() && !self.sources.contains(source) {
            self.sources.push(source.clone());
        }
        self
    }

    /// Records the dependency chain leading to this message.
    pub fn with_chain(mut self, chain: Vec<Key>) -> Self {
        self.chain = chain;
        self
    }

    /// Attaches the user-code error that caused this message.
    pub fn with_cause(mut self, cause: BoxError) -> Self {
        self.cause = Some(Arc::from(cause));
        self
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn sources(&self) -> &[Source] {
        &self.sources
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    /// Keys from the top-level request down to the failure point.
    pub fn chain(&self) -> &[Key] {
        &self.chain
    }

    pub fn cause(&self) -> Option<&(dyn StdError + Send + Sync + 'static)> {
        self.cause.as_deref()
    }

    // ── Configuration ──

    pub fn binding_already_set(key: &Key, original: &Source) -> Self {
        Self::new(
            ErrorKind::BindingAlreadySet,
            format!("A binding to {key} was already configured at {original}."),
        )
        .with_source(original)
    }

    pub fn child_binding_already_set(key: &Key, existing: &Source) -> Self {
        Self::new(
            ErrorKind::ChildBindingAlreadySet,
            format!(
                "Unable to create binding for {key}. It was already configured on one or more \
                 child environments or private environments, bound at {existing}."
            ),
        )
    }

    pub fn parent_binding_already_set(key: &Key, parent: &Source) -> Self {
        Self::new(
            ErrorKind::ChildBindingAlreadySet,
            format!("A binding to {key} was already configured on a parent environment at {parent}."),
        )
    }

    pub fn jit_binding_already_set(key: &Key) -> Self {
        Self::new(
            ErrorKind::JitBindingAlreadySet,
            format!("A just-in-time binding to {key} was already configured on a parent environment."),
        )
    }

    pub fn binding_to_framework_type(key: &Key) -> Self {
        Self::new(
            ErrorKind::BindingToFrameworkType,
            format!("Binding to core framework type {key} is not allowed."),
        )
    }

    pub fn binding_to_provider(key: &Key) -> Self {
        Self::new(
            ErrorKind::BindingToProvider,
            format!("Binding to provider capability {key} is not allowed; bind the provided type instead."),
        )
    }

    pub fn recursive_binding(key: &Key) -> Self {
        Self::new(
            ErrorKind::RecursiveBinding,
            format!("Binding points to itself. Key: {key}"),
        )
    }

    pub fn recursive_binding_chain(chain: &[Key]) -> Self {
        let names: Vec<String> = chain.iter().map(ToString::to_string).collect();
        Self::new(
            ErrorKind::RecursiveBinding,
            format!("Linked bindings form a loop: {}", render_chain(&names)),
        )
        .with_chain(chain.to_vec())
    }

    pub fn exposed_but_not_bound(key: &Key) -> Self {
        Self::new(
            ErrorKind::ExposedButNotBound,
            format!("Could not expose {key}, it must be explicitly bound."),
        )
    }

    pub fn key_not_fully_specified(descriptor: &TypeDescriptor) -> Self {
        Self::new(
            ErrorKind::KeyNotFullySpecified,
            format!("{descriptor} cannot be used as a key; it is not fully specified."),
        )
    }

    pub fn scope_not_found(annotation: &ScopeAnnotation) -> Self {
        Self::new(
            ErrorKind::ScopeNotFound,
            format!("No scope is bound to {annotation}."),
        )
    }

    pub fn duplicate_scopes(annotation: &ScopeAnnotation, existing: &Source) -> Self {
        Self::new(
            ErrorKind::DuplicateScopes,
            format!("Scope {annotation} is already bound to a different scope at {existing}."),
        )
    }

    pub fn missing_converter(key: &Key, value: &str) -> Self {
        Self::new(
            ErrorKind::MissingConverter,
            format!("No type converter can convert the constant {value:?} to {key}."),
        )
    }

    pub fn ambiguous_conversion(key: &Key, value: &str, sources: &[Source]) -> Self {
        let listed: Vec<String> = sources.iter().map(ToString::to_string).collect();
        Self::new(
            ErrorKind::AmbiguousTypeConversion,
            format!(
                "Multiple converters can convert {value:?} to {key}: converters bound at {}. \
                 Adjust the converter matchers so they do not overlap.",
                listed.join(" and ")
            ),
        )
    }

    pub fn conversion_error(key: &Key, value: &str, converter: &Source, cause: BoxError) -> Self {
        Self::new(
            ErrorKind::ConversionError,
            format!("Error converting {value:?} to {key} using the converter bound at {converter}: {cause}"),
        )
        .with_cause(cause)
    }

    pub fn converter_returned_null(key: &Key, value: &str, converter: &Source) -> Self {
        Self::new(
            ErrorKind::ConverterReturnedNull,
            format!("Received nothing converting {value:?} to {key} using the converter bound at {converter}."),
        )
    }

    pub fn conversion_type_error(key: &Key, value: &str, converter: &Source) -> Self {
        Self::new(
            ErrorKind::ConversionTypeError,
            format!(
                "Type mismatch converting {value:?} to {key} using the converter bound at {converter}: \
                 the converter produced a value of another type."
            ),
        )
    }

    // ── Just-in-time ──

    pub fn missing_implementation(key: &Key, suggestions: &[String]) -> Self {
        let mut text = format!("No implementation for {key} was bound.");
        if !suggestions.is_empty() {
            text.push_str("\n  Did you mean:");
            for suggestion in suggestions {
                text.push_str("\n    * ");
                text.push_str(suggestion);
            }
        }
        Self::new(ErrorKind::MissingImplementation, text)
    }

    pub fn jit_disabled(key: &Key) -> Self {
        Self::new(
            ErrorKind::JitDisabled,
            format!("Explicit bindings are required and {key} is not explicitly bound."),
        )
    }

    pub fn jit_disabled_in_parent(key: &Key) -> Self {
        Self::new(
            ErrorKind::JitDisabledInParent,
            format!("Explicit bindings are required by a parent environment and {key} is not explicitly bound."),
        )
    }

    pub fn missing_constructor(descriptor: &TypeDescriptor) -> Self {
        Self::new(
            ErrorKind::MissingConstructor,
            format!("No injectable constructor for type {descriptor}."),
        )
    }

    pub fn too_many_constructors(descriptor: &TypeDescriptor, count: usize) -> Self {
        Self::new(
            ErrorKind::TooManyConstructors,
            format!("{descriptor} has {count} eligible constructors. Exactly one is required."),
        )
    }

    pub fn aop_disabled() -> Self {
        Self::new(
            ErrorKind::AopDisabled,
            "Interceptors were declared but interception is disabled for this environment.",
        )
    }

    pub fn duplicate_proxy(key: &Key, existing: &Source) -> Self {
        Self::new(
            ErrorKind::DuplicateProxy,
            format!("A proxy capability for {key} was already declared at {existing}."),
        )
    }

    // ── Provisioning ──

    pub fn circular_dependency(cycle: &[Key]) -> Self {
        let names: Vec<String> = cycle.iter().map(ToString::to_string).collect();
        Self::new(
            ErrorKind::CircularDependency,
            format!(
                "Found a circular dependency involving {}, and circular proxies are disabled: {}",
                names.first().map(String::as_str).unwrap_or_default(),
                render_chain(&names)
            ),
        )
    }

    pub fn cannot_proxy(key: &Key) -> Self {
        Self::new(
            ErrorKind::CannotProxy,
            format!(
                "Tried proxying {key} to support a circular dependency, but no proxy capability is declared for it."
            ),
        )
    }

    pub fn error_injecting_constructor(key: &Key, cause: BoxError) -> Self {
        Self::new(
            ErrorKind::ErrorInjectingConstructor,
            format!("Error injecting constructor of {key}: {cause}"),
        )
        .with_cause(cause)
    }

    pub fn error_injecting_member(target: impl fmt::Display, member: &str, cause: BoxError) -> Self {
        Self::new(
            ErrorKind::ErrorInjectingMember,
            format!("Error injecting {member} of {target}: {cause}"),
        )
        .with_cause(cause)
    }

    pub fn error_in_custom_provider(key: &Key, cause: BoxError) -> Self {
        Self::new(
            ErrorKind::ErrorInCustomProvider,
            format!("Error in custom provider for {key}: {cause}"),
        )
        .with_cause(cause)
    }

    pub fn error_notifying_listener(key: &Key, cause: BoxError) -> Self {
        Self::new(
            ErrorKind::ErrorNotifyingListener,
            format!("Error notifying provision listener of {key}: {cause}"),
        )
        .with_cause(cause)
    }

    pub fn error_in_user_code(context: impl fmt::Display, cause: BoxError) -> Self {
        Self::new(ErrorKind::ErrorInUserCode, format!("{context}: {cause}")).with_cause(cause)
    }

    pub fn null_injected(key: &Key) -> Self {
        Self::new(
            ErrorKind::NullInjectedIntoNonNullable,
            format!("Nothing was provided for {key}, which does not accept an empty value."),
        )
    }

    pub fn type_mismatch(key: &Key, expected: &str) -> Self {
        Self::new(
            ErrorKind::TypeMismatch,
            format!("The instance bound to {key} is not a {expected}."),
        )
    }

    pub fn out_of_scope(key: &Key, scope: &str) -> Self {
        Self::new(
            ErrorKind::OutOfScope,
            format!("Cannot access {key} outside of scope {scope}."),
        )
    }
}

impl fmt::Debug for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Message")
            .field("kind", &self.kind)
            .field("sources", &self.sources)
            .field("message", &self.message)
            .field("chain", &self.chain)
            .field("cause", &self.cause.as_ref().map(ToString::to_string))
            .finish()
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)?;

        for source in &self.sources {
            write!(f, "\n  at {source}")?;
        }

        if !self.chain.is_empty() {
            let trail: Vec<TrailEntry> = self
                .chain
                .iter()
                .map(|key| TrailEntry {
                    key: key.to_string(),
                    source: None,
                })
                .collect();
            write!(f, "\n{}", render_trail(&trail).trim_end())?;
        }

        if let Some(ref cause) = self.cause {
            write!(f, "\n  caused by: {cause}")?;
        }
        Ok(())
    }
}

impl Serialize for Message {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let sources: Vec<String> = self.sources.iter().map(ToString::to_string).collect();
        let chain: Vec<String> = self.chain.iter().map(ToString::to_string).collect();

        let mut state = serializer.serialize_struct("Message", 5)?;
        state.serialize_field("kind", &self.kind)?;
        state.serialize_field("sources", &sources)?;
        state.serialize_field("message", &self.message)?;
        state.serialize_field("chain", &chain)?;
        state.serialize_field("cause", &self.cause.as_ref().map(ToString::to_string))?;
        state.end()
    }
}

fn render(heading: &str, messages: &[Message]) -> String {
    let rendered: Vec<String> = messages.iter().map(ToString::to_string).collect();
    render_report(heading, &rendered)
}

/// Failure of a whole build pass.
///
/// Carries every configuration error found, in discovery order.
#[derive(Debug, Clone, Serialize, thiserror::Error)]
#[error("{}", render("Unable to create injector", .messages))]
pub struct CreationError {
    messages: Vec<Message>,
}

impl CreationError {
    pub fn new(messages: Vec<Message>) -> Self {
        Self { messages }
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn into_messages(self) -> Vec<Message> {
        self.messages
    }

    /// The kinds of all collected messages, in order.
    pub fn kinds(&self) -> Vec<ErrorKind> {
        self.messages.iter().map(Message::kind).collect()
    }
}

/// A binding lookup that could not be satisfied outside of provisioning.
#[derive(Debug, Clone, Serialize, thiserror::Error)]
#[error("{}", render("Configuration error", .messages))]
pub struct ConfigurationError {
    messages: Vec<Message>,
}

impl ConfigurationError {
    pub fn new(messages: Vec<Message>) -> Self {
        Self { messages }
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn kinds(&self) -> Vec<ErrorKind> {
        self.messages.iter().map(Message::kind).collect()
    }
}

impl From<Message> for ConfigurationError {
    fn from(message: Message) -> Self {
        Self::new(vec![message])
    }
}

/// A failed request for an instance.
#[derive(Debug, Clone, Serialize, thiserror::Error)]
#[error("{}", render("Unable to provision", .messages))]
pub struct ProvisionError {
    messages: Vec<Message>,
}

impl ProvisionError {
    pub fn new(messages: Vec<Message>) -> Self {
        Self { messages }
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn into_messages(self) -> Vec<Message> {
        self.messages
    }

    pub fn kinds(&self) -> Vec<ErrorKind> {
        self.messages.iter().map(Message::kind).collect()
    }

    /// The kind of the first recorded message.
    pub fn kind(&self) -> ErrorKind {
        self.messages.first().map_or(ErrorKind::Other, Message::kind)
    }

    /// Dependency chain of the first recorded message.
    pub fn chain(&self) -> &[Key] {
        self.messages.first().map_or(&[], |message| message.chain())
    }
}

impl From<Message> for ProvisionError {
    fn from(message: Message) -> Self {
        Self::new(vec![message])
    }
}

/// Main error type for all tether operations.
#[derive(Debug, thiserror::Error)]
pub enum TetherError {
    #[error(transparent)]
    Creation(#[from] CreationError),

    #[error(transparent)]
    Configuration(#[from] ConfigurationError),

    #[error(transparent)]
    Provision(#[from] ProvisionError),
}

/// Convenient Result type for tether operations.
pub type Result<T> = std::result::Result<T, TetherError>;

/// Accumulates error messages until a batch boundary is reached.
///
/// Messages added inside [`Errors::with_source`] carry the enclosing
/// sources, outermost first.
#[derive(Debug, Default)]
pub struct Errors {
    messages: Vec<Message>,
    sources: Vec<Source>,
}

impl Errors {
    pub fn new() -> Self {
        Self::default()
    }

    /// Runs `f` with `source` applied to every message it adds.
    pub fn with_source<R>(&mut self, source: &Source, f: impl FnOnce(&mut Self) -> R) -> R {
        let pushed = source.is_known();
        if pushed {
            self.sources.push(source.clone());
        }
        let result = f(self);
        if pushed {
            self.sources.pop();
        }
        result
    }

    /// Records one message.
    pub fn push(&mut self, mut message: Message) -> &mut Self {
        if !self.sources.is_empty() {
            let mut sources: Vec<Source> = self
                .sources
                .iter()
                .filter(|source| !message.sources.contains(source))
                .cloned()
                .collect();
            sources.append(&mut message.sources);
            message.sources = sources;
        }
        self.messages.push(message);
        self
    }

    /// Records several messages.
    pub fn merge(&mut self, messages: impl IntoIterator<Item = Message>) -> &mut Self {
        for message in messages {
            self.push(message);
        }
        self
    }

    pub fn has_errors(&self) -> bool {
        !self.messages.is_empty()
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn into_messages(self) -> Vec<Message> {
        self.messages
    }

    /// Ends a build pass: `Ok(value)` if nothing was recorded.
    pub fn into_result<T>(self, value: T) -> std::result::Result<T, CreationError> {
        if self.messages.is_empty() {
            Ok(value)
        } else {
            Err(CreationError::new(self.messages))
        }
    }
}
