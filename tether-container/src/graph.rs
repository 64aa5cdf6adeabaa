//! Dependency graph validation.
//!
//! Runs once per build pass, after every environment is sealed and before
//! anything is provisioned:
//! - Detects loops of linked bindings (`A → B → A`)
//! - Checks that every dependency of every explicit binding resolves,
//!   creating just-in-time bindings where allowed
//! - Checks the dependencies of requested static injections
//!
//! Problems are collected into the build's [`Errors`] sink; validation never
//! stops at the first one.

use std::collections::HashSet;
use std::sync::Arc;

use tracing::{debug, instrument, warn};

use crate::binding::{Binding, BindingTarget};
use crate::environment::{EnvId, Node};
use crate::error::{Errors, Message};
use crate::jit;
use crate::key::{Dependency, Key};

/// Validates the bindings of an environment tree.
///
/// # Algorithm
/// Linked bindings are followed with a depth-first search that keeps the
/// current path, so a loop is reported with its full chain. Every other
/// dependency edge is checked by resolving its binding from the environment
/// that owns the consumer.
pub(crate) struct GraphValidator {
    /// Linked bindings on the current path
    visiting: HashSet<(EnvId, Key)>,
    /// Linked bindings already followed to their end
    validated: HashSet<(EnvId, Key)>,
    /// Current DFS path (for error reporting)
    path: Vec<Key>,
    /// Keys whose bindings were rejected during registration
    skipped: HashSet<Key>,
    /// Just-in-time bindings synthesised while checking dependencies
    created: jit::Created,
}

impl GraphValidator {
    pub fn new() -> Self {
        Self {
            visiting: HashSet::new(),
            validated: HashSet::new(),
            path: Vec::new(),
            skipped: HashSet::new(),
            created: Vec::new(),
        }
    }

    /// Does not check dependencies on `keys`, which already failed.
    pub fn skipping(mut self, keys: HashSet<Key>) -> Self {
        self.skipped = keys;
        self
    }

    /// The just-in-time bindings this validation created.
    pub fn into_created(self) -> jit::Created {
        self.created
    }

    /// Validates `root` and all of its private environments.
    #[instrument(skip_all, name = "graph_validation", fields(env = %root.id))]
    pub fn validate(&mut self, root: &Arc<Node>, errors: &mut Errors) {
        let before = errors.len();

        for node in root.private_tree() {
            let bindings: Vec<Arc<Binding>> = node.registry.all().map(|(_, binding)| binding.clone()).collect();
            debug!(env = %node.id, bindings = bindings.len(), "Validating environment");

            for binding in &bindings {
                if let Some(cycle) = self.follow_links(&node, binding) {
                    let message = match cycle.as_slice() {
                        [key, _] => Message::recursive_binding(key),
                        _ => Message::recursive_binding_chain(&cycle),
                    };
                    errors.with_source(binding.source(), |errors| {
                        errors.push(message);
                    });
                }
            }

            for binding in &bindings {
                errors.with_source(binding.source(), |errors| {
                    self.check_dependencies(&node, &binding.dependencies(), errors);
                });
            }

            for request in &node.statics {
                errors.with_source(&request.source, |errors| {
                    for injection in node.plans.static_injections(&request.ty) {
                        self.check_dependencies(&node, injection.dependencies(), errors);
                    }
                });
            }
        }

        if errors.len() == before {
            debug!("Dependency graph validation passed");
        } else {
            warn!(errors = errors.len() - before, "Dependency graph validation failed");
        }
    }

    /// Follows linked bindings from `binding`; returns the chain of a loop.
    fn follow_links(&mut self, node: &Arc<Node>, binding: &Arc<Binding>) -> Option<Vec<Key>> {
        let key = binding.key();
        let id = (node.id, key.clone());

        // Already followed to its end
        if self.validated.contains(&id) {
            return None;
        }

        // Currently on the path: loop detected
        if self.visiting.contains(&id) {
            let start = self.path.iter().position(|k| k == key).unwrap_or(0);
            let mut chain = self.path[start..].to_vec();
            chain.push(key.clone());
            warn!(cycle = ?chain, "Linked bindings form a loop");
            return Some(chain);
        }

        let BindingTarget::ToImplementation(target) = binding.target() else {
            self.validated.insert(id);
            return None;
        };

        self.visiting.insert(id.clone());
        self.path.push(key.clone());

        let found = node
            .find_explicit(target)
            .and_then(|(owner, next)| self.follow_links(&owner, &next));

        self.path.pop();
        self.visiting.remove(&id);
        self.validated.insert(id);
        found
    }

    fn check_dependencies(&mut self, node: &Arc<Node>, dependencies: &[Dependency], errors: &mut Errors) {
        for dependency in dependencies {
            if self.skipped.contains(dependency.key()) {
                continue;
            }
            if let Err(message) = jit::ensure_recorded(node, dependency.key(), &mut self.created) {
                errors.push(message);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::element::Element;
    use crate::environment::Injector;
    use crate::error::ErrorKind;
    use crate::key::{Dependency, Key};
    use crate::plan::{ConstructionPlan, PlanTable};
    use crate::source::Source;

    struct Database;

    struct UserService;

    #[test]
    fn valid_graph_builds() {
        let plans = PlanTable::new()
            .with(ConstructionPlan::new::<Database, _>(vec![], |_| Ok(Database)))
            .with(ConstructionPlan::new::<UserService, _>(
                vec![Dependency::of::<Database>()],
                |_| Ok(UserService),
            ));

        let result = Injector::builder()
            .plans(plans)
            .element(Element::bind(Key::of::<UserService>()))
            .build();
        assert!(result.is_ok());
    }

    #[test]
    fn detect_linked_loop() {
        // a → b → c → a
        let err = Injector::builder()
            .element(Element::bind(Key::named::<String>("a")).to(Key::named::<String>("b")))
            .element(Element::bind(Key::named::<String>("b")).to(Key::named::<String>("c")))
            .element(Element::bind(Key::named::<String>("c")).to(Key::named::<String>("a")))
            .build()
            .unwrap_err();

        assert_eq!(err.kinds(), vec![ErrorKind::RecursiveBinding]);
        assert_eq!(
            err.messages()[0].chain(),
            &[
                Key::named::<String>("a"),
                Key::named::<String>("b"),
                Key::named::<String>("c"),
                Key::named::<String>("a"),
            ]
        );
    }

    #[test]
    fn detect_self_link() {
        let err = Injector::builder()
            .element(
                Element::bind(Key::named::<String>("a"))
                    .to(Key::named::<String>("a"))
                    .with_source(Source::label("loop")),
            )
            .build()
            .unwrap_err();

        assert_eq!(err.kinds(), vec![ErrorKind::RecursiveBinding]);
        assert_eq!(err.messages()[0].sources(), &[Source::label("loop")]);
    }

    #[test]
    fn missing_dependencies_are_collected() {
        // UserService → Database, but Database has no plan
        let plans = PlanTable::new().with(ConstructionPlan::new::<UserService, _>(
            vec![Dependency::of::<Database>(), Dependency::new(Key::named::<u16>("port"))],
            |_| Ok(UserService),
        ));

        let err = Injector::builder()
            .plans(plans)
            .element(Element::bind(Key::of::<UserService>()).with_source(Source::label("service module")))
            .build()
            .unwrap_err();

        assert_eq!(
            err.kinds(),
            vec![ErrorKind::MissingConstructor, ErrorKind::MissingImplementation]
        );
        for message in err.messages() {
            assert_eq!(message.sources(), &[Source::label("service module")]);
        }
    }
}
