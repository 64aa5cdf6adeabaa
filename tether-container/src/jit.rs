//! Just-in-time bindings: synthesised on first request for unbound keys.

use std::sync::Arc;

use tether_support::rendering::{shorten_type_name, suggest_similar};
use tracing::debug;

use crate::binding::Binding;
use crate::environment::Node;
use crate::error::Message;
use crate::key::Key;
use crate::plan::ConstructionPlan;
use crate::scope::Scoping;

const MAX_SUGGESTIONS: usize = 3;

/// Just-in-time bindings synthesised during one pass, with their owners.
pub(crate) type Created = Vec<(Arc<Node>, Arc<Binding>)>;

/// Finds the binding for `key` visible from `node`, synthesising a
/// just-in-time binding if none exists.
///
/// Returns the environment that owns the binding with it.
pub(crate) fn ensure_binding(node: &Arc<Node>, key: &Key) -> Result<(Arc<Node>, Arc<Binding>), Message> {
    ensure_recorded(node, key, &mut Vec::new())
}

/// Like [`ensure_binding`], appending every binding it synthesises to
/// `created`.
pub(crate) fn ensure_recorded(
    node: &Arc<Node>,
    key: &Key,
    created: &mut Created,
) -> Result<(Arc<Node>, Arc<Binding>), Message> {
    if let Some(found) = node.find_existing(key) {
        return Ok(found);
    }
    create(node, key, created)
}

/// Removes the recorded bindings from their environments, unless another
/// binding has replaced one since.
pub(crate) fn discard(created: Created) {
    for (node, binding) in created {
        if node
            .jit
            .remove_if(binding.key(), |_, existing| Arc::ptr_eq(existing, &binding))
            .is_some()
        {
            debug!(key = %binding.key(), env = %node.id, "Discarded just-in-time binding of a failed build");
        }
    }
}

fn create(node: &Arc<Node>, key: &Key, created: &mut Created) -> Result<(Arc<Node>, Arc<Binding>), Message> {
    let policy = node.settings.jit;
    if !policy.allow_jit {
        return Err(if policy.disabled_locally {
            Message::jit_disabled(key)
        } else {
            Message::jit_disabled_in_parent(key)
        });
    }

    if key.qualifier().is_some() {
        return Err(Message::missing_implementation(key, &suggestions(node, key)));
    }

    let target = if policy.must_be_in_root { node.root() } else { node.clone() };

    if let Some(existing) = target.blacklist.get(key) {
        return Err(Message::child_binding_already_set(key, existing.value()));
    }

    let root = node.root();
    let _guard = root.jit_lock.lock();

    // Another thread may have won the race while we waited.
    if let Some(found) = node.find_existing(key) {
        return Ok(found);
    }

    let plan = select_plan(&target, key)?;
    let scoping = match plan.scope() {
        None => Scoping::Unscoped,
        Some(annotation) => match target.scopes.get(&annotation) {
            Some(entry) => entry.scoping.clone(),
            None => return Err(Message::scope_not_found(&annotation)),
        },
    };

    let dependencies = plan.dependencies();
    let binding = Arc::new(Binding::just_in_time(key.clone(), plan, scoping));
    target.jit.insert(key.clone(), binding.clone());
    created.push((target.clone(), binding.clone()));
    debug!(key = %key, env = %target.id, "Created just-in-time binding");

    for dependency in &dependencies {
        if let Err(err) = ensure_recorded(&target, dependency.key(), created) {
            target.jit.remove(key);
            debug!(key = %key, dependency = %dependency.key(), "Discarded just-in-time binding");
            return Err(err);
        }
    }

    Ok((target, binding))
}

fn select_plan(node: &Node, key: &Key) -> Result<ConstructionPlan, Message> {
    let ty = key.type_descriptor();
    let mut plans = node.plans.constructors(&ty);
    match plans.len() {
        0 => Err(Message::missing_constructor(&ty)),
        1 => Ok(plans.remove(0)),
        count => Err(Message::too_many_constructors(&ty, count)),
    }
}

/// Bound keys of the same type under other qualifiers, or failing that,
/// bound types with similar names.
fn suggestions(node: &Arc<Node>, key: &Key) -> Vec<String> {
    let lineage = node.lineage();
    let bound: Vec<Arc<Binding>> = lineage
        .iter()
        .flat_map(|env| env.registry.all().map(|(_, binding)| binding.clone()))
        .collect();

    let same_type: Vec<String> = bound
        .iter()
        .filter(|binding| binding.key().type_id() == key.type_id() && binding.key() != key)
        .map(|binding| format!("{} bound at {}", binding.key(), binding.source()))
        .collect();
    if !same_type.is_empty() {
        return same_type;
    }

    let mut names: Vec<&str> = bound.iter().map(|binding| binding.key().type_name()).collect();
    names.sort_unstable();
    names.dedup();
    suggest_similar(key.type_name(), &names, MAX_SUGGESTIONS)
        .iter()
        .map(|name| shorten_type_name(name))
        .collect()
}
