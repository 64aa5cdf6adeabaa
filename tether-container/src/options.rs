//! Environment configuration.
//!
//! [`InjectorOptions`] is set on the graph builder (or deserialized from a
//! configuration file). Restrictive flags are inherited: a child environment
//! ORs its own flags with its parent's effective flags, so it can tighten but
//! never loosen them.

use serde::{Deserialize, Serialize};

/// How eagerly the environment does work at build time.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    /// Only explicitly eager singletons are created at seal time.
    #[default]
    Development,
    /// Every singleton is created at seal time.
    Production,
    /// The graph is built and validated, nothing is provisioned at seal
    /// time (no static injection, no eager singletons).
    Tool,
}

/// Options for one environment.
///
/// # Examples
/// ```
/// use tether_container::options::{InjectorOptions, Stage};
///
/// let options: InjectorOptions =
///     serde_json::from_str(r#"{ "stage": "production", "require_explicit_bindings": true }"#).unwrap();
/// assert_eq!(options.stage, Stage::Production);
/// assert!(options.require_explicit_bindings);
/// assert!(!options.allow_override);
/// ```
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct InjectorOptions {
    pub stage: Stage,
    /// Disables just-in-time bindings.
    pub require_explicit_bindings: bool,
    /// Places just-in-time bindings in the root environment instead of the
    /// requesting one.
    pub jit_must_be_in_root: bool,
    /// Fails circular dependencies instead of proxying them.
    pub disable_circular_proxies: bool,
    /// Lets child environments shadow this environment's bindings.
    pub allow_override: bool,
    /// Rejects interceptor declarations.
    pub disable_interception: bool,
}

/// Just-in-time policy of one environment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct JitPolicy {
    pub allow_jit: bool,
    /// Disabled by this environment's own options rather than inherited.
    pub disabled_locally: bool,
    pub must_be_in_root: bool,
}

/// Effective settings of one environment after inheritance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Settings {
    pub stage: Stage,
    pub jit: JitPolicy,
    pub circular_proxies: bool,
    pub allow_override: bool,
    pub interception: bool,
}

impl Settings {
    /// Combines an environment's own options with its parent's settings.
    ///
    /// The stage always comes from the root.
    pub fn derive(parent: Option<&Settings>, local: &InjectorOptions) -> Self {
        match parent {
            None => Self {
                stage: local.stage,
                jit: JitPolicy {
                    allow_jit: !local.require_explicit_bindings,
                    disabled_locally: local.require_explicit_bindings,
                    must_be_in_root: local.jit_must_be_in_root,
                },
                circular_proxies: !local.disable_circular_proxies,
                allow_override: local.allow_override,
                interception: !local.disable_interception,
            },
            Some(parent) => Self {
                stage: parent.stage,
                jit: JitPolicy {
                    allow_jit: parent.jit.allow_jit && !local.require_explicit_bindings,
                    disabled_locally: local.require_explicit_bindings,
                    must_be_in_root: parent.jit.must_be_in_root || local.jit_must_be_in_root,
                },
                circular_proxies: parent.circular_proxies && !local.disable_circular_proxies,
                allow_override: local.allow_override,
                interception: parent.interception && !local.disable_interception,
            },
        }
    }

    /// The effective settings expressed as options.
    pub fn to_options(self) -> InjectorOptions {
        InjectorOptions {
            stage: self.stage,
            require_explicit_bindings: !self.jit.allow_jit,
            jit_must_be_in_root: self.jit.must_be_in_root,
            disable_circular_proxies: !self.circular_proxies,
            allow_override: self.allow_override,
            disable_interception: !self.interception,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_permissive() {
        let settings = Settings::derive(None, &InjectorOptions::default());
        assert!(settings.jit.allow_jit);
        assert!(settings.circular_proxies);
        assert!(settings.interception);
        assert!(!settings.allow_override);
        assert_eq!(settings.stage, Stage::Development);
    }

    #[test]
    fn child_cannot_loosen_restrictions() {
        let parent = Settings::derive(
            None,
            &InjectorOptions {
                require_explicit_bindings: true,
                disable_circular_proxies: true,
                stage: Stage::Production,
                ..InjectorOptions::default()
            },
        );
        let child = Settings::derive(Some(&parent), &InjectorOptions::default());

        assert!(!child.jit.allow_jit);
        assert!(!child.jit.disabled_locally);
        assert!(!child.circular_proxies);
        assert_eq!(child.stage, Stage::Production);
    }

    #[test]
    fn allow_override_is_not_inherited() {
        let parent = Settings::derive(
            None,
            &InjectorOptions {
                allow_override: true,
                ..InjectorOptions::default()
            },
        );
        let child = Settings::derive(Some(&parent), &InjectorOptions::default());
        assert!(parent.allow_override);
        assert!(!child.allow_override);
    }

    #[test]
    fn options_round_trip_through_settings() {
        let options = InjectorOptions {
            jit_must_be_in_root: true,
            disable_interception: true,
            ..InjectorOptions::default()
        };
        assert_eq!(Settings::derive(None, &options).to_options(), options);
    }

    #[test]
    fn missing_fields_use_defaults() {
        let options: InjectorOptions = serde_json::from_str("{}").unwrap();
        assert_eq!(options, InjectorOptions::default());
    }
}
