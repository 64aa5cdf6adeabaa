//! Modules: reusable groups of configuration elements.
//!
//! # Examples
//! ```
//! use tether_container::element::Element;
//! use tether_container::key::Key;
//! use tether_container::module::{Elements, Module};
//!
//! struct ServerModule;
//!
//! impl Module for ServerModule {
//!     fn configure(&self, elements: &mut Elements) {
//!         elements.push(Element::constant(Key::named::<u16>("port"), "8080"));
//!         elements.push(Element::constant(Key::named::<String>("host"), "localhost"));
//!     }
//! }
//!
//! let mut elements = Elements::new();
//! elements.install(&ServerModule);
//! assert_eq!(elements.len(), 2);
//! ```

use tracing::debug;

use crate::element::Element;

/// A unit of configuration that contributes elements to a build pass.
///
/// Split configuration by concern and install each module on the graph
/// builder; the elements of all modules form one batch, so errors from every
/// module are reported together.
pub trait Module: Send + Sync {
    /// Adds this module's elements.
    fn configure(&self, elements: &mut Elements);

    /// Human-readable name for logs.
    fn name(&self) -> &str {
        std::any::type_name::<Self>()
    }
}

/// The ordered element list a module writes into.
#[derive(Debug, Default, Clone)]
pub struct Elements {
    elements: Vec<Element>,
}

impl Elements {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, element: impl Into<Element>) -> &mut Self {
        self.elements.push(element.into());
        self
    }

    /// Installs another module in place.
    pub fn install(&mut self, module: &dyn Module) -> &mut Self {
        debug!(module = module.name(), "Installing module");
        module.configure(self);
        self
    }

    pub fn len(&self) -> usize {
        self.elements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.elements.is_empty()
    }

    pub fn into_vec(self) -> Vec<Element> {
        self.elements
    }
}

impl Extend<Element> for Elements {
    fn extend<I: IntoIterator<Item = Element>>(&mut self, iter: I) {
        self.elements.extend(iter);
    }
}

impl From<Elements> for Vec<Element> {
    fn from(elements: Elements) -> Self {
        elements.elements
    }
}
