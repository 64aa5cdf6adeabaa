//! # Tether: binding resolution and provisioning
//!
//! A hierarchical dependency injection runtime. Configuration is a list of
//! elements; building it yields an [`Injector`] that resolves keys through a
//! tree of environments.
//!
//! # Examples
//! ```
//! use std::sync::Arc;
//! use tether::prelude::*;
//!
//! trait Greeter: Send + Sync {
//!     fn greet(&self) -> String;
//! }
//!
//! struct English {
//!     name: String,
//! }
//!
//! impl Greeter for English {
//!     fn greet(&self) -> String {
//!         format!("hello {}", self.name)
//!     }
//! }
//!
//! let injector = Injector::builder()
//!     .element(Element::constant(Key::named::<String>("name"), "tether"))
//!     .element(Element::provider_method(
//!         Key::of::<Arc<dyn Greeter>>(),
//!         ProviderMethod::new::<Arc<dyn Greeter>, _>(
//!             vec![Dependency::new(Key::named::<String>("name"))],
//!             |args| Ok(Arc::new(English { name: args.cloned::<String>(0)? }) as Arc<dyn Greeter>),
//!         ),
//!     ))
//!     .build()
//!     .expect("configuration is valid");
//!
//! let greeter = injector.get::<Arc<dyn Greeter>>().expect("greeter is bound");
//! assert_eq!(greeter.greet(), "hello tether");
//! ```

pub use tether_container::*;
pub use tether_support::*;
