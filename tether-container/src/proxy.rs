//! Forwarding handles used to break construction cycles.
//!
//! When a key is requested again while it is still being constructed, and
//! circular proxies are enabled, the engine asks the key's proxy capability
//! (declared with [`ProxyDeclaration`](crate::element::ProxyDeclaration)) to
//! build a stand-in around a [`ForwardHandle`]. The handle is resolved with
//! the real instance as soon as the outer construction finishes.

use std::fmt;
use std::sync::Arc;

use once_cell::sync::OnceCell;
use parking_lot::Mutex;

use crate::key::Key;
use crate::plan::Instance;

type Pending = Box<dyn FnOnce(&Instance) + Send>;

struct HandleState {
    key: Key,
    target: OnceCell<Instance>,
    pending: Mutex<Vec<Pending>>,
}

/// A handle to an instance that may not exist yet.
#[derive(Clone)]
pub struct ForwardHandle {
    state: Arc<HandleState>,
}

impl ForwardHandle {
    pub(crate) fn new(key: Key) -> Self {
        Self {
            state: Arc::new(HandleState {
                key,
                target: OnceCell::new(),
                pending: Mutex::new(Vec::new()),
            }),
        }
    }

    /// The key this handle stands in for.
    pub fn key(&self) -> &Key {
        &self.state.key
    }

    pub fn is_resolved(&self) -> bool {
        self.state.target.get().is_some()
    }

    /// The real instance, once constructed.
    pub fn instance(&self) -> Option<&Instance> {
        self.state.target.get()
    }

    /// The real instance as `Arc<T>`, once constructed.
    ///
    /// For a key of type `Arc<dyn Trait>` use `get::<Arc<dyn Trait>>()`.
    pub fn get<T: Send + Sync + 'static>(&self) -> Option<Arc<T>> {
        self.instance()?.clone().downcast::<T>().ok()
    }

    /// Calls `f` with the real instance, once constructed.
    pub fn with<T: Send + Sync + 'static, R>(&self, f: impl FnOnce(&T) -> R) -> Option<R> {
        self.instance()?.downcast_ref::<T>().map(f)
    }

    /// Runs `f` with the real instance: immediately if it exists, otherwise
    /// as soon as it is resolved. Buffered calls run in registration order.
    pub fn on_resolved(&self, f: impl FnOnce(&Instance) + Send + 'static) {
        {
            let mut pending = self.state.pending.lock();
            if self.state.target.get().is_none() {
                pending.push(Box::new(f));
                return;
            }
        }
        if let Some(instance) = self.state.target.get() {
            f(instance);
        }
    }

    /// Sets the real instance and flushes buffered calls.
    pub(crate) fn resolve(&self, instance: &Instance) {
        let drained = {
            let mut pending = self.state.pending.lock();
            if self.state.target.set(instance.clone()).is_err() {
                return;
            }
            std::mem::take(&mut *pending)
        };
        for call in drained {
            call(instance);
        }
    }
}

impl fmt::Debug for ForwardHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ForwardHandle")
            .field("key", &self.state.key)
            .field("resolved", &self.is_resolved())
            .finish()
    }
}

/// Builds a stand-in instance around a forwarding handle.
pub type ProxyFactory = Arc<dyn Fn(ForwardHandle) -> Instance + Send + Sync>;
