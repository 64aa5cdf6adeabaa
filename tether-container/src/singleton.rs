//! Singleton cells with cross-thread cycle detection.
//!
//! Each (environment, key) singleton has one cell. The first thread to reach
//! an empty cell owns it until construction ends; other threads wait. Before
//! waiting, a thread walks the process-wide wait-for graph (cell owner, the
//! cell that owner waits on, its owner, ...). Reaching itself means waiting
//! would never end, so the caller gets [`Acquired::Cycle`] instead and can
//! answer with a proxy or an error.
//!
//! Lock order is always the wait graph first, then a cell's state.

use std::collections::HashMap;
use std::fmt;
use std::mem;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread::{self, ThreadId};

use once_cell::sync::Lazy;
use parking_lot::{Condvar, Mutex};

use crate::key::Key;
use crate::plan::Instance;
use crate::proxy::ForwardHandle;

static NEXT_CELL: AtomicU64 = AtomicU64::new(0);

static WAIT_GRAPH: Lazy<Mutex<WaitGraph>> = Lazy::new(|| Mutex::new(WaitGraph::default()));

#[derive(Default)]
struct WaitGraph {
    /// Cell id to the thread constructing it and the cell's key.
    owners: HashMap<u64, (ThreadId, Key)>,
    /// Thread to the cell it is blocked on.
    waiting: HashMap<ThreadId, u64>,
}

impl WaitGraph {
    /// Keys of the cycle that `me` would close by waiting on `cell`.
    fn cycle_through(&self, cell: u64, me: ThreadId) -> Option<Vec<Key>> {
        let mut keys = Vec::new();
        let mut current = cell;
        for _ in 0..=self.owners.len() {
            let (owner, key) = self.owners.get(&current)?;
            keys.push(key.clone());
            if *owner == me {
                return Some(keys);
            }
            current = *self.waiting.get(owner)?;
        }
        None
    }
}

#[derive(Default)]
struct CellState {
    value: Option<Option<Instance>>,
    /// Bumped on every release, successful or not.
    releases: u64,
    /// Proxies handed out while the cell was owned elsewhere.
    deferred: Vec<ForwardHandle>,
}

struct CellInner {
    id: u64,
    key: Key,
    state: Mutex<CellState>,
    released: Condvar,
}

/// Holds at most one value for one singleton binding.
#[derive(Clone)]
pub(crate) struct SingletonCell {
    inner: Arc<CellInner>,
}

/// Outcome of [`SingletonCell::acquire`].
pub(crate) enum Acquired<'a> {
    /// The value was already constructed.
    Ready(Option<Instance>),
    /// The caller owns the cell and must construct the value.
    Owned(SingletonGuard<'a>),
    /// Waiting would deadlock. Holds the keys of the cycle, starting with
    /// this cell's key and ending with a key the caller owns.
    Cycle(Vec<Key>),
}

impl SingletonCell {
    pub fn new(key: Key) -> Self {
        Self {
            inner: Arc::new(CellInner {
                id: NEXT_CELL.fetch_add(1, Ordering::Relaxed),
                key,
                state: Mutex::new(CellState::default()),
                released: Condvar::new(),
            }),
        }
    }

    pub fn get(&self) -> Option<Option<Instance>> {
        self.inner.state.lock().value.clone()
    }

    pub fn acquire(&self) -> Acquired<'_> {
        let me = thread::current().id();
        loop {
            let mut graph = WAIT_GRAPH.lock();
            let observed = {
                let state = self.inner.state.lock();
                if let Some(value) = &state.value {
                    return Acquired::Ready(value.clone());
                }
                state.releases
            };

            if !graph.owners.contains_key(&self.inner.id) {
                graph.owners.insert(self.inner.id, (me, self.inner.key.clone()));
                return Acquired::Owned(SingletonGuard {
                    cell: self,
                    released: false,
                });
            }
            if let Some(cycle) = graph.cycle_through(self.inner.id, me) {
                return Acquired::Cycle(cycle);
            }
            graph.waiting.insert(me, self.inner.id);
            drop(graph);

            {
                let mut state = self.inner.state.lock();
                while state.releases == observed {
                    self.inner.released.wait(&mut state);
                }
            }
            WAIT_GRAPH.lock().waiting.remove(&me);
        }
    }

    /// Resolves `handle` with this cell's value, now or once it is set.
    pub fn defer(&self, handle: ForwardHandle) {
        let mut state = self.inner.state.lock();
        match &state.value {
            Some(Some(instance)) => {
                let instance = instance.clone();
                drop(state);
                handle.resolve(&instance);
            }
            Some(None) => {}
            None => state.deferred.push(handle),
        }
    }

    fn release(&self, value: Option<Option<Instance>>) {
        let mut graph = WAIT_GRAPH.lock();
        graph.owners.remove(&self.inner.id);
        let deferred = {
            let mut state = self.inner.state.lock();
            state.releases += 1;
            let deferred = match &value {
                Some(_) => mem::take(&mut state.deferred),
                None => Vec::new(),
            };
            if value.is_some() {
                state.value = value.clone();
            }
            deferred
        };
        self.inner.released.notify_all();
        drop(graph);

        if let Some(Some(instance)) = value {
            for handle in deferred {
                handle.resolve(&instance);
            }
        }
    }
}

impl fmt::Debug for SingletonCell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SingletonCell")
            .field("key", &self.inner.key)
            .field("constructed", &self.get().is_some())
            .finish()
    }
}

/// Ownership of an empty cell. Dropping it without [`complete`] releases
/// the cell empty, so the next request constructs again.
///
/// [`complete`]: SingletonGuard::complete
pub(crate) struct SingletonGuard<'a> {
    cell: &'a SingletonCell,
    released: bool,
}

impl SingletonGuard<'_> {
    pub fn complete(mut self, value: Option<Instance>) {
        self.released = true;
        self.cell.release(Some(value));
    }
}

impl Drop for SingletonGuard<'_> {
    fn drop(&mut self) {
        if !self.released {
            self.cell.release(None);
        }
    }
}
