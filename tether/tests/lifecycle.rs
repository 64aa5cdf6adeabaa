mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Barrier, Mutex, OnceLock};
use std::thread;

use tether::element::{Interceptor, ProvisionListener};
use tether::error::BoxError;
use tether::plan::MemberInjection;
use tether::prelude::*;
use tether::{Scope, TypeDescriptor};

use common::init_test_logger;

#[derive(Debug)]
struct Pool {
    id: usize,
}

fn counted_pool(counter: &Arc<AtomicUsize>) -> ConstructionPlan {
    let counter = counter.clone();
    ConstructionPlan::new::<Pool, _>(vec![], move |_| {
        Ok(Pool {
            id: counter.fetch_add(1, Ordering::SeqCst),
        })
    })
}

#[test]
fn singleton_is_shared_across_threads() {
    init_test_logger();

    let constructed = Arc::new(AtomicUsize::new(0));
    let injector = Injector::builder()
        .element(
            Element::bind(Key::of::<Pool>())
                .to_constructor(counted_pool(&constructed))
                .in_scope(Scoping::Singleton),
        )
        .build()
        .unwrap();

    let barrier = Barrier::new(100);
    let pools: Vec<Arc<Pool>> = thread::scope(|scope| {
        let handles: Vec<_> = (0..100)
            .map(|_| {
                scope.spawn(|| {
                    barrier.wait();
                    injector.get::<Pool>().unwrap()
                })
            })
            .collect();
        handles.into_iter().map(|handle| handle.join().unwrap()).collect()
    });

    assert_eq!(constructed.load(Ordering::SeqCst), 1);
    assert!(pools.iter().all(|pool| Arc::ptr_eq(pool, &pools[0])));
}

#[test]
fn unscoped_bindings_construct_every_time() {
    init_test_logger();

    let constructed = Arc::new(AtomicUsize::new(0));
    let injector = Injector::builder()
        .element(Element::bind(Key::of::<Pool>()).to_constructor(counted_pool(&constructed)))
        .build()
        .unwrap();

    let a = injector.get::<Pool>().unwrap();
    let b = injector.get::<Pool>().unwrap();
    assert_ne!(a.id, b.id);
    assert_eq!(constructed.load(Ordering::SeqCst), 2);
}

#[test]
fn failed_singleton_is_retried_on_the_next_request() {
    init_test_logger();

    let attempts = Arc::new(AtomicUsize::new(0));
    let counter = attempts.clone();
    let flaky = ConstructionPlan::new::<Pool, _>(vec![], move |_| {
        let attempt = counter.fetch_add(1, Ordering::SeqCst);
        if attempt == 0 {
            return Err("pool not ready".into());
        }
        Ok(Pool { id: attempt })
    });
    let injector = Injector::builder()
        .element(Element::bind(Key::of::<Pool>()).to_constructor(flaky).in_scope(Scoping::Singleton))
        .build()
        .unwrap();

    let err = injector.get::<Pool>().unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ErrorInjectingConstructor);

    let a = injector.get::<Pool>().unwrap();
    let b = injector.get::<Pool>().unwrap();
    assert!(Arc::ptr_eq(&a, &b));
    assert_eq!(a.id, 1);
    assert_eq!(attempts.load(Ordering::SeqCst), 2);
}

fn recording_plan<T, F>(log: &Arc<Mutex<Vec<&'static str>>>, name: &'static str, value: F) -> ConstructionPlan
where
    T: Send + Sync + 'static,
    F: Fn() -> T + Send + Sync + 'static,
{
    let log = log.clone();
    ConstructionPlan::new::<T, _>(vec![], move |_| {
        log.lock().unwrap().push(name);
        Ok(value())
    })
}

struct First;

struct Second;

struct Lazy;

#[test]
fn eager_singletons_are_built_in_declaration_order() {
    init_test_logger();

    let log = Arc::new(Mutex::new(Vec::new()));
    let injector = Injector::builder()
        .element(
            Element::bind(Key::of::<Second>())
                .to_constructor(recording_plan(&log, "second", || Second))
                .as_eager_singleton(),
        )
        .element(
            Element::bind(Key::of::<Lazy>())
                .to_constructor(recording_plan(&log, "lazy", || Lazy))
                .in_scope(Scoping::Singleton),
        )
        .element(
            Element::bind(Key::of::<First>())
                .to_constructor(recording_plan(&log, "first", || First))
                .as_eager_singleton(),
        )
        .build()
        .unwrap();

    assert_eq!(*log.lock().unwrap(), vec!["second", "first"]);

    injector.get::<Second>().unwrap();
    injector.get::<Lazy>().unwrap();
    assert_eq!(*log.lock().unwrap(), vec!["second", "first", "lazy"]);
}

#[test]
fn production_stage_builds_every_singleton_up_front() {
    init_test_logger();

    let log = Arc::new(Mutex::new(Vec::new()));
    Injector::builder()
        .stage(Stage::Production)
        .element(
            Element::bind(Key::of::<Lazy>())
                .to_constructor(recording_plan(&log, "lazy", || Lazy))
                .in_scope(Scoping::Singleton),
        )
        .element(
            Element::bind(Key::of::<First>())
                .to_constructor(recording_plan(&log, "first", || First)),
        )
        .build()
        .unwrap();

    assert_eq!(*log.lock().unwrap(), vec!["lazy"]);
}

/// Caches per key until cleared.
#[derive(Default)]
struct ResettableScope {
    calls: AtomicUsize,
    cache: Mutex<Option<Instance>>,
}

impl Scope for ResettableScope {
    fn scope(&self, _key: &Key, unscoped: &mut dyn FnMut() -> tether::scope::Provided) -> tether::scope::Provided {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(cached) = self.cache.lock().unwrap().clone() {
            return Ok(Some(cached));
        }
        let fresh = unscoped()?;
        *self.cache.lock().unwrap() = fresh.clone();
        Ok(fresh)
    }

    fn name(&self) -> &str {
        "resettable"
    }
}

#[test]
fn custom_scope_controls_caching() {
    init_test_logger();

    let scope = Arc::new(ResettableScope::default());
    let constructed = Arc::new(AtomicUsize::new(0));
    let injector = Injector::builder()
        .element(
            Element::bind(Key::of::<Pool>())
                .to_constructor(counted_pool(&constructed))
                .in_scope(Scoping::Scope(scope.clone())),
        )
        .build()
        .unwrap();

    let a = injector.get::<Pool>().unwrap();
    let b = injector.get::<Pool>().unwrap();
    assert!(Arc::ptr_eq(&a, &b));

    scope.cache.lock().unwrap().take();
    let c = injector.get::<Pool>().unwrap();
    assert!(!Arc::ptr_eq(&a, &c));

    assert_eq!(scope.calls.load(Ordering::SeqCst), 3);
    assert_eq!(constructed.load(Ordering::SeqCst), 2);
}

struct CountingListener {
    seen: Mutex<Vec<String>>,
}

impl ProvisionListener for CountingListener {
    fn on_provision(&self, key: &Key, _instance: &Instance) -> std::result::Result<(), BoxError> {
        self.seen.lock().unwrap().push(key.to_string());
        Ok(())
    }
}

#[test]
fn listeners_observe_matching_provisions() {
    init_test_logger();

    let listener = Arc::new(CountingListener {
        seen: Mutex::new(Vec::new()),
    });
    let constructed = Arc::new(AtomicUsize::new(0));
    let injector = Injector::builder()
        .element(Element::listener(Matcher::<Key>::of_type::<Pool>(), listener.clone()))
        .element(
            Element::bind(Key::of::<Pool>())
                .to_constructor(counted_pool(&constructed))
                .in_scope(Scoping::Singleton),
        )
        .element(Element::constant(Key::named::<u16>("port"), "80"))
        .build()
        .unwrap();

    injector.get::<Pool>().unwrap();
    injector.get::<Pool>().unwrap();
    injector.get_named::<u16>("port").unwrap();

    assert_eq!(listener.seen.lock().unwrap().len(), 1);
}

struct Renumber;

impl Interceptor for Renumber {
    fn intercept(&self, _key: &Key, instance: Instance) -> std::result::Result<Instance, BoxError> {
        let pool = instance.downcast::<Pool>().map_err(|_| "not a pool")?;
        Ok(Arc::new(Pool { id: pool.id + 100 }))
    }
}

#[test]
fn interceptors_replace_constructed_instances() {
    init_test_logger();

    let constructed = Arc::new(AtomicUsize::new(0));
    let injector = Injector::builder()
        .element(Element::interceptor(Matcher::<Key>::only(Key::of::<Pool>()), Arc::new(Renumber)))
        .element(Element::bind(Key::of::<Pool>()).to_constructor(counted_pool(&constructed)))
        .build()
        .unwrap();

    assert_eq!(injector.get::<Pool>().unwrap().id, 100);
}

struct Widget {
    pool: OnceLock<Arc<Pool>>,
}

#[test]
fn members_are_injected_into_existing_instances() {
    init_test_logger();

    let mut plans = PlanTable::new();
    plans.insert_members(
        TypeDescriptor::of::<Widget>(),
        vec![MemberInjection::field::<Widget, _>("pool", Dependency::of::<Pool>(), |widget, args| {
            let _ = widget.pool.set(args.get::<Pool>(0)?);
            Ok(())
        })],
    );

    let constructed = Arc::new(AtomicUsize::new(0));
    let injector = Injector::builder()
        .plans(plans)
        .element(Element::bind(Key::of::<Pool>()).to_constructor(counted_pool(&constructed)))
        .build()
        .unwrap();

    let widget: Instance = Arc::new(Widget { pool: OnceLock::new() });
    injector.inject_members(&widget, &TypeDescriptor::of::<Widget>()).unwrap();

    let widget = widget.downcast::<Widget>().unwrap();
    assert_eq!(widget.pool.get().map(|pool| pool.id), Some(0));
}
