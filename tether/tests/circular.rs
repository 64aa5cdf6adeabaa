mod common;

use std::sync::mpsc;
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::Duration;

use tether::proxy::ForwardHandle;
use tether::prelude::*;

use common::init_test_logger;

trait Alpha: Send + Sync {
    fn name(&self) -> String;
    fn partner(&self) -> String;
}

trait Beta: Send + Sync {
    fn name(&self) -> String;
    fn partner(&self) -> String;
}

struct RealAlpha {
    beta: Arc<dyn Beta>,
}

impl Alpha for RealAlpha {
    fn name(&self) -> String {
        "alpha".to_string()
    }

    fn partner(&self) -> String {
        format!("{}->{}", self.beta.name(), self.beta.partner())
    }
}

struct RealBeta {
    alpha: Arc<dyn Alpha>,
}

impl Beta for RealBeta {
    fn name(&self) -> String {
        "beta".to_string()
    }

    fn partner(&self) -> String {
        self.alpha.name()
    }
}

/// Stands in for an `Alpha` still under construction.
struct AlphaProxy(ForwardHandle);

impl Alpha for AlphaProxy {
    fn name(&self) -> String {
        self.0
            .with::<Arc<dyn Alpha>, _>(|alpha| alpha.name())
            .unwrap_or_else(|| "unresolved".to_string())
    }

    fn partner(&self) -> String {
        self.0
            .with::<Arc<dyn Alpha>, _>(|alpha| alpha.partner())
            .unwrap_or_else(|| "unresolved".to_string())
    }
}

struct BetaProxy(ForwardHandle);

impl Beta for BetaProxy {
    fn name(&self) -> String {
        self.0
            .with::<Arc<dyn Beta>, _>(|beta| beta.name())
            .unwrap_or_else(|| "unresolved".to_string())
    }

    fn partner(&self) -> String {
        self.0
            .with::<Arc<dyn Beta>, _>(|beta| beta.partner())
            .unwrap_or_else(|| "unresolved".to_string())
    }
}

fn cycle_elements() -> Vec<Element> {
    vec![
        Element::provider_method(
            Key::of::<Arc<dyn Alpha>>(),
            ProviderMethod::new::<Arc<dyn Alpha>, _>(vec![Dependency::of::<Arc<dyn Beta>>()], |args| {
                let beta = args.cloned::<Arc<dyn Beta>>(0)?;
                Ok(Arc::new(RealAlpha { beta }) as Arc<dyn Alpha>)
            }),
        )
        .into(),
        Element::provider_method(
            Key::of::<Arc<dyn Beta>>(),
            ProviderMethod::new::<Arc<dyn Beta>, _>(vec![Dependency::of::<Arc<dyn Alpha>>()], |args| {
                let alpha = args.cloned::<Arc<dyn Alpha>>(0)?;
                Ok(Arc::new(RealBeta { alpha }) as Arc<dyn Beta>)
            }),
        )
        .into(),
        Element::proxy::<Arc<dyn Alpha>, _>(|handle| Arc::new(AlphaProxy(handle)) as Arc<dyn Alpha>),
    ]
}

#[test]
fn cycle_is_broken_with_a_proxy() {
    init_test_logger();

    let injector = Injector::builder().elements(cycle_elements()).build().unwrap();
    let alpha = injector.get::<Arc<dyn Alpha>>().unwrap();

    assert_eq!(alpha.name(), "alpha");
    assert_eq!(alpha.partner(), "beta->alpha");
}

#[test]
fn proxy_delegates_once_the_cycle_completes() {
    init_test_logger();

    let handle_seen = Arc::new(std::sync::Mutex::new(None));
    let captured = handle_seen.clone();

    let mut elements = cycle_elements();
    elements.pop();
    elements.push(Element::proxy::<Arc<dyn Alpha>, _>(move |handle: ForwardHandle| {
        *captured.lock().unwrap() = Some(handle.clone());
        Arc::new(AlphaProxy(handle)) as Arc<dyn Alpha>
    }));

    let injector = Injector::builder().elements(elements).build().unwrap();
    injector.get::<Arc<dyn Alpha>>().unwrap();

    let handle = handle_seen.lock().unwrap().clone().unwrap();
    assert!(handle.is_resolved());
    assert_eq!(handle.key(), &Key::of::<Arc<dyn Alpha>>());
}

#[test]
fn disabled_proxies_report_the_cycle() {
    init_test_logger();

    let injector = Injector::builder()
        .disable_circular_proxies(true)
        .elements(cycle_elements())
        .build()
        .unwrap();

    let Err(err) = injector.get::<Arc<dyn Alpha>>() else {
        panic!("a cycle without proxies must fail");
    };
    assert_eq!(err.kind(), ErrorKind::CircularDependency);
    assert_eq!(
        err.chain(),
        &[
            Key::of::<Arc<dyn Alpha>>(),
            Key::of::<Arc<dyn Beta>>(),
            Key::of::<Arc<dyn Alpha>>(),
        ]
    );
}

#[test]
fn cycle_without_proxy_capability_fails() {
    init_test_logger();

    let mut elements = cycle_elements();
    elements.pop();

    let injector = Injector::builder().elements(elements).build().unwrap();
    let Err(err) = injector.get::<Arc<dyn Beta>>() else {
        panic!("a cycle without a proxy capability must fail");
    };
    assert_eq!(err.kind(), ErrorKind::CannotProxy);
}

/// Each provider waits for the other thread before resolving its
/// dependency, so each thread owns one singleton and needs the other.
fn crossed_singleton_elements(barrier: Arc<Barrier>) -> Vec<Element> {
    let alpha_barrier = barrier.clone();
    let alpha = provider_fn(move |resolver| {
        alpha_barrier.wait();
        let beta = resolver.get::<Arc<dyn Beta>>()?;
        let alpha: Arc<dyn Alpha> = Arc::new(RealAlpha { beta: (*beta).clone() });
        Ok(Some(Arc::new(alpha) as Instance))
    });
    let beta = provider_fn(move |resolver| {
        barrier.wait();
        let alpha = resolver.get::<Arc<dyn Alpha>>()?;
        let beta: Arc<dyn Beta> = Arc::new(RealBeta { alpha: (*alpha).clone() });
        Ok(Some(Arc::new(beta) as Instance))
    });

    vec![
        Element::bind(Key::of::<Arc<dyn Alpha>>())
            .to_provider(Arc::new(alpha))
            .in_scope(Scoping::Singleton)
            .into(),
        Element::bind(Key::of::<Arc<dyn Beta>>())
            .to_provider(Arc::new(beta))
            .in_scope(Scoping::Singleton)
            .into(),
        Element::proxy::<Arc<dyn Alpha>, _>(|handle| Arc::new(AlphaProxy(handle)) as Arc<dyn Alpha>),
        Element::proxy::<Arc<dyn Beta>, _>(|handle| Arc::new(BetaProxy(handle)) as Arc<dyn Beta>),
    ]
}

#[test]
fn singleton_cycle_across_threads_is_broken_with_a_proxy() {
    init_test_logger();

    let injector = Injector::builder()
        .elements(crossed_singleton_elements(Arc::new(Barrier::new(2))))
        .build()
        .unwrap();

    let (tx, rx) = mpsc::channel();
    for side in ["alpha", "beta"] {
        let injector = injector.clone();
        let tx = tx.clone();
        thread::spawn(move || {
            let name = if side == "alpha" {
                injector.get::<Arc<dyn Alpha>>().map(|alpha| alpha.name())
            } else {
                injector.get::<Arc<dyn Beta>>().map(|beta| beta.name())
            };
            let _ = tx.send(name.map_err(|err| err.to_string()));
        });
    }

    let mut names: Vec<String> = (0..2)
        .map(|_| {
            rx.recv_timeout(Duration::from_secs(10))
                .expect("both requests complete")
                .unwrap()
        })
        .collect();
    names.sort();
    assert_eq!(names, ["alpha", "beta"]);

    let alpha = injector.get::<Arc<dyn Alpha>>().unwrap();
    let beta = injector.get::<Arc<dyn Beta>>().unwrap();
    assert_eq!(alpha.partner(), "beta->alpha");
    assert_eq!(beta.partner(), "alpha");
}
