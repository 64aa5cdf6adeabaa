mod common;

use std::sync::Arc;

use tether::prelude::*;
use tether::{BindingOrigin, EnvironmentKind, Source};

use common::init_test_logger;

#[derive(Debug)]
struct Clock;

struct Api {
    token: String,
}

fn clock_plans() -> PlanTable {
    PlanTable::new().with(ConstructionPlan::new::<Clock, _>(vec![], |_| Ok(Clock)))
}

#[test]
fn child_sees_parent_bindings() {
    init_test_logger();

    let root = Injector::builder()
        .element(Element::constant(Key::named::<u16>("port"), "8080"))
        .build()
        .unwrap();
    let child = root
        .create_child(vec![Element::constant(Key::named::<String>("host"), "localhost")])
        .unwrap();

    assert_eq!(child.kind(), EnvironmentKind::Child);
    assert_eq!(*child.get_named::<u16>("port").unwrap(), 8080);
    assert_eq!(*child.get_named::<String>("host").unwrap(), "localhost");
    assert!(root.get_named::<String>("host").is_err());
    assert_eq!(root.children().len(), 1);
    assert_eq!(child.parent().map(|parent| parent.id()), Some(root.id()));
}

#[test]
fn child_cannot_rebind_parent_key() {
    init_test_logger();

    let root = Injector::builder()
        .element(Element::constant(Key::named::<u16>("port"), "8080"))
        .build()
        .unwrap();
    let err = root
        .create_child(vec![Element::constant(Key::named::<u16>("port"), "9090")])
        .unwrap_err();

    assert_eq!(err.kinds(), vec![ErrorKind::ChildBindingAlreadySet]);
    assert!(root.children().is_empty());
}

#[test]
fn child_overrides_when_parent_allows_it() {
    init_test_logger();

    let root = Injector::builder()
        .allow_override(true)
        .element(Element::constant(Key::named::<u16>("port"), "8080"))
        .build()
        .unwrap();
    let child = root
        .create_child(vec![Element::constant(Key::named::<u16>("port"), "9090")])
        .unwrap();

    assert_eq!(*child.get_named::<u16>("port").unwrap(), 9090);
    assert_eq!(*root.get_named::<u16>("port").unwrap(), 8080);
}

#[test]
fn parent_cannot_synthesise_key_bound_by_child() {
    init_test_logger();

    let root = Injector::builder().plans(clock_plans()).build().unwrap();
    let child = root
        .create_child(vec![Element::bind(Key::of::<Clock>()).to_value(Clock)])
        .unwrap();

    assert!(child.get::<Clock>().is_ok());
    let err = root.get::<Clock>().unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ChildBindingAlreadySet);
}

#[test]
fn child_cannot_bind_key_parent_synthesised() {
    init_test_logger();

    let root = Injector::builder().plans(clock_plans()).build().unwrap();
    root.get::<Clock>().unwrap();

    let err = root
        .create_child(vec![Element::bind(Key::of::<Clock>()).to_value(Clock)])
        .unwrap_err();
    assert_eq!(err.kinds(), vec![ErrorKind::JitBindingAlreadySet]);
}

#[test]
fn just_in_time_bindings_live_where_requested() {
    init_test_logger();

    let root = Injector::builder().plans(clock_plans()).build().unwrap();
    let child = root.create_child(vec![]).unwrap();

    child.get::<Clock>().unwrap();
    assert_eq!(child.jit_bindings().len(), 1);
    assert!(root.jit_bindings().is_empty());
}

#[test]
fn just_in_time_bindings_can_be_forced_into_the_root() {
    init_test_logger();

    let root = Injector::builder()
        .jit_must_be_in_root(true)
        .plans(clock_plans())
        .build()
        .unwrap();
    let child = root.create_child(vec![]).unwrap();

    child.get::<Clock>().unwrap();
    assert!(child.jit_bindings().is_empty());
    assert_eq!(root.jit_bindings().len(), 1);
}

#[test]
fn explicit_bindings_required_by_parent_apply_to_children() {
    init_test_logger();

    let root = Injector::builder()
        .require_explicit_bindings(true)
        .plans(clock_plans())
        .build()
        .unwrap();
    let child = root.create_child(vec![]).unwrap();

    assert_eq!(child.get::<Clock>().unwrap_err().kind(), ErrorKind::JitDisabledInParent);
    assert_eq!(root.get::<Clock>().unwrap_err().kind(), ErrorKind::JitDisabled);
}

struct Alarm;

#[test]
fn failed_child_leaves_no_just_in_time_bindings_in_the_root() {
    init_test_logger();

    let root = Injector::builder()
        .jit_must_be_in_root(true)
        .plans(clock_plans())
        .build()
        .unwrap();
    let alarm = ConstructionPlan::new::<Alarm, _>(
        vec![Dependency::of::<Clock>(), Dependency::new(Key::named::<u16>("volume"))],
        |_| Ok(Alarm),
    );

    let err = root
        .create_child(vec![Element::bind(Key::of::<Alarm>()).to_constructor(alarm).into()])
        .unwrap_err();
    assert_eq!(err.kinds(), vec![ErrorKind::MissingImplementation]);
    assert!(root.jit_bindings().is_empty());

    root.get::<Clock>().unwrap();
    assert_eq!(root.jit_bindings().len(), 1);
}

fn api_module() -> Element {
    Element::private(vec![
        Element::constant(Key::named::<String>("token"), "s3cr3t"),
        Element::provider_method(
            Key::of::<Api>(),
            ProviderMethod::new::<Api, _>(vec![Dependency::new(Key::named::<String>("token"))], |args| {
                Ok(Api { token: args.cloned::<String>(0)? })
            }),
        )
        .into(),
    ])
    .expose(Key::of::<Api>())
    .into()
}

#[test]
fn private_environment_exposes_only_what_it_declares() {
    init_test_logger();

    let root = Injector::builder().element(api_module()).build().unwrap();

    assert_eq!(root.get::<Api>().unwrap().token, "s3cr3t");
    let err = root.get_named::<String>("token").unwrap_err();
    assert_eq!(err.kind(), ErrorKind::MissingImplementation);

    let private = root.private_environments();
    assert_eq!(private.len(), 1);
    assert_eq!(private[0].kind(), EnvironmentKind::Private);
    assert_eq!(*private[0].get_named::<String>("token").unwrap(), "s3cr3t");
}

#[test]
fn sibling_private_environments_may_bind_the_same_key() {
    init_test_logger();

    let other: Element = Element::private(vec![Element::constant(Key::named::<String>("token"), "other")]).into();
    let root = Injector::builder().element(api_module()).element(other).build();
    assert!(root.is_ok());
}

#[test]
fn exposing_an_unbound_key_fails() {
    init_test_logger();

    let err = Injector::builder()
        .element(Element::private(vec![]).expose(Key::of::<Api>()))
        .build()
        .unwrap_err();
    assert_eq!(err.kinds(), vec![ErrorKind::ExposedButNotBound]);
}

#[test]
fn duplicate_bindings_report_both_sources() {
    init_test_logger();

    let first = Element::bind(Key::named::<u16>("port"))
        .to_instance(Arc::new(8080u16))
        .with_source(Source::label("first"));
    let second = Element::bind(Key::named::<u16>("port"))
        .to_instance(Arc::new(9090u16))
        .with_source(Source::label("second"));

    let err = Injector::builder()
        .element(first.clone())
        .element(second)
        .build()
        .unwrap_err();
    assert_eq!(err.kinds(), vec![ErrorKind::BindingAlreadySet]);
    assert_eq!(
        err.messages()[0].sources(),
        &[Source::label("first"), Source::label("second")]
    );

    let injector = Injector::builder().element(first).build().unwrap();
    assert_eq!(*injector.get_named::<u16>("port").unwrap(), 8080);
}

#[test]
fn equivalent_duplicates_are_accepted() {
    init_test_logger();

    let injector = Injector::builder()
        .element(Element::constant(Key::named::<String>("primary"), "db"))
        .element(Element::bind(Key::named::<String>("db")).to(Key::named::<String>("primary")))
        .element(Element::bind(Key::named::<String>("db")).to(Key::named::<String>("primary")))
        .build()
        .unwrap();

    let explicit = injector
        .bindings()
        .iter()
        .filter(|binding| binding.origin() == BindingOrigin::Explicit)
        .count();
    assert_eq!(explicit, 2);
}
