//! Candidate selection of single dependencies under eager and lazy binding

use service_lifecycle::{
    BindingStrategy, DependencyEvent, DependencyEventKind, DependencyTracker, ServiceType,
    SingleDependencyTracker,
};
use service_registry::{Descriptor, MemoryRegistry, ServiceObject};
use std::sync::{Arc, Mutex};

mod common;
use common::{publish_object, registry, withdraw};

const CLASS: &str = "org.example.Repository";

fn objects() -> Vec<ServiceObject> {
    (0..3)
        .map(|i| Arc::new(format!("repository-{i}")) as ServiceObject)
        .collect()
}

fn tracker(strategy: BindingStrategy) -> SingleDependencyTracker {
    SingleDependencyTracker::new(
        "repository",
        Descriptor::new(CLASS),
        strategy,
        Some(ServiceType::of::<String>()),
    )
}

fn bound(tracker: &SingleDependencyTracker) -> Option<String> {
    tracker
        .tracked_dependency()
        .and_then(|value| value.downcast::<String>())
        .map(|s| (*s).clone())
}

fn expect(objs: &[ServiceObject], index: usize) -> Option<String> {
    objs[index].clone().downcast::<String>().ok().map(|s| (*s).clone())
}

#[test]
fn test_eager_binding_sequence() {
    let registry: Arc<MemoryRegistry> = registry();
    let objs = objects();
    let tracker = tracker(BindingStrategy::Eager);
    assert!(tracker.start(registry.clone()));
    assert_eq!(bound(&tracker), None);

    let r1 = publish_object(&registry, CLASS, objs[0].clone());
    assert_eq!(bound(&tracker), expect(&objs, 0));
    let r2 = publish_object(&registry, CLASS, objs[1].clone());
    assert_eq!(bound(&tracker), expect(&objs, 1));
    let r3 = publish_object(&registry, CLASS, objs[2].clone());
    assert_eq!(bound(&tracker), expect(&objs, 2));

    withdraw(&registry, &r3);
    assert_eq!(bound(&tracker), expect(&objs, 1));

    withdraw(&registry, &r1);
    assert_eq!(bound(&tracker), expect(&objs, 1));

    let r3 = publish_object(&registry, CLASS, objs[2].clone());
    assert_eq!(bound(&tracker), expect(&objs, 2));

    withdraw(&registry, &r3);
    assert_eq!(bound(&tracker), expect(&objs, 1));

    withdraw(&registry, &r2);
    assert_eq!(bound(&tracker), None);
    assert!(registry.is_empty());
}

#[test]
fn test_lazy_binding_sequence() {
    let registry = registry();
    let objs = objects();
    let tracker = tracker(BindingStrategy::Lazy);
    assert!(tracker.start(registry.clone()));

    let r1 = publish_object(&registry, CLASS, objs[0].clone());
    assert_eq!(bound(&tracker), expect(&objs, 0));
    let r2 = publish_object(&registry, CLASS, objs[1].clone());
    assert_eq!(bound(&tracker), expect(&objs, 0));
    let r3 = publish_object(&registry, CLASS, objs[2].clone());
    assert_eq!(bound(&tracker), expect(&objs, 0));

    withdraw(&registry, &r1);
    assert_eq!(bound(&tracker), expect(&objs, 1));

    let r1 = publish_object(&registry, CLASS, objs[0].clone());
    assert_eq!(bound(&tracker), expect(&objs, 1));

    withdraw(&registry, &r2);
    assert_eq!(bound(&tracker), expect(&objs, 2));

    withdraw(&registry, &r3);
    assert_eq!(bound(&tracker), expect(&objs, 0));

    withdraw(&registry, &r1);
    assert_eq!(bound(&tracker), None);
}

#[test]
fn test_only_bound_reference_is_held() {
    let registry = registry();
    let objs = objects();

    let eager = tracker(BindingStrategy::Eager);
    eager.start(registry.clone());
    let r1 = publish_object(&registry, CLASS, objs[0].clone());
    let r2 = publish_object(&registry, CLASS, objs[1].clone());
    assert_eq!(registry.usage_count(&r1), 0);
    assert_eq!(registry.usage_count(&r2), 1);
    assert_eq!(eager.tracked_reference(), Some(r2.clone()));

    let lazy = tracker(BindingStrategy::Lazy);
    lazy.start(registry.clone());
    assert_eq!(lazy.tracked_reference(), Some(r1.clone()));
    assert_eq!(registry.usage_count(&r1), 1);

    eager.stop();
    lazy.stop();
    assert_eq!(registry.usage_count(&r1), 0);
    assert_eq!(registry.usage_count(&r2), 0);
}

#[test]
fn test_eager_events_carry_old_and_new_values() {
    let registry = registry();
    let objs = objects();
    let tracker = tracker(BindingStrategy::Eager);
    let events: Arc<Mutex<Vec<DependencyEvent>>> = Arc::new(Mutex::new(Vec::new()));
    let sink = events.clone();
    tracker.add_listener(Arc::new(move |event: &DependencyEvent| {
        sink.lock().unwrap().push(event.clone());
    }));
    tracker.start(registry.clone());

    let r1 = publish_object(&registry, CLASS, objs[0].clone());
    let r2 = publish_object(&registry, CLASS, objs[1].clone());
    withdraw(&registry, &r2);
    withdraw(&registry, &r1);

    let events = events.lock().unwrap();
    let kinds: Vec<DependencyEventKind> = events.iter().map(|e| e.kind).collect();
    assert_eq!(
        kinds,
        vec![
            DependencyEventKind::Available,
            DependencyEventKind::Changed,
            DependencyEventKind::Changed,
            DependencyEventKind::Unavailable,
        ]
    );

    let changed = &events[1];
    assert!(changed.old.as_ref().unwrap().single().is_some_and(|s| Arc::ptr_eq(s, &objs[0])));
    assert!(changed.new.as_ref().unwrap().single().is_some_and(|s| Arc::ptr_eq(s, &objs[1])));
    assert!(events[3].new.is_none());
    assert_eq!(events[3].kind.property_name(), "dependencyUnavailable");
}

#[test]
fn test_unresolvable_candidates_are_skipped() {
    let registry = registry();
    let tracker = tracker(BindingStrategy::Lazy);
    tracker.start(registry.clone());

    let wrong = publish_object(&registry, CLASS, Arc::new(42u32));
    assert_eq!(bound(&tracker), None);
    assert_eq!(registry.usage_count(&wrong), 0);

    let objs = objects();
    let right = publish_object(&registry, CLASS, objs[0].clone());
    assert_eq!(tracker.tracked_reference(), Some(right.clone()));

    withdraw(&registry, &right);
    assert_eq!(bound(&tracker), None);
    assert_eq!(tracker.references().available_references(), vec![wrong]);
}
