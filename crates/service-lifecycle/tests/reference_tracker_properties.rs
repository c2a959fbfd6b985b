//! Property tests for reference tracker bookkeeping

use proptest::prelude::*;
use service_lifecycle::ReferenceTracker;
use service_registry::{Descriptor, MemoryRegistry, Properties, Registry, ServiceReference};
use std::sync::Arc;

const CLASS: &str = "org.example.Worker";

#[derive(Debug, Clone)]
enum Op {
    Register,
    Unregister(usize),
    Resolve(usize),
    Release(usize),
}

fn op() -> impl Strategy<Value = Op> {
    prop_oneof![
        Just(Op::Register),
        any::<usize>().prop_map(Op::Unregister),
        any::<usize>().prop_map(Op::Resolve),
        any::<usize>().prop_map(Op::Release),
    ]
}

fn pick(references: &[ServiceReference], index: usize) -> Option<ServiceReference> {
    if references.is_empty() {
        None
    } else {
        Some(references[index % references.len()].clone())
    }
}

proptest! {
    #[test]
    fn tracked_references_stay_consistent(ops in prop::collection::vec(op(), 1..40)) {
        let registry = Arc::new(MemoryRegistry::new());
        let tracker = ReferenceTracker::new();
        tracker.start(registry.clone(), Descriptor::new(CLASS));
        let mut registered: Vec<ServiceReference> = Vec::new();

        for (step, op) in ops.into_iter().enumerate() {
            match op {
                Op::Register => {
                    let reference = registry
                        .register(vec![CLASS.to_string()], Arc::new(step), Properties::new())
                        .unwrap();
                    registered.push(reference);
                }
                Op::Unregister(index) => {
                    if let Some(reference) = pick(&registered, index) {
                        registry.unregister(&reference).unwrap();
                        registered.retain(|r| *r != reference);
                    }
                }
                Op::Resolve(index) => {
                    if let Some(reference) = pick(&registered, index) {
                        prop_assert!(tracker.get_service(&reference).is_some());
                    }
                }
                Op::Release(index) => {
                    if let Some(reference) = pick(&registered, index) {
                        tracker.release_reference(&reference);
                    }
                }
            }

            let available = tracker.available_references();
            let tracked = tracker.tracked_references();
            prop_assert_eq!(&available, &registered);
            for reference in &tracked {
                prop_assert!(available.contains(reference));
            }
            for reference in &registered {
                let expected = usize::from(tracked.contains(reference));
                prop_assert_eq!(registry.usage_count(reference), expected);
            }
        }

        prop_assert!(tracker.stop());
        for reference in &registered {
            prop_assert_eq!(registry.usage_count(reference), 0);
        }
    }
}
