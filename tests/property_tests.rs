mod common;

use common::configured;
use proptest::prelude::*;
use tolc_aot::host::HostRuntime;
use tolc_aot::policy::{InitKind, PolicyStore};
use tolc_aot::universe::ClassUniverse;
use tolc_aot::{AnalysisConfig, PolicyDirective};

fn any_kind() -> impl Strategy<Value = InitKind> {
    prop::sample::select(vec![InitKind::BuildTime, InitKind::Rerun, InitKind::RunTime])
}

/// One randomly shaped class world: `supers[i]` picks a superclass among the
/// earlier classes, `policies[i]` optionally registers a non-strict kind.
#[derive(Debug, Clone)]
struct WorldSpec {
    supers: Vec<Option<usize>>,
    default_ifaces: Vec<Option<usize>>,
    policies: Vec<Option<InitKind>>,
}

fn world_spec(max_classes: usize) -> impl Strategy<Value = WorldSpec> {
    (2..max_classes).prop_flat_map(|n| {
        let supers = (0..n)
            .map(|i| {
                if i == 0 {
                    Just(None).boxed()
                } else {
                    prop::option::of(0..i).boxed()
                }
            })
            .collect::<Vec<_>>();
        let ifaces = (0..n)
            .map(|i| {
                if i == 0 {
                    Just(None).boxed()
                } else {
                    prop::option::of(0..i).boxed()
                }
            })
            .collect::<Vec<_>>();
        let policies = prop::collection::vec(prop::option::of(any_kind()), n);
        (supers, ifaces, policies).prop_map(|(supers, default_ifaces, policies)| WorldSpec {
            supers,
            default_ifaces,
            policies,
        })
    })
}

fn build_world(spec: &WorldSpec) -> (ClassUniverse, Vec<PolicyDirective>) {
    let mut u = ClassUniverse::new();
    let n = spec.supers.len();
    // Interfaces first so any earlier index can serve as a default-method
    // interface; classes mirror them one to one.
    let ifaces: Vec<_> = (0..n)
        .map(|i| {
            let iface = u.define_interface(&format!("gen.Iface{}", i));
            u.set_declares_default_methods(iface, true);
            iface
        })
        .collect();
    let classes: Vec<_> = (0..n).map(|i| u.define_class(&format!("gen.Class{}", i))).collect();
    for (i, superclass) in spec.supers.iter().enumerate() {
        if let Some(s) = superclass {
            u.set_superclass(classes[i], classes[*s]);
        }
        if let Some(d) = spec.default_ifaces[i] {
            u.add_interface(classes[i], ifaces[d]);
        }
    }
    let mut directives = Vec::new();
    for (i, policy) in spec.policies.iter().enumerate() {
        if let Some(kind) = policy {
            directives.push(PolicyDirective::new(
                format!("gen.Class{}", i),
                *kind,
                "generated",
            ));
            directives.push(PolicyDirective::new(
                format!("gen.Iface{}", i),
                *kind,
                "generated",
            ));
        }
    }
    (u, directives)
}

proptest! {
    #[test]
    fn prop_lattice_join_and_meet_laws(a in any_kind(), b in any_kind(), c in any_kind()) {
        prop_assert_eq!(a.max(b), b.max(a));
        prop_assert_eq!(a.min(b), b.min(a));
        prop_assert_eq!(a.max(b).max(c), a.max(b.max(c)));
        prop_assert_eq!(a.min(b).min(c), a.min(b.min(c)));
        prop_assert_eq!(a.max(a.min(b)), a);
        prop_assert_eq!(a.min(a.max(b)), a);
    }

    #[test]
    fn prop_non_strict_inserts_widen_to_the_running_max(
        kinds in prop::collection::vec(any_kind(), 1..8)
    ) {
        let store = PolicyStore::new();
        let mut expected = None;
        for kind in &kinds {
            store.insert("gen.Widened", *kind, "generated", false).unwrap();
            expected = Some(expected.map_or(*kind, |e: InitKind| e.max(*kind)));
        }
        prop_assert_eq!(store.lookup("gen.Widened").kind, expected);
    }

    #[test]
    fn prop_most_specific_trie_node_decides(
        package_kind in any_kind(),
        class_kind in any_kind(),
        depth in 1..6usize
    ) {
        let store = PolicyStore::new();
        let segments: Vec<String> = (0..depth).map(|i| format!("seg{}", i)).collect();
        let package = segments.join(".");
        let class = format!("{}.Leaf", package);
        store.insert(&package, package_kind, "package rule", false).unwrap();
        store.insert(&class, class_kind, "class rule", false).unwrap();
        let decision = store.lookup(&class);
        prop_assert_eq!(decision.kind, Some(class_kind));
        prop_assert!(decision.exact);
        let sibling = store.lookup(&format!("{}.Other", package));
        prop_assert_eq!(sibling.kind, Some(package_kind));
        prop_assert!(!sibling.exact);
    }

    #[test]
    fn prop_computed_kinds_are_monotone_over_the_hierarchy(spec in world_spec(10)) {
        let (u, directives) = build_world(&spec);
        let classes = u.all_classes();
        let (u, a) = configured(u, AnalysisConfig::new(), &directives);
        for &class in &classes {
            a.compute_kind(class).unwrap();
        }
        for &class in &classes {
            let kind = a.computed_kind(class).unwrap();
            let hierarchy = u.hierarchy_of(class);
            if let Some(superclass) = hierarchy.superclass {
                prop_assert!(kind >= a.computed_kind(superclass).unwrap());
            }
            for iface in hierarchy.interfaces {
                if u.hierarchy_of(iface).declares_default_methods {
                    prop_assert!(kind >= a.computed_kind(iface).unwrap());
                }
            }
        }
    }

    #[test]
    fn prop_compute_is_idempotent_and_initializes_once(spec in world_spec(8)) {
        let (u, directives) = build_world(&spec);
        let classes = u.all_classes();
        let (u, a) = configured(u, AnalysisConfig::new(), &directives);
        for &class in &classes {
            let first = a.compute_kind(class).unwrap();
            let second = a.compute_kind(class).unwrap();
            prop_assert_eq!(first, second);
            prop_assert!(u.init_count(class) <= 1);
            if first == InitKind::RunTime {
                prop_assert_eq!(u.init_count(class), 0);
            }
        }
    }
}
