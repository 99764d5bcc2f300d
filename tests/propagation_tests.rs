mod common;

use common::{analyzer, configured, set_table_initializer};
use tolc_aot::host::HostRuntime;
use tolc_aot::report::KindOrigin;
use tolc_aot::universe::ClassUniverse;
use tolc_aot::{AnalysisConfig, CallGraph, InitKind, PolicyDirective};

#[test]
fn test_reachable_native_code_keeps_classes_run_time() {
    let mut u = ClassUniverse::new();
    let safe = u.define_class("app.Safe");
    let safe_field = u.add_static_field(safe, "SLOTS", "[I", None).unwrap();
    set_table_initializer(&mut u, safe, safe_field, &[1]);
    let tainted = u.define_class("app.Tainted");
    let tainted_field = u.add_static_field(tainted, "SLOTS", "[I", None).unwrap();
    set_table_initializer(&mut u, tainted, tainted_field, &[1]);
    let helper = u.add_static_method(tainted, "helper");
    let bind = u.add_native_method(tainted, "bind");

    let mut graph = CallGraph::new();
    graph.add_method(u.initializer_method(safe).unwrap());
    graph.add_call(u.initializer_method(tainted).unwrap(), helper);
    graph.add_call(helper, bind);

    let (u, a) = analyzer(u);
    assert_eq!(a.compute_kind(safe).unwrap(), InitKind::RunTime);
    assert_eq!(a.compute_kind(tainted).unwrap(), InitKind::RunTime);

    let report = a.propagate_late_safety(&graph).unwrap();
    assert_eq!(report.forced, vec![safe]);
    assert!(report.unsafe_classes.contains(&tainted));
    assert_eq!(a.computed_kind(safe), Some(InitKind::BuildTime));
    assert_eq!(a.computed_kind(tainted), Some(InitKind::RunTime));
    assert_eq!(u.init_count(safe), 1);
    assert_eq!(u.init_count(tainted), 0);
    let diag = a.diagnostics();
    let record = diag.class("app.Safe").unwrap();
    assert_eq!(record.origin, Some(KindOrigin::LateForced));
    assert!(record.reasons.iter().any(|r| r.contains("whole-program reachability")));
}

#[test]
fn test_unbindable_dispatch_seeds_unsafety() {
    let mut u = ClassUniverse::new();
    let dyn_class = u.define_class("app.Dyn");
    let dyn_field = u.add_static_field(dyn_class, "SLOTS", "[I", None).unwrap();
    set_table_initializer(&mut u, dyn_class, dyn_field, &[1]);
    let chosen = u.add_virtual_method(dyn_class, "choose", false);

    let mut graph = CallGraph::new();
    graph.add_call(u.initializer_method(dyn_class).unwrap(), chosen);

    let (_, a) = analyzer(u);
    a.compute_kind(dyn_class).unwrap();
    let report = a.propagate_late_safety(&graph).unwrap();
    assert!(report.unsafe_classes.contains(&dyn_class));
    assert!(report.forced.is_empty());
    assert_eq!(a.computed_kind(dyn_class), Some(InitKind::RunTime));
}

#[test]
fn test_touched_pinned_class_taints_callers() {
    let mut u = ClassUniverse::new();
    let pinned = u.define_class("app.Pinned");
    let toucher = u.define_class("app.Toucher");
    let field = u.add_static_field(toucher, "SLOTS", "[I", None).unwrap();
    set_table_initializer(&mut u, toucher, field, &[1]);
    let access = u.add_static_method(toucher, "access");

    let mut graph = CallGraph::new();
    graph.add_call(u.initializer_method(toucher).unwrap(), access);
    graph.add_touch(access, pinned);

    let directives =
        [PolicyDirective::new("app.Pinned", InitKind::RunTime, "pinned by the user").strict()];
    let (_, a) = configured(u, AnalysisConfig::new(), &directives);
    a.compute_kind(pinned).unwrap();
    a.compute_kind(toucher).unwrap();
    let report = a.propagate_late_safety(&graph).unwrap();
    assert!(report.unsafe_classes.contains(&pinned));
    assert!(report.unsafe_classes.contains(&toucher));
    assert!(report.forced.is_empty());
}

#[test]
fn test_interface_unsafety_flows_to_implementors() {
    let mut u = ClassUniverse::new();
    let defaulted = u.define_interface("app.WithDefaults");
    u.set_declares_default_methods(defaulted, true);
    let impl_class = u.define_class("app.Impl");
    u.add_interface(impl_class, defaulted);
    let field = u.add_static_field(impl_class, "SLOTS", "[I", None).unwrap();
    set_table_initializer(&mut u, impl_class, field, &[1]);

    let directives =
        [PolicyDirective::new("app.WithDefaults", InitKind::RunTime, "interface rule").strict()];
    let (_, a) = configured(u, AnalysisConfig::new(), &directives);
    a.compute_kind(impl_class).unwrap();
    let report = a.propagate_late_safety(&CallGraph::new()).unwrap();
    assert!(report.unsafe_classes.contains(&impl_class));
    assert!(report.forced.is_empty());
}

#[test]
fn test_forcing_walks_super_chain_topmost_first() {
    let mut u = ClassUniverse::new();
    // The subclass sorts first by name, so forcing starts there; the
    // superclass must still be initialized ahead of it.
    let base = u.define_class("app.ZBase");
    let base_field = u.add_static_field(base, "SLOTS", "[I", None).unwrap();
    set_table_initializer(&mut u, base, base_field, &[1]);
    let derived = u.define_class("app.ADerived");
    u.set_superclass(derived, base);
    let derived_field = u.add_static_field(derived, "SLOTS", "[I", None).unwrap();
    set_table_initializer(&mut u, derived, derived_field, &[2]);

    let (u, a) = analyzer(u);
    assert_eq!(a.compute_kind(derived).unwrap(), InitKind::RunTime);
    let report = a.propagate_late_safety(&CallGraph::new()).unwrap();
    assert_eq!(report.forced, vec![base, derived]);
    assert_eq!(a.computed_kind(base), Some(InitKind::BuildTime));
    assert_eq!(a.computed_kind(derived), Some(InitKind::BuildTime));
    assert_eq!(u.init_count(base), 1);
    assert_eq!(u.init_count(derived), 1);
}

#[test]
fn test_failed_forcing_is_recorded_not_fatal() {
    let mut u = ClassUniverse::new();
    let flaky = u.define_class("app.Flaky");
    let field = u.add_static_field(flaky, "SLOTS", "[I", None).unwrap();
    set_table_initializer(&mut u, flaky, field, &[1]);
    u.fail_linkage(flaky, "boot device missing");

    let (u, a) = analyzer(u);
    a.compute_kind(flaky).unwrap();
    let report = a.propagate_late_safety(&CallGraph::new()).unwrap();
    assert!(report.forced.is_empty());
    assert_eq!(report.failed.len(), 1);
    assert_eq!(report.failed[0].0, flaky);
    assert!(report.failed[0].1.contains("boot device missing"));
    assert_eq!(a.computed_kind(flaky), Some(InitKind::RunTime));
    assert_eq!(u.init_count(flaky), 0);
    let diag = a.diagnostics();
    let record = diag.class("app.Flaky").unwrap();
    assert!(record.reasons.iter().any(|r| r.contains("late forcing failed")));
}

#[test]
fn test_fixpoint_handles_cyclic_call_graphs() {
    let mut u = ClassUniverse::new();
    let c = u.define_class("app.Mutual");
    let field = u.add_static_field(c, "SLOTS", "[I", None).unwrap();
    set_table_initializer(&mut u, c, field, &[1]);
    let f = u.add_static_method(c, "f");
    let g = u.add_static_method(c, "g");

    let mut graph = CallGraph::new();
    graph.add_call(u.initializer_method(c).unwrap(), f);
    graph.add_call(f, g);
    graph.add_call(g, f);

    let (_, a) = analyzer(u);
    a.compute_kind(c).unwrap();
    let report = a.propagate_late_safety(&graph).unwrap();
    assert_eq!(report.forced, vec![c]);
    assert_eq!(a.computed_kind(c), Some(InitKind::BuildTime));
}
