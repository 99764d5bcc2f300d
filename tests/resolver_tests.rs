mod common;

use common::{analyzer, configured, set_table_initializer};
use tolc_aot::report::KindOrigin;
use tolc_aot::universe::ClassUniverse;
use tolc_aot::{AnalysisConfig, Error, InitKind, PolicyDirective};

#[test]
fn test_unconfigured_class_without_initializer_is_proven_build_time() {
    let mut u = ClassUniverse::new();
    let c = u.define_class("app.Holder");
    let (u, a) = analyzer(u);
    assert_eq!(a.compute_kind(c).unwrap(), InitKind::BuildTime);
    assert_eq!(u.init_count(c), 1);
    let diag = a.diagnostics();
    assert_eq!(diag.class("app.Holder").unwrap().origin, Some(KindOrigin::ProvenEarly));
}

#[test]
fn test_primitives_and_arrays_are_trivially_build_time() {
    let mut u = ClassUniverse::new();
    let int = u.define_primitive("int");
    let ints = u.define_array("int[]");
    let (_, a) = analyzer(u);
    assert_eq!(a.compute_kind(int).unwrap(), InitKind::BuildTime);
    assert_eq!(a.compute_kind(ints).unwrap(), InitKind::BuildTime);
    let diag = a.diagnostics();
    assert_eq!(diag.class("int").unwrap().origin, Some(KindOrigin::Trivial));
}

#[test]
fn test_package_directive_applies_to_member_classes() {
    let mut u = ClassUniverse::new();
    let lru = u.define_class("app.cache.Lru");
    let field = u.add_static_field(lru, "SLOTS", "[I", None).unwrap();
    set_table_initializer(&mut u, lru, field, &[1, 2]);
    let directives =
        [PolicyDirective::new("app.cache", InitKind::BuildTime, "cache warms at build")];
    let (u, a) = configured(u, AnalysisConfig::new(), &directives);
    assert_eq!(a.compute_kind(lru).unwrap(), InitKind::BuildTime);
    assert_eq!(u.init_count(lru), 1);
    let diag = a.diagnostics();
    let record = diag.class("app.cache.Lru").unwrap();
    assert_eq!(record.origin, Some(KindOrigin::Policy));
    assert!(record.reasons.iter().any(|r| r.contains("cache warms at build")));
}

#[test]
fn test_hierarchy_overrides_non_strict_build_time() {
    let mut u = ClassUniverse::new();
    let base = u.define_class("app.Base");
    let derived = u.define_class("app.Derived");
    u.set_superclass(derived, base);
    let directives = [
        PolicyDirective::new("app.Base", InitKind::RunTime, "base touches the filesystem")
            .strict(),
        PolicyDirective::new("app.Derived", InitKind::BuildTime, "wishful thinking"),
    ];
    let (_, a) = configured(u, AnalysisConfig::new(), &directives);
    assert_eq!(a.compute_kind(derived).unwrap(), InitKind::RunTime);
    let diag = a.diagnostics();
    let record = diag.class("app.Derived").unwrap();
    assert_eq!(record.origin, Some(KindOrigin::HierarchyBound));
    assert!(record.reasons.iter().any(|r| r.contains("superclass")));
}

#[test]
fn test_strict_build_time_against_run_time_hierarchy_is_a_conflict() {
    let mut u = ClassUniverse::new();
    let base = u.define_class("app.Base");
    let derived = u.define_class("app.Derived");
    u.set_superclass(derived, base);
    let directives = [
        PolicyDirective::new("app.Base", InitKind::RunTime, "base touches the filesystem")
            .strict(),
        PolicyDirective::new("app.Derived", InitKind::BuildTime, "pinned by the user").strict(),
    ];
    let (_, a) = configured(u, AnalysisConfig::new(), &directives);
    let err = a.compute_kind(derived).unwrap_err();
    assert!(matches!(err, Error::ConfigConflict { .. }));
}

#[test]
fn test_default_method_interfaces_bound_the_kind() {
    let mut u = ClassUniverse::new();
    let plain = u.define_interface("app.Plain");
    let defaulted = u.define_interface("app.WithDefaults");
    u.set_declares_default_methods(defaulted, true);
    let via_plain = u.define_class("app.ViaPlain");
    u.add_interface(via_plain, plain);
    let via_defaulted = u.define_class("app.ViaDefaulted");
    u.add_interface(via_defaulted, defaulted);
    let directives = [
        PolicyDirective::new("app.Plain", InitKind::RunTime, "interface rule").strict(),
        PolicyDirective::new("app.WithDefaults", InitKind::RunTime, "interface rule").strict(),
    ];
    let (_, a) = configured(u, AnalysisConfig::new(), &directives);
    // An interface without default methods never initializes with its
    // implementors, so its demand does not transfer.
    assert_eq!(a.compute_kind(via_plain).unwrap(), InitKind::BuildTime);
    assert_eq!(a.compute_kind(via_defaulted).unwrap(), InitKind::RunTime);
}

#[test]
fn test_rerun_policy_initializes_at_build_and_commits_rerun() {
    let mut u = ClassUniverse::new();
    let c = u.define_class("app.Seeded");
    let directives =
        [PolicyDirective::new("app.Seeded", InitKind::Rerun, "captures a random seed")];
    let (u, a) = configured(u, AnalysisConfig::new(), &directives);
    assert_eq!(a.compute_kind(c).unwrap(), InitKind::Rerun);
    assert_eq!(u.init_count(c), 1);
}

#[test]
fn test_host_failure_demotes_non_strict_build_time() {
    let mut u = ClassUniverse::new();
    let c = u.define_class("app.Fragile");
    u.fail_linkage(c, "native library missing");
    let directives =
        [PolicyDirective::new("app.Fragile", InitKind::BuildTime, "assumed harmless")];
    let (u, a) = configured(u, AnalysisConfig::new(), &directives);
    assert_eq!(a.compute_kind(c).unwrap(), InitKind::RunTime);
    assert_eq!(u.init_count(c), 0);
    let diag = a.diagnostics();
    let record = diag.class("app.Fragile").unwrap();
    assert!(record.reasons.iter().any(|r| r.contains("demoted to run-time")));
}

#[test]
fn test_host_failure_under_strict_demand_is_fatal() {
    let mut u = ClassUniverse::new();
    let c = u.define_class("app.Fragile");
    u.fail_linkage(c, "native library missing");
    let directives =
        [PolicyDirective::new("app.Fragile", InitKind::BuildTime, "pinned").strict()];
    let (_, a) = configured(u, AnalysisConfig::new(), &directives);
    let err = a.compute_kind(c).unwrap_err();
    assert!(matches!(err, Error::Linkage { .. }));
}

#[test]
fn test_synthetic_proxy_trusts_build_time_interfaces() {
    let mut u = ClassUniverse::new();
    let iface = u.define_interface("app.Supplier");
    let lambda = u.define_class("app.Lambda$1");
    u.mark_synthetic(lambda);
    u.add_interface(lambda, iface);
    // The capture setup writes into an array, which the early proof
    // rejects; only the proxy rule can grant build time here.
    let field = u.add_static_field(lambda, "CAPTURED", "[I", None).unwrap();
    set_table_initializer(&mut u, lambda, field, &[7]);
    let (_, a) = analyzer(u);
    assert_eq!(a.compute_kind(lambda).unwrap(), InitKind::BuildTime);
    let diag = a.diagnostics();
    assert_eq!(
        diag.class("app.Lambda$1").unwrap().origin,
        Some(KindOrigin::SyntheticProxy)
    );
}

#[test]
fn test_synthetic_proxy_can_be_disabled() {
    let mut u = ClassUniverse::new();
    let iface = u.define_interface("app.Supplier");
    let lambda = u.define_class("app.Lambda$1");
    u.mark_synthetic(lambda);
    u.add_interface(lambda, iface);
    let field = u.add_static_field(lambda, "CAPTURED", "[I", None).unwrap();
    set_table_initializer(&mut u, lambda, field, &[7]);
    let mut config = AnalysisConfig::new();
    config.trust_interfaces_for_synthetic = false;
    let (_, a) = configured(u, config, &[]);
    assert_eq!(a.compute_kind(lambda).unwrap(), InitKind::RunTime);
}

#[test]
fn test_computed_kind_is_memoized() {
    let mut u = ClassUniverse::new();
    let base = u.define_class("app.Base");
    let derived = u.define_class("app.Derived");
    u.set_superclass(derived, base);
    let (u, a) = analyzer(u);
    assert_eq!(a.computed_kind(derived), None);
    assert_eq!(a.compute_kind(derived).unwrap(), InitKind::BuildTime);
    assert_eq!(a.compute_kind(derived).unwrap(), InitKind::BuildTime);
    assert_eq!(a.computed_kind(derived), Some(InitKind::BuildTime));
    assert_eq!(a.computed_kind(base), Some(InitKind::BuildTime));
    assert_eq!(u.init_count(base), 1);
    assert_eq!(u.init_count(derived), 1);
}
