//! Late safety propagation over the whole-program call graph.
//!
//! The early proof judges an initializer by its text alone. Once the
//! surrounding compiler has a complete call graph, the same question can be
//! answered with reachability: a method is unsafe when it can reach native
//! or unbindable code or touch an unsafe class, and a class is unsafe when
//! its initializer method or a supertype is. Everything still classified
//! run-time that stays outside the unsafe set is then forced to build time
//! on the host.

use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::Direction;
use rustc_hash::{FxHashMap, FxHashSet};

use crate::classfile::{MethodRef, TypeRef};
use crate::consts::{PROPAGATE_MAX_ROUNDS, RESOLVE_MAX_DEPTH};
use crate::context::AnalysisContext;
use crate::error::{Error, Result};
use crate::host::HostInitOutcome;
use crate::policy::InitKind;
use crate::report::KindOrigin;
use crate::resolver::KindResolver;

/// Whole-program call graph handed over by the surrounding compiler.
///
/// Nodes are methods; an edge `caller -> callee` records a possible call.
/// The touch relation lists the classes whose statics a method reads or
/// writes, instantiates, or explicitly initializes.
pub struct CallGraph {
    graph: DiGraph<MethodRef, ()>,
    nodes: FxHashMap<MethodRef, NodeIndex>,
    touched: FxHashMap<MethodRef, Vec<TypeRef>>,
}

impl CallGraph {
    pub fn new() -> Self {
        CallGraph {
            graph: DiGraph::new(),
            nodes: FxHashMap::default(),
            touched: FxHashMap::default(),
        }
    }

    fn node(&mut self, method: MethodRef) -> NodeIndex {
        match self.nodes.get(&method) {
            Some(&index) => index,
            None => {
                let index = self.graph.add_node(method);
                self.nodes.insert(method, index);
                index
            }
        }
    }

    pub fn add_method(&mut self, method: MethodRef) {
        self.node(method);
    }

    pub fn add_call(&mut self, caller: MethodRef, callee: MethodRef) {
        let caller = self.node(caller);
        let callee = self.node(callee);
        self.graph.update_edge(caller, callee, ());
    }

    pub fn add_touch(&mut self, method: MethodRef, class: TypeRef) {
        self.add_method(method);
        let touched = self.touched.entry(method).or_default();
        if !touched.contains(&class) {
            touched.push(class);
        }
    }

    pub fn method_count(&self) -> usize {
        self.graph.node_count()
    }
}

impl Default for CallGraph {
    fn default() -> Self {
        Self::new()
    }
}

/// What the propagation pass did
pub struct LateReport {
    /// Classes flipped from run-time to build-time
    pub forced: Vec<TypeRef>,
    /// Classes that stayed run-time because the host refused to initialize
    /// them, with the host's message
    pub failed: Vec<(TypeRef, String)>,
    /// Final unsafe set after the fixed point
    pub unsafe_classes: FxHashSet<TypeRef>,
}

/// Run the fixed point and force the surviving safe run-time classes to
/// build time. Forcing failures are recorded, never fatal.
pub fn propagate_late_safety(
    ctx: &AnalysisContext,
    resolver: &KindResolver,
    graph: &CallGraph,
) -> Result<LateReport> {
    let mut unsafe_methods: FxHashSet<MethodRef> = FxHashSet::default();
    for index in graph.graph.node_indices() {
        let method = graph.graph[index];
        let meta = ctx.host.method_meta(method);
        if meta.is_native || !meta.statically_bindable {
            unsafe_methods.insert(method);
        }
    }

    // Class universe: everything classified so far plus everything the call
    // graph mentions.
    let mut classes: FxHashSet<TypeRef> = FxHashSet::default();
    for (class, _) in resolver.computed_kinds() {
        classes.insert(class);
    }
    for index in graph.graph.node_indices() {
        classes.insert(ctx.host.method_meta(graph.graph[index]).owner);
    }
    for touched in graph.touched.values() {
        classes.extend(touched.iter().copied());
    }

    let mut unsafe_classes: FxHashSet<TypeRef> = FxHashSet::default();
    for &class in &classes {
        let decision = ctx.policy.lookup(&ctx.class_name(class));
        if decision.kind == Some(InitKind::RunTime) {
            unsafe_classes.insert(class);
        }
    }

    // Hierarchy edges and initializer methods are stable; look them up once.
    let mut class_deps: FxHashMap<TypeRef, Vec<TypeRef>> = FxHashMap::default();
    let mut initializers: FxHashMap<TypeRef, Option<MethodRef>> = FxHashMap::default();
    for &class in &classes {
        let hierarchy = ctx.host.hierarchy_of(class);
        let mut deps = Vec::new();
        if let Some(superclass) = hierarchy.superclass {
            deps.push(superclass);
        }
        deps.extend(resolver.default_method_interfaces(ctx, &hierarchy.interfaces)?);
        class_deps.insert(class, deps);
        initializers.insert(class, ctx.host.initializer_method(class));
    }

    let mut rounds = 0usize;
    loop {
        rounds += 1;
        if rounds > PROPAGATE_MAX_ROUNDS {
            return Err(Error::invariant(
                "late safety propagation did not reach a fixed point",
            ));
        }
        let mut changed = false;

        for index in graph.graph.node_indices() {
            let method = graph.graph[index];
            if unsafe_methods.contains(&method) {
                continue;
            }
            let unsafe_callee = graph
                .graph
                .neighbors_directed(index, Direction::Outgoing)
                .any(|callee| unsafe_methods.contains(&graph.graph[callee]));
            let unsafe_touch = graph
                .touched
                .get(&method)
                .map(|touched| touched.iter().any(|class| unsafe_classes.contains(class)))
                .unwrap_or(false);
            if unsafe_callee || unsafe_touch {
                unsafe_methods.insert(method);
                changed = true;
            }
        }

        for &class in &classes {
            if unsafe_classes.contains(&class) {
                continue;
            }
            let unsafe_initializer = initializers
                .get(&class)
                .and_then(|initializer| initializer.as_ref())
                .map(|method| unsafe_methods.contains(method))
                .unwrap_or(false);
            let unsafe_dep = class_deps
                .get(&class)
                .map(|deps| deps.iter().any(|dep| unsafe_classes.contains(dep)))
                .unwrap_or(false);
            if unsafe_initializer || unsafe_dep {
                unsafe_classes.insert(class);
                changed = true;
            }
        }

        if !changed {
            break;
        }
    }
    log::debug!(
        "PROPAGATE: fixed point after {} rounds, {} unsafe methods, {} unsafe classes",
        rounds,
        unsafe_methods.len(),
        unsafe_classes.len()
    );

    let mut report = LateReport {
        forced: Vec::new(),
        failed: Vec::new(),
        unsafe_classes,
    };
    let mut candidates: Vec<TypeRef> = resolver
        .computed_kinds()
        .into_iter()
        .filter(|(class, kind)| {
            *kind == InitKind::RunTime && !report.unsafe_classes.contains(class)
        })
        .map(|(class, _)| class)
        .collect();
    candidates.sort_by_key(|class| ctx.class_name(*class));

    let mut visited: FxHashSet<TypeRef> = FxHashSet::default();
    for class in candidates {
        force_chain(ctx, resolver, class, &mut visited, &mut report)?;
    }
    Ok(report)
}

/// Force one class and its superclass chain, topmost ancestor first, so
/// host initialization order matches what the runtime would do
fn force_chain(
    ctx: &AnalysisContext,
    resolver: &KindResolver,
    class: TypeRef,
    visited: &mut FxHashSet<TypeRef>,
    report: &mut LateReport,
) -> Result<()> {
    let mut chain = vec![class];
    let mut cursor = ctx.host.hierarchy_of(class).superclass;
    let mut hops = 0usize;
    while let Some(current) = cursor {
        hops += 1;
        if hops > RESOLVE_MAX_DEPTH {
            return Err(Error::invariant(format!(
                "superclass chain of {} does not terminate",
                ctx.class_name(class)
            )));
        }
        chain.push(current);
        cursor = ctx.host.hierarchy_of(current).superclass;
    }

    for &current in chain.iter().rev() {
        if !visited.insert(current) {
            continue;
        }
        let forceable = resolver.computed(current) == Some(InitKind::RunTime)
            && !report.unsafe_classes.contains(&current);
        if !forceable {
            continue;
        }
        match resolver.host_commit(ctx, current) {
            HostInitOutcome::Initialized => {
                resolver.commit_kind(current, InitKind::BuildTime);
                ctx.diag.record_kind(current, InitKind::BuildTime, KindOrigin::LateForced);
                ctx.diag.push_reason(current, "proven safe by whole-program reachability");
                report.forced.push(current);
                log::debug!("PROPAGATE: forced {} to build-time", ctx.class_name(current));
            }
            failure => {
                ctx.diag.push_reason(
                    current,
                    format!("late forcing failed: {}", failure.message()),
                );
                report
                    .failed
                    .push((current, failure.message().to_string()));
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_call_graph_interns_methods_and_edges() {
        let mut graph = CallGraph::new();
        let a = MethodRef::new(1);
        let b = MethodRef::new(2);
        graph.add_call(a, b);
        graph.add_call(a, b);
        graph.add_method(a);
        graph.add_touch(b, TypeRef::new(9));
        graph.add_touch(b, TypeRef::new(9));
        assert_eq!(graph.method_count(), 2);
        assert_eq!(graph.graph.edge_count(), 1);
        assert_eq!(graph.touched[&b].len(), 1);
    }
}
