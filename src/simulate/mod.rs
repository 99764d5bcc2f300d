//! Simulation of class initializers at build time.
//!
//! A simulation attempt interprets the initializer of a run-time classified
//! class over a private heap. Classes pulled in through initialization
//! triggers join the same cluster; a dependency cycle shares one fate, so a
//! cluster publishes either simulated values for all of its entangled
//! members or a failure for all of them. Published results are global,
//! immutable and consumed by later attempts through snapshot import.

pub mod cluster;
pub mod heap;
pub mod interp;
pub mod value;

use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

use crate::classfile::{FieldRef, TypeRef};
use crate::consts::RESOLVE_MAX_DEPTH;
use crate::context::AnalysisContext;
use crate::error::{Error, Result};
use crate::policy::InitKind;
use crate::report::SimStatus;
use crate::resolver::KindResolver;

use cluster::{Cluster, MemberId, MemberStatus};
use heap::FrozenHeap;
use interp::Interp;
use value::SimValue;

/// Static field values one class publishes after a clean simulation
#[derive(Debug)]
pub struct SimulatedInit {
    /// Final value of every static field, sorted by field handle
    pub fields: Vec<(FieldRef, SimValue)>,
    /// Object graph those values reference
    pub heap: Arc<FrozenHeap>,
}

/// Globally published outcome of simulating one class
#[derive(Clone, Debug)]
pub enum SimulationResult {
    NotSimulated,
    Failed,
    /// The resolver already initialized the class on the host
    HostedInitialized,
    Simulated(Arc<SimulatedInit>),
}

impl SimulationResult {
    pub fn is_simulated(&self) -> bool {
        matches!(self, SimulationResult::Simulated(_))
    }

    /// True when the class will be fully initialized in the image
    pub fn is_satisfied(&self) -> bool {
        matches!(
            self,
            SimulationResult::Simulated(_) | SimulationResult::HostedInitialized
        )
    }
}

pub struct SimulationEngine {
    results: DashMap<TypeRef, SimulationResult>,
}

impl SimulationEngine {
    pub fn new() -> Self {
        SimulationEngine {
            results: DashMap::new(),
        }
    }

    /// Published result for `class`; `NotSimulated` when nothing has been
    /// published yet
    pub fn result(&self, class: TypeRef) -> SimulationResult {
        self.results
            .get(&class)
            .map(|entry| entry.value().clone())
            .unwrap_or(SimulationResult::NotSimulated)
    }

    /// Try to simulate `class`, publishing the outcome for it and for every
    /// class that becomes entangled with it. Returns whether the class ends
    /// up initialized in the image.
    pub fn simulate(
        &self,
        ctx: &AnalysisContext,
        resolver: &KindResolver,
        class: TypeRef,
    ) -> Result<bool> {
        let mut cluster = Cluster::new();
        self.simulate_nested(ctx, resolver, &mut cluster, class, None, 0)
    }

    pub(crate) fn simulate_nested(
        &self,
        ctx: &AnalysisContext,
        resolver: &KindResolver,
        cluster: &mut Cluster,
        class: TypeRef,
        requester: Option<MemberId>,
        nest: usize,
    ) -> Result<bool> {
        match self.result(class) {
            SimulationResult::Simulated(_) | SimulationResult::HostedInitialized => {
                return Ok(true)
            }
            SimulationResult::Failed => return Ok(false),
            SimulationResult::NotSimulated => {}
        }

        if let Some(id) = cluster.member_of(class) {
            return match cluster.member(id).status {
                MemberStatus::PublishedSimulated => Ok(true),
                MemberStatus::PublishedFailed => Ok(false),
                _ => {
                    // Still in flight further up the stack: record the cycle
                    // edge and let the caller proceed optimistically.
                    if let Some(from) = requester {
                        cluster.add_dependency(from, id);
                    }
                    Ok(false)
                }
            };
        }

        let kind = resolver.compute(ctx, class)?;
        if kind == InitKind::BuildTime {
            self.install(ctx, class, SimulationResult::HostedInitialized)?;
            return Ok(true);
        }

        let id = cluster.add_member(class);
        if let Some(from) = requester {
            cluster.add_dependency(from, id);
        }
        self.seed_statics(ctx, cluster, id, class);

        let decision = ctx.policy.lookup(&ctx.class_name(class));
        if decision.is_strictly(InitKind::RunTime) {
            cluster.push_reason(
                id,
                "configuration pins the class to run-time initialization".to_string(),
            );
        } else if kind == InitKind::Rerun {
            cluster.push_reason(
                id,
                "initializer must run again at image startup".to_string(),
            );
        } else if nest > RESOLVE_MAX_DEPTH {
            cluster.push_reason(id, "initializer dependency chain is too deep".to_string());
        }

        if cluster.member(id).reasons.is_empty() {
            self.require_hierarchy(ctx, resolver, cluster, id, class, nest)?;
        }

        if cluster.member(id).reasons.is_empty() {
            if let Some(body) = ctx.host.decode_initializer(class) {
                let mut interp = Interp::new(self, ctx, resolver, id, class, nest);
                interp.run(cluster, &body)?;
            }
            // A class without an initializer keeps its seeded constants.
        }

        cluster.member_mut(id).status = MemberStatus::InitCandidate;

        let closure = cluster.closure(id);
        let incomplete = closure
            .iter()
            .any(|m| cluster.member(*m).status == MemberStatus::CollectingDependencies);
        if incomplete {
            // Part of a cycle whose outermost member is still interpreting;
            // that member will publish the whole closure.
            return Ok(false);
        }

        let all_ok = closure.iter().all(|m| {
            let member = cluster.member(*m);
            member.status != MemberStatus::PublishedFailed && member.reasons.is_empty()
        });
        self.publish(ctx, cluster, &closure, all_ok)?;
        Ok(all_ok)
    }

    /// Superclass and default-method interfaces must be initializable
    /// alongside the class itself
    fn require_hierarchy(
        &self,
        ctx: &AnalysisContext,
        resolver: &KindResolver,
        cluster: &mut Cluster,
        id: MemberId,
        class: TypeRef,
        nest: usize,
    ) -> Result<()> {
        let hierarchy = ctx.host.hierarchy_of(class);
        let mut deps = Vec::new();
        if let Some(superclass) = hierarchy.superclass {
            deps.push(superclass);
        }
        deps.extend(resolver.default_method_interfaces(ctx, &hierarchy.interfaces)?);
        for dep in deps {
            let meta = ctx.host.class_meta(dep);
            if meta.is_trivially_initialized() {
                continue;
            }
            let ok = self.simulate_nested(ctx, resolver, cluster, dep, Some(id), nest + 1)?;
            if ok {
                continue;
            }
            let pending = cluster
                .member_of(dep)
                .map(|dep_id| !cluster.member(dep_id).status.is_published())
                .unwrap_or(false);
            if !pending {
                cluster.push_reason(
                    id,
                    format!(
                        "depends on {} which cannot be simulated",
                        ctx.class_name(dep)
                    ),
                );
                return Ok(());
            }
        }
        Ok(())
    }

    /// Start every member shadow from the prepared state: ConstantValue
    /// constants where present, kind defaults otherwise
    fn seed_statics(
        &self,
        ctx: &AnalysisContext,
        cluster: &mut Cluster,
        id: MemberId,
        class: TypeRef,
    ) {
        for field in ctx.host.static_fields(class) {
            let meta = ctx.host.field_meta(field);
            let value = meta
                .constant_value
                .as_ref()
                .map(SimValue::from_constant)
                .unwrap_or_else(|| SimValue::default_for(meta.kind));
            cluster
                .member_mut(id)
                .static_values
                .insert(field, value);
        }
    }

    /// Publish the whole closure with one shared fate
    fn publish(
        &self,
        ctx: &AnalysisContext,
        cluster: &mut Cluster,
        closure: &[MemberId],
        all_ok: bool,
    ) -> Result<()> {
        let candidates: Vec<MemberId> = closure
            .iter()
            .copied()
            .filter(|m| cluster.member(*m).status == MemberStatus::InitCandidate)
            .collect();

        if !all_ok {
            for id in candidates {
                let class = cluster.member(id).class;
                self.install(ctx, class, SimulationResult::Failed)?;
                for reason in cluster.member(id).reasons.clone() {
                    ctx.diag.push_reason(class, reason);
                }
                ctx.diag.record_simulation(class, SimStatus::Failed);
                cluster.member_mut(id).status = MemberStatus::PublishedFailed;
                log::debug!(
                    "SIMULATE: {} published as not simulatable",
                    ctx.class_name(class)
                );
            }
            return Ok(());
        }

        let mut roots = Vec::new();
        for id in &candidates {
            roots.extend(cluster.member(*id).static_values.values().cloned());
        }
        let (frozen, map) = heap::freeze(&cluster.heap, &roots);
        let frozen = Arc::new(frozen);

        for id in candidates {
            let class = cluster.member(id).class;
            let mut fields = Vec::with_capacity(cluster.member(id).static_values.len());
            for (field, value) in &cluster.member(id).static_values {
                let value = match value {
                    SimValue::Ref(live) => SimValue::Ref(*map.get(live).ok_or_else(|| {
                        Error::invariant(format!(
                            "published value of {} refers to an object outside its snapshot",
                            ctx.class_name(class)
                        ))
                    })?),
                    other => other.clone(),
                };
                fields.push((*field, value));
            }
            fields.sort_by_key(|(field, _)| *field);
            let init = Arc::new(SimulatedInit {
                fields,
                heap: frozen.clone(),
            });
            self.install(ctx, class, SimulationResult::Simulated(init))?;
            ctx.diag.record_simulation(class, SimStatus::Simulated);
            cluster.member_mut(id).status = MemberStatus::PublishedSimulated;
            log::debug!("SIMULATE: {} published simulated values", ctx.class_name(class));
        }
        Ok(())
    }

    /// Atomically install a global result. The first publication wins;
    /// a simulated/failed disagreement between threads means the analysis
    /// itself is broken.
    fn install(
        &self,
        ctx: &AnalysisContext,
        class: TypeRef,
        result: SimulationResult,
    ) -> Result<()> {
        match self.results.entry(class) {
            Entry::Vacant(slot) => {
                if matches!(result, SimulationResult::HostedInitialized) {
                    ctx.diag.record_simulation(class, SimStatus::HostedInitialized);
                }
                slot.insert(result);
                Ok(())
            }
            Entry::Occupied(existing) => {
                let conflict = matches!(
                    (existing.get(), &result),
                    (SimulationResult::Simulated(_), SimulationResult::Failed)
                        | (SimulationResult::Failed, SimulationResult::Simulated(_))
                );
                if conflict {
                    return Err(Error::invariant(format!(
                        "simulation of {} diverged between threads",
                        ctx.class_name(class)
                    )));
                }
                Ok(())
            }
        }
    }
}

impl Default for SimulationEngine {
    fn default() -> Self {
        Self::new()
    }
}
