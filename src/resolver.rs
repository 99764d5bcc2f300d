//! Memoized classification of classes into the initialization lattice
//!
//! `compute` folds policy demands, hierarchy constraints, and the early
//! proof into one `InitKind` per class, initializes build-time classes on
//! the host as it goes, and commits results into a shared cache with
//! `min`-merge semantics: a build-time initialization that already happened
//! can never be taken back by a slower thread.

use std::sync::Arc;

use dashmap::DashMap;
use once_cell::sync::OnceCell;
use rustc_hash::FxHashSet;

use crate::classfile::TypeRef;
use crate::consts::{RESOLVE_MAX_DEPTH, RESOLVE_MAX_HIERARCHY_STEPS};
use crate::context::AnalysisContext;
use crate::error::{Error, Result};
use crate::host::HostInitOutcome;
use crate::policy::InitKind;
use crate::proof;
use crate::report::KindOrigin;

/// Thread-safe resolver with the shared computed-kind cache
pub struct KindResolver {
    cache: DashMap<TypeRef, InitKind>,
    /// One host initialization per class, however many threads ask
    host_commits: DashMap<TypeRef, Arc<OnceCell<HostInitOutcome>>>,
}

impl Default for KindResolver {
    fn default() -> Self {
        Self::new()
    }
}

impl KindResolver {
    pub fn new() -> Self {
        Self { cache: DashMap::new(), host_commits: DashMap::new() }
    }

    /// Committed kind, if any thread has classified this class yet
    pub fn computed(&self, class: TypeRef) -> Option<InitKind> {
        self.cache.get(&class).map(|kind| *kind)
    }

    /// Snapshot of every classification committed so far
    pub fn computed_kinds(&self) -> Vec<(TypeRef, InitKind)> {
        self.cache
            .iter()
            .map(|entry| (*entry.key(), *entry.value()))
            .collect()
    }

    /// Classify a class, memoized
    pub fn compute(&self, ctx: &AnalysisContext, class: TypeRef) -> Result<InitKind> {
        self.compute_guarded(ctx, class, 0)
    }

    fn compute_guarded(
        &self,
        ctx: &AnalysisContext,
        class: TypeRef,
        depth: usize,
    ) -> Result<InitKind> {
        if depth > RESOLVE_MAX_DEPTH {
            return Err(Error::invariant(format!(
                "hierarchy of {} exceeds the resolver depth limit",
                ctx.class_name(class)
            )));
        }
        if let Some(hit) = self.cache.get(&class) {
            return Ok(*hit);
        }
        let meta = ctx.host.class_meta(class);
        if meta.is_trivially_initialized() {
            let kind = self.commit_kind(class, InitKind::BuildTime);
            ctx.diag.record_kind(class, kind, KindOrigin::Trivial);
            return Ok(kind);
        }

        let decision = ctx.policy.lookup(&meta.name);
        let mut specified = decision.kind_or_default();
        let mut origin =
            if decision.kind.is_some() { KindOrigin::Policy } else { KindOrigin::Default };
        for reason in &decision.reasons {
            ctx.diag.push_reason(class, format!("policy: {}", reason));
        }

        // Lower bound from the hierarchy: initializing this class initializes
        // its superclass and its default-method interfaces first, so their
        // demands push this class's kind up
        let hierarchy = ctx.host.hierarchy_of(class);
        let mut lower = InitKind::BuildTime;
        if let Some(superclass) = hierarchy.superclass {
            let kind = self.compute_guarded(ctx, superclass, depth + 1)?;
            if kind != InitKind::BuildTime {
                ctx.diag.push_reason(
                    class,
                    format!("superclass {} is {}", ctx.class_name(superclass), kind),
                );
            }
            lower = lower.max(kind);
        }
        for interface in self.default_method_interfaces(ctx, &hierarchy.interfaces)? {
            let kind = self.compute_guarded(ctx, interface, depth + 1)?;
            if kind != InitKind::BuildTime {
                ctx.diag.push_reason(
                    class,
                    format!(
                        "interface {} with default methods is {}",
                        ctx.class_name(interface),
                        kind
                    ),
                );
            }
            lower = lower.max(kind);
        }

        // Synthetic proxy and lambda classes carry no interesting state of
        // their own; with the toggle on, build-time interfaces are accepted
        // as sufficient evidence
        if ctx.config.trust_interfaces_for_synthetic
            && meta.is_synthetic
            && decision.kind.is_none()
            && lower == InitKind::BuildTime
            && !hierarchy.interfaces.is_empty()
        {
            let mut all_build_time = true;
            for &interface in &hierarchy.interfaces {
                if self.compute_guarded(ctx, interface, depth + 1)? != InitKind::BuildTime {
                    all_build_time = false;
                    break;
                }
            }
            if all_build_time {
                specified = InitKind::BuildTime;
                origin = KindOrigin::SyntheticProxy;
                ctx.diag.push_reason(class, "synthetic type with only build-time interfaces");
            }
        }

        // Opportunistic early proof for unconstrained classes
        if lower == InitKind::BuildTime
            && specified == InitKind::RunTime
            && !decision.is_strictly(InitKind::RunTime)
        {
            let provable = match ctx.host.decode_initializer(class) {
                // No initializer, nothing to observe
                None => true,
                Some(body) => match proof::prove_effect_free(ctx, self, class, &body) {
                    Ok(()) => true,
                    Err(abort) => {
                        ctx.diag.push_reason(class, format!("early proof rejected: {}", abort));
                        false
                    }
                },
            };
            if provable {
                match self.host_commit(ctx, class) {
                    HostInitOutcome::Initialized => {
                        specified = InitKind::BuildTime;
                        origin = KindOrigin::ProvenEarly;
                        ctx.diag.push_reason(
                            class,
                            "proven effect-free before whole-program analysis",
                        );
                    }
                    failure => {
                        ctx.diag.push_reason(
                            class,
                            format!(
                                "initialization failed during the build: {}",
                                failure.message()
                            ),
                        );
                    }
                }
            }
        }

        let mut result = lower.max(specified);
        if lower > specified {
            origin = KindOrigin::HierarchyBound;
        }

        // A strict demand must never be silently overridden
        if let Some(demanded) = decision.kind {
            if decision.strict && result != demanded {
                return Err(Error::config_conflict(format!(
                    "{} is strictly {} but its hierarchy demands {}",
                    meta.name, demanded, lower
                )));
            }
        }

        if result.requires_host_init() {
            match self.host_commit(ctx, class) {
                HostInitOutcome::Initialized => {}
                failure => {
                    if decision.strict {
                        return Err(Error::linkage(
                            meta.name.to_string(),
                            failure.message().to_string(),
                        ));
                    }
                    ctx.diag.push_reason(
                        class,
                        format!("demoted to run-time: {}", failure.message()),
                    );
                    result = InitKind::RunTime;
                }
            }
        }

        let committed = self.commit_kind(class, result);
        ctx.diag.record_kind(class, committed, origin);
        log::debug!("RESOLVE: {} -> {} ({:?})", meta.name, committed, origin);
        Ok(committed)
    }

    /// Default-method interfaces visible to initialization: interfaces
    /// without default methods are transparent, but their default-bearing
    /// ancestors still count
    pub(crate) fn default_method_interfaces(
        &self,
        ctx: &AnalysisContext,
        interfaces: &[TypeRef],
    ) -> Result<Vec<TypeRef>> {
        let mut out = Vec::new();
        let mut visited: FxHashSet<TypeRef> = FxHashSet::default();
        let mut stack: Vec<TypeRef> = interfaces.to_vec();
        let mut steps = 0usize;
        while let Some(interface) = stack.pop() {
            steps += 1;
            if steps > RESOLVE_MAX_HIERARCHY_STEPS {
                return Err(Error::invariant("interface closure walk exceeded its step limit"));
            }
            if !visited.insert(interface) {
                continue;
            }
            let hierarchy = ctx.host.hierarchy_of(interface);
            if hierarchy.declares_default_methods {
                out.push(interface);
            } else {
                stack.extend(hierarchy.interfaces);
            }
        }
        Ok(out)
    }

    /// Initialize a class on the host exactly once, whatever the caller count
    pub(crate) fn host_commit(&self, ctx: &AnalysisContext, class: TypeRef) -> HostInitOutcome {
        let cell = self
            .host_commits
            .entry(class)
            .or_insert_with(|| Arc::new(OnceCell::new()))
            .clone();
        cell.get_or_init(|| {
            if ctx.host.is_already_initialized(class) {
                HostInitOutcome::Initialized
            } else {
                log::debug!("RESOLVE: initializing {} on the host", ctx.class_name(class));
                ctx.host.ensure_initialized(class)
            }
        })
        .clone()
    }

    /// Commit with `min`-merge: the earliest irreversible commitment wins
    pub(crate) fn commit_kind(&self, class: TypeRef, result: InitKind) -> InitKind {
        let mut entry = self.cache.entry(class).or_insert(result);
        let merged = (*entry).min(result);
        *entry = merged;
        merged
    }
}
