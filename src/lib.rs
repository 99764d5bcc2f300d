//! Build-time class initialization analysis for the Terminos image builder
//!
//! Decides, for every class the image builder feeds in, whether its static
//! initializer runs during the build, runs at build time and again at
//! startup, or stays at run time; and simulates run-time initializers whose
//! effects can be baked into the image as plain field values.
//!
//! ## Architecture
//!
//! - **policy**: configuration directives in a sealed prefix trie over
//!   dot-separated qualifiers
//! - **resolver**: memoized classification into the `InitKind` lattice,
//!   with host initialization of build-time classes as it goes
//! - **proof**: early effect-freedom proof over initializer IR
//! - **simulate**: cluster-based abstract interpretation of initializers,
//!   publishing simulated static values with all-or-nothing cycle fates
//! - **propagate**: late safety propagation over the whole-program call
//!   graph, forcing surviving safe classes to build time
//! - **host**: capabilities the surrounding compiler provides
//! - **universe**: self-contained in-memory host implementation for tests
//!
//! ## Analysis Flow
//!
//! ```text
//! Policy Directives → Policy Store → Resolver → InitKind per class
//!                                       ↓             ↓
//!                                  Early Proof     Simulation
//!                                                      ↓
//!                                          Late Safety Propagation
//! ```

pub mod classfile;
pub mod config;
pub mod consts;
pub mod context;
pub mod error;
pub mod host;
pub mod ir;
pub mod policy;
pub mod proof;
pub mod propagate;
pub mod report;
pub mod resolver;
pub mod simulate;
pub mod universe;

pub use config::AnalysisConfig;
pub use context::AnalysisContext;
pub use error::{Error, Result};
pub use policy::{InitKind, PolicyDirective};
pub use propagate::{CallGraph, LateReport};
pub use resolver::KindResolver;
pub use simulate::{SimulationEngine, SimulationResult};

use std::sync::Arc;

use rayon::prelude::*;

use classfile::TypeRef;
use host::HostRuntime;
use report::DiagnosticsSnapshot;

/// One analysis run: policy, resolver cache, simulation store and
/// diagnostics behind a single facade
pub struct ClassInitAnalyzer {
    ctx: AnalysisContext,
    resolver: KindResolver,
    engine: SimulationEngine,
}

impl ClassInitAnalyzer {
    pub fn new(host: Arc<dyn HostRuntime>, config: AnalysisConfig) -> Self {
        ClassInitAnalyzer {
            ctx: AnalysisContext::new(host, config),
            resolver: KindResolver::new(),
            engine: SimulationEngine::new(),
        }
    }

    /// Apply the configuration directives, then seal the policy store for
    /// the analysis phase
    pub fn configure(&self, directives: &[PolicyDirective]) -> Result<()> {
        self.ctx.policy.apply(directives)?;
        self.ctx.policy.seal();
        Ok(())
    }

    pub fn context(&self) -> &AnalysisContext {
        &self.ctx
    }

    pub fn resolver(&self) -> &KindResolver {
        &self.resolver
    }

    /// Classify one class, memoized
    pub fn compute_kind(&self, class: TypeRef) -> Result<InitKind> {
        self.resolver.compute(&self.ctx, class)
    }

    /// Kind committed so far, without computing anything
    pub fn computed_kind(&self, class: TypeRef) -> Option<InitKind> {
        self.resolver.computed(class)
    }

    /// Attempt to simulate one run-time class
    pub fn simulate(&self, class: TypeRef) -> Result<bool> {
        self.engine.simulate(&self.ctx, &self.resolver, class)
    }

    pub fn simulation_result(&self, class: TypeRef) -> SimulationResult {
        self.engine.result(class)
    }

    /// Classify every class, then try to simulate everything that stayed
    /// run-time. Both passes run on the rayon pool.
    pub fn analyze_all(&self, classes: &[TypeRef]) -> Result<()> {
        log::debug!("ANALYZE: classifying {} classes", classes.len());
        classes
            .par_iter()
            .try_for_each(|&class| self.compute_kind(class).map(|_| ()))?;
        log::debug!("ANALYZE: simulating run-time classes");
        classes.par_iter().try_for_each(|&class| {
            if self.resolver.computed(class) == Some(InitKind::RunTime) {
                self.simulate(class)?;
            }
            Ok(())
        })
    }

    /// Late phase: propagate safety over the whole-program call graph and
    /// force the surviving safe run-time classes to build time
    pub fn propagate_late_safety(&self, graph: &CallGraph) -> Result<LateReport> {
        propagate::propagate_late_safety(&self.ctx, &self.resolver, graph)
    }

    /// Diagnostics for everything analyzed so far
    pub fn diagnostics(&self) -> DiagnosticsSnapshot {
        self.ctx.diag.snapshot(self.ctx.host.as_ref())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{BinaryOp, IrBuilder};
    use crate::universe::ClassUniverse;

    #[test]
    fn test_constant_initializer_lands_at_build_time() {
        let mut universe = ClassUniverse::new();
        let point = universe.define_class("geom.Point");
        let x = universe.add_static_field(point, "X", "I", None).unwrap();
        let mut b = IrBuilder::new(point);
        let lhs = b.const_int(3);
        let rhs = b.const_int(4);
        let sum = b.binary(BinaryOp::Add, lhs, rhs);
        b.put_static(x, sum);
        b.ret();
        universe.set_initializer(point, b.finish().unwrap());
        let universe = Arc::new(universe);

        let analyzer = ClassInitAnalyzer::new(universe.clone(), AnalysisConfig::new());
        analyzer.configure(&[]).unwrap();
        assert_eq!(analyzer.compute_kind(point).unwrap(), InitKind::BuildTime);
        assert_eq!(universe.init_count(point), 1);
    }
}
