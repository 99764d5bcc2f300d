//! Tunable knobs for one analysis run

use crate::consts;

#[derive(Debug, Clone)]
pub struct AnalysisConfig {
    /// Byte ceiling for objects a single initializer simulation may allocate
    pub max_allocated_bytes: usize,
    /// Ceiling on loop iterations (block re-entries) while unrolling one
    /// initializer; crossing it abandons the simulation
    pub max_loop_iterations: usize,
    /// Inline depth for statically bindable calls during simulation
    pub max_inline_depth: usize,
    /// Inline depth for the early proof scan
    pub max_proof_inline_depth: usize,
    /// Keep interpreting past failure points to collect every reason a class
    /// cannot be simulated, instead of stopping at the first one
    pub collect_all_reasons: bool,
    /// Treat unconfigured synthetic classes whose interfaces are all build
    /// time as initialization-transparent proxies of those interfaces
    pub trust_interfaces_for_synthetic: bool,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            max_allocated_bytes: consts::SIM_MAX_ALLOCATED_BYTES,
            max_loop_iterations: consts::SIM_MAX_LOOP_ITERATIONS,
            max_inline_depth: consts::SIM_MAX_INLINE_DEPTH,
            max_proof_inline_depth: consts::PROOF_MAX_INLINE_DEPTH,
            collect_all_reasons: false,
            trust_interfaces_for_synthetic: true,
        }
    }
}

impl AnalysisConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Variant used by diagnostics runs that want exhaustive reason lists
    pub fn with_all_reasons(mut self) -> Self {
        self.collect_all_reasons = true;
        self
    }
}
