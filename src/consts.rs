// Global safety caps to prevent pathological or runaway analysis

// Resolver: iterative interface-closure walks
pub const RESOLVE_MAX_HIERARCHY_STEPS: usize = 10_000;
// Resolver: recursion depth through superclass and interface chains
pub const RESOLVE_MAX_DEPTH: usize = 1_000;

// Policy store: reasons kept per trie node before collapsing the rest
pub const POLICY_MAX_REASONS: usize = 3;
// Policy store: longest accepted qualified name, in dot-separated segments
pub const POLICY_MAX_SEGMENTS: usize = 64;

// Early proof: inline depth for statically bindable calls during the scan
pub const PROOF_MAX_INLINE_DEPTH: usize = 200;
// Early proof: total instructions visited across all inlined bodies
pub const PROOF_MAX_SCAN_STEPS: usize = 50_000;

// Simulation: default budget ceilings (overridable through AnalysisConfig)
pub const SIM_MAX_ALLOCATED_BYTES: usize = 40_000;
pub const SIM_MAX_LOOP_ITERATIONS: usize = 2_000;
pub const SIM_MAX_INLINE_DEPTH: usize = 200;
// Simulation: reasons kept per class before diagnostic collection stops
pub const SIM_MAX_REASONS: usize = 8;

// Late propagation: fixpoint rounds before the pass gives up (guards
// against a malformed call graph; a monotone system converges well below this)
pub const PROPAGATE_MAX_ROUNDS: usize = 1_000_000;

// Heap modelling: conservative 64-bit layout estimates used when charging
// allocations against the simulation byte budget
pub const OBJECT_HEADER_BYTES: usize = 16;
pub const ARRAY_HEADER_BYTES: usize = 16;
pub const REFERENCE_BYTES: usize = 8;
