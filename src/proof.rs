//! Early proof that an initializer has no externally observable effects
//!
//! A depth-guarded scan over the initializer body and everything inlinable
//! from it, run before whole-program information exists. The scan carries no
//! values: it admits only constructs whose effects stay confined to the
//! class being proved, whatever the operands turn out to be. Operations
//! that merely might throw (division, a null unbox) are admitted because a
//! successful proof leads to real initialization on the host, which
//! surfaces those failures; an explicit throw terminator is rejected, so a
//! conditionally-throwing initializer falls through to simulation.

use rustc_hash::FxHashSet;
use thiserror::Error;

use crate::classfile::{FieldRef, MethodRef, TypeRef};
use crate::consts::PROOF_MAX_SCAN_STEPS;
use crate::context::AnalysisContext;
use crate::ir::{InitializerIr, Instr, InvokeKind, Terminator};
use crate::policy::InitKind;
use crate::resolver::KindResolver;

/// Why an early proof was abandoned
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProofAbort {
    #[error("call to {method} cannot be inlined ({why})")]
    NonInlinableCall { method: String, why: &'static str },
    #[error("recursive call to {method}")]
    RecursiveCall { method: String },
    #[error("inline depth limit reached at {method}")]
    DepthExceeded { method: String },
    #[error("scan step limit reached")]
    ScanBudgetExceeded,
    #[error("accesses static field {field} of another class")]
    ForeignStaticAccess { field: String },
    #[error("writes to a heap object")]
    HeapWrite,
    #[error("synchronizes on a heap object")]
    Synchronization,
    #[error("reads or writes thread-local state")]
    ThreadLocalAccess,
    #[error("raw unsafe memory access")]
    UnsafeAccess,
    #[error("throws an exception")]
    ExplicitThrow,
    #[error("triggers initialization of {class}")]
    TriggersOtherInit { class: String },
}

pub type ProofResult = std::result::Result<(), ProofAbort>;

/// Prove that running `class`'s initializer at build time is unobservable.
///
/// Irreversible by design: a success immediately grants build-time
/// initialization and no later phase revisits it.
pub fn prove_effect_free(
    ctx: &AnalysisContext,
    resolver: &KindResolver,
    class: TypeRef,
    body: &InitializerIr,
) -> ProofResult {
    let mut scan = ProofScan {
        ctx,
        resolver,
        subject: class,
        stack: Vec::new(),
        visited_guard: FxHashSet::default(),
        steps: 0,
    };
    let result = scan.scan_body(body, 0);
    match &result {
        Ok(()) => log::debug!("PROOF: {} is effect-free", ctx.class_name(class)),
        Err(abort) => log::debug!("PROOF: {} rejected: {}", ctx.class_name(class), abort),
    }
    result
}

struct ProofScan<'a> {
    ctx: &'a AnalysisContext,
    resolver: &'a KindResolver,
    subject: TypeRef,
    /// Inline stack, for recursion rejection
    stack: Vec<MethodRef>,
    /// Bodies fully scanned once already on this walk
    visited_guard: FxHashSet<MethodRef>,
    steps: usize,
}

impl ProofScan<'_> {
    fn scan_body(&mut self, body: &InitializerIr, depth: usize) -> ProofResult {
        // Each block is visited exactly once; the scan never unrolls loops
        // because admissibility does not depend on iteration counts
        for block in &body.blocks {
            for instr in &block.instrs {
                self.scan_instr(instr, depth)?;
            }
            if matches!(block.terminator, Terminator::Throw(_)) {
                return Err(ProofAbort::ExplicitThrow);
            }
        }
        Ok(())
    }

    fn scan_instr(&mut self, instr: &Instr, depth: usize) -> ProofResult {
        self.steps += 1;
        if self.steps > PROOF_MAX_SCAN_STEPS {
            return Err(ProofAbort::ScanBudgetExceeded);
        }
        match instr {
            // Effects confined to freshly allocated memory or to values
            Instr::Const { .. }
            | Instr::Unary { .. }
            | Instr::Binary { .. }
            | Instr::New { .. }
            | Instr::NewArray { .. }
            | Instr::ArrayLength { .. }
            | Instr::ArrayLoad { .. }
            | Instr::ArrayClone { .. }
            | Instr::GetField { .. }
            | Instr::Box { .. }
            | Instr::Unbox { .. }
            | Instr::IsInitialized { .. } => Ok(()),

            Instr::GetStatic { field, .. } | Instr::PutStatic { field, .. } => {
                self.check_static_owner(*field)
            }

            // The scan tracks no heap, so any store or monitor operation
            // could reach pre-existing objects
            Instr::ArrayStore { .. } | Instr::ArrayCopy { .. } | Instr::PutField { .. } => {
                Err(ProofAbort::HeapWrite)
            }
            Instr::MonitorEnter { .. } | Instr::MonitorExit { .. } => {
                Err(ProofAbort::Synchronization)
            }

            Instr::ThreadLocalAccess { .. } => Err(ProofAbort::ThreadLocalAccess),
            Instr::UnsafeAccess { .. } => Err(ProofAbort::UnsafeAccess),

            Instr::EnsureInitialized { class } => {
                if *class == self.subject
                    || self.resolver.computed(*class) == Some(InitKind::BuildTime)
                {
                    Ok(())
                } else {
                    Err(ProofAbort::TriggersOtherInit {
                        class: self.ctx.class_name(*class).to_string(),
                    })
                }
            }

            Instr::Invoke { kind, method, .. } => self.scan_call(*kind, *method, depth),
        }
    }

    fn scan_call(&mut self, kind: InvokeKind, method: MethodRef, depth: usize) -> ProofResult {
        let meta = self.ctx.host.method_meta(method);
        let display = || format!("{}.{}", self.ctx.class_name(meta.owner), meta.name);
        let bindable =
            matches!(kind, InvokeKind::Static | InvokeKind::Special) || meta.statically_bindable;
        if !bindable {
            return Err(ProofAbort::NonInlinableCall {
                method: display(),
                why: "dynamic dispatch",
            });
        }
        if meta.is_native {
            return Err(ProofAbort::NonInlinableCall { method: display(), why: "native" });
        }
        let body = match self.ctx.host.method_body(method) {
            Some(body) => body,
            None => {
                return Err(ProofAbort::NonInlinableCall {
                    method: display(),
                    why: "no body available",
                })
            }
        };
        if self.stack.contains(&method) {
            return Err(ProofAbort::RecursiveCall { method: display() });
        }
        if depth + 1 > self.ctx.config.max_proof_inline_depth {
            return Err(ProofAbort::DepthExceeded { method: display() });
        }
        if self.visited_guard.contains(&method) {
            // Already scanned clean on this walk
            return Ok(());
        }
        self.stack.push(method);
        let result = self.scan_body(&body, depth + 1);
        self.stack.pop();
        if result.is_ok() {
            self.visited_guard.insert(method);
        }
        result
    }

    fn check_static_owner(&self, field: FieldRef) -> ProofResult {
        let meta = self.ctx.host.field_meta(field);
        if meta.owner == self.subject {
            Ok(())
        } else {
            Err(ProofAbort::ForeignStaticAccess {
                field: format!("{}.{}", self.ctx.class_name(meta.owner), meta.name),
            })
        }
    }
}
