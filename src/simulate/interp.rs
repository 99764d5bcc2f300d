//! Abstract interpreter for initializer bodies.
//!
//! Executes one cluster member's initializer over the cluster heap with
//! concrete values. Anything the simulation cannot know exactly aborts the
//! member through [`SimAbort`]; aborts are recorded as reasons and are never
//! fatal to the analysis itself. Arithmetic follows bytecode semantics:
//! integer ops wrap, shift counts are masked, float conversions saturate.

use std::cmp::Ordering;
use std::sync::Arc;

use thiserror::Error as ThisError;

use crate::classfile::{FieldRef, JavaKind, MethodRef, TypeRef};
use crate::consts::{ARRAY_HEADER_BYTES, OBJECT_HEADER_BYTES, RESOLVE_MAX_DEPTH};
use crate::context::AnalysisContext;
use crate::error::{Error, Result};
use crate::ir::{BinaryOp, BlockId, CmpOp, InitializerIr, Instr, InvokeKind, Reg, Terminator, UnaryOp};
use crate::policy::InitKind;
use crate::resolver::KindResolver;

use super::cluster::{Cluster, MemberId};
use super::heap::HeapObject;
use super::value::SimValue;
use super::{SimulationEngine, SimulationResult};

/// Why a member cannot be simulated. The display string is what lands in
/// the diagnostic report.
#[derive(ThisError, Debug)]
pub enum SimAbort {
    #[error("control flow depends on a value the simulation does not know")]
    NonFoldableBranch,
    #[error("loop unrolling exceeded {limit} iterations")]
    LoopCeiling { limit: usize },
    #[error("allocation budget exceeded ({requested} more bytes over a limit of {limit})")]
    AllocationBudget { requested: usize, limit: usize },
    #[error("inlining depth limit reached at {method}")]
    InlineDepth { method: String },
    #[error("stores to static field {field} of another class")]
    ForeignStaticStore { field: String },
    #[error("value of {field} is only available on the host")]
    ValueOnHost { field: String },
    #[error("accesses memory the simulation does not track")]
    UntrackedAccess,
    #[error("writes to an object owned by another initializer")]
    FrozenWrite,
    #[error("synchronizes on an object the simulation does not own")]
    ForeignMonitor,
    #[error("virtual dispatch of {method} cannot be bound at build time")]
    UnresolvedDispatch { method: String },
    #[error("calls native method {method}")]
    NativeCall { method: String },
    #[error("no body is available for {method}")]
    MissingBody { method: String },
    #[error("depends on {class} which cannot be simulated")]
    DependencyFailed { class: String },
    #[error("initialization state of {class} is not known at build time")]
    UnknownInitializedState { class: String },
    #[error("initializer would throw {exception}")]
    InitializerThrows { exception: &'static str },
    #[error("reads or writes thread-local state")]
    ThreadLocal,
    #[error("raw memory access outside the tracked heap")]
    UnsafeMemory,
    #[error("malformed initializer graph: {detail}")]
    GraphFault { detail: &'static str },
    #[error("published snapshot is missing a referenced object")]
    BadSnapshot,
}

/// Non-local exits of one evaluation step. `Abort` feeds the reason
/// machinery, `Halted` unwinds after a nested body already recorded its
/// abort, `Fatal` is a real analysis error.
enum EvalStop {
    Abort(SimAbort),
    Halted,
    Fatal(Error),
}

impl From<SimAbort> for EvalStop {
    fn from(abort: SimAbort) -> Self {
        EvalStop::Abort(abort)
    }
}

impl From<Error> for EvalStop {
    fn from(error: Error) -> Self {
        EvalStop::Fatal(error)
    }
}

/// Register file of one body activation
struct Frame {
    regs: Vec<Option<SimValue>>,
}

impl Frame {
    fn new(reg_count: u16, args: Vec<SimValue>) -> Self {
        let mut regs = vec![None; reg_count as usize];
        for (index, arg) in args.into_iter().enumerate() {
            if index < regs.len() {
                regs[index] = Some(arg);
            }
        }
        Frame { regs }
    }

    fn get(&self, reg: Reg) -> std::result::Result<&SimValue, SimAbort> {
        self.regs
            .get(reg.index())
            .and_then(|slot| slot.as_ref())
            .ok_or(SimAbort::GraphFault {
                detail: "register read before assignment",
            })
    }

    fn set(&mut self, reg: Reg, value: SimValue) -> std::result::Result<(), SimAbort> {
        match self.regs.get_mut(reg.index()) {
            Some(slot) => {
                *slot = Some(value);
                Ok(())
            }
            None => Err(SimAbort::GraphFault {
                detail: "register index out of range",
            }),
        }
    }

    /// Diagnostic reset: every register becomes unknown
    fn poison(&mut self) {
        for slot in &mut self.regs {
            *slot = Some(SimValue::Unknown);
        }
    }
}

enum InstrFlow {
    Continue,
    Abort,
}

enum TermJump {
    Next(BlockId),
    Finished(Option<SimValue>),
}

enum TermFlow {
    Jump(BlockId),
    Return(Option<SimValue>),
    Abort,
}

enum BodyFlow {
    Return(Option<SimValue>),
    Abort,
}

/// How a class another initializer touches is available to this member
enum ClassDep {
    /// Published globally; values come from its snapshot
    Satisfied,
    /// Part of the current cluster; values come from its live shadow
    Member(MemberId),
}

pub(crate) struct Interp<'a> {
    ctx: &'a AnalysisContext,
    resolver: &'a KindResolver,
    engine: &'a SimulationEngine,
    member: MemberId,
    subject: TypeRef,
    /// Nesting depth of the owning simulate call, for dependency recursion
    nest: usize,
    allocated_bytes: usize,
    loop_iterations: usize,
    collect_all: bool,
}

impl<'a> Interp<'a> {
    pub(crate) fn new(
        engine: &'a SimulationEngine,
        ctx: &'a AnalysisContext,
        resolver: &'a KindResolver,
        member: MemberId,
        subject: TypeRef,
        nest: usize,
    ) -> Self {
        Interp {
            ctx,
            resolver,
            engine,
            member,
            subject,
            nest,
            allocated_bytes: 0,
            loop_iterations: 0,
            collect_all: ctx.config.collect_all_reasons,
        }
    }

    /// Interpret the member's initializer. Aborts end up as reasons on the
    /// member; only analysis-level failures propagate as errors.
    pub(crate) fn run(&mut self, cluster: &mut Cluster, body: &InitializerIr) -> Result<()> {
        self.run_body(cluster, body, Vec::new(), 0)?;
        Ok(())
    }

    fn run_body(
        &mut self,
        cluster: &mut Cluster,
        body: &InitializerIr,
        args: Vec<SimValue>,
        depth: usize,
    ) -> std::result::Result<BodyFlow, Error> {
        if args.len() != body.param_count as usize {
            self.record(
                cluster,
                SimAbort::GraphFault {
                    detail: "argument count does not match the callee",
                },
            );
            return Ok(BodyFlow::Abort);
        }
        let mut frame = Frame::new(body.reg_count, args);
        let mut visited = rustc_hash::FxHashSet::default();
        let mut current = body.entry();
        loop {
            if !visited.insert(current) {
                self.loop_iterations += 1;
                if self.loop_iterations > self.ctx.config.max_loop_iterations {
                    self.note_abort(
                        cluster,
                        &mut frame,
                        SimAbort::LoopCeiling {
                            limit: self.ctx.config.max_loop_iterations,
                        },
                    );
                    return Ok(BodyFlow::Abort);
                }
            }
            let block = match body.block(current) {
                Some(block) => block,
                None => {
                    self.record(
                        cluster,
                        SimAbort::GraphFault {
                            detail: "jump to a block that does not exist",
                        },
                    );
                    return Ok(BodyFlow::Abort);
                }
            };
            for instr in &block.instrs {
                match self.exec_instr(cluster, &mut frame, instr, depth)? {
                    InstrFlow::Continue => {}
                    InstrFlow::Abort => return Ok(BodyFlow::Abort),
                }
            }
            match self.exec_terminator(cluster, &mut frame, &block.terminator)? {
                TermFlow::Jump(next) => current = next,
                TermFlow::Return(value) => return Ok(BodyFlow::Return(value)),
                TermFlow::Abort => return Ok(BodyFlow::Abort),
            }
        }
    }

    fn exec_instr(
        &mut self,
        cluster: &mut Cluster,
        frame: &mut Frame,
        instr: &Instr,
        depth: usize,
    ) -> std::result::Result<InstrFlow, Error> {
        match self.eval_instr(cluster, frame, instr, depth) {
            Ok(()) => Ok(InstrFlow::Continue),
            Err(EvalStop::Fatal(error)) => Err(error),
            Err(EvalStop::Halted) => Ok(InstrFlow::Abort),
            Err(EvalStop::Abort(abort)) => {
                if self.note_abort(cluster, frame, abort) {
                    Ok(InstrFlow::Continue)
                } else {
                    Ok(InstrFlow::Abort)
                }
            }
        }
    }

    fn exec_terminator(
        &mut self,
        cluster: &mut Cluster,
        frame: &mut Frame,
        terminator: &Terminator,
    ) -> std::result::Result<TermFlow, Error> {
        match self.eval_terminator(frame, terminator) {
            Ok(TermJump::Next(block)) => Ok(TermFlow::Jump(block)),
            Ok(TermJump::Finished(value)) => Ok(TermFlow::Return(value)),
            Err(EvalStop::Fatal(error)) => Err(error),
            Err(EvalStop::Halted) => Ok(TermFlow::Abort),
            Err(EvalStop::Abort(abort)) => {
                // A non-foldable branch is the only abort the diagnostic mode
                // can step over: it follows the then edge with poisoned state.
                let resume = match terminator {
                    Terminator::Branch { on_true, .. } => Some(*on_true),
                    _ => None,
                };
                if self.note_abort(cluster, frame, abort) {
                    if let Some(block) = resume {
                        return Ok(TermFlow::Jump(block));
                    }
                }
                Ok(TermFlow::Abort)
            }
        }
    }

    fn eval_terminator(
        &mut self,
        frame: &mut Frame,
        terminator: &Terminator,
    ) -> std::result::Result<TermJump, EvalStop> {
        match terminator {
            Terminator::Return => Ok(TermJump::Finished(None)),
            Terminator::ReturnValue(reg) => Ok(TermJump::Finished(Some(frame.get(*reg)?.clone()))),
            Terminator::Goto(target) => Ok(TermJump::Next(*target)),
            Terminator::Branch { op, lhs, rhs, on_true, on_false } => {
                let lhs = frame.get(*lhs)?.clone();
                let rhs = frame.get(*rhs)?.clone();
                let taken = fold_compare(*op, &lhs, &rhs)?;
                Ok(TermJump::Next(if taken { *on_true } else { *on_false }))
            }
            Terminator::Throw(_) => Err(SimAbort::InitializerThrows {
                exception: "an explicitly constructed exception",
            }
            .into()),
        }
    }

    fn eval_instr(
        &mut self,
        cluster: &mut Cluster,
        frame: &mut Frame,
        instr: &Instr,
        depth: usize,
    ) -> std::result::Result<(), EvalStop> {
        match instr {
            Instr::Const { dst, value } => {
                frame.set(*dst, SimValue::from_constant(value))?;
            }
            Instr::Unary { dst, op, src } => {
                let value = frame.get(*src)?.clone();
                let folded = match op {
                    UnaryOp::Neg => fold_neg(&value)?,
                    UnaryOp::Convert(to) => fold_convert(*to, &value)?,
                };
                frame.set(*dst, folded)?;
            }
            Instr::Binary { dst, op, lhs, rhs } => {
                let lhs = frame.get(*lhs)?.clone();
                let rhs = frame.get(*rhs)?.clone();
                frame.set(*dst, fold_binary(*op, &lhs, &rhs)?)?;
            }
            Instr::New { dst, class } => {
                if *class != self.subject {
                    self.require_class(cluster, *class)?;
                }
                let bytes = self.instance_size(*class)?;
                self.charge(bytes)?;
                let id = cluster.heap.alloc_instance(*class);
                frame.set(*dst, SimValue::Ref(id))?;
            }
            Instr::NewArray { dst, element, length } => {
                let length = frame.get(*length)?.clone();
                if length.is_unknown() {
                    frame.set(*dst, SimValue::Unknown)?;
                    return Ok(());
                }
                let length = length.as_int().ok_or(SimAbort::GraphFault {
                    detail: "array length is not an int",
                })?;
                if length < 0 {
                    return Err(SimAbort::InitializerThrows {
                        exception: "NegativeArraySizeException",
                    }
                    .into());
                }
                let bytes = ARRAY_HEADER_BYTES + (length as usize) * element.storage_bytes();
                self.charge(bytes)?;
                let id = cluster.heap.alloc_array(*element, length as usize);
                frame.set(*dst, SimValue::Ref(id))?;
            }
            Instr::ArrayLength { dst, array } => {
                let array = frame.get(*array)?.clone();
                let id = self.array_id(&array)?;
                let length = match self.object(cluster, id)? {
                    HeapObject::Array { values, .. } => values.len() as i32,
                    _ => {
                        return Err(SimAbort::GraphFault {
                            detail: "array length of a non-array object",
                        }
                        .into())
                    }
                };
                frame.set(*dst, SimValue::Int(length))?;
            }
            Instr::ArrayLoad { dst, array, index } => {
                let array = frame.get(*array)?.clone();
                let index = self.array_index(frame, *index)?;
                let id = self.array_id(&array)?;
                let value = match self.object(cluster, id)? {
                    HeapObject::Array { values, .. } => values
                        .get(index)
                        .cloned()
                        .ok_or(SimAbort::InitializerThrows {
                            exception: "ArrayIndexOutOfBoundsException",
                        })?,
                    _ => {
                        return Err(SimAbort::GraphFault {
                            detail: "array load from a non-array object",
                        }
                        .into())
                    }
                };
                frame.set(*dst, value)?;
            }
            Instr::ArrayStore { array, index, value } => {
                let array = frame.get(*array)?.clone();
                let index = self.array_index(frame, *index)?;
                let value = frame.get(*value)?.clone();
                let id = self.array_id(&array)?;
                let cell = cluster.heap.get_mut(id).ok_or(SimAbort::GraphFault {
                    detail: "dangling heap reference",
                })?;
                if cell.foreign {
                    return Err(SimAbort::FrozenWrite.into());
                }
                match &mut cell.object {
                    HeapObject::Array { element, values } => {
                        let coerced = store_coerce(*element, value)?;
                        match values.get_mut(index) {
                            Some(slot) => *slot = coerced,
                            None => {
                                return Err(SimAbort::InitializerThrows {
                                    exception: "ArrayIndexOutOfBoundsException",
                                }
                                .into())
                            }
                        }
                    }
                    _ => {
                        return Err(SimAbort::GraphFault {
                            detail: "array store into a non-array object",
                        }
                        .into())
                    }
                }
            }
            Instr::ArrayCopy { src, src_pos, dst, dst_pos, length } => {
                self.eval_array_copy(cluster, frame, *src, *src_pos, *dst, *dst_pos, *length)?;
            }
            Instr::ArrayClone { dst, array } => {
                let array = frame.get(*array)?.clone();
                let id = self.array_id(&array)?;
                let (element, values) = match self.object(cluster, id)? {
                    HeapObject::Array { element, values } => (*element, values.clone()),
                    _ => {
                        return Err(SimAbort::GraphFault {
                            detail: "clone of a non-array object",
                        }
                        .into())
                    }
                };
                let bytes = ARRAY_HEADER_BYTES + values.len() * element.storage_bytes();
                self.charge(bytes)?;
                let copy = cluster.heap.alloc_array(element, values.len());
                if let Some(cell) = cluster.heap.get_mut(copy) {
                    if let HeapObject::Array { values: slots, .. } = &mut cell.object {
                        *slots = values;
                    }
                }
                frame.set(*dst, SimValue::Ref(copy))?;
            }
            Instr::GetStatic { dst, field } => {
                let meta = self.ctx.host.field_meta(*field);
                if !meta.is_static {
                    return Err(SimAbort::GraphFault {
                        detail: "static read of an instance field",
                    }
                    .into());
                }
                let value = if meta.owner == self.subject {
                    self.own_static(cluster, *field)?
                } else {
                    self.foreign_static(cluster, meta.owner, *field)?
                };
                frame.set(*dst, value)?;
            }
            Instr::PutStatic { field, value } => {
                let meta = self.ctx.host.field_meta(*field);
                if !meta.is_static {
                    return Err(SimAbort::GraphFault {
                        detail: "static write of an instance field",
                    }
                    .into());
                }
                if meta.owner != self.subject {
                    return Err(SimAbort::ForeignStaticStore {
                        field: self.field_desc(*field),
                    }
                    .into());
                }
                let value = frame.get(*value)?.clone();
                let value = store_coerce(meta.kind, value)?;
                cluster
                    .member_mut(self.member)
                    .static_values
                    .insert(*field, value);
            }
            Instr::GetField { dst, object, field } => {
                let meta = self.ctx.host.field_meta(*field);
                if meta.is_static {
                    return Err(SimAbort::GraphFault {
                        detail: "instance read of a static field",
                    }
                    .into());
                }
                let object = frame.get(*object)?.clone();
                let id = self.instance_id(&object)?;
                let value = match self.object(cluster, id)? {
                    HeapObject::Instance { fields, .. } => fields
                        .get(field)
                        .cloned()
                        .unwrap_or_else(|| SimValue::default_for(meta.kind)),
                    _ => {
                        return Err(SimAbort::GraphFault {
                            detail: "field read from a non-instance object",
                        }
                        .into())
                    }
                };
                frame.set(*dst, value)?;
            }
            Instr::PutField { object, field, value } => {
                let meta = self.ctx.host.field_meta(*field);
                if meta.is_static {
                    return Err(SimAbort::GraphFault {
                        detail: "instance write of a static field",
                    }
                    .into());
                }
                let object = frame.get(*object)?.clone();
                let value = frame.get(*value)?.clone();
                let id = self.instance_id(&object)?;
                let cell = cluster.heap.get_mut(id).ok_or(SimAbort::GraphFault {
                    detail: "dangling heap reference",
                })?;
                if cell.foreign {
                    return Err(SimAbort::FrozenWrite.into());
                }
                match &mut cell.object {
                    HeapObject::Instance { fields, .. } => {
                        fields.insert(*field, store_coerce(meta.kind, value)?);
                    }
                    _ => {
                        return Err(SimAbort::GraphFault {
                            detail: "field write into a non-instance object",
                        }
                        .into())
                    }
                }
            }
            Instr::MonitorEnter { object } | Instr::MonitorExit { object } => {
                match frame.get(*object)?.clone() {
                    SimValue::Ref(id) => {
                        let cell = cluster.heap.get(id).ok_or(SimAbort::GraphFault {
                            detail: "dangling heap reference",
                        })?;
                        // Locking an object this cluster created folds away;
                        // anything shared with other initializers does not.
                        if cell.foreign {
                            return Err(SimAbort::ForeignMonitor.into());
                        }
                    }
                    SimValue::Null => {
                        return Err(SimAbort::InitializerThrows {
                            exception: "NullPointerException",
                        }
                        .into())
                    }
                    SimValue::Unknown => return Err(SimAbort::ForeignMonitor.into()),
                    _ => {
                        return Err(SimAbort::GraphFault {
                            detail: "monitor on a non-reference value",
                        }
                        .into())
                    }
                }
            }
            Instr::Box { dst, kind, value } => {
                if !kind.is_primitive() {
                    return Err(SimAbort::GraphFault {
                        detail: "boxing a reference kind",
                    }
                    .into());
                }
                let value = frame.get(*value)?.clone();
                if value.is_unknown() {
                    frame.set(*dst, SimValue::Unknown)?;
                    return Ok(());
                }
                let coerced = store_coerce(*kind, value)?;
                self.charge(OBJECT_HEADER_BYTES + kind.storage_bytes())?;
                let id = cluster.heap.alloc_boxed(*kind, coerced);
                frame.set(*dst, SimValue::Ref(id))?;
            }
            Instr::Unbox { dst, kind, object } => {
                let object = frame.get(*object)?.clone();
                let value = match object {
                    SimValue::Unknown => SimValue::Unknown,
                    SimValue::Null => {
                        return Err(SimAbort::InitializerThrows {
                            exception: "NullPointerException",
                        }
                        .into())
                    }
                    SimValue::Ref(id) => match self.object(cluster, id)? {
                        HeapObject::Boxed { kind: boxed, value } if boxed == kind => value.clone(),
                        _ => {
                            return Err(SimAbort::InitializerThrows {
                                exception: "ClassCastException",
                            }
                            .into())
                        }
                    },
                    _ => {
                        return Err(SimAbort::GraphFault {
                            detail: "unboxing a non-reference value",
                        }
                        .into())
                    }
                };
                frame.set(*dst, value)?;
            }
            Instr::Invoke { dst, kind, method, args } => {
                self.eval_invoke(cluster, frame, *dst, *kind, *method, args, depth)?;
            }
            Instr::EnsureInitialized { class } => {
                if *class != self.subject {
                    self.require_class(cluster, *class)?;
                }
            }
            Instr::IsInitialized { dst, class } => {
                let value = self.fold_is_initialized(cluster, *class)?;
                frame.set(*dst, value)?;
            }
            Instr::ThreadLocalAccess { .. } => return Err(SimAbort::ThreadLocal.into()),
            Instr::UnsafeAccess { .. } => return Err(SimAbort::UnsafeMemory.into()),
        }
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    fn eval_array_copy(
        &mut self,
        cluster: &mut Cluster,
        frame: &Frame,
        src: Reg,
        src_pos: Reg,
        dst: Reg,
        dst_pos: Reg,
        length: Reg,
    ) -> std::result::Result<(), EvalStop> {
        let src = frame.get(src)?.clone();
        let dst = frame.get(dst)?.clone();
        let src_pos = self.array_index(frame, src_pos)?;
        let dst_pos = self.array_index(frame, dst_pos)?;
        let length = self.array_index(frame, length)?;
        let src_id = self.array_id(&src)?;
        let dst_id = self.array_id(&dst)?;

        let (src_element, window) = match self.object(cluster, src_id)? {
            HeapObject::Array { element, values } => {
                let end = src_pos.checked_add(length).ok_or(SimAbort::InitializerThrows {
                    exception: "IndexOutOfBoundsException",
                })?;
                if end > values.len() {
                    return Err(SimAbort::InitializerThrows {
                        exception: "IndexOutOfBoundsException",
                    }
                    .into());
                }
                (*element, values[src_pos..end].to_vec())
            }
            _ => {
                return Err(SimAbort::GraphFault {
                    detail: "array copy from a non-array object",
                }
                .into())
            }
        };

        let cell = cluster.heap.get_mut(dst_id).ok_or(SimAbort::GraphFault {
            detail: "dangling heap reference",
        })?;
        if cell.foreign {
            return Err(SimAbort::FrozenWrite.into());
        }
        match &mut cell.object {
            HeapObject::Array { element, values } => {
                if *element != src_element {
                    return Err(SimAbort::InitializerThrows {
                        exception: "ArrayStoreException",
                    }
                    .into());
                }
                let end = dst_pos.checked_add(length).ok_or(SimAbort::InitializerThrows {
                    exception: "IndexOutOfBoundsException",
                })?;
                if end > values.len() {
                    return Err(SimAbort::InitializerThrows {
                        exception: "IndexOutOfBoundsException",
                    }
                    .into());
                }
                values[dst_pos..end].clone_from_slice(&window);
            }
            _ => {
                return Err(SimAbort::GraphFault {
                    detail: "array copy into a non-array object",
                }
                .into())
            }
        }
        Ok(())
    }

    fn eval_invoke(
        &mut self,
        cluster: &mut Cluster,
        frame: &mut Frame,
        dst: Option<Reg>,
        kind: InvokeKind,
        method: MethodRef,
        args: &[Reg],
        depth: usize,
    ) -> std::result::Result<(), EvalStop> {
        let meta = self.ctx.host.method_meta(method);
        let bindable =
            matches!(kind, InvokeKind::Static | InvokeKind::Special) || meta.statically_bindable;
        if !bindable {
            return Err(SimAbort::UnresolvedDispatch {
                method: self.method_desc(method),
            }
            .into());
        }
        if meta.is_native {
            return Err(SimAbort::NativeCall {
                method: self.method_desc(method),
            }
            .into());
        }
        if kind == InvokeKind::Static && meta.owner != self.subject {
            self.require_class(cluster, meta.owner)?;
        }
        let body = self.ctx.host.method_body(method).ok_or_else(|| SimAbort::MissingBody {
            method: self.method_desc(method),
        })?;
        if depth + 1 > self.ctx.config.max_inline_depth {
            return Err(SimAbort::InlineDepth {
                method: self.method_desc(method),
            }
            .into());
        }
        let mut call_args = Vec::with_capacity(args.len());
        for arg in args {
            call_args.push(frame.get(*arg)?.clone());
        }
        if kind.has_receiver() {
            if let Some(SimValue::Null) = call_args.first() {
                return Err(SimAbort::InitializerThrows {
                    exception: "NullPointerException",
                }
                .into());
            }
        }
        match self.run_body(cluster, &body, call_args, depth + 1)? {
            BodyFlow::Return(value) => {
                if let Some(dst) = dst {
                    let value = value.ok_or(SimAbort::GraphFault {
                        detail: "callee returned no value",
                    })?;
                    frame.set(dst, value)?;
                }
                Ok(())
            }
            BodyFlow::Abort => Err(EvalStop::Halted),
        }
    }

    /// Fold a build-time initialized-state query, or abort when the answer
    /// could change between build and run
    fn fold_is_initialized(
        &mut self,
        cluster: &mut Cluster,
        class: TypeRef,
    ) -> std::result::Result<SimValue, EvalStop> {
        if class == self.subject {
            return Ok(SimValue::Int(1));
        }
        if self.resolver.computed(class) == Some(InitKind::BuildTime) {
            return Ok(SimValue::Int(1));
        }
        match self.engine.result(class) {
            SimulationResult::Simulated(_) | SimulationResult::HostedInitialized => {
                return Ok(SimValue::Int(1))
            }
            SimulationResult::Failed | SimulationResult::NotSimulated => {}
        }
        if let Some(id) = cluster.member_of(class) {
            if !cluster.member(id).status.is_published() {
                // Optimistically part of our own cycle; the shared fate of
                // the cluster keeps the answer consistent.
                cluster.add_dependency(self.member, id);
                return Ok(SimValue::Int(1));
            }
        }
        Err(SimAbort::UnknownInitializedState {
            class: self.ctx.class_name(class).to_string(),
        }
        .into())
    }

    /// Make `class` available to this member: simulate it if needed and
    /// record the dependency edge. Failure aborts the member.
    fn require_class(
        &mut self,
        cluster: &mut Cluster,
        class: TypeRef,
    ) -> std::result::Result<ClassDep, EvalStop> {
        if class == self.subject {
            return Ok(ClassDep::Member(self.member));
        }
        let ok = self
            .engine
            .simulate_nested(self.ctx, self.resolver, cluster, class, Some(self.member), self.nest + 1)?;
        if let Some(id) = cluster.member_of(class) {
            return match cluster.member(id).status {
                super::cluster::MemberStatus::PublishedSimulated => Ok(ClassDep::Satisfied),
                super::cluster::MemberStatus::PublishedFailed => Err(SimAbort::DependencyFailed {
                    class: self.ctx.class_name(class).to_string(),
                }
                .into()),
                _ => Ok(ClassDep::Member(id)),
            };
        }
        if ok {
            Ok(ClassDep::Satisfied)
        } else {
            Err(SimAbort::DependencyFailed {
                class: self.ctx.class_name(class).to_string(),
            }
            .into())
        }
    }

    fn own_static(
        &self,
        cluster: &Cluster,
        field: FieldRef,
    ) -> std::result::Result<SimValue, EvalStop> {
        cluster
            .member(self.member)
            .static_values
            .get(&field)
            .cloned()
            .ok_or_else(|| {
                SimAbort::GraphFault {
                    detail: "read of a static field the class does not declare",
                }
                .into()
            })
    }

    fn foreign_static(
        &mut self,
        cluster: &mut Cluster,
        owner: TypeRef,
        field: FieldRef,
    ) -> std::result::Result<SimValue, EvalStop> {
        match self.require_class(cluster, owner)? {
            ClassDep::Member(id) => cluster
                .member(id)
                .static_values
                .get(&field)
                .cloned()
                .ok_or_else(|| {
                    SimAbort::GraphFault {
                        detail: "read of a static field the class does not declare",
                    }
                    .into()
                }),
            ClassDep::Satisfied => match self.engine.result(owner) {
                SimulationResult::Simulated(init) => {
                    let value = init
                        .fields
                        .iter()
                        .find(|(candidate, _)| *candidate == field)
                        .map(|(_, value)| value.clone())
                        .ok_or(SimAbort::GraphFault {
                            detail: "read of a static field the class does not declare",
                        })?;
                    match value {
                        SimValue::Ref(frozen) => {
                            let local = cluster
                                .heap
                                .import(&init.heap, frozen)
                                .ok_or(SimAbort::BadSnapshot)?;
                            Ok(SimValue::Ref(local))
                        }
                        other => Ok(other),
                    }
                }
                SimulationResult::HostedInitialized => Err(SimAbort::ValueOnHost {
                    field: self.field_desc(field),
                }
                .into()),
                SimulationResult::Failed | SimulationResult::NotSimulated => {
                    Err(SimAbort::DependencyFailed {
                        class: self.ctx.class_name(owner).to_string(),
                    }
                    .into())
                }
            },
        }
    }

    fn array_index(&self, frame: &Frame, reg: Reg) -> std::result::Result<usize, EvalStop> {
        let value = frame.get(reg)?;
        if value.is_unknown() {
            return Err(SimAbort::UntrackedAccess.into());
        }
        let index = value.as_int().ok_or(SimAbort::GraphFault {
            detail: "array index is not an int",
        })?;
        if index < 0 {
            return Err(SimAbort::InitializerThrows {
                exception: "ArrayIndexOutOfBoundsException",
            }
            .into());
        }
        Ok(index as usize)
    }

    fn array_id(&self, value: &SimValue) -> std::result::Result<super::heap::HeapId, EvalStop> {
        match value {
            SimValue::Ref(id) => Ok(*id),
            SimValue::Null => Err(SimAbort::InitializerThrows {
                exception: "NullPointerException",
            }
            .into()),
            SimValue::Unknown => Err(SimAbort::UntrackedAccess.into()),
            _ => Err(SimAbort::GraphFault {
                detail: "array access on a non-reference value",
            }
            .into()),
        }
    }

    fn instance_id(&self, value: &SimValue) -> std::result::Result<super::heap::HeapId, EvalStop> {
        match value {
            SimValue::Ref(id) => Ok(*id),
            SimValue::Null => Err(SimAbort::InitializerThrows {
                exception: "NullPointerException",
            }
            .into()),
            SimValue::Unknown => Err(SimAbort::UntrackedAccess.into()),
            _ => Err(SimAbort::GraphFault {
                detail: "field access on a non-reference value",
            }
            .into()),
        }
    }

    fn object<'c>(
        &self,
        cluster: &'c Cluster,
        id: super::heap::HeapId,
    ) -> std::result::Result<&'c HeapObject, EvalStop> {
        cluster
            .heap
            .get(id)
            .map(|cell| &cell.object)
            .ok_or_else(|| {
                SimAbort::GraphFault {
                    detail: "dangling heap reference",
                }
                .into()
            })
    }

    /// Bytes one instance of `class` occupies, headers and superclass
    /// fields included
    fn instance_size(&self, class: TypeRef) -> std::result::Result<usize, SimAbort> {
        let mut bytes = OBJECT_HEADER_BYTES;
        let mut cursor = Some(class);
        let mut hops = 0usize;
        while let Some(current) = cursor {
            hops += 1;
            if hops > RESOLVE_MAX_DEPTH {
                return Err(SimAbort::GraphFault {
                    detail: "superclass chain does not terminate",
                });
            }
            for field in self.ctx.host.instance_fields(current) {
                bytes += self.ctx.host.field_meta(field).kind.storage_bytes();
            }
            cursor = self.ctx.host.hierarchy_of(current).superclass;
        }
        Ok(bytes)
    }

    fn charge(&mut self, bytes: usize) -> std::result::Result<(), SimAbort> {
        self.allocated_bytes = self.allocated_bytes.saturating_add(bytes);
        if self.allocated_bytes > self.ctx.config.max_allocated_bytes {
            return Err(SimAbort::AllocationBudget {
                requested: bytes,
                limit: self.ctx.config.max_allocated_bytes,
            });
        }
        Ok(())
    }

    /// Record the abort as a reason and decide whether interpretation keeps
    /// going. Outside diagnostic mode the first abort always stops; in
    /// diagnostic mode the state is poisoned and execution continues, except
    /// past the loop ceiling or a full reason list.
    fn note_abort(&mut self, cluster: &mut Cluster, frame: &mut Frame, abort: SimAbort) -> bool {
        let unbounded = matches!(abort, SimAbort::LoopCeiling { .. });
        let more = self.record(cluster, abort);
        if !self.collect_all || unbounded || !more {
            return false;
        }
        frame.poison();
        for value in cluster.member_mut(self.member).static_values.values_mut() {
            *value = SimValue::Unknown;
        }
        true
    }

    fn record(&self, cluster: &mut Cluster, abort: SimAbort) -> bool {
        log::debug!(
            "SIMULATE: {} cannot be simulated: {}",
            self.ctx.class_name(self.subject),
            abort
        );
        cluster.push_reason(self.member, abort.to_string())
    }

    fn method_desc(&self, method: MethodRef) -> String {
        let meta = self.ctx.host.method_meta(method);
        format!("{}.{}", self.ctx.class_name(meta.owner), meta.name)
    }

    fn field_desc(&self, field: FieldRef) -> String {
        let meta = self.ctx.host.field_meta(field);
        format!("{}.{}", self.ctx.class_name(meta.owner), meta.name)
    }
}

fn fold_neg(value: &SimValue) -> std::result::Result<SimValue, SimAbort> {
    Ok(match value {
        SimValue::Int(v) => SimValue::Int(v.wrapping_neg()),
        SimValue::Long(v) => SimValue::Long(v.wrapping_neg()),
        SimValue::Float(v) => SimValue::Float(-v),
        SimValue::Double(v) => SimValue::Double(-v),
        SimValue::Unknown => SimValue::Unknown,
        _ => {
            return Err(SimAbort::GraphFault {
                detail: "negation of a non-numeric value",
            })
        }
    })
}

// Casts here deliberately use `as`: float to int saturates and maps NaN to
// zero, which is exactly the bytecode conversion semantics.
fn fold_convert(to: JavaKind, value: &SimValue) -> std::result::Result<SimValue, SimAbort> {
    use JavaKind as K;
    use SimValue::*;
    Ok(match (value, to) {
        (Unknown, _) => Unknown,
        (Int(v), K::Boolean) => Int(v & 1),
        (Int(v), K::Byte) => Int(*v as i8 as i32),
        (Int(v), K::Char) => Int(*v as u16 as i32),
        (Int(v), K::Short) => Int(*v as i16 as i32),
        (Int(v), K::Int) => Int(*v),
        (Int(v), K::Long) => Long(*v as i64),
        (Int(v), K::Float) => Float(*v as f32),
        (Int(v), K::Double) => Double(*v as f64),
        (Long(v), K::Int) => Int(*v as i32),
        (Long(v), K::Long) => Long(*v),
        (Long(v), K::Float) => Float(*v as f32),
        (Long(v), K::Double) => Double(*v as f64),
        (Float(v), K::Int) => Int(*v as i32),
        (Float(v), K::Long) => Long(*v as i64),
        (Float(v), K::Float) => Float(*v),
        (Float(v), K::Double) => Double(*v as f64),
        (Double(v), K::Int) => Int(*v as i32),
        (Double(v), K::Long) => Long(*v as i64),
        (Double(v), K::Float) => Float(*v as f32),
        (Double(v), K::Double) => Double(*v),
        _ => {
            return Err(SimAbort::GraphFault {
                detail: "conversion on a non-numeric value",
            })
        }
    })
}

fn fold_binary(op: BinaryOp, lhs: &SimValue, rhs: &SimValue) -> std::result::Result<SimValue, SimAbort> {
    use SimValue::*;
    if lhs.is_unknown() || rhs.is_unknown() {
        return Ok(Unknown);
    }
    match (lhs, rhs) {
        (Int(a), Int(b)) => fold_int_binary(op, *a, *b),
        (Long(a), Long(b)) => fold_long_binary(op, *a, *b),
        // Shift counts for longs arrive as ints on the operand stack.
        (Long(a), Int(b)) if matches!(op, BinaryOp::Shl | BinaryOp::Shr | BinaryOp::Ushr) => {
            fold_long_binary(op, *a, *b as i64)
        }
        (Float(a), Float(b)) => fold_f32_binary(op, *a, *b).map(Float),
        (Double(a), Double(b)) => fold_f64_binary(op, *a, *b).map(Double),
        _ => Err(SimAbort::GraphFault {
            detail: "binary op on mismatched kinds",
        }),
    }
}

fn fold_int_binary(op: BinaryOp, a: i32, b: i32) -> std::result::Result<SimValue, SimAbort> {
    let v = match op {
        BinaryOp::Add => a.wrapping_add(b),
        BinaryOp::Sub => a.wrapping_sub(b),
        BinaryOp::Mul => a.wrapping_mul(b),
        BinaryOp::Div => {
            if b == 0 {
                return Err(SimAbort::InitializerThrows {
                    exception: "ArithmeticException",
                });
            }
            a.wrapping_div(b)
        }
        BinaryOp::Rem => {
            if b == 0 {
                return Err(SimAbort::InitializerThrows {
                    exception: "ArithmeticException",
                });
            }
            a.wrapping_rem(b)
        }
        BinaryOp::And => a & b,
        BinaryOp::Or => a | b,
        BinaryOp::Xor => a ^ b,
        // wrapping shifts mask the count by the operand width, as the
        // bytecode does
        BinaryOp::Shl => a.wrapping_shl(b as u32),
        BinaryOp::Shr => a.wrapping_shr(b as u32),
        BinaryOp::Ushr => ((a as u32).wrapping_shr(b as u32)) as i32,
    };
    Ok(SimValue::Int(v))
}

fn fold_long_binary(op: BinaryOp, a: i64, b: i64) -> std::result::Result<SimValue, SimAbort> {
    let v = match op {
        BinaryOp::Add => a.wrapping_add(b),
        BinaryOp::Sub => a.wrapping_sub(b),
        BinaryOp::Mul => a.wrapping_mul(b),
        BinaryOp::Div => {
            if b == 0 {
                return Err(SimAbort::InitializerThrows {
                    exception: "ArithmeticException",
                });
            }
            a.wrapping_div(b)
        }
        BinaryOp::Rem => {
            if b == 0 {
                return Err(SimAbort::InitializerThrows {
                    exception: "ArithmeticException",
                });
            }
            a.wrapping_rem(b)
        }
        BinaryOp::And => a & b,
        BinaryOp::Or => a | b,
        BinaryOp::Xor => a ^ b,
        BinaryOp::Shl => a.wrapping_shl(b as u32),
        BinaryOp::Shr => a.wrapping_shr(b as u32),
        BinaryOp::Ushr => ((a as u64).wrapping_shr(b as u32)) as i64,
    };
    Ok(SimValue::Long(v))
}

fn fold_f32_binary(op: BinaryOp, a: f32, b: f32) -> std::result::Result<f32, SimAbort> {
    Ok(match op {
        BinaryOp::Add => a + b,
        BinaryOp::Sub => a - b,
        BinaryOp::Mul => a * b,
        BinaryOp::Div => a / b,
        BinaryOp::Rem => a % b,
        _ => {
            return Err(SimAbort::GraphFault {
                detail: "bitwise op on a floating value",
            })
        }
    })
}

fn fold_f64_binary(op: BinaryOp, a: f64, b: f64) -> std::result::Result<f64, SimAbort> {
    Ok(match op {
        BinaryOp::Add => a + b,
        BinaryOp::Sub => a - b,
        BinaryOp::Mul => a * b,
        BinaryOp::Div => a / b,
        BinaryOp::Rem => a % b,
        _ => {
            return Err(SimAbort::GraphFault {
                detail: "bitwise op on a floating value",
            })
        }
    })
}

fn store_coerce(kind: JavaKind, value: SimValue) -> std::result::Result<SimValue, SimAbort> {
    use JavaKind as K;
    use SimValue::*;
    if value.is_unknown() {
        return Ok(Unknown);
    }
    Ok(match (kind, &value) {
        (K::Boolean, Int(v)) => Int(v & 1),
        (K::Byte, Int(v)) => Int(*v as i8 as i32),
        (K::Char, Int(v)) => Int(*v as u16 as i32),
        (K::Short, Int(v)) => Int(*v as i16 as i32),
        (K::Int, Int(_)) => value,
        (K::Long, Long(_)) => value,
        (K::Float, Float(_)) => value,
        (K::Double, Double(_)) => value,
        (K::Reference, Null | Ref(_) | Str(_)) => value,
        _ => {
            return Err(SimAbort::GraphFault {
                detail: "value kind does not match the slot kind",
            })
        }
    })
}

fn fold_compare(op: CmpOp, lhs: &SimValue, rhs: &SimValue) -> std::result::Result<bool, SimAbort> {
    use SimValue::*;
    if lhs.is_unknown() || rhs.is_unknown() {
        return Err(SimAbort::NonFoldableBranch);
    }
    let reference_equality = |equal: bool| match op {
        CmpOp::Eq => Ok(equal),
        CmpOp::Ne => Ok(!equal),
        _ => Err(SimAbort::GraphFault {
            detail: "ordering compare on reference values",
        }),
    };
    let ordering = match (lhs, rhs) {
        (Int(a), Int(b)) => a.partial_cmp(b),
        (Long(a), Long(b)) => a.partial_cmp(b),
        (Float(a), Float(b)) => a.partial_cmp(b),
        (Double(a), Double(b)) => a.partial_cmp(b),
        (Str(a), Str(b)) => return reference_equality(a == b),
        (Ref(a), Ref(b)) => return reference_equality(a == b),
        (Null, Null) => return reference_equality(true),
        (Ref(_) | Str(_), Null) | (Null, Ref(_) | Str(_)) => return reference_equality(false),
        (Ref(_), Str(_)) | (Str(_), Ref(_)) => return reference_equality(false),
        _ => {
            return Err(SimAbort::GraphFault {
                detail: "compare on mismatched kinds",
            })
        }
    };
    // NaN comparisons: only Ne holds, every ordered test is false.
    Ok(match (op, ordering) {
        (CmpOp::Eq, Some(Ordering::Equal)) => true,
        (CmpOp::Eq, _) => false,
        (CmpOp::Ne, Some(Ordering::Equal)) => false,
        (CmpOp::Ne, _) => true,
        (CmpOp::Lt, Some(Ordering::Less)) => true,
        (CmpOp::Lt, _) => false,
        (CmpOp::Le, Some(Ordering::Less | Ordering::Equal)) => true,
        (CmpOp::Le, _) => false,
        (CmpOp::Gt, Some(Ordering::Greater)) => true,
        (CmpOp::Gt, _) => false,
        (CmpOp::Ge, Some(Ordering::Greater | Ordering::Equal)) => true,
        (CmpOp::Ge, _) => false,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_int_arithmetic_wraps_and_masks() {
        assert_eq!(
            fold_int_binary(BinaryOp::Add, i32::MAX, 1).unwrap(),
            SimValue::Int(i32::MIN)
        );
        assert_eq!(
            fold_int_binary(BinaryOp::Div, i32::MIN, -1).unwrap(),
            SimValue::Int(i32::MIN)
        );
        assert_eq!(
            fold_int_binary(BinaryOp::Shl, 1, 33).unwrap(),
            SimValue::Int(2)
        );
        assert_eq!(
            fold_int_binary(BinaryOp::Ushr, -1, 28).unwrap(),
            SimValue::Int(15)
        );
    }

    #[test]
    fn test_division_by_zero_is_a_runtime_throw() {
        assert!(matches!(
            fold_int_binary(BinaryOp::Div, 1, 0),
            Err(SimAbort::InitializerThrows { exception: "ArithmeticException" })
        ));
        assert!(matches!(
            fold_long_binary(BinaryOp::Rem, 1, 0),
            Err(SimAbort::InitializerThrows { .. })
        ));
    }

    #[test]
    fn test_float_to_int_conversion_saturates() {
        assert_eq!(
            fold_convert(JavaKind::Int, &SimValue::Float(1e20)).unwrap(),
            SimValue::Int(i32::MAX)
        );
        assert_eq!(
            fold_convert(JavaKind::Int, &SimValue::Float(f32::NAN)).unwrap(),
            SimValue::Int(0)
        );
        assert_eq!(
            fold_convert(JavaKind::Byte, &SimValue::Int(0x1ff)).unwrap(),
            SimValue::Int(-1)
        );
        assert_eq!(
            fold_convert(JavaKind::Char, &SimValue::Int(-1)).unwrap(),
            SimValue::Int(0xffff)
        );
    }

    #[test]
    fn test_nan_compares_only_not_equal() {
        let nan = SimValue::Double(f64::NAN);
        assert!(!fold_compare(CmpOp::Eq, &nan, &nan).unwrap());
        assert!(fold_compare(CmpOp::Ne, &nan, &nan).unwrap());
        assert!(!fold_compare(CmpOp::Le, &nan, &nan).unwrap());
    }

    #[test]
    fn test_unknown_operands_stay_unknown_but_branches_abort() {
        let folded = fold_binary(BinaryOp::Add, &SimValue::Unknown, &SimValue::Int(1)).unwrap();
        assert!(folded.is_unknown());
        assert!(matches!(
            fold_compare(CmpOp::Eq, &SimValue::Unknown, &SimValue::Int(1)),
            Err(SimAbort::NonFoldableBranch)
        ));
    }

    #[test]
    fn test_store_coercion_truncates_sub_int_kinds() {
        assert_eq!(
            store_coerce(JavaKind::Byte, SimValue::Int(300)).unwrap(),
            SimValue::Int(44)
        );
        assert_eq!(
            store_coerce(JavaKind::Boolean, SimValue::Int(3)).unwrap(),
            SimValue::Int(1)
        );
        assert!(store_coerce(JavaKind::Long, SimValue::Int(1)).is_err());
    }
}
