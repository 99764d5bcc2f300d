//! Block-structured intermediate form for initializer and method bodies
//!
//! The host decodes bytecode (or synthesizes bodies directly in tests) into
//! this register-based form before handing it to the proof and simulation
//! engines. Blocks end in exactly one terminator; values live in virtual
//! registers with no stack to model.

use std::sync::Arc;

use crate::classfile::{Constant, FieldRef, JavaKind, MethodRef, TypeRef};
use crate::error::{Error, Result};

/// Virtual register inside one initializer graph
#[derive(Eq, PartialEq, Ord, PartialOrd, Hash, Copy, Clone, Debug)]
pub struct Reg(u16);

impl Reg {
    pub fn new(value: u16) -> Self {
        Self(value)
    }

    pub fn index(&self) -> usize {
        self.0 as usize
    }
}

/// Basic block id inside one initializer graph
#[derive(Eq, PartialEq, Ord, PartialOrd, Hash, Copy, Clone, Debug)]
pub struct BlockId(u16);

impl BlockId {
    pub fn new(value: u16) -> Self {
        Self(value)
    }

    pub fn index(&self) -> usize {
        self.0 as usize
    }
}

#[derive(Eq, PartialEq, Copy, Clone, Debug)]
pub enum UnaryOp {
    /// Arithmetic negation
    Neg,
    /// Primitive conversion to the given kind (i2l, d2i, i2b and friends)
    Convert(JavaKind),
}

#[derive(Eq, PartialEq, Copy, Clone, Debug)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    And,
    Or,
    Xor,
    Shl,
    Shr,
    Ushr,
}

#[derive(Eq, PartialEq, Copy, Clone, Debug)]
pub enum CmpOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

/// Dispatch flavor of a call site
#[derive(Eq, PartialEq, Copy, Clone, Debug)]
pub enum InvokeKind {
    Static,
    /// Constructors and private/super calls; always statically bound
    Special,
    Virtual,
    Interface,
}

impl InvokeKind {
    pub fn has_receiver(self) -> bool {
        !matches!(self, InvokeKind::Static)
    }
}

#[derive(Clone, Debug)]
pub enum Instr {
    Const { dst: Reg, value: Constant },
    Unary { dst: Reg, op: UnaryOp, src: Reg },
    Binary { dst: Reg, op: BinaryOp, lhs: Reg, rhs: Reg },
    /// Allocate an uninitialized instance of `class`
    New { dst: Reg, class: TypeRef },
    /// Allocate a zero-filled array with `element` component kind
    NewArray { dst: Reg, element: JavaKind, length: Reg },
    ArrayLength { dst: Reg, array: Reg },
    ArrayLoad { dst: Reg, array: Reg, index: Reg },
    ArrayStore { array: Reg, index: Reg, value: Reg },
    /// System.arraycopy with statically typed array operands
    ArrayCopy { src: Reg, src_pos: Reg, dst: Reg, dst_pos: Reg, length: Reg },
    /// Object.clone on an array receiver
    ArrayClone { dst: Reg, array: Reg },
    GetStatic { dst: Reg, field: FieldRef },
    PutStatic { field: FieldRef, value: Reg },
    GetField { dst: Reg, object: Reg, field: FieldRef },
    PutField { object: Reg, field: FieldRef, value: Reg },
    MonitorEnter { object: Reg },
    MonitorExit { object: Reg },
    /// Primitive boxing (Integer.valueOf and friends)
    Box { dst: Reg, kind: JavaKind, value: Reg },
    /// Unboxing (intValue and friends); throws on null at run time
    Unbox { dst: Reg, kind: JavaKind, object: Reg },
    Invoke { dst: Option<Reg>, kind: InvokeKind, method: MethodRef, args: Vec<Reg> },
    /// Explicit initialization trigger for another class
    EnsureInitialized { class: TypeRef },
    /// Build-time query whether a class is (or will be) initialized
    IsInitialized { dst: Reg, class: TypeRef },
    /// Read or write of thread-local storage; never simulatable
    ThreadLocalAccess { dst: Option<Reg> },
    /// Raw memory access through Unsafe or var handles; never simulatable
    UnsafeAccess { dst: Option<Reg> },
}

#[derive(Clone, Debug)]
pub enum Terminator {
    Return,
    ReturnValue(Reg),
    Goto(BlockId),
    Branch { op: CmpOp, lhs: Reg, rhs: Reg, on_true: BlockId, on_false: BlockId },
    Throw(Reg),
}

#[derive(Clone, Debug)]
pub struct Block {
    pub instrs: Vec<Instr>,
    pub terminator: Terminator,
}

/// Complete body of one initializer or method. Execution starts at block 0;
/// arguments arrive in the first `param_count` registers.
#[derive(Clone, Debug)]
pub struct InitializerIr {
    pub owner: TypeRef,
    pub blocks: Vec<Block>,
    pub reg_count: u16,
    pub param_count: u16,
}

impl InitializerIr {
    pub fn entry(&self) -> BlockId {
        BlockId::new(0)
    }

    pub fn block(&self, id: BlockId) -> Option<&Block> {
        self.blocks.get(id.index())
    }
}

/// Incremental builder for [`InitializerIr`] graphs.
///
/// Opens an entry block on creation; instructions go to the current block
/// until a terminator closes it and `switch_to` selects the next one.
pub struct IrBuilder {
    owner: TypeRef,
    blocks: Vec<(Vec<Instr>, Option<Terminator>)>,
    current: usize,
    next_reg: u16,
    param_count: u16,
}

impl IrBuilder {
    pub fn new(owner: TypeRef) -> Self {
        Self::with_params(owner, 0)
    }

    /// Builder for a method body taking `param_count` leading argument registers
    pub fn with_params(owner: TypeRef, param_count: u16) -> Self {
        Self {
            owner,
            blocks: vec![(Vec::new(), None)],
            current: 0,
            next_reg: param_count,
            param_count,
        }
    }

    pub fn reg(&mut self) -> Reg {
        let r = Reg::new(self.next_reg);
        self.next_reg += 1;
        r
    }

    pub fn param(&self, index: u16) -> Reg {
        Reg::new(index)
    }

    pub fn new_block(&mut self) -> BlockId {
        self.blocks.push((Vec::new(), None));
        BlockId::new((self.blocks.len() - 1) as u16)
    }

    pub fn switch_to(&mut self, block: BlockId) {
        self.current = block.index();
    }

    pub fn push(&mut self, instr: Instr) {
        self.blocks[self.current].0.push(instr);
    }

    fn terminate(&mut self, terminator: Terminator) {
        self.blocks[self.current].1 = Some(terminator);
    }

    pub fn const_value(&mut self, value: Constant) -> Reg {
        let dst = self.reg();
        self.push(Instr::Const { dst, value });
        dst
    }

    pub fn const_int(&mut self, value: i32) -> Reg {
        self.const_value(Constant::Integer(value))
    }

    pub fn const_long(&mut self, value: i64) -> Reg {
        self.const_value(Constant::Long(value))
    }

    pub fn const_double(&mut self, value: f64) -> Reg {
        self.const_value(Constant::Double(value))
    }

    pub fn const_str(&mut self, value: impl Into<Arc<str>>) -> Reg {
        self.const_value(Constant::Str(value.into()))
    }

    pub fn const_null(&mut self) -> Reg {
        self.const_value(Constant::Null)
    }

    pub fn unary(&mut self, op: UnaryOp, src: Reg) -> Reg {
        let dst = self.reg();
        self.push(Instr::Unary { dst, op, src });
        dst
    }

    pub fn binary(&mut self, op: BinaryOp, lhs: Reg, rhs: Reg) -> Reg {
        let dst = self.reg();
        self.push(Instr::Binary { dst, op, lhs, rhs });
        dst
    }

    pub fn new_object(&mut self, class: TypeRef) -> Reg {
        let dst = self.reg();
        self.push(Instr::New { dst, class });
        dst
    }

    pub fn new_array(&mut self, element: JavaKind, length: Reg) -> Reg {
        let dst = self.reg();
        self.push(Instr::NewArray { dst, element, length });
        dst
    }

    pub fn get_static(&mut self, field: FieldRef) -> Reg {
        let dst = self.reg();
        self.push(Instr::GetStatic { dst, field });
        dst
    }

    pub fn put_static(&mut self, field: FieldRef, value: Reg) {
        self.push(Instr::PutStatic { field, value });
    }

    pub fn get_field(&mut self, object: Reg, field: FieldRef) -> Reg {
        let dst = self.reg();
        self.push(Instr::GetField { dst, object, field });
        dst
    }

    pub fn put_field(&mut self, object: Reg, field: FieldRef, value: Reg) {
        self.push(Instr::PutField { object, field, value });
    }

    pub fn array_load(&mut self, array: Reg, index: Reg) -> Reg {
        let dst = self.reg();
        self.push(Instr::ArrayLoad { dst, array, index });
        dst
    }

    pub fn array_store(&mut self, array: Reg, index: Reg, value: Reg) {
        self.push(Instr::ArrayStore { array, index, value });
    }

    pub fn array_length(&mut self, array: Reg) -> Reg {
        let dst = self.reg();
        self.push(Instr::ArrayLength { dst, array });
        dst
    }

    pub fn invoke(
        &mut self,
        kind: InvokeKind,
        method: MethodRef,
        args: Vec<Reg>,
        wants_result: bool,
    ) -> Option<Reg> {
        let dst = if wants_result { Some(self.reg()) } else { None };
        self.push(Instr::Invoke { dst, kind, method, args });
        dst
    }

    pub fn ensure_initialized(&mut self, class: TypeRef) {
        self.push(Instr::EnsureInitialized { class });
    }

    pub fn ret(&mut self) {
        self.terminate(Terminator::Return);
    }

    pub fn ret_value(&mut self, value: Reg) {
        self.terminate(Terminator::ReturnValue(value));
    }

    pub fn goto(&mut self, target: BlockId) {
        self.terminate(Terminator::Goto(target));
    }

    pub fn branch(&mut self, op: CmpOp, lhs: Reg, rhs: Reg, on_true: BlockId, on_false: BlockId) {
        self.terminate(Terminator::Branch { op, lhs, rhs, on_true, on_false });
    }

    pub fn throw(&mut self, exception: Reg) {
        self.terminate(Terminator::Throw(exception));
    }

    /// Validate and seal the graph
    pub fn finish(self) -> Result<InitializerIr> {
        let block_count = self.blocks.len();
        let in_range = |t: &BlockId| t.index() < block_count;
        let mut blocks = Vec::with_capacity(block_count);
        for (index, (instrs, terminator)) in self.blocks.into_iter().enumerate() {
            let terminator = terminator.ok_or_else(|| {
                Error::internal(format!("block {} has no terminator", index))
            })?;
            let targets_ok = match &terminator {
                Terminator::Goto(t) => in_range(t),
                Terminator::Branch { on_true, on_false, .. } => {
                    in_range(on_true) && in_range(on_false)
                }
                _ => true,
            };
            if !targets_ok {
                return Err(Error::internal(format!(
                    "block {} jumps out of range",
                    index
                )));
            }
            blocks.push(Block { instrs, terminator });
        }
        Ok(InitializerIr {
            owner: self.owner,
            blocks,
            reg_count: self.next_reg,
            param_count: self.param_count,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_produces_terminated_blocks() {
        let mut b = IrBuilder::new(TypeRef::new(0));
        let x = b.const_int(3);
        let y = b.const_int(4);
        let sum = b.binary(BinaryOp::Add, x, y);
        b.put_static(FieldRef::new(0), sum);
        b.ret();
        let ir = b.finish().unwrap();
        assert_eq!(ir.blocks.len(), 1);
        assert_eq!(ir.reg_count, 3);
        assert!(matches!(ir.blocks[0].terminator, Terminator::Return));
    }

    #[test]
    fn test_builder_rejects_unterminated_block() {
        let mut b = IrBuilder::new(TypeRef::new(0));
        b.const_int(1);
        assert!(b.finish().is_err());
    }

    #[test]
    fn test_builder_branches_between_blocks() {
        let mut b = IrBuilder::new(TypeRef::new(0));
        let exit = b.new_block();
        let loop_head = b.new_block();
        let zero = b.const_int(0);
        let limit = b.const_int(10);
        b.goto(loop_head);
        b.switch_to(loop_head);
        b.branch(CmpOp::Lt, zero, limit, loop_head, exit);
        b.switch_to(exit);
        b.ret();
        let ir = b.finish().unwrap();
        assert_eq!(ir.blocks.len(), 3);
        assert_eq!(ir.entry(), BlockId::new(0));
        assert!(ir.block(BlockId::new(2)).is_some());
    }
}
