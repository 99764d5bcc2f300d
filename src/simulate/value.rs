//! Concrete values tracked by the abstract interpreter

use std::sync::Arc;

use crate::classfile::{Constant, JavaKind};

use super::heap::HeapId;

/// A value the simulation knows exactly, or `Unknown` after a diagnostic
/// state reset.
///
/// Sub-int kinds live widened in `Int`, mirroring the operand stack.
/// Strings are tracked by value; reference equality on strings is not
/// modelled. `Unknown` never appears outside diagnostic mode.
#[derive(Clone, Debug, PartialEq)]
pub enum SimValue {
    Int(i32),
    Long(i64),
    Float(f32),
    Double(f64),
    Str(Arc<str>),
    Null,
    Ref(HeapId),
    Unknown,
}

impl SimValue {
    pub fn from_constant(constant: &Constant) -> Self {
        match constant {
            Constant::Integer(v) => SimValue::Int(*v),
            Constant::Long(v) => SimValue::Long(*v),
            Constant::Float(v) => SimValue::Float(*v),
            Constant::Double(v) => SimValue::Double(*v),
            Constant::Str(s) => SimValue::Str(s.clone()),
            Constant::Null => SimValue::Null,
        }
    }

    /// Zero value a field or array slot of the given kind starts with
    pub fn default_for(kind: JavaKind) -> Self {
        Self::from_constant(&Constant::default_for(kind))
    }

    pub fn is_unknown(&self) -> bool {
        matches!(self, SimValue::Unknown)
    }

    pub fn as_int(&self) -> Option<i32> {
        match self {
            SimValue::Int(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_ref(&self) -> Option<HeapId> {
        match self {
            SimValue::Ref(id) => Some(*id),
            _ => None,
        }
    }
}
