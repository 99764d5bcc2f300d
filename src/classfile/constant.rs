//! Constant field values as carried by class file ConstantValue attributes

use std::sync::Arc;

use super::JavaKind;

/// A compile-time constant value a class file can attach to a static field,
/// plus `Null` for the default of reference fields.
///
/// Sub-int kinds (boolean, byte, char, short) are widened to `Integer`, the
/// same model the operand stack uses.
#[derive(Clone, Debug, PartialEq)]
pub enum Constant {
    Integer(i32),
    Long(i64),
    Float(f32),
    Double(f64),
    Str(Arc<str>),
    Null,
}

impl Constant {
    /// Computational kind of this constant
    pub fn kind(&self) -> JavaKind {
        match self {
            Constant::Integer(_) => JavaKind::Int,
            Constant::Long(_) => JavaKind::Long,
            Constant::Float(_) => JavaKind::Float,
            Constant::Double(_) => JavaKind::Double,
            Constant::Str(_) | Constant::Null => JavaKind::Reference,
        }
    }

    /// Default value a static field of the given kind holds before its
    /// initializer runs (JVMS 2.3/2.4 zero values)
    pub fn default_for(kind: JavaKind) -> Self {
        match kind {
            JavaKind::Boolean
            | JavaKind::Byte
            | JavaKind::Char
            | JavaKind::Short
            | JavaKind::Int => Constant::Integer(0),
            JavaKind::Long => Constant::Long(0),
            JavaKind::Float => Constant::Float(0.0),
            JavaKind::Double => Constant::Double(0.0),
            JavaKind::Reference => Constant::Null,
        }
    }

    pub fn string(value: impl Into<Arc<str>>) -> Self {
        Constant::Str(value.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_values() {
        assert_eq!(Constant::default_for(JavaKind::Boolean), Constant::Integer(0));
        assert_eq!(Constant::default_for(JavaKind::Long), Constant::Long(0));
        assert_eq!(Constant::default_for(JavaKind::Reference), Constant::Null);
    }

    #[test]
    fn test_kind_of_constant() {
        assert_eq!(Constant::Integer(7).kind(), JavaKind::Int);
        assert_eq!(Constant::string("x").kind(), JavaKind::Reference);
        assert_eq!(Constant::Null.kind(), JavaKind::Reference);
    }
}
