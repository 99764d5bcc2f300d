//! Class, field, and method references shared across the analysis
//!
//! The engine never loads class files itself. The host numbers every class,
//! field, and method in its own universe and hands out handles; these
//! newtypes keep the three id spaces from mixing.

pub mod constant;
pub mod descriptor;

pub use constant::Constant;
pub use descriptor::FieldDescriptor;

/// Handle for a class, interface, primitive, or array type in the host universe
#[derive(Eq, PartialEq, Ord, PartialOrd, Hash, Copy, Clone, Debug)]
pub struct TypeRef(u32);

impl TypeRef {
    pub fn new(value: u32) -> Self {
        Self(value)
    }

    /// Get the raw u32 value
    pub fn as_u32(&self) -> u32 {
        self.0
    }

    /// Get the value as a table index
    pub fn index(&self) -> usize {
        self.0 as usize
    }
}

impl From<u32> for TypeRef {
    fn from(value: u32) -> Self {
        Self(value)
    }
}

/// Handle for a static or instance field in the host universe
#[derive(Eq, PartialEq, Ord, PartialOrd, Hash, Copy, Clone, Debug)]
pub struct FieldRef(u32);

impl FieldRef {
    pub fn new(value: u32) -> Self {
        Self(value)
    }

    /// Get the raw u32 value
    pub fn as_u32(&self) -> u32 {
        self.0
    }

    /// Get the value as a table index
    pub fn index(&self) -> usize {
        self.0 as usize
    }
}

impl From<u32> for FieldRef {
    fn from(value: u32) -> Self {
        Self(value)
    }
}

/// Handle for a method in the host universe
#[derive(Eq, PartialEq, Ord, PartialOrd, Hash, Copy, Clone, Debug)]
pub struct MethodRef(u32);

impl MethodRef {
    pub fn new(value: u32) -> Self {
        Self(value)
    }

    /// Get the raw u32 value
    pub fn as_u32(&self) -> u32 {
        self.0
    }

    /// Get the value as a table index
    pub fn index(&self) -> usize {
        self.0 as usize
    }
}

impl From<u32> for MethodRef {
    fn from(value: u32) -> Self {
        Self(value)
    }
}

/// JVM computational kind of a field or value
#[derive(Eq, PartialEq, Hash, Copy, Clone, Debug)]
pub enum JavaKind {
    Boolean,
    Byte,
    Char,
    Short,
    Int,
    Long,
    Float,
    Double,
    Reference,
}

impl JavaKind {
    /// Bytes one field or array element of this kind occupies in an object
    /// layout (64-bit estimates, references uncompressed)
    pub fn storage_bytes(self) -> usize {
        match self {
            JavaKind::Boolean | JavaKind::Byte => 1,
            JavaKind::Char | JavaKind::Short => 2,
            JavaKind::Int | JavaKind::Float => 4,
            JavaKind::Long | JavaKind::Double => 8,
            JavaKind::Reference => crate::consts::REFERENCE_BYTES,
        }
    }

    pub fn is_primitive(self) -> bool {
        !matches!(self, JavaKind::Reference)
    }

    /// True for the sub-int kinds that widen to int on the operand stack
    pub fn is_sub_int(self) -> bool {
        matches!(
            self,
            JavaKind::Boolean | JavaKind::Byte | JavaKind::Char | JavaKind::Short
        )
    }
}
