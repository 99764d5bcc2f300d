//! Parsing of JVM field descriptors

use super::JavaKind;
use crate::error::{Error, Result};

/// Parsed form of a JVM field descriptor such as `I`, `[D` or `Ljava/lang/String;`
#[derive(Eq, PartialEq, Clone, Debug)]
pub struct FieldDescriptor {
    /// Kind of the described value (`Reference` for objects and arrays)
    pub kind: JavaKind,
    /// Number of leading `[` dimensions; 0 for non-arrays
    pub array_dims: usize,
    /// Element kind of the innermost component for arrays, the value kind otherwise
    pub element_kind: JavaKind,
    /// Internal name of the referenced class for `L...;` descriptors
    pub class_name: Option<String>,
}

impl FieldDescriptor {
    /// Parse a field descriptor string
    pub fn parse(descriptor: &str) -> Result<Self> {
        let bytes = descriptor.as_bytes();
        let mut dims = 0usize;
        while dims < bytes.len() && bytes[dims] == b'[' {
            dims += 1;
        }
        let rest = &descriptor[dims..];
        let (element_kind, class_name) = match rest.as_bytes().first() {
            Some(b'Z') => (JavaKind::Boolean, None),
            Some(b'B') => (JavaKind::Byte, None),
            Some(b'C') => (JavaKind::Char, None),
            Some(b'S') => (JavaKind::Short, None),
            Some(b'I') => (JavaKind::Int, None),
            Some(b'J') => (JavaKind::Long, None),
            Some(b'F') => (JavaKind::Float, None),
            Some(b'D') => (JavaKind::Double, None),
            Some(b'L') => {
                if !rest.ends_with(';') || rest.len() < 3 {
                    return Err(Error::internal(format!(
                        "malformed field descriptor: {}",
                        descriptor
                    )));
                }
                (JavaKind::Reference, Some(rest[1..rest.len() - 1].to_string()))
            }
            _ => {
                return Err(Error::internal(format!(
                    "malformed field descriptor: {}",
                    descriptor
                )))
            }
        };
        if class_name.is_none() && rest.len() != 1 {
            return Err(Error::internal(format!(
                "malformed field descriptor: {}",
                descriptor
            )));
        }
        let kind = if dims > 0 { JavaKind::Reference } else { element_kind };
        Ok(Self {
            kind,
            array_dims: dims,
            element_kind,
            class_name,
        })
    }

    pub fn is_array(&self) -> bool {
        self.array_dims > 0
    }
}
