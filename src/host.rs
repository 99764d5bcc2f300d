//! Boundary abstraction for the runtime that actually loads, links, and
//! initializes classes
//!
//! The analysis never executes code in the host itself. Everything it knows
//! about the program under compilation flows through this trait: hierarchy
//! shape, member metadata, decoded initializer bodies, and the one impure
//! operation, `ensure_initialized`.

use std::sync::Arc;

use crate::classfile::{Constant, FieldRef, JavaKind, MethodRef, TypeRef};
use crate::ir::InitializerIr;

/// Outcome of asking the host to initialize a class during the build
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HostInitOutcome {
    Initialized,
    /// The class exists but linking failed or its initializer threw
    LinkageFailure(String),
    /// Unexpected host-side failure
    OtherFailure(String),
}

impl HostInitOutcome {
    pub fn is_initialized(&self) -> bool {
        matches!(self, HostInitOutcome::Initialized)
    }

    /// Failure message, empty for the success case
    pub fn message(&self) -> &str {
        match self {
            HostInitOutcome::Initialized => "",
            HostInitOutcome::LinkageFailure(m) | HostInitOutcome::OtherFailure(m) => m,
        }
    }
}

/// Superclass and interface shape of one class
#[derive(Debug, Clone, Default)]
pub struct Hierarchy {
    pub superclass: Option<TypeRef>,
    pub interfaces: Vec<TypeRef>,
    /// True when the class or interface declares default method bodies
    pub declares_default_methods: bool,
}

/// Per-class metadata the analysis consults
#[derive(Debug, Clone)]
pub struct ClassMeta {
    /// Dot-separated qualified name as the policy trie sees it
    pub name: Arc<str>,
    pub is_primitive: bool,
    pub is_array: bool,
    pub is_interface: bool,
    /// Compiler-generated types such as lambda and proxy classes
    pub is_synthetic: bool,
}

impl ClassMeta {
    /// Primitive and array types have trivial initialization
    pub fn is_trivially_initialized(&self) -> bool {
        self.is_primitive || self.is_array
    }
}

/// Field metadata
#[derive(Debug, Clone)]
pub struct FieldMeta {
    pub owner: TypeRef,
    pub name: Arc<str>,
    pub kind: JavaKind,
    pub is_static: bool,
    /// ConstantValue attribute carried by the class file, when present
    pub constant_value: Option<Constant>,
}

/// Method metadata
#[derive(Debug, Clone)]
pub struct MethodMeta {
    pub owner: TypeRef,
    pub name: Arc<str>,
    pub is_static: bool,
    pub is_native: bool,
    /// True when dispatch resolves to exactly one body at build time
    pub statically_bindable: bool,
}

/// Capabilities the surrounding compiler provides to the analysis.
///
/// Implementations must be safe to share across the analysis thread pool;
/// `ensure_initialized` may block and may fail, and the engine treats it as
/// the only call with observable host-side effects.
pub trait HostRuntime: Send + Sync {
    fn class_meta(&self, class: TypeRef) -> ClassMeta;

    fn hierarchy_of(&self, class: TypeRef) -> Hierarchy;

    fn is_already_initialized(&self, class: TypeRef) -> bool;

    /// Load, link, and run the initializer of `class` on the host
    fn ensure_initialized(&self, class: TypeRef) -> HostInitOutcome;

    /// Handle of the `<clinit>` method, when the class declares one
    fn initializer_method(&self, class: TypeRef) -> Option<MethodRef>;

    fn static_fields(&self, class: TypeRef) -> Vec<FieldRef>;

    fn instance_fields(&self, class: TypeRef) -> Vec<FieldRef>;

    fn field_meta(&self, field: FieldRef) -> FieldMeta;

    fn method_meta(&self, method: MethodRef) -> MethodMeta;

    /// Decoded body of a method, when bytecode for it is available
    fn method_body(&self, method: MethodRef) -> Option<Arc<InitializerIr>>;

    /// Decoded body of the class initializer, when the class declares one
    fn decode_initializer(&self, class: TypeRef) -> Option<Arc<InitializerIr>> {
        self.initializer_method(class)
            .and_then(|method| self.method_body(method))
    }

    /// Qualified name shortcut used all over logging and diagnostics
    fn class_name(&self, class: TypeRef) -> Arc<str> {
        self.class_meta(class).name
    }
}
