//! In-memory class universe implementing the host boundary
//!
//! Embedders that precompute their whole class set register it here instead
//! of wiring a live runtime; the test suites build their fixtures the same
//! way. Registration happens through `&mut self` before analysis starts;
//! afterwards the universe is shared read-only except for the
//! initialization ledger, which sits behind concurrent maps.

use std::sync::Arc;

use dashmap::DashMap;
use rustc_hash::FxHashMap;

use crate::classfile::{descriptor::FieldDescriptor, Constant, FieldRef, MethodRef, TypeRef};
use crate::error::Result;
use crate::host::{ClassMeta, FieldMeta, Hierarchy, HostInitOutcome, HostRuntime, MethodMeta};
use crate::ir::InitializerIr;

#[derive(Debug, Clone)]
struct ClassData {
    meta: ClassMeta,
    superclass: Option<TypeRef>,
    interfaces: Vec<TypeRef>,
    declares_default_methods: bool,
    static_fields: Vec<FieldRef>,
    instance_fields: Vec<FieldRef>,
    initializer: Option<MethodRef>,
    /// Scripted linkage failure message; the class never initializes
    fails_linkage: Option<String>,
}

#[derive(Debug, Clone)]
struct FieldData {
    meta: FieldMeta,
}

#[derive(Debug)]
struct MethodData {
    meta: MethodMeta,
    body: Option<Arc<InitializerIr>>,
}

/// Registry of classes, fields, and methods backing [`HostRuntime`]
pub struct ClassUniverse {
    classes: Vec<ClassData>,
    by_name: FxHashMap<String, TypeRef>,
    fields: Vec<FieldData>,
    methods: Vec<MethodData>,
    initialized: DashMap<TypeRef, ()>,
    init_counts: DashMap<TypeRef, usize>,
}

impl Default for ClassUniverse {
    fn default() -> Self {
        Self::new()
    }
}

impl ClassUniverse {
    pub fn new() -> Self {
        Self {
            classes: Vec::new(),
            by_name: FxHashMap::default(),
            fields: Vec::new(),
            methods: Vec::new(),
            initialized: DashMap::new(),
            init_counts: DashMap::new(),
        }
    }

    fn define(&mut self, name: &str, is_primitive: bool, is_array: bool, is_interface: bool) -> TypeRef {
        let class = TypeRef::new(self.classes.len() as u32);
        self.classes.push(ClassData {
            meta: ClassMeta {
                name: Arc::from(name),
                is_primitive,
                is_array,
                is_interface,
                is_synthetic: false,
            },
            superclass: None,
            interfaces: Vec::new(),
            declares_default_methods: false,
            static_fields: Vec::new(),
            instance_fields: Vec::new(),
            initializer: None,
            fails_linkage: None,
        });
        self.by_name.insert(name.to_string(), class);
        class
    }

    pub fn define_class(&mut self, name: &str) -> TypeRef {
        self.define(name, false, false, false)
    }

    pub fn define_interface(&mut self, name: &str) -> TypeRef {
        self.define(name, false, false, true)
    }

    pub fn define_primitive(&mut self, name: &str) -> TypeRef {
        self.define(name, true, false, false)
    }

    pub fn define_array(&mut self, name: &str) -> TypeRef {
        self.define(name, false, true, false)
    }

    pub fn set_superclass(&mut self, class: TypeRef, superclass: TypeRef) {
        self.classes[class.index()].superclass = Some(superclass);
    }

    pub fn add_interface(&mut self, class: TypeRef, interface: TypeRef) {
        self.classes[class.index()].interfaces.push(interface);
    }

    pub fn set_declares_default_methods(&mut self, interface: TypeRef, value: bool) {
        self.classes[interface.index()].declares_default_methods = value;
    }

    pub fn mark_synthetic(&mut self, class: TypeRef) {
        self.classes[class.index()].meta.is_synthetic = true;
    }

    /// Script a linkage failure: every initialization attempt fails
    pub fn fail_linkage(&mut self, class: TypeRef, message: &str) {
        self.classes[class.index()].fails_linkage = Some(message.to_string());
    }

    /// Mark a class as initialized before the analysis ever runs
    pub fn mark_initialized(&mut self, class: TypeRef) {
        self.initialized.insert(class, ());
    }

    fn add_field(
        &mut self,
        class: TypeRef,
        name: &str,
        descriptor: &str,
        is_static: bool,
        constant_value: Option<Constant>,
    ) -> Result<FieldRef> {
        let parsed = FieldDescriptor::parse(descriptor)?;
        let field = FieldRef::new(self.fields.len() as u32);
        self.fields.push(FieldData {
            meta: FieldMeta {
                owner: class,
                name: Arc::from(name),
                kind: parsed.kind,
                is_static,
                constant_value,
            },
        });
        let data = &mut self.classes[class.index()];
        if is_static {
            data.static_fields.push(field);
        } else {
            data.instance_fields.push(field);
        }
        Ok(field)
    }

    pub fn add_static_field(
        &mut self,
        class: TypeRef,
        name: &str,
        descriptor: &str,
        constant_value: Option<Constant>,
    ) -> Result<FieldRef> {
        self.add_field(class, name, descriptor, true, constant_value)
    }

    pub fn add_instance_field(
        &mut self,
        class: TypeRef,
        name: &str,
        descriptor: &str,
    ) -> Result<FieldRef> {
        self.add_field(class, name, descriptor, false, None)
    }

    fn add_method_data(
        &mut self,
        class: TypeRef,
        name: &str,
        is_static: bool,
        is_native: bool,
        statically_bindable: bool,
    ) -> MethodRef {
        let method = MethodRef::new(self.methods.len() as u32);
        self.methods.push(MethodData {
            meta: MethodMeta {
                owner: class,
                name: Arc::from(name),
                is_static,
                is_native,
                statically_bindable,
            },
            body: None,
        });
        method
    }

    /// Static method with a statically bound call target
    pub fn add_static_method(&mut self, class: TypeRef, name: &str) -> MethodRef {
        self.add_method_data(class, name, true, false, true)
    }

    /// Instance method; `bindable` states whether dispatch resolves to one
    /// body at build time
    pub fn add_virtual_method(&mut self, class: TypeRef, name: &str, bindable: bool) -> MethodRef {
        self.add_method_data(class, name, false, false, bindable)
    }

    /// Native method: bindable but with no decodable body
    pub fn add_native_method(&mut self, class: TypeRef, name: &str) -> MethodRef {
        self.add_method_data(class, name, true, true, true)
    }

    pub fn set_method_body(&mut self, method: MethodRef, body: InitializerIr) {
        self.methods[method.index()].body = Some(Arc::new(body));
    }

    /// Register the `<clinit>` body for a class
    pub fn set_initializer(&mut self, class: TypeRef, body: InitializerIr) {
        let method = self.add_method_data(class, "<clinit>", true, false, true);
        self.methods[method.index()].body = Some(Arc::new(body));
        self.classes[class.index()].initializer = Some(method);
    }

    pub fn find_class(&self, name: &str) -> Option<TypeRef> {
        self.by_name.get(name).copied()
    }

    pub fn class_count(&self) -> usize {
        self.classes.len()
    }

    /// All registered classes, in definition order
    pub fn all_classes(&self) -> Vec<TypeRef> {
        (0..self.classes.len() as u32).map(TypeRef::new).collect()
    }

    /// How many times this class actually transitioned to initialized
    pub fn init_count(&self, class: TypeRef) -> usize {
        self.init_counts.get(&class).map(|c| *c).unwrap_or(0)
    }
}

impl HostRuntime for ClassUniverse {
    fn class_meta(&self, class: TypeRef) -> ClassMeta {
        self.classes[class.index()].meta.clone()
    }

    fn hierarchy_of(&self, class: TypeRef) -> Hierarchy {
        let data = &self.classes[class.index()];
        Hierarchy {
            superclass: data.superclass,
            interfaces: data.interfaces.clone(),
            declares_default_methods: data.declares_default_methods,
        }
    }

    fn is_already_initialized(&self, class: TypeRef) -> bool {
        self.initialized.contains_key(&class)
    }

    fn ensure_initialized(&self, class: TypeRef) -> HostInitOutcome {
        if self.initialized.contains_key(&class) {
            return HostInitOutcome::Initialized;
        }
        let data = &self.classes[class.index()];
        if data.meta.is_trivially_initialized() {
            self.initialized.insert(class, ());
            return HostInitOutcome::Initialized;
        }
        // JVM order: superclass first, then superinterfaces that declare
        // default methods, then the class itself
        if let Some(superclass) = data.superclass {
            let outcome = self.ensure_initialized(superclass);
            if !outcome.is_initialized() {
                return outcome;
            }
        }
        for &interface in &data.interfaces {
            if self.classes[interface.index()].declares_default_methods {
                let outcome = self.ensure_initialized(interface);
                if !outcome.is_initialized() {
                    return outcome;
                }
            }
        }
        if let Some(message) = &data.fails_linkage {
            log::debug!("UNIVERSE: linkage failure for {}: {}", data.meta.name, message);
            return HostInitOutcome::LinkageFailure(message.clone());
        }
        let first = self.initialized.insert(class, ()).is_none();
        if first {
            *self.init_counts.entry(class).or_insert(0) += 1;
            log::debug!("UNIVERSE: initialized {}", data.meta.name);
        }
        HostInitOutcome::Initialized
    }

    fn initializer_method(&self, class: TypeRef) -> Option<MethodRef> {
        self.classes[class.index()].initializer
    }

    fn static_fields(&self, class: TypeRef) -> Vec<FieldRef> {
        self.classes[class.index()].static_fields.clone()
    }

    fn instance_fields(&self, class: TypeRef) -> Vec<FieldRef> {
        self.classes[class.index()].instance_fields.clone()
    }

    fn field_meta(&self, field: FieldRef) -> FieldMeta {
        self.fields[field.index()].meta.clone()
    }

    fn method_meta(&self, method: MethodRef) -> MethodMeta {
        self.methods[method.index()].meta.clone()
    }

    fn method_body(&self, method: MethodRef) -> Option<Arc<InitializerIr>> {
        self.methods[method.index()].body.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::IrBuilder;

    #[test]
    fn test_initialization_runs_superclass_first() {
        let mut u = ClassUniverse::new();
        let base = u.define_class("lib.Base");
        let derived = u.define_class("lib.Derived");
        u.set_superclass(derived, base);
        assert_eq!(u.ensure_initialized(derived), HostInitOutcome::Initialized);
        assert!(u.is_already_initialized(base));
        assert_eq!(u.init_count(base), 1);
        assert_eq!(u.init_count(derived), 1);
    }

    #[test]
    fn test_initialization_is_idempotent() {
        let mut u = ClassUniverse::new();
        let c = u.define_class("lib.Once");
        u.ensure_initialized(c);
        u.ensure_initialized(c);
        assert_eq!(u.init_count(c), 1);
    }

    #[test]
    fn test_default_method_interfaces_initialize_with_class() {
        let mut u = ClassUniverse::new();
        let plain = u.define_interface("lib.Plain");
        let defaulted = u.define_interface("lib.WithDefaults");
        u.set_declares_default_methods(defaulted, true);
        let c = u.define_class("lib.Impl");
        u.add_interface(c, plain);
        u.add_interface(c, defaulted);
        u.ensure_initialized(c);
        assert!(u.is_already_initialized(defaulted));
        assert!(!u.is_already_initialized(plain));
    }

    #[test]
    fn test_linkage_failure_propagates_from_superclass() {
        let mut u = ClassUniverse::new();
        let base = u.define_class("lib.Broken");
        u.fail_linkage(base, "missing native library");
        let derived = u.define_class("lib.Derived");
        u.set_superclass(derived, base);
        let outcome = u.ensure_initialized(derived);
        assert!(matches!(outcome, HostInitOutcome::LinkageFailure(_)));
        assert!(!u.is_already_initialized(derived));
        assert_eq!(u.init_count(derived), 0);
    }

    #[test]
    fn test_initializer_body_round_trip() {
        let mut u = ClassUniverse::new();
        let c = u.define_class("lib.HasInit");
        let mut b = IrBuilder::new(c);
        b.ret();
        u.set_initializer(c, b.finish().unwrap());
        assert!(u.initializer_method(c).is_some());
        assert!(u.decode_initializer(c).is_some());
    }

    #[test]
    fn test_field_descriptor_drives_kind() {
        let mut u = ClassUniverse::new();
        let c = u.define_class("lib.Fields");
        let f = u.add_static_field(c, "count", "I", Some(Constant::Integer(0))).unwrap();
        let meta = u.field_meta(f);
        assert_eq!(meta.kind, crate::classfile::JavaKind::Int);
        assert!(meta.is_static);
        assert!(u.add_static_field(c, "bad", "Q", None).is_err());
    }
}
