#![allow(dead_code)]

use std::sync::Arc;

use tolc_aot::classfile::{FieldRef, JavaKind, TypeRef};
use tolc_aot::ir::IrBuilder;
use tolc_aot::universe::ClassUniverse;
use tolc_aot::{AnalysisConfig, ClassInitAnalyzer, PolicyDirective};

/// Wrap a finished universe in an analyzer with default configuration and
/// an empty, sealed policy
pub fn analyzer(universe: ClassUniverse) -> (Arc<ClassUniverse>, ClassInitAnalyzer) {
    configured(universe, AnalysisConfig::new(), &[])
}

pub fn configured(
    universe: ClassUniverse,
    config: AnalysisConfig,
    directives: &[PolicyDirective],
) -> (Arc<ClassUniverse>, ClassInitAnalyzer) {
    let _ = env_logger::builder().is_test(true).try_init();
    let universe = Arc::new(universe);
    let analyzer = ClassInitAnalyzer::new(universe.clone(), config);
    analyzer.configure(directives).expect("directives apply");
    (universe, analyzer)
}

/// Initializer that fills an int array and stores it into `field`. The
/// array stores keep the early proof from granting build time, so the class
/// stays run-time and is available for simulation.
pub fn set_table_initializer(
    universe: &mut ClassUniverse,
    class: TypeRef,
    field: FieldRef,
    values: &[i32],
) {
    let mut b = IrBuilder::new(class);
    let length = b.const_int(values.len() as i32);
    let array = b.new_array(JavaKind::Int, length);
    for (i, value) in values.iter().enumerate() {
        let index = b.const_int(i as i32);
        let value = b.const_int(*value);
        b.array_store(array, index, value);
    }
    b.put_static(field, array);
    b.ret();
    universe.set_initializer(class, b.finish().expect("table initializer builds"));
}

/// Initializer that copies one foreign static into an own static. The
/// foreign read keeps the early proof from granting build time.
pub fn set_copy_initializer(
    universe: &mut ClassUniverse,
    class: TypeRef,
    own: FieldRef,
    foreign: FieldRef,
) {
    let mut b = IrBuilder::new(class);
    let value = b.get_static(foreign);
    b.put_static(own, value);
    b.ret();
    universe.set_initializer(class, b.finish().expect("copy initializer builds"));
}
