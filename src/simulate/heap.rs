//! Heap of objects built while interpreting initializers.
//!
//! Every cluster owns one `SimHeap`. Objects created by the cluster's own
//! members are mutable; object graphs imported from an already published
//! snapshot are marked foreign and must never be written. On publication the
//! live heap is frozen down to the objects reachable from the published
//! static values, with identifiers remapped densely.

use std::sync::Arc;

use rustc_hash::FxHashMap;

use crate::classfile::{FieldRef, JavaKind, TypeRef};

use super::value::SimValue;

/// Index of an object in a simulation heap or a frozen snapshot
#[derive(Eq, PartialEq, Ord, PartialOrd, Hash, Copy, Clone, Debug)]
pub struct HeapId(u32);

impl HeapId {
    pub fn new(index: u32) -> Self {
        HeapId(index)
    }

    pub fn index(&self) -> usize {
        self.0 as usize
    }
}

#[derive(Clone, Debug)]
pub enum HeapObject {
    /// Plain instance; unset fields read as the zero value of their kind
    Instance {
        class: TypeRef,
        fields: FxHashMap<FieldRef, SimValue>,
    },
    Array {
        element: JavaKind,
        values: Vec<SimValue>,
    },
    /// Wrapper produced by boxing a primitive
    Boxed { kind: JavaKind, value: SimValue },
}

impl HeapObject {
    /// Heap references held directly by this object
    fn references(&self) -> Vec<HeapId> {
        let mut out = Vec::new();
        let mut push = |v: &SimValue| {
            if let SimValue::Ref(id) = v {
                out.push(*id);
            }
        };
        match self {
            HeapObject::Instance { fields, .. } => fields.values().for_each(&mut push),
            HeapObject::Array { values, .. } => values.iter().for_each(&mut push),
            HeapObject::Boxed { value, .. } => push(value),
        }
        out
    }

    /// Rewrite every held reference through `map`; unmapped references are
    /// reported back instead of being silently dropped
    fn remap(&mut self, map: &mut impl FnMut(HeapId) -> Option<HeapId>) -> bool {
        let mut complete = true;
        let mut fix = |v: &mut SimValue| {
            if let SimValue::Ref(id) = v {
                match map(*id) {
                    Some(new_id) => *v = SimValue::Ref(new_id),
                    None => complete = false,
                }
            }
        };
        match self {
            HeapObject::Instance { fields, .. } => fields.values_mut().for_each(&mut fix),
            HeapObject::Array { values, .. } => values.iter_mut().for_each(&mut fix),
            HeapObject::Boxed { value, .. } => fix(value),
        }
        complete
    }
}

#[derive(Clone, Debug)]
pub struct HeapCell {
    pub object: HeapObject,
    /// Imported from a published snapshot; writes to it must abort
    pub foreign: bool,
}

pub struct SimHeap {
    cells: Vec<HeapCell>,
    /// Memo of imports, keyed by snapshot identity and the id inside it
    imports: FxHashMap<(usize, HeapId), HeapId>,
}

impl SimHeap {
    pub fn new() -> Self {
        SimHeap {
            cells: Vec::new(),
            imports: FxHashMap::default(),
        }
    }

    pub fn len(&self) -> usize {
        self.cells.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    fn push(&mut self, cell: HeapCell) -> HeapId {
        let id = HeapId::new(self.cells.len() as u32);
        self.cells.push(cell);
        id
    }

    pub fn alloc_instance(&mut self, class: TypeRef) -> HeapId {
        self.push(HeapCell {
            object: HeapObject::Instance {
                class,
                fields: FxHashMap::default(),
            },
            foreign: false,
        })
    }

    pub fn alloc_array(&mut self, element: JavaKind, length: usize) -> HeapId {
        let fill = SimValue::default_for(element);
        self.push(HeapCell {
            object: HeapObject::Array {
                element,
                values: vec![fill; length],
            },
            foreign: false,
        })
    }

    pub fn alloc_boxed(&mut self, kind: JavaKind, value: SimValue) -> HeapId {
        self.push(HeapCell {
            object: HeapObject::Boxed { kind, value },
            foreign: false,
        })
    }

    pub fn get(&self, id: HeapId) -> Option<&HeapCell> {
        self.cells.get(id.index())
    }

    pub fn get_mut(&mut self, id: HeapId) -> Option<&mut HeapCell> {
        self.cells.get_mut(id.index())
    }

    /// Deep-import the object graph rooted at `root` inside `snapshot`.
    ///
    /// Repeated imports of the same snapshot object reuse the first copy, so
    /// aliasing inside one published graph survives the transfer. Returns
    /// `None` only when the snapshot references an object it does not
    /// contain, which means the snapshot itself is corrupt.
    pub fn import(&mut self, snapshot: &Arc<FrozenHeap>, root: HeapId) -> Option<HeapId> {
        let tag = Arc::as_ptr(snapshot) as usize;
        if let Some(&local) = self.imports.get(&(tag, root)) {
            return Some(local);
        }

        // First pass: copy the not-yet-imported component.
        let mut fresh: FxHashMap<HeapId, HeapId> = FxHashMap::default();
        let mut order = Vec::new();
        let mut stack = vec![root];
        while let Some(id) = stack.pop() {
            if fresh.contains_key(&id) || self.imports.contains_key(&(tag, id)) {
                continue;
            }
            let object = snapshot.get(id)?.clone();
            for referenced in object.references() {
                stack.push(referenced);
            }
            let local = self.push(HeapCell {
                object,
                foreign: true,
            });
            fresh.insert(id, local);
            order.push(id);
        }

        // Second pass: point the copies at each other.
        for snapshot_id in &order {
            let local = fresh[snapshot_id];
            let mut cell = std::mem::replace(
                &mut self.cells[local.index()].object,
                HeapObject::Boxed {
                    kind: JavaKind::Int,
                    value: SimValue::Int(0),
                },
            );
            let complete = cell.remap(&mut |id| {
                fresh
                    .get(&id)
                    .copied()
                    .or_else(|| self.imports.get(&(tag, id)).copied())
            });
            self.cells[local.index()].object = cell;
            if !complete {
                return None;
            }
        }

        for (snapshot_id, local) in fresh.iter() {
            self.imports.insert((tag, *snapshot_id), *local);
        }
        self.imports.get(&(tag, root)).copied()
    }
}

impl Default for SimHeap {
    fn default() -> Self {
        Self::new()
    }
}

/// Immutable object graph published alongside simulated static values
#[derive(Debug)]
pub struct FrozenHeap {
    cells: Vec<HeapObject>,
}

impl FrozenHeap {
    pub fn get(&self, id: HeapId) -> Option<&HeapObject> {
        self.cells.get(id.index())
    }

    pub fn len(&self) -> usize {
        self.cells.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }
}

/// Freeze `heap` down to the objects reachable from `roots`.
///
/// Identifiers are remapped densely in discovery order; the returned map
/// translates live ids to frozen ids for every object that survived.
pub fn freeze(heap: &SimHeap, roots: &[SimValue]) -> (FrozenHeap, FxHashMap<HeapId, HeapId>) {
    let mut map: FxHashMap<HeapId, HeapId> = FxHashMap::default();
    let mut order = Vec::new();
    let mut stack: Vec<HeapId> = roots.iter().filter_map(SimValue::as_ref).collect();
    stack.reverse();
    while let Some(id) = stack.pop() {
        if map.contains_key(&id) {
            continue;
        }
        let cell = match heap.get(id) {
            Some(cell) => cell,
            None => continue,
        };
        map.insert(id, HeapId::new(order.len() as u32));
        order.push(id);
        for referenced in cell.object.references() {
            stack.push(referenced);
        }
    }

    let mut cells = Vec::with_capacity(order.len());
    for id in order {
        let mut object = match heap.get(id) {
            Some(cell) => cell.object.clone(),
            None => continue,
        };
        object.remap(&mut |old| map.get(&old).copied());
        cells.push(object);
    }
    (FrozenHeap { cells }, map)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_freeze_prunes_unreachable_objects() {
        let mut heap = SimHeap::new();
        let kept = heap.alloc_array(JavaKind::Int, 2);
        let _dropped = heap.alloc_array(JavaKind::Int, 8);
        let roots = vec![SimValue::Ref(kept)];
        let (frozen, map) = freeze(&heap, &roots);
        assert_eq!(frozen.len(), 1);
        assert_eq!(map.get(&kept), Some(&HeapId::new(0)));
    }

    #[test]
    fn test_freeze_rewrites_internal_references() {
        let mut heap = SimHeap::new();
        let inner = heap.alloc_array(JavaKind::Int, 1);
        let holder = heap.alloc_instance(TypeRef::new(7));
        let field = FieldRef::new(0);
        if let Some(cell) = heap.get_mut(holder) {
            if let HeapObject::Instance { fields, .. } = &mut cell.object {
                fields.insert(field, SimValue::Ref(inner));
            }
        }
        let roots = vec![SimValue::Ref(holder)];
        let (frozen, map) = freeze(&heap, &roots);
        assert_eq!(frozen.len(), 2);
        let frozen_holder = map[&holder];
        match frozen.get(frozen_holder) {
            Some(HeapObject::Instance { fields, .. }) => {
                assert_eq!(fields.get(&field), Some(&SimValue::Ref(map[&inner])));
            }
            other => panic!("unexpected object: {:?}", other),
        }
    }

    #[test]
    fn test_import_preserves_aliasing() {
        let mut source = SimHeap::new();
        let shared = source.alloc_array(JavaKind::Int, 1);
        let a = source.alloc_instance(TypeRef::new(1));
        let b = source.alloc_instance(TypeRef::new(2));
        let field = FieldRef::new(0);
        for holder in [a, b] {
            if let Some(cell) = source.get_mut(holder) {
                if let HeapObject::Instance { fields, .. } = &mut cell.object {
                    fields.insert(field, SimValue::Ref(shared));
                }
            }
        }
        let roots = vec![SimValue::Ref(a), SimValue::Ref(b)];
        let (frozen, map) = freeze(&source, &roots);
        let frozen = Arc::new(frozen);

        let mut target = SimHeap::new();
        let local_a = target.import(&frozen, map[&a]).unwrap();
        let local_b = target.import(&frozen, map[&b]).unwrap();
        assert_ne!(local_a, local_b);
        let read = |id: HeapId, heap: &SimHeap| match &heap.get(id).unwrap().object {
            HeapObject::Instance { fields, .. } => fields[&field].clone(),
            other => panic!("unexpected object: {:?}", other),
        };
        assert_eq!(read(local_a, &target), read(local_b, &target));
        assert!(target.get(local_a).unwrap().foreign);
    }
}
