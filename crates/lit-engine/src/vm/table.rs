//! String-keyed tables.
//!
//! Keys are interned string handles, so hashing and equality are on the
//! handle itself: interning guarantees that equal contents share a handle.
//! Used for globals, module name maps, class method/static tables, instance
//! fields and map objects.

use lit_core::{ObjHandle, Value};
use rustc_hash::FxHashMap;

use crate::vm::heap::Heap;

#[derive(Debug, Clone, Default)]
pub struct Table {
    entries: FxHashMap<ObjHandle, Value>,
}

impl Table {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: ObjHandle) -> Option<Value> {
        self.entries.get(&key).copied()
    }

    pub fn set(&mut self, key: ObjHandle, value: Value) {
        self.entries.insert(key, value);
    }

    pub fn remove(&mut self, key: ObjHandle) -> bool {
        self.entries.remove(&key).is_some()
    }

    pub fn contains(&self, key: ObjHandle) -> bool {
        self.entries.contains_key(&key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Copy every entry of `other` into this table, overwriting existing
    /// keys. Inheritance uses this to seed a subclass from its parent.
    pub fn add_all(&mut self, other: &Table) {
        for (key, value) in &other.entries {
            self.entries.insert(*key, *value);
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (ObjHandle, Value)> + '_ {
        self.entries.iter().map(|(k, v)| (*k, *v))
    }

    /// Keys in a stable order (by handle) for deterministic iteration in
    /// serialization and the iterator protocol.
    pub fn sorted_keys(&self) -> Vec<ObjHandle> {
        let mut keys: Vec<ObjHandle> = self.entries.keys().copied().collect();
        keys.sort();
        keys
    }

    /// Drop entries whose key string did not survive marking. Run by the
    /// collector between trace and sweep.
    pub fn remove_white(&mut self, heap: &Heap) {
        self.entries.retain(|key, _| heap.is_marked(*key));
    }

    /// Mark keys and values. Called while tracing.
    pub fn mark(&self, heap: &mut Heap) {
        for (key, value) in &self.entries {
            heap.mark_object(*key);
            heap.mark_value(*value);
        }
    }
}
