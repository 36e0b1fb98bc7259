//! The GC-managed heap arena.
//!
//! Objects live in indexed slots; a [`lit_core::ObjHandle`] is a slot index.
//! Freed slots go on a free list and are reused by later allocations. Each
//! slot carries the mark bit the collector uses, so the heap itself stays
//! oblivious to what the collector is doing between `mark` and `sweep`.

use lit_core::{ObjHandle, Value};

use crate::vm::object::Obj;

/// Collection is triggered once allocations cross this threshold.
const INITIAL_NEXT_GC: usize = 256 * 1024;

/// After a sweep the threshold becomes `bytes_allocated * GROW_FACTOR`.
pub const GC_HEAP_GROW_FACTOR: usize = 2;

struct Slot {
    marked: bool,
    bytes: usize,
    obj: Option<Obj>,
}

pub struct Heap {
    slots: Vec<Slot>,
    free: Vec<u32>,
    pub bytes_allocated: usize,
    pub next_gc: usize,
    /// Cleared while native code builds composite objects; allocation then
    /// postpones collection until the latch is restored.
    pub allow_gc: bool,
    /// Explicit roots protecting temporaries across allocations.
    pub roots: Vec<Value>,
    /// Grey stack for the collector.
    pub(crate) gray: Vec<ObjHandle>,
}

impl Default for Heap {
    fn default() -> Self {
        Self::new()
    }
}

impl Heap {
    pub fn new() -> Self {
        Self {
            slots: Vec::new(),
            free: Vec::new(),
            bytes_allocated: 0,
            next_gc: INITIAL_NEXT_GC,
            allow_gc: false,
            roots: Vec::new(),
            gray: Vec::new(),
        }
    }

    /// Whether an allocation now should collect first. The caller (the
    /// state) runs the collection, because the root set is wider than the
    /// heap can see.
    pub fn should_collect(&self) -> bool {
        self.allow_gc && self.bytes_allocated > self.next_gc
    }

    /// Install an object into a slot and return its handle.
    pub fn alloc(&mut self, obj: Obj) -> ObjHandle {
        let bytes = obj.size_estimate();
        self.bytes_allocated += bytes;
        if let Some(index) = self.free.pop() {
            let slot = &mut self.slots[index as usize];
            slot.marked = false;
            slot.bytes = bytes;
            slot.obj = Some(obj);
            return ObjHandle(index);
        }
        if self.slots.len() >= u32::MAX as usize {
            // Allocator exhaustion is fatal by contract.
            eprintln!("!!out of memory!!");
            std::process::abort();
        }
        self.slots.push(Slot {
            marked: false,
            bytes,
            obj: Some(obj),
        });
        ObjHandle((self.slots.len() - 1) as u32)
    }

    pub fn get(&self, handle: ObjHandle) -> &Obj {
        self.slots[handle.index()]
            .obj
            .as_ref()
            .expect("use of freed object handle")
    }

    pub fn get_mut(&mut self, handle: ObjHandle) -> &mut Obj {
        self.slots[handle.index()]
            .obj
            .as_mut()
            .expect("use of freed object handle")
    }

    pub fn contains(&self, handle: ObjHandle) -> bool {
        self.slots
            .get(handle.index())
            .map(|s| s.obj.is_some())
            .unwrap_or(false)
    }

    pub fn is_marked(&self, handle: ObjHandle) -> bool {
        self.slots[handle.index()].marked
    }

    /// Mark an object grey. Idempotent: an already-marked object is not
    /// pushed again, which is what keeps the grey stack bounded.
    pub fn mark_object(&mut self, handle: ObjHandle) {
        let slot = &mut self.slots[handle.index()];
        if slot.obj.is_none() || slot.marked {
            return;
        }
        slot.marked = true;
        self.gray.push(handle);
    }

    pub fn mark_value(&mut self, value: Value) {
        if let Some(handle) = value.as_object() {
            self.mark_object(handle);
        }
    }

    pub fn push_root(&mut self, value: Value) {
        self.roots.push(value);
    }

    pub fn pop_root(&mut self) {
        self.roots.pop();
    }

    /// Free every unmarked slot and clear the mark bit on survivors.
    /// Returns the number of bytes reclaimed.
    pub(crate) fn sweep(&mut self) -> usize {
        let mut reclaimed = 0;
        for (index, slot) in self.slots.iter_mut().enumerate() {
            if slot.obj.is_none() {
                continue;
            }
            if slot.marked {
                slot.marked = false;
            } else {
                reclaimed += slot.bytes;
                slot.obj = None;
                slot.bytes = 0;
                self.free.push(index as u32);
            }
        }
        self.bytes_allocated -= reclaimed;
        self.next_gc = self.bytes_allocated * GC_HEAP_GROW_FACTOR;
        reclaimed
    }

    /// Live object count, used by tests and the GC library surface.
    pub fn live_objects(&self) -> usize {
        self.slots.iter().filter(|s| s.obj.is_some()).count()
    }
}
