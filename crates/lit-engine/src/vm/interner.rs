//! String interning.
//!
//! Maps string contents to their canonical heap object. Interning is
//! idempotent, and content equality implies handle equality afterwards,
//! which is what lets every table key off the raw handle.
//!
//! The table does not keep its strings alive: after marking, the collector
//! calls [`Interner::remove_white`] so unreferenced strings can be swept.

use lit_core::ObjHandle;
use rustc_hash::FxHashMap;

use crate::vm::heap::Heap;
use crate::vm::object::Obj;

#[derive(Default)]
pub struct Interner {
    strings: FxHashMap<Box<str>, ObjHandle>,
}

impl Interner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the canonical handle for `text`, allocating it on first use.
    pub fn intern(&mut self, heap: &mut Heap, text: &str) -> ObjHandle {
        if let Some(handle) = self.strings.get(text) {
            return *handle;
        }
        let handle = heap.alloc(Obj::String(text.into()));
        self.strings.insert(text.into(), handle);
        handle
    }

    pub fn lookup(&self, text: &str) -> Option<ObjHandle> {
        self.strings.get(text).copied()
    }

    /// Drop table entries whose string was not marked. Weak-table behavior:
    /// the entry goes away, the sweep that follows frees the object.
    pub fn remove_white(&mut self, heap: &Heap) {
        self.strings.retain(|_, handle| heap.is_marked(*handle));
    }

    pub fn len(&self) -> usize {
        self.strings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.strings.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interning_is_idempotent() {
        let mut heap = Heap::new();
        let mut interner = Interner::new();
        let a = interner.intern(&mut heap, "hello");
        let b = interner.intern(&mut heap, "hello");
        let c = interner.intern(&mut heap, "world");
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(interner.len(), 2);
        match heap.get(a) {
            Obj::String(s) => assert_eq!(&**s, "hello"),
            _ => panic!("expected string"),
        }
    }
}
