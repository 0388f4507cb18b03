//! Write-once reference handles (JOSS 6.4.3).
//!
//! Jedes referenzierbare Stream-Element (Descriptor, String, Objekt, Array,
//! Enum-Konstante, Klassenobjekt) bekommt bei seiner Deklaration den nächsten
//! Index zugewiesen. `TC_REFERENCE` zeigt später per
//! `BASE_WIRE_HANDLE + index` strikt rückwärts darauf.

use std::cell::Cell;
use std::fmt;
use std::rc::Rc;

use crate::{Error, Result};

/// A cloneable write-once slot for a stream element's assignment index.
///
/// Created unassigned; the allocator fills it exactly once when the element
/// is declared. Clones share the slot, so a handle created up front can be
/// passed both to the declaring call and to later `reference` calls.
#[derive(Clone, Default)]
pub struct Handle(Rc<Cell<Option<u32>>>);

impl Handle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_assigned(&self) -> bool {
        self.0.get().is_some()
    }

    /// The assigned index, or [`Error::HandleUnassigned`] before declaration.
    pub fn index(&self) -> Result<u32> {
        self.0.get().ok_or(Error::HandleUnassigned)
    }

    fn set(&self, index: u32) -> Result<()> {
        if self.0.get().is_some() {
            return Err(Error::HandleAlreadyAssigned);
        }
        self.0.set(Some(index));
        Ok(())
    }
}

impl fmt::Debug for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0.get() {
            Some(index) => write!(f, "Handle({index})"),
            None => write!(f, "Handle(unassigned)"),
        }
    }
}

/// Monotonic index allocator, one per stream.
#[derive(Debug, Default)]
pub struct HandleAllocator {
    next: u32,
}

impl HandleAllocator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Consumes the next index without binding it to a `Handle`. Used for
    /// elements that are referenceable on the wire but that the caller did
    /// not ask to reference (inline field-signature strings for example).
    pub fn alloc_index(&mut self) -> u32 {
        let index = self.next;
        self.next += 1;
        index
    }

    /// Allocates the next index and stores it in `handle`.
    pub fn assign(&mut self, handle: &Handle) -> Result<u32> {
        handle.set(self.next)?;
        Ok(self.alloc_index())
    }

    /// Reads a handle's index for a back reference.
    pub fn resolve(&self, handle: &Handle) -> Result<u32> {
        handle.index()
    }

    /// Number of indices handed out so far.
    pub fn count(&self) -> u32 {
        self.next
    }
}
