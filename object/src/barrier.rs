//! The contract between object layouts and the garbage collector.
//!
//! The collector itself lives elsewhere (see the `garnet-heap` crate). Objects
//! only see it through three seams:
//!
//! - [`Memory`]: hands out headers and receives a write barrier after every
//!   reference store.
//! - [`Tracer`]: during a mark pass, reports each held reference and may
//!   return a relocated replacement.
//! - [`Traceable`]: implemented by every object that holds references.
//!
//! [`Field`] is the only way to store a reference into an object, so a
//! store without its barrier cannot be written.

use crate::{Header, ObjectType, Value};

/// Allocation and write-barrier side of the collector.
pub trait Memory {
    /// Assign a fresh identity and header to a new object.
    fn allocate_header(&mut self, object_type: ObjectType) -> Header;

    /// Called after `stored` has been written into the object owning `holder`.
    fn write_barrier(&mut self, holder: &Header, stored: Value);
}

/// Mark side of the collector.
pub trait Tracer {
    /// Mark `value`. Returns the new location if the collector moved it.
    fn mark(&mut self, value: Value) -> Option<Value>;

    /// Notify the collector that `holder` now references `value` after a
    /// relocation was written back during tracing.
    fn just_set(&mut self, holder: &Header, value: Value);
}

/// Objects that hold references visit them here.
pub trait Traceable {
    fn trace_edges(&mut self, tracer: &mut dyn Tracer);
}

/// A reference slot inside a collector-managed object.
///
/// There is no raw setter: [`Field::publish`] performs the store and the
/// write barrier together, and [`Field::relocate`] is the tracing-time
/// counterpart.
#[derive(Clone, Copy, PartialEq, Eq, Default)]
#[repr(transparent)]
pub struct Field(Value);

impl Field {
    #[inline(always)]
    pub const fn nil() -> Self {
        Self(Value::NIL)
    }

    /// A field holding a value that needs no barrier (fixnum or immediate).
    #[inline(always)]
    pub fn immediate(value: Value) -> Self {
        debug_assert!(!value.is_ref(), "references must be published");
        Self(value)
    }

    #[inline(always)]
    pub fn get(&self) -> Value {
        self.0
    }

    /// Store `value` and notify the collector that `holder` references it.
    #[inline(always)]
    pub fn publish(
        &mut self,
        holder: &Header,
        value: Value,
        memory: &mut (impl Memory + ?Sized),
    ) {
        self.0 = value;
        memory.write_barrier(holder, value);
    }

    /// Mark the held value and write back its new location, if any.
    /// Returns `true` when the field changed.
    #[inline]
    pub fn relocate(&mut self, holder: &Header, tracer: &mut dyn Tracer) -> bool {
        if !self.0.is_ref() {
            return false;
        }
        match tracer.mark(self.0) {
            Some(moved) if moved != self.0 => {
                self.0 = moved;
                tracer.just_set(holder, moved);
                true
            }
            _ => false,
        }
    }

    /// Store without a barrier. The caller guarantees that the holder
    /// already references `value`, that `value` is not a reference, or that
    /// it barriers the holder for `value` itself.
    #[inline(always)]
    pub(crate) fn set_within_holder(&mut self, value: Value) {
        self.0 = value;
    }
}

/// Mark an object owned by `holder` and move its header if the collector
/// relocated it. Returns `true` when it moved.
pub fn relocate_owned(holder: &Header, owned: &mut Header, tracer: &mut dyn Tracer) -> bool {
    match tracer.mark(owned.identity()) {
        Some(moved) if moved != owned.identity() => {
            *owned = owned.relocated(moved);
            tracer.just_set(holder, moved);
            true
        }
        _ => false,
    }
}

impl core::fmt::Debug for Field {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        self.0.fmt(f)
    }
}
