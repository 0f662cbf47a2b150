//! Generational write barrier and relocating trace support.
//!
//! This crate is the collector side of the contract in `garnet-object`. It
//! does not own object storage; objects live wherever the VM keeps them and
//! talk to the collector through [`Memory`] and [`Tracer`]:
//!
//! - [`Heap`] hands out identities and keeps the remembered set filled by
//!   the write barrier.
//! - [`Evacuation`] is one relocating trace pass: the collector decides which
//!   objects move, and every [`Traceable`] object writes the new locations
//!   back into its fields.
//!
//! Consumers provide a [`RootProvider`] to supply live roots at GC time.

use std::collections::{HashMap, HashSet};

use garnet_object::{Header, HeaderFlags, Memory, ObjectType, Traceable, Tracer, Value};

// ── Public API types ──────────────────────────────────────────────────

/// Consumers implement this to provide GC roots.
///
/// The visitor receives `&mut Value` so roots can be updated in place when
/// the objects they name are relocated.
pub trait RootProvider {
    fn visit_roots(&mut self, visitor: &mut dyn FnMut(&mut Value));
}

/// A set of roots and remembered-set entries for one GC cycle.
#[derive(Debug, Default)]
pub struct RootSet {
    pub roots: Vec<Value>,
    pub remember: Vec<Value>,
}

// ── Heap settings ─────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct HeapSettings {
    /// Age at which an object counts as old. Stores into younger holders
    /// are not remembered.
    pub tenure_age: u8,
    /// Initial capacity of the remembered set.
    pub remembered_capacity: usize,
    /// First identity handed out. Zero is never used.
    pub first_identity: u64,
}

impl Default for HeapSettings {
    fn default() -> Self {
        Self {
            tenure_age: 1,
            remembered_capacity: 32,
            first_identity: 1,
        }
    }
}

impl HeapSettings {
    #[inline]
    fn validate(&self) -> Result<(), &'static str> {
        if self.first_identity == 0 {
            return Err("identity 0 is reserved");
        }
        if self.first_identity >= 1 << 61 {
            return Err("first_identity does not fit a reference value");
        }
        Ok(())
    }
}

/// Counters for the write barrier.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct BarrierStats {
    /// Every barrier call, references or not.
    pub barriers: u64,
    /// Holders newly added to the remembered set.
    pub remembered: u64,
}

/// Outcome of one [`Evacuation`].
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct EvacuationStats {
    pub marked: usize,
    pub relocated: usize,
}

// ── Heap ──────────────────────────────────────────────────────────────

#[derive(Debug)]
pub struct Heap {
    settings: HeapSettings,
    next_identity: u64,
    allocated: u64,
    epoch: u64,
    remember: Vec<Value>,
    stats: BarrierStats,
}

impl Heap {
    pub fn new(settings: HeapSettings) -> Self {
        settings.validate().expect("Invalid Heap Settings");
        Self {
            next_identity: settings.first_identity,
            remember: Vec::with_capacity(settings.remembered_capacity),
            settings,
            allocated: 0,
            epoch: 0,
            stats: BarrierStats::default(),
        }
    }

    #[inline]
    pub fn settings(&self) -> &HeapSettings {
        &self.settings
    }

    #[inline]
    pub fn allocated(&self) -> u64 {
        self.allocated
    }

    /// Completed evacuations.
    #[inline]
    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    #[inline]
    pub fn barrier_stats(&self) -> BarrierStats {
        self.stats
    }

    #[inline]
    pub fn remembered(&self) -> &[Value] {
        &self.remember
    }

    fn next_identity(&mut self) -> Value {
        let identity = self.next_identity;
        self.next_identity += 1;
        Value::from_identity(identity)
    }

    /// Collect GC inputs: snapshot roots and take the remembered set.
    pub fn collect_gc_inputs(&mut self, roots: &mut dyn RootProvider) -> RootSet {
        let mut root_values = Vec::new();
        roots.visit_roots(&mut |value| {
            root_values.push(*value);
        });
        let remember = std::mem::take(&mut self.remember);
        RootSet {
            roots: root_values,
            remember,
        }
    }

    /// Drop the REMEMBERED flag once the collector has scanned `header`.
    pub fn clear_remembered_flag(&self, header: &Header) {
        header.remove_flag(HeaderFlags::REMEMBERED);
    }

    /// Objects that survive a collection get older.
    pub fn age_survivor(&self, header: &Header) {
        if header.age() < u8::MAX {
            header.increment_age();
        }
    }

    /// Start a relocating trace pass.
    pub fn evacuate(&mut self) -> Evacuation<'_> {
        Evacuation {
            heap: self,
            forwarding: HashMap::default(),
            marked: HashSet::default(),
            relocated: 0,
        }
    }

    #[cold]
    fn record_remembered_set(&mut self, source: Value) {
        self.stats.remembered += 1;
        self.remember.push(source);
    }
}

impl Default for Heap {
    fn default() -> Self {
        Self::new(HeapSettings::default())
    }
}

impl Memory for Heap {
    fn allocate_header(&mut self, object_type: ObjectType) -> Header {
        self.allocated += 1;
        Header::new(object_type, self.next_identity())
    }

    // ── Write barrier ─────────────────────────────────────────────────

    /// Generational write barrier: old holders storing a reference are
    /// recorded once until their flag is cleared.
    #[inline(always)]
    fn write_barrier(&mut self, holder: &Header, stored: Value) {
        self.stats.barriers += 1;
        if !stored.is_ref() || holder.age() < self.settings.tenure_age {
            return;
        }

        // Fast Path: Check flag loosely
        if holder.has_flag(HeaderFlags::REMEMBERED) {
            return;
        }

        // Slow Path: Atomically set flag
        let prev = holder.fetch_or_flags(HeaderFlags::REMEMBERED);
        if !prev.contains(HeaderFlags::REMEMBERED) {
            self.record_remembered_set(holder.identity());
        }
    }
}

// ── Evacuation ────────────────────────────────────────────────────────

/// One relocating trace pass over a set of objects.
///
/// The collector decides what moves with [`Evacuation::relocate`]; tracing
/// objects then rewrites every field that pointed at a moved object, and
/// each rewrite goes back through the heap's write barrier.
pub struct Evacuation<'h> {
    heap: &'h mut Heap,
    forwarding: HashMap<Value, Value, ahash::RandomState>,
    marked: HashSet<Value, ahash::RandomState>,
    relocated: usize,
}

impl Evacuation<'_> {
    /// Move `object` to a fresh identity. Returns the new reference.
    pub fn relocate(&mut self, object: Value) -> Value {
        debug_assert!(object.is_ref(), "only references can be relocated");
        if let Some(&moved) = self.forwarding.get(&object) {
            return moved;
        }
        let moved = self.heap.next_identity();
        self.forwarding.insert(object, moved);
        moved
    }

    pub fn forwarded(&self, object: Value) -> Option<Value> {
        self.forwarding.get(&object).copied()
    }

    pub fn is_marked(&self, object: Value) -> bool {
        self.marked.contains(&object)
    }

    /// Trace the edges of `object`, writing back relocated references.
    pub fn trace(&mut self, object: &mut dyn Traceable) {
        object.trace_edges(self);
    }

    /// Rewrite roots that point at moved objects.
    pub fn update_roots(&mut self, roots: &mut dyn RootProvider) {
        roots.visit_roots(&mut |value| {
            if let Some(&moved) = self.forwarding.get(value) {
                *value = moved;
            }
        });
    }

    pub fn finish(self) -> EvacuationStats {
        self.heap.epoch += 1;
        let stats = EvacuationStats {
            marked: self.marked.len(),
            relocated: self.relocated,
        };
        log::debug!(
            "evacuation {} done: {} marked, {} fields relocated",
            self.heap.epoch,
            stats.marked,
            stats.relocated
        );
        stats
    }
}

impl Tracer for Evacuation<'_> {
    fn mark(&mut self, value: Value) -> Option<Value> {
        if !value.is_ref() {
            return None;
        }
        self.marked.insert(value);
        self.forwarding.get(&value).copied()
    }

    fn just_set(&mut self, holder: &Header, value: Value) {
        self.relocated += 1;
        self.heap.write_barrier(holder, value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use garnet_object::Tuple;

    struct Roots(Vec<Value>);

    impl RootProvider for Roots {
        fn visit_roots(&mut self, visitor: &mut dyn FnMut(&mut Value)) {
            self.0.iter_mut().for_each(visitor);
        }
    }

    #[test]
    fn identities_are_unique_references() {
        let mut heap = Heap::default();
        let a = heap.allocate_header(ObjectType::Tuple);
        let b = heap.allocate_header(ObjectType::Tuple);
        assert!(a.identity().is_ref());
        assert_ne!(a.identity(), b.identity());
        assert_eq!(heap.allocated(), 2);
    }

    #[test]
    #[should_panic(expected = "Invalid Heap Settings")]
    fn identity_zero_is_rejected() {
        Heap::new(HeapSettings {
            first_identity: 0,
            ..Default::default()
        });
    }

    #[test]
    fn young_holders_are_not_remembered() {
        let mut heap = Heap::default();
        let holder = heap.allocate_header(ObjectType::Tuple);
        heap.write_barrier(&holder, Value::from_identity(99));
        assert!(heap.remembered().is_empty());
        assert_eq!(heap.barrier_stats().barriers, 1);
    }

    #[test]
    fn old_holder_is_remembered_once() {
        let mut heap = Heap::default();
        let holder = heap.allocate_header(ObjectType::Tuple);
        heap.age_survivor(&holder);

        heap.write_barrier(&holder, Value::from_i64(1));
        assert!(heap.remembered().is_empty(), "fixnums need no remembering");

        heap.write_barrier(&holder, Value::from_identity(99));
        heap.write_barrier(&holder, Value::from_identity(100));
        assert_eq!(heap.remembered(), &[holder.identity()]);
        assert_eq!(
            heap.barrier_stats(),
            BarrierStats {
                barriers: 3,
                remembered: 1
            }
        );

        heap.clear_remembered_flag(&holder);
        heap.write_barrier(&holder, Value::from_identity(99));
        assert_eq!(heap.remembered().len(), 2);
    }

    #[test]
    fn gc_inputs_take_the_remembered_set() {
        let mut heap = Heap::default();
        let holder = heap.allocate_header(ObjectType::Tuple);
        heap.age_survivor(&holder);
        heap.write_barrier(&holder, Value::from_identity(7));

        let mut roots = Roots(vec![Value::from_identity(3)]);
        let inputs = heap.collect_gc_inputs(&mut roots);
        assert_eq!(inputs.roots, vec![Value::from_identity(3)]);
        assert_eq!(inputs.remember, vec![holder.identity()]);
        assert!(heap.remembered().is_empty());
    }

    #[test]
    fn evacuation_rewrites_tuple_fields_and_roots() {
        let mut heap = Heap::default();
        let element = heap.allocate_header(ObjectType::Tuple).identity();
        let mut tuple =
            Tuple::from_values(&[element, Value::from_i64(1)], &mut heap);
        heap.age_survivor(&tuple.header);
        let mut roots = Roots(vec![element]);

        let mut evacuation = heap.evacuate();
        let moved = evacuation.relocate(element);
        assert_eq!(evacuation.relocate(element), moved);
        evacuation.trace(&mut tuple);
        evacuation.update_roots(&mut roots);
        assert!(evacuation.is_marked(element));
        assert_eq!(evacuation.forwarded(element), Some(moved));
        let stats = evacuation.finish();

        assert_eq!(tuple.at(0).expect("at"), moved);
        assert_eq!(roots.0, vec![moved]);
        assert_eq!(stats, EvacuationStats { marked: 1, relocated: 1 });
        assert_eq!(heap.epoch(), 1);
        // the rewritten field went through the barrier of an old holder
        assert_eq!(heap.remembered(), &[tuple.identity()]);
    }
}
