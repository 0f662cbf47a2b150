use garnet_object::{Field, Header, Memory, Tracer, Value};

use crate::ClassId;

/// Address of a callable body for an executable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EntryPoint(u64);

impl EntryPoint {
    /// The bytecode interpreter.
    pub const INTERPRETER: EntryPoint = EntryPoint(0);

    #[inline(always)]
    pub const fn new(address: u64) -> Self {
        Self(address)
    }

    #[inline(always)]
    pub const fn address(self) -> u64 {
        self.0
    }

    #[inline(always)]
    pub const fn is_interpreter(self) -> bool {
        self.0 == Self::INTERPRETER.0
    }
}

/// An entry point compiled for one receiver class against one code revision.
#[derive(Debug)]
pub struct Specialization {
    class_id: ClassId,
    revision: u64,
    entry: EntryPoint,
    runtime_data: Field,
}

impl Specialization {
    #[inline]
    pub fn class_id(&self) -> ClassId {
        self.class_id
    }

    #[inline]
    pub fn revision(&self) -> u64 {
        self.revision
    }

    #[inline]
    pub fn entry(&self) -> EntryPoint {
        self.entry
    }

    #[inline]
    pub fn runtime_data(&self) -> Value {
        self.runtime_data.get()
    }
}

/// Alternate entry points of one executable, keyed by
/// `(class id, code revision)`.
///
/// The table only grows. Redefining the executable advances the revision,
/// which leaves older entries in place but unreachable.
#[derive(Debug, Default)]
pub struct SpecializationTable {
    default_entry: Option<EntryPoint>,
    revision: u64,
    entries: Vec<Specialization>,
}

impl SpecializationTable {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn default_entry(&self) -> Option<EntryPoint> {
        self.default_entry
    }

    pub fn set_default(&mut self, entry: EntryPoint) {
        self.default_entry = Some(entry);
    }

    /// Forget the default entry. Specializations stay registered.
    pub fn clear_default(&mut self) {
        self.default_entry = None;
    }

    #[inline]
    pub fn revision(&self) -> u64 {
        self.revision
    }

    /// Retire every registered specialization. Revisions never repeat, so
    /// a retired entry cannot become reachable again.
    pub fn advance_revision(&mut self) -> u64 {
        self.revision = self
            .revision
            .checked_add(1)
            .expect("specialization revision exhausted");
        log::debug!(
            "specialization revision now {} ({} entries retired)",
            self.revision,
            self.entries.len()
        );
        self.revision
    }

    /// Register `entry` for receivers of `class_id` compiled against
    /// `revision`. `holder` owns the table and is barriered for
    /// `runtime_data`.
    pub fn add(
        &mut self,
        holder: &Header,
        class_id: ClassId,
        revision: u64,
        entry: EntryPoint,
        runtime_data: Value,
        memory: &mut (impl Memory + ?Sized),
    ) {
        let mut data = Field::nil();
        data.publish(holder, runtime_data, memory);
        if revision != self.revision {
            log::debug!(
                "specialization for class {class_id} targets stale revision {revision}, current is {}",
                self.revision
            );
        }
        self.entries.push(Specialization {
            class_id,
            revision,
            entry,
            runtime_data: data,
        });
    }

    /// The newest live specialization for `class_id`.
    pub fn find(&self, class_id: ClassId) -> Option<&Specialization> {
        self.entries
            .iter()
            .rev()
            .find(|spec| spec.class_id == class_id && spec.revision == self.revision)
    }

    /// Entry point to run for receivers of `class_id`: the newest live
    /// specialization, else the default.
    pub fn find_specialized(&self, class_id: ClassId) -> Option<EntryPoint> {
        self.find(class_id)
            .map(Specialization::entry)
            .or(self.default_entry)
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries reachable under the current revision.
    pub fn live(&self) -> impl Iterator<Item = &Specialization> + '_ {
        self.entries
            .iter()
            .filter(move |spec| spec.revision == self.revision)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Specialization> + '_ {
        self.entries.iter()
    }

    pub(crate) fn trace(&mut self, holder: &Header, tracer: &mut dyn Tracer) {
        for spec in &mut self.entries {
            spec.runtime_data.relocate(holder, tracer);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use garnet_heap::Heap;
    use garnet_object::ObjectType;

    fn table() -> (Heap, Header, SpecializationTable) {
        let mut heap = Heap::default();
        let holder = heap.allocate_header(ObjectType::CompiledCode);
        (heap, holder, SpecializationTable::new())
    }

    #[test]
    fn falls_back_to_default() {
        let (_, _, mut specs) = table();
        assert_eq!(specs.find_specialized(1), None);
        specs.set_default(EntryPoint::INTERPRETER);
        assert_eq!(specs.find_specialized(1), Some(EntryPoint::INTERPRETER));
    }

    #[test]
    fn newest_live_entry_wins() {
        let (mut heap, holder, mut specs) = table();
        specs.set_default(EntryPoint::INTERPRETER);
        specs.add(&holder, 7, 0, EntryPoint::new(0x10), Value::NIL, &mut heap);
        specs.add(&holder, 7, 0, EntryPoint::new(0x20), Value::NIL, &mut heap);
        specs.add(&holder, 8, 0, EntryPoint::new(0x30), Value::NIL, &mut heap);
        assert_eq!(specs.find_specialized(7), Some(EntryPoint::new(0x20)));
        assert_eq!(specs.find_specialized(8), Some(EntryPoint::new(0x30)));
        assert_eq!(specs.find_specialized(9), Some(EntryPoint::INTERPRETER));
    }

    #[test]
    fn advancing_the_revision_retires_entries() {
        let (mut heap, holder, mut specs) = table();
        specs.set_default(EntryPoint::INTERPRETER);
        specs.add(&holder, 7, 0, EntryPoint::new(0x10), Value::NIL, &mut heap);
        assert_eq!(specs.advance_revision(), 1);
        assert_eq!(specs.find_specialized(7), Some(EntryPoint::INTERPRETER));
        assert_eq!(specs.len(), 1);
        assert_eq!(specs.live().count(), 0);

        specs.add(&holder, 7, 1, EntryPoint::new(0x40), Value::NIL, &mut heap);
        assert_eq!(specs.find_specialized(7), Some(EntryPoint::new(0x40)));
    }

    #[test]
    fn revisions_do_not_wrap_past_u32() {
        let (mut heap, holder, mut specs) = table();
        specs.set_default(EntryPoint::INTERPRETER);
        specs.add(&holder, 7, 0, EntryPoint::new(0x10), Value::NIL, &mut heap);
        specs.revision = u64::from(u32::MAX);
        assert_eq!(specs.advance_revision(), u64::from(u32::MAX) + 1);
        assert_eq!(specs.find_specialized(7), Some(EntryPoint::INTERPRETER));
    }

    #[test]
    #[should_panic(expected = "specialization revision exhausted")]
    fn exhausted_revisions_panic_instead_of_wrapping() {
        let (_, _, mut specs) = table();
        specs.revision = u64::MAX;
        specs.advance_revision();
    }

    #[test]
    fn runtime_data_is_barriered_and_traced() {
        let (mut heap, holder, mut specs) = table();
        let data = heap.allocate_header(ObjectType::Tuple).identity();
        let before = heap.barrier_stats().barriers;
        specs.add(&holder, 1, 0, EntryPoint::new(1), data, &mut heap);
        assert_eq!(heap.barrier_stats().barriers, before + 1);

        let mut evacuation = heap.evacuate();
        let moved = evacuation.relocate(data);
        specs.trace(&holder, &mut evacuation);
        evacuation.finish();
        assert_eq!(specs.find(1).map(Specialization::runtime_data), Some(moved));
    }
}
