use crate::{
    Field, Header, Memory, ObjectError, ObjectResult, ObjectType, Traceable,
    Tracer, Value,
};

/// Number of elements [`Tuple::show`] prints before eliding the rest.
const SHOWN_ELEMENTS: usize = 6;

/// A fixed-length sequence of [`Value`]s managed by the collector.
///
/// ```text
/// [Header] [field_0] [field_1] ... [field_{len-1}]
/// ```
///
/// The length never changes after creation. Every reference stored from
/// outside the tuple goes through [`Field::publish`], so the collector sees
/// a write barrier naming this tuple as the holder. Values moved around
/// inside the tuple need no barrier because the tuple already holds them.
///
/// Index and length arguments are `i64` because they arrive as fixnums
/// from the language; all of them are validated before anything is written.
pub struct Tuple {
    pub header: Header,
    fields: Box<[Field]>,
}

/// A validated `copy_from` / `copy_within` request.
#[derive(Debug, Clone, Copy)]
struct CopyRange {
    src: usize,
    dst: usize,
    len: usize,
}

impl Tuple {
    /// Allocate a tuple of `size` nil fields.
    pub fn create(
        size: i64,
        memory: &mut (impl Memory + ?Sized),
    ) -> ObjectResult<Self> {
        let len = usize::try_from(size)
            .map_err(|_| ObjectError::NegativeSize { size })?;
        Ok(Self::with_len(len, memory))
    }

    /// Allocate a tuple of `len` nil fields.
    pub fn with_len(len: usize, memory: &mut (impl Memory + ?Sized)) -> Self {
        Self {
            header: memory.allocate_header(ObjectType::Tuple),
            fields: vec![Field::nil(); len].into_boxed_slice(),
        }
    }

    /// Allocate a tuple holding exactly `values`.
    pub fn from_values(
        values: &[Value],
        memory: &mut (impl Memory + ?Sized),
    ) -> Self {
        let mut tuple = Self::with_len(values.len(), memory);
        let Self { header, fields } = &mut tuple;
        // fields equals values in length, no bounds checks needed
        for (field, &value) in fields.iter_mut().zip(values) {
            field.publish(header, value, memory);
        }
        tuple
    }

    /// Allocate a tuple of `size` fields, every one holding `value`.
    pub fn fill(
        size: i64,
        value: Value,
        memory: &mut (impl Memory + ?Sized),
    ) -> ObjectResult<Self> {
        let mut tuple = Self::create(size, memory)?;
        for field in tuple.fields.iter_mut() {
            field.set_within_holder(value);
        }
        // every slot holds the same value, one barrier covers them all
        memory.write_barrier(&tuple.header, value);
        Ok(tuple)
    }

    /// A fresh tuple with the same elements.
    pub fn dup(&self, memory: &mut (impl Memory + ?Sized)) -> Self {
        let values: Vec<Value> = self.values().collect();
        Self::from_values(&values, memory)
    }

    #[inline(always)]
    pub fn identity(&self) -> Value {
        self.header.identity()
    }

    #[inline(always)]
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    #[inline(always)]
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    #[inline]
    pub fn fields(&self) -> &[Field] {
        &self.fields
    }

    pub fn values(&self) -> impl Iterator<Item = Value> + '_ {
        self.fields.iter().map(Field::get)
    }

    fn bounds_exceeded(&self, method: &'static str, index: i64) -> ObjectError {
        ObjectError::BoundsExceeded {
            method,
            index,
            size: self.len(),
        }
    }

    #[inline]
    fn checked_index(&self, method: &'static str, index: i64) -> ObjectResult<usize> {
        match usize::try_from(index) {
            Ok(idx) if idx < self.len() => Ok(idx),
            _ => Err(self.bounds_exceeded(method, index)),
        }
    }

    // ── element access ─────────────────────────────────────────────

    pub fn at(&self, index: i64) -> ObjectResult<Value> {
        let idx = self.checked_index("Tuple::at", index)?;
        Ok(self.fields[idx].get())
    }

    /// Store `value` at `index`, returning it.
    pub fn put(
        &mut self,
        index: i64,
        value: Value,
        memory: &mut (impl Memory + ?Sized),
    ) -> ObjectResult<Value> {
        let idx = self.checked_index("Tuple::put", index)?;
        self.fields[idx].publish(&self.header, value, memory);
        Ok(value)
    }

    // ── bulk operations ────────────────────────────────────────────

    fn validate_copy(
        src_size: usize,
        dst_size: usize,
        start: i64,
        length: i64,
        dest: i64,
    ) -> ObjectResult<CopyRange> {
        const METHOD: &str = "Tuple::copy_from";
        let src_error = |index| ObjectError::BoundsExceeded {
            method: METHOD,
            index,
            size: src_size,
        };
        let dst_error = |index| ObjectError::BoundsExceeded {
            method: METHOD,
            index,
            size: dst_size,
        };

        // left ends must lie within range, the end itself included
        let src = usize::try_from(start)
            .ok()
            .filter(|&s| s <= src_size)
            .ok_or_else(|| src_error(start))?;
        let dst = usize::try_from(dest)
            .ok()
            .filter(|&d| d <= dst_size)
            .ok_or_else(|| dst_error(dest))?;

        // length can not be negative and must fit in source and destination
        let len = usize::try_from(length).map_err(|_| src_error(length))?;
        if len > src_size - src {
            return Err(src_error(start.saturating_add(length)));
        }
        if len > dst_size - dst {
            return Err(dst_error(length));
        }

        Ok(CopyRange { src, dst, len })
    }

    /// Copy `length` elements of `source`, starting at `start`, into this
    /// tuple at `dest`. Each stored element is barriered.
    pub fn copy_from(
        &mut self,
        source: &Tuple,
        start: i64,
        length: i64,
        dest: i64,
        memory: &mut (impl Memory + ?Sized),
    ) -> ObjectResult<()> {
        let range =
            Self::validate_copy(source.len(), self.len(), start, length, dest)?;

        let Self { header, fields } = self;
        let targets = &mut fields[range.dst..range.dst + range.len];
        let sources = &source.fields[range.src..range.src + range.len];
        for (target, value) in targets.iter_mut().zip(sources) {
            target.publish(header, value.get(), memory);
        }
        Ok(())
    }

    /// Move `length` elements starting at `start` to `dest` within this
    /// tuple. Overlapping ranges are handled like `memmove`: the result
    /// holds the original source contents.
    pub fn copy_within(
        &mut self,
        start: i64,
        length: i64,
        dest: i64,
    ) -> ObjectResult<()> {
        let size = self.len();
        let range = Self::validate_copy(size, size, start, length, dest)?;
        if range.src == range.dst || range.len == 0 {
            return Ok(());
        }
        // slice::copy_within walks right to left when dst > src
        self.fields
            .copy_within(range.src..range.src + range.len, range.dst);
        Ok(())
    }

    /// Remove every occurrence of `value` in `[start, start + length)`,
    /// compacting the survivors to the left and nil-filling the vacated
    /// tail of the range. Returns how many elements were removed.
    pub fn delete_matching(
        &mut self,
        start: i64,
        length: i64,
        value: Value,
    ) -> ObjectResult<usize> {
        const METHOD: &str = "Tuple::delete_matching";
        let size = self.len();
        if size == 0 || length == 0 {
            return Ok(0);
        }

        let lo = usize::try_from(start)
            .ok()
            .filter(|&s| s < size)
            .ok_or_else(|| self.bounds_exceeded(METHOD, start))?;
        let end = start.saturating_add(length);
        let hi = usize::try_from(end)
            .ok()
            .filter(|&e| e <= size)
            .ok_or_else(|| self.bounds_exceeded(METHOD, end))?;
        if hi <= lo {
            return Ok(0);
        }

        let range = &mut self.fields[lo..hi];
        let mut kept = 0;
        for idx in 0..range.len() {
            let current = range[idx].get();
            if current != value {
                range[kept].set_within_holder(current);
                kept += 1;
            }
        }
        for field in &mut range[kept..] {
            field.set_within_holder(Value::NIL);
        }
        Ok(range.len() - kept)
    }

    /// Drop the first `shift` elements, moving the rest down and nil-filling
    /// the vacated tail.
    pub fn shift_left(&mut self, shift: usize) {
        let size = self.len();
        if shift == 0 {
            return;
        }
        let shift = shift.min(size);
        self.fields.copy_within(shift.., 0);
        for field in &mut self.fields[size - shift..] {
            field.set_within_holder(Value::NIL);
        }
    }

    /// Reverse `total` elements starting at `start`, clipped to the tuple.
    /// A start outside the tuple or a non-positive total is a no-op.
    pub fn reverse(&mut self, start: i64, total: i64) {
        let size = self.len();
        let Ok(lo) = usize::try_from(start) else {
            return;
        };
        if total <= 0 || lo >= size {
            return;
        }
        let hi = lo.saturating_add(total as usize).min(size);
        self.fields[lo..hi].reverse();
    }

    // ── diagnostics ────────────────────────────────────────────────

    /// Short description: size and the first few elements.
    pub fn show(&self) -> String {
        let mut out = format!("Tuple({})", self.len());
        if self.is_empty() {
            return out;
        }
        let shown: Vec<String> = self
            .values()
            .take(SHOWN_ELEMENTS)
            .map(|value| {
                if value == self.identity() {
                    "<self>".to_owned()
                } else {
                    format!("{value:?}")
                }
            })
            .collect();
        out.push_str(" [");
        out.push_str(&shown.join(", "));
        if self.len() > SHOWN_ELEMENTS {
            out.push_str(", ...");
        }
        out.push(']');
        out
    }
}

impl Traceable for Tuple {
    fn trace_edges(&mut self, tracer: &mut dyn Tracer) {
        let Self { header, fields } = self;
        for field in fields.iter_mut() {
            field.relocate(header, tracer);
        }
    }
}

impl core::fmt::Debug for Tuple {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Tuple")
            .field("header", &self.header)
            .field("fields", &self.fields)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::barrier::recording::RecordingMemory;

    fn fix(n: i64) -> Value {
        Value::from_i64(n)
    }

    fn tuple_of(memory: &mut RecordingMemory, values: &[i64]) -> Tuple {
        let values: Vec<Value> = values.iter().copied().map(fix).collect();
        Tuple::from_values(&values, memory)
    }

    fn contents(tuple: &Tuple) -> Vec<Value> {
        tuple.values().collect()
    }

    #[test]
    fn create_fills_with_nil() {
        let mut memory = RecordingMemory::default();
        let tuple = Tuple::create(4, &mut memory).expect("create");
        assert_eq!(tuple.len(), 4);
        assert!(tuple.values().all(Value::is_nil));
        assert_eq!(tuple.header.object_type(), ObjectType::Tuple);
    }

    #[test]
    fn negative_size_is_an_argument_error() {
        let mut memory = RecordingMemory::default();
        let err = Tuple::create(-1, &mut memory).unwrap_err();
        assert_eq!(err, ObjectError::NegativeSize { size: -1 });
        assert!(Tuple::fill(-3, Value::NIL, &mut memory).is_err());
    }

    #[test]
    fn put_then_at_returns_stored_value() {
        let mut memory = RecordingMemory::default();
        let mut tuple = Tuple::create(5, &mut memory).expect("create");
        for idx in 0..5 {
            tuple.put(idx, fix(idx * 10), &mut memory).expect("put");
        }
        for idx in 0..5 {
            assert_eq!(tuple.at(idx).expect("at"), fix(idx * 10));
        }
    }

    #[test]
    fn out_of_range_access_fails_and_leaves_tuple_alone() {
        let mut memory = RecordingMemory::default();
        let mut tuple = tuple_of(&mut memory, &[1, 2, 3]);
        let before = contents(&tuple);
        let barriers_before = memory.barriers.len();

        for index in [-1, 3, 100, i64::MIN] {
            assert!(matches!(
                tuple.at(index),
                Err(ObjectError::BoundsExceeded { index: i, size: 3, .. }) if i == index
            ));
            assert!(tuple.put(index, fix(9), &mut memory).is_err());
        }

        assert_eq!(contents(&tuple), before);
        assert_eq!(memory.barriers.len(), barriers_before);
    }

    #[test]
    fn bounds_error_message_names_method_index_and_size() {
        let mut memory = RecordingMemory::default();
        let tuple = tuple_of(&mut memory, &[1, 2]);
        let err = tuple.at(7).unwrap_err();
        assert_eq!(err.to_string(), "Tuple::at: index 7 out of bounds for size 2");
    }

    #[test]
    fn put_barriers_with_tuple_as_holder() {
        let mut memory = RecordingMemory::default();
        let mut tuple = Tuple::create(2, &mut memory).expect("create");
        let referent = Value::from_identity(77);
        tuple.put(1, referent, &mut memory).expect("put");
        assert_eq!(memory.barriers, vec![(tuple.identity(), referent)]);
    }

    #[test]
    fn copy_within_right_shift_overlap() {
        let mut memory = RecordingMemory::default();
        let mut tuple = tuple_of(&mut memory, &[1, 2, 3, 4, 5]);
        tuple.copy_within(0, 3, 2).expect("copy");
        assert_eq!(contents(&tuple), [1, 2, 1, 2, 3].map(fix));
    }

    #[test]
    fn copy_within_left_shift_overlap() {
        let mut memory = RecordingMemory::default();
        let mut tuple = tuple_of(&mut memory, &[1, 2, 3, 4, 5]);
        tuple.copy_within(2, 3, 0).expect("copy");
        assert_eq!(contents(&tuple), [3, 4, 5, 4, 5].map(fix));
    }

    #[test]
    fn copy_within_rejects_ranges_past_the_end() {
        let mut memory = RecordingMemory::default();
        let mut tuple = tuple_of(&mut memory, &[1, 2, 3, 4, 5]);
        assert!(tuple.copy_within(3, 3, 0).is_err());
        assert!(tuple.copy_within(0, 3, 4).is_err());
        assert!(tuple.copy_within(0, -1, 0).is_err());
        assert!(tuple.copy_within(6, 0, 0).is_err());
        assert_eq!(contents(&tuple), [1, 2, 3, 4, 5].map(fix));
    }

    #[test]
    fn copy_from_other_tuple_barriers_each_store() {
        let mut memory = RecordingMemory::default();
        let source = Tuple::from_values(
            &[Value::from_identity(50), Value::from_identity(51), fix(3)],
            &mut memory,
        );
        let mut target = Tuple::create(4, &mut memory).expect("create");
        memory.barriers.clear();

        target.copy_from(&source, 0, 3, 1, &mut memory).expect("copy");

        assert_eq!(
            contents(&target),
            vec![
                Value::NIL,
                Value::from_identity(50),
                Value::from_identity(51),
                fix(3)
            ]
        );
        assert_eq!(memory.barriers.len(), 3);
        assert!(memory.barriers.iter().all(|(h, _)| *h == target.identity()));
    }

    #[test]
    fn copy_from_validates_before_touching_anything() {
        let mut memory = RecordingMemory::default();
        let source = tuple_of(&mut memory, &[1, 2, 3]);
        let mut target = tuple_of(&mut memory, &[7, 7]);
        memory.barriers.clear();

        let err = target.copy_from(&source, 0, 3, 0, &mut memory).unwrap_err();
        assert_eq!(
            err,
            ObjectError::BoundsExceeded {
                method: "Tuple::copy_from",
                index: 3,
                size: 2
            }
        );
        let err = target.copy_from(&source, 2, 2, 0, &mut memory).unwrap_err();
        assert!(matches!(err, ObjectError::BoundsExceeded { size: 3, .. }));

        assert_eq!(contents(&target), [7, 7].map(fix));
        assert!(memory.barriers.is_empty());
    }

    #[test]
    fn delete_matching_compacts_and_nils_tail() {
        let mut memory = RecordingMemory::default();
        let mut tuple = tuple_of(&mut memory, &[1, 2, 1, 3, 1]);
        let removed = tuple.delete_matching(0, 5, fix(1)).expect("delete");
        assert_eq!(removed, 3);
        assert_eq!(
            contents(&tuple),
            vec![fix(2), fix(3), Value::NIL, Value::NIL, Value::NIL]
        );
    }

    #[test]
    fn delete_matching_only_touches_its_range() {
        let mut memory = RecordingMemory::default();
        let mut tuple = tuple_of(&mut memory, &[1, 1, 2, 1, 1]);
        let removed = tuple.delete_matching(1, 3, fix(1)).expect("delete");
        assert_eq!(removed, 2);
        assert_eq!(
            contents(&tuple),
            vec![fix(1), fix(2), Value::NIL, Value::NIL, fix(1)]
        );
    }

    #[test]
    fn delete_matching_without_match_is_a_no_op() {
        let mut memory = RecordingMemory::default();
        let mut tuple = tuple_of(&mut memory, &[4, 5, 6]);
        assert_eq!(tuple.delete_matching(0, 3, fix(9)).expect("delete"), 0);
        assert_eq!(contents(&tuple), [4, 5, 6].map(fix));
    }

    #[test]
    fn delete_matching_bounds() {
        let mut memory = RecordingMemory::default();
        let mut tuple = tuple_of(&mut memory, &[1, 2, 3]);
        assert!(tuple.delete_matching(3, 1, fix(1)).is_err());
        assert!(tuple.delete_matching(-1, 2, fix(1)).is_err());
        assert!(tuple.delete_matching(1, 5, fix(1)).is_err());
        assert_eq!(tuple.delete_matching(0, 0, fix(1)).expect("empty"), 0);

        let mut empty = Tuple::create(0, &mut memory).expect("create");
        assert_eq!(empty.delete_matching(5, 5, fix(1)).expect("empty"), 0);
    }

    #[test]
    fn shift_left_drops_prefix() {
        let mut memory = RecordingMemory::default();
        let mut tuple = tuple_of(&mut memory, &[1, 2, 3, 4]);
        tuple.shift_left(1);
        assert_eq!(
            contents(&tuple),
            vec![fix(2), fix(3), fix(4), Value::NIL]
        );
        tuple.shift_left(10);
        assert!(tuple.values().all(Value::is_nil));
    }

    #[test]
    fn reverse_is_clipped_to_bounds() {
        let mut memory = RecordingMemory::default();
        let mut tuple = tuple_of(&mut memory, &[1, 2, 3, 4, 5]);
        tuple.reverse(1, 2);
        assert_eq!(contents(&tuple), [1, 3, 2, 4, 5].map(fix));
        tuple.reverse(2, 100);
        assert_eq!(contents(&tuple), [1, 3, 5, 4, 2].map(fix));
        tuple.reverse(5, 2);
        tuple.reverse(-1, 2);
        tuple.reverse(0, 0);
        assert_eq!(contents(&tuple), [1, 3, 5, 4, 2].map(fix));
    }

    #[test]
    fn fill_uses_a_single_barrier() {
        let mut memory = RecordingMemory::default();
        let referent = Value::from_identity(9);
        let tuple = Tuple::fill(6, referent, &mut memory).expect("fill");
        assert!(tuple.values().all(|v| v == referent));
        assert_eq!(memory.barriers, vec![(tuple.identity(), referent)]);
    }

    #[test]
    fn dup_has_new_identity_and_same_contents() {
        let mut memory = RecordingMemory::default();
        let tuple = tuple_of(&mut memory, &[1, 2, 3]);
        let copy = tuple.dup(&mut memory);
        assert_ne!(copy.identity(), tuple.identity());
        assert_eq!(contents(&copy), contents(&tuple));
    }

    #[test]
    fn tracing_relocates_moved_elements() {
        let mut memory = RecordingMemory::default();
        let old = Value::from_identity(40);
        let new = Value::from_identity(41);
        let mut tuple = Tuple::from_values(&[old, fix(1), old], &mut memory);
        memory.barriers.clear();
        memory.forwarding.push((old, new));

        tuple.trace_edges(&mut memory);

        assert_eq!(contents(&tuple), vec![new, fix(1), new]);
        // fixnums are never handed to the tracer
        assert_eq!(memory.marked, vec![old, old]);
        assert_eq!(
            memory.barriers,
            vec![(tuple.identity(), new), (tuple.identity(), new)]
        );
    }

    #[test]
    fn show_elides_after_six_elements() {
        let mut memory = RecordingMemory::default();
        let tuple = tuple_of(&mut memory, &[1, 2, 3, 4, 5, 6, 7, 8]);
        assert_eq!(
            tuple.show(),
            "Tuple(8) [Fixnum(1), Fixnum(2), Fixnum(3), Fixnum(4), Fixnum(5), Fixnum(6), ...]"
        );
        let empty = Tuple::create(0, &mut memory).expect("create");
        assert_eq!(empty.show(), "Tuple(0)");
    }
}
