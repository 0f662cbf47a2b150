//! Polymorphic inline cache.
//!
//! A call site that has seen more than one receiver class keeps up to `N`
//! cache entries, one per class, each with its own hit counter. Lookup is
//! a linear scan over the slots; misses fall back to the resolver and
//! teach the cache the new class, unless all slots are taken, in which
//! case the refusal is only counted.

use garnet_object::{
    Field, Header, Memory, ObjectType, Symbol, Traceable, Tracer, Value,
};

use crate::{
    Arguments, CacheEntry, ClassData, ClassModel, Dispatch, LookupKind, MonoInlineCache,
    Runtime, VmResult, cache_entry::class_label,
};

/// Receiver classes one polymorphic cache tracks by default.
pub const TRACKED_IC_HITS: usize = 3;

/// One slot of an [`InlineCache`].
#[derive(Debug, Default)]
pub struct InlineCacheHit {
    entry: Option<Box<CacheEntry>>,
    hits: u32,
}

impl InlineCacheHit {
    #[inline(always)]
    pub fn entry(&self) -> Option<&CacheEntry> {
        self.entry.as_deref()
    }

    #[inline(always)]
    pub fn hits(&self) -> u32 {
        self.hits
    }

    #[inline(always)]
    pub fn is_empty(&self) -> bool {
        self.entry.is_none()
    }

    #[inline(always)]
    fn caches(&self, receiver_class: Value) -> bool {
        self.entry
            .as_deref()
            .is_some_and(|entry| entry.caches_class(receiver_class))
    }

    #[inline(always)]
    fn matches(&self, receiver_class: Value, receiver_data: ClassData) -> bool {
        self.entry
            .as_deref()
            .is_some_and(|entry| entry.matches(receiver_class, receiver_data))
    }

    #[inline(always)]
    fn hit(&mut self) {
        self.hits = self.hits.saturating_add(1);
    }

    /// Install `entry` with a fresh hit history.
    fn assign(&mut self, entry: Box<CacheEntry>) {
        self.entry = Some(entry);
        self.hits = 0;
    }
}

pub struct InlineCache<const N: usize = TRACKED_IC_HITS> {
    pub header: Header,
    name: Symbol,
    ip: u32,
    executable: Field,
    fallback: LookupKind,
    slots: [InlineCacheHit; N],
    seen_classes_overflow: u32,
}

impl<const N: usize> InlineCache<N> {
    pub fn new(
        name: Symbol,
        ip: u32,
        executable: Value,
        fallback: LookupKind,
        memory: &mut (impl Memory + ?Sized),
    ) -> Self {
        assert!(N > 0, "an inline cache needs at least one slot");
        let header = memory.allocate_header(ObjectType::InlineCache);
        let mut executable_field = Field::nil();
        executable_field.publish(&header, executable, memory);
        Self {
            header,
            name,
            ip,
            executable: executable_field,
            fallback,
            slots: std::array::from_fn(|_| InlineCacheHit::default()),
            seen_classes_overflow: 0,
        }
    }

    /// Upgrade a monomorphic cache. The mono entry moves into slot 0 as a
    /// freshly built entry; its hit history does not carry over.
    pub fn promote_from(
        mono: &MonoInlineCache,
        memory: &mut (impl Memory + ?Sized),
    ) -> Self {
        let mut cache = Self::new(
            mono.name(),
            mono.ip(),
            mono.executable(),
            mono.fallback(),
            memory,
        );
        let source = mono.entry();
        let entry = CacheEntry::create(
            source.receiver_data(),
            source.receiver_class(),
            &source.to_dispatch(mono.name()),
            memory,
        );
        let identity = entry.identity();
        cache.slots[0].assign(Box::new(entry));
        memory.write_barrier(&cache.header, identity);
        log::debug!(
            "promoted call site {:?}@{} to a polymorphic cache",
            cache.name,
            cache.ip
        );
        cache
    }

    #[inline(always)]
    pub fn identity(&self) -> Value {
        self.header.identity()
    }

    #[inline(always)]
    pub fn name(&self) -> Symbol {
        self.name
    }

    #[inline(always)]
    pub fn ip(&self) -> u32 {
        self.ip
    }

    #[inline(always)]
    pub fn executable(&self) -> Value {
        self.executable.get()
    }

    #[inline(always)]
    pub fn fallback(&self) -> LookupKind {
        self.fallback
    }

    #[inline]
    pub fn slots(&self) -> &[InlineCacheHit] {
        &self.slots
    }

    pub fn entries(&self) -> impl Iterator<Item = &CacheEntry> + '_ {
        self.slots.iter().filter_map(InlineCacheHit::entry)
    }

    /// Number of occupied slots.
    pub fn classes_seen(&self) -> usize {
        self.slots.iter().filter(|slot| !slot.is_empty()).count()
    }

    /// Resolutions that could not be cached because every slot was taken.
    #[inline]
    pub fn overflows(&self) -> u32 {
        self.seen_classes_overflow
    }

    #[inline]
    pub fn is_megamorphic(&self) -> bool {
        self.seen_classes_overflow > 0
    }

    /// Total hits over all slots.
    pub fn hits(&self) -> u64 {
        self.slots.iter().map(|slot| u64::from(slot.hits)).sum()
    }

    /// The entry for `receiver_class` without counting a hit, stale or not.
    pub fn entry_for(&self, receiver_class: Value) -> Option<&CacheEntry> {
        self.slots
            .iter()
            .find(|slot| slot.caches(receiver_class))
            .and_then(InlineCacheHit::entry)
    }

    // ── Lookup ────────────────────────────────────────────────────────

    /// Find the entry for `receiver_class` and count the hit. An entry
    /// built against other class data than `receiver_data` is stale and
    /// misses.
    #[inline]
    pub fn lookup(
        &mut self,
        receiver_class: Value,
        receiver_data: ClassData,
    ) -> Option<&CacheEntry> {
        for slot in self.slots.iter_mut() {
            if slot.matches(receiver_class, receiver_data) {
                slot.hit();
                return slot.entry.as_deref();
            }
        }
        None
    }

    /// Call through the cache, resolving and learning on a miss.
    pub fn dispatch(
        &mut self,
        runtime: &mut (impl Runtime + ?Sized),
        args: &mut Arguments,
    ) -> VmResult<Value> {
        let receiver_class = runtime.class_of(args.receiver());
        let receiver_data = runtime.class_data(receiver_class);
        let name = self.name;
        if let Some(entry) = self.lookup(receiver_class, receiver_data) {
            log::trace!("inline cache hit for {name:?} on {receiver_class:?}");
            let dispatch = entry.to_dispatch(name);
            return dispatch.invoke(runtime, args);
        }

        let dispatch = runtime.resolve(args.receiver(), name, self.fallback)?;
        self.update(receiver_class, &dispatch, runtime);
        dispatch.invoke(runtime, args)
    }

    // ── Update ────────────────────────────────────────────────────────

    /// Record that receivers of `receiver_class` resolve to `dispatch`.
    ///
    /// A slot already caching the class is replaced, which is how a stale
    /// entry gets refreshed; otherwise the first empty slot is used. A full
    /// cache evicts nothing and counts the refusal as an overflow.
    pub fn update(
        &mut self,
        receiver_class: Value,
        dispatch: &Dispatch,
        runtime: &mut (impl Memory + ClassModel + ?Sized),
    ) {
        debug_assert_eq!(dispatch.name, self.name, "dispatch for another call site");
        let slot = self
            .slots
            .iter()
            .position(|slot| slot.caches(receiver_class))
            .or_else(|| self.slots.iter().position(InlineCacheHit::is_empty));

        let Some(index) = slot else {
            self.seen_classes_overflow = self.seen_classes_overflow.saturating_add(1);
            if self.seen_classes_overflow == 1 {
                log::warn!(
                    "inline cache for {:?}@{} is full ({N} classes), {:?} not cached",
                    self.name,
                    self.ip,
                    receiver_class
                );
            }
            return;
        };

        let receiver_data = runtime.class_data(receiver_class);
        let entry = CacheEntry::create(receiver_data, receiver_class, dispatch, runtime);
        let identity = entry.identity();
        self.slots[index].assign(Box::new(entry));
        runtime.write_barrier(&self.header, identity);
        log::debug!(
            "inline cache {:?}@{} slot {index} now caches {receiver_class:?}",
            self.name,
            self.ip
        );
    }

    // ── Diagnostics ───────────────────────────────────────────────────

    pub fn describe(&self, classes: &(impl ClassModel + ?Sized)) -> String {
        let mut out = format!(
            "name: {}\nseen classes: {}\noverflows: {}\nclasses:\n",
            classes.symbol_name(self.name),
            self.classes_seen(),
            self.seen_classes_overflow
        );
        for slot in &self.slots {
            if let Some(entry) = slot.entry() {
                out.push_str("  ");
                out.push_str(&class_label(classes, entry.receiver_class()));
                out.push_str(&format!(" ({} hits)\n", slot.hits));
            }
        }
        out
    }
}

impl<const N: usize> Traceable for InlineCache<N> {
    fn trace_edges(&mut self, tracer: &mut dyn Tracer) {
        let Self {
            header,
            executable,
            slots,
            ..
        } = self;
        executable.relocate(header, tracer);
        for slot in slots.iter_mut() {
            let Some(entry) = slot.entry.as_deref() else {
                continue;
            };
            if let Some(replacement) = entry.traced(tracer) {
                let identity = replacement.identity();
                slot.entry = Some(Box::new(replacement));
                tracer.just_set(header, identity);
            }
        }
    }
}

impl<const N: usize> core::fmt::Debug for InlineCache<N> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("InlineCache")
            .field("identity", &self.identity())
            .field("name", &self.name)
            .field("ip", &self.ip)
            .field("slots", &self.slots)
            .field("overflows", &self.seen_classes_overflow)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{MethodMissingReason, simulation::Simulation};

    fn cache<const N: usize>(sim: &mut Simulation, name: &str) -> InlineCache<N> {
        let name = sim.symbols.intern(name);
        InlineCache::new(name, 4, Value::from_identity(500), LookupKind::Normal, sim)
    }

    #[test]
    fn empty_cache_misses() {
        let mut sim = Simulation::new();
        let a = sim.define_class("A");
        let mut ic = cache::<3>(&mut sim, "foo");
        assert!(ic.lookup(a, sim.class_data(a)).is_none());
        assert_eq!(ic.classes_seen(), 0);
        assert_eq!(ic.hits(), 0);
    }

    #[test]
    fn update_then_lookup_hits() {
        let mut sim = Simulation::new();
        let a = sim.define_class("A");
        let method = sim.define_method(a, "foo", 10);
        let mut ic = cache::<3>(&mut sim, "foo");
        let dispatch = Dispatch::new(ic.name(), a, method);
        ic.update(a, &dispatch, &mut sim);

        let entry = ic.lookup(a, sim.class_data(a)).expect("cached");
        assert_eq!(entry.method(), method);
        assert_eq!(entry.stored_module(), a);
        assert_eq!(entry.receiver_data(), sim.class_data(a));
        assert_eq!(ic.slots()[0].hits(), 1);
        assert_eq!(ic.classes_seen(), 1);
    }

    #[test]
    fn refreshing_a_class_replaces_its_slot() {
        let mut sim = Simulation::new();
        let a = sim.define_class("A");
        let old = sim.define_method(a, "foo", 1);
        let mut ic = cache::<2>(&mut sim, "foo");
        ic.update(a, &Dispatch::new(ic.name(), a, old), &mut sim);
        ic.lookup(a, sim.class_data(a));

        let new = sim.define_method(a, "foo", 2);
        ic.update(a, &Dispatch::new(ic.name(), a, new), &mut sim);
        assert_eq!(ic.classes_seen(), 1);
        assert_eq!(ic.slots()[0].hits(), 0);
        assert_eq!(ic.entry_for(a).map(CacheEntry::method), Some(new));
    }

    #[test]
    fn stale_entries_miss_until_refreshed() {
        let mut sim = Simulation::new();
        let a = sim.define_class("A");
        let old = sim.define_method(a, "foo", 1);
        let mut ic = cache::<2>(&mut sim, "foo");
        ic.update(a, &Dispatch::new(ic.name(), a, old), &mut sim);
        let stale = sim.class_data(a);

        sim.define_method(a, "foo", 2);
        assert!(ic.lookup(a, sim.class_data(a)).is_none());
        assert!(ic.lookup(a, stale).is_some());

        let receiver = sim.instantiate(a);
        let mut args = Arguments::new(ic.name(), receiver, vec![]);
        assert_eq!(ic.dispatch(&mut sim, &mut args), Ok(Value::from_i64(2)));
        assert_eq!(sim.stats.resolutions, 1);
        assert_eq!(ic.classes_seen(), 1);
        assert_eq!(ic.overflows(), 0);
        assert!(ic.lookup(a, sim.class_data(a)).is_some());
    }

    #[test]
    fn every_refused_resolution_counts_as_an_overflow() {
        let mut sim = Simulation::new();
        let classes: Vec<Value> = ["A", "B", "C"]
            .iter()
            .map(|name| {
                let class = sim.define_class(name);
                sim.define_method(class, "foo", 0);
                class
            })
            .collect();
        let mut ic = cache::<2>(&mut sim, "foo");
        for index in [0, 1, 2, 2] {
            let receiver = sim.instantiate(classes[index]);
            let mut args = Arguments::new(ic.name(), receiver, vec![]);
            ic.dispatch(&mut sim, &mut args).expect("dispatch");
        }
        assert_eq!(ic.overflows(), 2);
        assert_eq!(sim.stats.resolutions, 4);
    }

    #[test]
    fn full_cache_counts_overflow_without_evicting() {
        let mut sim = Simulation::new();
        let classes: Vec<Value> = ["A", "B", "C"]
            .iter()
            .map(|name| sim.define_class(name))
            .collect();
        let mut ic = cache::<2>(&mut sim, "foo");
        for &class in &classes {
            let method = sim.define_method(class, "foo", 0);
            ic.update(class, &Dispatch::new(ic.name(), class, method), &mut sim);
        }
        assert_eq!(ic.classes_seen(), 2);
        assert_eq!(ic.overflows(), 1);
        assert!(ic.is_megamorphic());
        // still the entries that were installed, not copies
        let first = ic.slots()[0].entry().map(|e| e as *const CacheEntry);
        let data: Vec<ClassData> = classes.iter().map(|&c| sim.class_data(c)).collect();
        let hit = ic.lookup(classes[0], data[0]).map(|e| e as *const CacheEntry);
        assert_eq!(hit, first);
        assert!(ic.lookup(classes[1], data[1]).is_some());
        assert!(ic.lookup(classes[2], data[2]).is_none());
    }

    #[test]
    fn update_publishes_entry_and_slot_with_barriers() {
        let mut sim = Simulation::new();
        let a = sim.define_class("A");
        let method = sim.define_method(a, "foo", 0);
        let mut ic = cache::<3>(&mut sim, "foo");
        let before = sim.heap.barrier_stats().barriers;
        ic.update(a, &Dispatch::new(ic.name(), a, method), &mut sim);
        // class, module and method into the entry, the entry into the cache
        assert_eq!(sim.heap.barrier_stats().barriers - before, 4);
    }

    #[test]
    fn dispatch_resolves_once_then_hits() {
        let mut sim = Simulation::new();
        let a = sim.define_class("A");
        sim.define_method(a, "foo", 42);
        let receiver = sim.instantiate(a);
        let mut ic = cache::<3>(&mut sim, "foo");

        for _ in 0..3 {
            let mut args = Arguments::new(ic.name(), receiver, vec![]);
            let result = ic.dispatch(&mut sim, &mut args).expect("dispatch");
            assert_eq!(result, Value::from_i64(42));
        }
        assert_eq!(sim.stats.resolutions, 1);
        assert_eq!(sim.stats.executions, 3);
        assert_eq!(ic.hits(), 2);
    }

    #[test]
    fn method_missing_hit_prepends_the_name() {
        let mut sim = Simulation::new();
        let a = sim.define_class("A");
        sim.define_method(a, "method_missing", 7);
        let receiver = sim.instantiate(a);
        let mut ic = cache::<3>(&mut sim, "bar");

        for _ in 0..2 {
            let mut args =
                Arguments::new(ic.name(), receiver, vec![Value::from_i64(1)]);
            ic.dispatch(&mut sim, &mut args).expect("dispatch");
            assert_eq!(args.values()[0], ic.name().to_value());
            assert_eq!(args.len(), 2);
            assert_eq!(sim.last_missing_reason(), MethodMissingReason::Normal);
        }
        assert_eq!(
            ic.entry_for(a).map(CacheEntry::method_missing),
            Some(MethodMissingReason::Normal)
        );
    }

    #[test]
    fn resolver_errors_propagate() {
        let mut sim = Simulation::new();
        let a = sim.define_class("A");
        let receiver = sim.instantiate(a);
        let mut ic = cache::<3>(&mut sim, "nope");
        let mut args = Arguments::new(ic.name(), receiver, vec![]);
        let err = ic.dispatch(&mut sim, &mut args).expect_err("no method");
        assert!(matches!(err, crate::VmError::NoMethod { .. }));
        assert_eq!(ic.classes_seen(), 0);
    }

    #[test]
    fn promotion_moves_the_mono_entry_into_slot_zero() {
        let mut sim = Simulation::new();
        let a = sim.define_class("A");
        let method = sim.define_method(a, "foo", 1);
        let name = sim.symbols.intern("foo");
        let mut mono = MonoInlineCache::new(
            name,
            8,
            Value::from_identity(500),
            LookupKind::Private,
            a,
            &Dispatch::new(name, a, method),
            &mut sim,
        );
        mono.lookup(a, sim.class_data(a));

        let ic = InlineCache::<3>::promote_from(&mono, &mut sim);
        assert_eq!(ic.name(), name);
        assert_eq!(ic.ip(), 8);
        assert_eq!(ic.fallback(), LookupKind::Private);
        assert_eq!(ic.executable(), Value::from_identity(500));
        assert_eq!(ic.slots()[0].hits(), 0);
        let entry = ic.slots()[0].entry().expect("slot 0");
        assert_eq!(entry.method(), method);
        assert_ne!(entry.identity(), mono.entry().identity());
        assert!(ic.slots()[1..].iter().all(InlineCacheHit::is_empty));

        let mut ic = ic;
        let receiver = sim.instantiate(a);
        let mut args = Arguments::new(name, receiver, vec![]);
        let resolutions = sim.stats.resolutions;
        assert_eq!(ic.dispatch(&mut sim, &mut args), Ok(Value::from_i64(1)));
        assert_eq!(sim.stats.resolutions, resolutions);
        assert_eq!(ic.slots()[0].hits(), 1);
    }

    #[test]
    fn describe_names_classes_and_singletons() {
        let mut sim = Simulation::new();
        let a = sim.define_class("Alpha");
        let object = sim.instantiate(a);
        let singleton = sim.singleton_class_of(object);
        let mut ic = cache::<3>(&mut sim, "each");
        for class in [a, singleton] {
            let method = sim.define_method(class, "each", 0);
            ic.update(class, &Dispatch::new(ic.name(), class, method), &mut sim);
        }
        let text = ic.describe(&sim);
        assert!(text.starts_with("name: each\nseen classes: 2\noverflows: 0\n"));
        assert!(text.contains("  Alpha (0 hits)\n"));
        assert!(text.contains("  SingletonClass:#<Alpha>"));
    }

    #[test]
    fn tracing_replaces_moved_entries() {
        let mut sim = Simulation::new();
        let a = sim.define_class("A");
        let method = sim.define_method(a, "foo", 0);
        let mut ic = cache::<3>(&mut sim, "foo");
        ic.update(a, &Dispatch::new(ic.name(), a, method), &mut sim);
        ic.lookup(a, sim.class_data(a));
        let old_entry = ic.slots()[0].entry().map(CacheEntry::identity);

        let mut evacuation = sim.heap.evacuate();
        let moved_method = evacuation.relocate(method);
        evacuation.trace(&mut ic);
        let stats = evacuation.finish();

        let slot = &ic.slots()[0];
        let entry = slot.entry().expect("still cached");
        assert_eq!(entry.method(), moved_method);
        assert_eq!(Some(entry.identity()), old_entry);
        assert_eq!(slot.hits(), 1);
        // the method field and the slot were both rewritten
        assert_eq!(stats.relocated, 2);
    }
}
