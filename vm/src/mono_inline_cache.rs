use garnet_object::{Field, Header, Memory, ObjectType, Symbol, Traceable, Tracer, Value};

use crate::{
    Arguments, CacheEntry, ClassData, ClassModel, Dispatch, LookupKind,
    MethodMissingReason, Runtime, VmResult, cache_entry::class_label,
};

/// A call site that has only ever seen one receiver class.
///
/// It owns exactly one entry and never learns a second class. A miss on a
/// new class is the caller's cue to promote to an [`crate::InlineCache`];
/// a miss on the cached class means the entry went stale and is rebuilt.
pub struct MonoInlineCache {
    pub header: Header,
    name: Symbol,
    ip: u32,
    executable: Field,
    fallback: LookupKind,
    entry: CacheEntry,
    hits: u32,
}

impl MonoInlineCache {
    pub fn new(
        name: Symbol,
        ip: u32,
        executable: Value,
        fallback: LookupKind,
        receiver_class: Value,
        dispatch: &Dispatch,
        runtime: &mut (impl Memory + ClassModel + ?Sized),
    ) -> Self {
        let header = runtime.allocate_header(ObjectType::MonoInlineCache);
        let receiver_data = runtime.class_data(receiver_class);
        let entry = CacheEntry::create(receiver_data, receiver_class, dispatch, runtime);

        let mut executable_field = Field::nil();
        executable_field.publish(&header, executable, runtime);
        runtime.write_barrier(&header, entry.identity());
        log::debug!("call site {name:?}@{ip} is monomorphic on {receiver_class:?}");
        Self {
            header,
            name,
            ip,
            executable: executable_field,
            fallback,
            entry,
            hits: 0,
        }
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

    #[inline(always)]
    pub fn entry(&self) -> &CacheEntry {
        &self.entry
    }

    #[inline(always)]
    pub fn hits(&self) -> u32 {
        self.hits
    }

    pub fn receiver_class(&self) -> Value {
        self.entry.receiver_class()
    }

    pub fn receiver_data(&self) -> ClassData {
        self.entry.receiver_data()
    }

    pub fn stored_module(&self) -> Value {
        self.entry.stored_module()
    }

    pub fn method(&self) -> Value {
        self.entry.method()
    }

    pub fn method_missing(&self) -> MethodMissingReason {
        self.entry.method_missing()
    }

    /// A hit needs both the class and its current class data to match.
    #[inline]
    pub fn lookup(
        &mut self,
        receiver_class: Value,
        receiver_data: ClassData,
    ) -> Option<&CacheEntry> {
        if self.entry.matches(receiver_class, receiver_data) {
            self.hits = self.hits.saturating_add(1);
            Some(&self.entry)
        } else {
            None
        }
    }

    /// Call through the cache. Returns `None` on a miss without touching
    /// `args`; the caller resolves and promotes.
    pub fn dispatch(
        &mut self,
        runtime: &mut (impl Runtime + ?Sized),
        args: &mut Arguments,
    ) -> Option<VmResult<Value>> {
        let receiver_class = runtime.class_of(args.receiver());
        let receiver_data = runtime.class_data(receiver_class);
        let name = self.name;
        let dispatch = self.lookup(receiver_class, receiver_data)?.to_dispatch(name);
        Some(dispatch.invoke(runtime, args))
    }

    pub fn describe(&self, classes: &(impl ClassModel + ?Sized)) -> String {
        format!(
            "name: {}\nclass: {} ({} hits)\n",
            classes.symbol_name(self.name),
            class_label(classes, self.receiver_class()),
            self.hits
        )
    }
}

impl Traceable for MonoInlineCache {
    fn trace_edges(&mut self, tracer: &mut dyn Tracer) {
        self.executable.relocate(&self.header, tracer);
        if let Some(replacement) = self.entry.traced(tracer) {
            let identity = replacement.identity();
            self.entry = replacement;
            tracer.just_set(&self.header, identity);
        }
    }
}

impl core::fmt::Debug for MonoInlineCache {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("MonoInlineCache")
            .field("identity", &self.identity())
            .field("name", &self.name)
            .field("ip", &self.ip)
            .field("entry", &self.entry)
            .field("hits", &self.hits)
            .finish()
    }
}
