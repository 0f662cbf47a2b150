use garnet_object::{Field, Header, Memory, ObjectType, Symbol, Tracer, Value};

use crate::{ClassData, ClassModel, Dispatch, MethodMissingReason};

/// One cached resolution: "receivers of this class run this method".
///
/// ```text
/// [Header] [receiver_data] [receiver_class] [stored_module] [method] [method_missing]
/// ```
///
/// Entries are never edited once built. A cache that learns something new
/// builds a fresh entry and publishes it into a slot, so a reader sees
/// either the old entry or the new one.
pub struct CacheEntry {
    pub header: Header,
    receiver_data: ClassData,
    receiver_class: Field,
    stored_module: Field,
    method: Field,
    method_missing: MethodMissingReason,
}

impl CacheEntry {
    pub fn create(
        receiver_data: ClassData,
        receiver_class: Value,
        dispatch: &Dispatch,
        memory: &mut (impl Memory + ?Sized),
    ) -> Self {
        assert!(
            receiver_class.is_ref(),
            "cache entries are keyed by a class reference, got {receiver_class:?}"
        );
        let mut entry = Self {
            header: memory.allocate_header(ObjectType::CacheEntry),
            receiver_data,
            receiver_class: Field::nil(),
            stored_module: Field::nil(),
            method: Field::nil(),
            method_missing: dispatch.method_missing,
        };
        let Self {
            header,
            receiver_class: class_field,
            stored_module,
            method,
            ..
        } = &mut entry;
        class_field.publish(header, receiver_class, memory);
        stored_module.publish(header, dispatch.module, memory);
        method.publish(header, dispatch.method, memory);
        entry
    }

    #[inline(always)]
    pub fn identity(&self) -> Value {
        self.header.identity()
    }

    #[inline(always)]
    pub fn receiver_data(&self) -> ClassData {
        self.receiver_data
    }

    #[inline(always)]
    pub fn receiver_class(&self) -> Value {
        self.receiver_class.get()
    }

    #[inline(always)]
    pub fn stored_module(&self) -> Value {
        self.stored_module.get()
    }

    #[inline(always)]
    pub fn method(&self) -> Value {
        self.method.get()
    }

    #[inline(always)]
    pub fn method_missing(&self) -> MethodMissingReason {
        self.method_missing
    }

    /// Whether the entry was built for `receiver_class`, current or not.
    #[inline(always)]
    pub fn caches_class(&self, receiver_class: Value) -> bool {
        self.receiver_class.get() == receiver_class
    }

    /// Whether the entry may serve a receiver of `receiver_class` whose
    /// class currently carries `receiver_data`.
    #[inline(always)]
    pub fn matches(&self, receiver_class: Value, receiver_data: ClassData) -> bool {
        self.receiver_data == receiver_data && self.caches_class(receiver_class)
    }

    /// The resolution this entry caches, for a call site named `name`.
    #[inline]
    pub fn to_dispatch(&self, name: Symbol) -> Dispatch {
        Dispatch::missing(
            name,
            self.stored_module(),
            self.method(),
            self.method_missing,
        )
    }

    /// Mark the entry and its references. Returns the entry that must
    /// replace this one when anything moved.
    pub(crate) fn traced(&self, tracer: &mut dyn Tracer) -> Option<CacheEntry> {
        let identity = tracer.mark(self.identity()).unwrap_or(self.identity());
        let mut changed = identity != self.identity();

        let mut replacement = Self {
            header: self.header.relocated(identity),
            receiver_data: self.receiver_data,
            receiver_class: self.receiver_class,
            stored_module: self.stored_module,
            method: self.method,
            method_missing: self.method_missing,
        };

        let Self {
            header,
            receiver_class,
            stored_module,
            method,
            ..
        } = &mut replacement;
        for field in [receiver_class, stored_module, method] {
            changed |= field.relocate(header, tracer);
        }
        changed.then_some(replacement)
    }
}

impl core::fmt::Debug for CacheEntry {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("CacheEntry")
            .field("identity", &self.identity())
            .field("receiver_data", &self.receiver_data)
            .field("receiver_class", &self.receiver_class)
            .field("stored_module", &self.stored_module)
            .field("method", &self.method)
            .field("method_missing", &self.method_missing)
            .finish()
    }
}

/// Diagnostic name of a receiver class. Singleton classes are named after
/// the object they are attached to.
pub(crate) fn class_label(classes: &(impl ClassModel + ?Sized), class: Value) -> String {
    match classes.attached_instance(class) {
        Some(attached) => format!("SingletonClass:{}", classes.debug_name(attached)),
        None => classes.debug_name(class),
    }
}
