use std::sync::atomic::{AtomicU8, Ordering};

use bitflags::bitflags;

use crate::Value;

/// Kind of a collector-managed object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ObjectType {
    Tuple = 0,
    CacheEntry,
    MonoInlineCache,
    InlineCache,
    CallSite,
    CompiledCode,
    /// Managed by the embedding runtime (classes, methods, instances). Only
    /// its identity is visible here.
    Foreign,
}

impl ObjectType {
    pub const COUNT: usize = Self::Foreign as usize + 1;
}

bitflags! {
    /// GC / bookkeeping flags stored atomically in the header.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct HeaderFlags: u8 {
        const REMEMBERED = 1 << 0;
        const MARKED = 1 << 1;
        const PINNED = 1 << 2;
    }
}

/// The header at the start of every collector-managed object.
///
/// ```text
/// identity: Value   reference the collector knows this object by
/// type:     u8      ObjectType
/// flags:    u8      (atomic) Remembered | Marked | Pinned
/// age:      u8      (atomic) GC generation counter
/// ```
///
/// Only a [`Memory`](crate::Memory) hands out headers, so every object
/// that can hold references has an identity the write barrier can name.
/// The one exception is [`Header::relocated`], used while tracing when the
/// collector has already chosen the new identity.
pub struct Header {
    identity: Value,
    object_type: ObjectType,
    flags: AtomicU8,
    age: AtomicU8,
}

impl Header {
    pub fn new(object_type: ObjectType, identity: Value) -> Self {
        debug_assert!(identity.is_ref(), "header identity must be a reference");
        Self {
            identity,
            object_type,
            flags: AtomicU8::new(0),
            age: AtomicU8::new(0),
        }
    }

    /// The header of this object after the collector moved it to
    /// `identity`. Age and flags carry over, except REMEMBERED: the moved
    /// object has not been recorded yet.
    pub fn relocated(&self, identity: Value) -> Self {
        let moved = Self::new(self.object_type, identity);
        moved.set_age(self.age());
        moved.add_flag(self.flags() - HeaderFlags::REMEMBERED);
        moved
    }

    #[inline(always)]
    pub fn identity(&self) -> Value {
        self.identity
    }

    #[inline(always)]
    pub fn object_type(&self) -> ObjectType {
        self.object_type
    }

    // ── flags ──────────────────────────────────────────────────────

    #[inline(always)]
    pub fn flags(&self) -> HeaderFlags {
        HeaderFlags::from_bits_truncate(self.flags.load(Ordering::Relaxed))
    }

    #[inline(always)]
    pub fn has_flag(&self, flag: HeaderFlags) -> bool {
        self.flags().contains(flag)
    }

    #[inline(always)]
    pub fn add_flag(&self, flag: HeaderFlags) {
        self.flags.fetch_or(flag.bits(), Ordering::Relaxed);
    }

    #[inline(always)]
    pub fn remove_flag(&self, flag: HeaderFlags) {
        self.flags.fetch_and(!flag.bits(), Ordering::Relaxed);
    }

    /// Atomically OR flags and return the *previous* flags value.
    #[inline(always)]
    pub fn fetch_or_flags(&self, flag: HeaderFlags) -> HeaderFlags {
        HeaderFlags::from_bits_truncate(
            self.flags.fetch_or(flag.bits(), Ordering::Relaxed),
        )
    }

    // ── age ────────────────────────────────────────────────────────

    #[inline(always)]
    pub fn age(&self) -> u8 {
        self.age.load(Ordering::Relaxed)
    }

    #[inline(always)]
    pub fn set_age(&self, age: u8) {
        self.age.store(age, Ordering::Relaxed);
    }

    #[inline(always)]
    pub fn increment_age(&self) -> u8 {
        self.age.fetch_add(1, Ordering::Relaxed)
    }
}

impl core::fmt::Debug for Header {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Header")
            .field("identity", &self.identity)
            .field("type", &self.object_type)
            .field("flags", &self.flags())
            .field("age", &self.age())
            .finish()
    }
}
