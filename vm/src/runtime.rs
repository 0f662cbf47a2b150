//! What the dispatch layer needs from the rest of the VM.
//!
//! Class hierarchy, method lookup and method execution live outside this
//! crate. Call sites only talk to them through these traits, and take a
//! single `&mut impl Runtime` so the collector, the class model and the
//! interpreter are reached through one borrow.

use garnet_object::{ImmediateTag, Memory, Symbol, Value};

use crate::{Arguments, Dispatch, LookupKind, MethodMissingReason, VmResult};

/// Identity of a heap class as the specialization table keys it.
pub type ClassId = u32;

/// The per-class token a cache entry stores next to the class reference.
///
/// The serial changes whenever lookup through the class could find a
/// different method, so an entry whose token differs from the class's
/// current one is stale.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ClassData {
    /// A heap class and the serial of its method table.
    Heap { class_id: ClassId, serial: u32 },
    /// The pseudo-class shared by all immediates of one kind.
    Immediate { tag: ImmediateTag, serial: u32 },
}

impl ClassData {
    #[inline]
    pub fn class_id(self) -> Option<ClassId> {
        match self {
            Self::Heap { class_id, .. } => Some(class_id),
            Self::Immediate { .. } => None,
        }
    }
}

pub trait ClassModel {
    /// The class method lookup starts from for `receiver`. This is the
    /// singleton class when the receiver has one.
    fn class_of(&self, receiver: Value) -> Value;

    fn class_data(&self, class: Value) -> ClassData;

    /// The object a singleton class is attached to, `None` for ordinary
    /// classes.
    fn attached_instance(&self, class: Value) -> Option<Value>;

    /// Human readable name for diagnostics.
    fn debug_name(&self, value: Value) -> String;

    fn symbol_name(&self, symbol: Symbol) -> String;
}

pub trait Resolver {
    /// Full method lookup. A method that cannot be found is normally
    /// reported as a method-missing [`Dispatch`]; an `Err` propagates to
    /// the caller unchanged.
    fn resolve(
        &mut self,
        receiver: Value,
        name: Symbol,
        kind: LookupKind,
    ) -> VmResult<Dispatch>;
}

pub trait Executor {
    fn execute(
        &mut self,
        method: Value,
        module: Value,
        args: &mut Arguments,
    ) -> VmResult<Value>;

    fn set_method_missing_reason(&mut self, reason: MethodMissingReason);
}

/// Everything a call site touches while dispatching.
pub trait Runtime: Memory + ClassModel + Resolver + Executor {}

impl<T: Memory + ClassModel + Resolver + Executor + ?Sized> Runtime for T {}
