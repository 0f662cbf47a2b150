//! Method dispatch caching for the garnet VM.
//!
//! Every send instruction owns a [`CallSite`]. The site starts empty,
//! caches its first resolution in a [`MonoInlineCache`] and moves to a
//! polymorphic [`InlineCache`] once a second receiver class shows up.
//! Cached entries are ordinary collector-managed objects: every reference
//! they hold is published through a write barrier and reported when
//! traced.
//!
//! Each [`CompiledCode`] also carries a [`SpecializationTable`] of entry
//! points compiled for particular receiver classes.
//!
//! The surrounding VM is reached through the traits in [`runtime`].

mod arguments;
mod cache_entry;
mod call_site;
mod compiled_code;
mod dispatch;
mod error;
mod execution;
mod inline_cache;
mod mono_inline_cache;
pub mod runtime;
pub mod simulation;
mod specialization;

pub use arguments::Arguments;
pub use cache_entry::CacheEntry;
pub use call_site::{CallSite, CallSiteState};
pub use compiled_code::{CodeFlags, CodeInfo, CompiledCode, LineEntry, SendSite};
pub use dispatch::{Dispatch, LookupKind, MethodMissingReason};
pub use error::{VmError, VmResult};
pub use execution::{ExecutionLock, MutatorToken};
pub use inline_cache::{InlineCache, InlineCacheHit, TRACKED_IC_HITS};
pub use mono_inline_cache::MonoInlineCache;
pub use runtime::{ClassData, ClassId, ClassModel, Executor, Resolver, Runtime};
pub use specialization::{EntryPoint, Specialization, SpecializationTable};
