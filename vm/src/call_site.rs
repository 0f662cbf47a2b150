use garnet_object::{
    Field, Header, Memory, ObjectType, Symbol, Traceable, Tracer, Value, relocate_owned,
};

use crate::{
    Arguments, ClassModel, Dispatch, InlineCache, LookupKind, MonoInlineCache,
    Runtime, TRACKED_IC_HITS, VmResult,
};

/// Which kind of cache a call site currently holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallSiteState {
    Empty,
    Monomorphic,
    Polymorphic,
}

enum Cache<const N: usize> {
    Empty,
    Mono(MonoInlineCache),
    Poly(InlineCache<N>),
}

/// One send instruction and whatever it has learned about its receivers.
///
/// A site starts empty, becomes monomorphic on its first resolution and
/// promotes to a polymorphic [`InlineCache`] the first time a second class
/// shows up. It never goes back. Entries made stale by a method
/// redefinition miss and are replaced in their slot.
pub struct CallSite<const N: usize = TRACKED_IC_HITS> {
    pub header: Header,
    name: Symbol,
    ip: u32,
    executable: Field,
    fallback: LookupKind,
    cache: Cache<N>,
}

impl<const N: usize> CallSite<N> {
    pub fn new(
        name: Symbol,
        ip: u32,
        executable: Value,
        fallback: LookupKind,
        memory: &mut (impl Memory + ?Sized),
    ) -> Self {
        let header = memory.allocate_header(ObjectType::CallSite);
        let mut executable_field = Field::nil();
        executable_field.publish(&header, executable, memory);
        Self {
            header,
            name,
            ip,
            executable: executable_field,
            fallback,
            cache: Cache::Empty,
        }
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

    pub fn state(&self) -> CallSiteState {
        match self.cache {
            Cache::Empty => CallSiteState::Empty,
            Cache::Mono(_) => CallSiteState::Monomorphic,
            Cache::Poly(_) => CallSiteState::Polymorphic,
        }
    }

    pub fn mono(&self) -> Option<&MonoInlineCache> {
        match &self.cache {
            Cache::Mono(mono) => Some(mono),
            _ => None,
        }
    }

    pub fn poly(&self) -> Option<&InlineCache<N>> {
        match &self.cache {
            Cache::Poly(poly) => Some(poly),
            _ => None,
        }
    }

    /// Execute the send, consulting and training the cache.
    pub fn execute(
        &mut self,
        runtime: &mut (impl Runtime + ?Sized),
        args: &mut Arguments,
    ) -> VmResult<Value> {
        match &mut self.cache {
            Cache::Poly(poly) => return poly.dispatch(runtime, args),
            Cache::Mono(mono) => {
                if let Some(result) = mono.dispatch(runtime, args) {
                    return result;
                }
            }
            Cache::Empty => {}
        }

        let receiver_class = runtime.class_of(args.receiver());
        let dispatch = runtime.resolve(args.receiver(), self.name, self.fallback)?;
        self.learn(receiver_class, &dispatch, runtime);
        dispatch.invoke(runtime, args)
    }

    /// Move to the next state after a miss on `receiver_class`.
    fn learn(
        &mut self,
        receiver_class: Value,
        dispatch: &Dispatch,
        runtime: &mut (impl Memory + ClassModel + ?Sized),
    ) {
        let next = match std::mem::replace(&mut self.cache, Cache::Empty) {
            Cache::Empty => Cache::Mono(MonoInlineCache::new(
                self.name,
                self.ip,
                self.executable(),
                self.fallback,
                receiver_class,
                dispatch,
                runtime,
            )),
            Cache::Mono(mono) if mono.receiver_class() == receiver_class => {
                log::debug!("call site {:?}@{} refreshes a stale entry", self.name, self.ip);
                Cache::Mono(MonoInlineCache::new(
                    self.name,
                    self.ip,
                    self.executable(),
                    self.fallback,
                    receiver_class,
                    dispatch,
                    runtime,
                ))
            }
            Cache::Mono(mono) => {
                let mut poly = InlineCache::promote_from(&mono, runtime);
                poly.update(receiver_class, dispatch, runtime);
                Cache::Poly(poly)
            }
            Cache::Poly(mut poly) => {
                poly.update(receiver_class, dispatch, runtime);
                Cache::Poly(poly)
            }
        };
        let identity = match &next {
            Cache::Mono(mono) => mono.identity(),
            Cache::Poly(poly) => poly.identity(),
            Cache::Empty => Value::NIL,
        };
        self.cache = next;
        runtime.write_barrier(&self.header, identity);
    }

    pub fn describe(&self, classes: &(impl ClassModel + ?Sized)) -> String {
        match &self.cache {
            Cache::Empty => format!("name: {}\nempty\n", classes.symbol_name(self.name)),
            Cache::Mono(mono) => mono.describe(classes),
            Cache::Poly(poly) => poly.describe(classes),
        }
    }
}

impl<const N: usize> Traceable for CallSite<N> {
    fn trace_edges(&mut self, tracer: &mut dyn Tracer) {
        self.executable.relocate(&self.header, tracer);
        match &mut self.cache {
            Cache::Empty => {}
            Cache::Mono(mono) => {
                mono.trace_edges(tracer);
                relocate_owned(&self.header, &mut mono.header, tracer);
            }
            Cache::Poly(poly) => {
                poly.trace_edges(tracer);
                relocate_owned(&self.header, &mut poly.header, tracer);
            }
        }
    }
}

impl<const N: usize> core::fmt::Debug for CallSite<N> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("CallSite")
            .field("name", &self.name)
            .field("ip", &self.ip)
            .field("state", &self.state())
            .finish()
    }
}
