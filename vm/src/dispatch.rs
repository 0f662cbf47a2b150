use garnet_object::{Symbol, Value};

use crate::{Arguments, Executor, VmResult};

/// Why resolution fell through to `method_missing`, if it did.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum MethodMissingReason {
    #[default]
    None,
    Private,
    Protected,
    Super,
    VCall,
    Normal,
}

impl MethodMissingReason {
    #[inline(always)]
    pub fn is_missing(self) -> bool {
        self != Self::None
    }
}

/// How a call site asks the resolver to look a method up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum LookupKind {
    /// `recv.foo`: public methods only.
    #[default]
    Normal,
    /// `foo` / `self.foo`: private methods are visible.
    Private,
    /// `super`: lookup starts above the current module.
    Super,
}

/// The outcome of one method resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Dispatch {
    pub name: Symbol,
    pub module: Value,
    pub method: Value,
    pub method_missing: MethodMissingReason,
}

impl Dispatch {
    pub fn new(name: Symbol, module: Value, method: Value) -> Self {
        Self {
            name,
            module,
            method,
            method_missing: MethodMissingReason::None,
        }
    }

    /// A dispatch that lands in `method_missing` for `reason`.
    pub fn missing(
        name: Symbol,
        module: Value,
        method: Value,
        reason: MethodMissingReason,
    ) -> Self {
        Self {
            name,
            module,
            method,
            method_missing: reason,
        }
    }

    #[inline(always)]
    pub fn is_method_missing(&self) -> bool {
        self.method_missing.is_missing()
    }

    /// Run the resolved method. A method-missing dispatch receives the
    /// original name as its first argument and reports its reason.
    pub fn invoke(
        &self,
        executor: &mut (impl Executor + ?Sized),
        args: &mut Arguments,
    ) -> VmResult<Value> {
        if self.is_method_missing() {
            args.unshift(self.name.to_value());
            executor.set_method_missing_reason(self.method_missing);
        }
        executor.execute(self.method, self.module, args)
    }
}
