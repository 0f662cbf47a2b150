use std::{collections::HashMap, sync::Arc};

use parking_lot::RwLock;

use crate::{ImmediateTag, Value};

/// An interned name, e.g. the selector of a call site.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Symbol(u32);

impl Symbol {
    #[inline(always)]
    pub const fn index(self) -> u32 {
        self.0
    }

    /// The symbol as an immediate value, e.g. to prepend it to arguments.
    #[inline(always)]
    pub const fn to_value(self) -> Value {
        Value::immediate(ImmediateTag::Symbol, self.0 as u64)
    }

    pub fn from_value(value: Value) -> Option<Self> {
        match value.immediate_tag() {
            Some(ImmediateTag::Symbol) => Some(Self(value.payload() as u32)),
            _ => None,
        }
    }
}

struct SymbolTableImpl {
    names: Vec<Arc<str>>,
    mappings: HashMap<Arc<str>, Symbol, ahash::RandomState>,
}

impl SymbolTableImpl {
    fn new() -> Self {
        Self {
            names: Vec::new(),
            mappings: HashMap::default(),
        }
    }

    fn get_or_add(&mut self, name: &str) -> Symbol {
        if let Some(&symbol) = self.mappings.get(name) {
            return symbol;
        }
        let symbol = Symbol(self.names.len() as u32);
        let interned = Arc::<str>::from(name);
        log::trace!("interned symbol {symbol:?} = {name}");
        self.names.push(interned.clone());
        self.mappings.insert(interned, symbol);
        symbol
    }
}

/// Shared symbol table. Cloning shares the same table.
#[derive(Clone)]
pub struct SymbolTable(Arc<RwLock<SymbolTableImpl>>);

impl SymbolTable {
    pub fn new() -> Self {
        Self(Arc::new(RwLock::new(SymbolTableImpl::new())))
    }

    pub fn intern(&self, name: &str) -> Symbol {
        if let Some(&symbol) = self.0.read().mappings.get(name) {
            return symbol;
        }
        self.0.write().get_or_add(name)
    }

    pub fn name(&self, symbol: Symbol) -> Option<Arc<str>> {
        self.0.read().names.get(symbol.0 as usize).cloned()
    }

    pub fn len(&self) -> usize {
        self.0.read().names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for SymbolTable {
    fn default() -> Self {
        Self::new()
    }
}

impl core::fmt::Debug for SymbolTable {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("SymbolTable")
            .field("len", &self.len())
            .finish()
    }
}
