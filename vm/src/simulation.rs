//! A small stand-in runtime: single inheritance, singleton classes and
//! methods that return a constant. It is enough to drive call sites from
//! the `garnet` binary, the benchmarks and the tests.

use std::collections::HashMap;

use ahash::RandomState;
use garnet_heap::Heap;
use garnet_object::{Header, ImmediateTag, Memory, ObjectType, Symbol, SymbolTable, Value};

use crate::{
    Arguments, ClassData, ClassModel, Dispatch, Executor, LookupKind,
    MethodMissingReason, Resolver, VmError, VmResult,
};

const IMMEDIATE_CLASSES: [(ImmediateTag, &str); ImmediateTag::COUNT] = [
    (ImmediateTag::Nil, "NilClass"),
    (ImmediateTag::True, "TrueClass"),
    (ImmediateTag::False, "FalseClass"),
    (ImmediateTag::Symbol, "Symbol"),
    (ImmediateTag::Undefined, "Undefined"),
    (ImmediateTag::Fixnum, "Integer"),
];

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SimulationStats {
    pub resolutions: u64,
    pub executions: u64,
    pub method_missing: u64,
}

#[derive(Debug)]
struct ClassRecord {
    name: String,
    identity: Value,
    superclass: Option<Value>,
    attached: Option<Value>,
    immediate: Option<ImmediateTag>,
    serial: u32,
    methods: HashMap<Symbol, Value, RandomState>,
}

#[derive(Debug)]
pub struct Simulation {
    pub heap: Heap,
    pub symbols: SymbolTable,
    pub stats: SimulationStats,
    classes: Vec<ClassRecord>,
    class_index: HashMap<Value, usize, RandomState>,
    instances: HashMap<Value, Value, RandomState>,
    singletons: HashMap<Value, Value, RandomState>,
    methods: HashMap<Value, i64, RandomState>,
    immediate_classes: HashMap<ImmediateTag, Value, RandomState>,
    object_class: Value,
    class_class: Value,
    missing_reason: MethodMissingReason,
}

impl Simulation {
    pub fn new() -> Self {
        Self::with_heap(Heap::default())
    }

    pub fn with_heap(heap: Heap) -> Self {
        let mut sim = Self {
            heap,
            symbols: SymbolTable::new(),
            stats: SimulationStats::default(),
            classes: Vec::new(),
            class_index: HashMap::default(),
            instances: HashMap::default(),
            singletons: HashMap::default(),
            methods: HashMap::default(),
            immediate_classes: HashMap::default(),
            object_class: Value::NIL,
            class_class: Value::NIL,
            missing_reason: MethodMissingReason::None,
        };
        sim.object_class = sim.add_class("Object", None, None, None);
        sim.class_class = sim.add_class("Class", Some(sim.object_class), None, None);
        for (tag, name) in IMMEDIATE_CLASSES {
            let class = sim.add_class(name, Some(sim.object_class), None, Some(tag));
            sim.immediate_classes.insert(tag, class);
        }
        sim
    }

    fn add_class(
        &mut self,
        name: &str,
        superclass: Option<Value>,
        attached: Option<Value>,
        immediate: Option<ImmediateTag>,
    ) -> Value {
        let identity = self.heap.allocate_header(ObjectType::Foreign).identity();
        self.class_index.insert(identity, self.classes.len());
        self.classes.push(ClassRecord {
            name: name.to_owned(),
            identity,
            superclass,
            attached,
            immediate,
            serial: 0,
            methods: HashMap::default(),
        });
        identity
    }

    fn record(&self, class: Value) -> Option<&ClassRecord> {
        self.class_index.get(&class).map(|&index| &self.classes[index])
    }

    /// A new class inheriting from `Object`.
    pub fn define_class(&mut self, name: &str) -> Value {
        self.add_class(name, Some(self.object_class), None, None)
    }

    /// Define `name` on `class` as a method returning `result`. Replaces
    /// any earlier definition and bumps the serial of `class` and of every
    /// class inheriting from it.
    pub fn define_method(&mut self, class: Value, name: &str, result: i64) -> Value {
        let symbol = self.symbols.intern(name);
        let method = self.heap.allocate_header(ObjectType::Foreign).identity();
        self.methods.insert(method, result);
        if let Some(&index) = self.class_index.get(&class) {
            self.classes[index].methods.insert(symbol, method);
            let affected: Vec<usize> = (0..self.classes.len())
                .filter(|&other| self.inherits_from(self.classes[other].identity, class))
                .collect();
            for other in affected {
                self.classes[other].serial = self.classes[other].serial.wrapping_add(1);
            }
        }
        method
    }

    /// Whether `class` is `ancestor` or has it on its superclass chain.
    fn inherits_from(&self, class: Value, ancestor: Value) -> bool {
        let mut current = Some(class);
        while let Some(record) = current.and_then(|class| self.record(class)) {
            if record.identity == ancestor {
                return true;
            }
            current = record.superclass;
        }
        false
    }

    pub fn instantiate(&mut self, class: Value) -> Value {
        let object = self.heap.allocate_header(ObjectType::Foreign).identity();
        self.instances.insert(object, class);
        object
    }

    /// The singleton class of `object`, created on first use.
    pub fn singleton_class_of(&mut self, object: Value) -> Value {
        if let Some(&singleton) = self.singletons.get(&object) {
            return singleton;
        }
        let superclass = self.class_of(object);
        let name = format!("#<Class:{}>", self.debug_name(object));
        let singleton = self.add_class(&name, Some(superclass), Some(object), None);
        self.singletons.insert(object, singleton);
        singleton
    }

    pub fn object_class(&self) -> Value {
        self.object_class
    }

    pub fn fixnum_class(&self) -> Value {
        self.immediate_classes
            .get(&ImmediateTag::Fixnum)
            .copied()
            .unwrap_or(self.object_class)
    }

    pub fn last_missing_reason(&self) -> MethodMissingReason {
        self.missing_reason
    }

    fn find_method(&self, start: Option<Value>, name: Symbol) -> Option<(Value, Value)> {
        let mut class = start;
        while let Some(record) = class.and_then(|class| self.record(class)) {
            if let Some(&method) = record.methods.get(&name) {
                return Some((record.identity, method));
            }
            class = record.superclass;
        }
        None
    }
}

impl Default for Simulation {
    fn default() -> Self {
        Self::new()
    }
}

impl Memory for Simulation {
    fn allocate_header(&mut self, object_type: ObjectType) -> Header {
        self.heap.allocate_header(object_type)
    }

    #[inline(always)]
    fn write_barrier(&mut self, holder: &Header, stored: Value) {
        self.heap.write_barrier(holder, stored);
    }
}

impl ClassModel for Simulation {
    fn class_of(&self, receiver: Value) -> Value {
        if let Some(&singleton) = self.singletons.get(&receiver) {
            return singleton;
        }
        if let Some(&class) = self.instances.get(&receiver) {
            return class;
        }
        if let Some(tag) = receiver.immediate_tag() {
            if let Some(&class) = self.immediate_classes.get(&tag) {
                return class;
            }
        }
        if self.class_index.contains_key(&receiver) {
            return self.class_class;
        }
        self.object_class
    }

    fn class_data(&self, class: Value) -> ClassData {
        match self.class_index.get(&class) {
            Some(&index) => match self.classes[index].immediate {
                Some(tag) => ClassData::Immediate {
                    tag,
                    serial: self.classes[index].serial,
                },
                None => ClassData::Heap {
                    class_id: index as u32,
                    serial: self.classes[index].serial,
                },
            },
            None => ClassData::Heap {
                class_id: u32::MAX,
                serial: 0,
            },
        }
    }

    fn attached_instance(&self, class: Value) -> Option<Value> {
        self.record(class).and_then(|record| record.attached)
    }

    fn debug_name(&self, value: Value) -> String {
        if let Some(record) = self.record(value) {
            return record.name.clone();
        }
        if let Some(&class) = self.instances.get(&value) {
            return format!("#<{}>", self.debug_name(class));
        }
        if let Some(n) = value.as_i64() {
            return n.to_string();
        }
        if let Some(symbol) = Symbol::from_value(value) {
            return format!(":{}", self.symbol_name(symbol));
        }
        format!("{value:?}")
    }

    fn symbol_name(&self, symbol: Symbol) -> String {
        self.symbols
            .name(symbol)
            .map(|name| name.to_string())
            .unwrap_or_else(|| format!("{symbol:?}"))
    }
}

impl Resolver for Simulation {
    fn resolve(
        &mut self,
        receiver: Value,
        name: Symbol,
        kind: LookupKind,
    ) -> VmResult<Dispatch> {
        self.stats.resolutions += 1;
        let class = self.class_of(receiver);
        let start = match kind {
            LookupKind::Super => self.record(class).and_then(|record| record.superclass),
            LookupKind::Normal | LookupKind::Private => Some(class),
        };
        if let Some((module, method)) = self.find_method(start, name) {
            return Ok(Dispatch::new(name, module, method));
        }

        let method_missing = self.symbols.intern("method_missing");
        let reason = match kind {
            LookupKind::Normal => MethodMissingReason::Normal,
            LookupKind::Private => MethodMissingReason::VCall,
            LookupKind::Super => MethodMissingReason::Super,
        };
        match self.find_method(Some(class), method_missing) {
            Some((module, method)) => Ok(Dispatch::missing(name, module, method, reason)),
            None => Err(VmError::NoMethod {
                name: self.symbol_name(name),
                receiver,
            }),
        }
    }
}

impl Executor for Simulation {
    fn execute(
        &mut self,
        method: Value,
        _module: Value,
        _args: &mut Arguments,
    ) -> VmResult<Value> {
        self.stats.executions += 1;
        match self.methods.get(&method) {
            Some(&result) => Ok(Value::from_i64(result)),
            None => Err(VmError::Raised { exception: method }),
        }
    }

    fn set_method_missing_reason(&mut self, reason: MethodMissingReason) {
        self.stats.method_missing += 1;
        self.missing_reason = reason;
    }
}
