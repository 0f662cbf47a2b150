use garnet_object::{Symbol, Value};

/// Receiver, block and positional arguments of one send.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Arguments {
    name: Symbol,
    receiver: Value,
    block: Value,
    values: Vec<Value>,
}

impl Arguments {
    pub fn new(name: Symbol, receiver: Value, values: Vec<Value>) -> Self {
        Self {
            name,
            receiver,
            block: Value::NIL,
            values,
        }
    }

    pub fn with_block(mut self, block: Value) -> Self {
        self.block = block;
        self
    }

    #[inline]
    pub fn name(&self) -> Symbol {
        self.name
    }

    #[inline]
    pub fn receiver(&self) -> Value {
        self.receiver
    }

    #[inline]
    pub fn block(&self) -> Value {
        self.block
    }

    #[inline]
    pub fn values(&self) -> &[Value] {
        &self.values
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Prepend `value` to the positional arguments.
    pub fn unshift(&mut self, value: Value) {
        self.values.insert(0, value);
    }

    pub fn shift(&mut self) -> Option<Value> {
        if self.values.is_empty() {
            None
        } else {
            Some(self.values.remove(0))
        }
    }
}
