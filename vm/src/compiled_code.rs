use std::collections::HashMap;

use bitflags::bitflags;
use garnet_object::{
    Field, Header, Memory, ObjectType, Symbol, Traceable, Tracer, Tuple, Value,
    relocate_owned,
};

use crate::{
    CallSite, ClassId, ClassModel, EntryPoint, LookupKind, SpecializationTable,
};

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct CodeFlags: u8 {
        /// Top-level script body.
        const SCRIPT = 1 << 0;
        /// Code that reads or rebinds `self` reflectively
        /// (`instance_eval` and friends).
        const REFLECTIVE_SELF = 1 << 1;
        const BLOCK = 1 << 2;
    }
}

/// Start of a source line in the instruction stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LineEntry {
    pub ip: u32,
    pub line: u32,
}

/// A send instruction found by the compiler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SendSite {
    pub ip: u32,
    pub name: Symbol,
    pub fallback: LookupKind,
}

/// Everything the compiler knows about an executable.
#[derive(Debug, Clone)]
pub struct CodeInfo {
    pub name: Symbol,
    pub file: Symbol,
    pub iseq: Vec<u32>,
    pub stack_size: u32,
    pub local_count: u32,
    pub required_args: u32,
    pub post_args: u32,
    pub total_args: u32,
    pub splat: Option<u32>,
    pub arity: i32,
    pub flags: CodeFlags,
    pub literals: Vec<Value>,
    pub lines: Vec<LineEntry>,
    pub local_names: Vec<Symbol>,
    pub sends: Vec<SendSite>,
}

impl CodeInfo {
    pub fn new(name: Symbol, file: Symbol, iseq: Vec<u32>) -> Self {
        Self {
            name,
            file,
            iseq,
            stack_size: 0,
            local_count: 0,
            required_args: 0,
            post_args: 0,
            total_args: 0,
            splat: None,
            arity: 0,
            flags: CodeFlags::empty(),
            literals: Vec::new(),
            lines: Vec::new(),
            local_names: Vec::new(),
            sends: Vec::new(),
        }
    }
}

/// A compiled method or block body.
///
/// ```text
/// [Header] name file iseq stack_size local_count args... arity flags
///          literals: Tuple
///          lines: Tuple        [ip0, line0, ip1, line1, ..., end_ip]
///          local_names: Tuple
///          breakpoints         ip -> breakpoint object
///          call_sites          one per send, in ip order
///          specializations
/// ```
///
/// Everything above the tuples is fixed at creation. Breakpoints, call
/// site caches and the specialization table change at runtime.
pub struct CompiledCode {
    pub header: Header,
    name: Symbol,
    file: Symbol,
    iseq: Box<[u32]>,
    stack_size: u32,
    local_count: u32,
    required_args: u32,
    post_args: u32,
    total_args: u32,
    splat: Option<u32>,
    arity: i32,
    flags: CodeFlags,
    literals: Tuple,
    lines: Tuple,
    local_names: Tuple,
    breakpoints: HashMap<u32, Field, ahash::RandomState>,
    call_sites: Vec<CallSite>,
    specializations: SpecializationTable,
}

impl CompiledCode {
    pub fn create(info: CodeInfo, memory: &mut (impl Memory + ?Sized)) -> Self {
        let header = memory.allocate_header(ObjectType::CompiledCode);
        let literals = Tuple::from_values(&info.literals, memory);

        let mut line_table = Vec::with_capacity(info.lines.len() * 2 + 1);
        for entry in &info.lines {
            line_table.push(Value::from_i64(i64::from(entry.ip)));
            line_table.push(Value::from_i64(i64::from(entry.line)));
        }
        if !info.lines.is_empty() {
            line_table.push(Value::from_i64(info.iseq.len() as i64));
        }
        let lines = Tuple::from_values(&line_table, memory);

        let names: Vec<Value> = info.local_names.iter().map(|s| s.to_value()).collect();
        let local_names = Tuple::from_values(&names, memory);

        let identity = header.identity();
        let mut sends = info.sends;
        sends.sort_by_key(|send| send.ip);
        let call_sites = sends
            .into_iter()
            .map(|send| CallSite::new(send.name, send.ip, identity, send.fallback, memory))
            .collect();

        for owned in [&literals.header, &lines.header, &local_names.header] {
            memory.write_barrier(&header, owned.identity());
        }

        Self {
            header,
            name: info.name,
            file: info.file,
            iseq: info.iseq.into_boxed_slice(),
            stack_size: info.stack_size,
            local_count: info.local_count,
            required_args: info.required_args,
            post_args: info.post_args,
            total_args: info.total_args,
            splat: info.splat,
            arity: info.arity,
            flags: info.flags,
            literals,
            lines,
            local_names,
            breakpoints: HashMap::default(),
            call_sites,
            specializations: SpecializationTable::new(),
        }
    }

    #[inline(always)]
    pub fn identity(&self) -> Value {
        self.header.identity()
    }

    #[inline]
    pub fn name(&self) -> Symbol {
        self.name
    }

    #[inline]
    pub fn file(&self) -> Symbol {
        self.file
    }

    #[inline]
    pub fn iseq(&self) -> &[u32] {
        &self.iseq
    }

    #[inline]
    pub fn stack_size(&self) -> u32 {
        self.stack_size
    }

    #[inline]
    pub fn number_of_locals(&self) -> u32 {
        self.local_count
    }

    #[inline]
    pub fn required_args(&self) -> u32 {
        self.required_args
    }

    #[inline]
    pub fn post_args(&self) -> u32 {
        self.post_args
    }

    #[inline]
    pub fn total_args(&self) -> u32 {
        self.total_args
    }

    #[inline]
    pub fn splat(&self) -> Option<u32> {
        self.splat
    }

    #[inline]
    pub fn arity(&self) -> i32 {
        self.arity
    }

    #[inline]
    pub fn flags(&self) -> CodeFlags {
        self.flags
    }

    pub fn literals(&self) -> &Tuple {
        &self.literals
    }

    pub fn local_names(&self) -> &Tuple {
        &self.local_names
    }

    // ── Lines ─────────────────────────────────────────────────────────

    fn line_table(&self) -> Vec<i64> {
        self.lines.values().filter_map(Value::as_i64).collect()
    }

    /// Source line of the instruction at `ip`.
    pub fn line(&self, ip: u32) -> Option<u32> {
        let ip = i64::from(ip);
        self.line_table()
            .windows(3)
            .step_by(2)
            .find(|range| range[0] <= ip && ip < range[2])
            .and_then(|range| u32::try_from(range[1]).ok())
    }

    pub fn start_line(&self) -> Option<u32> {
        self.line_table()
            .get(1)
            .and_then(|&line| u32::try_from(line).ok())
    }

    // ── Breakpoints ───────────────────────────────────────────────────

    /// Attach `breakpoint` to the instruction at `ip`. Returns `false`
    /// when `ip` is outside the instruction stream.
    pub fn set_breakpoint(
        &mut self,
        ip: u32,
        breakpoint: Value,
        memory: &mut (impl Memory + ?Sized),
    ) -> bool {
        if ip as usize >= self.iseq.len() {
            return false;
        }
        let mut field = Field::nil();
        field.publish(&self.header, breakpoint, memory);
        self.breakpoints.insert(ip, field);
        true
    }

    /// Returns whether a breakpoint was removed.
    pub fn clear_breakpoint(&mut self, ip: u32) -> bool {
        self.breakpoints.remove(&ip).is_some()
    }

    pub fn is_breakpoint(&self, ip: u32) -> bool {
        self.breakpoints.contains_key(&ip)
    }

    pub fn breakpoint(&self, ip: u32) -> Option<Value> {
        self.breakpoints.get(&ip).map(Field::get)
    }

    // ── Call sites ────────────────────────────────────────────────────

    pub fn call_sites(&self) -> &[CallSite] {
        &self.call_sites
    }

    pub fn call_site_at(&self, ip: u32) -> Option<&CallSite> {
        let index = self.call_sites.binary_search_by_key(&ip, CallSite::ip).ok()?;
        self.call_sites.get(index)
    }

    pub fn call_site_at_mut(&mut self, ip: u32) -> Option<&mut CallSite> {
        let index = self.call_sites.binary_search_by_key(&ip, CallSite::ip).ok()?;
        self.call_sites.get_mut(index)
    }

    // ── Specialization ────────────────────────────────────────────────

    pub fn specializations(&self) -> &SpecializationTable {
        &self.specializations
    }

    pub fn can_specialize(&self) -> bool {
        !self
            .flags
            .intersects(CodeFlags::SCRIPT | CodeFlags::REFLECTIVE_SELF)
            && self.specializations.default_entry().is_some()
    }

    /// Install the entry point used when no specialization applies.
    pub fn set_unspecialized(&mut self, entry: EntryPoint) {
        self.specializations.set_default(entry);
    }

    pub fn add_specialized(
        &mut self,
        class_id: ClassId,
        revision: u64,
        entry: EntryPoint,
        runtime_data: Value,
        memory: &mut (impl Memory + ?Sized),
    ) {
        log::debug!(
            "specializing {:?} for class {class_id} at {:#x}",
            self.name,
            entry.address()
        );
        self.specializations
            .add(&self.header, class_id, revision, entry, runtime_data, memory);
    }

    pub fn find_specialized(&self, class_id: ClassId) -> Option<EntryPoint> {
        self.specializations.find_specialized(class_id)
    }

    /// Entry point for a receiver of `class`. Immediates never have
    /// specializations.
    pub fn entry_for_class(
        &self,
        class: Value,
        classes: &(impl ClassModel + ?Sized),
    ) -> Option<EntryPoint> {
        match classes.class_data(class).class_id() {
            Some(class_id) => self.find_specialized(class_id),
            None => self.specializations.default_entry(),
        }
    }

    /// The code was redefined; specializations built so far no longer
    /// apply.
    pub fn advance_revision(&mut self) -> u64 {
        self.specializations.advance_revision()
    }

    /// Has anything other than the interpreter been installed.
    pub fn jitted(&self) -> bool {
        !self.specializations.is_empty()
            || self
                .specializations
                .default_entry()
                .is_some_and(|entry| !entry.is_interpreter())
    }

    /// A copy of the static parts. Caches, breakpoints and entry points
    /// start out fresh.
    pub fn dup(&self, memory: &mut (impl Memory + ?Sized)) -> Self {
        let header = memory.allocate_header(ObjectType::CompiledCode);
        let literals = self.literals.dup(memory);
        let lines = self.lines.dup(memory);
        let local_names = self.local_names.dup(memory);
        for owned in [&literals.header, &lines.header, &local_names.header] {
            memory.write_barrier(&header, owned.identity());
        }
        let identity = header.identity();
        let call_sites = self
            .call_sites
            .iter()
            .map(|site| CallSite::new(site.name(), site.ip(), identity, site.fallback(), memory))
            .collect();

        Self {
            header,
            name: self.name,
            file: self.file,
            iseq: self.iseq.clone(),
            stack_size: self.stack_size,
            local_count: self.local_count,
            required_args: self.required_args,
            post_args: self.post_args,
            total_args: self.total_args,
            splat: self.splat,
            arity: self.arity,
            flags: self.flags,
            literals,
            lines,
            local_names,
            breakpoints: HashMap::default(),
            call_sites,
            specializations: SpecializationTable::new(),
        }
    }
}

impl Traceable for CompiledCode {
    fn trace_edges(&mut self, tracer: &mut dyn Tracer) {
        let Self {
            header,
            literals,
            lines,
            local_names,
            breakpoints,
            call_sites,
            specializations,
            ..
        } = self;

        for tuple in [literals, lines, local_names] {
            tuple.trace_edges(tracer);
            relocate_owned(header, &mut tuple.header, tracer);
        }
        for field in breakpoints.values_mut() {
            field.relocate(header, tracer);
        }
        for site in call_sites.iter_mut() {
            site.trace_edges(tracer);
            relocate_owned(header, &mut site.header, tracer);
        }
        specializations.trace(header, tracer);
    }
}

impl core::fmt::Debug for CompiledCode {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("CompiledCode")
            .field("identity", &self.identity())
            .field("name", &self.name)
            .field("iseq_len", &self.iseq.len())
            .field("flags", &self.flags)
            .field("call_sites", &self.call_sites.len())
            .field("specializations", &self.specializations.len())
            .finish()
    }
}
