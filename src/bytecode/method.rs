// Jvmgen Method Builder
// Append-only instruction buffer with labels, local slots and try/catch regions

use rustc_hash::FxHashMap;
use serde::Serialize;
use std::fmt;

use super::class::Annotation;
use super::opcode::{Instruction, Label};
use crate::error::{EmitResult, Fault};
use crate::types::Type;

/// Access flags shared by classes, fields and methods
pub mod access {
    pub const PUBLIC: u16 = 0x0001;
    pub const PRIVATE: u16 = 0x0002;
    pub const PROTECTED: u16 = 0x0004;
    pub const STATIC: u16 = 0x0008;
    pub const FINAL: u16 = 0x0010;
    pub const SUPER: u16 = 0x0020;
    pub const TRANSIENT: u16 = 0x0080;
    pub const INTERFACE: u16 = 0x0200;
    pub const ABSTRACT: u16 = 0x0400;
    pub const SYNTHETIC: u16 = 0x1000;

    /// Render flags the way a disassembler lists modifiers
    pub fn describe(flags: u16) -> String {
        let names = [
            (PUBLIC, "public"),
            (PRIVATE, "private"),
            (PROTECTED, "protected"),
            (STATIC, "static"),
            (FINAL, "final"),
            (TRANSIENT, "transient"),
            (ABSTRACT, "abstract"),
            (SYNTHETIC, "synthetic"),
        ];
        names
            .iter()
            .filter(|(flag, _)| flags & flag != 0)
            .map(|(_, name)| *name)
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// A try/catch region before labels are resolved
#[derive(Debug, Clone)]
struct PendingTryCatch {
    start: Label,
    end: Label,
    handler: Label,
    catch_type: Option<String>,
}

/// Resolved exception table entry: `[start, end)` is protected
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExceptionEntry {
    pub start: usize,
    pub end: usize,
    pub handler: usize,
    /// Internal name of the caught class; `None` catches everything
    pub catch_type: Option<String>,
}

/// Named local variable and its slot
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LocalVar {
    pub name: String,
    pub descriptor: String,
    pub slot: u16,
}

/// A finished method
#[derive(Debug, Clone, Serialize)]
pub struct MethodInfo {
    pub name: String,
    pub descriptor: String,
    pub access: u16,
    pub code: Vec<Instruction>,
    /// Instruction index of every label, indexed by label id
    pub labels: Vec<usize>,
    pub exception_table: Vec<ExceptionEntry>,
    /// (instruction index, source line)
    pub lines: Vec<(usize, usize)>,
    pub locals: Vec<LocalVar>,
    pub max_locals: u16,
    pub exceptions: Vec<String>,
    pub annotations: Vec<Annotation>,
}

impl MethodInfo {
    pub fn is_static(&self) -> bool {
        self.access & access::STATIC != 0
    }

    pub fn is_abstract(&self) -> bool {
        self.access & access::ABSTRACT != 0
    }

    /// Instruction index a label resolved to
    pub fn target(&self, label: Label) -> usize {
        self.labels[label.0 as usize]
    }

    /// Source line of the instruction at `pc`, if line numbers were recorded
    pub fn line_at(&self, pc: usize) -> Option<usize> {
        self.lines
            .iter()
            .take_while(|(offset, _)| *offset <= pc)
            .last()
            .map(|(_, line)| *line)
    }
}

impl fmt::Display for MethodInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let modifiers = access::describe(self.access);
        if modifiers.is_empty() {
            writeln!(f, "  {}{}", self.name, self.descriptor)?;
        } else {
            writeln!(f, "  {} {}{}", modifiers, self.name, self.descriptor)?;
        }

        let mut marks: FxHashMap<usize, Vec<usize>> = FxHashMap::default();
        for (id, pos) in self.labels.iter().enumerate() {
            marks.entry(*pos).or_default().push(id);
        }
        for (pc, instruction) in self.code.iter().enumerate() {
            if let Some(ids) = marks.get(&pc) {
                for id in ids {
                    writeln!(f, "   L{}:", id)?;
                }
            }
            writeln!(f, "    {:04} {}", pc, instruction)?;
        }
        if let Some(ids) = marks.get(&self.code.len()) {
            for id in ids {
                writeln!(f, "   L{}:", id)?;
            }
        }
        for entry in &self.exception_table {
            writeln!(
                f,
                "    catch {} [{}, {}) -> {}",
                entry.catch_type.as_deref().unwrap_or("any"),
                entry.start,
                entry.end,
                entry.handler
            )?;
        }
        Ok(())
    }
}

/// Builds one method body. Labels may be referenced before they are set;
/// `stop` checks that every label was placed.
#[derive(Debug)]
pub struct MethodBuilder {
    name: String,
    descriptor: String,
    access: u16,
    code: Vec<Instruction>,
    labels: Vec<Option<usize>>,
    locals: Vec<LocalVar>,
    slots: FxHashMap<String, u16>,
    next_slot: u16,
    max_locals: u16,
    try_catches: Vec<PendingTryCatch>,
    lines: Vec<(usize, usize)>,
    exceptions: Vec<String>,
    annotations: Vec<Annotation>,
}

impl MethodBuilder {
    pub fn new(name: impl Into<String>, descriptor: impl Into<String>, access: u16) -> Self {
        let first_slot = if access & access::STATIC != 0 { 0 } else { 1 }; // slot 0 is `this`
        Self {
            name: name.into(),
            descriptor: descriptor.into(),
            access,
            code: Vec::new(),
            labels: Vec::new(),
            locals: Vec::new(),
            slots: FxHashMap::default(),
            next_slot: first_slot,
            max_locals: first_slot,
            try_catches: Vec::new(),
            lines: Vec::new(),
            exceptions: Vec::new(),
            annotations: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn descriptor(&self) -> &str {
        &self.descriptor
    }

    pub fn is_static(&self) -> bool {
        self.access & access::STATIC != 0
    }

    // ==================== Instructions ====================

    pub fn emit(&mut self, instruction: Instruction) {
        self.code.push(instruction);
    }

    /// Index the next instruction will get
    pub fn offset(&self) -> usize {
        self.code.len()
    }

    /// The most recently emitted instruction
    pub fn last(&self) -> Option<&Instruction> {
        self.code.last()
    }

    /// Whether control can reach the next instruction: either the last
    /// instruction falls through or a label points at the current offset
    pub fn reachable(&self) -> bool {
        let falls_through = self.code.last().map_or(true, |i| !i.is_terminal());
        falls_through || self.labels.iter().any(|l| *l == Some(self.code.len()))
    }

    pub fn label(&mut self) -> Label {
        self.labels.push(None);
        Label(self.labels.len() as u32 - 1)
    }

    /// Offset a label was placed at, if it has been set
    pub fn position(&self, label: Label) -> Option<usize> {
        self.labels.get(label.0 as usize).copied().flatten()
    }

    /// Place a label at the current offset
    pub fn set(&mut self, label: Label) {
        if let Some(slot) = self.labels.get_mut(label.0 as usize) {
            *slot = Some(self.code.len());
        }
    }

    pub fn goto(&mut self, label: Label) {
        self.emit(Instruction::Goto(label));
    }

    /// Record the source line for the instructions that follow
    pub fn line(&mut self, line: usize) {
        match self.lines.last() {
            Some((_, last)) if *last == line => {}
            Some((offset, _)) if *offset == self.code.len() => {
                if let Some(entry) = self.lines.last_mut() {
                    entry.1 = line;
                }
            }
            _ => self.lines.push((self.code.len(), line)),
        }
    }

    // ==================== Locals ====================

    /// Slot of a named local, allocating it on first use
    pub fn local(&mut self, name: &str, ty: &Type) -> u16 {
        if let Some(slot) = self.slots.get(name) {
            return *slot;
        }
        let slot = self.allocate(ty);
        self.slots.insert(name.to_string(), slot);
        self.locals.push(LocalVar {
            name: name.to_string(),
            descriptor: ty.descriptor(),
            slot,
        });
        slot
    }

    pub fn slot_of(&self, name: &str) -> Option<u16> {
        self.slots.get(name).copied()
    }

    /// An anonymous slot for scratch values
    pub fn temp_local(&mut self, ty: &Type) -> u16 {
        self.allocate(ty)
    }

    fn allocate(&mut self, ty: &Type) -> u16 {
        let slot = self.next_slot;
        self.next_slot += if ty.is_wide() { 2 } else { 1 };
        self.max_locals = self.max_locals.max(self.next_slot);
        slot
    }

    // ==================== Exceptions and metadata ====================

    /// Protect `[start, end)` with a handler. `catch_type` is an internal
    /// class name or `None` for a catch-all.
    pub fn try_catch(&mut self, start: Label, end: Label, handler: Label, catch_type: Option<String>) {
        self.try_catches.push(PendingTryCatch {
            start,
            end,
            handler,
            catch_type,
        });
    }

    /// Declared `throws` clause
    pub fn throws(&mut self, class: impl Into<String>) {
        self.exceptions.push(class.into());
    }

    pub fn annotate(&mut self, annotation: Annotation) {
        self.annotations.push(annotation);
    }

    fn resolve(&self, label: Label) -> EmitResult<usize> {
        self.labels
            .get(label.0 as usize)
            .copied()
            .flatten()
            .ok_or_else(|| Fault::Internal(format!("label {} never set in {}", label, self.name)))
    }

    /// Finish the method, resolving labels and the exception table
    pub fn stop(self) -> EmitResult<MethodInfo> {
        for instruction in &self.code {
            if let Some(label) = instruction.jump_target() {
                self.resolve(label)?;
            }
        }
        let mut exception_table = Vec::with_capacity(self.try_catches.len());
        for entry in &self.try_catches {
            let start = self.resolve(entry.start)?;
            let end = self.resolve(entry.end)?;
            if start == end {
                return Err(Fault::Internal(format!(
                    "empty protected region in {}",
                    self.name
                )));
            }
            exception_table.push(ExceptionEntry {
                start,
                end,
                handler: self.resolve(entry.handler)?,
                catch_type: entry.catch_type.clone(),
            });
        }
        // Unused labels resolve to the method end
        let end = self.code.len();
        let labels = self.labels.iter().map(|pos| pos.unwrap_or(end)).collect();

        Ok(MethodInfo {
            name: self.name,
            descriptor: self.descriptor,
            access: self.access,
            code: self.code,
            labels,
            exception_table,
            lines: self.lines,
            locals: self.locals,
            max_locals: self.max_locals,
            exceptions: self.exceptions,
            annotations: self.annotations,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bytecode::Kind;
    use crate::types::{Primitive, TypeSystem};
    use pretty_assertions::assert_eq;

    #[test]
    fn test_wide_locals_take_two_slots() {
        let types = TypeSystem::new();
        let mut method = MethodBuilder::new("f", "()V", access::PUBLIC);
        let a = method.local("a", &types.primitive(Primitive::Long));
        let b = method.local("b", &types.string());
        assert_eq!((a, b), (1, 3));
        assert_eq!(method.local("a", &types.primitive(Primitive::Long)), 1);
        let info = method.stop().unwrap();
        assert_eq!(info.max_locals, 4);
    }

    #[test]
    fn test_labels_resolve_to_offsets() {
        let mut method = MethodBuilder::new("g", "()V", access::STATIC);
        let done = method.label();
        method.goto(done);
        method.emit(Instruction::Iconst(1));
        method.emit(Instruction::Pop);
        method.set(done);
        method.emit(Instruction::Return(None));
        let info = method.stop().unwrap();
        assert_eq!(info.target(done), 3);
    }

    #[test]
    fn test_unset_jump_target_is_a_fault() {
        let mut method = MethodBuilder::new("h", "()V", access::STATIC);
        let nowhere = method.label();
        method.goto(nowhere);
        assert!(matches!(method.stop(), Err(Fault::Internal(_))));
    }

    #[test]
    fn test_line_numbers_collapse() {
        let mut method = MethodBuilder::new("k", "()V", access::STATIC);
        method.line(3);
        method.line(4);
        method.emit(Instruction::Load(Kind::Int, 0));
        method.line(4);
        method.emit(Instruction::Pop);
        method.line(5);
        method.emit(Instruction::Return(None));
        let info = method.stop().unwrap();
        assert_eq!(info.lines, vec![(0, 4), (2, 5)]);
        assert_eq!(info.line_at(1), Some(4));
    }

    #[test]
    fn test_reachable_after_jump_only_through_a_label() {
        let mut method = MethodBuilder::new("r", "()V", access::STATIC);
        assert!(method.reachable());
        let target = method.label();
        method.goto(target);
        assert!(!method.reachable());
        method.set(target);
        assert!(method.reachable());
    }
}
