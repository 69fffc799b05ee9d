// Jvmgen Virtual Machine
// Interprets the class model produced by the compiler: frames, exception
// tables, dispatch and lazy class initialization

use std::cmp::Ordering;
use std::sync::Arc;

use parking_lot::Mutex;
use rustc_hash::{FxHashMap, FxHashSet};

use super::caller::{Flow, NativeCaller, Unwind};
use super::natives::{self, ARITHMETIC, ARRAY_INDEX, CLASS_CAST, NEGATIVE_SIZE, NULL_POINTER, OBJECT};
use super::value::{Object, ObjectRef, Value, MESSAGE_FIELD};
use crate::bytecode::{
    ArithOp, ArrayKind, ClassFile, ConstantValue, Constant, FieldRef, Instruction, InvokeKind, Kind, Label,
    MethodInfo, MethodRef,
};
use crate::compiler::CompiledUnit;
use crate::error::{VmError, VmResult};
use crate::log::Logger;
use crate::types::Primitive;

/// Nested calls allowed before giving up
const MAX_DEPTH: usize = 256;

/// Operand stack and locals of one activation
struct Frame {
    stack: Vec<Value>,
    locals: Vec<Value>,
    name: String,
}

enum Step {
    Next,
    Jump(Label),
    Return(Option<Value>),
}

impl Frame {
    fn push(&mut self, value: Value) {
        self.stack.push(value);
    }

    fn pop(&mut self) -> VmResult<Value> {
        self.stack
            .pop()
            .ok_or_else(|| VmError::StackUnderflow(self.name.clone()))
    }

    fn pop_n(&mut self, count: usize) -> VmResult<Vec<Value>> {
        let at = self
            .stack
            .len()
            .checked_sub(count)
            .ok_or_else(|| VmError::StackUnderflow(self.name.clone()))?;
        Ok(self.stack.split_off(at))
    }

    fn pop_int(&mut self) -> VmResult<i32> {
        self.pop()?.as_int()
    }

    fn pop_ref(&mut self) -> VmResult<Option<ObjectRef>> {
        Ok(self.pop()?.as_ref()?.cloned())
    }

    fn load(&self, slot: u16) -> VmResult<Value> {
        self.locals
            .get(slot as usize)
            .cloned()
            .ok_or_else(|| VmError::TypeMismatch(format!("local {} out of range in {}", slot, self.name)))
    }

    fn store(&mut self, slot: u16, value: Value) {
        let slot = slot as usize;
        let needed = slot + if value.is_wide() { 2 } else { 1 };
        if self.locals.len() < needed {
            self.locals.resize(needed, Value::Null);
        }
        self.locals[slot] = value;
    }

    /// Entries that make up `words` stack words, starting `skip` entries
    /// below the top
    fn entries(&self, skip: usize, words: usize) -> VmResult<usize> {
        let mut count = 0;
        let mut covered = 0;
        while covered < words {
            let index = self
                .stack
                .len()
                .checked_sub(skip + count + 1)
                .ok_or_else(|| VmError::StackUnderflow(self.name.clone()))?;
            covered += if self.stack[index].is_wide() { 2 } else { 1 };
            count += 1;
        }
        Ok(count)
    }

    /// The dup family: copy the top `top` words and insert the copy
    /// beneath the `below` words under them
    fn dup_words(&mut self, top: usize, below: usize) -> VmResult<()> {
        let top_entries = self.entries(0, top)?;
        let below_entries = self.entries(top_entries, below)?;
        let len = self.stack.len();
        let copy = self.stack[len - top_entries..].to_vec();
        let at = len - top_entries - below_entries;
        self.stack.splice(at..at, copy);
        Ok(())
    }
}

/// Reference interpreter for generated classes. Standard output is
/// captured rather than written to the process.
pub struct Vm {
    classes: FxHashMap<String, Arc<ClassFile>>,
    statics: FxHashMap<(String, String), Value>,
    initialized: FxHashSet<String>,
    stdout: String,
    depth: usize,
    log: Logger,
}

impl Default for Vm {
    fn default() -> Self {
        Self::new()
    }
}

impl NativeCaller for Vm {
    fn call_virtual(&mut self, receiver: Value, name: &str, descriptor: &str, args: Vec<Value>) -> Flow<Option<Value>> {
        let reference = MethodRef {
            owner: OBJECT.to_string(),
            name: name.to_string(),
            descriptor: descriptor.to_string(),
        };
        self.invoke_instance(InvokeKind::Virtual, &reference, receiver, args)
    }

    fn exception(&mut self, class: &str, message: Option<&str>) -> Unwind {
        self.log.trace(format_args!("throwing {} ({:?})", class, message));
        Unwind::Throw(Arc::new(Mutex::new(natives::throwable(class, message))))
    }

    fn out(&mut self) -> &mut String {
        &mut self.stdout
    }
}

impl Vm {
    pub fn new() -> Self {
        Self::with_logger(Logger::quiet("vm"))
    }

    pub fn with_logger(log: Logger) -> Self {
        Self {
            classes: FxHashMap::default(),
            statics: FxHashMap::default(),
            initialized: FxHashSet::default(),
            stdout: String::new(),
            depth: 0,
            log,
        }
    }

    pub fn load(&mut self, class: ClassFile) {
        self.log.debug(format_args!("loaded {}", class.name));
        self.classes.insert(class.name.clone(), Arc::new(class));
    }

    pub fn load_unit(&mut self, unit: CompiledUnit) {
        for class in unit.into_classes() {
            self.load(class);
        }
    }

    pub fn output(&self) -> &str {
        &self.stdout
    }

    pub fn take_output(&mut self) -> String {
        std::mem::take(&mut self.stdout)
    }

    /// Current value of a static field of a loaded class
    pub fn static_field(&self, class: &str, name: &str) -> Option<Value> {
        self.statics.get(&(class.replace('.', "/"), name.to_string())).cloned()
    }

    /// Run `public static void main(String[])` of `class`
    pub fn run_main(&mut self, class: &str, args: &[&str]) -> VmResult<()> {
        let argv = Value::object(Object::Array {
            component: "Ljava/lang/String;".to_string(),
            items: args.iter().map(|arg| Value::string(*arg)).collect(),
        });
        self.invoke_static(class, "main", "([Ljava/lang/String;)V", vec![argv])
            .map(|_| ())
    }

    /// Call a static method from outside the VM. An exception nobody
    /// catches becomes `VmError::Uncaught`.
    pub fn invoke_static(
        &mut self,
        class: &str,
        name: &str,
        descriptor: &str,
        args: Vec<Value>,
    ) -> VmResult<Option<Value>> {
        let reference = MethodRef {
            owner: class.replace('.', "/"),
            name: name.to_string(),
            descriptor: descriptor.to_string(),
        };
        self.depth = 0;
        let result = self.invoke_static_ref(&reference, args);
        result.map_err(|unwind| self.uncaught(unwind))
    }

    fn uncaught(&self, unwind: Unwind) -> VmError {
        match unwind {
            Unwind::Fatal(error) => error,
            Unwind::Throw(exception) => {
                let guard = exception.lock();
                let class = guard.class_name().replace('/', ".");
                let message = guard
                    .field(MESSAGE_FIELD)
                    .and_then(|message| message.as_string().ok().flatten())
                    .unwrap_or_default();
                self.log.debug(format_args!("uncaught {}: {}", class, message));
                VmError::Uncaught { class, message }
            }
        }
    }

    // ==================== Classes ====================

    fn class(&self, name: &str) -> Option<Arc<ClassFile>> {
        self.classes.get(name).cloned()
    }

    /// Run static initialization of a loaded class, superclass first
    fn initialize(&mut self, name: &str) -> Flow<()> {
        if self.initialized.contains(name) {
            return Ok(());
        }
        let Some(class) = self.class(name) else {
            return Ok(());
        };
        self.initialized.insert(name.to_string());
        if let Some(superclass) = &class.superclass {
            self.initialize(superclass)?;
        }
        for field in class.fields.iter().filter(|f| f.is_static()) {
            let value = match &field.constant {
                Some(constant) => constant_value(constant),
                None => Value::default_for(&field.descriptor),
            };
            self.statics.insert((name.to_string(), field.name.clone()), value);
        }
        if let Some(index) = class.methods.iter().position(|m| m.name == "<clinit>") {
            self.log.debug(format_args!("initializing {}", name));
            self.call(&class, index, Vec::new())?;
        }
        Ok(())
    }

    /// Method declared on `class` or inherited from a loaded superclass
    fn find_method(&self, class: &str, name: &str, descriptor: &str) -> Option<(Arc<ClassFile>, usize)> {
        let mut current = self.class(class);
        while let Some(class) = current {
            let found = class
                .methods
                .iter()
                .position(|m| m.name == name && m.descriptor == descriptor && !m.is_abstract());
            if let Some(index) = found {
                return Some((class, index));
            }
            current = class.superclass.as_deref().and_then(|s| self.class(s));
        }
        None
    }

    /// Loaded class declaring static field `name`, searching superclasses
    fn static_owner(&self, class: &str, name: &str) -> Option<String> {
        let mut current = self.class(class);
        while let Some(class) = current {
            if class.field(name).is_some_and(|f| f.is_static()) {
                return Some(class.name.clone());
            }
            current = class.superclass.as_deref().and_then(|s| self.class(s));
        }
        None
    }

    fn instantiate(&mut self, name: &str) -> Flow<Value> {
        if self.class(name).is_none() {
            return Ok(Value::object(natives::allocate(name)?));
        }
        self.initialize(name)?;

        let mut fields = Vec::new();
        let mut current = Some(name.to_string());
        while let Some(class_name) = current {
            match self.class(&class_name) {
                Some(class) => {
                    for field in class.fields.iter().filter(|f| !f.is_static()) {
                        fields.push((field.name.clone(), Value::default_for(&field.descriptor)));
                    }
                    current = class.superclass.clone();
                }
                None => {
                    if natives::is_throwable(&class_name) {
                        fields.push((MESSAGE_FIELD.to_string(), Value::Null));
                    }
                    current = None;
                }
            }
        }
        Ok(Value::object(Object::Instance {
            class: name.to_string(),
            fields,
        }))
    }

    /// Whether `class` (internal name or array descriptor) is `target` or
    /// one of its subtypes
    fn is_subtype(&self, class: &str, target: &str) -> bool {
        if class == target || target == OBJECT {
            return true;
        }
        if let Some(component) = class.strip_prefix('[') {
            return match target.strip_prefix('[') {
                Some(wanted) => match (element_class(component), element_class(wanted)) {
                    (Some(have), Some(want)) => self.is_subtype(have, want),
                    _ => component == wanted,
                },
                None => target == "java/lang/Cloneable" || target == "java/io/Serializable",
            };
        }

        let mut pending = vec![class.to_string()];
        let mut seen = FxHashSet::default();
        while let Some(name) = pending.pop() {
            if name == target {
                return true;
            }
            if !seen.insert(name.clone()) {
                continue;
            }
            match self.classes.get(&name) {
                Some(class) => {
                    pending.extend(class.superclass.iter().cloned());
                    pending.extend(class.interfaces.iter().cloned());
                }
                None => {
                    pending.extend(natives::native_super(&name).map(String::from));
                    pending.extend(natives::native_interfaces(&name).iter().map(|s| s.to_string()));
                }
            }
        }
        false
    }

    fn instance_of(&self, object: &ObjectRef, target: &str) -> bool {
        let class = object.lock().class_name();
        self.is_subtype(&class, target)
    }

    // ==================== Calls ====================

    fn call(&mut self, class: &Arc<ClassFile>, index: usize, args: Vec<Value>) -> Flow<Option<Value>> {
        if self.depth >= MAX_DEPTH {
            return Err(VmError::StackOverflow.into());
        }
        self.depth += 1;
        let result = self.execute(class, index, args);
        self.depth -= 1;
        result
    }

    fn invoke_static_ref(&mut self, reference: &MethodRef, args: Vec<Value>) -> Flow<Option<Value>> {
        if self.class(&reference.owner).is_none() {
            return natives::invoke_static(self, &reference.owner, &reference.name, &reference.descriptor, args);
        }
        self.initialize(&reference.owner)?;
        let (class, index) = self
            .find_method(&reference.owner, &reference.name, &reference.descriptor)
            .ok_or_else(|| no_such_method(reference))?;
        self.call(&class, index, args)
    }

    fn invoke_instance(
        &mut self,
        kind: InvokeKind,
        reference: &MethodRef,
        receiver: Value,
        args: Vec<Value>,
    ) -> Flow<Option<Value>> {
        let Some(object) = receiver.as_ref()?.cloned() else {
            return Err(self.exception(NULL_POINTER, None));
        };

        let lookup_class = match kind {
            InvokeKind::Special => reference.owner.clone(),
            _ => object.lock().class_name(),
        };
        if let Some((class, index)) = self.find_method(&lookup_class, &reference.name, &reference.descriptor) {
            let mut full = Vec::with_capacity(args.len() + 1);
            full.push(receiver);
            full.extend(args);
            return self.call(&class, index, full);
        }

        // Library code, reached directly or through a user superclass
        let owner = self.library_ancestor(&lookup_class);
        natives::invoke_instance(self, &object, &owner, &reference.name, &reference.descriptor, args)
    }

    /// First class in the superclass chain that is not loaded
    fn library_ancestor(&self, class: &str) -> String {
        let mut name = class.to_string();
        while let Some(loaded) = self.class(&name) {
            match &loaded.superclass {
                Some(superclass) => name = superclass.clone(),
                None => return OBJECT.to_string(),
            }
        }
        name
    }

    // ==================== Interpreter ====================

    fn execute(&mut self, class: &Arc<ClassFile>, index: usize, args: Vec<Value>) -> Flow<Option<Value>> {
        let method = &class.methods[index];
        let mut frame = Frame {
            stack: Vec::new(),
            locals: vec![Value::Null; method.max_locals as usize],
            name: format!("{}.{}{}", class.name, method.name, method.descriptor),
        };
        let mut slot = 0;
        for arg in args {
            let wide = arg.is_wide();
            frame.store(slot, arg);
            slot += if wide { 2 } else { 1 };
        }
        self.log.trace(format_args!("enter {}", frame.name));

        let mut pc = 0;
        loop {
            let instruction = method
                .code
                .get(pc)
                .ok_or_else(|| VmError::FellOffEnd(frame.name.clone()))?;
            match self.step(&mut frame, instruction) {
                Ok(Step::Next) => pc += 1,
                Ok(Step::Jump(label)) => pc = jump_target(method, label, &frame)?,
                Ok(Step::Return(value)) => return Ok(value),
                Err(Unwind::Throw(exception)) => match self.handler_for(method, pc, &exception) {
                    Some(handler) => {
                        frame.stack.clear();
                        frame.push(Value::Ref(exception));
                        pc = handler;
                    }
                    None => return Err(Unwind::Throw(exception)),
                },
                Err(fatal) => return Err(fatal),
            }
        }
    }

    fn handler_for(&self, method: &MethodInfo, pc: usize, exception: &ObjectRef) -> Option<usize> {
        method
            .exception_table
            .iter()
            .find(|entry| {
                (entry.start..entry.end).contains(&pc)
                    && entry
                        .catch_type
                        .as_deref()
                        .map_or(true, |catch| self.instance_of(exception, catch))
            })
            .map(|entry| entry.handler)
    }

    fn step(&mut self, frame: &mut Frame, instruction: &Instruction) -> Flow<Step> {
        match instruction {
            Instruction::AconstNull => frame.push(Value::Null),
            Instruction::Iconst(v) => frame.push(Value::Int(*v)),
            Instruction::Lconst(v) => frame.push(Value::Long(*v)),
            Instruction::Fconst(v) => frame.push(Value::Float(*v)),
            Instruction::Dconst(v) => frame.push(Value::Double(*v)),
            Instruction::Ldc(Constant::String(s)) => frame.push(Value::string(s.clone())),
            Instruction::Ldc(Constant::Class(name)) => frame.push(Value::object(Object::Class(name.clone()))),

            Instruction::Load(_, slot) => {
                let value = frame.load(*slot)?;
                frame.push(value);
            }
            Instruction::Store(_, slot) => {
                let value = frame.pop()?;
                frame.store(*slot, value);
            }
            Instruction::Iinc(slot, delta) => {
                let value = frame.load(*slot)?.as_int()?;
                frame.store(*slot, Value::Int(value.wrapping_add(i32::from(*delta))));
            }

            Instruction::NewArray(primitive) => {
                let component = primitive.descriptor().to_string();
                let array = self.new_array(frame, component)?;
                frame.push(array);
            }
            Instruction::ANewArray(class) => {
                let component = if class.starts_with('[') {
                    class.clone()
                } else {
                    format!("L{};", class)
                };
                let array = self.new_array(frame, component)?;
                frame.push(array);
            }
            Instruction::ArrayLoad(_) => {
                let index = frame.pop_int()?;
                let array = self.non_null(frame.pop_ref()?)?;
                let element = match &*array.lock() {
                    Object::Array { items, .. } => usize::try_from(index).ok().and_then(|i| items.get(i).cloned()),
                    other => return Err(not_an_array(other).into()),
                };
                match element {
                    Some(value) => frame.push(value),
                    None => return Err(self.index_error(&array, index)),
                }
            }
            Instruction::ArrayStore(kind) => {
                let value = narrow(*kind, frame.pop()?);
                let index = frame.pop_int()?;
                let array = self.non_null(frame.pop_ref()?)?;
                let stored = match &mut *array.lock() {
                    Object::Array { items, .. } => match usize::try_from(index).ok().and_then(|i| items.get_mut(i)) {
                        Some(slot) => {
                            *slot = value;
                            true
                        }
                        None => false,
                    },
                    other => return Err(not_an_array(other).into()),
                };
                if !stored {
                    return Err(self.index_error(&array, index));
                }
            }
            Instruction::ArrayLength => {
                let array = self.non_null(frame.pop_ref()?)?;
                let length = match &*array.lock() {
                    Object::Array { items, .. } => items.len() as i32,
                    other => return Err(not_an_array(other).into()),
                };
                frame.push(Value::Int(length));
            }

            Instruction::Pop => {
                frame.pop()?;
            }
            Instruction::Pop2 => {
                let count = frame.entries(0, 2)?;
                frame.pop_n(count)?;
            }
            Instruction::Dup => frame.dup_words(1, 0)?,
            Instruction::DupX1 => frame.dup_words(1, 1)?,
            Instruction::DupX2 => frame.dup_words(1, 2)?,
            Instruction::Dup2 => frame.dup_words(2, 0)?,
            Instruction::Dup2X1 => frame.dup_words(2, 1)?,
            Instruction::Dup2X2 => frame.dup_words(2, 2)?,
            Instruction::Swap => {
                let top = frame.pop()?;
                let under = frame.pop()?;
                frame.push(top);
                frame.push(under);
            }

            Instruction::Arith(kind, op) => {
                let result = self.arith(frame, *kind, *op)?;
                frame.push(result);
            }
            Instruction::Neg(_) => {
                let value = match frame.pop()? {
                    Value::Int(v) => Value::Int(v.wrapping_neg()),
                    Value::Long(v) => Value::Long(v.wrapping_neg()),
                    Value::Float(v) => Value::Float(-v),
                    Value::Double(v) => Value::Double(-v),
                    other => return Err(VmError::TypeMismatch(format!("cannot negate {}", other.type_name())).into()),
                };
                frame.push(value);
            }
            Instruction::Convert(_, to) => {
                let value = convert(frame.pop()?, *to)?;
                frame.push(value);
            }
            Instruction::Lcmp => {
                let b = frame.pop()?.as_long()?;
                let a = frame.pop()?.as_long()?;
                frame.push(Value::Int(a.cmp(&b) as i32));
            }
            Instruction::Fcmpl | Instruction::Fcmpg => {
                let b = frame.pop()?.as_float()?;
                let a = frame.pop()?.as_float()?;
                let nan = if matches!(instruction, Instruction::Fcmpg) { 1 } else { -1 };
                frame.push(Value::Int(a.partial_cmp(&b).map_or(nan, |o| o as i32)));
            }
            Instruction::Dcmpl | Instruction::Dcmpg => {
                let b = frame.pop()?.as_double()?;
                let a = frame.pop()?.as_double()?;
                let nan = if matches!(instruction, Instruction::Dcmpg) { 1 } else { -1 };
                frame.push(Value::Int(a.partial_cmp(&b).map_or(nan, |o| o as i32)));
            }

            Instruction::If(cond, label) => {
                let value = frame.pop_int()?;
                if cond.test(value.cmp(&0)) {
                    return Ok(Step::Jump(*label));
                }
            }
            Instruction::IfIcmp(cond, label) => {
                let b = frame.pop_int()?;
                let a = frame.pop_int()?;
                if cond.test(a.cmp(&b)) {
                    return Ok(Step::Jump(*label));
                }
            }
            Instruction::IfAcmp(cond, label) => {
                let b = frame.pop()?;
                let a = frame.pop()?;
                let ordering = if a.same(&b) { Ordering::Equal } else { Ordering::Less };
                if cond.test(ordering) {
                    return Ok(Step::Jump(*label));
                }
            }
            Instruction::IfNull(label) => {
                if frame.pop()?.is_null() {
                    return Ok(Step::Jump(*label));
                }
            }
            Instruction::IfNonNull(label) => {
                if !frame.pop()?.is_null() {
                    return Ok(Step::Jump(*label));
                }
            }
            Instruction::Goto(label) => return Ok(Step::Jump(*label)),
            Instruction::Return(None) => return Ok(Step::Return(None)),
            Instruction::Return(Some(_)) => return Ok(Step::Return(Some(frame.pop()?))),
            Instruction::Athrow => {
                let exception = self.non_null(frame.pop_ref()?)?;
                return Err(Unwind::Throw(exception));
            }

            Instruction::New(class) => {
                let object = self.instantiate(class)?;
                frame.push(object);
            }
            Instruction::Checkcast(target) => {
                let value = frame.pop()?;
                if let Some(object) = value.as_ref()? {
                    if !self.instance_of(object, target) {
                        let class = object.lock().class_name();
                        let message = format!(
                            "class {} cannot be cast to class {}",
                            class.replace('/', "."),
                            target.replace('/', ".")
                        );
                        return Err(self.exception(CLASS_CAST, Some(&message)));
                    }
                }
                frame.push(value);
            }
            Instruction::InstanceOf(target) => {
                let matched = match frame.pop_ref()? {
                    Some(object) => self.instance_of(&object, target),
                    None => false,
                };
                frame.push(Value::boolean(matched));
            }
            Instruction::GetField(field) => {
                let object = self.non_null(frame.pop_ref()?)?;
                let value = object
                    .lock()
                    .field(&field.name)
                    .cloned()
                    .unwrap_or_else(|| Value::default_for(&field.descriptor));
                frame.push(value);
            }
            Instruction::PutField(field) => {
                let value = frame.pop()?;
                let object = self.non_null(frame.pop_ref()?)?;
                object.lock().set_field(&field.name, value)?;
            }
            Instruction::GetStatic(field) => {
                let value = self.get_static(field)?;
                frame.push(value);
            }
            Instruction::PutStatic(field) => {
                let value = frame.pop()?;
                self.initialize(&field.owner)?;
                let owner = self
                    .static_owner(&field.owner, &field.name)
                    .ok_or_else(|| no_such_field(field))?;
                self.statics.insert((owner, field.name.clone()), value);
            }
            Instruction::Invoke(kind, reference) => {
                let count = natives::params(&reference.descriptor)?.len();
                let args = frame.pop_n(count)?;
                let result = match kind {
                    InvokeKind::Static => self.invoke_static_ref(reference, args)?,
                    _ => {
                        let receiver = frame.pop()?;
                        self.invoke_instance(*kind, reference, receiver, args)?
                    }
                };
                if natives::return_descriptor(&reference.descriptor)? != "V" {
                    let value = result.ok_or_else(|| {
                        VmError::TypeMismatch(format!(
                            "{}.{}{} returned nothing",
                            reference.owner, reference.name, reference.descriptor
                        ))
                    })?;
                    frame.push(value);
                }
            }
        }
        Ok(Step::Next)
    }

    fn get_static(&mut self, field: &FieldRef) -> Flow<Value> {
        if self.class(&field.owner).is_some() {
            self.initialize(&field.owner)?;
            let owner = self
                .static_owner(&field.owner, &field.name)
                .ok_or_else(|| no_such_field(field))?;
            return Ok(self
                .statics
                .get(&(owner, field.name.clone()))
                .cloned()
                .unwrap_or_else(|| Value::default_for(&field.descriptor)));
        }
        let key = (field.owner.clone(), field.name.clone());
        if let Some(value) = self.statics.get(&key) {
            return Ok(value.clone());
        }
        let value = natives::get_static(&field.owner, &field.name).ok_or_else(|| no_such_field(field))?;
        self.statics.insert(key, value.clone());
        Ok(value)
    }

    fn new_array(&mut self, frame: &mut Frame, component: String) -> Flow<Value> {
        let length = frame.pop_int()?;
        let Ok(length) = usize::try_from(length) else {
            return Err(self.exception(NEGATIVE_SIZE, Some(&length.to_string())));
        };
        let items = vec![Value::default_for(&component); length];
        Ok(Value::object(Object::Array { component, items }))
    }

    fn arith(&mut self, frame: &mut Frame, kind: Kind, op: ArithOp) -> Flow<Value> {
        let shift = matches!(op, ArithOp::Shl | ArithOp::Shr | ArithOp::Ushr);
        let value = match kind {
            Kind::Int => {
                let b = frame.pop_int()?;
                let a = frame.pop_int()?;
                if matches!(op, ArithOp::Div | ArithOp::Rem) && b == 0 {
                    return Err(self.exception(ARITHMETIC, Some("/ by zero")));
                }
                Value::Int(match op {
                    ArithOp::Add => a.wrapping_add(b),
                    ArithOp::Sub => a.wrapping_sub(b),
                    ArithOp::Mul => a.wrapping_mul(b),
                    ArithOp::Div => a.wrapping_div(b),
                    ArithOp::Rem => a.wrapping_rem(b),
                    ArithOp::And => a & b,
                    ArithOp::Or => a | b,
                    ArithOp::Xor => a ^ b,
                    ArithOp::Shl => a.wrapping_shl(b as u32),
                    ArithOp::Shr => a.wrapping_shr(b as u32),
                    ArithOp::Ushr => (a as u32).wrapping_shr(b as u32) as i32,
                })
            }
            Kind::Long if shift => {
                let b = frame.pop_int()? as u32;
                let a = frame.pop()?.as_long()?;
                Value::Long(match op {
                    ArithOp::Shl => a.wrapping_shl(b),
                    ArithOp::Shr => a.wrapping_shr(b),
                    _ => (a as u64).wrapping_shr(b) as i64,
                })
            }
            Kind::Long => {
                let b = frame.pop()?.as_long()?;
                let a = frame.pop()?.as_long()?;
                if matches!(op, ArithOp::Div | ArithOp::Rem) && b == 0 {
                    return Err(self.exception(ARITHMETIC, Some("/ by zero")));
                }
                Value::Long(match op {
                    ArithOp::Add => a.wrapping_add(b),
                    ArithOp::Sub => a.wrapping_sub(b),
                    ArithOp::Mul => a.wrapping_mul(b),
                    ArithOp::Div => a.wrapping_div(b),
                    ArithOp::Rem => a.wrapping_rem(b),
                    ArithOp::And => a & b,
                    ArithOp::Or => a | b,
                    _ => a ^ b,
                })
            }
            Kind::Float => {
                let b = frame.pop()?.as_float()?;
                let a = frame.pop()?.as_float()?;
                Value::Float(float_op(op, a, b).ok_or_else(|| bad_op(kind, op))?)
            }
            Kind::Double => {
                let b = frame.pop()?.as_double()?;
                let a = frame.pop()?.as_double()?;
                Value::Double(float_op(op, a, b).ok_or_else(|| bad_op(kind, op))?)
            }
            Kind::Ref => return Err(bad_op(kind, op).into()),
        };
        Ok(value)
    }

    fn non_null(&mut self, object: Option<ObjectRef>) -> Flow<ObjectRef> {
        object.ok_or_else(|| self.exception(NULL_POINTER, None))
    }

    fn index_error(&mut self, array: &ObjectRef, index: i32) -> Unwind {
        let length = match &*array.lock() {
            Object::Array { items, .. } => items.len(),
            _ => 0,
        };
        let message = format!("Index {} out of bounds for length {}", index, length);
        self.exception(ARRAY_INDEX, Some(&message))
    }
}

fn float_op<T>(op: ArithOp, a: T, b: T) -> Option<T>
where
    T: std::ops::Add<Output = T>
        + std::ops::Sub<Output = T>
        + std::ops::Mul<Output = T>
        + std::ops::Div<Output = T>
        + std::ops::Rem<Output = T>,
{
    match op {
        ArithOp::Add => Some(a + b),
        ArithOp::Sub => Some(a - b),
        ArithOp::Mul => Some(a * b),
        ArithOp::Div => Some(a / b),
        ArithOp::Rem => Some(a % b),
        _ => None,
    }
}

fn bad_op(kind: Kind, op: ArithOp) -> VmError {
    VmError::TypeMismatch(format!("{}{} is not an instruction", kind.letter(), op.mnemonic()))
}

fn convert(value: Value, to: Primitive) -> VmResult<Value> {
    let converted = match (value, to) {
        (Value::Int(v), Primitive::Byte) => Value::Int(i32::from(v as i8)),
        (Value::Int(v), Primitive::Char) => Value::Int(i32::from(v as u16)),
        (Value::Int(v), Primitive::Short) => Value::Int(i32::from(v as i16)),
        (Value::Int(v), Primitive::Int | Primitive::Boolean) => Value::Int(v),
        (Value::Int(v), Primitive::Long) => Value::Long(i64::from(v)),
        (Value::Int(v), Primitive::Float) => Value::Float(v as f32),
        (Value::Int(v), Primitive::Double) => Value::Double(f64::from(v)),
        (Value::Long(v), Primitive::Long) => Value::Long(v),
        (Value::Long(v), Primitive::Float) => Value::Float(v as f32),
        (Value::Long(v), Primitive::Double) => Value::Double(v as f64),
        (Value::Long(v), narrow) => convert(Value::Int(v as i32), narrow)?,
        (Value::Float(v), Primitive::Long) => Value::Long(v as i64),
        (Value::Float(v), Primitive::Float) => Value::Float(v),
        (Value::Float(v), Primitive::Double) => Value::Double(f64::from(v)),
        (Value::Float(v), narrow) => convert(Value::Int(v as i32), narrow)?,
        (Value::Double(v), Primitive::Long) => Value::Long(v as i64),
        (Value::Double(v), Primitive::Float) => Value::Float(v as f32),
        (Value::Double(v), Primitive::Double) => Value::Double(v),
        (Value::Double(v), narrow) => convert(Value::Int(v as i32), narrow)?,
        (other, to) => {
            return Err(VmError::TypeMismatch(format!(
                "cannot convert {} to {}",
                other.type_name(),
                to.name()
            )))
        }
    };
    Ok(converted)
}

/// Truncate a value stored into a narrow array
fn narrow(kind: ArrayKind, value: Value) -> Value {
    match (kind, value) {
        (ArrayKind::Byte, Value::Int(v)) => Value::Int(i32::from(v as i8)),
        (ArrayKind::Char, Value::Int(v)) => Value::Int(i32::from(v as u16)),
        (ArrayKind::Short, Value::Int(v)) => Value::Int(i32::from(v as i16)),
        (_, value) => value,
    }
}

/// Class named by a reference component descriptor
fn element_class(component: &str) -> Option<&str> {
    if component.starts_with('[') {
        return Some(component);
    }
    component.strip_prefix('L').and_then(|rest| rest.strip_suffix(';'))
}

fn constant_value(constant: &ConstantValue) -> Value {
    match constant {
        ConstantValue::Int(v) => Value::Int(*v),
        ConstantValue::Long(v) => Value::Long(*v),
        ConstantValue::Float(v) => Value::Float(*v),
        ConstantValue::Double(v) => Value::Double(*v),
        ConstantValue::String(s) => Value::string(s.clone()),
    }
}

fn jump_target(method: &MethodInfo, label: Label, frame: &Frame) -> VmResult<usize> {
    method
        .labels
        .get(label.0 as usize)
        .copied()
        .ok_or_else(|| VmError::TypeMismatch(format!("unknown label {} in {}", label, frame.name)))
}

fn not_an_array(object: &Object) -> VmError {
    VmError::TypeMismatch(format!("expected array, found {}", object.class_name()))
}

fn no_such_method(reference: &MethodRef) -> Unwind {
    Unwind::Fatal(VmError::NoSuchMethod {
        owner: reference.owner.clone(),
        name: reference.name.clone(),
        descriptor: reference.descriptor.clone(),
    })
}

fn no_such_field(field: &FieldRef) -> VmError {
    VmError::NoSuchField {
        owner: field.owner.clone(),
        name: field.name.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bytecode::{access, ClassBuilder, Cond, FieldInfo, MethodBuilder};
    use crate::types::TypeSystem;
    use pretty_assertions::assert_eq;

    fn print_string() -> Vec<Instruction> {
        vec![
            Instruction::GetStatic(FieldRef {
                owner: "java/lang/System".to_string(),
                name: "out".to_string(),
                descriptor: "Ljava/io/PrintStream;".to_string(),
            }),
            Instruction::Swap,
            Instruction::invoke(InvokeKind::Virtual, "java/io/PrintStream", "println", "(Ljava/lang/String;)V"),
        ]
    }

    fn demo(methods: Vec<MethodBuilder>) -> ClassFile {
        let mut class = ClassBuilder::new("Demo", Some(OBJECT.to_string()), Vec::new(), access::PUBLIC);
        for method in methods {
            class.add_method(method.stop().unwrap());
        }
        class.finish()
    }

    #[test]
    fn test_static_call_with_wide_arguments() {
        let mut add = MethodBuilder::new("add", "(JI)J", access::PUBLIC | access::STATIC);
        add.emit(Instruction::Load(Kind::Long, 0));
        add.emit(Instruction::Load(Kind::Int, 2));
        add.emit(Instruction::Convert(Primitive::Int, Primitive::Long));
        add.emit(Instruction::Arith(Kind::Long, ArithOp::Add));
        add.emit(Instruction::Return(Some(Kind::Long)));

        let mut vm = Vm::new();
        vm.load(demo(vec![add]));
        let result = vm
            .invoke_static("Demo", "add", "(JI)J", vec![Value::Long(40), Value::Int(2)])
            .unwrap();
        assert!(matches!(result, Some(Value::Long(42))));
    }

    #[test]
    fn test_exception_table_catches_division_by_zero() {
        crate::test_utils::init_test_logging();
        let mut main = MethodBuilder::new("main", "([Ljava/lang/String;)V", access::PUBLIC | access::STATIC);
        let (start, end, handler, done) = (main.label(), main.label(), main.label(), main.label());
        main.set(start);
        main.emit(Instruction::Iconst(1));
        main.emit(Instruction::Iconst(0));
        main.emit(Instruction::Arith(Kind::Int, ArithOp::Div));
        main.emit(Instruction::Pop);
        main.set(end);
        main.goto(done);
        main.set(handler);
        main.emit(Instruction::invoke(InvokeKind::Virtual, "java/lang/Throwable", "getMessage", "()Ljava/lang/String;"));
        for instruction in print_string() {
            main.emit(instruction);
        }
        main.set(done);
        main.emit(Instruction::Return(None));
        main.try_catch(start, end, handler, Some("java/lang/RuntimeException".to_string()));

        let mut vm = Vm::new();
        vm.load(demo(vec![main]));
        vm.run_main("Demo", &[]).unwrap();
        assert_eq!(vm.output(), "/ by zero\n");
    }

    #[test]
    fn test_uncaught_exception_reports_class_and_message() {
        crate::test_utils::init_test_logging();
        let mut main = MethodBuilder::new("main", "([Ljava/lang/String;)V", access::PUBLIC | access::STATIC);
        main.emit(Instruction::New("java/lang/IllegalStateException".to_string()));
        main.emit(Instruction::Dup);
        main.emit(Instruction::Ldc(Constant::String("boom".to_string())));
        main.emit(Instruction::invoke(
            InvokeKind::Special,
            "java/lang/IllegalStateException",
            "<init>",
            "(Ljava/lang/String;)V",
        ));
        main.emit(Instruction::Athrow);

        let mut vm = Vm::new();
        vm.load(demo(vec![main]));
        let error = vm.run_main("Demo", &[]).unwrap_err();
        assert_eq!(
            error,
            VmError::Uncaught {
                class: "java.lang.IllegalStateException".to_string(),
                message: "boom".to_string(),
            }
        );
        assert_eq!(
            error.to_string(),
            "Exception in thread \"main\" java.lang.IllegalStateException: boom"
        );
    }

    #[test]
    fn test_dup2_x1_with_wide_value() {
        // int, long -> long, int, long
        let mut f = MethodBuilder::new("f", "()J", access::STATIC);
        f.emit(Instruction::Iconst(7));
        f.emit(Instruction::Lconst(5));
        f.emit(Instruction::Dup2X1);
        f.emit(Instruction::Pop2);
        f.emit(Instruction::Pop);
        f.emit(Instruction::Return(Some(Kind::Long)));

        let mut vm = Vm::new();
        vm.load(demo(vec![f]));
        let result = vm.invoke_static("Demo", "f", "()J", Vec::new()).unwrap();
        assert!(matches!(result, Some(Value::Long(5))));
    }

    #[test]
    fn test_array_bounds_and_loop() {
        // sum of new int[3] after a[i] = i * 2
        let types = TypeSystem::new();
        let int = types.primitive(Primitive::Int);
        let mut f = MethodBuilder::new("f", "()I", access::STATIC);
        let array = f.local("a", &types.array_of(&int));
        let i = f.local("i", &int);
        let sum = f.local("sum", &int);
        let (top, done) = (f.label(), f.label());
        f.emit(Instruction::Iconst(3));
        f.emit(Instruction::NewArray(Primitive::Int));
        f.emit(Instruction::Store(Kind::Ref, array));
        f.emit(Instruction::Iconst(0));
        f.emit(Instruction::Store(Kind::Int, i));
        f.emit(Instruction::Iconst(0));
        f.emit(Instruction::Store(Kind::Int, sum));
        f.set(top);
        f.emit(Instruction::Load(Kind::Int, i));
        f.emit(Instruction::Load(Kind::Ref, array));
        f.emit(Instruction::ArrayLength);
        f.emit(Instruction::IfIcmp(Cond::Ge, done));
        f.emit(Instruction::Load(Kind::Ref, array));
        f.emit(Instruction::Load(Kind::Int, i));
        f.emit(Instruction::Load(Kind::Int, i));
        f.emit(Instruction::Iconst(2));
        f.emit(Instruction::Arith(Kind::Int, ArithOp::Mul));
        f.emit(Instruction::ArrayStore(ArrayKind::Int));
        f.emit(Instruction::Load(Kind::Int, sum));
        f.emit(Instruction::Load(Kind::Ref, array));
        f.emit(Instruction::Load(Kind::Int, i));
        f.emit(Instruction::ArrayLoad(ArrayKind::Int));
        f.emit(Instruction::Arith(Kind::Int, ArithOp::Add));
        f.emit(Instruction::Store(Kind::Int, sum));
        f.emit(Instruction::Iinc(i, 1));
        f.goto(top);
        f.set(done);
        f.emit(Instruction::Load(Kind::Int, sum));
        f.emit(Instruction::Return(Some(Kind::Int)));

        let mut g = MethodBuilder::new("g", "()I", access::STATIC);
        g.emit(Instruction::Iconst(1));
        g.emit(Instruction::NewArray(Primitive::Int));
        g.emit(Instruction::Iconst(1));
        g.emit(Instruction::ArrayLoad(ArrayKind::Int));
        g.emit(Instruction::Return(Some(Kind::Int)));

        let mut vm = Vm::new();
        vm.load(demo(vec![f, g]));
        let sum = vm.invoke_static("Demo", "f", "()I", Vec::new()).unwrap();
        assert!(matches!(sum, Some(Value::Int(6))));
        let error = vm.invoke_static("Demo", "g", "()I", Vec::new()).unwrap_err();
        assert_eq!(
            error,
            VmError::Uncaught {
                class: "java.lang.ArrayIndexOutOfBoundsException".to_string(),
                message: "Index 1 out of bounds for length 1".to_string(),
            }
        );
    }

    #[test]
    fn test_static_initializer_runs_once_before_first_use() {
        let types = TypeSystem::new();
        let int = types.primitive(Primitive::Int);
        let counter = FieldRef {
            owner: "Demo".to_string(),
            name: "count".to_string(),
            descriptor: "I".to_string(),
        };
        let mut clinit = MethodBuilder::new("<clinit>", "()V", access::STATIC);
        clinit.emit(Instruction::GetStatic(counter.clone()));
        clinit.emit(Instruction::Iconst(10));
        clinit.emit(Instruction::Arith(Kind::Int, ArithOp::Add));
        clinit.emit(Instruction::PutStatic(counter.clone()));
        clinit.emit(Instruction::Return(None));
        let mut bump = MethodBuilder::new("bump", "()I", access::STATIC);
        bump.emit(Instruction::GetStatic(counter.clone()));
        bump.emit(Instruction::Iconst(1));
        bump.emit(Instruction::Arith(Kind::Int, ArithOp::Add));
        bump.emit(Instruction::Dup);
        bump.emit(Instruction::PutStatic(counter));
        bump.emit(Instruction::Return(Some(Kind::Int)));

        let mut class = ClassBuilder::new("Demo", Some(OBJECT.to_string()), Vec::new(), access::PUBLIC);
        class.add_field(FieldInfo::new("count", &int, access::PRIVATE | access::STATIC));
        class.add_method(clinit.stop().unwrap());
        class.add_method(bump.stop().unwrap());

        let mut vm = Vm::new();
        vm.load(class.finish());
        vm.invoke_static("Demo", "bump", "()I", Vec::new()).unwrap();
        let second = vm.invoke_static("Demo", "bump", "()I", Vec::new()).unwrap();
        assert!(matches!(second, Some(Value::Int(12))));
        assert!(matches!(vm.static_field("Demo", "count"), Some(Value::Int(12))));
    }

    #[test]
    fn test_subtyping_across_user_and_library_classes() {
        let mut vm = Vm::new();
        let class = ClassBuilder::new(
            "Oops",
            Some("java/lang/IllegalArgumentException".to_string()),
            vec!["java/lang/Runnable".to_string()],
            access::PUBLIC,
        );
        vm.load(class.finish());
        assert!(vm.is_subtype("Oops", "java/lang/RuntimeException"));
        assert!(vm.is_subtype("Oops", "java/lang/Runnable"));
        assert!(vm.is_subtype("Oops", "java/lang/Throwable"));
        assert!(!vm.is_subtype("Oops", "java/lang/Error"));
        assert!(vm.is_subtype("[Ljava/lang/String;", "[Ljava/lang/Object;"));
        assert!(!vm.is_subtype("[I", "[J"));
        assert!(vm.is_subtype("java/util/Collections$UnmodifiableList", "java/util/List"));

        let Value::Ref(object) = vm.instantiate("Oops").unwrap() else {
            panic!("expected an object");
        };
        assert!(object.lock().field(MESSAGE_FIELD).is_some());
    }

    #[test]
    fn test_unbounded_recursion_is_fatal() {
        let mut f = MethodBuilder::new("f", "()V", access::STATIC);
        f.emit(Instruction::invoke(InvokeKind::Static, "Demo", "f", "()V"));
        f.emit(Instruction::Return(None));
        let mut vm = Vm::new();
        vm.load(demo(vec![f]));
        let outcome = std::thread::Builder::new()
            .stack_size(64 << 20)
            .spawn(move || vm.invoke_static("Demo", "f", "()V", Vec::new()).err())
            .unwrap()
            .join()
            .unwrap();
        assert_eq!(outcome, Some(VmError::StackOverflow));
    }
}
