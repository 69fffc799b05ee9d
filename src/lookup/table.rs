// Jvmgen Method Table
// Member registry and overload resolution over builtin and user classes

use std::sync::Arc;

use parking_lot::RwLock;
use rustc_hash::FxHashMap;

use super::intrinsics::{comparison_op, math_op, widens_to};
use super::{
    ArrayMember, ArrayOp, ClassLiteral, Comparison, InstanceOf, JavaField, JavaMethod, Math, Method,
    MethodResolver, Not,
};
use crate::bytecode::{ArithOp, Cond};
use crate::error::EmitResult;
use crate::types::{Primitive, Type, TypeSystem};

#[derive(Debug, Clone, Copy)]
enum Builtin {
    Method,
    Static,
    Constructor,
    StaticField,
}

type BuiltinMember = (&'static str, &'static str, &'static [&'static str], &'static str, Builtin);

const OBJECT: &str = "java.lang.Object";
const STRING: &str = "java.lang.String";
const BUILDER: &str = "java.lang.StringBuilder";
const LIST: &str = "java.util.List";

/// Runtime library members visible to every script
const BUILTINS: &[BuiltinMember] = &[
    (OBJECT, "<init>", &[], "void", Builtin::Constructor),
    (OBJECT, "toString", &[], STRING, Builtin::Method),
    (OBJECT, "equals", &[OBJECT], "boolean", Builtin::Method),
    (OBJECT, "hashCode", &[], "int", Builtin::Method),
    (STRING, "length", &[], "int", Builtin::Method),
    (STRING, "toString", &[], STRING, Builtin::Method),
    (STRING, "concat", &[STRING], STRING, Builtin::Method),
    (STRING, "equals", &[OBJECT], "boolean", Builtin::Method),
    (STRING, "toUpperCase", &[], STRING, Builtin::Method),
    (BUILDER, "<init>", &[], "void", Builtin::Constructor),
    (BUILDER, "<init>", &[STRING], "void", Builtin::Constructor),
    (BUILDER, "append", &[STRING], BUILDER, Builtin::Method),
    (BUILDER, "append", &[OBJECT], BUILDER, Builtin::Method),
    (BUILDER, "toString", &[], STRING, Builtin::Method),
    ("java.lang.System", "out", &[], "java.io.PrintStream", Builtin::StaticField),
    ("java.lang.Integer", "parseInt", &[STRING], "int", Builtin::Static),
    ("java.util.ArrayList", "<init>", &[], "void", Builtin::Constructor),
    ("java.util.ArrayList", "<init>", &["int"], "void", Builtin::Constructor),
    (LIST, "add", &[OBJECT], "boolean", Builtin::Method),
    (LIST, "get", &["int"], OBJECT, Builtin::Method),
    (LIST, "size", &[], "int", Builtin::Method),
    ("java.util.Collections", "unmodifiableList", &[LIST], LIST, Builtin::Static),
    ("java.util.regex.Pattern", "compile", &[STRING], "java.util.regex.Pattern", Builtin::Static),
    ("java.util.regex.Pattern", "pattern", &[], STRING, Builtin::Method),
    ("java.lang.Throwable", "getMessage", &[], STRING, Builtin::Method),
    ("java.lang.Runnable", "run", &[], "void", Builtin::Method),
    ("java.util.Calendar", "AM", &[], "int", Builtin::StaticField),
    ("java.util.Calendar", "PM", &[], "int", Builtin::StaticField),
    ("java.util.GregorianCalendar", "<init>", &[], "void", Builtin::Constructor),
];

/// Overloads of `print`/`println` on PrintStream
const PRINTABLE: &[&str] = &["boolean", "char", "int", "long", "float", "double", STRING, OBJECT];

const THROWABLES: &[&str] = &[
    "java.lang.Throwable",
    "java.lang.Exception",
    "java.lang.Error",
    "java.lang.RuntimeException",
    "java.lang.IllegalArgumentException",
    "java.lang.IllegalStateException",
    "java.lang.UnsupportedOperationException",
    "java.lang.ArithmeticException",
    "java.lang.NullPointerException",
    "java.lang.ClassCastException",
    "java.lang.IndexOutOfBoundsException",
    "java.lang.ArrayIndexOutOfBoundsException",
];

type MemberKey = (String, String);

/// Registry of members keyed by owning class and member name. Primitive
/// and array receivers get synthesized intrinsics instead of entries.
pub struct MethodTable<'t> {
    types: &'t TypeSystem,
    members: RwLock<FxHashMap<MemberKey, Vec<Arc<dyn Method>>>>,
}

impl<'t> MethodTable<'t> {
    pub fn new(types: &'t TypeSystem) -> EmitResult<Self> {
        let table = Self {
            types,
            members: RwLock::new(FxHashMap::default()),
        };
        table.install_builtins()?;
        Ok(table)
    }

    fn install_builtins(&self) -> EmitResult<()> {
        let types = self.types;
        for (owner, name, args, ret, kind) in BUILTINS {
            let owner_type = types.get(owner)?;
            let args = args.iter().map(|a| types.get(a)).collect::<EmitResult<Vec<_>>>()?;
            let ret = types.get(ret)?;
            let member: Arc<dyn Method> = match kind {
                Builtin::Method => Arc::new(JavaMethod::new(owner_type, *name, args, ret, false)),
                Builtin::Static => Arc::new(JavaMethod::new(owner_type, *name, args, ret, true)),
                Builtin::Constructor => Arc::new(JavaMethod::constructor(owner_type, args, ret)),
                Builtin::StaticField => Arc::new(JavaField::getter(owner_type, *name, ret, true)),
            };
            self.declare(member);
        }

        let stream = types.get("java.io.PrintStream")?;
        let void = types.void();
        self.declare(Arc::new(JavaMethod::new(stream.clone(), "println", Vec::new(), void.clone(), false)));
        for printable in PRINTABLE {
            let arg = types.get(printable)?;
            for name in ["print", "println"] {
                self.declare(Arc::new(JavaMethod::new(
                    stream.clone(),
                    name,
                    vec![arg.clone()],
                    void.clone(),
                    false,
                )));
            }
        }

        for primitive in Primitive::ALL {
            let wrapper = types.get(primitive.wrapper())?;
            let value = types.primitive(primitive);
            self.declare(Arc::new(JavaMethod::new(
                wrapper.clone(),
                "valueOf",
                vec![value.clone()],
                wrapper.clone(),
                true,
            )));
            self.declare(Arc::new(JavaMethod::new(
                wrapper,
                format!("{}Value", primitive.name()),
                Vec::new(),
                value,
                false,
            )));
        }

        let string = types.string();
        for name in THROWABLES {
            let class = types.get(name)?;
            self.declare(Arc::new(JavaMethod::constructor(class.clone(), Vec::new(), void.clone())));
            self.declare(Arc::new(JavaMethod::constructor(class, vec![string.clone()], void.clone())));
        }
        Ok(())
    }

    // ==================== Applicability ====================

    /// Conversion cost of passing `arg` where `param` is expected, `None`
    /// if it is not allowed at all
    fn conversion_cost(&self, param: &Type, arg: &Type) -> Option<u32> {
        if param == arg {
            return Some(0);
        }
        if let (Some(to), Some(from)) = (param.primitive(), arg.primitive()) {
            return widens_to(from, to).then_some(1);
        }
        if param.assignable_from(arg) {
            return Some(1);
        }
        if let (false, Some(from)) = (param.is_primitive(), arg.primitive()) {
            let wrapper = self.types.get(from.wrapper()).ok()?;
            return param.assignable_from(&wrapper).then_some(2);
        }
        None
    }

    fn cost(&self, member: &dyn Method, args: &[Type]) -> Option<u32> {
        let params = member.argument_types();
        if params.len() != args.len() {
            return None;
        }
        params
            .iter()
            .zip(args)
            .map(|(p, a)| self.conversion_cost(p, a))
            .sum()
    }

    /// Cheapest applicable candidate declared directly on `owner`
    fn best_on(
        &self,
        owner: &Type,
        name: &str,
        args: &[Type],
        accept: impl Fn(&dyn Method) -> bool,
    ) -> Option<Arc<dyn Method>> {
        let members = self.members.read();
        let candidates = members.get(&(owner.name().to_string(), name.to_string()))?;
        let mut best: Option<(u32, &Arc<dyn Method>)> = None;
        for member in candidates {
            let member_ref: &dyn Method = member.as_ref();
            if !accept(member_ref) {
                continue;
            }
            let Some(cost) = self.cost(member_ref, args) else { continue };
            if best.map_or(true, |(lowest, _)| cost < lowest) {
                best = Some((cost, member));
            }
        }
        best.map(|(_, member)| member.clone())
    }

    // ==================== Intrinsics ====================

    fn primitive_member(&self, receiver: &Type, p: Primitive, name: &str, args: &[Type]) -> Option<Arc<dyn Method>> {
        let types = self.types;
        let int = types.primitive(Primitive::Int);
        let boolean = types.primitive(Primitive::Boolean);

        match (name, args) {
            ("!", []) if p == Primitive::Boolean => return Some(Arc::new(Not::new(boolean))),
            ("-@", []) if p.is_numeric() => {
                let operand = types.primitive(p.stack_type());
                return Some(Arc::new(Math::negate(receiver.clone(), operand, int)));
            }
            _ => {}
        }

        let [arg] = args else { return None };
        let other = arg.primitive()?;
        let both_boolean = p == Primitive::Boolean && other == Primitive::Boolean;

        if let Some(op) = math_op(name) {
            let operand = match op {
                ArithOp::Shl | ArithOp::Shr | ArithOp::Ushr => {
                    let integral = |q: Primitive| q.is_numeric() && (q.is_int_like() || q == Primitive::Long);
                    if !integral(p) || !integral(other) {
                        return None;
                    }
                    types.primitive(p.stack_type())
                }
                ArithOp::And | ArithOp::Or | ArithOp::Xor if both_boolean => boolean.clone(),
                _ if p.is_numeric() && other.is_numeric() => types.primitive(p.promote(other)),
                _ => return None,
            };
            return Some(Arc::new(Math::binary(name, op, receiver.clone(), arg.clone(), operand, int)));
        }

        if let Some(cond) = comparison_op(name) {
            let operand = if both_boolean && matches!(cond, Cond::Eq | Cond::Ne) {
                boolean.clone()
            } else if p.is_numeric() && other.is_numeric() {
                types.primitive(p.promote(other))
            } else {
                return None;
            };
            return Some(Arc::new(Comparison::new(name, cond, receiver.clone(), arg.clone(), operand, boolean)));
        }
        None
    }

    fn array_member(&self, receiver: &Type, name: &str, args: &[Type]) -> Option<Arc<dyn Method>> {
        let types = self.types;
        let int = types.primitive(Primitive::Int);
        let component = receiver.component_type()?.clone();
        let index_ok = |t: &Type| t.primitive().map(|p| widens_to(p, Primitive::Int)).unwrap_or(false);

        let (op, params, ret) = match (name, args) {
            ("[]", [index]) if index_ok(index) => (ArrayOp::Get, vec![int], component),
            ("[]=", [index, value]) if index_ok(index) && self.conversion_cost(&component, value).is_some() => {
                (ArrayOp::Set, vec![int, component.clone()], component)
            }
            ("length" | "size", []) => (ArrayOp::Length, Vec::new(), int),
            ("empty?", []) => (ArrayOp::Empty, Vec::new(), types.primitive(Primitive::Boolean)),
            ("first!", []) => (ArrayOp::First, Vec::new(), component),
            ("last!", []) => (ArrayOp::Last, Vec::new(), component),
            ("join", []) => (ArrayOp::Join, Vec::new(), types.string()),
            ("join", [_]) => (ArrayOp::Join, vec![types.string()], types.string()),
            _ => return None,
        };
        let member = ArrayMember::new(name, op, receiver.clone(), params, ret).ok()?;
        Some(Arc::new(member))
    }

    // ==================== Class members ====================

    /// Static members, searched up the superclass chain
    fn static_member(&self, class: &Type, name: &str, args: &[Type]) -> Option<Arc<dyn Method>> {
        let mut current = Some(class.clone());
        while let Some(owner) = current {
            if let Some(found) = self.best_on(&owner, name, args, |m| m.is_static() && !is_constructor(m)) {
                return Some(found);
            }
            current = owner.superclass().ok().flatten();
        }
        None
    }

    fn instance_member(&self, receiver: &Type, name: &str, args: &[Type]) -> Option<Arc<dyn Method>> {
        let lineage = std::iter::once(receiver.clone()).chain(receiver.ancestors_and_interfaces(self.types));
        for owner in lineage {
            if let Some(found) = self.best_on(&owner, name, args, |m| !m.is_static()) {
                return Some(found);
            }
        }
        if receiver.is_array() {
            return None;
        }
        self.static_member(receiver, name, args)
    }
}

fn is_constructor(member: &dyn Method) -> bool {
    member.kind() == super::MemberKind::Constructor
}

impl MethodResolver for MethodTable<'_> {
    fn resolve(&self, receiver: &Type, name: &str, args: &[Type]) -> Option<Arc<dyn Method>> {
        if receiver.is_error() {
            return None;
        }
        if let Some(p) = receiver.primitive() {
            return self.primitive_member(receiver, p, name, args);
        }
        if receiver.is_array() {
            if let Some(member) = self.array_member(receiver, name, args) {
                return Some(member);
            }
            return self.instance_member(receiver, name, args);
        }
        if receiver.is_meta() {
            let class = receiver.unmeta();
            return match (name, args) {
                ("new", _) => self.constructor(class, args),
                ("class", []) => {
                    let class_type = self.types.get("java.lang.Class").ok()?;
                    Some(Arc::new(ClassLiteral::new(receiver.clone(), class_type)))
                }
                _ => self.static_member(class, name, args),
            };
        }
        if let ("kind_of?", [tested]) = (name, args) {
            if tested.is_meta() {
                let boolean = self.types.primitive(Primitive::Boolean);
                return Some(Arc::new(InstanceOf::new(receiver.clone(), tested.clone(), boolean)));
            }
        }
        self.instance_member(receiver, name, args)
    }

    fn constructor(&self, ty: &Type, args: &[Type]) -> Option<Arc<dyn Method>> {
        self.best_on(ty.unmeta(), "<init>", args, is_constructor)
    }

    fn declare(&self, member: Arc<dyn Method>) {
        let owner = member.declaring_type().unmeta().name().to_string();
        let key = (owner, member.name().to_string());
        let mut members = self.members.write();
        let overloads = members.entry(key).or_default();
        let descriptor = member.descriptor();
        let is_static = member.is_static();
        overloads.retain(|m| m.descriptor() != descriptor || m.is_static() != is_static);
        overloads.push(member);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lookup::MemberKind;
    use pretty_assertions::assert_eq;

    fn table(types: &TypeSystem) -> MethodTable<'_> {
        MethodTable::new(types).unwrap()
    }

    #[test]
    fn test_math_promotes_operands() {
        let types = TypeSystem::new();
        let methods = table(&types);
        let int = types.primitive(Primitive::Int);
        let long = types.primitive(Primitive::Long);

        let plus = methods.resolve(&int, "+", &[long.clone()]).unwrap();
        assert_eq!(plus.kind(), MemberKind::MathOp);
        assert_eq!(plus.return_type(), &long);

        let shift = methods.resolve(&long, "<<", &[int.clone()]).unwrap();
        assert_eq!(shift.return_type(), &long);

        let less = methods.resolve(&int, "<", &[types.primitive(Primitive::Double)]).unwrap();
        assert!(less.branches());
        assert!(less.return_type().is_boolean());
    }

    #[test]
    fn test_boolean_operators() {
        let types = TypeSystem::new();
        let methods = table(&types);
        let boolean = types.primitive(Primitive::Boolean);
        assert!(methods.resolve(&boolean, "!", &[]).is_some());
        assert!(methods.resolve(&boolean, "==", &[boolean.clone()]).is_some());
        assert!(methods.resolve(&boolean, "<", &[boolean.clone()]).is_none());
        assert!(methods.resolve(&boolean, "+", &[boolean.clone()]).is_none());
    }

    #[test]
    fn test_overloads_prefer_exact_match() {
        let types = TypeSystem::new();
        let methods = table(&types);
        let builder = types.get(BUILDER).unwrap();

        let append = methods.resolve(&builder, "append", &[types.string()]).unwrap();
        assert_eq!(append.descriptor(), "(Ljava/lang/String;)Ljava/lang/StringBuilder;");

        let boxed = methods
            .resolve(&builder, "append", &[types.primitive(Primitive::Int)])
            .unwrap();
        assert_eq!(boxed.descriptor(), "(Ljava/lang/Object;)Ljava/lang/StringBuilder;");
    }

    #[test]
    fn test_interface_and_inherited_members() {
        let types = TypeSystem::new();
        let methods = table(&types);
        let list = types.get("java.util.ArrayList").unwrap();
        let add = methods.resolve(&list, "add", &[types.string()]).unwrap();
        assert_eq!(add.declaring_type().name(), LIST);

        let to_s = methods.resolve(&list, "toString", &[]).unwrap();
        assert_eq!(to_s.declaring_type(), &types.object());
    }

    #[test]
    fn test_static_field_inherited_through_meta() {
        let types = TypeSystem::new();
        let methods = table(&types);
        let gregorian = types.meta_of(&types.get("java.util.GregorianCalendar").unwrap());
        let am = methods.resolve(&gregorian, "AM", &[]).unwrap();
        assert_eq!(am.kind(), MemberKind::StaticFieldAccess);
        assert_eq!(am.declaring_type().name(), "java.util.Calendar");

        let ctor = methods.resolve(&gregorian, "new", &[]).unwrap();
        assert_eq!(ctor.kind(), MemberKind::Constructor);
    }

    #[test]
    fn test_array_members() {
        let types = TypeSystem::new();
        let methods = table(&types);
        let ints = types.array_of(&types.primitive(Primitive::Int));
        let join = methods.resolve(&ints, "join", &[types.string()]).unwrap();
        assert_eq!(join.return_type(), &types.string());
        let get = methods.resolve(&ints, "[]", &[types.primitive(Primitive::Short)]).unwrap();
        assert_eq!(get.kind(), MemberKind::ArrayAccess);
        assert!(methods.resolve(&ints, "[]", &[types.string()]).is_none());
    }

    #[test]
    fn test_declared_members_and_missing_names() {
        let types = TypeSystem::new();
        let methods = table(&types);
        let foo = types.define_class("Foo", None, &[], false).unwrap();
        methods.declare(Arc::new(JavaMethod::new(
            foo.clone(),
            "bar",
            vec![types.primitive(Primitive::Int)],
            types.string(),
            true,
        )));

        let meta = types.meta_of(&foo);
        assert!(methods.resolve(&meta, "bar", &[types.primitive(Primitive::Byte)]).is_some());
        assert!(methods.resolve(&meta, "bar", &[]).is_none());
        assert!(methods.resolve(&foo, "missing", &[]).is_none());
        assert!(methods.resolve(&types.error("bad"), "bar", &[]).is_none());
    }

    #[test]
    fn test_kind_of_and_class_literal() {
        let types = TypeSystem::new();
        let methods = table(&types);
        let string_meta = types.meta_of(&types.string());
        let kind_of = methods.resolve(&types.object(), "kind_of?", &[string_meta.clone()]).unwrap();
        assert_eq!(kind_of.kind(), MemberKind::InstanceOf);
        let class = methods.resolve(&string_meta, "class", &[]).unwrap();
        assert_eq!(class.return_type().name(), "java.lang.Class");
    }
}
