// Jvmgen Object Tests
// Classes, closures, arrays, strings and casts compiled and run end to end

mod common;

use common::{compile, output_of, run};
use jvmgen::ast::{AstBuilder, ClassDef, Delegation, Node};
use jvmgen::types::{Primitive, TypeSystem};
use jvmgen::vm::Vm;
use jvmgen::{CompileError, VmError};
use pretty_assertions::assert_eq;

#[test]
fn test_int_array_join() {
    let output = output_of(|b| {
        let int = b.prim(Primitive::Int);
        let ints = b.types().array_of(&int);
        let three = b.int(3);
        let alloc = b.empty_array(int.clone(), three);
        let mut statements = vec![b.assign("a", alloc)];
        for (index, value) in [5, 1, 3].into_iter().enumerate() {
            let array = b.local("a", ints.clone());
            let index = b.int(index as i64);
            let value = b.int(value);
            statements.push(b.call(array, "[]=", vec![index, value], int.clone()));
        }
        let array = b.local("a", ints.clone());
        let separator = b.string(":");
        let string = b.types().string();
        let joined = b.call(array, "join", vec![separator], string);
        statements.push(b.puts(vec![joined]));
        let array = b.local("a", ints);
        let length = b.call(array, "length", Vec::new(), int);
        statements.push(b.puts(vec![length]));
        b.script(statements)
    });
    assert_eq!(output, "5:1:3\n3\n");
}

#[test]
fn test_array_index_out_of_bounds() {
    let (_, result) = run(|b| {
        let int = b.prim(Primitive::Int);
        let ints = b.types().array_of(&int);
        let two = b.int(2);
        let alloc = b.empty_array(int.clone(), two);
        let init = b.assign("a", alloc);
        let array = b.local("a", ints);
        let index = b.int(5);
        let read = b.call(array, "[]", vec![index], int);
        let show = b.puts(vec![read]);
        b.script(vec![init, show])
    });
    match result {
        Err(VmError::Uncaught { class, .. }) => assert_eq!(class, "java.lang.ArrayIndexOutOfBoundsException"),
        other => panic!("expected an uncaught exception, got {:?}", other),
    }
}

#[test]
fn test_array_literal_is_immutable() {
    let output = output_of(|b| {
        let list_type = b.ty("java.util.List");
        let int = b.prim(Primitive::Int);
        let boolean = b.prim(Primitive::Boolean);
        let void = b.types().void();

        let one = b.int(1);
        let two = b.int(2);
        let literal = b.array(vec![one, two]);
        let init = b.assign("list", literal);

        let list = b.local("list", list_type.clone());
        let three = b.int(3);
        let add = b.call(list, "add", vec![three], boolean);
        let text = b.string("immutable");
        let report = b.puts(vec![text]);
        let clause = b.rescue_clause(None, &["java.lang.UnsupportedOperationException"], report);
        let attempt = b.rescue(add, vec![clause], None, void);

        let list = b.local("list", list_type);
        let size = b.call(list, "size", Vec::new(), int);
        let show = b.puts(vec![size]);
        b.script(vec![init, attempt, show])
    });
    assert_eq!(output, "immutable\n2\n");
}

#[test]
fn test_string_concat_and_eval() {
    let output = output_of(|b| {
        let label = b.string("n=");
        let five = b.int(5);
        let comma = b.string(", ");
        let flag = b.boolean(true);
        let joined = b.concat(vec![label, five, comma, flag]);
        let first = b.puts(vec![joined]);
        let nothing = b.null();
        let shown = b.eval(nothing);
        let second = b.puts(vec![shown]);
        let c = b.char('x');
        let third = b.puts(vec![c]);
        b.script(vec![first, second, third])
    });
    assert_eq!(output, "n=5, true\nnull\nx\n");
}

#[test]
fn test_primitive_and_reference_casts() {
    let output = output_of(|b| {
        let int = b.prim(Primitive::Int);
        let long = b.prim(Primitive::Long);
        let char_type = b.prim(Primitive::Char);
        let double = b.prim(Primitive::Double);
        let object = b.types().object();
        let string = b.types().string();

        let value = b.double(3.7);
        let init_d = b.assign("d", value);
        let d = b.local("d", double);
        let truncated = b.cast(d, int.clone());
        let show_int = b.puts(vec![truncated]);

        let code = b.int(65);
        let letter = b.cast(code, char_type);
        let show_char = b.puts(vec![letter]);

        let seven = b.int(7);
        let wide = b.cast(seven, long);
        let show_long = b.puts(vec![wide]);

        let text = b.string("hi");
        let upcast = b.cast(text, object.clone());
        let init_o = b.assign("o", upcast);
        let o = b.local("o", object);
        let downcast = b.cast(o, string);
        let length = b.call(downcast, "length", Vec::new(), int);
        let show_length = b.puts(vec![length]);
        b.script(vec![init_d, show_int, show_char, show_long, init_o, show_length])
    });
    assert_eq!(output, "3\nA\n7\n2\n");
}

#[test]
fn test_class_with_fields_and_constructor() {
    // class Counter; def initialize(start: int); @count = start; end
    //   def bump: int; @count = @count + 1; end; end
    let output = output_of(|b| {
        let int = b.prim(Primitive::Int);
        let start_arg = b.arg("start", int.clone());
        let start = b.local("start", int.clone());
        let store = b.field_assign("count", start, false);
        let ctor = b.constructor(vec![start_arg], None, Some(store));

        let count = b.field("count", int.clone(), false);
        let one = b.int(1);
        let next = b.call(count, "+", vec![one], int.clone());
        let bump_body = b.field_assign("count", next, false);
        let bump = b.method("bump", Vec::new(), int.clone(), Some(bump_body));
        let class = b.class_def(ClassDef {
            name: "Counter".to_string(),
            superclass: None,
            interfaces: Vec::new(),
            is_interface: false,
            body: vec![ctor, bump],
        });

        let five = b.int(5);
        let created = b.new_object("Counter", vec![five]);
        let init = b.assign("c", created);
        let counter = b.ty("Counter");
        let c = b.local("c", counter.clone());
        let first = b.call(c, "bump", Vec::new(), int.clone());
        let c = b.local("c", counter);
        let second = b.call(c, "bump", Vec::new(), int);
        let show = b.puts(vec![second]);
        b.script(vec![class, init, first, show])
    });
    assert_eq!(output, "7\n");
}

#[test]
fn test_closure_shares_captured_local() {
    // x = 10; r = Runnable { puts x }; x = 20; r.run
    let output = output_of(|b| {
        let int = b.prim(Primitive::Int);
        let void = b.types().void();

        let ten = b.int(10);
        let first = b.assign("x", ten);
        let x = b.local("x", int.clone());
        let body = b.puts(vec![x]);
        let run_method = b.method("run", Vec::new(), void.clone(), Some(body));
        let closure = b.closure("Demo$Closure1", &["java.lang.Runnable"], vec![run_method]);
        let closure_type = b.ty("Demo$Closure1");
        let keep = b.assign("r", closure);
        let twenty = b.int(20);
        let second = b.assign("x", twenty);
        let r = b.local("r", closure_type);
        let call = b.call(r, "run", Vec::new(), void);
        b.script(vec![first, keep, second, call])
    });
    assert_eq!(output, "20\n");
}

#[test]
fn test_closure_writes_are_visible_outside() {
    // total = 1; r = Runnable { total = total + 41 }; r.run; puts total
    let output = output_of(|b| {
        let int = b.prim(Primitive::Int);
        let void = b.types().void();

        let one = b.int(1);
        let init = b.assign("total", one);
        let total = b.local("total", int.clone());
        let more = b.int(41);
        let sum = b.call(total, "+", vec![more], int.clone());
        let update = b.assign("total", sum);
        let run_method = b.method("run", Vec::new(), void.clone(), Some(update));
        let closure = b.closure("Demo$Closure1", &["java.lang.Runnable"], vec![run_method]);
        let closure_type = b.ty("Demo$Closure1");
        let keep = b.assign("r", closure);
        let r = b.local("r", closure_type);
        let call = b.call(r, "run", Vec::new(), void);
        let total = b.local("total", int);
        let show = b.puts(vec![total]);
        b.script(vec![init, keep, call, show])
    });
    assert_eq!(output, "42\n");
}

#[test]
fn test_optional_argument_overloads() {
    // def greet(name: String, greeting: String = "hello"): String
    let output = output_of(|b| {
        let string = b.types().string();
        let name_arg = b.arg("name", string.clone());
        let default = b.string("hello");
        let greeting_arg = b.opt_arg("greeting", string.clone(), default);
        let greeting = b.local("greeting", string.clone());
        let space = b.string(" ");
        let name = b.local("name", string.clone());
        let text = b.concat(vec![greeting, space, name]);
        let method = b.static_method("greet", vec![name_arg, greeting_arg], string.clone(), Some(text));

        let who = b.string("world");
        let short = b.fcall("greet", vec![who], string.clone());
        let show_short = b.puts(vec![short]);
        let who = b.string("there");
        let hi = b.string("hi");
        let full = b.fcall("greet", vec![who, hi], string);
        let show_full = b.puts(vec![full]);
        b.script(vec![method, show_short, show_full])
    });
    assert_eq!(output, "hello world\nhi there\n");
}

#[test]
fn test_break_outside_loop_is_a_diagnostic() {
    let types = TypeSystem::new();
    let result = compile(&types, |b| {
        b.at_line(3);
        let stray = b.break_();
        b.no_position();
        b.script(vec![stray])
    });
    let error = match result {
        Err(error @ CompileError::Failed(_)) => error,
        other => panic!("expected diagnostics, got {:?}", other.map(|unit| unit.classes().len())),
    };
    let diagnostics = error.diagnostics();
    assert_eq!(diagnostics.len(), 1);
    assert_eq!(diagnostics[0].message, "break outside of loop");
    assert_eq!(diagnostics[0].span.start.line, 3);

    colored::control::set_override(false);
    assert_eq!(
        error.render(Some("x = 1\ny = 2\nbreak")),
        "SyntaxError: break outside of loop at demo.mirah:3:1\n\n   2 | y = 2\n   3 | break\n       ^\n\
         Compilation failed due to 1 previous error(s)\n"
    );
}

#[test]
fn test_script_class_shape() {
    let types = TypeSystem::new();
    let unit = compile(&types, |b| {
        let text = b.string("hi");
        let show = b.puts(vec![text]);
        b.script(vec![show])
    })
    .unwrap();
    let main = unit.main_class().unwrap();
    assert_eq!(main.name, "Demo");
    assert!(main.method("main", "([Ljava/lang/String;)V").is_some());
    assert!(main.method("<init>", "()V").is_some());

    let mut vm = Vm::new();
    vm.load_unit(unit);
    vm.run_main("Demo", &[]).unwrap();
    assert_eq!(vm.output(), "hi\n");
}

fn class(b: &mut AstBuilder<'_>, name: &str, superclass: Option<&str>, body: Vec<Node>) -> Node {
    b.class_def(ClassDef {
        name: name.to_string(),
        superclass: superclass.map(String::from),
        interfaces: Vec::new(),
        is_interface: false,
        body,
    })
}

#[test]
fn test_constructor_delegation() {
    // class Base; def initialize(start: int); @n = start; end; def value: int; @n; end; end
    // class Child < Base
    //   def initialize(x: int); super(x + 1); end
    //   def initialize; initialize(10); end
    // end
    let output = output_of(|b| {
        let int = b.prim(Primitive::Int);
        let start_arg = b.arg("start", int.clone());
        let start = b.local("start", int.clone());
        let store = b.field_assign("n", start, false);
        let base_ctor = b.constructor(vec![start_arg], None, Some(store));
        let n = b.field("n", int.clone(), false);
        let value = b.method("value", Vec::new(), int.clone(), Some(n));
        let base = class(b, "Base", None, vec![base_ctor, value]);

        let x_arg = b.arg("x", int.clone());
        let x = b.local("x", int.clone());
        let one = b.int(1);
        let bumped = b.call(x, "+", vec![one], int.clone());
        let to_super = Delegation {
            calls_super: true,
            args: vec![bumped],
        };
        let with_x = b.constructor(vec![x_arg], Some(to_super), None);
        let ten = b.int(10);
        let to_self = Delegation {
            calls_super: false,
            args: vec![ten],
        };
        let without = b.constructor(Vec::new(), Some(to_self), None);
        let child = class(b, "Child", Some("Base"), vec![with_x, without]);

        let four = b.int(4);
        let explicit = b.new_object("Child", vec![four]);
        let first = b.call(explicit, "value", Vec::new(), int.clone());
        let show_first = b.puts(vec![first]);
        let implicit = b.new_object("Child", Vec::new());
        let second = b.call(implicit, "value", Vec::new(), int);
        let show_second = b.puts(vec![second]);
        b.script(vec![base, child, show_first, show_second])
    });
    assert_eq!(output, "5\n11\n");
}

#[test]
fn test_super_call_reaches_the_overridden_method() {
    // class Greeter; def greet: String; "hello"; end; end
    // class Loud < Greeter; def greet: String; "#{super}!"; end; end
    let output = output_of(|b| {
        let string = b.types().string();
        let hello = b.string("hello");
        let plain = b.method("greet", Vec::new(), string.clone(), Some(hello));
        let greeter = class(b, "Greeter", None, vec![plain]);

        let inherited = b.super_call("greet", Vec::new(), string.clone());
        let bang = b.string("!");
        let loud_text = b.concat(vec![inherited, bang]);
        let shouted = b.method("greet", Vec::new(), string.clone(), Some(loud_text));
        let loud = class(b, "Loud", Some("Greeter"), vec![shouted]);

        let greeter_type = b.ty("Greeter");
        let created = b.new_object("Loud", Vec::new());
        let init = b.assign_as("g", greeter_type.clone(), created);
        let g = b.local("g", greeter_type);
        let dispatched = b.call(g, "greet", Vec::new(), string.clone());
        let show_loud = b.puts(vec![dispatched]);
        let quiet = b.new_object("Greeter", Vec::new());
        let direct = b.call(quiet, "greet", Vec::new(), string);
        let show_quiet = b.puts(vec![direct]);
        b.script(vec![greeter, loud, init, show_loud, show_quiet])
    });
    assert_eq!(output, "hello!\nhello\n");
}

#[test]
fn test_static_fields_keep_state_across_calls() {
    // class Tally; def self.bump: int; @@count = @@count + 1; end
    //   def self.count: int; @@count; end; end
    // @@total = 5 at script level
    let output = output_of(|b| {
        let int = b.prim(Primitive::Int);
        let count = b.field("count", int.clone(), true);
        let one = b.int(1);
        let next = b.call(count, "+", vec![one], int.clone());
        let bump_body = b.field_assign("count", next, true);
        let bump = b.static_method("bump", Vec::new(), int.clone(), Some(bump_body));
        let count = b.field("count", int.clone(), true);
        let read = b.static_method("count", Vec::new(), int.clone(), Some(count));
        let tally = class(b, "Tally", None, vec![bump, read]);

        let mut statements = vec![tally];
        for _ in 0..2 {
            let target = b.type_ref("Tally");
            statements.push(b.call(target, "bump", Vec::new(), int.clone()));
        }
        let target = b.type_ref("Tally");
        let third = b.call(target, "bump", Vec::new(), int.clone());
        statements.push(b.puts(vec![third]));
        let target = b.type_ref("Tally");
        let total = b.call(target, "count", Vec::new(), int.clone());
        statements.push(b.puts(vec![total]));

        let five = b.int(5);
        statements.push(b.field_assign("total", five, true));
        let total = b.field("total", int, true);
        statements.push(b.puts(vec![total]));
        b.script(statements)
    });
    assert_eq!(output, "3\n3\n5\n");
}
