// Jvmgen Control Flow Tests
// Loops, jumps, rescue and ensure clauses run end to end on the reference VM

mod common;

use common::{output_of, run};
use jvmgen::ast::{AstBuilder, Node};
use jvmgen::types::Primitive;
use jvmgen::VmError;
use pretty_assertions::assert_eq;

/// `name + 1`, stored back into `name`
fn increment(b: &mut AstBuilder<'_>, name: &str) -> Node {
    let int = b.prim(Primitive::Int);
    let current = b.local(name, int.clone());
    let one = b.int(1);
    let sum = b.call(current, "+", vec![one], int);
    b.assign(name, sum)
}

/// `name < limit`
fn less_than(b: &mut AstBuilder<'_>, name: &str, limit: i64) -> Node {
    let int = b.prim(Primitive::Int);
    let boolean = b.prim(Primitive::Boolean);
    let current = b.local(name, int);
    let limit = b.int(limit);
    b.call(current, "<", vec![limit], boolean)
}

#[test]
fn test_while_loop_counts() {
    let output = output_of(|b| {
        let zero = b.int(0);
        let init = b.assign("i", zero);
        let condition = less_than(b, "i", 3);
        let int = b.prim(Primitive::Int);
        let current = b.local("i", int);
        let show = b.print(vec![current]);
        let step = increment(b, "i");
        let body = b.body(vec![show, step]);
        let lp = b.while_loop(condition, body);
        let newline = b.puts(Vec::new());
        b.script(vec![init, lp, newline])
    });
    assert_eq!(output, "012\n");
}

#[test]
fn test_do_while_runs_body_before_the_check() {
    let output = output_of(|b| {
        let zero = b.int(0);
        let init = b.assign("i", zero);
        let condition = less_than(b, "i", 0);
        let text = b.string("ran");
        let show = b.puts(vec![text]);
        let step = increment(b, "i");
        let body = b.body(vec![show, step]);
        let lp = b.do_while(condition, body);
        let int = b.prim(Primitive::Int);
        let current = b.local("i", int);
        let total = b.puts(vec![current]);
        b.script(vec![init, lp, total])
    });
    assert_eq!(output, "ran\n1\n");
}

#[test]
fn test_until_loop_stops_when_condition_holds() {
    let output = output_of(|b| {
        let zero = b.int(0);
        let init = b.assign("i", zero);
        let int = b.prim(Primitive::Int);
        let boolean = b.prim(Primitive::Boolean);
        let current = b.local("i", int.clone());
        let two = b.int(2);
        let condition = b.call(current, "==", vec![two], boolean);
        let step = increment(b, "i");
        let lp = b.until_loop(condition, step);
        let current = b.local("i", int);
        let total = b.puts(vec![current]);
        b.script(vec![init, lp, total])
    });
    assert_eq!(output, "2\n");
}

#[test]
fn test_next_skips_rest_of_body() {
    // while i < 4: i += 1; next if i == 2; print i
    let output = output_of(|b| {
        let zero = b.int(0);
        let init = b.assign("i", zero);
        let condition = less_than(b, "i", 4);
        let step = increment(b, "i");
        let int = b.prim(Primitive::Int);
        let boolean = b.prim(Primitive::Boolean);
        let current = b.local("i", int.clone());
        let two = b.int(2);
        let is_two = b.call(current, "==", vec![two], boolean);
        let skip = b.next_();
        let guard = b.if_stmt(is_two, Some(skip), None);
        let current = b.local("i", int);
        let show = b.print(vec![current]);
        let body = b.body(vec![step, guard, show]);
        let lp = b.while_loop(condition, body);
        b.script(vec![init, lp])
    });
    assert_eq!(output, "134");
}

#[test]
fn test_break_runs_enclosing_ensure_once() {
    // while true: begin; break if i == 2; print i; ensure print "e"; end; i += 1
    let output = output_of(|b| {
        let zero = b.int(0);
        let init = b.assign("i", zero);
        let forever = b.boolean(true);

        let int = b.prim(Primitive::Int);
        let boolean = b.prim(Primitive::Boolean);
        let current = b.local("i", int.clone());
        let two = b.int(2);
        let is_two = b.call(current, "==", vec![two], boolean);
        let stop = b.break_();
        let guard = b.if_stmt(is_two, Some(stop), None);
        let current = b.local("i", int);
        let show = b.print(vec![current]);
        let protected = b.body(vec![guard, show]);
        let marker = b.string("e");
        let cleanup = b.print(vec![marker]);
        let ensured = b.ensure(protected, cleanup);

        let step = increment(b, "i");
        let body = b.body(vec![ensured, step]);
        let lp = b.while_loop(forever, body);
        let done = b.string("done");
        let finish = b.puts(vec![done]);
        b.script(vec![init, lp, finish])
    });
    assert_eq!(output, "0e1eedone\n");
}

/// `def pick(flag: boolean): int; begin; return 1 if flag; 2; ensure; puts "ensure"; end; end`
fn pick_method(b: &mut AstBuilder<'_>) -> Node {
    let int = b.prim(Primitive::Int);
    let boolean = b.prim(Primitive::Boolean);
    let flag_arg = b.arg("flag", boolean.clone());
    let flag = b.local("flag", boolean);
    let one = b.int(1);
    let early = b.return_as(one, int.clone());
    let guard = b.if_stmt(flag, Some(early), None);
    let two = b.int(2);
    let body = b.body(vec![guard, two]);
    let text = b.string("ensure");
    let cleanup = b.puts(vec![text]);
    let ensured = b.ensure(body, cleanup);
    b.static_method("pick", vec![flag_arg], int, Some(ensured))
}

#[test]
fn test_ensure_runs_on_normal_and_return_paths() {
    let output = output_of(|b| {
        let method = pick_method(b);
        let int = b.prim(Primitive::Int);
        let no = b.boolean(false);
        let normal = b.fcall("pick", vec![no], int.clone());
        let show_normal = b.puts(vec![normal]);
        let yes = b.boolean(true);
        let early = b.fcall("pick", vec![yes], int);
        let show_early = b.puts(vec![early]);
        b.script(vec![method, show_normal, show_early])
    });
    assert_eq!(output, "ensure\n2\nensure\n1\n");
}

#[test]
fn test_ensure_runs_when_an_exception_escapes() {
    let output = output_of(|b| {
        let void = b.types().void();
        let message = b.string("boom");
        let failing = b.raise(message);
        let text = b.string("cleanup");
        let cleanup = b.puts(vec![text]);
        let ensured = b.ensure(failing, cleanup);
        let method = b.static_method("explode", Vec::new(), void.clone(), Some(ensured));

        let call = b.fcall("explode", Vec::new(), void.clone());
        let runtime = b.ty("java.lang.RuntimeException");
        let string = b.types().string();
        let caught = b.local("e", runtime);
        let text = b.call(caught, "getMessage", Vec::new(), string);
        let report = b.puts(vec![text]);
        let clause = b.rescue_clause(Some("e"), &["java.lang.RuntimeException"], report);
        let rescued = b.rescue(call, vec![clause], None, void);
        b.script(vec![method, rescued])
    });
    assert_eq!(output, "cleanup\nboom\n");
}

#[test]
fn test_rescue_picks_matching_clause_and_else() {
    let output = output_of(|b| {
        let void = b.types().void();
        let int = b.prim(Primitive::Int);

        // 1 / 0 is caught by the ArithmeticException clause
        let one = b.int(1);
        let zero = b.int(0);
        let quotient = b.call(one, "/", vec![zero], int.clone());
        let show = b.puts(vec![quotient]);
        let text = b.string("npe");
        let npe_body = b.puts(vec![text]);
        let npe = b.rescue_clause(None, &["java.lang.NullPointerException"], npe_body);
        let text = b.string("math");
        let math_body = b.puts(vec![text]);
        let math = b.rescue_clause(None, &["java.lang.ArithmeticException"], math_body);
        let failing = b.rescue(show, vec![npe, math], None, void.clone());

        // Nothing raised: the else clause runs
        let two = b.int(2);
        let fine = b.puts(vec![two]);
        let text = b.string("unused");
        let unused_body = b.puts(vec![text]);
        let unused = b.rescue_clause(None, &[], unused_body);
        let text = b.string("else");
        let otherwise = b.puts(vec![text]);
        let quiet = b.rescue(fine, vec![unused], Some(otherwise), void);
        b.script(vec![failing, quiet])
    });
    assert_eq!(output, "math\n2\nelse\n");
}

#[test]
fn test_uncaught_raise_reaches_the_caller() {
    let (output, result) = run(|b| {
        let text = b.string("before");
        let show = b.puts(vec![text]);
        let message = b.string("kaboom");
        let failing = b.raise(message);
        b.script(vec![show, failing])
    });
    assert_eq!(output, "before\n");
    assert_eq!(
        result,
        Err(VmError::Uncaught {
            class: "java.lang.RuntimeException".to_string(),
            message: "kaboom".to_string(),
        })
    );
}

#[test]
fn test_raise_class_without_message() {
    let (_, result) = run(|b| {
        let class = b.type_ref("java.lang.IllegalStateException");
        let failing = b.raise(class);
        b.script(vec![failing])
    });
    assert_eq!(
        result,
        Err(VmError::Uncaught {
            class: "java.lang.IllegalStateException".to_string(),
            message: String::new(),
        })
    );
}

#[test]
fn test_redo_repeats_body_without_checking() {
    // while i < 1: tries += 1; i += 1; redo if tries < 3
    let output = output_of(|b| {
        let zero = b.int(0);
        let init_i = b.assign("i", zero);
        let zero = b.int(0);
        let init_tries = b.assign("tries", zero);
        let condition = less_than(b, "i", 1);
        let count = increment(b, "tries");
        let step = increment(b, "i");
        let again = less_than(b, "tries", 3);
        let repeat = b.redo_();
        let guard = b.if_stmt(again, Some(repeat), None);
        let body = b.body(vec![count, step, guard]);
        let lp = b.while_loop(condition, body);
        let int = b.prim(Primitive::Int);
        let tries = b.local("tries", int);
        let show = b.puts(vec![tries]);
        b.script(vec![init_i, init_tries, lp, show])
    });
    assert_eq!(output, "3\n");
}

#[test]
fn test_break_runs_nested_ensures_innermost_first() {
    // while true; begin; begin; break; ensure; print "i"; end; ensure; print "o"; end; end
    let output = output_of(|b| {
        let forever = b.boolean(true);
        let stop = b.break_();
        let text = b.string("i");
        let inner_clause = b.print(vec![text]);
        let inner = b.ensure(stop, inner_clause);
        let text = b.string("o");
        let outer_clause = b.print(vec![text]);
        let outer = b.ensure(inner, outer_clause);
        let lp = b.while_loop(forever, outer);
        let done = b.string("done");
        let finish = b.puts(vec![done]);
        b.script(vec![lp, finish])
    });
    assert_eq!(output, "iodone\n");
}

#[test]
fn test_return_runs_nested_ensures_once_each() {
    // def nest: int; begin; begin; return 5; ensure; print "i"; end; ensure; print "o"; end; end
    let output = output_of(|b| {
        let int = b.prim(Primitive::Int);
        let five = b.int(5);
        let early = b.return_as(five, int.clone());
        let text = b.string("i");
        let inner_clause = b.print(vec![text]);
        let inner = b.ensure(early, inner_clause);
        let text = b.string("o");
        let outer_clause = b.print(vec![text]);
        let outer = b.ensure(inner, outer_clause);
        let method = b.static_method("nest", Vec::new(), int.clone(), Some(outer));
        let call = b.fcall("nest", Vec::new(), int);
        let show = b.puts(vec![call]);
        b.script(vec![method, show])
    });
    assert_eq!(output, "io5\n");
}

#[test]
fn test_outer_ensure_runs_when_inner_clause_raises_during_break() {
    // while true; begin; begin; break; ensure; raise "x"; end; ensure; puts "outer"; end; end
    let (output, result) = run(|b| {
        let forever = b.boolean(true);
        let stop = b.break_();
        let message = b.string("x");
        let failing = b.raise(message);
        let inner = b.ensure(stop, failing);
        let text = b.string("outer");
        let outer_clause = b.puts(vec![text]);
        let outer = b.ensure(inner, outer_clause);
        let lp = b.while_loop(forever, outer);
        b.script(vec![lp])
    });
    assert_eq!(output, "outer\n");
    assert_eq!(
        result,
        Err(VmError::Uncaught {
            class: "java.lang.RuntimeException".to_string(),
            message: "x".to_string(),
        })
    );
}

#[test]
fn test_outer_ensure_runs_when_inner_clause_raises_during_return() {
    // def leave: void; begin; begin; return; ensure; raise "x"; end; ensure; puts "outer"; end; end
    let (output, result) = run(|b| {
        let void = b.types().void();
        let leave = b.return_(None);
        let message = b.string("x");
        let failing = b.raise(message);
        let inner = b.ensure(leave, failing);
        let text = b.string("outer");
        let outer_clause = b.puts(vec![text]);
        let outer = b.ensure(inner, outer_clause);
        let method = b.static_method("leave", Vec::new(), void.clone(), Some(outer));
        let call = b.fcall("leave", Vec::new(), void);
        b.script(vec![method, call])
    });
    assert_eq!(output, "outer\n");
    assert_eq!(
        result,
        Err(VmError::Uncaught {
            class: "java.lang.RuntimeException".to_string(),
            message: "x".to_string(),
        })
    );
}
