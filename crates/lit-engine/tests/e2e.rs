//! End-to-end tests: source in, observable output out.

use std::cell::RefCell;
use std::rc::Rc;

use lit_engine::compiler::optimizer::OptimizationLevel;
use lit_engine::{InterpretResult, State};

// =============================================================================
// HELPERS
// =============================================================================

fn run_with_level(source: &str, level: OptimizationLevel) -> (String, String, InterpretResult) {
    let mut state = State::new();
    state.optimization.set_level(level);
    let out = Rc::new(RefCell::new(String::new()));
    let sink = out.clone();
    state.set_printer(Box::new(move |text| sink.borrow_mut().push_str(text)));
    let errors = Rc::new(RefCell::new(String::new()));
    let error_sink = errors.clone();
    state.set_error_printer(Box::new(move |text| {
        error_sink.borrow_mut().push_str(text);
        error_sink.borrow_mut().push('\n');
    }));
    let result = state.interpret_source("test", source);
    let stdout = out.borrow().clone();
    let stderr = errors.borrow().clone();
    (stdout, stderr, result.status)
}

fn run(source: &str) -> (String, InterpretResult) {
    let (stdout, _, status) = run_with_level(source, OptimizationLevel::Debug);
    (stdout, status)
}

fn expect_output(source: &str, expected: &str) {
    let (stdout, stderr, status) = run_with_level(source, OptimizationLevel::Debug);
    assert_eq!(status, InterpretResult::Ok, "errors: {stderr}");
    assert_eq!(stdout, expected);
}

// =============================================================================
// THE CORE SCENARIOS
// =============================================================================

#[test]
fn arithmetic_precedence() {
    expect_output("print(1 + 2 * 3)", "7\n");
}

#[test]
fn range_iteration_builds_string() {
    let source = r#"
var s = ""
for (var i in 0 .. 3) s = s + i.toString()
print(s)
"#;
    expect_output(source, "0123\n");
}

#[test]
fn range_iteration_without_rewrite() {
    // Same program through the real iterator protocol instead of the
    // c-for rewrite.
    let source = r#"
var s = ""
for (var i in 0 .. 3) s = s + i.toString()
print(s)
"#;
    let (stdout, stderr, status) = run_with_level(source, OptimizationLevel::None);
    assert_eq!(status, InterpretResult::Ok, "errors: {stderr}");
    assert_eq!(stdout, "0123\n");
}

#[test]
fn classes_and_constructors() {
    let source = r#"
class A {
    constructor(x) {
        this.x = x
    }
    f() {
        return this.x + 1
    }
}
print(new A(41).f())
"#;
    expect_output(source, "42\n");
}

#[test]
fn fiber_yield_and_resume() {
    let source = r#"
var f = Fiber((x) => {
    Fiber.yield(x + 1)
    return x + 2
})
print(f.run(40))
print(f.run())
"#;
    expect_output(source, "41\n42\n");
}

#[test]
fn module_level_closure_counter() {
    let source = r#"
var c = 0
var g = () => {
    c = c + 1
    return c
}
g()
g()
print(g())
"#;
    expect_output(source, "3\n");
}

#[test]
fn fiber_try_catches_abort() {
    let source = r#"
var f = Fiber(() => {
    Fiber.abort("oops")
})
print(f.try())
"#;
    expect_output(source, "oops\n");
}

// =============================================================================
// CLOSURES AND UPVALUES
// =============================================================================

#[test]
fn closed_upvalues_survive_the_frame() {
    let source = r#"
function makeCounter() {
    var i = 0
    return () => {
        i = i + 1
        return i
    }
}
var c = makeCounter()
c()
c()
print(c())
"#;
    expect_output(source, "3\n");
}

#[test]
fn sibling_closures_share_one_upvalue() {
    let source = r#"
function makePair() {
    var value = 0
    var setter = (v) => { value = v }
    var getter = () => value
    setter(7)
    return getter()
}
print(makePair())
"#;
    expect_output(source, "7\n");
}

// =============================================================================
// CONTROL FLOW
// =============================================================================

#[test]
fn while_loops_and_break() {
    let source = r#"
var total = 0
var i = 0
while (true) {
    i = i + 1
    if (i > 4) break
    total = total + i
}
print(total)
"#;
    expect_output(source, "10\n");
}

#[test]
fn c_style_for_with_continue() {
    let source = r#"
var total = 0
for (var i = 0; i < 10; i = i + 1) {
    if (i % 2 == 1) continue
    total = total + i
}
print(total)
"#;
    expect_output(source, "20\n");
}

#[test]
fn if_elseif_else_chains() {
    let source = r#"
function describe(n) {
    if (n < 0) return "negative"
    else if (n == 0) return "zero"
    else return "positive"
}
print(describe(0-5))
print(describe(0))
print(describe(5))
"#;
    expect_output(source, "negative\nzero\npositive\n");
}

#[test]
fn ternary_and_null_coalescing() {
    expect_output("print(1 > 2 ? \"a\" : \"b\")", "b\n");
    expect_output("print(null ?? \"fallback\")", "fallback\n");
    expect_output("print(3 ?? \"fallback\")", "3\n");
}

// =============================================================================
// CLASSES
// =============================================================================

#[test]
fn inheritance_copies_methods() {
    let source = r#"
class A {
    greet() {
        return "A"
    }
}
class B : A {
}
print(new B().greet())
"#;
    expect_output(source, "A\n");
}

#[test]
fn super_calls() {
    let source = r#"
class A {
    constructor(x) {
        this.x = x
    }
    name() {
        return "A" + this.x
    }
}
class B : A {
    constructor() {
        super(1)
    }
    name() {
        return "B" + super.name()
    }
}
print(new B().name())
"#;
    expect_output(source, "BA1\n");
}

#[test]
fn field_accessors_intercept_reads_and_writes() {
    let source = r#"
class T {
    prop {
        get {
            return 10
        }
        set {
            this.backing = value
        }
    }
}
var t = new T()
t.prop = 5
print(t.prop + t.backing)
"#;
    expect_output(source, "15\n");
}

#[test]
fn static_members() {
    let source = r#"
class Counter {
    static var count = 0
    static bump() {
        Counter.count = Counter.count + 1
        return Counter.count
    }
}
Counter.bump()
print(Counter.bump())
"#;
    expect_output(source, "2\n");
}

#[test]
fn operator_methods() {
    let source = r#"
class Vec {
    constructor(x) {
        this.x = x
    }
    operator + (other) {
        return new Vec(this.x + other.x)
    }
}
var v = new Vec(2) + new Vec(3)
print(v.x)
"#;
    expect_output(source, "5\n");
}

#[test]
fn is_operator_walks_the_hierarchy() {
    let source = r#"
class A {
}
class B : A {
}
var b = new B()
print(b is B)
print(b is A)
print(b is String)
"#;
    expect_output(source, "true\ntrue\nfalse\n");
}

#[test]
fn instance_to_string_is_invoked_by_print() {
    let source = r#"
class P {
    toString() {
        return "point!"
    }
}
print(new P())
"#;
    expect_output(source, "point!\n");
}

// =============================================================================
// DATA TYPES
// =============================================================================

#[test]
fn arrays_and_subscripts() {
    let source = r#"
var a = [1, 2, 3]
a.add(4)
a[0] = 10
print(a[0] + a[3])
print(a.length)
"#;
    expect_output(source, "14\n4\n");
}

#[test]
fn negative_array_indices_wrap() {
    expect_output("print([1, 2, 3][0 - 1])", "3\n");
}

#[test]
fn maps_and_object_literals() {
    let source = r#"
var m = { a = 1, b = 2 }
m["c"] = 3
print(m["a"] + m["b"] + m["c"])
print(m.length)
"#;
    expect_output(source, "6\n3\n");
}

#[test]
fn string_methods() {
    let source = r#"
print("hello".length)
print("hello".toUpperCase())
print("hello".indexOf("ll"))
print("a,b,,c".split(",").join("-"))
"#;
    expect_output(source, "5\nHELLO\n2\na-b-c\n");
}

#[test]
fn string_interpolation() {
    expect_output(r#"print($"one {1} two {1 + 1}!")"#, "one 1 two 2!\n");
}

#[test]
fn interpolation_nests() {
    expect_output(r#"print($"a {$"b {1} c"} d")"#, "a b 1 c d\n");
}

#[test]
fn array_iteration() {
    let source = r#"
var total = 0
for (var x in [1, 2, 3, 4]) total = total + x
print(total)
"#;
    expect_output(source, "10\n");
}

#[test]
fn varargs_collect_into_an_array() {
    let source = r#"
function tally(first, ...) {
    var total = first
    for (var x in ...) total = total + x
    return total
}
print(tally(1, 2, 3))
print(tally(5))
"#;
    expect_output(source, "6\n5\n");
}

#[test]
fn default_arguments() {
    let source = r#"
function greet(name = "world") {
    return "hi " + name
}
print(greet())
print(greet("lit"))
"#;
    expect_output(source, "hi world\nhi lit\n");
}

#[test]
fn random_sequences_reproduce_from_a_seed() {
    let source = r#"
var a = new Random(7)
var b = new Random(7)
print(a.int(1000) == b.int(1000))
print(a.float() == b.float())
print(a.int(1000) == b.int(1000))
"#;
    expect_output(source, "true\ntrue\ntrue\n");
}

#[test]
fn random_draws_respect_bounds() {
    let source = r#"
var r = new Random(1)
var ok = true
for (var i in 0 .. 31) {
    var v = r.int(10)
    if (v < 0 || v >= 10) ok = false
    var f = r.float()
    if (f < 0 || f > 1) ok = false
}
print(ok)
print(r.pick([5]) == 5)
print(r.chance(200))
var s = Random.int(10)
print(s >= 0 && s < 10)
"#;
    expect_output(source, "true\ntrue\ntrue\ntrue\n");
}

#[test]
fn references_write_through() {
    let source = r#"
var a = 1
var r = ref a
*r = 42
print(a)
"#;
    expect_output(source, "42\n");
}

// =============================================================================
// ERRORS
// =============================================================================

#[test]
fn runtime_errors_propagate() {
    let (_, status) = run("print(1 + \"x\".missing())");
    assert_eq!(status, InterpretResult::RuntimeError);
}

#[test]
fn const_assignment_is_a_compile_error() {
    let (_, stderr, status) = run_with_level("const a = 1\na = 2", OptimizationLevel::None);
    assert_eq!(status, InterpretResult::CompileError);
    assert!(
        stderr.contains("attempt to modify constant 'a'"),
        "got: {stderr}"
    );
}

#[test]
fn too_many_call_arguments_error() {
    let args = vec!["0"; 256].join(", ");
    let (_, stderr, status) =
        run_with_level(&format!("print(f({args}))"), OptimizationLevel::None);
    assert_eq!(status, InterpretResult::CompileError);
    assert!(stderr.contains("255"), "got: {stderr}");
}

#[test]
fn undefined_globals_read_as_null() {
    expect_output("print(missing)", "null\n");
}

#[test]
fn null_propagating_field_access() {
    expect_output("print(missing?.field)", "null\n");
}

#[test]
fn preprocessor_branches() {
    let source = "#define DEBUG\n#ifdef DEBUG\nprint(1)\n#else\nprint(2)\n#endif\n";
    expect_output(source, "1\n");
}

#[test]
fn fiber_error_getter_after_try() {
    let source = r#"
var f = Fiber(() => {
    Fiber.abort("bad")
})
f.try()
print(f.error)
"#;
    expect_output(source, "bad\n");
}

// =============================================================================
// OPTIMIZATION LEVEL PARITY
// =============================================================================

#[test]
fn levels_agree_on_observable_output() {
    let source = r#"
var parts = []
for (var i in 0 .. 2) {
    if (i % 2 == 0) parts.add("even")
    else parts.add("odd")
}
print(parts.join(","))
print(2 ** 10)
print(7 # 2)
"#;
    let mut outputs = Vec::new();
    for level in [
        OptimizationLevel::None,
        OptimizationLevel::Repl,
        OptimizationLevel::Debug,
        OptimizationLevel::Release,
        OptimizationLevel::Extreme,
    ] {
        let (stdout, stderr, status) = run_with_level(source, level);
        assert_eq!(status, InterpretResult::Ok, "level {level:?}: {stderr}");
        outputs.push(stdout);
    }
    for output in &outputs {
        assert_eq!(output, &outputs[0]);
    }
    assert_eq!(outputs[0], "even,odd,even\n1024\n3\n");
}
