//! Collector stress: run allocation-heavy programs with the GC threshold
//! floored so a collection happens on essentially every allocation.

use std::cell::RefCell;
use std::rc::Rc;

use lit_engine::{InterpretResult, State};

fn run_stressed(source: &str) -> (String, InterpretResult) {
    let mut state = State::new();
    state.heap.next_gc = 1;
    let out = Rc::new(RefCell::new(String::new()));
    let sink = out.clone();
    state.set_printer(Box::new(move |text| sink.borrow_mut().push_str(text)));
    let errors = Rc::new(RefCell::new(String::new()));
    let error_sink = errors.clone();
    state.set_error_printer(Box::new(move |text| {
        error_sink.borrow_mut().push_str(text);
    }));
    let result = state.interpret_source("stress", source);
    let stdout = out.borrow().clone();
    assert!(
        result.status != InterpretResult::CompileError,
        "compile errors: {}",
        errors.borrow()
    );
    (stdout, result.status)
}

#[test]
fn stressed_string_building_survives() {
    let source = r#"
var s = ""
for (var i in 0 .. 49) {
    s = s + "x"
}
print(s.length)
"#;
    let (stdout, status) = run_stressed(source);
    assert_eq!(status, InterpretResult::Ok);
    assert_eq!(stdout, "50\n");
}

#[test]
fn stressed_array_churn_survives() {
    let source = r#"
var kept = []
for (var i in 0 .. 99) {
    var garbage = [i, i + 1, i + 2]
    if (i % 10 == 0) kept.add(garbage[0])
}
print(kept.length)
"#;
    let (stdout, status) = run_stressed(source);
    assert_eq!(status, InterpretResult::Ok);
    assert_eq!(stdout, "10\n");
}

#[test]
fn stressed_closures_and_fibers_survive() {
    let source = r#"
function makeAdder(n) {
    return (x) => x + n
}
var f = Fiber(() => {
    var add = makeAdder(2)
    Fiber.yield(add(5))
    return add(10)
})
print(f.run())
print(f.run())
"#;
    let (stdout, status) = run_stressed(source);
    assert_eq!(status, InterpretResult::Ok);
    assert_eq!(stdout, "7\n12\n");
}

#[test]
fn heap_shrinks_after_collection() {
    let mut state = State::new();
    let before = state.heap.live_objects();
    let _ = state.interpret_source(
        "shrink",
        r#"
var hold = []
for (var i in 0 .. 99) {
    var tmp = [1, 2, 3, 4, 5]
    tmp.clear()
}
"#,
    );
    state.current_fiber = None;
    state.last_module = None;
    state.modules.clear();
    state.collect_garbage();
    let after = state.heap.live_objects();
    // Everything the program made is unreachable once the module goes.
    assert!(after <= before + 8, "before {before}, after {after}");
}
