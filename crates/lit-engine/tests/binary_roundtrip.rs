//! On-disk bytecode round trips: serialize a compiled module, reload it in
//! a fresh state, and compare observable behavior.

use std::cell::RefCell;
use std::io::Write;
use std::rc::Rc;

use lit_engine::compiler::binary;
use lit_engine::compiler::optimizer::OptimizationLevel;
use lit_engine::{InterpretResult, State};

const PROGRAM: &str = r#"
var total = 0
for (var i in 0 .. 4) {
    total = total + i
}
print(total)
print("done")
"#;

fn capture(state: &mut State) -> Rc<RefCell<String>> {
    let out = Rc::new(RefCell::new(String::new()));
    let sink = out.clone();
    state.set_printer(Box::new(move |text| sink.borrow_mut().push_str(text)));
    out
}

fn compile_to_bytes(level: OptimizationLevel) -> (Vec<u8>, String) {
    let mut state = State::new();
    state.optimization.set_level(level);
    let out = capture(&mut state);
    let module = state
        .compile_module("roundtrip", PROGRAM)
        .expect("compilation failed");
    let bytes = binary::save_modules(&state, &[module]);
    let result = state.exec_module(module);
    assert_eq!(result.status, InterpretResult::Ok);
    let direct_output = out.borrow().clone();
    (bytes, direct_output)
}

#[test]
fn reloaded_module_behaves_identically() {
    let (bytes, direct_output) = compile_to_bytes(OptimizationLevel::Debug);
    let mut fresh = State::new();
    let out = capture(&mut fresh);
    let module = binary::load_module(&mut fresh, &bytes).expect("load failed");
    let result = fresh.exec_module(module);
    assert_eq!(result.status, InterpretResult::Ok);
    assert_eq!(out.borrow().clone(), direct_output);
    assert_eq!(direct_output, "10\ndone\n");
}

#[test]
fn stripped_bytecode_still_runs() {
    let (bytes, direct_output) = compile_to_bytes(OptimizationLevel::Extreme);
    let mut fresh = State::new();
    let out = capture(&mut fresh);
    let module = binary::load_module(&mut fresh, &bytes).expect("load failed");
    let result = fresh.exec_module(module);
    assert_eq!(result.status, InterpretResult::Ok);
    assert_eq!(out.borrow().clone(), direct_output);
}

#[test]
fn magic_number_is_checked() {
    let mut state = State::new();
    let err = binary::load_module(&mut state, b"not bytecode at all").unwrap_err();
    assert!(err.contains("magic"), "got: {err}");
}

#[test]
fn end_marker_is_checked() {
    let (mut bytes, _) = compile_to_bytes(OptimizationLevel::Debug);
    let len = bytes.len();
    bytes[len - 1] ^= 0xff;
    let mut state = State::new();
    let err = binary::load_module(&mut state, &bytes).unwrap_err();
    assert!(err.contains("end"), "got: {err}");
}

#[test]
fn future_versions_are_rejected() {
    let (mut bytes, _) = compile_to_bytes(OptimizationLevel::Debug);
    bytes[2] = binary::BYTECODE_VERSION + 1;
    let mut state = State::new();
    let err = binary::load_module(&mut state, &bytes).unwrap_err();
    assert!(err.contains("version"), "got: {err}");
}

#[test]
fn interpret_file_detects_bytecode() {
    let (bytes, direct_output) = compile_to_bytes(OptimizationLevel::Debug);
    let mut file = tempfile::NamedTempFile::new().expect("temp file");
    file.write_all(&bytes).expect("write bytecode");
    let mut state = State::new();
    let out = capture(&mut state);
    let result = state.interpret_file(file.path().to_str().expect("utf-8 path"));
    assert_eq!(result.status, InterpretResult::Ok);
    assert_eq!(out.borrow().clone(), direct_output);
}
