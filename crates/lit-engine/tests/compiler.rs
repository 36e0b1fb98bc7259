//! Compiler-facing tests: emitted bytecode shape, stack-effect tracking,
//! name resolution and the disassembler.

use lit_engine::compiler::disasm;
use lit_engine::compiler::opcode::Opcode;
use lit_engine::compiler::optimizer::OptimizationLevel;
use lit_engine::vm::object::Obj;
use lit_engine::{ObjHandle, State};

fn compile(source: &str, level: OptimizationLevel) -> (State, ObjHandle) {
    let mut state = State::new();
    state.optimization.set_level(level);
    state.set_error_printer(Box::new(|message| panic!("compile error: {message}")));
    let module = state
        .compile_module("test", source)
        .expect("compilation failed");
    (state, module)
}

fn main_code(state: &State, module: ObjHandle) -> Vec<u8> {
    let main = state.module(module).main_function.expect("main function");
    state.function(main).chunk.code.clone()
}

#[test]
fn unoptimized_addition_emits_the_binary_op() {
    let (state, module) = compile("print(1 + 2)", OptimizationLevel::None);
    let code = main_code(&state, module);
    assert!(code.contains(&(Opcode::Add as u8)));
    assert!(code.contains(&(Opcode::Call as u8)));
}

#[test]
fn folded_addition_loses_the_binary_op() {
    let (state, module) = compile("print(1 + 2)", OptimizationLevel::Release);
    let code = main_code(&state, module);
    assert!(!code.contains(&(Opcode::Add as u8)));
}

#[test]
fn module_variables_use_private_slots() {
    let (state, module) = compile("var a = 1\nprint(a)", OptimizationLevel::None);
    let code = main_code(&state, module);
    assert!(code.contains(&(Opcode::SetPrivate as u8)));
    assert!(code.contains(&(Opcode::GetPrivate as u8)));
    assert_eq!(state.module(module).privates.len(), 1);
}

#[test]
fn locals_resolve_before_globals() {
    let (state, module) = compile(
        "function f() { var x = 1\nreturn x }",
        OptimizationLevel::None,
    );
    let main = state.module(module).main_function.expect("main");
    // The nested function is a constant of the main chunk.
    let nested = state.function(main).chunk.constants.iter().find_map(|c| {
        c.as_object()
            .filter(|h| matches!(state.heap.get(*h), Obj::Function(_)))
    });
    let nested = nested.expect("nested function constant");
    let code = &state.function(nested).chunk.code;
    assert!(code.contains(&(Opcode::GetLocal as u8)));
    assert!(!code.contains(&(Opcode::GetGlobal as u8)));
}

#[test]
fn captured_variables_compile_to_closures() {
    let source = r#"
function outer() {
    var x = 1
    return () => x
}
"#;
    let (state, module) = compile(source, OptimizationLevel::None);
    let main = state.module(module).main_function.expect("main");
    let outer = state
        .function(main)
        .chunk
        .constants
        .iter()
        .find_map(|c| {
            c.as_object()
                .filter(|h| matches!(state.heap.get(*h), Obj::Function(_)))
        })
        .expect("outer function");
    let code = &state.function(outer).chunk.code;
    assert!(code.contains(&(Opcode::Closure as u8)));
    // The lambda inside outer reports one upvalue.
    let lambda = state
        .function(outer)
        .chunk
        .constants
        .iter()
        .find_map(|c| {
            c.as_object()
                .filter(|h| matches!(state.heap.get(*h), Obj::Function(_)))
        })
        .expect("lambda function");
    assert_eq!(state.function(lambda).upvalue_count, 1);
}

#[test]
fn max_slots_covers_the_deepest_expression() {
    let (state, module) = compile("print(1 + (2 + (3 + 4)))", OptimizationLevel::None);
    let main = state.module(module).main_function.expect("main");
    // callee + three pending operands at the deepest point, plus slot 0.
    assert!(state.function(main).max_slots >= 5);
}

#[test]
fn line_info_is_tracked_per_instruction() {
    let (state, module) = compile("var a = 1\n\n\nvar b = 2", OptimizationLevel::None);
    let main = state.module(module).main_function.expect("main");
    let chunk = &state.function(main).chunk;
    assert!(chunk.has_line_info);
    assert_eq!(chunk.line_at(0), 1);
    let last = chunk.code.len() - 1;
    assert!(chunk.line_at(last) >= 4);
}

#[test]
fn extreme_level_strips_line_info_and_private_names() {
    let (state, module) = compile("var a = 1\nprint(a)", OptimizationLevel::Extreme);
    let main = state.module(module).main_function.expect("main");
    assert!(!state.function(main).chunk.has_line_info);
    assert!(state.function(main).chunk.lines.is_empty());
    assert!(state.module(module).private_names.is_empty());
    // The slot itself survives stripping.
    assert_eq!(state.module(module).privates.len(), 1);
}

#[test]
fn interpolation_lowers_to_join() {
    let (state, module) = compile(r#"print($"a {1} b")"#, OptimizationLevel::None);
    let code = main_code(&state, module);
    assert!(code.contains(&(Opcode::Array as u8)));
    assert!(code.contains(&(Opcode::PushArrayElement as u8)));
    assert!(code.contains(&(Opcode::Invoke as u8)));
}

#[test]
fn for_in_lowers_to_iterator_invokes() {
    let (state, module) = compile(
        "for (var x in [1, 2]) print(x)",
        OptimizationLevel::None,
    );
    let listing = disasm::disassemble_module(&state, module);
    assert!(listing.contains("iterator"), "listing:\n{listing}");
    assert!(listing.contains("iteratorValue"), "listing:\n{listing}");
}

#[test]
fn disassembler_renders_every_instruction() {
    let source = r#"
class A : Object {
    constructor() {
        this.x = ref this
    }
}
var a = [1, 2][0] .. 3
print($"v {a}")
"#;
    let (state, module) = compile(source, OptimizationLevel::None);
    let listing = disasm::disassemble_module(&state, module);
    assert!(listing.contains("CLASS"));
    assert!(listing.contains("RANGE"));
    assert!(!listing.contains("BAD_OPCODE"), "listing:\n{listing}");
}

#[test]
fn constants_are_deduplicated_across_uses() {
    let (state, module) = compile(
        "print(1)\nprint(1)\nprint(1)",
        OptimizationLevel::None,
    );
    let main = state.module(module).main_function.expect("main");
    let ones = state
        .function(main)
        .chunk
        .constants
        .iter()
        .filter(|c| c.is_number() && c.as_number() == 1.0)
        .count();
    assert_eq!(ones, 1);
}
