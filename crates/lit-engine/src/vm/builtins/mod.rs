//! The built-in library: native classes installed onto the global
//! namespace through the `ClassBuilder` binding API, plus the kernel
//! globals (`print`, `time`, `eval`, ...).

mod array;
mod fiber;
mod function;
mod gc;
mod kernel;
mod map;
mod math;
mod number;
mod object;
mod random;
mod range;
mod string;

use crate::vm::State;

/// Install every core class and kernel global. Called once per state,
/// before the GC latch opens.
pub fn open_core_library(state: &mut State) {
    object::open_object_library(state);
    object::open_class_library(state);
    number::open_number_library(state);
    number::open_bool_library(state);
    string::open_string_library(state);
    array::open_array_library(state);
    map::open_map_library(state);
    range::open_range_library(state);
    fiber::open_fiber_library(state);
    function::open_function_library(state);
    function::open_module_library(state);
    math::open_math_library(state);
    random::open_random_library(state);
    gc::open_gc_library(state);
    kernel::open_kernel_library(state);
}

/// Argument checking helpers shared by the native libraries.
pub(crate) mod checks {
    use lit_core::Value;

    use crate::vm::State;

    pub fn check_number(state: &State, args: &[Value], index: usize) -> Result<f64, String> {
        match args.get(index) {
            Some(value) if value.is_number() => Ok(value.as_number()),
            Some(value) => Err(format!(
                "expected a number as argument #{index}, got a {}",
                state.type_name(*value)
            )),
            None => Err(format!("expected a number as argument #{index}, got nothing")),
        }
    }

    pub fn get_number(args: &[Value], index: usize, default: f64) -> f64 {
        match args.get(index) {
            Some(value) if value.is_number() => value.as_number(),
            _ => default,
        }
    }

    pub fn check_string(state: &State, args: &[Value], index: usize) -> Result<String, String> {
        match args.get(index) {
            Some(value) => state.as_string(*value).map(|s| s.to_string()).ok_or(format!(
                "expected a string as argument #{index}, got a {}",
                state.type_name(*value)
            )),
            None => Err(format!("expected a string as argument #{index}, got nothing")),
        }
    }
}
