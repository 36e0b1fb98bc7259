//! The `Math` class: static numeric helpers.

use lit_core::Value;

use crate::vm::api::ClassBuilder;
use crate::vm::builtins::checks::check_number;
use crate::vm::State;

macro_rules! unary_math {
    ($name:ident, $op:expr) => {
        fn $name(state: &mut State, _instance: Value, args: &[Value]) -> Result<Value, String> {
            let x = check_number(state, args, 0)?;
            let f: fn(f64) -> f64 = $op;
            Ok(Value::number(f(x)))
        }
    };
}

unary_math!(math_abs, f64::abs);
unary_math!(math_sin, f64::sin);
unary_math!(math_cos, f64::cos);
unary_math!(math_tan, f64::tan);
unary_math!(math_asin, f64::asin);
unary_math!(math_acos, f64::acos);
unary_math!(math_atan, f64::atan);
unary_math!(math_floor, f64::floor);
unary_math!(math_ceil, f64::ceil);
unary_math!(math_round, f64::round);
unary_math!(math_sqrt, f64::sqrt);
unary_math!(math_log, f64::ln);
unary_math!(math_exp, f64::exp);

fn math_atan2(state: &mut State, _instance: Value, args: &[Value]) -> Result<Value, String> {
    let y = check_number(state, args, 0)?;
    let x = check_number(state, args, 1)?;
    Ok(Value::number(y.atan2(x)))
}

fn math_min(state: &mut State, _instance: Value, args: &[Value]) -> Result<Value, String> {
    let a = check_number(state, args, 0)?;
    let b = check_number(state, args, 1)?;
    Ok(Value::number(a.min(b)))
}

fn math_max(state: &mut State, _instance: Value, args: &[Value]) -> Result<Value, String> {
    let a = check_number(state, args, 0)?;
    let b = check_number(state, args, 1)?;
    Ok(Value::number(a.max(b)))
}

/// The middle of three values.
fn math_mid(state: &mut State, _instance: Value, args: &[Value]) -> Result<Value, String> {
    let a = check_number(state, args, 0)?;
    let b = check_number(state, args, 1)?;
    let c = check_number(state, args, 2)?;
    Ok(Value::number(a.max(b).min(a.min(b).max(c))))
}

fn math_to_radians(state: &mut State, _instance: Value, args: &[Value]) -> Result<Value, String> {
    let degrees = check_number(state, args, 0)?;
    Ok(Value::number(degrees.to_radians()))
}

fn math_to_degrees(state: &mut State, _instance: Value, args: &[Value]) -> Result<Value, String> {
    let radians = check_number(state, args, 0)?;
    Ok(Value::number(radians.to_degrees()))
}

pub fn open_math_library(state: &mut State) {
    let builder = ClassBuilder::new(state, "Math");
    if let Some(object) = state.classes.object {
        builder.inherit_from(state, object);
    }
    builder.set_static_field(state, "Pi", Value::number(std::f64::consts::PI));
    builder.set_static_field(state, "Tau", Value::number(std::f64::consts::TAU));
    builder.set_static_method(state, "abs", math_abs);
    builder.set_static_method(state, "sin", math_sin);
    builder.set_static_method(state, "cos", math_cos);
    builder.set_static_method(state, "tan", math_tan);
    builder.set_static_method(state, "asin", math_asin);
    builder.set_static_method(state, "acos", math_acos);
    builder.set_static_method(state, "atan", math_atan);
    builder.set_static_method(state, "atan2", math_atan2);
    builder.set_static_method(state, "floor", math_floor);
    builder.set_static_method(state, "ceil", math_ceil);
    builder.set_static_method(state, "round", math_round);
    builder.set_static_method(state, "min", math_min);
    builder.set_static_method(state, "max", math_max);
    builder.set_static_method(state, "mid", math_mid);
    builder.set_static_method(state, "toRadians", math_to_radians);
    builder.set_static_method(state, "toDegrees", math_to_degrees);
    builder.set_static_method(state, "sqrt", math_sqrt);
    builder.set_static_method(state, "log", math_log);
    builder.set_static_method(state, "exp", math_exp);
    builder.install(state);
}
