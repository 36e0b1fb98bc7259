//! The `Random` class.
//!
//! Instances carry their own generator state in a `_data` userdata field;
//! the class itself owns a shared state for the static methods. The
//! generator is the classic POSIX `rand_r` linear congruential step, so no
//! external entropy source is involved and seeded sequences reproduce.

use std::time::{SystemTime, UNIX_EPOCH};

use lit_core::{ObjHandle, Value};

use crate::vm::api::ClassBuilder;
use crate::vm::builtins::checks::get_number;
use crate::vm::object::Obj;
use crate::vm::State;

const RAND_MAX: u32 = 0x7fff;

/// One `rand_r` step: advance the seed, return a value in `0..=RAND_MAX`.
fn next_random(seed: &mut u32) -> u32 {
    *seed = seed.wrapping_mul(1_103_515_245).wrapping_add(12345);
    (*seed / 65536) % (RAND_MAX + 1)
}

fn time_seed() -> u32 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as u32)
        .unwrap_or(0)
}

fn make_seed_cell(state: &mut State, seed: u32) -> ObjHandle {
    state.alloc(Obj::Userdata(seed.to_le_bytes().to_vec()))
}

/// Find the generator state for a receiver: the instance's `_data` field,
/// or the class's own `_data` static for `Random.int(...)`-style calls.
fn seed_cell(state: &mut State, instance: Value) -> Result<ObjHandle, String> {
    let data_key = state.intern("_data");
    let data = match instance.as_object().map(|h| state.heap.get(h)) {
        Some(Obj::Class(class)) => class.static_fields.get(data_key),
        Some(Obj::Instance(inner)) => inner.fields.get(data_key),
        _ => None,
    };
    match data.and_then(|v| v.as_object()) {
        Some(handle) if matches!(state.heap.get(handle), Obj::Userdata(_)) => Ok(handle),
        _ => Err("Random state is missing".to_string()),
    }
}

fn read_seed(state: &State, cell: ObjHandle) -> u32 {
    match state.heap.get(cell) {
        Obj::Userdata(bytes) if bytes.len() >= 4 => {
            u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])
        }
        _ => 0,
    }
}

fn write_seed(state: &mut State, cell: ObjHandle, seed: u32) {
    if let Obj::Userdata(bytes) = state.heap.get_mut(cell) {
        bytes.copy_from_slice(&seed.to_le_bytes());
    }
}

/// Advance the receiver's generator and return the raw `rand_r` value.
fn roll(state: &mut State, instance: Value) -> Result<u32, String> {
    let cell = seed_cell(state, instance)?;
    let mut seed = read_seed(state, cell);
    let value = next_random(&mut seed);
    write_seed(state, cell, seed);
    Ok(value)
}

fn random_constructor(state: &mut State, instance: Value, args: &[Value]) -> Result<Value, String> {
    let seed = match args.first() {
        Some(value) if value.is_number() => value.as_number() as u32,
        _ => time_seed(),
    };
    // Intern first: the cell is unreachable until it lands in the field.
    let data_key = state.intern("_data");
    let cell = make_seed_cell(state, seed);
    match instance.as_object().map(|h| state.heap.get_mut(h)) {
        Some(Obj::Instance(inner)) => inner.fields.set(data_key, Value::object(cell)),
        _ => return Err("expected a Random instance".to_string()),
    }
    Ok(instance)
}

fn random_set_seed(state: &mut State, instance: Value, args: &[Value]) -> Result<Value, String> {
    let seed = match args.first() {
        Some(value) if value.is_number() => value.as_number() as u32,
        _ => time_seed(),
    };
    let cell = seed_cell(state, instance)?;
    write_seed(state, cell, seed);
    Ok(Value::NULL)
}

fn random_int(state: &mut State, instance: Value, args: &[Value]) -> Result<Value, String> {
    let value = roll(state, instance)? as i64;
    if args.len() == 1 {
        let bound = get_number(args, 0, 0.0) as i64;
        if bound == 0 {
            return Ok(Value::number(value as f64));
        }
        return Ok(Value::number((value % bound) as f64));
    }
    if args.len() >= 2 {
        let min = get_number(args, 0, 0.0) as i64;
        let max = get_number(args, 1, 1.0) as i64;
        if max == min {
            return Ok(Value::number(max as f64));
        }
        return Ok(Value::number((min + value % (max - min)) as f64));
    }
    Ok(Value::number(value as f64))
}

fn random_float(state: &mut State, instance: Value, args: &[Value]) -> Result<Value, String> {
    let value = roll(state, instance)? as f64 / RAND_MAX as f64;
    if args.len() == 1 {
        let bound = get_number(args, 0, 0.0);
        return Ok(Value::number(value * bound));
    }
    if args.len() >= 2 {
        let min = get_number(args, 0, 0.0);
        let max = get_number(args, 1, 1.0);
        if max == min {
            return Ok(Value::number(max));
        }
        return Ok(Value::number(min + value * (max - min)));
    }
    Ok(Value::number(value))
}

fn random_bool(state: &mut State, instance: Value, _args: &[Value]) -> Result<Value, String> {
    let value = roll(state, instance)?;
    Ok(Value::bool(value % 2 == 1))
}

/// `chance(percent = 50)` — true `percent`% of the time.
fn random_chance(state: &mut State, instance: Value, args: &[Value]) -> Result<Value, String> {
    let percent = get_number(args, 0, 50.0);
    let value = roll(state, instance)? as f64 / (RAND_MAX - 1) as f64 * 100.0;
    Ok(Value::bool(value <= percent))
}

/// `pick(array | map)` or `pick(a, b, c, ...)`.
fn random_pick(state: &mut State, instance: Value, args: &[Value]) -> Result<Value, String> {
    let value = roll(state, instance)? as usize;
    if args.len() == 1 {
        return match args[0].as_object().map(|h| state.heap.get(h)) {
            Some(Obj::Array(elements)) => {
                if elements.is_empty() {
                    Ok(Value::NULL)
                } else {
                    Ok(elements[value % elements.len()])
                }
            }
            Some(Obj::Map(entries)) => {
                if entries.is_empty() {
                    return Ok(Value::NULL);
                }
                let keys = entries.sorted_keys();
                let key = keys[value % keys.len()];
                Ok(entries.get(key).unwrap_or(Value::NULL))
            }
            _ => Err("Expected map or array as the argument".to_string()),
        };
    }
    if args.is_empty() {
        return Ok(Value::NULL);
    }
    Ok(args[value % args.len()])
}

pub fn open_random_library(state: &mut State) {
    let builder = ClassBuilder::new(state, "Random");
    if let Some(object) = state.classes.object {
        builder.inherit_from(state, object);
    }
    builder.bind_constructor(state, random_constructor);
    builder.bind_method(state, "setSeed", random_set_seed);
    builder.bind_method(state, "int", random_int);
    builder.bind_method(state, "float", random_float);
    builder.bind_method(state, "chance", random_chance);
    builder.bind_method(state, "pick", random_pick);
    builder.set_static_method(state, "setSeed", random_set_seed);
    builder.set_static_method(state, "int", random_int);
    builder.set_static_method(state, "float", random_float);
    builder.set_static_method(state, "bool", random_bool);
    builder.set_static_method(state, "chance", random_chance);
    builder.set_static_method(state, "pick", random_pick);
    // The statics share one generator, owned by the class itself.
    let cell = make_seed_cell(state, time_seed());
    builder.set_static_field(state, "_data", Value::object(cell));
    builder.install(state);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rand_r_sequence_is_deterministic() {
        let mut a = 42;
        let mut b = 42;
        for _ in 0..16 {
            assert_eq!(next_random(&mut a), next_random(&mut b));
        }
        let value = next_random(&mut a);
        assert!(value <= RAND_MAX);
    }

    #[test]
    fn seed_cells_round_trip() {
        let mut state = State::new();
        let cell = make_seed_cell(&mut state, 0xdead_beef);
        assert_eq!(read_seed(&state, cell), 0xdead_beef);
        write_seed(&mut state, cell, 7);
        assert_eq!(read_seed(&state, cell), 7);
    }
}
