//! The `Array` class.

use lit_core::Value;

use crate::vm::api::ClassBuilder;
use crate::vm::builtins::checks::check_number;
use crate::vm::object::{Obj, ObjKind};
use crate::vm::state::InterpretResult;
use crate::vm::State;

fn receiver_elements(state: &State, instance: Value) -> Result<Vec<Value>, String> {
    match instance.as_object().map(|h| state.heap.get(h)) {
        Some(Obj::Array(elements)) => Ok(elements.clone()),
        _ => Err("expected an array receiver".to_string()),
    }
}

fn with_elements<R>(
    state: &mut State,
    instance: Value,
    action: impl FnOnce(&mut Vec<Value>) -> R,
) -> Result<R, String> {
    match instance.as_object().map(|h| state.heap.get_mut(h)) {
        Some(Obj::Array(elements)) => Ok(action(elements)),
        _ => Err("expected an array receiver".to_string()),
    }
}

fn resolve_index(len: usize, index: f64) -> Option<usize> {
    let index = index as i64;
    let resolved = if index < 0 { len as i64 + index } else { index };
    if resolved < 0 || resolved >= len as i64 {
        None
    } else {
        Some(resolved as usize)
    }
}

fn objfn_array_constructor(state: &mut State, _instance: Value, args: &[Value]) -> Result<Value, String> {
    let size = super::checks::get_number(args, 0, 0.0).max(0.0) as usize;
    let fill = args.get(1).copied().unwrap_or(Value::NULL);
    let array = state.alloc(Obj::Array(vec![fill; size]));
    Ok(Value::object(array))
}

/// `a[i]` (numbers with negative wrap) and `a[from .. to]` slices.
fn objfn_array_subscript(state: &mut State, instance: Value, args: &[Value]) -> Result<Value, String> {
    let elements = receiver_elements(state, instance)?;
    let index = args.first().copied().unwrap_or(Value::NULL);
    if args.len() >= 2 {
        // a[i] = value
        let value = args[1];
        let index = check_number(state, &[index], 0)?;
        let slot = resolve_index(elements.len(), index)
            .ok_or_else(|| format!("array index {index} is out of bounds"))?;
        with_elements(state, instance, |elements| elements[slot] = value)?;
        return Ok(value);
    }
    if let Some(Obj::Range(range)) = index.as_object().map(|h| state.heap.get(h)) {
        let (from, to) = (range.from, range.to);
        let from = resolve_index(elements.len(), from).unwrap_or(0);
        let to = resolve_index(elements.len(), to).unwrap_or(elements.len().saturating_sub(1));
        let slice: Vec<Value> = if from <= to {
            elements[from..=to].to_vec()
        } else {
            Vec::new()
        };
        let array = state.alloc(Obj::Array(slice));
        return Ok(Value::object(array));
    }
    let index = check_number(state, args, 0)?;
    match resolve_index(elements.len(), index) {
        Some(slot) => Ok(elements[slot]),
        None => Ok(Value::NULL),
    }
}

fn objfn_array_add(state: &mut State, instance: Value, args: &[Value]) -> Result<Value, String> {
    let value = args.first().copied().unwrap_or(Value::NULL);
    with_elements(state, instance, |elements| elements.push(value))?;
    Ok(instance)
}

fn objfn_array_insert(state: &mut State, instance: Value, args: &[Value]) -> Result<Value, String> {
    let index = check_number(state, args, 0)?.max(0.0) as usize;
    let value = args.get(1).copied().unwrap_or(Value::NULL);
    with_elements(state, instance, |elements| {
        let index = index.min(elements.len());
        elements.insert(index, value);
    })?;
    Ok(instance)
}

fn objfn_array_addall(state: &mut State, instance: Value, args: &[Value]) -> Result<Value, String> {
    let other = args.first().copied().unwrap_or(Value::NULL);
    let other = receiver_elements(state, other)
        .map_err(|_| "expected an array as the argument".to_string())?;
    with_elements(state, instance, |elements| elements.extend(other))?;
    Ok(instance)
}

fn objfn_array_slice(state: &mut State, instance: Value, args: &[Value]) -> Result<Value, String> {
    let elements = receiver_elements(state, instance)?;
    let from = check_number(state, args, 0)?;
    let to = super::checks::get_number(args, 1, elements.len() as f64 - 1.0);
    let from = resolve_index(elements.len(), from).unwrap_or(0);
    let to = resolve_index(elements.len(), to).unwrap_or(elements.len().saturating_sub(1));
    let slice: Vec<Value> = if from <= to && !elements.is_empty() {
        elements[from..=to].to_vec()
    } else {
        Vec::new()
    };
    let array = state.alloc(Obj::Array(slice));
    Ok(Value::object(array))
}

fn objfn_array_indexof(state: &mut State, instance: Value, args: &[Value]) -> Result<Value, String> {
    let elements = receiver_elements(state, instance)?;
    let needle = args.first().copied().unwrap_or(Value::NULL);
    for (i, element) in elements.iter().enumerate() {
        if element.to_bits() == needle.to_bits() {
            return Ok(Value::number(i as f64));
        }
    }
    Ok(Value::number(-1.0))
}

fn objfn_array_contains(state: &mut State, instance: Value, args: &[Value]) -> Result<Value, String> {
    let found = objfn_array_indexof(state, instance, args)?;
    Ok(Value::bool(found.as_number() >= 0.0))
}

fn objfn_array_remove(state: &mut State, instance: Value, args: &[Value]) -> Result<Value, String> {
    let needle = args.first().copied().unwrap_or(Value::NULL);
    let removed = with_elements(state, instance, |elements| {
        match elements
            .iter()
            .position(|e| e.to_bits() == needle.to_bits())
        {
            Some(index) => Some(elements.remove(index)),
            None => None,
        }
    })?;
    Ok(removed.unwrap_or(Value::NULL))
}

fn objfn_array_removeat(state: &mut State, instance: Value, args: &[Value]) -> Result<Value, String> {
    let index = check_number(state, args, 0)?;
    let removed = with_elements(state, instance, |elements| {
        resolve_index(elements.len(), index).map(|slot| elements.remove(slot))
    })?;
    Ok(removed.unwrap_or(Value::NULL))
}

fn objfn_array_clear(state: &mut State, instance: Value, _args: &[Value]) -> Result<Value, String> {
    with_elements(state, instance, |elements| elements.clear())?;
    Ok(Value::NULL)
}

fn objfn_array_length(state: &mut State, instance: Value, _args: &[Value]) -> Result<Value, String> {
    let elements = receiver_elements(state, instance)?;
    Ok(Value::number(elements.len() as f64))
}

fn objfn_array_clone(state: &mut State, instance: Value, _args: &[Value]) -> Result<Value, String> {
    let elements = receiver_elements(state, instance)?;
    let array = state.alloc(Obj::Array(elements));
    Ok(Value::object(array))
}

fn objfn_array_join(state: &mut State, instance: Value, args: &[Value]) -> Result<Value, String> {
    let elements = receiver_elements(state, instance)?;
    let separator = match args.first() {
        Some(value) => state.as_string(*value).unwrap_or("").to_string(),
        None => String::new(),
    };
    let mut out = String::new();
    for (i, element) in elements.iter().enumerate() {
        if i > 0 {
            out.push_str(&separator);
        }
        out.push_str(&state.value_to_string(*element));
    }
    Ok(state.string_value(&out))
}

fn objfn_array_compare(state: &mut State, instance: Value, args: &[Value]) -> Result<Value, String> {
    let other = args.first().copied().unwrap_or(Value::NULL);
    if instance.to_bits() == other.to_bits() {
        return Ok(Value::TRUE);
    }
    let a = receiver_elements(state, instance)?;
    let b = match receiver_elements(state, other) {
        Ok(b) => b,
        Err(_) => return Ok(Value::FALSE),
    };
    if a.len() != b.len() {
        return Ok(Value::FALSE);
    }
    Ok(Value::bool(
        a.iter()
            .zip(&b)
            .all(|(x, y)| x.to_bits() == y.to_bits()),
    ))
}

/// Sort in place. With a comparator the callable decides the order, else
/// numbers sort numerically and everything else by its string rendering.
fn objfn_array_sort(state: &mut State, instance: Value, args: &[Value]) -> Result<Value, String> {
    let mut elements = receiver_elements(state, instance)?;
    let comparator = args.first().copied();
    // Insertion sort: comparators can run arbitrary code, so no unwinding
    // out of a std sort closure.
    for i in 1..elements.len() {
        let mut j = i;
        while j > 0 {
            let in_order = match comparator {
                Some(comparator) if !comparator.is_null() => {
                    let result =
                        state.call(comparator, &[elements[j - 1], elements[j]]);
                    if result.status != InterpretResult::Ok {
                        return Err("sort comparator failed".to_string());
                    }
                    !result.value.is_falsey()
                }
                _ => default_less(state, elements[j - 1], elements[j]),
            };
            if in_order {
                break;
            }
            elements.swap(j - 1, j);
            j -= 1;
        }
    }
    with_elements(state, instance, |stored| *stored = elements)?;
    Ok(instance)
}

fn default_less(state: &mut State, a: Value, b: Value) -> bool {
    if a.is_number() && b.is_number() {
        return a.as_number() <= b.as_number();
    }
    let a = state.value_to_string(a);
    let b = state.value_to_string(b);
    a <= b
}

fn objfn_array_iterator(state: &mut State, instance: Value, args: &[Value]) -> Result<Value, String> {
    let elements = receiver_elements(state, instance)?;
    let next = match args.first() {
        Some(value) if value.is_number() => value.as_number() as usize + 1,
        _ => 0,
    };
    if next >= elements.len() {
        Ok(Value::NULL)
    } else {
        Ok(Value::number(next as f64))
    }
}

fn objfn_array_iteratorvalue(
    state: &mut State,
    instance: Value,
    args: &[Value],
) -> Result<Value, String> {
    let elements = receiver_elements(state, instance)?;
    let index = check_number(state, args, 0)? as usize;
    Ok(elements.get(index).copied().unwrap_or(Value::NULL))
}

fn objfn_array_tostring(state: &mut State, instance: Value, _args: &[Value]) -> Result<Value, String> {
    if !matches!(state.kind_of(instance), Some(ObjKind::Array)) {
        return Err("expected an array receiver".to_string());
    }
    let rendered = state.value_to_string(instance);
    Ok(state.string_value(&rendered))
}

pub fn open_array_library(state: &mut State) {
    let builder = ClassBuilder::new(state, "Array");
    if let Some(object) = state.classes.object {
        builder.inherit_from(state, object);
    }
    builder.bind_constructor(state, objfn_array_constructor);
    builder.bind_method(state, "[]", objfn_array_subscript);
    builder.bind_method(state, "==", objfn_array_compare);
    builder.bind_method(state, "add", objfn_array_add);
    builder.bind_method(state, "push", objfn_array_add);
    builder.bind_method(state, "insert", objfn_array_insert);
    builder.bind_method(state, "slice", objfn_array_slice);
    builder.bind_method(state, "addAll", objfn_array_addall);
    builder.bind_method(state, "remove", objfn_array_remove);
    builder.bind_method(state, "removeAt", objfn_array_removeat);
    builder.bind_method(state, "indexOf", objfn_array_indexof);
    builder.bind_method(state, "contains", objfn_array_contains);
    builder.bind_method(state, "clear", objfn_array_clear);
    builder.bind_method(state, "iterator", objfn_array_iterator);
    builder.bind_method(state, "iteratorValue", objfn_array_iteratorvalue);
    builder.bind_method(state, "join", objfn_array_join);
    builder.bind_method(state, "sort", objfn_array_sort);
    builder.bind_method(state, "clone", objfn_array_clone);
    builder.bind_method(state, "toString", objfn_array_tostring);
    builder.set_getter(state, "length", objfn_array_length);
    builder.install(state);
    state.classes.array = Some(builder.handle());
}
