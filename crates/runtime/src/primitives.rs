//! Primitive functions
//!
//! The registry of built-ins callable from bytecode. The table order is the
//! layout of the base environment frame, so the compiler resolves primitive
//! names to slots by position in this same table. Each primitive pops
//! exactly its argument count off the operand stack and returns one result,
//! which the VM pushes; primitives are leaf calls and never jump.

use crate::error::{ErrorKind, VmError};
use crate::vm::Vm;
use cassette_core::value::{NIL, SYM_ERROR, SYM_OK, Value, bool_val};
use rand::Rng;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Arity {
    Exact(u8),
    Variadic,
}

pub type PrimitiveFn = fn(&mut Vm, u8) -> Result<Value, VmError>;

pub struct PrimitiveDef {
    pub name: &'static str,
    pub arity: Arity,
    pub run: PrimitiveFn,
}

macro_rules! prim {
    ($name:literal, $arity:expr, $fn:ident) => {
        PrimitiveDef {
            name: $name,
            arity: $arity,
            run: $fn,
        }
    };
}

/// The primitive registry. Slot `i` of the base frame holds `(*prim* . i)`.
pub fn table() -> &'static [PrimitiveDef] {
    use Arity::*;
    static TABLE: &[PrimitiveDef] = &[
        prim!("head", Exact(1), prim_head),
        prim!("tail", Exact(1), prim_tail),
        prim!("#", Exact(1), prim_length),
        prim!("+", Exact(2), prim_add),
        prim!("-", Exact(2), prim_sub),
        prim!("*", Exact(2), prim_mul),
        prim!("/", Exact(2), prim_div),
        prim!("%", Exact(2), prim_rem),
        prim!("..", Exact(2), prim_range),
        prim!("<", Exact(2), prim_lt),
        prim!("<=", Exact(2), prim_lte),
        prim!(">", Exact(2), prim_gt),
        prim!(">=", Exact(2), prim_gte),
        prim!("==", Exact(2), prim_eq),
        prim!("!=", Exact(2), prim_neq),
        prim!("not", Exact(1), prim_not),
        prim!("<>", Exact(2), prim_concat),
        prim!("|", Exact(2), prim_cons),
        prim!("in", Exact(2), prim_in),
        prim!("map-get", Exact(2), prim_map_get),
        prim!("map-set", Exact(3), prim_map_set),
        prim!("map-del", Exact(2), prim_map_del),
        prim!("map-keys", Exact(1), prim_map_keys),
        prim!("map-values", Exact(1), prim_map_values),
        prim!("symbol-name", Exact(1), prim_symbol_name),
        prim!("substr", Exact(3), prim_substr),
        prim!("trunc", Exact(1), prim_trunc),
        prim!("unwrap", Exact(2), prim_unwrap),
        prim!("unwrap!", Exact(1), prim_unwrap_bang),
        prim!("ok?", Exact(1), prim_is_ok),
        prim!("integer?", Exact(1), prim_is_integer),
        prim!("float?", Exact(1), prim_is_float),
        prim!("symbol?", Exact(1), prim_is_symbol),
        prim!("pair?", Exact(1), prim_is_pair),
        prim!("tuple?", Exact(1), prim_is_tuple),
        prim!("binary?", Exact(1), prim_is_binary),
        prim!("map?", Exact(1), prim_is_map),
        prim!("function?", Exact(1), prim_is_function),
        prim!("panic!", Exact(1), prim_panic),
        prim!("print", Exact(1), prim_print),
        prim!("random", Exact(0), prim_random),
        prim!("open", Exact(2), prim_open),
        prim!("close", Exact(1), prim_close),
        prim!("read", Exact(2), prim_read),
        prim!("write", Exact(2), prim_write),
        prim!("get-param", Exact(2), prim_get_param),
        prim!("set-param", Exact(3), prim_set_param),
    ];
    TABLE
}

// ---- argument helpers ----

fn pop_num(vm: &mut Vm) -> Result<Value, VmError> {
    let value = vm.pop()?;
    if value.is_num() {
        Ok(value)
    } else {
        Err(vm.type_error("number", value))
    }
}

fn pop_int(vm: &mut Vm) -> Result<i32, VmError> {
    let value = vm.pop()?;
    value.as_int().ok_or_else(|| vm.type_error("integer", value))
}

/// Symbols and binaries both read as text at the device boundary.
fn pop_text(vm: &mut Vm) -> Result<String, VmError> {
    let value = vm.pop()?;
    if let Some(name) = vm.heap.symbols.name(value) {
        return Ok(name.to_string());
    }
    if let Some(bytes) = vm.heap.binary_bytes(value) {
        return Ok(String::from_utf8_lossy(&bytes).into_owned());
    }
    Err(vm.type_error("binary or symbol", value))
}

fn pop_device(vm: &mut Vm) -> Result<u32, VmError> {
    let value = vm.pop()?;
    if vm.heap.is_device(value) {
        if let Some(id) = vm.heap.tail(value).and_then(Value::as_int) {
            return Ok(id as u32);
        }
    }
    Err(vm.type_error("device", value))
}

fn runtime_err(vm: &Vm, message: String) -> VmError {
    vm.error(ErrorKind::Runtime, message)
}

// ---- pairs and collections ----

fn prim_head(vm: &mut Vm, _argc: u8) -> Result<Value, VmError> {
    let pair = vm.pop()?;
    vm.heap
        .head(pair)
        .ok_or_else(|| vm.type_error("pair", pair))
}

fn prim_tail(vm: &mut Vm, _argc: u8) -> Result<Value, VmError> {
    let pair = vm.pop()?;
    vm.heap
        .tail(pair)
        .ok_or_else(|| vm.type_error("pair", pair))
}

fn prim_length(vm: &mut Vm, _argc: u8) -> Result<Value, VmError> {
    let value = vm.pop()?;
    vm.length_of(value).map(Value::Int)
}

fn prim_cons(vm: &mut Vm, _argc: u8) -> Result<Value, VmError> {
    let tail = vm.pop()?;
    let head = vm.pop()?;
    Ok(vm.heap.pair(head, tail))
}

fn prim_in(vm: &mut Vm, _argc: u8) -> Result<Value, VmError> {
    let obj = vm.pop()?;
    let item = vm.pop()?;
    let found = if obj.is_nil() || vm.heap.head(obj).is_some() {
        vm.heap.list_contains(obj, item)
    } else if vm.heap.is_tuple(obj) {
        vm.heap.tuple_contains(obj, item)
    } else if vm.heap.is_map(obj) {
        vm.heap.map_contains(obj, item)
    } else {
        return Err(vm.type_error("collection", obj));
    };
    Ok(bool_val(found))
}

fn prim_range(vm: &mut Vm, _argc: u8) -> Result<Value, VmError> {
    let hi = pop_int(vm)?;
    let lo = pop_int(vm)?;
    let mut list = NIL;
    let mut n = hi;
    while n > lo {
        n -= 1;
        list = vm.heap.pair(Value::Int(n), list);
    }
    Ok(list)
}

fn prim_concat(vm: &mut Vm, _argc: u8) -> Result<Value, VmError> {
    let b = vm.pop()?;
    let a = vm.pop()?;
    if let (Some(mut bytes), Some(more)) = (vm.heap.binary_bytes(a), vm.heap.binary_bytes(b)) {
        bytes.extend_from_slice(&more);
        return Ok(vm.heap.make_binary(&bytes));
    }
    let a_list = a.is_nil() || vm.heap.head(a).is_some();
    let b_list = b.is_nil() || vm.heap.head(b).is_some();
    if a_list && b_list {
        let mut items = vm.heap.list_items(a);
        items.extend(vm.heap.list_items(b));
        return Ok(vm.heap.list_from(&items));
    }
    if let (Some(la), Some(lb)) = (vm.heap.tuple_len(a), vm.heap.tuple_len(b)) {
        let joined = vm.heap.make_tuple(la + lb);
        for i in 0..la {
            let item = vm.heap.tuple_get(a, i).unwrap_or(NIL);
            vm.heap.tuple_set(joined, i, item);
        }
        for i in 0..lb {
            let item = vm.heap.tuple_get(b, i).unwrap_or(NIL);
            vm.heap.tuple_set(joined, la + i, item);
        }
        return Ok(joined);
    }
    Err(vm.type_error("two binaries, lists, or tuples", a))
}

// ---- arithmetic and comparison ----

fn prim_add(vm: &mut Vm, _argc: u8) -> Result<Value, VmError> {
    let b = pop_num(vm)?;
    let a = pop_num(vm)?;
    Ok(match (a, b) {
        (Value::Int(x), Value::Int(y)) => Value::Int(x.wrapping_add(y)),
        _ => Value::Float(a.as_num().unwrap_or(0.0) + b.as_num().unwrap_or(0.0)),
    })
}

fn prim_sub(vm: &mut Vm, _argc: u8) -> Result<Value, VmError> {
    let b = pop_num(vm)?;
    let a = pop_num(vm)?;
    Ok(match (a, b) {
        (Value::Int(x), Value::Int(y)) => Value::Int(x.wrapping_sub(y)),
        _ => Value::Float(a.as_num().unwrap_or(0.0) - b.as_num().unwrap_or(0.0)),
    })
}

fn prim_mul(vm: &mut Vm, _argc: u8) -> Result<Value, VmError> {
    let b = pop_num(vm)?;
    let a = pop_num(vm)?;
    Ok(match (a, b) {
        (Value::Int(x), Value::Int(y)) => Value::Int(x.wrapping_mul(y)),
        _ => Value::Float(a.as_num().unwrap_or(0.0) * b.as_num().unwrap_or(0.0)),
    })
}

fn prim_div(vm: &mut Vm, _argc: u8) -> Result<Value, VmError> {
    let b = pop_num(vm)?;
    let a = pop_num(vm)?;
    let y = b.as_num().unwrap_or(0.0);
    if y == 0.0 {
        return Err(vm.error(ErrorKind::Arithmetic, "division by zero"));
    }
    Ok(Value::Float(a.as_num().unwrap_or(0.0) / y))
}

fn prim_rem(vm: &mut Vm, _argc: u8) -> Result<Value, VmError> {
    let b = pop_int(vm)?;
    let a = pop_int(vm)?;
    if b == 0 {
        return Err(vm.error(ErrorKind::Arithmetic, "remainder by zero"));
    }
    Ok(Value::Int(a.wrapping_rem(b)))
}

fn compare(vm: &mut Vm) -> Result<(f32, f32), VmError> {
    let b = pop_num(vm)?;
    let a = pop_num(vm)?;
    Ok((a.as_num().unwrap_or(0.0), b.as_num().unwrap_or(0.0)))
}

fn prim_lt(vm: &mut Vm, _argc: u8) -> Result<Value, VmError> {
    let (a, b) = compare(vm)?;
    Ok(bool_val(a < b))
}

fn prim_lte(vm: &mut Vm, _argc: u8) -> Result<Value, VmError> {
    let (a, b) = compare(vm)?;
    Ok(bool_val(a <= b))
}

fn prim_gt(vm: &mut Vm, _argc: u8) -> Result<Value, VmError> {
    let (a, b) = compare(vm)?;
    Ok(bool_val(a > b))
}

fn prim_gte(vm: &mut Vm, _argc: u8) -> Result<Value, VmError> {
    let (a, b) = compare(vm)?;
    Ok(bool_val(a >= b))
}

fn prim_eq(vm: &mut Vm, _argc: u8) -> Result<Value, VmError> {
    let b = vm.pop()?;
    let a = vm.pop()?;
    Ok(bool_val(vm.heap.values_equal(a, b)))
}

fn prim_neq(vm: &mut Vm, _argc: u8) -> Result<Value, VmError> {
    let b = vm.pop()?;
    let a = vm.pop()?;
    Ok(bool_val(!vm.heap.values_equal(a, b)))
}

fn prim_not(vm: &mut Vm, _argc: u8) -> Result<Value, VmError> {
    let value = vm.pop()?;
    Ok(bool_val(!value.is_truthy()))
}

// ---- maps ----

fn pop_map(vm: &mut Vm) -> Result<Value, VmError> {
    let map = vm.pop()?;
    if vm.heap.is_map(map) {
        Ok(map)
    } else {
        Err(vm.type_error("map", map))
    }
}

fn prim_map_get(vm: &mut Vm, _argc: u8) -> Result<Value, VmError> {
    let key = vm.pop()?;
    let map = pop_map(vm)?;
    Ok(vm.heap.map_get(map, key).unwrap_or(NIL))
}

fn prim_map_set(vm: &mut Vm, _argc: u8) -> Result<Value, VmError> {
    let value = vm.pop()?;
    let key = vm.pop()?;
    let map = pop_map(vm)?;
    Ok(vm.heap.map_set(map, key, value))
}

fn prim_map_del(vm: &mut Vm, _argc: u8) -> Result<Value, VmError> {
    let key = vm.pop()?;
    let map = pop_map(vm)?;
    Ok(vm.heap.map_delete(map, key))
}

fn prim_map_keys(vm: &mut Vm, _argc: u8) -> Result<Value, VmError> {
    let map = pop_map(vm)?;
    Ok(vm.heap.map_keys(map))
}

fn prim_map_values(vm: &mut Vm, _argc: u8) -> Result<Value, VmError> {
    let map = pop_map(vm)?;
    Ok(vm.heap.map_values(map))
}

// ---- binaries and symbols ----

fn prim_symbol_name(vm: &mut Vm, _argc: u8) -> Result<Value, VmError> {
    let sym = vm.pop()?;
    let name = vm
        .heap
        .symbols
        .name(sym)
        .ok_or_else(|| vm.type_error("symbol", sym))?
        .to_string();
    Ok(vm.heap.make_binary(name.as_bytes()))
}

fn prim_substr(vm: &mut Vm, _argc: u8) -> Result<Value, VmError> {
    let end = pop_int(vm)?;
    let start = pop_int(vm)?;
    let bin = vm.pop()?;
    let bytes = vm
        .heap
        .binary_bytes(bin)
        .ok_or_else(|| vm.type_error("binary", bin))?;
    let len = bytes.len() as i32;
    let start = start.clamp(0, len) as usize;
    let end = end.clamp(start as i32, len) as usize;
    Ok(vm.heap.make_binary(&bytes[start..end]))
}

fn prim_trunc(vm: &mut Vm, _argc: u8) -> Result<Value, VmError> {
    let value = pop_num(vm)?;
    Ok(match value {
        Value::Int(_) => value,
        _ => Value::Int(value.as_num().unwrap_or(0.0) as i32),
    })
}

// ---- results ----

fn result_payload(vm: &Vm, value: Value) -> Option<Value> {
    if vm.heap.head(value) == Some(SYM_OK) {
        vm.heap.tail(value)
    } else {
        None
    }
}

fn prim_unwrap(vm: &mut Vm, _argc: u8) -> Result<Value, VmError> {
    let default = vm.pop()?;
    let result = vm.pop()?;
    Ok(result_payload(vm, result).unwrap_or(default))
}

fn prim_unwrap_bang(vm: &mut Vm, _argc: u8) -> Result<Value, VmError> {
    let result = vm.pop()?;
    result_payload(vm, result).ok_or_else(|| {
        let reason = if vm.heap.head(result) == Some(SYM_ERROR) {
            vm.heap.tail(result).unwrap_or(NIL)
        } else {
            result
        };
        runtime_err(vm, format!("unwrapped error: {}", vm.heap.inspect(reason)))
    })
}

fn prim_is_ok(vm: &mut Vm, _argc: u8) -> Result<Value, VmError> {
    let value = vm.pop()?;
    Ok(bool_val(vm.heap.head(value) == Some(SYM_OK)))
}

// ---- type predicates ----

fn prim_is_integer(vm: &mut Vm, _argc: u8) -> Result<Value, VmError> {
    let value = vm.pop()?;
    Ok(bool_val(matches!(value, Value::Int(_))))
}

fn prim_is_float(vm: &mut Vm, _argc: u8) -> Result<Value, VmError> {
    let value = vm.pop()?;
    Ok(bool_val(matches!(value, Value::Float(_))))
}

fn prim_is_symbol(vm: &mut Vm, _argc: u8) -> Result<Value, VmError> {
    let value = vm.pop()?;
    Ok(bool_val(matches!(value, Value::Symbol(_))))
}

fn prim_is_pair(vm: &mut Vm, _argc: u8) -> Result<Value, VmError> {
    let value = vm.pop()?;
    Ok(bool_val(matches!(value, Value::Pair(_))))
}

fn prim_is_tuple(vm: &mut Vm, _argc: u8) -> Result<Value, VmError> {
    let value = vm.pop()?;
    Ok(bool_val(vm.heap.is_tuple(value) && !vm.heap.is_closure(value)))
}

fn prim_is_binary(vm: &mut Vm, _argc: u8) -> Result<Value, VmError> {
    let value = vm.pop()?;
    Ok(bool_val(vm.heap.is_binary(value)))
}

fn prim_is_map(vm: &mut Vm, _argc: u8) -> Result<Value, VmError> {
    let value = vm.pop()?;
    Ok(bool_val(vm.heap.is_map(value)))
}

fn prim_is_function(vm: &mut Vm, _argc: u8) -> Result<Value, VmError> {
    let value = vm.pop()?;
    Ok(bool_val(
        vm.heap.is_closure(value) || vm.heap.is_primitive(value),
    ))
}

// ---- host and devices ----

fn prim_panic(vm: &mut Vm, _argc: u8) -> Result<Value, VmError> {
    let message = vm.pop()?;
    let text = match vm.heap.binary_bytes(message) {
        Some(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
        None => vm.heap.inspect(message),
    };
    Err(runtime_err(vm, text))
}

fn prim_print(vm: &mut Vm, _argc: u8) -> Result<Value, VmError> {
    let value = vm.pop()?;
    match vm.heap.binary_bytes(value) {
        Some(bytes) => println!("{}", String::from_utf8_lossy(&bytes)),
        None => println!("{}", vm.heap.inspect(value)),
    }
    Ok(SYM_OK)
}

fn prim_random(vm: &mut Vm, _argc: u8) -> Result<Value, VmError> {
    Ok(Value::Float(vm.rng.gen_range(0.0f32..1.0)))
}

fn prim_open(vm: &mut Vm, _argc: u8) -> Result<Value, VmError> {
    let arg = {
        let value = vm.pop()?;
        if value.is_nil() {
            String::new()
        } else {
            vm.push(value);
            pop_text(vm)?
        }
    };
    let kind = pop_text(vm)?;
    let id = vm
        .devices
        .open(&kind, &arg)
        .map_err(|e| runtime_err(vm, e))?;
    Ok(vm
        .heap
        .pair(cassette_core::value::SYM_DEVICE, Value::Int(id as i32)))
}

fn prim_close(vm: &mut Vm, _argc: u8) -> Result<Value, VmError> {
    let id = pop_device(vm)?;
    vm.devices.close(id).map_err(|e| runtime_err(vm, e))?;
    Ok(SYM_OK)
}

fn prim_read(vm: &mut Vm, _argc: u8) -> Result<Value, VmError> {
    let count = pop_int(vm)?.max(0) as usize;
    let id = pop_device(vm)?;
    let bytes = match vm.devices.get(id) {
        Some(device) => device.read(count).map_err(|e| runtime_err(vm, e))?,
        None => return Err(runtime_err(vm, format!("device {id} is not open"))),
    };
    Ok(vm.heap.make_binary(&bytes))
}

fn prim_write(vm: &mut Vm, _argc: u8) -> Result<Value, VmError> {
    let data = vm.pop()?;
    let id = pop_device(vm)?;
    let bytes = vm
        .heap
        .binary_bytes(data)
        .ok_or_else(|| vm.type_error("binary", data))?;
    let written = match vm.devices.get(id) {
        Some(device) => device.write(&bytes).map_err(|e| runtime_err(vm, e))?,
        None => return Err(runtime_err(vm, format!("device {id} is not open"))),
    };
    Ok(Value::Int(written as i32))
}

fn prim_get_param(vm: &mut Vm, _argc: u8) -> Result<Value, VmError> {
    let key = pop_text(vm)?;
    let id = pop_device(vm)?;
    let value = match vm.devices.get(id) {
        Some(device) => device.get_param(&key).map_err(|e| runtime_err(vm, e))?,
        None => return Err(runtime_err(vm, format!("device {id} is not open"))),
    };
    Ok(match value {
        Some(text) => vm.heap.make_binary(text.as_bytes()),
        None => NIL,
    })
}

fn prim_set_param(vm: &mut Vm, _argc: u8) -> Result<Value, VmError> {
    let value = {
        let raw = vm.pop()?;
        match raw {
            Value::Int(n) => n.to_string(),
            _ => {
                vm.push(raw);
                pop_text(vm)?
            }
        }
    };
    let key = pop_text(vm)?;
    let id = pop_device(vm)?;
    match vm.devices.get(id) {
        Some(device) => device
            .set_param(&key, &value)
            .map_err(|e| runtime_err(vm, e))?,
        None => return Err(runtime_err(vm, format!("device {id} is not open"))),
    }
    Ok(SYM_OK)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_vm() -> Vm {
        Vm::new(1)
    }

    #[test]
    fn test_table_names_are_unique() {
        let mut names: Vec<&str> = table().iter().map(|d| d.name).collect();
        names.sort_unstable();
        names.dedup();
        assert_eq!(names.len(), table().len());
    }

    #[test]
    fn test_range_builds_half_open_list() {
        let mut vm = test_vm();
        vm.push(Value::Int(2));
        vm.push(Value::Int(5));
        let list = prim_range(&mut vm, 2).unwrap();
        assert_eq!(
            vm.heap.list_items(list),
            vec![Value::Int(2), Value::Int(3), Value::Int(4)]
        );

        vm.push(Value::Int(5));
        vm.push(Value::Int(5));
        assert_eq!(prim_range(&mut vm, 2).unwrap(), NIL);
    }

    #[test]
    fn test_concat_binaries_and_lists() {
        let mut vm = test_vm();
        let a = vm.heap.make_binary(b"foo");
        let b = vm.heap.make_binary(b"bar");
        vm.push(a);
        vm.push(b);
        let joined = prim_concat(&mut vm, 2).unwrap();
        assert_eq!(vm.heap.binary_bytes(joined).as_deref(), Some(&b"foobar"[..]));

        let xs = vm.heap.list_from(&[Value::Int(1)]);
        let ys = vm.heap.list_from(&[Value::Int(2), Value::Int(3)]);
        vm.push(xs);
        vm.push(ys);
        let joined = prim_concat(&mut vm, 2).unwrap();
        assert_eq!(vm.heap.list_len(joined), 3);
    }

    #[test]
    fn test_unwrap_family() {
        let mut vm = test_vm();
        let ok = vm.heap.pair(SYM_OK, Value::Int(42));
        let err = vm.heap.pair(SYM_ERROR, Value::Int(9));

        vm.push(ok);
        vm.push(Value::Int(0));
        assert_eq!(prim_unwrap(&mut vm, 2).unwrap(), Value::Int(42));

        vm.push(err);
        vm.push(Value::Int(0));
        assert_eq!(prim_unwrap(&mut vm, 2).unwrap(), Value::Int(0));

        vm.push(ok);
        assert_eq!(prim_is_ok(&mut vm, 1).unwrap(), cassette_core::value::TRUE);

        vm.push(err);
        let failure = prim_unwrap_bang(&mut vm, 1).unwrap_err();
        assert_eq!(failure.kind, ErrorKind::Runtime);
    }

    #[test]
    fn test_substr_clamps() {
        let mut vm = test_vm();
        let bin = vm.heap.make_binary(b"cassette");
        vm.push(bin);
        vm.push(Value::Int(2));
        vm.push(Value::Int(100));
        let sub = prim_substr(&mut vm, 3).unwrap();
        assert_eq!(vm.heap.binary_bytes(sub).as_deref(), Some(&b"ssette"[..]));
    }

    #[test]
    fn test_predicates() {
        let mut vm = test_vm();
        use cassette_core::value::{FALSE, TRUE};
        vm.push(Value::Int(1));
        assert_eq!(prim_is_integer(&mut vm, 1).unwrap(), TRUE);
        vm.push(Value::Float(1.0));
        assert_eq!(prim_is_integer(&mut vm, 1).unwrap(), FALSE);
        vm.push(NIL);
        assert_eq!(prim_is_pair(&mut vm, 1).unwrap(), TRUE);
        let map = vm.heap.map_empty();
        vm.push(map);
        assert_eq!(prim_is_map(&mut vm, 1).unwrap(), TRUE);
    }

    #[test]
    fn test_division_by_zero_is_arithmetic_error() {
        let mut vm = test_vm();
        vm.push(Value::Int(1));
        vm.push(Value::Int(0));
        assert_eq!(
            prim_div(&mut vm, 2).unwrap_err().kind,
            ErrorKind::Arithmetic
        );
    }
}
