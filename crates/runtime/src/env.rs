//! Runtime environments
//!
//! An environment is a list of frames, most recent first, built from pairs:
//! `env = (frame . parent)`. A frame is a tuple whose slots were laid out by
//! the compiler, so lookups are `(depth, slot)` coordinates rather than
//! names.

use cassette_core::heap::Heap;
use cassette_core::value::{NIL, Value};

/// Push a frame, giving a new innermost scope.
pub fn extend(heap: &mut Heap, env: Value, frame: Value) -> Value {
    heap.pair(frame, env)
}

/// Discard the innermost frame.
pub fn pop(heap: &Heap, env: Value) -> Value {
    heap.tail(env).unwrap_or(NIL)
}

/// Innermost frame, if any.
pub fn top_frame(heap: &Heap, env: Value) -> Option<Value> {
    heap.head(env)
}

/// Bind a value in the innermost frame.
pub fn define(heap: &mut Heap, env: Value, slot: u32, value: Value) -> Option<()> {
    let frame = heap.head(env)?;
    heap.tuple_set(frame, slot, value)
}

/// Read the binding at `(depth, slot)`, walking outward `depth` frames.
pub fn lookup(heap: &Heap, mut env: Value, depth: u32, slot: u32) -> Option<Value> {
    for _ in 0..depth {
        env = heap.tail(env)?;
    }
    let frame = heap.head(env)?;
    heap.tuple_get(frame, slot)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extend_define_lookup() {
        let mut heap = Heap::new();
        let outer = heap.make_tuple(1);
        let env = extend(&mut heap, NIL, outer);
        define(&mut heap, env, 0, Value::Int(10)).unwrap();

        let inner = heap.make_tuple(2);
        let env = extend(&mut heap, env, inner);
        define(&mut heap, env, 0, Value::Int(20)).unwrap();
        define(&mut heap, env, 1, Value::Int(30)).unwrap();

        assert_eq!(lookup(&heap, env, 0, 0), Some(Value::Int(20)));
        assert_eq!(lookup(&heap, env, 0, 1), Some(Value::Int(30)));
        assert_eq!(lookup(&heap, env, 1, 0), Some(Value::Int(10)));
        assert_eq!(lookup(&heap, env, 2, 0), None);
        assert_eq!(lookup(&heap, env, 0, 2), None);
    }

    #[test]
    fn test_pop_restores_outer_scope() {
        let mut heap = Heap::new();
        let outer = heap.make_tuple(1);
        let env = extend(&mut heap, NIL, outer);
        let inner = heap.make_tuple(1);
        let extended = extend(&mut heap, env, inner);
        assert_eq!(pop(&heap, extended), env);
        assert_eq!(pop(&heap, NIL), NIL);
    }
}
