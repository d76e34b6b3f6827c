//! Compile-time environments
//!
//! Mirrors the runtime frame chain, but slots hold variable names instead
//! of values. Because the layout is identical, resolving a name here to a
//! `(depth, slot)` pair is all the runtime needs — lookups never carry
//! names, and an unresolved variable is a compile error rather than a
//! runtime one.

use cassette_core::value::Value;

#[derive(Debug, Default)]
struct Frame {
    names: Vec<Option<Value>>,
}

#[derive(Debug, Default)]
pub struct CompileEnv {
    /// Outermost first; the base frame holds the primitives
    frames: Vec<Frame>,
}

impl CompileEnv {
    /// Environment containing only the primitive frame.
    pub fn base(primitive_names: &[Value]) -> Self {
        CompileEnv {
            frames: vec![Frame {
                names: primitive_names.iter().copied().map(Some).collect(),
            }],
        }
    }

    pub fn extend(&mut self, size: usize) {
        self.frames.push(Frame {
            names: vec![None; size],
        });
    }

    pub fn pop(&mut self) {
        self.frames.pop();
    }

    /// Name a slot in the innermost frame.
    pub fn set(&mut self, slot: usize, name: Value) {
        if let Some(frame) = self.frames.last_mut() {
            if slot < frame.names.len() {
                frame.names[slot] = Some(name);
            }
        }
    }

    /// Resolve a name to `(depth, slot)`, scanning frames innermost-out and
    /// each frame back-to-front so later definitions shadow earlier ones.
    pub fn find(&self, name: Value) -> Option<(u32, u32)> {
        for (depth, frame) in self.frames.iter().rev().enumerate() {
            for (slot, bound) in frame.names.iter().enumerate().rev() {
                if *bound == Some(name) {
                    return Some((depth as u32, slot as u32));
                }
            }
        }
        None
    }

    /// Whether `depth` addresses the primitive frame.
    pub fn is_primitive_depth(&self, depth: u32) -> bool {
        depth as usize == self.frames.len() - 1
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cassette_core::value::symbol_hash;

    fn sym(name: &str) -> Value {
        Value::Symbol(symbol_hash(name))
    }

    #[test]
    fn test_find_walks_out_and_shadows() {
        let mut env = CompileEnv::base(&[sym("head"), sym("tail")]);
        env.extend(2);
        env.set(0, sym("x"));
        env.set(1, sym("y"));
        env.extend(1);
        env.set(0, sym("x")); // shadows outer x

        assert_eq!(env.find(sym("x")), Some((0, 0)));
        assert_eq!(env.find(sym("y")), Some((1, 1)));
        assert_eq!(env.find(sym("head")), Some((2, 0)));
        assert_eq!(env.find(sym("nope")), None);
    }

    #[test]
    fn test_later_slot_shadows_earlier_in_same_frame() {
        let mut env = CompileEnv::base(&[]);
        env.extend(2);
        env.set(0, sym("x"));
        env.set(1, sym("x"));
        assert_eq!(env.find(sym("x")), Some((0, 1)));
    }

    #[test]
    fn test_primitive_depth() {
        let mut env = CompileEnv::base(&[sym("head")]);
        assert!(env.is_primitive_depth(0));
        env.extend(1);
        assert!(env.is_primitive_depth(1));
        assert!(!env.is_primitive_depth(0));
        env.pop();
        assert!(env.is_primitive_depth(0));
    }
}
