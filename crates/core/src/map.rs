//! Persistent maps
//!
//! Maps are hash-array-mapped tries stored in heap cells. A leaf is
//! `[MapHeader(0), key, value]`; an internal node is `[MapHeader(bitmap),
//! children]` where `children` is a tuple sized to `popcount(bitmap)` and the
//! set bits of the 16-way bitmap say which child slots are present. Keys are
//! routed by 4-bit slices of their structural hash, so any value can be a
//! key and equal values collide onto the same entry. Updates copy the
//! spine; old roots remain valid.

use crate::heap::{Cell, Heap};
use crate::value::{NIL, SYM_UNDEFINED, Value};

/// Leaf key marking the empty map.
const EMPTY_KEY: Value = SYM_UNDEFINED;

/// Hash slices are 4 bits; past this depth the hash is exhausted and a
/// colliding key overwrites.
const MAX_LEVEL: u32 = 8;

fn slot_of(hash: u32, level: u32) -> u16 {
    ((hash >> (4 * level)) & 0x0f) as u16
}

fn child_index(bitmap: u16, slot: u16) -> u32 {
    (bitmap & ((1u16 << slot) - 1)).count_ones()
}

impl Heap {
    pub fn map_empty(&mut self) -> Value {
        self.alloc_leaf(EMPTY_KEY, NIL)
    }

    fn alloc_leaf(&mut self, key: Value, value: Value) -> Value {
        let ix = self.cells.len() as u32;
        self.cells.push(Cell::MapHeader(0));
        self.cells.push(Cell::Val(key));
        self.cells.push(Cell::Val(value));
        Value::Obj(ix)
    }

    fn alloc_node(&mut self, bitmap: u16, children: Value) -> Value {
        let ix = self.cells.len() as u32;
        self.cells.push(Cell::MapHeader(bitmap));
        self.cells.push(Cell::Val(children));
        Value::Obj(ix)
    }

    fn map_header(&self, node: Value) -> Option<u16> {
        match node {
            Value::Obj(ix) => match self.cell(ix) {
                Cell::MapHeader(bitmap) => Some(bitmap),
                _ => None,
            },
            _ => None,
        }
    }

    fn leaf_entry(&self, node: Value) -> Option<(Value, Value)> {
        match node {
            Value::Obj(ix) if self.map_header(node) == Some(0) => {
                let key = match self.cell(ix + 1) {
                    Cell::Val(v) => v,
                    _ => return None,
                };
                let value = match self.cell(ix + 2) {
                    Cell::Val(v) => v,
                    _ => return None,
                };
                Some((key, value))
            }
            _ => None,
        }
    }

    fn node_children(&self, node: Value) -> Option<Value> {
        match node {
            Value::Obj(ix) => match self.cell(ix + 1) {
                Cell::Val(v) => Some(v),
                _ => None,
            },
            _ => None,
        }
    }

    pub fn map_len(&self, node: Value) -> u32 {
        match self.map_header(node) {
            Some(0) => match self.leaf_entry(node) {
                Some((key, _)) if key == EMPTY_KEY => 0,
                Some(_) => 1,
                None => 0,
            },
            Some(bitmap) => {
                let children = self.node_children(node).unwrap_or(NIL);
                (0..bitmap.count_ones())
                    .map(|i| self.map_len(self.tuple_get(children, i).unwrap_or(NIL)))
                    .sum()
            }
            None => 0,
        }
    }

    pub fn map_get(&self, node: Value, key: Value) -> Option<Value> {
        let hash = self.hash_value(key);
        self.node_get(node, key, hash, 0)
    }

    fn node_get(&self, node: Value, key: Value, hash: u32, level: u32) -> Option<Value> {
        match self.map_header(node)? {
            0 => {
                let (leaf_key, value) = self.leaf_entry(node)?;
                if leaf_key != EMPTY_KEY && self.values_equal(leaf_key, key) {
                    Some(value)
                } else {
                    None
                }
            }
            bitmap => {
                let slot = slot_of(hash, level);
                if bitmap & (1 << slot) == 0 {
                    return None;
                }
                let children = self.node_children(node)?;
                let child = self.tuple_get(children, child_index(bitmap, slot))?;
                self.node_get(child, key, hash, level + 1)
            }
        }
    }

    pub fn map_contains(&self, node: Value, key: Value) -> bool {
        self.map_get(node, key).is_some()
    }

    pub fn map_set(&mut self, node: Value, key: Value, value: Value) -> Value {
        let hash = self.hash_value(key);
        self.node_set(node, key, value, hash, 0)
    }

    fn node_set(&mut self, node: Value, key: Value, value: Value, hash: u32, level: u32) -> Value {
        match self.map_header(node).unwrap_or(0) {
            0 => {
                let (leaf_key, _) = self.leaf_entry(node).unwrap_or((EMPTY_KEY, NIL));
                if leaf_key == EMPTY_KEY || self.values_equal(leaf_key, key) {
                    self.alloc_leaf(key, value)
                } else {
                    let new_leaf = self.alloc_leaf(key, value);
                    self.split_leaves(node, leaf_key, new_leaf, hash, level)
                }
            }
            bitmap => {
                let slot = slot_of(hash, level);
                let children = self.node_children(node).unwrap_or(NIL);
                let index = child_index(bitmap, slot);
                if bitmap & (1 << slot) == 0 {
                    let leaf = self.alloc_leaf(key, value);
                    self.node_insert(bitmap, children, slot, leaf)
                } else {
                    let child = self.tuple_get(children, index).unwrap_or(NIL);
                    let new_child = self.node_set(child, key, value, hash, level + 1);
                    self.node_replace(bitmap, children, index, new_child)
                }
            }
        }
    }

    /// Combine an existing leaf and a new leaf under internal nodes, pushing
    /// deeper while their hash slices agree.
    fn split_leaves(
        &mut self,
        old_leaf: Value,
        old_key: Value,
        new_leaf: Value,
        hash: u32,
        level: u32,
    ) -> Value {
        if level >= MAX_LEVEL {
            return new_leaf;
        }
        let old_slot = slot_of(self.hash_value(old_key), level);
        let new_slot = slot_of(hash, level);
        if old_slot == new_slot {
            let inner = self.split_leaves(old_leaf, old_key, new_leaf, hash, level + 1);
            let children = self.make_tuple(1);
            self.tuple_set(children, 0, inner);
            self.alloc_node(1 << old_slot, children)
        } else {
            let children = self.make_tuple(2);
            if old_slot < new_slot {
                self.tuple_set(children, 0, old_leaf);
                self.tuple_set(children, 1, new_leaf);
            } else {
                self.tuple_set(children, 0, new_leaf);
                self.tuple_set(children, 1, old_leaf);
            }
            self.alloc_node((1 << old_slot) | (1 << new_slot), children)
        }
    }

    fn node_insert(&mut self, bitmap: u16, children: Value, slot: u16, child: Value) -> Value {
        let old_count = bitmap.count_ones();
        let index = child_index(bitmap, slot);
        let new_children = self.make_tuple(old_count + 1);
        for i in 0..index {
            let v = self.tuple_get(children, i).unwrap_or(NIL);
            self.tuple_set(new_children, i, v);
        }
        self.tuple_set(new_children, index, child);
        for i in index..old_count {
            let v = self.tuple_get(children, i).unwrap_or(NIL);
            self.tuple_set(new_children, i + 1, v);
        }
        self.alloc_node(bitmap | (1 << slot), new_children)
    }

    fn node_replace(&mut self, bitmap: u16, children: Value, index: u32, child: Value) -> Value {
        let count = bitmap.count_ones();
        let new_children = self.make_tuple(count);
        for i in 0..count {
            let v = self.tuple_get(children, i).unwrap_or(NIL);
            self.tuple_set(new_children, i, v);
        }
        self.tuple_set(new_children, index, child);
        self.alloc_node(bitmap, new_children)
    }

    /// Remove a key. The original map is returned when the key is absent.
    pub fn map_delete(&mut self, node: Value, key: Value) -> Value {
        let hash = self.hash_value(key);
        match self.node_delete(node, key, hash, 0) {
            Delete::Missing => node,
            Delete::Removed => self.map_empty(),
            Delete::Replaced(new_node) => new_node,
        }
    }

    fn node_delete(&mut self, node: Value, key: Value, hash: u32, level: u32) -> Delete {
        match self.map_header(node).unwrap_or(0) {
            0 => match self.leaf_entry(node) {
                Some((leaf_key, _))
                    if leaf_key != EMPTY_KEY && self.values_equal(leaf_key, key) =>
                {
                    Delete::Removed
                }
                _ => Delete::Missing,
            },
            bitmap => {
                let slot = slot_of(hash, level);
                if bitmap & (1 << slot) == 0 {
                    return Delete::Missing;
                }
                let children = self.node_children(node).unwrap_or(NIL);
                let index = child_index(bitmap, slot);
                let child = self.tuple_get(children, index).unwrap_or(NIL);
                match self.node_delete(child, key, hash, level + 1) {
                    Delete::Missing => Delete::Missing,
                    Delete::Replaced(new_child) => {
                        Delete::Replaced(self.node_replace(bitmap, children, index, new_child))
                    }
                    Delete::Removed => {
                        let count = bitmap.count_ones();
                        if count == 1 {
                            return Delete::Removed;
                        }
                        // lift a lone remaining leaf one level; internal
                        // nodes stay put since their slots are level-relative
                        if count == 2 {
                            let other = self.tuple_get(children, 1 - index).unwrap_or(NIL);
                            if self.map_header(other) == Some(0) {
                                return Delete::Replaced(other);
                            }
                        }
                        let new_children = self.make_tuple(count - 1);
                        let mut j = 0;
                        for i in 0..count {
                            if i == index {
                                continue;
                            }
                            let v = self.tuple_get(children, i).unwrap_or(NIL);
                            self.tuple_set(new_children, j, v);
                            j += 1;
                        }
                        Delete::Replaced(self.alloc_node(bitmap & !(1 << slot), new_children))
                    }
                }
            }
        }
    }

    /// Visit every entry in slot order.
    pub fn map_fold(&self, node: Value, f: &mut dyn FnMut(&Heap, Value, Value)) {
        match self.map_header(node) {
            Some(0) => {
                if let Some((key, value)) = self.leaf_entry(node) {
                    if key != EMPTY_KEY {
                        f(self, key, value);
                    }
                }
            }
            Some(bitmap) => {
                let children = self.node_children(node).unwrap_or(NIL);
                for i in 0..bitmap.count_ones() {
                    self.map_fold(self.tuple_get(children, i).unwrap_or(NIL), f);
                }
            }
            None => {}
        }
    }

    pub fn map_keys(&mut self, node: Value) -> Value {
        let mut keys = Vec::new();
        self.map_fold(node, &mut |_, key, _| keys.push(key));
        self.list_from(&keys)
    }

    pub fn map_values(&mut self, node: Value) -> Value {
        let mut values = Vec::new();
        self.map_fold(node, &mut |_, _, value| values.push(value));
        self.list_from(&values)
    }

    /// Every entry of `a` present in `b` with an equal value.
    pub fn map_is_subset(&self, a: Value, b: Value) -> bool {
        let mut subset = true;
        self.map_fold(a, &mut |heap, key, value| {
            if subset {
                subset = matches!(heap.map_get(b, key),
                                  Some(other) if heap.values_equal(value, other));
            }
        });
        subset
    }
}

enum Delete {
    Missing,
    Removed,
    Replaced(Value),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::{TRUE, symbol_hash};

    #[test]
    fn test_empty_map() {
        let mut heap = Heap::new();
        let map = heap.map_empty();
        assert!(heap.is_map(map));
        assert_eq!(heap.map_len(map), 0);
        assert_eq!(heap.map_get(map, Value::Int(1)), None);
    }

    #[test]
    fn test_set_get_many() {
        let mut heap = Heap::new();
        let mut map = heap.map_empty();
        for i in 0..100 {
            map = heap.map_set(map, Value::Int(i), Value::Int(i * 10));
        }
        assert_eq!(heap.map_len(map), 100);
        for i in 0..100 {
            assert_eq!(heap.map_get(map, Value::Int(i)), Some(Value::Int(i * 10)));
        }
        assert_eq!(heap.map_get(map, Value::Int(100)), None);
    }

    #[test]
    fn test_set_is_persistent() {
        let mut heap = Heap::new();
        let empty = heap.map_empty();
        let one = heap.map_set(empty, Value::Int(1), TRUE);
        let two = heap.map_set(one, Value::Int(1), Value::Int(99));
        assert_eq!(heap.map_get(one, Value::Int(1)), Some(TRUE));
        assert_eq!(heap.map_get(two, Value::Int(1)), Some(Value::Int(99)));
        assert_eq!(heap.map_len(empty), 0);
    }

    #[test]
    fn test_structural_keys() {
        let mut heap = Heap::new();
        let k1 = heap.make_binary(b"name");
        let k2 = heap.make_binary(b"name");
        let map = heap.map_empty();
        let map = heap.map_set(map, k1, Value::Int(1));
        assert_eq!(heap.map_get(map, k2), Some(Value::Int(1)));
    }

    #[test]
    fn test_delete() {
        let mut heap = Heap::new();
        let mut map = heap.map_empty();
        for i in 0..20 {
            map = heap.map_set(map, Value::Int(i), Value::Int(i));
        }
        let smaller = heap.map_delete(map, Value::Int(7));
        assert_eq!(heap.map_len(smaller), 19);
        assert_eq!(heap.map_get(smaller, Value::Int(7)), None);
        assert_eq!(heap.map_get(map, Value::Int(7)), Some(Value::Int(7)));
        // deleting a missing key returns the map unchanged
        assert_eq!(heap.map_delete(smaller, Value::Int(7)), smaller);
    }

    #[test]
    fn test_keys_and_values() {
        let mut heap = Heap::new();
        let a = Value::Symbol(symbol_hash("a"));
        let b = Value::Symbol(symbol_hash("b"));
        let map = heap.map_empty();
        let map = heap.map_set(map, a, Value::Int(1));
        let map = heap.map_set(map, b, Value::Int(2));
        let keys = heap.map_keys(map);
        let values = heap.map_values(map);
        assert_eq!(heap.list_len(keys), 2);
        assert_eq!(heap.list_len(values), 2);
        assert!(heap.list_contains(keys, a));
        assert!(heap.list_contains(keys, b));
    }

    #[test]
    fn test_map_equality() {
        let mut heap = Heap::new();
        let a = heap.map_empty();
        let a = heap.map_set(a, Value::Int(1), Value::Int(10));
        let a = heap.map_set(a, Value::Int(2), Value::Int(20));
        let b = heap.map_empty();
        let b = heap.map_set(b, Value::Int(2), Value::Int(20));
        let b = heap.map_set(b, Value::Int(1), Value::Int(10));
        assert!(heap.values_equal(a, b));
        let c = heap.map_set(b, Value::Int(1), Value::Int(11));
        assert!(!heap.values_equal(a, c));
    }
}
