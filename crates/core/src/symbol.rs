//! Symbol interning
//!
//! A symbol value is the 20-bit hash of its name; the table maps hashes back
//! to names. The table lives outside the cell vector, so collection never
//! invalidates it. Interning is idempotent. Two distinct names can collide
//! in 20 bits; `try_intern` surfaces that as an error for source-derived
//! names, while `intern` keeps the first name (used for fixed internal
//! symbols, where a clash would be a build-time mistake).

use crate::value::{Value, symbol_hash};
use std::collections::HashMap;
use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SymbolError {
    pub name: String,
    pub existing: String,
}

impl fmt::Display for SymbolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "symbol \"{}\" collides with \"{}\"",
            self.name, self.existing
        )
    }
}

impl std::error::Error for SymbolError {}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SymbolTable {
    names: HashMap<u32, String>,
}

impl SymbolTable {
    pub fn new() -> Self {
        SymbolTable::default()
    }

    /// Intern a name, keeping the first stored name on a hash clash.
    pub fn intern(&mut self, name: &str) -> Value {
        let hash = symbol_hash(name);
        self.names
            .entry(hash)
            .or_insert_with(|| name.to_string());
        Value::Symbol(hash)
    }

    /// Intern a name, rejecting a hash clash with a previously interned
    /// different name.
    pub fn try_intern(&mut self, name: &str) -> Result<Value, SymbolError> {
        let hash = symbol_hash(name);
        match self.names.get(&hash) {
            Some(existing) if existing != name => Err(SymbolError {
                name: name.to_string(),
                existing: existing.clone(),
            }),
            Some(_) => Ok(Value::Symbol(hash)),
            None => {
                self.names.insert(hash, name.to_string());
                Ok(Value::Symbol(hash))
            }
        }
    }

    pub fn name(&self, symbol: Value) -> Option<&str> {
        match symbol {
            Value::Symbol(hash) => self.names.get(&hash).map(String::as_str),
            _ => None,
        }
    }

    pub fn contains(&self, hash: u32) -> bool {
        self.names.contains_key(&hash)
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (u32, &str)> {
        self.names.iter().map(|(h, n)| (*h, n.as_str()))
    }

    /// Copy every name from `other` into this table (first name wins).
    pub fn absorb(&mut self, other: &SymbolTable) {
        for (_, name) in other.iter() {
            self.intern(name);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_intern_is_idempotent() {
        let mut table = SymbolTable::new();
        let a = table.intern("foo");
        let b = table.intern("foo");
        assert_eq!(a, b);
        assert_eq!(table.len(), 1);
        assert_eq!(table.name(a), Some("foo"));
    }

    #[test]
    fn test_distinct_names_distinct_symbols() {
        let mut table = SymbolTable::new();
        let a = table.try_intern("head").unwrap();
        let b = table.try_intern("tail").unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_absorb_copies_names() {
        let mut a = SymbolTable::new();
        a.intern("one");
        a.intern("two");
        let mut b = SymbolTable::new();
        b.absorb(&a);
        assert_eq!(b.name(Value::Symbol(crate::value::symbol_hash("one"))), Some("one"));
    }
}
