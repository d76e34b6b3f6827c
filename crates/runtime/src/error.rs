//! Runtime error types.
//!
//! One error kind per failure class the dispatch loop can hit. Errors carry
//! the failing program counter so the reporter can map them back to a source
//! position through the chunk's file and source maps.

use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Operand stack underflow
    Stack,
    /// An opcode or primitive received a value outside its domain
    Type,
    /// Division or remainder by zero
    Arithmetic,
    /// Environment lookup out of range (compiler bug if it happens)
    Env,
    /// Missing map key or out-of-range index
    Key,
    /// Closure applied with the wrong number of arguments
    Arity,
    /// Explicit `panic!` or primitive failure
    Runtime,
}

impl ErrorKind {
    pub fn name(self) -> &'static str {
        match self {
            ErrorKind::Stack => "Stack error",
            ErrorKind::Type => "Type error",
            ErrorKind::Arithmetic => "Arithmetic error",
            ErrorKind::Env => "Undefined variable",
            ErrorKind::Key => "Key error",
            ErrorKind::Arity => "Wrong number of arguments",
            ErrorKind::Runtime => "Runtime error",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VmError {
    pub kind: ErrorKind,
    pub message: String,
    /// Offset of the failing instruction
    pub pc: usize,
}

impl VmError {
    pub fn new(kind: ErrorKind, message: impl Into<String>, pc: usize) -> Self {
        VmError {
            kind,
            message: message.into(),
            pc,
        }
    }
}

impl fmt::Display for VmError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.message.is_empty() {
            write!(f, "{}", self.kind.name())
        } else {
            write!(f, "{}: {}", self.kind.name(), self.message)
        }
    }
}

impl std::error::Error for VmError {}
