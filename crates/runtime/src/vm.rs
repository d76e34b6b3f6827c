//! The virtual machine
//!
//! A stack machine with two live registers: `env` (the frame chain) and
//! `cont` (the return address of the current call). `Link` records a return
//! point in `cont`; `Return` jumps to it. The compiler spills the registers
//! to the call stack with `SaveEnv`/`SaveCont` only where a later sequence
//! needs a value an earlier one clobbers, so there is no fixed call frame
//! layout — tail calls just `Apply` without linking and run in constant
//! stack.
//!
//! Execution is single-threaded and cooperative: `run_budget` retires at
//! most `budget` instructions and returns with the machine quiescent, so a
//! host event loop can interleave its own work. The collector runs only
//! between instructions, when the heap passes a threshold that doubles
//! after each cycle.

use crate::device::DeviceManager;
use crate::env;
use crate::error::{ErrorKind, VmError};
use crate::primitives::{self, Arity};
use cassette_core::chunk::Chunk;
use cassette_core::gc;
use cassette_core::heap::Heap;
use cassette_core::ops::Op;
use cassette_core::value::{NIL, SYM_FUNC, SYM_PRIM, Value, bool_val};
use rand::SeedableRng;
use rand::rngs::SmallRng;

const GC_INITIAL_THRESHOLD: usize = 4096;

#[derive(Debug, PartialEq)]
pub enum Status {
    /// Budget exhausted with more code to run
    Running,
    /// Program finished; the value is the top of the stack
    Halted(Value),
    /// Host interrupt observed at the top of the dispatch loop
    Interrupted,
}

pub struct Vm {
    pub pc: usize,
    pub cont: usize,
    pub env: Value,
    /// The primitive frame alone; `load` resets `env` to this
    base_env: Value,
    pub stack: Vec<Value>,
    pub call_stack: Vec<Value>,
    /// Module cache, indexed by the compiler's module ids
    pub modules: Vec<Value>,
    pub heap: Heap,
    pub devices: DeviceManager,
    pub rng: SmallRng,
    /// Print each instruction and the stack as it executes
    pub trace: bool,
    interrupt: bool,
    next_gc: usize,
}

impl Vm {
    pub fn new(seed: u64) -> Self {
        let mut heap = Heap::new();
        for name in [
            "true",
            "false",
            "ok",
            "error",
            "*func*",
            "*prim*",
            "*device*",
            "*undefined*",
            "*main*",
        ] {
            heap.symbols.intern(name);
        }

        // the base environment is a single frame binding every primitive
        let count = primitives::table().len() as u32;
        let frame = heap.make_tuple(count);
        for (i, def) in primitives::table().iter().enumerate() {
            heap.symbols.intern(def.name);
            let prim = heap.pair(SYM_PRIM, Value::Int(i as i32));
            heap.tuple_set(frame, i as u32, prim);
        }
        let env = env::extend(&mut heap, NIL, frame);

        Vm {
            pc: 0,
            cont: 0,
            env,
            base_env: env,
            stack: Vec::new(),
            call_stack: Vec::new(),
            modules: Vec::new(),
            heap,
            devices: DeviceManager::new(),
            rng: SmallRng::seed_from_u64(seed),
            trace: false,
            interrupt: false,
            next_gc: GC_INITIAL_THRESHOLD,
        }
    }

    /// Prepare to execute a chunk: copy its symbol names into the heap (so
    /// `Str` and error reporting can see them) and reset execution state.
    pub fn load(&mut self, chunk: &Chunk) {
        tracing::debug!(
            code = chunk.len(),
            constants = chunk.constants.len(),
            "loading chunk"
        );
        self.heap.symbols.absorb(&chunk.symbols);
        self.pc = 0;
        self.cont = chunk.len();
        self.env = self.base_env;
        self.stack.clear();
        self.call_stack.clear();
        self.modules.clear();
        self.interrupt = false;
    }

    /// Run to completion.
    pub fn run(&mut self, chunk: &Chunk) -> Result<Value, VmError> {
        loop {
            match self.run_budget(chunk, usize::MAX)? {
                Status::Halted(value) => return Ok(value),
                Status::Interrupted => {
                    return Err(VmError::new(ErrorKind::Runtime, "interrupted", self.pc));
                }
                Status::Running => {}
            }
        }
    }

    /// Ask the dispatch loop to stop at its next iteration. The stack and
    /// registers stay intact for inspection.
    pub fn request_interrupt(&mut self) {
        self.interrupt = true;
    }

    /// Execute at most `budget` instructions.
    pub fn run_budget(&mut self, chunk: &Chunk, budget: usize) -> Result<Status, VmError> {
        let mut steps = 0;
        while self.pc < chunk.len() {
            if self.interrupt {
                self.interrupt = false;
                return Ok(Status::Interrupted);
            }
            if steps >= budget {
                return Ok(Status::Running);
            }
            steps += 1;

            if self.heap.len() > self.next_gc {
                self.collect();
                self.next_gc = self.heap.len() * 2;
            }

            if self.trace {
                self.trace_instruction(chunk);
            }
            self.step(chunk)?;
        }
        Ok(Status::Halted(self.stack.last().copied().unwrap_or(NIL)))
    }

    fn collect(&mut self) {
        let Vm {
            heap,
            env,
            base_env,
            stack,
            call_stack,
            modules,
            ..
        } = self;
        gc::collect(heap, &mut |copy| {
            *env = copy(*env);
            *base_env = copy(*base_env);
            for value in stack.iter_mut() {
                *value = copy(*value);
            }
            for value in call_stack.iter_mut() {
                *value = copy(*value);
            }
            for value in modules.iter_mut() {
                *value = copy(*value);
            }
        });
    }

    // ---- stack helpers (also used by primitives) ----

    pub fn push(&mut self, value: Value) {
        self.stack.push(value);
    }

    pub fn pop(&mut self) -> Result<Value, VmError> {
        self.stack
            .pop()
            .ok_or_else(|| VmError::new(ErrorKind::Stack, "stack underflow", self.pc))
    }

    fn peek(&self) -> Result<Value, VmError> {
        self.stack
            .last()
            .copied()
            .ok_or_else(|| VmError::new(ErrorKind::Stack, "stack underflow", self.pc))
    }

    pub fn error(&self, kind: ErrorKind, message: impl Into<String>) -> VmError {
        VmError::new(kind, message, self.pc)
    }

    pub fn type_error(&self, expected: &str, got: Value) -> VmError {
        self.error(
            ErrorKind::Type,
            format!("expected {expected}, got {}", self.heap.type_name(got)),
        )
    }

    // ---- instruction fetch ----

    fn byte_arg(&self, chunk: &Chunk, offset: usize) -> Result<u8, VmError> {
        chunk
            .code
            .get(self.pc + offset)
            .copied()
            .ok_or_else(|| self.error(ErrorKind::Runtime, "truncated bytecode"))
    }

    fn i16_arg(&self, chunk: &Chunk) -> Result<i16, VmError> {
        Ok(i16::from_le_bytes([
            self.byte_arg(chunk, 1)?,
            self.byte_arg(chunk, 2)?,
        ]))
    }

    fn constant(&self, chunk: &Chunk, index: usize) -> Result<Value, VmError> {
        chunk
            .constants
            .get(index)
            .copied()
            .ok_or_else(|| self.error(ErrorKind::Runtime, "constant index out of range"))
    }

    // ---- dispatch ----

    fn step(&mut self, chunk: &Chunk) -> Result<(), VmError> {
        let op = Op::from_byte(chunk.code[self.pc])
            .ok_or_else(|| self.error(ErrorKind::Runtime, "undefined opcode"))?;
        let next = self.pc + op.len();

        match op {
            Op::Halt => {
                self.pc = chunk.len();
                return Ok(());
            }
            Op::Pop => {
                self.pop()?;
            }
            Op::Dup => {
                let top = self.peek()?;
                self.push(top);
            }
            Op::Swap => {
                let a = self.pop()?;
                let b = self.pop()?;
                self.push(a);
                self.push(b);
            }
            Op::Nil => self.push(NIL),
            Op::Int => {
                let n = self.byte_arg(chunk, 1)?;
                self.push(Value::Int(i32::from(n)));
            }
            Op::Const => {
                let ix = self.byte_arg(chunk, 1)? as usize;
                let value = self.constant(chunk, ix)?;
                self.push(value);
            }
            Op::Const2 => {
                let ix = u16::from_le_bytes([self.byte_arg(chunk, 1)?, self.byte_arg(chunk, 2)?]);
                let value = self.constant(chunk, ix as usize)?;
                self.push(value);
            }
            Op::Str => {
                let sym = self.pop()?;
                let name = self
                    .heap
                    .symbols
                    .name(sym)
                    .ok_or_else(|| self.type_error("symbol", sym))?
                    .to_string();
                let bin = self.heap.make_binary(name.as_bytes());
                self.push(bin);
            }
            Op::Add | Op::Sub | Op::Mul => self.arith(op)?,
            Op::Div => {
                let a = self.pop()?;
                let b = self.pop()?;
                let (x, y) = (
                    b.as_num().ok_or_else(|| self.type_error("number", b))?,
                    a.as_num().ok_or_else(|| self.type_error("number", a))?,
                );
                if y == 0.0 {
                    return Err(self.error(ErrorKind::Arithmetic, "division by zero"));
                }
                self.push(Value::Float(x / y));
            }
            Op::Rem => {
                let a = self.pop()?;
                let b = self.pop()?;
                match (b, a) {
                    (Value::Int(_), Value::Int(0)) => {
                        return Err(self.error(ErrorKind::Arithmetic, "remainder by zero"));
                    }
                    (Value::Int(x), Value::Int(y)) => self.push(Value::Int(x.wrapping_rem(y))),
                    (Value::Int(_), other) | (other, _) => {
                        return Err(self.type_error("integer", other));
                    }
                }
            }
            Op::Neg => {
                let value = self.pop()?;
                match value {
                    Value::Int(n) => self.push(Value::Int(n.wrapping_neg())),
                    Value::Float(f) => self.push(Value::Float(-f)),
                    _ => return Err(self.type_error("number", value)),
                }
            }
            Op::Not => {
                let value = self.pop()?;
                self.push(bool_val(!value.is_truthy()));
            }
            Op::Eq => {
                let a = self.pop()?;
                let b = self.pop()?;
                self.push(bool_val(self.heap.values_equal(a, b)));
            }
            Op::Gt | Op::Lt => {
                let a = self.pop()?;
                let b = self.pop()?;
                let (x, y) = (
                    b.as_num().ok_or_else(|| self.type_error("number", b))?,
                    a.as_num().ok_or_else(|| self.type_error("number", a))?,
                );
                self.push(bool_val(if op == Op::Gt { x > y } else { x < y }));
            }
            Op::In => {
                let obj = self.pop()?;
                let item = self.pop()?;
                let found = if obj.is_nil() || self.heap.head(obj).is_some() {
                    self.heap.list_contains(obj, item)
                } else if self.heap.is_tuple(obj) {
                    self.heap.tuple_contains(obj, item)
                } else if self.heap.is_map(obj) {
                    self.heap.map_contains(obj, item)
                } else if self.heap.is_binary(obj) {
                    match item.as_int() {
                        Some(byte) if (0..=255).contains(&byte) => self
                            .heap
                            .binary_bytes(obj)
                            .is_some_and(|bytes| bytes.contains(&(byte as u8))),
                        _ => false,
                    }
                } else {
                    return Err(self.type_error("collection", obj));
                };
                self.push(bool_val(found));
            }
            Op::Len => {
                let value = self.pop()?;
                let len = self.length_of(value)?;
                self.push(Value::Int(len));
            }
            Op::Get => {
                let key = self.pop()?;
                let obj = self.pop()?;
                let value = self.access(obj, key)?;
                self.push(value);
            }
            Op::Pair => {
                let head = self.pop()?;
                let tail = self.pop()?;
                let pair = self.heap.pair(head, tail);
                self.push(pair);
            }
            Op::Tuple => {
                let n = self.byte_arg(chunk, 1)?;
                let tuple = self.heap.make_tuple(u32::from(n));
                self.push(tuple);
            }
            Op::Set => {
                let index = self.byte_arg(chunk, 1)?;
                let item = self.pop()?;
                let tuple = self.peek()?;
                if !self.heap.is_tuple(tuple) {
                    return Err(self.type_error("tuple", tuple));
                }
                self.heap
                    .tuple_set(tuple, u32::from(index), item)
                    .ok_or_else(|| self.error(ErrorKind::Key, "tuple index out of range"))?;
            }
            Op::Map => {
                let map = self.heap.map_empty();
                self.push(map);
            }
            Op::Put => {
                let key = self.pop()?;
                let value = self.pop()?;
                let map = self.pop()?;
                if !self.heap.is_map(map) {
                    return Err(self.type_error("map", map));
                }
                let updated = self.heap.map_set(map, key, value);
                self.push(updated);
            }
            Op::Extend => {
                let frame = self.pop()?;
                if !self.heap.is_tuple(frame) {
                    return Err(self.type_error("tuple", frame));
                }
                self.env = env::extend(&mut self.heap, self.env, frame);
            }
            Op::Export => {
                let frame = env::top_frame(&self.heap, self.env)
                    .ok_or_else(|| self.error(ErrorKind::Env, "no frame to export"))?;
                self.env = env::pop(&self.heap, self.env);
                self.push(frame);
            }
            Op::Define => {
                let slot = self.byte_arg(chunk, 1)?;
                let value = self.pop()?;
                env::define(&mut self.heap, self.env, u32::from(slot), value)
                    .ok_or_else(|| self.error(ErrorKind::Env, "define out of range"))?;
            }
            Op::Lookup => {
                let depth = self.byte_arg(chunk, 1)?;
                let slot = self.byte_arg(chunk, 2)?;
                let value =
                    env::lookup(&self.heap, self.env, u32::from(depth), u32::from(slot))
                        .ok_or_else(|| self.error(ErrorKind::Env, "lookup out of range"))?;
                self.push(value);
            }
            Op::Jump => {
                let rel = self.i16_arg(chunk)?;
                self.pc = offset_pc(next, rel);
                return Ok(());
            }
            Op::Branch => {
                let rel = self.i16_arg(chunk)?;
                if self.peek()?.is_truthy() {
                    self.pc = offset_pc(next, rel);
                    return Ok(());
                }
            }
            Op::Link => {
                let rel = self.i16_arg(chunk)?;
                self.cont = offset_pc(next, rel);
            }
            Op::Return => {
                self.pc = self.cont;
                return Ok(());
            }
            Op::Lambda => {
                let arity = self.pop()?;
                let entry = self.pop()?;
                let (Some(arity), Some(entry)) = (arity.as_int(), entry.as_int()) else {
                    return Err(self.error(ErrorKind::Type, "malformed lambda"));
                };
                let closure = self.heap.make_tuple(4);
                self.heap.tuple_set(closure, 0, SYM_FUNC);
                self.heap.tuple_set(closure, 1, Value::Int(entry));
                self.heap.tuple_set(closure, 2, self.env);
                self.heap.tuple_set(closure, 3, Value::Int(arity));
                self.push(closure);
            }
            Op::Apply => {
                let argc = self.byte_arg(chunk, 1)?;
                return self.apply(argc, next);
            }
            Op::SaveEnv => self.call_stack.push(self.env),
            Op::RestEnv => {
                self.env = self
                    .call_stack
                    .pop()
                    .ok_or_else(|| self.error(ErrorKind::Stack, "call stack underflow"))?;
            }
            Op::SaveCont => self.call_stack.push(Value::Int(self.cont as i32)),
            Op::RestCont => {
                let saved = self
                    .call_stack
                    .pop()
                    .ok_or_else(|| self.error(ErrorKind::Stack, "call stack underflow"))?;
                self.cont = saved
                    .as_int()
                    .ok_or_else(|| self.error(ErrorKind::Stack, "corrupt call stack"))?
                    as usize;
            }
            Op::Module => {
                let id = self.byte_arg(chunk, 1)? as usize;
                let value = self.pop()?;
                if self.modules.len() <= id {
                    self.modules.resize(id + 1, NIL);
                }
                self.modules[id] = value;
            }
            Op::Load => {
                let id = self.byte_arg(chunk, 1)? as usize;
                let value = self
                    .modules
                    .get(id)
                    .copied()
                    .ok_or_else(|| self.error(ErrorKind::Env, "module not loaded"))?;
                self.push(value);
            }
        }

        self.pc = next;
        Ok(())
    }

    fn arith(&mut self, op: Op) -> Result<(), VmError> {
        let a = self.pop()?;
        let b = self.pop()?;
        match (b, a) {
            (Value::Int(x), Value::Int(y)) => {
                let n = match op {
                    Op::Add => x.wrapping_add(y),
                    Op::Sub => x.wrapping_sub(y),
                    _ => x.wrapping_mul(y),
                };
                self.push(Value::Int(n));
            }
            _ => {
                let (x, y) = (
                    b.as_num().ok_or_else(|| self.type_error("number", b))?,
                    a.as_num().ok_or_else(|| self.type_error("number", a))?,
                );
                let f = match op {
                    Op::Add => x + y,
                    Op::Sub => x - y,
                    _ => x * y,
                };
                self.push(Value::Float(f));
            }
        }
        Ok(())
    }

    pub fn length_of(&self, value: Value) -> Result<i32, VmError> {
        if value.is_nil() || self.heap.head(value).is_some() {
            Ok(self.heap.list_len(value) as i32)
        } else if let Some(n) = self.heap.tuple_len(value) {
            Ok(n as i32)
        } else if let Some(n) = self.heap.binary_len(value) {
            Ok(n as i32)
        } else if self.heap.is_map(value) {
            Ok(self.heap.map_len(value) as i32)
        } else {
            Err(self.type_error("collection", value))
        }
    }

    /// Keyed/indexed read shared by `Get` and single-argument value
    /// application.
    pub fn access(&self, obj: Value, key: Value) -> Result<Value, VmError> {
        if obj.is_nil() || self.heap.head(obj).is_some() {
            match key.as_int() {
                Some(ix) if ix >= 0 => self
                    .heap
                    .list_get(obj, ix as u32)
                    .ok_or_else(|| self.error(ErrorKind::Key, "list index out of range")),
                _ => Err(self.error(ErrorKind::Key, "bad list index")),
            }
        } else if self.heap.is_tuple(obj) {
            match key.as_int() {
                Some(ix) if ix >= 0 => self
                    .heap
                    .tuple_get(obj, ix as u32)
                    .ok_or_else(|| self.error(ErrorKind::Key, "tuple index out of range")),
                _ => Err(self.error(ErrorKind::Key, "bad tuple index")),
            }
        } else if self.heap.is_binary(obj) {
            match key.as_int() {
                Some(ix) if ix >= 0 => self
                    .heap
                    .binary_byte(obj, ix as u32)
                    .map(|b| Value::Int(i32::from(b)))
                    .ok_or_else(|| self.error(ErrorKind::Key, "binary index out of range")),
                _ => Err(self.error(ErrorKind::Key, "bad binary index")),
            }
        } else if self.heap.is_map(obj) {
            self.heap
                .map_get(obj, key)
                .ok_or_else(|| self.error(ErrorKind::Key, "missing map key"))
        } else {
            Err(self.type_error("collection", obj))
        }
    }

    fn apply(&mut self, argc: u8, next: usize) -> Result<(), VmError> {
        let callable = self.pop()?;

        if self.heap.is_closure(callable) {
            let arity = self
                .heap
                .tuple_get(callable, 3)
                .and_then(Value::as_int)
                .unwrap_or(0);
            if arity != i32::from(argc) {
                return Err(self.error(
                    ErrorKind::Arity,
                    format!("expected {arity}, got {argc}"),
                ));
            }
            let entry = self
                .heap
                .tuple_get(callable, 1)
                .and_then(Value::as_int)
                .ok_or_else(|| self.error(ErrorKind::Type, "malformed closure"))?;
            self.env = self.heap.tuple_get(callable, 2).unwrap_or(NIL);
            self.pc = entry as usize;
            return Ok(());
        }

        if self.heap.is_primitive(callable) {
            let index = self
                .heap
                .tail(callable)
                .and_then(Value::as_int)
                .ok_or_else(|| self.error(ErrorKind::Type, "malformed primitive"))?;
            let def = primitives::table()
                .get(index as usize)
                .ok_or_else(|| self.error(ErrorKind::Type, "unknown primitive"))?;
            if let Arity::Exact(expected) = def.arity {
                if expected != argc {
                    return Err(self.error(
                        ErrorKind::Arity,
                        format!("{} expects {expected}, got {argc}", def.name),
                    ));
                }
            }
            let result = (def.run)(self, argc)?;
            self.push(result);
            self.pc = next;
            return Ok(());
        }

        // a bare value used as a function: indexed or keyed access with one
        // argument, identity with none
        let result = match argc {
            0 => callable,
            1 => {
                let arg = self.pop()?;
                self.access(callable, arg)?
            }
            _ => return Err(self.type_error("function", callable)),
        };
        self.push(result);
        self.pc = next;
        Ok(())
    }

    fn trace_instruction(&self, chunk: &Chunk) {
        let op = Op::from_byte(chunk.code[self.pc]);
        let name = op.map_or("??", Op::name);
        let mut stack = String::new();
        for value in self.stack.iter().rev().take(6) {
            stack.push(' ');
            stack.push_str(&self.heap.inspect(*value));
        }
        println!("{:04}  {:<10}│{}", self.pc, name, stack);
    }
}

fn offset_pc(base: usize, rel: i16) -> usize {
    (base as i64 + i64::from(rel)).max(0) as usize
}

#[cfg(test)]
mod tests {
    use super::*;
    use cassette_core::value::{TRUE, symbol_hash};

    fn chunk_of(bytes: &[u8]) -> Chunk {
        let mut chunk = Chunk::new();
        for b in bytes {
            chunk.push_byte(*b);
        }
        chunk
    }

    fn run(chunk: &Chunk) -> Result<Value, VmError> {
        let mut vm = Vm::new(0);
        vm.load(chunk);
        vm.run(chunk)
    }

    #[test]
    fn test_arithmetic() {
        // (1 + 2) * 3
        let chunk = chunk_of(&[
            Op::Int as u8, 1,
            Op::Int as u8, 2,
            Op::Add as u8,
            Op::Int as u8, 3,
            Op::Mul as u8,
            Op::Halt as u8,
        ]);
        assert_eq!(run(&chunk), Ok(Value::Int(9)));
    }

    #[test]
    fn test_mixed_arithmetic_widens() {
        let mut chunk = Chunk::new();
        let half = chunk.add_const(Value::Float(0.5)) as u8;
        for b in [Op::Int as u8, 2, Op::Const as u8, half, Op::Add as u8, Op::Halt as u8] {
            chunk.push_byte(b);
        }
        assert_eq!(run(&chunk), Ok(Value::Float(2.5)));
    }

    #[test]
    fn test_division_by_zero() {
        let chunk = chunk_of(&[Op::Int as u8, 1, Op::Int as u8, 0, Op::Div as u8, Op::Halt as u8]);
        assert_eq!(run(&chunk).unwrap_err().kind, ErrorKind::Arithmetic);
    }

    #[test]
    fn test_eq_is_structural() {
        // [1] == [1]
        let chunk = chunk_of(&[
            Op::Nil as u8,
            Op::Int as u8, 1,
            Op::Pair as u8,
            Op::Nil as u8,
            Op::Int as u8, 1,
            Op::Pair as u8,
            Op::Eq as u8,
            Op::Halt as u8,
        ]);
        assert_eq!(run(&chunk), Ok(TRUE));
    }

    #[test]
    fn test_branch_takes_truthy_and_keeps_value() {
        // push true; branch +3 over (pop, int 9); pop; int 5
        let chunk = chunk_of(&[
            Op::Nil as u8,
            Op::Not as u8, // true
            Op::Branch as u8, 3, 0,
            Op::Pop as u8,
            Op::Int as u8, 9,
            Op::Pop as u8,
            Op::Int as u8, 5,
            Op::Halt as u8,
        ]);
        assert_eq!(run(&chunk), Ok(Value::Int(5)));
    }

    #[test]
    fn test_branch_falls_through_on_falsy() {
        let chunk = chunk_of(&[
            Op::Nil as u8,
            Op::Branch as u8, 4, 0,
            Op::Pop as u8,
            Op::Int as u8, 9,
            Op::Halt as u8,
            Op::Pop as u8,
            Op::Int as u8, 5,
            Op::Halt as u8,
        ]);
        assert_eq!(run(&chunk), Ok(Value::Int(9)));
    }

    #[test]
    fn test_get_missing_map_key_is_key_error() {
        let sym = Value::Symbol(symbol_hash("missing"));
        let mut chunk = Chunk::new();
        chunk.symbols.intern("missing");
        let key = chunk.add_const(sym) as u8;
        for b in [Op::Map as u8, Op::Const as u8, key, Op::Get as u8, Op::Halt as u8] {
            chunk.push_byte(b);
        }
        assert_eq!(run(&chunk).unwrap_err().kind, ErrorKind::Key);
    }

    #[test]
    fn test_str_materializes_symbol_name() {
        let mut chunk = Chunk::new();
        chunk.symbols.intern("greeting");
        let sym = chunk.add_const(Value::Symbol(symbol_hash("greeting"))) as u8;
        for b in [Op::Const as u8, sym, Op::Str as u8, Op::Halt as u8] {
            chunk.push_byte(b);
        }
        let mut vm = Vm::new(0);
        vm.load(&chunk);
        let result = vm.run(&chunk).unwrap();
        assert_eq!(vm.heap.binary_bytes(result).as_deref(), Some(&b"greeting"[..]));
    }

    #[test]
    fn test_stack_underflow_reported() {
        let chunk = chunk_of(&[Op::Pop as u8, Op::Halt as u8]);
        assert_eq!(run(&chunk).unwrap_err().kind, ErrorKind::Stack);
    }

    #[test]
    fn test_budget_pauses_and_resumes() {
        let chunk = chunk_of(&[
            Op::Int as u8, 1,
            Op::Int as u8, 2,
            Op::Add as u8,
            Op::Halt as u8,
        ]);
        let mut vm = Vm::new(0);
        vm.load(&chunk);
        assert_eq!(vm.run_budget(&chunk, 1).unwrap(), Status::Running);
        assert_eq!(vm.run_budget(&chunk, 100).unwrap(), Status::Halted(Value::Int(3)));
    }

    #[test]
    fn test_interrupt_preserves_stack() {
        let chunk = chunk_of(&[Op::Int as u8, 7, Op::Int as u8, 8, Op::Halt as u8]);
        let mut vm = Vm::new(0);
        vm.load(&chunk);
        assert_eq!(vm.run_budget(&chunk, 1).unwrap(), Status::Running);
        vm.request_interrupt();
        assert_eq!(vm.run_budget(&chunk, 100).unwrap(), Status::Interrupted);
        assert_eq!(vm.stack, vec![Value::Int(7)]);
        // cleared flag lets execution continue
        assert_eq!(vm.run_budget(&chunk, 100).unwrap(), Status::Halted(Value::Int(8)));
    }

    #[test]
    fn test_primitive_apply_through_env() {
        // lookup `head` from the base frame, apply it to [42]
        let index = primitives::table()
            .iter()
            .position(|def| def.name == "head")
            .unwrap() as u8;
        let chunk = chunk_of(&[
            Op::Nil as u8,
            Op::Int as u8, 42,
            Op::Pair as u8,
            Op::Lookup as u8, 0, index,
            Op::Apply as u8, 1,
            Op::Halt as u8,
        ]);
        assert_eq!(run(&chunk), Ok(Value::Int(42)));
    }

    #[test]
    fn test_value_as_function_indexing() {
        // [10, 20][1] via dynamic apply
        let chunk = chunk_of(&[
            Op::Int as u8, 1,      // argument
            Op::Nil as u8,
            Op::Int as u8, 20,
            Op::Pair as u8,
            Op::Int as u8, 10,
            Op::Pair as u8,        // the list, used as the callable
            Op::Apply as u8, 1,
            Op::Halt as u8,
        ]);
        assert_eq!(run(&chunk), Ok(Value::Int(20)));
    }

    #[test]
    fn test_gc_runs_during_execution() {
        // cons cells in a loop until collection has definitely triggered
        let mut chunk = Chunk::new();
        for b in [
            Op::Nil as u8,          // 0: accumulator
            Op::Int as u8, 0,       // 1: counter
            // loop head (3): counter < 20000 ?
            Op::Dup as u8,          // 3
            Op::Const as u8, 0,     // 4
            Op::Lt as u8,           // 6
            Op::Branch as u8, 3, 0, // 7: continue at 13
            Op::Jump as u8, 12, 0,  // 10: exit to 25
            Op::Pop as u8,          // 13: drop flag
            Op::Swap as u8,         // 14
            Op::Int as u8, 1,       // 15
            Op::Pair as u8,         // 17: grow the list
            Op::Swap as u8,         // 18
            Op::Int as u8, 1,       // 19
            Op::Add as u8,          // 21
            Op::Jump as u8, (-22i8) as u8, 0xff, // 22: back to 3
            Op::Pop as u8,          // 25: drop flag
            Op::Halt as u8,         // 26
        ] {
            chunk.push_byte(b);
        }
        chunk.add_const(Value::Int(20_000));
        let mut vm = Vm::new(0);
        vm.load(&chunk);
        let result = vm.run(&chunk).unwrap();
        assert_eq!(result, Value::Int(20_000));
    }
}
