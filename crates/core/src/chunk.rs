//! Chunks
//!
//! A chunk is an executable unit: bytecode, a constant pool, a symbol table
//! holding the names the code can mention, and two side tables mapping code
//! offsets back to sources.
//!
//! The file map is a run of `(filename symbol, byte length)` entries laid
//! end to end over the code. The source map is a run of `(delta, length)`
//! byte pairs: a signed delta moves the source-position cursor and the
//! unsigned length says how many code bytes were emitted there. Deltas that
//! do not fit in a byte are split across zero-length entries; lengths that
//! overflow a byte are split across zero-delta entries. The sentinel delta
//! -128 resets the cursor at file boundaries.

use crate::ops::Op;
use crate::symbol::SymbolTable;
use crate::value::{NIL, Value};
use std::fmt;

const MAGIC: [u8; 4] = *b"TAPE";
const VERSION: u32 = 1;
const RESET: i8 = -128;

/// Conventional extension for serialized chunks.
pub const CHUNK_EXT: &str = "tape";

#[derive(Debug, Default, PartialEq)]
pub struct Chunk {
    pub code: Vec<u8>,
    pub constants: Vec<Value>,
    pub symbols: SymbolTable,
    source_map: Vec<u8>,
    file_map: Vec<(Value, u32)>,
    cursor: u32,
}

impl Chunk {
    pub fn new() -> Self {
        Chunk::default()
    }

    pub fn len(&self) -> usize {
        self.code.len()
    }

    pub fn is_empty(&self) -> bool {
        self.code.is_empty()
    }

    /// Append a code byte, growing the current file and source map entries.
    pub fn push_byte(&mut self, byte: u8) -> usize {
        if self.file_map.is_empty() {
            let init = self.symbols.intern("*init*");
            self.begin_file(init);
        }
        let pos = self.code.len();
        self.code.push(byte);

        let last = self.source_map.len() - 1;
        self.source_map[last] += 1;
        if self.source_map[last] == u8::MAX {
            self.source_map.push(0);
            self.source_map.push(0);
        }
        if let Some(entry) = self.file_map.last_mut() {
            entry.1 += 1;
        }
        pos
    }

    /// Pool index for a constant, reusing an existing slot when the value is
    /// already present.
    pub fn add_const(&mut self, value: Value) -> u32 {
        if let Some(ix) = self.constants.iter().position(|v| *v == value) {
            return ix as u32;
        }
        self.constants.push(value);
        (self.constants.len() - 1) as u32
    }

    // ---- position tables ----

    /// Start attributing code to a new source file.
    pub fn begin_file(&mut self, filename: Value) {
        self.file_map.push((filename, 0));
        self.source_map.push(RESET as u8);
        self.source_map.push(0);
        self.cursor = 0;
    }

    /// Record that subsequent code originates at source byte `pos`.
    pub fn mark_source(&mut self, pos: u32) {
        let delta = pos as i64 - self.cursor as i64;
        self.cursor = pos;
        if delta == 0 {
            return;
        }
        self.push_source_delta(delta);
    }

    fn push_source_delta(&mut self, mut delta: i64) {
        // fold into the previous entry if it covered no code yet
        if self.source_map.len() >= 2 {
            let last_len = self.source_map[self.source_map.len() - 1];
            let last_delta = self.source_map[self.source_map.len() - 2] as i8;
            if last_len == 0 && last_delta != RESET {
                delta += i64::from(last_delta);
                self.source_map.truncate(self.source_map.len() - 2);
                if delta == 0 {
                    return;
                }
            }
        }
        while delta > 127 {
            self.source_map.push(127);
            self.source_map.push(0);
            delta -= 127;
        }
        while delta < -127 {
            self.source_map.push((-127i8) as u8);
            self.source_map.push(0);
            delta += 127;
        }
        self.source_map.push(delta as i8 as u8);
        self.source_map.push(0);
    }

    /// Filename symbol for a code offset.
    pub fn file_at(&self, pc: usize) -> Option<Value> {
        let mut covered = 0usize;
        for (file, len) in &self.file_map {
            covered += *len as usize;
            if pc < covered {
                return Some(*file);
            }
        }
        None
    }

    /// Source byte position for a code offset.
    pub fn source_pos_at(&self, pc: usize) -> Option<u32> {
        let mut source_pos: i64 = 0;
        let mut code_pos = 0usize;
        for entry in self.source_map.chunks_exact(2) {
            let delta = entry[0] as i8;
            let len = entry[1] as usize;
            if delta == RESET {
                source_pos = 0;
            } else {
                source_pos += i64::from(delta);
            }
            if code_pos + len > pc {
                return Some(source_pos.max(0) as u32);
            }
            code_pos += len;
        }
        None
    }

    // ---- serialization ----

    /// Sorted symbol listing used by the on-disk symbol section.
    fn sorted_symbols(&self) -> Vec<(u32, &str)> {
        let mut entries: Vec<(u32, &str)> = self.symbols.iter().collect();
        entries.sort_by_key(|(hash, _)| *hash);
        entries
    }

    pub fn serialize(&self) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(&MAGIC);
        out.extend_from_slice(&VERSION.to_le_bytes());

        push_section(&mut out, &self.code);

        let mut consts = Vec::new();
        for value in &self.constants {
            let (tag, payload) = value.raw();
            consts.extend_from_slice(&5u32.to_le_bytes());
            consts.push(tag);
            consts.extend_from_slice(&payload.to_le_bytes());
        }
        push_section(&mut out, &consts);

        let symbols = self.sorted_symbols();
        let mut names = Vec::new();
        names.extend_from_slice(&(symbols.len() as u32).to_le_bytes());
        let mut blob = Vec::new();
        for (_, name) in &symbols {
            names.extend_from_slice(&(blob.len() as u32).to_le_bytes());
            blob.extend_from_slice(name.as_bytes());
            blob.push(0);
        }
        names.extend_from_slice(&blob);
        push_section(&mut out, &names);

        push_section(&mut out, &self.source_map);

        let mut files = Vec::new();
        for (file, len) in &self.file_map {
            let index = symbols
                .iter()
                .position(|(hash, _)| Value::Symbol(*hash) == *file)
                .unwrap_or(0) as u32;
            files.extend_from_slice(&index.to_le_bytes());
            files.extend_from_slice(&len.to_le_bytes());
        }
        push_section(&mut out, &files);

        out
    }

    /// True when the buffer starts with the chunk magic.
    pub fn is_chunk(bytes: &[u8]) -> bool {
        bytes.len() >= 4 && bytes[..4] == MAGIC
    }

    pub fn deserialize(bytes: &[u8]) -> Result<Chunk, ChunkError> {
        let mut reader = Reader::new(bytes);
        if reader.bytes(4)? != MAGIC {
            return Err(ChunkError::BadMagic);
        }
        let version = reader.u32()?;
        if version != VERSION {
            return Err(ChunkError::BadVersion(version));
        }

        let code = reader.section()?.to_vec();

        let mut constants = Vec::new();
        let mut consts = Reader::new(reader.section()?);
        while !consts.at_end() {
            let len = consts.u32()?;
            if len != 5 {
                return Err(ChunkError::BadConstant);
            }
            let tag = consts.u8()?;
            let payload = consts.u32()?;
            constants.push(Value::from_raw(tag, payload).ok_or(ChunkError::BadConstant)?);
        }

        let mut symbols = SymbolTable::new();
        let mut names_by_index = Vec::new();
        let mut syms = Reader::new(reader.section()?);
        let count = syms.u32()? as usize;
        let mut offsets = Vec::with_capacity(count);
        for _ in 0..count {
            offsets.push(syms.u32()? as usize);
        }
        let blob = syms.rest();
        for offset in offsets {
            let end = blob[offset..]
                .iter()
                .position(|b| *b == 0)
                .ok_or(ChunkError::Truncated)?;
            let name = std::str::from_utf8(&blob[offset..offset + end])
                .map_err(|_| ChunkError::BadSymbol)?;
            names_by_index.push(symbols.intern(name));
        }

        let source_map = reader.section()?.to_vec();

        let mut file_map = Vec::new();
        let mut files = Reader::new(reader.section()?);
        while !files.at_end() {
            let index = files.u32()? as usize;
            let len = files.u32()?;
            let file = *names_by_index
                .get(index)
                .ok_or(ChunkError::BadSymbol)?;
            file_map.push((file, len));
        }

        Ok(Chunk {
            code,
            constants,
            symbols,
            source_map,
            file_map,
            cursor: 0,
        })
    }

    // ---- debugging ----

    fn format_const(&self, value: Value) -> String {
        match value {
            Value::Symbol(_) => match self.symbols.name(value) {
                Some(name) => format!(":{name}"),
                None => format!("{value:?}"),
            },
            Value::Int(n) => format!("{n}"),
            Value::Float(f) => format!("{f}"),
            v if v == NIL => "nil".to_string(),
            v => format!("{v:?}"),
        }
    }

    /// Human-readable listing of the whole chunk.
    pub fn disassemble(&self) -> String {
        use std::fmt::Write;
        let mut out = String::new();
        let mut pc = 0;
        while pc < self.code.len() {
            let Some(op) = Op::from_byte(self.code[pc]) else {
                let _ = writeln!(out, "{pc:04}  .byte {}", self.code[pc]);
                pc += 1;
                continue;
            };
            if pc + op.len() > self.code.len() {
                let _ = writeln!(out, "{pc:04}  {} <truncated>", op.name());
                break;
            }
            let _ = write!(out, "{pc:04}  {:<10}", op.name());
            match op {
                Op::Int | Op::Tuple | Op::Set | Op::Define | Op::Apply | Op::Module | Op::Load => {
                    let _ = write!(out, " {}", self.code[pc + 1]);
                }
                Op::Const => {
                    let value = self.constants[self.code[pc + 1] as usize];
                    let _ = write!(out, " {}", self.format_const(value));
                }
                Op::Const2 => {
                    let ix = u16::from_le_bytes([self.code[pc + 1], self.code[pc + 2]]) as usize;
                    let _ = write!(out, " {}", self.format_const(self.constants[ix]));
                }
                Op::Lookup => {
                    let _ = write!(out, " {} {}", self.code[pc + 1], self.code[pc + 2]);
                }
                Op::Jump | Op::Branch | Op::Link => {
                    let rel = i16::from_le_bytes([self.code[pc + 1], self.code[pc + 2]]);
                    let target = (pc + op.len()) as i64 + i64::from(rel);
                    let _ = write!(out, " {target:04}");
                }
                _ => {}
            }
            let _ = writeln!(out);
            pc += op.len();
        }
        out
    }
}

fn push_section(out: &mut Vec<u8>, bytes: &[u8]) {
    out.extend_from_slice(&(bytes.len() as u32).to_le_bytes());
    out.extend_from_slice(bytes);
}

struct Reader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(bytes: &'a [u8]) -> Self {
        Reader { bytes, pos: 0 }
    }

    fn at_end(&self) -> bool {
        self.pos >= self.bytes.len()
    }

    fn bytes(&mut self, n: usize) -> Result<&'a [u8], ChunkError> {
        if self.pos + n > self.bytes.len() {
            return Err(ChunkError::Truncated);
        }
        let slice = &self.bytes[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    fn u8(&mut self) -> Result<u8, ChunkError> {
        Ok(self.bytes(1)?[0])
    }

    fn u32(&mut self) -> Result<u32, ChunkError> {
        let b = self.bytes(4)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn section(&mut self) -> Result<&'a [u8], ChunkError> {
        let size = self.u32()? as usize;
        self.bytes(size)
    }

    fn rest(&mut self) -> &'a [u8] {
        let slice = &self.bytes[self.pos..];
        self.pos = self.bytes.len();
        slice
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChunkError {
    BadMagic,
    BadVersion(u32),
    Truncated,
    BadConstant,
    BadSymbol,
}

impl fmt::Display for ChunkError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChunkError::BadMagic => write!(f, "not a chunk file"),
            ChunkError::BadVersion(v) => write!(f, "unsupported chunk version {v}"),
            ChunkError::Truncated => write!(f, "chunk file is truncated"),
            ChunkError::BadConstant => write!(f, "malformed constant entry"),
            ChunkError::BadSymbol => write!(f, "malformed symbol table"),
        }
    }
}

impl std::error::Error for ChunkError {}
