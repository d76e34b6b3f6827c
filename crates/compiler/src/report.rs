//! User-facing error reports
//!
//! Renders build and runtime failures the way the CLI prints them: the
//! filename with a 1-based line and column, the message, a window of
//! source context with the offending spot marked, and for runtime errors
//! the stack trace recovered from the VM's saved continuations.

use crate::BuildError;
use crate::parser::ParseError;
use cassette_core::chunk::Chunk;
use cassette_runtime::error::VmError;
use cassette_runtime::trace::stack_trace;
use cassette_runtime::vm::Vm;
use std::fmt::Write;

const RED: &str = "\x1b[31m";
const RESET: &str = "\x1b[0m";

/// 0-based line and column of a byte offset.
pub fn line_col(source: &str, pos: u32) -> (u32, u32) {
    let mut line = 0;
    let mut column = 0;
    for (i, c) in source.char_indices() {
        if i as u32 >= pos {
            break;
        }
        if c == '\n' {
            line += 1;
            column = 0;
        } else {
            column += 1;
        }
    }
    (line, column)
}

/// The source line holding `pos`, with a caret underneath.
fn context(source: &str, pos: u32) -> String {
    let (line, column) = line_col(source, pos);
    let Some(text) = source.lines().nth(line as usize) else {
        return String::new();
    };
    let mut out = String::new();
    let _ = writeln!(out, "{:4} | {}", line + 1, text);
    let _ = writeln!(out, "     | {}^", " ".repeat(column as usize));
    out
}

pub fn render_build_error(err: &BuildError, color: bool) -> String {
    let (red, reset) = if color { (RED, RESET) } else { ("", "") };
    let mut out = String::new();
    match err {
        BuildError::Io { path, error } => {
            let _ = writeln!(out, "{red}Error: cannot read {}: {error}{reset}", path.display());
        }
        BuildError::Parse { file, source, error } => match error {
            ParseError::Partial => {
                let _ = writeln!(out, "{red}{file} Error: unexpected end of input{reset}");
            }
            ParseError::Syntax {
                message,
                pos,
                line,
                column,
            } => {
                let _ = writeln!(
                    out,
                    "{red}{file}:{}:{} Error: {message}{reset}",
                    line + 1,
                    column + 1
                );
                out.push_str(&context(source, *pos));
            }
        },
        BuildError::Compile { file, source, error } => {
            let (line, column) = line_col(source, error.pos);
            let _ = writeln!(
                out,
                "{red}{file}:{}:{} Error: {}{reset}",
                line + 1,
                column + 1,
                error.message
            );
            out.push_str(&context(source, error.pos));
        }
    }
    out
}

/// Map a code offset to `file:line:col` by reading the source file back.
fn locate(chunk: &Chunk, pc: usize) -> Option<(String, Option<(u32, u32, String)>)> {
    let file = chunk
        .file_at(pc)
        .and_then(|sym| chunk.symbols.name(sym))
        .map(str::to_string)?;
    let pos = chunk.source_pos_at(pc);
    let detail = pos.and_then(|pos| {
        let source = std::fs::read_to_string(&file).ok()?;
        let (line, column) = line_col(&source, pos);
        Some((line + 1, column + 1, context(&source, pos)))
    });
    Some((file, detail))
}

pub fn render_runtime_error(vm: &Vm, chunk: &Chunk, err: &VmError, color: bool) -> String {
    let (red, reset) = if color { (RED, RESET) } else { ("", "") };
    let mut out = String::new();

    match locate(chunk, err.pc) {
        Some((file, Some((line, column, ctx)))) => {
            let _ = writeln!(out, "{red}{file}:{line}:{column} {err}{reset}");
            out.push_str(&ctx);
        }
        Some((file, None)) => {
            let _ = writeln!(out, "{red}{file} {err}{reset}");
        }
        None => {
            let _ = writeln!(out, "{red}{err}{reset}");
        }
    }

    let frames = stack_trace(vm, chunk);
    if !frames.is_empty() {
        let _ = writeln!(out, "Stack trace:");
        for frame in frames {
            let file = frame.file.as_deref().unwrap_or("?");
            match frame.source_pos.and_then(|pos| {
                let source = std::fs::read_to_string(file).ok()?;
                Some(line_col(&source, pos))
            }) {
                Some((line, column)) => {
                    let _ = writeln!(out, "  at {file}:{}:{}", line + 1, column + 1);
                }
                None => {
                    let _ = writeln!(out, "  at {file}");
                }
            }
        }
    }
    out
}
