//! Stack traces
//!
//! When the dispatch loop stops on an error, the saved continuations on the
//! call stack are still in place, newest first. Each one is a return
//! address pointing just past an `Apply`, so backing up by the apply width
//! lands inside the calling instruction; the chunk's file and source maps
//! then attribute it to a file and source position.

use crate::vm::Vm;
use cassette_core::chunk::Chunk;
use cassette_core::ops::Op;
use cassette_core::value::Value;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TraceFrame {
    pub file: Option<String>,
    pub source_pos: Option<u32>,
}

fn frame_for(pc: usize, chunk: &Chunk) -> TraceFrame {
    TraceFrame {
        file: chunk
            .file_at(pc)
            .and_then(|sym| chunk.symbols.name(sym))
            .map(str::to_string),
        source_pos: chunk.source_pos_at(pc),
    }
}

/// Frames from innermost to outermost, not including the error site itself.
pub fn stack_trace(vm: &Vm, chunk: &Chunk) -> Vec<TraceFrame> {
    let mut frames = Vec::new();
    let apply_width = Op::Apply.len();

    if vm.cont < chunk.len() {
        frames.push(frame_for(vm.cont.saturating_sub(apply_width), chunk));
    }
    for saved in vm.call_stack.iter().rev() {
        if let Value::Int(ret) = saved {
            let ret = (*ret).max(0) as usize;
            if ret < chunk.len() {
                frames.push(frame_for(ret.saturating_sub(apply_width), chunk));
            }
        }
    }
    frames
}
