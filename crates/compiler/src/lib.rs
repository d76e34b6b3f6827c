//! Cassette compiler library
//!
//! The batch pipeline from source files to an executable chunk:
//! lexer → parser → compiler (instruction sequences with register
//! tracking) → assembler (label resolution and constant pooling). The
//! project builder at the top gathers files, orders modules by their
//! imports, and produces one chunk the VM can run.

pub mod assemble;
pub mod compile;
pub mod config;
pub mod env;
pub mod lexer;
pub mod parser;
pub mod printer;
pub mod project;
pub mod report;
pub mod seq;

pub use compile::{CompileError, Compiler, ModuleIndex, ModuleInfo};
pub use config::BuildConfig;
pub use parser::{Ast, ParseError};
pub use project::{build_project, build_source, build_sources};

use std::fmt;
use std::path::PathBuf;

/// A failed build, with enough context to print a useful report.
#[derive(Debug)]
pub enum BuildError {
    Io {
        path: PathBuf,
        error: String,
    },
    Parse {
        file: String,
        source: String,
        error: ParseError,
    },
    Compile {
        file: String,
        source: String,
        error: CompileError,
    },
}

impl fmt::Display for BuildError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BuildError::Io { path, error } => {
                write!(f, "cannot read {}: {error}", path.display())
            }
            BuildError::Parse { file, error, .. } => match error {
                ParseError::Partial => write!(f, "{file}: unexpected end of input"),
                ParseError::Syntax { .. } => write!(f, "{file}: {error}"),
            },
            BuildError::Compile { file, error, .. } => write!(f, "{file}: {error}"),
        }
    }
}

impl std::error::Error for BuildError {}
