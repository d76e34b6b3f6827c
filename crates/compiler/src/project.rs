//! Project builder
//!
//! Collects source files (the entry file, any extra files, and every `.ct`
//! file in the stdlib directory), parses each into a module, walks imports
//! breadth-first from the entry to decide what actually gets compiled, and
//! assembles everything into one chunk: each dependency as a cached thunk,
//! the entry last, ending in `Halt`.

use crate::compile::{Compiler, ModuleIndex, ModuleInfo};
use crate::config::BuildConfig;
use crate::parser::{self, Ast};
use crate::{BuildError, assemble};
use cassette_core::chunk::Chunk;
use cassette_core::heap::Heap;
use cassette_core::value::{SYM_MAIN, Value, symbol_hash};
use std::collections::{HashMap, HashSet, VecDeque};
use std::path::{Path, PathBuf};

const TAG_DO: Value = Value::Symbol(symbol_hash("do"));
const TAG_LET: Value = Value::Symbol(symbol_hash("let"));
const TAG_DEF: Value = Value::Symbol(symbol_hash("def"));
const TAG_IMPORT: Value = Value::Symbol(symbol_hash("import"));

/// One parsed source file.
pub struct ParsedModule {
    pub name: Value,
    pub filename: Value,
    pub display_name: String,
    pub source: String,
    pub body: Value,
    /// Module names this file imports
    pub imports: Vec<Value>,
    /// Top-level binding names in definition order
    pub exports: Vec<Value>,
}

/// Compile a whole project to a chunk.
pub fn build_project(
    entry: &Path,
    extras: &[PathBuf],
    config: &BuildConfig,
) -> Result<Chunk, BuildError> {
    let mut paths = vec![entry.to_path_buf()];
    paths.extend(extras.iter().cloned());
    if let Some(stdlib) = &config.stdlib {
        paths.extend(stdlib_files(stdlib)?);
    }

    let mut sources = Vec::with_capacity(paths.len());
    for path in &paths {
        let text = std::fs::read_to_string(path).map_err(|error| BuildError::Io {
            path: path.clone(),
            error: error.to_string(),
        })?;
        sources.push((path.display().to_string(), text));
    }
    build_sources(&sources)
}

/// Compile a single in-memory source as the entry module.
pub fn build_source(name: &str, source: &str) -> Result<Chunk, BuildError> {
    build_sources(&[(name.to_string(), source.to_string())])
}

/// Compile a set of named sources; the first is the entry.
pub fn build_sources(sources: &[(String, String)]) -> Result<Chunk, BuildError> {
    let mut heap = Heap::new();
    let mut modules = Vec::new();

    for (i, (display_name, text)) in sources.iter().enumerate() {
        let ast = parser::parse(text, &mut heap).map_err(|error| BuildError::Parse {
            file: display_name.clone(),
            source: text.clone(),
            error,
        })?;
        let module = scan_module(&mut heap, display_name, text, ast, i == 0)?;
        modules.push(module);
    }

    // reject duplicate module names up front
    let mut seen: HashMap<u32, usize> = HashMap::new();
    for (i, module) in modules.iter().enumerate() {
        let Value::Symbol(hash) = module.name else { continue };
        if let Some(first) = seen.insert(hash, i) {
            return Err(BuildError::Compile {
                file: modules[i].display_name.clone(),
                source: modules[i].source.clone(),
                error: crate::compile::CompileError {
                    message: format!(
                        "duplicate module \"{}\" (also defined in {})",
                        heap.symbols.name(module.name).unwrap_or("?"),
                        modules[first].display_name
                    ),
                    pos: 0,
                },
            });
        }
    }

    // breadth-first import scan from the entry decides what gets built
    let by_name: HashMap<u32, usize> = modules
        .iter()
        .enumerate()
        .skip(1)
        .filter_map(|(i, m)| m.name.as_symbol().map(|hash| (hash, i)))
        .collect();
    let mut needed = Vec::new();
    let mut visited = HashSet::new();
    let mut queue: VecDeque<Value> = modules[0].imports.iter().copied().collect();
    while let Some(name) = queue.pop_front() {
        let Value::Symbol(hash) = name else { continue };
        if !visited.insert(hash) {
            continue;
        }
        // unknown imports are reported with a position by the compiler
        if let Some(index) = by_name.get(&hash) {
            needed.push(*index);
            queue.extend(modules[*index].imports.iter().copied());
        }
    }

    if needed.len() > u8::MAX as usize {
        return Err(BuildError::Compile {
            file: modules[0].display_name.clone(),
            source: modules[0].source.clone(),
            error: crate::compile::CompileError {
                message: format!("too many modules ({})", needed.len()),
                pos: 0,
            },
        });
    }

    let mut index = ModuleIndex::new();
    for (id, module_ix) in needed.iter().enumerate() {
        let module = &modules[*module_ix];
        if let Value::Symbol(hash) = module.name {
            index.insert(
                hash,
                ModuleInfo {
                    id: id as u8,
                    exports: module.exports.clone(),
                },
            );
        }
    }

    let mut chunk = Chunk::new();
    for (id, module_ix) in needed.iter().enumerate() {
        let module = &modules[*module_ix];
        tracing::info!(module = module.display_name, "compiling");
        let mut compiler = Compiler::new(&mut heap, &index);
        let seq = compiler
            .compile_module_thunk(module.body, id as u8)
            .map_err(|error| BuildError::Compile {
                file: module.display_name.clone(),
                source: module.source.clone(),
                error,
            })?;
        assemble::assemble(&seq, module.filename, &heap.symbols, &mut chunk).map_err(
            |error| BuildError::Compile {
                file: module.display_name.clone(),
                source: module.source.clone(),
                error: crate::compile::CompileError {
                    message: error.to_string(),
                    pos: 0,
                },
            },
        )?;
    }

    let entry = &modules[0];
    tracing::info!(module = entry.display_name, "compiling entry");
    let mut compiler = Compiler::new(&mut heap, &index);
    let seq = compiler
        .compile_entry(entry.body)
        .map_err(|error| BuildError::Compile {
            file: entry.display_name.clone(),
            source: entry.source.clone(),
            error,
        })?;
    assemble::assemble(&seq, entry.filename, &heap.symbols, &mut chunk).map_err(|error| {
        BuildError::Compile {
            file: entry.display_name.clone(),
            source: entry.source.clone(),
            error: crate::compile::CompileError {
                message: error.to_string(),
                pos: 0,
            },
        }
    })?;

    Ok(chunk)
}

fn scan_module(
    heap: &mut Heap,
    display_name: &str,
    source: &str,
    ast: Ast,
    is_entry: bool,
) -> Result<ParsedModule, BuildError> {
    let filename = heap.symbols.intern(display_name);
    let name = match ast.module {
        Some(name) => name,
        None if is_entry => SYM_MAIN,
        None => {
            return Err(BuildError::Compile {
                file: display_name.to_string(),
                source: source.to_string(),
                error: crate::compile::CompileError {
                    message: "file defines no module (missing \"module\" header)".to_string(),
                    pos: 0,
                },
            });
        }
    };

    let stmts = if parser::node_tag(heap, ast.body) == Some(TAG_DO) {
        parser::node_children(heap, ast.body)
    } else {
        vec![ast.body]
    };

    let mut imports = Vec::new();
    let mut exports = Vec::new();
    for stmt in stmts {
        match parser::node_tag(heap, stmt) {
            Some(tag) if tag == TAG_LET || tag == TAG_DEF => {
                for assign in parser::node_children(heap, stmt) {
                    if let Some(name) = heap.head(assign) {
                        exports.push(name);
                    }
                }
            }
            Some(tag) if tag == TAG_IMPORT => {
                // imported bindings are not re-exported
                for entry in parser::node_children(heap, stmt) {
                    if let Some(name) = heap.head(entry) {
                        imports.push(name);
                    }
                }
            }
            _ => {}
        }
    }

    Ok(ParsedModule {
        name,
        filename,
        display_name: display_name.to_string(),
        source: source.to_string(),
        body: ast.body,
        imports,
        exports,
    })
}

fn stdlib_files(dir: &Path) -> Result<Vec<PathBuf>, BuildError> {
    let entries = std::fs::read_dir(dir).map_err(|error| BuildError::Io {
        path: dir.to_path_buf(),
        error: error.to_string(),
    })?;
    let mut files: Vec<PathBuf> = entries
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| path.extension().is_some_and(|ext| ext == "ct"))
        .collect();
    files.sort();
    Ok(files)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_source_builds() {
        let chunk = build_source("main.ct", "1 + 2").unwrap();
        assert!(!chunk.is_empty());
    }

    #[test]
    fn test_duplicate_modules_rejected() {
        let sources = [
            ("main.ct".to_string(), "import M\nM".to_string()),
            ("a.ct".to_string(), "module M\nlet x = 1".to_string()),
            ("b.ct".to_string(), "module M\nlet x = 2".to_string()),
        ];
        match build_sources(&sources) {
            Err(BuildError::Compile { error, .. }) => {
                assert!(error.message.contains("duplicate module"));
            }
            other => panic!("expected duplicate module error, got {:?}", other.is_ok()),
        }
    }

    #[test]
    fn test_non_entry_file_needs_module_header() {
        let sources = [
            ("main.ct".to_string(), "1".to_string()),
            ("extra.ct".to_string(), "2".to_string()),
        ];
        match build_sources(&sources) {
            Err(BuildError::Compile { error, .. }) => {
                assert!(error.message.contains("module"));
            }
            other => panic!("expected module header error, got {:?}", other.is_ok()),
        }
    }

    #[test]
    fn test_unimported_modules_are_skipped() {
        let sources = [
            ("main.ct".to_string(), "7".to_string()),
            ("lib.ct".to_string(), "module Lib\nlet broken = ".to_string()),
        ];
        // lib.ct fails to parse, so it can't be silently skipped
        assert!(build_sources(&sources).is_err());

        let sources = [
            ("main.ct".to_string(), "7".to_string()),
            (
                "lib.ct".to_string(),
                "module Lib\nlet x = 1".to_string(),
            ),
        ];
        // parses fine, never imported: not compiled, build succeeds
        assert!(build_sources(&sources).is_ok());
    }
}
